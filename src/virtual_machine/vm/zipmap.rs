//! ZIPMAP: evaluate a sub-source once per lane of the popped values.
//!
//! Lanes are visited from the most significant downward. Each iteration gets
//! a fresh argument frame holding that lane of every popped value, deepest
//! value first, which the sub-source reads with argument-addressed CONSTANT.

use super::RainVM;
use crate::types::u256::U256;
use crate::virtual_machine::collaborator::ExecContext;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::ZipmapOperand;
use crate::virtual_machine::state::MAX_ZIPMAP_DEPTH;

/// Slices `value` at lane `lane` (0 = most significant) of width `lane_bits`.
pub(crate) fn lane_slice(value: U256, lane: usize, loop_size: usize, lane_bits: u32) -> U256 {
    let shift = lane_bits * (loop_size - 1 - lane) as u32;
    (value >> shift) & U256::low_mask(lane_bits)
}

impl RainVM {
    pub(super) async fn op_zipmap(
        &mut self,
        instr: Instruction,
        ctx: &ExecContext,
        operand: u8,
    ) -> Result<(), VMError> {
        let zipmap = ZipmapOperand::decode(operand);
        if self.state.zipmap_depth() >= MAX_ZIPMAP_DEPTH {
            return Err(VMError::invalid_operand(
                instr.mnemonic(),
                operand,
                format!("more than {MAX_ZIPMAP_DEPTH} nested frames"),
            ));
        }
        let source = zipmap.source as usize;
        if source >= self.state.sources.len() {
            return Err(VMError::InvalidSourceIndex {
                index: source,
                available: self.state.sources.len(),
            });
        }

        let values = self.state.pop_n(zipmap.value_count())?;
        let loop_size = zipmap.loop_size();
        let lane_bits = zipmap.lane_bits();
        for lane in 0..loop_size {
            let before = self.state.stack.len();
            self.state.push_frame(
                values
                    .iter()
                    .map(|&v| lane_slice(v, lane, loop_size, lane_bits)),
            );
            let result = self.eval(ctx, source).await;
            self.state.pop_frame();
            result?;

            let after = self.state.stack.len();
            if after != before + 1 {
                crate::warn!(
                    "{instr}: iteration {lane} of source {source} left {after} value(s) on a stack of {before}, expected one result"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_are_msb_first() {
        let value: U256 = "0x0000000100000002000000030000000400000005000000060000000700000008"
            .parse()
            .unwrap();
        let lanes: Vec<U256> = (0..8).map(|i| lane_slice(value, i, 8, 32)).collect();
        let expected: Vec<U256> = (1u8..=8).map(U256::from).collect();
        assert_eq!(lanes, expected);
    }

    #[test]
    fn single_lane_is_whole_word() {
        assert_eq!(lane_slice(U256::MAX, 0, 1, 256), U256::MAX);
    }

    #[test]
    fn half_words() {
        let value = (U256::from(7u8) << 128) | U256::from(9u8);
        assert_eq!(lane_slice(value, 0, 2, 128), U256::from(7u8));
        assert_eq!(lane_slice(value, 1, 2, 128), U256::from(9u8));
    }
}
