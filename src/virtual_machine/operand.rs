//! Bit-field codecs for packed operand bytes.
//!
//! Every structured operand has a pure `decode`/`encode` pair; the interpreter,
//! the combiner and the assembler all go through these instead of masking
//! bits by hand.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;

/// CONSTANT operand bit selecting argument addressing.
pub const ARGUMENT_FLAG: u8 = 0x80;
/// Largest index reachable through a CONSTANT operand.
pub const MAX_CONSTANT_INDEX: usize = 0x7f;
/// Largest source index a ZIPMAP operand can name.
pub const MAX_ZIPMAP_SOURCE: usize = 0x07;
/// Number of 32-bit lanes in a tier report.
pub const TIER_COUNT: u8 = 8;

/// Target of a CONSTANT fetch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstantOperand {
    /// Index into the constant pool.
    Constant(u8),
    /// Index into the current ZIPMAP argument frame.
    Argument(u8),
}

impl ConstantOperand {
    pub const fn decode(operand: u8) -> Self {
        if operand & ARGUMENT_FLAG != 0 {
            ConstantOperand::Argument(operand & !ARGUMENT_FLAG)
        } else {
            ConstantOperand::Constant(operand)
        }
    }

    /// Decodes against a pool of `pool_len` constants. An un-flagged index
    /// past the pool reads argument `index - pool_len`.
    pub const fn resolve(operand: u8, pool_len: usize) -> Self {
        match Self::decode(operand) {
            ConstantOperand::Constant(i) if i as usize >= pool_len => {
                ConstantOperand::Argument((i as usize - pool_len) as u8)
            }
            other => other,
        }
    }

    /// True for an un-flagged operand that [`resolve`](Self::resolve) sends
    /// to the argument frame.
    pub const fn is_extended(operand: u8, pool_len: usize) -> bool {
        operand & ARGUMENT_FLAG == 0 && operand as usize >= pool_len
    }

    pub fn encode(self) -> Result<u8, VMError> {
        let (index, flag) = match self {
            ConstantOperand::Constant(i) => (i, 0),
            ConstantOperand::Argument(i) => (i, ARGUMENT_FLAG),
        };
        if index as usize > MAX_CONSTANT_INDEX {
            return Err(VMError::invalid_operand(
                Instruction::Constant.mnemonic(),
                index,
                format!("index exceeds {MAX_CONSTANT_INDEX}"),
            ));
        }
        Ok(index | flag)
    }
}

/// ZIPMAP fields: bits 0-2 source, bits 3-4 lane selector, bits 5-7 extra value count.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ZipmapOperand {
    pub source: u8,
    /// `loop_size = 2^selector`.
    pub selector: u8,
    /// Values popped beyond the first.
    pub extra_values: u8,
}

impl ZipmapOperand {
    pub const fn decode(operand: u8) -> Self {
        Self {
            source: operand & 0x07,
            selector: (operand >> 3) & 0x03,
            extra_values: operand >> 5,
        }
    }

    pub fn encode(self) -> Result<u8, VMError> {
        let op = Instruction::Zipmap.mnemonic();
        if self.source as usize > MAX_ZIPMAP_SOURCE {
            return Err(VMError::invalid_operand(op, self.source, "source index exceeds 7"));
        }
        if self.selector > 3 {
            return Err(VMError::invalid_operand(op, self.selector, "lane selector exceeds 3"));
        }
        if self.extra_values > 7 {
            return Err(VMError::invalid_operand(op, self.extra_values, "more than 8 values"));
        }
        Ok(self.source | (self.selector << 3) | (self.extra_values << 5))
    }

    /// Builds the operand from a lane width in bits and a total value count.
    pub fn from_lane_bits(source: u8, lane_bits: u16, value_count: u8) -> Result<Self, VMError> {
        let op = Instruction::Zipmap.mnemonic();
        let selector = match lane_bits {
            256 => 0,
            128 => 1,
            64 => 2,
            32 => 3,
            _ => {
                return Err(VMError::invalid_operand(
                    op,
                    0,
                    format!("lane width {lane_bits} is not one of 256, 128, 64, 32"),
                ));
            }
        };
        if !(1..=8).contains(&value_count) {
            return Err(VMError::invalid_operand(op, value_count, "value count must be 1..=8"));
        }
        let operand = Self {
            source,
            selector,
            extra_values: value_count - 1,
        };
        operand.encode()?;
        Ok(operand)
    }

    pub const fn loop_size(&self) -> usize {
        1 << self.selector
    }

    pub const fn lane_bits(&self) -> u32 {
        256 >> self.selector
    }

    pub const fn value_count(&self) -> usize {
        self.extra_values as usize + 1
    }
}

/// SELECT_LTE combination rule across reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectLogic {
    /// A lane is eligible only if every report qualifies.
    Every,
    /// A lane is eligible if any report qualifies.
    Any,
}

/// SELECT_LTE reduction over eligible candidates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectMode {
    Min,
    Max,
    /// Last candidate in scan order.
    First,
}

/// SELECT_LTE fields: bit 7 logic, bits 5-6 mode, bits 0-4 report count.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SelectLteOperand {
    pub logic: SelectLogic,
    pub mode: SelectMode,
    pub length: u8,
}

impl SelectLteOperand {
    pub fn decode(operand: u8) -> Result<Self, VMError> {
        let op = Instruction::SelectLte.mnemonic();
        let logic = if operand & 0x80 == 0 {
            SelectLogic::Every
        } else {
            SelectLogic::Any
        };
        let mode = match (operand >> 5) & 0x03 {
            0 => SelectMode::Min,
            1 => SelectMode::Max,
            2 => SelectMode::First,
            _ => return Err(VMError::invalid_operand(op, operand, "mode 3 is undefined")),
        };
        let length = operand & 0x1f;
        if length == 0 {
            return Err(VMError::invalid_operand(op, operand, "zero reports selected"));
        }
        Ok(Self { logic, mode, length })
    }

    pub fn encode(self) -> Result<u8, VMError> {
        if self.length == 0 || self.length > 0x1f {
            return Err(VMError::invalid_operand(
                Instruction::SelectLte.mnemonic(),
                self.length,
                "report count must be 1..=31",
            ));
        }
        let logic = match self.logic {
            SelectLogic::Every => 0,
            SelectLogic::Any => 0x80,
        };
        let mode = match self.mode {
            SelectMode::Min => 0,
            SelectMode::Max => 1,
            SelectMode::First => 2,
        };
        Ok(logic | (mode << 5) | self.length)
    }
}

/// UPDATE_TIMES_FOR_TIER_RANGE fields: low nibble start tier (exclusive),
/// high nibble end tier (inclusive).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TierRange {
    pub start: u8,
    pub end: u8,
}

impl TierRange {
    pub fn decode(operand: u8) -> Result<Self, VMError> {
        Self::new(operand & 0x0f, operand >> 4).map_err(|_| {
            VMError::invalid_operand(
                Instruction::UpdateTimesForTierRange.mnemonic(),
                operand,
                format!("tiers must be within 0..={TIER_COUNT}"),
            )
        })
    }

    pub fn new(start: u8, end: u8) -> Result<Self, VMError> {
        if start > TIER_COUNT || end > TIER_COUNT {
            return Err(VMError::invalid_operand(
                Instruction::UpdateTimesForTierRange.mnemonic(),
                start.max(end),
                format!("tiers must be within 0..={TIER_COUNT}"),
            ));
        }
        Ok(Self { start, end })
    }

    pub const fn encode(self) -> u8 {
        self.start | (self.end << 4)
    }

    /// Zero-based lanes touched by the range, empty when `start >= end`.
    pub fn lanes(&self) -> std::ops::Range<usize> {
        if self.start >= self.end {
            0..0
        } else {
            self.start as usize..self.end as usize
        }
    }
}

/// Part of the runtime state a DEBUG opcode logs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugOperand {
    State,
    Stack,
    Constants,
    Arguments,
}

impl DebugOperand {
    pub fn decode(operand: u8) -> Result<Self, VMError> {
        match operand {
            0 => Ok(DebugOperand::State),
            1 => Ok(DebugOperand::Stack),
            2 => Ok(DebugOperand::Constants),
            3 => Ok(DebugOperand::Arguments),
            _ => Err(VMError::invalid_operand(
                Instruction::Debug.mnemonic(),
                operand,
                "expected 0 (state), 1 (stack), 2 (constants) or 3 (arguments)",
            )),
        }
    }

    pub const fn encode(self) -> u8 {
        self as u8
    }
}

/// Validates an N-ary window operand.
pub fn window(op: &'static str, operand: u8) -> Result<usize, VMError> {
    if operand == 0 {
        return Err(VMError::invalid_operand(op, operand, "window of zero values"));
    }
    Ok(operand as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_operand_flag() {
        assert_eq!(ConstantOperand::decode(0x05), ConstantOperand::Constant(5));
        assert_eq!(ConstantOperand::decode(0x81), ConstantOperand::Argument(1));
        assert_eq!(ConstantOperand::Argument(3).encode().unwrap(), 0x83);
        assert!(ConstantOperand::Constant(0x80).encode().is_err());
    }

    #[test]
    fn constant_operand_past_pool_reads_arguments() {
        assert_eq!(ConstantOperand::resolve(1, 2), ConstantOperand::Constant(1));
        assert_eq!(ConstantOperand::resolve(2, 2), ConstantOperand::Argument(0));
        assert_eq!(ConstantOperand::resolve(5, 2), ConstantOperand::Argument(3));
        assert_eq!(ConstantOperand::resolve(0x81, 2), ConstantOperand::Argument(1));
        assert_eq!(ConstantOperand::resolve(0, 0), ConstantOperand::Argument(0));
        assert!(ConstantOperand::is_extended(2, 2));
        assert!(!ConstantOperand::is_extended(1, 2));
        assert!(!ConstantOperand::is_extended(0x82, 2));
    }

    #[test]
    fn zipmap_fields() {
        // source 1, 8 lanes of 32 bits, 2 values
        let op = ZipmapOperand::from_lane_bits(1, 32, 2).unwrap();
        let byte = op.encode().unwrap();
        assert_eq!(byte, 0b001_11_001);
        let decoded = ZipmapOperand::decode(byte);
        assert_eq!(decoded, op);
        assert_eq!(decoded.loop_size(), 8);
        assert_eq!(decoded.lane_bits(), 32);
        assert_eq!(decoded.value_count(), 2);
    }

    #[test]
    fn zipmap_rejects_bad_widths() {
        assert!(ZipmapOperand::from_lane_bits(0, 16, 1).is_err());
        assert!(ZipmapOperand::from_lane_bits(0, 32, 0).is_err());
        assert!(ZipmapOperand::from_lane_bits(8, 32, 1).is_err());
    }

    #[test]
    fn select_lte_fields() {
        let op = SelectLteOperand::decode(0b1_01_00011).unwrap();
        assert_eq!(op.logic, SelectLogic::Any);
        assert_eq!(op.mode, SelectMode::Max);
        assert_eq!(op.length, 3);
        assert_eq!(op.encode().unwrap(), 0b1_01_00011);
    }

    #[test]
    fn select_lte_rejects_mode_three_and_zero_length() {
        assert!(matches!(
            SelectLteOperand::decode(0b0_11_00001),
            Err(VMError::InvalidOperand { .. })
        ));
        assert!(matches!(
            SelectLteOperand::decode(0b0_00_00000),
            Err(VMError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn tier_range_nibbles() {
        let range = TierRange::decode(0x82).unwrap();
        assert_eq!((range.start, range.end), (2, 8));
        assert_eq!(range.lanes(), 2..8);
        assert_eq!(range.encode(), 0x82);
        assert!(TierRange::decode(0x90).is_err());
        assert!(TierRange::decode(0x09).is_err());
        assert!(TierRange::decode(0x35).unwrap().lanes().is_empty());
    }

    #[test]
    fn debug_operand_values() {
        assert_eq!(DebugOperand::decode(1).unwrap(), DebugOperand::Stack);
        assert!(DebugOperand::decode(4).is_err());
    }

    #[test]
    fn window_rejects_zero() {
        assert_eq!(window("ADD", 3).unwrap(), 3);
        assert!(window("ADD", 0).is_err());
    }
}
