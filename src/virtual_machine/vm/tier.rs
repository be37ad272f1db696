//! Tier-report opcode bodies. The lane algebra lives in `tier_report`.

use super::RainVM;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{SelectLteOperand, TierRange};
use crate::virtual_machine::tier_report;

impl RainVM {
    pub(super) fn op_saturating_diff(&mut self, _instr: Instruction, _operand: u8) -> Result<(), VMError> {
        let [a, b] = self.state.pop_array::<2>()?;
        self.state.push(tier_report::saturating_diff(a, b));
        Ok(())
    }

    /// Pops the threshold, then `length` reports.
    pub(super) fn op_select_lte(&mut self, _instr: Instruction, operand: u8) -> Result<(), VMError> {
        let select = SelectLteOperand::decode(operand)?;
        let threshold = self.state.pop()?;
        let reports = self.state.pop_n(select.length as usize)?;
        self.state.push(tier_report::select_lte(
            &reports,
            threshold,
            select.logic,
            select.mode,
        ));
        Ok(())
    }

    pub(super) fn op_update_times_for_tier_range(
        &mut self,
        _instr: Instruction,
        operand: u8,
    ) -> Result<(), VMError> {
        let range = TierRange::decode(operand)?;
        let [report, value] = self.state.pop_array::<2>()?;
        self.state
            .push(tier_report::update_times_for_tier_range(report, range, value));
        Ok(())
    }
}
