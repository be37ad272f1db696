//! Opcodes that read chain state through the collaborators in `ExecContext`.
//!
//! Each body pops its inputs first, so a short stack reports `StackUnderflow`
//! before a missing collaborator does.

use super::RainVM;
use crate::types::address::Address;
use crate::virtual_machine::collaborator::ExecContext;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::TIER_COUNT;

impl RainVM {
    pub(super) async fn op_erc20_balance_of(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let [token, account] = self.state.pop_array::<2>()?;
        let balance = ctx
            .provider()?
            .erc20_balance_of(token.into(), account.into())
            .await?;
        self.state.push(balance);
        Ok(())
    }

    pub(super) async fn op_erc20_total_supply(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let token = self.state.pop()?;
        let supply = ctx.provider()?.erc20_total_supply(token.into()).await?;
        self.state.push(supply);
        Ok(())
    }

    pub(super) async fn op_erc20_snapshot_balance_of_at(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let [token, account, snapshot] = self.state.pop_array::<3>()?;
        let balance = ctx
            .provider()?
            .erc20_snapshot_balance_of_at(token.into(), account.into(), snapshot)
            .await?;
        self.state.push(balance);
        Ok(())
    }

    pub(super) async fn op_erc20_snapshot_total_supply_at(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let [token, snapshot] = self.state.pop_array::<2>()?;
        let supply = ctx
            .provider()?
            .erc20_snapshot_total_supply_at(token.into(), snapshot)
            .await?;
        self.state.push(supply);
        Ok(())
    }

    pub(super) async fn op_erc721_balance_of(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let [token, account] = self.state.pop_array::<2>()?;
        let balance = ctx
            .provider()?
            .erc721_balance_of(token.into(), account.into())
            .await?;
        self.state.push(balance);
        Ok(())
    }

    pub(super) async fn op_erc721_owner_of(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let [token, id] = self.state.pop_array::<2>()?;
        let owner = ctx.provider()?.erc721_owner_of(token.into(), id).await?;
        self.state.push(owner.to_word());
        Ok(())
    }

    pub(super) async fn op_erc1155_balance_of(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let [token, account, id] = self.state.pop_array::<3>()?;
        let balance = ctx
            .provider()?
            .erc1155_balance_of(token.into(), account.into(), id)
            .await?;
        self.state.push(balance);
        Ok(())
    }

    /// Pops the token, `operand` accounts and `operand` ids; pushes one
    /// balance per pair.
    pub(super) async fn op_erc1155_balance_of_batch(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        operand: u8,
    ) -> Result<(), VMError> {
        let n = operand as usize;
        let values = self.state.pop_n(1 + 2 * n)?;
        let token = Address::from_word(values[0]);
        let accounts: Vec<Address> = values[1..=n].iter().map(|&v| v.into()).collect();
        let ids = &values[n + 1..];

        let balances = ctx
            .provider()?
            .erc1155_balance_of_batch(token, &accounts, ids)
            .await?;
        if balances.len() != n {
            return Err(VMError::CollaboratorFailure {
                reason: format!(
                    "erc1155_balance_of_batch returned {} balance(s) for {n} pair(s)",
                    balances.len()
                ),
            });
        }
        self.state.stack.extend(balances);
        Ok(())
    }

    pub(super) async fn op_block_number(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let number = ctx.provider()?.block_number().await?;
        self.state.push(number);
        Ok(())
    }

    pub(super) async fn op_sender(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let sender = ctx.signer()?.address().await?;
        self.state.push(sender.to_word());
        Ok(())
    }

    pub(super) async fn op_this_address(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let address = ctx.this_address()?;
        self.state.push(address.to_word());
        Ok(())
    }

    /// Timestamp of the provider's current block.
    pub(super) async fn op_block_timestamp(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        _operand: u8,
    ) -> Result<(), VMError> {
        let provider = ctx.provider()?;
        let block = provider.block_number().await?;
        let timestamp = provider.block_timestamp(block).await?;
        self.state.push(timestamp);
        Ok(())
    }

    /// Pops the tier contract, the account and `operand` context words.
    pub(super) async fn op_tier_report(
        &mut self,
        _instr: Instruction,
        ctx: &ExecContext,
        operand: u8,
    ) -> Result<(), VMError> {
        let values = self.state.pop_n(2 + operand as usize)?;
        let report = ctx
            .provider()?
            .tier_report(values[0].into(), values[1].into(), &values[2..])
            .await?;
        self.state.push(report);
        Ok(())
    }

    /// Pops the tier contract, the account, the tier and `operand` context words.
    pub(super) async fn op_tier_report_time_for_tier(
        &mut self,
        instr: Instruction,
        ctx: &ExecContext,
        operand: u8,
    ) -> Result<(), VMError> {
        let values = self.state.pop_n(3 + operand as usize)?;
        let tier = values[2]
            .to_u64()
            .filter(|t| (1..=TIER_COUNT as u64).contains(t))
            .ok_or_else(|| {
                VMError::invalid_operand(
                    instr.mnemonic(),
                    operand,
                    format!("tier {} outside 1..={TIER_COUNT}", values[2]),
                )
            })?;
        let time = ctx
            .provider()?
            .tier_report_time_for_tier(values[0].into(), values[1].into(), tier as u8, &values[3..])
            .await?;
        self.state.push(time);
        Ok(())
    }
}
