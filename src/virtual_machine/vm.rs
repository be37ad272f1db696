//! Stack-machine interpreter.
//!
//! [`RainVM`] walks the `(opcode, operand)` pairs of one source, resolves each
//! through its [`OpTable`] and runs the matching body. Standard opcode bodies
//! are split by family across the `vm/` submodules; ZIPMAP re-enters
//! [`RainVM::eval`] for its sub-source, so evaluation returns a boxed future.

mod external;
mod math;
mod tier;
mod zipmap;


use crate::types::u256::U256;
use crate::types::wrapper_types::BoxFuture;
use crate::virtual_machine::collaborator::ExecContext;
use crate::virtual_machine::dispatch::{Dispatch, OpTable};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{ConstantOperand, DebugOperand};
use crate::virtual_machine::program::{Program, instructions};
use crate::virtual_machine::state::RuntimeState;
use std::sync::Arc;

pub use math::{fixed_point_div, fixed_point_mul, scale_by, scale_n, scale18};

macro_rules! exec_vm {
    // Entry point
    (
        vm = $vm:ident,
        ctx = $ctx:ident,
        instr = $instr:ident,
        operand = $operand:ident,
        { $( $variant:ident => $handler:ident $args:tt ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant => exec_vm!(@call $vm, $ctx, $instr, $operand, $handler, $args),
            )*
        }
    }};

    // Handler reading collaborators (awaits)
    (@call $vm:ident, $ctx:ident, $instr:ident, $operand:ident, $handler:ident, (ctx)) => {
        $vm.$handler($instr, $ctx, $operand).await
    };

    // Pure handler
    (@call $vm:ident, $ctx:ident, $instr:ident, $operand:ident, $handler:ident, ()) => {
        $vm.$handler($instr, $operand)
    };
}

/// Interpreter bound to one program.
pub struct RainVM {
    state: RuntimeState,
    table: Arc<OpTable>,
}

impl RainVM {
    /// Creates an interpreter with only the standard opcodes.
    pub fn new(program: &Program) -> Self {
        Self::with_table(program, Arc::new(OpTable::default()))
    }

    /// Creates an interpreter whose dispatch consults `table` first.
    pub fn with_table(program: &Program, table: Arc<OpTable>) -> Self {
        Self {
            state: RuntimeState::new(program),
            table,
        }
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Evaluates `entrypoint` from an empty stack and returns the final stack,
    /// bottom first.
    pub async fn run(&mut self, ctx: &ExecContext, entrypoint: usize) -> Result<Vec<U256>, VMError> {
        self.state.reset();
        self.eval(ctx, entrypoint).await?;
        Ok(std::mem::take(&mut self.state.stack))
    }

    /// Evaluates one source against the current state.
    pub fn eval<'a>(&'a mut self, ctx: &'a ExecContext, source_index: usize) -> BoxFuture<'a, Result<(), VMError>> {
        Box::pin(async move {
            let source = self
                .state
                .sources
                .get(source_index)
                .cloned()
                .ok_or(VMError::InvalidSourceIndex {
                    index: source_index,
                    available: self.state.sources.len(),
                })?;
            if source.len() % 2 != 0 {
                return Err(VMError::UnexpectedEndOfBytecode {
                    source_index,
                    offset: source.len() - 1,
                });
            }

            let table = Arc::clone(&self.table);
            for (opcode, operand) in instructions(&source) {
                match table.resolve(opcode, operand) {
                    Dispatch::Override(handler)
                    | Dispatch::Context(handler)
                    | Dispatch::Storage(handler)
                    | Dispatch::Local(handler) => handler.call(&mut self.state, operand, ctx).await?,
                    Dispatch::Standard(instr) => self.exec(instr, ctx, operand).await?,
                    Dispatch::Unknown => return Err(VMError::UnknownOpcode { opcode, operand }),
                }
            }
            Ok(())
        })
    }

    async fn exec(&mut self, instr: Instruction, ctx: &ExecContext, operand: u8) -> Result<(), VMError> {
        exec_vm! {
            vm = self,
            ctx = ctx,
            instr = instr,
            operand = operand,
            {
                // Core
                Constant => op_constant(),
                Stack => op_stack(),
                Context => op_unrouted(),
                Storage => op_unrouted(),
                Zipmap => op_zipmap(ctx),
                Debug => op_debug(),
                // Token reads
                IErc20BalanceOf => op_erc20_balance_of(ctx),
                IErc20TotalSupply => op_erc20_total_supply(ctx),
                IErc20SnapshotBalanceOfAt => op_erc20_snapshot_balance_of_at(ctx),
                IErc20SnapshotTotalSupplyAt => op_erc20_snapshot_total_supply_at(ctx),
                IErc721BalanceOf => op_erc721_balance_of(ctx),
                IErc721OwnerOf => op_erc721_owner_of(ctx),
                IErc1155BalanceOf => op_erc1155_balance_of(ctx),
                IErc1155BalanceOfBatch => op_erc1155_balance_of_batch(ctx),
                // Environment
                BlockNumber => op_block_number(ctx),
                Sender => op_sender(ctx),
                ThisAddress => op_this_address(ctx),
                BlockTimestamp => op_block_timestamp(ctx),
                // Fixed point
                Scale18 => op_scale(),
                Scale18Div => op_scale18_binary(),
                Scale18Mul => op_scale18_binary(),
                ScaleBy => op_scale(),
                ScaleN => op_scale(),
                // Logic
                Any => op_any(),
                EagerIf => op_eager_if(),
                EqualTo => op_compare(),
                Every => op_every(),
                GreaterThan => op_compare(),
                IsZero => op_is_zero(),
                LessThan => op_compare(),
                // Math
                SaturatingAdd => op_fold(),
                SaturatingMul => op_fold(),
                SaturatingSub => op_fold(),
                Add => op_fold(),
                Div => op_fold(),
                Exp => op_fold(),
                Max => op_fold(),
                Min => op_fold(),
                Mod => op_fold(),
                Mul => op_fold(),
                Sub => op_fold(),
                // Tier
                ITierV2Report => op_tier_report(ctx),
                ITierV2ReportTimeForTier => op_tier_report_time_for_tier(ctx),
                SaturatingDiff => op_saturating_diff(),
                SelectLte => op_select_lte(),
                UpdateTimesForTierRange => op_update_times_for_tier_range(),
            }
        }
    }

    fn op_constant(&mut self, _instr: Instruction, operand: u8) -> Result<(), VMError> {
        let value = match ConstantOperand::resolve(operand, self.state.constants.len()) {
            ConstantOperand::Constant(i) => self.state.constant(i as usize)?,
            ConstantOperand::Argument(i) => self.state.argument(i as usize)?,
        };
        self.state.push(value);
        Ok(())
    }

    fn op_stack(&mut self, _instr: Instruction, operand: u8) -> Result<(), VMError> {
        let value = self.state.stack_at(operand as usize)?;
        self.state.push(value);
        Ok(())
    }

    /// CONTEXT/STORAGE only reach here when no extension handler is registered.
    fn op_unrouted(&mut self, instr: Instruction, operand: u8) -> Result<(), VMError> {
        Err(VMError::UnknownOpcode {
            opcode: instr.opcode(),
            operand,
        })
    }

    fn op_debug(&mut self, instr: Instruction, operand: u8) -> Result<(), VMError> {
        let state = &self.state;
        match DebugOperand::decode(operand)? {
            DebugOperand::State => crate::info!(
                "{instr}: stack={} arguments={} constants={} sources={} zipmap_depth={}",
                render(&state.stack),
                render(&state.arguments),
                render(&state.constants),
                state.sources.len(),
                state.zipmap_depth()
            ),
            DebugOperand::Stack => crate::info!("{instr}: stack={}", render(&state.stack)),
            DebugOperand::Constants => crate::info!("{instr}: constants={}", render(&state.constants)),
            DebugOperand::Arguments => crate::info!("{instr}: arguments={}", render(state.current_frame())),
        }
        Ok(())
    }
}

fn render(values: &[U256]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(", "))
}
