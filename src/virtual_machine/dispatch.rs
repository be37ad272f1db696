//! Opcode resolution and extension tables.
//!
//! Resolution order for a `(opcode, operand)` pair:
//! 1. the override map, keyed by opcode
//! 2. the standard table; `CONTEXT` and `STORAGE` route to their extension
//!    maps keyed by operand
//! 3. the domain map, for opcodes past the standard table
//! 4. nothing, which the interpreter reports as `UnknownOpcode`

use crate::types::u256::U256;
use crate::virtual_machine::collaborator::ExecContext;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::state::RuntimeState;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opcode body supplied by the host.
#[async_trait::async_trait]
pub trait OpHandler: Send + Sync {
    async fn call(&self, state: &mut RuntimeState, operand: u8, ctx: &ExecContext) -> Result<(), VMError>;
}

#[async_trait::async_trait]
impl<F> OpHandler for F
where
    F: Fn(&mut RuntimeState, u8, &ExecContext) -> Result<(), VMError> + Send + Sync,
{
    async fn call(&self, state: &mut RuntimeState, operand: u8, ctx: &ExecContext) -> Result<(), VMError> {
        self(state, operand, ctx)
    }
}

/// Pushes `ctx.context[operand]`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadContext;

#[async_trait::async_trait]
impl OpHandler for ReadContext {
    async fn call(&self, state: &mut RuntimeState, operand: u8, ctx: &ExecContext) -> Result<(), VMError> {
        let value = ctx
            .context
            .get(operand as usize)
            .copied()
            .ok_or(VMError::StackUnderflow {
                needed: operand as usize + 1,
                available: ctx.context.len(),
            })?;
        state.push(value);
        Ok(())
    }
}

/// Pushes a fixed word, ignoring the operand.
#[derive(Clone, Copy, Debug)]
pub struct StaticValue(pub U256);

#[async_trait::async_trait]
impl OpHandler for StaticValue {
    async fn call(&self, state: &mut RuntimeState, _operand: u8, _ctx: &ExecContext) -> Result<(), VMError> {
        state.push(self.0);
        Ok(())
    }
}

/// Resolved route for one instruction.
pub enum Dispatch<'a> {
    Override(&'a Arc<dyn OpHandler>),
    Standard(Instruction),
    Context(&'a Arc<dyn OpHandler>),
    Storage(&'a Arc<dyn OpHandler>),
    Local(&'a Arc<dyn OpHandler>),
    Unknown,
}

impl fmt::Debug for Dispatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Override(_) => write!(f, "Override"),
            Dispatch::Standard(instr) => write!(f, "Standard({instr})"),
            Dispatch::Context(_) => write!(f, "Context"),
            Dispatch::Storage(_) => write!(f, "Storage"),
            Dispatch::Local(_) => write!(f, "Local"),
            Dispatch::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Host-supplied handlers, shared read-only between interpreters.
#[derive(Clone, Default)]
pub struct OpTable {
    overrides: HashMap<u8, Arc<dyn OpHandler>>,
    context: HashMap<u8, Arc<dyn OpHandler>>,
    storage: HashMap<u8, Arc<dyn OpHandler>>,
    local: HashMap<u8, Arc<dyn OpHandler>>,
}

impl OpTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any opcode, standard or not.
    pub fn override_op(mut self, opcode: u8, handler: impl OpHandler + 'static) -> Self {
        self.overrides.insert(opcode, Arc::new(handler));
        self
    }

    pub fn context(mut self, key: u8, handler: impl OpHandler + 'static) -> Self {
        self.context.insert(key, Arc::new(handler));
        self
    }

    pub fn storage(mut self, key: u8, handler: impl OpHandler + 'static) -> Self {
        self.storage.insert(key, Arc::new(handler));
        self
    }

    /// Registers a domain opcode. Standard opcodes win over this map, so only
    /// numbers from `LOCAL_OPS_START` up are reachable here.
    pub fn local(mut self, opcode: u8, handler: impl OpHandler + 'static) -> Self {
        self.local.insert(opcode, Arc::new(handler));
        self
    }

    pub fn resolve(&self, opcode: u8, operand: u8) -> Dispatch<'_> {
        if let Some(handler) = self.overrides.get(&opcode) {
            return Dispatch::Override(handler);
        }
        match Instruction::try_from(opcode) {
            Ok(Instruction::Context) => self
                .context
                .get(&operand)
                .map_or(Dispatch::Unknown, Dispatch::Context),
            Ok(Instruction::Storage) => self
                .storage
                .get(&operand)
                .map_or(Dispatch::Unknown, Dispatch::Storage),
            Ok(instr) => Dispatch::Standard(instr),
            Err(_) => self
                .local
                .get(&opcode)
                .map_or(Dispatch::Unknown, Dispatch::Local),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::isa::LOCAL_OPS_START;
    use crate::virtual_machine::program::Program;

    fn push_seven(state: &mut RuntimeState, _operand: u8, _ctx: &ExecContext) -> Result<(), VMError> {
        state.push(U256::from(7u8));
        Ok(())
    }

    #[test]
    fn override_beats_standard() {
        let table = OpTable::new().override_op(Instruction::Add.opcode(), push_seven);
        assert!(matches!(table.resolve(Instruction::Add.opcode(), 2), Dispatch::Override(_)));
        assert!(matches!(
            table.resolve(Instruction::Sub.opcode(), 2),
            Dispatch::Standard(Instruction::Sub)
        ));
    }

    #[test]
    fn context_and_storage_route_by_operand() {
        let table = OpTable::new().context(3, ReadContext).storage(0, StaticValue(U256::ONE));
        assert!(matches!(table.resolve(Instruction::Context.opcode(), 3), Dispatch::Context(_)));
        assert!(matches!(table.resolve(Instruction::Context.opcode(), 4), Dispatch::Unknown));
        assert!(matches!(table.resolve(Instruction::Storage.opcode(), 0), Dispatch::Storage(_)));
        assert!(matches!(table.resolve(Instruction::Storage.opcode(), 3), Dispatch::Unknown));
    }

    #[test]
    fn local_only_reached_past_standard_table() {
        let table = OpTable::new()
            .local(LOCAL_OPS_START, push_seven)
            .local(Instruction::Add.opcode(), push_seven);
        assert!(matches!(table.resolve(LOCAL_OPS_START, 0), Dispatch::Local(_)));
        assert!(matches!(
            table.resolve(Instruction::Add.opcode(), 1),
            Dispatch::Standard(Instruction::Add)
        ));
        assert!(matches!(table.resolve(LOCAL_OPS_START + 1, 0), Dispatch::Unknown));
    }

    #[test]
    fn override_beats_extension_routing() {
        let table = OpTable::new()
            .context(0, ReadContext)
            .override_op(Instruction::Context.opcode(), push_seven);
        assert!(matches!(table.resolve(Instruction::Context.opcode(), 0), Dispatch::Override(_)));
    }

    #[tokio::test]
    async fn read_context_pushes_indexed_word() {
        let mut state = RuntimeState::new(&Program::default());
        let ctx = ExecContext::new().with_context(vec![U256::from(4u8), U256::from(5u8)]);
        ReadContext.call(&mut state, 1, &ctx).await.unwrap();
        assert_eq!(state.stack, vec![U256::from(5u8)]);
        assert!(matches!(
            ReadContext.call(&mut state, 2, &ctx).await,
            Err(VMError::StackUnderflow { needed: 3, available: 2 })
        ));
    }
}
