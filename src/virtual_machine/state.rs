//! Per-evaluation runtime state.
//!
//! [`RuntimeState`] owns the value stack, the ZIPMAP arguments stack and
//! immutable copies of the program's constants and sources. Opcode handlers
//! receive it mutably; nothing else aliases it during a run.

use crate::types::u256::U256;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::program::Program;

/// ZIPMAP frames deeper than this are rejected.
pub const MAX_ZIPMAP_DEPTH: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub stack: Vec<U256>,
    /// Lane slices pushed by ZIPMAP, one frame per active iteration.
    pub arguments: Vec<U256>,
    pub constants: Vec<U256>,
    pub sources: Vec<Vec<u8>>,
    pub stack_length: usize,
    pub arguments_length: usize,
    frames: Vec<usize>,
}

impl RuntimeState {
    pub fn new(program: &Program) -> Self {
        Self {
            stack: Vec::with_capacity(program.stack_length),
            arguments: Vec::with_capacity(program.arguments_length),
            constants: program.constants.clone(),
            sources: program.sources.clone(),
            stack_length: program.stack_length,
            arguments_length: program.arguments_length,
            frames: Vec::new(),
        }
    }

    /// Clears the stack and all argument frames.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.arguments.clear();
        self.frames.clear();
    }

    pub fn push(&mut self, value: U256) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<U256, VMError> {
        self.stack.pop().ok_or(VMError::StackUnderflow {
            needed: 1,
            available: 0,
        })
    }

    /// Pops the top `n` values, returned deepest first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<U256>, VMError> {
        let available = self.stack.len();
        if n > available {
            return Err(VMError::StackUnderflow {
                needed: n,
                available,
            });
        }
        Ok(self.stack.split_off(available - n))
    }

    /// Pops a fixed number of values into an array, deepest first.
    pub fn pop_array<const N: usize>(&mut self) -> Result<[U256; N], VMError> {
        let values = self.pop_n(N)?;
        let mut out = [U256::ZERO; N];
        out.copy_from_slice(&values);
        Ok(out)
    }

    pub fn stack_at(&self, index: usize) -> Result<U256, VMError> {
        self.stack
            .get(index)
            .copied()
            .ok_or(VMError::StackUnderflow {
                needed: index + 1,
                available: self.stack.len(),
            })
    }

    pub fn constant(&self, index: usize) -> Result<U256, VMError> {
        self.constants
            .get(index)
            .copied()
            .ok_or(VMError::StackUnderflow {
                needed: index + 1,
                available: self.constants.len(),
            })
    }

    /// Reads `index` within the innermost argument frame.
    pub fn argument(&self, index: usize) -> Result<U256, VMError> {
        let frame = self.current_frame();
        frame.get(index).copied().ok_or(VMError::StackUnderflow {
            needed: index + 1,
            available: frame.len(),
        })
    }

    pub fn current_frame(&self) -> &[U256] {
        let base = self.frames.last().copied().unwrap_or(0);
        &self.arguments[base..]
    }

    pub fn zipmap_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_frame(&mut self, values: impl IntoIterator<Item = U256>) {
        self.frames.push(self.arguments.len());
        self.arguments.extend(values);
    }

    pub fn pop_frame(&mut self) {
        if let Some(base) = self.frames.pop() {
            self.arguments.truncate(base);
        }
    }
}
