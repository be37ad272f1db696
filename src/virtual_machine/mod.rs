//! Off-chain RainVM: a stack machine over 256-bit words.
//!
//! Programs are lists of sources, each a flat run of `(opcode, operand)`
//! byte pairs, plus a constant pool. The interpreter evaluates one source
//! against an [`collaborator::ExecContext`] and hands back the final stack.
//!
//! # Architecture
//!
//! - **Dispatch**: override table, then the standard opcodes, then the
//!   CONTEXT/STORAGE extension maps and domain opcodes from an [`dispatch::OpTable`]
//! - **ZIPMAP**: re-enters the interpreter once per lane of its inputs, with
//!   the lane slices visible as arguments
//! - **Tier reports**: words of eight 32-bit lanes, see [`tier_report`]
//! - **Linking**: [`combiner`] joins independently built programs
//!
//! # Modules
//!
//! - [`assembler`]: text format to [`program::Program`]
//! - [`collaborator`]: chain-read traits and in-memory implementations
//! - [`combinators`]: ready-made program shapes
//! - [`combiner`]: program linking with reference relocation
//! - [`dispatch`]: opcode resolution and extension tables
//! - [`errors`]: the [`errors::VMError`] taxonomy
//! - [`isa`]: standard opcode numbering and mnemonics
//! - [`operand`]: packed operand codecs
//! - [`program`]: program model and its binary/JSON formats
//! - [`state`]: per-run stacks
//! - [`tier_report`]: lane algebra
//! - [`vm`]: the interpreter

pub mod assembler;
pub mod collaborator;
pub mod combinators;
pub mod combiner;
pub mod dispatch;
pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod program;
pub mod state;
pub mod tier_report;
pub mod vm;
