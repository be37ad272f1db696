//! RainVM library.
//!
//! Provides the off-chain interpreter, tier-report algebra, program combiner
//! and assembler, along with the word and codec types they share.

pub mod types;
pub mod utils;
pub mod virtual_machine;
