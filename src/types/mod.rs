//! Primitive types shared by the interpreter, combiner and binaries.
//!
//! - `U256`: the VM word
//! - `Address`: 20-byte account addresses carried as words
//! - `Hash`: SHA3-256 fingerprints
//! - `encoding`: the deterministic binary codec

pub mod address;
pub mod encoding;
pub mod hash;
pub mod u256;
pub mod wrapper_types;
