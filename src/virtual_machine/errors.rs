use crate::types::encoding::DecodeError as CodecError;
use crate::virtual_machine::collaborator::CollaboratorError;

/// Errors raised while validating, linking, assembling or evaluating programs.
///
/// Every variant is fatal for the call that produced it; nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VMError {
    /// An opcode tried to read more values than the stack, constant pool or
    /// argument frame holds.
    #[error("stack underflow: needed {needed} value(s) but only {available} available")]
    StackUnderflow { needed: usize, available: usize },
    #[error("{op}: result exceeds 2^256-1")]
    ArithmeticOverflow { op: &'static str },
    #[error("{op}: result would be negative")]
    NegativeResult { op: &'static str },
    #[error("{op}: division by zero")]
    DivisionByZero { op: &'static str },
    /// No handler resolved for the pair. For CONTEXT/STORAGE the opcode is the
    /// standard one and the operand is the missing extension key.
    #[error("unknown opcode {opcode} (operand {operand})")]
    UnknownOpcode { opcode: u8, operand: u8 },
    #[error("{op}: invalid operand {operand:#04x}: {reason}")]
    InvalidOperand {
        op: &'static str,
        operand: u8,
        reason: String,
    },
    #[error("source index {index} out of range ({available} source(s))")]
    InvalidSourceIndex { index: usize, available: usize },
    #[error("source {source_index} ends mid-instruction at byte {offset}")]
    UnexpectedEndOfBytecode { source_index: usize, offset: usize },
    #[error("collaborator failure: {reason}")]
    CollaboratorFailure { reason: String },
    #[error("cannot combine programs: {reason}")]
    CombinerShapeMismatch { reason: String },
    #[error("decoding error: {reason}")]
    DecodeError { reason: String },
    #[error("line {line}, column {column}: {message}")]
    AssemblyError {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("invalid instruction name: {name}")]
    InvalidInstructionName { name: String },
    #[error("io error: {0}")]
    IoError(String),
}

impl VMError {
    pub fn invalid_operand(op: &'static str, operand: u8, reason: impl Into<String>) -> Self {
        VMError::InvalidOperand {
            op,
            operand,
            reason: reason.into(),
        }
    }

    pub fn shape(reason: impl Into<String>) -> Self {
        VMError::CombinerShapeMismatch {
            reason: reason.into(),
        }
    }
}

impl From<CollaboratorError> for VMError {
    fn from(err: CollaboratorError) -> Self {
        VMError::CollaboratorFailure {
            reason: err.to_string(),
        }
    }
}

impl From<CodecError> for VMError {
    fn from(err: CodecError) -> Self {
        VMError::DecodeError {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for VMError {
    fn from(err: std::io::Error) -> Self {
        VMError::IoError(err.to_string())
    }
}
