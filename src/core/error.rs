// This module defines the error types for the bit-slicing transformation using the
// thiserror crate. TransformError is the main error enum: a marker operand that does
// not trace back to fixed-size storage, an output buffer too small for the requested
// lanes, an operation shape the lowering rules cannot express (for example a shift
// whose operands are both sliced), a malformed mini-language statement, mismatched
// range lengths, a statement naming a buffer nobody sliced, and IR construction
// failures. Each variant carries the context needed for a readable diagnostic. The
// module also provides TransformResult<T> so every transformation step returns a typed
// result the pipeline turns into a session diagnostic instead of silently dropping it.

//! Error types for the bit-slicing transformation.
//!
//! Using thiserror for more idiomatic error handling.

use crate::ir::IrError;
use thiserror::Error;

/// Main error type for a single transformation step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Invalid operand: {reason}")]
    InvalidOperand { reason: String },

    #[error("Insufficient capacity: need at least {required} but buffer holds {available}")]
    InsufficientCapacity { required: u64, available: u64 },

    #[error("Unsupported operation with bit-sliced operand: {operation}")]
    Unsupported { operation: String },

    #[error("Malformed region description: {message}")]
    Grammar { message: String },

    #[error("Range length mismatch: {left} lanes vs {right} lanes")]
    RangeMismatch { left: u64, right: u64 },

    #[error("Unknown buffer: {name}")]
    UnknownBuffer { name: String },

    #[error(transparent)]
    Ir(#[from] IrError),
}

impl TransformError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        TransformError::InvalidOperand { reason: reason.into() }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        TransformError::Unsupported { operation: operation.into() }
    }

    pub fn grammar(message: impl Into<String>) -> Self {
        TransformError::Grammar { message: message.into() }
    }
}

/// Result type alias for transformation steps.
pub type TransformResult<T> = Result<T, TransformError>;
