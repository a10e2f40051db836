//! Errors raised while lowering to SSA.
//!
//! Every variant is an internal-compiler-error class: the input is presumed
//! well-typed, so any of these indicates a bug in an earlier phase (or in the
//! core itself). None of them are recoverable; the driver reports and aborts.

use lyre_common::Pos;
use thiserror::Error;

/// Errors that can occur during SSA construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SsaError {
    #[error("invalid conversion: `{from}` to `{to}`")]
    InvalidConversion { from: String, to: String },

    #[error("invalid transmute between differently sized types: `{from}` to `{to}`")]
    InvalidTransmute { from: String, to: String },

    #[error("cannot address a field through type `{ty}`")]
    UnGepable { ty: String },

    #[error("illegal lvalue load")]
    IllegalLValueLoad,

    #[error("unknown value for `{name}` at {pos}")]
    UnknownValue { name: String, pos: Pos },

    #[error("missing runtime member `{name}`")]
    MissingRuntimeMember { name: String },

    #[error("no type-info entry for `{ty}`")]
    MissingTypeInfo { ty: String },

    #[error("missing checker entry for node at {pos}")]
    MissingNodeInfo { pos: Pos },

    #[error("unexpected {what} at {pos}")]
    UnexpectedNode { what: &'static str, pos: Pos },

    #[error("branch target not found at {pos}")]
    MissingBranchTarget { pos: Pos },
}

/// Result type for SSA construction.
pub type SsaResult<T> = Result<T, SsaError>;
