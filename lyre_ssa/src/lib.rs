//! SSA construction and CFG optimization core for the Lyre compiler.
//!
//! This crate lowers the checked AST into a static-single-assignment IR
//! organized as a control-flow graph of basic blocks, then simplifies the
//! graph: unreachable-block removal, block fusion, referrer computation, and
//! dominator-tree construction. The result is handed to a code emitter, which
//! is a separate concern.

pub mod block;
pub mod builder;
pub mod dominators;
pub mod error;
pub mod instruction;
pub mod module;
pub mod optimizer;
pub mod procedure;
pub mod value;

mod expr;
mod stmt;

pub use block::{Block, BlockId, DomNode};
pub use builder::ProcBuilder;
pub use error::{SsaError, SsaResult};
pub use expr::LValue;
pub use instruction::{ConvKind, Instr, InstrKind};
pub use module::{DebugInfo, DebugKey, Module, StmtStateFlags};
pub use procedure::{Defer, DeferExitKind, DeferPayload, ProcId, Procedure, TargetEntry};
pub use value::{Value, ValueId, ValueKind};

/// Reserved member names resolved by the emitter.
pub const STARTUP_RUNTIME_PROC_NAME: &str = "__$startup_runtime";
pub const TYPE_INFO_DATA_NAME: &str = "__$type_info_data";
pub const TYPE_INFO_DATA_MEMBER_NAME: &str = "__$type_info_data_member";
/// Reserved global holding the implicit execution context.
pub const CONTEXT_NAME: &str = "__context";
