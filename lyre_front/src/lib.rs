//! Front-end data model for the Lyre language.
//!
//! This crate defines the typed AST and the tables the semantic phase
//! produces: resolved entities, expression types and constant values, lexical
//! scopes, and the dense type-info index. Later phases consume these tables
//! read-mostly; they never re-run inference or name resolution.

pub mod ast;
pub mod entity;
pub mod info;
pub mod types;
pub mod value;

pub use ast::{
    Ast, BinOp, BranchKind, CastKind, Node, NodeFlags, NodeId, NodeKind, ProcTags, UnaryOp,
};
pub use entity::{BuiltinId, Entity, EntityId, EntityKind, EntityTable};
pub use info::{AddressingMode, AstFile, CheckerInfo, RuntimeTypes, Scope, ScopeId, TypeAndValue};
pub use types::{BasicKind, Field, RecordKind, Selection, TupleField, TypeId, TypeKind, TypeTable};
pub use value::ExactValue;
