//! Common utilities shared across the Lyre compiler phases.
//!
//! Every phase refers to source locations through [`Pos`] and to source files
//! through [`FileId`]; the actual path table lives with the front end.

pub mod position;

pub use position::{FileId, Pos};
