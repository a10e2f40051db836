//! Position tracking for AST nodes and diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a source file in the front end's file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub u32);

/// A position in the source code (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub fn new(file: FileId, line: u32, column: u32) -> Self {
        Pos { file, line, column }
    }

    /// Position used for synthesized nodes that have no source location.
    pub fn none() -> Self {
        Pos { file: FileId(0), line: 0, column: 0 }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pos_display() {
        let pos = Pos::new(FileId(0), 3, 14);
        assert_eq!(pos.to_string(), "3:14");
    }

    #[test]
    fn test_pos_none() {
        assert_eq!(Pos::none().line, 0);
    }
}
