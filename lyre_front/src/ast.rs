//! Abstract Syntax Tree definitions.
//!
//! Nodes live in a single append-only arena and refer to each other through
//! [`NodeId`] handles. The tree is already resolved and type-checked by the
//! time later phases see it; types, constant values, and entities are looked
//! up in the checker tables rather than stored on the nodes.

use bitflags::bitflags;
use lyre_common::Pos;
use serde::{Deserialize, Serialize};

/// Handle into the AST node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

bitflags! {
    /// Per-node statement-state overrides.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct NodeFlags: u32 {
        const BOUNDS_CHECK    = 1 << 0;
        const NO_BOUNDS_CHECK = 1 << 1;
    }
}

bitflags! {
    /// Tags attached to a procedure declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ProcTags: u32 {
        const FOREIGN         = 1 << 0;
        const INLINE          = 1 << 1;
        const NO_INLINE       = 1 << 2;
        const BOUNDS_CHECK    = 1 << 3;
        const NO_BOUNDS_CHECK = 1 << 4;
    }
}

/// Binary operators (both arithmetic and comparison).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    CmpEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    LogicalAnd,
    LogicalOr,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::CmpEq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `+x`, a no-op.
    Plus,
    /// `-x`, lowered as `0 - x`.
    Minus,
    /// Boolean `!x`.
    Not,
    /// Bitwise `~x`.
    BitNot,
    /// `&x`, the address-of form.
    AddrOf,
    /// Wrap a value into its `maybe` type.
    MaybeWrap,
}

/// Cast flavors carried by a cast expression; the target type comes from the
/// checker's type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastKind {
    /// Value-changing conversion.
    Convert,
    /// Bit-for-bit reinterpretation of a same-size value.
    Transmute,
    /// Pointer displacement from an embedded field to its containing record.
    Down,
}

/// `break` / `continue` / `fallthrough`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchKind {
    Break,
    Continue,
    Fallthrough,
}

/// The payload of an AST node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    // Expressions
    Ident { name: String },
    /// Literal whose value lives in the checker tables.
    BasicLit,
    /// Anonymous procedure literal; its type comes from the checker.
    ProcLit { body: NodeId, tags: ProcTags },
    CompoundLit { elems: Vec<NodeId> },
    FieldValue { field: NodeId, value: NodeId },
    Paren { expr: NodeId },
    Unary { op: UnaryOp, expr: NodeId },
    Binary { op: BinOp, left: NodeId, right: NodeId },
    Cast { kind: CastKind, expr: NodeId },
    Selector { expr: NodeId, selector: NodeId },
    Index { expr: NodeId, index: NodeId },
    Slice { expr: NodeId, low: Option<NodeId>, high: Option<NodeId>, max: Option<NodeId> },
    Deref { expr: NodeId },
    Demaybe { expr: NodeId },
    Call { target: NodeId, args: Vec<NodeId>, expand_last: bool },

    // Statements
    Empty,
    Using { node: NodeId },
    VarDecl { names: Vec<NodeId>, values: Vec<NodeId> },
    ProcDecl {
        name: NodeId,
        body: Option<NodeId>,
        tags: ProcTags,
        link_name: Option<String>,
        foreign_name: Option<String>,
    },
    TypeDecl { name: NodeId },
    IncDec { op: BinOp, expr: NodeId },
    /// `op` is `None` for plain `=`, otherwise the underlying arithmetic of a
    /// compound assignment.
    Assign { op: Option<BinOp>, lhs: Vec<NodeId>, rhs: Vec<NodeId> },
    ExprStmt { expr: NodeId },
    Block { stmts: Vec<NodeId> },
    Defer { stmt: NodeId },
    Return { results: Vec<NodeId> },
    If { init: Option<NodeId>, cond: NodeId, body: NodeId, else_stmt: Option<NodeId> },
    For { init: Option<NodeId>, cond: Option<NodeId>, post: Option<NodeId>, body: NodeId },
    Match { init: Option<NodeId>, tag: Option<NodeId>, body: NodeId },
    TypeMatch { tag: NodeId, var: NodeId, body: NodeId },
    CaseClause { list: Vec<NodeId>, stmts: Vec<NodeId> },
    Branch { kind: BranchKind },
    PushAllocator { expr: NodeId, body: NodeId },
    PushContext { expr: NodeId, body: NodeId },
}

/// One node of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: Pos,
    pub flags: NodeFlags,
}

/// Append-only node arena.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Ast { nodes: Vec::new() }
    }

    pub fn add(&mut self, kind: NodeKind, pos: Pos) -> NodeId {
        self.add_flagged(kind, pos, NodeFlags::empty())
    }

    pub fn add_flagged(&mut self, kind: NodeKind, pos: Pos, flags: NodeFlags) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, pos, flags });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn pos(&self, id: NodeId) -> Pos {
        self.node(id).pos
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Strip any number of surrounding parentheses.
    pub fn unparen(&self, mut id: NodeId) -> NodeId {
        while let NodeKind::Paren { expr } = self.kind(id) {
            id = *expr;
        }
        id
    }

    /// The blank identifier `_` suppresses binding.
    pub fn is_blank_ident(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Ident { name } if name == "_")
    }

    pub fn ident_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Ident { name } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_common::{FileId, Pos};

    fn pos() -> Pos {
        Pos::new(FileId(0), 1, 1)
    }

    #[test]
    fn test_unparen() {
        let mut ast = Ast::new();
        let ident = ast.add(NodeKind::Ident { name: "x".into() }, pos());
        let inner = ast.add(NodeKind::Paren { expr: ident }, pos());
        let outer = ast.add(NodeKind::Paren { expr: inner }, pos());
        assert_eq!(ast.unparen(outer), ident);
    }

    #[test]
    fn test_blank_ident() {
        let mut ast = Ast::new();
        let blank = ast.add(NodeKind::Ident { name: "_".into() }, pos());
        let named = ast.add(NodeKind::Ident { name: "x".into() }, pos());
        assert!(ast.is_blank_ident(blank));
        assert!(!ast.is_blank_ident(named));
    }

    #[test]
    fn test_flags() {
        let mut ast = Ast::new();
        let id = ast.add_flagged(NodeKind::Empty, pos(), NodeFlags::NO_BOUNDS_CHECK);
        assert!(ast.node(id).flags.contains(NodeFlags::NO_BOUNDS_CHECK));
    }
}
