//! Basic blocks and dominator-tree nodes.

use lyre_front::{NodeId, ScopeId};
use serde::{Deserialize, Serialize};

use crate::value::ValueId;

/// Handle into a procedure's block pool. Handles stay valid across list
/// compaction; only `Block::index` is reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Per-block dominator-tree data, filled in by post-processing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomNode {
    pub idom: Option<BlockId>,
    pub children: Vec<BlockId>,
    pub pre: i32,
    pub post: i32,
}

/// A basic block: straight-line instructions with one entry and one
/// terminator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    /// Position in the procedure's ordered block list; reassigned whenever
    /// the list is compacted.
    pub index: i32,
    pub label: String,
    /// The AST node that produced this block, if any.
    pub node: Option<NodeId>,
    pub scope: Option<ScopeId>,
    /// Scope depth at which the block was opened.
    pub scope_index: usize,
    pub dom: DomNode,

    pub instrs: Vec<ValueId>,
    /// The `Local` instructions created while this block was current.
    pub locals: Vec<ValueId>,

    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

impl Block {
    pub fn new(label: impl Into<String>, node: Option<NodeId>, scope: Option<ScopeId>) -> Self {
        Block {
            index: 0,
            label: label.into(),
            node,
            scope,
            scope_index: 0,
            dom: DomNode::default(),
            instrs: Vec::new(),
            locals: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }

    pub fn replace_pred(&mut self, from: BlockId, to: BlockId) {
        for pred in &mut self.preds {
            if *pred == from {
                *pred = to;
            }
        }
    }

    pub fn replace_succ(&mut self, from: BlockId, to: BlockId) {
        for succ in &mut self.succs {
            if *succ == from {
                *succ = to;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_edges() {
        let mut b = Block::new("b", None, None);
        b.preds = vec![BlockId(1), BlockId(2), BlockId(1)];
        b.replace_pred(BlockId(1), BlockId(9));
        assert_eq!(b.preds, vec![BlockId(9), BlockId(2), BlockId(9)]);

        b.succs = vec![BlockId(4)];
        b.replace_succ(BlockId(4), BlockId(5));
        assert_eq!(b.succs, vec![BlockId(5)]);
    }
}
