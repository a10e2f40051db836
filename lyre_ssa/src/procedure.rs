//! Procedures: the unit of SSA construction.
//!
//! A procedure owns its block pool and the ordered block list, plus the
//! construction-time state: the emission cursor, the defer stack, and the
//! break/continue/fallthrough target stack.

use lyre_front::{EntityId, NodeId, ProcTags, TypeId};
use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockId};
use crate::value::ValueId;

/// Handle into the module's procedure pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ProcId(pub u32);

/// How a scope is being left; decides which pending defers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferExitKind {
    /// Ordinary close of the current scope.
    Default,
    /// A `return`: every pending defer runs, most recent first.
    Return,
    /// A `break`/`continue`/`fallthrough` out to `block`.
    Branch,
}

/// What a defer re-emits when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeferPayload {
    /// An AST statement, lowered afresh at each emission.
    Stmt(NodeId),
    /// An instruction template, cloned into a new value at each emission.
    Instr(ValueId),
}

/// A registered defer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defer {
    pub scope_index: usize,
    /// Cursor block at registration time.
    pub block: Option<BlockId>,
    pub payload: DeferPayload,
}

/// One frame of the break/continue/fallthrough target stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub break_: Option<BlockId>,
    pub continue_: Option<BlockId>,
    pub fallthrough_: Option<BlockId>,
}

/// A procedure under construction or finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Procedure {
    pub parent: Option<ProcId>,
    /// Nested procedure values, in creation order.
    pub children: Vec<ValueId>,

    /// `None` for anonymous literals.
    pub entity: Option<EntityId>,
    pub name: String,
    /// Signature type.
    pub ty: TypeId,
    /// `None` for foreign procedures.
    pub body: Option<NodeId>,
    pub tags: ProcTags,

    /// Stable storage for blocks; never compacted.
    pub block_pool: Vec<Block>,
    /// The ordered block list; post-processing rewrites this in place.
    pub blocks: Vec<BlockId>,
    pub decl_block: BlockId,
    pub entry_block: BlockId,
    /// Emission cursor; `None` after a jump until a block is selected.
    pub curr_block: Option<BlockId>,

    pub scope_index: usize,
    pub defer_stmts: Vec<Defer>,
    pub target_list: Vec<TargetEntry>,

    /// Values that refer to this procedure (nested procedures only);
    /// populated by referrer propagation.
    pub referrers: Vec<ValueId>,
}

impl Procedure {
    pub fn new(
        entity: Option<EntityId>,
        ty: TypeId,
        body: Option<NodeId>,
        name: impl Into<String>,
    ) -> Self {
        Procedure {
            entity,
            ty,
            body,
            name: name.into(),
            ..Procedure::default()
        }
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.block_pool[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.block_pool[id.0 as usize]
    }

    pub fn add_block_data(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.block_pool.len() as u32);
        self.block_pool.push(block);
        self.blocks.push(id);
        id
    }

    /// Innermost non-empty `break` target.
    pub fn break_target(&self) -> Option<BlockId> {
        self.target_list.iter().rev().find_map(|t| t.break_)
    }

    /// Innermost non-empty `continue` target.
    pub fn continue_target(&self) -> Option<BlockId> {
        self.target_list.iter().rev().find_map(|t| t.continue_)
    }

    /// Innermost non-empty `fallthrough` target.
    pub fn fallthrough_target(&self) -> Option<BlockId> {
        self.target_list.iter().rev().find_map(|t| t.fallthrough_)
    }

    pub fn push_target_list(
        &mut self,
        break_: Option<BlockId>,
        continue_: Option<BlockId>,
        fallthrough_: Option<BlockId>,
    ) {
        self.target_list.push(TargetEntry { break_, continue_, fallthrough_ });
    }

    pub fn pop_target_list(&mut self) {
        self.target_list.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_resolution_walks_outward() {
        let mut proc = Procedure::default();
        proc.push_target_list(Some(BlockId(1)), Some(BlockId(2)), None);
        proc.push_target_list(Some(BlockId(3)), None, Some(BlockId(4)));

        assert_eq!(proc.break_target(), Some(BlockId(3)));
        // The inner frame has no continue target, so resolution reaches the
        // outer loop's.
        assert_eq!(proc.continue_target(), Some(BlockId(2)));
        assert_eq!(proc.fallthrough_target(), Some(BlockId(4)));

        proc.pop_target_list();
        assert_eq!(proc.break_target(), Some(BlockId(1)));
        assert_eq!(proc.fallthrough_target(), None);
    }
}
