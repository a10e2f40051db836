//! CFG post-processing: reachability pruning, block fusion, referrer
//! propagation, and register numbering.
//!
//! The passes run in a fixed order at the end of every procedure body and
//! rewrite the procedure's ordered block list in place. Block handles stay
//! valid throughout; only list positions and `Block::index` change.

use log::debug;

use crate::block::BlockId;
use crate::instruction::InstrKind;
use crate::module::Module;
use crate::procedure::{ProcId, Procedure};
use crate::value::ValueId;

/// Reachability pruning followed by block fusion to a fixpoint.
pub fn optimize_blocks(module: &mut Module, proc_id: ProcId) {
    remove_unreachable_blocks(module, proc_id);

    let before = module.proc(proc_id).blocks.len();
    let pool_len = module.proc(proc_id).block_pool.len();
    let mut dead = vec![false; pool_len];
    let mut changed = true;
    while changed {
        changed = false;
        let blocks = module.proc(proc_id).blocks.clone();
        for b in blocks {
            if dead[b.0 as usize] {
                continue;
            }
            if try_fuse(module, proc_id, b, &mut dead) {
                changed = true;
            }
        }
    }
    remove_dead_blocks(module.proc_mut(proc_id), &dead);

    debug!(
        "optimized `{}`: {} -> {} blocks",
        module.proc(proc_id).name,
        before,
        module.proc(proc_id).blocks.len()
    );
}

/// Drop every block not reachable from `blocks[0]`, removing each dead block
/// from its successors' predecessor lists and dropping the corresponding phi
/// edges positionally.
pub fn remove_unreachable_blocks(module: &mut Module, proc_id: ProcId) {
    let pool_len = module.proc(proc_id).block_pool.len();
    let mut reachable = vec![false; pool_len];
    let root = module.proc(proc_id).blocks[0];
    mark_reachable(module.proc(proc_id), root, &mut reachable);

    let blocks = module.proc(proc_id).blocks.clone();
    let mut dead = vec![false; pool_len];
    for &b in &blocks {
        if reachable[b.0 as usize] {
            continue;
        }
        let succs = module.proc(proc_id).block(b).succs.clone();
        for s in succs {
            if reachable[s.0 as usize] {
                remove_pred(module, proc_id, s, b);
            }
        }
        dead[b.0 as usize] = true;
    }
    remove_dead_blocks(module.proc_mut(proc_id), &dead);
}

fn mark_reachable(proc: &Procedure, root: BlockId, reachable: &mut [bool]) {
    let mut stack = vec![root];
    reachable[root.0 as usize] = true;
    while let Some(b) = stack.pop() {
        for &s in &proc.block(b).succs {
            if !reachable[s.0 as usize] {
                reachable[s.0 as usize] = true;
                stack.push(s);
            }
        }
    }
}

/// The phi instructions of a block form a prefix of its instruction list.
fn block_phi_nodes(module: &Module, proc_id: ProcId, b: BlockId) -> Vec<ValueId> {
    let mut phis = Vec::new();
    for &v in &module.proc(proc_id).block(b).instrs {
        match module.instr(v) {
            Some(i) if matches!(i.kind, InstrKind::Phi { .. }) => phis.push(v),
            _ => break,
        }
    }
    phis
}

fn block_has_phi(module: &Module, proc_id: ProcId, b: BlockId) -> bool {
    module
        .proc(proc_id)
        .block(b)
        .instrs
        .first()
        .and_then(|&v| module.instr(v))
        .map(|i| matches!(i.kind, InstrKind::Phi { .. }))
        .unwrap_or(false)
}

/// Remove `p` from `b`'s predecessors; every phi in `b` drops the edges at
/// the same positions.
fn remove_pred(module: &mut Module, proc_id: ProcId, b: BlockId, p: BlockId) {
    let phis = block_phi_nodes(module, proc_id, b);
    let preds = module.proc(proc_id).block(b).preds.clone();
    let keep: Vec<usize> = (0..preds.len()).filter(|&j| preds[j] != p).collect();

    let new_preds: Vec<BlockId> = keep.iter().map(|&j| preds[j]).collect();
    module.proc_mut(proc_id).block_mut(b).preds = new_preds;

    for phi in phis {
        if let Some(instr) = module.instr_mut(phi) {
            if let InstrKind::Phi { edges, .. } = &mut instr.kind {
                let new_edges: Vec<ValueId> =
                    keep.iter().filter_map(|&j| edges.get(j).copied()).collect();
                *edges = new_edges;
            }
        }
    }
}

/// Fuse `a` with its sole successor when that successor has `a` as its sole
/// predecessor and starts with no phi.
fn try_fuse(module: &mut Module, proc_id: ProcId, a: BlockId, dead: &mut [bool]) -> bool {
    if module.proc(proc_id).block(a).succs.len() != 1 {
        return false;
    }
    let b = module.proc(proc_id).block(a).succs[0];
    if b == a {
        return false;
    }
    if module.proc(proc_id).block(b).preds.len() != 1 {
        return false;
    }
    if block_has_phi(module, proc_id, b) {
        return false;
    }

    // Drop a's terminator, then splice b's body onto a.
    module.proc_mut(proc_id).block_mut(a).instrs.pop();
    let b_instrs = std::mem::take(&mut module.proc_mut(proc_id).block_mut(b).instrs);
    for &v in &b_instrs {
        if let Some(instr) = module.instr_mut(v) {
            instr.parent = Some(a);
        }
    }
    module.proc_mut(proc_id).block_mut(a).instrs.extend(b_instrs);

    let b_succs = module.proc(proc_id).block(b).succs.clone();
    module.proc_mut(proc_id).block_mut(a).succs = b_succs.clone();
    for c in b_succs {
        module.proc_mut(proc_id).block_mut(c).replace_pred(b, a);
    }

    dead[b.0 as usize] = true;
    true
}

/// Compact the ordered block list, reassigning positions.
fn remove_dead_blocks(proc: &mut Procedure, dead: &[bool]) {
    let blocks = std::mem::take(&mut proc.blocks);
    let mut kept = Vec::with_capacity(blocks.len());
    for b in blocks {
        if dead[b.0 as usize] {
            continue;
        }
        proc.block_mut(b).index = kept.len() as i32;
        kept.push(b);
    }
    proc.blocks = kept;
}

/// Push every instruction onto the referrer list of each operand that
/// maintains one.
pub fn build_referrers(module: &mut Module, proc_id: ProcId) {
    let mut ops: Vec<ValueId> = Vec::with_capacity(64);
    let blocks = module.proc(proc_id).blocks.clone();
    for b in blocks {
        let instrs = module.proc(proc_id).block(b).instrs.clone();
        for instr in instrs {
            ops.clear();
            if let Some(i) = module.instr(instr) {
                i.append_operands(&mut ops);
            }
            for &op in &ops {
                if let Some(refs) = module.value_referrers_mut(op) {
                    refs.push(instr);
                }
            }
        }
    }
}

/// Reassign block indices to their positions and give every instruction with
/// a non-void type a fresh, strictly positive register index.
pub fn number_registers(module: &mut Module, proc_id: ProcId) {
    let mut reg_index = 1;
    let blocks = module.proc(proc_id).blocks.clone();
    for (i, &b) in blocks.iter().enumerate() {
        module.proc_mut(proc_id).block_mut(b).index = i as i32;
        let instrs = module.proc(proc_id).block(b).instrs.clone();
        for v in instrs {
            let has_type = module
                .instr(v)
                .and_then(|instr| module.instr_type(instr))
                .is_some();
            if has_type {
                module.value_mut(v).index = reg_index;
                reg_index += 1;
            }
        }
    }
}

/// Promote memory locals into SSA registers.
///
/// TODO: eliminate locals that are never loaded, rewrite loads of
/// never-stored locals to `Nil`, forward single-store locals to their
/// dominating store, and insert phi nodes at dominance frontiers for the
/// remainder.
pub fn opt_mem2reg(module: &mut Module, proc_id: ProcId) {
    let _ = (module, proc_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProcBuilder;
    use crate::value::ValueKind;
    use lyre_front::{CheckerInfo, ProcTags, TypeKind};
    use pretty_assertions::assert_eq;

    fn test_proc(module: &mut Module) -> (ProcId, ValueId) {
        let params = module.info.types.tuple_of(Vec::new());
        let ty = module.info.types.intern(TypeKind::Proc {
            params,
            results: None,
            variadic: false,
        });
        let v = module.declare_procedure(None, ty, None, ProcTags::empty(), "test");
        match module.value(v).kind {
            ValueKind::Proc { proc } => (proc, v),
            _ => unreachable!(),
        }
    }

    /// entry -> {left, right} -> tail, with an unreachable orphan.
    fn build_diamond(module: &mut Module) -> (ProcId, Vec<BlockId>) {
        let (pid, pv) = test_proc(module);
        let mut b = ProcBuilder { module, proc_id: pid, proc_value: pv };
        let entry = b.add_block(None, "entry");
        let left = b.add_block(None, "left");
        let right = b.add_block(None, "right");
        let tail = b.add_block(None, "tail");
        let orphan = b.add_block(None, "orphan");

        b.set_curr_block(entry);
        let cond = b.module.const_bool(true);
        b.emit_if(cond, left, right);

        b.set_curr_block(left);
        b.emit_jump(tail);
        b.set_curr_block(right);
        b.emit_jump(tail);

        b.set_curr_block(tail);
        let ret = b.make_instr(InstrKind::Ret { value: None });
        b.emit(ret);

        b.set_curr_block(orphan);
        b.emit_jump(tail);

        (pid, vec![entry, left, right, tail, orphan])
    }

    #[test]
    fn test_pruning_removes_orphans_and_their_pred_edges() {
        let mut module = Module::new(CheckerInfo::new(), false);
        let (pid, blocks) = build_diamond(&mut module);
        let tail = blocks[3];
        assert_eq!(module.proc(pid).block(tail).preds.len(), 3);

        remove_unreachable_blocks(&mut module, pid);

        assert_eq!(module.proc(pid).blocks.len(), 4);
        assert_eq!(module.proc(pid).block(tail).preds.len(), 2);
    }

    #[test]
    fn test_pruning_is_idempotent() {
        let mut module = Module::new(CheckerInfo::new(), false);
        let (pid, _) = build_diamond(&mut module);
        remove_unreachable_blocks(&mut module, pid);
        let once: Vec<BlockId> = module.proc(pid).blocks.clone();
        remove_unreachable_blocks(&mut module, pid);
        assert_eq!(module.proc(pid).blocks, once);
    }

    #[test]
    fn test_pruning_drops_phi_edges_positionally() {
        let mut module = Module::new(CheckerInfo::new(), false);
        let (pid, blocks) = build_diamond(&mut module);
        let tail = blocks[3];

        // A phi whose third edge belongs to the orphan predecessor.
        let e0 = module.const_int(10);
        let e1 = module.const_int(20);
        let e2 = module.const_int(30);
        let ty = module.t_int;
        let phi = module.add_value(ValueKind::Instr(crate::instruction::Instr::new(
            InstrKind::Phi { edges: vec![e0, e1, e2], ty },
        )));
        module.proc_mut(pid).block_mut(tail).instrs.insert(0, phi);

        remove_unreachable_blocks(&mut module, pid);

        match &module.instr(phi).unwrap().kind {
            InstrKind::Phi { edges, .. } => assert_eq!(edges, &vec![e0, e1]),
            other => panic!("expected phi, got {:?}", other),
        }
        assert_eq!(
            module.instr(phi).unwrap().operands().len(),
            module.proc(pid).block(tail).preds.len()
        );
    }

    #[test]
    fn test_fusion_collapses_straight_lines_and_is_idempotent() {
        let mut module = Module::new(CheckerInfo::new(), false);
        let (pid, pv) = test_proc(&mut module);
        let mut b = ProcBuilder { module: &mut module, proc_id: pid, proc_value: pv };
        let b0 = b.add_block(None, "a");
        let b1 = b.add_block(None, "b");
        let b2 = b.add_block(None, "c");
        b.set_curr_block(b0);
        b.emit_comment("first");
        b.emit_jump(b1);
        b.set_curr_block(b1);
        b.emit_comment("second");
        b.emit_jump(b2);
        b.set_curr_block(b2);
        let ret = b.make_instr(InstrKind::Ret { value: None });
        b.emit(ret);

        optimize_blocks(&mut module, pid);
        assert_eq!(module.proc(pid).blocks.len(), 1);
        let only = module.proc(pid).blocks[0];
        assert_eq!(only, b0);
        // first, second, ret
        assert_eq!(module.proc(pid).block(only).instrs.len(), 3);
        for &v in &module.proc(pid).block(only).instrs {
            assert_eq!(module.instr(v).unwrap().parent, Some(b0));
        }

        let once: Vec<BlockId> = module.proc(pid).blocks.clone();
        optimize_blocks(&mut module, pid);
        assert_eq!(module.proc(pid).blocks, once);
    }

    #[test]
    fn test_fusion_keeps_phi_blocks() {
        let mut module = Module::new(CheckerInfo::new(), false);
        let (pid, pv) = test_proc(&mut module);
        let mut b = ProcBuilder { module: &mut module, proc_id: pid, proc_value: pv };
        let b0 = b.add_block(None, "a");
        let b1 = b.add_block(None, "b");
        b.set_curr_block(b0);
        b.emit_jump(b1);
        b.set_curr_block(b1);
        let edge = b.module.const_int(1);
        let ty = b.module.t_int;
        let phi = b.make_instr(InstrKind::Phi { edges: vec![edge], ty });
        b.emit(phi);
        let ret = b.make_instr(InstrKind::Ret { value: None });
        b.emit(ret);

        optimize_blocks(&mut module, pid);
        assert_eq!(module.proc(pid).blocks.len(), 2);
    }

    #[test]
    fn test_register_numbering_is_dense_and_positive() {
        let mut module = Module::new(CheckerInfo::new(), false);
        let (pid, pv) = test_proc(&mut module);
        let mut b = ProcBuilder { module: &mut module, proc_id: pid, proc_value: pv };
        let b0 = b.add_block(None, "entry");
        b.set_curr_block(b0);
        b.emit_comment("untyped");
        let x = b.module.const_int(1);
        let y = b.module.const_int(2);
        let ty = b.module.t_int;
        let add = b.make_instr(InstrKind::BinaryOp { op: lyre_front::BinOp::Add, left: x, right: y, ty });
        let add = b.emit(add);
        let add2 = b.make_instr(InstrKind::BinaryOp { op: lyre_front::BinOp::Add, left: add, right: y, ty });
        let add2 = b.emit(add2);
        let ret = b.make_instr(InstrKind::Ret { value: Some(add2) });
        b.emit(ret);

        number_registers(&mut module, pid);
        assert_eq!(module.value(add).index, 1);
        assert_eq!(module.value(add2).index, 2);

        // Idempotent modulo a fresh counter.
        number_registers(&mut module, pid);
        assert_eq!(module.value(add).index, 1);
        assert_eq!(module.value(add2).index, 2);
    }

    #[test]
    fn test_referrers_point_at_users() {
        let mut module = Module::new(CheckerInfo::new(), false);
        let (pid, pv) = test_proc(&mut module);
        let mut b = ProcBuilder { module: &mut module, proc_id: pid, proc_value: pv };
        let b0 = b.add_block(None, "entry");
        b.proc_mut().decl_block = b0;
        b.set_curr_block(b0);
        let int = b.module.t_int;
        let local = b.add_local_generated(int);
        let value = b.module.const_int(7);
        let store = b.emit_store(local, value);
        let ret = b.make_instr(InstrKind::Ret { value: None });
        b.emit(ret);

        build_referrers(&mut module, pid);
        let refs = module.value_referrers_mut(local).unwrap().clone();
        assert!(refs.contains(&store));
    }
}
