//! Property tests: the dominator tree against brute-force path dominance,
//! and the idempotence of the CFG cleanup passes.

use proptest::prelude::*;

use lyre_front::{CheckerInfo, ProcTags, TypeKind};
use lyre_ssa::block::{Block, BlockId};
use lyre_ssa::dominators::build_dom_tree;
use lyre_ssa::optimizer::{optimize_blocks, remove_unreachable_blocks};
use lyre_ssa::{Module, ProcId, ValueKind};

const N: usize = 8;

/// A module holding one procedure whose CFG is the given edge list over `N`
/// nodes, rooted at node 0.
fn module_from_edges(edges: &[(usize, usize)]) -> (Module, ProcId) {
    let mut module = Module::new(CheckerInfo::new(), false);
    let params = module.info.types.tuple_of(Vec::new());
    let ty = module
        .info
        .types
        .intern(TypeKind::Proc { params, results: None, variadic: false });
    let pv = module.declare_procedure(None, ty, None, ProcTags::empty(), "prop");
    let pid = match module.value(pv).kind {
        ValueKind::Proc { proc } => proc,
        _ => unreachable!(),
    };

    let proc = module.proc_mut(pid);
    let ids: Vec<BlockId> = (0..N)
        .map(|i| proc.add_block_data(Block::new(format!("b{}", i), None, None)))
        .collect();
    for (i, &b) in ids.iter().enumerate() {
        proc.block_mut(b).index = i as i32;
    }
    let mut seen = std::collections::HashSet::new();
    for &(from, to) in edges {
        if !seen.insert((from, to)) {
            continue;
        }
        let (from, to) = (ids[from], ids[to]);
        proc.block_mut(from).succs.push(to);
        proc.block_mut(to).preds.push(from);
    }
    (module, pid)
}

/// Blocks reachable from the root, optionally pretending `skip` is deleted.
fn reachable_without(module: &Module, pid: ProcId, skip: Option<BlockId>) -> Vec<BlockId> {
    let proc = module.proc(pid);
    let root = proc.blocks[0];
    let mut seen = std::collections::HashSet::new();
    if Some(root) == skip {
        return Vec::new();
    }
    let mut stack = vec![root];
    seen.insert(root);
    while let Some(b) = stack.pop() {
        for &s in &proc.block(b).succs {
            if Some(s) == skip || seen.contains(&s) {
                continue;
            }
            seen.insert(s);
            stack.push(s);
        }
    }
    let mut out: Vec<BlockId> = seen.into_iter().collect();
    out.sort_by_key(|b| b.0);
    out
}

/// `a` dominates `b` iff every path from the root to `b` passes through `a`.
fn dominates_brute_force(module: &Module, pid: ProcId, a: BlockId, b: BlockId) -> bool {
    if a == b {
        return true;
    }
    !reachable_without(module, pid, Some(a)).contains(&b)
}

fn edge_strategy() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..N, 0..N), 0..24)
}

proptest! {
    #[test]
    fn idom_is_a_dominator_and_pre_post_query_agrees(edges in edge_strategy()) {
        let (mut module, pid) = module_from_edges(&edges);
        remove_unreachable_blocks(&mut module, pid);
        build_dom_tree(module.proc_mut(pid));

        let blocks = module.proc(pid).blocks.clone();
        let root = blocks[0];
        for &b in &blocks {
            let idom = module.proc(pid).block(b).dom.idom;
            if b == root {
                prop_assert!(idom.is_none());
                continue;
            }
            let idom = idom.expect("reachable non-root block has an idom");
            prop_assert!(dominates_brute_force(&module, pid, idom, b));

            // The pre/post ancestor query matches brute-force dominance for
            // every candidate ancestor.
            for &a in &blocks {
                let da = module.proc(pid).block(a).dom.clone();
                let db = module.proc(pid).block(b).dom.clone();
                let by_numbering = da.pre <= db.pre && db.post <= da.post;
                let by_paths = dominates_brute_force(&module, pid, a, b);
                prop_assert_eq!(by_numbering, by_paths);
            }
        }
    }

    #[test]
    fn idom_is_the_closest_dominator(edges in edge_strategy()) {
        let (mut module, pid) = module_from_edges(&edges);
        remove_unreachable_blocks(&mut module, pid);
        build_dom_tree(module.proc_mut(pid));

        let blocks = module.proc(pid).blocks.clone();
        let root = blocks[0];
        for &b in &blocks {
            if b == root {
                continue;
            }
            let idom = module.proc(pid).block(b).dom.idom.unwrap();
            // No other strict dominator of b sits strictly below the idom.
            for &a in &blocks {
                if a == b || a == idom {
                    continue;
                }
                if dominates_brute_force(&module, pid, a, b) {
                    prop_assert!(
                        dominates_brute_force(&module, pid, a, idom),
                        "dominator {:?} of {:?} must dominate idom {:?}",
                        a, b, idom
                    );
                }
            }
        }
    }

    #[test]
    fn pruning_is_idempotent(edges in edge_strategy()) {
        let (mut module, pid) = module_from_edges(&edges);
        remove_unreachable_blocks(&mut module, pid);
        let once = module.proc(pid).blocks.clone();
        remove_unreachable_blocks(&mut module, pid);
        prop_assert_eq!(&module.proc(pid).blocks, &once);
    }

    #[test]
    fn fusion_is_idempotent(edges in edge_strategy()) {
        let (mut module, pid) = module_from_edges(&edges);
        optimize_blocks(&mut module, pid);
        let once = module.proc(pid).blocks.clone();
        let once_succs: Vec<Vec<BlockId>> = once
            .iter()
            .map(|&b| module.proc(pid).block(b).succs.clone())
            .collect();

        optimize_blocks(&mut module, pid);
        prop_assert_eq!(&module.proc(pid).blocks, &once);
        let twice_succs: Vec<Vec<BlockId>> = once
            .iter()
            .map(|&b| module.proc(pid).block(b).succs.clone())
            .collect();
        prop_assert_eq!(twice_succs, once_succs);
    }
}
