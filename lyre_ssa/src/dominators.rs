//! Dominator-tree construction.
//!
//! Lengauer–Tarjan in its semi-dominator formulation, following the
//! presentation in Georgiadis, Tarjan, Werneck, "Finding Dominators in
//! Practice" (JGAA 2006). Runs after block optimization, so the ordered
//! block list is compact and `Block::index` equals list position.

use crate::block::{BlockId, DomNode};
use crate::procedure::Procedure;

fn idx(proc: &Procedure, b: BlockId) -> usize {
    proc.block(b).index as usize
}

fn sdom_pre(proc: &Procedure, sdom: &[Option<BlockId>], b: BlockId) -> i32 {
    let s = sdom[idx(proc, b)].expect("semidominator assigned");
    proc.block(s).dom.pre
}

/// Depth-first numbering of the CFG; records DFS parents and fills the
/// preorder array. `sdom[b] = b` doubles as the visited mark.
fn depth_first_search(
    proc: &mut Procedure,
    p: BlockId,
    mut i: i32,
    sdom: &mut [Option<BlockId>],
    parent: &mut [Option<BlockId>],
    preorder: &mut [BlockId],
) -> i32 {
    preorder[i as usize] = p;
    proc.block_mut(p).dom.pre = i;
    i += 1;
    sdom[idx(proc, p)] = Some(p);
    let succs = proc.block(p).succs.clone();
    for q in succs {
        if sdom[idx(proc, q)].is_none() {
            parent[idx(proc, q)] = Some(p);
            i = depth_first_search(proc, q, i, sdom, parent, preorder);
        }
    }
    i
}

/// The ancestor on the current forest path with minimum semidominator
/// preorder.
fn eval(
    proc: &Procedure,
    sdom: &[Option<BlockId>],
    ancestor: &[Option<BlockId>],
    v: BlockId,
) -> BlockId {
    let mut u = v;
    let mut v = v;
    while let Some(a) = ancestor[idx(proc, v)] {
        if sdom_pre(proc, sdom, v) < sdom_pre(proc, sdom, u) {
            u = v;
        }
        v = a;
    }
    u
}

/// Pre/post numbering of the dominator tree; supports O(1) ancestor queries
/// (`a` dominates `b` iff `a.pre <= b.pre && b.post <= a.post`).
fn number_dom_tree(proc: &mut Procedure, v: BlockId, pre: i32, post: i32) -> (i32, i32) {
    let mut pre = pre;
    let mut post = post;
    proc.block_mut(v).dom.pre = pre;
    pre += 1;
    let children = proc.block(v).dom.children.clone();
    for child in children {
        let (new_pre, new_post) = number_dom_tree(proc, child, pre, post);
        pre = new_pre;
        post = new_post;
    }
    proc.block_mut(v).dom.post = post;
    post += 1;
    (pre, post)
}

/// Build the dominator tree of an optimized procedure.
pub fn build_dom_tree(proc: &mut Procedure) {
    let n = proc.blocks.len();
    if n == 0 {
        return;
    }

    for i in 0..n {
        let b = proc.blocks[i];
        proc.block_mut(b).dom = DomNode::default();
    }

    let mut sdom: Vec<Option<BlockId>> = vec![None; n];
    let mut parent: Vec<Option<BlockId>> = vec![None; n];
    let mut ancestor: Vec<Option<BlockId>> = vec![None; n];
    let mut preorder: Vec<BlockId> = vec![BlockId(0); n];

    let root = proc.blocks[0];

    // Step 1: number vertices in DFS preorder.
    depth_first_search(proc, root, 0, &mut sdom, &mut parent, &mut preorder);
    let mut buckets = preorder.clone();

    for i in (1..n).rev() {
        let w = preorder[i];

        // Step 3: tentatively resolve idom for vertices queued in this
        // bucket.
        let mut v = buckets[i];
        while v != w {
            let u = eval(proc, &sdom, &ancestor, v);
            let new_idom = if sdom_pre(proc, &sdom, u) < i as i32 { u } else { w };
            let next = buckets[proc.block(v).dom.pre as usize];
            proc.block_mut(v).dom.idom = Some(new_idom);
            v = next;
        }

        // Step 2: compute the semidominator of w.
        sdom[idx(proc, w)] = parent[idx(proc, w)];
        let preds = proc.block(w).preds.clone();
        for p in preds {
            let u = eval(proc, &sdom, &ancestor, p);
            if sdom_pre(proc, &sdom, u) < sdom_pre(proc, &sdom, w) {
                sdom[idx(proc, w)] = sdom[idx(proc, u)];
            }
        }

        // Link w into the forest.
        ancestor[idx(proc, w)] = parent[idx(proc, w)];

        if parent[idx(proc, w)] == sdom[idx(proc, w)] {
            let p = parent[idx(proc, w)];
            proc.block_mut(w).dom.idom = p;
        } else {
            let spre = sdom_pre(proc, &sdom, w) as usize;
            buckets[i] = buckets[spre];
            buckets[spre] = w;
        }
    }

    // The rest of step 3: everything still queued on the root's bucket is
    // dominated by the root directly.
    let mut v = buckets[0];
    while v != root {
        let next = buckets[proc.block(v).dom.pre as usize];
        proc.block_mut(v).dom.idom = Some(root);
        v = next;
    }

    // Step 4: finalize idoms in preorder and invert into children lists.
    for i in 1..n {
        let w = preorder[i];
        if w == root {
            proc.block_mut(w).dom.idom = None;
            continue;
        }
        if proc.block(w).dom.idom != sdom[idx(proc, w)] {
            let id = proc.block(w).dom.idom.expect("idom resolved for non-root");
            let promoted = proc.block(id).dom.idom;
            proc.block_mut(w).dom.idom = promoted;
        }
        let id = proc.block(w).dom.idom.expect("idom resolved for non-root");
        proc.block_mut(id).dom.children.push(w);
    }

    number_dom_tree(proc, root, 0, 0);
}
