//! End-to-end lowering tests over hand-built checker tables.

mod common;

use common::*;
use lyre_front::{
    AddressingMode, BinOp, BranchKind, Entity, EntityKind, ExactValue, NodeKind, ProcTags,
};
use lyre_common::Pos;
use lyre_ssa::{InstrKind, ValueKind};
use pretty_assertions::assert_eq;

#[test]
fn scenario_folded_constant_initializer() {
    // x := 3 + 4, folded by the checker: no arithmetic survives.
    let mut h = Harness::new();
    let int = h.int();
    let x = h.var_entity("x", int);
    let three = h.int_const(3);
    let four = h.int_const(4);
    let sum = h.folded_binary(BinOp::Add, three, four, int, ExactValue::Integer(7));
    let decl = h.decl(x, vec![sum]);

    let (module, pid) = h.build(vec![decl]);
    check_invariants(&module, pid);

    assert_eq!(count_instrs(&module, pid, |k| matches!(k, InstrKind::BinaryOp { .. })), 0);
    assert_eq!(count_instrs(&module, pid, |k| matches!(k, InstrKind::Local { .. })), 1);
    assert_eq!(count_instrs(&module, pid, |k| matches!(k, InstrKind::ZeroInit { .. })), 1);

    // The single store writes the folded constant.
    let proc = module.proc(pid);
    let stores: Vec<_> = proc
        .blocks
        .iter()
        .flat_map(|&b| proc.block(b).instrs.iter())
        .filter_map(|&v| match &module.instr(v).unwrap().kind {
            InstrKind::Store { value, .. } => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(stores.len(), 1);
    match &module.value(stores[0]).kind {
        ValueKind::Constant { value, .. } => assert_eq!(value, &ExactValue::Integer(7)),
        other => panic!("expected a constant store, got {:?}", other),
    }
}

#[test]
fn scenario_if_else_produces_four_blocks_without_phi() {
    // if a < b { c = 1 } else { c = 2 }
    let mut h = Harness::new();
    let int = h.int();
    let boolean = h.boolean();
    let a = h.var_entity("a", int);
    let b = h.var_entity("b", int);
    let c = h.var_entity("c", int);
    let decls = h.decl_many(&[a, b, c], Vec::new());

    let a_use = h.use_ident(a, AddressingMode::Variable);
    let b_use = h.use_ident(b, AddressingMode::Variable);
    let cond = h.binary(BinOp::Lt, a_use, b_use, boolean);

    let c1 = h.use_ident(c, AddressingMode::Variable);
    let one = h.int_const(1);
    let then_assign = h.assign(c1, one);
    let then_block = h.block(vec![then_assign]);

    let c2 = h.use_ident(c, AddressingMode::Variable);
    let two = h.int_const(2);
    let else_assign = h.assign(c2, two);
    let else_block = h.block(vec![else_assign]);

    let if_stmt = h.node(NodeKind::If {
        init: None,
        cond,
        body: then_block,
        else_stmt: Some(else_block),
    });

    let (module, pid) = h.build(vec![decls, if_stmt]);
    check_invariants(&module, pid);

    let proc = module.proc(pid);
    assert_eq!(proc.blocks.len(), 4);
    assert_eq!(count_instrs(&module, pid, |k| matches!(k, InstrKind::Phi { .. })), 0);

    // The head block ends in a conditional branch on the comparison.
    let head = proc.block(proc.blocks[0]);
    let last = *head.instrs.last().unwrap();
    match &module.instr(last).unwrap().kind {
        InstrKind::Br { cond: Some(cond), else_block: Some(_), .. } => {
            match module.instr(*cond).map(|i| &i.kind) {
                Some(InstrKind::BinaryOp { op, .. }) => assert_eq!(*op, BinOp::Lt),
                other => panic!("expected a comparison condition, got {:?}", other),
            }
        }
        other => panic!("expected a conditional branch, got {:?}", other),
    }

    assert_eq!(blocks_labeled(&module, pid, "if.then").len(), 1);
    assert_eq!(blocks_labeled(&module, pid, "if.else").len(), 1);
    assert_eq!(blocks_labeled(&module, pid, "if.done").len(), 1);
}

#[test]
fn scenario_for_loop_shape() {
    // for i := 0; i < n; i = i + 1 {}
    let mut h = Harness::new();
    let int = h.int();
    let boolean = h.boolean();
    let n = h.var_entity("n", int);
    let i = h.var_entity("i", int);
    let n_decl = h.decl(n, Vec::new());

    let zero = h.int_const(0);
    let init = h.decl(i, vec![zero]);

    let i_use = h.use_ident(i, AddressingMode::Variable);
    let n_use = h.use_ident(n, AddressingMode::Variable);
    let cond = h.binary(BinOp::Lt, i_use, n_use, boolean);

    let i_lhs = h.use_ident(i, AddressingMode::Variable);
    let i_rhs = h.use_ident(i, AddressingMode::Variable);
    let one = h.int_const(1);
    let inc = h.binary(BinOp::Add, i_rhs, one, int);
    let post = h.assign(i_lhs, inc);

    let body = h.block(Vec::new());
    let for_stmt = h.node(NodeKind::For {
        init: Some(init),
        cond: Some(cond),
        post: Some(post),
        body,
    });

    let (module, pid) = h.build(vec![n_decl, for_stmt]);
    check_invariants(&module, pid);

    let proc = module.proc(pid);
    let loops = blocks_labeled(&module, pid, "for.loop");
    assert_eq!(loops.len(), 1);
    let loop_block = proc.block(loops[0]);

    // The loop head is entered from the init chain and from the back edge,
    // and dispatches to body and done.
    assert_eq!(loop_block.preds.len(), 2);
    let last = *loop_block.instrs.last().unwrap();
    match &module.instr(last).unwrap().kind {
        InstrKind::Br { cond: Some(_), then_block, else_block: Some(else_block) } => {
            let then_label = &proc.block(*then_block).label;
            let else_label = &proc.block(*else_block).label;
            assert_eq!(then_label, "for.body");
            assert_eq!(else_label, "for.done");
        }
        other => panic!("expected a loop dispatch, got {:?}", other),
    }

    // The body (fused with the post block) jumps back to the loop head.
    let body_block = proc.block(blocks_labeled(&module, pid, "for.body")[0]);
    assert_eq!(body_block.succs, vec![loops[0]]);
}

#[test]
fn scenario_short_circuit_and_builds_phi() {
    // x := a && b
    let mut h = Harness::new();
    let boolean = h.boolean();
    let a = h.var_entity("a", boolean);
    let b = h.var_entity("b", boolean);
    let x = h.var_entity("x", boolean);
    let ab_decl = h.decl_many(&[a, b], Vec::new());

    let a_use = h.use_ident(a, AddressingMode::Variable);
    let b_use = h.use_ident(b, AddressingMode::Variable);
    let and = h.binary(BinOp::LogicalAnd, a_use, b_use, boolean);
    let x_decl = h.decl(x, vec![and]);

    let (module, pid) = h.build(vec![ab_decl, x_decl]);
    check_invariants(&module, pid);

    let proc = module.proc(pid);
    let dones = blocks_labeled(&module, pid, "logical.cmp.done");
    assert_eq!(dones.len(), 1);
    let done = proc.block(dones[0]);
    assert_eq!(done.preds.len(), 2);

    let phi = done.instrs[0];
    match &module.instr(phi).unwrap().kind {
        InstrKind::Phi { edges, ty } => {
            assert_eq!(edges.len(), 2);
            assert_eq!(*ty, module.t_bool);
            // The short-circuit edge carries the constant false.
            match &module.value(edges[0]).kind {
                ValueKind::Constant { value, .. } => assert_eq!(value, &ExactValue::Bool(false)),
                other => panic!("expected constant edge, got {:?}", other),
            }
        }
        other => panic!("expected phi at the join, got {:?}", other),
    }

    // The head dispatches into the rhs block.
    assert_eq!(blocks_labeled(&module, pid, "logical.cmp.rhs").len(), 1);
}

#[test]
fn scenario_multi_return_destructuring() {
    // x, y := f() where f returns (int, bool)
    let mut h = Harness::new();
    let int = h.int();
    let boolean = h.boolean();
    let f_ty = h.proc_ty(Vec::new(), vec![int, boolean]);
    let f_entity = h.info.entities.add(Entity {
        kind: EntityKind::Procedure,
        name: "f".to_string(),
        ty: f_ty,
        pos: Pos::none(),
        scope: None,
    });

    let f_use = h.use_ident(f_entity, AddressingMode::Value);
    let results_ty = match h.info.types.kind(f_ty) {
        lyre_front::TypeKind::Proc { results, .. } => results.unwrap(),
        _ => unreachable!(),
    };
    let call = h.node(NodeKind::Call { target: f_use, args: Vec::new(), expand_last: false });
    h.set_type(call, results_ty, AddressingMode::Value);

    let x = h.var_entity("x", int);
    let y = h.var_entity("y", boolean);
    let decl = h.decl_many(&[x, y], vec![call]);

    let (module, pid) = h.build_with(vec![decl], |module| {
        let entity = f_entity;
        let ty = module.info.entities.ty(entity);
        module.declare_procedure(Some(entity), ty, None, ProcTags::FOREIGN, "f");
    });
    check_invariants(&module, pid);

    assert_eq!(count_instrs(&module, pid, |k| matches!(k, InstrKind::Call { .. })), 1);
    assert_eq!(
        count_instrs(&module, pid, |k| matches!(k, InstrKind::ExtractValue { .. })),
        2
    );

    // Extractions are positional.
    let proc = module.proc(pid);
    let mut indices: Vec<i32> = proc
        .blocks
        .iter()
        .flat_map(|&b| proc.block(b).instrs.iter())
        .filter_map(|&v| match &module.instr(v).unwrap().kind {
            InstrKind::ExtractValue { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1]);

    // Two stores into the two fresh locals.
    assert_eq!(count_instrs(&module, pid, |k| matches!(k, InstrKind::Local { .. })), 2);
    assert_eq!(count_instrs(&module, pid, |k| matches!(k, InstrKind::Store { .. })), 2);
}

#[test]
fn scenario_variadic_call_packs_trailing_arguments() {
    // print(1, 2, 3) where print takes ...int
    let mut h = Harness::new();
    let int = h.int();
    let int_slice = h.info.types.slice_of(int);
    let args_entity = h.var_entity("args", int_slice);
    let print_ty = h.proc_ty_full(vec![args_entity], Vec::new(), true);
    let print_entity = h.info.entities.add(Entity {
        kind: EntityKind::Procedure,
        name: "print".to_string(),
        ty: print_ty,
        pos: Pos::none(),
        scope: None,
    });

    let print_use = h.use_ident(print_entity, AddressingMode::Value);
    let one = h.int_const(1);
    let two = h.int_const(2);
    let three = h.int_const(3);
    let call = h.node(NodeKind::Call {
        target: print_use,
        args: vec![one, two, three],
        expand_last: false,
    });
    h.set_type(call, int, AddressingMode::NoValue);
    let stmt = h.expr_stmt(call);

    let (module, pid) = h.build_with(vec![stmt], |module| {
        let entity = print_entity;
        let ty = module.info.entities.ty(entity);
        module.declare_procedure(Some(entity), ty, None, ProcTags::FOREIGN, "print");
    });
    check_invariants(&module, pid);

    // One call whose single argument is the loaded slice header.
    let proc = module.proc(pid);
    let calls: Vec<&InstrKind> = proc
        .blocks
        .iter()
        .flat_map(|&b| proc.block(b).instrs.iter())
        .filter_map(|&v| match &module.instr(v).unwrap().kind {
            k @ InstrKind::Call { .. } => Some(k),
            _ => None,
        })
        .collect();
    assert_eq!(calls.len(), 1);
    match calls[0] {
        InstrKind::Call { args, .. } => {
            assert_eq!(args.len(), 1);
            assert!(matches!(
                module.instr(args[0]).unwrap().kind,
                InstrKind::Load { .. }
            ));
        }
        _ => unreachable!(),
    }

    // A backing array local of element count 3 plus the slice header local.
    let locals: Vec<lyre_front::TypeId> = proc
        .blocks
        .iter()
        .flat_map(|&b| proc.block(b).instrs.iter())
        .filter_map(|&v| match &module.instr(v).unwrap().kind {
            InstrKind::Local { ty, .. } => Some(*ty),
            _ => None,
        })
        .collect();
    let has_array_local = locals.iter().any(|&ty| {
        let elem = module.info.types.deref(ty);
        matches!(
            module.info.types.kind(module.info.types.base(elem)),
            lyre_front::TypeKind::Array { count: 3, .. }
        )
    });
    assert!(has_array_local, "expected a packed argument array local");

    // Three stores land in the packed array.
    assert!(count_instrs(&module, pid, |k| matches!(k, InstrKind::Store { .. })) >= 3);
}

#[test]
fn defer_runs_before_return() {
    // x := 0; defer x = 2; return
    let mut h = Harness::new();
    let int = h.int();
    let x = h.var_entity("x", int);
    let zero = h.int_const(0);
    let decl = h.decl(x, vec![zero]);

    let x_use = h.use_ident(x, AddressingMode::Variable);
    let two = h.int_const(2);
    let deferred_assign = h.assign(x_use, two);
    let defer_stmt = h.node(NodeKind::Defer { stmt: deferred_assign });

    let ret = h.node(NodeKind::Return { results: Vec::new() });

    let (module, pid) = h.build(vec![decl, defer_stmt, ret]);
    check_invariants(&module, pid);

    // The deferred store of 2 precedes the return in instruction order.
    let proc = module.proc(pid);
    let mut saw_deferred_store = false;
    let mut ret_seen_after = false;
    for &b in &proc.blocks {
        for &v in &proc.block(b).instrs {
            match &module.instr(v).unwrap().kind {
                InstrKind::Store { value, .. } => {
                    if let ValueKind::Constant { value: ExactValue::Integer(2), .. } =
                        &module.value(*value).kind
                    {
                        saw_deferred_store = true;
                    }
                }
                InstrKind::Ret { .. } if saw_deferred_store => ret_seen_after = true,
                _ => {}
            }
        }
    }
    assert!(saw_deferred_store, "deferred assignment was emitted");
    assert!(ret_seen_after, "return follows the deferred assignment");
}

#[test]
fn match_lowers_to_comparison_chain() {
    // match x { case 1: a = 1 case 2: fallthrough default: a = 3 }
    let mut h = Harness::new();
    let int = h.int();
    let x = h.var_entity("x", int);
    let a = h.var_entity("a", int);
    let decls = h.decl_many(&[x, a], Vec::new());

    let x_use = h.use_ident(x, AddressingMode::Variable);

    let one = h.int_const(1);
    let a1 = h.use_ident(a, AddressingMode::Variable);
    let one_rhs = h.int_const(1);
    let assign1 = h.assign(a1, one_rhs);
    let case1 = h.node(NodeKind::CaseClause { list: vec![one], stmts: vec![assign1] });

    let two = h.int_const(2);
    let fall = h.node(NodeKind::Branch { kind: BranchKind::Fallthrough });
    let case2 = h.node(NodeKind::CaseClause { list: vec![two], stmts: vec![fall] });

    let a3 = h.use_ident(a, AddressingMode::Variable);
    let three = h.int_const(3);
    let assign3 = h.assign(a3, three);
    let dflt = h.node(NodeKind::CaseClause { list: Vec::new(), stmts: vec![assign3] });

    let body = h.block(vec![case1, case2, dflt]);
    let match_stmt = h.node(NodeKind::Match { init: None, tag: Some(x_use), body });

    let (module, pid) = h.build(vec![decls, match_stmt]);
    check_invariants(&module, pid);

    // Each case value compares the tag with equality.
    let eq_count = count_instrs(&module, pid, |k| {
        matches!(k, InstrKind::BinaryOp { op: BinOp::CmpEq, .. })
    });
    assert_eq!(eq_count, 2);

    // The fallthrough from case 2 feeds the default body.
    let falls = blocks_labeled(&module, pid, "match.fall.body");
    assert!(!falls.is_empty());
}

#[test]
fn break_terminates_loop_body() {
    // for { break }
    let mut h = Harness::new();
    let brk = h.node(NodeKind::Branch { kind: BranchKind::Break });
    let body = h.block(vec![brk]);
    let for_stmt = h.node(NodeKind::For { init: None, cond: None, post: None, body });

    let (module, pid) = h.build(vec![for_stmt]);
    check_invariants(&module, pid);

    // The break severs the back edge entirely, so the whole procedure
    // collapses into one straight-line block ending in the implicit return.
    let proc = module.proc(pid);
    assert_eq!(proc.blocks.len(), 1);
    let only = proc.block(proc.blocks[0]);
    let last = *only.instrs.last().unwrap();
    assert!(matches!(module.instr(last).unwrap().kind, InstrKind::Ret { .. }));
}

#[test]
fn startup_runtime_is_injected_into_main() {
    let mut h = Harness::new();
    let body = h.block(Vec::new());
    let ty = h.proc_ty(Vec::new(), Vec::new());
    let entity = h.info.entities.add(Entity {
        kind: EntityKind::Procedure,
        name: "main".to_string(),
        ty,
        pos: Pos::none(),
        scope: None,
    });
    let mut module = lyre_ssa::Module::new(h.info, false);
    let pv = module.declare_procedure(Some(entity), ty, Some(body), ProcTags::empty(), "main");
    module.generate().unwrap();
    let pid = match module.value(pv).kind {
        ValueKind::Proc { proc } => proc,
        _ => unreachable!(),
    };
    check_invariants(&module, pid);
    assert_eq!(
        count_instrs(&module, pid, |k| matches!(k, InstrKind::StartupRuntime)),
        1
    );
}

#[test]
fn instruction_serialization_round_trips() {
    let instr = lyre_ssa::Instr::new(InstrKind::Store {
        addr: lyre_ssa::ValueId(1),
        value: lyre_ssa::ValueId(2),
    });
    let json = serde_json::to_string(&instr).unwrap();
    let back: lyre_ssa::Instr = serde_json::from_str(&json).unwrap();
    assert_eq!(instr, back);
}
