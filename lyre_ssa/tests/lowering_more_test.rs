//! Conversion, union, context, and bounds-check lowering tests.

mod common;

use common::*;
use lyre_common::Pos;
use lyre_front::{
    AddressingMode, BasicKind, Entity, EntityKind, ExactValue, Field, NodeFlags, NodeKind,
    ProcTags, RecordKind, Scope, TypeKind,
};
use lyre_ssa::{ConvKind, InstrKind, Module, ProcBuilder, ProcId, ValueKind};
use pretty_assertions::assert_eq;

/// A module plus an open procedure for direct builder-level tests.
fn open_builder(module: &mut Module) -> (ProcId, lyre_ssa::ValueId) {
    let params = module.info.types.tuple_of(Vec::new());
    let ty = module
        .info
        .types
        .intern(TypeKind::Proc { params, results: None, variadic: false });
    let pv = module.declare_procedure(None, ty, None, ProcTags::empty(), "unit");
    let pid = match module.value(pv).kind {
        ValueKind::Proc { proc } => proc,
        _ => unreachable!(),
    };
    let mut b = ProcBuilder { module, proc_id: pid, proc_value: pv };
    let decl = b.add_block(None, "decls");
    let entry = b.add_block(None, "entry");
    b.proc_mut().decl_block = decl;
    b.proc_mut().entry_block = entry;
    b.set_curr_block(entry);
    (pid, pv)
}

#[test]
fn conv_integer_widening_is_zext() {
    let mut module = Module::new(lyre_front::CheckerInfo::new(), false);
    let (pid, pv) = open_builder(&mut module);
    let mut b = ProcBuilder { module: &mut module, proc_id: pid, proc_value: pv };

    let i32t = b.module.t_i32;
    let int = b.module.t_int;
    let local = b.add_local_generated(i32t);
    let small = b.emit_load(local);
    let wide = b.emit_conv(small, int).unwrap();
    match &b.module.instr(wide).unwrap().kind {
        InstrKind::Conv { kind, .. } => assert_eq!(*kind, ConvKind::Zext),
        other => panic!("expected a conversion, got {:?}", other),
    }

    // Narrowing truncates.
    let narrow = b.emit_conv(wide, i32t).unwrap();
    match &b.module.instr(narrow).unwrap().kind {
        InstrKind::Conv { kind, .. } => assert_eq!(*kind, ConvKind::Trunc),
        other => panic!("expected a conversion, got {:?}", other),
    }
}

#[test]
fn conv_integer_to_boolean_compares_against_zero() {
    let mut module = Module::new(lyre_front::CheckerInfo::new(), false);
    let (pid, pv) = open_builder(&mut module);
    let mut b = ProcBuilder { module: &mut module, proc_id: pid, proc_value: pv };

    let int = b.module.t_int;
    let boolean = b.module.t_bool;
    let local = b.add_local_generated(int);
    let x = b.emit_load(local);
    let flag = b.emit_conv(x, boolean).unwrap();
    match &b.module.instr(flag).unwrap().kind {
        InstrKind::BinaryOp { op, .. } => assert_eq!(*op, lyre_front::BinOp::NotEq),
        other => panic!("expected a comparison, got {:?}", other),
    }
}

#[test]
fn conv_to_maybe_builds_value_and_flag() {
    let mut module = Module::new(lyre_front::CheckerInfo::new(), false);
    let (pid, pv) = open_builder(&mut module);
    let mut b = ProcBuilder { module: &mut module, proc_id: pid, proc_value: pv };

    let int = b.module.t_int;
    let maybe_int = b.module.info.types.maybe_of(int);
    let x = b.module.const_int(42);
    let wrapped = b.emit_conv(x, maybe_int).unwrap();

    // The wrap loads from a generated local after storing the value and a
    // true flag into its two fields.
    assert!(matches!(b.module.instr(wrapped).unwrap().kind, InstrKind::Load { .. }));
    let entry = b.proc().entry_block;
    let stores: Vec<lyre_ssa::ValueId> = b
        .proc()
        .block(entry)
        .instrs
        .iter()
        .filter_map(|&v| match &b.module.instr(v).unwrap().kind {
            InstrKind::Store { value, .. } => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(stores.len(), 2);
    assert!(stores.iter().any(|&v| matches!(
        &b.module.value(v).kind,
        ValueKind::Constant { value: ExactValue::Bool(true), .. }
    )));
}

#[test]
fn conv_nil_to_pointer_is_typed_nil() {
    let mut module = Module::new(lyre_front::CheckerInfo::new(), false);
    let (pid, pv) = open_builder(&mut module);
    let mut b = ProcBuilder { module: &mut module, proc_id: pid, proc_value: pv };

    let int = b.module.t_int;
    let (nil_ty, int_ptr) = {
        let tys = &mut b.module.info.types;
        (tys.basic(BasicKind::UntypedNil), tys.ptr_to(int))
    };
    let nil = b.module.add_value(ValueKind::Nil { ty: nil_ty });
    let typed = b.emit_conv(nil, int_ptr).unwrap();
    match &b.module.value(typed).kind {
        ValueKind::Nil { ty } => assert_eq!(*ty, int_ptr),
        other => panic!("expected typed nil, got {:?}", other),
    }
}

#[test]
fn conv_child_to_union_parent_sets_tag() {
    let mut module = Module::new(lyre_front::CheckerInfo::new(), false);
    let (pid, pv) = open_builder(&mut module);
    let mut b = ProcBuilder { module: &mut module, proc_id: pid, proc_value: pv };

    let int = b.module.t_int;
    let (nil_sentinel, variant) = {
        let tys = &mut b.module.info.types;
        let sentinel = tys.basic(BasicKind::UntypedNil);
        let payload = tys.intern(TypeKind::Record {
            kind: RecordKind::Struct,
            fields: vec![Field { name: "value".into(), ty: int, anonymous: false }],
        });
        (sentinel, tys.named("Payload", payload))
    };
    let union_ty = b.module.info.types.intern(TypeKind::Record {
        kind: RecordKind::Union,
        fields: vec![
            Field { name: String::new(), ty: nil_sentinel, anonymous: false },
            Field { name: "Payload".into(), ty: variant, anonymous: false },
        ],
    });

    let child_local = b.add_local_generated(variant);
    let child = b.emit_load(child_local);
    let parent = b.emit_conv(child, union_ty).unwrap();
    assert!(matches!(b.module.instr(parent).unwrap().kind, InstrKind::Load { .. }));

    // The variant's position in the field list becomes the stored tag.
    let entry = b.proc().entry_block;
    let tag_store = b
        .proc()
        .block(entry)
        .instrs
        .iter()
        .filter_map(|&v| match &b.module.instr(v).unwrap().kind {
            InstrKind::Store { value, .. } => match &b.module.value(*value).kind {
                ValueKind::Constant { value: ExactValue::Integer(i), .. } => Some(*i),
                _ => None,
            },
            _ => None,
        })
        .next();
    assert_eq!(tag_store, Some(1));
}

#[test]
fn type_match_dispatches_on_union_tag() {
    let mut h = Harness::new();
    let int = h.int();
    let nil_sentinel = h.info.types.basic(BasicKind::UntypedNil);
    let payload = h.info.types.intern(TypeKind::Record {
        kind: RecordKind::Struct,
        fields: vec![Field { name: "value".into(), ty: int, anonymous: false }],
    });
    let a_ty = h.info.types.named("A", payload);
    let union_base = h.info.types.intern(TypeKind::Record {
        kind: RecordKind::Union,
        fields: vec![
            Field { name: String::new(), ty: nil_sentinel, anonymous: false },
            Field { name: "A".into(), ty: a_ty, anonymous: false },
        ],
    });
    let union_ty = h.info.types.named("U", union_base);
    let union_ptr = h.info.types.ptr_to(union_ty);
    let a_ptr = h.info.types.ptr_to(a_ty);

    let up = h.var_entity("up", union_ptr);
    let up_decl = h.decl(up, Vec::new());
    let tag = h.use_ident(up, AddressingMode::Variable);

    let var = h.node(NodeKind::Ident { name: "v".to_string() });

    // The per-clause scope binds the tag variable at the variant type.
    let v_entity = h.var_entity("v", a_ptr);
    let mut scope = Scope::default();
    scope.entities.insert("v".to_string(), v_entity);
    let scope_id = h.info.add_scope(scope);

    let clause = h.node(NodeKind::CaseClause { list: vec![var], stmts: Vec::new() });
    h.info.node_scopes.insert(clause, scope_id);

    let body = h.block(vec![clause]);
    let tm = h.node(NodeKind::TypeMatch { tag, var, body });

    let (module, pid) = h.build(vec![up_decl, tm]);
    check_invariants(&module, pid);

    // The dispatch compares the loaded tag index with the variant position.
    let eq_against_one = module
        .proc(pid)
        .blocks
        .iter()
        .flat_map(|&b| module.proc(pid).block(b).instrs.iter())
        .any(|&v| match &module.instr(v).unwrap().kind {
            InstrKind::BinaryOp { op: lyre_front::BinOp::CmpEq, right, .. } => matches!(
                &module.value(*right).kind,
                ValueKind::Constant { value: ExactValue::Integer(1), .. }
            ),
            _ => false,
        });
    assert!(eq_against_one, "expected a tag comparison against the variant index");

    // The case body binds a typed local for the variant pointer.
    assert!(count_instrs(&module, pid, |k| matches!(k, InstrKind::Local { .. })) >= 2);
    assert!(
        count_instrs(&module, pid, |k| matches!(
            k,
            InstrKind::Conv { kind: ConvKind::Bitcast, .. }
        )) >= 2
    );
}

#[test]
fn push_context_restores_through_a_defer() {
    let mut h = Harness::new();
    let int = h.int();
    let rawptr = h.info.types.basic(BasicKind::Rawptr);
    let ctx_base = h.info.types.intern(TypeKind::Record {
        kind: RecordKind::Struct,
        fields: vec![
            Field { name: "data".into(), ty: int, anonymous: false },
            Field { name: "allocator".into(), ty: rawptr, anonymous: false },
        ],
    });
    let ctx_ty = h.info.types.named("Context", ctx_base);

    let ctx_entity = h.info.entities.add(Entity {
        kind: EntityKind::Variable { anonymous: false, using_parent: None, using_expr: None },
        name: "__context".to_string(),
        ty: ctx_ty,
        pos: Pos::none(),
        scope: None,
    });

    let cv = h.var_entity("cv", ctx_ty);
    let cv_decl = h.decl(cv, Vec::new());
    let cv_use = h.use_ident(cv, AddressingMode::Variable);
    let inner = h.block(Vec::new());
    let push = h.node(NodeKind::PushContext { expr: cv_use, body: inner });

    let (module, pid) = h.build_with(vec![cv_decl, push], |module| {
        module.declare_global(lyre_ssa::CONTEXT_NAME, ctx_entity);
    });
    check_invariants(&module, pid);

    // Two stores hit the context global: the push and the deferred restore.
    let ctx_global = module.find_member(lyre_ssa::CONTEXT_NAME).unwrap();
    let proc = module.proc(pid);
    let ctx_stores = proc
        .blocks
        .iter()
        .flat_map(|&b| proc.block(b).instrs.iter())
        .filter(|&&v| match &module.instr(v).unwrap().kind {
            InstrKind::Store { addr, .. } => *addr == ctx_global,
            _ => false,
        })
        .count();
    assert_eq!(ctx_stores, 2);
}

#[test]
fn slice_indexing_emits_bounds_checks_unless_disabled() {
    for disabled in [false, true] {
        let mut h = Harness::new();
        let int = h.int();
        let int_slice = h.info.types.slice_of(int);
        let s = h.var_entity("s", int_slice);
        let s_decl = h.decl(s, Vec::new());

        let s_use = h.use_ident(s, AddressingMode::Variable);
        let index = h.int_const(0);
        let index_expr = h.node(NodeKind::Index { expr: s_use, index });
        h.set_type(index_expr, int, AddressingMode::Variable);

        let flags = if disabled { NodeFlags::NO_BOUNDS_CHECK } else { NodeFlags::empty() };
        let pos = h.pos();
        let stmt = h
            .info
            .ast
            .add_flagged(NodeKind::ExprStmt { expr: index_expr }, pos, flags);

        let (module, pid) = h.build_with(vec![s_decl, stmt], declare_runtime);
        check_invariants(&module, pid);

        let checker = module.find_member("__bounds_check_error").unwrap();
        let proc = module.proc(pid);
        let check_calls = proc
            .blocks
            .iter()
            .flat_map(|&b| proc.block(b).instrs.iter())
            .filter(|&&v| match &module.instr(v).unwrap().kind {
                InstrKind::Call { target, .. } => *target == checker,
                _ => false,
            })
            .count();
        if disabled {
            assert_eq!(check_calls, 0, "no bounds check under the override");
        } else {
            assert_eq!(check_calls, 1, "indexing emits one bounds check");
        }
    }
}
