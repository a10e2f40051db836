//! Shared test harness: hand-built checker tables standing in for the
//! out-of-scope front end, plus a structural invariant checker for finalized
//! procedures.

use lyre_common::{FileId, Pos};
use lyre_front::{
    AddressingMode, BasicKind, BinOp, CheckerInfo, Entity, EntityId, EntityKind, ExactValue,
    NodeId, NodeKind, ProcTags, TupleField, TypeAndValue, TypeId, TypeKind,
};
use lyre_ssa::{InstrKind, Module, ProcId, ValueKind};

pub struct Harness {
    pub info: CheckerInfo,
    pub file: FileId,
    line: u32,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        let mut info = CheckerInfo::new();
        let file = info.add_file("test.ly");
        Harness { info, file, line: 0 }
    }

    pub fn pos(&mut self) -> Pos {
        self.line += 1;
        Pos::new(self.file, self.line, 1)
    }

    pub fn int(&mut self) -> TypeId {
        self.info.types.basic(BasicKind::Int)
    }

    pub fn boolean(&mut self) -> TypeId {
        self.info.types.basic(BasicKind::Bool)
    }

    pub fn node(&mut self, kind: NodeKind) -> NodeId {
        let pos = self.pos();
        self.info.ast.add(kind, pos)
    }

    pub fn set_type(&mut self, node: NodeId, ty: TypeId, mode: AddressingMode) {
        self.info.expr_types.insert(node, TypeAndValue { ty, mode, value: None });
    }

    pub fn int_const(&mut self, v: i64) -> NodeId {
        let n = self.node(NodeKind::BasicLit);
        let int = self.int();
        self.info.expr_types.insert(
            n,
            TypeAndValue {
                ty: int,
                mode: AddressingMode::Constant,
                value: Some(ExactValue::Integer(v)),
            },
        );
        n
    }

    pub fn var_entity(&mut self, name: &str, ty: TypeId) -> EntityId {
        self.info.entities.add(Entity {
            kind: EntityKind::Variable { anonymous: false, using_parent: None, using_expr: None },
            name: name.to_string(),
            ty,
            pos: Pos::none(),
            scope: None,
        })
    }

    /// An identifier usable both as a declaration site and an address.
    pub fn def_ident(&mut self, entity: EntityId) -> NodeId {
        let name = self.info.entities.name(entity).to_string();
        let n = self.node(NodeKind::Ident { name });
        self.info.definitions.insert(n, entity);
        self.info.uses.insert(n, entity);
        n
    }

    pub fn use_ident(&mut self, entity: EntityId, mode: AddressingMode) -> NodeId {
        let name = self.info.entities.name(entity).to_string();
        let ty = self.info.entities.ty(entity);
        let n = self.node(NodeKind::Ident { name });
        self.info.uses.insert(n, entity);
        self.set_type(n, ty, mode);
        n
    }

    pub fn binary(&mut self, op: BinOp, left: NodeId, right: NodeId, ty: TypeId) -> NodeId {
        let n = self.node(NodeKind::Binary { op, left, right });
        self.set_type(n, ty, AddressingMode::Value);
        n
    }

    /// A binary expression the checker already folded to a constant.
    pub fn folded_binary(
        &mut self,
        op: BinOp,
        left: NodeId,
        right: NodeId,
        ty: TypeId,
        value: ExactValue,
    ) -> NodeId {
        let n = self.node(NodeKind::Binary { op, left, right });
        self.info.expr_types.insert(
            n,
            TypeAndValue { ty, mode: AddressingMode::Value, value: Some(value) },
        );
        n
    }

    pub fn decl(&mut self, entity: EntityId, values: Vec<NodeId>) -> NodeId {
        let name = self.def_ident(entity);
        self.node(NodeKind::VarDecl { names: vec![name], values })
    }

    pub fn decl_many(&mut self, entities: &[EntityId], values: Vec<NodeId>) -> NodeId {
        let names: Vec<NodeId> = entities.iter().map(|&e| self.def_ident(e)).collect();
        self.node(NodeKind::VarDecl { names, values })
    }

    pub fn assign(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.node(NodeKind::Assign { op: None, lhs: vec![lhs], rhs: vec![rhs] })
    }

    pub fn block(&mut self, stmts: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::Block { stmts })
    }

    pub fn expr_stmt(&mut self, expr: NodeId) -> NodeId {
        self.node(NodeKind::ExprStmt { expr })
    }

    pub fn proc_ty(&mut self, params: Vec<EntityId>, results: Vec<TypeId>) -> TypeId {
        self.proc_ty_full(params, results, false)
    }

    pub fn proc_ty_full(
        &mut self,
        params: Vec<EntityId>,
        results: Vec<TypeId>,
        variadic: bool,
    ) -> TypeId {
        let pfields: Vec<TupleField> = params
            .iter()
            .map(|&e| TupleField {
                name: Some(self.info.entities.name(e).to_string()),
                entity: Some(e),
                ty: self.info.entities.ty(e),
            })
            .collect();
        let params = self.info.types.tuple_of(pfields);
        let results = if results.is_empty() {
            None
        } else {
            let fields = results.into_iter().map(TupleField::unnamed).collect();
            Some(self.info.types.tuple_of(fields))
        };
        self.info.types.intern(TypeKind::Proc { params, results, variadic })
    }

    /// Finish the harness: wrap the statements into a procedure body, build
    /// the module, and generate SSA.
    pub fn build(self, stmts: Vec<NodeId>) -> (Module, ProcId) {
        self.build_with(stmts, |_| {})
    }

    pub fn build_with(
        mut self,
        stmts: Vec<NodeId>,
        setup: impl FnOnce(&mut Module),
    ) -> (Module, ProcId) {
        let body = self.block(stmts);
        let ty = self.proc_ty(Vec::new(), Vec::new());
        let entity = self.info.entities.add(Entity {
            kind: EntityKind::Procedure,
            name: "test_proc".to_string(),
            ty,
            pos: Pos::none(),
            scope: None,
        });
        let mut module = Module::new(self.info, false);
        setup(&mut module);
        let pv = module.declare_procedure(Some(entity), ty, Some(body), ProcTags::empty(), "test_proc");
        module.generate().expect("SSA construction succeeds");
        let pid = match module.value(pv).kind {
            ValueKind::Proc { proc } => proc,
            _ => unreachable!(),
        };
        (module, pid)
    }
}

/// Foreign runtime procedures the lowering references by name.
#[allow(dead_code)]
pub fn declare_runtime(module: &mut Module) {
    let rawptr = module.t_rawptr;
    let string = module.t_string;
    let void: Vec<TypeId> = Vec::new();
    let names: &[(&str, Vec<TypeId>)] = &[
        ("alloc_align", vec![rawptr]),
        ("__mem_copy", void.clone()),
        ("__bounds_check_error", void.clone()),
        ("__slice_expr_error", void.clone()),
        ("__substring_expr_error", void.clone()),
        ("__assert", void.clone()),
        ("__enum_to_string", vec![string]),
    ];
    for (name, results) in names {
        let params = module.info.types.tuple_of(Vec::new());
        let results = if results.is_empty() {
            None
        } else {
            let fields = results.iter().copied().map(TupleField::unnamed).collect();
            Some(module.info.types.tuple_of(fields))
        };
        let ty = module
            .info
            .types
            .intern(TypeKind::Proc { params, results, variadic: false });
        let entity = module.info.entities.add(Entity {
            kind: EntityKind::Procedure,
            name: name.to_string(),
            ty,
            pos: Pos::none(),
            scope: None,
        });
        module.declare_procedure(Some(entity), ty, None, ProcTags::FOREIGN, *name);
    }
}

/// Structural invariants every finalized procedure must satisfy.
#[allow(dead_code)]
pub fn check_invariants(module: &Module, pid: ProcId) {
    let proc = module.proc(pid);
    assert!(!proc.blocks.is_empty());
    assert_eq!(proc.blocks[0], proc.decl_block, "decl block leads the block list");

    let mut seen_indices = std::collections::HashSet::new();
    for (i, &b) in proc.blocks.iter().enumerate() {
        let block = proc.block(b);
        assert_eq!(block.index, i as i32, "block index matches list position");

        // Exactly one terminator, and it is the final instruction.
        assert!(!block.instrs.is_empty(), "block `{}` is empty", block.label);
        for (j, &v) in block.instrs.iter().enumerate() {
            let instr = module.instr(v).expect("blocks hold instruction values");
            assert_eq!(instr.parent, Some(b), "instruction parent is its block");
            if j + 1 < block.instrs.len() {
                assert!(
                    !instr.is_terminator(),
                    "terminator before the end of block `{}`",
                    block.label
                );
            } else {
                assert!(
                    instr.is_terminator(),
                    "block `{}` does not end in a terminator",
                    block.label
                );
            }

            // All locals live in the decl block.
            if matches!(instr.kind, InstrKind::Local { .. }) {
                assert_eq!(instr.parent, Some(proc.decl_block));
            }

            // Phi edge counts match predecessor counts.
            if let InstrKind::Phi { edges, .. } = &instr.kind {
                assert_eq!(edges.len(), block.preds.len(), "phi arity in `{}`", block.label);
            }

            // Unique strictly positive register numbers for typed values.
            if module.instr_type(instr).is_some() {
                let index = module.value(v).index;
                assert!(index > 0, "typed instruction without a register index");
                assert!(seen_indices.insert(index), "duplicate register index {}", index);
            }
        }

        // Edge consistency with multiplicity.
        for &s in &block.succs {
            let back = proc.block(s).preds.iter().filter(|&&p| p == b).count();
            let fwd = block.succs.iter().filter(|&&x| x == s).count();
            assert_eq!(back, fwd, "pred/succ mismatch between `{}` and `{}`", block.label, proc.block(s).label);
        }
        for &p in &block.preds {
            let fwd = proc.block(p).succs.iter().filter(|&&x| x == b).count();
            let back = block.preds.iter().filter(|&&x| x == p).count();
            assert_eq!(fwd, back);
        }

        // Dominators: every non-entry block has an idom that dominates it
        // under the pre/post ancestor query.
        if i > 0 {
            let idom = block.dom.idom.expect("non-entry block has an idom");
            let d = &proc.block(idom).dom;
            assert!(
                d.pre <= block.dom.pre && block.dom.post <= d.post,
                "idom of `{}` does not dominate it",
                block.label
            );
        } else {
            assert!(block.dom.idom.is_none());
        }
    }
}

/// Count instructions of one kind across a procedure.
#[allow(dead_code)]
pub fn count_instrs(module: &Module, pid: ProcId, pred: impl Fn(&InstrKind) -> bool) -> usize {
    let proc = module.proc(pid);
    proc.blocks
        .iter()
        .flat_map(|&b| proc.block(b).instrs.iter())
        .filter(|&&v| module.instr(v).map(|i| pred(&i.kind)).unwrap_or(false))
        .count()
}

/// Find the blocks whose label matches.
#[allow(dead_code)]
pub fn blocks_labeled(module: &Module, pid: ProcId, label: &str) -> Vec<lyre_ssa::BlockId> {
    let proc = module.proc(pid);
    proc.blocks
        .iter()
        .copied()
        .filter(|&b| proc.block(b).label == label)
        .collect()
}
