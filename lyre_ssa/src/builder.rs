//! The procedure builder: block creation, the emission cursor, scopes,
//! defers, and the begin/end of a procedure body.

use log::trace;
use lyre_front::{EntityId, NodeId, ProcTags, TypeId, TypeKind};
use smallvec::SmallVec;

use crate::block::{Block, BlockId};
use crate::error::{SsaError, SsaResult};
use crate::instruction::{ConvKind, Instr, InstrKind};
use crate::module::Module;
use crate::procedure::{Defer, DeferExitKind, DeferPayload, ProcId};
use crate::value::{ValueId, ValueKind};
use crate::{dominators, optimizer};

/// Mutable context threaded through all lowering functions: the module plus
/// the procedure being built.
pub struct ProcBuilder<'m> {
    pub module: &'m mut Module,
    pub proc_id: ProcId,
    pub proc_value: ValueId,
}

impl<'m> ProcBuilder<'m> {
    pub fn proc(&self) -> &crate::procedure::Procedure {
        self.module.proc(self.proc_id)
    }

    pub fn proc_mut(&mut self) -> &mut crate::procedure::Procedure {
        self.module.proc_mut(self.proc_id)
    }

    /// The type of a value that must have one; absence is a core bug.
    pub fn value_ty(&self, v: ValueId) -> TypeId {
        self.module
            .value_type(v)
            .unwrap_or_else(|| panic!("value {:?} has no type", v))
    }

    pub fn node_tv(&self, node: NodeId) -> SsaResult<lyre_front::TypeAndValue> {
        self.module
            .info
            .type_and_value(node)
            .cloned()
            .ok_or(SsaError::MissingNodeInfo { pos: self.module.info.ast.pos(node) })
    }

    pub fn node_type(&self, node: NodeId) -> SsaResult<TypeId> {
        Ok(self.node_tv(node)?.ty)
    }

    // ---- instruction construction ---------------------------------------

    pub fn make_instr(&mut self, kind: InstrKind) -> ValueId {
        self.module.add_value(ValueKind::Instr(Instr::new(kind)))
    }

    pub fn make_local(&mut self, entity: EntityId, zero_initialized: bool) -> ValueId {
        let entity_ty = self.module.info.entities.ty(entity);
        let ty = self.module.info.types.ptr_to(entity_ty);
        let v = self.make_instr(InstrKind::Local {
            entity,
            ty,
            zero_initialized,
            referrers: Vec::new(),
        });
        self.module.values.insert(entity, v);
        v
    }

    pub fn make_load(&mut self, addr: ValueId) -> ValueId {
        let ty = self.module.info.types.deref(self.value_ty(addr));
        self.make_instr(InstrKind::Load { ty, addr })
    }

    pub fn make_get_element_ptr(
        &mut self,
        addr: ValueId,
        indices: SmallVec<[ValueId; 2]>,
        inbounds: bool,
        result_ty: TypeId,
    ) -> ValueId {
        let elem_ty = self.value_ty(addr);
        assert!(
            self.module.info.types.is_pointer(elem_ty),
            "element pointer through non-pointer type {}",
            self.module.info.types.display(elem_ty)
        );
        self.make_instr(InstrKind::GetElementPtr { addr, result_ty, elem_ty, indices, inbounds })
    }

    pub fn make_extract_value(&mut self, agg: ValueId, index: i32, result_ty: TypeId) -> ValueId {
        let elem_ty = self.value_ty(agg);
        self.make_instr(InstrKind::ExtractValue { agg, index, result_ty, elem_ty })
    }

    pub fn make_conv(
        &mut self,
        kind: ConvKind,
        value: ValueId,
        from: TypeId,
        to: TypeId,
    ) -> ValueId {
        self.make_instr(InstrKind::Conv { kind, value, from, to })
    }

    pub fn make_shuffle_vector(&mut self, vector: ValueId, indices: Vec<i32>) -> ValueId {
        let vt = self.module.info.types.base(self.value_ty(vector));
        let elem = match self.module.info.types.kind(vt) {
            TypeKind::Vector { elem, .. } => *elem,
            other => panic!("shuffle of non-vector type {:?}", other),
        };
        let ty = self.module.info.types.vector_of(elem, indices.len() as i64);
        self.make_instr(InstrKind::ShuffleVector { vector, indices, ty })
    }

    // ---- emission --------------------------------------------------------

    fn last_instr_of(&self, block: BlockId) -> Option<&Instr> {
        let instrs = &self.proc().block(block).instrs;
        instrs.last().and_then(|&v| self.module.instr(v))
    }

    /// Append to the current block unless it already fell off the end of
    /// control flow; dead emits after a `Ret`/`Unreachable` are dropped.
    pub fn emit(&mut self, instr: ValueId) -> ValueId {
        debug_assert!(self.module.value(instr).as_instr().is_some());
        let block = self.proc().curr_block;
        if let Some(instr_ref) = self.module.instr_mut(instr) {
            instr_ref.parent = block;
        }
        if let Some(block) = block {
            let terminated =
                self.last_instr_of(block).map(|i| i.is_terminating()).unwrap_or(false);
            if !terminated {
                self.proc_mut().block_mut(block).instrs.push(instr);
            }
        }
        instr
    }

    pub fn emit_store(&mut self, addr: ValueId, value: ValueId) -> ValueId {
        let v = self.make_instr(InstrKind::Store { addr, value });
        self.emit(v)
    }

    pub fn emit_load(&mut self, addr: ValueId) -> ValueId {
        let v = self.make_load(addr);
        self.emit(v)
    }

    pub fn emit_select(&mut self, cond: ValueId, t: ValueId, f: ValueId) -> ValueId {
        let v = self.make_instr(InstrKind::Select { cond, true_value: t, false_value: f });
        self.emit(v)
    }

    pub fn emit_zero_init(&mut self, addr: ValueId) -> ValueId {
        let v = self.make_instr(InstrKind::ZeroInit { addr });
        self.emit(v)
    }

    pub fn emit_comment(&mut self, text: impl Into<String>) -> ValueId {
        let v = self.make_instr(InstrKind::Comment { text: text.into() });
        self.emit(v)
    }

    pub fn emit_no_op(&mut self) {
        let v = self.make_instr(InstrKind::NoOp);
        self.emit(v);
    }

    pub fn emit_unreachable(&mut self) {
        let v = self.make_instr(InstrKind::Unreachable);
        self.emit(v);
    }

    // ---- blocks and edges ------------------------------------------------

    pub fn add_block(&mut self, node: Option<NodeId>, label: &str) -> BlockId {
        let scope = node.and_then(|n| self.module.info.scope_of(n));
        let scope_index = self.proc().scope_index;
        let mut block = Block::new(label, node, scope);
        block.scope_index = scope_index;
        self.proc_mut().add_block_data(block)
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.proc_mut().block_mut(from).succs.push(to);
        self.proc_mut().block_mut(to).preds.push(from);
    }

    pub fn set_curr_block(&mut self, block: BlockId) {
        self.proc_mut().curr_block = Some(block);
    }

    /// Unconditional jump; closes the current block.
    pub fn emit_jump(&mut self, target: BlockId) {
        let Some(b) = self.proc().curr_block else { return };
        let br = self.make_instr(InstrKind::Br { cond: None, then_block: target, else_block: None });
        self.emit(br);
        self.add_edge(b, target);
        self.proc_mut().curr_block = None;
    }

    /// Conditional jump; records both edges and closes the current block.
    pub fn emit_if(&mut self, cond: ValueId, true_block: BlockId, false_block: BlockId) {
        let Some(b) = self.proc().curr_block else { return };
        let br = self.make_instr(InstrKind::Br {
            cond: Some(cond),
            then_block: true_block,
            else_block: Some(false_block),
        });
        self.emit(br);
        self.add_edge(b, true_block);
        self.add_edge(b, false_block);
        self.proc_mut().curr_block = None;
    }

    // ---- locals and parameters -------------------------------------------

    pub fn add_local(&mut self, entity: EntityId, zero_initialized: bool) -> ValueId {
        let instr = self.make_local(entity, zero_initialized);
        let decl = self.proc().decl_block;
        if let Some(i) = self.module.instr_mut(instr) {
            i.parent = Some(decl);
        }
        let block = self.proc_mut().block_mut(decl);
        block.instrs.push(instr);
        block.locals.push(instr);

        self.emit_zero_init(instr);
        instr
    }

    pub fn add_local_for_identifier(
        &mut self,
        name: NodeId,
        zero_initialized: bool,
    ) -> Option<ValueId> {
        let entity = self.module.info.entity_of_def(name)?;
        let text = self.module.info.entities.name(entity).to_string();
        self.emit_comment(text);
        Some(self.add_local(entity, zero_initialized))
    }

    pub fn add_local_generated(&mut self, ty: TypeId) -> ValueId {
        let scope = self.proc().curr_block.and_then(|b| self.proc().block(b).scope);
        let entity = self.module.info.entities.add_generated_variable(ty, scope);
        self.add_local(entity, true)
    }

    pub fn add_param(&mut self, entity: EntityId) -> ValueId {
        let ty = self.module.info.entities.ty(entity);
        let param = self.module.add_value(ValueKind::Param {
            parent: self.proc_id,
            entity,
            ty,
            referrers: Vec::new(),
        });
        let local = self.add_local(entity, true);
        self.emit_store(local, param);
        param
    }

    // ---- calls -----------------------------------------------------------

    pub fn emit_call(&mut self, target: ValueId, args: Vec<ValueId>) -> ValueId {
        let target_ty = self.module.info.types.base(self.value_ty(target));
        let results = match self.module.info.types.kind(target_ty) {
            TypeKind::Proc { results, .. } => *results,
            other => panic!("call through non-procedure type {:?}", other),
        };
        let v = self.make_instr(InstrKind::Call { result: results, target, args });
        self.emit(v)
    }

    pub fn emit_runtime_call(&mut self, name: &str, args: Vec<ValueId>) -> SsaResult<ValueId> {
        let target = self.module.member(name)?;
        Ok(self.emit_call(target, args))
    }

    // ---- scopes and defers -----------------------------------------------

    pub fn open_scope(&mut self) {
        self.proc_mut().scope_index += 1;
    }

    pub fn close_scope(&mut self, kind: DeferExitKind, block: Option<BlockId>) -> SsaResult<()> {
        self.emit_defer_stmts(kind, block)?;
        let proc = self.proc_mut();
        assert!(proc.scope_index > 0, "scope underflow");
        proc.scope_index -= 1;
        Ok(())
    }

    pub fn add_defer_node(&mut self, scope_index: usize, stmt: NodeId) {
        let block = self.proc().curr_block;
        self.proc_mut().defer_stmts.push(Defer {
            scope_index,
            block,
            payload: DeferPayload::Stmt(stmt),
        });
    }

    pub fn add_defer_instr(&mut self, scope_index: usize, instr: ValueId) {
        let block = self.proc().curr_block;
        self.proc_mut().defer_stmts.push(Defer {
            scope_index,
            block,
            payload: DeferPayload::Instr(instr),
        });
    }

    /// Emit one defer in its own block, connected by fall-through when the
    /// cursor has not already terminated.
    fn build_defer_stmt(&mut self, d: Defer) -> SsaResult<()> {
        let b = self.add_block(None, "defer");
        let needs_jump = match self.proc().curr_block {
            Some(curr) => !self.last_instr_of(curr).map(|i| i.is_terminating()).unwrap_or(false),
            None => false,
        };
        if needs_jump {
            self.emit_jump(b);
        }
        self.set_curr_block(b);
        self.emit_comment("defer");
        match d.payload {
            DeferPayload::Stmt(stmt) => self.build_stmt(stmt)?,
            DeferPayload::Instr(template) => {
                // Each unroll owns a fresh clone so referrer lists stay with
                // the clone's block.
                let kind = self.module.value(template).kind.clone();
                let v = self.module.add_value(kind);
                self.emit(v);
            }
        }
        Ok(())
    }

    pub fn emit_defer_stmts(
        &mut self,
        kind: DeferExitKind,
        block: Option<BlockId>,
    ) -> SsaResult<()> {
        match kind {
            DeferExitKind::Default => loop {
                let scope_index = self.proc().scope_index;
                let Some(d) = self.proc().defer_stmts.last().cloned() else { break };
                if scope_index == d.scope_index && d.scope_index > 1 {
                    self.build_defer_stmt(d)?;
                    self.proc_mut().defer_stmts.pop();
                } else {
                    break;
                }
            },
            DeferExitKind::Return => {
                for d in self.proc().defer_stmts.clone().into_iter().rev() {
                    self.build_defer_stmt(d)?;
                }
            }
            DeferExitKind::Branch => {
                let block = block.expect("branch defer emission needs a target block");
                let lower_limit = self.proc().block(block).scope_index + 1;
                for d in self.proc().defer_stmts.clone().into_iter().rev() {
                    if lower_limit < d.scope_index {
                        self.build_defer_stmt(d)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ---- returns ---------------------------------------------------------

    pub fn emit_ret(&mut self, value: Option<ValueId>) -> SsaResult<()> {
        self.emit_defer_stmts(DeferExitKind::Return, None)?;
        let v = self.make_instr(InstrKind::Ret { value });
        self.emit(v);
        Ok(())
    }

    // ---- body lifecycle --------------------------------------------------

    pub fn begin_procedure_body(&mut self) {
        let body = self.proc().body;
        let decl = self.add_block(body, "decls");
        let entry = self.add_block(body, "entry");
        {
            let proc = self.proc_mut();
            proc.decl_block = decl;
            proc.entry_block = entry;
            proc.curr_block = Some(entry);
        }

        let sig = self.proc().ty;
        let params = match self.module.info.types.kind(self.module.info.types.base(sig)) {
            TypeKind::Proc { params, .. } => *params,
            other => panic!("procedure with non-procedure type {:?}", other),
        };
        let entities: Vec<EntityId> = self
            .module
            .info
            .types
            .tuple_fields(params)
            .iter()
            .filter_map(|f| f.entity)
            .collect();
        for entity in entities {
            self.add_param(entity);
        }
    }

    pub fn end_procedure_body(&mut self) -> SsaResult<()> {
        let sig = self.proc().ty;
        let results = match self.module.info.types.kind(self.module.info.types.base(sig)) {
            TypeKind::Proc { results, .. } => *results,
            _ => None,
        };
        let result_count = results.map(|r| self.module.info.types.tuple_len(r)).unwrap_or(0);
        if result_count == 0 {
            self.emit_ret(None)?;
        }

        if let Some(curr) = self.proc().curr_block {
            if self.proc().block(curr).instrs.is_empty() {
                self.emit_unreachable();
            }
        }

        let entry = self.proc().entry_block;
        let decl = self.proc().decl_block;
        self.proc_mut().curr_block = Some(decl);
        self.emit_jump(entry);

        optimizer::optimize_blocks(self.module, self.proc_id);
        optimizer::build_referrers(self.module, self.proc_id);
        dominators::build_dom_tree(self.module.proc_mut(self.proc_id));
        optimizer::opt_mem2reg(self.module, self.proc_id);
        optimizer::number_registers(self.module, self.proc_id);

        trace!(
            "finished procedure `{}`: {} blocks",
            self.proc().name,
            self.proc().blocks.len()
        );
        Ok(())
    }
}

/// Build one procedure's body, driving lowering and post-processing.
pub fn build_proc(module: &mut Module, proc_value: ValueId) -> SsaResult<()> {
    let pid = match module.value(proc_value).kind {
        ValueKind::Proc { proc } => proc,
        _ => panic!("build_proc on a non-procedure value"),
    };

    if let Some(entity) = module.proc(pid).entity {
        let pos = module.info.entities.get(entity).pos;
        let name = module.proc(pid).name.clone();
        let file_key = module.add_debug_info_file(pos.file);
        module.add_debug_info_proc(entity, &name, file_key);
    }

    if module.proc(pid).body.is_none() {
        return Ok(());
    }

    let prev_flags = module.stmt_state_flags;
    let tags = module.proc(pid).tags;
    module.stmt_state_flags = module.stmt_state_flags.apply(
        tags.contains(ProcTags::BOUNDS_CHECK),
        tags.contains(ProcTags::NO_BOUNDS_CHECK),
    );

    let result = build_proc_body(module, pid, proc_value);
    module.stmt_state_flags = prev_flags;
    result
}

fn build_proc_body(module: &mut Module, pid: ProcId, proc_value: ValueId) -> SsaResult<()> {
    let mut b = ProcBuilder { module, proc_id: pid, proc_value };
    b.begin_procedure_body();
    if b.proc().parent.is_none() && b.proc().name == "main" {
        let v = b.make_instr(InstrKind::StartupRuntime);
        b.emit(v);
    }
    let body = b.proc().body.expect("bodied procedure");
    b.build_stmt(body)?;
    b.end_procedure_body()
}

impl Module {
    /// Generate bodies for every scheduled procedure, including procedures
    /// queued while building earlier ones.
    pub fn generate(&mut self) -> SsaResult<()> {
        let mut i = 0;
        while i < self.procs.len() {
            let pv = self.procs[i];
            build_proc(self, pv)?;
            i += 1;
        }
        Ok(())
    }
}
