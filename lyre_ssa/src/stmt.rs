//! Statement lowering.

use lyre_front::{BinOp, NodeId, NodeKind, ProcTags, TypeKind};

use crate::builder::ProcBuilder;
use crate::error::{SsaError, SsaResult};
use crate::expr::LValue;
use crate::procedure::DeferExitKind;
use crate::value::ValueKind;
use crate::CONTEXT_NAME;

impl<'m> ProcBuilder<'m> {
    pub fn build_stmt_list(&mut self, stmts: &[NodeId]) -> SsaResult<()> {
        for &s in stmts {
            self.build_stmt(s)?;
        }
        Ok(())
    }

    pub fn build_stmt(&mut self, node: NodeId) -> SsaResult<()> {
        let prev_flags = self.module.stmt_state_flags;
        let node_flags = self.module.info.ast.node(node).flags;
        if !node_flags.is_empty() {
            self.module.stmt_state_flags = prev_flags.apply(
                node_flags.contains(lyre_front::NodeFlags::BOUNDS_CHECK),
                node_flags.contains(lyre_front::NodeFlags::NO_BOUNDS_CHECK),
            );
        }
        let result = self.build_stmt_inner(node);
        self.module.stmt_state_flags = prev_flags;
        result
    }

    fn build_stmt_inner(&mut self, node: NodeId) -> SsaResult<()> {
        let pos = self.module.info.ast.pos(node);
        match self.module.info.ast.kind(node).clone() {
            NodeKind::Empty => Ok(()),

            NodeKind::Using { node: decl } => {
                let decl = self.module.info.ast.unparen(decl);
                if matches!(self.module.info.ast.kind(decl), NodeKind::VarDecl { .. }) {
                    self.build_stmt(decl)?;
                }
                Ok(())
            }

            NodeKind::VarDecl { names, values } => self.build_var_decl(&names, &values),

            NodeKind::ProcDecl { name, body, tags, link_name, foreign_name } => {
                self.build_proc_decl(name, body, tags, link_name, foreign_name, pos)
            }

            NodeKind::TypeDecl { name } => {
                let td_name = self
                    .module
                    .info
                    .ast
                    .ident_name(name)
                    .unwrap_or_default()
                    .to_string();
                let entity = self
                    .module
                    .info
                    .entity_of_def(name)
                    .ok_or(SsaError::UnknownValue { name: td_name.clone(), pos })?;
                // parent_proc.name-guid
                let guid = self.module.members.len();
                let mangled = format!("{}.{}-{}", self.proc().name, td_name, guid);
                let ty = self.module.info.entities.ty(entity);
                self.module.type_names.insert(ty, mangled.clone());
                self.module.gen_global_type_name(entity, &mangled);
                Ok(())
            }

            NodeKind::IncDec { op, expr } => {
                self.emit_comment("inc/dec statement");
                let lval = self.build_addr(expr)?;
                let one = self.module.const_int(1);
                let one = match self.addr_type(&lval) {
                    Some(ty) => self.emit_conv(one, ty)?,
                    None => one,
                };
                self.build_assign_op(&lval, one, op)
            }

            NodeKind::Assign { op, lhs, rhs } => {
                self.emit_comment("assign statement");
                match op {
                    None => self.build_plain_assign(&lhs, &rhs),
                    Some(op) => {
                        // Compound assignment is single-target only.
                        let lval = self.build_addr(lhs[0])?;
                        let value = self.build_expr(rhs[0])?;
                        self.build_assign_op(&lval, value, op)
                    }
                }
            }

            NodeKind::ExprStmt { expr } => {
                self.build_expr(expr)?;
                Ok(())
            }

            NodeKind::Block { stmts } => {
                self.open_scope();
                self.build_stmt_list(&stmts)?;
                self.close_scope(DeferExitKind::Default, None)
            }

            NodeKind::Defer { stmt } => {
                self.emit_comment("defer statement");
                let mut scope_index = self.proc().scope_index;
                if matches!(self.module.info.ast.kind(stmt), NodeKind::Block { .. }) {
                    scope_index = scope_index.saturating_sub(1);
                }
                self.add_defer_node(scope_index, stmt);
                Ok(())
            }

            NodeKind::Return { results } => self.build_return(&results),

            NodeKind::If { init, cond, body, else_stmt } => {
                self.emit_comment("if statement");
                if let Some(init) = init {
                    let init_block = self.add_block(Some(node), "if.init");
                    self.emit_jump(init_block);
                    self.set_curr_block(init_block);
                    self.build_stmt(init)?;
                }
                let then = self.add_block(Some(node), "if.then");
                let done = self.add_block(Some(node), "if.done");
                let else_ = match else_stmt {
                    Some(e) => self.add_block(Some(e), "if.else"),
                    None => done,
                };

                self.build_cond(cond, then, else_)?;
                self.set_curr_block(then);

                self.open_scope();
                self.build_stmt(body)?;
                self.close_scope(DeferExitKind::Default, None)?;
                self.emit_jump(done);

                if let Some(e) = else_stmt {
                    self.set_curr_block(else_);
                    self.open_scope();
                    self.build_stmt(e)?;
                    self.close_scope(DeferExitKind::Default, None)?;
                    self.emit_jump(done);
                }
                self.set_curr_block(done);
                Ok(())
            }

            NodeKind::For { init, cond, post, body } => {
                self.emit_comment("for statement");
                if let Some(init) = init {
                    let init_block = self.add_block(Some(node), "for.init");
                    self.emit_jump(init_block);
                    self.set_curr_block(init_block);
                    self.build_stmt(init)?;
                }
                let body_block = self.add_block(Some(node), "for.body");
                let done = self.add_block(Some(node), "for.done");
                let loop_ = match cond {
                    Some(_) => self.add_block(Some(node), "for.loop"),
                    None => body_block,
                };
                let cont = match post {
                    Some(_) => self.add_block(Some(node), "for.post"),
                    None => loop_,
                };
                self.emit_jump(loop_);
                self.set_curr_block(loop_);
                if loop_ != body_block {
                    self.build_cond(cond.expect("loop block implies a condition"), body_block, done)?;
                    self.set_curr_block(body_block);
                }

                self.proc_mut().push_target_list(Some(done), Some(cont), None);
                self.open_scope();
                self.build_stmt(body)?;
                self.close_scope(DeferExitKind::Default, None)?;
                self.proc_mut().pop_target_list();
                self.emit_jump(cont);

                if let Some(post) = post {
                    self.set_curr_block(cont);
                    self.build_stmt(post)?;
                    self.emit_jump(loop_);
                }
                self.set_curr_block(done);
                Ok(())
            }

            NodeKind::Match { init, tag, body } => self.build_match(node, init, tag, body),

            NodeKind::TypeMatch { tag, var, body } => {
                self.build_type_match(node, tag, var, body)
            }

            NodeKind::Branch { kind } => {
                let block = match kind {
                    lyre_front::BranchKind::Break => self.proc().break_target(),
                    lyre_front::BranchKind::Continue => self.proc().continue_target(),
                    lyre_front::BranchKind::Fallthrough => self.proc().fallthrough_target(),
                };
                let block = block.ok_or(SsaError::MissingBranchTarget { pos })?;
                self.emit_defer_stmts(DeferExitKind::Branch, Some(block))?;
                match kind {
                    lyre_front::BranchKind::Break => self.emit_comment("break"),
                    lyre_front::BranchKind::Continue => self.emit_comment("continue"),
                    lyre_front::BranchKind::Fallthrough => self.emit_comment("fallthrough"),
                };
                self.emit_jump(block);
                self.emit_unreachable();
                Ok(())
            }

            NodeKind::PushAllocator { expr, body } => {
                self.emit_comment("push allocator");
                self.open_scope();
                let context_ptr = self.module.member(CONTEXT_NAME)?;
                let ctx_ty = self.module.info.types.deref(self.value_ty(context_ptr));
                let prev_context = self.add_local_generated(ctx_ty);
                let current = self.emit_load(context_ptr);
                self.emit_store(prev_context, current);

                let restored = self.emit_load(prev_context);
                let template = self.make_instr(crate::instruction::InstrKind::Store {
                    addr: context_ptr,
                    value: restored,
                });
                let scope_index = self.proc().scope_index;
                self.add_defer_instr(scope_index, template);

                // Patch the allocator field of the context in place.
                let allocator_ty = {
                    let tys = &self.module.info.types;
                    match tys.kind(tys.base(ctx_ty)) {
                        TypeKind::Record { fields, .. } => fields[1].ty,
                        other => panic!("context is not a record: {:?}", other),
                    }
                };
                let allocator_ptr = self.module.info.types.ptr_to(allocator_ty);
                let gep = self.emit_struct_gep_i(context_ptr, 1, allocator_ptr);
                let value = self.build_expr(expr)?;
                self.emit_store(gep, value);

                self.build_stmt(body)?;
                self.close_scope(DeferExitKind::Default, None)
            }

            NodeKind::PushContext { expr, body } => {
                self.emit_comment("push context");
                self.open_scope();
                let context_ptr = self.module.member(CONTEXT_NAME)?;
                let ctx_ty = self.module.info.types.deref(self.value_ty(context_ptr));
                let prev_context = self.add_local_generated(ctx_ty);
                let current = self.emit_load(context_ptr);
                self.emit_store(prev_context, current);

                let restored = self.emit_load(prev_context);
                let template = self.make_instr(crate::instruction::InstrKind::Store {
                    addr: context_ptr,
                    value: restored,
                });
                let scope_index = self.proc().scope_index;
                self.add_defer_instr(scope_index, template);

                let value = self.build_expr(expr)?;
                self.emit_store(context_ptr, value);

                self.build_stmt(body)?;
                self.close_scope(DeferExitKind::Default, None)
            }

            _ => Err(SsaError::UnexpectedNode { what: "statement", pos }),
        }
    }

    // ---- declarations ----------------------------------------------------

    fn build_var_decl(&mut self, names: &[NodeId], values: &[NodeId]) -> SsaResult<()> {
        if values.is_empty() {
            // Declared and zero-initialized.
            for &name in names {
                if !self.module.info.ast.is_blank_ident(name) {
                    self.add_local_for_identifier(name, true);
                }
            }
            return Ok(());
        }

        let mut lvals = Vec::with_capacity(names.len());
        for &name in names {
            let lval = if self.module.info.ast.is_blank_ident(name) {
                LValue::empty()
            } else {
                self.add_local_for_identifier(name, false);
                self.build_addr(name)?
            };
            lvals.push(lval);
        }

        let inits = self.flatten_rhs_values(values)?;

        for (lval, init) in lvals.iter().zip(inits) {
            let v = match self.addr_type(lval) {
                Some(ty) => self.emit_conv(init, ty)?,
                None => init,
            };
            self.lvalue_store(lval, v)?;
        }
        Ok(())
    }

    fn build_proc_decl(
        &mut self,
        name: NodeId,
        body: Option<NodeId>,
        tags: ProcTags,
        link_name: Option<String>,
        foreign_name: Option<String>,
        pos: lyre_common::Pos,
    ) -> SsaResult<()> {
        let original_name = self
            .module
            .info
            .ast
            .ident_name(name)
            .unwrap_or_default()
            .to_string();
        let entity = self
            .module
            .info
            .entity_of_def(name)
            .ok_or(SsaError::UnknownValue { name: original_name.clone(), pos })?;
        let ty = self.module.info.entities.ty(entity);

        if let Some(body) = body {
            // parent.name-guid
            let pd_name = link_name.unwrap_or(original_name);
            let guid = self.proc().children.len();
            let mangled = format!("{}.{}-{}", self.proc().name, pd_name, guid);

            let mut proc = crate::procedure::Procedure::new(Some(entity), ty, Some(body), mangled);
            proc.tags = tags;
            proc.parent = Some(self.proc_id);
            let pid = crate::procedure::ProcId(self.module.proc_pool.len() as u32);
            self.module.proc_pool.push(proc);
            let value = self.module.add_value(ValueKind::Proc { proc: pid });

            self.module.values.insert(entity, value);
            self.proc_mut().children.push(value);
            self.module.procs.push(value);
        } else {
            // Foreign procedures register under their external name.
            let ext_name = foreign_name.unwrap_or(original_name);
            let mut proc =
                crate::procedure::Procedure::new(Some(entity), ty, None, ext_name.clone());
            proc.tags = tags;
            proc.parent = Some(self.proc_id);
            let pid = crate::procedure::ProcId(self.module.proc_pool.len() as u32);
            self.module.proc_pool.push(proc);
            let value = self.module.add_value(ValueKind::Proc { proc: pid });

            self.module.values.insert(entity, value);
            crate::builder::build_proc(self.module, value)?;

            if tags.contains(ProcTags::FOREIGN) {
                // A foreign symbol is declared once, no matter how many
                // scopes re-import it.
                if !self.module.members.contains_key(&ext_name) {
                    self.module.members.insert(ext_name, value);
                }
            } else {
                self.proc_mut().children.push(value);
            }
        }
        Ok(())
    }

    // ---- assignment ------------------------------------------------------

    fn build_plain_assign(&mut self, lhs: &[NodeId], rhs: &[NodeId]) -> SsaResult<()> {
        let mut lvals = Vec::with_capacity(lhs.len());
        for &l in lhs {
            let lval = if self.module.info.ast.is_blank_ident(l) {
                LValue::empty()
            } else {
                self.build_addr(l)?
            };
            lvals.push(lval);
        }

        if lhs.len() == rhs.len() {
            if lhs.len() == 1 {
                let init = self.build_expr(rhs[0])?;
                self.lvalue_store(&lvals[0], init)?;
            } else {
                let mut inits = Vec::with_capacity(lvals.len());
                for &r in rhs {
                    inits.push(self.build_expr(r)?);
                }
                for (lval, init) in lvals.iter().zip(inits) {
                    self.lvalue_store(lval, init)?;
                }
            }
        } else {
            let inits = self.flatten_rhs_values(rhs)?;
            for (lval, init) in lvals.iter().zip(inits) {
                self.lvalue_store(lval, init)?;
            }
        }
        Ok(())
    }

    /// Evaluate right-hand sides, splitting tuple-typed results positionally.
    fn flatten_rhs_values(&mut self, values: &[NodeId]) -> SsaResult<Vec<crate::value::ValueId>> {
        let mut inits = Vec::with_capacity(values.len());
        for &value in values {
            let init = self.build_expr(value)?;
            let t = self.module.info.types.base(self.value_ty(init));
            if let TypeKind::Tuple { fields } = self.module.info.types.kind(t).clone() {
                for (i, f) in fields.iter().enumerate() {
                    let v = self.emit_struct_ev(init, i as i32, f.ty);
                    inits.push(v);
                }
            } else {
                inits.push(init);
            }
        }
        Ok(inits)
    }

    pub fn build_assign_op(
        &mut self,
        lhs: &LValue,
        value: crate::value::ValueId,
        op: BinOp,
    ) -> SsaResult<()> {
        let old_value = self.lvalue_load(lhs)?;
        let ty = self.value_ty(old_value);

        let value_ty = self.value_ty(value);
        let change = if self.module.info.types.is_pointer(ty)
            && self.module.info.types.is_integer(value_ty)
        {
            value
        } else {
            self.emit_conv(value, ty)?
        };
        let new_value = self.emit_arith(op, old_value, change, ty)?;
        self.lvalue_store(lhs, new_value)?;
        Ok(())
    }

    // ---- return ----------------------------------------------------------

    fn build_return(&mut self, results: &[NodeId]) -> SsaResult<()> {
        self.emit_comment("return statement");
        let sig = self.proc().ty;
        let ret_tuple = {
            let tys = &self.module.info.types;
            match tys.kind(tys.base(sig)) {
                TypeKind::Proc { results, .. } => *results,
                other => panic!("return outside a procedure type: {:?}", other),
            }
        };
        let field_tys: Vec<lyre_front::TypeId> = match ret_tuple {
            Some(t) => self.module.info.types.tuple_fields(t).iter().map(|f| f.ty).collect(),
            None => Vec::new(),
        };

        let v = match field_tys.len() {
            0 => None,
            1 => {
                let e = self.build_expr(results[0])?;
                Some(self.emit_conv(e, field_tys[0])?)
            }
            _ => {
                let flattened = self.flatten_rhs_values(results)?;

                let ret_type = ret_tuple.expect("multi-result signature has a tuple");
                let tuple_local = self.add_local_generated(ret_type);
                for (i, res) in flattened.into_iter().enumerate() {
                    let fty = field_tys[i];
                    let res = self.emit_conv(res, fty)?;
                    let fty_ptr = self.module.info.types.ptr_to(fty);
                    let field = self.emit_struct_gep_i(tuple_local, i as i32, fty_ptr);
                    self.emit_store(field, res);
                }
                Some(self.emit_load(tuple_local))
            }
        };
        self.emit_ret(v)
    }

    // ---- match -----------------------------------------------------------

    fn build_match(
        &mut self,
        node: NodeId,
        init: Option<NodeId>,
        tag: Option<NodeId>,
        body: NodeId,
    ) -> SsaResult<()> {
        self.emit_comment("match statement");
        if let Some(init) = init {
            self.build_stmt(init)?;
        }
        let tag_value = match tag {
            Some(tag) => self.build_expr(tag)?,
            None => self.module.const_bool(true),
        };
        let done = self.add_block(Some(node), "match.done");

        let clauses = match self.module.info.ast.kind(body).clone() {
            NodeKind::Block { stmts } => stmts,
            _ => {
                return Err(SsaError::UnexpectedNode {
                    what: "match body",
                    pos: self.module.info.ast.pos(body),
                })
            }
        };

        let mut default_stmts: Vec<NodeId> = Vec::new();
        let mut default_fall = None;
        let mut default_block = None;

        let mut fall: Option<crate::block::BlockId> = None;
        let mut append_fall = false;

        let case_count = clauses.len();
        for (i, &clause) in clauses.iter().enumerate() {
            let mut body_block = fall;

            let (list, stmts) = match self.module.info.ast.kind(clause).clone() {
                NodeKind::CaseClause { list, stmts } => (list, stmts),
                _ => {
                    return Err(SsaError::UnexpectedNode {
                        what: "case clause",
                        pos: self.module.info.ast.pos(clause),
                    })
                }
            };

            if body_block.is_none() {
                let label = if list.is_empty() { "match.dflt.body" } else { "match.case.body" };
                body_block = Some(self.add_block(Some(clause), label));
            }
            if append_fall && body_block == fall {
                append_fall = false;
            }

            fall = Some(done);
            if i + 1 < case_count {
                append_fall = true;
                fall = Some(self.add_block(Some(clause), "match.fall.body"));
            }
            let body_block = body_block.expect("case body block exists");

            if list.is_empty() {
                default_stmts = stmts;
                default_fall = fall;
                default_block = Some(body_block);
                continue;
            }

            let mut next_cond = None;
            for &expr in &list {
                let nc = self.add_block(Some(clause), "match.case.next");
                let case_value = self.build_expr(expr)?;
                let cond = self.emit_comp(BinOp::CmpEq, tag_value, case_value)?;
                self.emit_if(cond, body_block, nc);
                self.set_curr_block(nc);
                next_cond = Some(nc);
            }
            self.set_curr_block(body_block);

            self.proc_mut().push_target_list(Some(done), None, fall);
            self.open_scope();
            self.build_stmt_list(&stmts)?;
            self.close_scope(DeferExitKind::Default, Some(body_block))?;
            self.proc_mut().pop_target_list();

            self.emit_jump(done);
            if let Some(nc) = next_cond {
                self.set_curr_block(nc);
            }
        }

        if let Some(default_block) = default_block {
            self.emit_jump(default_block);
            self.set_curr_block(default_block);

            self.proc_mut().push_target_list(Some(done), None, default_fall);
            self.open_scope();
            self.build_stmt_list(&default_stmts)?;
            self.close_scope(DeferExitKind::Default, Some(default_block))?;
            self.proc_mut().pop_target_list();
        }

        self.emit_jump(done);
        self.set_curr_block(done);
        Ok(())
    }

    // ---- type match ------------------------------------------------------

    fn build_type_match(
        &mut self,
        node: NodeId,
        tag: NodeId,
        var: NodeId,
        body: NodeId,
    ) -> SsaResult<()> {
        self.emit_comment("type match statement");
        let pos = self.module.info.ast.pos(node);

        let parent = self.build_expr(tag)?;
        let union_type = self.module.info.types.deref(self.value_ty(parent));
        assert!(
            self.module.info.types.is_union(union_type),
            "type match over non-union type {}",
            self.module.info.types.display(union_type)
        );

        self.emit_comment("get union tag");
        let int = self.module.t_int;
        let int_ptr = self.module.info.types.ptr_to(int);
        let tag_index_addr = self.emit_struct_gep_i(parent, 1, int_ptr);
        let tag_index = self.emit_load(tag_index_addr);

        let rawptr = self.module.t_rawptr;
        let data = self.emit_conv(parent, rawptr)?;

        let start_block = self.add_block(Some(node), "type-match.case.first");
        self.emit_jump(start_block);
        self.set_curr_block(start_block);

        let done = self.add_block(Some(node), "type-match.done");

        let clauses = match self.module.info.ast.kind(body).clone() {
            NodeKind::Block { stmts } => stmts,
            _ => {
                return Err(SsaError::UnexpectedNode {
                    what: "type match body",
                    pos: self.module.info.ast.pos(body),
                })
            }
        };

        let tag_var_name = self
            .module
            .info
            .ast
            .ident_name(var)
            .unwrap_or_default()
            .to_string();

        let union_fields = {
            let tys = &self.module.info.types;
            match tys.kind(tys.base(union_type)) {
                TypeKind::Record { fields, .. } => fields.clone(),
                _ => unreachable!("union type checked above"),
            }
        };

        let mut default_stmts: Vec<NodeId> = Vec::new();
        let mut default_block = None;

        for &clause in &clauses {
            let (list, stmts) = match self.module.info.ast.kind(clause).clone() {
                NodeKind::CaseClause { list, stmts } => (list, stmts),
                _ => {
                    return Err(SsaError::UnexpectedNode {
                        what: "case clause",
                        pos: self.module.info.ast.pos(clause),
                    })
                }
            };

            if list.is_empty() {
                default_stmts = stmts;
                default_block = Some(self.add_block(Some(clause), "type-match.dflt.body"));
                continue;
            }

            let body_block = self.add_block(Some(clause), "type-match.case.body");

            let scope = self
                .module
                .info
                .scope_of(clause)
                .ok_or(SsaError::MissingNodeInfo { pos })?;
            let tag_var_entity = self
                .module
                .info
                .scope(scope)
                .lookup(&tag_var_name)
                .ok_or(SsaError::UnknownValue { name: tag_var_name.clone(), pos })?;

            let tag_var = self.add_local(tag_var_entity, true);
            let var_ty = self.module.info.entities.ty(tag_var_entity);
            let data_ptr = self.emit_conv(data, var_ty)?;
            self.emit_store(tag_var, data_ptr);

            // The expected tag is the variant's position in the union's
            // field list; the zeroth entry is the nil sentinel.
            let bt = self.module.info.types.deref(var_ty);
            let mut index = None;
            for (field_index, f) in union_fields.iter().enumerate().skip(1) {
                if f.ty == bt {
                    index = Some(self.module.const_int(field_index as i64));
                    break;
                }
            }
            let index = index.ok_or(SsaError::UnexpectedNode {
                what: "type match case over a non-variant type",
                pos: self.module.info.ast.pos(clause),
            })?;

            let next_cond = self.add_block(Some(clause), "type-match.case.next");
            let cond = self.emit_comp(BinOp::CmpEq, tag_index, index)?;
            self.emit_if(cond, body_block, next_cond);
            self.set_curr_block(body_block);

            self.proc_mut().push_target_list(Some(done), None, None);
            self.open_scope();
            self.build_stmt_list(&stmts)?;
            self.close_scope(DeferExitKind::Default, Some(body_block))?;
            self.proc_mut().pop_target_list();

            self.emit_jump(done);
            self.set_curr_block(next_cond);
        }

        if let Some(default_block) = default_block {
            self.emit_jump(default_block);
            self.set_curr_block(default_block);

            self.proc_mut().push_target_list(Some(done), None, None);
            self.open_scope();
            self.build_stmt_list(&default_stmts)?;
            self.close_scope(DeferExitKind::Default, Some(default_block))?;
            self.proc_mut().pop_target_list();
        }

        self.emit_jump(done);
        self.set_curr_block(done);
        Ok(())
    }
}
