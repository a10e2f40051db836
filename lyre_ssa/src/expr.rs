//! Expression and address lowering.
//!
//! Two mutually recursive entry points: [`ProcBuilder::build_expr`] produces
//! an operand value, [`ProcBuilder::build_addr`] produces the storage form of
//! an expression. Constants short-circuit through the checker's exact values.

use lyre_common::Pos;
use lyre_front::{
    AddressingMode, BinOp, BuiltinId, CastKind, EntityId, EntityKind, ExactValue, NodeId, NodeKind,
    TypeId, TypeKind, UnaryOp,
};
use smallvec::{smallvec, SmallVec};

use crate::builder::ProcBuilder;
use crate::error::{SsaError, SsaResult};
use crate::instruction::{ConvKind, InstrKind};
use crate::module::StmtStateFlags;
use crate::value::{ValueId, ValueKind};
use crate::{CONTEXT_NAME, TYPE_INFO_DATA_NAME};

/// The address form of an expression: a pointer to storage, or a
/// `(vector, lane)` pair that must round-trip through element instructions.
#[derive(Debug, Clone, Copy)]
pub struct LValue {
    pub addr: Option<ValueId>,
    pub node: Option<NodeId>,
    pub vector_index: Option<ValueId>,
}

impl LValue {
    pub fn empty() -> Self {
        LValue { addr: None, node: None, vector_index: None }
    }

    pub fn at(addr: ValueId, node: NodeId) -> Self {
        LValue { addr: Some(addr), node: Some(node), vector_index: None }
    }

    pub fn vector(addr: ValueId, index: ValueId, node: NodeId) -> Self {
        LValue { addr: Some(addr), node: Some(node), vector_index: Some(index) }
    }
}

impl<'m> ProcBuilder<'m> {
    fn deref_if_ptr(&self, ty: TypeId) -> TypeId {
        let tys = &self.module.info.types;
        if tys.is_pointer(ty) && !matches!(tys.kind(tys.base(ty)), TypeKind::Basic(_)) {
            tys.deref(ty)
        } else {
            ty
        }
    }

    pub fn addr_type(&self, lval: &LValue) -> Option<TypeId> {
        let addr = lval.addr?;
        let ty = self.value_ty(addr);
        Some(self.module.info.types.deref(ty))
    }

    // ---- lvalues ---------------------------------------------------------

    pub fn lvalue_store(&mut self, lval: &LValue, value: ValueId) -> SsaResult<Option<ValueId>> {
        let Some(addr) = lval.addr else { return Ok(None) };
        if let Some(index) = lval.vector_index {
            let v = self.emit_load(addr);
            let vt = self.module.info.types.base(self.value_ty(v));
            let elem_ty = match self.module.info.types.kind(vt) {
                TypeKind::Vector { elem, .. } => *elem,
                other => panic!("vector lvalue over non-vector type {:?}", other),
            };
            let elem = self.emit_conv(value, elem_ty)?;
            let out = self.make_instr(InstrKind::InsertElement { vector: v, elem, index });
            let out = self.emit(out);
            return Ok(Some(self.emit_store(addr, out)));
        }
        let dst = self.addr_type(lval).expect("lvalue with address");
        let v = self.emit_conv(value, dst)?;
        Ok(Some(self.emit_store(addr, v)))
    }

    pub fn lvalue_load(&mut self, lval: &LValue) -> SsaResult<ValueId> {
        let Some(addr) = lval.addr else { return Err(SsaError::IllegalLValueLoad) };
        if let Some(index) = lval.vector_index {
            let v = self.emit_load(addr);
            let out = self.make_instr(InstrKind::ExtractElement { vector: v, index });
            return Ok(self.emit(out));
        }
        // Procedure values are already pointers; no load is needed.
        let t = self.module.info.types.base(self.value_ty(addr));
        if matches!(self.module.info.types.kind(t), TypeKind::Proc { .. }) {
            return Ok(addr);
        }
        Ok(self.emit_load(addr))
    }

    // ---- aggregate access ------------------------------------------------

    pub fn emit_ptr_offset(&mut self, ptr: ValueId, offset: ValueId) -> SsaResult<ValueId> {
        let int = self.module.t_int;
        let offset = self.emit_conv(offset, int)?;
        let result_ty = self.value_ty(ptr);
        let gep = self.make_get_element_ptr(ptr, smallvec![offset], false, result_ty);
        Ok(self.emit(gep))
    }

    /// A copy of a pointer: a GEP with no indices.
    pub fn emit_zero_gep(&mut self, s: ValueId) -> ValueId {
        let result_ty = self.value_ty(s);
        let gep = self.make_get_element_ptr(s, SmallVec::new(), true, result_ty);
        self.emit(gep)
    }

    /// Structure field address. The leading zero index and the 32-bit field
    /// index follow the usual machine-IR convention.
    pub fn emit_struct_gep(
        &mut self,
        s: ValueId,
        index: ValueId,
        result_ty: TypeId,
    ) -> SsaResult<ValueId> {
        let i32t = self.module.t_i32;
        let index = self.emit_conv(index, i32t)?;
        let zero = self.module.const_int(0);
        let gep = self.make_get_element_ptr(s, smallvec![zero, index], true, result_ty);
        Ok(self.emit(gep))
    }

    pub fn emit_struct_gep_i(&mut self, s: ValueId, index: i32, result_ty: TypeId) -> ValueId {
        let i = self.module.const_i32(index as i64);
        self.emit_struct_gep(s, i, result_ty)
            .expect("i32 constant index always converts")
    }

    pub fn emit_struct_ev(&mut self, s: ValueId, index: i32, result_ty: TypeId) -> ValueId {
        let v = self.make_extract_value(s, index, result_ty);
        self.emit(v)
    }

    /// Walk a selection path in address form, loading through pointer hops.
    pub fn emit_deep_field_gep(
        &mut self,
        ty: TypeId,
        e: ValueId,
        path: &[usize],
        final_ty: TypeId,
    ) -> SsaResult<ValueId> {
        assert!(!path.is_empty());
        let mut ty = ty;
        let mut e = e;
        for &index in path {
            if self.module.info.types.is_pointer(ty) {
                ty = self.module.info.types.deref(ty);
                e = self.emit_load(e);
                let zero = self.module.const_int(0);
                e = self.emit_ptr_offset(e, zero)?;
            }
            ty = self.module.info.types.base(ty);

            match self.module.info.types.kind(ty).clone() {
                TypeKind::Record { kind: lyre_front::RecordKind::RawUnion, fields } => {
                    ty = fields[index].ty;
                    let ptr = self.module.info.types.ptr_to(ty);
                    e = self.emit_conv(e, ptr)?;
                }
                TypeKind::Record { fields, .. } => {
                    ty = fields[index].ty;
                    let ptr = self.module.info.types.ptr_to(ty);
                    e = self.emit_struct_gep_i(e, index as i32, ptr);
                }
                TypeKind::Basic(lyre_front::BasicKind::Any) => {
                    let ti_ptr = {
                        let ti = self.module.info.runtime.type_info;
                        self.module.info.types.ptr_to(ti)
                    };
                    ty = if index == 0 { ti_ptr } else { self.module.t_rawptr };
                    let ptr = self.module.info.types.ptr_to(ty);
                    e = self.emit_struct_gep_i(e, index as i32, ptr);
                }
                TypeKind::Basic(lyre_front::BasicKind::Str) => {
                    let ptr = self.module.info.types.ptr_to(final_ty);
                    e = self.emit_struct_gep_i(e, index as i32, ptr);
                }
                TypeKind::Slice { .. } => {
                    let ptr = self.module.info.types.ptr_to(final_ty);
                    e = self.emit_struct_gep_i(e, index as i32, ptr);
                }
                _ => {
                    return Err(SsaError::UnGepable { ty: self.module.info.types.display(ty) })
                }
            }
        }
        Ok(e)
    }

    /// Walk a selection path in value form.
    pub fn emit_deep_field_ev(
        &mut self,
        ty: TypeId,
        e: ValueId,
        path: &[usize],
        final_ty: TypeId,
    ) -> SsaResult<ValueId> {
        assert!(!path.is_empty());
        let mut ty = ty;
        let mut e = e;
        for &index in path {
            if self.module.info.types.is_pointer(ty) {
                ty = self.module.info.types.deref(ty);
                e = self.emit_load(e);
                let zero = self.module.const_int(0);
                e = self.emit_ptr_offset(e, zero)?;
            }
            ty = self.module.info.types.base(ty);

            match self.module.info.types.kind(ty).clone() {
                TypeKind::Record { kind: lyre_front::RecordKind::RawUnion, fields } => {
                    ty = fields[index].ty;
                    let ptr = self.module.info.types.ptr_to(ty);
                    e = self.emit_conv(e, ptr)?;
                }
                TypeKind::Record { fields, .. } => {
                    ty = fields[index].ty;
                    e = self.emit_struct_ev(e, index as i32, ty);
                }
                TypeKind::Basic(lyre_front::BasicKind::Any) => {
                    let ti_ptr = {
                        let ti = self.module.info.runtime.type_info;
                        self.module.info.types.ptr_to(ti)
                    };
                    ty = if index == 0 { ti_ptr } else { self.module.t_rawptr };
                    e = self.emit_struct_ev(e, index as i32, ty);
                }
                TypeKind::Basic(lyre_front::BasicKind::Str) => {
                    e = self.emit_struct_ev(e, index as i32, final_ty);
                }
                TypeKind::Slice { elem } => {
                    let field_ty = if index == 0 {
                        self.module.info.types.ptr_to(elem)
                    } else {
                        self.module.t_int
                    };
                    ty = field_ty;
                    e = self.emit_struct_ev(e, index as i32, field_ty);
                }
                _ => {
                    return Err(SsaError::UnGepable { ty: self.module.info.types.display(ty) })
                }
            }
        }
        Ok(e)
    }

    // ---- arrays, slices, strings -----------------------------------------

    /// Address of the first element of a pointed-to array.
    pub fn array_elem(&mut self, array: ValueId) -> SsaResult<ValueId> {
        let t = self.module.info.types.deref(self.value_ty(array));
        let elem = match self.module.info.types.kind(self.module.info.types.base(t)) {
            TypeKind::Array { elem, .. } => *elem,
            other => panic!("array element of non-array type {:?}", other),
        };
        let result = self.module.info.types.ptr_to(elem);
        let zero = self.module.const_i32(0);
        self.emit_struct_gep(array, zero, result)
    }

    pub fn array_len(&mut self, array: ValueId) -> ValueId {
        let ty = self.deref_if_ptr(self.value_ty(array));
        let count = match self.module.info.types.kind(self.module.info.types.base(ty)) {
            TypeKind::Array { count, .. } => *count,
            other => panic!("array length of non-array type {:?}", other),
        };
        self.module.const_int(count)
    }

    pub fn array_cap(&mut self, array: ValueId) -> ValueId {
        self.array_len(array)
    }

    pub fn slice_elem(&mut self, slice: ValueId) -> ValueId {
        let t = self.value_ty(slice);
        let elem = match self.module.info.types.kind(self.module.info.types.base(t)) {
            TypeKind::Slice { elem } => *elem,
            other => panic!("slice element of non-slice type {:?}", other),
        };
        let result = self.module.info.types.ptr_to(elem);
        self.emit_struct_ev(slice, 0, result)
    }

    pub fn slice_len(&mut self, slice: ValueId) -> ValueId {
        let int = self.module.t_int;
        self.emit_struct_ev(slice, 1, int)
    }

    pub fn slice_cap(&mut self, slice: ValueId) -> ValueId {
        let int = self.module.t_int;
        self.emit_struct_ev(slice, 2, int)
    }

    pub fn string_elem(&mut self, string: ValueId) -> ValueId {
        let u8p = {
            let u8t = self.module.t_u8;
            self.module.info.types.ptr_to(u8t)
        };
        self.emit_struct_ev(string, 0, u8p)
    }

    pub fn string_len(&mut self, string: ValueId) -> ValueId {
        let int = self.module.t_int;
        self.emit_struct_ev(string, 1, int)
    }

    /// Build a slice header local over `base[low .. high : max]`.
    pub fn add_local_slice(
        &mut self,
        slice_type: TypeId,
        base: ValueId,
        low: Option<ValueId>,
        high: Option<ValueId>,
        max: Option<ValueId>,
    ) -> SsaResult<ValueId> {
        let bt = self.module.info.types.base(self.value_ty(base));
        let bt_kind = self.module.info.types.kind(bt).clone();

        let low = match low {
            Some(v) => v,
            None => self.module.const_int(0),
        };
        let high = match high {
            Some(v) => v,
            None => match bt_kind {
                TypeKind::Array { .. } => self.array_len(base),
                TypeKind::Slice { .. } => self.slice_len(base),
                _ => self.module.const_int(1),
            },
        };
        let max = match max {
            Some(v) => v,
            None => match bt_kind {
                TypeKind::Array { .. } => self.array_cap(base),
                TypeKind::Slice { .. } => self.slice_cap(base),
                _ => high,
            },
        };

        let int = self.module.t_int;
        let len = self.emit_arith(BinOp::Sub, high, low, int)?;
        let cap = self.emit_arith(BinOp::Sub, max, low, int)?;

        let elem = match bt_kind {
            TypeKind::Array { .. } => self.array_elem(base)?,
            TypeKind::Slice { .. } => self.slice_elem(base),
            _ => self.emit_load(base),
        };
        let elem = self.emit_ptr_offset(elem, low)?;

        let slice = self.add_local_generated(slice_type);
        let elem_ty = self.value_ty(elem);
        let gep = self.emit_struct_gep_i(slice, 0, elem_ty);
        self.emit_store(gep, elem);
        let gep = self.emit_struct_gep_i(slice, 1, int);
        self.emit_store(gep, len);
        let gep = self.emit_struct_gep_i(slice, 2, int);
        self.emit_store(gep, cap);
        Ok(slice)
    }

    /// Materialize a string header from an element pointer and a length.
    pub fn emit_string(&mut self, elem: ValueId, len: ValueId) -> ValueId {
        let elem_ty = self.value_ty(elem);
        let string_ty = self.module.t_string;
        let int = self.module.t_int;
        let s = self.add_local_generated(string_ty);
        let str_elem = self.emit_struct_gep_i(s, 0, elem_ty);
        let str_len = self.emit_struct_gep_i(s, 1, int);
        self.emit_store(str_elem, elem);
        self.emit_store(str_len, len);
        self.emit_load(s)
    }

    pub fn emit_global_string(&mut self, s: &str) -> SsaResult<ValueId> {
        let global = self.module.add_global_string_array(s);
        let elem = self.array_elem(global)?;
        let len = self.module.const_int(s.len() as i64);
        Ok(self.emit_string(elem, len))
    }

    // ---- type info -------------------------------------------------------

    pub fn type_info(&mut self, ty: TypeId) -> SsaResult<ValueId> {
        let data = self.module.member(TYPE_INFO_DATA_NAME)?;
        let index = self.module.type_info_index(ty)?;
        let ti_ptr = {
            let ti = self.module.info.runtime.type_info;
            self.module.info.types.ptr_to(ti)
        };
        Ok(self.emit_struct_gep_i(data, index as i32, ti_ptr))
    }

    // ---- bounds checks ---------------------------------------------------

    fn pos_args(&mut self, pos: Pos) -> SsaResult<SmallVec<[ValueId; 3]>> {
        let path = self.module.info.file_path(pos.file).to_string();
        let file = self.emit_global_string(&path)?;
        let line = self.module.const_int(pos.line as i64);
        let column = self.module.const_int(pos.column as i64);
        Ok(smallvec![file, line, column])
    }

    pub fn array_bounds_check(
        &mut self,
        pos: Pos,
        index: ValueId,
        len: ValueId,
    ) -> SsaResult<()> {
        if self.module.stmt_state_flags.contains(StmtStateFlags::NO_BOUNDS_CHECK) {
            return Ok(());
        }
        let mut args: Vec<ValueId> = self.pos_args(pos)?.into_vec();
        let int = self.module.t_int;
        args.push(self.emit_conv(index, int)?);
        args.push(self.emit_conv(len, int)?);
        self.emit_runtime_call("__bounds_check_error", args)?;
        Ok(())
    }

    pub fn slice_bounds_check(
        &mut self,
        pos: Pos,
        low: ValueId,
        high: ValueId,
        max: ValueId,
        is_substring: bool,
    ) -> SsaResult<()> {
        if self.module.stmt_state_flags.contains(StmtStateFlags::NO_BOUNDS_CHECK) {
            return Ok(());
        }
        let mut args: Vec<ValueId> = self.pos_args(pos)?.into_vec();
        let int = self.module.t_int;
        args.push(self.emit_conv(low, int)?);
        args.push(self.emit_conv(high, int)?);
        args.push(self.emit_conv(max, int)?);
        let name = if is_substring { "__substring_expr_error" } else { "__slice_expr_error" };
        self.emit_runtime_call(name, args)?;
        Ok(())
    }

    // ---- arithmetic ------------------------------------------------------

    pub fn emit_arith(
        &mut self,
        op: BinOp,
        mut left: ValueId,
        mut right: ValueId,
        ty: TypeId,
    ) -> SsaResult<ValueId> {
        let tys = &self.module.info.types;
        let t_left = self.value_ty(left);
        let t_right = self.value_ty(right);

        if op == BinOp::Add {
            if tys.is_pointer(t_left) {
                let ptr = self.emit_conv(left, ty)?;
                return self.emit_ptr_offset(ptr, right);
            } else if tys.is_pointer(t_right) {
                let ptr = self.emit_conv(right, ty)?;
                return self.emit_ptr_offset(ptr, left);
            }
        } else if op == BinOp::Sub {
            if tys.is_pointer(t_left) && tys.is_integer(t_right) {
                let ptr = self.emit_conv(left, ty)?;
                let int = self.module.t_int;
                let zero = self.module.const_int(0);
                let offset = self.emit_arith(BinOp::Sub, zero, right, int)?;
                return self.emit_ptr_offset(ptr, offset);
            } else if tys.is_pointer(t_left) && tys.is_pointer(t_right) {
                assert!(self.module.info.types.is_integer(ty));
                let elem = self.deref_if_ptr(t_left);
                let elem_size = self.module.info.types.size_of(elem);
                let x = self.emit_conv(left, ty)?;
                let y = self.emit_conv(right, ty)?;
                let diff = self.emit_arith(BinOp::Sub, x, y, ty)?;
                let size = self.module.const_int(elem_size);
                return self.emit_arith(BinOp::Div, diff, size, ty);
            }
        }

        let mut op = op;
        if op == BinOp::AndNot {
            // x &~ y  ==  x & (y xor -1)
            let neg = self.module.add_module_constant(ty, ExactValue::Integer(-1))?;
            right = self.emit_arith(BinOp::Xor, right, neg, ty)?;
            op = BinOp::And;
        }
        match op {
            BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::Div
            | BinOp::Mod
            | BinOp::And
            | BinOp::Or
            | BinOp::Xor => {
                left = self.emit_conv(left, ty)?;
                right = self.emit_conv(right, ty)?;
            }
            _ => {}
        }

        let v = self.make_instr(InstrKind::BinaryOp { op, left, right, ty });
        Ok(self.emit(v))
    }

    pub fn emit_comp(&mut self, op: BinOp, left: ValueId, right: ValueId) -> SsaResult<ValueId> {
        let mut left = left;
        let mut right = right;
        let a = self.module.info.types.base(self.value_ty(left));
        let b = self.module.info.types.base(self.value_ty(right));

        if a != b {
            let left_is_const = matches!(
                self.module.value(left).kind,
                ValueKind::Constant { .. } | ValueKind::Nil { .. }
            );
            let right_is_const = matches!(
                self.module.value(right).kind,
                ValueKind::Constant { .. } | ValueKind::Nil { .. }
            );
            if left_is_const {
                let ty = self.value_ty(right);
                left = self.emit_conv(left, ty)?;
            } else if right_is_const {
                let ty = self.value_ty(left);
                right = self.emit_conv(right, ty)?;
            }
        }

        let result = match self.module.info.types.kind(a).clone() {
            TypeKind::Vector { count, .. } => {
                let bool_ = self.module.t_bool;
                self.module.info.types.vector_of(bool_, count)
            }
            _ => self.module.t_bool,
        };
        let v = self.make_instr(InstrKind::BinaryOp { op, left, right, ty: result });
        Ok(self.emit(v))
    }

    // ---- conversions -----------------------------------------------------

    pub fn emit_conv(&mut self, value: ValueId, t: TypeId) -> SsaResult<ValueId> {
        let src_type = self.value_ty(value);
        if src_type == t {
            return Ok(value);
        }

        let src = {
            let tys = &self.module.info.types;
            tys.enum_base(src_type)
        };
        let dst = {
            let tys = &self.module.info.types;
            tys.enum_base(t)
        };

        if let ValueKind::Constant { value: ev, .. } = self.module.value(value).kind.clone() {
            if self.module.info.types.is_any(dst) {
                let spill = self.add_local_generated(src_type);
                self.emit_store(spill, value);
                let loaded = self.emit_load(spill);
                let any = self.module.t_any;
                return self.emit_conv(loaded, any);
            }
            if matches!(self.module.info.types.kind(dst), TypeKind::Basic(_)) {
                let tys = &self.module.info.types;
                let ev = if tys.is_float(dst) {
                    ev.to_float()
                } else if tys.is_string(dst) {
                    ev
                } else if tys.is_integer(dst) {
                    ev.to_integer()
                } else if tys.is_pointer(dst) {
                    // Pointer constants other than null round-trip through an
                    // integer.
                    let uint = self.module.t_uint;
                    let i = self.module.add_module_constant(uint, ev)?;
                    let conv = self.make_conv(ConvKind::Inttoptr, i, uint, dst);
                    return Ok(self.emit(conv));
                } else {
                    ev
                };
                return self.module.add_module_constant(t, ev);
            }
        }

        if src == dst {
            return Ok(value);
        }

        // maybe(T) destination: {value, present}
        if self.module.info.types.is_maybe(dst) {
            let elem = match self.module.info.types.kind(self.module.info.types.base(dst)) {
                TypeKind::Maybe { elem } => *elem,
                _ => unreachable!(),
            };
            let bool_ = self.module.t_bool;
            let elem_ptr = self.module.info.types.ptr_to(elem);
            let bool_ptr = self.module.info.types.ptr_to(bool_);
            let maybe = self.add_local_generated(dst);
            let val = self.emit_struct_gep_i(maybe, 0, elem_ptr);
            let set = self.emit_struct_gep_i(maybe, 1, bool_ptr);
            self.emit_store(val, value);
            let true_ = self.module.const_bool(true);
            self.emit_store(set, true_);
            return Ok(self.emit_load(maybe));
        }

        let tys = &self.module.info.types;
        let src_is_int = tys.is_integer(src);
        let dst_is_int = tys.is_integer(dst);
        let src_is_float = tys.is_float(src);
        let dst_is_float = tys.is_float(dst);
        let src_is_ptr = tys.is_pointer(src);
        let dst_is_ptr = tys.is_pointer(dst);
        let src_is_proc = tys.is_proc(src);
        let dst_is_proc = tys.is_proc(dst);

        // integer -> integer: all integers rely on two's complement, so
        // same-size conversions are free and widening is always zext.
        if src_is_int && dst_is_int {
            let sz = self.module.info.types.size_of(src);
            let dz = self.module.info.types.size_of(dst);
            if sz == dz {
                return Ok(value);
            }
            let kind = if dz >= sz { ConvKind::Zext } else { ConvKind::Trunc };
            let conv = self.make_conv(kind, value, src, dst);
            return Ok(self.emit(conv));
        }

        if self.module.info.types.is_boolean(src) && dst_is_int {
            let conv = self.make_conv(ConvKind::Zext, value, src, dst);
            return Ok(self.emit(conv));
        }

        if src_is_int && self.module.info.types.is_boolean(dst) {
            let zero = self.module.const_int(0);
            return self.emit_comp(BinOp::NotEq, value, zero);
        }

        if src_is_float && dst_is_float {
            let sz = self.module.info.types.size_of(src);
            let dz = self.module.info.types.size_of(dst);
            let kind = if dz >= sz { ConvKind::Fpext } else { ConvKind::Fptrunc };
            let conv = self.make_conv(kind, value, src, dst);
            return Ok(self.emit(conv));
        }

        if src_is_float && dst_is_int {
            let kind = if self.module.info.types.is_unsigned(dst) {
                ConvKind::Fptoui
            } else {
                ConvKind::Fptosi
            };
            let conv = self.make_conv(kind, value, src, dst);
            return Ok(self.emit(conv));
        }
        if src_is_int && dst_is_float {
            let kind = if self.module.info.types.is_unsigned(src) {
                ConvKind::Uitofp
            } else {
                ConvKind::Sitofp
            };
            let conv = self.make_conv(kind, value, src, dst);
            return Ok(self.emit(conv));
        }

        if src_is_ptr && dst_is_int {
            let conv = self.make_conv(ConvKind::Ptrtoint, value, src, dst);
            return Ok(self.emit(conv));
        }
        if src_is_int && dst_is_ptr {
            let conv = self.make_conv(ConvKind::Inttoptr, value, src, dst);
            return Ok(self.emit(conv));
        }

        // child -> parent union: {payload, tag}
        if self.module.info.types.is_union(dst) {
            let fields = match self.module.info.types.kind(self.module.info.types.base(dst)) {
                TypeKind::Record { fields, .. } => fields.clone(),
                _ => unreachable!(),
            };
            for (i, f) in fields.iter().enumerate() {
                if f.ty != src_type {
                    continue;
                }
                self.emit_comment("union - child to parent");
                let int = self.module.t_int;
                let int_ptr = self.module.info.types.ptr_to(int);
                let parent = self.add_local_generated(t);
                let tag = self.module.const_int(i as i64);
                let tag_addr = self.emit_struct_gep_i(parent, 1, int_ptr);
                self.emit_store(tag_addr, tag);

                let rawptr = self.module.t_rawptr;
                let data = self.emit_conv(parent, rawptr)?;
                let tag_ptr = self.module.info.types.ptr_to(src_type);
                let underlying = self.make_conv(ConvKind::Bitcast, data, rawptr, tag_ptr);
                let underlying = self.emit(underlying);
                self.emit_store(underlying, value);

                return Ok(self.emit_load(parent));
            }
        }

        // Structural subtyping: the destination type embedded as a field of
        // the source. Checked before the pointer cases on purpose.
        {
            let sb = {
                let tys = &self.module.info.types;
                tys.base(self.deref_if_ptr(src))
            };
            let src_was_ptr = sb != self.module.info.types.base(src);
            if self.module.info.types.is_struct(sb) {
                if let Some(field_name) = self.lookup_polymorphic_field(t, src) {
                    if let Some(sel) = self.module.info.types.lookup_field(sb, &field_name) {
                        self.emit_comment("cast - polymorphism");
                        let mut value = value;
                        if src_was_ptr {
                            value = self.emit_load(value);
                        }
                        return self.emit_deep_field_ev(sb, value, &sel.path, sel.ty);
                    }
                }
            }
        }

        if (src_is_ptr && dst_is_ptr)
            || (src_is_proc && dst_is_proc)
            || (src_is_ptr && dst_is_proc)
            || (src_is_proc && dst_is_ptr)
        {
            let conv = self.make_conv(ConvKind::Bitcast, value, src, dst);
            return Ok(self.emit(conv));
        }

        // []u8 <-> string
        if self.module.info.types.is_u8_slice(src) && self.module.info.types.is_string(dst) {
            let elem = self.slice_elem(value);
            let len = self.slice_len(value);
            return Ok(self.emit_string(elem, len));
        }
        if self.module.info.types.is_string(src) && self.module.info.types.is_u8_slice(dst) {
            let elem = self.string_elem(value);
            let elem_ty = self.value_ty(elem);
            let elem_ptr = self.add_local_generated(elem_ty);
            self.emit_store(elem_ptr, elem);
            let len = self.string_len(value);
            let zero = self.module.const_int(0);
            let slice = self.add_local_slice(dst, elem_ptr, Some(zero), Some(len), Some(len))?;
            return Ok(self.emit_load(slice));
        }

        // scalar -> vector: broadcast lane zero
        if self.module.info.types.is_vector(dst) {
            let (elem, count) = match self.module.info.types.kind(self.module.info.types.base(dst))
            {
                TypeKind::Vector { elem, count } => (*elem, *count),
                _ => unreachable!(),
            };
            let value = self.emit_conv(value, elem)?;
            let v = self.add_local_generated(t);
            let v = self.emit_load(v);
            let zero = self.module.const_i32(0);
            let ins = self.make_instr(InstrKind::InsertElement { vector: v, elem: value, index: zero });
            let v = self.emit(ins);
            let indices = vec![0; count as usize];
            let sv = self.make_shuffle_vector(v, indices);
            return Ok(self.emit(sv));
        }

        // value -> any: {type_info, data}
        if self.module.info.types.is_any(dst) {
            let any = self.module.t_any;
            let result = self.add_local_generated(any);

            if self.module.info.types.is_untyped_nil(src) {
                return Ok(self.emit_load(result));
            }

            // Addressable sources reuse their load address; everything else
            // spills to a fresh local.
            let data = match &self.module.value(value).kind {
                ValueKind::Instr(instr) => match instr.kind {
                    InstrKind::Load { addr, .. } => Some(addr),
                    _ => None,
                },
                _ => None,
            };
            let data = match data {
                Some(addr) => addr,
                None => {
                    let spill = self.add_local_generated(src_type);
                    self.emit_store(spill, value);
                    spill
                }
            };
            let rawptr = self.module.t_rawptr;
            let data = self.emit_conv(data, rawptr)?;

            let ti = self.type_info(src_type)?;

            let (ti_ptr_ptr, rawptr_ptr) = {
                let ti_ty = self.module.info.runtime.type_info;
                let tys = &mut self.module.info.types;
                let ti_ptr = tys.ptr_to(ti_ty);
                (tys.ptr_to(ti_ptr), tys.ptr_to(rawptr))
            };
            let gep0 = self.emit_struct_gep_i(result, 0, ti_ptr_ptr);
            let gep1 = self.emit_struct_gep_i(result, 1, rawptr_ptr);
            self.emit_store(gep0, ti);
            self.emit_store(gep1, data);

            return Ok(self.emit_load(result));
        }

        if self.module.info.types.is_untyped_nil(src) && self.module.info.types.has_nil(dst) {
            return Ok(self.module.add_value(ValueKind::Nil { ty: t }));
        }

        Err(SsaError::InvalidConversion {
            from: self.module.info.types.display(src_type),
            to: self.module.info.types.display(t),
        })
    }

    pub fn emit_transmute(&mut self, value: ValueId, t: TypeId) -> SsaResult<ValueId> {
        let src_type = self.value_ty(value);
        if src_type == t {
            return Ok(value);
        }
        let src = self.module.info.types.base(src_type);
        let dst = self.module.info.types.base(t);
        let sz = self.module.info.types.size_of(src);
        let dz = self.module.info.types.size_of(dst);
        if sz == dz {
            let conv = self.make_conv(ConvKind::Bitcast, value, src, dst);
            return Ok(self.emit(conv));
        }
        Err(SsaError::InvalidTransmute {
            from: self.module.info.types.display(src_type),
            to: self.module.info.types.display(t),
        })
    }

    /// Displace a pointer-to-field back to a pointer to its container.
    pub fn emit_down_cast(&mut self, value: ValueId, t: TypeId) -> SsaResult<ValueId> {
        let src_ty = self.value_ty(value);
        assert!(self.module.info.types.is_pointer(src_ty));
        let container = self.module.info.types.deref(t);
        let src_elem = self.module.info.types.deref(src_ty);

        let sel = self
            .find_embedded_field(container, src_elem)
            .ok_or_else(|| SsaError::InvalidConversion {
                from: self.module.info.types.display(src_ty),
                to: self.module.info.types.display(t),
            })?;

        let u8_ptr = {
            let u8t = self.module.t_u8;
            self.module.info.types.ptr_to(u8t)
        };
        let bytes = self.emit_conv(value, u8_ptr)?;
        let offset = self.module.info.types.offset_of_path(container, &sel.path);
        let offset = self.module.const_int(-offset);
        let head = self.emit_ptr_offset(bytes, offset)?;
        self.emit_conv(head, t)
    }

    fn find_embedded_field(
        &self,
        container: TypeId,
        target: TypeId,
    ) -> Option<lyre_front::Selection> {
        let tys = &self.module.info.types;
        let base = tys.base(container);
        if let TypeKind::Record { fields, .. } = tys.kind(base) {
            for (i, f) in fields.iter().enumerate() {
                if f.ty == target {
                    return Some(lyre_front::Selection {
                        name: f.name.clone(),
                        ty: f.ty,
                        path: vec![i],
                    });
                }
                if f.anonymous {
                    if let Some(mut sel) = self.find_embedded_field(f.ty, target) {
                        sel.path.insert(0, i);
                        return Some(sel);
                    }
                }
            }
        }
        None
    }

    fn lookup_polymorphic_field(&self, dst: TypeId, src: TypeId) -> Option<String> {
        let tys = &self.module.info.types;
        let src_base = tys.base(self.deref_if_ptr(src));
        let src_is_ptr = src_base != tys.base(src);
        if !tys.is_struct(src_base) {
            return None;
        }
        let fields = match tys.kind(src_base) {
            TypeKind::Record { fields, .. } => fields,
            _ => return None,
        };
        for f in fields {
            if !f.anonymous {
                continue;
            }
            if f.ty == dst {
                return Some(f.name.clone());
            }
            if src_is_ptr && tys.is_pointer(dst) && tys.deref(dst) == f.ty {
                return Some(f.name.clone());
            }
            if tys.is_struct(f.ty) {
                if let Some(name) = self.lookup_polymorphic_field(dst, f.ty) {
                    return Some(name);
                }
            }
        }
        None
    }

    // ---- short-circuit logic --------------------------------------------

    /// Thread a condition expression directly into true/false targets,
    /// without materializing intermediate booleans where possible.
    pub fn build_cond(
        &mut self,
        cond: NodeId,
        true_block: crate::block::BlockId,
        false_block: crate::block::BlockId,
    ) -> SsaResult<()> {
        match self.module.info.ast.kind(cond).clone() {
            NodeKind::Paren { expr } => return self.build_cond(expr, true_block, false_block),
            NodeKind::Unary { op: UnaryOp::Not, expr } => {
                return self.build_cond(expr, false_block, true_block);
            }
            NodeKind::Binary { op: BinOp::LogicalAnd, left, right } => {
                let block = self.add_block(None, "cmp.and");
                self.build_cond(left, block, false_block)?;
                self.set_curr_block(block);
                return self.build_cond(right, true_block, false_block);
            }
            NodeKind::Binary { op: BinOp::LogicalOr, left, right } => {
                let block = self.add_block(None, "cmp.or");
                self.build_cond(left, true_block, block)?;
                self.set_curr_block(block);
                return self.build_cond(right, true_block, false_block);
            }
            _ => {}
        }

        let expr = self.build_expr(cond)?;
        let bool_ = self.module.t_bool;
        let expr = self.emit_conv(expr, bool_)?;
        self.emit_if(expr, true_block, false_block);
        Ok(())
    }

    fn emit_logical_binary_expr(
        &mut self,
        node: NodeId,
        op: BinOp,
        left: NodeId,
        right: NodeId,
    ) -> SsaResult<ValueId> {
        let rhs = self.add_block(None, "logical.cmp.rhs");
        let done = self.add_block(None, "logical.cmp.done");

        let ty = self.node_type(node)?;

        let short_circuit = if op == BinOp::LogicalAnd {
            self.build_cond(left, rhs, done)?;
            self.module.const_bool(false)
        } else {
            self.build_cond(left, done, rhs)?;
            self.module.const_bool(true)
        };

        if self.proc().block(rhs).preds.is_empty() {
            self.set_curr_block(done);
            return Ok(short_circuit);
        }
        if self.proc().block(done).preds.is_empty() {
            self.set_curr_block(rhs);
            return self.build_expr(right);
        }

        let mut edges = vec![short_circuit; self.proc().block(done).preds.len()];
        self.set_curr_block(rhs);
        edges.push(self.build_expr(right)?);
        self.emit_jump(done);
        self.set_curr_block(done);

        let phi = self.make_instr(InstrKind::Phi { edges, ty });
        Ok(self.emit(phi))
    }

    // ---- entry points ----------------------------------------------------

    pub fn build_expr(&mut self, expr: NodeId) -> SsaResult<ValueId> {
        let expr = self.module.info.ast.unparen(expr);
        let tv = self.node_tv(expr)?;

        if let Some(value) = &tv.value {
            if let ExactValue::Str(s) = value {
                self.emit_comment("string constant");
                if !s.is_empty() {
                    let s = s.clone();
                    return self.emit_global_string(&s);
                }
                let string_ty = self.module.t_string;
                let null_string = self.add_local_generated(string_ty);
                return Ok(self.emit_load(null_string));
            }
            return self.module.add_module_constant(tv.ty, value.clone());
        }

        if tv.mode == AddressingMode::Variable {
            let addr = self.build_addr(expr)?;
            return self.lvalue_load(&addr);
        }
        self.build_single_expr(expr, &tv)
    }

    fn build_single_expr(
        &mut self,
        expr: NodeId,
        tv: &lyre_front::TypeAndValue,
    ) -> SsaResult<ValueId> {
        let pos = self.module.info.ast.pos(expr);
        match self.module.info.ast.kind(expr).clone() {
            NodeKind::BasicLit => Err(SsaError::UnexpectedNode {
                what: "non-constant basic literal",
                pos,
            }),

            NodeKind::Ident { name } => {
                let entity = self
                    .module
                    .info
                    .entity_of_use(expr)
                    .ok_or(SsaError::UnknownValue { name: name.clone(), pos })?;
                match self.module.info.entities.get(entity).kind.clone() {
                    EntityKind::Builtin { .. } => Err(SsaError::UnexpectedNode {
                        what: "builtin procedure outside a call",
                        pos,
                    }),
                    EntityKind::Nil => {
                        Ok(self.module.add_value(ValueKind::Nil { ty: tv.ty }))
                    }
                    EntityKind::ImplicitValue => self.emit_implicit_value(entity),
                    _ => {
                        let v = self
                            .module
                            .values
                            .get(&entity)
                            .copied()
                            .ok_or(SsaError::UnknownValue { name, pos })?;
                        if matches!(self.module.value(v).kind, ValueKind::Proc { .. }) {
                            return Ok(v);
                        }
                        Ok(self.emit_load(v))
                    }
                }
            }

            NodeKind::Paren { expr } => {
                let inner = self.module.info.ast.unparen(expr);
                let tv = self.node_tv(inner)?;
                self.build_single_expr(inner, &tv)
            }

            NodeKind::Deref { .. } | NodeKind::Selector { .. } => {
                let addr = self.build_addr(expr)?;
                self.lvalue_load(&addr)
            }

            NodeKind::Unary { op, expr: operand } => match op {
                UnaryOp::AddrOf => {
                    let addr = self.build_addr(operand)?;
                    let a = addr.addr.ok_or(SsaError::IllegalLValueLoad)?;
                    // A fresh copy of the pointer.
                    Ok(self.emit_zero_gep(a))
                }
                UnaryOp::MaybeWrap => {
                    let v = self.build_expr(operand)?;
                    self.emit_conv(v, tv.ty)
                }
                UnaryOp::Plus => self.build_expr(operand),
                UnaryOp::Minus => {
                    // -x == 0 - x
                    let zero = self.module.const_int(0);
                    let x = self.build_expr(operand)?;
                    self.emit_arith(BinOp::Sub, zero, x, tv.ty)
                }
                UnaryOp::Not | UnaryOp::BitNot => {
                    // !x == x xor -1
                    let left = self.build_expr(operand)?;
                    let right =
                        self.module.add_module_constant(tv.ty, ExactValue::Integer(-1))?;
                    self.emit_arith(BinOp::Xor, left, right, tv.ty)
                }
            },

            NodeKind::Binary { op, left, right } => match op {
                BinOp::Add
                | BinOp::Sub
                | BinOp::Mul
                | BinOp::Div
                | BinOp::Mod
                | BinOp::And
                | BinOp::Or
                | BinOp::Xor
                | BinOp::AndNot
                | BinOp::Shl
                | BinOp::Shr => {
                    let l = self.build_expr(left)?;
                    let r = self.build_expr(right)?;
                    self.emit_arith(op, l, r, tv.ty)
                }
                BinOp::CmpEq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
                    let l = self.build_expr(left)?;
                    let r = self.build_expr(right)?;
                    let cmp = self.emit_comp(op, l, r)?;
                    self.emit_conv(cmp, tv.ty)
                }
                BinOp::LogicalAnd | BinOp::LogicalOr => {
                    self.emit_logical_binary_expr(expr, op, left, right)
                }
            },

            NodeKind::Cast { kind, expr: operand } => match kind {
                CastKind::Convert => {
                    self.emit_comment("cast - conversion");
                    let v = self.build_expr(operand)?;
                    self.emit_conv(v, tv.ty)
                }
                CastKind::Transmute => {
                    self.emit_comment("cast - transmute");
                    let v = self.build_expr(operand)?;
                    self.emit_transmute(v, tv.ty)
                }
                CastKind::Down => {
                    self.emit_comment("cast - down cast");
                    let v = self.build_expr(operand)?;
                    self.emit_down_cast(v, tv.ty)
                }
            },

            NodeKind::ProcLit { body, tags } => {
                // parent$count
                let name = format!("{}${}", self.proc().name, self.proc().children.len());
                let mut proc = crate::procedure::Procedure::new(None, tv.ty, Some(body), name);
                proc.tags = tags;
                proc.parent = Some(self.proc_id);
                let pid = crate::procedure::ProcId(self.module.proc_pool.len() as u32);
                self.module.proc_pool.push(proc);
                let value = self.module.add_value(ValueKind::Proc { proc: pid });
                self.proc_mut().children.push(value);
                crate::builder::build_proc(self.module, value)?;
                Ok(value)
            }

            NodeKind::CompoundLit { elems } => self.build_compound_lit(expr, &elems, tv),

            NodeKind::Call { target, args, expand_last } => {
                self.build_call(expr, target, &args, expand_last)
            }

            NodeKind::Demaybe { .. } | NodeKind::Slice { .. } | NodeKind::Index { .. } => {
                let addr = self.build_addr(expr)?;
                let a = addr.addr.ok_or(SsaError::IllegalLValueLoad)?;
                Ok(self.emit_load(a))
            }

            _ => Err(SsaError::UnexpectedNode { what: "expression", pos }),
        }
    }

    fn is_elem_const(&self, elem: NodeId) -> bool {
        let elem = match self.module.info.ast.kind(elem) {
            NodeKind::FieldValue { value, .. } => *value,
            _ => elem,
        };
        self.module
            .info
            .type_and_value(elem)
            .map(|tv| tv.value.is_some())
            .unwrap_or(false)
    }

    fn build_compound_lit(
        &mut self,
        expr: NodeId,
        elems: &[NodeId],
        tv: &lyre_front::TypeAndValue,
    ) -> SsaResult<ValueId> {
        self.emit_comment("compound literal");
        let ty = tv.ty;
        let bt = self.module.info.types.base(ty);
        let v = self.add_local_generated(ty);

        match self.module.info.types.kind(bt).clone() {
            TypeKind::Vector { elem: et, count } => {
                let mut result =
                    self.module.add_module_constant(ty, ExactValue::Compound(expr))?;
                for (index, &elem) in elems.iter().enumerate() {
                    if self.is_elem_const(elem) {
                        continue;
                    }
                    let field_elem = self.build_expr(elem)?;
                    let ev = self.emit_conv(field_elem, et)?;
                    let i = self.module.const_int(index as i64);
                    let ins = self.make_instr(InstrKind::InsertElement {
                        vector: result,
                        elem: ev,
                        index: i,
                    });
                    result = self.emit(ins);
                }

                // One-element broadcast shorthand.
                if elems.len() == 1 && count > 1 {
                    let indices = vec![0; count as usize];
                    let sv = self.make_shuffle_vector(result, indices);
                    let sv = self.emit(sv);
                    self.emit_store(v, sv);
                    return Ok(self.emit_load(v));
                }
                return Ok(result);
            }

            TypeKind::Record { fields, .. } => {
                if !elems.is_empty() {
                    let init = self.module.add_module_constant(ty, ExactValue::Compound(expr))?;
                    self.emit_store(v, init);
                    for (field_index, &elem) in elems.iter().enumerate() {
                        if self.is_elem_const(elem) {
                            continue;
                        }
                        let (index, field_expr) = match self.module.info.ast.kind(elem).clone() {
                            NodeKind::FieldValue { field, value } => {
                                let name = self
                                    .module
                                    .info
                                    .ast
                                    .ident_name(field)
                                    .unwrap_or_default()
                                    .to_string();
                                let sel = self
                                    .module
                                    .info
                                    .types
                                    .lookup_field(bt, &name)
                                    .ok_or(SsaError::UnexpectedNode {
                                        what: "unknown field in compound literal",
                                        pos: self.module.info.ast.pos(elem),
                                    })?;
                                (sel.path[0], self.build_expr(value)?)
                            }
                            _ => {
                                let name = fields[field_index].name.clone();
                                let sel = self
                                    .module
                                    .info
                                    .types
                                    .lookup_field(bt, &name)
                                    .expect("positional field exists");
                                (sel.path[0], self.build_expr(elem)?)
                            }
                        };
                        let ft = fields[index].ty;
                        let fv = self.emit_conv(field_expr, ft)?;
                        let ft_ptr = self.module.info.types.ptr_to(ft);
                        let gep = self.emit_struct_gep_i(v, index as i32, ft_ptr);
                        self.emit_store(gep, fv);
                    }
                }
            }

            TypeKind::Array { elem: et, .. } => {
                if !elems.is_empty() {
                    let init = self.module.add_module_constant(ty, ExactValue::Compound(expr))?;
                    self.emit_store(v, init);
                    for (i, &elem) in elems.iter().enumerate() {
                        if self.is_elem_const(elem) {
                            continue;
                        }
                        let field_expr = self.build_expr(elem)?;
                        let ev = self.emit_conv(field_expr, et)?;
                        let et_ptr = self.module.info.types.ptr_to(et);
                        let gep = self.emit_struct_gep_i(v, i as i32, et_ptr);
                        self.emit_store(gep, ev);
                    }
                }
            }

            TypeKind::Slice { elem: elem_type } => {
                if !elems.is_empty() {
                    let (elem_ptr_type, elem_ptr_ptr_type, int_ptr) = {
                        let int = self.module.t_int;
                        let tys = &mut self.module.info.types;
                        let ep = tys.ptr_to(elem_type);
                        let epp = tys.ptr_to(ep);
                        let ip = tys.ptr_to(int);
                        (ep, epp, ip)
                    };
                    let slice =
                        self.module.add_module_constant(ty, ExactValue::Compound(expr))?;
                    let (backing, count) = match self.module.value(slice).kind {
                        ValueKind::ConstantSlice { backing, count, .. } => (backing, count),
                        _ => panic!("slice literal did not lower to a constant slice"),
                    };
                    let backing = backing.expect("non-empty slice literal has a backing array");

                    let zero = self.module.const_i32(0);
                    let data = self.emit_struct_gep(backing, zero, elem_ptr_type)?;

                    for (i, &elem) in elems.iter().enumerate() {
                        if self.is_elem_const(elem) {
                            continue;
                        }
                        let field_expr = self.build_expr(elem)?;
                        let ev = self.emit_conv(field_expr, elem_type)?;
                        let index = self.module.const_int(i as i64);
                        let offset = self.emit_ptr_offset(data, index)?;
                        self.emit_store(offset, ev);
                    }

                    let gep0 = self.emit_struct_gep_i(v, 0, elem_ptr_ptr_type);
                    let gep1 = self.emit_struct_gep_i(v, 1, int_ptr);
                    let gep2 = self.emit_struct_gep_i(v, 2, int_ptr);
                    self.emit_store(gep0, data);
                    let len = self.module.const_int(count);
                    self.emit_store(gep1, len);
                    let cap = self.module.const_int(count);
                    self.emit_store(gep2, cap);
                }
            }

            other => panic!("unknown compound literal type {:?}", other),
        }

        Ok(self.emit_load(v))
    }

    // ---- implicit values and using ---------------------------------------

    pub fn emit_implicit_value(&mut self, entity: EntityId) -> SsaResult<ValueId> {
        let name = self.module.info.entities.name(entity).to_string();
        if name == "context" {
            let g = self.module.member(CONTEXT_NAME)?;
            return Ok(self.emit_load(g));
        }
        Err(SsaError::UnknownValue {
            name,
            pos: self.module.info.entities.get(entity).pos,
        })
    }

    /// Resolve a `using`-introduced variable to a field address of its
    /// parent, caching the address in the module value table.
    pub fn add_using_variable(&mut self, entity: EntityId) -> SsaResult<ValueId> {
        let (name, parent, using_expr) = match self.module.info.entities.get(entity).kind.clone() {
            EntityKind::Variable { anonymous: true, using_parent, using_expr } => (
                self.module.info.entities.name(entity).to_string(),
                using_parent,
                using_expr,
            ),
            _ => panic!("using variable without an anonymous entity"),
        };
        let parent = parent.expect("using variable has a parent entity");
        let parent_ty = self.module.info.entities.ty(parent);
        let sel = self
            .module
            .info
            .types
            .lookup_field(parent_ty, &name)
            .ok_or(SsaError::UnknownValue {
                name: name.clone(),
                pos: self.module.info.entities.get(entity).pos,
            })?;

        let v = match self.module.values.get(&parent).copied() {
            Some(v) => v,
            None => {
                let expr = using_expr.expect("using variable without a parent value");
                let addr = self.build_addr(expr)?;
                addr.addr.ok_or(SsaError::IllegalLValueLoad)?
            }
        };
        let var = self.emit_deep_field_gep(parent_ty, v, &sel.path, sel.ty)?;
        self.module.values.insert(entity, var);
        Ok(var)
    }

    // ---- address form ----------------------------------------------------

    pub fn build_addr(&mut self, expr: NodeId) -> SsaResult<LValue> {
        let pos = self.module.info.ast.pos(expr);
        match self.module.info.ast.kind(expr).clone() {
            NodeKind::Ident { name } => {
                if self.module.info.ast.is_blank_ident(expr) {
                    return Ok(LValue::empty());
                }
                let entity = self
                    .module
                    .info
                    .entity_of_use(expr)
                    .ok_or(SsaError::UnknownValue { name: name.clone(), pos })?;

                // String constants are lazily interned into a global array
                // plus a local header.
                if let EntityKind::Constant { value } =
                    self.module.info.entities.get(entity).kind.clone()
                {
                    let e_ty = self.module.info.entities.ty(entity);
                    if self.module.info.types.is_string(e_ty) {
                        if let ExactValue::Str(s) = value {
                            let global = self.module.add_global_string_array(&s);
                            let elem = self.array_elem(global)?;
                            let len = self.module.const_int(s.len() as i64);
                            let int = self.module.t_int;
                            let v = self.add_local_generated(e_ty);
                            let elem_ty = self.value_ty(elem);
                            let str_elem = self.emit_struct_gep_i(v, 0, elem_ty);
                            let str_len = self.emit_struct_gep_i(v, 1, int);
                            self.emit_store(str_elem, elem);
                            self.emit_store(str_len, len);
                            return Ok(LValue::at(v, expr));
                        }
                    }
                }

                let v = match self.module.values.get(&entity).copied() {
                    Some(v) => v,
                    None => match self.module.info.entities.get(entity).kind.clone() {
                        EntityKind::Variable { anonymous: true, .. } => {
                            self.add_using_variable(entity)?
                        }
                        EntityKind::ImplicitValue => {
                            // A by-value copy of the implicit value.
                            let g = self.emit_implicit_value(entity)?;
                            let ty = self.value_ty(g);
                            let local = self.add_local_generated(ty);
                            self.emit_store(local, g);
                            local
                        }
                        _ => return Err(SsaError::UnknownValue { name, pos }),
                    },
                };
                Ok(LValue::at(v, expr))
            }

            NodeKind::Paren { expr } => {
                let inner = self.module.info.ast.unparen(expr);
                self.build_addr(inner)
            }

            NodeKind::Selector { expr: base, selector } => {
                self.emit_comment("selector");
                let name = self
                    .module
                    .info
                    .ast
                    .ident_name(self.module.info.ast.unparen(selector))
                    .unwrap_or_default()
                    .to_string();
                let base_ty = self.node_type(base)?;
                let ty = self.module.info.types.base(base_ty);
                let sel = self
                    .module
                    .info
                    .types
                    .lookup_field(ty, &name)
                    .ok_or(SsaError::UnknownValue { name, pos })?;
                let a = self.build_addr(base)?;
                let a = a.addr.ok_or(SsaError::IllegalLValueLoad)?;
                let a = self.emit_deep_field_gep(ty, a, &sel.path, sel.ty)?;
                Ok(LValue::at(a, expr))
            }

            NodeKind::Unary { op: UnaryOp::AddrOf, expr: operand } => self.build_addr(operand),

            NodeKind::Cast { kind, expr: operand } => {
                // Spilled so the converted value can be dereferenced.
                let ty = self.node_type(expr)?;
                let v = self.add_local_generated(ty);
                let converted = match kind {
                    CastKind::Convert => {
                        self.emit_comment("cast - conversion");
                        let e = self.build_expr(operand)?;
                        self.emit_conv(e, ty)?
                    }
                    CastKind::Transmute => {
                        self.emit_comment("cast - transmute");
                        let e = self.build_expr(operand)?;
                        self.emit_transmute(e, ty)?
                    }
                    CastKind::Down => {
                        self.emit_comment("cast - down cast");
                        let e = self.build_expr(operand)?;
                        self.emit_down_cast(e, ty)?
                    }
                };
                self.emit_store(v, converted);
                Ok(LValue::at(v, expr))
            }

            NodeKind::Index { expr: base, index } => self.build_index_addr(expr, base, index),

            NodeKind::Slice { expr: base, low, high, max } => {
                self.build_slice_addr(expr, base, low, high, max)
            }

            NodeKind::Deref { expr: operand } => {
                let e = self.build_expr(operand)?;
                let gep = self.emit_zero_gep(e);
                Ok(LValue::at(gep, expr))
            }

            NodeKind::Demaybe { expr: operand } => {
                self.emit_comment("demaybe");
                let maybe = self.build_expr(operand)?;
                let t = self.node_type(expr)?;
                let elem = {
                    let tys = &self.module.info.types;
                    match tys.kind(tys.base(self.value_ty(maybe))) {
                        TypeKind::Maybe { elem } => *elem,
                        other => panic!("demaybe of non-maybe type {:?}", other),
                    }
                };
                let bool_ = self.module.t_bool;
                let (elem_ptr, bool_ptr) = {
                    let tys = &mut self.module.info.types;
                    (tys.ptr_to(elem), tys.ptr_to(bool_))
                };
                let result = self.add_local_generated(t);
                let gep0 = self.emit_struct_gep_i(result, 0, elem_ptr);
                let gep1 = self.emit_struct_gep_i(result, 1, bool_ptr);
                let value = self.emit_struct_ev(maybe, 0, elem);
                let ok = self.emit_struct_ev(maybe, 1, bool_);
                self.emit_store(gep0, value);
                self.emit_store(gep1, ok);
                Ok(LValue::at(result, expr))
            }

            NodeKind::Call { .. } => {
                let e = self.build_expr(expr)?;
                let ty = self.value_ty(e);
                let v = self.add_local_generated(ty);
                self.emit_store(v, e);
                Ok(LValue::at(v, expr))
            }

            _ => Err(SsaError::UnexpectedNode { what: "address expression", pos }),
        }
    }

    fn build_index_addr(
        &mut self,
        expr: NodeId,
        base: NodeId,
        index_node: NodeId,
    ) -> SsaResult<LValue> {
        self.emit_comment("index expression");
        let index_pos = self.module.info.ast.pos(index_node);
        let base_ty = self.node_type(base)?;
        let mut t = self.module.info.types.base(base_ty);
        let deref = self.module.info.types.is_pointer(t);
        if deref {
            t = self.module.info.types.deref(t);
        }
        t = self.module.info.types.base(t);

        // An indexable field brought in by `using`.
        let mut using_addr = None;
        if !self.module.info.types.is_indexable(t) {
            let fields = match self.module.info.types.kind(t) {
                TypeKind::Record { fields, .. } => fields.clone(),
                _ => Vec::new(),
            };
            for f in &fields {
                if f.anonymous && self.module.info.types.is_indexable(f.ty) {
                    let sel = self
                        .module
                        .info
                        .types
                        .lookup_field(t, &f.name)
                        .expect("anonymous field is addressable");
                    let e = self.build_addr(base)?;
                    let e = e.addr.ok_or(SsaError::IllegalLValueLoad)?;
                    using_addr = Some(self.emit_deep_field_gep(t, e, &sel.path, sel.ty)?);
                    t = self.module.info.types.base(f.ty);
                    break;
                }
            }
        }

        let int = self.module.t_int;
        match self.module.info.types.kind(t).clone() {
            TypeKind::Vector { count, .. } => {
                let vector = match using_addr {
                    Some(a) => a,
                    None => {
                        let a = self.build_addr(base)?;
                        let mut a = a.addr.ok_or(SsaError::IllegalLValueLoad)?;
                        if deref {
                            a = self.emit_load(a);
                        }
                        a
                    }
                };
                let index = self.build_expr(index_node)?;
                let index = self.emit_conv(index, int)?;
                let len = self.module.const_int(count);
                self.array_bounds_check(index_pos, index, len)?;
                Ok(LValue::vector(vector, index, expr))
            }

            TypeKind::Array { elem, count } => {
                let array = match using_addr {
                    Some(a) => a,
                    None => {
                        let a = self.build_addr(base)?;
                        let mut a = a.addr.ok_or(SsaError::IllegalLValueLoad)?;
                        if deref {
                            a = self.emit_load(a);
                        }
                        a
                    }
                };
                let et = self.module.info.types.ptr_to(elem);
                let index = self.build_expr(index_node)?;
                let index = self.emit_conv(index, int)?;
                let elem_addr = self.emit_struct_gep(array, index, et)?;
                let len = self.module.const_int(count);
                self.array_bounds_check(index_pos, index, len)?;
                Ok(LValue::at(elem_addr, expr))
            }

            TypeKind::Slice { .. } => {
                let slice = match using_addr {
                    Some(a) => self.emit_load(a),
                    None => {
                        let mut s = self.build_expr(base)?;
                        if deref {
                            s = self.emit_load(s);
                        }
                        s
                    }
                };
                let elem = self.slice_elem(slice);
                let len = self.slice_len(slice);
                let index = self.build_expr(index_node)?;
                let index = self.emit_conv(index, int)?;
                self.array_bounds_check(index_pos, index, len)?;
                let v = self.emit_ptr_offset(elem, index)?;
                Ok(LValue::at(v, expr))
            }

            TypeKind::Basic(lyre_front::BasicKind::Str) => {
                // Constant strings index through their interned global.
                let const_str = self
                    .module
                    .info
                    .type_and_value(base)
                    .filter(|tv| tv.mode == AddressingMode::Constant)
                    .and_then(|tv| tv.value.clone());
                let (elem, len) = match const_str {
                    Some(ExactValue::Str(s)) => {
                        let array = self.module.add_global_string_array(&s);
                        let elem = self.array_elem(array)?;
                        let len = self.module.const_int(s.len() as i64);
                        (elem, len)
                    }
                    _ => {
                        let s = match using_addr {
                            Some(a) => self.emit_load(a),
                            None => {
                                let mut s = self.build_expr(base)?;
                                if deref {
                                    s = self.emit_load(s);
                                }
                                s
                            }
                        };
                        (self.string_elem(s), self.string_len(s))
                    }
                };
                let index = self.build_expr(index_node)?;
                let index = self.emit_conv(index, int)?;
                self.array_bounds_check(index_pos, index, len)?;
                let v = self.emit_ptr_offset(elem, index)?;
                Ok(LValue::at(v, expr))
            }

            other => panic!("index of non-indexable type {:?}", other),
        }
    }

    fn build_slice_addr(
        &mut self,
        expr: NodeId,
        base: NodeId,
        low: Option<NodeId>,
        high: Option<NodeId>,
        max: Option<NodeId>,
    ) -> SsaResult<LValue> {
        self.emit_comment("slice expression");
        let pos = self.module.info.ast.pos(expr);
        let int = self.module.t_int;

        let mut low_v = Some(self.module.const_int(0));
        let mut high_v = None;
        let mut max_v = None;
        if let Some(low) = low {
            low_v = Some(self.build_expr(low)?);
        }
        if let Some(high) = high {
            high_v = Some(self.build_expr(high)?);
        }
        if let Some(max) = max {
            max_v = Some(self.build_expr(max)?);
        }

        let addr = self.build_addr(base)?;
        let mut addr = addr.addr.ok_or(SsaError::IllegalLValueLoad)?;
        let mut base_val = self.emit_load(addr);
        let mut ty = self.module.info.types.base(self.value_ty(base_val));

        if self.module.info.types.is_pointer(ty) {
            ty = self.module.info.types.deref(ty);
            ty = self.module.info.types.base(ty);
            addr = base_val;
            base_val = self.emit_load(base_val);
        }

        match self.module.info.types.kind(ty).clone() {
            TypeKind::Slice { .. } => {
                let slice_type = ty;
                let low = low_v.expect("slice low bound defaults to zero");
                let high = match high_v {
                    Some(h) => h,
                    None => self.slice_len(base_val),
                };
                let max = match max_v {
                    Some(m) => m,
                    None => self.slice_cap(base_val),
                };
                self.slice_bounds_check(pos, low, high, max, false)?;

                let elem = self.slice_elem(base_val);
                let elem = self.emit_ptr_offset(elem, low)?;
                let len = self.emit_arith(BinOp::Sub, high, low, int)?;
                let cap = self.emit_arith(BinOp::Sub, max, low, int)?;
                let slice = self.add_local_generated(slice_type);

                let elem_ty = self.value_ty(elem);
                let gep0 = self.emit_struct_gep_i(slice, 0, elem_ty);
                let gep1 = self.emit_struct_gep_i(slice, 1, int);
                let gep2 = self.emit_struct_gep_i(slice, 2, int);
                self.emit_store(gep0, elem);
                self.emit_store(gep1, len);
                self.emit_store(gep2, cap);
                Ok(LValue::at(slice, expr))
            }

            TypeKind::Array { elem: elem_ty, .. } => {
                let slice_type = self.module.info.types.slice_of(elem_ty);
                let low = low_v.expect("slice low bound defaults to zero");
                let high = match high_v {
                    Some(h) => h,
                    None => self.array_len(base_val),
                };
                let max = match max_v {
                    Some(m) => m,
                    None => self.array_cap(base_val),
                };
                self.slice_bounds_check(pos, low, high, max, false)?;

                let elem = self.array_elem(addr)?;
                let elem = self.emit_ptr_offset(elem, low)?;
                let len = self.emit_arith(BinOp::Sub, high, low, int)?;
                let cap = self.emit_arith(BinOp::Sub, max, low, int)?;
                let slice = self.add_local_generated(slice_type);

                let ept = self.value_ty(elem);
                let gep0 = self.emit_struct_gep_i(slice, 0, ept);
                let gep1 = self.emit_struct_gep_i(slice, 1, int);
                let gep2 = self.emit_struct_gep_i(slice, 2, int);
                self.emit_store(gep0, elem);
                self.emit_store(gep1, len);
                self.emit_store(gep2, cap);
                Ok(LValue::at(slice, expr))
            }

            TypeKind::Basic(lyre_front::BasicKind::Str) => {
                let low = low_v.expect("slice low bound defaults to zero");
                let high = match high_v {
                    Some(h) => h,
                    None => self.string_len(base_val),
                };
                self.slice_bounds_check(pos, low, high, high, true)?;

                let len = self.emit_arith(BinOp::Sub, high, low, int)?;
                let elem = self.string_elem(base_val);
                let elem = self.emit_ptr_offset(elem, low)?;

                let string_ty = self.module.t_string;
                let s = self.add_local_generated(string_ty);
                let ept = self.value_ty(elem);
                let gep0 = self.emit_struct_gep_i(s, 0, ept);
                let gep1 = self.emit_struct_gep_i(s, 1, int);
                self.emit_store(gep0, elem);
                self.emit_store(gep1, len);
                Ok(LValue::at(s, expr))
            }

            other => panic!("slice of non-sliceable type {:?}", other),
        }
    }

    // ---- calls -----------------------------------------------------------

    fn build_call(
        &mut self,
        expr: NodeId,
        target: NodeId,
        args: &[NodeId],
        expand_last: bool,
    ) -> SsaResult<ValueId> {
        // Builtins are detected by name resolution before the generic path.
        let p = self.module.info.ast.unparen(target);
        if let NodeKind::Ident { .. } = self.module.info.ast.kind(p) {
            if let Some(entity) = self.module.info.entity_of_use(p) {
                if let EntityKind::Builtin { id } = self.module.info.entities.get(entity).kind {
                    return self.build_builtin_call(expr, id, args);
                }
            }
        }

        let value = self.build_expr(target)?;
        let proc_ty = self.module.info.types.base(self.value_ty(value));
        let (params, variadic) = match self.module.info.types.kind(proc_ty) {
            TypeKind::Proc { params, variadic, .. } => (*params, *variadic),
            other => panic!("call through non-procedure type {:?}", other),
        };
        let param_tys: Vec<TypeId> = self
            .module
            .info
            .types
            .tuple_fields(params)
            .iter()
            .map(|f| f.ty)
            .collect();
        let param_count = param_tys.len();

        // Flatten arguments; tuple-returning calls destructure positionally.
        let mut flat: Vec<ValueId> = Vec::new();
        for &a in args {
            let v = self.build_expr(a)?;
            let at = self.value_ty(v);
            let at_base = self.module.info.types.base(at);
            if let TypeKind::Tuple { fields } = self.module.info.types.kind(at_base).clone() {
                for (i, f) in fields.iter().enumerate() {
                    let part = self.emit_struct_ev(v, i as i32, f.ty);
                    flat.push(part);
                }
            } else {
                flat.push(v);
            }
        }
        let arg_count = flat.len();

        if variadic {
            for i in 0..param_count.saturating_sub(1) {
                flat[i] = self.emit_conv(flat[i], param_tys[i])?;
            }
            if !expand_last {
                let variadic_ty = param_tys[param_count - 1];
                let elem = match self
                    .module
                    .info
                    .types
                    .kind(self.module.info.types.base(variadic_ty))
                {
                    TypeKind::Slice { elem } => *elem,
                    other => panic!("variadic parameter is not a slice: {:?}", other),
                };
                for item in flat.iter_mut().skip(param_count - 1) {
                    *item = self.emit_conv(*item, elem)?;
                }
            }
        } else {
            for i in 0..arg_count {
                flat[i] = self.emit_conv(flat[i], param_tys[i])?;
            }
        }

        if variadic && !expand_last {
            self.emit_comment("variadic argument packing");
            let slice_type = param_tys[param_count - 1];
            let elem_type = match self
                .module
                .info
                .types
                .kind(self.module.info.types.base(slice_type))
            {
                TypeKind::Slice { elem } => *elem,
                _ => unreachable!("checked above"),
            };
            let (elem_ptr_type, int) = {
                let int = self.module.t_int;
                (self.module.info.types.ptr_to(elem_type), int)
            };
            let slice = self.add_local_generated(slice_type);
            let slice_len = (arg_count + 1).saturating_sub(param_count) as i64;

            if slice_len > 0 {
                let array_ty = self.module.info.types.array_of(elem_type, slice_len);
                let base_array = self.add_local_generated(array_ty);

                for (j, i) in (param_count - 1..arg_count).enumerate() {
                    let elem_ptr = self.module.info.types.ptr_to(elem_type);
                    let addr = self.emit_struct_gep_i(base_array, j as i32, elem_ptr);
                    self.emit_store(addr, flat[i]);
                }

                let base_elem = self.emit_struct_gep_i(base_array, 0, elem_ptr_type);
                let slice_elem = self.emit_struct_gep_i(slice, 0, elem_ptr_type);
                self.emit_store(slice_elem, base_elem);
                let len = self.module.const_int(slice_len);
                let gep1 = self.emit_struct_gep_i(slice, 1, int);
                self.emit_store(gep1, len);
                let gep2 = self.emit_struct_gep_i(slice, 2, int);
                self.emit_store(gep2, len);
            }

            flat.truncate(param_count.saturating_sub(1));
            let packed = self.emit_load(slice);
            flat.push(packed);
        }

        Ok(self.emit_call(value, flat))
    }

    fn build_builtin_call(
        &mut self,
        expr: NodeId,
        id: BuiltinId,
        args: &[NodeId],
    ) -> SsaResult<ValueId> {
        let pos = self.module.info.ast.pos(expr);
        let int = self.module.t_int;
        match id {
            BuiltinId::TypeInfo | BuiltinId::TypeInfoOfVal => {
                let t = self.node_type(args[0])?;
                self.type_info(t)
            }

            BuiltinId::New => {
                self.emit_comment("new");
                let ty = self.node_type(args[0])?;
                let ptr_type = self.module.info.types.ptr_to(ty);
                let size = self.module.info.types.size_of(ty);
                let align = self.module.info.types.align_of(ty);
                let size = self.module.const_int(size);
                let align = self.module.const_int(align);
                let call = self.emit_runtime_call("alloc_align", vec![size, align])?;
                self.emit_conv(call, ptr_type)
            }

            BuiltinId::NewSlice => {
                self.emit_comment("new slice");
                let ty = self.node_type(args[0])?;
                let (ptr_type, slice_type) = {
                    let tys = &mut self.module.info.types;
                    (tys.ptr_to(ty), tys.slice_of(ty))
                };
                let elem_size = self.module.info.types.size_of(ty);
                let elem_align = self.module.info.types.align_of(ty);
                let elem_size = self.module.const_int(elem_size);
                let elem_align = self.module.const_int(elem_align);

                let len = self.build_expr(args[1])?;
                let len = self.emit_conv(len, int)?;
                let cap = if args.len() == 3 {
                    let cap = self.build_expr(args[2])?;
                    self.emit_conv(cap, int)?
                } else {
                    len
                };

                let len_pos = self.module.info.ast.pos(args[1]);
                let zero = self.module.const_int(0);
                self.slice_bounds_check(len_pos, zero, len, cap, false)?;

                let slice_size = self.emit_arith(BinOp::Mul, elem_size, cap, int)?;
                let call =
                    self.emit_runtime_call("alloc_align", vec![slice_size, elem_align])?;
                let ptr = self.emit_conv(call, ptr_type)?;

                let slice = self.add_local_generated(slice_type);
                let gep0 = self.emit_struct_gep_i(slice, 0, ptr_type);
                let gep1 = self.emit_struct_gep_i(slice, 1, int);
                let gep2 = self.emit_struct_gep_i(slice, 2, int);
                self.emit_store(gep0, ptr);
                self.emit_store(gep1, len);
                self.emit_store(gep2, cap);
                Ok(self.emit_load(slice))
            }

            BuiltinId::Assert => {
                self.emit_comment("assert");
                let cond = self.build_expr(args[0])?;
                assert!(self.module.info.types.is_boolean(self.value_ty(cond)));

                let false_ = self.module.const_bool(false);
                let cond = self.emit_comp(BinOp::CmpEq, cond, false_)?;
                let err = self.add_block(None, "builtin.assert.err");
                let done = self.add_block(None, "builtin.assert.done");

                self.emit_if(cond, err, done);
                self.set_curr_block(err);

                let arg_pos = self.module.info.ast.pos(args[0]);
                let mut call_args: Vec<ValueId> = self.pos_args(arg_pos)?.into_vec();
                let text = self.expr_to_string(args[0]);
                call_args.push(self.emit_global_string(&text)?);
                self.emit_runtime_call("__assert", call_args)?;

                self.emit_jump(done);
                self.set_curr_block(done);
                Ok(cond)
            }

            BuiltinId::Panic => {
                self.emit_comment("panic");
                let msg = self.build_expr(args[0])?;
                assert!(self.module.info.types.is_string(self.value_ty(msg)));

                let arg_pos = self.module.info.ast.pos(args[0]);
                let mut call_args: Vec<ValueId> = self.pos_args(arg_pos)?.into_vec();
                call_args.push(msg);
                self.emit_runtime_call("__assert", call_args)?;
                Ok(msg)
            }

            BuiltinId::Copy => {
                self.emit_comment("copy");
                let dst_slice = self.build_expr(args[0])?;
                let src_slice = self.build_expr(args[1])?;
                let slice_ty = self.module.info.types.base(self.value_ty(dst_slice));
                let elem_type = match self.module.info.types.kind(slice_ty) {
                    TypeKind::Slice { elem } => *elem,
                    other => panic!("copy of non-slice type {:?}", other),
                };
                let size_of_elem = self.module.info.types.size_of(elem_type);

                let rawptr = self.module.t_rawptr;
                let dst = self.slice_elem(dst_slice);
                let dst = self.emit_conv(dst, rawptr)?;
                let src = self.slice_elem(src_slice);
                let src = self.emit_conv(src, rawptr)?;

                let len_dst = self.slice_len(dst_slice);
                let len_src = self.slice_len(src_slice);
                let cond = self.emit_comp(BinOp::Lt, len_dst, len_src)?;
                let len = self.emit_select(cond, len_dst, len_src);

                let elem_size = self.module.const_int(size_of_elem);
                let byte_count = self.emit_arith(BinOp::Mul, len, elem_size, int)?;

                self.emit_runtime_call("__mem_copy", vec![dst, src, byte_count])?;
                Ok(len)
            }

            BuiltinId::Append => {
                self.emit_comment("append");
                let slice_ptr = self.build_expr(args[0])?;
                let slice = self.emit_load(slice_ptr);

                let elem = self.slice_elem(slice);
                let len = self.slice_len(slice);
                let cap = self.slice_cap(slice);

                let elem_type = self.module.info.types.deref(self.value_ty(elem));

                let item_value = self.build_expr(args[1])?;
                let item_value = self.emit_conv(item_value, elem_type)?;
                let item = self.add_local_generated(elem_type);
                self.emit_store(item, item_value);

                let cond = self.emit_comp(BinOp::Lt, len, cap)?;
                let able = self.add_block(None, "builtin.append.able");
                let done = self.add_block(None, "builtin.append.done");
                self.emit_if(cond, able, done);
                self.set_curr_block(able);

                let item_size = self.module.info.types.size_of(elem_type);
                let byte_count = self.module.const_int(item_size);

                let rawptr = self.module.t_rawptr;
                let offset = self.emit_ptr_offset(elem, len)?;
                let offset = self.emit_conv(offset, rawptr)?;
                let zero = self.module.const_int(0);
                let item = self.emit_ptr_offset(item, zero)?;
                let item = self.emit_conv(item, rawptr)?;

                self.emit_runtime_call("__mem_copy", vec![offset, item, byte_count])?;

                let one = self.module.const_int(1);
                let new_len = self.emit_arith(BinOp::Add, len, one, int)?;
                let gep = self.emit_struct_gep_i(slice_ptr, 1, int);
                self.emit_store(gep, new_len);

                self.emit_jump(done);
                self.set_curr_block(done);

                let bool_ = self.module.t_bool;
                self.emit_conv(cond, bool_)
            }

            BuiltinId::Swizzle => {
                self.emit_comment("swizzle");
                let vector = self.build_expr(args[0])?;
                if args.len() == 1 {
                    return Ok(vector);
                }
                let mut indices = Vec::with_capacity(args.len() - 1);
                for &a in &args[1..] {
                    let tv = self.node_tv(a)?;
                    let i = tv
                        .value
                        .as_ref()
                        .and_then(|v| v.as_integer())
                        .expect("swizzle index is a constant integer");
                    indices.push(i as i32);
                }
                let sv = self.make_shuffle_vector(vector, indices);
                Ok(self.emit(sv))
            }

            BuiltinId::SlicePtr => {
                self.emit_comment("slice from pointer");
                let ptr = self.build_expr(args[0])?;
                let len = self.build_expr(args[1])?;
                let len = self.emit_conv(len, int)?;
                let cap = if args.len() == 3 {
                    let cap = self.build_expr(args[2])?;
                    self.emit_conv(cap, int)?
                } else {
                    len
                };

                let ptr_ty = self.value_ty(ptr);
                let slice_type = {
                    let elem = self.module.info.types.deref(ptr_ty);
                    self.module.info.types.slice_of(elem)
                };
                let slice = self.add_local_generated(slice_type);
                let gep0 = self.emit_struct_gep_i(slice, 0, ptr_ty);
                self.emit_store(gep0, ptr);
                let gep1 = self.emit_struct_gep_i(slice, 1, int);
                self.emit_store(gep1, len);
                let gep2 = self.emit_struct_gep_i(slice, 2, int);
                self.emit_store(gep2, cap);
                Ok(self.emit_load(slice))
            }

            BuiltinId::Min => {
                self.emit_comment("min");
                let x = self.build_expr(args[0])?;
                let y = self.build_expr(args[1])?;
                let cond = self.emit_comp(BinOp::Lt, x, y)?;
                Ok(self.emit_select(cond, x, y))
            }

            BuiltinId::Max => {
                self.emit_comment("max");
                let x = self.build_expr(args[0])?;
                let y = self.build_expr(args[1])?;
                let cond = self.emit_comp(BinOp::Gt, x, y)?;
                Ok(self.emit_select(cond, x, y))
            }

            BuiltinId::Abs => {
                self.emit_comment("abs");
                let x = self.build_expr(args[0])?;
                let t = self.value_ty(x);
                let zero = self.module.const_int(0);
                let neg_x = self.emit_arith(BinOp::Sub, zero, x, t)?;
                let zero = self.module.const_int(0);
                let cond = self.emit_comp(BinOp::Lt, x, zero)?;
                Ok(self.emit_select(cond, neg_x, x))
            }

            BuiltinId::EnumToString => {
                self.emit_comment("enum to string");
                let x = self.build_expr(args[0])?;
                let t = self.value_ty(x);
                let ti = self.type_info(t)?;
                let i64t = self.module.t_i64;
                let value = self.emit_conv(x, i64t)?;
                self.emit_runtime_call("__enum_to_string", vec![ti, value])
            }
        }
    }

    /// Compact source rendering of an expression for assertion messages.
    pub fn expr_to_string(&self, node: NodeId) -> String {
        let ast = &self.module.info.ast;
        match ast.kind(node) {
            NodeKind::Ident { name } => name.clone(),
            NodeKind::Paren { expr } => format!("({})", self.expr_to_string(*expr)),
            NodeKind::BasicLit => self
                .module
                .info
                .type_and_value(node)
                .and_then(|tv| tv.value.as_ref())
                .map(|v| match v {
                    ExactValue::Bool(b) => b.to_string(),
                    ExactValue::Integer(i) => i.to_string(),
                    ExactValue::Float(f) => f.to_string(),
                    ExactValue::Str(s) => format!("{:?}", s),
                    ExactValue::Compound(_) => "{...}".to_string(),
                })
                .unwrap_or_else(|| "literal".to_string()),
            NodeKind::Unary { op, expr } => {
                let op = match op {
                    UnaryOp::Plus => "+",
                    UnaryOp::Minus => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                    UnaryOp::AddrOf => "&",
                    UnaryOp::MaybeWrap => "?",
                };
                format!("{}{}", op, self.expr_to_string(*expr))
            }
            NodeKind::Binary { op, left, right } => {
                let op = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Mod => "%",
                    BinOp::And => "&",
                    BinOp::Or => "|",
                    BinOp::Xor => "^",
                    BinOp::AndNot => "&~",
                    BinOp::Shl => "<<",
                    BinOp::Shr => ">>",
                    BinOp::CmpEq => "==",
                    BinOp::NotEq => "!=",
                    BinOp::Lt => "<",
                    BinOp::LtEq => "<=",
                    BinOp::Gt => ">",
                    BinOp::GtEq => ">=",
                    BinOp::LogicalAnd => "&&",
                    BinOp::LogicalOr => "||",
                };
                format!("{} {} {}", self.expr_to_string(*left), op, self.expr_to_string(*right))
            }
            NodeKind::Selector { expr, selector } => {
                format!("{}.{}", self.expr_to_string(*expr), self.expr_to_string(*selector))
            }
            NodeKind::Index { expr, index } => {
                format!("{}[{}]", self.expr_to_string(*expr), self.expr_to_string(*index))
            }
            NodeKind::Call { target, .. } => format!("{}(...)", self.expr_to_string(*target)),
            NodeKind::Deref { expr } => format!("{}^", self.expr_to_string(*expr)),
            _ => "expression".to_string(),
        }
    }
}
