//! The SSA module: value pool, procedure pool, and the tables the emitter
//! consumes.

use bitflags::bitflags;
use indexmap::IndexMap;
use log::debug;
use lyre_common::{FileId, Pos};
use lyre_front::{
    CheckerInfo, Entity, EntityId, EntityKind, ExactValue, NodeId, NodeKind, ProcTags, TypeId,
    TypeKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{SsaError, SsaResult};
use crate::instruction::{Instr, InstrKind};
use crate::procedure::{ProcId, Procedure};
use crate::value::{Value, ValueId, ValueKind};
use crate::{TYPE_INFO_DATA_MEMBER_NAME, TYPE_INFO_DATA_NAME};

bitflags! {
    /// Module-wide statement state, saved and restored around any node or
    /// procedure carrying its own flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct StmtStateFlags: u32 {
        const BOUNDS_CHECK    = 1 << 0;
        const NO_BOUNDS_CHECK = 1 << 1;
    }
}

impl StmtStateFlags {
    /// Apply an override pair; the two flags are mutually exclusive.
    pub fn apply(self, bounds: bool, no_bounds: bool) -> Self {
        let mut out = self;
        if bounds {
            out |= StmtStateFlags::BOUNDS_CHECK;
            out &= !StmtStateFlags::NO_BOUNDS_CHECK;
        } else if no_bounds {
            out |= StmtStateFlags::NO_BOUNDS_CHECK;
            out &= !StmtStateFlags::BOUNDS_CHECK;
        }
        out
    }
}

/// Keys of the debug-info table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebugKey {
    CompileUnit,
    AllProcs,
    File(FileId),
    Entity(EntityId),
}

/// One node of the debug-info tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DebugInfo {
    CompileUnit { file: FileId, producer: String },
    File { file: FileId, filename: String, directory: String },
    Proc { entity: EntityId, name: String, file: Option<DebugKey>, pos: Pos },
    AllProcs { procs: Vec<DebugKey> },
}

/// The module under construction.
#[derive(Debug, Serialize, Deserialize)]
pub struct Module {
    /// Checker tables, owned after semantic analysis.
    pub info: CheckerInfo,
    pub generate_debug_info: bool,
    pub stmt_state_flags: StmtStateFlags,

    /// All SSA values; append-only for the life of the module.
    pub value_pool: Vec<Value>,
    pub proc_pool: Vec<Procedure>,
    /// Procedure values scheduled for body generation, in order.
    pub procs: Vec<ValueId>,

    /// SSA representative per declaration.
    pub values: HashMap<EntityId, ValueId>,
    /// Globally addressable members by mangled name.
    pub members: IndexMap<String, ValueId>,
    /// Type-name mangling table.
    pub type_names: HashMap<TypeId, String>,
    pub debug_info: IndexMap<DebugKey, DebugInfo>,

    global_string_index: u32,
    global_array_index: u32,

    // Frequently used types, cached at construction.
    pub t_bool: TypeId,
    pub t_int: TypeId,
    pub t_i32: TypeId,
    pub t_i64: TypeId,
    pub t_u8: TypeId,
    pub t_uint: TypeId,
    pub t_string: TypeId,
    pub t_rawptr: TypeId,
    pub t_any: TypeId,
}

impl Module {
    pub fn new(mut info: CheckerInfo, generate_debug_info: bool) -> Self {
        use lyre_front::BasicKind;

        let t_bool = info.types.basic(BasicKind::Bool);
        let t_int = info.types.basic(BasicKind::Int);
        let t_i32 = info.types.basic(BasicKind::I32);
        let t_i64 = info.types.basic(BasicKind::I64);
        let t_u8 = info.types.basic(BasicKind::U8);
        let t_uint = info.types.basic(BasicKind::Uint);
        let t_string = info.types.basic(BasicKind::Str);
        let t_rawptr = info.types.basic(BasicKind::Rawptr);
        let t_any = info.types.basic(BasicKind::Any);

        let mut module = Module {
            info,
            generate_debug_info,
            stmt_state_flags: StmtStateFlags::BOUNDS_CHECK,
            value_pool: Vec::new(),
            proc_pool: Vec::new(),
            procs: Vec::new(),
            values: HashMap::new(),
            members: IndexMap::new(),
            type_names: HashMap::new(),
            debug_info: IndexMap::new(),
            global_string_index: 0,
            global_array_index: 0,
            t_bool,
            t_int,
            t_i32,
            t_i64,
            t_u8,
            t_uint,
            t_string,
            t_rawptr,
            t_any,
        };

        module.add_type_info_globals();

        if module.generate_debug_info && !module.info.files.is_empty() {
            let di = DebugInfo::CompileUnit { file: FileId(0), producer: "lyre".to_string() };
            module.debug_info.insert(DebugKey::CompileUnit, di);
            module
                .debug_info
                .insert(DebugKey::AllProcs, DebugInfo::AllProcs { procs: Vec::new() });
        }

        debug!(
            "module created: {} type-info entries, bounds checks {}",
            module.info.type_info_map.len(),
            if module.stmt_state_flags.contains(StmtStateFlags::BOUNDS_CHECK) { "on" } else { "off" }
        );

        module
    }

    /// The reserved globals backing runtime type information.
    fn add_type_info_globals(&mut self) {
        let type_info = self.info.runtime.type_info;
        let count = self.info.type_info_map.len() as i64;
        let data_ty = self.info.types.array_of(type_info, count);
        let entity = self.info.entities.add(Entity {
            kind: EntityKind::Variable { anonymous: false, using_parent: None, using_expr: None },
            name: TYPE_INFO_DATA_NAME.to_string(),
            ty: data_ty,
            pos: Pos::none(),
            scope: None,
        });
        let g = self.make_global(entity, None);
        if let ValueKind::Global { is_private, .. } = &mut self.value_pool[g.0 as usize].kind {
            *is_private = true;
        }
        self.values.insert(entity, g);
        self.members.insert(TYPE_INFO_DATA_NAME.to_string(), g);

        // A flat member buffer removes any need for heap allocation when the
        // runtime walks record fields.
        let member_count = self.info.type_info_member_count() as i64;
        let member_ty = self.info.types.array_of(self.info.runtime.type_info_member, member_count);
        let entity = self.info.entities.add(Entity {
            kind: EntityKind::Variable { anonymous: false, using_parent: None, using_expr: None },
            name: TYPE_INFO_DATA_MEMBER_NAME.to_string(),
            ty: member_ty,
            pos: Pos::none(),
            scope: None,
        });
        let g = self.make_global(entity, None);
        self.values.insert(entity, g);
        self.members.insert(TYPE_INFO_DATA_MEMBER_NAME.to_string(), g);
    }

    // ---- value pool ----------------------------------------------------

    pub fn add_value(&mut self, kind: ValueKind) -> ValueId {
        let id = ValueId(self.value_pool.len() as u32);
        self.value_pool.push(Value::new(kind));
        id
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.value_pool[id.0 as usize]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.value_pool[id.0 as usize]
    }

    pub fn instr(&self, id: ValueId) -> Option<&Instr> {
        self.value(id).as_instr()
    }

    pub fn instr_mut(&mut self, id: ValueId) -> Option<&mut Instr> {
        self.value_mut(id).as_instr_mut()
    }

    pub fn proc(&self, id: ProcId) -> &Procedure {
        &self.proc_pool[id.0 as usize]
    }

    pub fn proc_mut(&mut self, id: ProcId) -> &mut Procedure {
        &mut self.proc_pool[id.0 as usize]
    }

    /// The referrer list of a value, for the kinds that maintain one.
    /// Procedure values track referrers only when nested.
    pub fn value_referrers_mut(&mut self, id: ValueId) -> Option<&mut Vec<ValueId>> {
        if let ValueKind::Proc { proc } = self.value(id).kind {
            let p = &mut self.proc_pool[proc.0 as usize];
            if p.parent.is_some() {
                return Some(&mut p.referrers);
            }
            return None;
        }
        match &mut self.value_mut(id).kind {
            ValueKind::Global { referrers, .. } | ValueKind::Param { referrers, .. } => {
                Some(referrers)
            }
            ValueKind::Instr(Instr { kind: InstrKind::Local { referrers, .. }, .. }) => {
                Some(referrers)
            }
            _ => None,
        }
    }

    // ---- type projection ----------------------------------------------

    /// The type of a value; `None` for instructions that produce nothing.
    pub fn value_type(&self, id: ValueId) -> Option<TypeId> {
        match &self.value(id).kind {
            ValueKind::Constant { ty, .. }
            | ValueKind::ConstantSlice { ty, .. }
            | ValueKind::Nil { ty }
            | ValueKind::TypeName { ty, .. }
            | ValueKind::Global { ty, .. }
            | ValueKind::Param { ty, .. } => Some(*ty),
            ValueKind::Proc { proc } => Some(self.proc(*proc).ty),
            ValueKind::Instr(instr) => self.instr_type(instr),
        }
    }

    /// Pure projection of an instruction's type from its payload.
    pub fn instr_type(&self, instr: &Instr) -> Option<TypeId> {
        let tys = &self.info.types;
        match &instr.kind {
            InstrKind::Local { ty, .. } => Some(*ty),
            InstrKind::Load { ty, .. } => Some(*ty),
            InstrKind::GetElementPtr { result_ty, .. } => Some(*result_ty),
            InstrKind::Phi { ty, .. } => Some(*ty),
            InstrKind::ExtractValue { result_ty, .. } => Some(*result_ty),
            InstrKind::InsertValue { agg, .. } => self.value_type(*agg),
            InstrKind::BinaryOp { ty, .. } => Some(*ty),
            InstrKind::Conv { to, .. } => Some(*to),
            InstrKind::Select { true_value, .. } => self.value_type(*true_value),
            InstrKind::Call { result, .. } => {
                let result = (*result)?;
                let base = tys.base(result);
                if let TypeKind::Tuple { fields } = tys.kind(base) {
                    if fields.len() == 1 {
                        return Some(fields[0].ty);
                    }
                }
                Some(base)
            }
            InstrKind::ExtractElement { vector, .. } => {
                let vt = self.value_type(*vector)?;
                match tys.kind(tys.base(vt)) {
                    TypeKind::Vector { elem, .. } => Some(*elem),
                    _ => None,
                }
            }
            InstrKind::InsertElement { vector, .. } => self.value_type(*vector),
            InstrKind::ShuffleVector { ty, .. } => Some(*ty),
            _ => None,
        }
    }

    // ---- constants and globals -----------------------------------------

    pub fn const_value(&mut self, ty: TypeId, value: ExactValue) -> ValueId {
        self.add_value(ValueKind::Constant { ty, value })
    }

    pub fn const_int(&mut self, i: i64) -> ValueId {
        let ty = self.t_int;
        self.const_value(ty, ExactValue::Integer(i))
    }

    pub fn const_i32(&mut self, i: i64) -> ValueId {
        let ty = self.t_i32;
        self.const_value(ty, ExactValue::Integer(i))
    }

    pub fn const_i64(&mut self, i: i64) -> ValueId {
        let ty = self.t_i64;
        self.const_value(ty, ExactValue::Integer(i))
    }

    pub fn const_bool(&mut self, b: bool) -> ValueId {
        let ty = self.t_bool;
        self.const_value(ty, ExactValue::Bool(b))
    }

    /// A global variable value; its type is the pointer to the entity's type.
    pub fn make_global(&mut self, entity: EntityId, value: Option<ValueId>) -> ValueId {
        let entity_ty = self.info.entities.ty(entity);
        let ty = self.info.types.ptr_to(entity_ty);
        self.add_value(ValueKind::Global {
            entity,
            ty,
            value,
            is_constant: false,
            is_private: false,
            is_thread_local: false,
            referrers: Vec::new(),
        })
    }

    /// Register a global under a top-level name.
    pub fn declare_global(&mut self, name: impl Into<String>, entity: EntityId) -> ValueId {
        let g = self.make_global(entity, None);
        self.values.insert(entity, g);
        self.members.insert(name.into(), g);
        g
    }

    /// Register a procedure value; bodied procedures are scheduled for
    /// generation.
    pub fn declare_procedure(
        &mut self,
        entity: Option<EntityId>,
        ty: TypeId,
        body: Option<NodeId>,
        tags: ProcTags,
        name: impl Into<String>,
    ) -> ValueId {
        let name = name.into();
        let mut proc = Procedure::new(entity, ty, body, name.clone());
        proc.tags = tags;
        let pid = ProcId(self.proc_pool.len() as u32);
        self.proc_pool.push(proc);
        let v = self.add_value(ValueKind::Proc { proc: pid });
        if let Some(entity) = entity {
            self.values.insert(entity, v);
        }
        self.members.insert(name, v);
        if body.is_some() {
            self.procs.push(v);
        }
        v
    }

    /// Module-level constant; slice-typed compound constants synthesize a
    /// private backing array global.
    pub fn add_module_constant(&mut self, ty: TypeId, value: ExactValue) -> SsaResult<ValueId> {
        if self.info.types.is_slice(ty) {
            let node = match value {
                ExactValue::Compound(node) => node,
                _ => {
                    return Err(SsaError::InvalidConversion {
                        from: "non-compound slice constant".to_string(),
                        to: self.info.types.display(ty),
                    })
                }
            };
            let count = match self.info.ast.kind(node) {
                NodeKind::CompoundLit { elems } => elems.len() as i64,
                _ => {
                    return Err(SsaError::UnexpectedNode {
                        what: "slice constant without a compound literal",
                        pos: self.info.ast.pos(node),
                    })
                }
            };
            if count == 0 {
                return Ok(self.add_value(ValueKind::ConstantSlice { ty, backing: None, count: 0 }));
            }

            let elem = match self.info.types.kind(self.info.types.base(ty)) {
                TypeKind::Slice { elem } => *elem,
                _ => unreachable!("is_slice checked above"),
            };
            let array_ty = self.info.types.array_of(elem, count);
            let backing = self.add_module_constant(array_ty, value.clone())?;

            let name = format!("__csba${:x}", self.global_array_index);
            self.global_array_index += 1;

            let entity = self.info.entities.add(Entity {
                kind: EntityKind::Constant { value },
                name: name.clone(),
                ty: array_ty,
                pos: Pos::none(),
                scope: None,
            });
            let g = self.make_global(entity, Some(backing));
            self.values.insert(entity, g);
            self.members.insert(name, g);

            return Ok(self.add_value(ValueKind::ConstantSlice { ty, backing: Some(g), count }));
        }

        Ok(self.const_value(ty, value))
    }

    /// Intern a string literal as a private global byte array named
    /// `__str$<hex>`.
    pub fn add_global_string_array(&mut self, string: &str) -> ValueId {
        let name = format!("__str${:x}", self.global_string_index);
        self.global_string_index += 1;

        let ty = self.info.types.array_of(self.t_u8, string.len() as i64);
        let ev = ExactValue::Str(string.to_string());
        let entity = self.info.entities.add(Entity {
            kind: EntityKind::Constant { value: ev.clone() },
            name: name.clone(),
            ty,
            pos: Pos::none(),
            scope: None,
        });
        let init = self.const_value(ty, ev);
        let g = self.make_global(entity, Some(init));
        if let ValueKind::Global { is_private, .. } = &mut self.value_pool[g.0 as usize].kind {
            *is_private = true;
        }
        self.values.insert(entity, g);
        self.members.insert(name, g);
        g
    }

    pub fn find_member(&self, name: &str) -> Option<ValueId> {
        self.members.get(name).copied()
    }

    pub fn member(&self, name: &str) -> SsaResult<ValueId> {
        self.find_member(name)
            .ok_or_else(|| SsaError::MissingRuntimeMember { name: name.to_string() })
    }

    pub fn type_info_index(&self, ty: TypeId) -> SsaResult<usize> {
        self.info
            .type_info_index(ty)
            .ok_or_else(|| SsaError::MissingTypeInfo { ty: self.info.types.display(ty) })
    }

    // ---- type-name mangling --------------------------------------------

    /// Register a mangled name for a locally declared type, recursing into
    /// the named variants of a union.
    pub fn gen_global_type_name(&mut self, entity: EntityId, name: &str) {
        let ty = self.info.entities.ty(entity);
        let v = self.add_value(ValueKind::TypeName { name: name.to_string(), ty });
        self.values.insert(entity, v);
        self.members.insert(name.to_string(), v);

        let base = self.info.types.base(ty);
        if let TypeKind::Record { kind: lyre_front::RecordKind::Union, fields } =
            self.info.types.kind(base)
        {
            // The zeroth variant is the nil sentinel.
            let variants: Vec<(String, TypeId)> = fields
                .iter()
                .skip(1)
                .map(|f| (f.name.clone(), f.ty))
                .collect();
            for (child_name, child_ty) in variants {
                self.mangle_sub_type_name(child_ty, &child_name, name);
            }
        }
    }

    fn mangle_sub_type_name(&mut self, child_ty: TypeId, child_name: &str, parent: &str) {
        if !matches!(self.info.types.kind(child_ty), TypeKind::Named { .. }) {
            return;
        }
        let mangled = format!("{}.{}", parent, child_name);
        self.type_names.insert(child_ty, mangled.clone());
        let v = self.add_value(ValueKind::TypeName { name: mangled.clone(), ty: child_ty });
        self.members.insert(mangled, v);
    }

    // ---- debug info -----------------------------------------------------

    pub fn add_debug_info_file(&mut self, file: FileId) -> Option<DebugKey> {
        if !self.generate_debug_info {
            return None;
        }
        let key = DebugKey::File(file);
        if self.debug_info.contains_key(&key) {
            return Some(key);
        }
        let path = self.info.file_path(file).to_string();
        let (directory, filename) = match path.rfind(['/', '\\']) {
            Some(i) => (path[..i].to_string(), path[i + 1..].to_string()),
            None => (String::new(), path.clone()),
        };
        self.debug_info.insert(key, DebugInfo::File { file, filename, directory });
        Some(key)
    }

    pub fn add_debug_info_proc(
        &mut self,
        entity: EntityId,
        name: &str,
        file: Option<DebugKey>,
    ) -> Option<DebugKey> {
        if !self.generate_debug_info {
            return None;
        }
        let key = DebugKey::Entity(entity);
        let pos = self.info.entities.get(entity).pos;
        self.debug_info.insert(
            key,
            DebugInfo::Proc { entity, name: name.to_string(), file, pos },
        );
        if let Some(DebugInfo::AllProcs { procs }) = self.debug_info.get_mut(&DebugKey::AllProcs) {
            procs.push(key);
        }
        Some(key)
    }
}
