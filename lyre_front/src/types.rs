//! Type definitions and the type interner.
//!
//! Types are interned: structurally identical types share one [`TypeId`], so
//! identity comparison is id equality. The table is append-only; later phases
//! may intern derived types (pointers, slices, tuples) on demand.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entity::EntityId;

/// Handle into the type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TypeId(pub u32);

/// Built-in scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    Int,
    U8,
    U16,
    U32,
    U64,
    Uint,
    F32,
    F64,
    Str,
    Rawptr,
    Any,
    UntypedNil,
}

/// Record flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Struct,
    /// Untagged overlay; field access reinterprets the storage.
    RawUnion,
    /// Tagged union; field 0 is the nil sentinel variant.
    Union,
}

/// A named member of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    /// Fields introduced by `using`; transparent for field lookup and
    /// structural subtyping.
    pub anonymous: bool,
}

/// A positional member of a tuple (parameter and result lists).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleField {
    pub name: Option<String>,
    pub entity: Option<EntityId>,
    pub ty: TypeId,
}

impl TupleField {
    pub fn unnamed(ty: TypeId) -> Self {
        TupleField { name: None, entity: None, ty }
    }
}

/// The shape of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Basic(BasicKind),
    Named { name: String, base: TypeId },
    Pointer { elem: TypeId },
    Array { elem: TypeId, count: i64 },
    Vector { elem: TypeId, count: i64 },
    Slice { elem: TypeId },
    Maybe { elem: TypeId },
    Tuple { fields: Vec<TupleField> },
    Proc { params: TypeId, results: Option<TypeId>, variadic: bool },
    Record { kind: RecordKind, fields: Vec<Field> },
    Enum { base: TypeId },
}

/// A resolved field path from a record root to a nested member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub name: String,
    pub ty: TypeId,
    pub path: Vec<usize>,
}

/// Interning type table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
    #[serde(skip)]
    lookup: HashMap<TypeKind, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = TypeTable { kinds: Vec::new(), lookup: HashMap::new() };
        // Pre-intern every basic kind so `basic` never allocates.
        for kind in [
            BasicKind::Bool,
            BasicKind::I8,
            BasicKind::I16,
            BasicKind::I32,
            BasicKind::I64,
            BasicKind::Int,
            BasicKind::U8,
            BasicKind::U16,
            BasicKind::U32,
            BasicKind::U64,
            BasicKind::Uint,
            BasicKind::F32,
            BasicKind::F64,
            BasicKind::Str,
            BasicKind::Rawptr,
            BasicKind::Any,
            BasicKind::UntypedNil,
        ] {
            table.intern(TypeKind::Basic(kind));
        }
        // String headers hand out `^u8` data pointers during field lookup.
        let u8t = table.basic(BasicKind::U8);
        table.ptr_to(u8t);
        table
    }

    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.lookup.get(&kind) {
            return id;
        }
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.lookup.insert(kind, id);
        id
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.0 as usize]
    }

    pub fn basic(&mut self, kind: BasicKind) -> TypeId {
        self.intern(TypeKind::Basic(kind))
    }

    pub fn ptr_to(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer { elem })
    }

    pub fn slice_of(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::Slice { elem })
    }

    pub fn array_of(&mut self, elem: TypeId, count: i64) -> TypeId {
        self.intern(TypeKind::Array { elem, count })
    }

    pub fn vector_of(&mut self, elem: TypeId, count: i64) -> TypeId {
        self.intern(TypeKind::Vector { elem, count })
    }

    pub fn maybe_of(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::Maybe { elem })
    }

    pub fn tuple_of(&mut self, fields: Vec<TupleField>) -> TypeId {
        self.intern(TypeKind::Tuple { fields })
    }

    pub fn named(&mut self, name: impl Into<String>, base: TypeId) -> TypeId {
        self.intern(TypeKind::Named { name: name.into(), base })
    }

    /// Strip `Named` wrappers.
    pub fn base(&self, mut id: TypeId) -> TypeId {
        while let TypeKind::Named { base, .. } = self.kind(id) {
            id = *base;
        }
        id
    }

    /// Strip `Named` wrappers and unwrap enums to their base type.
    pub fn enum_base(&self, id: TypeId) -> TypeId {
        let mut id = self.base(id);
        while let TypeKind::Enum { base } = self.kind(id) {
            id = self.base(*base);
        }
        id
    }

    /// The pointed-to type. Panics on non-pointer types; callers guarantee
    /// pointer-ness.
    pub fn deref(&self, id: TypeId) -> TypeId {
        match self.kind(self.base(id)) {
            TypeKind::Pointer { elem } => *elem,
            other => panic!("dereference of non-pointer type {:?}", other),
        }
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(
            self.kind(self.base(id)),
            TypeKind::Pointer { .. } | TypeKind::Basic(BasicKind::Rawptr)
        )
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(
            self.kind(self.base(id)),
            TypeKind::Basic(
                BasicKind::I8
                    | BasicKind::I16
                    | BasicKind::I32
                    | BasicKind::I64
                    | BasicKind::Int
                    | BasicKind::U8
                    | BasicKind::U16
                    | BasicKind::U32
                    | BasicKind::U64
                    | BasicKind::Uint
            )
        )
    }

    pub fn is_unsigned(&self, id: TypeId) -> bool {
        matches!(
            self.kind(self.base(id)),
            TypeKind::Basic(
                BasicKind::U8 | BasicKind::U16 | BasicKind::U32 | BasicKind::U64 | BasicKind::Uint
            )
        )
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Basic(BasicKind::F32 | BasicKind::F64))
    }

    pub fn is_boolean(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Basic(BasicKind::Bool))
    }

    pub fn is_string(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Basic(BasicKind::Str))
    }

    pub fn is_any(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Basic(BasicKind::Any))
    }

    pub fn is_untyped_nil(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Basic(BasicKind::UntypedNil))
    }

    pub fn is_proc(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Proc { .. })
    }

    pub fn is_slice(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Slice { .. })
    }

    pub fn is_u8_slice(&self, id: TypeId) -> bool {
        match self.kind(self.base(id)) {
            TypeKind::Slice { elem } => {
                matches!(self.kind(self.base(*elem)), TypeKind::Basic(BasicKind::U8))
            }
            _ => false,
        }
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Array { .. })
    }

    pub fn is_vector(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Vector { .. })
    }

    pub fn is_tuple(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Tuple { .. })
    }

    pub fn is_maybe(&self, id: TypeId) -> bool {
        matches!(self.kind(self.base(id)), TypeKind::Maybe { .. })
    }

    pub fn is_struct(&self, id: TypeId) -> bool {
        matches!(
            self.kind(self.base(id)),
            TypeKind::Record { kind: RecordKind::Struct, .. }
        )
    }

    pub fn is_raw_union(&self, id: TypeId) -> bool {
        matches!(
            self.kind(self.base(id)),
            TypeKind::Record { kind: RecordKind::RawUnion, .. }
        )
    }

    pub fn is_union(&self, id: TypeId) -> bool {
        matches!(
            self.kind(self.base(id)),
            TypeKind::Record { kind: RecordKind::Union, .. }
        )
    }

    pub fn is_indexable(&self, id: TypeId) -> bool {
        matches!(
            self.kind(self.base(id)),
            TypeKind::Array { .. }
                | TypeKind::Vector { .. }
                | TypeKind::Slice { .. }
                | TypeKind::Basic(BasicKind::Str)
        )
    }

    /// Whether the type has a nil representation.
    pub fn has_nil(&self, id: TypeId) -> bool {
        matches!(
            self.kind(self.base(id)),
            TypeKind::Pointer { .. }
                | TypeKind::Proc { .. }
                | TypeKind::Slice { .. }
                | TypeKind::Maybe { .. }
                | TypeKind::Basic(BasicKind::Rawptr | BasicKind::Any | BasicKind::Str)
                | TypeKind::Record { kind: RecordKind::Union, .. }
        )
    }

    /// Number of fields in a tuple type; zero for `None`-like uses.
    pub fn tuple_len(&self, id: TypeId) -> usize {
        match self.kind(self.base(id)) {
            TypeKind::Tuple { fields } => fields.len(),
            _ => 0,
        }
    }

    pub fn tuple_fields(&self, id: TypeId) -> &[TupleField] {
        match self.kind(self.base(id)) {
            TypeKind::Tuple { fields } => fields,
            other => panic!("tuple fields of non-tuple type {:?}", other),
        }
    }

    /// Storage size in bytes for a 64-bit target.
    pub fn size_of(&self, id: TypeId) -> i64 {
        match self.kind(id) {
            TypeKind::Basic(kind) => match kind {
                BasicKind::Bool | BasicKind::I8 | BasicKind::U8 => 1,
                BasicKind::I16 | BasicKind::U16 => 2,
                BasicKind::I32 | BasicKind::U32 | BasicKind::F32 => 4,
                BasicKind::I64
                | BasicKind::U64
                | BasicKind::Int
                | BasicKind::Uint
                | BasicKind::F64
                | BasicKind::Rawptr
                | BasicKind::UntypedNil => 8,
                BasicKind::Str | BasicKind::Any => 16,
            },
            TypeKind::Named { base, .. } => self.size_of(*base),
            TypeKind::Enum { base } => self.size_of(*base),
            TypeKind::Pointer { .. } | TypeKind::Proc { .. } => 8,
            TypeKind::Array { elem, count } | TypeKind::Vector { elem, count } => {
                let stride = align_up(self.size_of(*elem), self.align_of(*elem));
                stride * count
            }
            TypeKind::Slice { .. } => 24,
            TypeKind::Maybe { elem } => {
                let align = self.align_of(*elem);
                align_up(self.size_of(*elem) + 1, align)
            }
            TypeKind::Tuple { fields } => {
                let mut size = 0;
                let mut align = 1;
                for f in fields {
                    let fa = self.align_of(f.ty);
                    size = align_up(size, fa) + self.size_of(f.ty);
                    align = align.max(fa);
                }
                align_up(size, align)
            }
            TypeKind::Record { kind, fields } => match kind {
                RecordKind::Struct => {
                    let mut size = 0;
                    let mut align = 1;
                    for f in fields {
                        let fa = self.align_of(f.ty);
                        size = align_up(size, fa) + self.size_of(f.ty);
                        align = align.max(fa);
                    }
                    align_up(size, align)
                }
                RecordKind::RawUnion => {
                    let max = fields.iter().map(|f| self.size_of(f.ty)).max().unwrap_or(0);
                    align_up(max, self.align_of(id))
                }
                RecordKind::Union => {
                    // Payload blob plus the trailing tag word.
                    let max = fields.iter().map(|f| self.size_of(f.ty)).max().unwrap_or(0);
                    align_up(max, 8) + 8
                }
            },
        }
    }

    pub fn align_of(&self, id: TypeId) -> i64 {
        match self.kind(id) {
            TypeKind::Basic(kind) => match kind {
                BasicKind::Bool | BasicKind::I8 | BasicKind::U8 => 1,
                BasicKind::I16 | BasicKind::U16 => 2,
                BasicKind::I32 | BasicKind::U32 | BasicKind::F32 => 4,
                _ => 8,
            },
            TypeKind::Named { base, .. } => self.align_of(*base),
            TypeKind::Enum { base } => self.align_of(*base),
            TypeKind::Array { elem, .. } | TypeKind::Vector { elem, .. } => self.align_of(*elem),
            TypeKind::Maybe { elem } => self.align_of(*elem),
            TypeKind::Tuple { fields } => {
                fields.iter().map(|f| self.align_of(f.ty)).max().unwrap_or(1)
            }
            TypeKind::Record { kind, fields } => match kind {
                RecordKind::Union => 8,
                _ => fields.iter().map(|f| self.align_of(f.ty)).max().unwrap_or(1),
            },
            _ => 8,
        }
    }

    /// Byte offset of field `index` within `ty`.
    pub fn offset_of(&self, ty: TypeId, index: usize) -> i64 {
        match self.kind(self.base(ty)) {
            TypeKind::Record { kind: RecordKind::Struct, fields } => {
                let mut offset = 0;
                for f in fields.iter().take(index) {
                    let fa = self.align_of(f.ty);
                    offset = align_up(offset, fa) + self.size_of(f.ty);
                }
                let fa = fields.get(index).map(|f| self.align_of(f.ty)).unwrap_or(1);
                align_up(offset, fa)
            }
            TypeKind::Tuple { fields } => {
                let mut offset = 0;
                for f in fields.iter().take(index) {
                    let fa = self.align_of(f.ty);
                    offset = align_up(offset, fa) + self.size_of(f.ty);
                }
                let fa = fields.get(index).map(|f| self.align_of(f.ty)).unwrap_or(1);
                align_up(offset, fa)
            }
            TypeKind::Slice { .. } | TypeKind::Basic(BasicKind::Str | BasicKind::Any) => {
                index as i64 * 8
            }
            _ => 0,
        }
    }

    /// Byte offset of a whole selection path.
    pub fn offset_of_path(&self, ty: TypeId, path: &[usize]) -> i64 {
        let mut ty = ty;
        let mut offset = 0;
        for &index in path {
            offset += self.offset_of(ty, index);
            ty = match self.kind(self.base(ty)) {
                TypeKind::Record { fields, .. } => fields[index].ty,
                TypeKind::Tuple { fields } => fields[index].ty,
                _ => ty,
            };
        }
        offset
    }

    /// Resolve a (possibly nested) field by name.
    ///
    /// Anonymous record fields are searched transparently, producing a
    /// multi-step path. Strings, slices, and `any` expose their fixed header
    /// fields by name.
    pub fn lookup_field(&self, id: TypeId, name: &str) -> Option<Selection> {
        match self.kind(self.base(id)) {
            TypeKind::Record { fields, .. } => {
                for (i, f) in fields.iter().enumerate() {
                    if f.name == name {
                        return Some(Selection {
                            name: f.name.clone(),
                            ty: f.ty,
                            path: vec![i],
                        });
                    }
                }
                for (i, f) in fields.iter().enumerate() {
                    if !f.anonymous {
                        continue;
                    }
                    if let Some(mut sel) = self.lookup_field(f.ty, name) {
                        sel.path.insert(0, i);
                        return Some(sel);
                    }
                }
                None
            }
            TypeKind::Basic(BasicKind::Str) => {
                let u8t = *self.lookup.get(&TypeKind::Basic(BasicKind::U8))?;
                let (index, kind) = match name {
                    "data" => (0, TypeKind::Pointer { elem: u8t }),
                    "len" => (1, TypeKind::Basic(BasicKind::Int)),
                    _ => return None,
                };
                let ty = *self.lookup.get(&kind)?;
                Some(Selection { name: name.to_string(), ty, path: vec![index] })
            }
            TypeKind::Slice { elem: _ } => {
                let index = match name {
                    "data" => 0,
                    "len" => 1,
                    "cap" => 2,
                    _ => return None,
                };
                let int = *self.lookup.get(&TypeKind::Basic(BasicKind::Int))?;
                Some(Selection { name: name.to_string(), ty: int, path: vec![index] })
            }
            TypeKind::Basic(BasicKind::Any) => {
                let index = match name {
                    "type_info" => 0,
                    "data" => 1,
                    _ => return None,
                };
                let rawptr = *self.lookup.get(&TypeKind::Basic(BasicKind::Rawptr))?;
                Some(Selection { name: name.to_string(), ty: rawptr, path: vec![index] })
            }
            _ => None,
        }
    }

    /// Human-readable type name for diagnostics.
    pub fn display(&self, id: TypeId) -> String {
        match self.kind(id) {
            TypeKind::Basic(kind) => match kind {
                BasicKind::Bool => "bool".into(),
                BasicKind::I8 => "i8".into(),
                BasicKind::I16 => "i16".into(),
                BasicKind::I32 => "i32".into(),
                BasicKind::I64 => "i64".into(),
                BasicKind::Int => "int".into(),
                BasicKind::U8 => "u8".into(),
                BasicKind::U16 => "u16".into(),
                BasicKind::U32 => "u32".into(),
                BasicKind::U64 => "u64".into(),
                BasicKind::Uint => "uint".into(),
                BasicKind::F32 => "f32".into(),
                BasicKind::F64 => "f64".into(),
                BasicKind::Str => "string".into(),
                BasicKind::Rawptr => "rawptr".into(),
                BasicKind::Any => "any".into(),
                BasicKind::UntypedNil => "untyped nil".into(),
            },
            TypeKind::Named { name, .. } => name.clone(),
            TypeKind::Pointer { elem } => format!("^{}", self.display(*elem)),
            TypeKind::Array { elem, count } => format!("[{}]{}", count, self.display(*elem)),
            TypeKind::Vector { elem, count } => format!("{{{}}}{}", count, self.display(*elem)),
            TypeKind::Slice { elem } => format!("[]{}", self.display(*elem)),
            TypeKind::Maybe { elem } => format!("?{}", self.display(*elem)),
            TypeKind::Tuple { fields } => {
                let names: Vec<String> = fields.iter().map(|f| self.display(f.ty)).collect();
                format!("({})", names.join(", "))
            }
            TypeKind::Proc { params, results, .. } => {
                let mut s = format!("proc{}", self.display(*params));
                if let Some(results) = results {
                    s.push_str(" -> ");
                    s.push_str(&self.display(*results));
                }
                s
            }
            TypeKind::Record { kind, .. } => match kind {
                RecordKind::Struct => "struct".into(),
                RecordKind::RawUnion => "raw_union".into(),
                RecordKind::Union => "union".into(),
            },
            TypeKind::Enum { base } => format!("enum {}", self.display(*base)),
        }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn align_up(size: i64, align: i64) -> i64 {
    debug_assert!(align > 0);
    (size + align - 1) / align * align
}
