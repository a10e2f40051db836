//! The checker's output tables.
//!
//! [`CheckerInfo`] is the single handoff from semantic analysis: it owns the
//! AST, the type and entity tables, and the per-node resolution maps. The SSA
//! phase takes ownership and consults these tables instead of re-deriving any
//! semantic fact.

use indexmap::IndexMap;
use lyre_common::{FileId, Pos};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ast::{Ast, NodeId};
use crate::entity::{EntityId, EntityTable};
use crate::types::{RecordKind, TypeId, TypeKind, TypeTable};
use crate::value::ExactValue;

/// Handle into the scope tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

/// One lexical scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub entities: HashMap<String, EntityId>,
}

impl Scope {
    /// Lookup restricted to this scope, without walking parents.
    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        self.entities.get(name).copied()
    }
}

/// How an expression may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressingMode {
    NoValue,
    Value,
    Variable,
    Constant,
    Type,
}

/// Checker verdict for one expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAndValue {
    pub ty: TypeId,
    pub mode: AddressingMode,
    pub value: Option<ExactValue>,
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstFile {
    pub path: String,
}

/// Runtime descriptor types the checker resolves from the core library.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeTypes {
    pub type_info: TypeId,
    pub type_info_member: TypeId,
}

/// Everything semantic analysis hands to later phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerInfo {
    pub ast: Ast,
    pub types: TypeTable,
    pub entities: EntityTable,
    pub scopes: Vec<Scope>,

    /// Declaration sites to the entity they introduce.
    pub definitions: HashMap<NodeId, EntityId>,
    /// Use sites to the entity they refer to.
    pub uses: HashMap<NodeId, EntityId>,
    /// Expression nodes to their type, mode, and constant value.
    pub expr_types: HashMap<NodeId, TypeAndValue>,
    /// Block-introducing nodes to their scope.
    pub node_scopes: HashMap<NodeId, ScopeId>,
    /// Dense indices into the global type-info array.
    pub type_info_map: IndexMap<TypeId, usize>,
    /// Files by path; position in the map is the `FileId`.
    pub files: IndexMap<String, AstFile>,

    pub runtime: RuntimeTypes,
}

impl CheckerInfo {
    pub fn new() -> Self {
        let mut types = TypeTable::new();
        let type_info_struct =
            types.intern(TypeKind::Record { kind: RecordKind::Struct, fields: Vec::new() });
        let type_info = types.named("TypeInfo", type_info_struct);
        let type_info_member = types.named("TypeInfoMember", type_info_struct);
        CheckerInfo {
            ast: Ast::new(),
            types,
            entities: EntityTable::new(),
            scopes: Vec::new(),
            definitions: HashMap::new(),
            uses: HashMap::new(),
            expr_types: HashMap::new(),
            node_scopes: HashMap::new(),
            type_info_map: IndexMap::new(),
            files: IndexMap::new(),
            runtime: RuntimeTypes { type_info, type_info_member },
        }
    }

    pub fn add_scope(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(scope);
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn add_file(&mut self, path: impl Into<String>) -> FileId {
        let path = path.into();
        let entry = self.files.entry(path.clone());
        let index = entry.index();
        entry.or_insert(AstFile { path });
        FileId(index as u32)
    }

    pub fn file_path(&self, file: FileId) -> &str {
        self.files
            .get_index(file.0 as usize)
            .map(|(path, _)| path.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn type_and_value(&self, node: NodeId) -> Option<&TypeAndValue> {
        self.expr_types.get(&node)
    }

    pub fn type_of(&self, node: NodeId) -> Option<TypeId> {
        self.expr_types.get(&node).map(|tv| tv.ty)
    }

    pub fn entity_of_use(&self, node: NodeId) -> Option<EntityId> {
        self.uses.get(&node).copied()
    }

    pub fn entity_of_def(&self, node: NodeId) -> Option<EntityId> {
        self.definitions.get(&node).copied()
    }

    pub fn scope_of(&self, node: NodeId) -> Option<ScopeId> {
        self.node_scopes.get(&node).copied()
    }

    pub fn pos(&self, node: NodeId) -> Pos {
        self.ast.pos(node)
    }

    /// Dense type-info index for a type, if the checker registered one.
    /// Interning makes structural identity id equality, so a plain lookup
    /// replaces the original's linear fallback scan.
    pub fn type_info_index(&self, ty: TypeId) -> Option<usize> {
        self.type_info_map.get(&ty).copied()
    }

    /// Element count of the reserved type-info member buffer: one entry per
    /// record field or tuple member among the registered types.
    pub fn type_info_member_count(&self) -> usize {
        let mut count = 0;
        for &ty in self.type_info_map.keys() {
            match self.types.kind(self.types.base(ty)) {
                TypeKind::Record { kind: RecordKind::Struct | RecordKind::RawUnion, fields } => {
                    count += fields.len();
                }
                TypeKind::Tuple { fields } => count += fields.len(),
                _ => {}
            }
        }
        count
    }
}

impl Default for CheckerInfo {
    fn default() -> Self {
        Self::new()
    }
}
