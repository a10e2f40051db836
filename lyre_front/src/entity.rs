//! Declared entities produced by name resolution.

use lyre_common::Pos;
use serde::{Deserialize, Serialize};

use crate::ast::NodeId;
use crate::info::ScopeId;
use crate::types::TypeId;
use crate::value::ExactValue;

/// Handle into the entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EntityId(pub u32);

/// Built-in procedures recognized by name resolution and lowered specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuiltinId {
    TypeInfo,
    TypeInfoOfVal,
    New,
    NewSlice,
    Assert,
    Panic,
    Copy,
    Append,
    Swizzle,
    SlicePtr,
    Min,
    Max,
    Abs,
    EnumToString,
}

/// What a declaration introduces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    Variable {
        /// True for fields brought into scope by `using`.
        anonymous: bool,
        using_parent: Option<EntityId>,
        using_expr: Option<NodeId>,
    },
    Constant { value: ExactValue },
    TypeName,
    Procedure,
    Builtin { id: BuiltinId },
    Nil,
    /// Compiler-provided values such as `context`.
    ImplicitValue,
}

/// A named declaration with its resolved type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
    pub ty: TypeId,
    pub pos: Pos,
    pub scope: Option<ScopeId>,
}

/// Append-only entity arena. The SSA phase adds synthesized locals here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityTable {
    entities: Vec<Entity>,
}

impl EntityTable {
    pub fn new() -> Self {
        EntityTable { entities: Vec::new() }
    }

    pub fn add(&mut self, entity: Entity) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(entity);
        id
    }

    /// A synthesized variable with no source name.
    pub fn add_generated_variable(&mut self, ty: TypeId, scope: Option<ScopeId>) -> EntityId {
        self.add(Entity {
            kind: EntityKind::Variable { anonymous: false, using_parent: None, using_expr: None },
            name: String::new(),
            ty,
            pos: Pos::none(),
            scope,
        })
    }

    pub fn get(&self, id: EntityId) -> &Entity {
        &self.entities[id.0 as usize]
    }

    pub fn ty(&self, id: EntityId) -> TypeId {
        self.get(id).ty
    }

    pub fn name(&self, id: EntityId) -> &str {
        &self.get(id).name
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
