//! SSA values.
//!
//! All values live in one append-only pool owned by the module and are
//! addressed by [`ValueId`]. References between values are plain ids and are
//! never owning; the pool keeps everything alive for the life of the module.

use lyre_front::{EntityId, ExactValue, TypeId};
use serde::{Deserialize, Serialize};

use crate::instruction::Instr;
use crate::procedure::ProcId;

/// Handle into the module's value pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// The payload of an SSA value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    /// A compile-time literal.
    Constant { ty: TypeId, value: ExactValue },
    /// A slice header over a synthesized global backing array.
    ConstantSlice { ty: TypeId, backing: Option<ValueId>, count: i64 },
    /// Typed null.
    Nil { ty: TypeId },
    /// A named type reference.
    TypeName { name: String, ty: TypeId },
    /// A global variable; `ty` is the pointer to the entity's type.
    Global {
        entity: EntityId,
        ty: TypeId,
        value: Option<ValueId>,
        is_constant: bool,
        is_private: bool,
        is_thread_local: bool,
        referrers: Vec<ValueId>,
    },
    /// An incoming procedure parameter.
    Param { parent: ProcId, entity: EntityId, ty: TypeId, referrers: Vec<ValueId> },
    /// A procedure; the rich payload lives in the module's procedure pool.
    Proc { proc: ProcId },
    /// An instruction inside a block.
    Instr(Instr),
}

/// One SSA value: a payload plus the register index assigned at finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub index: i32,
    pub kind: ValueKind,
}

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Value { index: 0, kind }
    }

    pub fn as_instr(&self) -> Option<&Instr> {
        match &self.kind {
            ValueKind::Instr(instr) => Some(instr),
            _ => None,
        }
    }

    pub fn as_instr_mut(&mut self) -> Option<&mut Instr> {
        match &mut self.kind {
            ValueKind::Instr(instr) => Some(instr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_front::TypeId;

    #[test]
    fn test_value_index_starts_unassigned() {
        let v = Value::new(ValueKind::Nil { ty: TypeId(0) });
        assert_eq!(v.index, 0);
    }

    #[test]
    fn test_as_instr() {
        let v = Value::new(ValueKind::Nil { ty: TypeId(0) });
        assert!(v.as_instr().is_none());
    }
}
