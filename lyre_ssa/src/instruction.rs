//! SSA instructions.
//!
//! An instruction is a value whose payload is one of the kinds below. The
//! type of an instruction is a pure projection of its payload (see
//! [`crate::module::Module::instr_type`]); terminators are `Br`, `Ret`, and
//! `Unreachable`.

use lyre_front::{BinOp, EntityId, TypeId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::block::BlockId;
use crate::value::ValueId;

/// Conversion sub-kinds, mirroring the usual machine-level cast taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvKind {
    Trunc,
    Zext,
    Fptrunc,
    Fpext,
    Fptoui,
    Fptosi,
    Uitofp,
    Sitofp,
    Ptrtoint,
    Inttoptr,
    Bitcast,
}

impl fmt::Display for ConvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvKind::Trunc => "trunc",
            ConvKind::Zext => "zext",
            ConvKind::Fptrunc => "fptrunc",
            ConvKind::Fpext => "fpext",
            ConvKind::Fptoui => "fptoui",
            ConvKind::Fptosi => "fptosi",
            ConvKind::Uitofp => "uitofp",
            ConvKind::Sitofp => "sitofp",
            ConvKind::Ptrtoint => "ptrtoint",
            ConvKind::Inttoptr => "inttoptr",
            ConvKind::Bitcast => "bitcast",
        };
        write!(f, "{}", name)
    }
}

/// Instruction payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstrKind {
    Comment { text: String },
    /// Stack slot; `ty` is the pointer to the declared type. Always placed in
    /// the procedure's decl block.
    Local { entity: EntityId, ty: TypeId, zero_initialized: bool, referrers: Vec<ValueId> },
    ZeroInit { addr: ValueId },
    Store { addr: ValueId, value: ValueId },
    Load { ty: TypeId, addr: ValueId },
    GetElementPtr {
        addr: ValueId,
        result_ty: TypeId,
        elem_ty: TypeId,
        indices: SmallVec<[ValueId; 2]>,
        inbounds: bool,
    },
    ExtractValue { agg: ValueId, index: i32, result_ty: TypeId, elem_ty: TypeId },
    InsertValue { agg: ValueId, elem: ValueId, index: i32 },
    Conv { kind: ConvKind, value: ValueId, from: TypeId, to: TypeId },
    Br { cond: Option<ValueId>, then_block: BlockId, else_block: Option<BlockId> },
    Ret { value: Option<ValueId> },
    Select { cond: ValueId, true_value: ValueId, false_value: ValueId },
    Phi { edges: Vec<ValueId>, ty: TypeId },
    Unreachable,
    BinaryOp { op: BinOp, left: ValueId, right: ValueId, ty: TypeId },
    /// `result` is the callee's full result tuple type, `None` for void.
    Call { result: Option<TypeId>, target: ValueId, args: Vec<ValueId> },
    NoOp,
    ExtractElement { vector: ValueId, index: ValueId },
    InsertElement { vector: ValueId, elem: ValueId, index: ValueId },
    ShuffleVector { vector: ValueId, indices: Vec<i32>, ty: TypeId },
    /// Synthesized call to the runtime startup stub at the top of `main`.
    StartupRuntime,
}

impl InstrKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstrKind::Comment { .. } => "Comment",
            InstrKind::Local { .. } => "Local",
            InstrKind::ZeroInit { .. } => "ZeroInit",
            InstrKind::Store { .. } => "Store",
            InstrKind::Load { .. } => "Load",
            InstrKind::GetElementPtr { .. } => "GetElementPtr",
            InstrKind::ExtractValue { .. } => "ExtractValue",
            InstrKind::InsertValue { .. } => "InsertValue",
            InstrKind::Conv { .. } => "Conv",
            InstrKind::Br { .. } => "Br",
            InstrKind::Ret { .. } => "Ret",
            InstrKind::Select { .. } => "Select",
            InstrKind::Phi { .. } => "Phi",
            InstrKind::Unreachable => "Unreachable",
            InstrKind::BinaryOp { .. } => "BinaryOp",
            InstrKind::Call { .. } => "Call",
            InstrKind::NoOp => "NoOp",
            InstrKind::ExtractElement { .. } => "ExtractElement",
            InstrKind::InsertElement { .. } => "InsertElement",
            InstrKind::ShuffleVector { .. } => "ShuffleVector",
            InstrKind::StartupRuntime => "StartupRuntime",
        }
    }
}

/// An instruction and the block that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub kind: InstrKind,
    pub parent: Option<BlockId>,
}

impl Instr {
    pub fn new(kind: InstrKind) -> Self {
        Instr { kind, parent: None }
    }

    /// Whether emission must stop after this instruction.
    ///
    /// `Br` is not included: jump emission clears the cursor itself, so only
    /// the fall-off terminators close a block for further emits.
    pub fn is_terminating(&self) -> bool {
        matches!(self.kind, InstrKind::Ret { .. } | InstrKind::Unreachable)
    }

    /// Whether this instruction may legally end a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            InstrKind::Br { .. } | InstrKind::Ret { .. } | InstrKind::Unreachable
        )
    }

    /// Append this instruction's value operands, in payload-field order.
    pub fn append_operands(&self, ops: &mut Vec<ValueId>) {
        match &self.kind {
            InstrKind::Comment { .. }
            | InstrKind::Local { .. }
            | InstrKind::Unreachable
            | InstrKind::NoOp
            | InstrKind::StartupRuntime => {}
            InstrKind::ZeroInit { addr } => ops.push(*addr),
            InstrKind::Store { addr, value } => {
                ops.push(*addr);
                ops.push(*value);
            }
            InstrKind::Load { addr, .. } => ops.push(*addr),
            InstrKind::GetElementPtr { addr, indices, .. } => {
                ops.push(*addr);
                ops.extend(indices.iter().copied());
            }
            InstrKind::ExtractValue { agg, .. } => ops.push(*agg),
            InstrKind::InsertValue { agg, elem, .. } => {
                ops.push(*agg);
                ops.push(*elem);
            }
            InstrKind::Conv { value, .. } => ops.push(*value),
            InstrKind::Br { cond, .. } => {
                if let Some(cond) = cond {
                    ops.push(*cond);
                }
            }
            InstrKind::Ret { value } => {
                if let Some(value) = value {
                    ops.push(*value);
                }
            }
            InstrKind::Select { cond, true_value, false_value } => {
                ops.push(*cond);
                ops.push(*true_value);
                ops.push(*false_value);
            }
            InstrKind::Phi { edges, .. } => ops.extend(edges.iter().copied()),
            InstrKind::BinaryOp { left, right, .. } => {
                ops.push(*left);
                ops.push(*right);
            }
            InstrKind::Call { target, args, .. } => {
                ops.push(*target);
                ops.extend(args.iter().copied());
            }
            InstrKind::ExtractElement { vector, index } => {
                ops.push(*vector);
                ops.push(*index);
            }
            InstrKind::InsertElement { vector, elem, index } => {
                ops.push(*vector);
                ops.push(*elem);
                ops.push(*index);
            }
            InstrKind::ShuffleVector { vector, .. } => ops.push(*vector),
        }
    }

    pub fn operands(&self) -> Vec<ValueId> {
        let mut ops = Vec::new();
        self.append_operands(&mut ops);
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_terminators() {
        assert!(Instr::new(InstrKind::Ret { value: None }).is_terminating());
        assert!(Instr::new(InstrKind::Unreachable).is_terminating());
        let br = Instr::new(InstrKind::Br {
            cond: None,
            then_block: BlockId(0),
            else_block: None,
        });
        assert!(!br.is_terminating());
        assert!(br.is_terminator());
        assert!(!Instr::new(InstrKind::NoOp).is_terminator());
    }

    #[test]
    fn test_operand_order() {
        let store = Instr::new(InstrKind::Store { addr: ValueId(3), value: ValueId(7) });
        assert_eq!(store.operands(), vec![ValueId(3), ValueId(7)]);

        let select = Instr::new(InstrKind::Select {
            cond: ValueId(1),
            true_value: ValueId(2),
            false_value: ValueId(3),
        });
        assert_eq!(select.operands(), vec![ValueId(1), ValueId(2), ValueId(3)]);

        let call = Instr::new(InstrKind::Call {
            result: None,
            target: ValueId(9),
            args: vec![ValueId(4), ValueId(5)],
        });
        assert_eq!(call.operands(), vec![ValueId(9), ValueId(4), ValueId(5)]);
    }

    #[test]
    fn test_no_operand_kinds() {
        for kind in [
            InstrKind::Comment { text: "c".into() },
            InstrKind::Unreachable,
            InstrKind::NoOp,
            InstrKind::StartupRuntime,
        ] {
            assert!(Instr::new(kind).operands().is_empty());
        }
    }
}
