//! The closed instruction-set opcode tag and its behavioral property table
//! (§4.3). Per Design Note "Deep class hierarchy", this replaces what would
//! be a wide inheritance tree in the source with a flat tagged union plus a
//! `match` over the tag for every "virtual" predicate
//! (`is_terminator`/`is_pure`/`may_throw`/`may_have_side_effects`).
//!
//! A `BasicBlock` is itself a `label`-typed value (§3), so branch targets
//! are represented as `ValueId::Block` operands like any other operand —
//! this lets `replace_all_uses_with` retarget jumps uniformly with the rest
//! of RAUW instead of needing bespoke CFG-edge-rewriting code.

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::types::Type;
use crate::value::{BlockId, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    AShr,
    And,
    Or,
    Xor,
    Exp,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::Shl => "shl",
            BinOp::Shr => "shr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Exp => "exp",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    Inc,
    Dec,
    Typeof,
    ToNumber,
    ToNumeric,
    IsTrue,
    IsFalse,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnOp::Neg => "neg",
            UnOp::Not => "not",
            UnOp::BitNot => "bitnot",
            UnOp::Inc => "inc",
            UnOp::Dec => "dec",
            UnOp::Typeof => "typeof",
            UnOp::ToNumber => "to_number",
            UnOp::ToNumeric => "to_numeric",
            UnOp::IsTrue => "is_true",
            UnOp::IsFalse => "is_false",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StrictEq,
    StrictNe,
    IsIn,
    InstanceOf,
}

impl CmpOp {
    /// The `br_<cmp>` fused-branch mnemonic, restricted to the directions
    /// the converter lowers compare-and-branch bytecodes to.
    pub fn is_fusable(&self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge | CmpOp::Eq | CmpOp::Ne)
    }

    /// The opposite comparison, used to canonicalize a fused branch's
    /// operand order before GVN (SPEC_FULL §9 resolution).
    pub fn swapped(&self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            other => *other,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
            CmpOp::StrictEq => "strict_eq",
            CmpOp::StrictNe => "strict_ne",
            CmpOp::IsIn => "isin",
            CmpOp::InstanceOf => "instanceof",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastOp {
    Trunc,
    Zext,
    Sext,
    FpToI,
    UIToFp,
    SIToFp,
    Bitcast,
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CastOp::Trunc => "trunc",
            CastOp::Zext => "zext",
            CastOp::Sext => "sext",
            CastOp::FpToI => "fptoi",
            CastOp::UIToFp => "uitofp",
            CastOp::SIToFp => "sitofp",
            CastOp::Bitcast => "bitcast",
        };
        write!(f, "{}", s)
    }
}

/// The closed opcode set (§4.3). Each variant embeds its own operands
/// directly — `operands()`/`operands_mut()` flatten them into the
/// positional list `get_operand`/`set_operand` index against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    // Terminators
    Ret(Option<ValueId>),
    Br(BlockId),
    BrCond { cond: ValueId, then_block: BlockId, else_block: BlockId },
    BrCmp { cmp: CmpOp, lhs: ValueId, rhs: ValueId, then_block: BlockId, else_block: BlockId },
    Throw(ValueId),
    Unreachable,

    // Binary arithmetic
    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    // Unary
    Unary { op: UnOp, operand: ValueId },
    // Compare
    Compare { op: CmpOp, lhs: ValueId, rhs: ValueId },

    // Memory
    Alloca(Type),
    Load(ValueId),
    Store { value: ValueId, ptr: ValueId },

    // Objects / arrays
    CreateEmptyObject,
    CreateEmptyArray(u32),
    GetProperty { object: ValueId, key: ValueId },
    SetProperty { object: ValueId, key: ValueId, value: ValueId },
    GetElement { array: ValueId, index: ValueId },
    SetElement { array: ValueId, index: ValueId, value: ValueId },

    // Calls
    Call { callee: ValueId, args: Vec<ValueId> },
    CallThis { callee: ValueId, this: ValueId, args: Vec<ValueId> },
    New { ctor: ValueId, args: Vec<ValueId> },
    CallRuntime { name: String, args: Vec<ValueId> },

    Phi(Vec<(ValueId, BlockId)>),
    Select { cond: ValueId, then_value: ValueId, else_value: ValueId },
    Copy(ValueId),

    Cast { op: CastOp, value: ValueId, target: Type },

    Nop,
}

impl Opcode {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Ret(_) => "ret",
            Opcode::Br(_) => "br",
            Opcode::BrCond { .. } => "br_cond",
            Opcode::BrCmp { cmp, .. } => match cmp {
                CmpOp::Lt => "br_lt",
                CmpOp::Le => "br_le",
                CmpOp::Gt => "br_gt",
                CmpOp::Ge => "br_ge",
                CmpOp::Eq => "br_eq",
                CmpOp::Ne => "br_ne",
                _ => "br_cmp",
            },
            Opcode::Throw(_) => "throw",
            Opcode::Unreachable => "unreachable",
            Opcode::Binary { .. } => "binary",
            Opcode::Unary { .. } => "unary",
            Opcode::Compare { .. } => "compare",
            Opcode::Alloca(_) => "alloca",
            Opcode::Load(_) => "load",
            Opcode::Store { .. } => "store",
            Opcode::CreateEmptyObject => "create_empty_object",
            Opcode::CreateEmptyArray(_) => "create_empty_array",
            Opcode::GetProperty { .. } => "get_property",
            Opcode::SetProperty { .. } => "set_property",
            Opcode::GetElement { .. } => "get_element",
            Opcode::SetElement { .. } => "set_element",
            Opcode::Call { .. } => "call",
            Opcode::CallThis { .. } => "call_this",
            Opcode::New { .. } => "new",
            Opcode::CallRuntime { .. } => "call_runtime",
            Opcode::Phi(_) => "phi",
            Opcode::Select { .. } => "select",
            Opcode::Copy(_) => "copy",
            Opcode::Cast { .. } => "cast",
            Opcode::Nop => "nop",
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Ret(_)
                | Opcode::Br(_)
                | Opcode::BrCond { .. }
                | Opcode::BrCmp { .. }
                | Opcode::Throw(_)
                | Opcode::Unreachable
        )
    }

    /// No side effects, no throws, result depends only on operands.
    pub fn is_pure(&self) -> bool {
        !self.may_have_side_effects() && !self.may_throw() && !self.is_terminator()
    }

    pub fn may_throw(&self) -> bool {
        match self {
            Opcode::Binary { op: BinOp::Div | BinOp::Mod, .. } => true,
            Opcode::Compare { op: CmpOp::IsIn | CmpOp::InstanceOf, .. } => true,
            Opcode::Load(_) | Opcode::Store { .. } => true,
            Opcode::GetProperty { .. }
            | Opcode::SetProperty { .. }
            | Opcode::GetElement { .. }
            | Opcode::SetElement { .. } => true,
            Opcode::Call { .. } | Opcode::CallThis { .. } | Opcode::New { .. } | Opcode::CallRuntime { .. } => true,
            _ => false,
        }
    }

    pub fn may_have_side_effects(&self) -> bool {
        match self {
            Opcode::Store { .. }
            | Opcode::SetProperty { .. }
            | Opcode::SetElement { .. }
            | Opcode::Call { .. }
            | Opcode::CallThis { .. }
            | Opcode::New { .. }
            | Opcode::CallRuntime { .. }
            | Opcode::Alloca(_) => true,
            _ => false,
        }
    }

    /// Every `ValueId` operand, in the canonical order `get_operand`/
    /// `set_operand` index against. For PHI, this is the value half of
    /// each `(value, block)` pair — the incoming-block list is tracked
    /// separately (see `Instruction::phi_incoming_blocks`).
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Opcode::Ret(v) => v.iter().copied().collect(),
            Opcode::Br(b) => vec![ValueId::Block(*b)],
            Opcode::BrCond { cond, then_block, else_block } => {
                vec![*cond, ValueId::Block(*then_block), ValueId::Block(*else_block)]
            }
            Opcode::BrCmp { lhs, rhs, then_block, else_block, .. } => {
                vec![*lhs, *rhs, ValueId::Block(*then_block), ValueId::Block(*else_block)]
            }
            Opcode::Throw(v) => vec![*v],
            Opcode::Unreachable => vec![],
            Opcode::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Opcode::Unary { operand, .. } => vec![*operand],
            Opcode::Compare { lhs, rhs, .. } => vec![*lhs, *rhs],
            Opcode::Alloca(_) => vec![],
            Opcode::Load(ptr) => vec![*ptr],
            Opcode::Store { value, ptr } => vec![*value, *ptr],
            Opcode::CreateEmptyObject => vec![],
            Opcode::CreateEmptyArray(_) => vec![],
            Opcode::GetProperty { object, key } => vec![*object, *key],
            Opcode::SetProperty { object, key, value } => vec![*object, *key, *value],
            Opcode::GetElement { array, index } => vec![*array, *index],
            Opcode::SetElement { array, index, value } => vec![*array, *index, *value],
            Opcode::Call { callee, args } => {
                let mut v = vec![*callee];
                v.extend(args.iter().copied());
                v
            }
            Opcode::CallThis { callee, this, args } => {
                let mut v = vec![*callee, *this];
                v.extend(args.iter().copied());
                v
            }
            Opcode::New { ctor, args } => {
                let mut v = vec![*ctor];
                v.extend(args.iter().copied());
                v
            }
            Opcode::CallRuntime { args, .. } => args.clone(),
            Opcode::Phi(incoming) => incoming.iter().map(|(v, _)| *v).collect(),
            Opcode::Select { cond, then_value, else_value } => vec![*cond, *then_value, *else_value],
            Opcode::Copy(v) => vec![*v],
            Opcode::Cast { value, .. } => vec![*value],
            Opcode::Nop => vec![],
        }
    }

    /// Mutable access to the same flattened operand list, used by
    /// `set_operand`/RAUW.
    pub fn operands_mut(&mut self) -> Vec<&mut ValueId> {
        match self {
            Opcode::Ret(v) => v.iter_mut().collect(),
            Opcode::Br(_) => vec![],
            Opcode::BrCond { cond, .. } => vec![cond],
            Opcode::BrCmp { lhs, rhs, .. } => vec![lhs, rhs],
            Opcode::Throw(v) => vec![v],
            Opcode::Unreachable => vec![],
            Opcode::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Opcode::Unary { operand, .. } => vec![operand],
            Opcode::Compare { lhs, rhs, .. } => vec![lhs, rhs],
            Opcode::Alloca(_) => vec![],
            Opcode::Load(ptr) => vec![ptr],
            Opcode::Store { value, ptr } => vec![value, ptr],
            Opcode::CreateEmptyObject => vec![],
            Opcode::CreateEmptyArray(_) => vec![],
            Opcode::GetProperty { object, key } => vec![object, key],
            Opcode::SetProperty { object, key, value } => vec![object, key, value],
            Opcode::GetElement { array, index } => vec![array, index],
            Opcode::SetElement { array, index, value } => vec![array, index, value],
            Opcode::Call { callee, args } => {
                let mut v = vec![callee];
                v.extend(args.iter_mut());
                v
            }
            Opcode::CallThis { callee, this, args } => {
                let mut v = vec![callee, this];
                v.extend(args.iter_mut());
                v
            }
            Opcode::New { ctor, args } => {
                let mut v = vec![ctor];
                v.extend(args.iter_mut());
                v
            }
            Opcode::CallRuntime { args, .. } => args.iter_mut().collect(),
            Opcode::Phi(incoming) => incoming.iter_mut().map(|(v, _)| v).collect(),
            Opcode::Select { cond, then_value, else_value } => vec![cond, then_value, else_value],
            Opcode::Copy(v) => vec![v],
            Opcode::Cast { value, .. } => vec![value],
            Opcode::Nop => vec![],
        }
    }

    /// The br targets this terminator could transfer control to; empty for
    /// non-terminators. Note this is redundant with the `ValueId::Block`
    /// entries in `operands()` — kept as a convenience for CFG code that
    /// doesn't want to filter operands itself.
    pub fn branch_targets(&self) -> Vec<BlockId> {
        match self {
            Opcode::Br(b) => vec![*b],
            Opcode::BrCond { then_block, else_block, .. } => vec![*then_block, *else_block],
            Opcode::BrCmp { then_block, else_block, .. } => vec![*then_block, *else_block],
            _ => vec![],
        }
    }

    /// PHI's incoming-block list, parallel to `operands()` for a `Phi`.
    pub fn phi_incoming_blocks(&self) -> Option<Vec<BlockId>> {
        match self {
            Opcode::Phi(incoming) => Some(incoming.iter().map(|(_, b)| *b).collect()),
            _ => None,
        }
    }

    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Opcode::Binary { op: BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor, .. }
                | Opcode::Compare { op: CmpOp::Eq | CmpOp::Ne | CmpOp::StrictEq | CmpOp::StrictNe, .. }
        )
    }
}
