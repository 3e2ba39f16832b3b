//! The SSA value graph (§3): constants, arguments, globals, blocks-as-values,
//! and instructions, addressed through stable arena handles rather than
//! owning pointers (Design Note "Cyclic value graph"). Def-use/use-def
//! bookkeeping lives on `Function` (see `function.rs`); this module defines
//! the vocabulary the rest of the crate operands over.

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::types::Type;

/// Index into a module's constant table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstId(pub u32);

/// Index into a module's global table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

/// Index into a function's block arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Index into a function's instruction arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A handle to any value that can be used as an operand: a constant
/// (shared, context-free), a function argument, a named global, a block
/// used as a `label`-typed value (branch targets), or the result of an
/// instruction. This is the root of the SSA graph described in §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueId {
    Const(ConstId),
    Arg(u32),
    Global(GlobalId),
    Block(BlockId),
    Inst(InstId),
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueId::Const(c) => write!(f, "const{}", c.0),
            ValueId::Arg(i) => write!(f, "arg{}", i),
            ValueId::Global(g) => write!(f, "global{}", g.0),
            ValueId::Block(b) => write!(f, "{}", b),
            ValueId::Inst(i) => write!(f, "{}", i),
        }
    }
}

/// A constant value: immutable, no operands, no owning block. Constants are
/// context-free and may be interned by the module across functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Integer(i64, Type),
    Float(f64, Type),
    Str(String),
    Null,
    Undefined,
    NaN,
    True,
    False,
}

impl Constant {
    pub fn ty(&self) -> Type {
        match self {
            Constant::Integer(_, ty) | Constant::Float(_, ty) => ty.clone(),
            Constant::Str(_) => Type::String,
            Constant::Null | Constant::Undefined => Type::Any,
            Constant::NaN => Type::F64,
            Constant::True | Constant::False => Type::Bool,
        }
    }

    /// Structural equality used by `ConstantCoalescing` to merge duplicate
    /// representations (same kind, same value, compatible type).
    pub fn structurally_eq(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Integer(a, ta), Constant::Integer(b, tb)) => a == b && ta == tb,
            (Constant::Float(a, ta), Constant::Float(b, tb)) => {
                ta == tb && (a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()))
            }
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Null, Constant::Null)
            | (Constant::Undefined, Constant::Undefined)
            | (Constant::NaN, Constant::NaN)
            | (Constant::True, Constant::True)
            | (Constant::False, Constant::False) => true,
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Constant::Integer(v, _) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Constant::Float(v, _) => Some(*v),
            Constant::NaN => Some(f64::NAN),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Constant::True => Some(true),
            Constant::False => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Integer(v, _) => write!(f, "{}", v),
            Constant::Float(v, _) => write!(f, "{}", v),
            Constant::Str(s) => write!(f, "\"{}\"", s.escape_default()),
            Constant::Null => write!(f, "null"),
            Constant::Undefined => write!(f, "undefined"),
            Constant::NaN => write!(f, "NaN"),
            Constant::True => write!(f, "true"),
            Constant::False => write!(f, "false"),
        }
    }
}

/// A function argument, bound by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub index: u32,
    pub ty: Type,
    pub name: Option<String>,
}

/// A named value external to (or defined in) another function/module,
/// typically carrying a function type for call targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalValue {
    pub name: String,
    pub ty: Type,
    pub is_external: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_types_match_payload() {
        assert_eq!(Constant::Integer(1, Type::I32).ty(), Type::I32);
        assert_eq!(Constant::Str("x".into()).ty(), Type::String);
        assert_eq!(Constant::True.ty(), Type::Bool);
    }

    #[test]
    fn structural_equality_treats_nan_as_equal_to_itself() {
        let a = Constant::Float(f64::NAN, Type::F64);
        let b = Constant::Float(f64::NAN, Type::F64);
        assert!(a.structurally_eq(&b));
        assert!(!Constant::Integer(1, Type::I32).structurally_eq(&Constant::Integer(2, Type::I32)));
    }

    #[test]
    fn value_id_display_is_stable() {
        assert_eq!(ValueId::Inst(InstId(3)).to_string(), "%3");
        assert_eq!(ValueId::Block(BlockId(2)).to_string(), "bb2");
    }
}
