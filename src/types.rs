//! The closed type system used to tag every SSA value (§4.1).

use std::fmt;
use serde::{Deserialize, Serialize};

/// A type in the IR. Closed tagged union — no subtyping; `Any` widens
/// everything at the IR level and conversions are explicit via cast
/// instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Any,
    Object,
    String,
    Label,
    Array(Box<Type>),
    Pointer(Box<Type>),
    Function { ret: Box<Type>, params: Vec<Type> },
    Struct { name: String, fields: Vec<(String, Type)> },
}

impl Type {
    pub fn array(elem: Type) -> Self {
        Type::Array(Box::new(elem))
    }

    pub fn pointer(pointee: Type) -> Self {
        Type::Pointer(Box::new(pointee))
    }

    pub fn function(ret: Type, params: Vec<Type>) -> Self {
        Type::Function { ret: Box::new(ret), params }
    }

    pub fn struct_type(name: impl Into<String>, fields: Vec<(String, Type)>) -> Self {
        Type::Struct { name: name.into(), fields }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::I32 | Type::I64)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_floating()
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Object | Type::String | Type::Array(_) | Type::Struct { .. })
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Bit width: 0 for void/label, the obvious widths for numerics,
    /// pointer-size (64) for reference/pointer/any types.
    pub fn bit_width(&self) -> u32 {
        match self {
            Type::Void | Type::Label => 0,
            Type::I32 | Type::F32 => 32,
            Type::I64 | Type::F64 => 64,
            Type::Bool => 1,
            Type::Any
            | Type::Object
            | Type::String
            | Type::Array(_)
            | Type::Pointer(_)
            | Type::Function { .. }
            | Type::Struct { .. } => 64,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Bool => write!(f, "bool"),
            Type::Any => write!(f, "any"),
            Type::Object => write!(f, "object"),
            Type::String => write!(f, "string"),
            Type::Label => write!(f, "label"),
            Type::Array(elem) => write!(f, "array({})", elem),
            Type::Pointer(pointee) => write!(f, "pointer({})", pointee),
            Type::Function { ret, params } => {
                write!(f, "function({}", ret)?;
                for p in params {
                    write!(f, ", {}", p)?;
                }
                write!(f, ")")
            }
            Type::Struct { name, fields } => {
                write!(f, "struct({}", name)?;
                for (fname, fty) in fields {
                    write!(f, ", {}: {}", fname, fty)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_primitives() {
        assert!(Type::I32.is_integer());
        assert!(Type::F64.is_floating());
        assert!(Type::I64.is_numeric());
        assert!(!Type::Bool.is_numeric());
        assert!(Type::String.is_reference());
        assert!(!Type::I32.is_reference());
    }

    #[test]
    fn bit_widths() {
        assert_eq!(Type::Void.bit_width(), 0);
        assert_eq!(Type::Label.bit_width(), 0);
        assert_eq!(Type::I32.bit_width(), 32);
        assert_eq!(Type::I64.bit_width(), 64);
        assert_eq!(Type::pointer(Type::I32).bit_width(), 64);
    }

    #[test]
    fn parameterized_constructors() {
        let arr = Type::array(Type::I32);
        assert!(arr.is_array());
        let f = Type::function(Type::Bool, vec![Type::I32, Type::I32]);
        assert!(f.is_function());
        assert_eq!(f.to_string(), "function(bool, i32, i32)");
    }

    #[test]
    fn display_roundtrip_is_stable() {
        assert_eq!(Type::I32.to_string(), "i32");
        assert_eq!(Type::array(Type::String).to_string(), "array(string)");
    }
}
