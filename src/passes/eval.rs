//! Constant evaluation shared between `ConstantFolding` and
//! `ConstantPropagation`: given an opcode and a way to look up a constant
//! for any of its operands, try to compute the value it would produce.
//! Grounded on the teacher's `optimizer.rs::constant_folding`, generalized
//! from "integer or float binary op" to the full pure-opcode surface this
//! IR has (unary, compare, cast) and to the wrap/IEEE/JS-coercion numeric
//! model named in §4.8.

use crate::opcode::{BinOp, CastOp, CmpOp, Opcode, UnOp};
use crate::types::Type;
use crate::value::Constant;

fn wrap_to_width(value: i64, ty: &Type) -> i64 {
    match ty {
        Type::I32 => (value as i32) as i64,
        _ => value,
    }
}

fn eval_binary(op: BinOp, lhs: &Constant, rhs: &Constant, ty: &Type) -> Option<Constant> {
    if let (Some(l), Some(r)) = (lhs.as_i64(), rhs.as_i64()) {
        if ty.is_integer() {
            let result = match op {
                BinOp::Add => l.wrapping_add(r),
                BinOp::Sub => l.wrapping_sub(r),
                BinOp::Mul => l.wrapping_mul(r),
                BinOp::Div => {
                    if r == 0 {
                        return None;
                    }
                    l.wrapping_div(r)
                }
                BinOp::Mod => {
                    if r == 0 {
                        return None;
                    }
                    l.wrapping_rem(r)
                }
                BinOp::Shl => l.wrapping_shl(r as u32),
                BinOp::Shr => ((l as u64).wrapping_shr(r as u32 & 63)) as i64,
                BinOp::AShr => l.wrapping_shr(r as u32),
                BinOp::And => l & r,
                BinOp::Or => l | r,
                BinOp::Xor => l ^ r,
                BinOp::Exp => {
                    if r < 0 {
                        return None;
                    }
                    l.checked_pow(r as u32).unwrap_or_else(|| l.wrapping_pow(r as u32))
                }
            };
            return Some(Constant::Integer(wrap_to_width(result, ty), ty.clone()));
        }
    }

    if let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) {
        let result = match op {
            BinOp::Add => l + r,
            BinOp::Sub => l - r,
            BinOp::Mul => l * r,
            BinOp::Div => l / r,
            BinOp::Mod => l % r,
            BinOp::Exp => l.powf(r),
            _ => return None,
        };
        return Some(Constant::Float(result, ty.clone()));
    }

    None
}

fn eval_unary(op: UnOp, operand: &Constant, ty: &Type) -> Option<Constant> {
    match (op, operand) {
        (UnOp::Neg, Constant::Integer(v, t)) => Some(Constant::Integer(wrap_to_width(v.wrapping_neg(), t), t.clone())),
        (UnOp::Neg, Constant::Float(v, t)) => Some(Constant::Float(-v, t.clone())),
        (UnOp::Neg, Constant::NaN) => Some(Constant::NaN),
        (UnOp::Not, _) => operand.as_bool().map(|b| if !b { Constant::True } else { Constant::False }),
        (UnOp::BitNot, Constant::Integer(v, t)) => Some(Constant::Integer(wrap_to_width(!v, t), t.clone())),
        (UnOp::Inc, Constant::Integer(v, t)) => Some(Constant::Integer(wrap_to_width(v.wrapping_add(1), t), t.clone())),
        (UnOp::Dec, Constant::Integer(v, t)) => Some(Constant::Integer(wrap_to_width(v.wrapping_sub(1), t), t.clone())),
        (UnOp::IsTrue, _) => operand.as_bool().map(|b| if b { Constant::True } else { Constant::False }),
        (UnOp::IsFalse, _) => operand.as_bool().map(|b| if !b { Constant::True } else { Constant::False }),
        (UnOp::ToNumber, Constant::Integer(..) | Constant::Float(..) | Constant::NaN) => Some(operand.clone()),
        _ => {
            let _ = ty;
            None
        }
    }
}

fn eval_compare(op: CmpOp, lhs: &Constant, rhs: &Constant) -> Option<Constant> {
    let as_bool = |b: bool| if b { Constant::True } else { Constant::False };

    if let (Some(l), Some(r)) = (lhs.as_i64(), rhs.as_i64()) {
        return match op {
            CmpOp::Eq | CmpOp::StrictEq => Some(as_bool(l == r)),
            CmpOp::Ne | CmpOp::StrictNe => Some(as_bool(l != r)),
            CmpOp::Lt => Some(as_bool(l < r)),
            CmpOp::Le => Some(as_bool(l <= r)),
            CmpOp::Gt => Some(as_bool(l > r)),
            CmpOp::Ge => Some(as_bool(l >= r)),
            _ => None,
        };
    }

    if let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) {
        return match op {
            CmpOp::Eq | CmpOp::StrictEq => Some(as_bool(l == r)),
            CmpOp::Ne | CmpOp::StrictNe => Some(as_bool(l != r)),
            CmpOp::Lt => Some(as_bool(l < r)),
            CmpOp::Le => Some(as_bool(l <= r)),
            CmpOp::Gt => Some(as_bool(l > r)),
            CmpOp::Ge => Some(as_bool(l >= r)),
            _ => None,
        };
    }

    if let (Constant::Str(l), Constant::Str(r)) = (lhs, rhs) {
        return match op {
            CmpOp::Eq | CmpOp::StrictEq => Some(as_bool(l == r)),
            CmpOp::Ne | CmpOp::StrictNe => Some(as_bool(l != r)),
            CmpOp::Lt => Some(as_bool(l < r)),
            CmpOp::Le => Some(as_bool(l <= r)),
            CmpOp::Gt => Some(as_bool(l > r)),
            CmpOp::Ge => Some(as_bool(l >= r)),
            _ => None,
        };
    }

    None
}

fn eval_cast(op: CastOp, value: &Constant, target: &Type) -> Option<Constant> {
    match op {
        CastOp::Trunc | CastOp::Zext | CastOp::Sext | CastOp::Bitcast => {
            value.as_i64().map(|v| Constant::Integer(wrap_to_width(v, target), target.clone()))
        }
        CastOp::FpToI => value.as_f64().map(|v| Constant::Integer(wrap_to_width(v as i64, target), target.clone())),
        CastOp::UIToFp | CastOp::SIToFp => value.as_i64().map(|v| Constant::Float(v as f64, target.clone())),
    }
}

/// Tries to evaluate `opcode` given a lookup from operand `ValueId` to its
/// known constant value (or `None` if not yet known to be constant).
/// Returns `None` whenever any required operand isn't constant, or the
/// opcode has no closed-form evaluation (division by zero, an impure or
/// terminator opcode, etc).
pub fn fold(opcode: &Opcode, ty: &Type, resolve: impl Fn(crate::value::ValueId) -> Option<Constant>) -> Option<Constant> {
    match opcode {
        Opcode::Binary { op, lhs, rhs } => eval_binary(*op, &resolve(*lhs)?, &resolve(*rhs)?, ty),
        Opcode::Unary { op, operand } => eval_unary(*op, &resolve(*operand)?, ty),
        Opcode::Compare { op, lhs, rhs } => eval_compare(*op, &resolve(*lhs)?, &resolve(*rhs)?),
        Opcode::Cast { op, value, target } => eval_cast(*op, &resolve(*value)?, target),
        Opcode::Select { cond, then_value, else_value } => {
            let c = resolve(*cond)?.as_bool()?;
            resolve(if c { *then_value } else { *else_value })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueId;

    #[test]
    fn folds_integer_addition() {
        let resolve = |_v: ValueId| None::<Constant>;
        let opcode = Opcode::Binary { op: BinOp::Add, lhs: ValueId::Arg(0), rhs: ValueId::Arg(1) };
        assert_eq!(fold(&opcode, &Type::I32, resolve), None);
    }

    #[test]
    fn i32_add_wraps() {
        let lhs = Constant::Integer(i32::MAX as i64, Type::I32);
        let rhs = Constant::Integer(1, Type::I32);
        let folded = eval_binary(BinOp::Add, &lhs, &rhs, &Type::I32).unwrap();
        assert_eq!(folded, Constant::Integer(i32::MIN as i64, Type::I32));
    }

    #[test]
    fn integer_division_by_zero_is_not_folded() {
        let lhs = Constant::Integer(10, Type::I32);
        let rhs = Constant::Integer(0, Type::I32);
        assert_eq!(eval_binary(BinOp::Div, &lhs, &rhs, &Type::I32), None);
    }

    #[test]
    fn float_nan_propagates_through_comparisons() {
        let nan = Constant::NaN;
        let one = Constant::Float(1.0, Type::F64);
        assert_eq!(eval_compare(CmpOp::Eq, &nan, &one), Some(Constant::False));
        assert_eq!(eval_compare(CmpOp::Ne, &nan, &one), Some(Constant::True));
    }
}
