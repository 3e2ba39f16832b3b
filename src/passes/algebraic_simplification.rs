//! Syntactic algebraic rewrites that don't need any constant evaluation:
//! `x+0`, `x*1`, `x*0`, `x-x`, `x&x`, `x|x`, `x^x`, `x<<0`, `!!x` (§4.8).
//! Grounded on the teacher's `optimizer.rs::strength_reduction` in spirit
//! (rewriting one cheap opcode shape into another without touching
//! operands' values) though the concrete rewrites differ — the teacher
//! strength-reduces `mul`/`div` by a power-of-two constant into a shift;
//! this pass's rewrites are all identity-shaped and need no such constant
//! classification.

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::{BinOp, Opcode, UnOp};
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::types::Type;
use crate::value::{Constant, InstId, ValueId};

pub struct AlgebraicSimplification;

impl AlgebraicSimplification {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AlgebraicSimplification {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for AlgebraicSimplification {
    fn name(&self) -> &str {
        "algebraic_simplification"
    }
}

/// Looks at a `ValueId` and says whether it's the integer constant `n`
/// (used to spot the `+0`/`*1`/`*0`/`<<0` identities without folding).
fn is_int_literal(v: ValueId, n: i64, module: &ModuleView<'_>) -> bool {
    match v {
        ValueId::Const(c) => module.constants.get(c).and_then(Constant::as_i64) == Some(n),
        _ => false,
    }
}

fn zero_const(ty: &Type, module: &mut ModuleView<'_>) -> crate::value::ConstId {
    module.constants.intern(Constant::Integer(0, ty.clone()))
}

enum Rewrite {
    /// Replace the instruction's result with an existing operand value.
    Identity(ValueId),
    /// Replace the instruction's result with a freshly interned zero.
    Zero,
}

fn classify(opcode: &Opcode, ty: &Type, module: &ModuleView<'_>) -> Option<Rewrite> {
    match opcode {
        Opcode::Binary { op: BinOp::Add, lhs, rhs } if is_int_literal(*rhs, 0, module) => Some(Rewrite::Identity(*lhs)),
        Opcode::Binary { op: BinOp::Add, lhs, rhs } if is_int_literal(*lhs, 0, module) => Some(Rewrite::Identity(*rhs)),
        Opcode::Binary { op: BinOp::Mul, lhs, rhs } if ty.is_integer() && is_int_literal(*rhs, 1, module) => Some(Rewrite::Identity(*lhs)),
        Opcode::Binary { op: BinOp::Mul, lhs, rhs } if ty.is_integer() && is_int_literal(*lhs, 1, module) => Some(Rewrite::Identity(*rhs)),
        Opcode::Binary { op: BinOp::Mul, rhs, .. } if ty.is_integer() && is_int_literal(*rhs, 0, module) => Some(Rewrite::Zero),
        Opcode::Binary { op: BinOp::Mul, lhs, .. } if ty.is_integer() && is_int_literal(*lhs, 0, module) => Some(Rewrite::Zero),
        Opcode::Binary { op: BinOp::Sub, lhs, rhs } if lhs == rhs => Some(Rewrite::Zero),
        Opcode::Binary { op: BinOp::And, lhs, rhs } if lhs == rhs => Some(Rewrite::Identity(*lhs)),
        Opcode::Binary { op: BinOp::Or, lhs, rhs } if lhs == rhs => Some(Rewrite::Identity(*lhs)),
        Opcode::Binary { op: BinOp::Xor, lhs, rhs } if lhs == rhs => Some(Rewrite::Zero),
        Opcode::Binary { op: BinOp::Shl, lhs, rhs } if is_int_literal(*rhs, 0, module) => Some(Rewrite::Identity(*lhs)),
        _ => None,
    }
}

/// `!(!x) -> x` needs to look at the producing instruction, not just the
/// operand value, so it's handled separately from `classify`'s purely
/// value-shaped rewrites.
fn double_negation(func: &Function, opcode: &Opcode) -> Option<ValueId> {
    let Opcode::Unary { op: UnOp::Not, operand: ValueId::Inst(inner_id) } = opcode else { return None };
    let inner = func.inst(*inner_id)?;
    if let Opcode::Unary { op: UnOp::Not, operand } = inner.opcode.clone() {
        Some(operand)
    } else {
        None
    }
}

impl FunctionPass for AlgebraicSimplification {
    fn run_on_function(&mut self, func: &mut Function, module: &mut ModuleView<'_>) -> PassResult<Success> {
        let candidates: Vec<InstId> = func
            .insts()
            .filter(|inst| inst.opcode.is_pure() && !inst.opcode.may_have_side_effects())
            .map(|inst| inst.id)
            .collect();

        let mut modified = false;
        for id in candidates {
            let Some(inst) = func.inst(id) else { continue };
            let ty = inst.ty.clone();
            let opcode = inst.opcode.clone();

            let replacement = if let Some(v) = double_negation(func, &opcode) {
                Some(v)
            } else {
                match classify(&opcode, &ty, module) {
                    Some(Rewrite::Identity(v)) => Some(v),
                    Some(Rewrite::Zero) => Some(ValueId::Const(zero_const(&ty, module))),
                    None => None,
                }
            };

            if let Some(value) = replacement {
                func.replace_all_uses_with(ValueId::Inst(id), value);
                func.remove_instruction(id);
                modified = true;
            }
        }

        Ok(if modified { Success::changed() } else { Success::unchanged() })
    }
}
