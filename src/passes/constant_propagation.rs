//! Sparse conditional constant propagation over SSA values (§4.8): a
//! worklist dataflow with lattice `Top ⊑ Const(c) ⊑ Bottom`, PHI merges
//! taking the meet of their incoming lattice values. Has no direct teacher
//! counterpart (the teacher's `optimizer.rs` only folds syntactically
//! adjacent constant operands); grounded on the same `passes::eval::fold`
//! evaluator `ConstantFolding` uses, generalized to values that become
//! constant only after a PHI or another propagated operand resolves.

use std::collections::HashMap;

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::Opcode;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::{Constant, InstId, ValueId};

use super::eval::fold;

#[derive(Debug, Clone, PartialEq)]
enum Lattice {
    Top,
    Const(Constant),
    Bottom,
}

fn meet(a: &Lattice, b: &Lattice) -> Lattice {
    match (a, b) {
        (Lattice::Top, other) | (other, Lattice::Top) => other.clone(),
        (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
        (Lattice::Const(x), Lattice::Const(y)) => {
            if x.structurally_eq(y) {
                Lattice::Const(x.clone())
            } else {
                Lattice::Bottom
            }
        }
    }
}

pub struct ConstantPropagation;

impl ConstantPropagation {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConstantPropagation {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for ConstantPropagation {
    fn name(&self) -> &str {
        "constant_propagation"
    }
}

impl FunctionPass for ConstantPropagation {
    fn run_on_function(&mut self, func: &mut Function, module: &mut ModuleView<'_>) -> PassResult<Success> {
        let all_insts: Vec<InstId> = func.insts().map(|i| i.id).collect();
        let mut lattice: HashMap<InstId, Lattice> = all_insts.iter().map(|id| (*id, Lattice::Top)).collect();

        let resolve_const = |v: ValueId, lattice: &HashMap<InstId, Lattice>| -> Option<Constant> {
            match v {
                ValueId::Const(c) => module.constants.get(c).cloned(),
                ValueId::Inst(id) => match lattice.get(&id) {
                    Some(Lattice::Const(c)) => Some(c.clone()),
                    _ => None,
                },
                _ => None,
            }
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &id in &all_insts {
                let Some(inst) = func.inst(id) else { continue };
                if lattice.get(&id) == Some(&Lattice::Bottom) {
                    continue;
                }

                let new_value = if let Opcode::Phi(incoming) = &inst.opcode {
                    incoming
                        .iter()
                        .map(|(v, _)| match v {
                            ValueId::Const(c) => module.constants.get(*c).cloned().map(Lattice::Const).unwrap_or(Lattice::Top),
                            ValueId::Inst(other) => lattice.get(other).cloned().unwrap_or(Lattice::Top),
                            _ => Lattice::Bottom,
                        })
                        .fold(Lattice::Top, |acc, v| meet(&acc, &v))
                } else if inst.opcode.is_pure() {
                    match fold(&inst.opcode, &inst.ty, |v| resolve_const(v, &lattice)) {
                        Some(c) => Lattice::Const(c),
                        None => {
                            let any_bottom = inst.opcode.operands().iter().any(|op| match op {
                                ValueId::Inst(other) => lattice.get(other) == Some(&Lattice::Bottom),
                                _ => false,
                            });
                            if any_bottom {
                                Lattice::Bottom
                            } else {
                                lattice.get(&id).cloned().unwrap_or(Lattice::Top)
                            }
                        }
                    }
                } else {
                    Lattice::Bottom
                };

                if lattice.get(&id) != Some(&new_value) {
                    lattice.insert(id, new_value);
                    changed = true;
                }
            }
        }

        let mut modified = false;
        for (id, value) in lattice {
            if let Lattice::Const(c) = value {
                let Some(inst) = func.inst(id) else { continue };
                if matches!(inst.opcode, Opcode::Phi(_)) && func.block(inst.block).map(|b| b.preds.len()).unwrap_or(0) < 2 {
                    continue;
                }
                let const_id = module.constants.intern(c);
                func.replace_all_uses_with(ValueId::Inst(id), ValueId::Const(const_id));
                if !func.has_users(ValueId::Inst(id)) {
                    func.remove_instruction(id);
                }
                modified = true;
            }
        }

        Ok(if modified { Success::changed() } else { Success::unchanged() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IRBuilder;
    use crate::module::Module;
    use crate::opcode::{BinOp, CmpOp};
    use crate::types::Type;
    use crate::value::ValueId;

    #[test]
    fn propagates_through_a_phi_when_both_arms_agree() {
        let mut module = Module::new("m");
        let c5 = module.intern_constant(Constant::Integer(5, Type::I32));
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let then_blk = func.create_block("then");
        let else_blk = func.create_block("else");
        let merge = func.create_block("merge");
        let x = func.add_param(Type::Bool, None);

        let mut b = IRBuilder::new(&mut func, entry);
        b.br_cond(ValueId::Arg(x), then_blk, else_blk).unwrap();
        b.position_at_end(then_blk);
        b.br(merge).unwrap();
        b.position_at_end(else_blk);
        b.br(merge).unwrap();
        b.position_at_end(merge);
        let phi = b.phi(Type::I32).unwrap();
        b.function_mut().set_phi_incoming(phi, vec![(ValueId::Const(c5), then_blk), (ValueId::Const(c5), else_blk)]);
        b.ret(Some(ValueId::Inst(phi))).unwrap();

        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = ConstantPropagation::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);
        let ret = func.terminator(merge).unwrap();
        assert_eq!(ret.opcode.operands(), vec![ValueId::Const(c5)]);
    }

    #[test]
    fn does_not_propagate_when_phi_arms_disagree() {
        let mut module = Module::new("m");
        let c5 = module.intern_constant(Constant::Integer(5, Type::I32));
        let c6 = module.intern_constant(Constant::Integer(6, Type::I32));
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let then_blk = func.create_block("then");
        let else_blk = func.create_block("else");
        let merge = func.create_block("merge");
        let x = func.add_param(Type::Bool, None);

        let mut b = IRBuilder::new(&mut func, entry);
        b.br_cond(ValueId::Arg(x), then_blk, else_blk).unwrap();
        b.position_at_end(then_blk);
        b.br(merge).unwrap();
        b.position_at_end(else_blk);
        b.br(merge).unwrap();
        b.position_at_end(merge);
        let phi = b.phi(Type::I32).unwrap();
        b.function_mut().set_phi_incoming(phi, vec![(ValueId::Const(c5), then_blk), (ValueId::Const(c6), else_blk)]);
        let add = b.binary(BinOp::Add, ValueId::Inst(phi), ValueId::Const(c5), Type::I32).unwrap();
        b.ret(Some(ValueId::Inst(add))).unwrap();

        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = ConstantPropagation::new();
        pass.run_on_function(func, &mut view).unwrap();
        let add_inst = func.inst(add).unwrap();
        assert_eq!(add_inst.opcode.operands()[0], ValueId::Inst(phi));
        let _ = CmpOp::Eq;
    }
}
