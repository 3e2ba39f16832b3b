//! Compound assignment recognition (§4.8): flags a `t = op(v, c)` instruction
//! whose result becomes the next value bound to the same vreg `v` was read
//! from as `v op= c` for the pretty-printer, without rewriting the IR itself
//! — the opcode stays an ordinary `Binary`. Runs before `VariableReconstruction`,
//! so it reads the register-provenance names the converter stamped on every
//! instruction and argument (`"r<n>"` for vreg `n`) rather than source-like
//! names; `VariableReconstruction` later overwrites `Instruction::name` with
//! nicer names but leaves this pass's side-table annotation untouched.
//!
//! The source-bytecode pattern this mirrors is `t = op(v, c); copy_to_vreg(t)
//! of v's vreg`, guarded by "no intervening use of `t` outside the pattern".
//! On the SSA rendering here that guard is vacuous: there is no separate
//! `copy_to_vreg` instruction left to intervene on — `t` simply *is* the
//! vreg's next value, and every later read of it is a legitimate read of the
//! reassigned variable, not a competing use.

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::Opcode;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::{InstId, ValueId};

pub struct CompoundAssignment;

impl CompoundAssignment {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CompoundAssignment {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for CompoundAssignment {
    fn name(&self) -> &str {
        "compound_assignment"
    }
}

/// The register-provenance name bound to `value`, if any: an instruction's
/// or argument's own `name`.
fn provenance_name(func: &Function, value: ValueId) -> Option<String> {
    match value {
        ValueId::Inst(id) => func.inst(id).and_then(|i| i.name.clone()),
        ValueId::Arg(i) => func.params.get(i as usize).and_then(|p| p.name.clone()),
        _ => None,
    }
}

impl FunctionPass for CompoundAssignment {
    fn run_on_function(&mut self, func: &mut Function, _module: &mut ModuleView<'_>) -> PassResult<Success> {
        let mut modified = false;
        let ids: Vec<InstId> = func.insts().map(|i| i.id).collect();

        for id in ids {
            let Some(inst) = func.inst(id) else { continue };
            let Opcode::Binary { op, lhs, rhs } = inst.opcode.clone() else { continue };
            let Some(name) = inst.name.clone() else { continue };

            let lhs_matches = provenance_name(func, lhs).as_deref() == Some(name.as_str());
            let rhs_matches = provenance_name(func, rhs).as_deref() == Some(name.as_str());

            // Exactly one side must carry the vreg's previous value: if
            // neither does this is an ordinary binary op; if both do (e.g.
            // `v = v + v`), there is no single "other operand" `c` to report.
            if lhs_matches != rhs_matches {
                func.mark_compound_assignment(id, op);
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
    use crate::opcode::BinOp;
    use crate::types::Type;
    use crate::value::ValueId;

    #[test]
    fn flags_a_vreg_add_assign_pattern() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let v = func.add_param(Type::I32, Some("r0".into()));
        let c = func.add_param(Type::I32, None);
        let mut b = IRBuilder::new(&mut func, entry);
        let sum = b.binary(BinOp::Add, ValueId::Arg(v), ValueId::Arg(c), Type::I32).unwrap();
        b.function_mut().inst_mut(sum).unwrap().name = Some("r0".into());
        b.ret(Some(ValueId::Inst(sum))).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = CompoundAssignment::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.compound_assignment(sum), Some(BinOp::Add));
    }

    #[test]
    fn does_not_flag_an_ordinary_binary_op_between_two_different_variables() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let a = func.add_param(Type::I32, Some("r0".into()));
        let b_arg = func.add_param(Type::I32, Some("r1".into()));
        let mut b = IRBuilder::new(&mut func, entry);
        let sum = b.binary(BinOp::Add, ValueId::Arg(a), ValueId::Arg(b_arg), Type::I32).unwrap();
        b.function_mut().inst_mut(sum).unwrap().name = Some("r2".into());
        b.ret(Some(ValueId::Inst(sum))).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = CompoundAssignment::new();
        assert!(!pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.compound_assignment(sum), None);
    }

    #[test]
    fn does_not_flag_when_the_result_carries_no_provenance_name() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let v = func.add_param(Type::I32, Some("r0".into()));
        let c = func.add_param(Type::I32, None);
        let mut b = IRBuilder::new(&mut func, entry);
        let sum = b.binary(BinOp::Add, ValueId::Arg(v), ValueId::Arg(c), Type::I32).unwrap();
        b.ret(Some(ValueId::Inst(sum))).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = CompoundAssignment::new();
        assert!(!pass.run_on_function(func, &mut view).unwrap().modified);
    }
}
