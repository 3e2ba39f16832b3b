//! Resolves `copy` chains to their underlying root value (§4.8): a
//! `copy`'s result is only ever a stand-in name for whatever it copies, so
//! every use of it is rewritten to the chain's root and the copy erased.
//! Grounded on the teacher's `optimizer.rs::eliminate_redundant_moves`
//! (which only handled the `mov %r -> %r` self-move case); generalized to
//! the full transitive-chain and already-constant cases §4.8 names.

use std::collections::HashSet;

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::Opcode;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::{InstId, ValueId};

pub struct RedundantCopyElimination;

impl RedundantCopyElimination {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RedundantCopyElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for RedundantCopyElimination {
    fn name(&self) -> &str {
        "redundant_copy_elimination"
    }
}

/// Walks a `copy` chain starting at `start` to its root: the first value
/// that either isn't an instruction, or is an instruction whose opcode
/// isn't `copy`. Stops early (returning the last value seen) if it revisits
/// a value, which only happens for a self-referential copy (`a = copy a`)
/// or a copy cycle formed through a reducible PHI loop.
fn resolve_root(func: &Function, start: ValueId) -> ValueId {
    let mut current = start;
    let mut seen = HashSet::new();
    loop {
        if !seen.insert(current) {
            return current;
        }
        let ValueId::Inst(id) = current else { return current };
        let Some(inst) = func.inst(id) else { return current };
        let Opcode::Copy(inner) = &inst.opcode else { return current };
        current = *inner;
    }
}

impl FunctionPass for RedundantCopyElimination {
    fn run_on_function(&mut self, func: &mut Function, _module: &mut ModuleView<'_>) -> PassResult<Success> {
        let copies: Vec<InstId> = func
            .insts()
            .filter(|inst| matches!(inst.opcode, Opcode::Copy(_)))
            .map(|inst| inst.id)
            .collect();

        let mut modified = false;
        for id in copies {
            let Some(inst) = func.inst(id) else { continue };
            let Opcode::Copy(operand) = inst.opcode.clone() else { continue };
            let root = resolve_root(func, operand);
            let self_value = ValueId::Inst(id);
            if root == self_value {
                continue;
            }
            func.replace_all_uses_with(self_value, root);
            if !func.has_users(self_value) {
                func.remove_instruction(id);
            }
            modified = true;
        }

        Ok(if modified { Success::changed() } else { Success::unchanged() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use crate::opcode::{BinOp, Opcode};
    use crate::types::Type;
    use crate::value::{ConstId, ValueId};

    #[test]
    fn resolves_a_copy_chain_to_its_constant_root() {
        let mut module = Module::new("m");
        let c2 = module.intern_constant(crate::value::Constant::Integer(2, Type::I32));
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let acc = func.push_instruction(entry, Opcode::Copy(ValueId::Const(c2)), Type::I32, None);
        let v0 = func.push_instruction(entry, Opcode::Copy(ValueId::Inst(acc)), Type::I32, None);
        let r = func.push_instruction(entry, Opcode::Binary { op: BinOp::Add, lhs: ValueId::Inst(v0), rhs: ValueId::Const(ConstId(0)) }, Type::I32, None);
        func.push_instruction(entry, Opcode::Ret(Some(ValueId::Inst(r))), Type::Void, None);
        module.add_function(func);

        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = RedundantCopyElimination::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);
        let r_inst = func.inst(r).unwrap();
        assert_eq!(r_inst.opcode.operands()[0], ValueId::Const(c2));
        assert!(func.inst(acc).is_none());
        assert!(func.inst(v0).is_none());
    }

    #[test]
    fn leaves_a_self_referential_copy_alone() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let id = func.push_instruction(entry, Opcode::Nop, Type::I32, None);
        func.inst_mut(id).unwrap().opcode = Opcode::Copy(ValueId::Inst(id));
        func.push_instruction(entry, Opcode::Ret(None), Type::Void, None);

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = RedundantCopyElimination::new();
        assert!(!pass.run_on_function(func, &mut view).unwrap().modified);
    }
}
