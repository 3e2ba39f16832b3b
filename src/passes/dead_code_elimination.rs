//! The conservative sibling of `AggressiveDeadCodeElimination`: removes only
//! instructions that are unused *right now*, in a single sweep, with no
//! transitive follow-up and no `FixedPoint` wrapper in the pipeline.
//! Grounded the same way as ADCE on `optimizer.rs::dead_code_elimination`;
//! kept as a separate, non-iterating transform per §4.8 since callers that
//! want a bounded single pass (rather than ADCE's run-to-convergence cost)
//! have a named option.

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::pass::{FunctionPass, PassMeta, Success};

pub struct DeadCodeElimination;

impl DeadCodeElimination {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeadCodeElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for DeadCodeElimination {
    fn name(&self) -> &str {
        "dead_code_elimination"
    }
}

impl FunctionPass for DeadCodeElimination {
    fn run_on_function(&mut self, func: &mut Function, _module: &mut ModuleView<'_>) -> PassResult<Success> {
        let dead: Vec<_> = func
            .insts()
            .filter(|inst| inst.opcode.is_pure() && !func.has_users(inst.result()))
            .map(|inst| inst.id)
            .collect();

        if dead.is_empty() {
            return Ok(Success::unchanged());
        }
        let count = dead.len();
        for id in dead {
            func.remove_instruction(id);
        }
        Ok(Success::changed_with(format!("removed {count} unused instruction(s)")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use crate::opcode::Opcode;
    use crate::types::Type;
    use crate::value::ValueId;

    #[test]
    fn single_sweep_does_not_chase_transitive_garbage() {
        let mut module = Module::new("m");
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let x = func.add_param(Type::I32, None);
        let unused_copy = func.push_instruction(entry, Opcode::Copy(ValueId::Arg(x)), Type::I32, None);
        func.push_instruction(entry, Opcode::Copy(ValueId::Inst(unused_copy)), Type::I32, None);
        func.push_instruction(entry, Opcode::Ret(Some(ValueId::Arg(x))), Type::Void, None);
        module.add_function(func);

        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = DeadCodeElimination::new();
        let result = pass.run_on_function(func, &mut view).unwrap();
        assert!(result.modified);
        // only the outer copy (no users at all) is removed this sweep; the
        // inner one it used to depend on survives until another sweep runs.
        assert_eq!(func.insts().count(), 2);
    }
}
