//! Evaluates pure instructions whose operands are all constants, replacing
//! them with the computed constant (§4.8). Grounded on the teacher's
//! `optimizer.rs::constant_folding`; generalized from "binary integer/float
//! only" to every pure opcode `passes::eval::fold` knows how to evaluate,
//! and from "replace with a `Move`" (the teacher has no constant pool) to
//! interning the result in the module and rewiring uses directly.

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::{InstId, ValueId};

use super::eval::fold;

pub struct ConstantFolding;

impl ConstantFolding {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConstantFolding {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for ConstantFolding {
    fn name(&self) -> &str {
        "constant_folding"
    }
}

impl FunctionPass for ConstantFolding {
    fn run_on_function(&mut self, func: &mut Function, module: &mut ModuleView<'_>) -> PassResult<Success> {
        let candidates: Vec<InstId> = func.insts().filter(|inst| inst.opcode.is_pure()).map(|inst| inst.id).collect();

        let mut modified = false;
        for id in candidates {
            let Some(inst) = func.inst(id) else { continue };
            let resolve = |v: ValueId| match v {
                ValueId::Const(c) => module.constants.get(c).cloned(),
                _ => None,
            };
            let Some(folded) = fold(&inst.opcode, &inst.ty, resolve) else { continue };
            let const_id = module.constants.intern(folded);
            func.replace_all_uses_with(ValueId::Inst(id), ValueId::Const(const_id));
            func.remove_instruction(id);
            modified = true;
        }

        Ok(if modified { Success::changed() } else { Success::unchanged() })
    }
}
