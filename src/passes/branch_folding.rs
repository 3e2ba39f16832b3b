//! Rewrites a conditional branch whose condition is a known constant, or
//! whose two successors are actually the same block, into an unconditional
//! `br` (§4.8). No direct teacher counterpart — `optimizer.rs` never
//! touches terminators — so this is grounded on the CFG-edge bookkeeping
//! `function.rs::set_operand` already performs (rewiring predecessors when
//! a terminator's branch targets change), reused here by simply replacing
//! the whole terminator instruction.

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::Opcode;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::{BlockId, Constant, ValueId};

pub struct BranchFolding;

impl BranchFolding {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BranchFolding {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for BranchFolding {
    fn name(&self) -> &str {
        "branch_folding"
    }

    fn invalidates(&self) -> &[&'static str] {
        &["dominance", "loops"]
    }
}

fn const_bool(v: ValueId, module: &ModuleView<'_>) -> Option<bool> {
    match v {
        ValueId::Const(c) => module.constants.get(c).and_then(Constant::as_bool),
        _ => None,
    }
}

fn const_i64(v: ValueId, module: &ModuleView<'_>) -> Option<i64> {
    match v {
        ValueId::Const(c) => module.constants.get(c).and_then(Constant::as_i64),
        _ => None,
    }
}

/// The target a terminator would be replaced with, if it can be folded.
fn folded_target(opcode: &Opcode, module: &ModuleView<'_>) -> Option<BlockId> {
    match opcode {
        Opcode::BrCond { cond, then_block, else_block } => {
            if then_block == else_block {
                return Some(*then_block);
            }
            const_bool(*cond, module).map(|c| if c { *then_block } else { *else_block })
        }
        Opcode::BrCmp { cmp, lhs, rhs, then_block, else_block } => {
            if then_block == else_block {
                return Some(*then_block);
            }
            let (l, r) = (const_i64(*lhs, module)?, const_i64(*rhs, module)?);
            let taken = match cmp {
                crate::opcode::CmpOp::Lt => l < r,
                crate::opcode::CmpOp::Le => l <= r,
                crate::opcode::CmpOp::Gt => l > r,
                crate::opcode::CmpOp::Ge => l >= r,
                crate::opcode::CmpOp::Eq => l == r,
                crate::opcode::CmpOp::Ne => l != r,
                _ => return None,
            };
            Some(if taken { *then_block } else { *else_block })
        }
        _ => None,
    }
}

impl FunctionPass for BranchFolding {
    fn run_on_function(&mut self, func: &mut Function, module: &mut ModuleView<'_>) -> PassResult<Success> {
        let blocks: Vec<BlockId> = func.block_ids().collect();
        let mut modified = false;

        for block in blocks {
            let Some(term) = func.terminator(block) else { continue };
            let Some(target) = folded_target(&term.opcode, module) else { continue };

            func.remove_terminator(block);
            func.push_instruction(block, Opcode::Br(target), crate::types::Type::Void, None);
            modified = true;
        }

        Ok(if modified { Success::changed() } else { Success::unchanged() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IRBuilder;
    use crate::module::Module;
    use crate::types::Type;

    #[test]
    fn constant_condition_folds_to_unconditional_branch() {
        let mut module = Module::new("m");
        let one = module.intern_constant(Constant::True);
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let a = func.create_block("a");
        let b = func.create_block("b");
        let mut builder = IRBuilder::new(&mut func, entry);
        builder.br_cond(ValueId::Const(one), a, b).unwrap();
        builder.position_at_end(a);
        builder.ret(None).unwrap();
        builder.position_at_end(b);
        builder.ret(None).unwrap();
        module.add_function(func);

        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = BranchFolding::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.successors(entry), vec![a]);
        assert!(func.predecessors(b).is_empty());
    }

    #[test]
    fn identical_successors_fold_regardless_of_condition() {
        let mut module = Module::new("m");
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let join = func.create_block("join");
        let x = func.add_param(Type::Bool, None);
        let mut builder = IRBuilder::new(&mut func, entry);
        builder.br_cond(ValueId::Arg(x), join, join).unwrap();
        builder.position_at_end(join);
        builder.ret(None).unwrap();
        module.add_function(func);

        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = BranchFolding::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.successors(entry), vec![join]);
    }
}
