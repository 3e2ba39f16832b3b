//! CFG cleanup (§4.8): drops blocks unreachable from entry, and merges a
//! block into its sole predecessor when that predecessor's terminator is an
//! unconditional `br` to it and it has no other predecessor. No teacher
//! counterpart (`cfg_builder.rs` only ever builds a CFG, never rewrites
//! one); grounded on the `Function::remove_terminator`/
//! `merge_block_into_predecessor` primitives added to this crate's own
//! `function.rs` specifically to support this pass.

use std::collections::HashSet;

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::Opcode;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::BlockId;

pub struct SimplifyCfg;

impl SimplifyCfg {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SimplifyCfg {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for SimplifyCfg {
    fn name(&self) -> &str {
        "simplify_cfg"
    }

    fn invalidates(&self) -> &[&'static str] {
        &["dominance", "loops"]
    }
}

fn reachable_from_entry(func: &Function) -> HashSet<BlockId> {
    let Some(entry) = func.entry else { return HashSet::new() };
    let mut seen = HashSet::from([entry]);
    let mut worklist = vec![entry];
    while let Some(b) = worklist.pop() {
        for succ in func.successors(b) {
            if seen.insert(succ) {
                worklist.push(succ);
            }
        }
    }
    seen
}

/// A block is mergeable into its predecessor when: it has exactly one
/// predecessor, that predecessor's terminator is an unconditional `br` to
/// it, it isn't the entry block's own predecessor relationship inverted
/// (merging never targets the entry block away), and it holds no PHI (a
/// PHI with a single incoming edge is trivial and would need resolving
/// first — left to `RedundantCopyElimination`/future PHI-removal rather
/// than duplicated here).
fn mergeable_pair(func: &Function, block: BlockId) -> Option<(BlockId, BlockId)> {
    let preds = func.predecessors(block);
    if preds.len() != 1 {
        return None;
    }
    let pred = preds[0];
    if pred == block {
        return None;
    }
    let pred_term = func.terminator(pred)?;
    if !matches!(&pred_term.opcode, Opcode::Br(target) if *target == block) {
        return None;
    }
    let has_phi = func.block(block)?.insts.iter().any(|id| matches!(func.inst(*id).map(|i| &i.opcode), Some(Opcode::Phi(_))));
    if has_phi {
        return None;
    }
    Some((block, pred))
}

impl FunctionPass for SimplifyCfg {
    fn run_on_function(&mut self, func: &mut Function, _module: &mut ModuleView<'_>) -> PassResult<Success> {
        let mut modified = false;

        let reachable = reachable_from_entry(func);
        let unreachable: Vec<BlockId> = func.block_ids().filter(|b| !reachable.contains(b)).collect();
        if !unreachable.is_empty() {
            for block in unreachable {
                func.remove_block(block);
            }
            func.recompute_predecessors();
            modified = true;
        }

        loop {
            let candidate = func.block_ids().find_map(|b| mergeable_pair(func, b));
            let Some((from, into)) = candidate else { break };
            func.merge_block_into_predecessor(from, into);
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
    use crate::value::ValueId;

    #[test]
    fn drops_a_block_unreachable_from_entry() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let dead = func.create_block("dead");
        let mut b = IRBuilder::new(&mut func, entry);
        b.ret(None).unwrap();
        b.position_at_end(dead);
        b.ret(None).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = SimplifyCfg::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);
        assert!(func.block(dead).is_none());
    }

    #[test]
    fn merges_a_block_with_a_single_unconditional_predecessor() {
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let next = func.create_block("next");
        let x = func.add_param(Type::I32, None);
        let mut b = IRBuilder::new(&mut func, entry);
        b.br(next).unwrap();
        b.position_at_end(next);
        b.ret(Some(ValueId::Arg(x))).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = SimplifyCfg::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.block_ids().count(), 1);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn does_not_collapse_a_merge_block_that_holds_a_phi() {
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let then_blk = func.create_block("then");
        let else_blk = func.create_block("else");
        let merge = func.create_block("merge");
        let a = func.add_param(Type::I32, None);
        let b_arg = func.add_param(Type::I32, None);
        let mut b = IRBuilder::new(&mut func, entry);
        let cmp = b.compare(crate::opcode::CmpOp::Gt, ValueId::Arg(a), ValueId::Arg(b_arg)).unwrap();
        b.br_cond(ValueId::Inst(cmp), then_blk, else_blk).unwrap();
        b.position_at_end(then_blk);
        b.br(merge).unwrap();
        b.position_at_end(else_blk);
        b.br(merge).unwrap();
        b.position_at_end(merge);
        let phi = b.phi(Type::I32).unwrap();
        b.function_mut().set_phi_incoming(phi, vec![(ValueId::Arg(a), then_blk), (ValueId::Arg(b_arg), else_blk)]);
        b.ret(Some(ValueId::Inst(phi))).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = SimplifyCfg::new();
        assert!(!pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.block_ids().count(), 4);
    }
}
