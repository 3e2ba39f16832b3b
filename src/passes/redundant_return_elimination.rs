//! Redundant return elimination (§4.8): when two or more blocks are nothing
//! but an equivalent `ret` — same operand, or both `ret void` — and one of
//! them has a single predecessor reached by a plain `br`, that predecessor
//! is retargeted at a single canonical tail and the now-unreachable
//! duplicate is dropped. Grounded on `branch_folding.rs`'s
//! `remove_terminator` + `push_instruction` retarget idiom, generalized from
//! rewriting one terminator in place to redirecting an edge at another
//! block entirely.
//!
//! Only `ret` operands that are valid from anywhere in the function —
//! `None`, a constant, a global, or an argument, never another instruction's
//! result — are grouped; an instruction operand's validity depends on
//! dominance at the specific call site, which this pass doesn't check, so
//! two such blocks are left alone even if they happen to return the same
//! `InstId`. Only single-predecessor duplicates are folded away, per the
//! source behavior this mirrors: a tail already shared by more than one
//! predecessor is left as is rather than rewiring every one of its edges.

use std::collections::HashMap;

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::Opcode;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::types::Type;
use crate::value::{BlockId, ValueId};

pub struct RedundantReturnElimination;

impl RedundantReturnElimination {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RedundantReturnElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for RedundantReturnElimination {
    fn name(&self) -> &str {
        "redundant_return_elimination"
    }

    fn invalidates(&self) -> &[&'static str] {
        &["dominance", "loops"]
    }
}

/// A return value usable from anywhere in the function, keyed for grouping.
/// `None` covers `ret void`; `Inst` operands are deliberately excluded.
fn portable_return_key(value: Option<ValueId>) -> Option<Option<ValueId>> {
    match value {
        None => Some(None),
        Some(ValueId::Inst(_)) => None,
        Some(v) => Some(Some(v)),
    }
}

/// Whether `block` is nothing but a `ret` terminator, and if so, its
/// grouping key.
fn trivial_return_key(func: &Function, block: BlockId) -> Option<Option<ValueId>> {
    let b = func.block(block)?;
    if b.insts.len() != 1 {
        return None;
    }
    let inst = func.inst(b.insts[0])?;
    match &inst.opcode {
        Opcode::Ret(v) => portable_return_key(*v),
        _ => None,
    }
}

impl FunctionPass for RedundantReturnElimination {
    fn run_on_function(&mut self, func: &mut Function, _module: &mut ModuleView<'_>) -> PassResult<Success> {
        let mut groups: HashMap<Option<ValueId>, Vec<BlockId>> = HashMap::new();
        for block in func.block_ids() {
            if let Some(key) = trivial_return_key(func, block) {
                groups.entry(key).or_default().push(block);
            }
        }

        let mut modified = false;
        for (_, mut members) in groups {
            if members.len() < 2 {
                continue;
            }
            members.sort_by_key(|b| (std::cmp::Reverse(func.predecessors(*b).len()), b.0));
            let canonical = members[0];

            for &dup in &members[1..] {
                let preds = func.predecessors(dup);
                if preds.len() != 1 {
                    continue;
                }
                let pred = preds[0];
                let Some(term) = func.terminator(pred) else { continue };
                if !matches!(&term.opcode, Opcode::Br(target) if *target == dup) {
                    continue;
                }
                func.remove_terminator(pred);
                func.push_instruction(pred, Opcode::Br(canonical), Type::Void, None);
                func.remove_block(dup);
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
    use crate::value::ValueId;

    #[test]
    fn merges_two_single_predecessor_void_return_tails() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let left = func.create_block("left");
        let right = func.create_block("right");
        let tail_a = func.create_block("tail_a");
        let tail_b = func.create_block("tail_b");
        let cond = func.add_param(Type::Bool, None);

        let mut b = IRBuilder::new(&mut func, entry);
        b.br_cond(ValueId::Arg(cond), left, right).unwrap();
        b.position_at_end(left);
        b.br(tail_a).unwrap();
        b.position_at_end(right);
        b.br(tail_b).unwrap();
        b.position_at_end(tail_a);
        b.ret(None).unwrap();
        b.position_at_end(tail_b);
        b.ret(None).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = RedundantReturnElimination::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.block_ids().count(), 4);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn leaves_a_shared_tail_with_multiple_predecessors_alone() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let left = func.create_block("left");
        let right = func.create_block("right");
        let tail = func.create_block("tail");
        let cond = func.add_param(Type::Bool, None);

        let mut b = IRBuilder::new(&mut func, entry);
        b.br_cond(ValueId::Arg(cond), left, right).unwrap();
        b.position_at_end(left);
        b.br(tail).unwrap();
        b.position_at_end(right);
        b.br(tail).unwrap();
        b.position_at_end(tail);
        b.ret(None).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = RedundantReturnElimination::new();
        assert!(!pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.block_ids().count(), 4);
    }

    #[test]
    fn does_not_group_returns_of_an_instruction_result() {
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let left = func.create_block("left");
        let right = func.create_block("right");
        let tail_a = func.create_block("tail_a");
        let tail_b = func.create_block("tail_b");
        let a = func.add_param(Type::I32, None);
        let b_arg = func.add_param(Type::I32, None);
        let cond = func.add_param(Type::Bool, None);

        let mut b = IRBuilder::new(&mut func, entry);
        b.br_cond(ValueId::Arg(cond), left, right).unwrap();
        b.position_at_end(left);
        b.br(tail_a).unwrap();
        b.position_at_end(right);
        b.br(tail_b).unwrap();
        b.position_at_end(tail_a);
        let v1 = b.binary(crate::opcode::BinOp::Add, ValueId::Arg(a), ValueId::Arg(b_arg), Type::I32).unwrap();
        b.ret(Some(ValueId::Inst(v1))).unwrap();
        b.position_at_end(tail_b);
        let v2 = b.binary(crate::opcode::BinOp::Add, ValueId::Arg(a), ValueId::Arg(b_arg), Type::I32).unwrap();
        b.ret(Some(ValueId::Inst(v2))).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = RedundantReturnElimination::new();
        assert!(!pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.block_ids().count(), 5);
    }
}
