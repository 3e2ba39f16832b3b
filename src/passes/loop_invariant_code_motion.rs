//! Loop-invariant code motion (§4.8): hoists a pure instruction inside a
//! loop, all of whose operands are defined outside the loop (or are
//! themselves already-hoisted loop-invariant instructions), to the loop's
//! preheader — synthesizing one by splitting the unique predecessor edge
//! when the loop has no dedicated single-successor entry block of its own
//! (§4.8, §9 GLOSSARY "Pre-header"). Grounded on `dominance.rs::
//! {find_natural_loops, Loop::preheader_candidates}`; only fires when a loop
//! has exactly one preheader candidate, matching the spec's own "splitting
//! *the unique* predecessor edge" wording — a header reached from more than
//! one outside block is left for `SimplifyCFG`'s block-merge to simplify
//! into a single entry first.
//!
//! `get_property`/`get_element` reads are deliberately excluded unless the
//! caller opts in via `AnalysisFlags::assume_pure_property_access`: the
//! accumulator bytecode carries no alias information distinguishing a plain
//! field read from one that runs a getter with side effects, so hoisting
//! one past a loop that might rely on its being re-evaluated each iteration
//! would be unsound by default.

use std::collections::HashSet;

use crate::builder::IRBuilder;
use crate::dominance::{find_natural_loops, DominatorTree};
use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::Opcode;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::{BlockId, InstId, ValueId};

/// Returns a block with exactly one successor, `header`, for hoisted
/// instructions to land in: `pred` itself if it already qualifies (the
/// common case — a structured `while`/`for` lowers to exactly that), or
/// else a freshly created block spliced onto the `pred -> header` edge,
/// with `header`'s PHIs rewritten to treat the new block as their incoming
/// predecessor in `pred`'s place.
fn ensure_preheader(func: &mut Function, pred: BlockId, header: BlockId) -> BlockId {
    if func.successors(pred) == vec![header] {
        return pred;
    }

    let name = format!("{}.preheader", func.block(header).map(|b| b.name.clone()).unwrap_or_default());
    let new_block = func.create_block(name);

    let term_id = func.terminator(pred).expect("a preheader candidate is always terminated").id;
    let operand_count = func.inst(term_id).unwrap().opcode.operands().len();
    for idx in 0..operand_count {
        if func.inst(term_id).unwrap().opcode.operands()[idx] == ValueId::Block(header) {
            func.set_operand(term_id, idx, ValueId::Block(new_block));
        }
    }

    let phi_ids: Vec<InstId> = func
        .block(header)
        .map(|b| {
            b.insts
                .iter()
                .copied()
                .filter(|id| matches!(func.inst(*id).map(|i| &i.opcode), Some(Opcode::Phi(_))))
                .collect()
        })
        .unwrap_or_default();
    for phi_id in phi_ids {
        if let Some(Opcode::Phi(incoming)) = func.inst(phi_id).map(|i| i.opcode.clone()) {
            let rewritten: Vec<(ValueId, BlockId)> =
                incoming.into_iter().map(|(v, b)| if b == pred { (v, new_block) } else { (v, b) }).collect();
            func.set_phi_incoming(phi_id, rewritten);
        }
    }

    let mut builder = IRBuilder::new(func, new_block);
    builder.br(header).expect("a freshly created block cannot already be terminated");

    new_block
}

/// Opt-in flags narrowing what a pass may assume about the source program
/// beyond what the IR states structurally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisFlags {
    /// Treats `get_property`/`get_element` as pure and hoistable. Only sound
    /// when the source language has no observable-effect property getters.
    pub assume_pure_property_access: bool,
}

pub struct LoopInvariantCodeMotion {
    flags: AnalysisFlags,
}

impl LoopInvariantCodeMotion {
    pub fn new() -> Self {
        Self { flags: AnalysisFlags::default() }
    }

    pub fn with_flags(flags: AnalysisFlags) -> Self {
        Self { flags }
    }
}

impl Default for LoopInvariantCodeMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for LoopInvariantCodeMotion {
    fn name(&self) -> &str {
        "loop_invariant_code_motion"
    }

    fn requires(&self) -> &[&'static str] {
        &["dominance", "loops"]
    }

    fn invalidates(&self) -> &[&'static str] {
        &["loops"]
    }
}

/// Whether `opcode` is even eligible to be hoisted, independent of where its
/// operands come from: no side effects, and no throw unless it's a property/
/// element read explicitly allowed in by `flags`.
fn is_hoist_candidate(opcode: &Opcode, flags: &AnalysisFlags) -> bool {
    if opcode.is_terminator() || opcode.may_have_side_effects() || matches!(opcode, Opcode::Phi(_)) {
        return false;
    }
    match opcode {
        Opcode::GetProperty { .. } | Opcode::GetElement { .. } => flags.assume_pure_property_access,
        _ => !opcode.may_throw(),
    }
}

impl FunctionPass for LoopInvariantCodeMotion {
    fn run_on_function(&mut self, func: &mut Function, _module: &mut ModuleView<'_>) -> PassResult<Success> {
        let Some(doms) = DominatorTree::compute(func) else { return Ok(Success::unchanged()) };
        let loops = find_natural_loops(func, &doms);
        let mut modified = false;

        for lp in &loops {
            let candidates = lp.preheader_candidates(func);
            if candidates.len() != 1 {
                continue;
            }
            let preheader = ensure_preheader(func, candidates[0], lp.header);

            let mut invariant: HashSet<InstId> = HashSet::new();
            let mut order: Vec<BlockId> = lp.blocks.iter().copied().collect();
            order.sort_by_key(|b| b.0);

            loop {
                let mut grew = false;
                for &block in &order {
                    let Some(b) = func.block(block) else { continue };
                    for &id in &b.insts.clone() {
                        if invariant.contains(&id) {
                            continue;
                        }
                        let Some(inst) = func.inst(id) else { continue };
                        if !is_hoist_candidate(&inst.opcode, &self.flags) {
                            continue;
                        }
                        let all_outside = inst.opcode.operands().iter().all(|operand| match operand {
                            ValueId::Inst(oid) => {
                                let defined_in_loop = func.inst(*oid).map(|i| lp.blocks.contains(&i.block)).unwrap_or(false);
                                !defined_in_loop || invariant.contains(oid)
                            }
                            ValueId::Block(_) => false,
                            _ => true,
                        });
                        if all_outside {
                            invariant.insert(id);
                            grew = true;
                        }
                    }
                }
                if !grew {
                    break;
                }
            }

            if invariant.is_empty() {
                continue;
            }

            // Hoisting in ascending-id order preserves def-before-use among
            // the hoisted set: an instruction's operands are always built
            // before it, so a lower id never depends on a higher one.
            let mut to_move: Vec<InstId> = invariant.into_iter().collect();
            to_move.sort_by_key(|id| id.0);
            for id in to_move {
                func.move_instruction_before_terminator(id, preheader);
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
    fn hoists_a_pure_computation_over_loop_invariant_operands() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let header = func.create_block("header");
        let body = func.create_block("body");
        let exit = func.create_block("exit");
        let a = func.add_param(Type::I32, None);
        let b_arg = func.add_param(Type::I32, None);

        let mut b = IRBuilder::new(&mut func, entry);
        b.br(header).unwrap();
        b.position_at_end(header);
        let cmp = b.compare(CmpOp::Lt, ValueId::Arg(a), ValueId::Arg(b_arg)).unwrap();
        b.br_cond(ValueId::Inst(cmp), body, exit).unwrap();
        b.position_at_end(body);
        let invariant = b.binary(BinOp::Add, ValueId::Arg(a), ValueId::Arg(b_arg), Type::I32).unwrap();
        b.br(header).unwrap();
        b.position_at_end(exit);
        b.ret(None).unwrap();

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = LoopInvariantCodeMotion::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.inst(invariant).unwrap().block, entry);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn does_not_hoist_a_computation_that_depends_on_the_induction_variable() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let header = func.create_block("header");
        let body = func.create_block("body");
        let exit = func.create_block("exit");
        let limit = func.add_param(Type::I32, None);

        let mut b = IRBuilder::new(&mut func, entry);
        b.br(header).unwrap();
        b.position_at_end(header);
        let iv = b.phi(Type::I32).unwrap();
        let cmp = b.compare(CmpOp::Lt, ValueId::Inst(iv), ValueId::Arg(limit)).unwrap();
        b.br_cond(ValueId::Inst(cmp), body, exit).unwrap();
        b.position_at_end(body);
        let one = ValueId::Arg(limit);
        let next = b.binary(BinOp::Add, ValueId::Inst(iv), one, Type::I32).unwrap();
        b.br(header).unwrap();
        b.position_at_end(exit);
        b.ret(None).unwrap();
        b.function_mut().set_phi_incoming(iv, vec![(ValueId::Arg(limit), entry), (ValueId::Inst(next), body)]);

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = LoopInvariantCodeMotion::new();
        assert!(!pass.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.inst(next).unwrap().block, body);
    }

    #[test]
    fn leaves_property_reads_alone_unless_the_flag_opts_in() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let header = func.create_block("header");
        let body = func.create_block("body");
        let exit = func.create_block("exit");
        let obj = func.add_param(Type::Object, None);
        let key = func.add_param(Type::String, None);
        let cond = func.add_param(Type::Bool, None);

        let mut b = IRBuilder::new(&mut func, entry);
        b.br(header).unwrap();
        b.position_at_end(header);
        b.br_cond(ValueId::Arg(cond), body, exit).unwrap();
        b.position_at_end(body);
        let read = b.get_property(ValueId::Arg(obj), ValueId::Arg(key)).unwrap();
        b.br(header).unwrap();
        b.position_at_end(exit);
        b.ret(None).unwrap();
        let _ = read;

        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut default_pass = LoopInvariantCodeMotion::new();
        assert!(!default_pass.run_on_function(func, &mut view).unwrap().modified);

        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut opted_in = LoopInvariantCodeMotion::with_flags(AnalysisFlags { assume_pure_property_access: true });
        assert!(opted_in.run_on_function(func, &mut view).unwrap().modified);
        assert_eq!(func.inst(read).unwrap().block, entry);
    }

    /// When the loop's sole outside predecessor has more than one successor
    /// (it isn't a dedicated preheader on its own), the pass must splice in
    /// a new block rather than hoist into a block the non-loop path also
    /// runs through.
    #[test]
    fn synthesizes_a_preheader_when_the_predecessor_has_other_successors() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let skip = func.create_block("skip");
        let header = func.create_block("header");
        let body = func.create_block("body");
        let exit = func.create_block("exit");
        let cond = func.add_param(Type::Bool, None);
        let a = func.add_param(Type::I32, None);
        let b_arg = func.add_param(Type::I32, None);

        let mut b = IRBuilder::new(&mut func, entry);
        b.br_cond(ValueId::Arg(cond), header, skip).unwrap();
        b.position_at_end(skip);
        b.ret(None).unwrap();
        b.position_at_end(header);
        let cmp = b.compare(CmpOp::Lt, ValueId::Arg(a), ValueId::Arg(b_arg)).unwrap();
        b.br_cond(ValueId::Inst(cmp), body, exit).unwrap();
        b.position_at_end(body);
        let invariant = b.binary(BinOp::Add, ValueId::Arg(a), ValueId::Arg(b_arg), Type::I32).unwrap();
        b.br(header).unwrap();
        b.position_at_end(exit);
        b.ret(None).unwrap();

        let block_count_before = func.blocks().count();
        let mut module = Module::new("m");
        module.add_function(func);
        let (func, mut view) = module.function_view_mut("f").unwrap();
        let mut pass = LoopInvariantCodeMotion::new();
        assert!(pass.run_on_function(func, &mut view).unwrap().modified);

        assert_eq!(func.blocks().count(), block_count_before + 1, "a new preheader block must be created");
        let invariant_block = func.inst(invariant).unwrap().block;
        assert_ne!(invariant_block, entry, "must not hoist into a block the non-loop path also executes");
        assert_eq!(func.successors(invariant_block), vec![header]);
        assert!(func.predecessors(entry).is_empty());
        assert!(func.successors(entry).contains(&skip));
        assert!(func.verify().is_ok());
    }
}
