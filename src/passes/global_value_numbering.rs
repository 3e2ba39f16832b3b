//! Global value numbering (§4.8): partitions pure instructions into
//! congruence classes keyed by (opcode shape, result type, operand value
//! numbers — order-insensitive for commutative ops), then within each class
//! keeps only the member that dominates every other member, replacing the
//! rest with it. No teacher counterpart (`optimizer.rs`'s
//! `common_subexpression_elimination` only compares instructions already in
//! the same block); grounded on `dominance.rs::DominatorTree` for the
//! cross-block "is this computation already available here" check.
//!
//! Runs after `BranchFolding`, which canonicalizes `br_<cmp>` terminators
//! ahead of time so a fused compare-and-branch is numbered consistently
//! with an equivalent `compare` instruction feeding a `br_cond` elsewhere.

use std::collections::HashMap;

use crate::dominance::{reverse_postorder, DominatorTree};
use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::Opcode;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::{InstId, ValueId};

pub struct GlobalValueNumbering;

impl GlobalValueNumbering {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GlobalValueNumbering {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for GlobalValueNumbering {
    fn name(&self) -> &str {
        "global_value_numbering"
    }

    fn requires(&self) -> &[&'static str] {
        &["dominance"]
    }
}

/// A canonical, hashable fingerprint of a pure instruction's computation.
/// Commutative binary/compare ops sort their two operands so `a+b` and
/// `b+a` land in the same class.
fn value_number(opcode: &Opcode, ty: &crate::types::Type) -> (String, crate::types::Type, Vec<ValueId>) {
    let mut operands = opcode.operands();
    if opcode.is_commutative() && operands.len() == 2 {
        operands.sort_by_key(operand_sort_key);
    }
    (opcode_shape(opcode), ty.clone(), operands)
}

fn operand_sort_key(v: &ValueId) -> (u8, u32) {
    match v {
        ValueId::Const(c) => (0, c.0),
        ValueId::Arg(a) => (1, *a),
        ValueId::Inst(i) => (2, i.0),
        ValueId::Global(g) => (3, g.0),
        ValueId::Block(b) => (4, b.0),
    }
}

/// The part of the opcode that doesn't vary by operand — enough to keep
/// classes from colliding across unrelated opcodes that happen to share an
/// operand count.
fn opcode_shape(opcode: &Opcode) -> String {
    match opcode {
        Opcode::Binary { op, .. } => format!("binary:{op:?}"),
        Opcode::Unary { op, .. } => format!("unary:{op:?}"),
        Opcode::Compare { op, .. } => format!("compare:{op:?}"),
        Opcode::Cast { op, .. } => format!("cast:{op:?}"),
        Opcode::GetProperty { .. } => "get_property".to_string(),
        Opcode::GetElement { .. } => "get_element".to_string(),
        Opcode::Select { .. } => "select".to_string(),
        Opcode::CreateEmptyObject => "create_empty_object".to_string(),
        Opcode::CreateEmptyArray(n) => format!("create_empty_array:{n}"),
        other => format!("{other:?}"),
    }
}

/// Whether `opcode` is eligible for numbering at all: pure, with no
/// possibility of observable side effects, and not a load (two loads with
/// identical addresses aren't necessarily the same value — an intervening
/// store could have changed it, and this pass has no alias analysis).
fn is_numberable(opcode: &Opcode) -> bool {
    opcode.is_pure() && !opcode.may_have_side_effects() && !matches!(opcode, Opcode::Load(_) | Opcode::Phi(_))
}

impl FunctionPass for GlobalValueNumbering {
    fn run_on_function(&mut self, func: &mut Function, _module: &mut ModuleView<'_>) -> PassResult<Success> {
        let Some(doms) = DominatorTree::compute(func) else { return Ok(Success::unchanged()) };
        let order = reverse_postorder(func);

        let mut classes: HashMap<(String, crate::types::Type, Vec<ValueId>), Vec<(InstId, crate::value::BlockId)>> = HashMap::new();

        for block in &order {
            let Some(b) = func.block(*block) else { continue };
            for id in b.insts.clone() {
                let Some(inst) = func.inst(id) else { continue };
                if !is_numberable(&inst.opcode) {
                    continue;
                }
                let key = value_number(&inst.opcode, &inst.ty);
                classes.entry(key).or_default().push((id, inst.block));
            }
        }

        let mut modified = false;
        for members in classes.into_values() {
            if members.len() < 2 {
                continue;
            }
            // The earliest member in reverse postorder that dominates every
            // later member it's asked to replace becomes the leader; a
            // later member only gets replaced if the leader actually
            // dominates its block (otherwise the computation isn't
            // available there yet).
            let (leader, leader_block) = members[0];
            for &(dup, dup_block) in &members[1..] {
                if dup == leader {
                    continue;
                }
                if !doms.dominates(leader_block, dup_block) {
                    continue;
                }
                func.replace_all_uses_with(ValueId::Inst(dup), ValueId::Inst(leader));
                if !func.has_users(ValueId::Inst(dup)) {
                    func.remove_instruction(dup);
                }
                modified = true;
            }
        }

        Ok(if modified { Success::changed() } else { Success::unchanged() })
    }
}
