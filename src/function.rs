//! A single function's SSA body: the block and instruction arenas, their
//! owning/using relationships, and the def-use bookkeeping every pass reads
//! and writes (§3, §4.1). Mirrors the teacher's `IRFunction`/`ControlFlowGraph`
//! split in spirit — a function owns blocks, blocks own an ordered
//! instruction list — but blocks and instructions are now arena handles
//! (`BlockId`/`InstId`) instead of owned-by-name/owned-by-value, per Design
//! Note "Cyclic value graph": an operand can point forward to a block that
//! doesn't exist yet (loop back-edges, not-yet-sealed PHI predecessors)
//! without any unsafe or `Rc<RefCell<_>>` bookkeeping.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{VerifyError, VerifyResult};
use crate::opcode::{BinOp, Opcode};
use crate::types::Type;
use crate::value::{Argument, BlockId, InstId, ValueId};

/// One instruction: an opcode, the type of the value it defines (`Void` for
/// terminators and other instructions with no result), an optional
/// surface-level name (populated by `VariableReconstruction`), and the block
/// that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstId,
    pub opcode: Opcode,
    pub ty: Type,
    pub name: Option<String>,
    pub block: BlockId,
}

impl Instruction {
    pub fn result(&self) -> ValueId {
        ValueId::Inst(self.id)
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }
}

/// A basic block: an ordered instruction list plus the predecessor set
/// maintained incrementally by `Function` as terminators change. Successors
/// are derived on demand from the block's terminator rather than stored
/// redundantly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub name: String,
    pub insts: Vec<InstId>,
    pub preds: Vec<BlockId>,
}

impl BasicBlock {
    fn new(id: BlockId, name: String) -> Self {
        Self { id, name, insts: Vec::new(), preds: Vec::new() }
    }
}

/// A function body: the block/instruction arenas and the def-use map every
/// pass consults before deleting or rewriting a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Argument>,
    pub ret_ty: Type,
    pub is_public: bool,
    pub entry: Option<BlockId>,
    blocks: IndexMap<BlockId, BasicBlock>,
    insts: IndexMap<InstId, Instruction>,
    #[serde(skip)]
    users: HashMap<ValueId, Vec<InstId>>,
    /// Instructions `CompoundAssignment` recognized as `v op= c` rather than
    /// an ordinary binary op, for the pretty-printer to render as such.
    /// Side-table rather than an `Opcode` variant: the operation these
    /// instructions perform is unchanged, only how a reader should describe
    /// it.
    #[serde(skip)]
    compound_assignments: HashMap<InstId, BinOp>,
    next_block: u32,
    next_inst: u32,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_ty: Type) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret_ty,
            is_public: false,
            entry: None,
            blocks: IndexMap::new(),
            insts: IndexMap::new(),
            users: HashMap::new(),
            compound_assignments: HashMap::new(),
            next_block: 0,
            next_inst: 0,
        }
    }

    pub fn mark_compound_assignment(&mut self, id: InstId, op: BinOp) {
        self.compound_assignments.insert(id, op);
    }

    pub fn compound_assignment(&self, id: InstId) -> Option<BinOp> {
        self.compound_assignments.get(&id).copied()
    }

    pub fn add_param(&mut self, ty: Type, name: Option<String>) -> u32 {
        let index = self.params.len() as u32;
        self.params.push(Argument { index, ty, name });
        index
    }

    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        let block = BasicBlock::new(id, name.into());
        self.blocks.insert(id, block);
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys().copied()
    }

    /// Deletes a block and every instruction it owns. The caller is
    /// responsible for having removed this block from every other block's
    /// terminator/PHI first — `SimplifyCFG` is the only pass that does this.
    pub fn remove_block(&mut self, id: BlockId) {
        if let Some(block) = self.blocks.shift_remove(&id) {
            for inst_id in block.insts {
                self.forget_instruction_uses(inst_id);
                self.insts.shift_remove(&inst_id);
            }
        }
        if self.entry == Some(id) {
            self.entry = self.blocks.keys().next().copied();
        }
    }

    pub fn inst(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(&id)
    }

    pub fn inst_mut(&mut self, id: InstId) -> Option<&mut Instruction> {
        self.insts.get_mut(&id)
    }

    pub fn insts(&self) -> impl Iterator<Item = &Instruction> {
        self.insts.values()
    }

    pub fn terminator(&self, block: BlockId) -> Option<&Instruction> {
        let block = self.blocks.get(&block)?;
        let last = block.insts.last()?;
        self.insts.get(last)
    }

    pub fn users(&self, value: ValueId) -> &[InstId] {
        self.users.get(&value).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn has_users(&self, value: ValueId) -> bool {
        !self.users(value).is_empty()
    }

    fn register_uses(&mut self, inst_id: InstId, operands: &[ValueId]) {
        for operand in operands {
            self.users.entry(*operand).or_default().push(inst_id);
        }
    }

    /// Unregisters `inst_id` as a user of every value it currently
    /// operates on. Does *not* touch the record of `inst_id`'s own users —
    /// callers that are deleting the instruction outright still need to do
    /// that separately (see `remove_instruction`).
    fn unregister_operand_uses(&mut self, inst_id: InstId) {
        if let Some(inst) = self.insts.get(&inst_id) {
            let operands = inst.opcode.operands();
            for operand in operands {
                if let Some(list) = self.users.get_mut(&operand) {
                    list.retain(|u| *u != inst_id);
                }
            }
        }
    }

    fn forget_instruction_uses(&mut self, inst_id: InstId) {
        self.unregister_operand_uses(inst_id);
        self.users.remove(&ValueId::Inst(inst_id));
    }

    /// Appends a new instruction to the end of `block`'s instruction list.
    /// Used directly by the on-the-fly SSA builder and by `IRBuilder` when
    /// the block is not yet terminated; callers that need "insert before
    /// the terminator" use `insert_before` instead.
    pub fn push_instruction(&mut self, block_id: BlockId, opcode: Opcode, ty: Type, name: Option<String>) -> InstId {
        let id = InstId(self.next_inst);
        self.next_inst += 1;
        let operands = opcode.operands();
        let inst = Instruction { id, opcode, ty, name, block: block_id };
        self.insts.insert(id, inst);
        self.register_uses(id, &operands);
        if let Some(block) = self.blocks.get_mut(&block_id) {
            block.insts.push(id);
        }
        if let Some(targets) = self.insts.get(&id).map(|i| i.opcode.branch_targets()) {
            for target in targets {
                self.add_pred(target, block_id);
            }
        }
        id
    }

    /// Inserts a new, empty `Phi` at the head of `block`, after any PHIs
    /// already there and before the first non-PHI instruction. Used only by
    /// the on-the-fly SSA builder (§4.5), which must be able to place a PHI
    /// in a block it is still appending other instructions to.
    pub fn push_phi_at_head(&mut self, block_id: BlockId, ty: Type) -> InstId {
        let id = InstId(self.next_inst);
        self.next_inst += 1;
        let inst = Instruction { id, opcode: Opcode::Phi(Vec::new()), ty, name: None, block: block_id };
        self.insts.insert(id, inst);
        if let Some(block) = self.blocks.get_mut(&block_id) {
            let pos = block
                .insts
                .iter()
                .position(|i| !matches!(self.insts.get(i).map(|i| &i.opcode), Some(Opcode::Phi(_))))
                .unwrap_or(block.insts.len());
            block.insts.insert(pos, id);
        }
        id
    }

    /// Overwrites a PHI's incoming `(value, predecessor)` list wholesale,
    /// keeping the def-use map in sync. Used when the SSA builder completes
    /// a previously-empty PHI once all its predecessors are known.
    pub fn set_phi_incoming(&mut self, phi_id: InstId, incoming: Vec<(ValueId, BlockId)>) {
        self.unregister_operand_uses(phi_id);
        let values: Vec<ValueId> = incoming.iter().map(|(v, _)| *v).collect();
        if let Some(inst) = self.insts.get_mut(&phi_id) {
            inst.opcode = Opcode::Phi(incoming);
        }
        self.register_uses(phi_id, &values);
    }

    /// Inserts a new instruction immediately before `before` within its own
    /// block (§4.4 "insert before terminator" builder rule).
    pub fn insert_before(&mut self, before: InstId, opcode: Opcode, ty: Type, name: Option<String>) -> InstId {
        let block_id = self.insts.get(&before).expect("insert_before: unknown instruction").block;
        let id = InstId(self.next_inst);
        self.next_inst += 1;
        let operands = opcode.operands();
        let inst = Instruction { id, opcode, ty, name, block: block_id };
        self.insts.insert(id, inst);
        self.register_uses(id, &operands);
        if let Some(block) = self.blocks.get_mut(&block_id) {
            let pos = block.insts.iter().position(|i| *i == before).expect("insert_before: instruction not in its own block");
            block.insts.insert(pos, id);
        }
        id
    }

    fn add_pred(&mut self, block: BlockId, pred: BlockId) {
        if let Some(b) = self.blocks.get_mut(&block) {
            if !b.preds.contains(&pred) {
                b.preds.push(pred);
            }
        }
    }

    fn remove_pred(&mut self, block: BlockId, pred: BlockId) {
        if let Some(b) = self.blocks.get_mut(&block) {
            b.preds.retain(|p| *p != pred);
        }
    }

    /// Rewrites a single positional operand of `inst`, keeping the def-use
    /// map in sync. This is the only way passes should mutate an operand —
    /// never reach into `Instruction::opcode` directly.
    pub fn set_operand(&mut self, inst_id: InstId, index: usize, new_value: ValueId) {
        let owning_block = self.insts.get(&inst_id).map(|i| i.block);
        let old_targets = self.insts.get(&inst_id).map(|i| i.opcode.branch_targets()).unwrap_or_default();
        let Some(inst) = self.insts.get_mut(&inst_id) else { return };
        let old_value = {
            let operands = inst.opcode.operands_mut();
            let Some(slot) = operands.into_iter().nth(index) else { return };
            let old = *slot;
            *slot = new_value;
            old
        };
        if old_value == new_value {
            return;
        }
        if let Some(list) = self.users.get_mut(&old_value) {
            list.retain(|u| *u != inst_id);
        }
        self.users.entry(new_value).or_default().push(inst_id);

        if let (Some(block), true) = (owning_block, old_value != new_value) {
            let new_targets = self.insts.get(&inst_id).map(|i| i.opcode.branch_targets()).unwrap_or_default();
            if old_targets != new_targets {
                for t in &old_targets {
                    if !new_targets.contains(t) {
                        self.remove_pred(*t, block);
                    }
                }
                for t in &new_targets {
                    if !old_targets.contains(t) {
                        self.add_pred(*t, block);
                    }
                }
            }
        }
    }

    /// Replaces every use of `old` with `new` across the whole function —
    /// the workhorse primitive behind constant propagation, GVN, and copy
    /// elimination. `old` must not be referenced again afterward; callers
    /// still own deleting the now-dead defining instruction, if any.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let users: Vec<InstId> = self.users(old).to_vec();
        for user in users {
            let operand_count = self.insts.get(&user).map(|i| i.opcode.operands().len()).unwrap_or(0);
            for index in 0..operand_count {
                let current = self.insts.get(&user).and_then(|i| i.opcode.operands().get(index).copied());
                if current == Some(old) {
                    self.set_operand(user, index, new);
                }
            }
        }
    }

    /// Removes an instruction that has no remaining users and no side
    /// effects the caller hasn't already accounted for. Passes are
    /// responsible for checking `has_users`/`is_pure` themselves; this is
    /// the mechanical deletion step shared by DCE, ADCE, and SimplifyCFG.
    pub fn remove_instruction(&mut self, id: InstId) {
        let block_id = match self.insts.get(&id) {
            Some(i) => i.block,
            None => return,
        };
        self.forget_instruction_uses(id);
        self.insts.shift_remove(&id);
        if let Some(block) = self.blocks.get_mut(&block_id) {
            block.insts.retain(|i| *i != id);
        }
    }

    /// Removes `block`'s terminator (if any), unwiring the predecessor edges
    /// it held on its branch targets. Leaves the block unterminated — the
    /// caller is expected to push a replacement terminator immediately
    /// (`SimplifyCFG`'s block-merge step uses this to swap a `br` for the
    /// merged-in block's own terminator).
    pub fn remove_terminator(&mut self, block_id: BlockId) {
        let Some(term_id) = self.blocks.get(&block_id).and_then(|b| b.insts.last().copied()) else { return };
        let Some(targets) = self.insts.get(&term_id).map(|i| i.opcode.branch_targets()) else { return };
        if !self.insts.get(&term_id).map(|i| i.is_terminator()).unwrap_or(false) {
            return;
        }
        for target in targets {
            self.remove_pred(target, block_id);
        }
        self.forget_instruction_uses(term_id);
        self.insts.shift_remove(&term_id);
        if let Some(block) = self.blocks.get_mut(&block_id) {
            block.insts.retain(|i| *i != term_id);
        }
    }

    /// Absorbs `from` into its sole predecessor `into`: every instruction of
    /// `from` (assumed PHI-free, or already resolved by the caller since
    /// `from` has exactly one predecessor) is appended to `into` in place of
    /// `into`'s old `br from` terminator, `from`'s own terminator becomes
    /// `into`'s new terminator, and every successor of `from` is rewired to
    /// treat `into` as its predecessor instead. Used only by `SimplifyCFG`.
    pub fn merge_block_into_predecessor(&mut self, from: BlockId, into: BlockId) {
        self.remove_terminator(into);

        let moved: Vec<InstId> = self.blocks.get(&from).map(|b| b.insts.clone()).unwrap_or_default();
        for inst_id in &moved {
            if let Some(inst) = self.insts.get_mut(inst_id) {
                inst.block = into;
            }
        }
        if let Some(b) = self.blocks.get_mut(&into) {
            b.insts.extend(moved.iter().copied());
        }
        if let Some(b) = self.blocks.get_mut(&from) {
            b.insts.clear();
        }

        let targets = self.successors(into);
        for target in targets {
            self.remove_pred(target, from);
            self.add_pred(target, into);
        }

        let was_entry = self.entry == Some(from);
        self.remove_block(from);
        if was_entry {
            self.entry = Some(into);
        }
    }

    /// Relocates an existing instruction to just before `target_block`'s
    /// terminator, without changing its identity — `InstId`s referencing it
    /// as an operand elsewhere are untouched. Used by
    /// `LoopInvariantCodeMotion` to hoist a loop-invariant computation into
    /// a loop's preheader.
    pub fn move_instruction_before_terminator(&mut self, inst_id: InstId, target_block: BlockId) {
        let old_block = match self.insts.get(&inst_id) {
            Some(i) => i.block,
            None => return,
        };
        if old_block == target_block {
            return;
        }
        if let Some(b) = self.blocks.get_mut(&old_block) {
            b.insts.retain(|i| *i != inst_id);
        }
        if let Some(inst) = self.insts.get_mut(&inst_id) {
            inst.block = target_block;
        }
        let term_pos = self
            .blocks
            .get(&target_block)
            .and_then(|b| b.insts.iter().position(|i| self.insts.get(i).map(|x| x.is_terminator()).unwrap_or(false)));
        if let Some(b) = self.blocks.get_mut(&target_block) {
            let pos = term_pos.unwrap_or(b.insts.len());
            b.insts.insert(pos, inst_id);
        }
    }

    /// Rebuilds every block's predecessor list from scratch by walking
    /// terminators. Used defensively by the verifier and by passes that
    /// restructure the CFG wholesale (`SimplifyCFG`) rather than track
    /// edges incrementally.
    pub fn recompute_predecessors(&mut self) {
        for block in self.blocks.values_mut() {
            block.preds.clear();
        }
        let edges: Vec<(BlockId, BlockId)> = self
            .blocks
            .values()
            .filter_map(|b| b.insts.last().map(|i| (b.id, *i)))
            .filter_map(|(from, inst_id)| self.insts.get(&inst_id).map(|i| (from, i.opcode.branch_targets())))
            .flat_map(|(from, targets)| targets.into_iter().map(move |t| (from, t)))
            .collect();
        for (from, to) in edges {
            if let Some(b) = self.blocks.get_mut(&to) {
                if !b.preds.contains(&from) {
                    b.preds.push(from);
                }
            }
        }
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block).map(|t| t.opcode.branch_targets()).unwrap_or_default()
    }

    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.blocks.get(&block).map(|b| b.preds.as_slice()).unwrap_or(&[])
    }

    /// Structural verification (§7/§8): every block is terminated exactly
    /// once at its end, every operand resolves to something that exists,
    /// PHI arity matches predecessor count and incoming blocks are a
    /// permutation of the predecessor set, and the CFG's successor/
    /// predecessor views agree. Generalizes the teacher's
    /// `ControlFlowGraph::validate`, which only checked for a present
    /// terminator.
    pub fn verify(&self) -> VerifyResult<()> {
        if self.blocks.is_empty() {
            return Err(VerifyError::EmptyFunction { function: self.name.clone() });
        }

        for block in self.blocks.values() {
            for (index, inst_id) in block.insts.iter().enumerate() {
                let inst = self.insts.get(inst_id).ok_or_else(|| VerifyError::DanglingOperand {
                    function: self.name.clone(),
                    block: block.name.clone(),
                    index,
                })?;
                let is_last = index + 1 == block.insts.len();
                if inst.is_terminator() && !is_last {
                    return Err(VerifyError::TerminatorNotLast {
                        function: self.name.clone(),
                        block: block.name.clone(),
                        index,
                    });
                }
                if is_last && !inst.is_terminator() {
                    return Err(VerifyError::MissingTerminator {
                        function: self.name.clone(),
                        block: block.name.clone(),
                        index,
                    });
                }
                for operand in inst.opcode.operands() {
                    if !self.value_exists(operand) {
                        return Err(VerifyError::DanglingOperand {
                            function: self.name.clone(),
                            block: block.name.clone(),
                            index,
                        });
                    }
                }
                if let Some(incoming_blocks) = inst.opcode.phi_incoming_blocks() {
                    if incoming_blocks.len() != block.preds.len() {
                        return Err(VerifyError::PhiArityMismatch {
                            function: self.name.clone(),
                            block: block.name.clone(),
                            got: incoming_blocks.len(),
                            expected: block.preds.len(),
                        });
                    }
                    let mut expected: Vec<BlockId> = block.preds.clone();
                    let mut got = incoming_blocks;
                    expected.sort_by_key(|b| b.0);
                    got.sort_by_key(|b| b.0);
                    if expected != got {
                        return Err(VerifyError::PhiIncomingMismatch {
                            function: self.name.clone(),
                            block: block.name.clone(),
                        });
                    }
                }
            }
        }

        let mut expected = self.clone();
        expected.recompute_predecessors();
        for block in self.blocks.values() {
            let recomputed = expected.blocks.get(&block.id).unwrap();
            let mut a: Vec<BlockId> = block.preds.clone();
            let mut b: Vec<BlockId> = recomputed.preds.clone();
            a.sort_by_key(|x| x.0);
            b.sort_by_key(|x| x.0);
            if a != b {
                return Err(VerifyError::CfgEdgeMismatch {
                    function: self.name.clone(),
                    a: block.name.clone(),
                    b: recomputed.name.clone(),
                });
            }
        }

        Ok(())
    }

    fn value_exists(&self, value: ValueId) -> bool {
        match value {
            ValueId::Const(_) => true, // interned module-side; checked by Module::verify
            ValueId::Global(_) => true, // ditto
            ValueId::Arg(i) => (i as usize) < self.params.len(),
            ValueId::Block(b) => self.blocks.contains_key(&b),
            ValueId::Inst(i) => self.insts.contains_key(&i),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.ty)?;
        }
        writeln!(f, ") -> {} {{", self.ret_ty)?;
        for block in self.blocks.values() {
            writeln!(f, "{}:", block.name)?;
            for inst_id in &block.insts {
                if let Some(inst) = self.insts.get(inst_id) {
                    writeln!(f, "  {}", crate::textual::render_instruction(inst, self))?;
                }
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{BinOp, Opcode};

    #[test]
    fn push_instruction_registers_def_use() {
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let arg = func.add_param(Type::I32, Some("x".into()));
        let add = func.push_instruction(
            entry,
            Opcode::Binary { op: BinOp::Add, lhs: ValueId::Arg(arg), rhs: ValueId::Arg(arg) },
            Type::I32,
            None,
        );
        assert_eq!(func.users(ValueId::Arg(arg)), &[add, add]);
        func.push_instruction(entry, Opcode::Ret(Some(ValueId::Inst(add))), Type::Void, None);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn replace_all_uses_with_updates_every_user() {
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let c0 = func.push_instruction(entry, Opcode::Copy(ValueId::Const(crate::value::ConstId(0))), Type::I32, None);
        let add = func.push_instruction(
            entry,
            Opcode::Binary { op: BinOp::Add, lhs: ValueId::Inst(c0), rhs: ValueId::Inst(c0) },
            Type::I32,
            None,
        );
        func.push_instruction(entry, Opcode::Ret(Some(ValueId::Inst(add))), Type::Void, None);

        func.replace_all_uses_with(ValueId::Inst(c0), ValueId::Const(crate::value::ConstId(0)));
        assert!(func.users(ValueId::Inst(c0)).is_empty());
        let add_inst = func.inst(add).unwrap();
        assert_eq!(add_inst.opcode.operands(), vec![ValueId::Const(crate::value::ConstId(0)); 2]);
    }

    #[test]
    fn verify_rejects_phi_arity_mismatch() {
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let target = func.create_block("target");
        func.push_instruction(entry, Opcode::Br(target), Type::Void, None);
        func.push_instruction(
            target,
            Opcode::Phi(vec![(ValueId::Const(crate::value::ConstId(0)), entry), (ValueId::Const(crate::value::ConstId(0)), BlockId(99))]),
            Type::I32,
            None,
        );
        func.push_instruction(target, Opcode::Ret(None), Type::Void, None);
        assert!(matches!(func.verify(), Err(VerifyError::PhiArityMismatch { .. })));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        func.push_instruction(entry, Opcode::Nop, Type::Void, None);
        assert!(matches!(func.verify(), Err(VerifyError::MissingTerminator { .. })));
    }
}
