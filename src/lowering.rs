//! Accumulator lowering (§4.5): models the source machine's one implicit
//! accumulator plus `v0..v{N-1}` virtual registers, and builds SSA for both
//! on the fly (Braun et al., "Simple and Efficient Construction of Static
//! Single Assignment Form") rather than computing dominance frontiers
//! up front. A read of a variable not yet defined in the current block
//! recurses into predecessors; a join with divergent reaching definitions
//! gets an empty PHI that is completed once every predecessor is known and
//! collapsed back to a plain value if it turns out trivial.

use std::collections::{HashMap, HashSet};

use crate::builder::IRBuilder;
use crate::error::{LoweringError, LoweringResult};
use crate::function::Function;
use crate::module::Module;
use crate::opcode::{BinOp, CastOp, CmpOp, Opcode, UnOp};
use crate::types::Type;
use crate::value::{BlockId, Constant, InstId, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Var {
    Acc,
    VReg(u16),
}

/// Builds one function's SSA body. Holds the function under construction
/// by value (it is not yet owned by any `Module`) and a mutable reference to
/// the module only for constant interning, so this never aliases the
/// function arena it is writing into.
pub struct AccumulatorLowering<'m> {
    module: &'m mut Module,
    func: Function,
    current_def: HashMap<BlockId, HashMap<Var, ValueId>>,
    sealed: HashSet<BlockId>,
    incomplete_phis: HashMap<BlockId, Vec<(Var, InstId)>>,
    /// The offset of the read that caused each still-live PHI to be
    /// created, so a PHI that collapses to zero real incoming values (a
    /// read with no reaching definition anywhere — stack underflow) can
    /// still name the bytecode offset that triggered it.
    phi_offset: HashMap<InstId, u32>,
    current_block: BlockId,
}

impl<'m> AccumulatorLowering<'m> {
    /// Starts a new function with one already-created entry block and
    /// `num_args` `Any`-typed parameters (the converter narrows parameter
    /// and local-vreg types afterward via `TypePropagation`).
    pub fn new(module: &'m mut Module, name: impl Into<String>, ret_ty: Type, num_args: u16, entry_name: impl Into<String>) -> Self {
        let mut func = Function::new(name, ret_ty);
        for _ in 0..num_args {
            func.add_param(Type::Any, None);
        }
        let entry = func.create_block(entry_name);
        Self {
            module,
            func,
            current_def: HashMap::new(),
            sealed: HashSet::new(),
            incomplete_phis: HashMap::new(),
            phi_offset: HashMap::new(),
            current_block: entry,
        }
    }

    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        self.func.create_block(name)
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current_block = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn function(&self) -> &Function {
        &self.func
    }

    pub fn builder(&mut self) -> IRBuilder<'_> {
        IRBuilder::new(&mut self.func, self.current_block)
    }

    /// Direct access to the module being lowered into, for callers (the
    /// converter) that need to intern constants or register globals while
    /// driving this lowering — not used by the lowering itself.
    pub fn module_mut(&mut self) -> &mut Module {
        self.module
    }

    /// Read-only counterpart of `module_mut`, for callers that only need to
    /// resolve a string-pool id (e.g. the converter's `module_string`).
    pub fn module(&self) -> &Module {
        self.module
    }

    fn write_variable(&mut self, var: Var, block: BlockId, value: ValueId) {
        self.current_def.entry(block).or_default().insert(var, value);
    }

    fn read_variable(&mut self, var: Var, block: BlockId, offset: u32) -> LoweringResult<ValueId> {
        if let Some(v) = self.current_def.get(&block).and_then(|m| m.get(&var)) {
            return Ok(*v);
        }
        self.read_variable_recursive(var, block, offset)
    }

    fn read_variable_recursive(&mut self, var: Var, block: BlockId, offset: u32) -> LoweringResult<ValueId> {
        let value = if !self.sealed.contains(&block) {
            let phi = self.func.push_phi_at_head(block, Type::Any);
            self.phi_offset.insert(phi, offset);
            self.incomplete_phis.entry(block).or_default().push((var, phi));
            ValueId::Inst(phi)
        } else {
            let preds = self.func.predecessors(block).to_vec();
            match preds.as_slice() {
                // Sealed with no predecessors and no local definition: the
                // read has nothing left to reach — a stack/accumulator
                // underflow (§4.9), not a silently-synthesized `undefined`.
                [] => return Err(LoweringError::AccumulatorUnderflow { offset }),
                [only] => self.read_variable(var, *only, offset)?,
                _ => {
                    let phi = self.func.push_phi_at_head(block, Type::Any);
                    self.phi_offset.insert(phi, offset);
                    // Write the (still-empty) phi as the reaching definition
                    // before recursing into predecessors, so a predecessor
                    // path that loops back here reads the phi instead of
                    // recursing forever.
                    self.write_variable(var, block, ValueId::Inst(phi));
                    self.add_phi_operands(var, block, phi, offset)?;
                    ValueId::Inst(phi)
                }
            }
        };
        self.write_variable(var, block, value);
        Ok(value)
    }

    fn add_phi_operands(&mut self, var: Var, block: BlockId, phi: InstId, offset: u32) -> LoweringResult<()> {
        let preds = self.func.predecessors(block).to_vec();
        let mut incoming = Vec::with_capacity(preds.len());
        for pred in preds {
            let v = self.read_variable(var, pred, offset)?;
            incoming.push((v, pred));
        }
        self.func.set_phi_incoming(phi, incoming);
        self.try_remove_trivial_phi(phi)
    }

    /// Collapses a PHI with at most one distinct non-self operand back to
    /// that operand, then checks whether doing so made any of its users
    /// trivial in turn. A PHI with *no* non-self operand at all means the
    /// variable it tracks was never reached by any path — the read that
    /// first created it (recorded in `phi_offset`) underflowed (§4.9).
    fn try_remove_trivial_phi(&mut self, phi: InstId) -> LoweringResult<()> {
        let Some(inst) = self.func.inst(phi) else { return Ok(()) };
        let Opcode::Phi(incoming) = &inst.opcode else { return Ok(()) };
        let phi_value = ValueId::Inst(phi);
        let mut same: Option<ValueId> = None;
        for (v, _) in incoming {
            if *v == phi_value {
                continue;
            }
            match same {
                None => same = Some(*v),
                Some(s) if s == *v => {}
                Some(_) => return Ok(()),
            }
        }
        let replacement = match same {
            Some(v) => v,
            None => {
                let offset = self.phi_offset.get(&phi).copied().unwrap_or(0);
                return Err(LoweringError::AccumulatorUnderflow { offset });
            }
        };

        let users_of_phi: Vec<InstId> = self.func.users(phi_value).to_vec();
        self.func.replace_all_uses_with(phi_value, replacement);
        self.func.remove_instruction(phi);
        self.phi_offset.remove(&phi);

        for user in users_of_phi {
            if user == phi {
                continue;
            }
            if matches!(self.func.inst(user).map(|i| &i.opcode), Some(Opcode::Phi(_))) {
                self.try_remove_trivial_phi(user)?;
            }
        }
        Ok(())
    }

    /// Marks `block` sealed (all of its predecessors are now known) and
    /// completes any PHIs that were left pending while it wasn't.
    pub fn seal_block(&mut self, block: BlockId) -> LoweringResult<()> {
        if self.sealed.contains(&block) {
            return Ok(());
        }
        if let Some(pending) = self.incomplete_phis.remove(&block) {
            for (var, phi) in pending {
                let offset = self.phi_offset.get(&phi).copied().unwrap_or(0);
                self.add_phi_operands(var, block, phi, offset)?;
            }
        }
        self.sealed.insert(block);
        Ok(())
    }

    /// `lda(v)`: points the accumulator at an already-existing value. Pure
    /// bookkeeping — no instruction is emitted.
    pub fn lda(&mut self, value: ValueId) {
        self.write_variable(Var::Acc, self.current_block, value);
    }

    /// Reads the accumulator's current value. `offset` is the bytecode
    /// offset of the read, reported in `LoweringError::AccumulatorUnderflow`
    /// if the accumulator has no reaching definition anywhere (§4.9).
    pub fn read_acc(&mut self, offset: u32) -> LoweringResult<ValueId> {
        self.read_variable(Var::Acc, self.current_block, offset)
    }

    /// `sta(reg)`: stores the accumulator into `reg`, materialized as a
    /// `copy` whose result becomes `reg`'s current definition. The copy is
    /// stamped with `reg`'s register-provenance name (`"r<reg>"`), which
    /// `CompoundAssignment` and `VariableReconstruction` read later — before
    /// `VariableReconstruction` overwrites it with something more source-like,
    /// it's the only record of which vreg a value belongs to.
    pub fn sta(&mut self, reg: u16, offset: u32) -> LoweringResult<InstId> {
        let acc = self.read_acc(offset)?;
        let copy = self.builder().copy(acc, Type::Any).expect("sta: current block already terminated");
        if let Some(inst) = self.func.inst_mut(copy) {
            inst.name = Some(format!("r{reg}"));
        }
        self.write_variable(Var::VReg(reg), self.current_block, ValueId::Inst(copy));
        Ok(copy)
    }

    /// `lda_reg(reg)`: loads `reg`'s current definition into the
    /// accumulator. No instruction is emitted; returns the loaded value.
    pub fn lda_reg(&mut self, reg: u16, offset: u32) -> LoweringResult<ValueId> {
        let v = self.read_variable(Var::VReg(reg), self.current_block, offset)?;
        self.write_variable(Var::Acc, self.current_block, v);
        Ok(v)
    }

    /// Reads `reg`'s current reaching definition without touching the
    /// accumulator — used by the converter to resolve a vreg used as a
    /// plain operand (e.g. the right-hand side of a binary op), as opposed
    /// to `lda_reg`, which also points the accumulator at it.
    pub fn read_vreg(&mut self, reg: u16, offset: u32) -> LoweringResult<ValueId> {
        self.read_variable(Var::VReg(reg), self.current_block, offset)
    }

    /// Seeds `reg`'s reaching definition at `block` directly, bypassing
    /// `sta`'s `copy` materialization. The converter uses this once, at
    /// entry, to bind the physical argument registers (the last `numArgs`
    /// vregs, per the bytecode→IR conversion contract) to their `Argument`
    /// values before any bytecode runs.
    pub fn seed_vreg(&mut self, block: BlockId, reg: u16, value: ValueId) {
        self.write_variable(Var::VReg(reg), block, value);
    }

    /// `bind_argument(block, reg, arg_index)`: the argument-register
    /// counterpart of `seed_vreg`, used for the physical argument registers
    /// specifically. An `Argument` produces no instruction for `sta` to
    /// stamp a register-provenance name onto, so this stamps the name onto
    /// the parameter itself instead — giving `CompoundAssignment` and
    /// `VariableReconstruction` the same `"r<reg>"` provenance trail for a
    /// variable that started life as an argument as they get for one
    /// `sta` materialized.
    pub fn bind_argument(&mut self, block: BlockId, reg: u16, arg_index: u32) {
        if let Some(param) = self.func.params.get_mut(arg_index as usize) {
            if param.name.is_none() {
                param.name = Some(format!("r{reg}"));
            }
        }
        self.seed_vreg(block, reg, ValueId::Arg(arg_index));
    }

    /// `binop_with_acc(op, rhs)`: `acc := op(acc, rhs)`.
    pub fn binop_with_acc(&mut self, op: BinOp, rhs: ValueId, offset: u32) -> LoweringResult<InstId> {
        let lhs = self.read_acc(offset)?;
        let inst = self.builder().binary(op, lhs, rhs, Type::Any).expect("binop_with_acc: current block already terminated");
        self.write_variable(Var::Acc, self.current_block, ValueId::Inst(inst));
        Ok(inst)
    }

    /// `compare_with_acc(op, rhs)`: `acc := cmp(acc, rhs)`, result always
    /// `bool` — unlike `binop_with_acc`, whose result stays `Any` until
    /// `TypePropagation` narrows it, a compare's result type is fixed by
    /// §4.3 regardless of operand types.
    pub fn compare_with_acc(&mut self, op: CmpOp, rhs: ValueId, offset: u32) -> LoweringResult<InstId> {
        let lhs = self.read_acc(offset)?;
        let inst = self.builder().compare(op, lhs, rhs).expect("compare_with_acc: current block already terminated");
        self.write_variable(Var::Acc, self.current_block, ValueId::Inst(inst));
        Ok(inst)
    }

    /// `unary_with_acc(op)`: `acc := op(acc)`, the unary counterpart of
    /// `binop_with_acc` (neg/not/inc/dec/typeof/to_number/... all read and
    /// rewrite the accumulator in place on the source machine).
    pub fn unary_with_acc(&mut self, op: UnOp, offset: u32) -> LoweringResult<InstId> {
        let operand = self.read_acc(offset)?;
        let inst = self.builder().unary(op, operand, Type::Any).expect("unary_with_acc: current block already terminated");
        self.write_variable(Var::Acc, self.current_block, ValueId::Inst(inst));
        Ok(inst)
    }

    /// `cast_with_acc(op, target)`: `acc := cast(acc, target)`.
    pub fn cast_with_acc(&mut self, op: CastOp, target: Type, offset: u32) -> LoweringResult<InstId> {
        let value = self.read_acc(offset)?;
        let inst = self.builder().cast(op, value, target).expect("cast_with_acc: current block already terminated");
        self.write_variable(Var::Acc, self.current_block, ValueId::Inst(inst));
        Ok(inst)
    }

    /// `return_acc()`: `ret acc`.
    pub fn return_acc(&mut self, offset: u32) -> LoweringResult<InstId> {
        let acc = self.read_acc(offset)?;
        Ok(self.builder().ret(Some(acc)).expect("return_acc: current block already terminated"))
    }

    /// `compare_and_branch(cmp, rhs, then, else)`: the fused `br_<cmp>` form
    /// the converter lowers compare-and-branch bytecodes to, comparing the
    /// accumulator against `rhs`.
    pub fn compare_and_branch(
        &mut self,
        cmp: CmpOp,
        rhs: ValueId,
        then_block: BlockId,
        else_block: BlockId,
        offset: u32,
    ) -> LoweringResult<InstId> {
        let lhs = self.read_acc(offset)?;
        Ok(self
            .builder()
            .br_cmp(cmp, lhs, rhs, then_block, else_block)
            .expect("compare_and_branch: current block already terminated"))
    }

    /// Seals every block created so far (§4.6 step 4: "at end-of-stream,
    /// the lowering seals all blocks and resolves dangling PHIs") and hands
    /// back the finished function for the converter to add to the module.
    pub fn finish(mut self) -> LoweringResult<Function> {
        let blocks: Vec<BlockId> = self.func.block_ids().collect();
        for block in blocks {
            self.seal_block(block)?;
        }
        Ok(self.func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_sta_lda_roundtrips_without_phi() {
        let mut module = Module::new("m");
        let mut lowering = AccumulatorLowering::new(&mut module, "f", Type::Any, 0, "entry");
        let five = ValueId::Const(lowering.module.intern_constant(Constant::Integer(5, Type::I32)));
        lowering.lda(five);
        lowering.sta(0, 0).unwrap();
        let loaded = lowering.lda_reg(0, 0).unwrap();
        assert_eq!(loaded, ValueId::Inst(InstId(0))); // the `copy` from `sta`
        lowering.return_acc(0).unwrap();
        let func = lowering.finish().unwrap();
        assert!(func.verify().is_ok());
    }

    #[test]
    fn diverging_branch_join_gets_a_real_phi() {
        let mut module = Module::new("m");
        let mut lowering = AccumulatorLowering::new(&mut module, "f", Type::Any, 0, "entry");
        let entry = lowering.current_block();
        let then_block = lowering.create_block("then");
        let else_block = lowering.create_block("else");
        let join = lowering.create_block("join");

        let cond = ValueId::Const(lowering.module.intern_constant(Constant::True));
        lowering.builder().br_cond(cond, then_block, else_block).unwrap();
        lowering.seal_block(entry).unwrap();

        lowering.position_at_end(then_block);
        let one = ValueId::Const(lowering.module.intern_constant(Constant::Integer(1, Type::I32)));
        lowering.lda(one);
        lowering.sta(0, 0).unwrap();
        lowering.builder().br(join).unwrap();
        lowering.seal_block(then_block).unwrap();

        lowering.position_at_end(else_block);
        let two = ValueId::Const(lowering.module.intern_constant(Constant::Integer(2, Type::I32)));
        lowering.lda(two);
        lowering.sta(0, 0).unwrap();
        lowering.builder().br(join).unwrap();
        lowering.seal_block(else_block).unwrap();

        lowering.position_at_end(join);
        lowering.lda_reg(0, 0).unwrap();
        lowering.return_acc(0).unwrap();

        let func = lowering.finish().unwrap();
        assert!(func.verify().is_ok());
        let ret = func.terminator(join).unwrap();
        let phi_id = match ret.opcode.clone() {
            Opcode::Ret(Some(ValueId::Inst(id))) => id,
            _ => panic!("expected ret of an instruction"),
        };
        assert!(matches!(func.inst(phi_id).unwrap().opcode, Opcode::Phi(_)));
    }

    #[test]
    fn loop_back_edge_produces_trivial_phi_collapsed_away() {
        // A single-predecessor-at-definition-time loop header where the
        // only reaching definition (before and after the back edge) is the
        // same value collapses to that value instead of staying a PHI.
        let mut module = Module::new("m");
        let mut lowering = AccumulatorLowering::new(&mut module, "f", Type::Any, 0, "entry");
        let entry = lowering.current_block();
        let header = lowering.create_block("header");

        let zero = ValueId::Const(lowering.module.intern_constant(Constant::Integer(0, Type::I32)));
        lowering.lda(zero);
        lowering.sta(0, 0).unwrap();
        lowering.builder().br(header).unwrap();
        lowering.seal_block(entry).unwrap();

        lowering.position_at_end(header);
        // header is not sealed yet (its back edge from itself hasn't been
        // added): reading v0 here must not block on that.
        let _ = lowering.lda_reg(0, 0).unwrap();
        lowering.builder().br(header).unwrap();
        lowering.seal_block(header).unwrap();

        let func = lowering.finish().unwrap();
        assert!(func.verify().is_ok());
    }

    #[test]
    fn read_of_never_defined_vreg_reports_accumulator_underflow() {
        let mut module = Module::new("m");
        let mut lowering = AccumulatorLowering::new(&mut module, "f", Type::Any, 0, "entry");
        let entry = lowering.current_block();
        lowering.seal_block(entry).unwrap();
        let err = lowering.read_vreg(3, 42).unwrap_err();
        assert_eq!(err, LoweringError::AccumulatorUnderflow { offset: 42 });
    }
}
