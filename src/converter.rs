//! Bytecode → IR converter (§4.6): walks a method's decoded opcode stream,
//! drives `AccumulatorLowering`, and builds the CFG by resolving branch
//! targets and placing block boundaries at branch/target offsets. Grounded
//! on `cfg_builder.rs::build_cfg_from_instructions` — linear-scan block
//! splitting at labels/terminators, with an implicit jump synthesized when a
//! block falls through to the next without its own terminator — generalized
//! from that post-hoc, label-indexed splitting to a single pre-pass over
//! branch-target *offsets*, since here branch targets must be known before
//! any block exists for the builder to target.
//!
//! The `.abc` file reader and raw bytecode-stream decoder are out of scope
//! (§1): this module's input is already the decoded `(offset, opcode)`
//! stream such a decoder would hand off, not raw bytes.

use std::collections::HashMap;

use crate::error::{LoweringError, LoweringResult};
use crate::function::Function;
use crate::lowering::AccumulatorLowering;
use crate::module::Module;
use crate::opcode::{BinOp, CmpOp, UnOp};
use crate::types::Type;
use crate::value::{BlockId, Constant, ValueId};

/// One decoded bytecode operation. Mnemonics mirror the source machine's
/// single-accumulator, virtual-register model (§4.5): most operations read
/// their primary operand from the accumulator and write their result back
/// to it; a secondary operand, when one exists, is always an explicit vreg.
/// String/global references carry the *pool id* the upstream decoder
/// assigned, resolved against the module's string pool / synthesized-name
/// map (§4.2, §6) during conversion rather than before it.
#[derive(Debug, Clone, PartialEq)]
pub enum BytecodeOp {
    LdaVReg(u16),
    StaVReg(u16),
    LdaInt(i64),
    LdaFloat(f64),
    LdaStr(u32),
    LdaNull,
    LdaUndefined,
    LdaTrue,
    LdaFalse,
    LdaNaN,
    /// Loads a named external binding (global-pool id) into the accumulator.
    LdaGlobal(u32),

    Binary(BinOp, u16),
    Unary(UnOp),
    Compare(CmpOp, u16),
    /// Fused compare-and-branch: `if (acc <cmp> v<reg>) goto target else
    /// fall through`. `target` is an absolute offset.
    CompareAndBranch(CmpOp, u16, u32),

    Jump(u32),
    JumpIfTrue(u32),
    JumpIfFalse(u32),

    Throw,
    Return,
    ReturnUndefined,

    CreateEmptyObject,
    CreateEmptyArray(u32),
    GetPropertyByName(u32),
    SetPropertyByName(u32, u16),
    GetElement(u16),
    SetElement(u16, u16),

    Call { arg_regs: Vec<u16> },
    CallThis { this_reg: u16, arg_regs: Vec<u16> },
    NewObject { arg_regs: Vec<u16> },
    CallRuntime { name_str_id: u32, arg_regs: Vec<u16> },

    Nop,
}

impl BytecodeOp {
    /// The absolute offset(s) this opcode can transfer control to, or
    /// `None` if it isn't a control-flow instruction at all.
    fn branch_target(&self) -> Option<u32> {
        match self {
            BytecodeOp::Jump(t) | BytecodeOp::JumpIfTrue(t) | BytecodeOp::JumpIfFalse(t) => Some(*t),
            BytecodeOp::CompareAndBranch(_, _, t) => Some(*t),
            _ => None,
        }
    }

    /// Whether this opcode always ends the block it appears in (it either
    /// transfers control unconditionally/conditionally elsewhere, or exits
    /// the function). A block boundary is placed immediately after one.
    fn is_block_terminator(&self) -> bool {
        matches!(
            self,
            BytecodeOp::Jump(_)
                | BytecodeOp::JumpIfTrue(_)
                | BytecodeOp::JumpIfFalse(_)
                | BytecodeOp::CompareAndBranch(..)
                | BytecodeOp::Throw
                | BytecodeOp::Return
                | BytecodeOp::ReturnUndefined
        )
    }
}

/// One decoded instruction at its original stream offset.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    pub offset: u32,
    pub op: BytecodeOp,
}

/// A method's conversion inputs, per §6: the decoded instruction stream plus
/// the two counts needed to tell physical argument registers (the last
/// `num_args` vregs) apart from local temporaries.
pub struct MethodRecord {
    pub name: String,
    pub instructions: Vec<DecodedInstruction>,
    pub num_args: u16,
    pub num_vregs: u16,
}

/// Precomputed block layout: every boundary offset in ascending order, the
/// slice of instructions belonging to each, and how many predecessor edges
/// each boundary is statically known to receive — the count
/// `AccumulatorLowering::seal_block` is driven against as edges get wired.
struct BlockLayout {
    boundaries: Vec<u32>,
    instructions_by_boundary: HashMap<u32, Vec<DecodedInstruction>>,
    expected_preds: HashMap<u32, usize>,
}

fn compute_layout(instructions: &[DecodedInstruction]) -> LoweringResult<BlockLayout> {
    let mut errors = Vec::new();
    let offsets: std::collections::HashSet<u32> = instructions.iter().map(|i| i.offset).collect();

    let mut boundaries: std::collections::BTreeSet<u32> = std::collections::BTreeSet::new();
    if let Some(first) = instructions.first() {
        boundaries.insert(first.offset);
    }
    for (idx, inst) in instructions.iter().enumerate() {
        if let Some(target) = inst.op.branch_target() {
            if !offsets.contains(&target) {
                errors.push(LoweringError::BranchToMidInstruction { from: inst.offset, to: target });
            }
            boundaries.insert(target);
        }
        if inst.op.is_block_terminator() {
            if let Some(next) = instructions.get(idx + 1) {
                boundaries.insert(next.offset);
            }
        }
    }

    if !errors.is_empty() {
        return Err(LoweringError::Multiple(errors));
    }

    let boundaries: Vec<u32> = boundaries.into_iter().collect();
    let mut instructions_by_boundary: HashMap<u32, Vec<DecodedInstruction>> = HashMap::new();
    let mut current = match boundaries.first() {
        Some(b) => *b,
        None => return Ok(BlockLayout { boundaries, instructions_by_boundary, expected_preds: HashMap::new() }),
    };
    for inst in instructions {
        while boundaries.iter().any(|b| *b == inst.offset) && inst.offset != current {
            current = inst.offset;
        }
        instructions_by_boundary.entry(current).or_default().push(inst.clone());
    }

    let mut expected_preds: HashMap<u32, usize> = HashMap::new();
    for (i, boundary) in boundaries.iter().enumerate() {
        let block_insts = instructions_by_boundary.get(boundary).map(|v| v.as_slice()).unwrap_or(&[]);
        let last = block_insts.last();
        let explicit_targets: Vec<u32> = match last {
            Some(inst) => match &inst.op {
                BytecodeOp::Jump(t) => vec![*t],
                BytecodeOp::JumpIfTrue(t) | BytecodeOp::JumpIfFalse(t) => {
                    let mut v = vec![*t];
                    if let Some(next) = boundaries.get(i + 1) {
                        v.push(*next);
                    }
                    v
                }
                BytecodeOp::CompareAndBranch(_, _, t) => {
                    let mut v = vec![*t];
                    if let Some(next) = boundaries.get(i + 1) {
                        v.push(*next);
                    }
                    v
                }
                BytecodeOp::Throw | BytecodeOp::Return | BytecodeOp::ReturnUndefined => vec![],
                _ => match boundaries.get(i + 1) {
                    Some(next) => vec![*next],
                    None => vec![],
                },
            },
            None => match boundaries.get(i + 1) {
                Some(next) => vec![*next],
                None => vec![],
            },
        };
        for target in explicit_targets {
            *expected_preds.entry(target).or_insert(0) += 1;
        }
    }

    Ok(BlockLayout { boundaries, instructions_by_boundary, expected_preds })
}

/// Converts one decoded method into an SSA `Function` and adds it to
/// `module`. On any structural failure (undecodable branch target,
/// unterminated trailing block) no partial function is added — the whole
/// method is rejected, per §4.9.
pub fn convert_method(module: &mut Module, method: &MethodRecord) -> LoweringResult<()> {
    let layout = compute_layout(&method.instructions)?;
    if layout.boundaries.is_empty() {
        return Err(LoweringError::UnsealedBlockAtEnd { block: method.name.clone() });
    }

    let mut lowering = AccumulatorLowering::new(module, method.name.clone(), Type::Any, method.num_args, "entry");
    let entry_boundary = layout.boundaries[0];
    let mut block_of: HashMap<u32, BlockId> = HashMap::new();
    block_of.insert(entry_boundary, lowering.current_block());
    for &boundary in &layout.boundaries[1..] {
        let id = lowering.create_block(format!("bb{boundary}"));
        block_of.insert(boundary, id);
    }

    // Bind the physical argument registers (the last `num_args` vregs) to
    // their `Argument` values before any bytecode runs (§4.6 step 2).
    let first_arg_reg = method.num_vregs.saturating_sub(method.num_args);
    let entry_block = block_of[&entry_boundary];
    for i in 0..method.num_args {
        lowering.bind_argument(entry_block, first_arg_reg + i, i as u32);
    }

    // Every structural issue found while walking the stream (a bad vreg, a
    // branch that can't resolve, a trailing unterminated block) is collected
    // here rather than aborting on the first one, so a method with several
    // independent problems reports all of them in one `Multiple` (§4.9).
    let mut errors: Vec<LoweringError> = Vec::new();

    for (i, &boundary) in layout.boundaries.iter().enumerate() {
        let block_id = block_of[&boundary];
        lowering.position_at_end(block_id);
        let insts = layout.instructions_by_boundary.get(&boundary).cloned().unwrap_or_default();

        let fallthrough_block = layout.boundaries.get(i + 1).map(|b| block_of[b]);
        for inst in &insts {
            lower_one(
                &mut lowering,
                module_string(&lowering, inst),
                inst,
                &block_of,
                fallthrough_block,
                method.num_vregs,
                &mut errors,
            );
        }

        let terminated = insts.last().map(|i| i.op.is_block_terminator()).unwrap_or(false);
        if !terminated {
            match layout.boundaries.get(i + 1) {
                None => errors.push(LoweringError::UnsealedBlockAtEnd { block: format!("bb{boundary}") }),
                Some(&next_boundary) => {
                    let next_block = block_of[&next_boundary];
                    lowering.builder().br(next_block).expect("fallthrough: block already terminated");
                    seal_if_complete(&mut lowering, next_block, next_boundary, &layout.expected_preds, &mut errors);
                }
            }
        }

        if let Some(last) = insts.last() {
            for target in [last.op.branch_target()].into_iter().flatten() {
                if let Some(&target_block) = block_of.get(&target) {
                    seal_if_complete(&mut lowering, target_block, target, &layout.expected_preds, &mut errors);
                }
            }
            if matches!(last.op, BytecodeOp::JumpIfTrue(_) | BytecodeOp::JumpIfFalse(_) | BytecodeOp::CompareAndBranch(..)) {
                if let Some(&fallthrough_boundary) = layout.boundaries.get(i + 1) {
                    if let Some(&fallthrough_block) = block_of.get(&fallthrough_boundary) {
                        seal_if_complete(&mut lowering, fallthrough_block, fallthrough_boundary, &layout.expected_preds, &mut errors);
                    }
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(LoweringError::Multiple(errors));
    }

    let func: Function = lowering.finish()?;
    module.add_function(func);
    Ok(())
}

fn seal_if_complete(
    lowering: &mut AccumulatorLowering<'_>,
    block: BlockId,
    boundary: u32,
    expected_preds: &HashMap<u32, usize>,
    errors: &mut Vec<LoweringError>,
) {
    let expected = expected_preds.get(&boundary).copied().unwrap_or(0);
    if lowering.function().predecessors(block).len() >= expected {
        if let Err(e) = lowering.seal_block(block) {
            errors.push(e);
        }
    }
}

/// Looks up the literal a `str_<id>` operand refers to, via the module's
/// string pool (§4.2). A no-op placeholder when `inst` carries no string
/// operand — kept as a closure-style helper so `lower_one` doesn't need its
/// own module borrow split from `lowering`'s.
fn module_string(lowering: &AccumulatorLowering<'_>, inst: &DecodedInstruction) -> Option<String> {
    let id = match &inst.op {
        BytecodeOp::LdaStr(id) | BytecodeOp::GetPropertyByName(id) | BytecodeOp::SetPropertyByName(id, _) => *id,
        BytecodeOp::CallRuntime { name_str_id, .. } => *name_str_id,
        _ => return None,
    };
    lowering.module().string_pool_entry(id).map(str::to_string)
}

/// Lowers one decoded instruction, driving `lowering` and the IR builder.
/// Any structural problem (an out-of-range vreg, a branch target that isn't
/// a block boundary, a conditional branch with no fallthrough, an
/// accumulator/vreg read with no reaching definition) is pushed onto
/// `errors` rather than aborting `convert_method` outright — this lets the
/// whole stream keep being walked so every such problem in the method is
/// reported together (§4.9). Lowering of *this* instruction still stops at
/// its first problem, since later statements in the same bytecode op
/// generally depend on the value the failed step would have produced.
fn lower_one(
    lowering: &mut AccumulatorLowering<'_>,
    resolved_str: Option<String>,
    inst: &DecodedInstruction,
    block_of: &HashMap<u32, BlockId>,
    fallthrough_block: Option<BlockId>,
    num_vregs: u16,
    errors: &mut Vec<LoweringError>,
) {
    let check_reg = |reg: u16| -> LoweringResult<()> {
        if reg >= num_vregs {
            return Err(LoweringError::VRegOutOfRange { reg, num_vregs });
        }
        Ok(())
    };
    macro_rules! check {
        ($result:expr) => {
            match $result {
                Ok(v) => v,
                Err(e) => {
                    errors.push(e);
                    return;
                }
            }
        };
    }

    match &inst.op {
        BytecodeOp::LdaVReg(reg) => {
            check!(check_reg(*reg));
            let v = check!(lowering.read_vreg(*reg, inst.offset));
            lowering.lda(v);
        }
        BytecodeOp::StaVReg(reg) => {
            check!(check_reg(*reg));
            check!(lowering.sta(*reg, inst.offset));
        }
        BytecodeOp::LdaInt(n) => {
            let id = lowering.module_mut().intern_constant(Constant::Integer(*n, Type::I32));
            lowering.lda(ValueId::Const(id));
        }
        BytecodeOp::LdaFloat(f) => {
            let id = lowering.module_mut().intern_constant(Constant::Float(*f, Type::F64));
            lowering.lda(ValueId::Const(id));
        }
        BytecodeOp::LdaStr(_) => {
            let literal = resolved_str.unwrap_or_default();
            let id = lowering.module_mut().intern_constant(Constant::Str(literal));
            lowering.lda(ValueId::Const(id));
        }
        BytecodeOp::LdaNull => {
            let id = lowering.module_mut().intern_constant(Constant::Null);
            lowering.lda(ValueId::Const(id));
        }
        BytecodeOp::LdaUndefined => {
            let id = lowering.module_mut().intern_constant(Constant::Undefined);
            lowering.lda(ValueId::Const(id));
        }
        BytecodeOp::LdaTrue => {
            let id = lowering.module_mut().intern_constant(Constant::True);
            lowering.lda(ValueId::Const(id));
        }
        BytecodeOp::LdaFalse => {
            let id = lowering.module_mut().intern_constant(Constant::False);
            lowering.lda(ValueId::Const(id));
        }
        BytecodeOp::LdaNaN => {
            let id = lowering.module_mut().intern_constant(Constant::NaN);
            lowering.lda(ValueId::Const(id));
        }
        BytecodeOp::LdaGlobal(id) => {
            let key = format!("global_{id}");
            let name = lowering.module_mut().synthesized_name(&key).map(str::to_string).unwrap_or(key);
            let global_id = lowering.module_mut().add_global(name, Type::Any, true);
            lowering.lda(ValueId::Global(global_id));
        }

        BytecodeOp::Binary(op, reg) => {
            check!(check_reg(*reg));
            let rhs = check!(lowering.read_vreg(*reg, inst.offset));
            check!(lowering.binop_with_acc(*op, rhs, inst.offset));
        }
        BytecodeOp::Unary(op) => {
            check!(lowering.unary_with_acc(*op, inst.offset));
        }
        BytecodeOp::Compare(op, reg) => {
            check!(check_reg(*reg));
            let rhs = check!(lowering.read_vreg(*reg, inst.offset));
            check!(lowering.compare_with_acc(*op, rhs, inst.offset));
        }
        BytecodeOp::CompareAndBranch(op, reg, target) => {
            check!(check_reg(*reg));
            let rhs = check!(lowering.read_vreg(*reg, inst.offset));
            let then_block = check!(block_of.get(target).copied().ok_or(LoweringError::BranchToMidInstruction { from: inst.offset, to: *target }));
            let else_block = check!(fallthrough_block.ok_or(LoweringError::UnsealedBlockAtEnd { block: format!("bb{}", inst.offset) }));
            check!(lowering.compare_and_branch(*op, rhs, then_block, else_block, inst.offset));
        }

        BytecodeOp::Jump(target) => {
            let target_block = check!(block_of.get(target).copied().ok_or(LoweringError::BranchToMidInstruction { from: inst.offset, to: *target }));
            lowering.builder().br(target_block).expect("jump: block already terminated");
        }
        BytecodeOp::JumpIfTrue(target) => {
            let cond = check!(lowering.read_acc(inst.offset));
            let then_block = check!(block_of.get(target).copied().ok_or(LoweringError::BranchToMidInstruction { from: inst.offset, to: *target }));
            let else_block = check!(fallthrough_block.ok_or(LoweringError::UnsealedBlockAtEnd { block: format!("bb{}", inst.offset) }));
            lowering.builder().br_cond(cond, then_block, else_block).expect("jump_if_true: block already terminated");
        }
        BytecodeOp::JumpIfFalse(target) => {
            let cond = check!(lowering.read_acc(inst.offset));
            let else_block = check!(block_of.get(target).copied().ok_or(LoweringError::BranchToMidInstruction { from: inst.offset, to: *target }));
            let then_block = check!(fallthrough_block.ok_or(LoweringError::UnsealedBlockAtEnd { block: format!("bb{}", inst.offset) }));
            lowering.builder().br_cond(cond, then_block, else_block).expect("jump_if_false: block already terminated");
        }

        BytecodeOp::Throw => {
            let v = check!(lowering.read_acc(inst.offset));
            lowering.builder().throw(v).expect("throw: block already terminated");
        }
        BytecodeOp::Return => {
            check!(lowering.return_acc(inst.offset));
        }
        BytecodeOp::ReturnUndefined => {
            let id = lowering.module_mut().intern_constant(Constant::Undefined);
            lowering.lda(ValueId::Const(id));
            check!(lowering.return_acc(inst.offset));
        }

        BytecodeOp::CreateEmptyObject => {
            let v = lowering.builder().create_empty_object().expect("create_empty_object: block already terminated");
            lowering.lda(ValueId::Inst(v));
        }
        BytecodeOp::CreateEmptyArray(cap) => {
            let v = lowering.builder().create_empty_array(*cap).expect("create_empty_array: block already terminated");
            lowering.lda(ValueId::Inst(v));
        }
        BytecodeOp::GetPropertyByName(_) => {
            let object = check!(lowering.read_acc(inst.offset));
            let literal = resolved_str.unwrap_or_default();
            let key_id = lowering.module_mut().intern_constant(Constant::Str(literal));
            let v = lowering.builder().get_property(object, ValueId::Const(key_id)).expect("get_property: block already terminated");
            lowering.lda(ValueId::Inst(v));
        }
        BytecodeOp::SetPropertyByName(_, value_reg) => {
            check!(check_reg(*value_reg));
            let object = check!(lowering.read_acc(inst.offset));
            let literal = resolved_str.unwrap_or_default();
            let key_id = lowering.module_mut().intern_constant(Constant::Str(literal));
            let value = check!(lowering.read_vreg(*value_reg, inst.offset));
            lowering
                .builder()
                .set_property(object, ValueId::Const(key_id), value)
                .expect("set_property: block already terminated");
        }
        BytecodeOp::GetElement(index_reg) => {
            check!(check_reg(*index_reg));
            let array = check!(lowering.read_acc(inst.offset));
            let index = check!(lowering.read_vreg(*index_reg, inst.offset));
            let v = lowering.builder().get_element(array, index).expect("get_element: block already terminated");
            lowering.lda(ValueId::Inst(v));
        }
        BytecodeOp::SetElement(index_reg, value_reg) => {
            check!(check_reg(*index_reg));
            check!(check_reg(*value_reg));
            let array = check!(lowering.read_acc(inst.offset));
            let index = check!(lowering.read_vreg(*index_reg, inst.offset));
            let value = check!(lowering.read_vreg(*value_reg, inst.offset));
            lowering.builder().set_element(array, index, value).expect("set_element: block already terminated");
        }

        BytecodeOp::Call { arg_regs } => {
            for r in arg_regs {
                check!(check_reg(*r));
            }
            let callee = check!(lowering.read_acc(inst.offset));
            let args = check!(arg_regs.iter().map(|r| lowering.read_vreg(*r, inst.offset)).collect::<LoweringResult<Vec<_>>>());
            let v = lowering.builder().call(callee, args, Type::Any).expect("call: block already terminated");
            lowering.lda(ValueId::Inst(v));
        }
        BytecodeOp::CallThis { this_reg, arg_regs } => {
            check!(check_reg(*this_reg));
            for r in arg_regs {
                check!(check_reg(*r));
            }
            let callee = check!(lowering.read_acc(inst.offset));
            let this = check!(lowering.read_vreg(*this_reg, inst.offset));
            let args = check!(arg_regs.iter().map(|r| lowering.read_vreg(*r, inst.offset)).collect::<LoweringResult<Vec<_>>>());
            let v = lowering.builder().call_this(callee, this, args, Type::Any).expect("call_this: block already terminated");
            lowering.lda(ValueId::Inst(v));
        }
        BytecodeOp::NewObject { arg_regs } => {
            for r in arg_regs {
                check!(check_reg(*r));
            }
            let ctor = check!(lowering.read_acc(inst.offset));
            let args = check!(arg_regs.iter().map(|r| lowering.read_vreg(*r, inst.offset)).collect::<LoweringResult<Vec<_>>>());
            let v = lowering.builder().new_object(ctor, args).expect("new: block already terminated");
            lowering.lda(ValueId::Inst(v));
        }
        BytecodeOp::CallRuntime { arg_regs, .. } => {
            for r in arg_regs {
                check!(check_reg(*r));
            }
            let name = resolved_str.unwrap_or_default();
            let args = check!(arg_regs.iter().map(|r| lowering.read_vreg(*r, inst.offset)).collect::<LoweringResult<Vec<_>>>());
            let v = lowering.builder().call_runtime(name, args, Type::Any).expect("call_runtime: block already terminated");
            lowering.lda(ValueId::Inst(v));
        }

        BytecodeOp::Nop => {
            lowering.builder().nop().expect("nop: block already terminated");
        }
    }
}
