//! Stateful cursor over a `Function` (§4.4): one constructor per opcode,
//! following the insertion rules the accumulator lowering and the converter
//! both rely on — append to an unterminated block, insert ahead of an
//! existing terminator for late PHI/constant placement, and refuse a second
//! terminator outright.

use std::fmt;

use crate::function::Function;
use crate::opcode::{BinOp, CastOp, CmpOp, Opcode, UnOp};
use crate::types::Type;
use crate::value::{BlockId, InstId, ValueId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// The cursor's current block already ends in a terminator and the
    /// caller tried to append another one.
    BlockAlreadyTerminated { block: BlockId },
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderError::BlockAlreadyTerminated { block } => {
                write!(f, "block {} is already terminated", block)
            }
        }
    }
}

impl std::error::Error for BuilderError {}

pub type BuilderResult<T> = Result<T, BuilderError>;

pub struct IRBuilder<'f> {
    func: &'f mut Function,
    block: BlockId,
}

impl<'f> IRBuilder<'f> {
    pub fn new(func: &'f mut Function, block: BlockId) -> Self {
        Self { func, block }
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.block = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.block
    }

    pub fn function(&self) -> &Function {
        self.func
    }

    pub fn function_mut(&mut self) -> &mut Function {
        self.func
    }

    fn is_terminated(&self) -> bool {
        self.func.terminator(self.block).is_some()
    }

    /// The single insertion policy every constructor below routes through:
    /// append when unterminated, insert-before-terminator when terminated
    /// and `opcode` isn't itself one, refuse when both are terminators.
    fn insert(&mut self, opcode: Opcode, ty: Type, name: Option<String>) -> BuilderResult<InstId> {
        match self.func.terminator(self.block).map(|t| t.id) {
            None => Ok(self.func.push_instruction(self.block, opcode, ty, name)),
            Some(term_id) if !opcode.is_terminator() => {
                Ok(self.func.insert_before(term_id, opcode, ty, name))
            }
            Some(_) => Err(BuilderError::BlockAlreadyTerminated { block: self.block }),
        }
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> BuilderResult<InstId> {
        self.insert(Opcode::Ret(value), Type::Void, None)
    }

    pub fn br(&mut self, target: BlockId) -> BuilderResult<InstId> {
        self.insert(Opcode::Br(target), Type::Void, None)
    }

    pub fn br_cond(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) -> BuilderResult<InstId> {
        self.insert(Opcode::BrCond { cond, then_block, else_block }, Type::Void, None)
    }

    pub fn br_cmp(
        &mut self,
        cmp: CmpOp,
        lhs: ValueId,
        rhs: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    ) -> BuilderResult<InstId> {
        self.insert(Opcode::BrCmp { cmp, lhs, rhs, then_block, else_block }, Type::Void, None)
    }

    pub fn throw(&mut self, value: ValueId) -> BuilderResult<InstId> {
        self.insert(Opcode::Throw(value), Type::Void, None)
    }

    pub fn unreachable(&mut self) -> BuilderResult<InstId> {
        self.insert(Opcode::Unreachable, Type::Void, None)
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId, ty: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::Binary { op, lhs, rhs }, ty, None)
    }

    pub fn unary(&mut self, op: UnOp, operand: ValueId, ty: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::Unary { op, operand }, ty, None)
    }

    pub fn compare(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> BuilderResult<InstId> {
        self.insert(Opcode::Compare { op, lhs, rhs }, Type::Bool, None)
    }

    pub fn alloca(&mut self, ty: Type) -> BuilderResult<InstId> {
        let pointee = ty.clone();
        self.insert(Opcode::Alloca(ty), Type::pointer(pointee), None)
    }

    pub fn load(&mut self, ptr: ValueId, ty: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::Load(ptr), ty, None)
    }

    pub fn store(&mut self, value: ValueId, ptr: ValueId) -> BuilderResult<InstId> {
        self.insert(Opcode::Store { value, ptr }, Type::Void, None)
    }

    pub fn create_empty_object(&mut self) -> BuilderResult<InstId> {
        self.insert(Opcode::CreateEmptyObject, Type::Object, None)
    }

    pub fn create_empty_array(&mut self, capacity_hint: u32) -> BuilderResult<InstId> {
        self.insert(Opcode::CreateEmptyArray(capacity_hint), Type::array(Type::Any), None)
    }

    pub fn get_property(&mut self, object: ValueId, key: ValueId) -> BuilderResult<InstId> {
        self.insert(Opcode::GetProperty { object, key }, Type::Any, None)
    }

    pub fn set_property(&mut self, object: ValueId, key: ValueId, value: ValueId) -> BuilderResult<InstId> {
        self.insert(Opcode::SetProperty { object, key, value }, Type::Void, None)
    }

    pub fn get_element(&mut self, array: ValueId, index: ValueId) -> BuilderResult<InstId> {
        self.insert(Opcode::GetElement { array, index }, Type::Any, None)
    }

    pub fn set_element(&mut self, array: ValueId, index: ValueId, value: ValueId) -> BuilderResult<InstId> {
        self.insert(Opcode::SetElement { array, index, value }, Type::Void, None)
    }

    pub fn call(&mut self, callee: ValueId, args: Vec<ValueId>, ty: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::Call { callee, args }, ty, None)
    }

    pub fn call_this(&mut self, callee: ValueId, this: ValueId, args: Vec<ValueId>, ty: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::CallThis { callee, this, args }, ty, None)
    }

    pub fn new_object(&mut self, ctor: ValueId, args: Vec<ValueId>) -> BuilderResult<InstId> {
        self.insert(Opcode::New { ctor, args }, Type::Object, None)
    }

    pub fn call_runtime(&mut self, name: impl Into<String>, args: Vec<ValueId>, ty: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::CallRuntime { name: name.into(), args }, ty, None)
    }

    pub fn phi(&mut self, ty: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::Phi(Vec::new()), ty, None)
    }

    pub fn select(&mut self, cond: ValueId, then_value: ValueId, else_value: ValueId, ty: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::Select { cond, then_value, else_value }, ty, None)
    }

    pub fn copy(&mut self, value: ValueId, ty: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::Copy(value), ty, None)
    }

    pub fn cast(&mut self, op: CastOp, value: ValueId, target: Type) -> BuilderResult<InstId> {
        self.insert(Opcode::Cast { op, value, target: target.clone() }, target, None)
    }

    pub fn nop(&mut self) -> BuilderResult<InstId> {
        self.insert(Opcode::Nop, Type::Void, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_while_unterminated_then_inserts_before_terminator() {
        let mut func = Function::new("f", Type::I32);
        let entry = func.create_block("entry");
        let mut b = IRBuilder::new(&mut func, entry);
        b.ret(None).unwrap();
        let late = b.nop().unwrap();
        let block = b.function().block(entry).unwrap();
        assert_eq!(block.insts.len(), 2);
        assert_eq!(block.insts[0], late);
    }

    #[test]
    fn refuses_a_second_terminator() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let mut b = IRBuilder::new(&mut func, entry);
        b.ret(None).unwrap();
        let err = b.ret(None).unwrap_err();
        assert_eq!(err, BuilderError::BlockAlreadyTerminated { block: entry });
    }

    #[test]
    fn br_wires_predecessor_edge() {
        let mut func = Function::new("f", Type::Void);
        let entry = func.create_block("entry");
        let target = func.create_block("target");
        let mut b = IRBuilder::new(&mut func, entry);
        b.br(target).unwrap();
        assert_eq!(b.function().predecessors(target), &[entry]);
    }
}
