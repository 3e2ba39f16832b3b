//! Type propagation (§4.8): narrows `Any`-typed pure results once their
//! operands turn out to be more specific (typically after `ConstantFolding`/
//! `ConstantPropagation` have replaced an operand with a typed constant or
//! an earlier instruction has already been narrowed), and drops a
//! `to_number`/`to_numeric` conversion whose operand is already numeric —
//! the conversion is then a no-op. Grounded on `eval.rs`'s type-directed
//! evaluation and `types.rs::Type::is_numeric`; no teacher counterpart
//! (`optimizer.rs` never reasons about types, only values).

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::{Opcode, UnOp};
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::types::Type;
use crate::value::{InstId, ValueId};

pub struct TypePropagation;

impl TypePropagation {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TypePropagation {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for TypePropagation {
    fn name(&self) -> &str {
        "type_propagation"
    }
}

/// The static type of a value as currently known: a constant's own type, a
/// parameter's declared type, a global's declared type, or an already-typed
/// instruction's result type.
fn value_type(func: &Function, module: &ModuleView<'_>, id: ValueId) -> Type {
    match id {
        ValueId::Const(c) => module.constants.get(c).map(|v| v.ty()).unwrap_or(Type::Any),
        ValueId::Arg(i) => func.params.get(i as usize).map(|p| p.ty.clone()).unwrap_or(Type::Any),
        ValueId::Global(g) => module.globals.get(&g).map(|v| v.ty.clone()).unwrap_or(Type::Any),
        ValueId::Block(_) => Type::Label,
        ValueId::Inst(i) => func.inst(i).map(|inst| inst.ty.clone()).unwrap_or(Type::Any),
    }
}

/// What `opcode`'s result type should narrow to given its operands' current
/// types, or `None` if nothing more specific than `current` can be said yet.
fn refine_result_type(opcode: &Opcode, operand_types: &[Type], current: &Type) -> Option<Type> {
    if *current != Type::Any {
        return None;
    }
    match opcode {
        Opcode::Copy(_) => operand_types.first().filter(|t| **t != Type::Any).cloned(),
        Opcode::Unary { op, .. } if matches!(op, UnOp::Neg | UnOp::BitNot | UnOp::Inc | UnOp::Dec) => {
            operand_types.first().filter(|t| t.is_numeric()).cloned()
        }
        Opcode::Binary { .. } => {
            let (a, b) = (operand_types.first()?, operand_types.get(1)?);
            if a == b && a.is_numeric() {
                Some(a.clone())
            } else {
                None
            }
        }
        _ => None,
    }
}

impl FunctionPass for TypePropagation {
    fn run_on_function(&mut self, func: &mut Function, module: &mut ModuleView<'_>) -> PassResult<Success> {
        let mut modified = false;

        let ids: Vec<InstId> = func.insts().map(|i| i.id).collect();
        for id in ids {
            let Some(inst) = func.inst(id) else { continue };
            let Opcode::Unary { op, operand } = inst.opcode.clone() else { continue };
            if !matches!(op, UnOp::ToNumber | UnOp::ToNumeric) {
                continue;
            }
            if value_type(func, module, operand).is_numeric() {
                func.replace_all_uses_with(ValueId::Inst(id), operand);
                if !func.has_users(ValueId::Inst(id)) {
                    func.remove_instruction(id);
                }
                modified = true;
            }
        }

        loop {
            let mut changed_this_round = false;
            let ids: Vec<InstId> = func.insts().map(|i| i.id).collect();
            for id in ids {
                let (opcode, ty) = match func.inst(id) {
                    Some(inst) => (inst.opcode.clone(), inst.ty.clone()),
                    None => continue,
                };
                if ty != Type::Any {
                    continue;
                }
                let operand_types: Vec<Type> = opcode.operands().iter().map(|v| value_type(func, module, *v)).collect();
                if let Some(new_ty) = refine_result_type(&opcode, &operand_types, &ty) {
                    if let Some(inst_mut) = func.inst_mut(id) {
                        inst_mut.ty = new_ty;
                    }
                    changed_this_round = true;
                    modified = true;
                }
            }
            if !changed_this_round {
                break;
            }
        }

        Ok(if modified { Success::changed() } else { Success::unchanged() })
    }
}
