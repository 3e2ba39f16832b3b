//! Merges structurally identical constants that ended up at different
//! constant-pool slots — typically because the bytecode converter interned
//! them before the module-level `intern_constant` dedup existed, or because
//! two passes each built the same constant independently (§4.8). The
//! module's own `intern_constant`/`ConstantsMut::intern` already prevent
//! *new* duplication; this pass is the one-time cleanup sweep for
//! duplicates that predate it, grounded on the same structural-equality
//! rule `Constant::structurally_eq` already uses for interning.

use std::collections::HashMap;

use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::{ConstId, ValueId};

pub struct ConstantCoalescing;

impl ConstantCoalescing {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConstantCoalescing {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for ConstantCoalescing {
    fn name(&self) -> &str {
        "constant_coalescing"
    }
}

impl FunctionPass for ConstantCoalescing {
    fn run_on_function(&mut self, func: &mut Function, module: &mut ModuleView<'_>) -> PassResult<Success> {
        let referenced: Vec<ConstId> = func
            .insts()
            .flat_map(|i| i.opcode.operands())
            .filter_map(|v| match v {
                ValueId::Const(c) => Some(c),
                _ => None,
            })
            .collect();

        let mut representative: HashMap<ConstId, ConstId> = HashMap::new();
        let mut canonical: Vec<(ConstId, crate::value::Constant)> = Vec::new();
        for id in referenced {
            if representative.contains_key(&id) {
                continue;
            }
            let Some(value) = module.constants.get(id).cloned() else { continue };
            let existing = canonical.iter().find(|(_, v)| v.structurally_eq(&value)).map(|(rep, _)| *rep);
            match existing {
                Some(rep) => {
                    representative.insert(id, rep);
                }
                None => {
                    representative.insert(id, id);
                    canonical.push((id, value));
                }
            }
        }

        let mut modified = false;
        for (dup, rep) in representative {
            if dup != rep {
                func.replace_all_uses_with(ValueId::Const(dup), ValueId::Const(rep));
                modified = true;
            }
        }

        Ok(if modified { Success::changed() } else { Success::unchanged() })
    }
}
