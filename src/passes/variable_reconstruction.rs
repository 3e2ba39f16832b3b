//! Variable reconstruction (§4.8): heuristic naming that assigns stable,
//! source-like names to SSA values, purely for the pretty-printer — it never
//! rewrites an opcode or an operand. Grounded on `sway-ir`'s `instruction.rs`
//! (`examples/other_examples/.../3bc97104_FuelLabs-sway__sway-ir-src-instruction.rs.rs`),
//! the only example in the pack that attaches a persistent, printable name to
//! an otherwise-anonymous SSA value.
//!
//! Three sources feed a candidate base name, in order of how directly they
//! point at "this instruction is just reading variable X again":
//!   - `copy(src)`: inherits `src`'s own name, so a chain of copies the
//!     converter emitted for repeated reads of one source variable all
//!     render under the same base.
//!   - `get_property(_, "k")` / `get_element(_, k)` with a constant key:
//!     named after the literal key/index, since that's the only source-level
//!     hint a property/element read carries.
//!   - a `phi` inherits the earliest-seen (in CFG reverse postorder) base
//!     name among its incoming values — the documented tie-break for cases
//!     where a loop or branch merges two differently-named SSA values that
//!     both represent the same source variable.
//!
//! Every other instruction keeps whatever name it already had (typically the
//! `r<n>` register-provenance tag the converter stamped on it). Two
//! instructions sharing a base name are disambiguated with a `.<n>` suffix,
//! since the pretty-printer and parser both key instructions by name.

use std::collections::HashMap;

use crate::dominance::reverse_postorder;
use crate::error::PassResult;
use crate::function::Function;
use crate::module::ModuleView;
use crate::opcode::Opcode;
use crate::pass::{FunctionPass, PassMeta, Success};
use crate::value::{Constant, InstId, ValueId};

pub struct VariableReconstruction;

impl VariableReconstruction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VariableReconstruction {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMeta for VariableReconstruction {
    fn name(&self) -> &str {
        "variable_reconstruction"
    }
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        format!("v_{cleaned}")
    } else {
        cleaned
    }
}

/// The base name already assigned to `value`, if any — an argument's
/// declared name, or a previously-resolved instruction's base (its `name`
/// with any disambiguating `.<n>` suffix stripped back off).
fn existing_base(func: &Function, bases: &HashMap<InstId, String>, value: ValueId) -> Option<String> {
    match value {
        ValueId::Arg(i) => func.params.get(i as usize).and_then(|p| p.name.clone()).or(Some(format!("arg{i}"))),
        ValueId::Inst(id) => bases.get(&id).cloned(),
        _ => None,
    }
}

/// What base name, if any, `opcode` derives from its operands/constants —
/// everything except the `phi` tie-break, which needs the other incoming
/// bases to already be known.
fn derive_base(func: &Function, module: &ModuleView<'_>, bases: &HashMap<InstId, String>, opcode: &Opcode) -> Option<String> {
    match opcode {
        Opcode::Copy(src) => existing_base(func, bases, *src),
        Opcode::GetProperty { key: ValueId::Const(id), .. } => match module.constants.get(*id) {
            Some(Constant::Str(s)) => Some(sanitize(s)),
            _ => None,
        },
        Opcode::GetElement { index: ValueId::Const(id), .. } => match module.constants.get(*id) {
            Some(Constant::Integer(n, _)) => Some(format!("elem{n}")),
            _ => None,
        },
        _ => None,
    }
}

impl FunctionPass for VariableReconstruction {
    fn run_on_function(&mut self, func: &mut Function, module: &mut ModuleView<'_>) -> PassResult<Success> {
        let order = reverse_postorder(func);

        // `bases[id]` is the base name (pre-disambiguation-suffix) chosen
        // for instruction `id`, built up in the same reverse-postorder walk
        // the renaming itself uses — so a later instruction (including a
        // loop-carried phi) can always see an earlier one's base.
        let mut bases: HashMap<InstId, String> = HashMap::new();
        let mut first_seen_rank: HashMap<String, usize> = HashMap::new();
        let mut rank = 0usize;

        for block in &order {
            let Some(b) = func.block(*block) else { continue };
            for id in b.insts.clone() {
                let Some(inst) = func.inst(id) else { continue };
                let base = if let Opcode::Phi(incoming) = &inst.opcode {
                    incoming
                        .iter()
                        .filter_map(|(v, _)| existing_base(func, &bases, *v).map(|b| (b, first_seen_rank.get(&b).copied().unwrap_or(usize::MAX))))
                        .min_by_key(|(_, r)| *r)
                        .map(|(b, _)| b)
                } else {
                    derive_base(func, module, &bases, &inst.opcode)
                };
                if let Some(base) = base {
                    first_seen_rank.entry(base.clone()).or_insert(rank);
                    bases.insert(id, base);
                }
                rank += 1;
            }
        }

        let mut modified = false;
        let mut next_suffix: HashMap<String, u32> = HashMap::new();
        for block in &order {
            let Some(b) = func.block(*block) else { continue };
            for id in b.insts.clone() {
                let Some(base) = bases.get(&id) else { continue };
                let name = match next_suffix.get_mut(base) {
                    Some(n) => {
                        *n += 1;
                        format!("{base}.{n}")
                    }
                    None => {
                        next_suffix.insert(base.clone(), 1);
                        base.clone()
                    }
                };
                if let Some(inst) = func.inst_mut(id) {
                    if inst.name.as_deref() != Some(name.as_str()) {
                        inst.name = Some(name);
                        modified = true;
                    }
                }
            }
        }

        Ok(if modified { Success::changed() } else { Success::unchanged() })
    }
}
