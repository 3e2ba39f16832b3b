//! A decompiled bytecode module: the interned constant pool, the named
//! globals (external or local function/class bindings a `call`/`new` can
//! target), and the function table, keyed the way the teacher keys its
//! module-level tables — `IndexMap` rather than `HashMap` so two runs over
//! the same `.abc` file print functions and globals in the same order
//! (needed for the textual-IR golden tests in §8).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{VerifyError, VerifyResult};
use crate::function::Function;
use crate::types::Type;
use crate::value::{ConstId, Constant, GlobalId, GlobalValue, ValueId};

/// A disjoint, mutable view of a module's constant pool, borrowed apart from
/// its `functions` table (see [`Module::function_view_mut`]).
pub struct ConstantsMut<'a> {
    constants: &'a mut Vec<Constant>,
}

impl<'a> ConstantsMut<'a> {
    pub fn intern(&mut self, value: Constant) -> ConstId {
        if let Some(pos) = self.constants.iter().position(|c| c.structurally_eq(&value)) {
            return ConstId(pos as u32);
        }
        let id = ConstId(self.constants.len() as u32);
        self.constants.push(value);
        id
    }

    pub fn get(&self, id: ConstId) -> Option<&Constant> {
        self.constants.get(id.0 as usize)
    }
}

/// What a `FunctionPass` gets instead of `&mut Module`: constant interning
/// plus read-only global lookups, borrowed disjointly from the function
/// being rewritten.
pub struct ModuleView<'a> {
    pub constants: ConstantsMut<'a>,
    pub globals: &'a IndexMap<GlobalId, GlobalValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    constants: Vec<Constant>,
    globals: IndexMap<GlobalId, GlobalValue>,
    global_by_name: IndexMap<String, GlobalId>,
    functions: IndexMap<String, Function>,
    named_types: IndexMap<String, Type>,
    /// The upstream decoder's string pool: raw integer id -> literal, kept
    /// separate from `constants` (which is this module's own, structurally
    /// deduplicated table) so the converter can resolve a `str_<id>`
    /// bytecode operand back to its original text (§4.2, §6).
    string_pool: IndexMap<u32, String>,
    /// Synthesized identifier -> original name, e.g. `str_7` -> the literal
    /// at string-pool id 7, or `global_3` -> the method/global name at
    /// global-pool id 3. The pretty-printer consults this to recover
    /// source-level hints the converter had to paper over with placeholder
    /// ids (§4.2, §6 "preserved identifier hints").
    synthesized_names: IndexMap<String, String>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: Vec::new(),
            globals: IndexMap::new(),
            global_by_name: IndexMap::new(),
            functions: IndexMap::new(),
            named_types: IndexMap::new(),
            string_pool: IndexMap::new(),
            synthesized_names: IndexMap::new(),
        }
    }

    /// Records `literal` at the decoder's string-pool id `id`. Converting a
    /// `str_<id>` bytecode operand looks this table up rather than the
    /// `constants` table, which instead holds already-interned, deduplicated
    /// `Constant::Str` values.
    pub fn set_string_pool_entry(&mut self, id: u32, literal: impl Into<String>) {
        self.string_pool.insert(id, literal.into());
    }

    pub fn string_pool_entry(&self, id: u32) -> Option<&str> {
        self.string_pool.get(&id).map(|s| s.as_str())
    }

    pub fn register_synthesized_name(&mut self, synthetic: impl Into<String>, original: impl Into<String>) {
        self.synthesized_names.insert(synthetic.into(), original.into());
    }

    pub fn synthesized_name(&self, synthetic: &str) -> Option<&str> {
        self.synthesized_names.get(synthetic).map(|s| s.as_str())
    }

    /// Interns a constant, reusing an existing entry with the same
    /// structural value rather than duplicating it — the build-time half of
    /// what `ConstantCoalescing` otherwise has to do after the fact for
    /// constants the converter didn't intern through this path.
    pub fn intern_constant(&mut self, value: Constant) -> ConstId {
        if let Some(pos) = self.constants.iter().position(|c| c.structurally_eq(&value)) {
            return ConstId(pos as u32);
        }
        let id = ConstId(self.constants.len() as u32);
        self.constants.push(value);
        id
    }

    pub fn constant(&self, id: ConstId) -> Option<&Constant> {
        self.constants.get(id.0 as usize)
    }

    /// Places `value` at the exact constant-table slot `id`, padding any
    /// gap below it with `Constant::Undefined` placeholders. Used only by
    /// the textual parser to reproduce the `@str.<id>` identifiers a module
    /// was rendered with, since ordinary interning only ever appends.
    pub fn set_constant_at(&mut self, id: ConstId, value: Constant) {
        let index = id.0 as usize;
        if index >= self.constants.len() {
            self.constants.resize(index + 1, Constant::Undefined);
        }
        self.constants[index] = value;
    }

    pub fn constants(&self) -> impl Iterator<Item = (ConstId, &Constant)> {
        self.constants.iter().enumerate().map(|(i, c)| (ConstId(i as u32), c))
    }

    /// Splits the module into one function's arena plus a disjoint view of
    /// the module-level constant pool and globals table, so a `FunctionPass`
    /// can intern a folded/coalesced constant while it still holds `&mut
    /// Function` — the two borrows come from different fields of `self`, so
    /// this needs no interior mutability.
    pub fn function_view_mut(&mut self, name: &str) -> Option<(&mut Function, ModuleView<'_>)> {
        let Module { functions, constants, globals, .. } = self;
        let func = functions.get_mut(name)?;
        Some((func, ModuleView { constants: ConstantsMut { constants }, globals }))
    }

    pub fn add_global(&mut self, name: impl Into<String>, ty: Type, is_external: bool) -> GlobalId {
        let name = name.into();
        if let Some(existing) = self.global_by_name.get(&name) {
            return *existing;
        }
        let id = GlobalId(self.globals.len() as u32);
        self.globals.insert(id, GlobalValue { name: name.clone(), ty, is_external });
        self.global_by_name.insert(name, id);
        id
    }

    pub fn global(&self, id: GlobalId) -> Option<&GlobalValue> {
        self.globals.get(&id)
    }

    pub fn global_id(&self, name: &str) -> Option<GlobalId> {
        self.global_by_name.get(name).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalValue)> {
        self.globals.iter().map(|(id, g)| (*id, g))
    }

    pub fn add_named_type(&mut self, name: impl Into<String>, ty: Type) {
        self.named_types.insert(name.into(), ty);
    }

    pub fn named_type(&self, name: &str) -> Option<&Type> {
        self.named_types.get(name)
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions.insert(function.name.clone(), function);
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.get_mut(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.functions.values_mut()
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(|s| s.as_str())
    }

    /// Runs every function's structural verifier, then checks the
    /// cross-function references each function's operand graph makes back
    /// into this module's constant/global pools.
    pub fn verify(&self) -> VerifyResult<()> {
        for function in self.functions.values() {
            function.verify()?;
            for inst in function.insts() {
                for operand in inst.opcode.operands() {
                    match operand {
                        ValueId::Const(id) if self.constant(id).is_none() => {
                            return Err(VerifyError::DanglingOperand {
                                function: function.name.clone(),
                                block: "<module constants>".into(),
                                index: inst.id.0 as usize,
                            });
                        }
                        ValueId::Global(id) if self.global(id).is_none() => {
                            return Err(VerifyError::DanglingOperand {
                                function: function.name.clone(),
                                block: "<module globals>".into(),
                                index: inst.id.0 as usize,
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}
