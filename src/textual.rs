//! The stable, human-readable textual IR format (§6): `render_module`/
//! `render_function`/`render_instruction` produce it, `parse_module` is its
//! exact inverse, so that `build → textualize → parse → textualize` is the
//! identity property §8 asks for. No teacher counterpart exists for this
//! (the teacher's `Display` impls in `instruction.rs`/`function.rs`/
//! `module.rs` are one-directional, render-only); the render half is
//! grounded on those `Display` impls, the parse half is new.
//!
//! Grammar, informally: a module is a `module <name>` header, a block of
//! `@str.<id> = private constant "…"` / `@<name> = {external|global} <ty>`
//! declarations, then one `function … { … }` per function. Every
//! instruction line is `[%<name> = ]<mnemonic> [<type>] [<operands>]`; a
//! literal numeric operand always carries its own `:<type>` suffix (e.g.
//! `5:i32`) so a bare token is never ambiguous, and an instruction with a
//! non-`Void` result carries its result type right after the mnemonic so
//! the parser never has to infer it.
//!
//! Loop back-edges mean a PHI at a loop header can name an incoming value
//! defined later in the text (the loop latch). Parsing a function is
//! therefore two passes: the first pre-creates every block from a scan of
//! label lines, so a branch-target operand always resolves; the second
//! parses instructions in order, resolving every operand immediately
//! except a PHI's incoming values, which are deferred to a final pass once
//! the whole function is known — the same empty-placeholder-then-complete
//! shape `lowering.rs` already uses for on-the-fly SSA construction.

use std::collections::HashMap;
use std::fmt::Write as _;

use thiserror::Error;

use crate::function::{Function, Instruction};
use crate::module::Module;
use crate::opcode::{BinOp, CastOp, CmpOp, Opcode, UnOp};
use crate::types::Type;
use crate::value::{BlockId, ConstId, Constant, InstId, ValueId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TextualError {
    #[error("{0}")]
    Malformed(String),
}

type PResult<T> = Result<T, TextualError>;

fn err(msg: impl Into<String>) -> TextualError {
    TextualError::Malformed(msg.into())
}

// ---------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------

fn render_operand(v: ValueId, module: Option<&Module>, func: &Function) -> String {
    match v {
        ValueId::Const(id) => render_const_operand(id, module),
        ValueId::Arg(i) => format!("%arg{}", i),
        ValueId::Global(id) => match module.and_then(|m| m.global(id)) {
            Some(g) => format!("@{}", g.name),
            None => format!("@global{}", id.0),
        },
        ValueId::Block(b) => block_label(b, func),
        ValueId::Inst(i) => {
            let label = func.inst(i).and_then(|inst| inst.name.clone()).unwrap_or_else(|| i.0.to_string());
            format!("%{}", label)
        }
    }
}

fn block_label(b: BlockId, func: &Function) -> String {
    func.block(b).map(|bb| bb.name.clone()).unwrap_or_else(|| b.to_string())
}

fn render_const_operand(id: ConstId, module: Option<&Module>) -> String {
    match module.and_then(|m| m.constant(id)) {
        Some(Constant::Str(_)) => format!("@str.{}", id.0),
        Some(Constant::Integer(v, ty)) => format!("{}:{}", v, ty),
        Some(Constant::Float(v, ty)) => format!("{}:{}", v, ty),
        Some(other) => other.to_string(),
        None => format!("const{}", id.0),
    }
}

fn render_body(opcode: &Opcode, ty: &Type, module: Option<&Module>, func: &Function) -> String {
    let rv = |v: ValueId| render_operand(v, module, func);
    match opcode {
        Opcode::Ret(None) => "ret".to_string(),
        Opcode::Ret(Some(v)) => format!("ret {}", rv(*v)),
        Opcode::Br(b) => format!("br {}", block_label(*b, func)),
        Opcode::BrCond { cond, then_block, else_block } => {
            format!("br_cond {}, {}, {}", rv(*cond), block_label(*then_block, func), block_label(*else_block, func))
        }
        Opcode::BrCmp { cmp, lhs, rhs, then_block, else_block } => format!(
            "{} {}, {}, {}, {}",
            opcode.mnemonic(),
            rv(*lhs),
            rv(*rhs),
            block_label(*then_block, func),
            block_label(*else_block, func)
        ),
        Opcode::Throw(v) => format!("throw {}", rv(*v)),
        Opcode::Unreachable => "unreachable".to_string(),
        Opcode::Binary { op, lhs, rhs } => format!("{} {} {}, {}", op, ty, rv(*lhs), rv(*rhs)),
        Opcode::Unary { op, operand } => format!("{} {} {}", op, ty, rv(*operand)),
        Opcode::Compare { op, lhs, rhs } => format!("cmp_{} {} {}, {}", op, ty, rv(*lhs), rv(*rhs)),
        Opcode::Alloca(_) => format!("alloca {}", ty),
        Opcode::Load(ptr) => format!("load {} {}", ty, rv(*ptr)),
        Opcode::Store { value, ptr } => format!("store {}, {}", rv(*value), rv(*ptr)),
        Opcode::CreateEmptyObject => format!("create_empty_object {}", ty),
        Opcode::CreateEmptyArray(cap) => format!("create_empty_array {} {}", ty, cap),
        Opcode::GetProperty { object, key } => format!("get_property {} {}, {}", ty, rv(*object), rv(*key)),
        Opcode::SetProperty { object, key, value } => {
            format!("set_property {}, {}, {}", rv(*object), rv(*key), rv(*value))
        }
        Opcode::GetElement { array, index } => format!("get_element {} {}, {}", ty, rv(*array), rv(*index)),
        Opcode::SetElement { array, index, value } => {
            format!("set_element {}, {}, {}", rv(*array), rv(*index), rv(*value))
        }
        Opcode::Call { callee, args } => {
            format!("call {} {}", ty, join_operands(std::iter::once(*callee).chain(args.iter().copied()), &rv))
        }
        Opcode::CallThis { callee, this, args } => format!(
            "call_this {} {}",
            ty,
            join_operands(std::iter::once(*callee).chain(std::iter::once(*this)).chain(args.iter().copied()), &rv)
        ),
        Opcode::New { ctor, args } => {
            format!("new {} {}", ty, join_operands(std::iter::once(*ctor).chain(args.iter().copied()), &rv))
        }
        Opcode::CallRuntime { name, args } => {
            let mut parts = vec![format!("\"{}\"", name.escape_default())];
            parts.extend(args.iter().map(|a| rv(*a)));
            format!("call_runtime {} {}", ty, parts.join(", "))
        }
        Opcode::Phi(incoming) => {
            let parts: Vec<String> =
                incoming.iter().map(|(v, b)| format!("[{}, {}]", rv(*v), block_label(*b, func))).collect();
            format!("phi {} {}", ty, parts.join(", "))
        }
        Opcode::Select { cond, then_value, else_value } => {
            format!("select {} {}, {}, {}", ty, rv(*cond), rv(*then_value), rv(*else_value))
        }
        Opcode::Copy(v) => format!("copy {} {}", ty, rv(*v)),
        Opcode::Cast { op, value, .. } => format!("{} {} {}", cast_mnemonic(op), ty, rv(*value)),
        Opcode::Nop => "nop".to_string(),
    }
}

fn cast_mnemonic(op: &CastOp) -> &'static str {
    match op {
        CastOp::Trunc => "cast_trunc",
        CastOp::Zext => "cast_zext",
        CastOp::Sext => "cast_sext",
        CastOp::FpToI => "cast_fptoi",
        CastOp::UIToFp => "cast_uitofp",
        CastOp::SIToFp => "cast_sitofp",
        CastOp::Bitcast => "cast_bitcast",
    }
}

fn join_operands(values: impl Iterator<Item = ValueId>, rv: &impl Fn(ValueId) -> String) -> String {
    values.map(|v| rv(v)).collect::<Vec<_>>().join(", ")
}

fn render_instruction_line(inst: &Instruction, module: Option<&Module>, func: &Function) -> String {
    let body = render_body(&inst.opcode, &inst.ty, module, func);
    let line = if inst.ty == Type::Void {
        body
    } else {
        let name = inst.name.clone().unwrap_or_else(|| inst.id.0.to_string());
        format!("%{} = {}", name, body)
    };
    match func.compound_assignment(inst.id) {
        Some(op) => format!("{line}  ; {op}="),
        None => line,
    }
}

/// Renders one instruction without a module, for contexts (like `Function`'s
/// own `Display` impl) that have no module reference to resolve constants/
/// globals against; they fall back to a raw-id spelling for those operands.
pub fn render_instruction(inst: &Instruction, func: &Function) -> String {
    render_instruction_line(inst, None, func)
}

pub fn render_function(func: &Function, module: &Module) -> String {
    let mut out = String::new();
    write!(out, "function {}(", func.name).unwrap();
    for (i, p) in func.params.iter().enumerate() {
        if i > 0 {
            write!(out, ", ").unwrap();
        }
        write!(out, "{}", p.ty).unwrap();
    }
    writeln!(out, ") -> {} {{", func.ret_ty).unwrap();
    for block in func.blocks() {
        writeln!(out, "{}:", block.name).unwrap();
        for inst_id in &block.insts {
            if let Some(inst) = func.inst(*inst_id) {
                writeln!(out, "  {}", render_instruction_line(inst, Some(module), func)).unwrap();
            }
        }
    }
    write!(out, "}}").unwrap();
    out
}

pub fn render_module(module: &Module) -> String {
    let mut out = String::new();
    writeln!(out, "module {}", module.name).unwrap();
    let mut any_decls = false;
    for (id, c) in module.constants() {
        if let Constant::Str(s) = c {
            writeln!(out, "@str.{} = private constant \"{}\"", id.0, s.escape_default()).unwrap();
            any_decls = true;
        }
    }
    for (_, g) in module.globals() {
        writeln!(out, "@{} = {} {}", g.name, if g.is_external { "external" } else { "global" }, g.ty).unwrap();
        any_decls = true;
    }
    if any_decls {
        writeln!(out).unwrap();
    }
    let mut first = true;
    for function in module.functions() {
        if !first {
            writeln!(out).unwrap();
        }
        first = false;
        writeln!(out, "{}", render_function(function, module)).unwrap();
    }
    out
}

// ---------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------

/// Splits `s` at top-level occurrences of `sep`, respecting `(`/`)`
/// nesting and double-quoted substrings, so a quoted runtime-helper name or
/// a nested `function(...)`/`struct(...)` type token never gets split.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '"' => {
                in_string = !in_string;
                current.push(c);
            }
            '(' if !in_string => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_string => {
                depth -= 1;
                current.push(c);
            }
            c if c == sep && depth == 0 && !in_string => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn parse_type(s: &str) -> PResult<Type> {
    let s = s.trim();
    match s {
        "void" => return Ok(Type::Void),
        "i32" => return Ok(Type::I32),
        "i64" => return Ok(Type::I64),
        "f32" => return Ok(Type::F32),
        "f64" => return Ok(Type::F64),
        "bool" => return Ok(Type::Bool),
        "any" => return Ok(Type::Any),
        "object" => return Ok(Type::Object),
        "string" => return Ok(Type::String),
        "label" => return Ok(Type::Label),
        _ => {}
    }
    if let Some(inner) = s.strip_prefix("array(").and_then(|r| r.strip_suffix(')')) {
        return Ok(Type::array(parse_type(inner)?));
    }
    if let Some(inner) = s.strip_prefix("pointer(").and_then(|r| r.strip_suffix(')')) {
        return Ok(Type::pointer(parse_type(inner)?));
    }
    if let Some(inner) = s.strip_prefix("function(").and_then(|r| r.strip_suffix(')')) {
        let parts = split_top_level(inner, ',');
        let mut it = parts.into_iter();
        let ret = parse_type(&it.next().ok_or_else(|| err("function type with no return type"))?)?;
        let params = it.map(|p| parse_type(&p)).collect::<PResult<Vec<_>>>()?;
        return Ok(Type::function(ret, params));
    }
    if let Some(inner) = s.strip_prefix("struct(").and_then(|r| r.strip_suffix(')')) {
        let parts = split_top_level(inner, ',');
        let mut it = parts.into_iter();
        let name = it.next().ok_or_else(|| err("struct type with no name"))?;
        let fields = it
            .map(|p| {
                let (fname, fty) = p.split_once(':').ok_or_else(|| err(format!("malformed struct field '{}'", p)))?;
                Ok((fname.trim().to_string(), parse_type(fty)?))
            })
            .collect::<PResult<Vec<_>>>()?;
        return Ok(Type::struct_type(name.trim(), fields));
    }
    Err(err(format!("unrecognized type '{}'", s)))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_binop(s: &str) -> Option<BinOp> {
    Some(match s {
        "add" => BinOp::Add,
        "sub" => BinOp::Sub,
        "mul" => BinOp::Mul,
        "div" => BinOp::Div,
        "mod" => BinOp::Mod,
        "shl" => BinOp::Shl,
        "shr" => BinOp::Shr,
        "ashr" => BinOp::AShr,
        "and" => BinOp::And,
        "or" => BinOp::Or,
        "xor" => BinOp::Xor,
        "exp" => BinOp::Exp,
        _ => return None,
    })
}

fn parse_unop(s: &str) -> Option<UnOp> {
    Some(match s {
        "neg" => UnOp::Neg,
        "not" => UnOp::Not,
        "bitnot" => UnOp::BitNot,
        "inc" => UnOp::Inc,
        "dec" => UnOp::Dec,
        "typeof" => UnOp::Typeof,
        "to_number" => UnOp::ToNumber,
        "to_numeric" => UnOp::ToNumeric,
        "is_true" => UnOp::IsTrue,
        "is_false" => UnOp::IsFalse,
        _ => return None,
    })
}

fn parse_cmpop_suffix(s: &str) -> Option<CmpOp> {
    Some(match s {
        "eq" => CmpOp::Eq,
        "ne" => CmpOp::Ne,
        "lt" => CmpOp::Lt,
        "le" => CmpOp::Le,
        "gt" => CmpOp::Gt,
        "ge" => CmpOp::Ge,
        "strict_eq" => CmpOp::StrictEq,
        "strict_ne" => CmpOp::StrictNe,
        "isin" => CmpOp::IsIn,
        "instanceof" => CmpOp::InstanceOf,
        _ => return None,
    })
}

fn parse_cast_suffix(s: &str) -> Option<CastOp> {
    Some(match s {
        "trunc" => CastOp::Trunc,
        "zext" => CastOp::Zext,
        "sext" => CastOp::Sext,
        "fptoi" => CastOp::FpToI,
        "uitofp" => CastOp::UIToFp,
        "sitofp" => CastOp::SIToFp,
        "bitcast" => CastOp::Bitcast,
        _ => return None,
    })
}

fn fused_br_cmp(mnemonic: &str) -> Option<CmpOp> {
    Some(match mnemonic {
        "br_lt" => CmpOp::Lt,
        "br_le" => CmpOp::Le,
        "br_gt" => CmpOp::Gt,
        "br_ge" => CmpOp::Ge,
        "br_eq" => CmpOp::Eq,
        "br_ne" => CmpOp::Ne,
        _ => return None,
    })
}

struct ParseCtx<'a> {
    module: &'a mut Module,
    blocks: HashMap<String, BlockId>,
    values: HashMap<String, ValueId>,
}

impl<'a> ParseCtx<'a> {
    fn parse_operand(&mut self, tok: &str) -> PResult<ValueId> {
        let tok = tok.trim();
        if tok.is_empty() {
            return Err(err("empty operand"));
        }
        if let Some(rest) = tok.strip_prefix("%arg") {
            let n: u32 = rest.parse().map_err(|_| err(format!("bad argument operand '{}'", tok)))?;
            return Ok(ValueId::Arg(n));
        }
        if let Some(name) = tok.strip_prefix('%') {
            return self.values.get(name).copied().ok_or_else(|| err(format!("undefined value '{}'", tok)));
        }
        if let Some(rest) = tok.strip_prefix("@str.") {
            let id: u32 = rest.parse().map_err(|_| err(format!("bad string constant reference '{}'", tok)))?;
            return Ok(ValueId::Const(ConstId(id)));
        }
        if let Some(name) = tok.strip_prefix('@') {
            return self
                .module
                .global_id(name)
                .map(ValueId::Global)
                .ok_or_else(|| err(format!("undefined global '{}'", tok)));
        }
        match tok {
            "true" => return Ok(ValueId::Const(self.module.intern_constant(Constant::True))),
            "false" => return Ok(ValueId::Const(self.module.intern_constant(Constant::False))),
            "null" => return Ok(ValueId::Const(self.module.intern_constant(Constant::Null))),
            "undefined" => return Ok(ValueId::Const(self.module.intern_constant(Constant::Undefined))),
            "NaN" => return Ok(ValueId::Const(self.module.intern_constant(Constant::NaN))),
            _ => {}
        }
        if tok.starts_with('"') && tok.ends_with('"') && tok.len() >= 2 {
            let s = unescape(&tok[1..tok.len() - 1]);
            return Ok(ValueId::Const(self.module.intern_constant(Constant::Str(s))));
        }
        if let Some((lit, ty_str)) = tok.split_once(':') {
            let ty = parse_type(ty_str)?;
            return if ty.is_floating() {
                let v: f64 = lit.parse().map_err(|_| err(format!("bad float literal '{}'", tok)))?;
                Ok(ValueId::Const(self.module.intern_constant(Constant::Float(v, ty))))
            } else {
                let v: i64 = lit.parse().map_err(|_| err(format!("bad integer literal '{}'", tok)))?;
                Ok(ValueId::Const(self.module.intern_constant(Constant::Integer(v, ty))))
            };
        }
        self.blocks.get(tok).copied().map(ValueId::Block).ok_or_else(|| err(format!("undefined block '{}'", tok)))
    }

    fn resolve_block(&self, tok: &str) -> PResult<BlockId> {
        self.blocks.get(tok.trim()).copied().ok_or_else(|| err(format!("undefined block '{}'", tok)))
    }
}

/// A PHI parsed with its incoming values still as raw tokens. Resolved once
/// the whole function body is known, since an incoming value may be defined
/// by a block that appears later in the text (a loop latch).
struct PendingPhi {
    inst: InstId,
    incoming: Vec<(String, String)>,
}

fn split_mnemonic(rest: &str) -> (&str, &str) {
    match rest.trim().find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], rest[idx..].trim_start()),
        None => (rest.trim(), ""),
    }
}

/// Takes the leading type token off `rest` (a primitive name, or a
/// `kind(...)` constructor with balanced parens), returning the parsed type
/// and whatever follows it.
fn take_type(rest: &str) -> PResult<(Type, &str)> {
    let rest = rest.trim_start();
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] as char == '(' {
        let mut depth = 1i32;
        i += 1;
        while i < bytes.len() && depth > 0 {
            match bytes[i] as char {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
    }
    let (token, remainder) = rest.split_at(i);
    Ok((parse_type(token)?, remainder.trim_start()))
}

fn parse_phi_incoming(rest: &str) -> PResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    for part in split_top_level(rest, ',') {
        let part = part.trim();
        let Some(inner) = part.strip_prefix('[').and_then(|p| p.strip_suffix(']')) else {
            return Err(err(format!("malformed phi incoming pair '{}'", part)));
        };
        let mut pieces = inner.splitn(2, ',');
        let value = pieces.next().ok_or_else(|| err("empty phi incoming pair"))?.trim().to_string();
        let block = pieces.next().ok_or_else(|| err(format!("phi incoming pair missing block: '{}'", part)))?.trim().to_string();
        out.push((value, block));
    }
    Ok(out)
}

/// Splits off a trailing `; …` annotation (the compound-assignment hint
/// `render_instruction_line` appends) at the first top-level `;`, so the
/// code the mnemonic match below sees never has to know about it. Quote-aware
/// so a `call_runtime` helper name can never contain a `;` that gets mistaken
/// for one.
fn split_comment(line: &str) -> (&str, Option<&str>) {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            ';' if !in_string => return (line[..i].trim_end(), Some(line[i + 1..].trim())),
            _ => {}
        }
    }
    (line, None)
}

fn parse_instruction_line(
    line: &str,
    block_id: BlockId,
    func: &mut Function,
    ctx: &mut ParseCtx,
    pending_phis: &mut Vec<PendingPhi>,
) -> PResult<()> {
    let (line, comment) = split_comment(line.trim());
    // Only a result-binding line can start with '%' (every void-typed
    // mnemonic starts with a bare identifier), so quoted " = " substrings
    // inside e.g. a `call_runtime` helper name never get mistaken for the
    // binding separator.
    let (result_name, rhs) = if line.starts_with('%') {
        let (l, r) = line.split_once(" = ").ok_or_else(|| err(format!("malformed instruction line '{}'", line)))?;
        let name = l.trim().strip_prefix('%').ok_or_else(|| err(format!("malformed result binding '{}'", l)))?;
        (Some(name.to_string()), r.trim())
    } else {
        (None, line)
    };
    let (mnemonic, rest) = split_mnemonic(rhs);

    let mut push = |func: &mut Function, ctx: &mut ParseCtx, opcode: Opcode, ty: Type| -> PResult<InstId> {
        let id = func.push_instruction(block_id, opcode, ty, result_name.clone());
        if let Some(name) = &result_name {
            ctx.values.insert(name.clone(), ValueId::Inst(id));
        } else {
            ctx.values.insert(id.0.to_string(), ValueId::Inst(id));
        }
        if let Some(op) = comment.and_then(|c| parse_binop(c.strip_suffix('=')?)) {
            func.mark_compound_assignment(id, op);
        }
        Ok(id)
    };

    if let Some(cmp) = fused_br_cmp(mnemonic) {
        let parts = split_top_level(rest, ',');
        if parts.len() != 4 {
            return Err(err(format!("'{}' expects 4 operands, got {}", mnemonic, parts.len())));
        }
        let lhs = ctx.parse_operand(&parts[0])?;
        let rhs_v = ctx.parse_operand(&parts[1])?;
        let then_block = ctx.resolve_block(&parts[2])?;
        let else_block = ctx.resolve_block(&parts[3])?;
        push(func, ctx, Opcode::BrCmp { cmp, lhs, rhs: rhs_v, then_block, else_block }, Type::Void)?;
        return Ok(());
    }

    match mnemonic {
        "ret" => {
            let v = if rest.is_empty() { None } else { Some(ctx.parse_operand(rest)?) };
            push(func, ctx, Opcode::Ret(v), Type::Void)?;
        }
        "br" => {
            let target = ctx.resolve_block(rest)?;
            push(func, ctx, Opcode::Br(target), Type::Void)?;
        }
        "br_cond" => {
            let parts = split_top_level(rest, ',');
            if parts.len() != 3 {
                return Err(err(format!("'br_cond' expects 3 operands, got {}", parts.len())));
            }
            let cond = ctx.parse_operand(&parts[0])?;
            let then_block = ctx.resolve_block(&parts[1])?;
            let else_block = ctx.resolve_block(&parts[2])?;
            push(func, ctx, Opcode::BrCond { cond, then_block, else_block }, Type::Void)?;
        }
        "throw" => {
            let v = ctx.parse_operand(rest)?;
            push(func, ctx, Opcode::Throw(v), Type::Void)?;
        }
        "unreachable" => {
            push(func, ctx, Opcode::Unreachable, Type::Void)?;
        }
        "nop" => {
            push(func, ctx, Opcode::Nop, Type::Void)?;
        }
        "alloca" => {
            let (ty, _) = take_type(rest)?;
            let pointee = ty.clone();
            push(func, ctx, Opcode::Alloca(ty), Type::pointer(pointee))?;
        }
        "load" => {
            let (ty, rem) = take_type(rest)?;
            let ptr = ctx.parse_operand(rem)?;
            push(func, ctx, Opcode::Load(ptr), ty)?;
        }
        "store" => {
            let parts = split_top_level(rest, ',');
            if parts.len() != 2 {
                return Err(err(format!("'store' expects 2 operands, got {}", parts.len())));
            }
            let value = ctx.parse_operand(&parts[0])?;
            let ptr = ctx.parse_operand(&parts[1])?;
            push(func, ctx, Opcode::Store { value, ptr }, Type::Void)?;
        }
        "create_empty_object" => {
            let (ty, _) = take_type(rest)?;
            push(func, ctx, Opcode::CreateEmptyObject, ty)?;
        }
        "create_empty_array" => {
            let (ty, rem) = take_type(rest)?;
            let cap: u32 = rem.trim().parse().map_err(|_| err(format!("bad capacity hint '{}'", rem)))?;
            push(func, ctx, Opcode::CreateEmptyArray(cap), ty)?;
        }
        "get_property" => {
            let (ty, rem) = take_type(rest)?;
            let parts = split_top_level(rem, ',');
            if parts.len() != 2 {
                return Err(err(format!("'get_property' expects 2 operands, got {}", parts.len())));
            }
            let object = ctx.parse_operand(&parts[0])?;
            let key = ctx.parse_operand(&parts[1])?;
            push(func, ctx, Opcode::GetProperty { object, key }, ty)?;
        }
        "set_property" => {
            let parts = split_top_level(rest, ',');
            if parts.len() != 3 {
                return Err(err(format!("'set_property' expects 3 operands, got {}", parts.len())));
            }
            let object = ctx.parse_operand(&parts[0])?;
            let key = ctx.parse_operand(&parts[1])?;
            let value = ctx.parse_operand(&parts[2])?;
            push(func, ctx, Opcode::SetProperty { object, key, value }, Type::Void)?;
        }
        "get_element" => {
            let (ty, rem) = take_type(rest)?;
            let parts = split_top_level(rem, ',');
            if parts.len() != 2 {
                return Err(err(format!("'get_element' expects 2 operands, got {}", parts.len())));
            }
            let array = ctx.parse_operand(&parts[0])?;
            let index = ctx.parse_operand(&parts[1])?;
            push(func, ctx, Opcode::GetElement { array, index }, ty)?;
        }
        "set_element" => {
            let parts = split_top_level(rest, ',');
            if parts.len() != 3 {
                return Err(err(format!("'set_element' expects 3 operands, got {}", parts.len())));
            }
            let array = ctx.parse_operand(&parts[0])?;
            let index = ctx.parse_operand(&parts[1])?;
            let value = ctx.parse_operand(&parts[2])?;
            push(func, ctx, Opcode::SetElement { array, index, value }, Type::Void)?;
        }
        "call" => {
            let (ty, rem) = take_type(rest)?;
            let parts = split_top_level(rem, ',');
            if parts.is_empty() {
                return Err(err("'call' expects at least a callee operand"));
            }
            let callee = ctx.parse_operand(&parts[0])?;
            let args = parts[1..].iter().map(|p| ctx.parse_operand(p)).collect::<PResult<Vec<_>>>()?;
            push(func, ctx, Opcode::Call { callee, args }, ty)?;
        }
        "call_this" => {
            let (ty, rem) = take_type(rest)?;
            let parts = split_top_level(rem, ',');
            if parts.len() < 2 {
                return Err(err("'call_this' expects at least callee and this operands"));
            }
            let callee = ctx.parse_operand(&parts[0])?;
            let this = ctx.parse_operand(&parts[1])?;
            let args = parts[2..].iter().map(|p| ctx.parse_operand(p)).collect::<PResult<Vec<_>>>()?;
            push(func, ctx, Opcode::CallThis { callee, this, args }, ty)?;
        }
        "new" => {
            let (ty, rem) = take_type(rest)?;
            let parts = split_top_level(rem, ',');
            if parts.is_empty() {
                return Err(err("'new' expects at least a constructor operand"));
            }
            let ctor = ctx.parse_operand(&parts[0])?;
            let args = parts[1..].iter().map(|p| ctx.parse_operand(p)).collect::<PResult<Vec<_>>>()?;
            push(func, ctx, Opcode::New { ctor, args }, ty)?;
        }
        "call_runtime" => {
            let (ty, rem) = take_type(rest)?;
            let parts = split_top_level(rem, ',');
            if parts.is_empty() {
                return Err(err("'call_runtime' expects a runtime helper name"));
            }
            let name_tok = parts[0].trim();
            let name = name_tok
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .map(unescape)
                .ok_or_else(|| err(format!("'call_runtime' helper name must be quoted: '{}'", name_tok)))?;
            let args = parts[1..].iter().map(|p| ctx.parse_operand(p)).collect::<PResult<Vec<_>>>()?;
            push(func, ctx, Opcode::CallRuntime { name, args }, ty)?;
        }
        "phi" => {
            let (ty, rem) = take_type(rest)?;
            let incoming = parse_phi_incoming(rem)?;
            let id = push(func, ctx, Opcode::Phi(Vec::new()), ty)?;
            pending_phis.push(PendingPhi { inst: id, incoming });
        }
        "select" => {
            let (ty, rem) = take_type(rest)?;
            let parts = split_top_level(rem, ',');
            if parts.len() != 3 {
                return Err(err(format!("'select' expects 3 operands, got {}", parts.len())));
            }
            let cond = ctx.parse_operand(&parts[0])?;
            let then_value = ctx.parse_operand(&parts[1])?;
            let else_value = ctx.parse_operand(&parts[2])?;
            push(func, ctx, Opcode::Select { cond, then_value, else_value }, ty)?;
        }
        "copy" => {
            let (ty, rem) = take_type(rest)?;
            let v = ctx.parse_operand(rem)?;
            push(func, ctx, Opcode::Copy(v), ty)?;
        }
        _ if mnemonic.starts_with("cast_") => {
            let cast_op = parse_cast_suffix(&mnemonic[5..]).ok_or_else(|| err(format!("unknown cast opcode '{}'", mnemonic)))?;
            let (ty, rem) = take_type(rest)?;
            let v = ctx.parse_operand(rem)?;
            push(func, ctx, Opcode::Cast { op: cast_op, value: v, target: ty.clone() }, ty)?;
        }
        _ if mnemonic.starts_with("cmp_") => {
            let cmp_op = parse_cmpop_suffix(&mnemonic[4..]).ok_or_else(|| err(format!("unknown compare opcode '{}'", mnemonic)))?;
            let (_ty, rem) = take_type(rest)?;
            let parts = split_top_level(rem, ',');
            if parts.len() != 2 {
                return Err(err(format!("'{}' expects 2 operands, got {}", mnemonic, parts.len())));
            }
            let lhs = ctx.parse_operand(&parts[0])?;
            let rhs = ctx.parse_operand(&parts[1])?;
            push(func, ctx, Opcode::Compare { op: cmp_op, lhs, rhs }, Type::Bool)?;
        }
        _ if parse_binop(mnemonic).is_some() => {
            let op = parse_binop(mnemonic).unwrap();
            let (ty, rem) = take_type(rest)?;
            let parts = split_top_level(rem, ',');
            if parts.len() != 2 {
                return Err(err(format!("'{}' expects 2 operands, got {}", mnemonic, parts.len())));
            }
            let lhs = ctx.parse_operand(&parts[0])?;
            let rhs = ctx.parse_operand(&parts[1])?;
            push(func, ctx, Opcode::Binary { op, lhs, rhs }, ty)?;
        }
        _ if parse_unop(mnemonic).is_some() => {
            let op = parse_unop(mnemonic).unwrap();
            let (ty, rem) = take_type(rest)?;
            let operand = ctx.parse_operand(rem)?;
            push(func, ctx, Opcode::Unary { op, operand }, ty)?;
        }
        other => return Err(err(format!("unrecognized mnemonic '{}'", other))),
    }
    Ok(())
}

fn is_block_label_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && !line.contains(char::is_whitespace) && line.ends_with(':') && !line.starts_with('%')
}

fn parse_function_body(body_lines: &[&str], func: &mut Function, module: &mut Module) -> PResult<()> {
    let mut blocks = HashMap::new();
    for line in body_lines {
        if is_block_label_line(line) {
            let name = line.trim().trim_end_matches(':').to_string();
            let id = func.create_block(name.clone());
            blocks.insert(name, id);
        }
    }

    let mut ctx = ParseCtx { module, blocks, values: HashMap::new() };
    let mut pending_phis = Vec::new();
    let mut current_block: Option<BlockId> = None;
    for line in body_lines {
        if is_block_label_line(line) {
            current_block = ctx.blocks.get(line.trim().trim_end_matches(':')).copied();
            continue;
        }
        let Some(block_id) = current_block else {
            return Err(err(format!("instruction outside of any block: '{}'", line)));
        };
        parse_instruction_line(line, block_id, func, &mut ctx, &mut pending_phis)?;
    }

    for pending in pending_phis {
        let mut incoming = Vec::with_capacity(pending.incoming.len());
        for (value_tok, block_tok) in &pending.incoming {
            let value = ctx.parse_operand(value_tok)?;
            let block = ctx.resolve_block(block_tok)?;
            incoming.push((value, block));
        }
        func.set_phi_incoming(pending.inst, incoming);
    }
    Ok(())
}

/// Finds the index of the `)` matching the `(` at byte offset `open`.
fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match *b as char {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_function(lines: &[&str], module: &mut Module) -> PResult<()> {
    let header = lines.first().ok_or_else(|| err("empty function block"))?.trim();
    let header = header.strip_prefix("function ").ok_or_else(|| err(format!("malformed function header '{}'", header)))?;
    let open_paren = header.find('(').ok_or_else(|| err(format!("malformed function header '{}'", header)))?;
    let name = header[..open_paren].trim().to_string();
    let close_paren = matching_paren(header, open_paren)
        .ok_or_else(|| err(format!("malformed function header '{}'", header)))?;
    let params_str = &header[open_paren + 1..close_paren];
    let arrow = header.find("->").ok_or_else(|| err(format!("function header missing '->': '{}'", header)))?;
    let ret_str = header[arrow + 2..].trim_end_matches('{').trim();
    let ret_ty = parse_type(ret_str)?;

    let mut func = Function::new(name, ret_ty);
    for p in split_top_level(params_str, ',') {
        let ty = parse_type(&p)?;
        func.add_param(ty, None);
    }

    let body_lines = &lines[1..lines.len().saturating_sub(1)];
    parse_function_body(body_lines, &mut func, module)?;
    module.add_function(func);
    Ok(())
}

/// Parses the textual format produced by [`render_module`] back into a
/// `Module`. A function's own internal block/value ordering is exactly the
/// order its lines appear in, so re-rendering the result reproduces the
/// original text byte for byte.
pub fn parse_module(text: &str) -> PResult<Module> {
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| err("empty module text"))?.trim();
    let name = header.strip_prefix("module ").ok_or_else(|| err(format!("expected 'module <name>' header, got '{}'", header)))?;
    let mut module = Module::new(name.trim());

    let mut remaining: Vec<&str> = lines.collect();
    let mut i = 0;
    while i < remaining.len() {
        let line = remaining[i].trim();
        if line.is_empty() {
            i += 1;
            continue;
        }
        if line.starts_with("function ") {
            break;
        }
        if let Some(rest) = line.strip_prefix("@str.") {
            let (id_str, rest) = rest
                .split_once(" = private constant ")
                .ok_or_else(|| err(format!("malformed string constant line '{}'", line)))?;
            let id: u32 = id_str.trim().parse().map_err(|_| err(format!("bad string constant id in '{}'", line)))?;
            let lit = rest.trim();
            let lit = lit
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .ok_or_else(|| err(format!("malformed string literal in '{}'", line)))?;
            module.set_constant_at(ConstId(id), Constant::Str(unescape(lit)));
        } else if let Some(rest) = line.strip_prefix('@') {
            let (gname, rest) = rest.split_once(" = ").ok_or_else(|| err(format!("malformed global line '{}'", line)))?;
            let (kind, ty_str) = split_mnemonic(rest);
            let is_external = match kind {
                "external" => true,
                "global" => false,
                _ => return Err(err(format!("expected 'external' or 'global' in '{}'", line))),
            };
            let ty = parse_type(ty_str)?;
            module.add_global(gname.trim(), ty, is_external);
        } else {
            return Err(err(format!("unexpected top-level line '{}'", line)));
        }
        i += 1;
    }
    remaining.drain(..i);

    while !remaining.is_empty() {
        while remaining.first().map(|l| l.trim().is_empty()).unwrap_or(false) {
            remaining.remove(0);
        }
        if remaining.is_empty() {
            break;
        }
        let end = remaining.iter().position(|l| l.trim() == "}").ok_or_else(|| err("function block missing closing '}'"))?;
        let func_lines: Vec<&str> = remaining[..=end].to_vec();
        parse_function(&func_lines, &mut module)?;
        remaining.drain(..=end);
    }

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IRBuilder;
    use crate::opcode::{BinOp, CmpOp, UnOp};

    fn arithmetic_module() -> Module {
        let mut module = Module::new("arith");
        let mut f = Function::new("add_one", Type::I32);
        let x = f.add_param(Type::I32, None);
        let entry = f.create_block("entry");
        let one = ValueId::Const(module.intern_constant(Constant::Integer(1, Type::I32)));
        let mut b = IRBuilder::new(&mut f, entry);
        let sum = b.binary(BinOp::Add, ValueId::Arg(x), one, Type::I32).unwrap();
        b.ret(Some(ValueId::Inst(sum))).unwrap();
        module.add_function(f);
        module
    }

    #[test]
    fn render_then_parse_then_render_is_identity_for_straight_line_function() {
        let module = arithmetic_module();
        let rendered = render_module(&module);
        let parsed = parse_module(&rendered).expect("should parse");
        let rerendered = render_module(&parsed);
        assert_eq!(rendered, rerendered);
    }

    #[test]
    fn round_trip_handles_branch_with_phi() {
        let mut module = Module::new("branchy");
        let mut f = Function::new("abs", Type::I32);
        let x = f.add_param(Type::I32, None);
        let entry = f.create_block("entry");
        let neg_block = f.create_block("neg");
        let join = f.create_block("join");
        let zero = ValueId::Const(module.intern_constant(Constant::Integer(0, Type::I32)));

        let mut b = IRBuilder::new(&mut f, entry);
        b.br_cmp(CmpOp::Lt, ValueId::Arg(x), zero, neg_block, join).unwrap();

        b.position_at_end(neg_block);
        let negated = b.unary(UnOp::Neg, ValueId::Arg(x), Type::I32).unwrap();
        b.br(join).unwrap();

        b.position_at_end(join);
        let phi = b.phi(Type::I32).unwrap();
        f.set_phi_incoming(phi, vec![(ValueId::Arg(x), entry), (ValueId::Inst(negated), neg_block)]);
        let mut b = IRBuilder::new(&mut f, join);
        b.ret(Some(ValueId::Inst(phi))).unwrap();

        module.add_function(f);
        assert!(module.function("abs").unwrap().verify().is_ok());

        let rendered = render_module(&module);
        let parsed = parse_module(&rendered).expect("should parse");
        assert!(parsed.function("abs").unwrap().verify().is_ok());
        let rerendered = render_module(&parsed);
        assert_eq!(rendered, rerendered);
    }

    #[test]
    fn round_trip_handles_call_and_global() {
        let mut module = Module::new("calls");
        let callee_ty = Type::function(Type::I32, vec![Type::I32]);
        let callee = module.add_global("helper", callee_ty, true);
        let mut f = Function::new("caller", Type::I32);
        let entry = f.create_block("entry");
        let arg = ValueId::Const(module.intern_constant(Constant::Integer(7, Type::I32)));
        let mut b = IRBuilder::new(&mut f, entry);
        let call = b.call(ValueId::Global(callee), vec![arg], Type::I32).unwrap();
        b.ret(Some(ValueId::Inst(call))).unwrap();
        module.add_function(f);

        let rendered = render_module(&module);
        let parsed = parse_module(&rendered).expect("should parse");
        assert!(parsed.global_id("helper").is_some());
        let rerendered = render_module(&parsed);
        assert_eq!(rendered, rerendered);
    }

    #[test]
    fn round_trip_preserves_string_constant_slot() {
        let mut module = Module::new("strs");
        let s = module.intern_constant(Constant::Str("hello".into()));
        let mut f = Function::new("greet", Type::String);
        let entry = f.create_block("entry");
        let mut b = IRBuilder::new(&mut f, entry);
        let copy = b.copy(ValueId::Const(s), Type::String).unwrap();
        b.ret(Some(ValueId::Inst(copy))).unwrap();
        module.add_function(f);

        let rendered = render_module(&module);
        let parsed = parse_module(&rendered).expect("should parse");
        assert_eq!(parsed.constant(s), Some(&Constant::Str("hello".into())));
        assert_eq!(render_module(&parsed), rendered);
    }

    #[test]
    fn round_trip_survives_a_compound_assignment_annotation() {
        let mut module = Module::new("m");
        let mut f = Function::new("f", Type::I32);
        let x = f.add_param(Type::I32, None);
        let entry = f.create_block("entry");
        let one = ValueId::Const(module.intern_constant(Constant::Integer(1, Type::I32)));
        let mut b = IRBuilder::new(&mut f, entry);
        let sum = b.binary(BinOp::Add, ValueId::Arg(x), one, Type::I32).unwrap();
        b.ret(Some(ValueId::Inst(sum))).unwrap();
        f.mark_compound_assignment(sum, BinOp::Add);
        module.add_function(f);

        let rendered = render_module(&module);
        assert!(rendered.contains("; +="));
        let parsed = parse_module(&rendered).expect("a compound-assignment comment should still parse");
        let rerendered = render_module(&parsed);
        assert_eq!(rendered, rerendered);
    }

    #[test]
    fn malformed_mnemonic_is_rejected() {
        let text = "module m\nfunction f() -> void {\nentry:\n  bogus_op 1:i32\n}\n";
        assert!(parse_module(text).is_err());
    }
}
