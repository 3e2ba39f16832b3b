//! End-to-end scenarios from the core spec's testable-properties section:
//! build a function by hand with `IRBuilder`, run the named transforms
//! (individually and via `PassPipeline::raising`), and check the raised
//! shape against the expected literal outcome.

use abc_ir::opcode::{BinOp, CmpOp, Opcode};
use abc_ir::pass::{FunctionPass, PassPipeline, Success};
use abc_ir::passes::{
    AggressiveDeadCodeElimination, BranchFolding, ConstantFolding, RedundantCopyElimination,
    SimplifyCfg,
};
use abc_ir::value::{Constant, ValueId};
use abc_ir::{Function, IRBuilder, Module, Type};

fn run_pass(module: &mut Module, fname: &str, pass: &mut dyn FunctionPass) -> Success {
    let (func, mut view) = module.function_view_mut(fname).unwrap();
    pass.run_on_function(func, &mut view).unwrap()
}

fn lit(module: &mut Module, v: i64) -> ValueId {
    ValueId::Const(module.intern_constant(Constant::Integer(v, Type::I32)))
}

/// Scenario 1 (§8): `c = 10 + 20; d = c * 2; e = d - 10; ret e` folds to a
/// single `ret 50`.
#[test]
fn constant_fold_chain_reduces_to_single_return() {
    let mut module = Module::new("m");
    let mut func = Function::new("f", Type::I32);
    let entry = func.create_block("entry");
    {
        let mut b = IRBuilder::new(&mut func, entry);
        let ten = lit(&mut module, 10);
        let twenty = lit(&mut module, 20);
        let two = lit(&mut module, 2);
        let ten_again = lit(&mut module, 10);
        let c = b.binary(BinOp::Add, ten, twenty, Type::I32).unwrap();
        let c_val = b.function().inst(c).unwrap().result();
        let d = b.binary(BinOp::Mul, c_val, two, Type::I32).unwrap();
        let d_val = b.function().inst(d).unwrap().result();
        let e = b.binary(BinOp::Sub, d_val, ten_again, Type::I32).unwrap();
        let e_val = b.function().inst(e).unwrap().result();
        b.ret(Some(e_val)).unwrap();
    }
    module.add_function(func);
    assert!(module.verify().is_ok());

    let mut cf = ConstantFolding::new();
    for _ in 0..8 {
        if !run_pass(&mut module, "f", &mut cf).modified {
            break;
        }
    }
    let mut adce = AggressiveDeadCodeElimination::new();
    for _ in 0..4 {
        if !run_pass(&mut module, "f", &mut adce).modified {
            break;
        }
    }

    let func = module.function("f").unwrap();
    let entry_block = func.block(func.entry.unwrap()).unwrap();
    assert_eq!(entry_block.insts.len(), 1, "only the final ret should remain");
    let ret = func.inst(entry_block.insts[0]).unwrap();
    match &ret.opcode {
        Opcode::Ret(Some(ValueId::Const(id))) => {
            assert_eq!(module.constant(*id).unwrap().as_i64(), Some(50));
        }
        other => panic!("expected ret of a folded constant, got {:?}", other),
    }
}

/// Scenario 2 (§8): `u1 = x*x; u2 = u1+x; r = x+1; ret r` with `u1`/`u2`
/// unused — ADCE leaves only `r = x+1; ret r`.
#[test]
fn aggressive_dce_removes_dead_computation() {
    let mut module = Module::new("m");
    let mut func = Function::new("g", Type::I32);
    let x = func.add_param(Type::I32, Some("x".into()));
    let entry = func.create_block("entry");
    {
        let mut b = IRBuilder::new(&mut func, entry);
        let one = lit(&mut module, 1);
        let u1 = b.binary(BinOp::Mul, ValueId::Arg(x), ValueId::Arg(x), Type::I32).unwrap();
        let u1_val = b.function().inst(u1).unwrap().result();
        b.binary(BinOp::Add, u1_val, ValueId::Arg(x), Type::I32).unwrap();
        let r = b.binary(BinOp::Add, ValueId::Arg(x), one, Type::I32).unwrap();
        let r_val = b.function().inst(r).unwrap().result();
        b.ret(Some(r_val)).unwrap();
    }
    module.add_function(func);
    assert!(module.verify().is_ok());

    let mut adce = AggressiveDeadCodeElimination::new();
    for _ in 0..4 {
        if !run_pass(&mut module, "g", &mut adce).modified {
            break;
        }
    }

    let func = module.function("g").unwrap();
    let entry_block = func.block(func.entry.unwrap()).unwrap();
    assert_eq!(entry_block.insts.len(), 2, "u1 and u2 should be gone, leaving r and ret");
    let first = func.inst(entry_block.insts[0]).unwrap();
    assert!(matches!(first.opcode, Opcode::Binary { op: BinOp::Add, .. }));
    assert!(matches!(func.inst(entry_block.insts[1]).unwrap().opcode, Opcode::Ret(_)));
}

/// Scenario 3 (§8): an if-else merging through a PHI must still verify, and
/// `SimplifyCFG` must not collapse the merge block (the PHI carries real
/// information — each predecessor contributes a distinct argument).
#[test]
fn if_else_with_phi_verifies_and_survives_simplify_cfg() {
    let mut module = Module::new("m");
    let mut func = Function::new("max", Type::I32);
    let a = func.add_param(Type::I32, Some("a".into()));
    let b_arg = func.add_param(Type::I32, Some("b".into()));
    let entry = func.create_block("entry");
    let then_block = func.create_block("then");
    let else_block = func.create_block("else");
    let merge = func.create_block("merge");

    {
        let mut b = IRBuilder::new(&mut func, entry);
        b.br_cmp(CmpOp::Gt, ValueId::Arg(a), ValueId::Arg(b_arg), then_block, else_block).unwrap();
    }
    {
        let mut b = IRBuilder::new(&mut func, then_block);
        b.br(merge).unwrap();
    }
    {
        let mut b = IRBuilder::new(&mut func, else_block);
        b.br(merge).unwrap();
    }
    {
        let mut b = IRBuilder::new(&mut func, merge);
        let phi = b.phi(Type::I32).unwrap();
        let phi_val = b.function().inst(phi).unwrap().result();
        b.function_mut().set_phi_incoming(
            phi,
            vec![(ValueId::Arg(a), then_block), (ValueId::Arg(b_arg), else_block)],
        );
        b.ret(Some(phi_val)).unwrap();
    }
    module.add_function(func);
    assert!(module.verify().is_ok());

    let mut simplify = SimplifyCfg::new();
    for _ in 0..4 {
        if !run_pass(&mut module, "max", &mut simplify).modified {
            break;
        }
    }

    let func = module.function("max").unwrap();
    assert_eq!(func.blocks().count(), 4, "merge has two real predecessors; SimplifyCFG must not fold it away");
    let merge_block = func.blocks().find(|b| b.name == "merge").unwrap();
    let phi_inst = func.inst(merge_block.insts[0]).unwrap();
    match &phi_inst.opcode {
        Opcode::Phi(incoming) => assert_eq!(incoming.len(), 2),
        other => panic!("expected the PHI to survive, got {:?}", other),
    }
    assert!(module.verify().is_ok());
}

/// Scenario 4 (§8): `acc_k = copy 2; v0 = copy acc_k; r = v0 + 3; ret r`
/// reduces to `ret 5` once copy elimination exposes the fold.
#[test]
fn copy_chain_then_constant_fold_reduces_to_single_return() {
    let mut module = Module::new("m");
    let mut func = Function::new("f", Type::I32);
    let entry = func.create_block("entry");
    {
        let mut b = IRBuilder::new(&mut func, entry);
        let two = lit(&mut module, 2);
        let three = lit(&mut module, 3);
        let acc_k = b.copy(two, Type::I32).unwrap();
        let acc_val = b.function().inst(acc_k).unwrap().result();
        let v0 = b.copy(acc_val, Type::I32).unwrap();
        let v0_val = b.function().inst(v0).unwrap().result();
        let r = b.binary(BinOp::Add, v0_val, three, Type::I32).unwrap();
        let r_val = b.function().inst(r).unwrap().result();
        b.ret(Some(r_val)).unwrap();
    }
    module.add_function(func);
    assert!(module.verify().is_ok());

    let mut rce = RedundantCopyElimination::new();
    let mut cf = ConstantFolding::new();
    let mut adce = AggressiveDeadCodeElimination::new();
    for _ in 0..8 {
        let a = run_pass(&mut module, "f", &mut rce).modified;
        let b = run_pass(&mut module, "f", &mut cf).modified;
        let c = run_pass(&mut module, "f", &mut adce).modified;
        if !(a || b || c) {
            break;
        }
    }

    let func = module.function("f").unwrap();
    let entry_block = func.block(func.entry.unwrap()).unwrap();
    assert_eq!(entry_block.insts.len(), 1);
    match &func.inst(entry_block.insts[0]).unwrap().opcode {
        Opcode::Ret(Some(ValueId::Const(id))) => {
            assert_eq!(module.constant(*id).unwrap().as_i64(), Some(5));
        }
        other => panic!("expected ret 5, got {:?}", other),
    }
}

/// Scenario 5 (§8): `c = 1 == 1; br_cond c, A, B; A: ret 1; B: ret 0`
/// collapses to a single block `ret 1` after fold + branch-fold + simplify.
#[test]
fn branch_folding_collapses_known_condition_to_one_block() {
    let mut module = Module::new("m");
    let mut func = Function::new("f", Type::I32);
    let entry = func.create_block("entry");
    let a_block = func.create_block("A");
    let b_block = func.create_block("B");
    {
        let mut b = IRBuilder::new(&mut func, entry);
        let one = lit(&mut module, 1);
        let one_again = lit(&mut module, 1);
        let cond = b.compare(CmpOp::Eq, one, one_again).unwrap();
        let cond_val = b.function().inst(cond).unwrap().result();
        b.br_cond(cond_val, a_block, b_block).unwrap();
    }
    {
        let mut b = IRBuilder::new(&mut func, a_block);
        let one = lit(&mut module, 1);
        b.ret(Some(one)).unwrap();
    }
    {
        let mut b = IRBuilder::new(&mut func, b_block);
        let zero = lit(&mut module, 0);
        b.ret(Some(zero)).unwrap();
    }
    module.add_function(func);
    assert!(module.verify().is_ok());

    let mut cf = ConstantFolding::new();
    let mut bf = BranchFolding::new();
    let mut scfg = SimplifyCfg::new();
    for _ in 0..8 {
        let a = run_pass(&mut module, "f", &mut cf).modified;
        let b = run_pass(&mut module, "f", &mut bf).modified;
        let c = run_pass(&mut module, "f", &mut scfg).modified;
        if !(a || b || c) {
            break;
        }
    }

    let func = module.function("f").unwrap();
    assert_eq!(func.blocks().count(), 1, "dead branch B and the br_cond should both be gone");
    let entry_block = func.block(func.entry.unwrap()).unwrap();
    match &func.inst(*entry_block.insts.last().unwrap()).unwrap().opcode {
        Opcode::Ret(Some(ValueId::Const(id))) => {
            assert_eq!(module.constant(*id).unwrap().as_i64(), Some(1));
        }
        other => panic!("expected ret 1, got {:?}", other),
    }
}

/// The full `PassPipeline::raising()` order reaches a fixed point on a
/// simple fold chain, and running it again reports no further change (§8:
/// "running it twice in a row reports modified = false on the second run").
#[test]
fn raising_pipeline_reaches_fixed_point_on_fold_chain() {
    let mut module = Module::new("m");
    let mut func = Function::new("f", Type::I32);
    let entry = func.create_block("entry");
    {
        let mut b = IRBuilder::new(&mut func, entry);
        let ten = lit(&mut module, 10);
        let twenty = lit(&mut module, 20);
        let c = b.binary(BinOp::Add, ten, twenty, Type::I32).unwrap();
        let c_val = b.function().inst(c).unwrap().result();
        b.ret(Some(c_val)).unwrap();
    }
    module.add_function(func);

    let mut pipeline = PassPipeline::raising();
    let modified = pipeline.run(&mut module).unwrap();
    assert!(modified);
    let modified_again = pipeline.run(&mut module).unwrap();
    assert!(!modified_again);

    let func = module.function("f").unwrap();
    let entry_block = func.block(func.entry.unwrap()).unwrap();
    assert_eq!(entry_block.insts.len(), 1);
}

/// §8 quantified invariant: for every operand edge `u -> d`, `d.users()`
/// contains `u`, and the converse holds for every user of `v`.
#[test]
fn def_use_and_use_def_agree() {
    let mut module = Module::new("m");
    let mut func = Function::new("f", Type::I32);
    let x = func.add_param(Type::I32, Some("x".into()));
    let entry = func.create_block("entry");
    {
        let mut b = IRBuilder::new(&mut func, entry);
        let add = b.binary(BinOp::Add, ValueId::Arg(x), ValueId::Arg(x), Type::I32).unwrap();
        let add_val = b.function().inst(add).unwrap().result();
        b.ret(Some(add_val)).unwrap();
    }
    module.add_function(func);

    let func = module.function("f").unwrap();
    for inst in func.insts() {
        for operand in inst.opcode.operands() {
            assert!(
                func.users(operand).contains(&inst.id),
                "operand {:?} of {:?} should list it as a user",
                operand,
                inst.id
            );
        }
    }
    for user in func.users(ValueId::Arg(x)) {
        let user_inst = func.inst(*user).unwrap();
        assert!(user_inst.opcode.operands().contains(&ValueId::Arg(x)));
    }
}

/// §8 quantified invariant: a block's successor set (derived from its
/// terminator) and each successor's predecessor set agree.
#[test]
fn cfg_successor_and_predecessor_sets_agree() {
    let mut module = Module::new("m");
    let mut func = Function::new("f", Type::Void);
    let entry = func.create_block("entry");
    let target = func.create_block("target");
    {
        let mut b = IRBuilder::new(&mut func, entry);
        b.br(target).unwrap();
    }
    {
        let mut b = IRBuilder::new(&mut func, target);
        b.ret(None).unwrap();
    }
    module.add_function(func);

    let func = module.function("f").unwrap();
    for block in func.blocks() {
        for succ in func.successors(block.id) {
            assert!(func.predecessors(succ).contains(&block.id));
        }
    }
}

/// §8 textual round-trip: `render -> parse -> render` is the identity on
/// the rendered text.
#[test]
fn textual_render_parse_render_roundtrip_is_stable() {
    let mut module = Module::new("m");
    let mut func = Function::new("f", Type::I32);
    let entry = func.create_block("entry");
    {
        let mut b = IRBuilder::new(&mut func, entry);
        let five = lit(&mut module, 5);
        let r = b.binary(BinOp::Add, five, five, Type::I32).unwrap();
        let r_val = b.function().inst(r).unwrap().result();
        b.ret(Some(r_val)).unwrap();
    }
    module.add_function(func);
    assert!(module.verify().is_ok());

    let rendered_once = abc_ir::render_module(&module);
    let reparsed = abc_ir::parse_module(&rendered_once).expect("round-tripped text should reparse");
    let rendered_twice = abc_ir::render_module(&reparsed);
    assert_eq!(rendered_once, rendered_twice);
}
