//! End-to-end array optimization scenarios through the public pipeline

use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;

use raya_globopt::analysis::{BasicBlock, BlockId, BranchOp};
use raya_globopt::ir::ArrayRegInfo;
use raya_globopt::value::{ObjectKind, TypedArrayKind};
use raya_globopt::{compile_function, BailOutKind, CompileOutput, Func, GlobOptConfig, IrBuilder, Opcode, Opnd, SymId, ValueType};

fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

fn compile(func: &mut Func) -> CompileOutput {
    init_tracing();
    let output = compile_function(func, &GlobOptConfig::default()).unwrap();
    assert!(!output.abandoned);
    output
}

fn opcodes(block: &BasicBlock) -> Vec<Opcode> {
    block.instrs.iter().map(|i| i.opcode).collect()
}

fn count(block: &BasicBlock, opcode: Opcode) -> usize {
    block.instrs.iter().filter(|i| i.opcode == opcode).count()
}

fn entry(func: &Func) -> &BasicBlock {
    func.graph.block(func.graph.entry)
}

fn array_info(func: &Func, opcode: Opcode) -> ArrayRegInfo {
    let access = entry(func).instrs.iter().find(|i| i.opcode == opcode).unwrap();
    access.src1.as_ref().unwrap().as_indir().unwrap().base.array.unwrap()
}

struct ArrayLoop {
    arr: SymId,
    header: BlockId,
    body: BlockId,
}

/// `for (i = 0; i < arr.length; i++) arr[i] = arr[i] + 1;` with an optional call in the body
fn build_increment_loop(func: &mut Func, with_call: bool) -> ArrayLoop {
    let mut b = IrBuilder::new(func);
    let (arr, i, n, t, u, f) = (b.var(0), b.var(1), b.var(2), b.var(3), b.var(4), b.var(5));
    let header = b.create_block();
    let body = b.create_block();
    let exit = b.create_block();

    b.ld_const(i, 0);
    b.jump(header);

    b.switch_to_block(header);
    b.ld_len(n, arr);
    b.branch(BranchOp::Lt, Opnd::reg(i), Some(Opnd::reg(n)), body, exit);

    b.switch_to_block(body);
    b.ld_elem(t, arr, Opnd::reg(i));
    b.add_const(u, t, 1);
    b.st_elem(arr, Opnd::reg(i), Opnd::reg(u));
    if with_call {
        b.call(None, f, &[]);
    }
    b.add_const(i, i, 1);
    b.jump(header);

    b.switch_to_block(exit);
    b.ret(None);

    ArrayLoop { arr, header, body }
}

#[test]
fn test_loop_bound_checks_hoisted_to_landing_pad() {
    let mut func = Func::new("increment_all");
    let shape = build_increment_loop(&mut func, false);
    func.set_param_value_type(shape.arr, ValueType::array(ObjectKind::Array, true));

    let output = compile(&mut func);

    let lp = &func.graph.loops()[0];
    assert_eq!(lp.header, shape.header);
    let pad = func.graph.block(lp.landing_pad);
    let hoisted: Vec<Opcode> = opcodes(pad)
        .into_iter()
        .filter(|op| op.is_optimizer_emitted())
        .collect();
    assert_eq!(
        hoisted,
        vec![
            Opcode::LdArrayLength,
            Opcode::BailOnNegative,
            Opcode::LdArrayHeadSegment,
            Opcode::LdArrayHeadSegmentLength,
            Opcode::BoundCheck,
            Opcode::BailTarget,
        ]
    );

    for block in [shape.header, shape.body] {
        let block = func.graph.block(block);
        assert_eq!(count(block, Opcode::BoundCheck), 0, "per-iteration bound check in {}", block.id);
        assert_eq!(count(block, Opcode::BailOnNotArray), 0);
        assert_eq!(count(block, Opcode::LdArrayHeadSegmentLength), 0);
    }
    assert_eq!(count(func.graph.block(shape.header), Opcode::LdLen), 0);

    let check = pad.instrs.iter().find(|i| i.opcode == Opcode::BoundCheck).unwrap();
    assert_eq!(check.bailout_kind(), BailOutKind::ON_FAILED_HOISTED_BOUND_CHECK);

    assert_eq!(output.hoisted.bound_checks, 1);
    assert_eq!(output.hoisted.length_loads, 1);
    assert_eq!(output.hoisted.array_checks, 0);
}

#[test]
fn test_call_in_loop_keeps_array_check_inside() {
    let mut func = Func::new("increment_all_with_call");
    let shape = build_increment_loop(&mut func, true);
    func.set_param_value_type(shape.arr, ValueType::array(ObjectKind::Array, true));

    let output = compile(&mut func);

    let lp = &func.graph.loops()[0];
    assert!(lp.js_array_kills.kills_all_arrays());
    let pad = func.graph.block(lp.landing_pad);
    assert_eq!(count(pad, Opcode::BailOnNotArray), 0);

    let in_loop: usize = [shape.header, shape.body]
        .into_iter()
        .map(|b| count(func.graph.block(b), Opcode::BailOnNotArray))
        .sum();
    assert!(in_loop >= 1, "array check must stay inside the loop");
    let check = [shape.header, shape.body]
        .into_iter()
        .flat_map(|b| func.graph.block(b).instrs.iter())
        .find(|i| i.opcode == Opcode::BailOnNotArray)
        .unwrap();
    assert_eq!(check.bailout_kind(), BailOutKind::ON_NOT_ARRAY);
    assert_eq!(output.hoisted.array_checks, 0);
}

#[test]
fn test_call_in_loop_keeps_virtual_typed_array_loads_inside() {
    let mut func = Func::new("sum_buffer_with_call");
    let (buffer, header, body) = {
        let mut b = IrBuilder::new(&mut func);
        let (buffer, i, n, t, f) = (b.var(0), b.var(1), b.var(2), b.var(3), b.var(4));
        let header = b.create_block();
        let body = b.create_block();
        let exit = b.create_block();

        b.ld_const(i, 0);
        b.jump(header);

        b.switch_to_block(header);
        b.branch(BranchOp::Lt, Opnd::reg(i), Some(Opnd::reg(n)), body, exit);

        b.switch_to_block(body);
        b.ld_elem(t, buffer, Opnd::reg(i));
        b.call(None, f, &[]);
        b.add_const(i, i, 1);
        b.jump(header);

        b.switch_to_block(exit);
        b.ret(None);
        (buffer, header, body)
    };
    func.set_param_value_type(
        buffer,
        ValueType::object(ObjectKind::VirtualTypedArray(TypedArrayKind::Int32)),
    );

    let output = compile(&mut func);

    let lp = &func.graph.loops()[0];
    assert!(lp.js_array_kills.kills_all_arrays());
    let pad = func.graph.block(lp.landing_pad);
    assert_eq!(count(pad, Opcode::LdArrayHeadSegment), 0);
    assert_eq!(count(pad, Opcode::LdArrayHeadSegmentLength), 0);
    let in_loop: usize = [header, body]
        .into_iter()
        .map(|b| count(func.graph.block(b), Opcode::LdArrayHeadSegment))
        .sum();
    assert_eq!(in_loop, 1);
    assert_eq!(output.hoisted.head_segment_loads, 0);
    assert_eq!(output.hoisted.head_segment_length_loads, 0);
}

#[test]
fn test_in_bounds_in_test_folds_to_true() {
    let mut func = Func::new("has_index");
    let (arr, i, r) = {
        let mut b = IrBuilder::new(&mut func);
        let (arr, i, t, r) = (b.var(0), b.var(1), b.var(2), b.var(3));
        b.ld_elem(t, arr, Opnd::reg(i));
        b.is_in(r, Opnd::reg(i), arr);
        b.ret(Some(Opnd::reg(r)));
        (arr, i, r)
    };
    func.set_param_value_type(arr, ValueType::array(ObjectKind::Array, true));
    func.set_param_value_type(i, ValueType::INT);

    compile(&mut func);

    let block = entry(&func);
    assert_eq!(count(block, Opcode::IsIn), 0);
    let folded = block
        .instrs
        .iter()
        .find(|instr| instr.dst_sym() == Some(r))
        .unwrap();
    assert_eq!(folded.opcode, Opcode::Ld);
    assert_eq!(folded.src1, Some(Opnd::BoolConst(true)));
    assert!(folded.src2.is_none());
    assert!(folded.bailout.is_none());
    // The element load's index conversion is the only one
    assert_eq!(count(block, Opcode::FromVar), 1);
    assert!(block
        .instrs
        .iter()
        .all(|instr| !instr.bailout_kind().contains(BailOutKind::INT_ONLY)));
    // Only the element load's own checks remain
    assert_eq!(count(block, Opcode::BoundCheck), 2);
}

#[test]
fn test_int_max_constant_index_keeps_upper_check() {
    let mut func = Func::new("last_slot");
    let arr = {
        let mut b = IrBuilder::new(&mut func);
        let (arr, t) = (b.var(0), b.var(1));
        b.ld_elem(t, arr, Opnd::IntConst(i32::MAX));
        b.ret(Some(Opnd::reg(t)));
        arr
    };
    func.set_param_value_type(arr, ValueType::array(ObjectKind::Array, true));

    compile(&mut func);

    let info = array_info(&func, Opcode::LdElem);
    assert!(info.eliminated_lower_bound_check);
    assert!(!info.eliminated_upper_bound_check);
    assert_eq!(count(entry(&func), Opcode::BoundCheck), 0);
}

#[test]
fn test_disabled_config_leaves_function_untouched() {
    let mut func = Func::new("untouched");
    let shape = build_increment_loop(&mut func, false);
    func.set_param_value_type(shape.arr, ValueType::array(ObjectKind::Array, true));
    let before = func.graph.instr_count();

    let output = compile_function(&mut func, &GlobOptConfig::disabled()).unwrap();

    assert!(!output.abandoned);
    assert_eq!(output.hoisted.total(), 0);
    assert_eq!(func.graph.instr_count(), before);
}
