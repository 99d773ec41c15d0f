//! Induction variables and loop counts
//!
//! The prepass records, per loop, how each sym redefined as `sym = sym + c`
//! changes over one iteration. Any other definition makes the change
//! indeterminate. A loop whose exit test compares a unit-stride induction
//! variable against an invariant bound gets a loop count, synthesized in
//! the landing pad when a bound check needs it.

use tracing::debug;

use super::bailout::{BailOutKind, InstrBailOut};
use super::GlobOpt;
use crate::analysis::flow_graph::{BlockId, BranchOp, LoopId, Terminator};
use crate::func::Func;
use crate::ir::instr::{Instr, Opcode};
use crate::ir::opnd::{Opnd, RegOpnd};
use crate::ir::sym::SymId;
use crate::ir::types::IrType;
use crate::value::{IntConstantBounds, Value, ValueInfo, ValueNumber, ValueType};

/// How a sym changes over one iteration of a loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InductionVariable {
    pub sym: SymId,
    /// Total change along the iteration, summed over every definition
    pub change_bounds: IntConstantBounds,
    /// Number of definitions in the loop body
    pub change_count: u32,
    /// Block of the last definition seen
    pub def_block: BlockId,
    pub is_change_determinate: bool,
    /// Value number the sym has on entry to the header in the real pass
    pub header_value_number: Option<ValueNumber>,
}

impl InductionVariable {
    /// First `sym = sym + change` seen in the loop
    pub fn new(sym: SymId, change: i32, def_block: BlockId) -> Self {
        InductionVariable {
            sym,
            change_bounds: IntConstantBounds::constant(change),
            change_count: 1,
            def_block,
            is_change_determinate: true,
            header_value_number: None,
        }
    }

    /// A definition the prepass cannot describe as a constant change
    pub fn indeterminate(sym: SymId, def_block: BlockId) -> Self {
        InductionVariable {
            sym,
            change_bounds: IntConstantBounds::FULL,
            change_count: 1,
            def_block,
            is_change_determinate: false,
            header_value_number: None,
        }
    }

    /// Another constant change in the same iteration
    pub fn add(&mut self, change: i32, def_block: BlockId) {
        self.change_count += 1;
        self.def_block = def_block;
        if !self.is_change_determinate {
            return;
        }
        let lower = self.change_bounds.lower_bound().checked_add(change);
        let upper = self.change_bounds.upper_bound().checked_add(change);
        match (lower, upper) {
            (Some(lower), Some(upper)) => self.change_bounds = IntConstantBounds::new(lower, upper),
            _ => self.set_change_is_indeterminate(),
        }
    }

    pub fn set_change_is_indeterminate(&mut self) {
        self.is_change_determinate = false;
        self.change_bounds = IntConstantBounds::FULL;
    }

    /// The sym never decreases (or never increases) across iterations
    pub fn is_change_unidirectional(&self) -> bool {
        self.is_change_determinate
            && (self.change_bounds.lower_bound() >= 0 || self.change_bounds.upper_bound() <= 0)
    }

    pub fn is_increasing(&self) -> bool {
        self.is_change_determinate && self.change_bounds.lower_bound() >= 0
    }

    pub fn is_decreasing(&self) -> bool {
        self.is_change_determinate && self.change_bounds.upper_bound() <= 0
    }

    /// Exact change per iteration, when there is a single definition
    pub fn exact_change(&self) -> Option<i32> {
        (self.is_change_determinate && self.change_count == 1 && self.change_bounds.is_constant())
            .then_some(self.change_bounds.lower_bound())
    }
}

/// Iteration count of a loop, minus one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopCount {
    /// Induction variable the exit test is on
    pub induction_sym: SymId,
    /// Known at compile time
    pub minus_one_constant: Option<i32>,
    /// Computed in the landing pad
    pub minus_one_sym: Option<SymId>,
}

/// Exit test `iv < bound` / `iv <= bound` staying in the loop on true
#[derive(Debug, Clone)]
struct ExitTest {
    induction_sym: SymId,
    bound: Opnd,
    inclusive: bool,
}

fn exit_test(func: &Func, loop_id: LoopId) -> Option<ExitTest> {
    let lp = func.graph.loop_(loop_id);
    let Terminator::Branch {
        op,
        src1,
        src2: Some(src2),
        then_block,
        else_block,
    } = &func.graph.block(lp.header).terminator
    else {
        return None;
    };
    if !lp.contains(*then_block) || lp.contains(*else_block) {
        return None;
    }
    let inclusive = match op {
        BranchOp::Lt => false,
        BranchOp::Le => true,
        _ => return None,
    };
    let induction_sym = func.syms.var_equiv(src1.as_reg()?.sym);
    Some(ExitTest {
        induction_sym,
        bound: src2.clone(),
        inclusive,
    })
}

impl<'c> GlobOpt<'c> {
    /// Record a definition of `dst` for the induction summary of every loop
    /// being prepassed
    pub(crate) fn track_induction_def(&mut self, func: &mut Func, instr: &Instr) {
        let Some(dst) = instr.dst_sym() else {
            return;
        };
        if func.syms.is_property(dst) {
            return;
        }
        let var = func.syms.var_equiv(dst);
        let change = induction_change(func, instr, var);

        for loop_id in self.prepass_loops(func) {
            let block = self.current_block;
            let ivs = &mut func.graph.loop_mut(loop_id).induction_variables;
            match (ivs.get_mut(&var), change) {
                (Some(iv), Some(change)) => iv.add(change, block),
                (Some(iv), None) => {
                    iv.change_count += 1;
                    iv.def_block = block;
                    iv.set_change_is_indeterminate();
                }
                (None, Some(change)) => {
                    ivs.insert(var, InductionVariable::new(var, change, block));
                }
                (None, None) => {
                    ivs.insert(var, InductionVariable::indeterminate(var, block));
                }
            }
        }
    }

    /// Exit test, start value and bound a loop count can be computed from
    fn loop_count_inputs(&self, func: &Func, loop_id: LoopId) -> Option<(ExitTest, Value, LoopBound)> {
        if !self.config.loop_count_based_bound_check_hoist {
            return None;
        }
        let test = exit_test(func, loop_id)?;
        let lp = func.graph.loop_(loop_id);
        let iv = lp.induction_variables.get(&test.induction_sym)?;
        if iv.exact_change() != Some(1) {
            return None;
        }
        // The increment must run exactly once per iteration
        if !lp.back_edges.iter().all(|tail| func.graph.dominates(iv.def_block, *tail)) {
            return None;
        }
        if let Some(bound_sym) = test.bound.sym() {
            if lp.syms_def_in_loop.test(func.syms.var_equiv(bound_sym)) {
                return None;
            }
        }

        let start = self.landing_pad_int_value(func, loop_id, test.induction_sym)?;
        let bound = match &test.bound {
            Opnd::IntConst(c) => LoopBound::Constant(*c),
            Opnd::Reg(reg) => {
                let value = self.landing_pad_int_value(func, loop_id, reg.sym)?;
                match value.info().try_get_int_constant_value(false) {
                    Some(c) => LoopBound::Constant(c),
                    None => LoopBound::Sym(reg.sym),
                }
            }
            _ => return None,
        };
        Some((test, start, bound))
    }

    /// Whether `loop_id` has or can get a loop count
    pub(crate) fn can_generate_loop_count(&self, func: &Func, loop_id: LoopId) -> bool {
        func.graph.loop_(loop_id).loop_count.is_some() || self.loop_count_inputs(func, loop_id).is_some()
    }

    /// Loop count of `loop_id`, synthesized in its landing pad on first use
    pub(crate) fn generate_loop_count(&mut self, func: &mut Func, loop_id: LoopId) -> Option<LoopCount> {
        if let Some(count) = &func.graph.loop_(loop_id).loop_count {
            return Some(count.clone());
        }
        let (test, start, bound) = self.loop_count_inputs(func, loop_id)?;
        let pad = func.graph.loop_(loop_id).landing_pad;
        let extra = if test.inclusive { 0 } else { -1 };

        let count = match (&bound, start.info().try_get_int_constant_value(false)) {
            (LoopBound::Constant(b), Some(s)) => {
                let minus_one = (*b as i64) - (s as i64) + extra as i64;
                if minus_one < 0 || minus_one > i32::MAX as i64 {
                    return None;
                }
                LoopCount {
                    induction_sym: test.induction_sym,
                    minus_one_constant: Some(minus_one as i32),
                    minus_one_sym: None,
                }
            }
            _ => {
                let bound_opnd = match bound {
                    LoopBound::Constant(c) => Opnd::IntConst(c),
                    LoopBound::Sym(sym) => self.int_opnd_in_landing_pad(func, loop_id, sym)?,
                };
                let start_opnd = self.int_opnd_in_landing_pad(func, loop_id, test.induction_sym)?;
                let bail_target = self.ensure_bail_target(func, loop_id);
                let minus_one = func.syms.new_stack_sym(IrType::Int32);
                let mut sub = Instr::new(Opcode::Sub)
                    .with_dst(Opnd::Reg(RegOpnd::new(minus_one, IrType::Int32)))
                    .with_src1(bound_opnd)
                    .with_src2(start_opnd);
                sub.bailout = Some(InstrBailOut {
                    kind: BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK,
                    info: bail_target,
                });
                self.insert_instr_in_landing_pad(func, loop_id, sub);
                if extra != 0 {
                    let mut adjust = Instr::new(Opcode::Add)
                        .with_dst(Opnd::Reg(RegOpnd::new(minus_one, IrType::Int32)))
                        .with_src1(Opnd::Reg(RegOpnd::new(minus_one, IrType::Int32)))
                        .with_src2(Opnd::IntConst(extra));
                    adjust.bailout = Some(InstrBailOut {
                        kind: BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK,
                        info: bail_target,
                    });
                    self.insert_instr_in_landing_pad(func, loop_id, adjust);
                }
                let vn = self.value_numbers.next();
                self.set_landing_pad_value(func, loop_id, minus_one, Value::new(vn, ValueInfo::new_generic(ValueType::INT)));
                LoopCount {
                    induction_sym: test.induction_sym,
                    minus_one_constant: None,
                    minus_one_sym: Some(minus_one),
                }
            }
        };

        debug!(target: "raya_globopt::bounds", loop_id = %loop_id, pad = %pad, ?count, "loop count generated");
        func.graph.loop_mut(loop_id).loop_count = Some(count.clone());
        Some(count)
    }

    /// Largest value an increasing induction variable takes in the body,
    /// as an operand valid in the landing pad
    ///
    /// `start + loop_count_minus_one * change`; the instructions computing
    /// it go to the landing pad.
    pub(crate) fn generate_secondary_induction_variable_bound(
        &mut self,
        func: &mut Func,
        loop_id: LoopId,
        index_sym: SymId,
        count: &LoopCount,
    ) -> Option<Opnd> {
        let iv = func.graph.loop_(loop_id).induction_variables.get(&index_sym)?.clone();
        let change = iv.exact_change().filter(|c| *c > 0)?;
        let start = self.landing_pad_int_value(func, loop_id, index_sym)?;

        if let (Some(s), Some(n)) = (start.info().try_get_int_constant_value(false), count.minus_one_constant) {
            let max = (s as i64) + (n as i64) * (change as i64);
            return i32::try_from(max).ok().map(Opnd::IntConst);
        }

        // Non-constant counts only for unit stride; no multiply in the landing pad
        if change != 1 {
            return None;
        }
        let count_opnd = match (count.minus_one_sym, count.minus_one_constant) {
            (Some(sym), _) => Opnd::Reg(RegOpnd::new(sym, IrType::Int32)),
            (None, Some(c)) => Opnd::IntConst(c),
            (None, None) => return None,
        };
        let start_opnd = self.int_opnd_in_landing_pad(func, loop_id, index_sym)?;
        let bail_target = self.ensure_bail_target(func, loop_id);
        let max = func.syms.new_stack_sym(IrType::Int32);
        let mut add = Instr::new(Opcode::Add)
            .with_dst(Opnd::Reg(RegOpnd::new(max, IrType::Int32)))
            .with_src1(start_opnd)
            .with_src2(count_opnd);
        add.bailout = Some(InstrBailOut {
            kind: BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK,
            info: bail_target,
        });
        self.insert_instr_in_landing_pad(func, loop_id, add);
        let vn = self.value_numbers.next();
        self.set_landing_pad_value(func, loop_id, max, Value::new(vn, ValueInfo::new_generic(ValueType::INT)));
        Some(Opnd::Reg(RegOpnd::new(max, IrType::Int32)))
    }
}

enum LoopBound {
    Constant(i32),
    Sym(SymId),
}

/// Constant change when `instr` is `var = var + c` or `var = var - c`
fn induction_change(func: &Func, instr: &Instr, var: SymId) -> Option<i32> {
    let negate = match instr.opcode {
        Opcode::Add => false,
        Opcode::Sub => true,
        _ => return None,
    };
    let src1 = instr.src1.as_ref()?;
    let src2 = instr.src2.as_ref()?;
    let is_var = |opnd: &Opnd| opnd.as_reg().is_some_and(|r| func.syms.var_equiv(r.sym) == var);
    let change = if is_var(src1) {
        src2.int_const()?
    } else if !negate && is_var(src2) {
        src1.int_const()?
    } else {
        return None;
    };
    if negate {
        change.checked_neg()
    } else {
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_accumulate() {
        let mut iv = InductionVariable::new(SymId(1), 1, BlockId(2));
        assert_eq!(iv.exact_change(), Some(1));
        iv.add(2, BlockId(3));
        assert_eq!(iv.change_bounds, IntConstantBounds::constant(3));
        assert_eq!(iv.change_count, 2);
        assert_eq!(iv.exact_change(), None);
        assert!(iv.is_increasing());
    }

    #[test]
    fn test_overflowing_change_is_indeterminate() {
        let mut iv = InductionVariable::new(SymId(1), i32::MAX, BlockId(0));
        iv.add(1, BlockId(0));
        assert!(!iv.is_change_determinate);
        assert!(!iv.is_change_unidirectional());
        iv.add(1, BlockId(0));
        assert_eq!(iv.change_bounds, IntConstantBounds::FULL);
    }

    #[test]
    fn test_direction() {
        let down = InductionVariable::new(SymId(1), -2, BlockId(0));
        assert!(down.is_decreasing());
        assert!(!down.is_increasing());
        assert!(down.is_change_unidirectional());
        let zero = InductionVariable::new(SymId(1), 0, BlockId(0));
        assert!(zero.is_increasing() && zero.is_decreasing());
    }

    #[test]
    fn test_induction_change_forms() {
        let mut func = Func::new_for_test();
        let i = func.syms.new_bytecode_sym(0);
        let j = func.syms.new_bytecode_sym(1);
        let add = Instr::new(Opcode::Add)
            .with_dst(Opnd::reg(i))
            .with_src1(Opnd::IntConst(4))
            .with_src2(Opnd::reg(i));
        assert_eq!(induction_change(&func, &add, i), Some(4));
        let sub = Instr::new(Opcode::Sub)
            .with_dst(Opnd::reg(i))
            .with_src1(Opnd::reg(i))
            .with_src2(Opnd::IntConst(1));
        assert_eq!(induction_change(&func, &sub, i), Some(-1));
        let other = Instr::new(Opcode::Add)
            .with_dst(Opnd::reg(i))
            .with_src1(Opnd::reg(j))
            .with_src2(Opnd::IntConst(1));
        assert_eq!(induction_change(&func, &other, i), None);
        let reversed_sub = Instr::new(Opcode::Sub)
            .with_dst(Opnd::reg(i))
            .with_src1(Opnd::IntConst(1))
            .with_src2(Opnd::reg(i));
        assert_eq!(induction_change(&func, &reversed_sub, i), None);
    }
}
