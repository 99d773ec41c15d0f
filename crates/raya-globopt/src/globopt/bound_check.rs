//! Int bound checks
//!
//! Every bound check is normalized to `left <= right + offset`. A lower
//! bound check on an index is `0 <= index + 0`, an upper bound check is
//! `index <= head_segment_length - 1`. Checks already performed are kept in
//! [`BlockData::available_int_bound_checks`] keyed by the value numbers of
//! `left` and `right`, so a later check on the same pair either is implied
//! or tightens the earlier instruction in place. Checks whose operands are
//! invariant in a loop, directly or through a relative bound or an
//! induction variable, move to the loop's landing pad.

use tracing::debug;

use super::block_data::{BlockData, BoundCheckKey};
use super::GlobOpt;
use crate::analysis::flow_graph::{BlockId, LoopId};
use crate::func::Func;
use crate::ir::instr::InstrRef;
use crate::ir::opnd::Opnd;
use crate::ir::sym::SymId;
use crate::value::{IntBounds, IntConstantBounds, Value, ValueInfo, ValueNumber, ZERO_VALUE_NUMBER};

/// A bound check performed on every path reaching a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntBoundCheck {
    pub left_vn: ValueNumber,
    pub right_vn: ValueNumber,
    pub instr: InstrRef,
    pub block: BlockId,
}

impl IntBoundCheck {
    pub fn new(left_vn: ValueNumber, right_vn: ValueNumber, instr: InstrRef, block: BlockId) -> Self {
        IntBoundCheck {
            left_vn,
            right_vn,
            instr,
            block,
        }
    }

    pub fn key(&self) -> BoundCheckKey {
        (self.left_vn, self.right_vn)
    }
}

/// Record a check as available, keeping an existing entry for the same key
pub fn add_available_bound_check(data: &mut BlockData, check: IntBoundCheck) -> bool {
    if data.available_int_bound_checks.contains_key(&check.key()) {
        return false;
    }
    data.available_int_bound_checks.insert(check.key(), check);
    true
}

// ---------------------------------------------------------------
// Value updates
// ---------------------------------------------------------------

/// Info of `value` once `value >= bound + offset` is known
///
/// `bound` is the bound's value when it has one, `bound_constant` its
/// constant bounds. Returns `None` when nothing new is learned.
pub fn update_int_bounds_for_greater_than_or_equal(
    value: &Value,
    bound: Option<&Value>,
    bound_constant: IntConstantBounds,
    offset: i32,
) -> Option<ValueInfo> {
    let info = value.info();
    if !info.ty().is_likely_int() {
        return None;
    }
    let mut bounds = current_bounds(info)?;
    let mut changed = false;

    if let Some(lower) = bound_constant.lower_bound().checked_add(offset) {
        if lower > bounds.constant_lower_bound() && lower <= bounds.constant_upper_bound() {
            bounds.set_constant_lower_bound(lower);
            changed = true;
        }
    }
    if let Some(bound) = bound {
        let vn = bound.number();
        if vn != value.number() && bounds.relative_lower_bound(vn).is_none_or(|existing| offset > existing) {
            bounds.set_lower_bound(vn, offset);
            changed = true;
        }
    }

    changed.then(|| rebuild(info, bounds))
}

/// Info of `value` once `value <= bound + offset` is known
pub fn update_int_bounds_for_less_than_or_equal(
    value: &Value,
    bound: Option<&Value>,
    bound_constant: IntConstantBounds,
    offset: i32,
) -> Option<ValueInfo> {
    let info = value.info();
    if !info.ty().is_likely_int() {
        return None;
    }
    let mut bounds = current_bounds(info)?;
    let mut changed = false;

    if let Some(upper) = bound_constant.upper_bound().checked_add(offset) {
        if upper < bounds.constant_upper_bound() && upper >= bounds.constant_lower_bound() {
            bounds.set_constant_upper_bound(upper);
            changed = true;
        }
    }
    if let Some(bound) = bound {
        let vn = bound.number();
        if vn != value.number() && bounds.relative_upper_bound(vn).is_none_or(|existing| offset < existing) {
            bounds.set_upper_bound(vn, offset);
            changed = true;
        }
    }

    changed.then(|| rebuild(info, bounds))
}

/// `value > bound + offset`
pub fn update_int_bounds_for_greater_than(
    value: &Value,
    bound: Option<&Value>,
    bound_constant: IntConstantBounds,
    offset: i32,
) -> Option<ValueInfo> {
    update_int_bounds_for_greater_than_or_equal(value, bound, bound_constant, offset.checked_add(1)?)
}

/// `value < bound + offset`
pub fn update_int_bounds_for_less_than(
    value: &Value,
    bound: Option<&Value>,
    bound_constant: IntConstantBounds,
    offset: i32,
) -> Option<ValueInfo> {
    update_int_bounds_for_less_than_or_equal(value, bound, bound_constant, offset.checked_sub(1)?)
}

fn current_bounds(info: &ValueInfo) -> Option<IntBounds> {
    if let Some(bounds) = info.int_bounds() {
        return Some(bounds.clone());
    }
    info.try_get_int_constant_bounds(true).map(IntBounds::new)
}

fn rebuild(info: &ValueInfo, bounds: IntBounds) -> ValueInfo {
    let mut updated = ValueInfo::new_int_bounded(info.ty(), bounds);
    updated.set_sym_store(info.sym_store());
    updated
}

// ---------------------------------------------------------------
// Hoistability
// ---------------------------------------------------------------

/// Index of an array access as bound checks see it
#[derive(Debug, Clone)]
pub(crate) struct BoundCheckIndex {
    /// Var sym of a register index; `None` for a constant index
    pub var_sym: Option<SymId>,
    pub value: Option<Value>,
    pub constant_bounds: IntConstantBounds,
}

impl BoundCheckIndex {
    pub fn constant(&self) -> Option<i32> {
        if self.var_sym.is_none() && self.constant_bounds.is_constant() {
            Some(self.constant_bounds.lower_bound())
        } else {
            None
        }
    }

    fn value_number(&self) -> Option<ValueNumber> {
        self.value.as_ref().map(Value::number)
    }
}

/// What a hoisted check compares, valid in the landing pad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HoistedOperand {
    Constant(i32),
    Sym(SymId),
    /// Largest value of an increasing induction variable, from the loop count
    InductionBound(SymId),
}

/// A check moved to a landing pad
///
/// Lower checks are `0 <= operand + offset`, upper checks
/// `operand <= head_segment_length + offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoundCheckHoistInfo {
    pub loop_id: LoopId,
    pub operand: HoistedOperand,
    pub offset: i32,
    pub key: Option<BoundCheckKey>,
    pub loop_count_based: bool,
}

/// How one bound check of an access gets done
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BoundCheckPlan {
    /// A check already performed covers it
    Covered,
    Hoist(BoundCheckHoistInfo),
    Local,
}

impl<'c> GlobOpt<'c> {
    /// Decide where the lower and upper bound checks of an access go
    pub(crate) fn determine_array_bound_check_hoistability(
        &mut self,
        func: &mut Func,
        needs_lower: bool,
        needs_upper: bool,
        index: &BoundCheckIndex,
        hsl_sym: SymId,
        hsl_value: &Value,
    ) -> (BoundCheckPlan, BoundCheckPlan) {
        let lower = if needs_lower {
            self.plan_lower_bound_check(func, index)
        } else {
            BoundCheckPlan::Covered
        };
        let upper = if needs_upper {
            self.plan_upper_bound_check(func, index, hsl_sym, hsl_value)
        } else {
            BoundCheckPlan::Covered
        };
        (lower, upper)
    }

    fn plan_lower_bound_check(&mut self, func: &mut Func, index: &BoundCheckIndex) -> BoundCheckPlan {
        let (Some(var_sym), Some(index_value)) = (index.var_sym, index.value.as_ref()) else {
            return BoundCheckPlan::Local;
        };
        if self.use_compatible_bound_check(func, (ZERO_VALUE_NUMBER, index_value.number()), 0) {
            return BoundCheckPlan::Covered;
        }
        if !self.config.bound_check_hoist {
            return BoundCheckPlan::Local;
        }

        let mut best = None;
        for loop_id in func.graph.loop_chain(self.current_block) {
            let candidate = if self.opt_is_invariant(func, var_sym, loop_id, index_value) {
                Some(BoundCheckHoistInfo {
                    loop_id,
                    operand: HoistedOperand::Sym(var_sym),
                    offset: 0,
                    key: Some((ZERO_VALUE_NUMBER, index_value.number())),
                    loop_count_based: false,
                })
            } else if let Some(info) = self.relative_lower_bound_hoist(func, loop_id, index_value) {
                Some(info)
            } else {
                self.induction_lower_bound_hoist(func, loop_id, var_sym, index_value)
            };
            match candidate {
                Some(info) => best = Some(info),
                None => break,
            }
        }
        best.map_or(BoundCheckPlan::Local, BoundCheckPlan::Hoist)
    }

    fn plan_upper_bound_check(
        &mut self,
        func: &mut Func,
        index: &BoundCheckIndex,
        hsl_sym: SymId,
        hsl_value: &Value,
    ) -> BoundCheckPlan {
        let (key, needed_offset) = match (index.constant(), index.value_number()) {
            (Some(c), _) => match (-1i32).checked_sub(c) {
                Some(offset) => ((ZERO_VALUE_NUMBER, hsl_value.number()), offset),
                None => return BoundCheckPlan::Local,
            },
            (None, Some(vn)) => ((vn, hsl_value.number()), -1),
            (None, None) => return BoundCheckPlan::Local,
        };
        if self.use_compatible_bound_check(func, key, needed_offset) {
            return BoundCheckPlan::Covered;
        }
        if !self.config.bound_check_hoist {
            return BoundCheckPlan::Local;
        }

        let mut best = None;
        for loop_id in func.graph.loop_chain(self.current_block) {
            if !self.opt_is_invariant(func, hsl_sym, loop_id, hsl_value) {
                break;
            }
            let candidate = match (index.constant(), index.var_sym, index.value.as_ref()) {
                (Some(c), _, _) => Some(BoundCheckHoistInfo {
                    loop_id,
                    operand: HoistedOperand::Constant(0),
                    offset: needed_offset,
                    key: Some(key),
                    loop_count_based: false,
                })
                .filter(|_| c >= 0),
                (None, Some(var_sym), Some(index_value)) => {
                    if self.opt_is_invariant(func, var_sym, loop_id, index_value) {
                        Some(BoundCheckHoistInfo {
                            loop_id,
                            operand: HoistedOperand::Sym(var_sym),
                            offset: -1,
                            key: Some(key),
                            loop_count_based: false,
                        })
                    } else if let Some(info) = self.relative_upper_bound_hoist(func, loop_id, index_value, hsl_value) {
                        Some(info)
                    } else {
                        self.induction_upper_bound_hoist(func, loop_id, var_sym, index_value, hsl_value)
                    }
                }
                _ => None,
            };
            match candidate {
                Some(info) => best = Some(info),
                None => break,
            }
        }
        best.map_or(BoundCheckPlan::Local, BoundCheckPlan::Hoist)
    }

    /// Whether an available check on `key` covers `left <= right + offset`,
    /// tightening it in place when it is weaker
    fn use_compatible_bound_check(&mut self, func: &mut Func, key: BoundCheckKey, offset: i32) -> bool {
        let Some(check) = self.current.available_int_bound_checks.get(&key).copied() else {
            return false;
        };
        let Some(instr) = self.find_instr_mut(func, check.instr) else {
            return false;
        };
        let Some(existing) = instr.bound_check_offset() else {
            return false;
        };
        if existing > offset {
            instr.dst = Some(Opnd::IntConst(offset));
            debug!(
                target: "raya_globopt::bounds",
                block = %check.block,
                from = existing,
                to = offset,
                "tightened existing bound check"
            );
        } else {
            debug!(target: "raya_globopt::bounds", block = %check.block, "bound check implied by existing check");
        }
        true
    }

    /// `index >= b + off` with `b` invariant: checking `0 <= b + off` suffices
    fn relative_lower_bound_hoist(
        &self,
        func: &Func,
        loop_id: LoopId,
        index_value: &Value,
    ) -> Option<BoundCheckHoistInfo> {
        let bounds = index_value.info().int_bounds()?;
        bounds.relative_lower_bounds().into_iter().find_map(|(vn, offset)| {
            let sym = self.invariant_sym_with_value_number(func, loop_id, vn)?;
            Some(BoundCheckHoistInfo {
                loop_id,
                operand: HoistedOperand::Sym(sym),
                offset,
                key: Some((ZERO_VALUE_NUMBER, vn)),
                loop_count_based: false,
            })
        })
    }

    /// `index <= b + off` with `b` invariant: checking `b <= hsl - 1 - off` suffices
    fn relative_upper_bound_hoist(
        &self,
        func: &Func,
        loop_id: LoopId,
        index_value: &Value,
        hsl_value: &Value,
    ) -> Option<BoundCheckHoistInfo> {
        let bounds = index_value.info().int_bounds()?;
        bounds.relative_upper_bounds().into_iter().find_map(|(vn, offset)| {
            if vn == hsl_value.number() {
                return None;
            }
            let check_offset = (-1i32).checked_sub(offset)?;
            let sym = self.invariant_sym_with_value_number(func, loop_id, vn)?;
            Some(BoundCheckHoistInfo {
                loop_id,
                operand: HoistedOperand::Sym(sym),
                offset: check_offset,
                key: Some((vn, hsl_value.number())),
                loop_count_based: false,
            })
        })
    }

    /// Increasing induction variable at its header value: its start bounds it below
    fn induction_lower_bound_hoist(
        &self,
        func: &Func,
        loop_id: LoopId,
        var_sym: SymId,
        index_value: &Value,
    ) -> Option<BoundCheckHoistInfo> {
        let iv = func.graph.loop_(loop_id).induction_variables.get(&var_sym)?;
        if !iv.is_increasing() || iv.header_value_number != Some(index_value.number()) {
            return None;
        }
        let start = self.landing_pad_int_value(func, loop_id, var_sym)?;
        Some(BoundCheckHoistInfo {
            loop_id,
            operand: HoistedOperand::Sym(var_sym),
            offset: 0,
            key: Some((ZERO_VALUE_NUMBER, start.number())),
            loop_count_based: false,
        })
    }

    /// Induction variable at its header value: a decreasing one is bounded
    /// above by its start, an increasing one by the loop count
    fn induction_upper_bound_hoist(
        &self,
        func: &Func,
        loop_id: LoopId,
        var_sym: SymId,
        index_value: &Value,
        hsl_value: &Value,
    ) -> Option<BoundCheckHoistInfo> {
        let iv = func.graph.loop_(loop_id).induction_variables.get(&var_sym)?;
        if iv.header_value_number != Some(index_value.number()) {
            return None;
        }
        if iv.is_decreasing() {
            let start = self.landing_pad_int_value(func, loop_id, var_sym)?;
            return Some(BoundCheckHoistInfo {
                loop_id,
                operand: HoistedOperand::Sym(var_sym),
                offset: -1,
                key: Some((start.number(), hsl_value.number())),
                loop_count_based: false,
            });
        }
        if iv.exact_change().is_some_and(|c| c > 0) && self.can_generate_loop_count(func, loop_id) {
            return Some(BoundCheckHoistInfo {
                loop_id,
                operand: HoistedOperand::InductionBound(var_sym),
                offset: -1,
                key: None,
                loop_count_based: true,
            });
        }
        None
    }

    /// Sym of the landing pad holding `vn` that the loop never redefines
    pub(crate) fn invariant_sym_with_value_number(&self, func: &Func, loop_id: LoopId, vn: ValueNumber) -> Option<SymId> {
        let lp = func.graph.loop_(loop_id);
        let pad = func.graph.block(lp.landing_pad).data.as_ref()?;
        let mut candidates: Vec<SymId> = pad
            .sym_to_value
            .iter()
            .filter(|(sym, value)| {
                value.number() == vn && !lp.syms_def_in_loop.test(**sym) && !func.syms.is_property(**sym)
            })
            .map(|(sym, _)| *sym)
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().next()
    }

    /// Record a check as available here and on the dominator path up to `hoist_block`
    pub(crate) fn record_available_bound_check(&mut self, func: &mut Func, check: IntBoundCheck) {
        add_available_bound_check(&mut self.current, check);
        if check.block == self.current_block {
            return;
        }
        let mut block = func.graph.idom(self.current_block);
        while let Some(id) = block {
            if let Some(data) = func.graph.block_mut(id).data.as_mut() {
                add_available_bound_check(data, check);
            }
            if id == check.block {
                break;
            }
            block = func.graph.idom(id).filter(|d| *d != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    fn int_value(vn: u32, info: ValueInfo) -> Value {
        Value::new(ValueNumber(vn), info)
    }

    #[test]
    fn test_greater_than_or_equal_raises_constant_lower_bound() {
        let index = int_value(10, ValueInfo::new_generic(ValueType::INT));
        let info = update_int_bounds_for_greater_than_or_equal(&index, None, IntConstantBounds::constant(0), 0).unwrap();
        assert_eq!(info.try_get_int_constant_lower_bound(false), Some(0));
        assert_eq!(info.try_get_int_constant_upper_bound(false), Some(i32::MAX));
    }

    #[test]
    fn test_less_than_or_equal_records_relative_bound() {
        let index = int_value(10, ValueInfo::new_int_range(0, i32::MAX));
        let length = int_value(11, ValueInfo::new_int_range(0, 100));
        let info = update_int_bounds_for_less_than_or_equal(
            &index,
            Some(&length),
            IntConstantBounds::new(0, 100),
            -1,
        )
        .unwrap();
        let bounds = info.int_bounds().unwrap();
        assert_eq!(bounds.relative_upper_bound(ValueNumber(11)), Some(-1));
        assert_eq!(bounds.constant_upper_bound(), 99);
        assert!(bounds.is_less_than_or_equal_to(&length, -1));
    }

    #[test]
    fn test_nothing_learned_returns_none() {
        let index = int_value(10, ValueInfo::new_int_range(5, 10));
        assert!(update_int_bounds_for_greater_than_or_equal(&index, None, IntConstantBounds::constant(0), 0).is_none());
        let string = int_value(12, ValueInfo::new_generic(ValueType::STRING));
        assert!(update_int_bounds_for_less_than(&string, None, IntConstantBounds::constant(3), 0).is_none());
    }

    #[test]
    fn test_contradictory_bound_is_ignored() {
        let index = int_value(10, ValueInfo::new_int_range(0, 10));
        assert!(update_int_bounds_for_greater_than(&index, None, IntConstantBounds::constant(20), 0).is_none());
    }

    #[test]
    fn test_sym_store_survives_update() {
        let mut info = ValueInfo::new_int_range(0, 50);
        info.set_sym_store(Some(SymId(4)));
        let index = int_value(10, info);
        let updated = update_int_bounds_for_less_than(&index, None, IntConstantBounds::constant(20), 0).unwrap();
        assert_eq!(updated.sym_store(), Some(SymId(4)));
        assert_eq!(updated.try_get_int_constant_upper_bound(false), Some(19));
    }

    #[test]
    fn test_available_check_keeps_first_entry() {
        let mut data = BlockData::new_empty();
        let at = InstrRef {
            block: BlockId(1),
            id: crate::ir::instr::InstrId(3),
        };
        let first = IntBoundCheck::new(ZERO_VALUE_NUMBER, ValueNumber(7), at, BlockId(1));
        assert!(add_available_bound_check(&mut data, first));
        let second = IntBoundCheck::new(ZERO_VALUE_NUMBER, ValueNumber(7), at, BlockId(2));
        assert!(!add_available_bound_check(&mut data, second));
        assert_eq!(data.available_int_bound_checks[&first.key()].block, BlockId(1));
    }
}
