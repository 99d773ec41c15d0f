//! Per-block dataflow state
//!
//! `BlockData` is what the optimizer knows at a point in a block: the value
//! of every tracked sym, which property syms hold live field values, the
//! representation each sym is live in, the int bound checks already
//! performed, and the bookkeeping bailouts need. Joins go through
//! [`BlockData::merge_block_data`].

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{trace, warn};

use super::bailout::CapturedValues;
use super::bound_check::IntBoundCheck;
use super::liveness::{merge_type_spec_liveness, BackEdgeInfo, LivenessMerge, TypeSpecLiveness};
use crate::func::tables::ConstantTable;
use crate::ir::bitset::SymSet;
use crate::ir::sym::{Sym, SymId, SymTable};
use crate::ir::types::IrType;
use crate::value::{
    ArrayValueInfo, EquivalentTypeSet, IntBounds, IntConstantBounds, JsTypeValueInfo, Value, ValueInfo,
    ValueNumber, ValueNumberAllocator, ValueType,
};

/// Key of an available int bound check: `left <= right + offset`
pub type BoundCheckKey = (ValueNumber, ValueNumber);

/// Dataflow state at one point of a block
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub sym_to_value: FxHashMap<SymId, Value>,
    /// Property and object-type syms whose value is current
    pub live_fields: SymSet,
    pub live_var_syms: SymSet,
    pub live_int32_syms: SymSet,
    /// Subset of `live_int32_syms` produced by truncating conversions
    pub live_lossy_int32_syms: SymSet,
    pub live_float64_syms: SymSet,
    pub live_simd128_syms: SymSet,
    pub available_int_bound_checks: FxHashMap<BoundCheckKey, IntBoundCheck>,
    /// Bytecode syms whose value changed since the last bailout capture
    pub changed_syms: SymSet,
    pub captured_values: Option<Rc<CapturedValues>>,
    /// Outstanding `ArgOut` syms, innermost call last
    pub call_sequence: Vec<SymId>,
    pub arg_obj_syms: SymSet,
    /// Object-type syms whose objects may have been written through an alias
    pub maybe_written_type_syms: SymSet,
    pub is_temp_src: SymSet,
    /// Facts produced by merges into this state
    pub merge_record: MergeRecord,
    pub has_data: bool,
}

/// Values and aux syms a join synthesized, with the inputs each stands for
///
/// Merging an input the join already absorbed reuses what it produced, so
/// repeating a merge neither renumbers values nor requests backfill again.
/// Only valid at the join that produced it; copies of the state start empty.
#[derive(Debug, Clone, Default)]
pub struct MergeRecord {
    /// (merged value number, incoming value number it covers)
    absorbed: FxHashSet<(ValueNumber, ValueNumber)>,
    /// Synthesized aux sym and the aux syms it replaces
    aux_syms: FxHashMap<SymId, SymSet>,
}

impl MergeRecord {
    pub fn is_empty(&self) -> bool {
        self.absorbed.is_empty() && self.aux_syms.is_empty()
    }

    fn covers_value(&self, merged: ValueNumber, incoming: ValueNumber) -> bool {
        self.absorbed.contains(&(merged, incoming))
    }

    fn covers_aux_sym(&self, merged: SymId, incoming: SymId) -> bool {
        self.aux_syms.get(&merged).is_some_and(|syms| syms.test(incoming))
    }
}

impl BlockData {
    pub fn new_empty() -> Self {
        BlockData {
            has_data: true,
            ..Default::default()
        }
    }

    /// Copy of another block's state
    pub fn init_from(&mut self, other: &BlockData) {
        self.clone_from(other);
        self.merge_record = MergeRecord::default();
        self.has_data = true;
    }

    /// Take over another block's state, reusing this one's allocations
    pub fn reuse(&mut self, other: &BlockData) {
        self.clear();
        self.init_from(other);
    }

    /// Forget everything but stay allocated
    pub fn clear(&mut self) {
        self.sym_to_value.clear();
        self.live_fields.clear_all();
        self.live_var_syms.clear_all();
        self.live_int32_syms.clear_all();
        self.live_lossy_int32_syms.clear_all();
        self.live_float64_syms.clear_all();
        self.live_simd128_syms.clear_all();
        self.available_int_bound_checks.clear();
        self.changed_syms.clear_all();
        self.captured_values = None;
        self.call_sequence.clear();
        self.arg_obj_syms.clear_all();
        self.maybe_written_type_syms.clear_all();
        self.is_temp_src.clear_all();
        self.merge_record = MergeRecord::default();
    }

    /// Release the state; the block no longer carries data
    pub fn null_out(&mut self) {
        *self = BlockData::default();
    }

    // ---------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------

    /// Value of `sym` at this point
    ///
    /// Type-specialized syms read their var sym, property syms are only
    /// known while their field is live, and bytecode constants live in the
    /// function-wide constant table.
    pub fn find_value(&self, sym: SymId, syms: &SymTable, constants: &ConstantTable) -> Option<Value> {
        let sym = syms.var_equiv(sym);
        if syms.is_property(sym) && !self.live_fields.test(sym) {
            return None;
        }
        if syms.is_bytecode_constant(sym) {
            return constants.get(sym).cloned();
        }
        self.sym_to_value.get(&sym).cloned()
    }

    /// Map entry without any rerouting
    pub fn find_value_from_map_direct(&self, sym: SymId) -> Option<&Value> {
        self.sym_to_value.get(&sym)
    }

    /// Type value of an object-type sym; none while the type sym is dead
    pub fn find_object_type_value(&self, type_sym: SymId) -> Option<&Value> {
        if !self.live_fields.test(type_sym) {
            return None;
        }
        self.find_object_type_value_no_liveness_check(type_sym)
    }

    pub fn find_object_type_value_no_liveness_check(&self, type_sym: SymId) -> Option<&Value> {
        self.sym_to_value
            .get(&type_sym)
            .filter(|v| v.info().is_js_type())
    }

    /// Lowest sym currently holding value number `vn`
    pub fn find_sym_with_value_number(&self, vn: ValueNumber) -> Option<SymId> {
        self.sym_to_value
            .iter()
            .filter(|(_, v)| v.number() == vn)
            .map(|(s, _)| *s)
            .min()
    }

    /// Stack sym still holding `value`, usable in place of `sym`
    pub fn get_copy_prop_sym(
        &self,
        sym: SymId,
        value: &Value,
        syms: &SymTable,
        constants: &ConstantTable,
    ) -> Option<SymId> {
        let store = value.info().sym_store()?;
        if store == syms.var_equiv(sym) || !matches!(syms.get(store), Some(Sym::Stack(_))) {
            return None;
        }
        // A var constant is only useful through a sym that is still in a register
        if value.info().var_constant().is_some() && !self.is_live(store, syms) {
            return None;
        }
        let current = self.find_value(store, syms, constants)?;
        (current.number() == value.number()).then_some(store)
    }

    /// Record `value` for `sym` and return the stored value
    ///
    /// The stored value carries the sym store the info ends up with; callers
    /// that hand the same value to further syms should pass the returned one.
    pub fn set_value(
        &mut self,
        value: Value,
        sym: SymId,
        syms: &SymTable,
        constants: &mut ConstantTable,
    ) -> Value {
        let sym = syms.var_equiv(sym);
        let value = self.set_sym_store(value, sym, syms);
        if syms.is_bytecode_constant(sym) {
            constants.set(sym, value.clone());
            return value;
        }
        self.sym_to_value.insert(sym, value.clone());
        if syms.has_byte_code_reg_slot(sym) {
            self.changed_syms.set(sym);
        }
        value
    }

    fn set_sym_store(&mut self, value: Value, sym: SymId, syms: &SymTable) -> Value {
        let prev = value.info().sym_store();
        if prev.is_some_and(|p| !syms.is_property(p)) {
            return value;
        }
        if let Some(prev) = prev {
            if syms.has_byte_code_reg_slot(prev) {
                self.changed_syms.set(prev);
            }
        }
        let mut info = value.info().clone();
        info.set_sym_store(Some(sym));
        Value::from_rc(value.number(), Rc::new(info))
    }

    pub fn clear_sym_value(&mut self, sym: SymId) {
        self.sym_to_value.remove(&sym);
    }

    /// Give every sym holding `vn` the new info
    pub fn change_value_info(&mut self, vn: ValueNumber, info: Rc<ValueInfo>) {
        for value in self.sym_to_value.values_mut() {
            if value.number() == vn {
                *value = Value::from_rc(vn, Rc::clone(&info));
            }
        }
    }

    // ---------------------------------------------------------------
    // Liveness
    // ---------------------------------------------------------------

    pub fn is_live(&self, sym: SymId, syms: &SymTable) -> bool {
        let var = syms.var_equiv(sym);
        self.live_var_syms.test(var)
            || self.live_int32_syms.test(var)
            || self.live_float64_syms.test(var)
            || self.live_simd128_syms.test(var)
    }

    pub fn is_int32_type_specialized(&self, sym: SymId, syms: &SymTable) -> bool {
        self.live_int32_syms.test(syms.var_equiv(sym))
    }

    pub fn is_float64_type_specialized(&self, sym: SymId, syms: &SymTable) -> bool {
        self.live_float64_syms.test(syms.var_equiv(sym))
    }

    /// Mark `sym` live in its own representation
    pub fn make_live(&mut self, sym: SymId, lossy: bool, syms: &SymTable) {
        let var = syms.var_equiv(sym);
        match syms.ty(sym) {
            IrType::Int32 | IrType::Uint32 => {
                self.live_int32_syms.set(var);
                if lossy {
                    self.live_lossy_int32_syms.set(var);
                } else {
                    self.live_lossy_int32_syms.clear(var);
                }
            }
            IrType::Float64 => self.live_float64_syms.set(var),
            IrType::Simd128 => self.live_simd128_syms.set(var),
            IrType::Var => self.live_var_syms.set(var),
        }
    }

    /// Kill every specialized representation of `var`, leaving it var-live
    pub fn make_var_only(&mut self, var: SymId) {
        self.live_var_syms.set(var);
        self.live_int32_syms.clear(var);
        self.live_lossy_int32_syms.clear(var);
        self.live_float64_syms.clear(var);
        self.live_simd128_syms.clear(var);
    }

    pub fn liveness(&self) -> TypeSpecLiveness {
        TypeSpecLiveness {
            var: self.live_var_syms.clone(),
            int32: self.live_int32_syms.clone(),
            lossy_int32: self.live_lossy_int32_syms.clone(),
            float64: self.live_float64_syms.clone(),
            simd128: self.live_simd128_syms.clone(),
        }
    }

    pub fn set_liveness(&mut self, liveness: TypeSpecLiveness) {
        self.live_var_syms = liveness.var;
        self.live_int32_syms = liveness.int32;
        self.live_lossy_int32_syms = liveness.lossy_int32;
        self.live_float64_syms = liveness.float64;
        self.live_simd128_syms = liveness.simd128;
    }

    /// Syms whose value is likely an int, and likely a number
    pub fn likely_numeric_syms(&self) -> (SymSet, SymSet) {
        let mut ints = SymSet::new();
        let mut numbers = SymSet::new();
        for (sym, value) in &self.sym_to_value {
            let ty = value.ty();
            if ty.is_likely_int() {
                ints.set(*sym);
            }
            if ty.is_likely_number() {
                numbers.set(*sym);
            }
        }
        (ints, numbers)
    }

    /// State after a generator yield: nothing but var liveness survives
    pub fn kill_state_for_generator_yield(&mut self) {
        self.sym_to_value.retain(|_, v| !v.info().is_js_type());
        for value in self.sym_to_value.values_mut() {
            if value.info().is_generic() && value.ty().is_likely_only() {
                continue;
            }
            *value = value.with_info(value.info().to_likely());
        }
        self.live_int32_syms.clear_all();
        self.live_lossy_int32_syms.clear_all();
        self.live_float64_syms.clear_all();
        self.live_simd128_syms.clear_all();
        self.live_fields.clear_all();
        self.available_int_bound_checks.clear();
    }

    // ---------------------------------------------------------------
    // Merge
    // ---------------------------------------------------------------

    /// Join the state flowing in from another predecessor
    pub fn merge_block_data(
        &mut self,
        from: &BlockData,
        ctx: &mut MergeContext<'_>,
        back_edge: Option<BackEdgeInfo<'_>>,
    ) -> LivenessMerge {
        let is_loop_back_edge = back_edge.is_some();
        let liveness = merge_type_spec_liveness(&self.liveness(), &from.liveness(), back_edge);
        self.set_liveness(liveness.liveness.clone());

        let mut record = std::mem::take(&mut self.merge_record);
        let mut to_syms: Vec<SymId> = self.sym_to_value.keys().copied().collect();
        to_syms.sort_unstable();
        for sym in to_syms {
            let merged = match (self.sym_to_value.get(&sym), from.sym_to_value.get(&sym)) {
                (Some(to), Some(from_value)) => {
                    merge_values(to, from_value, sym, is_loop_back_edge, &mut record, ctx)
                }
                _ => None,
            };
            match merged {
                Some(value) => {
                    self.sym_to_value.insert(sym, value);
                }
                None => {
                    self.sym_to_value.remove(&sym);
                }
            }
        }
        self.merge_record = record;

        // Int-specialized on both sides but untracked on one: still an int
        for sym in self.live_int32_syms.iter() {
            if !self.sym_to_value.contains_key(&sym) {
                let vn = ctx.value_numbers.next();
                self.sym_to_value
                    .insert(sym, Value::new(vn, ValueInfo::new_generic(ValueType::INT)));
            }
        }

        self.live_fields.and(&from.live_fields);
        self.available_int_bound_checks
            .retain(|key, _| from.available_int_bound_checks.contains_key(key));

        match (&self.captured_values, &from.captured_values) {
            (Some(to), Some(other)) if Rc::ptr_eq(to, other) => {}
            (Some(to), Some(other)) => {
                let kept = to.intersect(other);
                for (sym, _) in to.constant_values.iter().chain(other.constant_values.iter()) {
                    if !kept.captures(*sym) {
                        self.changed_syms.set(*sym);
                    }
                }
                for (sym, _) in to.copy_prop_syms.iter().chain(other.copy_prop_syms.iter()) {
                    if !kept.captures(*sym) {
                        self.changed_syms.set(*sym);
                    }
                }
                self.captured_values = Some(Rc::new(kept));
            }
            _ => self.captured_values = None,
        }

        if self.call_sequence != from.call_sequence {
            warn!(
                target: "raya_globopt::globopt",
                to = self.call_sequence.len(),
                from = from.call_sequence.len(),
                "call sequences disagree at merge"
            );
            let common = self
                .call_sequence
                .iter()
                .zip(from.call_sequence.iter())
                .take_while(|(a, b)| a == b)
                .count();
            self.call_sequence.truncate(common);
        }

        self.maybe_written_type_syms.or(&from.maybe_written_type_syms);
        self.changed_syms.or(&from.changed_syms);
        self.arg_obj_syms.and(&from.arg_obj_syms);
        self.is_temp_src.and(&from.is_temp_src);
        self.has_data = true;
        liveness
    }
}

/// State shared by every merge into one block
pub struct MergeContext<'a> {
    pub syms: &'a mut SymTable,
    pub value_numbers: &'a mut ValueNumberAllocator,
    pub is_prepass: bool,
    /// Merged value number per source value number pair
    merged: FxHashMap<(ValueNumber, ValueNumber), Value>,
    /// Array syms whose aux syms were synthesized and need backfill loads
    pub syms_requiring_compensation: SymSet,
    /// Aux syms synthesized by this merge
    pub syms_created_for_merge: SymSet,
}

impl<'a> MergeContext<'a> {
    pub fn new(syms: &'a mut SymTable, value_numbers: &'a mut ValueNumberAllocator, is_prepass: bool) -> Self {
        MergeContext {
            syms,
            value_numbers,
            is_prepass,
            merged: FxHashMap::default(),
            syms_requiring_compensation: SymSet::new(),
            syms_created_for_merge: SymSet::new(),
        }
    }
}

/// Join of two values of `sym`; `None` drops the sym
pub fn merge_values(
    to: &Value,
    from: &Value,
    sym: SymId,
    is_loop_back_edge: bool,
    record: &mut MergeRecord,
    ctx: &mut MergeContext<'_>,
) -> Option<Value> {
    if Value::ptr_eq(to, from) {
        return Some(to.clone());
    }

    let pair = (to.number(), from.number());
    let same_vn = pair.0 == pair.1;
    let info = merge_value_info(to, from, sym, is_loop_back_edge, same_vn, record, ctx)?;
    if same_vn && Rc::ptr_eq(&info, to.info_rc()) {
        return Some(to.clone());
    }

    let mut info = Rc::unwrap_or_clone(info);
    if to.info().sym_store() == from.info().sym_store() {
        info.set_sym_store(to.info().sym_store());
    }
    if record.covers_value(pair.0, pair.1) && info == *to.info() {
        return Some(to.clone());
    }

    let vn = match ctx.merged.get(&pair) {
        Some(existing) => existing.number(),
        None if same_vn => pair.0,
        None => ctx.value_numbers.next(),
    };
    let value = match ctx.merged.get(&pair) {
        Some(existing) if *existing.info() == info => existing.clone(),
        _ => Value::new(vn, info),
    };
    ctx.merged.insert(pair, value.clone());
    if !same_vn {
        record.absorbed.insert((value.number(), pair.0));
        record.absorbed.insert((value.number(), pair.1));
    }
    Some(value)
}

/// Join of two value infos
pub fn merge_value_info(
    to: &Value,
    from: &Value,
    sym: SymId,
    is_loop_back_edge: bool,
    same_vn: bool,
    record: &mut MergeRecord,
    ctx: &mut MergeContext<'_>,
) -> Option<Rc<ValueInfo>> {
    let to_info = to.info();
    let from_info = from.info();

    if let (Some(to_js), Some(from_js)) = (to_info.as_js_type(), from_info.as_js_type()) {
        return merge_js_type_value_info(to.info_rc(), to_js, from_js, is_loop_back_edge, same_vn);
    }
    if to_info.is_js_type() || from_info.is_js_type() {
        return None;
    }

    if Rc::ptr_eq(to.info_rc(), from.info_rc()) || to_info == from_info {
        return Some(Rc::clone(to.info_rc()));
    }

    let mut ty = to_info.ty().merge(&from_info.ty());
    if ty.is_likely_int() {
        return Some(Rc::new(merge_likely_int_value_info(to, from, ty)));
    }

    if ty.is_likely_any_optimized_array() {
        let to_ty = to_info.ty();
        let from_ty = from_info.ty();
        if ty.is_likely_array_or_object_with_array()
            && to_ty.is_likely_array_or_object_with_array()
            && from_ty.is_likely_array_or_object_with_array()
        {
            ty = ty.set_has_no_missing_values(to_ty.has_no_missing_values() && from_ty.has_no_missing_values());
            if to_ty.is_likely_native_int_array() != from_ty.is_likely_native_int_array()
                || to_ty.is_likely_native_float_array() != from_ty.is_likely_native_float_array()
            {
                ty = ty.to_likely();
            }
        }

        let (Some(to_array), Some(from_array)) = (to_info.as_array(), from_info.as_array()) else {
            return Some(Rc::new(ValueInfo::new_generic(ty)));
        };
        if !ty.is_object() {
            return Some(Rc::new(ValueInfo::new_generic(ty)));
        }
        return Some(Rc::new(merge_array_value_info(
            ty,
            to_array,
            from_array,
            sym,
            is_loop_back_edge,
            record,
            ctx,
        )));
    }

    Some(Rc::new(ValueInfo::new_generic(ty)))
}

/// Join of two likely-int infos
pub fn merge_likely_int_value_info(to: &Value, from: &Value, ty: ValueType) -> ValueInfo {
    debug_assert!(ty.is_likely_int());
    let to_info = to.info();
    let from_info = from.info();

    if ty.is_int() {
        if let (Some(a), Some(b)) = (
            to_info.try_get_int_constant_value(false),
            from_info.try_get_int_constant_value(false),
        ) {
            if a == b {
                return ValueInfo::new_int_constant(a);
            }
        }
    }

    let to_bounds = to_info.int_bounds();
    let from_bounds = from_info.int_bounds();
    if to_bounds.is_some() || from_bounds.is_some() {
        let merged = match (to_bounds, from_bounds) {
            (Some(a), Some(b)) => Some(IntBounds::merge(a, b)),
            (Some(a), None) => from_info
                .try_get_int_constant_bounds(true)
                .map(|cb| IntBounds::merge_with_constant(a, cb)),
            (None, Some(b)) => to_info
                .try_get_int_constant_bounds(true)
                .map(|cb| IntBounds::merge_with_constant(b, cb)),
            (None, None) => None,
        };
        if let Some(bounds) = merged {
            if bounds.requires_int_bounded_value_info() {
                return ValueInfo::new_int_bounded(ty, bounds);
            }
        }
    }

    if ty.is_int() {
        let a = to_info.try_get_int_constant_bounds(true).unwrap_or(IntConstantBounds::FULL);
        let b = from_info.try_get_int_constant_bounds(true).unwrap_or(IntConstantBounds::FULL);
        let joined = a.union(&b);
        return ValueInfo::new_int_range(joined.lower_bound(), joined.upper_bound());
    }
    ValueInfo::new_generic(ty)
}

/// Join of two object-type infos
///
/// Only types invariant around a loop survive its back edge.
pub fn merge_js_type_value_info(
    to_rc: &Rc<ValueInfo>,
    to: &JsTypeValueInfo,
    from: &JsTypeValueInfo,
    is_loop_back_edge: bool,
    same_vn: bool,
) -> Option<Rc<ValueInfo>> {
    if is_loop_back_edge && !same_vn {
        return None;
    }
    if to == from {
        return Some(shared(to_rc));
    }

    let merged_type = if to.js_type == from.js_type { to.js_type } else { None };
    let merged_set = match (&to.type_set, &from.type_set) {
        (Some(a), Some(b)) if EquivalentTypeSet::are_identical(a, b) => Some(Rc::clone(a)),
        _ => None,
    };
    if merged_type.is_none() && merged_set.is_none() {
        return None;
    }

    let set_unchanged = match (&to.type_set, &merged_set) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    };
    if to.js_type == merged_type && set_unchanged {
        return Some(shared(to_rc));
    }
    Some(Rc::new(ValueInfo::new_js_type(merged_type, merged_set)))
}

fn shared(info: &Rc<ValueInfo>) -> Rc<ValueInfo> {
    if info.is_shared() {
        return Rc::clone(info);
    }
    let mut copy = ValueInfo::clone(info);
    copy.set_is_shared();
    Rc::new(copy)
}

/// Join of two array infos
///
/// An aux sym survives when both sides agree on it, or when this join
/// already synthesized it to stand for the incoming one. When they disagree
/// on a forward edge outside the prepass, a fresh sym stands for both and
/// the array sym is recorded for backfill loads in the predecessors.
pub fn merge_array_value_info(
    ty: ValueType,
    to: &ArrayValueInfo,
    from: &ArrayValueInfo,
    array_sym: SymId,
    is_loop_back_edge: bool,
    record: &mut MergeRecord,
    ctx: &mut MergeContext<'_>,
) -> ValueInfo {
    let can_synthesize = !ctx.is_prepass && !is_loop_back_edge;
    let mut merge_one = |to_sym: Option<SymId>, from_sym: Option<SymId>, sym_ty: IrType| -> Option<SymId> {
        let (a, b) = (to_sym?, from_sym?);
        if a == b || record.covers_aux_sym(a, b) {
            return Some(a);
        }
        if !can_synthesize {
            return None;
        }
        ctx.syms_requiring_compensation.set(array_sym);
        if ctx.syms_created_for_merge.test(a) {
            record.aux_syms.entry(a).or_default().set(b);
            return Some(a);
        }
        let created = ctx.syms.new_stack_sym(sym_ty);
        ctx.syms_created_for_merge.set(created);
        let mut replaced = SymSet::new();
        replaced.set(a);
        replaced.set(b);
        record.aux_syms.insert(created, replaced);
        trace!(target: "raya_globopt::globopt", array = %array_sym, sym = %created, "aux sym synthesized for merge");
        Some(created)
    };

    let merged = ArrayValueInfo {
        head_segment_sym: merge_one(to.head_segment_sym, from.head_segment_sym, IrType::Var),
        head_segment_length_sym: merge_one(to.head_segment_length_sym, from.head_segment_length_sym, IrType::Int32),
        length_sym: merge_one(to.length_sym, from.length_sym, IrType::Int32),
    };
    ValueInfo::new_array(ty, merged, None)
}
