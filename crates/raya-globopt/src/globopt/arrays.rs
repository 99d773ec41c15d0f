//! Array access specialization
//!
//! An element access, length load or `in` test on a likely array gets its
//! array's shape checked once, the array's head segment, head segment
//! length and length loaded into syms the lowerer reads directly, and its
//! bound checks proven away or extracted into separate `BoundCheck`
//! instructions. Each of those items moves to the landing pad of the
//! outermost loop in which the array, and whatever the item reads, cannot
//! change.
//!
//! The extracted checks, the array check and the access itself share one
//! bailout, so a failure anywhere resumes at the access.

use std::rc::Rc;

use tracing::{debug, trace};

use super::bailout::{BailOutKind, InstrBailOut};
use super::bound_check::{
    update_int_bounds_for_greater_than, update_int_bounds_for_greater_than_or_equal,
    update_int_bounds_for_less_than, BoundCheckHoistInfo, BoundCheckIndex, BoundCheckPlan, HoistedOperand,
    IntBoundCheck,
};
use super::{GlobOpt, Mode};
use crate::analysis::flow_graph::LoopId;
use crate::func::Func;
use crate::ir::instr::{Instr, InstrRef, Opcode};
use crate::ir::opnd::{ArrayRegInfo, Opnd, RegOpnd};
use crate::ir::sym::SymId;
use crate::ir::types::IrType;
use crate::value::int_bounds::{is_greater_than_or_equal_to, is_less_than, is_less_than_or_equal_to};
use crate::value::{ArrayValueInfo, IntConstantBounds, Value, ValueInfo, ValueType, ZERO_VALUE_NUMBER};

/// Largest element count of one array segment
pub const MAX_SEGMENT_LENGTH: i32 = i32::MAX;

/// Byte size of the buffer behind a virtual typed array
pub const VIRTUAL_BUFFER_LENGTH: u64 = 1 << 32;

/// Opcodes this pass looks at
pub(crate) fn is_array_access(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::LdElem
            | Opcode::LdMethodElem
            | Opcode::StElem
            | Opcode::StElemC
            | Opcode::LdLen
            | Opcode::IsIn
            | Opcode::ArrayPush
            | Opcode::ArrayPop
    )
}

/// Operand holding the array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseSlot {
    DstIndir,
    Src1Indir,
    Src1,
    Src2,
}

#[derive(Debug, Clone)]
enum AccessIndex {
    Reg(RegOpnd),
    Const(i32),
}

/// State for optimizing one array access
struct ArraySrcOpt {
    opcode: Opcode,
    base_slot: BaseSlot,
    base_sym: SymId,

    is_profilable_ld_elem: bool,
    is_profilable_st_elem: bool,
    needs_bound_checks: bool,
    needs_head_segment: bool,
    needs_head_segment_length: bool,
    needs_length: bool,

    index: Option<AccessIndex>,
    /// `in` source before int specialization, restored unless the test folds
    original_index: Option<Opnd>,
    index_var_sym: Option<SymId>,
    index_value: Option<Value>,
    index_bounds: IntConstantBounds,

    base_value: Option<Value>,
    base_type: ValueType,
    new_base_type: ValueType,
    base_array: ArrayValueInfo,
    is_likely_js_array: bool,
    is_likely_virtual_typed_array: bool,

    do_array_checks: bool,
    do_head_segment_load: bool,
    do_head_segment_length_load: bool,
    do_length_load: bool,
    head_segment_is_available: bool,
    head_segment_length_is_available: bool,
    length_is_available: bool,
    can_bail_out_on_helper_call: bool,

    eliminated_lower_bound_check: bool,
    eliminated_upper_bound_check: bool,
    do_extract_bound_checks: bool,
    head_segment_length_value: Option<Value>,
    head_segment_length_bounds: IntConstantBounds,

    hoist_checks_out_of: Option<LoopId>,
    hoist_head_segment_load_out_of: Option<LoopId>,
    hoist_head_segment_length_load_out_of: Option<LoopId>,
    hoist_length_load_out_of: Option<LoopId>,

    new_head_segment_sym: Option<SymId>,
    new_head_segment_length_sym: Option<SymId>,
    new_length_sym: Option<SymId>,

    /// Bailout of the first local check, shared by later ones and the access
    shared_bailout: Option<InstrBailOut>,
}

impl<'c> GlobOpt<'c> {
    /// Specialize an array access on its base's value type
    pub(crate) fn opt_array_src(&mut self, func: &mut Func, instr: &mut Instr) {
        let Some(mut opt) = ArraySrcOpt::check_opcode(instr) else {
            return;
        };
        opt.optimize(self, func, instr);
    }
}

impl ArraySrcOpt {
    fn new(opcode: Opcode, base_slot: BaseSlot, base_sym: SymId) -> Self {
        ArraySrcOpt {
            opcode,
            base_slot,
            base_sym,
            is_profilable_ld_elem: false,
            is_profilable_st_elem: false,
            needs_bound_checks: false,
            needs_head_segment: false,
            needs_head_segment_length: false,
            needs_length: false,
            index: None,
            original_index: None,
            index_var_sym: None,
            index_value: None,
            index_bounds: IntConstantBounds::FULL,
            base_value: None,
            base_type: ValueType::UNINITIALIZED,
            new_base_type: ValueType::UNINITIALIZED,
            base_array: ArrayValueInfo::default(),
            is_likely_js_array: false,
            is_likely_virtual_typed_array: false,
            do_array_checks: false,
            do_head_segment_load: false,
            do_head_segment_length_load: false,
            do_length_load: false,
            head_segment_is_available: false,
            head_segment_length_is_available: false,
            length_is_available: false,
            can_bail_out_on_helper_call: false,
            eliminated_lower_bound_check: false,
            eliminated_upper_bound_check: false,
            do_extract_bound_checks: false,
            head_segment_length_value: None,
            head_segment_length_bounds: IntConstantBounds::FULL,
            hoist_checks_out_of: None,
            hoist_head_segment_load_out_of: None,
            hoist_head_segment_length_load_out_of: None,
            hoist_length_load_out_of: None,
            new_head_segment_sym: None,
            new_head_segment_length_sym: None,
            new_length_sym: None,
            shared_bailout: None,
        }
    }

    /// Which items the opcode reads, or `None` when it has no array operand
    fn check_opcode(instr: &Instr) -> Option<ArraySrcOpt> {
        let mut opt = match instr.opcode {
            Opcode::LdElem | Opcode::LdMethodElem => {
                let indir = instr.src1.as_ref()?.as_indir()?;
                let mut opt = ArraySrcOpt::new(instr.opcode, BaseSlot::Src1Indir, indir.base.sym);
                opt.index = indir_index(indir.index.as_ref(), indir.offset);
                opt.is_profilable_ld_elem = instr.opcode == Opcode::LdElem;
                opt.needs_bound_checks = true;
                opt.needs_head_segment = true;
                opt.needs_head_segment_length = true;
                opt
            }
            Opcode::StElem | Opcode::StElemC => {
                let indir = instr.dst.as_ref()?.as_indir()?;
                let mut opt = ArraySrcOpt::new(instr.opcode, BaseSlot::DstIndir, indir.base.sym);
                opt.index = indir_index(indir.index.as_ref(), indir.offset);
                opt.is_profilable_st_elem = instr.opcode == Opcode::StElem;
                opt.needs_bound_checks = instr.opcode == Opcode::StElem;
                opt.needs_head_segment = true;
                opt.needs_head_segment_length = true;
                opt
            }
            Opcode::ArrayPush | Opcode::ArrayPop => {
                let mut opt = ArraySrcOpt::new(instr.opcode, BaseSlot::Src1, instr.src1_reg()?.sym);
                opt.needs_head_segment = true;
                opt.needs_head_segment_length = true;
                opt.needs_length = true;
                opt
            }
            Opcode::LdLen => {
                let mut opt = ArraySrcOpt::new(instr.opcode, BaseSlot::Src1, instr.src1_reg()?.sym);
                opt.needs_length = true;
                opt
            }
            Opcode::IsIn => {
                let mut opt = ArraySrcOpt::new(instr.opcode, BaseSlot::Src2, instr.src2_reg()?.sym);
                opt.index = match instr.src1.as_ref()? {
                    Opnd::Reg(reg) => Some(AccessIndex::Reg(reg.clone())),
                    Opnd::IntConst(c) => Some(AccessIndex::Const(*c)),
                    _ => return None,
                };
                opt.needs_bound_checks = true;
                opt.needs_head_segment = true;
                opt.needs_head_segment_length = true;
                opt
            }
            _ => return None,
        };
        if opt.needs_bound_checks && opt.index.is_none() {
            opt.needs_bound_checks = false;
        }
        Some(opt)
    }

    fn optimize(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func, instr: &mut Instr) {
        self.type_spec_index(glob, func, instr);

        if self.is_profilable_st_elem && instr.is_profiled_array_store() && glob.mode == Mode::Real {
            glob.generate_bail_at_operation(func, instr, BailOutKind::ON_IMPLICIT_CALLS_PRE_OP);
        }

        if !self.check_base(glob, func) {
            return;
        }

        if glob.mode == Mode::Prepass {
            self.update_value_in_prepass(glob, func);
            return;
        }

        self.decide_items(glob, func, instr);
        self.check_virtual_array_bounds();
        self.try_eliminate_bounds_check(glob, func);
        self.check_loops(glob, func);

        self.insert_array_checks(glob, func);
        self.insert_length_load(glob, func);
        // A JS array's head segment length is read through its head segment
        if self.is_likely_js_array {
            self.insert_head_segment_load(glob, func);
        }
        self.insert_head_segment_length_load(glob, func);
        if self.do_extract_bound_checks {
            self.extract_bound_checks(glob, func);
        }
        // Typed arrays load the head segment after the checks on their length
        if !self.is_likely_js_array {
            self.insert_head_segment_load(glob, func);
        }

        self.update_value(glob, func);
        self.update_hoisted_value_info(glob, func);
        self.update_base_opnd(instr);

        if self.opcode == Opcode::IsIn {
            self.finish_is_in(instr);
            return;
        }
        if self.can_bail_out_on_helper_call {
            match self.shared_bailout {
                Some(shared) => glob.share_bail_out(func, &shared, instr, BailOutKind::ON_ARRAY_ACCESS_HELPER_CALL),
                None => glob.generate_bail_at_operation(func, instr, BailOutKind::ON_ARRAY_ACCESS_HELPER_CALL),
            }
        }
        if self.opcode == Opcode::LdLen {
            self.rewrite_ld_len(func, instr);
        }
    }

    // ---------------------------------------------------------------
    // Operands
    // ---------------------------------------------------------------

    fn type_spec_index(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func, instr: &mut Instr) {
        let Some(AccessIndex::Reg(reg)) = self.index.clone() else {
            if let Some(AccessIndex::Const(c)) = self.index {
                self.index_bounds = IntConstantBounds::constant(c);
            }
            return;
        };
        let var = func.syms.var_equiv(reg.sym);
        self.index_var_sym = Some(var);

        let likely_int = glob.value_of(func, var).is_some_and(|v| v.ty().is_likely_int());
        let aggressive = !func.is_aggressive_int_type_spec_disabled().unwrap_or(true);
        if reg.ty.is_var() && likely_int && aggressive {
            if self.opcode == Opcode::IsIn && glob.mode == Mode::Real {
                self.original_index = instr.src1.clone();
            }
            let mut opnd = Opnd::Reg(reg);
            glob.use_int32(func, &mut opnd);
            if let Opnd::Reg(int_reg) = opnd {
                self.set_index_opnd(instr, int_reg.clone());
                self.index = Some(AccessIndex::Reg(int_reg));
            }
        }
        self.refresh_index_value(glob, func);
    }

    fn refresh_index_value(&mut self, glob: &GlobOpt<'_>, func: &Func) {
        let Some(var) = self.index_var_sym else {
            return;
        };
        self.index_value = glob.value_of(func, var);
        let is_type_spec = matches!(&self.index, Some(AccessIndex::Reg(reg)) if !reg.ty.is_var());
        self.index_bounds = self
            .index_value
            .as_ref()
            .and_then(|v| v.info().try_get_int_constant_bounds(is_type_spec))
            .unwrap_or(IntConstantBounds::FULL);
    }

    fn set_index_opnd(&self, instr: &mut Instr, reg: RegOpnd) {
        match self.base_slot {
            BaseSlot::DstIndir => {
                if let Some(indir) = instr.dst.as_mut().and_then(Opnd::as_indir_mut) {
                    indir.index = Some(reg);
                }
            }
            BaseSlot::Src1Indir => {
                if let Some(indir) = instr.src1.as_mut().and_then(Opnd::as_indir_mut) {
                    indir.index = Some(reg);
                }
            }
            BaseSlot::Src2 => instr.src1 = Some(Opnd::Reg(reg)),
            BaseSlot::Src1 => {}
        }
    }

    fn base_reg_mut<'i>(&self, instr: &'i mut Instr) -> Option<&'i mut RegOpnd> {
        match self.base_slot {
            BaseSlot::DstIndir => instr.dst.as_mut().and_then(Opnd::as_indir_mut).map(|i| &mut i.base),
            BaseSlot::Src1Indir => instr.src1.as_mut().and_then(Opnd::as_indir_mut).map(|i| &mut i.base),
            BaseSlot::Src1 => instr.src1.as_mut().and_then(Opnd::as_reg_mut),
            BaseSlot::Src2 => instr.src2.as_mut().and_then(Opnd::as_reg_mut),
        }
    }

    fn base_reg(&self) -> RegOpnd {
        RegOpnd::var(self.base_sym)
            .with_value_type(self.new_base_type)
            .jit_optimized()
    }

    // ---------------------------------------------------------------
    // Decisions
    // ---------------------------------------------------------------

    /// Whether the base is an array shape worth specializing for this opcode
    fn check_base(&mut self, glob: &GlobOpt<'_>, func: &Func) -> bool {
        if !glob.config.array_check_hoist || func.is_array_check_hoist_disabled().unwrap_or(true) {
            return false;
        }
        let Some(base_value) = glob.value_of(func, self.base_sym) else {
            return false;
        };
        let ty = base_value.ty();
        if !ty.is_likely_any_optimized_array() {
            return false;
        }
        let conventional_index = match &self.index {
            Some(AccessIndex::Reg(reg)) => {
                !reg.ty.is_var() || self.index_value.as_ref().is_some_and(|v| v.ty().is_likely_int())
            }
            _ => true,
        };
        if self.needs_bound_checks && !conventional_index {
            return false;
        }
        let supported = match self.opcode {
            Opcode::IsIn => {
                !ty.is_likely_object_with_array() && (!ty.is_likely_array() || ty.has_no_missing_values())
            }
            Opcode::LdLen => !ty.is_likely_object_with_array(),
            Opcode::ArrayPush | Opcode::ArrayPop => ty.is_likely_array_or_object_with_array(),
            Opcode::LdMethodElem => !ty.is_likely_typed_array(),
            _ => true,
        };
        if !supported {
            return false;
        }

        self.base_type = ty;
        self.new_base_type = ty.to_definite_object();
        self.is_likely_js_array = !ty.is_likely_typed_array();
        self.is_likely_virtual_typed_array = ty.is_likely_virtual_typed_array();
        self.base_array = base_value.info().as_array().copied().unwrap_or_default();
        self.base_value = Some(base_value);
        true
    }

    /// The prepass only learns the base's type, and only when no loop undoes it
    fn update_value_in_prepass(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func) {
        if self.new_base_type == self.base_type || !glob.safe_to_copy_prop_in_prepass(func, self.base_sym) {
            return;
        }
        let killed = self.is_likely_js_array
            && glob
                .prepass_loops(func)
                .into_iter()
                .any(|l| func.graph.loop_(l).js_array_kills.kills_value_type(self.new_base_type));
        if !killed {
            self.update_value(glob, func);
        }
    }

    fn decide_items(&mut self, glob: &GlobOpt<'_>, func: &Func, instr: &Instr) {
        let config = glob.config;
        self.do_array_checks = !self.base_type.is_object();

        let segment_hoist = config.array_segment_hoist && self.opcode != Opcode::StElemC;
        self.head_segment_is_available = self.base_array.head_segment_sym.is_some();
        self.do_head_segment_load = segment_hoist && self.needs_head_segment && !self.head_segment_is_available;

        self.head_segment_length_is_available = self.base_array.head_segment_length_sym.is_some();
        self.do_head_segment_length_load = segment_hoist
            && (self.needs_head_segment_length || !self.is_likely_js_array && self.needs_length)
            && !self.head_segment_length_is_available;

        self.length_is_available = self.base_array.length_sym.is_some();
        self.do_length_load = config.array_length_hoist
            && self.needs_length
            && !self.length_is_available
            && self.base_type.is_likely_array();

        let helper_call_likely = instr
            .profile
            .is_some_and(|p| p.stores_outside_head_segment || p.stores_outside_array_bounds);
        self.can_bail_out_on_helper_call = match self.opcode {
            Opcode::IsIn => true,
            _ if self.is_profilable_ld_elem || self.is_profilable_st_elem => {
                func.do_fast_paths().unwrap_or(false) && !helper_call_likely
            }
            _ => false,
        };
    }

    /// Accesses of a virtual typed array within its buffer need no bound checks
    fn check_virtual_array_bounds(&mut self) {
        if !self.is_likely_virtual_typed_array {
            return;
        }
        if !matches!(self.base_slot, BaseSlot::DstIndir | BaseSlot::Src1Indir) {
            self.eliminated_lower_bound_check = true;
            self.eliminated_upper_bound_check = true;
            return;
        }
        let Some(kind) = self.base_type.typed_array_kind() else {
            return;
        };
        let (lower, upper) = match &self.index {
            Some(AccessIndex::Const(c)) => (*c, *c),
            Some(AccessIndex::Reg(reg)) if !reg.ty.is_var() && self.index_value.is_some() => {
                (self.index_bounds.lower_bound(), self.index_bounds.upper_bound())
            }
            _ => return,
        };
        let scale = kind.element_size().trailing_zeros();
        if lower >= 0 && ((upper as u64) << scale) < VIRTUAL_BUFFER_LENGTH {
            self.eliminated_lower_bound_check = true;
            self.eliminated_upper_bound_check = true;
            self.can_bail_out_on_helper_call = false;
        }
    }

    fn try_eliminate_bounds_check(&mut self, glob: &mut GlobOpt<'_>, func: &Func) {
        if !self.needs_bound_checks
            || !glob.config.bound_check_elimination
            || self.eliminated_lower_bound_check && self.eliminated_upper_bound_check
        {
            return;
        }
        self.do_extract_bound_checks = (self.head_segment_length_is_available || self.do_head_segment_length_load)
            && self.can_bail_out_on_helper_call;

        let bounds = self.index_bounds;
        match self.index.clone() {
            Some(AccessIndex::Reg(reg)) => {
                let Some(index_value) = self.index_value.clone() else {
                    self.do_extract_bound_checks = false;
                    return;
                };
                if reg.ty.is_var() {
                    // Bound check instructions take int operands only
                    self.do_extract_bound_checks = false;
                    if index_value.info().try_get_int_constant_bounds(false).is_none() {
                        return;
                    }
                }
                let non_negative = reg.ty == IrType::Uint32
                    || is_greater_than_or_equal_to(
                        Some(&index_value),
                        bounds.lower_bound(),
                        bounds.upper_bound(),
                        None,
                        0,
                        0,
                        0,
                    );
                if non_negative {
                    self.eliminated_lower_bound_check = true;
                }
                if !self.eliminated_lower_bound_check
                    && is_less_than(Some(&index_value), bounds.lower_bound(), bounds.upper_bound(), None, 0, 0)
                {
                    self.eliminated_upper_bound_check = true;
                    self.do_extract_bound_checks = false;
                    return;
                }
            }
            Some(AccessIndex::Const(c)) => {
                if c < 0 {
                    self.eliminated_upper_bound_check = true;
                    self.do_extract_bound_checks = false;
                    return;
                }
                self.eliminated_lower_bound_check = true;
                if c == i32::MAX {
                    self.do_extract_bound_checks = false;
                    return;
                }
            }
            None => {
                self.do_extract_bound_checks = false;
                return;
            }
        }

        if !self.head_segment_length_is_available {
            return;
        }
        let Some(hsl_sym) = self.base_array.head_segment_length_sym else {
            return;
        };
        let Some(hsl_value) = glob.value_of(func, hsl_sym) else {
            if self.do_extract_bound_checks {
                self.head_segment_length_bounds = IntConstantBounds::new(0, MAX_SEGMENT_LENGTH);
            }
            return;
        };
        let hsl_bounds = hsl_value
            .info()
            .try_get_int_constant_bounds(true)
            .unwrap_or(IntConstantBounds::FULL);
        self.head_segment_length_bounds = hsl_bounds;
        if is_less_than_or_equal_to(
            self.index_value.as_ref(),
            bounds.lower_bound(),
            bounds.upper_bound(),
            Some(&hsl_value),
            hsl_bounds.lower_bound(),
            hsl_bounds.upper_bound(),
            -1,
        ) {
            self.eliminated_upper_bound_check = true;
            if self.eliminated_lower_bound_check {
                self.do_extract_bound_checks = false;
            }
        }
        self.head_segment_length_value = Some(hsl_value);
        if self.eliminated_lower_bound_check && self.eliminated_upper_bound_check {
            glob.summary.eliminated_bound_checks += 1;
            trace!(target: "raya_globopt::bounds", base = %self.base_sym, "bound checks proven");
        }
    }

    /// Outermost loop each item can move out of, innermost loops first
    fn check_loops(&mut self, glob: &GlobOpt<'_>, func: &Func) {
        if !(self.do_array_checks || self.do_head_segment_load || self.do_head_segment_length_load || self.do_length_load)
        {
            return;
        }
        let Some(base_value) = self.base_value.clone() else {
            return;
        };
        let js = self.is_likely_js_array;
        for loop_id in func.graph.loop_chain(glob.current_block) {
            let lp = func.graph.loop_(loop_id);
            let kills = lp.js_array_kills;
            if !glob.opt_is_invariant(func, self.base_sym, loop_id, &base_value)
                || (js || self.is_likely_virtual_typed_array) && kills.kills_value_type(self.new_base_type)
            {
                break;
            }
            let is_object_in_landing_pad = func
                .graph
                .block(lp.landing_pad)
                .data
                .as_ref()
                .and_then(|d| d.find_value(self.base_sym, &func.syms, &func.constants))
                .is_some_and(|v| v.ty().is_object());
            if !(self.do_array_checks || is_object_in_landing_pad) {
                break;
            }

            if self.do_array_checks {
                self.hoist_checks_out_of = Some(loop_id);
            }

            if js && kills.kills_array_head_segments() {
                if !(self.do_array_checks || self.do_length_load) {
                    break;
                }
            } else {
                if self.do_head_segment_load || self.head_segment_is_available {
                    self.hoist_head_segment_load_out_of = Some(loop_id);
                }
                let hsl_killed = if js {
                    kills.kills_array_head_segment_lengths()
                } else {
                    kills.kills_typed_array_head_segment_lengths()
                };
                if hsl_killed {
                    if !(self.do_array_checks || self.do_head_segment_load || self.do_length_load) {
                        break;
                    }
                } else if self.do_head_segment_length_load || self.head_segment_length_is_available {
                    self.hoist_head_segment_length_load_out_of = Some(loop_id);
                }
            }

            if js && kills.kills_array_lengths() {
                if !(self.do_array_checks || self.do_head_segment_load || self.do_head_segment_length_load) {
                    break;
                }
            } else if self.do_length_load || self.length_is_available {
                self.hoist_length_load_out_of = Some(loop_id);
            }
        }
    }

    // ---------------------------------------------------------------
    // Emission
    // ---------------------------------------------------------------

    /// Emit ahead of the access, sharing the access's bailout
    fn emit_local(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func, instr: Instr, kind: BailOutKind) -> InstrRef {
        match self.shared_bailout {
            Some(shared) => {
                let mut instr = func.graph.stamp(instr.at_offset(glob.current_offset));
                glob.share_bail_out(func, &shared, &mut instr, kind);
                let at = InstrRef {
                    block: glob.current_block,
                    id: instr.id,
                };
                glob.pending_before.push(instr);
                at
            }
            None => {
                let at = glob.emit_before_with_bail(func, instr, kind);
                self.shared_bailout = glob.pending_before.last().and_then(|i| i.bailout);
                at
            }
        }
    }

    /// Insert into a landing pad, bailing out to the loop's bail target
    fn emit_hoisted(
        &self,
        glob: &mut GlobOpt<'_>,
        func: &mut Func,
        loop_id: LoopId,
        mut instr: Instr,
        kind: BailOutKind,
    ) -> InstrRef {
        let target = glob.ensure_bail_target(func, loop_id);
        instr.bailout = Some(InstrBailOut { kind, info: target });
        glob.insert_instr_in_landing_pad(func, loop_id, instr)
    }

    /// Value of a loaded aux sym; it is never a copy-prop source
    fn set_aux_value(&self, glob: &mut GlobOpt<'_>, func: &Func, sym: SymId, value: &Value) {
        let mut info = value.info().clone();
        info.set_sym_store(None);
        glob.current.sym_to_value.insert(sym, Value::new(value.number(), info));
        glob.current.make_live(sym, false, &func.syms);
    }

    fn insert_array_checks(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func) {
        if !self.do_array_checks {
            return;
        }
        let kind = if self.base_type.is_likely_native_array() {
            BailOutKind::ON_NOT_NATIVE_ARRAY
        } else {
            BailOutKind::ON_NOT_ARRAY
        };
        let check = Instr::new(Opcode::BailOnNotArray).with_src1(Opnd::Reg(self.base_reg()));
        match self.hoist_checks_out_of {
            Some(loop_id) => {
                self.emit_hoisted(glob, func, loop_id, check, kind);
                glob.summary.hoisted_array_checks += 1;
                debug!(target: "raya_globopt::arrays", base = %self.base_sym, loop_id = %loop_id, "hoisted array check");
            }
            None => {
                self.emit_local(glob, func, check, kind);
            }
        }
    }

    fn insert_length_load(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func) {
        if !self.do_length_load {
            return;
        }
        let length_sym = func.syms.new_stack_sym(IrType::Int32);
        self.new_length_sym = Some(length_sym);
        let value = Value::new(glob.value_numbers.next(), ValueInfo::new_int_range(0, i32::MAX));

        let load = Instr::new(Opcode::LdArrayLength)
            .with_dst(Opnd::Reg(RegOpnd::new(length_sym, IrType::Int32).jit_optimized()))
            .with_src1(Opnd::Reg(self.base_reg()));
        let check = Instr::new(Opcode::BailOnNegative).with_src1(Opnd::Reg(RegOpnd::new(length_sym, IrType::Int32)));
        match self.hoist_length_load_out_of {
            Some(loop_id) => {
                glob.insert_instr_in_landing_pad(func, loop_id, load);
                self.emit_hoisted(glob, func, loop_id, check, BailOutKind::ON_IRREGULAR_LENGTH);
                glob.hoist_value_to_blocks(func, loop_id, length_sym, &value);
                glob.summary.hoisted_length_loads += 1;
                debug!(target: "raya_globopt::arrays", base = %self.base_sym, loop_id = %loop_id, "hoisted length load");
            }
            None => {
                glob.emit_before(func, load);
                self.emit_local(glob, func, check, BailOutKind::ON_IRREGULAR_LENGTH);
            }
        }
        self.set_aux_value(glob, func, length_sym, &value);
    }

    fn insert_head_segment_load(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func) {
        if !self.do_head_segment_load {
            return;
        }
        let head_segment_sym = func.syms.new_stack_sym(IrType::Var);
        self.new_head_segment_sym = Some(head_segment_sym);
        let load = Instr::new(Opcode::LdArrayHeadSegment)
            .with_dst(Opnd::Reg(RegOpnd::new(head_segment_sym, IrType::Var).jit_optimized()))
            .with_src1(Opnd::Reg(self.base_reg()));
        match self.hoist_head_segment_load_out_of {
            Some(loop_id) => {
                glob.insert_instr_in_landing_pad(func, loop_id, load);
                for chained in func.graph.loop_chain(glob.current_block) {
                    let pad = func.graph.loop_(chained).landing_pad;
                    if let Some(data) = func.graph.block_mut(pad).data.as_mut() {
                        data.make_live(head_segment_sym, false, &func.syms);
                    }
                    if chained == loop_id {
                        break;
                    }
                }
                glob.summary.hoisted_head_segment_loads += 1;
                debug!(target: "raya_globopt::arrays", base = %self.base_sym, loop_id = %loop_id, "hoisted head segment load");
            }
            None => {
                glob.emit_before(func, load);
            }
        }
        glob.current.make_live(head_segment_sym, false, &func.syms);
    }

    fn insert_head_segment_length_load(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func) {
        if !self.do_head_segment_length_load {
            return;
        }
        let hsl_sym = func.syms.new_stack_sym(IrType::Int32);
        self.new_head_segment_length_sym = Some(hsl_sym);
        let value = Value::new(glob.value_numbers.next(), ValueInfo::new_int_range(0, MAX_SEGMENT_LENGTH));

        let src = match self.new_head_segment_sym.or(self.base_array.head_segment_sym) {
            Some(head_segment_sym) if self.is_likely_js_array => {
                Opnd::Reg(RegOpnd::new(head_segment_sym, IrType::Var).jit_optimized())
            }
            _ => Opnd::Reg(self.base_reg()),
        };
        let load = Instr::new(Opcode::LdArrayHeadSegmentLength)
            .with_dst(Opnd::Reg(RegOpnd::new(hsl_sym, IrType::Int32).jit_optimized()))
            .with_src1(src);
        match self.hoist_head_segment_length_load_out_of {
            Some(loop_id) => {
                glob.insert_instr_in_landing_pad(func, loop_id, load);
                glob.hoist_value_to_blocks(func, loop_id, hsl_sym, &value);
                debug!(target: "raya_globopt::arrays", base = %self.base_sym, loop_id = %loop_id, "hoisted head segment length load");
            }
            None => {
                glob.emit_before(func, load);
            }
        }
        self.set_aux_value(glob, func, hsl_sym, &value);
        self.head_segment_length_value = Some(value);
        self.head_segment_length_bounds = IntConstantBounds::new(0, MAX_SEGMENT_LENGTH);
    }

    // ---------------------------------------------------------------
    // Bound checks
    // ---------------------------------------------------------------

    fn extract_bound_checks(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func) {
        if self.eliminated_lower_bound_check && self.eliminated_upper_bound_check {
            return;
        }
        let Some(hsl_sym) = self
            .new_head_segment_length_sym
            .or(self.base_array.head_segment_length_sym)
        else {
            return;
        };
        let hsl_value = match self.head_segment_length_value.clone() {
            Some(value) => value,
            None => {
                let value = Value::new(glob.value_numbers.next(), ValueInfo::new_int_range(0, MAX_SEGMENT_LENGTH));
                self.set_aux_value(glob, func, hsl_sym, &value);
                self.head_segment_length_value = Some(value.clone());
                value
            }
        };

        let index = BoundCheckIndex {
            var_sym: self.index_var_sym,
            value: self.index_value.clone(),
            constant_bounds: self.index_bounds,
        };
        let (lower, upper) = glob.determine_array_bound_check_hoistability(
            func,
            !self.eliminated_lower_bound_check,
            !self.eliminated_upper_bound_check,
            &index,
            hsl_sym,
            &hsl_value,
        );
        if !self.eliminated_lower_bound_check {
            self.do_lower_bound_check(glob, func, lower);
        }
        if !self.eliminated_upper_bound_check {
            self.do_upper_bound_check(glob, func, upper, hsl_sym);
        }
    }

    fn do_lower_bound_check(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func, plan: BoundCheckPlan) {
        match plan {
            BoundCheckPlan::Covered => glob.summary.eliminated_bound_checks += 1,
            BoundCheckPlan::Hoist(info) => {
                if !self.emit_hoisted_bound_check(glob, func, &info, None) {
                    self.emit_local_lower_bound_check(glob, func);
                }
            }
            BoundCheckPlan::Local => self.emit_local_lower_bound_check(glob, func),
        }
        self.eliminated_lower_bound_check = true;

        if let Some(index_value) = &self.index_value {
            if let Some(info) =
                update_int_bounds_for_greater_than_or_equal(index_value, None, IntConstantBounds::constant(0), 0)
            {
                glob.current.change_value_info(index_value.number(), Rc::new(info));
                self.refresh_index_value(glob, func);
            }
        }
    }

    fn emit_local_lower_bound_check(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func) {
        let Some(AccessIndex::Reg(reg)) = self.index.clone() else {
            return;
        };
        let check = Instr::bound_check(
            Opnd::IntConst(0),
            Opnd::Reg(RegOpnd::new(reg.sym, IrType::Int32)),
            0,
        );
        let at = self.emit_local(glob, func, check, BailOutKind::ON_ARRAY_ACCESS_HELPER_CALL);
        if let Some(index_value) = &self.index_value {
            let block = glob.current_block;
            glob.record_available_bound_check(func, IntBoundCheck::new(ZERO_VALUE_NUMBER, index_value.number(), at, block));
        }
        glob.summary.local_bound_checks += 1;
    }

    fn do_upper_bound_check(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func, plan: BoundCheckPlan, hsl_sym: SymId) {
        match plan {
            BoundCheckPlan::Covered => glob.summary.eliminated_bound_checks += 1,
            BoundCheckPlan::Hoist(info) => {
                if !self.emit_hoisted_bound_check(glob, func, &info, Some(hsl_sym)) {
                    self.emit_local_upper_bound_check(glob, func, hsl_sym);
                }
            }
            BoundCheckPlan::Local => self.emit_local_upper_bound_check(glob, func, hsl_sym),
        }
        self.eliminated_upper_bound_check = true;

        let Some(hsl_value) = self.head_segment_length_value.clone() else {
            return;
        };
        if let Some(index_value) = self.index_value.clone() {
            if let Some(info) =
                update_int_bounds_for_less_than(&index_value, Some(&hsl_value), self.head_segment_length_bounds, 0)
            {
                glob.current.change_value_info(index_value.number(), Rc::new(info));
                self.refresh_index_value(glob, func);
            }
        }
        if let Some(info) =
            update_int_bounds_for_greater_than(&hsl_value, self.index_value.as_ref(), self.index_bounds, 0)
        {
            glob.current.change_value_info(hsl_value.number(), Rc::new(info));
            self.head_segment_length_value = glob.value_of(func, hsl_sym);
        }
    }

    /// `index <= hsl - 1`; a constant index `c` is checked as `0 <= hsl - 1 - c`
    fn emit_local_upper_bound_check(&mut self, glob: &mut GlobOpt<'_>, func: &mut Func, hsl_sym: SymId) {
        let Some(hsl_value) = self.head_segment_length_value.clone() else {
            return;
        };
        let (src1, offset, left_vn) = match self.index.clone() {
            Some(AccessIndex::Reg(reg)) => {
                let Some(index_value) = &self.index_value else {
                    return;
                };
                (
                    Opnd::Reg(RegOpnd::new(reg.sym, IrType::Int32)),
                    -1,
                    index_value.number(),
                )
            }
            Some(AccessIndex::Const(c)) => match (-1i32).checked_sub(c) {
                Some(offset) => (Opnd::IntConst(0), offset, ZERO_VALUE_NUMBER),
                None => return,
            },
            None => return,
        };
        let check = Instr::bound_check(src1, Opnd::Reg(RegOpnd::new(hsl_sym, IrType::Int32)), offset);
        let at = self.emit_local(glob, func, check, BailOutKind::ON_ARRAY_ACCESS_HELPER_CALL);
        let block = glob.current_block;
        glob.record_available_bound_check(func, IntBoundCheck::new(left_vn, hsl_value.number(), at, block));
        glob.summary.local_bound_checks += 1;
    }

    /// Emit a check in a landing pad; `false` when its operand is not available there
    fn emit_hoisted_bound_check(
        &mut self,
        glob: &mut GlobOpt<'_>,
        func: &mut Func,
        info: &BoundCheckHoistInfo,
        upper_against: Option<SymId>,
    ) -> bool {
        let operand = match info.operand {
            HoistedOperand::Constant(c) => Some(Opnd::IntConst(c)),
            HoistedOperand::Sym(sym) => glob.int_opnd_in_landing_pad(func, info.loop_id, sym),
            HoistedOperand::InductionBound(sym) => glob
                .generate_loop_count(func, info.loop_id)
                .and_then(|count| glob.generate_secondary_induction_variable_bound(func, info.loop_id, sym, &count)),
        };
        let Some(operand) = operand else {
            return false;
        };
        let (src1, src2) = match upper_against {
            None => (Opnd::IntConst(0), operand),
            Some(hsl_sym) => (operand, Opnd::Reg(RegOpnd::new(hsl_sym, IrType::Int32))),
        };
        let kind = if info.loop_count_based {
            BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK
        } else {
            BailOutKind::ON_FAILED_HOISTED_BOUND_CHECK
        };
        let at = self.emit_hoisted(glob, func, info.loop_id, Instr::bound_check(src1, src2, info.offset), kind);
        if let Some((left, right)) = info.key {
            glob.record_available_bound_check(func, IntBoundCheck::new(left, right, at, at.block));
        }
        glob.summary.hoisted_bound_checks += 1;
        debug!(
            target: "raya_globopt::bounds",
            base = %self.base_sym,
            loop_id = %info.loop_id,
            upper = upper_against.is_some(),
            offset = info.offset,
            "hoisted bound check"
        );
        true
    }

    // ---------------------------------------------------------------
    // Results
    // ---------------------------------------------------------------

    /// Give the base its new type and aux syms in the current block
    fn update_value(&mut self, glob: &mut GlobOpt<'_>, func: &Func) {
        let Some(base_value) = self.base_value.clone() else {
            return;
        };
        let array = ArrayValueInfo {
            head_segment_sym: self.new_head_segment_sym.or(self.base_array.head_segment_sym),
            head_segment_length_sym: self
                .new_head_segment_length_sym
                .or(self.base_array.head_segment_length_sym),
            length_sym: self.new_length_sym.or(self.base_array.length_sym),
        };
        if self.new_base_type == base_value.ty() && base_value.info().as_array().copied().unwrap_or_default() == array {
            return;
        }
        let info = base_value.info();
        let updated = if array.is_empty() {
            info.with_type(self.new_base_type)
        } else {
            ValueInfo::new_array(self.new_base_type, array, info.sym_store())
        };
        glob.current.change_value_info(base_value.number(), Rc::new(updated));
        self.base_array = array;
        self.base_value = glob.value_of(func, self.base_sym);
    }

    /// Landing pads an item moved to know about it too
    fn update_hoisted_value_info(&self, glob: &mut GlobOpt<'_>, func: &mut Func) {
        let hoisted = [
            self.hoist_checks_out_of,
            self.hoist_head_segment_load_out_of,
            self.hoist_head_segment_length_load_out_of,
            self.hoist_length_load_out_of,
        ];
        if hoisted.iter().all(Option::is_none) {
            return;
        }
        let Some(base_value) = &self.base_value else {
            return;
        };
        let mut keep_head_segment = self.hoist_head_segment_load_out_of.is_some();
        let mut keep_head_segment_length = self.hoist_head_segment_length_load_out_of.is_some();
        let mut keep_length = self.hoist_length_load_out_of.is_some();

        let Func {
            graph, syms, constants, ..
        } = func;
        for loop_id in graph.loop_chain(glob.current_block) {
            let pad = graph.loop_(loop_id).landing_pad;
            let Some(data) = graph.block_mut(pad).data.as_mut() else {
                break;
            };
            let Some(pad_value) = data.find_value(self.base_sym, syms, constants) else {
                break;
            };
            if pad_value.number() != base_value.number() {
                break;
            }
            let array = self
                .base_array
                .copy_with(keep_head_segment, keep_head_segment_length, keep_length);
            let info = if array.is_empty() {
                pad_value.info().with_type(self.new_base_type)
            } else {
                ValueInfo::new_array(self.new_base_type, array, pad_value.info().sym_store())
            };
            data.change_value_info(pad_value.number(), Rc::new(info));

            if self.hoist_checks_out_of == Some(loop_id) {
                break;
            }
            if self.hoist_head_segment_load_out_of == Some(loop_id) {
                keep_head_segment = false;
            }
            if self.hoist_head_segment_length_load_out_of == Some(loop_id) {
                keep_head_segment_length = false;
            }
            if self.hoist_length_load_out_of == Some(loop_id) {
                keep_length = false;
            }
            if !keep_head_segment && !keep_head_segment_length && !keep_length && self.hoist_checks_out_of.is_none() {
                break;
            }
        }
    }

    /// Tell the lowerer which aux syms to use and which checks it may skip
    fn update_base_opnd(&self, instr: &mut Instr) {
        let array = self.base_array;
        let info = ArrayRegInfo {
            head_segment_sym: array.head_segment_sym.filter(|_| self.needs_head_segment),
            head_segment_length_sym: array
                .head_segment_length_sym
                .filter(|_| self.needs_head_segment_length || !self.is_likely_js_array && self.needs_length),
            length_sym: array.length_sym.filter(|_| self.needs_length),
            eliminated_lower_bound_check: self.eliminated_lower_bound_check,
            eliminated_upper_bound_check: self.eliminated_upper_bound_check,
        };
        let new_type = self.new_base_type;
        if let Some(reg) = self.base_reg_mut(instr) {
            reg.value_type = new_type;
            reg.array = Some(info);
        }
    }

    /// An in-bounds `in` test on an array without missing values is `true`
    fn finish_is_in(&mut self, instr: &mut Instr) {
        if self.eliminated_lower_bound_check && self.eliminated_upper_bound_check {
            instr.opcode = Opcode::Ld;
            instr.src1 = Some(Opnd::BoolConst(true));
            instr.src2 = None;
            debug!(target: "raya_globopt::arrays", base = %self.base_sym, "in test folded to true");
            return;
        }
        if let Some(original) = self.original_index.take() {
            instr.src1 = Some(original);
        }
    }

    /// `LdLen` of an array whose length is in a sym becomes a move
    fn rewrite_ld_len(&self, func: &mut Func, instr: &mut Instr) {
        let length_sym = if self.is_likely_js_array {
            self.base_array.length_sym
        } else {
            self.base_array.head_segment_length_sym
        };
        let (Some(length_sym), Some(dst)) = (length_sym, instr.dst_reg().map(|r| r.sym)) else {
            return;
        };
        let var = func.syms.var_equiv(dst);
        let int_dst = func.syms.ensure_int32_equiv(var);
        instr.opcode = Opcode::Ld;
        instr.dst = Some(Opnd::Reg(RegOpnd::new(int_dst, IrType::Int32)));
        instr.src1 = Some(Opnd::Reg(RegOpnd::new(length_sym, IrType::Int32)));
        instr.bailout = None;
        trace!(target: "raya_globopt::arrays", dst = %dst, length = %length_sym, "length load from sym");
    }
}

fn indir_index(index: Option<&RegOpnd>, offset: i32) -> Option<AccessIndex> {
    match index {
        Some(reg) if offset == 0 => Some(AccessIndex::Reg(reg.clone())),
        Some(_) => None,
        None => Some(AccessIndex::Const(offset)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::flow_graph::BranchOp;
    use crate::config::GlobOptConfig;
    use crate::ir::builder::IrBuilder;
    use crate::value::{ObjectKind, TypedArrayKind};

    fn optimize(func: &mut Func) {
        let config = GlobOptConfig::default();
        GlobOpt::new(&config).optimize(func).unwrap();
    }

    fn entry_opcodes(func: &Func) -> Vec<Opcode> {
        func.graph
            .block(func.graph.entry)
            .instrs
            .iter()
            .map(|i| i.opcode)
            .collect()
    }

    fn find<'f>(func: &'f Func, opcode: Opcode) -> &'f Instr {
        func.graph
            .block(func.graph.entry)
            .instrs
            .iter()
            .find(|i| i.opcode == opcode)
            .unwrap()
    }

    #[test]
    fn test_is_array_access() {
        assert!(is_array_access(Opcode::LdElem));
        assert!(is_array_access(Opcode::IsIn));
        assert!(!is_array_access(Opcode::LdFld));
        assert!(!is_array_access(Opcode::BoundCheck));
    }

    #[test]
    fn test_length_loaded_once() {
        let mut func = Func::new_for_test();
        let arr = {
            let mut b = IrBuilder::new(&mut func);
            let (arr, n, m) = (b.var(0), b.var(1), b.var(2));
            b.ld_len(n, arr);
            b.ld_len(m, arr);
            b.ret(None);
            arr
        };
        func.set_param_value_type(arr, ValueType::array(ObjectKind::Array, true));
        optimize(&mut func);

        let opcodes = entry_opcodes(&func);
        assert_eq!(opcodes.iter().filter(|op| **op == Opcode::LdArrayLength).count(), 1);
        assert_eq!(opcodes.iter().filter(|op| **op == Opcode::BailOnNegative).count(), 1);
        assert!(!opcodes.contains(&Opcode::LdLen));
        assert!(!opcodes.contains(&Opcode::BailOnNotArray));
    }

    #[test]
    fn test_likely_array_gets_local_array_check() {
        let mut func = Func::new_for_test();
        let arr = {
            let mut b = IrBuilder::new(&mut func);
            let (arr, n) = (b.var(0), b.var(1));
            b.ld_len(n, arr);
            b.ret(None);
            arr
        };
        func.set_param_value_type(arr, ValueType::likely_array(ObjectKind::Array, false));
        optimize(&mut func);

        let check = find(&func, Opcode::BailOnNotArray);
        assert_eq!(check.bailout_kind(), BailOutKind::ON_NOT_ARRAY);
        let opcodes = entry_opcodes(&func);
        let check_at = opcodes.iter().position(|op| *op == Opcode::BailOnNotArray).unwrap();
        let load_at = opcodes.iter().position(|op| *op == Opcode::LdArrayLength).unwrap();
        assert!(check_at < load_at);
    }

    #[test]
    fn test_local_checks_share_the_access_bailout() {
        let mut func = Func::new_for_test();
        let (arr, i) = {
            let mut b = IrBuilder::new(&mut func);
            let (arr, i, t) = (b.var(0), b.var(1), b.var(2));
            b.ld_elem(t, arr, Opnd::reg(i));
            b.ret(None);
            (arr, i)
        };
        func.set_param_value_type(arr, ValueType::array(ObjectKind::Array, true));
        func.set_param_value_type(i, ValueType::INT);
        optimize(&mut func);

        let instrs = &func.graph.block(func.graph.entry).instrs;
        let checks: Vec<&Instr> = instrs.iter().filter(|i| i.opcode == Opcode::BoundCheck).collect();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].bound_check_offset(), Some(0));
        assert_eq!(checks[1].bound_check_offset(), Some(-1));
        let access = find(&func, Opcode::LdElem);
        let shared = access.bailout.unwrap().info;
        assert!(access.bailout_kind().contains(BailOutKind::ON_ARRAY_ACCESS_HELPER_CALL));
        assert!(checks.iter().all(|c| c.bailout.unwrap().info == shared));

        let info = access.src1.as_ref().unwrap().as_indir().unwrap().base.array.unwrap();
        assert!(info.eliminated_lower_bound_check && info.eliminated_upper_bound_check);
        assert!(info.head_segment_sym.is_some() && info.head_segment_length_sym.is_some());
    }

    #[test]
    fn test_constant_index_at_int_max_keeps_upper_check() {
        let mut func = Func::new_for_test();
        let arr = {
            let mut b = IrBuilder::new(&mut func);
            let (arr, t) = (b.var(0), b.var(1));
            b.ld_elem(t, arr, Opnd::IntConst(i32::MAX));
            b.ret(None);
            arr
        };
        func.set_param_value_type(arr, ValueType::array(ObjectKind::Array, true));
        optimize(&mut func);

        assert!(!entry_opcodes(&func).contains(&Opcode::BoundCheck));
        let access = find(&func, Opcode::LdElem);
        let info = access.src1.as_ref().unwrap().as_indir().unwrap().base.array.unwrap();
        assert!(info.eliminated_lower_bound_check);
        assert!(!info.eliminated_upper_bound_check);
    }

    #[test]
    fn test_virtual_typed_array_in_buffer_needs_no_checks() {
        let mut func = Func::new_for_test();
        let buffer = {
            let mut b = IrBuilder::new(&mut func);
            let (buffer, t) = (b.var(0), b.var(1));
            b.ld_elem(t, buffer, Opnd::IntConst(16));
            b.ret(None);
            buffer
        };
        func.set_param_value_type(
            buffer,
            ValueType::object(ObjectKind::VirtualTypedArray(TypedArrayKind::Int32)),
        );
        optimize(&mut func);

        assert!(!entry_opcodes(&func).contains(&Opcode::BoundCheck));
        let access = find(&func, Opcode::LdElem);
        assert!(!access.bailout_kind().contains(BailOutKind::ON_ARRAY_ACCESS_HELPER_CALL));
        let info = access.src1.as_ref().unwrap().as_indir().unwrap().base.array.unwrap();
        assert!(info.eliminated_lower_bound_check && info.eliminated_upper_bound_check);
    }

    #[test]
    fn test_typed_array_head_segment_loaded_after_bound_checks() {
        let mut func = Func::new_for_test();
        let (buffer, i) = {
            let mut b = IrBuilder::new(&mut func);
            let (buffer, i, t) = (b.var(0), b.var(1), b.var(2));
            b.ld_elem(t, buffer, Opnd::reg(i));
            b.ret(None);
            (buffer, i)
        };
        func.set_param_value_type(buffer, ValueType::object(ObjectKind::TypedArray(TypedArrayKind::Int32)));
        func.set_param_value_type(i, ValueType::INT);
        optimize(&mut func);

        assert_eq!(
            entry_opcodes(&func),
            vec![
                Opcode::FromVar,
                Opcode::LdArrayHeadSegmentLength,
                Opcode::BoundCheck,
                Opcode::BoundCheck,
                Opcode::LdArrayHeadSegment,
                Opcode::LdElem,
            ]
        );
        let length = find(&func, Opcode::LdArrayHeadSegmentLength);
        assert_eq!(length.src1_reg().map(|r| r.sym), Some(buffer));
    }

    #[test]
    fn test_unproven_in_test_keeps_var_index_and_never_bails() {
        let mut func = Func::new_for_test();
        let (arr, i) = {
            let mut b = IrBuilder::new(&mut func);
            let (arr, i, r) = (b.var(0), b.var(1), b.var(2));
            b.is_in(r, Opnd::reg(i), arr);
            b.ret(Some(Opnd::reg(r)));
            (arr, i)
        };
        func.set_param_value_type(arr, ValueType::array(ObjectKind::Array, true));
        func.set_param_value_type(i, ValueType::INT);
        let config = GlobOptConfig {
            array_segment_hoist: false,
            ..GlobOptConfig::default()
        };
        GlobOpt::new(&config).optimize(&mut func).unwrap();

        let test = find(&func, Opcode::IsIn);
        assert!(test.bailout.is_none());
        let index = test.src1_reg().unwrap();
        assert_eq!((index.sym, index.ty), (i, IrType::Var));
        assert_eq!(test.src2_reg().map(|r| r.sym), Some(arr));
    }

    #[test]
    fn test_var_index_with_known_bounds_drops_lower_check() {
        let mut func = Func::new_for_test();
        let (arr, i, in_range) = {
            let mut b = IrBuilder::new(&mut func);
            let (arr, i, t) = (b.var(0), b.var(1), b.var(2));
            let negative = b.create_block();
            let in_range = b.create_block();
            b.branch(BranchOp::Lt, Opnd::reg(i), Some(Opnd::IntConst(0)), negative, in_range);
            b.switch_to_block(negative);
            b.ret(None);
            b.switch_to_block(in_range);
            b.ld_elem(t, arr, Opnd::reg(i));
            b.ret(None);
            (arr, i, in_range)
        };
        func.set_param_value_type(arr, ValueType::array(ObjectKind::Array, true));
        func.set_param_value_type(i, ValueType::INT);
        let config = GlobOptConfig {
            aggressive_int_type_spec: false,
            ..GlobOptConfig::default()
        };
        GlobOpt::new(&config).optimize(&mut func).unwrap();

        let block = func.graph.block(in_range);
        assert!(!block.instrs.iter().any(|i| i.opcode == Opcode::BoundCheck));
        let access = block.instrs.iter().find(|i| i.opcode == Opcode::LdElem).unwrap();
        let indir = access.src1.as_ref().unwrap().as_indir().unwrap();
        assert!(indir.index.as_ref().is_some_and(|r| r.sym == i && r.ty.is_var()));
        let info = indir.base.array.unwrap();
        assert!(info.eliminated_lower_bound_check);
        assert!(!info.eliminated_upper_bound_check);
    }

    #[test]
    fn test_plain_object_base_is_left_alone() {
        let mut func = Func::new_for_test();
        let o = {
            let mut b = IrBuilder::new(&mut func);
            let (o, t) = (b.var(0), b.var(1));
            b.ld_elem(t, o, Opnd::IntConst(0));
            b.ret(None);
            o
        };
        func.set_param_value_type(o, ValueType::object(ObjectKind::Object));
        optimize(&mut func);

        assert_eq!(entry_opcodes(&func), vec![Opcode::LdElem]);
        let access = find(&func, Opcode::LdElem);
        assert!(access.src1.as_ref().unwrap().as_indir().unwrap().base.array.is_none());
    }
}
