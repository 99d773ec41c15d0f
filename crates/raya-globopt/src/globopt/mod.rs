//! Global optimizer
//!
//! Walks the flow graph in reverse post-order carrying a [`BlockData`] per
//! block. Every loop header reached in the real pass first runs a prepass
//! over the loop body that only computes summaries (kills, induction
//! variables, syms used before defined); the real pass then uses those to
//! decide what may move to the loop's landing pad.

pub mod arrays;
pub mod bailout;
pub mod block_data;
pub mod bound_check;
pub mod fields;
pub mod induction;
pub mod kills;
pub mod liveness;
pub mod obj_type_spec;

use std::mem;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, trace};

use self::bailout::{BailOutKind, InstrBailOut};
use self::block_data::{BlockData, MergeContext};
use self::kills::{apply_js_array_kills, array_base_opnd, check_js_array_kills, stored_value_opnd};
use self::liveness::BackEdgeInfo;
use crate::analysis::flow_graph::{BlockId, BranchOp, LoopId, Terminator};
use crate::config::GlobOptConfig;
use crate::error::{AbandonReason, GlobOptError};
use crate::func::{Func, FuncId};
use crate::host::HostTypeInfo;
use crate::ir::bitset::SymSet;
use crate::ir::instr::{Instr, InstrRef, Opcode};
use crate::ir::opnd::{Opnd, RegOpnd};
use crate::ir::sym::SymId;
use crate::ir::types::IrType;
use crate::value::{
    IntBounds, IntConstantBounds, ObjectKind, Value, ValueInfo, ValueNumber, ValueNumberAllocator, ValueType,
    VarConstant, ZERO_VALUE_NUMBER,
};

pub use self::bailout::{BailOutId, BailOutInfo, BailOutTable};

/// Which pass over a loop body is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Summaries only; nothing is rewritten, hoisted or given a bailout
    Prepass,
    Real,
}

/// What one optimizer run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobOptSummary {
    pub hoisted_array_checks: usize,
    pub hoisted_length_loads: usize,
    pub hoisted_head_segment_loads: usize,
    pub hoisted_bound_checks: usize,
    pub eliminated_bound_checks: usize,
    pub local_bound_checks: usize,
    pub compensation_loads: usize,
    pub bailouts: usize,
}

/// The global optimizer for one function
pub struct GlobOpt<'c> {
    pub(crate) config: &'c GlobOptConfig,
    pub(crate) host: Option<&'c dyn HostTypeInfo>,
    pub(crate) mode: Mode,
    pub(crate) current_block: BlockId,
    pub(crate) current: BlockData,
    /// Instructions of the current block already optimized
    pub(crate) current_instrs: Vec<Instr>,
    /// Emitted ahead of the instruction being optimized
    pub(crate) pending_before: Vec<Instr>,
    /// Emitted right after it
    pub(crate) pending_after: Vec<Instr>,
    pub(crate) current_offset: u32,
    pub(crate) value_numbers: ValueNumberAllocator,
    int_constant_values: FxHashMap<i32, ValueNumber>,
    prepass_root: Option<LoopId>,
    /// Syms defined so far by the prepass, per loop
    prepass_defined: FxHashMap<LoopId, SymSet>,
    pub(crate) summary: GlobOptSummary,
    successors_left: FxHashMap<BlockId, usize>,
    pub(crate) current_func: FuncId,
}

impl<'c> GlobOpt<'c> {
    pub fn new(config: &'c GlobOptConfig) -> Self {
        GlobOpt {
            config,
            host: None,
            mode: Mode::Real,
            current_block: BlockId(0),
            current: BlockData::default(),
            current_instrs: Vec::new(),
            pending_before: Vec::new(),
            pending_after: Vec::new(),
            current_offset: 0,
            value_numbers: ValueNumberAllocator::new(),
            int_constant_values: FxHashMap::default(),
            prepass_root: None,
            prepass_defined: FxHashMap::default(),
            summary: GlobOptSummary::default(),
            successors_left: FxHashMap::default(),
            current_func: FuncId::TOP,
        }
    }

    /// Optimizer that can ask the host about object types
    pub fn with_host(config: &'c GlobOptConfig, host: &'c dyn HostTypeInfo) -> Self {
        GlobOpt {
            host: Some(host),
            ..GlobOpt::new(config)
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Optimize `func` in place
    pub fn optimize(&mut self, func: &mut Func) -> Result<GlobOptSummary, GlobOptError> {
        if func.policies().is_none() {
            func.decide_policies(self.config);
        }
        if !func.do_glob_opt()? {
            debug!(target: "raya_globopt::globopt", func = %func.name, "global optimization disabled");
            return Ok(GlobOptSummary::default());
        }
        if !func.graph.is_finalized() {
            func.graph.finalize()?;
        }
        func.check_instr_count_limit(self.config)?;
        if func.graph.loops().len() > self.config.max_loop_count {
            return Err(GlobOptError::abandon(AbandonReason::TooManyLoops));
        }

        self.compute_syms_def_in_loops(func);
        self.count_successors(func);

        let rpo = func.graph.rpo().to_vec();
        for block in rpo {
            if let Some(loop_id) = func.graph.loop_of_header(block) {
                self.loop_prepass(func, loop_id);
            }
            self.optimize_block(func, block);
        }

        self.summary.bailouts = func.bailouts.len();
        debug!(
            target: "raya_globopt::globopt",
            func = %func.name,
            blocks = func.graph.block_count(),
            values = self.value_numbers.count(),
            bailouts = self.summary.bailouts,
            "optimized"
        );
        Ok(self.summary.clone())
    }

    fn compute_syms_def_in_loops(&mut self, func: &mut Func) {
        let loop_ids: Vec<LoopId> = func.graph.loops().iter().map(|l| l.id).collect();
        for loop_id in loop_ids {
            let mut defs = SymSet::new();
            for &block in &func.graph.loop_(loop_id).blocks {
                for instr in &func.graph.block(block).instrs {
                    if let Some(dst) = instr.dst_sym() {
                        if !func.syms.is_property(dst) {
                            defs.set(func.syms.var_equiv(dst));
                        }
                    }
                }
            }
            func.graph.loop_mut(loop_id).syms_def_in_loop = defs;
        }
    }

    fn count_successors(&mut self, func: &Func) {
        self.successors_left.clear();
        for &block in func.graph.rpo() {
            let count = func
                .graph
                .successors(block)
                .into_iter()
                .filter(|succ| !func.graph.is_back_edge(block, *succ))
                .count();
            self.successors_left.insert(block, count);
        }
    }

    fn loop_prepass(&mut self, func: &mut Func, loop_id: LoopId) {
        let nested: Vec<LoopId> = func
            .graph
            .loops()
            .iter()
            .map(|l| l.id)
            .filter(|l| func.graph.is_loop_nested_in(*l, loop_id))
            .collect();
        for id in nested {
            func.graph.loop_mut(id).reset_summaries();
        }

        debug!(target: "raya_globopt::globopt", loop_id = %loop_id, "prepass");
        let saved_func = self.current_func;
        self.mode = Mode::Prepass;
        self.prepass_root = Some(loop_id);
        self.prepass_defined.clear();
        for block in func.graph.loop_rpo(loop_id) {
            self.optimize_block(func, block);
        }
        self.mode = Mode::Real;
        self.prepass_root = None;
        self.current_func = saved_func;
    }

    // ---------------------------------------------------------------
    // Blocks
    // ---------------------------------------------------------------

    fn optimize_block(&mut self, func: &mut Func, block: BlockId) {
        self.current_block = block;
        self.init_block_data(func, block);
        trace!(target: "raya_globopt::globopt", block = %block, mode = ?self.mode, "block");

        let instrs = match self.mode {
            Mode::Real => mem::take(&mut func.graph.block_mut(block).instrs),
            Mode::Prepass => func
                .graph
                .block(block)
                .instrs
                .iter()
                .filter(|i| !i.opcode.is_optimizer_emitted())
                .cloned()
                .collect(),
        };
        self.current_instrs = Vec::with_capacity(instrs.len());
        for mut instr in instrs {
            self.optimize_instr(func, &mut instr);
            self.current_instrs.append(&mut self.pending_before);
            self.current_instrs.push(instr);
            self.current_instrs.append(&mut self.pending_after);
        }

        self.optimize_terminator(func, block);
        if self.mode == Mode::Real {
            self.convert_for_back_edges(func, block);
        }
        self.current_instrs.append(&mut self.pending_before);

        let instrs = mem::take(&mut self.current_instrs);
        if self.mode == Mode::Real {
            func.graph.block_mut(block).instrs = instrs;
        }
        func.graph.block_mut(block).data = Some(mem::take(&mut self.current));
        self.release_preds(func, block);
    }

    /// Drop predecessor states every successor has consumed
    fn release_preds(&mut self, func: &mut Func, block: BlockId) {
        if self.mode == Mode::Prepass {
            return;
        }
        let preds = func.graph.block(block).preds.clone();
        for pred in preds {
            if func.graph.is_back_edge(pred, block) {
                continue;
            }
            let Some(left) = self.successors_left.get_mut(&pred) else {
                continue;
            };
            *left = left.saturating_sub(1);
            if *left == 0 && !func.graph.block(pred).is_landing_pad {
                func.graph.block_mut(pred).data = None;
            }
        }
    }

    fn init_block_data(&mut self, func: &mut Func, block: BlockId) {
        let preds = func.graph.block(block).preds.clone();
        if block == func.graph.entry || preds.is_empty() {
            self.init_entry_data(func);
            return;
        }
        if let Some(loop_id) = func.graph.loop_of_header(block) {
            match self.mode {
                Mode::Prepass => self.init_prepass_header(func, loop_id),
                Mode::Real => self.init_real_header(func, loop_id),
            }
            return;
        }
        if preds.len() == 1 {
            let mut data = BlockData::new_empty();
            if let Some(pred_data) = func.graph.block(preds[0]).data.as_ref() {
                data.init_from(pred_data);
            }
            self.current = data;
            self.apply_branch_bounds(func, preds[0], block);
            return;
        }
        self.merge_preds(func, block, &preds);
    }

    fn init_entry_data(&mut self, func: &mut Func) {
        self.current = BlockData::new_empty();
        let params: Vec<(SymId, ValueType)> = func.param_value_types().to_vec();
        for (sym, ty) in params {
            let value = Value::new(self.value_numbers.next(), ValueInfo::new_generic(ty));
            self.current.set_value(value, sym, &func.syms, &mut func.constants);
            self.current.make_live(sym, false, &func.syms);
        }
    }

    /// Landing pad state with everything the loop redefines made likely-only
    fn init_prepass_header(&mut self, func: &mut Func, loop_id: LoopId) {
        let lp = func.graph.loop_(loop_id);
        let mut data = BlockData::new_empty();
        if let Some(pad) = func.graph.block(lp.landing_pad).data.as_ref() {
            data.init_from(pad);
        }
        for sym in lp.syms_def_in_loop.iter() {
            if let Some(value) = data.sym_to_value.get(&sym) {
                let likely = Value::new(self.value_numbers.next(), value.info().to_likely());
                data.sym_to_value.insert(sym, likely);
            }
        }
        data.available_int_bound_checks.clear();
        self.current = data;
    }

    /// Landing pad joined with the prepass states of the back edges
    fn init_real_header(&mut self, func: &mut Func, loop_id: LoopId) {
        let Func { graph, syms, .. } = func;
        let lp = graph.loop_(loop_id);
        let mut data = BlockData::new_empty();
        if let Some(pad) = graph.block(lp.landing_pad).data.as_ref() {
            data.init_from(pad);
        }

        {
            let mut ctx = MergeContext::new(syms, &mut self.value_numbers, false);
            for &tail in &lp.back_edges {
                let Some(tail_data) = graph.block(tail).data.as_ref() else {
                    continue;
                };
                let (likely_ints, likely_numbers) = tail_data.likely_numeric_syms();
                let edge = BackEdgeInfo {
                    syms_used_before_defined: &lp.syms_used_before_defined,
                    likely_int_on_edge: &likely_ints,
                    likely_number_on_edge: &likely_numbers,
                };
                data.merge_block_data(tail_data, &mut ctx, Some(edge));
            }
        }

        apply_js_array_kills(&mut data, lp.js_array_kills);
        if lp.all_fields_killed {
            data.live_fields.clear_all();
        } else {
            data.live_fields.minus(&lp.field_killed);
        }

        // Unidirectional induction variables keep the start as a bound
        let pad = lp.landing_pad;
        let ivs: Vec<(SymId, bool)> = lp
            .induction_variables
            .values()
            .filter(|iv| iv.is_change_unidirectional())
            .map(|iv| (iv.sym, iv.is_increasing()))
            .collect();
        let mut header_vns = Vec::new();
        for (sym, increasing) in ivs {
            let Some(current) = data.sym_to_value.get(&sym).cloned() else {
                continue;
            };
            let start = graph
                .block(pad)
                .data
                .as_ref()
                .and_then(|d| d.sym_to_value.get(&sym))
                .and_then(|v| v.info().try_get_int_constant_bounds(false));
            if let Some(start) = start {
                let info = if increasing {
                    ValueInfo::new_int_range(start.lower_bound(), i32::MAX)
                } else {
                    ValueInfo::new_int_range(i32::MIN, start.upper_bound())
                };
                let mut info = info;
                info.set_sym_store(current.info().sym_store());
                data.sym_to_value.insert(sym, current.with_info(info));
            }
            header_vns.push((sym, current.number()));
        }

        let liveness = data.liveness();
        let lp = graph.loop_mut(loop_id);
        for (sym, vn) in header_vns {
            if let Some(iv) = lp.induction_variables.get_mut(&sym) {
                iv.header_value_number = Some(vn);
            }
        }
        lp.header_liveness = Some(liveness);
        self.current = data;
    }

    fn merge_preds(&mut self, func: &mut Func, block: BlockId, preds: &[BlockId]) {
        let is_prepass = self.mode == Mode::Prepass;
        let (mut data, compensate, created) = {
            let Func { graph, syms, .. } = func;
            let mut ctx = MergeContext::new(syms, &mut self.value_numbers, is_prepass);
            let mut merged: Option<BlockData> = None;
            for pred in preds {
                let Some(pred_data) = graph.block(*pred).data.as_ref() else {
                    continue;
                };
                match merged.as_mut() {
                    None => {
                        let mut data = BlockData::default();
                        data.init_from(pred_data);
                        merged = Some(data);
                    }
                    Some(data) => {
                        data.merge_block_data(pred_data, &mut ctx, None);
                    }
                }
            }
            (
                merged.unwrap_or_else(BlockData::new_empty),
                ctx.syms_requiring_compensation.clone(),
                ctx.syms_created_for_merge.clone(),
            )
        };

        if !is_prepass {
            for sym in created.iter() {
                if func.syms.ty(sym) == IrType::Int32 {
                    let value = Value::new(self.value_numbers.next(), ValueInfo::new_int_range(0, i32::MAX));
                    data.set_value(value, sym, &func.syms, &mut func.constants);
                }
                data.make_live(sym, false, &func.syms);
            }
            self.insert_compensation(func, block, preds, &data, &compensate, &created);
            self.convert_at_pred_tails(func, preds, &data);
        }
        self.current = data;
    }

    /// Backfill loads of synthesized aux syms at every predecessor tail
    fn insert_compensation(
        &mut self,
        func: &mut Func,
        block: BlockId,
        preds: &[BlockId],
        data: &BlockData,
        compensate: &SymSet,
        created: &SymSet,
    ) {
        for array_sym in compensate.iter() {
            let Some(array) = data.sym_to_value.get(&array_sym).and_then(|v| v.info().as_array().copied()) else {
                continue;
            };
            let loads = [
                (array.head_segment_sym, Opcode::LdArrayHeadSegment),
                (array.head_segment_length_sym, Opcode::LdArrayHeadSegmentLength),
                (array.length_sym, Opcode::LdArrayLength),
            ];
            for (sym, opcode) in loads {
                let Some(sym) = sym.filter(|s| created.test(*s)) else {
                    continue;
                };
                for &pred in preds {
                    let ty = func.syms.ty(sym);
                    let load = Instr::new(opcode)
                        .with_dst(Opnd::Reg(RegOpnd::new(sym, ty).jit_optimized()))
                        .with_src1(Opnd::reg(array_sym));
                    func.graph.push_instr(pred, load);
                    self.summary.compensation_loads += 1;
                }
                trace!(target: "raya_globopt::arrays", block = %block, array = %array_sym, sym = %sym, "compensation");
            }
        }
    }

    /// Box syms the merged block needs as var but a predecessor left specialized
    fn convert_at_pred_tails(&mut self, func: &mut Func, preds: &[BlockId], data: &BlockData) {
        for &pred in preds {
            let Some(pred_data) = func.graph.block(pred).data.as_ref() else {
                continue;
            };
            let needs_box: Vec<SymId> = data
                .live_var_syms
                .difference(&pred_data.live_var_syms)
                .intersection(&pred_data.live_int32_syms)
                .iter()
                .collect();
            for var in needs_box {
                let Some(int_sym) = func.syms.int32_equiv(var) else {
                    continue;
                };
                let to_var = Instr::new(Opcode::ToVar)
                    .with_dst(Opnd::reg(var))
                    .with_src1(Opnd::Reg(RegOpnd::new(int_sym, IrType::Int32)));
                func.graph.push_instr(pred, to_var);
            }
        }
    }

    /// Bounds a conditional branch proves on the edge into `block`
    fn apply_branch_bounds(&mut self, func: &mut Func, pred: BlockId, block: BlockId) {
        let Terminator::Branch {
            op,
            src1,
            src2: Some(src2),
            then_block,
            else_block,
        } = func.graph.block(pred).terminator.clone()
        else {
            return;
        };
        if then_block == else_block {
            return;
        }
        let op = if block == then_block { op } else { op.negate() };
        let (Some((v1, b1)), Some((v2, b2))) = (self.branch_operand(func, &src1), self.branch_operand(func, &src2))
        else {
            return;
        };
        if let (Some(a), Some(b)) = (&v1, &v2) {
            if a.number() == b.number() {
                return;
            }
        }

        use self::bound_check::{
            update_int_bounds_for_greater_than, update_int_bounds_for_greater_than_or_equal,
            update_int_bounds_for_less_than, update_int_bounds_for_less_than_or_equal,
        };
        type Update = fn(&Value, Option<&Value>, IntConstantBounds, i32) -> Option<ValueInfo>;
        let (left, right): (Update, Update) = match op {
            BranchOp::Lt => (update_int_bounds_for_less_than, update_int_bounds_for_greater_than),
            BranchOp::Le => (
                update_int_bounds_for_less_than_or_equal,
                update_int_bounds_for_greater_than_or_equal,
            ),
            BranchOp::Gt => (update_int_bounds_for_greater_than, update_int_bounds_for_less_than),
            BranchOp::Ge => (
                update_int_bounds_for_greater_than_or_equal,
                update_int_bounds_for_less_than_or_equal,
            ),
            BranchOp::Eq | BranchOp::Ne | BranchOp::True => return,
        };

        let new_left = v1.as_ref().and_then(|v| left(v, v2.as_ref(), b2, 0).map(|i| (v.number(), i)));
        let new_right = v2.as_ref().and_then(|v| right(v, v1.as_ref(), b1, 0).map(|i| (v.number(), i)));
        for (vn, info) in [new_left, new_right].into_iter().flatten() {
            trace!(target: "raya_globopt::bounds", block = %block, vn = %vn, info = %info, "branch bound");
            self.current.change_value_info(vn, Rc::new(info));
        }
    }

    fn branch_operand(&mut self, func: &Func, opnd: &Opnd) -> Option<(Option<Value>, IntConstantBounds)> {
        match opnd {
            Opnd::IntConst(c) => Some((None, IntConstantBounds::constant(*c))),
            Opnd::Reg(reg) => {
                let value = self.value_of(func, reg.sym)?;
                let bounds = value.info().try_get_int_constant_bounds(true)?;
                Some((Some(value), bounds))
            }
            _ => None,
        }
    }

    fn optimize_terminator(&mut self, func: &mut Func, block: BlockId) {
        let mut terminator = func.graph.block(block).terminator.clone();
        match &mut terminator {
            Terminator::Branch { op, src1, src2, .. } => {
                let int_compare = !matches!(op, BranchOp::True)
                    && [Some(&*src1), src2.as_ref()]
                        .into_iter()
                        .flatten()
                        .all(|o| self.is_int32_available(func, o));
                if int_compare {
                    self.use_int32(func, src1);
                    if let Some(src2) = src2.as_mut() {
                        self.use_int32(func, src2);
                    }
                } else {
                    self.ensure_var_opnd(func, src1);
                    if let Some(src2) = src2.as_mut() {
                        self.ensure_var_opnd(func, src2);
                    }
                }
            }
            Terminator::Return(Some(opnd)) => self.ensure_var_opnd(func, opnd),
            _ => {}
        }
        if self.mode == Mode::Real {
            func.graph.block_mut(block).terminator = terminator;
        }
        self.current_instrs.append(&mut self.pending_before);
    }

    /// Representations a loop header expects, produced at a back-edge tail
    fn convert_for_back_edges(&mut self, func: &mut Func, block: BlockId) {
        let headers: Vec<LoopId> = func
            .graph
            .loops()
            .iter()
            .filter(|l| l.back_edges.contains(&block))
            .map(|l| l.id)
            .collect();
        for loop_id in headers {
            let Some(expected) = func.graph.loop_(loop_id).header_liveness.clone() else {
                continue;
            };
            for var in expected.int32.difference(&self.current.live_int32_syms).iter() {
                if !self.current.live_var_syms.test(var) {
                    continue;
                }
                let int_sym = func.syms.ensure_int32_equiv(var);
                let conv = Instr::new(Opcode::FromVar)
                    .with_dst(Opnd::Reg(RegOpnd::new(int_sym, IrType::Int32)))
                    .with_src1(Opnd::reg(var));
                self.emit_before_with_bail(func, conv, BailOutKind::INT_ONLY);
                self.current.make_live(int_sym, false, &func.syms);
            }
            let to_box = expected
                .var
                .difference(&self.current.live_var_syms)
                .intersection(&self.current.live_int32_syms);
            for var in to_box.iter() {
                self.box_int32(func, var);
            }
        }
    }

    // ---------------------------------------------------------------
    // Instructions
    // ---------------------------------------------------------------

    fn optimize_instr(&mut self, func: &mut Func, instr: &mut Instr) {
        self.current_offset = instr.byte_code_offset;
        if self.mode == Mode::Prepass {
            self.track_uses_before_defs(func, instr);
        }
        self.copy_prop_srcs(func, instr);

        match instr.opcode {
            Opcode::Yield => self.current.kill_state_for_generator_yield(),
            Opcode::ArgOut => {
                if let Some(sym) = instr.src1.as_ref().and_then(Opnd::sym) {
                    self.current.call_sequence.push(func.syms.var_equiv(sym));
                }
            }
            Opcode::Call | Opcode::NewScObject => {
                let outstanding = self.current.call_sequence.len();
                let argc = instr
                    .src2
                    .as_ref()
                    .and_then(Opnd::int_const)
                    .map_or(outstanding, |c| (c.max(0) as usize).min(outstanding));
                self.current.call_sequence.truncate(outstanding - argc);
                func.tree.set_has_calls_on_self_and_parents(self.current_func);
            }
            Opcode::InlineeStart => {
                if let Some(inlinee) = instr.inlinee {
                    self.current_func = inlinee;
                }
            }
            Opcode::InlineeEnd => {
                if let Some(inlinee) = instr.inlinee {
                    self.current_func = func.tree.parent_of(inlinee).unwrap_or(FuncId::TOP);
                }
            }
            Opcode::LdHeapArguments => {
                func.tree.set_has_unoptimized_arguments_access(self.current_func, true);
            }
            _ => {}
        }
        if instr.has_implicit_calls() {
            func.tree.set_has_implicit_calls_on_self_and_parents(self.current_func);
        }

        if arrays::is_array_access(instr.opcode) {
            self.opt_array_src(func, instr);
        }
        let field_value = self.opt_field_load(func, instr);
        if instr.opcode.is_fast_field_op() {
            self.opt_obj_type_spec(func, instr);
        }

        self.process_array_kills(func, instr);
        self.process_field_kills(func, instr);
        self.value_number_instr(func, instr, field_value);

        if self.mode == Mode::Prepass {
            self.track_induction_def(func, instr);
            if let Some(dst) = instr.dst_sym().filter(|d| !func.syms.is_property(*d)) {
                let var = func.syms.var_equiv(dst);
                for loop_id in self.prepass_loops(func) {
                    self.prepass_defined.entry(loop_id).or_default().set(var);
                }
            }
        }
    }

    /// Prepass: note syms read before the loop body redefines them
    fn track_uses_before_defs(&mut self, func: &mut Func, instr: &Instr) {
        let loops = self.prepass_loops(func);
        if loops.is_empty() {
            return;
        }
        for sym in instr.src_syms() {
            let var = func.syms.var_equiv(sym);
            if func.syms.is_property(var) {
                continue;
            }
            let ty = self.value_of(func, var).map(|v| v.ty());
            for &loop_id in &loops {
                if self.prepass_defined.get(&loop_id).is_some_and(|d| d.test(var)) {
                    continue;
                }
                let lp = func.graph.loop_mut(loop_id);
                lp.syms_used_before_defined.set(var);
                if ty.is_some_and(|t| t.is_likely_int()) {
                    lp.likely_int_syms_used_before_defined.set(var);
                }
                if ty.is_some_and(|t| t.is_likely_number()) {
                    lp.likely_number_syms_used_before_defined.set(var);
                }
            }
        }
    }

    fn safe_to_copy_prop_in_prepass(&self, func: &Func, sym: SymId) -> bool {
        let var = func.syms.var_equiv(sym);
        !self
            .prepass_loops(func)
            .into_iter()
            .any(|l| func.graph.loop_(l).syms_def_in_loop.test(var))
    }

    fn copy_prop_srcs(&mut self, func: &mut Func, instr: &mut Instr) {
        let const_prop = matches!(instr.opcode, Opcode::Ld | Opcode::Add | Opcode::Sub | Opcode::Mul);
        for opnd in [instr.src1.as_mut(), instr.src2.as_mut()].into_iter().flatten() {
            self.copy_prop_opnd(func, opnd, const_prop);
        }
        for opnd in [instr.dst.as_mut(), instr.src1.as_mut()].into_iter().flatten() {
            if let Opnd::Indir(indir) = opnd {
                self.copy_prop_reg(func, &mut indir.base);
                if let Some(index) = indir.index.as_mut().filter(|i| i.ty.is_var()) {
                    self.copy_prop_reg(func, index);
                }
            }
        }
    }

    fn copy_prop_opnd(&mut self, func: &mut Func, opnd: &mut Opnd, const_prop: bool) {
        let Opnd::Reg(reg) = opnd else {
            return;
        };
        if !reg.ty.is_var() {
            return;
        }
        if const_prop {
            if let Some(c) = self.value_of(func, reg.sym).and_then(|v| v.info().try_get_int_constant_value(false)) {
                *opnd = Opnd::IntConst(c);
                return;
            }
        }
        self.copy_prop_reg(func, reg);
    }

    fn copy_prop_reg(&mut self, func: &Func, reg: &mut RegOpnd) {
        let Some(value) = self.value_of(func, reg.sym) else {
            return;
        };
        let Some(copy) = self.current.get_copy_prop_sym(reg.sym, &value, &func.syms, &func.constants) else {
            return;
        };
        if self.mode == Mode::Prepass && !self.safe_to_copy_prop_in_prepass(func, copy) {
            return;
        }
        trace!(target: "raya_globopt::globopt", from = %reg.sym, to = %copy, "copy prop");
        reg.sym = copy;
    }

    fn process_array_kills(&mut self, func: &mut Func, instr: &Instr) {
        let base_sym = array_base_opnd(instr).and_then(|opnd| match opnd {
            Opnd::Indir(indir) => Some(indir.base.sym),
            other => other.sym(),
        });
        let base_type = base_sym.and_then(|s| self.value_of(func, s)).map(|v| v.ty());
        let stored_type = stored_value_opnd(instr).and_then(|opnd| match opnd {
            Opnd::IntConst(_) => Some(ValueType::INT),
            other => other.sym().and_then(|s| self.value_of(func, s)).map(|v| v.ty()),
        });
        let kills = check_js_array_kills(instr, base_type, stored_type);
        if kills.is_empty() {
            return;
        }
        apply_js_array_kills(&mut self.current, kills);
        match self.mode {
            Mode::Prepass => {
                for loop_id in self.prepass_loops(func) {
                    let lp = func.graph.loop_mut(loop_id);
                    lp.js_array_kills = lp.js_array_kills.merge(&kills);
                }
            }
            Mode::Real => {
                for loop_id in func.graph.loop_chain(self.current_block) {
                    let lp = func.graph.loop_mut(loop_id);
                    lp.real_pass_js_array_kills = lp.real_pass_js_array_kills.merge(&kills);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Value numbering
    // ---------------------------------------------------------------

    fn value_number_instr(&mut self, func: &mut Func, instr: &mut Instr, field_value: Option<Value>) {
        match instr.opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul => {
                self.value_number_arith(func, instr);
                return;
            }
            _ => self.ensure_var_srcs(func, instr),
        }

        let Some(dst) = instr.dst_reg().map(|r| r.sym) else {
            if instr.opcode.is_field_store() {
                self.record_field_store(func, instr);
            }
            return;
        };

        let value = match instr.opcode {
            Opcode::Ld => self.value_number_ld(func, instr),
            Opcode::FromVar | Opcode::ToVar | Opcode::ConvPrim => instr
                .src1
                .as_ref()
                .and_then(Opnd::sym)
                .and_then(|s| self.value_of(func, s))
                .unwrap_or_else(|| self.new_value(ValueType::UNINITIALIZED)),
            Opcode::NewScArray => {
                let no_missing = instr.src1.as_ref().is_none_or(|s| s.int_const() == Some(0));
                self.new_value(ValueType::array(ObjectKind::Array, no_missing))
            }
            Opcode::IsIn => self.new_value(ValueType::BOOLEAN),
            Opcode::LdLen => self.new_value(ValueType::INT.to_likely()),
            Opcode::LdHeapArguments => self.new_value(ValueType::likely_object(ObjectKind::Object)),
            Opcode::NewScObject => self.new_value(ValueType::object(ObjectKind::Object)),
            Opcode::LdFld | Opcode::LdMethodFld | Opcode::LdSlot => {
                field_value.unwrap_or_else(|| self.new_value(ValueType::UNINITIALIZED))
            }
            _ => self.new_value(ValueType::UNINITIALIZED),
        };
        let value = self.def_reg(func, dst, value);

        match instr.opcode {
            Opcode::Ld => {
                if let Some(src) = instr.src1.as_ref().and_then(Opnd::as_reg) {
                    self.transfer_object_type(func, src.sym, dst);
                }
                if let (Some(Opnd::IntConst(c)), true) = (&instr.src1, func.syms.ty(dst).is_var()) {
                    self.also_def_int32(func, dst, *c);
                }
            }
            Opcode::LdHeapArguments => {
                self.current.arg_obj_syms.set(func.syms.var_equiv(dst));
            }
            Opcode::NewScObject => self.opt_new_sc_object(func, instr),
            Opcode::LdFld | Opcode::LdMethodFld | Opcode::LdSlot => {
                if let Some(prop) = instr.src1.as_ref().and_then(Opnd::sym) {
                    self.record_field_value(func, prop, value);
                }
            }
            _ => {}
        }
    }

    fn value_number_ld(&mut self, func: &mut Func, instr: &Instr) -> Value {
        match &instr.src1 {
            Some(Opnd::IntConst(c)) => self.int_constant_value(*c),
            Some(Opnd::FloatConst(f)) => Value::new(self.value_numbers.next(), ValueInfo::new_float_constant(*f)),
            Some(Opnd::BoolConst(b)) => Value::new(
                self.value_numbers.next(),
                ValueInfo::new_var_constant(VarConstant::Bool(*b)),
            ),
            Some(Opnd::Reg(reg)) => self
                .value_of(func, reg.sym)
                .unwrap_or_else(|| self.new_value(ValueType::UNINITIALIZED)),
            _ => self.new_value(ValueType::UNINITIALIZED),
        }
    }

    /// A var constant also gets its int32 equivalent, so int uses need no conversion
    fn also_def_int32(&mut self, func: &mut Func, var: SymId, c: i32) {
        let int_sym = func.syms.ensure_int32_equiv(var);
        if self.mode == Mode::Real {
            let ld = Instr::ld(Opnd::Reg(RegOpnd::new(int_sym, IrType::Int32)), Opnd::IntConst(c))
                .at_offset(self.current_offset);
            let ld = func.graph.stamp(ld);
            self.pending_after.push(ld);
        }
        self.current.make_live(int_sym, false, &func.syms);
    }

    /// `Add`/`Sub`/`Mul`, int-specialized when both sources are likely ints
    fn value_number_arith(&mut self, func: &mut Func, instr: &mut Instr) {
        let v1 = instr.src1.clone().and_then(|o| self.opnd_value(func, &o));
        let v2 = instr.src2.clone().and_then(|o| self.opnd_value(func, &o));
        let likely_int = |v: &Option<Value>| v.as_ref().is_some_and(|v| v.ty().is_likely_int());
        let definite_int = |v: &Option<Value>| v.as_ref().is_some_and(|v| v.ty().is_int());
        let aggressive = !func.is_aggressive_int_type_spec_disabled().unwrap_or(true);
        let int_spec = likely_int(&v1) && likely_int(&v2) && (aggressive || (definite_int(&v1) && definite_int(&v2)));

        let Some(dst) = instr.dst_reg().map(|r| r.sym) else {
            return;
        };
        if !int_spec {
            self.ensure_var_srcs(func, instr);
            let ty = match (&v1, &v2) {
                (Some(a), Some(b)) if a.ty().is_likely_number() && b.ty().is_likely_number() => {
                    ValueType::NUMBER.to_likely()
                }
                _ => ValueType::UNINITIALIZED,
            };
            let value = self.new_value(ty);
            self.def_reg(func, dst, value);
            return;
        }

        if let Some(src1) = instr.src1.as_mut() {
            self.use_int32(func, src1);
        }
        if let Some(src2) = instr.src2.as_mut() {
            self.use_int32(func, src2);
        }
        let v1 = instr.src1.clone().and_then(|o| self.opnd_value(func, &o));
        let v2 = instr.src2.clone().and_then(|o| self.opnd_value(func, &o));
        let (Some(v1), Some(v2)) = (v1, v2) else {
            return;
        };
        let b1 = v1.info().try_get_int_constant_bounds(false).unwrap_or(IntConstantBounds::FULL);
        let b2 = v2.info().try_get_int_constant_bounds(false).unwrap_or(IntConstantBounds::FULL);

        let info = match int_result_range(instr.opcode, b1, b2) {
            Some((lo, hi)) => {
                let offset = match (instr.opcode, b2.is_constant()) {
                    (Opcode::Add, true) => Some(b2.lower_bound()),
                    (Opcode::Sub, true) => b2.lower_bound().checked_neg(),
                    _ => None,
                };
                match offset {
                    Some(offset) if !b1.is_constant() => {
                        let mut bounds = IntBounds::new(IntConstantBounds::new(lo, hi));
                        bounds.set_lower_bound(v1.number(), offset);
                        bounds.set_upper_bound(v1.number(), offset);
                        ValueInfo::new_int_bounded(ValueType::INT, bounds)
                    }
                    _ => ValueInfo::new_int_range(lo, hi),
                }
            }
            None => {
                self.generate_bail_at_operation(func, instr, BailOutKind::ON_OVERFLOW);
                ValueInfo::new_generic(ValueType::INT)
            }
        };

        let int_dst = func.syms.ensure_int32_equiv(dst);
        if self.mode == Mode::Real {
            instr.dst = Some(Opnd::Reg(RegOpnd::new(int_dst, IrType::Int32)));
        }
        let value = match info.try_get_int_constant_value(false) {
            Some(c) => self.int_constant_value(c),
            None => Value::new(self.value_numbers.next(), info),
        };
        self.def_reg(func, int_dst, value);
    }

    /// Give a register destination its new value and representation
    fn def_reg(&mut self, func: &mut Func, dst: SymId, value: Value) -> Value {
        let var = func.syms.var_equiv(dst);
        self.kill_live_fields_for_stack_sym(func, var);
        self.current.arg_obj_syms.clear(var);
        self.current.live_var_syms.clear(var);
        self.current.live_int32_syms.clear(var);
        self.current.live_lossy_int32_syms.clear(var);
        self.current.live_float64_syms.clear(var);
        self.current.live_simd128_syms.clear(var);
        self.current.make_live(dst, false, &func.syms);
        self.current.set_value(value, var, &func.syms, &mut func.constants)
    }

    // ---------------------------------------------------------------
    // Representations
    // ---------------------------------------------------------------

    fn is_int32_available(&self, func: &Func, opnd: &Opnd) -> bool {
        match opnd {
            Opnd::IntConst(_) => true,
            Opnd::Reg(reg) => {
                !reg.ty.is_var() && reg.ty.is_int32()
                    || self.current.is_int32_type_specialized(reg.sym, &func.syms)
                        && !self.current.live_lossy_int32_syms.test(func.syms.var_equiv(reg.sym))
            }
            _ => false,
        }
    }

    /// Rewrite a source to its int32 form, converting when needed
    pub(crate) fn use_int32(&mut self, func: &mut Func, opnd: &mut Opnd) {
        let Opnd::Reg(reg) = opnd else {
            return;
        };
        if reg.ty.is_int32() {
            return;
        }
        let var = func.syms.var_equiv(reg.sym);
        let int_sym = func.syms.ensure_int32_equiv(var);
        let lossless = self.current.live_int32_syms.test(var) && !self.current.live_lossy_int32_syms.test(var);
        if !lossless {
            let value = self.value_of(func, var);
            let conv = Instr::new(Opcode::FromVar)
                .with_dst(Opnd::Reg(RegOpnd::new(int_sym, IrType::Int32)))
                .with_src1(Opnd::reg(var));
            if value.as_ref().is_some_and(|v| v.ty().is_int()) {
                self.emit_before(func, conv);
            } else {
                self.emit_before_with_bail(func, conv, BailOutKind::INT_ONLY);
            }
            self.current.make_live(int_sym, false, &func.syms);
            if let Some(value) = value.filter(|v| !v.ty().is_int()) {
                let specialized = value.info().specialize_to_int32();
                self.current.change_value_info(value.number(), Rc::new(specialized));
            }
        }
        if self.mode == Mode::Real {
            *opnd = Opnd::Reg(RegOpnd::new(int_sym, IrType::Int32).with_value_type(ValueType::INT));
        }
    }

    fn ensure_var_srcs(&mut self, func: &mut Func, instr: &mut Instr) {
        for opnd in [instr.src1.as_mut(), instr.src2.as_mut()].into_iter().flatten() {
            self.ensure_var_opnd(func, opnd);
        }
        for opnd in [instr.dst.as_mut(), instr.src1.as_mut()].into_iter().flatten() {
            if let Opnd::Indir(indir) = opnd {
                let base = indir.base.sym;
                self.ensure_var(func, base);
            }
        }
    }

    fn ensure_var_opnd(&mut self, func: &mut Func, opnd: &mut Opnd) {
        if let Opnd::Reg(reg) = opnd {
            if reg.ty.is_var() {
                self.ensure_var(func, reg.sym);
            }
        }
    }

    /// Box a sym that is only live as int32 before a var use
    fn ensure_var(&mut self, func: &mut Func, sym: SymId) {
        let var = func.syms.var_equiv(sym);
        if self.current.live_var_syms.test(var) || !self.current.live_int32_syms.test(var) {
            return;
        }
        self.box_int32(func, var);
    }

    fn box_int32(&mut self, func: &mut Func, var: SymId) {
        let Some(int_sym) = func.syms.int32_equiv(var) else {
            return;
        };
        let to_var = Instr::new(Opcode::ToVar)
            .with_dst(Opnd::reg(var))
            .with_src1(Opnd::Reg(RegOpnd::new(int_sym, IrType::Int32)));
        self.emit_before(func, to_var);
        self.current.live_var_syms.set(var);
    }

    // ---------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------

    pub(crate) fn value_of(&self, func: &Func, sym: SymId) -> Option<Value> {
        self.current.find_value(sym, &func.syms, &func.constants)
    }

    pub(crate) fn opnd_value(&mut self, func: &Func, opnd: &Opnd) -> Option<Value> {
        match opnd {
            Opnd::IntConst(c) => Some(self.int_constant_value(*c)),
            Opnd::Reg(reg) => self.value_of(func, reg.sym),
            Opnd::Prop(prop) => self.value_of(func, prop.sym),
            _ => None,
        }
    }

    pub(crate) fn new_value(&mut self, ty: ValueType) -> Value {
        Value::new(self.value_numbers.next(), ValueInfo::new_generic(ty))
    }

    /// Every int constant `c` shares one value number
    pub(crate) fn int_constant_value(&mut self, c: i32) -> Value {
        let vn = if c == 0 {
            ZERO_VALUE_NUMBER
        } else {
            match self.int_constant_values.get(&c) {
                Some(vn) => *vn,
                None => {
                    let vn = self.value_numbers.next();
                    self.int_constant_values.insert(c, vn);
                    vn
                }
            }
        };
        Value::new(vn, ValueInfo::new_int_constant(c))
    }

    // ---------------------------------------------------------------
    // Loops and landing pads
    // ---------------------------------------------------------------

    /// Loops whose prepass is running over the current block, innermost first
    pub(crate) fn prepass_loops(&self, func: &Func) -> Vec<LoopId> {
        let Some(root) = self.prepass_root.filter(|_| self.mode == Mode::Prepass) else {
            return Vec::new();
        };
        func.graph
            .loop_chain(self.current_block)
            .into_iter()
            .filter(|l| func.graph.is_loop_nested_in(*l, root))
            .collect()
    }

    /// Whether `sym` holds `value` on entry to the loop and keeps it throughout
    pub(crate) fn opt_is_invariant(&self, func: &Func, sym: SymId, loop_id: LoopId, value: &Value) -> bool {
        let var = func.syms.var_equiv(sym);
        let lp = func.graph.loop_(loop_id);
        if lp.syms_def_in_loop.test(var) {
            return false;
        }
        let Some(pad) = func.graph.block(lp.landing_pad).data.as_ref() else {
            return false;
        };
        pad.find_value(var, &func.syms, &func.constants)
            .is_some_and(|v| v.number() == value.number())
    }

    /// Int value of `sym` at the end of the landing pad
    pub(crate) fn landing_pad_int_value(&self, func: &Func, loop_id: LoopId, sym: SymId) -> Option<Value> {
        let pad = func.graph.loop_(loop_id).landing_pad;
        let data = func.graph.block(pad).data.as_ref()?;
        data.find_value(sym, &func.syms, &func.constants)
            .filter(|v| v.ty().is_likely_int())
    }

    /// Int32 operand for `sym` usable in the landing pad, converting there when needed
    pub(crate) fn int_opnd_in_landing_pad(&mut self, func: &mut Func, loop_id: LoopId, sym: SymId) -> Option<Opnd> {
        let value = self.landing_pad_int_value(func, loop_id, sym)?;
        if let Some(c) = value.info().try_get_int_constant_value(false) {
            return Some(Opnd::IntConst(c));
        }
        if func.syms.ty(sym).is_int32() && !func.syms.is_type_spec(sym) {
            return Some(Opnd::Reg(RegOpnd::new(sym, IrType::Int32)));
        }

        let var = func.syms.var_equiv(sym);
        let pad = func.graph.loop_(loop_id).landing_pad;
        let (int_live, var_live) = {
            let data = func.graph.block(pad).data.as_ref()?;
            (
                data.live_int32_syms.test(var) && !data.live_lossy_int32_syms.test(var),
                data.live_var_syms.test(var),
            )
        };
        let int_sym = func.syms.ensure_int32_equiv(var);
        if int_live {
            return Some(Opnd::Reg(RegOpnd::new(int_sym, IrType::Int32)));
        }
        if !var_live {
            return None;
        }

        let bail_target = self.ensure_bail_target(func, loop_id);
        let mut conv = Instr::new(Opcode::FromVar)
            .with_dst(Opnd::Reg(RegOpnd::new(int_sym, IrType::Int32)))
            .with_src1(Opnd::reg(var));
        conv.bailout = Some(InstrBailOut {
            kind: BailOutKind::INT_ONLY,
            info: bail_target,
        });
        self.insert_instr_in_landing_pad(func, loop_id, conv);
        if let Some(data) = func.graph.block_mut(pad).data.as_mut() {
            data.make_live(int_sym, false, &func.syms);
        }
        Some(Opnd::Reg(RegOpnd::new(int_sym, IrType::Int32)))
    }

    /// Insert at the end of the landing pad, ahead of its bail target
    pub(crate) fn insert_instr_in_landing_pad(&mut self, func: &mut Func, loop_id: LoopId, instr: Instr) -> InstrRef {
        let pad = func.graph.loop_(loop_id).landing_pad;
        let instrs = &func.graph.block(pad).instrs;
        let index = instrs
            .iter()
            .position(|i| i.opcode == Opcode::BailTarget)
            .unwrap_or(instrs.len());
        let offset = func
            .graph
            .block(func.graph.loop_(loop_id).header)
            .instrs
            .first()
            .map_or(self.current_offset, |i| i.byte_code_offset);
        func.graph.insert_instr(pad, index, instr.at_offset(offset))
    }

    pub(crate) fn set_landing_pad_value(&mut self, func: &mut Func, loop_id: LoopId, sym: SymId, value: Value) {
        let pad = func.graph.loop_(loop_id).landing_pad;
        let Func {
            graph, syms, constants, ..
        } = func;
        if let Some(data) = graph.block_mut(pad).data.as_mut() {
            data.set_value(value, sym, syms, constants);
            data.make_live(sym, false, syms);
        }
    }

    /// Make a sym loaded in the landing pad of `hoist_loop` known in every
    /// landing pad between there and the current block
    pub(crate) fn hoist_value_to_blocks(&mut self, func: &mut Func, hoist_loop: LoopId, sym: SymId, value: &Value) {
        for loop_id in func.graph.loop_chain(self.current_block) {
            self.set_landing_pad_value(func, loop_id, sym, value.clone());
            if loop_id == hoist_loop {
                break;
            }
        }
    }

    // ---------------------------------------------------------------
    // Emission
    // ---------------------------------------------------------------

    /// Emit ahead of the instruction being optimized
    pub(crate) fn emit_before(&mut self, func: &mut Func, instr: Instr) -> InstrRef {
        let instr = func.graph.stamp(instr.at_offset(self.current_offset));
        let at = InstrRef {
            block: self.current_block,
            id: instr.id,
        };
        if self.mode == Mode::Real {
            self.pending_before.push(instr);
        }
        at
    }

    /// Emit ahead of the instruction being optimized, with a fresh bailout
    pub(crate) fn emit_before_with_bail(&mut self, func: &mut Func, instr: Instr, kind: BailOutKind) -> InstrRef {
        let mut instr = func.graph.stamp(instr.at_offset(self.current_offset));
        self.generate_bail_at_operation(func, &mut instr, kind);
        let at = InstrRef {
            block: self.current_block,
            id: instr.id,
        };
        if self.mode == Mode::Real {
            self.pending_before.push(instr);
        }
        at
    }

    /// Instruction anywhere in the function, including those not written back yet
    pub(crate) fn find_instr_mut<'a>(&'a mut self, func: &'a mut Func, at: InstrRef) -> Option<&'a mut Instr> {
        if at.block == self.current_block {
            let found = self
                .current_instrs
                .iter_mut()
                .chain(self.pending_before.iter_mut())
                .chain(self.pending_after.iter_mut())
                .find(|i| i.id == at.id);
            if found.is_some() {
                return found;
            }
        }
        func.graph.instr_mut(at)
    }
}

/// Result range of int arithmetic, `None` when it may overflow
fn int_result_range(opcode: Opcode, a: IntConstantBounds, b: IntConstantBounds) -> Option<(i32, i32)> {
    let (al, au) = (a.lower_bound() as i64, a.upper_bound() as i64);
    let (bl, bu) = (b.lower_bound() as i64, b.upper_bound() as i64);
    let (lo, hi) = match opcode {
        Opcode::Add => (al + bl, au + bu),
        Opcode::Sub => (al - bu, au - bl),
        Opcode::Mul => {
            // A zero product with a negative factor is -0, which is not an int
            if (al <= 0 && au >= 0 && bl < 0) || (bl <= 0 && bu >= 0 && al < 0) {
                return None;
            }
            let products = [al * bl, al * bu, au * bl, au * bu];
            let lo = products.iter().copied().min().unwrap_or(0);
            let hi = products.iter().copied().max().unwrap_or(0);
            (lo, hi)
        }
        _ => return None,
    };
    (lo >= i32::MIN as i64 && hi <= i32::MAX as i64).then_some((lo as i32, hi as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_int_result_range() {
        let a = IntConstantBounds::new(0, 10);
        let b = IntConstantBounds::constant(1);
        assert_eq!(int_result_range(Opcode::Add, a, b), Some((1, 11)));
        assert_eq!(int_result_range(Opcode::Sub, a, b), Some((-1, 9)));
        assert_eq!(int_result_range(Opcode::Mul, a, IntConstantBounds::new(2, 3)), Some((0, 30)));
        assert_eq!(int_result_range(Opcode::Add, IntConstantBounds::FULL, b), None);
        assert_eq!(int_result_range(Opcode::Mul, a, IntConstantBounds::new(-1, 1)), None);
    }

    #[test]
    fn test_constants_share_value_numbers() {
        let config = GlobOptConfig::default();
        let mut opt = GlobOpt::new(&config);
        assert_eq!(opt.int_constant_value(0).number(), ZERO_VALUE_NUMBER);
        let a = opt.int_constant_value(7);
        let b = opt.int_constant_value(7);
        assert_eq!(a.number(), b.number());
        assert_ne!(opt.int_constant_value(8).number(), a.number());
    }

    #[test]
    fn test_add_of_constants_is_constant() {
        let config = GlobOptConfig::default();
        let mut func = Func::new_for_test();
        let (a, b, c) = {
            let mut builder = IrBuilder::new(&mut func);
            let a = builder.var(0);
            let b = builder.var(1);
            let c = builder.var(2);
            builder.ld_const(a, 3);
            builder.ld_const(b, 4);
            builder.add(c, a, b);
            builder.ret(Some(Opnd::reg(c)));
            (a, b, c)
        };
        let _ = (a, b);
        let mut opt = GlobOpt::new(&config);
        opt.optimize(&mut func).unwrap();

        let entry = func.graph.entry;
        let data = func.graph.block(entry).data.as_ref().unwrap();
        let value = data.find_value(c, &func.syms, &func.constants).unwrap();
        assert_eq!(value.info().try_get_int_constant_value(false), Some(7));
        assert!(data.is_int32_type_specialized(c, &func.syms));
        assert!(data.live_var_syms.test(c), "returned value is boxed");
    }

    #[test]
    fn test_possible_overflow_bails() {
        let config = GlobOptConfig::default();
        let mut func = Func::new_for_test();
        let p = {
            let mut builder = IrBuilder::new(&mut func);
            let p = builder.var(0);
            let r = builder.var(1);
            builder.add_const(r, p, 1);
            builder.ret(Some(Opnd::reg(r)));
            p
        };
        func.set_param_value_type(p, ValueType::INT);
        let mut opt = GlobOpt::new(&config);
        opt.optimize(&mut func).unwrap();

        let add = func
            .graph
            .block(func.graph.entry)
            .instrs
            .iter()
            .find(|i| i.opcode == Opcode::Add)
            .unwrap();
        assert!(add.bailout_kind().contains(BailOutKind::ON_OVERFLOW));
        assert!(func.has_bailout());
    }

    #[test]
    fn test_branch_bounds_narrow_both_edges() {
        let config = GlobOptConfig::default();
        let mut func = Func::new_for_test();
        let (i, then_block, else_block) = {
            let mut builder = IrBuilder::new(&mut func);
            let i = builder.var(0);
            let then_block = builder.create_block();
            let else_block = builder.create_block();
            builder.branch(BranchOp::Lt, Opnd::reg(i), Some(Opnd::IntConst(10)), then_block, else_block);
            builder.switch_to_block(then_block);
            builder.ret(None);
            builder.switch_to_block(else_block);
            builder.ret(None);
            (i, then_block, else_block)
        };
        func.set_param_value_type(i, ValueType::INT);
        let mut opt = GlobOpt::new(&config);
        opt.optimize(&mut func).unwrap();

        let upper = |block: BlockId| {
            let data = func.graph.block(block).data.as_ref().unwrap();
            data.find_value(i, &func.syms, &func.constants)
                .unwrap()
                .info()
                .try_get_int_constant_bounds(false)
                .unwrap()
        };
        assert_eq!(upper(then_block).upper_bound(), 9);
        assert_eq!(upper(else_block).lower_bound(), 10);
    }

    #[test]
    fn test_diamond_compensates_each_arm_once() {
        let config = GlobOptConfig::default();
        let mut func = Func::new_for_test();
        let (arr, c, left, right, join) = {
            let mut builder = IrBuilder::new(&mut func);
            let (arr, c, n, m, k) = (builder.var(0), builder.var(1), builder.var(2), builder.var(3), builder.var(4));
            let left = builder.create_block();
            let right = builder.create_block();
            let join = builder.create_block();
            builder.branch(BranchOp::Lt, Opnd::reg(c), Some(Opnd::IntConst(0)), left, right);
            builder.switch_to_block(left);
            builder.ld_len(n, arr);
            builder.jump(join);
            builder.switch_to_block(right);
            builder.ld_len(m, arr);
            builder.jump(join);
            builder.switch_to_block(join);
            builder.ld_len(k, arr);
            builder.ret(Some(Opnd::reg(k)));
            (arr, c, left, right, join)
        };
        func.set_param_value_type(arr, ValueType::array(ObjectKind::Array, true));
        func.set_param_value_type(c, ValueType::INT);
        let mut opt = GlobOpt::new(&config);
        let summary = opt.optimize(&mut func).unwrap();

        let count = |block: BlockId, opcode: Opcode| {
            func.graph.block(block).instrs.iter().filter(|i| i.opcode == opcode).count()
        };
        // The arm's own load plus one load of the merged length
        assert_eq!(count(left, Opcode::LdArrayLength), 2);
        assert_eq!(count(right, Opcode::LdArrayLength), 2);
        assert_eq!(count(join, Opcode::LdArrayLength), 0);
        assert_eq!(count(join, Opcode::LdLen), 0);
        assert_eq!(summary.compensation_loads, 2);

        let tail_dst = |block: BlockId| {
            let instrs = &func.graph.block(block).instrs;
            instrs.iter().rev().find(|i| i.opcode == Opcode::LdArrayLength).and_then(|i| i.dst_sym())
        };
        assert_eq!(tail_dst(left), tail_dst(right));
        let merged = func.graph.block(join).data.as_ref().unwrap();
        let length = merged
            .find_value(arr, &func.syms, &func.constants)
            .and_then(|v| v.info().as_array().copied())
            .and_then(|a| a.length_sym);
        assert_eq!(length, tail_dst(left));
    }

    #[test]
    fn test_disabled_policy_skips_function() {
        let config = GlobOptConfig::disabled();
        let mut func = Func::new_for_test();
        IrBuilder::new(&mut func).ret(None);
        let mut opt = GlobOpt::new(&config);
        assert_eq!(opt.optimize(&mut func).unwrap(), GlobOptSummary::default());
        assert!(!func.graph.is_finalized());
    }
}
