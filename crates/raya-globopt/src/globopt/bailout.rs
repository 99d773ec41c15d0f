//! Bailouts
//!
//! A bailout records what the interpreter needs to resume at a bytecode
//! offset when a speculative check fails. The record is built from the
//! block state at the bailing instruction: which bytecode-visible syms are
//! live and in which representation, plus the values the continuation can
//! not recompute on its own (constants and copy-propagated syms).

use std::rc::Rc;

use bitflags::bitflags;
use tracing::trace;

use super::block_data::BlockData;
use crate::analysis::flow_graph::{BlockId, LoopId};
use crate::func::tables::ConstantTable;
use crate::func::Func;
use crate::ir::bitset::SymSet;
use crate::ir::instr::{Instr, InstrId, Opcode};
use crate::ir::sym::{SymId, SymTable};
use crate::value::{ValueInfoKind, VarConstant};

bitflags! {
    /// Why an instruction may bail out
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BailOutKind: u32 {
        const ON_NOT_ARRAY = 1 << 0;
        const ON_NOT_NATIVE_ARRAY = 1 << 1;
        const ON_IRREGULAR_LENGTH = 1 << 2;
        const ON_FAILED_HOISTED_BOUND_CHECK = 1 << 3;
        const ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK = 1 << 4;
        const ON_ARRAY_ACCESS_HELPER_CALL = 1 << 5;
        const ON_IMPLICIT_CALLS_PRE_OP = 1 << 6;
        const ON_OVERFLOW = 1 << 7;
        const INT_ONLY = 1 << 8;
        const FAILED_TYPE_CHECK = 1 << 9;
        const FAILED_EQUIVALENT_TYPE_CHECK = 1 << 10;
        const FAILED_FIXED_FIELD_TYPE_CHECK = 1 << 11;
        const MARK_TEMP_OBJECT = 1 << 12;
        const FAILED_CTOR_GUARD_CHECK = 1 << 13;
        const ON_NO_PROFILE = 1 << 14;
    }
}

impl BailOutKind {
    /// Kinds produced by type-check sequencing
    pub const TYPE_CHECK_KINDS: BailOutKind = BailOutKind::FAILED_TYPE_CHECK
        .union(BailOutKind::FAILED_EQUIVALENT_TYPE_CHECK)
        .union(BailOutKind::FAILED_FIXED_FIELD_TYPE_CHECK);

    pub fn is_type_check(&self) -> bool {
        self.intersects(BailOutKind::TYPE_CHECK_KINDS)
    }
}

/// Index of a bailout record in the function's table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BailOutId(pub u32);

impl std::fmt::Display for BailOutId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bailout{}", self.0)
    }
}

/// Bailout attached to an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrBailOut {
    pub kind: BailOutKind,
    pub info: BailOutId,
}

/// Constant a captured sym holds
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CapturedConstant {
    Int(i32),
    Float(f64),
    Var(VarConstant),
}

/// Values the continuation cannot recompute
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedValues {
    pub constant_values: Vec<(SymId, CapturedConstant)>,
    /// `(sym, copy)`: `sym` is held by `copy`
    pub copy_prop_syms: Vec<(SymId, SymId)>,
}

impl CapturedValues {
    pub fn is_empty(&self) -> bool {
        self.constant_values.is_empty() && self.copy_prop_syms.is_empty()
    }

    pub fn captures(&self, sym: SymId) -> bool {
        self.constant_values.iter().any(|(s, _)| *s == sym)
            || self.copy_prop_syms.iter().any(|(s, _)| *s == sym)
    }

    /// Keep entries present and equal on both sides
    pub fn intersect(&self, other: &CapturedValues) -> CapturedValues {
        CapturedValues {
            constant_values: self
                .constant_values
                .iter()
                .filter(|entry| other.constant_values.contains(entry))
                .copied()
                .collect(),
            copy_prop_syms: self
                .copy_prop_syms
                .iter()
                .filter(|entry| other.copy_prop_syms.contains(entry))
                .copied()
                .collect(),
        }
    }
}

/// Snapshot of the state a bailout restores
#[derive(Debug, Clone)]
pub struct BailOutInfo {
    pub id: BailOutId,
    pub byte_code_offset: u32,
    pub block: BlockId,
    pub captured: Rc<CapturedValues>,
    pub live_var_syms: SymSet,
    /// Int32-live syms whose int value is the exact var value
    pub live_int32_syms: SymSet,
    pub live_float64_syms: SymSet,
    /// Instruction that owns the record
    pub owner: Option<InstrId>,
    /// Number of instructions besides the owner using the record
    pub shared_count: u32,
}

impl BailOutInfo {
    /// Whether a bailout here restores `sym`
    pub fn restores(&self, sym: SymId) -> bool {
        self.live_var_syms.test(sym)
            || self.live_int32_syms.test(sym)
            || self.live_float64_syms.test(sym)
            || self.captured.captures(sym)
    }
}

/// All bailout records of one function
#[derive(Debug, Default)]
pub struct BailOutTable {
    infos: Vec<BailOutInfo>,
}

impl BailOutTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn get(&self, id: BailOutId) -> Option<&BailOutInfo> {
        self.infos.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: BailOutId) -> Option<&mut BailOutInfo> {
        self.infos.get_mut(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BailOutInfo> {
        self.infos.iter()
    }

    /// Record a bailout snapshot of `data`
    pub fn capture(
        &mut self,
        block: BlockId,
        byte_code_offset: u32,
        data: &mut BlockData,
        syms: &SymTable,
        constants: &ConstantTable,
    ) -> BailOutId {
        let id = BailOutId(self.infos.len() as u32);
        let captured = capture_values(data, syms, constants);
        let bytecode_visible = |set: &SymSet| -> SymSet {
            set.iter().filter(|s| syms.has_byte_code_reg_slot(*s)).collect()
        };
        let lossless_int32 = data.live_int32_syms.difference(&data.live_lossy_int32_syms);
        self.infos.push(BailOutInfo {
            id,
            byte_code_offset,
            block,
            captured,
            live_var_syms: bytecode_visible(&data.live_var_syms),
            live_int32_syms: bytecode_visible(&lossless_int32),
            live_float64_syms: bytecode_visible(&data.live_float64_syms),
            owner: None,
            shared_count: 0,
        });
        id
    }

    /// Hand a record over to `new_owner`, which now shares it
    pub fn share(&mut self, id: BailOutId, new_owner: InstrId) {
        if let Some(info) = self.get_mut(id) {
            info.shared_count += 1;
            info.owner = Some(new_owner);
        }
    }
}

/// Values of live bytecode syms the continuation cannot recompute
///
/// Reuses the previous snapshot while no bytecode-visible sym changed.
pub fn capture_values(data: &mut BlockData, syms: &SymTable, constants: &ConstantTable) -> Rc<CapturedValues> {
    if let Some(previous) = &data.captured_values {
        if data.changed_syms.is_empty() {
            return Rc::clone(previous);
        }
    }

    let mut captured = CapturedValues::default();
    let live = data
        .live_var_syms
        .union(&data.live_int32_syms)
        .union(&data.live_float64_syms);
    for sym in live.iter().filter(|s| syms.has_byte_code_reg_slot(*s)) {
        let Some(value) = data.find_value(sym, syms, constants) else {
            continue;
        };
        let constant = match value.info().kind() {
            ValueInfoKind::IntConstant(v) => Some(CapturedConstant::Int(*v)),
            ValueInfoKind::FloatConstant(v) => Some(CapturedConstant::Float(*v)),
            ValueInfoKind::VarConstant(v) => Some(CapturedConstant::Var(*v)),
            _ => None,
        };
        if let Some(constant) = constant {
            captured.constant_values.push((sym, constant));
        } else if let Some(copy) = data.get_copy_prop_sym(sym, &value, syms, constants) {
            captured.copy_prop_syms.push((sym, copy));
        }
    }

    let captured = Rc::new(captured);
    data.captured_values = Some(Rc::clone(&captured));
    data.changed_syms.clear_all();
    captured
}

impl<'c> super::GlobOpt<'c> {
    /// Attach a fresh bailout to `instr` at the current point
    pub(crate) fn generate_bail_at_operation(&mut self, func: &mut Func, instr: &mut Instr, kind: BailOutKind) {
        if self.mode == super::Mode::Prepass {
            return;
        }
        if let Some(existing) = &mut instr.bailout {
            existing.kind |= kind;
            return;
        }
        let id = func.bailouts.capture(
            self.current_block,
            instr.byte_code_offset,
            &mut self.current,
            &func.syms,
            &func.constants,
        );
        if let Some(info) = func.bailouts.get_mut(id) {
            info.owner = instr.id.is_valid().then_some(instr.id);
        }
        instr.bailout = Some(InstrBailOut { kind, info: id });
        func.set_has_bailout();
        trace!(target: "raya_globopt::globopt", instr = %instr.opcode, ?kind, "bailout");
    }

    /// Bailout target in the landing pad of `loop_id`, created on first use
    pub(crate) fn ensure_bail_target(&mut self, func: &mut Func, loop_id: LoopId) -> BailOutId {
        if let Some(id) = func.graph.loop_(loop_id).bail_out_info {
            return id;
        }
        let pad = func.graph.loop_(loop_id).landing_pad;
        let header = func.graph.loop_(loop_id).header;
        let offset = func
            .graph
            .block(header)
            .instrs
            .first()
            .map(|i| i.byte_code_offset)
            .unwrap_or(0);

        let mut pad_data = func.graph.block_mut(pad).data.take().unwrap_or_default();
        let id = func
            .bailouts
            .capture(pad, offset, &mut pad_data, &func.syms, &func.constants);
        func.graph.block_mut(pad).data = Some(pad_data);

        let mut target = Instr::new(Opcode::BailTarget).at_offset(offset);
        target.bailout = Some(InstrBailOut {
            kind: BailOutKind::empty(),
            info: id,
        });
        let at = func.graph.push_instr(pad, target);
        if let Some(info) = func.bailouts.get_mut(id) {
            info.owner = Some(at.id);
        }
        func.graph.loop_mut(loop_id).bail_out_info = Some(id);
        func.set_has_bailout();
        id
    }

    /// Let `to` use the bailout record of `from`
    pub(crate) fn share_bail_out(&mut self, func: &mut Func, from: &InstrBailOut, to: &mut Instr, kind: BailOutKind) {
        func.bailouts.share(from.info, to.id);
        to.bailout = Some(InstrBailOut {
            kind: to.bailout_kind() | kind,
            info: from.info,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::IrType;
    use crate::value::{Value, ValueInfo, ValueNumber, ValueType};

    #[test]
    fn test_capture_records_live_bytecode_syms() {
        let mut syms = SymTable::new();
        let constants = ConstantTable::default();
        let a = syms.new_bytecode_sym(0);
        let b = syms.new_bytecode_sym(1);
        let c = syms.new_bytecode_sym(2);
        let temp = syms.new_stack_sym(IrType::Var);

        let mut data = BlockData::new_empty();
        data.live_var_syms.set(a);
        data.live_var_syms.set(b);
        data.live_int32_syms.set(c);
        data.live_var_syms.set(temp);
        let mut scratch = ConstantTable::default();
        data.set_value(Value::new(ValueNumber(10), ValueInfo::new_int_constant(7)), a, &syms, &mut scratch);
        let shared = Value::new(ValueNumber(11), ValueInfo::new_generic(ValueType::INT));
        let shared = data.set_value(shared, temp, &syms, &mut scratch);
        data.set_value(shared, b, &syms, &mut scratch);

        let mut table = BailOutTable::new();
        let id = table.capture(BlockId(0), 4, &mut data, &syms, &constants);
        let info = table.get(id).unwrap();

        assert!(info.captured.constant_values.contains(&(a, CapturedConstant::Int(7))));
        assert!(info.captured.copy_prop_syms.contains(&(b, temp)));
        for sym in [a, b, c] {
            assert!(info.restores(sym));
        }
        assert!(!info.live_var_syms.test(temp));
        assert!(data.changed_syms.is_empty());
    }

    #[test]
    fn test_capture_reused_while_nothing_changed() {
        let syms = SymTable::new();
        let constants = ConstantTable::default();
        let mut data = BlockData::new_empty();
        let first = capture_values(&mut data, &syms, &constants);
        let second = capture_values(&mut data, &syms, &constants);
        assert!(Rc::ptr_eq(&first, &second));
        data.changed_syms.set(SymId(3));
        let third = capture_values(&mut data, &syms, &constants);
        assert!(!Rc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_share_moves_ownership() {
        let syms = SymTable::new();
        let mut data = BlockData::new_empty();
        let mut table = BailOutTable::new();
        let id = table.capture(BlockId(1), 0, &mut data, &syms, &ConstantTable::default());
        table.share(id, InstrId(9));
        let info = table.get(id).unwrap();
        assert_eq!(info.shared_count, 1);
        assert_eq!(info.owner, Some(InstrId(9)));
    }
}
