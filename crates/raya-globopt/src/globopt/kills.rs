//! Array kills
//!
//! An instruction kills an array fact when it may change what the fact
//! describes: the array's kind (definite array becomes likely), its head
//! segment, the head segment's length, or the array length.

use std::rc::Rc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use super::block_data::BlockData;
use crate::ir::instr::{Instr, Opcode};
use crate::ir::opnd::Opnd;
use crate::value::{Value, ValueInfo, ValueNumber, ValueType};

bitflags! {
    /// Array facts an instruction (or a whole loop) may invalidate
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct JsArrayKills: u8 {
        const KILLS_ALL_ARRAYS = 1 << 0;
        const KILLS_ARRAYS_WITH_NO_MISSING_VALUES = 1 << 1;
        const KILLS_NATIVE_ARRAYS = 1 << 2;
        const KILLS_ARRAY_HEAD_SEGMENTS = 1 << 3;
        const KILLS_ARRAY_HEAD_SEGMENT_LENGTHS = 1 << 4;
        const KILLS_ARRAY_LENGTHS = 1 << 5;
    }
}

impl JsArrayKills {
    /// Whether an array of this type may no longer be the type it was
    ///
    /// Virtual typed arrays have no var elements, so native array kills
    /// apply to them too.
    pub fn kills_value_type(&self, ty: ValueType) -> bool {
        debug_assert!(ty.is_likely_array_or_object_with_array() || ty.is_likely_virtual_typed_array());
        self.contains(JsArrayKills::KILLS_ALL_ARRAYS)
            || (self.contains(JsArrayKills::KILLS_ARRAYS_WITH_NO_MISSING_VALUES) && ty.has_no_missing_values())
            || (self.contains(JsArrayKills::KILLS_NATIVE_ARRAYS) && !ty.has_var_elements())
    }

    pub fn kills_all_arrays(&self) -> bool {
        self.contains(JsArrayKills::KILLS_ALL_ARRAYS)
    }

    pub fn kills_array_head_segments(&self) -> bool {
        self.contains(JsArrayKills::KILLS_ARRAY_HEAD_SEGMENTS)
    }

    pub fn kills_array_head_segment_lengths(&self) -> bool {
        self.contains(JsArrayKills::KILLS_ARRAY_HEAD_SEGMENT_LENGTHS)
    }

    pub fn kills_array_lengths(&self) -> bool {
        self.contains(JsArrayKills::KILLS_ARRAY_LENGTHS)
    }

    /// Typed arrays only lose their length when anything may happen
    pub fn kills_typed_array_head_segment_lengths(&self) -> bool {
        self.kills_all_arrays()
    }

    pub fn are_subset_of(&self, other: &JsArrayKills) -> bool {
        other.contains(*self)
    }

    pub fn merge(&self, other: &JsArrayKills) -> JsArrayKills {
        *self | *other
    }
}

/// Array facts `instr` may invalidate
///
/// `base_type` is the value type of the array operand, and `stored_type`
/// the type of the stored or pushed value, when the instruction has them.
pub fn check_js_array_kills(instr: &Instr, base_type: Option<ValueType>, stored_type: Option<ValueType>) -> JsArrayKills {
    let mut kills = JsArrayKills::empty();
    if instr.has_implicit_calls() {
        kills |= JsArrayKills::KILLS_ALL_ARRAYS;
        return kills;
    }

    let likely_js_array = base_type.is_some_and(|t| t.is_likely_array_or_object_with_array());
    match instr.opcode {
        Opcode::StElem | Opcode::StElemC => {
            let Some(base) = base_type else {
                return kills;
            };
            if base.is_likely_typed_array() || !likely_js_array {
                return kills;
            }
            if let Some(profile) = &instr.profile {
                if profile.stores_outside_head_segment {
                    kills |= JsArrayKills::KILLS_ARRAY_HEAD_SEGMENTS | JsArrayKills::KILLS_ARRAY_HEAD_SEGMENT_LENGTHS;
                }
                if profile.stores_outside_array_bounds {
                    kills |= JsArrayKills::KILLS_ARRAY_LENGTHS;
                }
                if profile.converts_native_array {
                    kills |= JsArrayKills::KILLS_NATIVE_ARRAYS;
                }
            }
            if base.is_likely_native_array() && !conforms_to_native_array(base, stored_type) {
                kills |= JsArrayKills::KILLS_NATIVE_ARRAYS;
            }
        }
        Opcode::DeleteElem => {
            kills |= JsArrayKills::KILLS_ARRAYS_WITH_NO_MISSING_VALUES;
        }
        Opcode::ArrayPush => {
            if likely_js_array {
                kills |= JsArrayKills::KILLS_ARRAY_HEAD_SEGMENTS
                    | JsArrayKills::KILLS_ARRAY_HEAD_SEGMENT_LENGTHS
                    | JsArrayKills::KILLS_ARRAY_LENGTHS;
                if let Some(base) = base_type {
                    if base.is_likely_native_array() && !conforms_to_native_array(base, stored_type) {
                        kills |= JsArrayKills::KILLS_NATIVE_ARRAYS;
                    }
                }
            }
        }
        Opcode::ArrayPop => {
            if likely_js_array {
                kills |= JsArrayKills::KILLS_ARRAY_HEAD_SEGMENT_LENGTHS | JsArrayKills::KILLS_ARRAY_LENGTHS;
            }
        }
        Opcode::CallHelper => {
            if instr.helper.is_some_and(|h| h.mutates_array()) {
                kills |= JsArrayKills::KILLS_ARRAY_HEAD_SEGMENTS
                    | JsArrayKills::KILLS_ARRAY_HEAD_SEGMENT_LENGTHS
                    | JsArrayKills::KILLS_ARRAY_LENGTHS
                    | JsArrayKills::KILLS_ARRAYS_WITH_NO_MISSING_VALUES;
            }
        }
        _ => {}
    }
    kills
}

/// Whether storing a value of `stored` keeps a native array native
fn conforms_to_native_array(base: ValueType, stored: Option<ValueType>) -> bool {
    let Some(stored) = stored else {
        return false;
    };
    if base.is_likely_native_int_array() {
        stored.is_int()
    } else if base.is_likely_native_float_array() {
        stored.is_number()
    } else {
        true
    }
}

/// Array operand of an instruction that can kill array facts
pub fn array_base_opnd(instr: &Instr) -> Option<&Opnd> {
    match instr.opcode {
        Opcode::StElem | Opcode::StElemC => instr.dst.as_ref(),
        Opcode::DeleteElem => instr.src1.as_ref(),
        Opcode::ArrayPush | Opcode::ArrayPop => instr.src1.as_ref(),
        Opcode::CallHelper => instr.src1.as_ref(),
        _ => None,
    }
}

/// Value stored or pushed by an array-writing instruction
pub fn stored_value_opnd(instr: &Instr) -> Option<&Opnd> {
    match instr.opcode {
        Opcode::StElem | Opcode::StElemC => instr.src1.as_ref(),
        Opcode::ArrayPush => instr.src2.as_ref(),
        _ => None,
    }
}

/// Apply `kills` to every array value in `data`
///
/// Killed array kinds become likely; killed aux syms are dropped from the
/// value. Every sym sharing a value number sees the same new info.
pub fn apply_js_array_kills(data: &mut BlockData, kills: JsArrayKills) {
    if kills.is_empty() {
        return;
    }

    let mut changes: FxHashMap<ValueNumber, Rc<ValueInfo>> = FxHashMap::default();
    for value in data.sym_to_value.values() {
        if changes.contains_key(&value.number()) {
            continue;
        }
        if let Some(info) = killed_array_info(value, kills) {
            changes.insert(value.number(), Rc::new(info));
        }
    }
    for (vn, info) in changes {
        data.change_value_info(vn, info);
    }
}

fn killed_array_info(value: &Value, kills: JsArrayKills) -> Option<ValueInfo> {
    let info = value.info();
    let ty = info.ty();
    if !ty.is_likely_any_optimized_array() {
        return None;
    }

    if ty.is_likely_typed_array() {
        // Typed arrays never change kind; only their length may go away
        let array = info.as_array()?;
        if !kills.kills_typed_array_head_segment_lengths() || array.head_segment_length_sym.is_none() {
            return None;
        }
        return Some(ValueInfo::new_array(
            ty,
            array.copy_with(true, false, true),
            info.sym_store(),
        ));
    }

    if !ty.is_likely_array_or_object_with_array() {
        return None;
    }
    if ty.is_definite() && kills.kills_value_type(ty) {
        return Some(info.to_likely());
    }
    let array = info.as_array()?;
    let kept = array.copy_with(
        !kills.kills_array_head_segments(),
        !kills.kills_array_head_segment_lengths(),
        !kills.kills_array_lengths(),
    );
    if kept == *array {
        return None;
    }
    Some(ValueInfo::new_array(ty, kept, info.sym_store()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::bitset::SymSet;
    use crate::ir::instr::{HelperMethod, InstrProfile};
    use crate::ir::opnd::{IndirOpnd, RegOpnd};
    use crate::ir::sym::SymId;
    use crate::value::{ArrayValueInfo, ObjectKind, TypedArrayKind};

    fn store(profile: Option<InstrProfile>) -> Instr {
        let mut instr = Instr::new(Opcode::StElem)
            .with_dst(Opnd::Indir(IndirOpnd::new(RegOpnd::var(SymId(1)), None, 0)))
            .with_src1(Opnd::reg(SymId(2)));
        instr.profile = profile;
        instr
    }

    #[test]
    fn test_kills_value_type() {
        let kills = JsArrayKills::KILLS_NATIVE_ARRAYS;
        assert!(kills.kills_value_type(ValueType::array(ObjectKind::NativeIntArray, true)));
        assert!(!kills.kills_value_type(ValueType::array(ObjectKind::Array, true)));
        let missing = JsArrayKills::KILLS_ARRAYS_WITH_NO_MISSING_VALUES;
        assert!(missing.kills_value_type(ValueType::array(ObjectKind::Array, true)));
        assert!(!missing.kills_value_type(ValueType::array(ObjectKind::Array, false)));
    }

    #[test]
    fn test_virtual_typed_array_type_kills() {
        let virtual_array = ValueType::object(ObjectKind::VirtualTypedArray(TypedArrayKind::Float64));
        assert!(JsArrayKills::KILLS_ALL_ARRAYS.kills_value_type(virtual_array));
        assert!(JsArrayKills::KILLS_NATIVE_ARRAYS.kills_value_type(virtual_array));
        assert!(!JsArrayKills::KILLS_ARRAY_LENGTHS.kills_value_type(virtual_array));
    }

    #[test]
    fn test_subset_and_merge() {
        let a = JsArrayKills::KILLS_ARRAY_LENGTHS;
        let b = JsArrayKills::KILLS_ARRAY_LENGTHS | JsArrayKills::KILLS_NATIVE_ARRAYS;
        assert!(a.are_subset_of(&b));
        assert!(!b.are_subset_of(&a));
        assert_eq!(a.merge(&JsArrayKills::KILLS_NATIVE_ARRAYS), b);
    }

    #[test]
    fn test_profiled_store_kills() {
        let base = Some(ValueType::array(ObjectKind::Array, true));
        let quiet = store(Some(InstrProfile::default()));
        assert!(check_js_array_kills(&quiet, base, Some(ValueType::INT)).is_empty());

        let growing = store(Some(InstrProfile {
            stores_outside_head_segment: true,
            stores_outside_array_bounds: true,
            ..Default::default()
        }));
        let kills = check_js_array_kills(&growing, base, Some(ValueType::INT));
        assert!(kills.kills_array_head_segments());
        assert!(kills.kills_array_head_segment_lengths());
        assert!(kills.kills_array_lengths());
    }

    #[test]
    fn test_var_store_to_native_array_kills_native_arrays() {
        let base = Some(ValueType::array(ObjectKind::NativeIntArray, true));
        let kills = check_js_array_kills(&store(None), base, Some(ValueType::STRING));
        assert!(kills.contains(JsArrayKills::KILLS_NATIVE_ARRAYS));
        let kills = check_js_array_kills(&store(None), base, Some(ValueType::INT));
        assert!(kills.is_empty());
    }

    #[test]
    fn test_calls_kill_all_arrays() {
        let call = Instr::new(Opcode::Call);
        assert!(check_js_array_kills(&call, None, None).kills_all_arrays());
        let shift = Instr::new(Opcode::CallHelper)
            .with_helper(HelperMethod::ArrayShift)
            .with_src1(Opnd::reg(SymId(1)));
        let kills = check_js_array_kills(&shift, Some(ValueType::likely_array(ObjectKind::Array, true)), None);
        assert!(kills.kills_array_lengths());
        assert!(!kills.kills_all_arrays());
    }

    #[test]
    fn test_apply_kills_drops_aux_syms_and_definiteness() {
        let mut data = BlockData::new_empty();
        let array = ArrayValueInfo {
            head_segment_sym: Some(SymId(10)),
            head_segment_length_sym: Some(SymId(11)),
            length_sym: Some(SymId(12)),
        };
        let ty = ValueType::array(ObjectKind::Array, true);
        let value = Value::new(ValueNumber(5), ValueInfo::new_array(ty, array, None));
        data.sym_to_value.insert(SymId(1), value.clone());
        data.sym_to_value.insert(SymId(2), value);
        data.live_fields = SymSet::new();

        apply_js_array_kills(&mut data, JsArrayKills::KILLS_ARRAY_LENGTHS);
        let after = data.sym_to_value[&SymId(1)].clone();
        let kept = after.info().as_array().unwrap();
        assert_eq!(kept.length_sym, None);
        assert_eq!(kept.head_segment_sym, Some(SymId(10)));
        assert_eq!(data.sym_to_value[&SymId(2)], after);

        apply_js_array_kills(&mut data, JsArrayKills::KILLS_ALL_ARRAYS);
        let killed = &data.sym_to_value[&SymId(1)];
        assert!(killed.ty().is_likely_array());
        assert!(!killed.ty().is_definite());
        assert!(killed.info().as_array().is_none());
    }
}
