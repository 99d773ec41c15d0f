//! Object type-check sequencing
//!
//! Field accesses with profiled type information access slots directly
//! behind a type check. The object-type sym of each object carries what is
//! known about its type; a check is emitted only when that knowledge does
//! not already prove the access's expectation, and a successful check feeds
//! forward to the accesses after it.

use std::rc::Rc;

use tracing::trace;

use super::bailout::BailOutKind;
use super::{GlobOpt, Mode};
use crate::func::Func;
use crate::host::TypeHandle;
use crate::ir::instr::{Instr, Opcode};
use crate::ir::opnd::{ExpectedTypes, PropertySymOpnd, TypeCheckSeqFlags};
use crate::ir::sym::SymId;
use crate::value::{EquivalentTypeSet, JsTypeValueInfo, Value, ValueInfo};

/// Outcome of sequencing one property access
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeCheckSeqResult {
    /// The access uses a direct slot
    pub is_specialized: bool,
    pub emits_type_check: bool,
    /// The object type value changes at this access
    pub changes_type_value: bool,
    /// The object's type is known to match once the access runs
    pub is_type_checked: bool,
}

/// How the known types of an object relate to what an access expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMatch {
    /// Known types all satisfy the expectation
    Proven,
    /// Some known types satisfy it; a check narrows to them
    Overlap,
    Mismatch,
}

/// What the object must be before the access runs
#[derive(Debug, Clone)]
enum Requirement {
    Type(TypeHandle),
    Set(Rc<EquivalentTypeSet>),
    /// Any type with an agreeing slot layout
    Layouts,
}

pub fn are_type_sets_identical(a: Option<&Rc<EquivalentTypeSet>>, b: Option<&Rc<EquivalentTypeSet>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => EquivalentTypeSet::are_identical(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Every type of `a` is in `b`
pub fn is_subset_of(a: &EquivalentTypeSet, b: &EquivalentTypeSet) -> bool {
    a.is_subset_of(b)
}

/// Compare what is known about an object's type with a required type or set
fn compare_current_types_with_expected_types(current: &JsTypeValueInfo, required: &Requirement) -> TypeMatch {
    let known: Vec<TypeHandle> = match (&current.js_type, &current.type_set) {
        (Some(t), _) => vec![*t],
        (None, Some(set)) => set.types().to_vec(),
        (None, None) => return TypeMatch::Mismatch,
    };
    let satisfies = |t: &TypeHandle| match required {
        Requirement::Type(expected) => t == expected,
        Requirement::Set(set) => set.contains(*t),
        Requirement::Layouts => false,
    };
    let matching = known.iter().filter(|t| satisfies(t)).count();
    if matching == known.len() {
        TypeMatch::Proven
    } else if matching > 0 {
        TypeMatch::Overlap
    } else {
        TypeMatch::Mismatch
    }
}

impl<'c> GlobOpt<'c> {
    /// Sequence the type check of a fast field access
    pub(crate) fn opt_obj_type_spec(&mut self, func: &mut Func, instr: &mut Instr) {
        if !self.do_obj_type_spec(func) {
            return;
        }
        let Some(mut prop) = instr.prop_opnd().cloned() else {
            return;
        };
        self.copy_prop_property_sym_obj(func, &mut prop);

        let is_store = instr.opcode.is_field_store();
        let result = if self.prepare_property_sym_opnd_for_type_check_seq(func, instr.opcode, instr.calls_accessor, &mut prop)
        {
            self.process_prop_op_in_type_check_seq(func, &mut prop)
        } else {
            TypeCheckSeqResult::default()
        };

        if self.mode == Mode::Real {
            if let Some(slot) = instr.prop_opnd_mut() {
                *slot = prop.clone();
            }
            if result.emits_type_check {
                self.set_type_check_bailout(func, instr, &prop);
            }
        }
        self.finish_opt_prop_op(func, &prop, result, is_store);
    }

    /// Use the copy-prop sym of the accessed object, if it has one
    pub(crate) fn copy_prop_property_sym_obj(&mut self, func: &mut Func, prop: &mut PropertySymOpnd) {
        let Some((object_sym, property_id, kind)) = func
            .syms
            .property(prop.sym)
            .map(|p| (p.object_sym, p.property_id, p.kind))
        else {
            return;
        };
        let Some(value) = self.value_of(func, object_sym) else {
            return;
        };
        let Some(copy) = self.current.get_copy_prop_sym(object_sym, &value, &func.syms, &func.constants) else {
            return;
        };
        if self.mode == Mode::Prepass && !self.safe_to_copy_prop_in_prepass(func, copy) {
            return;
        }
        prop.sym = func.syms.find_or_create_property_sym(copy, property_id, kind);
        trace!(target: "raya_globopt::fields", object = %object_sym, copy = %copy, "object copy prop");
    }

    /// Whether the access can take part in type-check sequencing
    pub(crate) fn prepare_property_sym_opnd_for_type_check_seq(
        &mut self,
        func: &mut Func,
        opcode: Opcode,
        calls_accessor: bool,
        prop: &mut PropertySymOpnd,
    ) -> bool {
        prop.set_flag(TypeCheckSeqFlags::CANDIDATE, false);
        if !self.do_field_opts(func) || !opcode.is_fast_field_op() || calls_accessor {
            return false;
        }
        let Some(info) = prop.obj_type_spec.as_ref() else {
            return false;
        };
        if info.uses_accessor || info.is_root_non_configurable_load {
            return false;
        }
        if info.is_poly() && info.equivalent_type_set().is_none() {
            return false;
        }
        let uses_fixed_value = info.uses_fixed_value;
        let Some(object_sym) = func.syms.property(prop.sym).map(|p| p.object_sym) else {
            return false;
        };
        func.syms.ensure_object_type_sym(object_sym);
        if uses_fixed_value {
            func.syms.ensure_write_guard_sym(prop.sym);
        }
        prop.set_flag(TypeCheckSeqFlags::CANDIDATE, true);
        prop.set_flag(TypeCheckSeqFlags::BEING_STORED, opcode.is_field_store());
        true
    }

    /// Decide the type check of a candidate access, updating the operand
    /// flags and the object type value
    pub(crate) fn process_prop_op_in_type_check_seq(
        &mut self,
        func: &mut Func,
        prop: &mut PropertySymOpnd,
    ) -> TypeCheckSeqResult {
        let mut result = TypeCheckSeqResult::default();
        if !prop.is_type_check_seq_candidate() {
            return result;
        }
        let Some(info) = prop.obj_type_spec.clone() else {
            return result;
        };
        let Some((object_sym, write_guard)) = func
            .syms
            .property(prop.sym)
            .map(|p| (p.object_sym, p.write_guard_sym))
        else {
            return result;
        };
        let Some(type_sym) = func.syms.object_type_sym(object_sym) else {
            return result;
        };

        let is_store = prop.has_flag(TypeCheckSeqFlags::BEING_STORED);
        let adds_property = is_store && info.initial_type.is_some();
        let current = self
            .current
            .find_object_type_value(type_sym)
            .and_then(|v| v.info().as_js_type().cloned())
            .filter(JsTypeValueInfo::has_type_info);

        let required = match (&info.initial_type, &info.expected) {
            (Some(initial), _) if adds_property => Requirement::Type(*initial),
            (_, ExpectedTypes::Mono(t)) => Requirement::Type(*t),
            (_, ExpectedTypes::Equivalent { set, mono }) => match set.first_type() {
                Some(t) if info.needs_mono_check || (*mono && set.len() == 1) => Requirement::Type(t),
                _ => Requirement::Set(Rc::clone(set)),
            },
            (_, ExpectedTypes::Polymorphic(_)) => Requirement::Layouts,
        };

        let mut depolymorphized = None;
        match (&required, &current) {
            (Requirement::Layouts, Some(cur)) => {
                let mut types: Vec<TypeHandle> = cur.js_type.into_iter().collect();
                if cur.js_type.is_none() {
                    if let Some(set) = &cur.type_set {
                        types.extend(set.types().iter().copied());
                    }
                }
                let layout = types
                    .iter()
                    .try_fold(None, |prev, t| info.try_depolymorphication(*t, prev).map(Some))
                    .flatten();
                let Some(layout) = layout else {
                    return result;
                };
                depolymorphized = Some(layout);
                result.is_specialized = true;
                result.is_type_checked = true;
            }
            (Requirement::Layouts, None) => return result,
            (_, Some(cur)) => match compare_current_types_with_expected_types(cur, &required) {
                TypeMatch::Proven => {
                    result.is_specialized = true;
                    result.is_type_checked = true;
                }
                TypeMatch::Overlap => {
                    result.is_specialized = true;
                    result.is_type_checked = true;
                    result.emits_type_check = true;
                    result.changes_type_value = true;
                }
                TypeMatch::Mismatch => {
                    prop.set_flag(TypeCheckSeqFlags::TYPE_MISMATCH, true);
                    prop.set_flag(TypeCheckSeqFlags::TYPE_AVAILABLE, true);
                    trace!(target: "raya_globopt::fields", prop = %prop.sym, "type mismatch, abstaining");
                    return result;
                }
            },
            (_, None) => {
                result.is_specialized = true;
                result.is_type_checked = true;
                result.emits_type_check = true;
                result.changes_type_value = true;
            }
        }

        // Fixed values also need nothing written to the property since the last check
        let guard_live = write_guard.is_none_or(|g| self.current.live_fields.test(g));
        let maybe_written = self.current.maybe_written_type_syms.test(type_sym);
        if info.uses_fixed_value && !result.emits_type_check && (maybe_written || !guard_live) {
            result.emits_type_check = true;
        }
        if adds_property {
            result.changes_type_value = true;
        }

        prop.set_flag(TypeCheckSeqFlags::TYPE_AVAILABLE, current.is_some());
        prop.set_flag(TypeCheckSeqFlags::TYPE_DEAD, current.is_none());
        prop.set_flag(TypeCheckSeqFlags::TYPE_CHECKED, result.is_type_checked);
        prop.set_flag(TypeCheckSeqFlags::INITIAL_TYPE_CHECKED, adds_property && result.is_type_checked);
        prop.set_flag(TypeCheckSeqFlags::TYPE_CHECK_REQUIRED, result.emits_type_check);
        prop.set_flag(
            TypeCheckSeqFlags::WRITE_GUARD_CHECKED,
            info.uses_fixed_value && result.emits_type_check,
        );
        if let Some((slot, aux)) = depolymorphized {
            prop.slot_index = slot;
            prop.uses_aux_slot = aux;
        }
        if let (Requirement::Set(set), Some(t)) = (&required, current.as_ref().and_then(|c| c.js_type)) {
            prop.checked_type_set_index = set.index_of(t);
        }

        if result.emits_type_check {
            match &required {
                Requirement::Type(t) => func.guards.pin_type_ref(*t),
                Requirement::Set(set) => set.types().iter().for_each(|t| func.guards.pin_type_ref(*t)),
                Requirement::Layouts => {}
            }
            if let Some(guard) = write_guard.filter(|_| info.uses_fixed_value) {
                self.current.live_fields.set(guard);
                if !prop.write_guards.contains(&guard) {
                    prop.write_guards.push(guard);
                }
            }
            self.current.maybe_written_type_syms.clear(type_sym);
        }

        if result.changes_type_value {
            if adds_property {
                if let Some(final_type) = info.ty() {
                    func.guards.pin_type_ref(final_type);
                    self.value_number_object_type(func, type_sym, JsTypeValueInfo::new(Some(final_type), None));
                }
            } else {
                match (&required, &current) {
                    (Requirement::Type(t), Some(_)) => self.set_single_type_on_object_type_value(func, type_sym, *t),
                    (Requirement::Type(t), None) => {
                        self.value_number_object_type(func, type_sym, JsTypeValueInfo::new(Some(*t), None));
                    }
                    (Requirement::Set(set), _) => {
                        self.value_number_object_type(func, type_sym, JsTypeValueInfo::new(None, Some(Rc::clone(set))));
                    }
                    (Requirement::Layouts, _) => {}
                }
            }
        }
        result
    }

    /// Type effects of a property access once it has run
    ///
    /// A store that was not verified may have changed the layout of any
    /// object aliasing the one written, so every type value dies. A verified
    /// store keeps the written object's type; objects that may alias it are
    /// only marked as maybe written, unless the store changed the layout.
    pub(crate) fn finish_opt_prop_op(
        &mut self,
        func: &mut Func,
        prop: &PropertySymOpnd,
        result: TypeCheckSeqResult,
        is_store: bool,
    ) {
        let type_sym = func
            .syms
            .property(prop.sym)
            .and_then(|p| func.syms.object_type_sym(p.object_sym));
        if !is_store {
            return;
        }
        let Some(type_sym) = type_sym.filter(|_| result.is_type_checked) else {
            self.kill_all_object_types(func);
            return;
        };

        let mut others = func.syms.object_type_syms().clone();
        others.clear(type_sym);
        if let Some(initial) = prop.initial_type().filter(|_| prop.changes_object_layout() || result.changes_type_value) {
            let mut killed = crate::ir::bitset::SymSet::new();
            for other in others.intersection(&self.current.live_fields).iter() {
                let may_share_type = self
                    .current
                    .find_object_type_value(other)
                    .and_then(|v| v.info().as_js_type())
                    .is_none_or(|js| {
                        js.js_type == Some(initial) || js.type_set.as_ref().is_some_and(|s| s.contains(initial))
                    });
                if may_share_type {
                    killed.set(other);
                }
            }
            self.kill_live_fields_set(func, &killed);
        } else {
            self.current.maybe_written_type_syms.or(&others);
        }
    }

    /// Attach the bailout a failed type check takes
    pub(crate) fn set_type_check_bailout(&mut self, func: &mut Func, instr: &mut Instr, prop: &PropertySymOpnd) {
        let kind = if prop.has_flag(TypeCheckSeqFlags::WRITE_GUARD_CHECKED) {
            BailOutKind::FAILED_FIXED_FIELD_TYPE_CHECK
        } else if prop.has_equivalent_type_set() && !prop.needs_mono_check() && !prop.is_mono() {
            BailOutKind::FAILED_EQUIVALENT_TYPE_CHECK
        } else {
            BailOutKind::FAILED_TYPE_CHECK
        };
        self.generate_bail_at_operation(func, instr, kind);
    }

    /// Fresh type value for `type_sym`
    pub(crate) fn value_number_object_type(&mut self, func: &mut Func, type_sym: SymId, js_type: JsTypeValueInfo) -> Value {
        let value = Value::new(
            self.value_numbers.next(),
            ValueInfo::new_js_type(js_type.js_type, js_type.type_set),
        );
        let value = self.current.set_value(value, type_sym, &func.syms, &mut func.constants);
        self.current.live_fields.set(type_sym);
        value
    }

    /// Narrow a type value to one type, copying it first when other blocks share it
    pub(crate) fn set_single_type_on_object_type_value(&mut self, func: &mut Func, type_sym: SymId, ty: TypeHandle) {
        let Some(value) = self.current.find_object_type_value(type_sym).cloned() else {
            self.value_number_object_type(func, type_sym, JsTypeValueInfo::new(Some(ty), None));
            return;
        };
        let mut info = value.info().clone();
        let shared = info.is_shared();
        if let Some(js) = info.as_js_type_mut() {
            js.js_type = Some(ty);
            js.type_set = None;
            js.is_shared = false;
        }
        if shared {
            let value = Value::new(self.value_numbers.next(), info);
            self.current.set_value(value, type_sym, &func.syms, &mut func.constants);
        } else {
            self.current.change_value_info(value.number(), Rc::new(info));
        }
    }

    /// `dst` now refers to the same object as `src`
    pub(crate) fn set_object_type_from_type_sym(&mut self, func: &mut Func, dst_type_sym: SymId, src_type_sym: SymId) {
        let Some(value) = self.current.find_object_type_value(src_type_sym).cloned() else {
            return;
        };
        self.current.set_value(value, dst_type_sym, &func.syms, &mut func.constants);
        self.current.live_fields.set(dst_type_sym);
    }

    /// Carry the type of a copied object over to the copy
    pub(crate) fn transfer_object_type(&mut self, func: &mut Func, src: SymId, dst: SymId) {
        if !self.do_obj_type_spec(func) {
            return;
        }
        let Some(src_type) = func.syms.object_type_sym(src) else {
            return;
        };
        if self.current.find_object_type_value(src_type).is_none() {
            return;
        }
        let dst_type = func.syms.ensure_object_type_sym(dst);
        self.set_object_type_from_type_sym(func, dst_type, src_type);
    }

    /// `new` through a constructor cache produces objects of the cached type
    pub(crate) fn opt_new_sc_object(&mut self, func: &mut Func, instr: &mut Instr) {
        if !self.do_obj_type_spec(func) {
            return;
        }
        let (Some(profile_id), Some(dst)) = (instr.profile.map(|p| p.profile_id), instr.dst_reg().map(|r| r.sym))
        else {
            return;
        };
        let Some(cache) = func.guards.ctor_cache(profile_id).cloned() else {
            return;
        };
        for property_id in &cache.guarded_properties {
            func.guards.link_ctor_cache_to_property_id(*property_id, profile_id);
        }
        func.guards.pin_type_ref(cache.ty);
        let type_sym = func.syms.ensure_object_type_sym(dst);
        self.value_number_object_type(func, type_sym, JsTypeValueInfo::new(Some(cache.ty), None));
        self.generate_bail_at_operation(func, instr, BailOutKind::FAILED_CTOR_GUARD_CHECK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobOptConfig;
    use crate::func::tables::CtorCache;
    use crate::ir::builder::IrBuilder;
    use crate::ir::instr::InstrProfile;
    use crate::ir::opnd::{ObjTypeSpecFldInfo, Opnd, SlotLayout};
    use crate::ir::sym::{property_ids, FieldKind};

    const X: u32 = property_ids::FIRST_USER;
    const Y: u32 = X + 1;
    const Z: u32 = X + 2;
    const T1: TypeHandle = TypeHandle(0x100);
    const T2: TypeHandle = TypeHandle(0x200);

    fn load(dst: SymId, prop: SymId, info: ObjTypeSpecFldInfo) -> Instr {
        Instr::new(Opcode::LdFld)
            .with_dst(Opnd::reg(dst))
            .with_src1(Opnd::Prop(PropertySymOpnd::new(prop).with_obj_type_spec(info)))
    }

    fn store(prop: SymId, value: SymId, info: Option<ObjTypeSpecFldInfo>) -> Instr {
        let mut opnd = PropertySymOpnd::new(prop);
        if let Some(info) = info {
            opnd = opnd.with_obj_type_spec(info);
        }
        Instr::new(Opcode::StFld).with_dst(Opnd::Prop(opnd)).with_src1(Opnd::reg(value))
    }

    fn optimize(func: &mut Func) {
        let config = GlobOptConfig::default();
        GlobOpt::new(&config).optimize(func).unwrap();
    }

    fn field_ops(func: &Func) -> Vec<(BailOutKind, TypeCheckSeqFlags)> {
        func.graph
            .block(func.graph.entry)
            .instrs
            .iter()
            .filter(|i| i.opcode.is_fast_field_op())
            .map(|i| (i.bailout_kind(), i.prop_opnd().map(|p| p.flags).unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_second_mono_access_needs_no_check() {
        let mut func = Func::new_for_test();
        {
            let mut b = IrBuilder::new(&mut func);
            let (o, a) = (b.var(0), b.var(1));
            let ox = b.property(o, X, FieldKind::Data);
            let oy = b.property(o, Y, FieldKind::Data);
            b.emit(load(a, ox, ObjTypeSpecFldInfo::mono(T1, 0)));
            b.emit(load(a, oy, ObjTypeSpecFldInfo::mono(T1, 1)));
            b.ret(None);
        }
        optimize(&mut func);

        let ops = field_ops(&func);
        assert_eq!(ops[0].0, BailOutKind::FAILED_TYPE_CHECK);
        assert!(ops[0].1.contains(TypeCheckSeqFlags::TYPE_CHECK_REQUIRED));
        assert_eq!(ops[1].0, BailOutKind::empty());
        assert!(ops[1].1.contains(TypeCheckSeqFlags::TYPE_CHECKED));
        assert!(!ops[1].1.contains(TypeCheckSeqFlags::TYPE_CHECK_REQUIRED));
    }

    #[test]
    fn test_mismatch_abstains() {
        let mut func = Func::new_for_test();
        {
            let mut b = IrBuilder::new(&mut func);
            let (o, a) = (b.var(0), b.var(1));
            let ox = b.property(o, X, FieldKind::Data);
            let oy = b.property(o, Y, FieldKind::Data);
            b.emit(load(a, ox, ObjTypeSpecFldInfo::mono(T1, 0)));
            b.emit(load(a, oy, ObjTypeSpecFldInfo::mono(T2, 1)));
            b.ret(None);
        }
        optimize(&mut func);

        let ops = field_ops(&func);
        assert!(ops[1].1.contains(TypeCheckSeqFlags::TYPE_MISMATCH));
        assert!(!ops[1].1.contains(TypeCheckSeqFlags::TYPE_CHECKED));
        assert_eq!(ops[1].0, BailOutKind::empty());
    }

    #[test]
    fn test_equivalent_check_then_mono_narrows() {
        let mut func = Func::new_for_test();
        {
            let mut b = IrBuilder::new(&mut func);
            let (o, a) = (b.var(0), b.var(1));
            let ox = b.property(o, X, FieldKind::Data);
            let oy = b.property(o, Y, FieldKind::Data);
            b.emit(load(a, ox, ObjTypeSpecFldInfo::equivalent(EquivalentTypeSet::shared([T1, T2]), 0)));
            b.emit(load(a, oy, ObjTypeSpecFldInfo::mono(T1, 1)));
            b.emit(load(a, ox, ObjTypeSpecFldInfo::mono(T1, 0)));
            b.ret(None);
        }
        optimize(&mut func);

        let ops = field_ops(&func);
        assert_eq!(ops[0].0, BailOutKind::FAILED_EQUIVALENT_TYPE_CHECK);
        assert_eq!(ops[1].0, BailOutKind::FAILED_TYPE_CHECK);
        assert_eq!(ops[2].0, BailOutKind::empty());
    }

    #[test]
    fn test_depolymorphization_after_equivalent_check() {
        let mut func = Func::new_for_test();
        {
            let mut b = IrBuilder::new(&mut func);
            let (o, a) = (b.var(0), b.var(1));
            let ox = b.property(o, X, FieldKind::Data);
            let oy = b.property(o, Y, FieldKind::Data);
            b.emit(load(a, ox, ObjTypeSpecFldInfo::equivalent(EquivalentTypeSet::shared([T1, T2]), 0)));
            let layouts = vec![
                SlotLayout { ty: T1, slot_index: 3, uses_aux_slot: false },
                SlotLayout { ty: T2, slot_index: 3, uses_aux_slot: false },
            ];
            b.emit(load(a, oy, ObjTypeSpecFldInfo::polymorphic(layouts)));
            b.ret(None);
        }
        optimize(&mut func);

        let access = func
            .graph
            .block(func.graph.entry)
            .instrs
            .iter()
            .filter(|i| i.opcode == Opcode::LdFld)
            .nth(1)
            .and_then(|i| i.prop_opnd())
            .cloned()
            .unwrap();
        assert!(access.is_type_checked());
        assert_eq!(access.slot_index, 3);
        assert!(!access.has_flag(TypeCheckSeqFlags::TYPE_CHECK_REQUIRED));
    }

    #[test]
    fn test_property_adding_store_moves_to_final_type() {
        let mut func = Func::new_for_test();
        {
            let mut b = IrBuilder::new(&mut func);
            let (o, a, v) = (b.var(0), b.var(1), b.var(2));
            let ox = b.property(o, X, FieldKind::Data);
            let oy = b.property(o, Y, FieldKind::Data);
            b.emit(load(a, ox, ObjTypeSpecFldInfo::mono(T1, 0)));
            let mut adding = ObjTypeSpecFldInfo::mono(T2, 1);
            adding.initial_type = Some(T1);
            adding.changes_object_layout = true;
            b.emit(store(oy, v, Some(adding)));
            let oz = b.property(o, Z, FieldKind::Data);
            b.emit(load(a, oz, ObjTypeSpecFldInfo::mono(T2, 2)));
            b.ret(None);
        }
        optimize(&mut func);

        let ops = field_ops(&func);
        assert_eq!(ops[1].0, BailOutKind::empty());
        assert!(ops[1].1.contains(TypeCheckSeqFlags::INITIAL_TYPE_CHECKED));
        assert_eq!(ops[2].0, BailOutKind::empty());
    }

    #[test]
    fn test_unchecked_store_kills_object_types() {
        let mut func = Func::new_for_test();
        {
            let mut b = IrBuilder::new(&mut func);
            let (o, p, a, v) = (b.var(0), b.var(1), b.var(2), b.var(3));
            let ox = b.property(o, X, FieldKind::Data);
            let px = b.property(p, X, FieldKind::Data);
            b.emit(load(a, ox, ObjTypeSpecFldInfo::mono(T1, 0)));
            b.emit(store(px, v, None));
            b.emit(load(a, ox, ObjTypeSpecFldInfo::mono(T1, 0)));
            b.ret(None);
        }
        optimize(&mut func);

        let ops = field_ops(&func);
        assert_eq!(ops[0].0, BailOutKind::FAILED_TYPE_CHECK);
        assert_eq!(ops[2].0, BailOutKind::FAILED_TYPE_CHECK);
    }

    #[test]
    fn test_ctor_cache_gives_new_object_its_type() {
        let mut func = Func::new_for_test();
        func.guards.add_ctor_cache(
            7,
            CtorCache {
                ty: T1,
                guarded_properties: vec![X],
                skip_default_new_object: false,
            },
        );
        {
            let mut b = IrBuilder::new(&mut func);
            let (ctor, o, a) = (b.var(0), b.var(1), b.var(2));
            b.emit(
                Instr::new(Opcode::NewScObject)
                    .with_dst(Opnd::reg(o))
                    .with_src1(Opnd::reg(ctor))
                    .with_profile(InstrProfile {
                        profile_id: 7,
                        ..Default::default()
                    }),
            );
            let ox = b.property(o, X, FieldKind::Data);
            b.emit(load(a, ox, ObjTypeSpecFldInfo::mono(T1, 0)));
            b.ret(None);
        }
        optimize(&mut func);

        let instrs = &func.graph.block(func.graph.entry).instrs;
        let new_obj = instrs.iter().find(|i| i.opcode == Opcode::NewScObject).unwrap();
        assert!(new_obj.bailout_kind().contains(BailOutKind::FAILED_CTOR_GUARD_CHECK));
        let ld = instrs.iter().find(|i| i.opcode == Opcode::LdFld).unwrap();
        assert_eq!(ld.bailout_kind(), BailOutKind::empty());
        assert_eq!(func.guards.ctor_caches_for_property(X), vec![7]);
    }

    #[test]
    fn test_type_set_helpers() {
        let a = EquivalentTypeSet::shared([T1, T2]);
        let b = EquivalentTypeSet::shared([T2, T1]);
        assert!(are_type_sets_identical(Some(&a), Some(&b)));
        assert!(!are_type_sets_identical(Some(&a), None));
        assert!(is_subset_of(&EquivalentTypeSet::new([T1]), &a));
    }
}
