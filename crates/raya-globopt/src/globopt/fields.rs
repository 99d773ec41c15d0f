//! Field values and field kills
//!
//! A property sym's value is only trusted while the sym is in
//! `live_fields`. Anything that may write a property removes the affected
//! syms from that set; the prepass records what it removed in the loop
//! summaries so the real pass can start loop headers without them.

use tracing::trace;

use super::{GlobOpt, Mode};
use crate::func::Func;
use crate::ir::bitset::SymSet;
use crate::ir::instr::{Instr, Opcode};
use crate::ir::opnd::{IndirOpnd, Opnd};
use crate::ir::sym::{property_ids, PropertyId, SymId};
use crate::value::Value;

impl<'c> GlobOpt<'c> {
    // ---------------------------------------------------------------
    // Policies
    // ---------------------------------------------------------------

    pub(crate) fn do_field_copy_prop(&self, func: &Func) -> bool {
        self.config.field_copy_prop
            && func.do_glob_opt().unwrap_or(false)
            && (!func.traits.has_try || func.do_optimize_try().unwrap_or(false))
    }

    pub(crate) fn do_obj_type_spec(&self, func: &Func) -> bool {
        self.config.obj_type_spec && func.do_glob_opt().unwrap_or(false)
    }

    pub(crate) fn do_field_opts(&self, func: &Func) -> bool {
        self.do_field_copy_prop(func) || self.do_obj_type_spec(func)
    }

    // ---------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------

    /// Known value of a field load; in the real pass the load becomes a
    /// register copy when a sym still holds the value
    pub(crate) fn opt_field_load(&mut self, func: &mut Func, instr: &mut Instr) -> Option<Value> {
        if !matches!(instr.opcode, Opcode::LdFld | Opcode::LdMethodFld | Opcode::LdSlot) || instr.calls_accessor {
            return None;
        }
        if !self.do_field_copy_prop(func) {
            return None;
        }
        let prop = instr.src1.as_ref().and_then(Opnd::as_prop)?.sym;
        if !self.current.live_fields.test(prop) {
            return None;
        }
        let value = self.current.find_value_from_map_direct(prop).cloned()?;

        if self.mode == Mode::Real {
            if let Some(copy) = self.current.get_copy_prop_sym(prop, &value, &func.syms, &func.constants) {
                trace!(target: "raya_globopt::fields", prop = %prop, copy = %copy, "field copy prop");
                instr.opcode = Opcode::Ld;
                instr.src1 = Some(Opnd::reg(copy));
            }
        }
        Some(value)
    }

    /// Remember `value` as the content of the field `prop`
    pub(crate) fn record_field_value(&mut self, func: &mut Func, prop: SymId, value: Value) {
        if !self.do_field_opts(func) || !func.syms.is_property(prop) {
            return;
        }
        self.current.set_value(value, prop, &func.syms, &mut func.constants);
        self.current.live_fields.set(prop);
    }

    /// A field store: the field now holds the stored value
    pub(crate) fn record_field_store(&mut self, func: &mut Func, instr: &Instr) {
        let Some(prop) = instr.dst_prop().map(|p| p.sym) else {
            return;
        };
        let value = match instr.src1.clone() {
            Some(src) => self.opnd_value(func, &src),
            None => None,
        };
        let value = value.unwrap_or_else(|| self.new_value(crate::value::ValueType::UNINITIALIZED));
        self.record_field_value(func, prop, value);
    }

    // ---------------------------------------------------------------
    // Kills
    // ---------------------------------------------------------------

    /// Record kills in the loop summaries
    fn record_field_kills(&mut self, func: &mut Func, killed: &SymSet) {
        match self.mode {
            Mode::Prepass => {
                for loop_id in self.prepass_loops(func) {
                    func.graph.loop_mut(loop_id).field_killed.or(killed);
                }
            }
            Mode::Real => {
                for loop_id in func.graph.loop_chain(self.current_block) {
                    func.graph.loop_mut(loop_id).real_pass_field_killed.or(killed);
                }
            }
        }
    }

    pub(crate) fn kill_live_fields_set(&mut self, func: &mut Func, killed: &SymSet) {
        if killed.is_empty() {
            return;
        }
        self.current.live_fields.minus(killed);
        self.current.maybe_written_type_syms.minus(killed);
        self.record_field_kills(func, killed);
    }

    /// Redefining an object sym invalidates its fields and its type
    pub(crate) fn kill_live_fields_for_stack_sym(&mut self, func: &mut Func, sym: SymId) {
        let var = func.syms.var_equiv(sym);
        let Some(stack) = func.syms.stack(var) else {
            return;
        };
        if stack.is_single_def {
            return;
        }
        let Some(info) = stack.object_info.as_ref() else {
            return;
        };
        let mut killed: SymSet = info.property_syms.iter().copied().collect();
        for prop in &info.property_syms {
            if let Some(guard) = func.syms.property(*prop).and_then(|p| p.write_guard_sym) {
                killed.set(guard);
            }
        }
        if let Some(type_sym) = info.type_sym {
            killed.set(type_sym);
        }
        self.kill_live_fields_set(func, &killed);
    }

    /// Writing `property_id` on any object kills it on every object
    pub(crate) fn kill_live_fields_for_property(&mut self, func: &mut Func, property_id: PropertyId) {
        func.guards.add_property_written(property_id);
        let Some(equiv) = func.syms.property_equiv_set(property_id) else {
            return;
        };
        let mut killed = equiv.clone();
        for prop in equiv.iter() {
            if let Some(guard) = func.syms.property(prop).and_then(|p| p.write_guard_sym) {
                killed.set(guard);
            }
        }
        self.kill_live_fields_set(func, &killed);
    }

    pub(crate) fn kill_all_fields(&mut self, func: &mut Func) {
        match self.mode {
            Mode::Prepass => {
                for loop_id in self.prepass_loops(func) {
                    func.graph.loop_mut(loop_id).all_fields_killed = true;
                }
            }
            Mode::Real => {
                let live = self.current.live_fields.clone();
                self.record_field_kills(func, &live);
            }
        }
        self.current.live_fields.clear_all();
        self.current.maybe_written_type_syms.clear_all();
    }

    pub(crate) fn kill_all_object_types(&mut self, func: &mut Func) {
        let types = func.syms.object_type_syms().clone();
        self.kill_live_fields_set(func, &types);
    }

    pub(crate) fn kill_object_type(&mut self, func: &mut Func, object_sym: SymId) {
        if let Some(type_sym) = func.syms.object_type_sym(object_sym) {
            let mut killed = SymSet::new();
            killed.set(type_sym);
            self.kill_live_fields_set(func, &killed);
        }
    }

    /// Types whose objects keep their slots in the header may be relaid out
    pub(crate) fn kill_object_header_inlined_type_syms(&mut self, func: &mut Func) {
        let live_types = func.syms.object_type_syms().intersection(&self.current.live_fields);
        let mut killed = SymSet::new();
        for type_sym in live_types.iter() {
            let Some(js_type) = self
                .current
                .find_object_type_value(type_sym)
                .and_then(|v| v.info().as_js_type().cloned())
            else {
                continue;
            };
            let mut types: Vec<_> = js_type.js_type.into_iter().collect();
            if let Some(set) = &js_type.type_set {
                types.extend(set.types().iter().copied());
            }
            let inlined = match self.host {
                Some(host) => types.iter().any(|t| host.is_object_header_inlined(*t)),
                None => true,
            };
            if inlined {
                killed.set(type_sym);
            }
        }
        self.kill_live_fields_set(func, &killed);
    }

    /// Element store `base[index]`
    pub(crate) fn kill_live_elems(&mut self, func: &mut Func, instr: &Instr, indir: &IndirOpnd) {
        let base = func.syms.var_equiv(indir.base.sym);
        let index_value = indir.index.as_ref().and_then(|i| self.value_of(func, i.sym));
        let numeric_index = match &indir.index {
            None => true,
            Some(index) => index.ty.is_int32() || index_value.as_ref().is_some_and(|v| v.ty().is_likely_number()),
        };

        if self.current.arg_obj_syms.test(base) || !numeric_index {
            self.kill_all_fields(func);
            func.guards.set_any_property_may_be_written();
            return;
        }

        let may_be_negative = match &indir.index {
            None => indir.offset < 0,
            Some(_) => index_value
                .as_ref()
                .and_then(|v| v.info().try_get_int_constant_lower_bound(true))
                .is_none_or(|lower| lower < 0),
        };
        if may_be_negative {
            self.kill_all_object_types(func);
            return;
        }

        let base_type = self.value_of(func, base).map(|v| v.ty());
        let maybe_native = base_type.is_none_or(|t| t.is_likely_native_array() || !t.is_likely_any_optimized_array());
        let stores_var = match &instr.src1 {
            Some(Opnd::Reg(reg)) => {
                reg.ty.is_var() && !self.value_of(func, reg.sym).is_some_and(|v| v.ty().is_likely_number())
            }
            Some(Opnd::IntConst(_)) | Some(Opnd::FloatConst(_)) => false,
            _ => true,
        };
        if maybe_native && stores_var {
            let types = func.syms.object_type_syms().clone();
            self.current.maybe_written_type_syms.or(&types);
        }
    }

    /// Apply what `instr` may write to the live field set
    pub(crate) fn process_field_kills(&mut self, func: &mut Func, instr: &Instr) {
        match instr.opcode {
            Opcode::StElem | Opcode::StElemC | Opcode::DeleteElem => {
                if let Some(Opnd::Indir(indir)) = &instr.dst {
                    self.kill_live_elems(func, instr, indir);
                }
                self.kill_live_fields_for_property(func, property_ids::LENGTH);
            }
            Opcode::ArrayPush | Opcode::ArrayPop => {
                self.kill_live_fields_for_property(func, property_ids::LENGTH);
            }
            Opcode::DeleteFld => {
                if let Some(prop) = instr.src1.as_ref().and_then(Opnd::as_prop) {
                    let (object_sym, property_id) = match func.syms.property(prop.sym) {
                        Some(p) => (p.object_sym, p.property_id),
                        None => return,
                    };
                    self.kill_live_fields_for_property(func, property_id);
                    self.kill_object_type(func, object_sym);
                    self.kill_object_header_inlined_type_syms(func);
                }
            }
            Opcode::StFld | Opcode::InitFld | Opcode::InitLetFld | Opcode::ScopedStFld | Opcode::StSlot => {
                let Some(property_id) = instr
                    .dst_prop()
                    .and_then(|p| func.syms.property(p.sym))
                    .map(|p| p.property_id)
                else {
                    return;
                };
                if property_id == property_ids::VALUE_OF
                    || property_id == property_ids::TO_STRING
                    || instr.calls_accessor
                {
                    func.guards.add_property_written(property_id);
                    self.kill_all_fields(func);
                } else {
                    self.kill_live_fields_for_property(func, property_id);
                }
            }
            Opcode::InlineeStart | Opcode::InlineeEnd => {
                self.kill_live_fields_for_property(func, property_ids::ARGUMENTS);
                self.kill_live_fields_for_property(func, property_ids::CALLER);
            }
            Opcode::CallHelper => {
                if let Some(helper) = instr.helper {
                    if helper.updates_length() {
                        self.kill_live_fields_for_property(func, property_ids::LENGTH);
                    }
                    if helper.writes_builtin_properties() {
                        for property_id in [property_ids::LAST_INDEX, property_ids::INDEX, property_ids::INPUT] {
                            self.kill_live_fields_for_property(func, property_id);
                        }
                    }
                }
            }
            Opcode::LdHeapArguments => {
                let slots = func.syms.slot_syms().clone();
                self.kill_live_fields_set(func, &slots);
            }
            Opcode::InitClass | Opcode::NewScObject => self.kill_all_object_types(func),
            _ => {}
        }
        if instr.uses_all_fields() {
            self.kill_all_fields(func);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GlobOptConfig;
    use crate::func::Func;
    use crate::globopt::GlobOpt;
    use crate::ir::builder::IrBuilder;
    use crate::ir::instr::Opcode;
    use crate::ir::opnd::Opnd;
    use crate::ir::sym::FieldKind;
    use crate::value::ValueType;

    const X: u32 = crate::ir::sym::property_ids::FIRST_USER;
    const Y: u32 = X + 1;

    #[test]
    fn test_repeated_load_is_copy_propagated() {
        let config = GlobOptConfig::default();
        let mut func = Func::new_for_test();
        {
            let mut builder = IrBuilder::new(&mut func);
            let o = builder.var(0);
            let a = builder.var(1);
            let b = builder.var(2);
            let x = builder.property(o, X, FieldKind::Data);
            builder.ld_fld(a, x);
            builder.ld_fld(b, x);
            builder.ret(Some(Opnd::reg(b)));
        }
        GlobOpt::new(&config).optimize(&mut func).unwrap();

        let opcodes: Vec<Opcode> = func
            .graph
            .block(func.graph.entry)
            .instrs
            .iter()
            .map(|i| i.opcode)
            .collect();
        assert_eq!(opcodes, vec![Opcode::LdFld, Opcode::Ld]);
    }

    #[test]
    fn test_store_kills_same_property_on_other_objects() {
        let config = GlobOptConfig::default();
        let mut func = Func::new_for_test();
        {
            let mut builder = IrBuilder::new(&mut func);
            let o = builder.var(0);
            let p = builder.var(1);
            let a = builder.var(2);
            let b = builder.var(3);
            let v = builder.var(4);
            let ox = builder.property(o, X, FieldKind::Data);
            let oy = builder.property(o, Y, FieldKind::Data);
            let px = builder.property(p, X, FieldKind::Data);
            builder.ld_fld(a, ox);
            builder.ld_fld(b, oy);
            builder.ld_const(v, 1);
            builder.st_fld(px, Opnd::reg(v));
            builder.ld_fld(a, ox);
            builder.ld_fld(b, oy);
            builder.ret(None);
        }
        GlobOpt::new(&config).optimize(&mut func).unwrap();

        let opcodes: Vec<Opcode> = func
            .graph
            .block(func.graph.entry)
            .instrs
            .iter()
            .filter(|i| i.opcode == Opcode::LdFld || i.opcode == Opcode::Ld && i.src1_reg().is_some())
            .map(|i| i.opcode)
            .collect();
        // o.x reloads after the store to p.x; o.y is copied
        assert_eq!(opcodes, vec![Opcode::LdFld, Opcode::LdFld, Opcode::LdFld, Opcode::Ld]);
    }

    #[test]
    fn test_call_kills_all_fields() {
        let config = GlobOptConfig::default();
        let mut func = Func::new_for_test();
        {
            let mut builder = IrBuilder::new(&mut func);
            let o = builder.var(0);
            let f = builder.var(1);
            let a = builder.var(2);
            let ox = builder.property(o, X, FieldKind::Data);
            builder.ld_fld(a, ox);
            builder.call(None, f, &[]);
            builder.ld_fld(a, ox);
            builder.ret(None);
        }
        GlobOpt::new(&config).optimize(&mut func).unwrap();

        let loads = func
            .graph
            .block(func.graph.entry)
            .instrs
            .iter()
            .filter(|i| i.opcode == Opcode::LdFld)
            .count();
        assert_eq!(loads, 2);
        assert!(func.has_calls());
    }

    #[test]
    fn test_element_store_with_string_index_marks_any_property_written() {
        let config = GlobOptConfig::default();
        let mut func = Func::new_for_test();
        let key = {
            let mut builder = IrBuilder::new(&mut func);
            let o = builder.var(0);
            let key = builder.var(1);
            let v = builder.var(2);
            builder.st_elem(o, Opnd::reg(key), Opnd::reg(v));
            builder.ret(None);
            key
        };
        func.set_param_value_type(key, ValueType::STRING);
        GlobOpt::new(&config).optimize(&mut func).unwrap();
        assert!(func.guards.any_property_may_be_written());
    }
}
