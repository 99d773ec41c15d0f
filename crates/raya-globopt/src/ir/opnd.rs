//! Instruction operands

use std::rc::Rc;

use bitflags::bitflags;

use super::sym::SymId;
use super::types::IrType;
use crate::host::TypeHandle;
use crate::value::{EquivalentTypeSet, ValueType};

/// Extracted array facts attached to an array base register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayRegInfo {
    pub head_segment_sym: Option<SymId>,
    pub head_segment_length_sym: Option<SymId>,
    pub length_sym: Option<SymId>,
    pub eliminated_lower_bound_check: bool,
    pub eliminated_upper_bound_check: bool,
}

/// Register operand
#[derive(Debug, Clone, PartialEq)]
pub struct RegOpnd {
    pub sym: SymId,
    pub ty: IrType,
    /// Value type the optimizer proved (or guessed) for this use
    pub value_type: ValueType,
    /// Introduced by the optimizer rather than the front end
    pub is_jit_optimized: bool,
    pub array: Option<ArrayRegInfo>,
}

impl RegOpnd {
    pub fn new(sym: SymId, ty: IrType) -> Self {
        RegOpnd {
            sym,
            ty,
            value_type: ValueType::UNINITIALIZED,
            is_jit_optimized: false,
            array: None,
        }
    }

    pub fn var(sym: SymId) -> Self {
        RegOpnd::new(sym, IrType::Var)
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn jit_optimized(mut self) -> Self {
        self.is_jit_optimized = true;
        self
    }
}

/// `base[index + offset]`
#[derive(Debug, Clone, PartialEq)]
pub struct IndirOpnd {
    pub base: RegOpnd,
    pub index: Option<RegOpnd>,
    pub offset: i32,
}

impl IndirOpnd {
    pub fn new(base: RegOpnd, index: Option<RegOpnd>, offset: i32) -> Self {
        IndirOpnd { base, index, offset }
    }
}

/// Slot placement of a property for one object type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub ty: TypeHandle,
    pub slot_index: u16,
    pub uses_aux_slot: bool,
}

/// Types an access expects its object to have
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedTypes {
    /// Exactly this type
    Mono(TypeHandle),
    /// Any type in the set; `mono` when the site only ever saw one type
    Equivalent { set: Rc<EquivalentTypeSet>, mono: bool },
    /// Observed types that do not share a slot layout
    Polymorphic(Rc<EquivalentTypeSet>),
}

/// Profile-derived object type specialization data of a field access
#[derive(Debug, Clone, PartialEq)]
pub struct ObjTypeSpecFldInfo {
    pub expected: ExpectedTypes,
    /// Type before a property-adding store
    pub initial_type: Option<TypeHandle>,
    /// Check a single type even though an equivalent set is known
    pub needs_mono_check: bool,
    pub uses_accessor: bool,
    pub is_root_non_configurable_load: bool,
    pub uses_fixed_value: bool,
    pub changes_object_layout: bool,
    pub slot_index: u16,
    pub uses_aux_slot: bool,
    /// Per-type layouts for depolymorphization
    pub slot_layouts: Vec<SlotLayout>,
}

impl ObjTypeSpecFldInfo {
    /// Monomorphic info for a load or store at `slot_index`
    pub fn mono(ty: TypeHandle, slot_index: u16) -> Self {
        ObjTypeSpecFldInfo {
            expected: ExpectedTypes::Mono(ty),
            initial_type: None,
            needs_mono_check: false,
            uses_accessor: false,
            is_root_non_configurable_load: false,
            uses_fixed_value: false,
            changes_object_layout: false,
            slot_index,
            uses_aux_slot: false,
            slot_layouts: Vec::new(),
        }
    }

    /// Equivalent-set info
    pub fn equivalent(set: Rc<EquivalentTypeSet>, slot_index: u16) -> Self {
        let mono = set.len() == 1;
        ObjTypeSpecFldInfo {
            expected: ExpectedTypes::Equivalent { set, mono },
            ..ObjTypeSpecFldInfo::mono(TypeHandle(0), slot_index)
        }
    }

    /// Non-equivalent polymorphic info with per-type layouts
    pub fn polymorphic(layouts: Vec<SlotLayout>) -> Self {
        let set = EquivalentTypeSet::shared(layouts.iter().map(|l| l.ty));
        ObjTypeSpecFldInfo {
            expected: ExpectedTypes::Polymorphic(set),
            slot_layouts: layouts,
            ..ObjTypeSpecFldInfo::mono(TypeHandle(0), u16::MAX)
        }
    }

    pub fn is_mono(&self) -> bool {
        match &self.expected {
            ExpectedTypes::Mono(_) => true,
            ExpectedTypes::Equivalent { mono, .. } => *mono,
            ExpectedTypes::Polymorphic(_) => false,
        }
    }

    pub fn is_poly(&self) -> bool {
        !self.is_mono()
    }

    pub fn equivalent_type_set(&self) -> Option<&Rc<EquivalentTypeSet>> {
        match &self.expected {
            ExpectedTypes::Mono(_) => None,
            ExpectedTypes::Equivalent { set, .. } | ExpectedTypes::Polymorphic(set) => Some(set),
        }
    }

    pub fn needs_depolymorphication(&self) -> bool {
        matches!(self.expected, ExpectedTypes::Polymorphic(_))
    }

    /// The single type a monomorphic check tests for
    pub fn ty(&self) -> Option<TypeHandle> {
        match &self.expected {
            ExpectedTypes::Mono(t) => Some(*t),
            ExpectedTypes::Equivalent { set, .. } | ExpectedTypes::Polymorphic(set) => set.first_type(),
        }
    }

    /// Slot layout for `ty`, if it matches the layout found so far
    pub fn try_depolymorphication(
        &self,
        ty: TypeHandle,
        previous: Option<(u16, bool)>,
    ) -> Option<(u16, bool)> {
        let layout = self.slot_layouts.iter().find(|l| l.ty == ty)?;
        match previous {
            Some((slot, aux)) if slot != layout.slot_index || aux != layout.uses_aux_slot => None,
            _ => Some((layout.slot_index, layout.uses_aux_slot)),
        }
    }
}

bitflags! {
    /// Type-check sequencing state of a property operand
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeCheckSeqFlags: u16 {
        const CANDIDATE = 1 << 0;
        const BEING_STORED = 1 << 1;
        const TYPE_AVAILABLE = 1 << 2;
        const TYPE_CHECKED = 1 << 3;
        const INITIAL_TYPE_CHECKED = 1 << 4;
        const TYPE_MISMATCH = 1 << 5;
        const TYPE_DEAD = 1 << 6;
        const TYPE_CHECK_REQUIRED = 1 << 7;
        const WRITE_GUARD_CHECKED = 1 << 8;
        const TYPE_CHECK_ONLY = 1 << 9;
    }
}

/// `object.property` operand
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySymOpnd {
    pub sym: SymId,
    pub obj_type_spec: Option<ObjTypeSpecFldInfo>,
    pub flags: TypeCheckSeqFlags,
    pub slot_index: u16,
    pub uses_aux_slot: bool,
    pub checked_type_set_index: Option<usize>,
    /// Write guards a type check here keeps live
    pub write_guards: Vec<SymId>,
    pub inline_cache_index: Option<u32>,
    pub is_jit_optimized: bool,
}

impl PropertySymOpnd {
    pub fn new(sym: SymId) -> Self {
        PropertySymOpnd {
            sym,
            obj_type_spec: None,
            flags: TypeCheckSeqFlags::empty(),
            slot_index: u16::MAX,
            uses_aux_slot: false,
            checked_type_set_index: None,
            write_guards: Vec::new(),
            inline_cache_index: None,
            is_jit_optimized: false,
        }
    }

    pub fn with_obj_type_spec(mut self, info: ObjTypeSpecFldInfo) -> Self {
        self.slot_index = info.slot_index;
        self.uses_aux_slot = info.uses_aux_slot;
        self.obj_type_spec = Some(info);
        self
    }

    pub fn is_type_check_seq_candidate(&self) -> bool {
        self.flags.contains(TypeCheckSeqFlags::CANDIDATE)
    }

    pub fn set_flag(&mut self, flag: TypeCheckSeqFlags, value: bool) {
        self.flags.set(flag, value);
    }

    pub fn has_flag(&self, flag: TypeCheckSeqFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn has_equivalent_type_set(&self) -> bool {
        self.obj_type_spec.as_ref().is_some_and(|i| i.equivalent_type_set().is_some())
    }

    pub fn needs_mono_check(&self) -> bool {
        self.obj_type_spec.as_ref().is_some_and(|i| i.needs_mono_check)
    }

    pub fn is_mono(&self) -> bool {
        self.obj_type_spec.as_ref().is_some_and(|i| i.is_mono())
    }

    pub fn initial_type(&self) -> Option<TypeHandle> {
        self.obj_type_spec.as_ref().and_then(|i| i.initial_type)
    }

    pub fn expected_type(&self) -> Option<TypeHandle> {
        self.obj_type_spec.as_ref().and_then(|i| i.ty())
    }

    pub fn changes_object_layout(&self) -> bool {
        self.obj_type_spec.as_ref().is_some_and(|i| i.changes_object_layout)
    }

    /// Whether the access goes through a type-checked direct slot
    pub fn is_type_checked(&self) -> bool {
        self.flags.contains(TypeCheckSeqFlags::TYPE_CHECKED)
    }
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Opnd {
    Reg(RegOpnd),
    Prop(PropertySymOpnd),
    Indir(IndirOpnd),
    IntConst(i32),
    FloatConst(f64),
    BoolConst(bool),
}

impl Opnd {
    pub fn reg(sym: SymId) -> Opnd {
        Opnd::Reg(RegOpnd::var(sym))
    }

    pub fn as_reg(&self) -> Option<&RegOpnd> {
        match self {
            Opnd::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_reg_mut(&mut self) -> Option<&mut RegOpnd> {
        match self {
            Opnd::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_prop(&self) -> Option<&PropertySymOpnd> {
        match self {
            Opnd::Prop(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_prop_mut(&mut self) -> Option<&mut PropertySymOpnd> {
        match self {
            Opnd::Prop(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_indir(&self) -> Option<&IndirOpnd> {
        match self {
            Opnd::Indir(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_indir_mut(&mut self) -> Option<&mut IndirOpnd> {
        match self {
            Opnd::Indir(i) => Some(i),
            _ => None,
        }
    }

    /// Sym of a register or property operand
    pub fn sym(&self) -> Option<SymId> {
        match self {
            Opnd::Reg(r) => Some(r.sym),
            Opnd::Prop(p) => Some(p.sym),
            _ => None,
        }
    }

    pub fn int_const(&self) -> Option<i32> {
        match self {
            Opnd::IntConst(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether the operand is a tagged var
    pub fn is_var(&self) -> bool {
        match self {
            Opnd::Reg(r) => r.ty.is_var(),
            Opnd::Prop(_) | Opnd::Indir(_) => true,
            _ => false,
        }
    }

    /// Stack syms read when the operand is used as a source
    pub fn used_stack_syms(&self) -> Vec<SymId> {
        match self {
            Opnd::Reg(r) => vec![r.sym],
            Opnd::Indir(i) => {
                let mut syms = vec![i.base.sym];
                if let Some(index) = &i.index {
                    syms.push(index.sym);
                }
                syms
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obj_type_spec_expected_types() {
        let mono = ObjTypeSpecFldInfo::mono(TypeHandle(0x10), 2);
        assert!(mono.is_mono());
        assert!(mono.equivalent_type_set().is_none());
        assert_eq!(mono.ty(), Some(TypeHandle(0x10)));

        let set = EquivalentTypeSet::shared([TypeHandle(0x20), TypeHandle(0x10)]);
        let equiv = ObjTypeSpecFldInfo::equivalent(set, 2);
        assert!(equiv.is_poly());
        assert_eq!(equiv.ty(), Some(TypeHandle(0x10)));
        assert!(!equiv.needs_depolymorphication());
    }

    #[test]
    fn test_depolymorphication_requires_agreeing_layouts() {
        let info = ObjTypeSpecFldInfo::polymorphic(vec![
            SlotLayout { ty: TypeHandle(1), slot_index: 3, uses_aux_slot: false },
            SlotLayout { ty: TypeHandle(2), slot_index: 3, uses_aux_slot: false },
            SlotLayout { ty: TypeHandle(3), slot_index: 4, uses_aux_slot: false },
        ]);
        let first = info.try_depolymorphication(TypeHandle(1), None);
        assert_eq!(first, Some((3, false)));
        assert_eq!(info.try_depolymorphication(TypeHandle(2), first), Some((3, false)));
        assert_eq!(info.try_depolymorphication(TypeHandle(3), first), None);
        assert_eq!(info.try_depolymorphication(TypeHandle(9), None), None);
    }

    #[test]
    fn test_indir_used_syms() {
        let opnd = Opnd::Indir(IndirOpnd::new(
            RegOpnd::var(SymId(1)),
            Some(RegOpnd::new(SymId(2), IrType::Int32)),
            0,
        ));
        assert_eq!(opnd.used_stack_syms(), vec![SymId(1), SymId(2)]);
        assert!(opnd.is_var());
    }
}
