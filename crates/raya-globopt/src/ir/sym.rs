//! Symbols and the per-function symbol table
//!
//! A symbol names a storage location for the whole compilation. Stack syms
//! are virtual registers; a var stack sym may grow type-specialized
//! equivalents (int32, float64, simd128) that alias the same logical value.
//! Property syms name `object.property` (or a slot) and are the unit of
//! field liveness.

use rustc_hash::FxHashMap;

use super::bitset::SymSet;
use super::types::IrType;

/// Unique symbol identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymId(pub u32);

impl std::fmt::Display for SymId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Runtime property identifier (resolved by the host)
pub type PropertyId = u32;

/// Well-known property ids the optimizer treats specially
pub mod property_ids {
    use super::PropertyId;

    pub const LENGTH: PropertyId = 1;
    pub const VALUE_OF: PropertyId = 2;
    pub const TO_STRING: PropertyId = 3;
    pub const ARGUMENTS: PropertyId = 4;
    pub const CALLER: PropertyId = 5;
    /// Pseudo property naming an object's aux slot array
    pub const AUX_SLOTS: PropertyId = 6;
    /// Written by regex and string builtins
    pub const LAST_INDEX: PropertyId = 7;
    pub const INDEX: PropertyId = 8;
    pub const INPUT: PropertyId = 9;
    /// First id available to user properties
    pub const FIRST_USER: PropertyId = 16;
}

/// What a property sym addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Named data property
    Data,
    /// Closure/scope slot
    Slot,
    /// Local (stack) scope slot
    LocalSlot,
    /// Write guard tracking whether the property was written in this function
    WriteGuard,
}

/// Object-related symbols hanging off a stack sym
#[derive(Debug, Clone, Default)]
pub struct ObjectSymInfo {
    /// Sym tracking the object's type (shape) for type-check sequencing
    pub type_sym: Option<SymId>,
    /// All property syms rooted at this object, write guards included
    pub property_syms: Vec<SymId>,
}

/// Virtual register symbol
#[derive(Debug, Clone)]
pub struct StackSym {
    pub id: SymId,
    pub ty: IrType,
    /// For a type-specialized sym, the var sym it aliases
    pub var_equiv: Option<SymId>,
    pub int32_equiv: Option<SymId>,
    pub float64_equiv: Option<SymId>,
    pub simd128_equiv: Option<SymId>,
    /// Interpreter register backing this sym, if any (needed by bailouts)
    pub byte_code_reg_slot: Option<u32>,
    /// Defined exactly once (never killed by a redefinition)
    pub is_single_def: bool,
    /// Holds a bytecode constant; its value lives in the function-wide table
    pub is_bytecode_constant: bool,
    /// This sym is an object-type sym (only used by type-check sequencing)
    pub is_object_type_sym: bool,
    pub object_info: Option<ObjectSymInfo>,
}

impl StackSym {
    fn new(id: SymId, ty: IrType) -> Self {
        StackSym {
            id,
            ty,
            var_equiv: None,
            int32_equiv: None,
            float64_equiv: None,
            simd128_equiv: None,
            byte_code_reg_slot: None,
            is_single_def: false,
            is_bytecode_constant: false,
            is_object_type_sym: false,
            object_info: None,
        }
    }

    /// Whether this sym is a specialized alias of a var sym
    pub fn is_type_spec(&self) -> bool {
        self.var_equiv.is_some()
    }

    /// Whether this sym roots any property syms or a type sym
    pub fn has_object_info(&self) -> bool {
        self.object_info.is_some()
    }
}

/// `object.property` symbol
#[derive(Debug, Clone)]
pub struct PropertySym {
    pub id: SymId,
    pub object_sym: SymId,
    pub property_id: PropertyId,
    pub kind: FieldKind,
    pub write_guard_sym: Option<SymId>,
}

/// A symbol table entry
#[derive(Debug, Clone)]
pub enum Sym {
    Stack(StackSym),
    Property(PropertySym),
}

impl Sym {
    /// Symbol id
    pub fn id(&self) -> SymId {
        match self {
            Sym::Stack(s) => s.id,
            Sym::Property(p) => p.id,
        }
    }
}

/// Owner of every symbol in one function's compilation
#[derive(Debug, Default)]
pub struct SymTable {
    syms: Vec<Sym>,
    property_lookup: FxHashMap<(SymId, PropertyId, FieldKind), SymId>,
    by_property_id: FxHashMap<PropertyId, SymSet>,
    slot_syms: SymSet,
    object_type_syms: SymSet,
}

impl SymTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of symbols allocated so far
    pub fn len(&self) -> usize {
        self.syms.len()
    }

    /// Whether no symbol has been allocated
    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    fn next_id(&self) -> SymId {
        SymId(self.syms.len() as u32)
    }

    /// Allocate a fresh stack sym of the given type
    pub fn new_stack_sym(&mut self, ty: IrType) -> SymId {
        let id = self.next_id();
        self.syms.push(Sym::Stack(StackSym::new(id, ty)));
        id
    }

    /// Allocate a var sym backed by an interpreter register
    pub fn new_bytecode_sym(&mut self, slot: u32) -> SymId {
        let id = self.new_stack_sym(IrType::Var);
        if let Some(sym) = self.stack_mut(id) {
            sym.byte_code_reg_slot = Some(slot);
        }
        id
    }

    /// Allocate a sym holding a bytecode constant
    pub fn new_constant_sym(&mut self, slot: u32) -> SymId {
        let id = self.new_bytecode_sym(slot);
        if let Some(sym) = self.stack_mut(id) {
            sym.is_bytecode_constant = true;
            sym.is_single_def = true;
        }
        id
    }

    /// Look up any symbol
    pub fn get(&self, id: SymId) -> Option<&Sym> {
        self.syms.get(id.0 as usize)
    }

    /// Look up a stack sym
    pub fn stack(&self, id: SymId) -> Option<&StackSym> {
        match self.syms.get(id.0 as usize) {
            Some(Sym::Stack(s)) => Some(s),
            _ => None,
        }
    }

    /// Look up a stack sym mutably
    pub fn stack_mut(&mut self, id: SymId) -> Option<&mut StackSym> {
        match self.syms.get_mut(id.0 as usize) {
            Some(Sym::Stack(s)) => Some(s),
            _ => None,
        }
    }

    /// Look up a property sym
    pub fn property(&self, id: SymId) -> Option<&PropertySym> {
        match self.syms.get(id.0 as usize) {
            Some(Sym::Property(p)) => Some(p),
            _ => None,
        }
    }

    /// Whether `id` names a property sym
    pub fn is_property(&self, id: SymId) -> bool {
        matches!(self.get(id), Some(Sym::Property(_)))
    }

    /// Declared type of a stack sym (var for anything else)
    pub fn ty(&self, id: SymId) -> IrType {
        self.stack(id).map(|s| s.ty).unwrap_or(IrType::Var)
    }

    /// Whether `id` is a type-specialized alias
    pub fn is_type_spec(&self, id: SymId) -> bool {
        self.stack(id).is_some_and(|s| s.is_type_spec())
    }

    /// Var sym for `id` (itself if already var)
    pub fn var_equiv(&self, id: SymId) -> SymId {
        self.stack(id).and_then(|s| s.var_equiv).unwrap_or(id)
    }

    /// Whether the sym is backed by an interpreter register
    pub fn has_byte_code_reg_slot(&self, id: SymId) -> bool {
        self.stack(id).is_some_and(|s| s.byte_code_reg_slot.is_some())
    }

    /// Whether the sym holds a bytecode constant
    pub fn is_bytecode_constant(&self, id: SymId) -> bool {
        self.stack(id).is_some_and(|s| s.is_bytecode_constant)
    }

    /// Mark a sym as defined exactly once
    pub fn set_single_def(&mut self, id: SymId) {
        if let Some(sym) = self.stack_mut(id) {
            sym.is_single_def = true;
        }
    }

    fn ensure_equiv(&mut self, var: SymId, ty: IrType) -> SymId {
        let var = self.var_equiv(var);
        let existing = self.stack(var).and_then(|s| match ty {
            IrType::Int32 | IrType::Uint32 => s.int32_equiv,
            IrType::Float64 => s.float64_equiv,
            IrType::Simd128 => s.simd128_equiv,
            IrType::Var => Some(var),
        });
        if let Some(existing) = existing {
            return existing;
        }

        let slot = self.stack(var).and_then(|s| s.byte_code_reg_slot);
        let id = self.new_stack_sym(ty);
        if let Some(sym) = self.stack_mut(id) {
            sym.var_equiv = Some(var);
            sym.byte_code_reg_slot = slot;
        }
        if let Some(sym) = self.stack_mut(var) {
            match ty {
                IrType::Int32 | IrType::Uint32 => sym.int32_equiv = Some(id),
                IrType::Float64 => sym.float64_equiv = Some(id),
                IrType::Simd128 => sym.simd128_equiv = Some(id),
                IrType::Var => {}
            }
        }
        id
    }

    /// Int32 alias of a var sym, created on first use
    pub fn ensure_int32_equiv(&mut self, var: SymId) -> SymId {
        self.ensure_equiv(var, IrType::Int32)
    }

    /// Float64 alias of a var sym, created on first use
    pub fn ensure_float64_equiv(&mut self, var: SymId) -> SymId {
        self.ensure_equiv(var, IrType::Float64)
    }

    /// Simd128 alias of a var sym, created on first use
    pub fn ensure_simd128_equiv(&mut self, var: SymId) -> SymId {
        self.ensure_equiv(var, IrType::Simd128)
    }

    /// Existing int32 alias, if any
    pub fn int32_equiv(&self, var: SymId) -> Option<SymId> {
        self.stack(self.var_equiv(var)).and_then(|s| s.int32_equiv)
    }

    /// Existing float64 alias, if any
    pub fn float64_equiv(&self, var: SymId) -> Option<SymId> {
        self.stack(self.var_equiv(var)).and_then(|s| s.float64_equiv)
    }

    /// Find or create the property sym for `object.property_id`
    pub fn find_or_create_property_sym(
        &mut self,
        object_sym: SymId,
        property_id: PropertyId,
        kind: FieldKind,
    ) -> SymId {
        let object_sym = self.var_equiv(object_sym);
        if let Some(&id) = self.property_lookup.get(&(object_sym, property_id, kind)) {
            return id;
        }

        let id = self.next_id();
        self.syms.push(Sym::Property(PropertySym {
            id,
            object_sym,
            property_id,
            kind,
            write_guard_sym: None,
        }));
        self.property_lookup.insert((object_sym, property_id, kind), id);
        if kind != FieldKind::WriteGuard {
            self.by_property_id.entry(property_id).or_default().set(id);
        }
        if matches!(kind, FieldKind::Slot | FieldKind::LocalSlot) {
            self.slot_syms.set(id);
        }
        if let Some(obj) = self.stack_mut(object_sym) {
            obj.object_info.get_or_insert_with(ObjectSymInfo::default).property_syms.push(id);
        }
        id
    }

    /// Existing property sym, if any
    pub fn find_property_sym(
        &self,
        object_sym: SymId,
        property_id: PropertyId,
        kind: FieldKind,
    ) -> Option<SymId> {
        self.property_lookup
            .get(&(self.var_equiv(object_sym), property_id, kind))
            .copied()
    }

    /// Every property sym naming `property_id`, across all objects
    pub fn property_equiv_set(&self, property_id: PropertyId) -> Option<&SymSet> {
        self.by_property_id.get(&property_id)
    }

    /// Every slot property sym
    pub fn slot_syms(&self) -> &SymSet {
        &self.slot_syms
    }

    /// Every object-type sym created so far
    pub fn object_type_syms(&self) -> &SymSet {
        &self.object_type_syms
    }

    /// Object-type sym of an object sym, created on first use
    pub fn ensure_object_type_sym(&mut self, object_sym: SymId) -> SymId {
        let object_sym = self.var_equiv(object_sym);
        if let Some(type_sym) = self.object_type_sym(object_sym) {
            return type_sym;
        }
        let type_sym = self.new_stack_sym(IrType::Var);
        if let Some(sym) = self.stack_mut(type_sym) {
            sym.is_object_type_sym = true;
        }
        self.object_type_syms.set(type_sym);
        if let Some(obj) = self.stack_mut(object_sym) {
            obj.object_info.get_or_insert_with(ObjectSymInfo::default).type_sym = Some(type_sym);
        }
        type_sym
    }

    /// Existing object-type sym of an object sym
    pub fn object_type_sym(&self, object_sym: SymId) -> Option<SymId> {
        self.stack(self.var_equiv(object_sym))
            .and_then(|s| s.object_info.as_ref())
            .and_then(|info| info.type_sym)
    }

    /// Write-guard sym of a property sym, created on first use
    pub fn ensure_write_guard_sym(&mut self, property_sym: SymId) -> Option<SymId> {
        let (object_sym, property_id, existing) = {
            let prop = self.property(property_sym)?;
            (prop.object_sym, prop.property_id, prop.write_guard_sym)
        };
        if existing.is_some() {
            return existing;
        }
        let guard = self.find_or_create_property_sym(object_sym, property_id, FieldKind::WriteGuard);
        if let Some(Sym::Property(prop)) = self.syms.get_mut(property_sym.0 as usize) {
            prop.write_guard_sym = Some(guard);
        }
        Some(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_spec_equivs_alias_var() {
        let mut syms = SymTable::new();
        let var = syms.new_bytecode_sym(3);
        let i = syms.ensure_int32_equiv(var);
        let f = syms.ensure_float64_equiv(var);
        assert_ne!(i, f);
        assert_eq!(syms.var_equiv(i), var);
        assert_eq!(syms.var_equiv(f), var);
        assert_eq!(syms.ensure_int32_equiv(var), i);
        assert_eq!(syms.ensure_int32_equiv(i), i);
        assert!(syms.is_type_spec(i));
        assert!(syms.has_byte_code_reg_slot(i));
    }

    #[test]
    fn test_property_syms_are_interned_and_grouped() {
        let mut syms = SymTable::new();
        let a = syms.new_stack_sym(IrType::Var);
        let b = syms.new_stack_sym(IrType::Var);
        let ax = syms.find_or_create_property_sym(a, 20, FieldKind::Data);
        let bx = syms.find_or_create_property_sym(b, 20, FieldKind::Data);
        assert_eq!(syms.find_or_create_property_sym(a, 20, FieldKind::Data), ax);
        let equiv = syms.property_equiv_set(20).unwrap();
        assert!(equiv.test(ax) && equiv.test(bx));
        let info = syms.stack(a).unwrap().object_info.as_ref().unwrap();
        assert_eq!(info.property_syms, vec![ax]);
    }

    #[test]
    fn test_write_guard_joins_object_property_list() {
        let mut syms = SymTable::new();
        let o = syms.new_stack_sym(IrType::Var);
        let ox = syms.find_or_create_property_sym(o, 20, FieldKind::Data);
        let guard = syms.ensure_write_guard_sym(ox).unwrap();
        assert_eq!(syms.ensure_write_guard_sym(ox), Some(guard));
        let info = syms.stack(o).unwrap().object_info.as_ref().unwrap();
        assert!(info.property_syms.contains(&guard));
        assert!(!syms.property_equiv_set(20).unwrap().test(guard));
    }

    #[test]
    fn test_object_type_sym() {
        let mut syms = SymTable::new();
        let o = syms.new_stack_sym(IrType::Var);
        assert_eq!(syms.object_type_sym(o), None);
        let t = syms.ensure_object_type_sym(o);
        assert_eq!(syms.object_type_sym(o), Some(t));
        assert!(syms.stack(t).unwrap().is_object_type_sym);
    }
}
