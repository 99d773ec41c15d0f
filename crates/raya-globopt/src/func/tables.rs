//! Function-wide tables
//!
//! Values of bytecode constants, and the type/guard/cache bookkeeping the
//! optimizer hands to the code emitter. Most tables stay unallocated for
//! functions that never need them.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::host::TypeHandle;
use crate::ir::sym::{PropertyId, SymId};
use crate::value::{EquivalentTypeSet, Value};

/// Values of syms holding bytecode constants
///
/// Constants are single-def and hold the same value everywhere, so they are
/// tracked once per function instead of per block.
#[derive(Debug, Clone, Default)]
pub struct ConstantTable {
    values: FxHashMap<SymId, Value>,
}

impl ConstantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sym: SymId) -> Option<&Value> {
        self.values.get(&sym)
    }

    pub fn set(&mut self, sym: SymId, value: Value) {
        self.values.insert(sym, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Identifier of a guard in [`GuardTables`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuardId(pub u32);

/// Runtime-invalidated flag the emitted code checks before relying on a
/// property staying as it was at compile time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyGuard {
    pub id: GuardId,
    pub property_id: PropertyId,
    /// Guards a single type rather than a property
    pub single_type: Option<TypeHandle>,
}

/// Guard over a set of equivalent types
#[derive(Debug, Clone)]
pub struct EquivalentTypeGuard {
    pub id: GuardId,
    pub types: std::rc::Rc<EquivalentTypeSet>,
}

/// Constructor cache snapshot for one profiled `new` site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtorCache {
    /// Type of the objects the constructor produces
    pub ty: TypeHandle,
    /// Properties the constructor is known to add, in order
    pub guarded_properties: Vec<PropertyId>,
    /// The constructor body may be skipped by the emitted code
    pub skip_default_new_object: bool,
}

/// Lazily allocated type and guard tables
#[derive(Debug, Default)]
pub struct GuardTables {
    pinned_type_refs: Option<FxHashSet<TypeHandle>>,
    ctor_caches: Option<FxHashMap<u16, CtorCache>>,
    property_guards: Option<FxHashMap<PropertyId, GuardId>>,
    guards: Vec<PropertyGuard>,
    guards_by_property_id: Option<FxHashMap<PropertyId, FxHashSet<GuardId>>>,
    ctor_caches_by_property_id: Option<FxHashMap<PropertyId, FxHashSet<u16>>>,
    single_type_guards: Option<FxHashMap<TypeHandle, GuardId>>,
    equivalent_type_guards: Option<Vec<EquivalentTypeGuard>>,
    properties_written: Option<FxHashSet<PropertyId>>,
    any_property_may_be_written: bool,
}

impl GuardTables {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Types =====

    /// Keep `ty` alive for as long as the compiled code
    pub fn pin_type_ref(&mut self, ty: TypeHandle) {
        self.pinned_type_refs.get_or_insert_with(FxHashSet::default).insert(ty);
    }

    pub fn pinned_type_refs(&self) -> impl Iterator<Item = TypeHandle> + '_ {
        self.pinned_type_refs.iter().flatten().copied()
    }

    // ===== Constructor caches =====

    pub fn add_ctor_cache(&mut self, profile_id: u16, cache: CtorCache) {
        self.pin_type_ref(cache.ty);
        self.ctor_caches.get_or_insert_with(FxHashMap::default).insert(profile_id, cache);
    }

    pub fn ctor_cache(&self, profile_id: u16) -> Option<&CtorCache> {
        self.ctor_caches.as_ref()?.get(&profile_id)
    }

    /// Invalidate the cache at `profile_id` when `property_id` changes
    pub fn link_ctor_cache_to_property_id(&mut self, property_id: PropertyId, profile_id: u16) {
        self.ctor_caches_by_property_id
            .get_or_insert_with(FxHashMap::default)
            .entry(property_id)
            .or_default()
            .insert(profile_id);
    }

    pub fn ctor_caches_for_property(&self, property_id: PropertyId) -> Vec<u16> {
        let mut ids: Vec<u16> = self
            .ctor_caches_by_property_id
            .as_ref()
            .and_then(|m| m.get(&property_id))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    // ===== Guards =====

    fn new_guard(&mut self, property_id: PropertyId, single_type: Option<TypeHandle>) -> GuardId {
        let id = GuardId(self.guards.len() as u32);
        self.guards.push(PropertyGuard {
            id,
            property_id,
            single_type,
        });
        id
    }

    pub fn guard(&self, id: GuardId) -> Option<&PropertyGuard> {
        self.guards.get(id.0 as usize)
    }

    /// Guard on `property_id`, created on first use
    pub fn get_or_create_property_guard(&mut self, property_id: PropertyId) -> GuardId {
        if let Some(id) = self.property_guards.as_ref().and_then(|m| m.get(&property_id)) {
            return *id;
        }
        let id = self.new_guard(property_id, None);
        self.property_guards.get_or_insert_with(FxHashMap::default).insert(property_id, id);
        self.link_guard_to_property_id(property_id, id);
        id
    }

    /// Invalidate `guard` when `property_id` changes
    pub fn link_guard_to_property_id(&mut self, property_id: PropertyId, guard: GuardId) {
        self.guards_by_property_id
            .get_or_insert_with(FxHashMap::default)
            .entry(property_id)
            .or_default()
            .insert(guard);
    }

    pub fn guards_for_property(&self, property_id: PropertyId) -> Vec<GuardId> {
        let mut ids: Vec<GuardId> = self
            .guards_by_property_id
            .as_ref()
            .and_then(|m| m.get(&property_id))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Guard that fails once objects of `ty` change shape
    pub fn get_or_create_single_type_guard(&mut self, ty: TypeHandle) -> GuardId {
        if let Some(id) = self.single_type_guards.as_ref().and_then(|m| m.get(&ty)) {
            return *id;
        }
        self.pin_type_ref(ty);
        let id = self.new_guard(0, Some(ty));
        self.single_type_guards.get_or_insert_with(FxHashMap::default).insert(ty, id);
        id
    }

    pub fn create_equivalent_type_guard(&mut self, types: std::rc::Rc<EquivalentTypeSet>) -> GuardId {
        for ty in types.types() {
            self.pin_type_ref(*ty);
        }
        let id = self.new_guard(0, None);
        self.equivalent_type_guards
            .get_or_insert_with(Vec::new)
            .push(EquivalentTypeGuard { id, types });
        id
    }

    pub fn equivalent_type_guards(&self) -> &[EquivalentTypeGuard] {
        self.equivalent_type_guards.as_deref().unwrap_or(&[])
    }

    // ===== Property writes =====

    pub fn add_property_written(&mut self, property_id: PropertyId) {
        self.properties_written.get_or_insert_with(FxHashSet::default).insert(property_id);
    }

    pub fn is_property_written(&self, property_id: PropertyId) -> bool {
        self.any_property_may_be_written
            || self
                .properties_written
                .as_ref()
                .is_some_and(|s| s.contains(&property_id))
    }

    pub fn set_any_property_may_be_written(&mut self) {
        self.any_property_may_be_written = true;
    }

    pub fn any_property_may_be_written(&self) -> bool {
        self.any_property_may_be_written
    }

    /// Whether no table was ever allocated
    pub fn is_empty(&self) -> bool {
        self.pinned_type_refs.is_none()
            && self.ctor_caches.is_none()
            && self.guards.is_empty()
            && self.properties_written.is_none()
            && !self.any_property_may_be_written
    }
}

/// Frame layout of locals the emitted code needs beyond registers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackLayout {
    local_stack_height: u32,
}

impl StackLayout {
    /// Reserve `size` bytes aligned to `align`, returning the slot offset
    pub fn stack_allocate(&mut self, size: u32, align: u32) -> u32 {
        let align = align.max(1);
        let offset = self.local_stack_height.div_ceil(align) * align;
        self.local_stack_height = offset + size;
        offset
    }

    pub fn local_stack_height(&self) -> u32 {
        self.local_stack_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ValueInfo, ValueNumber};

    #[test]
    fn test_tables_start_unallocated() {
        let mut tables = GuardTables::new();
        assert!(tables.is_empty());
        assert!(!tables.is_property_written(20));
        tables.add_property_written(20);
        assert!(!tables.is_empty());
        assert!(tables.is_property_written(20));
        assert!(!tables.is_property_written(21));
        tables.set_any_property_may_be_written();
        assert!(tables.is_property_written(21));
    }

    #[test]
    fn test_property_guard_is_interned() {
        let mut tables = GuardTables::new();
        let a = tables.get_or_create_property_guard(30);
        assert_eq!(tables.get_or_create_property_guard(30), a);
        let b = tables.get_or_create_property_guard(31);
        assert_ne!(a, b);
        assert_eq!(tables.guards_for_property(30), vec![a]);
        tables.link_guard_to_property_id(30, b);
        assert_eq!(tables.guards_for_property(30), vec![a, b]);
    }

    #[test]
    fn test_single_type_guard_pins_type() {
        let mut tables = GuardTables::new();
        let guard = tables.get_or_create_single_type_guard(TypeHandle(0x40));
        assert_eq!(tables.get_or_create_single_type_guard(TypeHandle(0x40)), guard);
        assert_eq!(tables.guard(guard).unwrap().single_type, Some(TypeHandle(0x40)));
        assert_eq!(tables.pinned_type_refs().collect::<Vec<_>>(), vec![TypeHandle(0x40)]);
    }

    #[test]
    fn test_ctor_cache_links() {
        let mut tables = GuardTables::new();
        tables.add_ctor_cache(
            3,
            CtorCache {
                ty: TypeHandle(0x80),
                guarded_properties: vec![20],
                skip_default_new_object: false,
            },
        );
        tables.link_ctor_cache_to_property_id(20, 3);
        assert_eq!(tables.ctor_cache(3).unwrap().ty, TypeHandle(0x80));
        assert!(tables.ctor_cache(4).is_none());
        assert_eq!(tables.ctor_caches_for_property(20), vec![3]);
    }

    #[test]
    fn test_stack_allocate_aligns() {
        let mut stack = StackLayout::default();
        assert_eq!(stack.stack_allocate(4, 4), 0);
        assert_eq!(stack.stack_allocate(8, 8), 8);
        assert_eq!(stack.local_stack_height(), 16);
        assert_eq!(stack.stack_allocate(1, 0), 16);
    }

    #[test]
    fn test_constant_table() {
        let mut constants = ConstantTable::new();
        assert!(constants.is_empty());
        let value = Value::new(ValueNumber(4), ValueInfo::new_int_constant(9));
        constants.set(SymId(2), value.clone());
        assert_eq!(constants.get(SymId(2)), Some(&value));
        assert_eq!(constants.len(), 1);
    }
}
