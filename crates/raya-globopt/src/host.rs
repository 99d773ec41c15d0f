//! Read-only view of the host runtime's type information
//!
//! Object types are identified by opaque address handles. The optimizer
//! never dereferences a handle; whatever it needs to know about a type is
//! read through [`HostTypeInfo`], which may be backed by another process.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Opaque address of a runtime object type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(pub usize);

impl std::fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "type@{:#x}", self.0)
    }
}

/// What the optimizer may ask about a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_id: u32,
    /// Dynamic (shape-changing) object type
    pub is_dynamic: bool,
    /// Inline slots live in the object header
    pub object_header_inlined: bool,
}

/// Accessor for host type information
pub trait HostTypeInfo: Send + Sync {
    /// Look up a type by handle
    fn type_info(&self, handle: TypeHandle) -> Option<TypeInfo>;

    /// Whether the type keeps its inline slots in the object header
    fn is_object_header_inlined(&self, handle: TypeHandle) -> bool {
        self.type_info(handle).is_some_and(|info| info.object_header_inlined)
    }
}

/// Process-wide type table
///
/// Written only while the host publishes types; every compilation thread
/// reads it concurrently afterwards.
#[derive(Debug, Default)]
pub struct StaticTypeTable {
    types: RwLock<FxHashMap<TypeHandle, TypeInfo>>,
}

impl StaticTypeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shareable empty table
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Publish a type
    pub fn publish(&self, handle: TypeHandle, info: TypeInfo) {
        self.types.write().insert(handle, info);
    }

    /// Number of published types
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Whether no type has been published
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl HostTypeInfo for StaticTypeTable {
    fn type_info(&self, handle: TypeHandle) -> Option<TypeInfo> {
        self.types.read().get(&handle).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_read() {
        let table = StaticTypeTable::shared();
        let handle = TypeHandle(0x1000);
        assert!(table.type_info(handle).is_none());
        table.publish(
            handle,
            TypeInfo {
                type_id: 7,
                is_dynamic: true,
                object_header_inlined: true,
            },
        );
        assert_eq!(table.len(), 1);
        assert!(table.is_object_header_inlined(handle));
        assert!(!table.is_object_header_inlined(TypeHandle(0x2000)));
    }

    #[test]
    fn test_concurrent_readers() {
        let table = StaticTypeTable::shared();
        for i in 0..16 {
            table.publish(
                TypeHandle(i),
                TypeInfo {
                    type_id: i as u32,
                    is_dynamic: false,
                    object_header_inlined: i % 2 == 0,
                },
            );
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || (0..16).filter(|&i| table.is_object_header_inlined(TypeHandle(i))).count())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 8);
        }
    }
}
