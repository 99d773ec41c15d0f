//! Equivalent object type sets

use std::rc::Rc;

use crate::host::TypeHandle;

/// Small closed set of object types sharing a slot layout for one access
///
/// Kept sorted and deduplicated so identity checks are a slice compare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EquivalentTypeSet {
    types: Vec<TypeHandle>,
}

impl EquivalentTypeSet {
    pub fn new(types: impl IntoIterator<Item = TypeHandle>) -> Self {
        let mut types: Vec<TypeHandle> = types.into_iter().collect();
        types.sort();
        types.dedup();
        EquivalentTypeSet { types }
    }

    /// Shared handle to a new set
    pub fn shared(types: impl IntoIterator<Item = TypeHandle>) -> Rc<Self> {
        Rc::new(Self::new(types))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn types(&self) -> &[TypeHandle] {
        &self.types
    }

    pub fn first_type(&self) -> Option<TypeHandle> {
        self.types.first().copied()
    }

    pub fn contains(&self, ty: TypeHandle) -> bool {
        self.types.binary_search(&ty).is_ok()
    }

    /// Position of `ty` in the sorted set
    pub fn index_of(&self, ty: TypeHandle) -> Option<usize> {
        self.types.binary_search(&ty).ok()
    }

    /// Whether every type of `self` is in `other`
    pub fn is_subset_of(&self, other: &EquivalentTypeSet) -> bool {
        self.types.iter().all(|t| other.contains(*t))
    }

    /// Same types, in the same order
    pub fn are_identical(left: &EquivalentTypeSet, right: &EquivalentTypeSet) -> bool {
        left.types == right.types
    }
}

impl std::fmt::Display for EquivalentTypeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, t) in self.types.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", t)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(types: &[usize]) -> EquivalentTypeSet {
        EquivalentTypeSet::new(types.iter().map(|&t| TypeHandle(t)))
    }

    #[test]
    fn test_sorted_and_deduplicated() {
        let s = set(&[30, 10, 20, 10]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.index_of(TypeHandle(20)), Some(1));
        assert!(EquivalentTypeSet::are_identical(&s, &set(&[10, 20, 30])));
    }

    #[test]
    fn test_subset() {
        assert!(set(&[10, 30]).is_subset_of(&set(&[10, 20, 30])));
        assert!(!set(&[10, 40]).is_subset_of(&set(&[10, 20, 30])));
    }
}
