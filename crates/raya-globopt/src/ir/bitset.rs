//! Dense bit set over symbol ids
//!
//! Used for every liveness vector and kill summary. Equality ignores
//! trailing zero words so sets built along different paths compare equal.

use super::sym::SymId;

const WORD_BITS: usize = 64;

/// Set of symbol ids backed by a growable bit vector
#[derive(Debug, Clone, Default)]
pub struct SymSet {
    words: Vec<u64>,
}

impl SymSet {
    /// Create an empty set
    pub fn new() -> Self {
        SymSet { words: Vec::new() }
    }

    fn split(id: SymId) -> (usize, u64) {
        let idx = id.0 as usize;
        (idx / WORD_BITS, 1u64 << (idx % WORD_BITS))
    }

    /// Add a symbol
    pub fn set(&mut self, id: SymId) {
        let (word, mask) = Self::split(id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= mask;
    }

    /// Remove a symbol
    pub fn clear(&mut self, id: SymId) {
        let (word, mask) = Self::split(id);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !mask;
        }
    }

    /// Test membership
    pub fn test(&self, id: SymId) -> bool {
        let (word, mask) = Self::split(id);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }

    /// Add a symbol, returning whether it was already present
    pub fn test_and_set(&mut self, id: SymId) -> bool {
        let was_set = self.test(id);
        self.set(id);
        was_set
    }

    /// Remove every symbol
    pub fn clear_all(&mut self) {
        self.words.clear();
    }

    /// Whether the set has no members
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of members
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// In-place union
    pub fn or(&mut self, other: &SymSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
        }
    }

    /// In-place intersection
    pub fn and(&mut self, other: &SymSet) {
        for (i, w) in self.words.iter_mut().enumerate() {
            *w &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// In-place difference
    pub fn minus(&mut self, other: &SymSet) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w &= !*o;
        }
    }

    /// New set holding `self ∪ other`
    pub fn union(&self, other: &SymSet) -> SymSet {
        let mut result = self.clone();
        result.or(other);
        result
    }

    /// New set holding `self ∩ other`
    pub fn intersection(&self, other: &SymSet) -> SymSet {
        let mut result = self.clone();
        result.and(other);
        result
    }

    /// New set holding `self \ other`
    pub fn difference(&self, other: &SymSet) -> SymSet {
        let mut result = self.clone();
        result.minus(other);
        result
    }

    /// Whether every member of `self` is in `other`
    pub fn is_subset_of(&self, other: &SymSet) -> bool {
        self.words
            .iter()
            .enumerate()
            .all(|(i, w)| w & !other.words.get(i).copied().unwrap_or(0) == 0)
    }

    /// Iterate members in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = SymId> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(SymId((i * WORD_BITS + tz) as u32))
            })
        })
    }
}

impl PartialEq for SymSet {
    fn eq(&self, other: &Self) -> bool {
        let len = self.words.len().max(other.words.len());
        (0..len).all(|i| {
            self.words.get(i).copied().unwrap_or(0) == other.words.get(i).copied().unwrap_or(0)
        })
    }
}

impl Eq for SymSet {}

impl FromIterator<SymId> for SymSet {
    fn from_iter<T: IntoIterator<Item = SymId>>(iter: T) -> Self {
        let mut set = SymSet::new();
        for id in iter {
            set.set(id);
        }
        set
    }
}

impl std::fmt::Display for SymSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(ids: &[u32]) -> SymSet {
        ids.iter().map(|&i| SymId(i)).collect()
    }

    #[test]
    fn test_set_and_clear() {
        let mut s = SymSet::new();
        assert!(s.is_empty());
        s.set(SymId(3));
        s.set(SymId(130));
        assert!(s.test(SymId(3)));
        assert!(s.test(SymId(130)));
        assert!(!s.test(SymId(4)));
        assert_eq!(s.count(), 2);
        s.clear(SymId(130));
        assert!(!s.test(SymId(130)));
        assert_eq!(s.count(), 1);
    }

    #[test]
    fn test_equality_ignores_capacity() {
        let mut a = set_of(&[1, 200]);
        a.clear(SymId(200));
        assert_eq!(a, set_of(&[1]));
    }

    #[test]
    fn test_set_algebra() {
        let a = set_of(&[1, 2, 3, 70]);
        let b = set_of(&[2, 3, 4]);
        assert_eq!(a.union(&b), set_of(&[1, 2, 3, 4, 70]));
        assert_eq!(a.intersection(&b), set_of(&[2, 3]));
        assert_eq!(a.difference(&b), set_of(&[1, 70]));
        assert!(set_of(&[2, 3]).is_subset_of(&a));
        assert!(!b.is_subset_of(&a));
    }

    #[test]
    fn test_iter_is_ordered() {
        let s = set_of(&[65, 0, 7, 64]);
        let ids: Vec<u32> = s.iter().map(|id| id.0).collect();
        assert_eq!(ids, vec![0, 7, 64, 65]);
    }
}
