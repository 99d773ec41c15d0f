//! Integer bounds
//!
//! Constant bounds are a plain `[lower, upper]` pair. Relative bounds record
//! facts of the form `value >= base + offset` and `value <= base + offset`
//! where `base` is identified by its value number.
//!
//! All comparisons are done in 64-bit arithmetic so offsets never overflow.

use rustc_hash::FxHashMap;

use super::{Value, ValueNumber};

/// Inclusive constant bounds of an int value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntConstantBounds {
    lower: i32,
    upper: i32,
}

impl IntConstantBounds {
    /// Full int32 range
    pub const FULL: IntConstantBounds = IntConstantBounds {
        lower: i32::MIN,
        upper: i32::MAX,
    };

    pub fn new(lower: i32, upper: i32) -> Self {
        debug_assert!(lower <= upper);
        IntConstantBounds { lower, upper }
    }

    pub fn constant(value: i32) -> Self {
        IntConstantBounds::new(value, value)
    }

    pub fn lower_bound(&self) -> i32 {
        self.lower
    }

    pub fn upper_bound(&self) -> i32 {
        self.upper
    }

    pub fn is_constant(&self) -> bool {
        self.lower == self.upper
    }

    /// Whether `value` lies within the bounds
    pub fn contains(&self, value: i32) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// Whether every value in the bounds is `>= 0`
    pub fn is_non_negative(&self) -> bool {
        self.lower >= 0
    }

    /// Smallest bounds containing both
    pub fn union(&self, other: &IntConstantBounds) -> IntConstantBounds {
        IntConstantBounds::new(self.lower.min(other.lower), self.upper.max(other.upper))
    }
}

/// Constant and value-relative bounds of an int value
#[derive(Debug, Clone, PartialEq)]
pub struct IntBounds {
    constant_lower: i32,
    constant_upper: i32,
    relative_lower: FxHashMap<ValueNumber, i32>,
    relative_upper: FxHashMap<ValueNumber, i32>,
}

impl IntBounds {
    /// Bounds with the given constant range and no relative facts
    pub fn new(constant_bounds: IntConstantBounds) -> Self {
        IntBounds {
            constant_lower: constant_bounds.lower,
            constant_upper: constant_bounds.upper,
            relative_lower: FxHashMap::default(),
            relative_upper: FxHashMap::default(),
        }
    }

    pub fn constant_lower_bound(&self) -> i32 {
        self.constant_lower
    }

    pub fn constant_upper_bound(&self) -> i32 {
        self.constant_upper
    }

    pub fn constant_bounds(&self) -> IntConstantBounds {
        IntConstantBounds::new(self.constant_lower, self.constant_upper)
    }

    /// Relative bounds are what distinguish this from a plain range
    pub fn requires_int_bounded_value_info(&self) -> bool {
        !self.relative_lower.is_empty() || !self.relative_upper.is_empty()
    }

    pub fn relative_lower_bound(&self, base: ValueNumber) -> Option<i32> {
        self.relative_lower.get(&base).copied()
    }

    pub fn relative_upper_bound(&self, base: ValueNumber) -> Option<i32> {
        self.relative_upper.get(&base).copied()
    }

    /// Relative lower bounds `(base, offset)` in value-number order
    pub fn relative_lower_bounds(&self) -> Vec<(ValueNumber, i32)> {
        let mut bounds: Vec<_> = self.relative_lower.iter().map(|(&vn, &o)| (vn, o)).collect();
        bounds.sort_by_key(|(vn, _)| *vn);
        bounds
    }

    /// Relative upper bounds `(base, offset)` in value-number order
    pub fn relative_upper_bounds(&self) -> Vec<(ValueNumber, i32)> {
        let mut bounds: Vec<_> = self.relative_upper.iter().map(|(&vn, &o)| (vn, o)).collect();
        bounds.sort_by_key(|(vn, _)| *vn);
        bounds
    }

    /// Raise the constant lower bound (never lowers it)
    pub fn set_constant_lower_bound(&mut self, lower: i32) {
        if lower > self.constant_lower && lower <= self.constant_upper {
            self.constant_lower = lower;
        }
    }

    /// Lower the constant upper bound (never raises it)
    pub fn set_constant_upper_bound(&mut self, upper: i32) {
        if upper < self.constant_upper && upper >= self.constant_lower {
            self.constant_upper = upper;
        }
    }

    /// Record `value >= base + offset`, keeping the tighter of old and new
    pub fn set_lower_bound(&mut self, base: ValueNumber, offset: i32) {
        let entry = self.relative_lower.entry(base).or_insert(offset);
        *entry = (*entry).max(offset);
    }

    /// Record `value <= base + offset`, keeping the tighter of old and new
    pub fn set_upper_bound(&mut self, base: ValueNumber, offset: i32) {
        let entry = self.relative_upper.entry(base).or_insert(offset);
        *entry = (*entry).min(offset);
    }

    /// Whether `value >= other + offset` is implied
    pub fn is_greater_than_or_equal_to(&self, other: &Value, offset: i32) -> bool {
        if let Some(bound) = self.relative_lower.get(&other.number()) {
            if *bound >= offset {
                return true;
            }
        }
        other
            .info()
            .try_get_int_constant_bounds(true)
            .is_some_and(|b| constant_ge(self.constant_lower, b.upper_bound(), offset))
    }

    /// Whether `value >= constant + offset` is implied
    pub fn is_greater_than_or_equal_to_constant(&self, constant: i32, offset: i32) -> bool {
        constant_ge(self.constant_lower, constant, offset)
    }

    /// Whether `value <= other + offset` is implied
    pub fn is_less_than_or_equal_to(&self, other: &Value, offset: i32) -> bool {
        if let Some(bound) = self.relative_upper.get(&other.number()) {
            if *bound <= offset {
                return true;
            }
        }
        other
            .info()
            .try_get_int_constant_bounds(true)
            .is_some_and(|b| constant_le(self.constant_upper, b.lower_bound(), offset))
    }

    /// Whether `value <= constant + offset` is implied
    pub fn is_less_than_or_equal_to_constant(&self, constant: i32, offset: i32) -> bool {
        constant_le(self.constant_upper, constant, offset)
    }

    /// Join of two bounded values: only facts holding on both sides survive
    pub fn merge(bounds1: &IntBounds, bounds2: &IntBounds) -> IntBounds {
        let mut merged = IntBounds::new(bounds1.constant_bounds().union(&bounds2.constant_bounds()));
        for (vn, offset) in &bounds1.relative_lower {
            if let Some(other) = bounds2.relative_lower.get(vn) {
                merged.relative_lower.insert(*vn, (*offset).min(*other));
            }
        }
        for (vn, offset) in &bounds1.relative_upper {
            if let Some(other) = bounds2.relative_upper.get(vn) {
                merged.relative_upper.insert(*vn, (*offset).max(*other));
            }
        }
        merged
    }

    /// Join of a bounded value with a value only known by constant bounds
    pub fn merge_with_constant(bounds: &IntBounds, constant_bounds: IntConstantBounds) -> IntBounds {
        IntBounds::new(bounds.constant_bounds().union(&constant_bounds))
    }
}

fn constant_ge(lower: i32, other: i32, offset: i32) -> bool {
    lower as i64 >= other as i64 + offset as i64
}

fn constant_le(upper: i32, other: i32, offset: i32) -> bool {
    upper as i64 <= other as i64 + offset as i64
}

/// Constant bounds used when comparing a possibly absent value
fn bounds_of(value: Option<&Value>, min: i32, max: i32) -> (i32, i32) {
    match value.and_then(|v| v.info().try_get_int_constant_bounds(true)) {
        Some(b) => (b.lower_bound().max(min), b.upper_bound().min(max)),
        None => (min, max),
    }
}

/// `src1 >= src2 + offset` without trying the converse relation
pub fn is_greater_than_or_equal_to_no_converse(
    src1: Option<&Value>,
    min1: i32,
    max1: i32,
    src2: Option<&Value>,
    min2: i32,
    max2: i32,
    offset: i32,
) -> bool {
    debug_assert!(src1.is_some() || min1 == max1);
    debug_assert!(src2.is_some() || min2 == max2);

    if let Some(v1) = src1 {
        if let Some(v2) = src2 {
            if v1.number() == v2.number() {
                return offset <= 0;
            }
        }
        if let Some(bounds) = v1.info().int_bounds() {
            return match src2 {
                Some(v2) => bounds.is_greater_than_or_equal_to(v2, offset),
                None => bounds.is_greater_than_or_equal_to_constant(min2, offset),
            };
        }
    }
    let (min1, _) = bounds_of(src1, min1, max1);
    let (_, max2) = bounds_of(src2, min2, max2);
    constant_ge(min1, max2, offset)
}

/// `src1 <= src2 + offset` without trying the converse relation
pub fn is_less_than_or_equal_to_no_converse(
    src1: Option<&Value>,
    min1: i32,
    max1: i32,
    src2: Option<&Value>,
    min2: i32,
    max2: i32,
    offset: i32,
) -> bool {
    debug_assert!(src1.is_some() || min1 == max1);
    debug_assert!(src2.is_some() || min2 == max2);

    if let Some(v1) = src1 {
        if let Some(v2) = src2 {
            if v1.number() == v2.number() {
                return offset >= 0;
            }
        }
        if let Some(bounds) = v1.info().int_bounds() {
            return match src2 {
                Some(v2) => bounds.is_less_than_or_equal_to(v2, offset),
                None => bounds.is_less_than_or_equal_to_constant(min2, offset),
            };
        }
    }
    let (_, max1) = bounds_of(src1, min1, max1);
    let (min2, _) = bounds_of(src2, min2, max2);
    constant_le(max1, min2, offset)
}

/// `src1 >= src2 + offset`
pub fn is_greater_than_or_equal_to(
    src1: Option<&Value>,
    min1: i32,
    max1: i32,
    src2: Option<&Value>,
    min2: i32,
    max2: i32,
    offset: i32,
) -> bool {
    is_greater_than_or_equal_to_no_converse(src1, min1, max1, src2, min2, max2, offset)
        || (offset != i32::MIN
            && is_less_than_or_equal_to_no_converse(src2, min2, max2, src1, min1, max1, -offset))
}

/// `src1 <= src2 + offset`
pub fn is_less_than_or_equal_to(
    src1: Option<&Value>,
    min1: i32,
    max1: i32,
    src2: Option<&Value>,
    min2: i32,
    max2: i32,
    offset: i32,
) -> bool {
    is_less_than_or_equal_to_no_converse(src1, min1, max1, src2, min2, max2, offset)
        || (offset != i32::MIN
            && is_greater_than_or_equal_to_no_converse(src2, min2, max2, src1, min1, max1, -offset))
}

/// `src1 > src2`
pub fn is_greater_than(
    src1: Option<&Value>,
    min1: i32,
    max1: i32,
    src2: Option<&Value>,
    min2: i32,
    max2: i32,
) -> bool {
    is_greater_than_or_equal_to(src1, min1, max1, src2, min2, max2, 1)
}

/// `src1 < src2`
pub fn is_less_than(
    src1: Option<&Value>,
    min1: i32,
    max1: i32,
    src2: Option<&Value>,
    min2: i32,
    max2: i32,
) -> bool {
    is_less_than_or_equal_to(src1, min1, max1, src2, min2, max2, -1)
}
