//! Abstract values
//!
//! A [`Value`] pairs a value number (identity across equivalent
//! computations) with a reference-counted [`ValueInfo`]. Infos are shared
//! between blocks and copied before they diverge; everything is released
//! when the optimization pass that created it is dropped.

pub mod int_bounds;
pub mod type_set;
pub mod value_info;
pub mod value_type;

use std::rc::Rc;

pub use int_bounds::{IntBounds, IntConstantBounds};
pub use type_set::EquivalentTypeSet;
pub use value_info::{ArrayValueInfo, JsTypeValueInfo, ValueInfo, ValueInfoKind, VarConstant};
pub use value_type::{ObjectKind, TypedArrayKind, ValueType};

/// Identity of an abstract value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueNumber(pub u32);

impl std::fmt::Display for ValueNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value number shared by every int constant zero
pub const ZERO_VALUE_NUMBER: ValueNumber = ValueNumber(1);

const FIRST_VALUE_NUMBER: u32 = 2;

/// Hands out fresh value numbers for one pass
#[derive(Debug)]
pub struct ValueNumberAllocator {
    next: u32,
}

impl Default for ValueNumberAllocator {
    fn default() -> Self {
        ValueNumberAllocator {
            next: FIRST_VALUE_NUMBER,
        }
    }
}

impl ValueNumberAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused value number
    pub fn next(&mut self) -> ValueNumber {
        let vn = ValueNumber(self.next);
        self.next += 1;
        vn
    }

    /// Number of value numbers handed out
    pub fn count(&self) -> u32 {
        self.next - FIRST_VALUE_NUMBER
    }
}

/// A value number and what is known about it
#[derive(Debug, Clone)]
pub struct Value {
    number: ValueNumber,
    info: Rc<ValueInfo>,
}

impl Value {
    pub fn new(number: ValueNumber, info: ValueInfo) -> Self {
        Value {
            number,
            info: Rc::new(info),
        }
    }

    pub fn from_rc(number: ValueNumber, info: Rc<ValueInfo>) -> Self {
        Value { number, info }
    }

    pub fn number(&self) -> ValueNumber {
        self.number
    }

    pub fn info(&self) -> &ValueInfo {
        &self.info
    }

    pub fn info_rc(&self) -> &Rc<ValueInfo> {
        &self.info
    }

    pub fn ty(&self) -> ValueType {
        self.info.ty()
    }

    /// Same value number, new info
    pub fn with_info(&self, info: ValueInfo) -> Value {
        Value::new(self.number, info)
    }

    /// Whether both handles point at the same info object
    pub fn ptr_eq(a: &Value, b: &Value) -> bool {
        a.number == b.number && Rc::ptr_eq(&a.info, &b.info)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number && (Rc::ptr_eq(&self.info, &other.info) || self.info == other.info)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.number, self.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_skips_reserved_numbers() {
        let mut alloc = ValueNumberAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        assert_ne!(a, ZERO_VALUE_NUMBER);
        assert_ne!(a, b);
        assert_eq!(alloc.count(), 2);
    }

    #[test]
    fn test_value_equality_is_structural() {
        let a = Value::new(ValueNumber(5), ValueInfo::new_int_constant(3));
        let b = Value::new(ValueNumber(5), ValueInfo::new_int_constant(3));
        assert_eq!(a, b);
        assert!(!Value::ptr_eq(&a, &b));
        assert!(Value::ptr_eq(&a, &a.clone()));
        assert_ne!(a, Value::new(ValueNumber(6), ValueInfo::new_int_constant(3)));
    }
}
