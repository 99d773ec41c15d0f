//! Abstract value descriptions
//!
//! A `ValueInfo` pairs a [`ValueType`] with a structure kind carrying the
//! extra facts the optimizer proved: int constants and ranges, relative
//! int bounds, object types, and the auxiliary syms of an array.

use std::rc::Rc;

use super::int_bounds::{IntBounds, IntConstantBounds};
use super::type_set::EquivalentTypeSet;
use super::value_type::ValueType;
use crate::host::TypeHandle;
use crate::ir::sym::SymId;

/// Constant that is not an int or float
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarConstant {
    Bool(bool),
    Undefined,
    Null,
}

/// Object type facts held by an object-type sym's value
#[derive(Debug, Clone, PartialEq)]
pub struct JsTypeValueInfo {
    /// Single known type
    pub js_type: Option<TypeHandle>,
    /// Set of types the object is known to be one of
    pub type_set: Option<Rc<EquivalentTypeSet>>,
    /// Referenced from more than one block; copy before narrowing
    pub is_shared: bool,
}

impl JsTypeValueInfo {
    pub fn new(js_type: Option<TypeHandle>, type_set: Option<Rc<EquivalentTypeSet>>) -> Self {
        JsTypeValueInfo {
            js_type,
            type_set,
            is_shared: false,
        }
    }

    /// Whether anything is known about the type
    pub fn has_type_info(&self) -> bool {
        self.js_type.is_some() || self.type_set.is_some()
    }
}

/// Auxiliary syms loaded for an array value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayValueInfo {
    pub head_segment_sym: Option<SymId>,
    pub head_segment_length_sym: Option<SymId>,
    pub length_sym: Option<SymId>,
}

impl ArrayValueInfo {
    pub fn is_empty(&self) -> bool {
        self.head_segment_sym.is_none()
            && self.head_segment_length_sym.is_none()
            && self.length_sym.is_none()
    }

    /// Copy keeping only the selected syms
    pub fn copy_with(&self, keep_head: bool, keep_head_len: bool, keep_len: bool) -> ArrayValueInfo {
        ArrayValueInfo {
            head_segment_sym: self.head_segment_sym.filter(|_| keep_head),
            head_segment_length_sym: self.head_segment_length_sym.filter(|_| keep_head_len),
            length_sym: self.length_sym.filter(|_| keep_len),
        }
    }
}

/// Structure-specific facts of a value
#[derive(Debug, Clone, PartialEq)]
pub enum ValueInfoKind {
    Generic,
    IntConstant(i32),
    IntRange { min: i32, max: i32 },
    IntBounded(IntBounds),
    FloatConstant(f64),
    VarConstant(VarConstant),
    JsType(JsTypeValueInfo),
    Array(ArrayValueInfo),
}

/// Abstract description of a value
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    ty: ValueType,
    sym_store: Option<SymId>,
    kind: ValueInfoKind,
}

impl ValueInfo {
    pub fn new_generic(ty: ValueType) -> Self {
        ValueInfo {
            ty,
            sym_store: None,
            kind: ValueInfoKind::Generic,
        }
    }

    pub fn new_int_constant(value: i32) -> Self {
        ValueInfo {
            ty: ValueType::INT,
            sym_store: None,
            kind: ValueInfoKind::IntConstant(value),
        }
    }

    /// Definite int in `[min, max]`; collapses to a constant when `min == max`
    pub fn new_int_range(min: i32, max: i32) -> Self {
        debug_assert!(min <= max);
        if min == max {
            return ValueInfo::new_int_constant(min);
        }
        if min == i32::MIN && max == i32::MAX {
            return ValueInfo::new_generic(ValueType::INT);
        }
        ValueInfo {
            ty: ValueType::INT,
            sym_store: None,
            kind: ValueInfoKind::IntRange { min, max },
        }
    }

    /// Int with relative bounds; falls back to a range when none are left
    pub fn new_int_bounded(ty: ValueType, bounds: IntBounds) -> Self {
        debug_assert!(ty.is_likely_int());
        if !bounds.requires_int_bounded_value_info() {
            let cb = bounds.constant_bounds();
            if ty.is_int() {
                return ValueInfo::new_int_range(cb.lower_bound(), cb.upper_bound());
            }
            return ValueInfo::new_generic(ty);
        }
        ValueInfo {
            ty,
            sym_store: None,
            kind: ValueInfoKind::IntBounded(bounds),
        }
    }

    pub fn new_float_constant(value: f64) -> Self {
        ValueInfo {
            ty: ValueType::FLOAT,
            sym_store: None,
            kind: ValueInfoKind::FloatConstant(value),
        }
    }

    pub fn new_var_constant(value: VarConstant) -> Self {
        let ty = match value {
            VarConstant::Bool(_) => ValueType::BOOLEAN,
            VarConstant::Undefined => ValueType::UNDEFINED,
            VarConstant::Null => ValueType::NULL,
        };
        ValueInfo {
            ty,
            sym_store: None,
            kind: ValueInfoKind::VarConstant(value),
        }
    }

    pub fn new_js_type(js_type: Option<TypeHandle>, type_set: Option<Rc<EquivalentTypeSet>>) -> Self {
        ValueInfo {
            ty: ValueType::UNINITIALIZED,
            sym_store: None,
            kind: ValueInfoKind::JsType(JsTypeValueInfo::new(js_type, type_set)),
        }
    }

    /// Array value; generic when no aux sym is present
    pub fn new_array(ty: ValueType, array: ArrayValueInfo, sym_store: Option<SymId>) -> Self {
        debug_assert!(ty.is_likely_any_optimized_array());
        debug_assert!(array.length_sym.is_none() || ty.is_likely_array());
        let kind = if array.is_empty() {
            ValueInfoKind::Generic
        } else {
            ValueInfoKind::Array(array)
        };
        ValueInfo { ty, sym_store, kind }
    }

    pub fn ty(&self) -> ValueType {
        self.ty
    }

    pub fn kind(&self) -> &ValueInfoKind {
        &self.kind
    }

    pub fn sym_store(&self) -> Option<SymId> {
        self.sym_store
    }

    pub fn set_sym_store(&mut self, sym: Option<SymId>) {
        self.sym_store = sym;
    }

    /// Copy with the same type but no structure
    pub fn copy_with_generic_structure_kind(&self) -> ValueInfo {
        ValueInfo {
            ty: self.ty,
            sym_store: self.sym_store,
            kind: ValueInfoKind::Generic,
        }
    }

    /// Copy with a new type and no structure
    pub fn with_type(&self, ty: ValueType) -> ValueInfo {
        ValueInfo {
            ty,
            sym_store: self.sym_store,
            kind: ValueInfoKind::Generic,
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.kind, ValueInfoKind::Generic)
    }

    pub fn is_int_constant(&self) -> bool {
        matches!(self.kind, ValueInfoKind::IntConstant(_))
    }

    pub fn is_int_bounded(&self) -> bool {
        matches!(self.kind, ValueInfoKind::IntBounded(_))
    }

    pub fn int_bounds(&self) -> Option<&IntBounds> {
        match &self.kind {
            ValueInfoKind::IntBounded(bounds) => Some(bounds),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValueInfo> {
        match &self.kind {
            ValueInfoKind::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_js_type(&self) -> Option<&JsTypeValueInfo> {
        match &self.kind {
            ValueInfoKind::JsType(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_js_type_mut(&mut self) -> Option<&mut JsTypeValueInfo> {
        match &mut self.kind {
            ValueInfoKind::JsType(info) => Some(info),
            _ => None,
        }
    }

    pub fn is_js_type(&self) -> bool {
        matches!(self.kind, ValueInfoKind::JsType(_))
    }

    pub fn var_constant(&self) -> Option<VarConstant> {
        match self.kind {
            ValueInfoKind::VarConstant(v) => Some(v),
            _ => None,
        }
    }

    pub fn float_constant(&self) -> Option<f64> {
        match self.kind {
            ValueInfoKind::FloatConstant(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the type is shared between blocks (copy before narrowing)
    pub fn is_shared(&self) -> bool {
        self.as_js_type().is_some_and(|js| js.is_shared)
    }

    pub fn set_is_shared(&mut self) {
        if let Some(js) = self.as_js_type_mut() {
            js.is_shared = true;
        }
    }

    /// Int constant, when proven (or guessed, with `include_likely`)
    pub fn try_get_int_constant_value(&self, include_likely: bool) -> Option<i32> {
        if !(if include_likely { self.ty.is_likely_int() } else { self.ty.is_int() }) {
            return None;
        }
        match &self.kind {
            ValueInfoKind::IntConstant(v) => Some(*v),
            ValueInfoKind::IntBounded(bounds) => {
                let cb = bounds.constant_bounds();
                cb.is_constant().then_some(cb.lower_bound())
            }
            _ => None,
        }
    }

    /// Constant bounds; full range for an int without structure
    pub fn try_get_int_constant_bounds(&self, include_likely: bool) -> Option<IntConstantBounds> {
        if !(if include_likely { self.ty.is_likely_int() } else { self.ty.is_int() }) {
            return None;
        }
        let definite = self.ty.is_int();
        Some(match &self.kind {
            ValueInfoKind::IntConstant(v) if definite => IntConstantBounds::constant(*v),
            ValueInfoKind::IntRange { min, max } if definite => IntConstantBounds::new(*min, *max),
            ValueInfoKind::IntBounded(bounds) => bounds.constant_bounds(),
            _ => IntConstantBounds::FULL,
        })
    }

    pub fn try_get_int_constant_lower_bound(&self, include_likely: bool) -> Option<i32> {
        self.try_get_int_constant_bounds(include_likely).map(|b| b.lower_bound())
    }

    pub fn try_get_int_constant_upper_bound(&self, include_likely: bool) -> Option<i32> {
        self.try_get_int_constant_bounds(include_likely).map(|b| b.upper_bound())
    }

    /// Bounds to start refining from: existing relative facts are kept
    pub fn int_bounds_or_constant(&self) -> Option<IntBounds> {
        match &self.kind {
            ValueInfoKind::IntBounded(bounds) => Some(bounds.clone()),
            _ => self.try_get_int_constant_bounds(true).map(IntBounds::new),
        }
    }

    /// Drop everything not implied by the likely type
    pub fn to_likely(&self) -> ValueInfo {
        ValueInfo {
            ty: self.ty.to_likely(),
            sym_store: self.sym_store,
            kind: ValueInfoKind::Generic,
        }
    }

    /// Int32-specialized form: a definite int keeping its proven bounds
    pub fn specialize_to_int32(&self) -> ValueInfo {
        if self.ty.is_int() {
            return self.clone();
        }
        if let ValueInfoKind::IntBounded(bounds) = &self.kind {
            let mut info = ValueInfo::new_int_bounded(ValueType::INT, bounds.clone());
            info.sym_store = self.sym_store;
            return info;
        }
        let mut info = self.with_type(ValueType::INT);
        info.kind = ValueInfoKind::Generic;
        info
    }

    /// Float64-specialized form
    pub fn specialize_to_float64(&self) -> ValueInfo {
        if self.ty.is_number() {
            return self.clone();
        }
        let ty = if self.ty.is_likely_int() { ValueType::NUMBER } else { ValueType::FLOAT };
        self.with_type(ty)
    }
}

impl std::fmt::Display for ValueInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ValueInfoKind::Generic => write!(f, "{}", self.ty)?,
            ValueInfoKind::IntConstant(v) => write!(f, "IntConst {}", v)?,
            ValueInfoKind::IntRange { min, max } => write!(f, "IntRange [{}, {}]", min, max)?,
            ValueInfoKind::IntBounded(b) => {
                write!(f, "IntBounded [{}, {}]", b.constant_lower_bound(), b.constant_upper_bound())?;
                for (vn, o) in b.relative_lower_bounds() {
                    write!(f, " >= {}{:+}", vn, o)?;
                }
                for (vn, o) in b.relative_upper_bounds() {
                    write!(f, " <= {}{:+}", vn, o)?;
                }
            }
            ValueInfoKind::FloatConstant(v) => write!(f, "FloatConst {}", v)?,
            ValueInfoKind::VarConstant(v) => write!(f, "VarConst {:?}", v)?,
            ValueInfoKind::JsType(js) => match (&js.js_type, &js.type_set) {
                (Some(t), _) => write!(f, "Type {}", t)?,
                (None, Some(set)) => write!(f, "TypeSet {}", set)?,
                (None, None) => write!(f, "Type ?")?,
            },
            ValueInfoKind::Array(a) => {
                write!(f, "{}", self.ty)?;
                if let Some(s) = a.head_segment_sym {
                    write!(f, " seg:{}", s)?;
                }
                if let Some(s) = a.head_segment_length_sym {
                    write!(f, " seglen:{}", s)?;
                }
                if let Some(s) = a.length_sym {
                    write!(f, " len:{}", s)?;
                }
            }
        }
        if let Some(store) = self.sym_store {
            write!(f, " (store {})", store)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::value_type::ObjectKind;
    use crate::value::ValueNumber;

    #[test]
    fn test_int_range_collapses_to_constant() {
        let info = ValueInfo::new_int_range(5, 5);
        assert!(info.is_int_constant());
        assert_eq!(info.try_get_int_constant_value(false), Some(5));
    }

    #[test]
    fn test_generic_int_has_full_bounds() {
        let info = ValueInfo::new_generic(ValueType::INT);
        assert_eq!(info.try_get_int_constant_bounds(false), Some(IntConstantBounds::FULL));
        let likely = ValueInfo::new_generic(ValueType::INT.to_likely());
        assert_eq!(likely.try_get_int_constant_bounds(false), None);
        assert_eq!(likely.try_get_int_constant_bounds(true), Some(IntConstantBounds::FULL));
    }

    #[test]
    fn test_int_bounded_without_relative_bounds_is_range() {
        let info = ValueInfo::new_int_bounded(ValueType::INT, IntBounds::new(IntConstantBounds::new(0, 9)));
        assert_eq!(info.kind(), &ValueInfoKind::IntRange { min: 0, max: 9 });

        let mut bounds = IntBounds::new(IntConstantBounds::new(0, 9));
        bounds.set_upper_bound(ValueNumber(3), -1);
        let info = ValueInfo::new_int_bounded(ValueType::INT, bounds);
        assert!(info.is_int_bounded());
        assert_eq!(info.try_get_int_constant_lower_bound(false), Some(0));
    }

    #[test]
    fn test_array_copy_with() {
        let array = ArrayValueInfo {
            head_segment_sym: Some(SymId(1)),
            head_segment_length_sym: Some(SymId(2)),
            length_sym: Some(SymId(3)),
        };
        let kept = array.copy_with(true, false, true);
        assert_eq!(kept.head_segment_length_sym, None);
        assert_eq!(kept.length_sym, Some(SymId(3)));
        assert!(array.copy_with(false, false, false).is_empty());

        let ty = ValueType::array(ObjectKind::Array, true);
        assert!(ValueInfo::new_array(ty, ArrayValueInfo::default(), None).is_generic());
    }

    #[test]
    fn test_js_type_shared_flag() {
        let mut info = ValueInfo::new_js_type(Some(TypeHandle(0x10)), None);
        assert!(!info.is_shared());
        info.set_is_shared();
        assert!(info.is_shared());
        let mut copy = info.clone();
        if let Some(js) = copy.as_js_type_mut() {
            js.is_shared = false;
        }
        assert!(info.is_shared());
        assert!(!copy.is_shared());
    }

    #[test]
    fn test_specialize_to_int32_keeps_relative_bounds() {
        let mut bounds = IntBounds::new(IntConstantBounds::FULL);
        bounds.set_lower_bound(ValueNumber(4), 0);
        let likely = ValueInfo::new_int_bounded(ValueType::INT.to_likely(), bounds);
        let spec = likely.specialize_to_int32();
        assert!(spec.ty().is_int());
        assert_eq!(spec.int_bounds().and_then(|b| b.relative_lower_bound(ValueNumber(4))), Some(0));
    }
}
