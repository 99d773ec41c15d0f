//! Bit-packed value type lattice
//!
//! A `ValueType` is a conservative description of the runtime type of a
//! value. Primitive facts are a union of bits; object facts carry a single
//! object kind. The `LIKELY` bit turns every fact into a profile-derived
//! guess that still needs a runtime check before it can be relied on.
//! The empty type means "nothing is known".

use bitflags::bitflags;

bitflags! {
    /// Primitive and certainty bits of a [`ValueType`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeBits: u16 {
        const LIKELY = 1 << 0;
        const INT = 1 << 1;
        const FLOAT = 1 << 2;
        const BOOLEAN = 1 << 3;
        const STRING = 1 << 4;
        const UNDEFINED = 1 << 5;
        const NULL = 1 << 6;
        const OBJECT = 1 << 7;
        const NO_MISSING_VALUES = 1 << 8;

        const NUMBER = Self::INT.bits() | Self::FLOAT.bits();
        const PRIMITIVE = Self::NUMBER.bits()
            | Self::BOOLEAN.bits()
            | Self::STRING.bits()
            | Self::UNDEFINED.bits()
            | Self::NULL.bits();
    }
}

/// Element kind of a typed array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl TypedArrayKind {
    /// Element size in bytes
    pub fn element_size(&self) -> u32 {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => 1,
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 => 2,
            TypedArrayKind::Int32 | TypedArrayKind::Uint32 | TypedArrayKind::Float32 => 4,
            TypedArrayKind::Float64 => 8,
        }
    }

    /// Whether elements are floating point
    pub fn is_float(&self) -> bool {
        matches!(self, TypedArrayKind::Float32 | TypedArrayKind::Float64)
    }
}

/// Object category carried by an object value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// No object category (primitive or unknown)
    None,
    /// Plain object of unknown layout
    Object,
    /// Array with var (tagged) elements
    Array,
    /// Array storing unboxed int32 elements
    NativeIntArray,
    /// Array storing unboxed float64 elements
    NativeFloatArray,
    /// Plain object whose indexed properties live in an array
    ObjectWithArray,
    TypedArray(TypedArrayKind),
    /// Typed array over a reserved virtual memory region (asm.js/wasm heap)
    VirtualTypedArray(TypedArrayKind),
}

impl ObjectKind {
    fn is_js_array(&self) -> bool {
        matches!(
            self,
            ObjectKind::Array | ObjectKind::NativeIntArray | ObjectKind::NativeFloatArray
        )
    }
}

/// Abstract runtime type of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueType {
    bits: TypeBits,
    object: ObjectKind,
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::UNINITIALIZED
    }
}

impl ValueType {
    /// Nothing is known
    pub const UNINITIALIZED: ValueType = ValueType {
        bits: TypeBits::empty(),
        object: ObjectKind::None,
    };

    pub const INT: ValueType = ValueType::prim(TypeBits::INT);
    pub const FLOAT: ValueType = ValueType::prim(TypeBits::FLOAT);
    pub const NUMBER: ValueType = ValueType::prim(TypeBits::NUMBER);
    pub const BOOLEAN: ValueType = ValueType::prim(TypeBits::BOOLEAN);
    pub const STRING: ValueType = ValueType::prim(TypeBits::STRING);
    pub const UNDEFINED: ValueType = ValueType::prim(TypeBits::UNDEFINED);
    pub const NULL: ValueType = ValueType::prim(TypeBits::NULL);

    const fn prim(bits: TypeBits) -> ValueType {
        ValueType {
            bits,
            object: ObjectKind::None,
        }
    }

    /// Definite object of the given kind
    pub fn object(kind: ObjectKind) -> ValueType {
        let kind = if kind == ObjectKind::None { ObjectKind::Object } else { kind };
        ValueType {
            bits: TypeBits::OBJECT,
            object: kind,
        }
    }

    /// Likely object of the given kind
    pub fn likely_object(kind: ObjectKind) -> ValueType {
        ValueType::object(kind).to_likely()
    }

    /// Definite JS array
    pub fn array(kind: ObjectKind, no_missing_values: bool) -> ValueType {
        debug_assert!(kind.is_js_array());
        ValueType::object(kind).set_has_no_missing_values(no_missing_values)
    }

    /// Likely JS array
    pub fn likely_array(kind: ObjectKind, no_missing_values: bool) -> ValueType {
        ValueType::array(kind, no_missing_values).to_likely()
    }

    /// Raw bits
    pub fn bits(&self) -> TypeBits {
        self.bits
    }

    /// Object kind (`None` when this is not an object type)
    pub fn object_kind(&self) -> ObjectKind {
        self.object
    }

    fn kind_bits(&self) -> TypeBits {
        self.bits - TypeBits::LIKELY - TypeBits::NO_MISSING_VALUES
    }

    /// Whether nothing is known
    pub fn is_uninitialized(&self) -> bool {
        self.kind_bits().is_empty()
    }

    /// Whether the facts are profile guesses
    pub fn is_likely_only(&self) -> bool {
        self.bits.contains(TypeBits::LIKELY)
    }

    /// Whether the facts are proven
    pub fn is_definite(&self) -> bool {
        !self.is_uninitialized() && !self.is_likely_only()
    }

    /// Drop certainty
    pub fn to_likely(&self) -> ValueType {
        if self.is_uninitialized() {
            return *self;
        }
        ValueType {
            bits: self.bits | TypeBits::LIKELY,
            object: self.object,
        }
    }

    /// Promote a likely object to a definite one (after a runtime check)
    pub fn to_definite_object(&self) -> ValueType {
        debug_assert!(self.is_likely_object());
        ValueType {
            bits: (self.bits - TypeBits::LIKELY - TypeBits::PRIMITIVE) | TypeBits::OBJECT,
            object: if self.object == ObjectKind::None { ObjectKind::Object } else { self.object },
        }
    }

    /// Promote likely-int to definite int (after a bailout-guarded conversion)
    pub fn to_definite_int(&self) -> ValueType {
        ValueType::INT
    }

    fn is_exactly(&self, bits: TypeBits) -> bool {
        !self.is_uninitialized() && self.kind_bits() == bits
    }

    fn is_within(&self, bits: TypeBits) -> bool {
        !self.is_uninitialized() && bits.contains(self.kind_bits())
    }

    pub fn is_likely_int(&self) -> bool {
        self.is_exactly(TypeBits::INT)
    }

    pub fn is_int(&self) -> bool {
        self.is_likely_int() && !self.is_likely_only()
    }

    pub fn is_likely_float(&self) -> bool {
        self.is_exactly(TypeBits::FLOAT)
    }

    pub fn is_likely_number(&self) -> bool {
        self.is_within(TypeBits::NUMBER)
    }

    pub fn is_number(&self) -> bool {
        self.is_likely_number() && !self.is_likely_only()
    }

    pub fn is_likely_boolean(&self) -> bool {
        self.is_exactly(TypeBits::BOOLEAN)
    }

    pub fn is_likely_string(&self) -> bool {
        self.is_exactly(TypeBits::STRING)
    }

    pub fn is_primitive(&self) -> bool {
        self.is_definite() && self.is_within(TypeBits::PRIMITIVE)
    }

    pub fn is_likely_object(&self) -> bool {
        self.is_exactly(TypeBits::OBJECT)
    }

    pub fn is_object(&self) -> bool {
        self.is_likely_object() && !self.is_likely_only()
    }

    pub fn is_likely_array(&self) -> bool {
        self.is_likely_object() && self.object.is_js_array()
    }

    pub fn is_array(&self) -> bool {
        self.is_likely_array() && !self.is_likely_only()
    }

    pub fn is_likely_native_array(&self) -> bool {
        self.is_likely_object()
            && matches!(self.object, ObjectKind::NativeIntArray | ObjectKind::NativeFloatArray)
    }

    pub fn is_likely_native_int_array(&self) -> bool {
        self.is_likely_object() && self.object == ObjectKind::NativeIntArray
    }

    pub fn is_likely_native_float_array(&self) -> bool {
        self.is_likely_object() && self.object == ObjectKind::NativeFloatArray
    }

    pub fn is_likely_object_with_array(&self) -> bool {
        self.is_likely_object() && self.object == ObjectKind::ObjectWithArray
    }

    pub fn is_likely_array_or_object_with_array(&self) -> bool {
        self.is_likely_array() || self.is_likely_object_with_array()
    }

    pub fn is_array_or_object_with_array(&self) -> bool {
        self.is_likely_array_or_object_with_array() && !self.is_likely_only()
    }

    /// Typed arrays, virtual ones included
    pub fn is_likely_typed_array(&self) -> bool {
        self.is_likely_object()
            && matches!(
                self.object,
                ObjectKind::TypedArray(_) | ObjectKind::VirtualTypedArray(_)
            )
    }

    pub fn is_likely_virtual_typed_array(&self) -> bool {
        self.is_likely_object() && matches!(self.object, ObjectKind::VirtualTypedArray(_))
    }

    /// Element kind if this is a (likely) typed array
    pub fn typed_array_kind(&self) -> Option<TypedArrayKind> {
        match self.object {
            ObjectKind::TypedArray(k) | ObjectKind::VirtualTypedArray(k) => Some(k),
            _ => None,
        }
    }

    /// Any array shape the optimizer knows how to specialize
    pub fn is_likely_any_optimized_array(&self) -> bool {
        self.is_likely_array_or_object_with_array() || self.is_likely_typed_array()
    }

    pub fn is_any_optimized_array(&self) -> bool {
        self.is_likely_any_optimized_array() && !self.is_likely_only()
    }

    /// JS array (or object-with-array) whose elements are tagged vars
    pub fn has_var_elements(&self) -> bool {
        self.is_likely_object()
            && matches!(self.object, ObjectKind::Array | ObjectKind::ObjectWithArray)
    }

    pub fn has_no_missing_values(&self) -> bool {
        self.bits.contains(TypeBits::NO_MISSING_VALUES)
    }

    pub fn set_has_no_missing_values(&self, value: bool) -> ValueType {
        let mut result = *self;
        result.bits.set(TypeBits::NO_MISSING_VALUES, value && self.is_likely_array_or_object_with_array());
        result
    }

    /// Same shape, ignoring certainty
    pub fn is_similar(&self, other: &ValueType) -> bool {
        self.kind_bits() == other.kind_bits() && self.object == other.object
    }

    /// Least upper bound
    pub fn merge(&self, other: &ValueType) -> ValueType {
        if self == other {
            return *self;
        }
        if self.is_uninitialized() || other.is_uninitialized() {
            return ValueType::UNINITIALIZED;
        }

        let mut likely = self.is_likely_only() || other.is_likely_only();
        let mut bits = (self.kind_bits() | other.kind_bits()) & !TypeBits::LIKELY;

        let object = match (self.object, other.object) {
            (a, b) if a == b => a,
            (ObjectKind::None, k) | (k, ObjectKind::None) => {
                likely = true;
                k
            }
            (a, b) if a.is_js_array() && b.is_js_array() => {
                likely = true;
                ObjectKind::Array
            }
            _ => {
                likely = true;
                ObjectKind::Object
            }
        };

        if object.is_js_array() || object == ObjectKind::ObjectWithArray {
            if self.has_no_missing_values() && other.has_no_missing_values() {
                bits |= TypeBits::NO_MISSING_VALUES;
            }
        }
        if likely {
            bits |= TypeBits::LIKELY;
        }
        ValueType { bits, object }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_uninitialized() {
            return write!(f, "Uninitialized");
        }
        if self.is_likely_only() {
            write!(f, "Likely")?;
        }
        if self.is_likely_object() {
            let name = match self.object {
                ObjectKind::None | ObjectKind::Object => "Object".to_string(),
                ObjectKind::Array => "Array".to_string(),
                ObjectKind::NativeIntArray => "NativeIntArray".to_string(),
                ObjectKind::NativeFloatArray => "NativeFloatArray".to_string(),
                ObjectKind::ObjectWithArray => "ObjectWithArray".to_string(),
                ObjectKind::TypedArray(k) => format!("{:?}Array", k),
                ObjectKind::VirtualTypedArray(k) => format!("Virtual{:?}Array", k),
            };
            write!(f, "{}", name)?;
            if self.has_no_missing_values() {
                write!(f, "_NoMissingValues")?;
            }
            return Ok(());
        }
        let names = [
            (TypeBits::INT, "Int"),
            (TypeBits::FLOAT, "Float"),
            (TypeBits::BOOLEAN, "Boolean"),
            (TypeBits::STRING, "String"),
            (TypeBits::UNDEFINED, "Undefined"),
            (TypeBits::NULL, "Null"),
            (TypeBits::OBJECT, "Object"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.bits.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_queries() {
        assert!(ValueType::INT.is_int());
        assert!(ValueType::INT.to_likely().is_likely_int());
        assert!(!ValueType::INT.to_likely().is_int());
        assert!(ValueType::INT.is_likely_number());
        assert!(!ValueType::UNINITIALIZED.is_likely_int());
    }

    #[test]
    fn test_merge_definiteness_disagreement_becomes_likely() {
        let merged = ValueType::INT.merge(&ValueType::INT.to_likely());
        assert!(merged.is_likely_int());
        assert!(merged.is_likely_only());
    }

    #[test]
    fn test_merge_int_float_is_number() {
        let merged = ValueType::INT.merge(&ValueType::FLOAT);
        assert!(merged.is_number());
        assert!(!merged.is_likely_int());
    }

    #[test]
    fn test_merge_native_arrays_disagreeing() {
        let a = ValueType::array(ObjectKind::NativeIntArray, true);
        let b = ValueType::array(ObjectKind::NativeFloatArray, true);
        let merged = a.merge(&b);
        assert!(merged.is_likely_array());
        assert!(merged.is_likely_only());
        assert!(merged.has_var_elements());
        assert!(merged.has_no_missing_values());
    }

    #[test]
    fn test_merge_different_objects_is_likely_object() {
        let a = ValueType::array(ObjectKind::Array, false);
        let b = ValueType::object(ObjectKind::TypedArray(TypedArrayKind::Int32));
        let merged = a.merge(&b);
        assert!(merged.is_likely_object());
        assert!(!merged.is_likely_any_optimized_array());
    }

    #[test]
    fn test_merge_with_unknown_is_unknown() {
        assert!(ValueType::INT.merge(&ValueType::UNINITIALIZED).is_uninitialized());
    }

    #[test]
    fn test_no_missing_values_only_on_arrays() {
        assert!(!ValueType::INT.set_has_no_missing_values(true).has_no_missing_values());
        let arr = ValueType::likely_array(ObjectKind::Array, true);
        assert!(arr.has_no_missing_values());
        assert!(!arr.set_has_no_missing_values(false).has_no_missing_values());
    }

    #[test]
    fn test_to_definite_object() {
        let likely = ValueType::likely_array(ObjectKind::NativeIntArray, true);
        let definite = likely.to_definite_object();
        assert!(definite.is_array());
        assert!(definite.is_likely_native_array());
        assert!(definite.has_no_missing_values());
    }

    #[test]
    fn test_display() {
        assert_eq!(ValueType::likely_array(ObjectKind::Array, true).to_string(), "LikelyArray_NoMissingValues");
        assert_eq!(ValueType::NUMBER.to_string(), "Int|Float");
    }
}
