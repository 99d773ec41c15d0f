//! IR machine types
//!
//! Every symbol has a declared representation. The optimizer splits a
//! tagged "var" symbol into parallel specialized symbols (int32, float64,
//! simd128) that alias the same logical value.

/// Representation of a symbol or operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    /// Tagged value (unknown/polymorphic)
    Var,
    /// Specialized signed 32-bit integer
    Int32,
    /// Specialized unsigned 32-bit integer (known non-negative index)
    Uint32,
    /// Specialized 64-bit float
    Float64,
    /// Specialized 128-bit SIMD vector
    Simd128,
}

impl IrType {
    /// Whether this is a specialized (non-var) representation
    pub fn is_type_spec(&self) -> bool {
        !matches!(self, IrType::Var)
    }

    /// Whether this is one of the int32 representations
    pub fn is_int32(&self) -> bool {
        matches!(self, IrType::Int32 | IrType::Uint32)
    }

    /// Whether the value is held as a tagged var
    pub fn is_var(&self) -> bool {
        matches!(self, IrType::Var)
    }
}

impl std::fmt::Display for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrType::Var => write!(f, "var"),
            IrType::Int32 => write!(f, "i32"),
            IrType::Uint32 => write!(f, "u32"),
            IrType::Float64 => write!(f, "f64"),
            IrType::Simd128 => write!(f, "simd"),
        }
    }
}
