//! Data types for tensor elements

use std::fmt;

/// Element types a tensor handed to an attention operator may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point
    F32,
    /// 16-bit floating point (IEEE 754)
    F16,
    /// Brain floating point (16-bit)
    BF16,
    /// 64-bit floating point
    F64,
    /// 32-bit signed integer
    I32,
}

impl DType {
    /// Size of the dtype in bytes
    #[must_use]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F16 | Self::BF16 => 2,
            Self::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32 => write!(f, "f32"),
            Self::F16 => write!(f, "f16"),
            Self::BF16 => write!(f, "bf16"),
            Self::F64 => write!(f, "f64"),
            Self::I32 => write!(f, "i32"),
        }
    }
}

/// Trait for types that can be used as tensor elements
pub trait TensorDType: Copy + Clone + Default + Send + Sync + 'static {
    /// The corresponding `DType` enum value
    const DTYPE: DType;
}

impl TensorDType for f32 {
    const DTYPE: DType = DType::F32;
}

impl TensorDType for half::f16 {
    const DTYPE: DType = DType::F16;
}

impl TensorDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
}

impl TensorDType for f64 {
    const DTYPE: DType = DType::F64;
}

impl TensorDType for i32 {
    const DTYPE: DType = DType::I32;
}

/// Render a dtype set the way diagnostics print it: `{f16, bf16, f32}`
#[must_use]
pub fn format_dtypes(dtypes: &[DType]) -> String {
    let names: Vec<String> = dtypes.iter().map(ToString::to_string).collect();
    format!("{{{}}}", names.join(", "))
}
