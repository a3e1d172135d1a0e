//! CPU tensor implementation.

use std::sync::Arc;

use fmha::dtype::{DType, TensorDType};
use fmha::tensor::{contiguous_strides, Tensor};
use fmha::{Device, Error, Result};

/// A CPU-resident strided tensor backed by shared byte storage.
///
/// Uses `Arc<Vec<u8>>` so clones, `expand` and `as_strided` are cheap
/// (shared backing). Offsets and strides are in elements. Reads go through
/// [`CpuTensor::get_f32`], which casts bf16/f16 on load.
#[derive(Clone)]
pub struct CpuTensor {
    data: Arc<Vec<u8>>,
    offset: usize,
    shape: Vec<usize>,
    strides: Vec<usize>,
    dtype: DType,
}

impl std::fmt::Debug for CpuTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuTensor")
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("offset", &self.offset)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}

impl CpuTensor {
    /// Create a contiguous tensor from a typed slice.
    ///
    /// # Errors
    /// Returns an error if `data.len()` is not the product of `shape`.
    pub fn from_slice<E: TensorDType + bytemuck::Pod>(shape: &[usize], data: &[E]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data: Arc::new(bytemuck::cast_slice(data).to_vec()),
            offset: 0,
            shape: shape.to_vec(),
            strides: contiguous_strides(shape),
            dtype: E::DTYPE,
        })
    }

    /// Create a contiguous f32 tensor.
    ///
    /// # Errors
    /// Returns an error if `data.len()` is not the product of `shape`.
    pub fn from_f32(shape: &[usize], data: &[f32]) -> Result<Self> {
        Self::from_slice(shape, data)
    }

    /// Create a contiguous f16 tensor, rounding each value.
    ///
    /// # Errors
    /// Returns an error if `data.len()` is not the product of `shape`.
    pub fn from_f16(shape: &[usize], data: &[f32]) -> Result<Self> {
        let data: Vec<half::f16> = data.iter().map(|&v| half::f16::from_f32(v)).collect();
        Self::from_slice(shape, &data)
    }

    /// Create a contiguous bf16 tensor, rounding each value.
    ///
    /// # Errors
    /// Returns an error if `data.len()` is not the product of `shape`.
    pub fn from_bf16(shape: &[usize], data: &[f32]) -> Result<Self> {
        let data: Vec<half::bf16> = data.iter().map(|&v| half::bf16::from_f32(v)).collect();
        Self::from_slice(shape, &data)
    }

    /// Create a zero-filled contiguous tensor.
    #[must_use]
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            data: Arc::new(vec![0u8; numel * dtype.size_in_bytes()]),
            offset: 0,
            shape: shape.to_vec(),
            strides: contiguous_strides(shape),
            dtype,
        }
    }

    /// Number of elements in the backing storage.
    #[must_use]
    pub fn storage_len(&self) -> usize {
        self.data.len() / self.dtype.size_in_bytes()
    }

    /// Whether `other` shares this tensor's backing storage.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Broadcast a size-1 `axis` to `size` without copying (stride 0).
    ///
    /// # Errors
    /// Returns an error if `axis` is out of range or its size is not 1.
    pub fn expand(&self, axis: usize, size: usize) -> Result<Self> {
        match self.shape.get(axis) {
            Some(1) => {}
            Some(&dim) => {
                return Err(Error::InvalidShape(format!(
                    "expand: axis {axis} has size {dim}, expected 1"
                )))
            }
            None => {
                return Err(Error::InvalidShape(format!(
                    "expand: axis {axis} out of range for shape {:?}",
                    self.shape
                )))
            }
        }
        let mut out = self.clone();
        out.shape[axis] = size;
        out.strides[axis] = 0;
        Ok(out)
    }

    /// Reinterpret the storage with a new layout, offset relative to this
    /// tensor's origin.
    ///
    /// # Errors
    /// Returns an error if the ranks of `shape` and `strides` differ or the
    /// layout reaches past the end of storage.
    pub fn as_strided(&self, shape: &[usize], strides: &[usize], offset: usize) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(Error::InvalidShape(format!(
                "as_strided: shape {shape:?} and strides {strides:?} differ in rank"
            )));
        }
        let offset = self.offset + offset;
        if shape.iter().all(|&d| d > 0) {
            let last = offset
                + shape
                    .iter()
                    .zip(strides)
                    .map(|(d, s)| (d - 1) * s)
                    .sum::<usize>();
            if last >= self.storage_len() {
                return Err(Error::InvalidShape(format!(
                    "as_strided: element {last} out of bounds for storage of {}",
                    self.storage_len()
                )));
            }
        }
        Ok(Self {
            data: Arc::clone(&self.data),
            offset,
            shape: shape.to_vec(),
            strides: strides.to_vec(),
            dtype: self.dtype,
        })
    }

    /// Read the element `index` elements past this tensor's origin, as f32.
    ///
    /// # Errors
    /// Returns an error if the element is out of bounds or the dtype is not
    /// a floating-point type.
    pub fn get_f32(&self, index: usize) -> Result<f32> {
        let size = self.dtype.size_in_bytes();
        let start = (self.offset + index) * size;
        let bytes = self.data.get(start..start + size).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "element {} out of bounds for storage of {}",
                self.offset + index,
                self.storage_len()
            ))
        })?;
        match self.dtype {
            DType::F32 => Ok(bytemuck::pod_read_unaligned::<f32>(bytes)),
            DType::F16 => Ok(bytemuck::pod_read_unaligned::<half::f16>(bytes).to_f32()),
            DType::BF16 => Ok(bytemuck::pod_read_unaligned::<half::bf16>(bytes).to_f32()),
            #[allow(clippy::cast_possible_truncation)]
            DType::F64 => Ok(bytemuck::pod_read_unaligned::<f64>(bytes) as f32),
            other => Err(Error::DtypeMismatch {
                expected: "floating point".to_string(),
                got: other.to_string(),
            }),
        }
    }

    /// Gather the logical contents in row-major order, casting to f32.
    ///
    /// # Errors
    /// Returns an error if the dtype is not a floating-point type.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(self.numel());
        let mut index = vec![0usize; self.shape.len()];
        for _ in 0..self.numel() {
            let elem: usize = index.iter().zip(&self.strides).map(|(i, s)| i * s).sum();
            out.push(self.get_f32(elem)?);
            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < self.shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        Ok(out)
    }
}

impl Tensor for CpuTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn strides(&self) -> &[usize] {
        &self.strides
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn device(&self) -> Device {
        Device::Cpu
    }
}
