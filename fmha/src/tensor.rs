//! Tensor trait definition

use crate::device::Device;
use crate::dtype::DType;

/// Backend-neutral description of a strided tensor.
///
/// Operators never touch storage: they only need the layout (shape and
/// strides, in elements), the element type, and the placement. Backends
/// (CPU, CUDA, ROCm) implement this trait on their own tensor types.
///
/// A stride of `0` marks a broadcast axis: every index along it aliases the
/// same memory.
pub trait Tensor: Sized {
    /// Returns the shape of the tensor as a slice of dimensions
    fn shape(&self) -> &[usize];

    /// Returns the stride of each dimension, in elements
    fn strides(&self) -> &[usize];

    /// Returns the data type of tensor elements
    fn dtype(&self) -> DType;

    /// Returns the device the tensor lives on
    fn device(&self) -> Device;

    /// Returns the total number of elements in the tensor
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns the number of dimensions (rank) of the tensor
    fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Stride of the innermost dimension, if the tensor has one
    fn last_stride(&self) -> Option<usize> {
        self.strides().last().copied()
    }

    /// Returns true if the strides describe a dense row-major layout
    fn is_contiguous(&self) -> bool {
        contiguous_strides(self.shape()).as_slice() == self.strides()
    }

    /// Returns the size of the tensor data in bytes
    fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype().size_in_bytes()
    }
}

/// Row-major strides for `shape`.
#[must_use]
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}
