//! Zero-copy strided views over backend tensors.
//!
//! A [`TensorView`] is a shape, a set of strides and an element offset laid
//! over a borrowed tensor. Selecting, narrowing and splitting an axis only
//! rewrite that metadata, so every layout the dispatcher hands to a kernel
//! aliases the caller's storage.

use std::fmt;

use crate::device::Device;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// A strided window onto `base`.
pub struct TensorView<'a, T> {
    base: &'a T,
    offset: usize,
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl<T> Clone for TensorView<'_, T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base,
            offset: self.offset,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
        }
    }
}

impl<T> fmt::Debug for TensorView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorView")
            .field("offset", &self.offset)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .finish_non_exhaustive()
    }
}

impl<'a, T: Tensor> TensorView<'a, T> {
    /// View covering the whole of `base`.
    #[must_use]
    pub fn new(base: &'a T) -> Self {
        Self {
            base,
            offset: 0,
            shape: base.shape().to_vec(),
            strides: base.strides().to_vec(),
        }
    }

    /// The tensor this view borrows from.
    #[must_use]
    pub fn base(&self) -> &'a T {
        self.base
    }

    /// Element offset of the view's origin inside `base`.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether `axis` is a broadcast axis (stride 0).
    ///
    /// Returns `false` for out-of-range axes.
    #[must_use]
    pub fn is_broadcast(&self, axis: usize) -> bool {
        self.strides.get(axis) == Some(&0)
    }

    /// Element offset (relative to `base`) of the multi-index `index`.
    ///
    /// # Panics
    /// Panics in debug builds if `index` has the wrong rank.
    #[must_use]
    pub fn element_offset(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.shape.len(), "index rank mismatch");
        self.offset
            + index
                .iter()
                .zip(&self.strides)
                .map(|(i, s)| i * s)
                .sum::<usize>()
    }

    fn check_axis(&self, axis: usize, op: &str) -> Result<usize> {
        self.shape.get(axis).copied().ok_or_else(|| {
            Error::InvalidShape(format!(
                "{op}: axis {axis} out of range for rank-{} view {:?}",
                self.shape.len(),
                self.shape
            ))
        })
    }

    /// Drop `axis`, fixing it at `index`.
    ///
    /// # Errors
    /// Returns an error if `axis` or `index` is out of range.
    pub fn select(&self, axis: usize, index: usize) -> Result<Self> {
        let dim = self.check_axis(axis, "select")?;
        if index >= dim {
            return Err(Error::InvalidShape(format!(
                "select: index {index} out of range for axis {axis} of size {dim}"
            )));
        }
        let mut view = self.clone();
        view.offset += index * view.strides[axis];
        view.shape.remove(axis);
        view.strides.remove(axis);
        Ok(view)
    }

    /// Restrict `axis` to `start..start + len`.
    ///
    /// # Errors
    /// Returns an error if `axis` is out of range or the window exceeds it.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Self> {
        let dim = self.check_axis(axis, "narrow")?;
        if start + len > dim {
            return Err(Error::InvalidShape(format!(
                "narrow: window {start}..{} exceeds axis {axis} of size {dim}",
                start + len
            )));
        }
        let mut view = self.clone();
        view.offset += start * view.strides[axis];
        view.shape[axis] = len;
        Ok(view)
    }

    /// Split `axis` into `(outer, inner)`; at most one side may be `None`
    /// and is then inferred from the axis length.
    ///
    /// A single-axis split is always expressible as a view: an axis of
    /// stride `s` becomes two axes with strides `(inner * s, s)`.
    ///
    /// # Errors
    /// Returns an error if `axis` is out of range, both sides are `None`, a
    /// side is zero while inferring the other, or the sizes do not multiply
    /// to the axis length.
    pub fn unflatten(&self, axis: usize, outer: Option<usize>, inner: Option<usize>) -> Result<Self> {
        let dim = self.check_axis(axis, "unflatten")?;
        let (outer, inner) = match (outer, inner) {
            (Some(o), Some(i)) => (o, i),
            (Some(o), None) => (o, infer_factor(dim, o, axis)?),
            (None, Some(i)) => (infer_factor(dim, i, axis)?, i),
            (None, None) => {
                return Err(Error::InvalidShape(
                    "unflatten: at most one size can be inferred".into(),
                ))
            }
        };
        if outer * inner != dim {
            return Err(Error::ShapeMismatch {
                expected: vec![dim],
                got: vec![outer, inner],
            });
        }
        let stride = self.strides[axis];
        let mut view = self.clone();
        view.shape[axis] = inner;
        view.shape.insert(axis, outer);
        view.strides.insert(axis, inner * stride);
        Ok(view)
    }

    /// Split `axis` into `(outer, dim / outer)`.
    ///
    /// # Errors
    /// See [`Self::unflatten`].
    pub fn split_outer(&self, axis: usize, outer: usize) -> Result<Self> {
        self.unflatten(axis, Some(outer), None)
    }

    /// Split `axis` into `(dim / inner, inner)`.
    ///
    /// # Errors
    /// See [`Self::unflatten`].
    pub fn split_inner(&self, axis: usize, inner: usize) -> Result<Self> {
        self.unflatten(axis, None, Some(inner))
    }
}

fn infer_factor(dim: usize, known: usize, axis: usize) -> Result<usize> {
    if known == 0 || dim % known != 0 {
        return Err(Error::InvalidShape(format!(
            "unflatten: axis {axis} of size {dim} is not divisible by {known}"
        )));
    }
    Ok(dim / known)
}

impl<T: Tensor> Tensor for TensorView<'_, T> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn strides(&self) -> &[usize] {
        &self.strides
    }

    fn dtype(&self) -> DType {
        self.base.dtype()
    }

    fn device(&self) -> Device {
        self.base.device()
    }
}
