//! Attention request descriptor

use crate::attn_bias::AttentionBias;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// One attention request in `BMHK` layout: `(batch, tokens, heads, head_dim)`.
#[derive(Debug, Clone)]
pub struct Inputs<T> {
    pub query: T,
    pub key: T,
    pub value: T,
    pub attn_bias: AttentionBias,
    /// Dropout probability
    pub p: f32,
    /// Softmax scale; `None` means `1 / sqrt(head_dim)`
    pub scale: Option<f32>,
}

impl<T: Tensor> Inputs<T> {
    /// Request without bias, dropout or explicit scale.
    #[must_use]
    pub fn new(query: T, key: T, value: T) -> Self {
        Self {
            query,
            key,
            value,
            attn_bias: AttentionBias::None,
            p: 0.0,
            scale: None,
        }
    }

    #[must_use]
    pub fn with_bias(mut self, attn_bias: impl Into<AttentionBias>) -> Self {
        self.attn_bias = attn_bias.into();
        self
    }

    #[must_use]
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }

    #[must_use]
    pub fn with_dropout(mut self, p: f32) -> Self {
        self.p = p;
        self
    }

    /// The scale the operator will apply: the explicit one, or
    /// `1 / sqrt(head_dim)` of the query.
    #[must_use]
    pub fn scale_float(&self) -> f32 {
        self.scale
            .unwrap_or_else(|| default_scale(self.query.shape().last().copied().unwrap_or(1)))
    }

    /// Cross-tensor consistency every operator relies on.
    ///
    /// # Errors
    /// Returns an error if query, key and value disagree on dtype, device or
    /// rank, if key and value shapes differ, or if query and key disagree on
    /// head dimension.
    pub fn validate_inputs(&self) -> Result<()> {
        let dtype = self.query.dtype();
        for (name, t) in [("key", &self.key), ("value", &self.value)] {
            if t.dtype() != dtype {
                return Err(Error::DtypeMismatch {
                    expected: dtype.to_string(),
                    got: format!("{} ({name})", t.dtype()),
                });
            }
        }

        let device = self.query.device();
        for (name, t) in [("key", &self.key), ("value", &self.value)] {
            if t.device() != device {
                return Err(Error::DeviceMismatch {
                    expected: device.to_string(),
                    got: format!("{} ({name})", t.device()),
                });
            }
        }

        if self.key.ndim() != self.query.ndim() || self.value.ndim() != self.query.ndim() {
            return Err(Error::InvalidShape(format!(
                "query/key/value must have the same rank, got {:?} / {:?} / {:?}",
                self.query.shape(),
                self.key.shape(),
                self.value.shape()
            )));
        }

        if self.key.shape() != self.value.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.key.shape().to_vec(),
                got: self.value.shape().to_vec(),
            });
        }

        if self.query.shape().last() != self.key.shape().last() {
            return Err(Error::InvalidShape(format!(
                "query and key head dims differ: {:?} vs {:?}",
                self.query.shape(),
                self.key.shape()
            )));
        }

        Ok(())
    }
}

/// `1 / sqrt(head_dim)`, evaluated in f64 whatever the tensor dtype.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn default_scale(head_dim: usize) -> f32 {
    (1.0 / (head_dim as f64).sqrt()) as f32
}
