//! Forward attention operator interface.
//!
//! A generic dispatcher owns a fixed table of operators and, for each request,
//! picks the first one whose [`AttentionFwOp::not_supported_reasons`] comes
//! back empty. Operators never register themselves anywhere.

use crate::attn_bias::AttentionBiasKind;
use crate::device::{format_device_kinds, DeviceKind};
use crate::dtype::{format_dtypes, DType};
use crate::inputs::Inputs;
use crate::tensor::Tensor;
use crate::Result;

/// Static description of what an operator accepts.
#[derive(Debug, Clone)]
pub struct OpCapabilities {
    pub name: &'static str,
    pub supported_devices: &'static [DeviceKind],
    pub supported_dtypes: &'static [DType],
    pub supported_attn_bias: &'static [AttentionBiasKind],
    pub supports_dropout: bool,
    pub supports_custom_scale: bool,
    pub supports_different_value_embed: bool,
}

/// A forward-only attention operator.
pub trait AttentionFwOp<T: Tensor> {
    fn capabilities(&self) -> &OpCapabilities;

    /// Operator name used in dispatch diagnostics.
    fn name(&self) -> &'static str {
        self.capabilities().name
    }

    /// Every reason this operator cannot run `inp`; empty means supported.
    ///
    /// Never fails and never mutates `inp`.
    fn not_supported_reasons(&self, inp: &Inputs<T>) -> Vec<String> {
        base_not_supported_reasons(self.capabilities(), inp)
    }

    fn supports(&self, inp: &Inputs<T>) -> bool {
        self.not_supported_reasons(inp).is_empty()
    }

    /// Run the operator.
    ///
    /// # Errors
    /// Returns an error if a gradient is requested from a forward-only
    /// operator, or if `inp` violates a precondition that
    /// [`Self::not_supported_reasons`] would have reported.
    fn apply(&self, inp: &mut Inputs<T>, needs_gradient: bool) -> Result<T>;
}

/// Checks shared by every operator: placement, element type, bias kind,
/// dropout, custom scale and value embedding width.
#[must_use]
pub fn base_not_supported_reasons<T: Tensor>(caps: &OpCapabilities, inp: &Inputs<T>) -> Vec<String> {
    let mut reasons = Vec::new();

    let device = inp.query.device();
    if !caps.supported_devices.contains(&device.kind()) {
        reasons.push(format!(
            "device={} (supported: {})",
            device.kind(),
            format_device_kinds(caps.supported_devices)
        ));
    }

    let dtype = inp.query.dtype();
    if !caps.supported_dtypes.contains(&dtype) {
        reasons.push(format!(
            "dtype={dtype} (supported: {})",
            format_dtypes(caps.supported_dtypes)
        ));
    }

    let bias = inp.attn_bias.kind();
    if !caps.supported_attn_bias.contains(&bias) {
        reasons.push(format!("attn_bias type is {bias}"));
    }

    if inp.p != 0.0 && !caps.supports_dropout {
        reasons.push("dropout > 0.0".to_string());
    }

    if inp.scale.is_some() && !caps.supports_custom_scale {
        reasons.push("has custom scale".to_string());
    }

    if !caps.supports_different_value_embed
        && inp.query.shape().last() != inp.value.shape().last()
    {
        reasons.push("query.shape[-1] != value.shape[-1]".to_string());
    }

    reasons
}
