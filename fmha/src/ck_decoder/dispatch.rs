//! Layout normalization: flat ragged BMHK tensors to dense per-sequence views.

use tracing::debug;

use crate::attn_bias::AttentionBiasKind;
use crate::device::DeviceKind;
use crate::error::{Error, Result};
use crate::inputs::{default_scale, Inputs};
use crate::tensor::Tensor;
use crate::view::TensorView;

/// The five values handed to the decoder kernel.
///
/// Shapes, with `B` sequences, `Mq` queries per sequence, `P` padding slots,
/// `H` query heads, `Hkv` kv heads (1 under multi-query sharing) and `D`
/// head dim:
///
/// * `query`: `[B, Mq, H, D]`
/// * `key`, `value`: `[B, P, Hkv, D]`
/// * `seq_positions`: `[B]`, real key length of each sequence
#[derive(Debug, Clone)]
pub struct DecoderRequest<'a, T> {
    pub query: TensorView<'a, T>,
    pub key: TensorView<'a, T>,
    pub value: TensorView<'a, T>,
    pub seq_positions: &'a [i32],
    pub scale: f32,
}

/// Entry point of a fused decoder-attention kernel.
///
/// Implementations mask key slots at or past `seq_positions[b]` and return a
/// tensor shaped like `request.query`.
pub trait DecoderKernel {
    type Tensor: Tensor;

    /// Device classes the kernel can run on.
    const SUPPORTED_DEVICES: &'static [DeviceKind] = &[DeviceKind::Cuda];

    /// # Errors
    /// Returns an error if the launch fails or the request is malformed.
    fn forward(&self, request: DecoderRequest<'_, Self::Tensor>) -> Result<Self::Tensor>;
}

pub(super) fn unsupported_bias(kind: AttentionBiasKind) -> Error {
    Error::UnsupportedBias(format!(
        "expected {}, got {kind}",
        AttentionBiasKind::BlockDiagonalCausalWithOffsetPaddedKeys
    ))
}

/// Derive the kernel's dense views of `inp` without copying.
pub(super) fn normalize<T: Tensor>(inp: &Inputs<T>) -> Result<DecoderRequest<'_, T>> {
    let mask = inp
        .attn_bias
        .as_padded_keys()
        .ok_or_else(|| unsupported_bias(inp.attn_bias.kind()))?;
    if inp.query.ndim() != 4 || inp.key.ndim() != 4 {
        return Err(Error::InvalidShape(format!(
            "expected BMHK inputs, got query {:?} and key {:?}",
            inp.query.shape(),
            inp.key.shape()
        )));
    }

    let padding = mask.k_seqinfo.padding();
    // kv head axis is a broadcast view, not distinct storage
    let multiquery = inp.key.strides()[2] == 0;

    let key = kv_view(&inp.key, padding, multiquery)?;
    let value = kv_view(&inp.value, padding, multiquery)?;
    let num_sequences = key.shape()[0];

    let query = TensorView::new(&inp.query)
        .select(0, 0)?
        .split_outer(0, num_sequences)?;

    let scale = inp.scale.unwrap_or_else(|| default_scale(key.shape()[3]));

    debug!(
        num_sequences,
        padding,
        queries_per_sequence = query.shape()[1],
        multiquery,
        scale,
        "normalized decoder layout"
    );

    Ok(DecoderRequest {
        query,
        key,
        value,
        seq_positions: mask.k_seqinfo.seqlen(),
        scale,
    })
}

/// `[1, B*P, Hkv, D]` to `[B, P, Hkv, D]`, keeping a single head when every
/// head aliases the same memory.
fn kv_view<T: Tensor>(t: &T, padding: usize, multiquery: bool) -> Result<TensorView<'_, T>> {
    let view = TensorView::new(t).select(0, 0)?;
    let view = if multiquery { view.narrow(1, 0, 1)? } else { view };
    view.split_inner(0, padding)
}
