//! Reference decoder-attention kernel.
//!
//! Scalar f32 implementation of the split-K decoder contract: for each
//! sequence `b`, query `m` of `Mq` sits at absolute position
//! `seq_positions[b] - Mq + m` and attends to every key slot before and
//! including it. Slots at or past `seq_positions[b]` are padding and never
//! contribute. Intended for testing dispatch on machines without a GPU.

use fmha::tensor::Tensor;
use fmha::view::TensorView;
use fmha::{DecoderKernel, DecoderRequest, DeviceKind, Error, Result};
use tracing::trace;

use crate::tensor::CpuTensor;

/// CPU reference for [`DecoderKernel`].
///
/// Output is always f32, shaped `[B, Mq, H, D]` like the query view.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuDecoderKernel;

impl DecoderKernel for CpuDecoderKernel {
    type Tensor = CpuTensor;

    const SUPPORTED_DEVICES: &'static [DeviceKind] = &[DeviceKind::Cpu];

    fn forward(&self, request: DecoderRequest<'_, CpuTensor>) -> Result<CpuTensor> {
        let dims = Dims::check(&request)?;
        trace!(
            batch = dims.batch,
            queries = dims.queries,
            heads = dims.heads,
            kv_heads = dims.kv_heads,
            padding = dims.padding,
            head_dim = dims.head_dim,
            scale = request.scale,
            "cpu decoder forward"
        );

        let Dims {
            batch,
            queries,
            heads,
            kv_heads,
            padding,
            head_dim,
        } = dims;
        let group = heads / kv_heads;

        let mut output = vec![0.0f32; batch * queries * heads * head_dim];
        let mut q = vec![0.0f32; head_dim];
        let mut row = vec![0.0f32; head_dim];
        let mut scores = Vec::with_capacity(padding);

        for b in 0..batch {
            let seqlen = i64::from(request.seq_positions[b]);
            for m in 0..queries {
                let visible = visible_keys(seqlen, queries, m, padding);
                if visible == 0 {
                    continue;
                }
                for h in 0..heads {
                    let kv_h = h / group;
                    read_row(&request.query, [b, m, h], &mut q)?;

                    // Q @ K^T * scale
                    scores.clear();
                    for j in 0..visible {
                        read_row(&request.key, [b, j, kv_h], &mut row)?;
                        let dot: f32 = q.iter().zip(&row).map(|(a, k)| a * k).sum();
                        scores.push(dot * request.scale);
                    }

                    // Softmax
                    let max_score = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    let mut sum = 0.0f32;
                    for score in &mut scores {
                        *score = (*score - max_score).exp();
                        sum += *score;
                    }
                    if sum > 0.0 {
                        for score in &mut scores {
                            *score /= sum;
                        }
                    }

                    // Weighted sum of V
                    let o_offset = ((b * queries + m) * heads + h) * head_dim;
                    let out = &mut output[o_offset..o_offset + head_dim];
                    for (j, &weight) in scores.iter().enumerate() {
                        read_row(&request.value, [b, j, kv_h], &mut row)?;
                        for (o, v) in out.iter_mut().zip(&row) {
                            *o += weight * v;
                        }
                    }
                }
            }
        }

        CpuTensor::from_f32(&[batch, queries, heads, head_dim], &output)
    }
}

struct Dims {
    batch: usize,
    queries: usize,
    heads: usize,
    kv_heads: usize,
    padding: usize,
    head_dim: usize,
}

impl Dims {
    fn check(request: &DecoderRequest<'_, CpuTensor>) -> Result<Self> {
        let (q, k, v) = (request.query.shape(), request.key.shape(), request.value.shape());
        if q.len() != 4 || k.len() != 4 {
            return Err(Error::InvalidShape(format!(
                "decoder expects rank-4 query and key, got {q:?} and {k:?}"
            )));
        }
        if k != v {
            return Err(Error::ShapeMismatch {
                expected: k.to_vec(),
                got: v.to_vec(),
            });
        }
        let dims = Self {
            batch: q[0],
            queries: q[1],
            heads: q[2],
            kv_heads: k[2],
            padding: k[1],
            head_dim: q[3],
        };
        if k[0] != dims.batch || k[3] != dims.head_dim {
            return Err(Error::ShapeMismatch {
                expected: vec![dims.batch, dims.padding, dims.kv_heads, dims.head_dim],
                got: k.to_vec(),
            });
        }
        if dims.kv_heads == 0 || dims.heads % dims.kv_heads != 0 {
            return Err(Error::InvalidShape(format!(
                "{} query heads cannot share {} kv heads",
                dims.heads, dims.kv_heads
            )));
        }
        if request.seq_positions.len() != dims.batch {
            return Err(Error::Kernel(format!(
                "{} sequence positions for batch of {}",
                request.seq_positions.len(),
                dims.batch
            )));
        }
        Ok(dims)
    }
}

/// Number of leading key slots query `m` of `queries` may attend to.
fn visible_keys(seqlen: i64, queries: usize, m: usize, padding: usize) -> usize {
    let behind = i64::try_from(queries - 1 - m).unwrap_or(i64::MAX);
    let visible = seqlen.saturating_sub(behind);
    usize::try_from(visible).map_or(0, |v| v.min(padding))
}

fn read_row(view: &TensorView<'_, CpuTensor>, [i, j, k]: [usize; 3], out: &mut [f32]) -> Result<()> {
    let base = view.base();
    let row = view.element_offset(&[i, j, k, 0]);
    let stride = view.strides()[3];
    for (d, slot) in out.iter_mut().enumerate() {
        *slot = base.get_f32(row + d * stride)?;
    }
    Ok(())
}
