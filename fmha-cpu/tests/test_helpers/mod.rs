//! Shared helpers for CPU decoder integration tests.
//!
//! Provides deterministic input generation and a dense reference attention
//! that works directly on flat buffers, independent of any view machinery.

#![allow(dead_code)]

use fmha::{BlockDiagonalCausalWithOffsetPaddedKeysMask, Inputs};
use fmha_cpu::CpuTensor;

/// Deterministic values in `[-1, 1)` from a 64-bit LCG.
pub fn lcg_values(n: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            #[allow(clippy::cast_precision_loss)]
            let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
            unit * 2.0 - 1.0
        })
        .collect()
}

/// Shapes of one decode step.
#[derive(Debug, Clone)]
pub struct DecodeCase {
    pub seqlens: Vec<usize>,
    pub padding: usize,
    pub queries: usize,
    pub heads: usize,
    pub kv_heads: usize,
    pub head_dim: usize,
}

/// Flat buffers for a decode step, in `[tokens, heads, head_dim]` order.
#[derive(Debug, Clone)]
pub struct DecodeData {
    pub query: Vec<f32>,
    pub key: Vec<f32>,
    pub value: Vec<f32>,
}

impl DecodeCase {
    pub fn batch(&self) -> usize {
        self.seqlens.len()
    }

    /// Random real keys; padding slots are filled with `pad_value`.
    pub fn data(&self, seed: u64, pad_value: f32) -> DecodeData {
        let b = self.batch();
        let row = self.kv_heads * self.head_dim;
        let query = lcg_values(b * self.queries * self.heads * self.head_dim, seed);
        let mut key = lcg_values(b * self.padding * row, seed + 1);
        let mut value = lcg_values(b * self.padding * row, seed + 2);
        for (s, &len) in self.seqlens.iter().enumerate() {
            let start = (s * self.padding + len) * row;
            let end = (s + 1) * self.padding * row;
            key[start..end].fill(pad_value);
            value[start..end].fill(pad_value);
        }
        DecodeData { query, key, value }
    }

    pub fn mask(&self) -> BlockDiagonalCausalWithOffsetPaddedKeysMask {
        let q_seqlen = vec![self.queries; self.batch()];
        BlockDiagonalCausalWithOffsetPaddedKeysMask::from_seqlens(
            &q_seqlen,
            self.padding,
            &self.seqlens,
        )
        .expect("valid mask")
    }

    /// Contiguous f32 BMHK inputs with the padded-keys bias attached.
    pub fn inputs(&self, data: &DecodeData) -> Inputs<CpuTensor> {
        let b = self.batch();
        let q = CpuTensor::from_f32(
            &[1, b * self.queries, self.heads, self.head_dim],
            &data.query,
        )
        .expect("query");
        let kv_shape = [1, b * self.padding, self.kv_heads, self.head_dim];
        let k = CpuTensor::from_f32(&kv_shape, &data.key).expect("key");
        let v = CpuTensor::from_f32(&kv_shape, &data.value).expect("value");
        Inputs::new(q, k, v).with_bias(self.mask())
    }

    /// Dense reference: `[B, Mq, H, D]` computed from the flat buffers.
    pub fn reference(&self, data: &DecodeData, scale: f32) -> Vec<f32> {
        let (mq, h, hkv, d, p) = (
            self.queries,
            self.heads,
            self.kv_heads,
            self.head_dim,
            self.padding,
        );
        let mut out = vec![0.0f32; self.batch() * mq * h * d];
        for (b, &len) in self.seqlens.iter().enumerate() {
            for m in 0..mq {
                // query m is at absolute position len - mq + m
                let visible = (len + m + 1).saturating_sub(mq).min(p);
                for head in 0..h {
                    let kv_head = head * hkv / h;
                    let q_at = ((b * mq + m) * h + head) * d;
                    let q = &data.query[q_at..q_at + d];
                    let scores: Vec<f32> = (0..visible)
                        .map(|j| {
                            let k_at = ((b * p + j) * hkv + kv_head) * d;
                            let k = &data.key[k_at..k_at + d];
                            q.iter().zip(k).map(|(x, y)| x * y).sum::<f32>() * scale
                        })
                        .collect();
                    if scores.is_empty() {
                        continue;
                    }
                    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
                    let total: f32 = exps.iter().sum();
                    for (j, e) in exps.iter().enumerate() {
                        let v_at = ((b * p + j) * hkv + kv_head) * d;
                        for x in 0..d {
                            out[q_at + x] += e / total * data.value[v_at + x];
                        }
                    }
                }
            }
        }
        out
    }
}

/// Assert two buffers match elementwise within `tol`.
pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tol,
            "element {i}: got {a}, expected {e} (tol {tol})"
        );
    }
}
