//! Split-K decoder attention operator (`ck_decoderF`).
//!
//! Serves autoregressive decode steps against a padded key cache: `B`
//! sequences, each owning `P` contiguous key/value slots of which only the
//! first `seqlen[b]` are real. The operator accepts exactly one bias layout,
//! [`BlockDiagonalCausalWithOffsetPaddedKeysMask`], and hands the kernel
//! dense `[B, ..]` views of the flat ragged tensors.
//!
//! Head dims up to 256 are supported so each head vector fits in registers.
//!
//! [`BlockDiagonalCausalWithOffsetPaddedKeysMask`]: crate::attn_bias::BlockDiagonalCausalWithOffsetPaddedKeysMask

mod dispatch;
mod eligibility;

use tracing::trace;

pub use dispatch::{DecoderKernel, DecoderRequest};

use crate::attn_bias::AttentionBiasKind;
use crate::config::DecoderLimits;
use crate::dtype::DType;
use crate::error::Error;
use crate::inputs::Inputs;
use crate::op::{base_not_supported_reasons, AttentionFwOp, OpCapabilities};
use crate::tensor::Tensor;
use crate::Result;

pub const NAME: &str = "ck_decoderF";

const SUPPORTED_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32];

const SUPPORTED_ATTN_BIAS: &[AttentionBiasKind] =
    &[AttentionBiasKind::BlockDiagonalCausalWithOffsetPaddedKeys];

/// Forward-only decoder operator wrapping one kernel entry point.
pub struct CkDecoderOp<K> {
    kernel: K,
    limits: DecoderLimits,
    caps: OpCapabilities,
}

impl<K: DecoderKernel> CkDecoderOp<K> {
    #[must_use]
    pub fn new(kernel: K) -> Self {
        Self::with_limits(kernel, DecoderLimits::default())
    }

    #[must_use]
    pub fn with_limits(kernel: K, limits: DecoderLimits) -> Self {
        Self {
            kernel,
            limits,
            caps: OpCapabilities {
                name: NAME,
                supported_devices: K::SUPPORTED_DEVICES,
                supported_dtypes: SUPPORTED_DTYPES,
                supported_attn_bias: SUPPORTED_ATTN_BIAS,
                supports_dropout: false,
                supports_custom_scale: true,
                supports_different_value_embed: false,
            },
        }
    }

    #[must_use]
    pub fn limits(&self) -> &DecoderLimits {
        &self.limits
    }

    #[must_use]
    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<K: DecoderKernel> AttentionFwOp<K::Tensor> for CkDecoderOp<K> {
    fn capabilities(&self) -> &OpCapabilities {
        &self.caps
    }

    fn not_supported_reasons(&self, inp: &Inputs<K::Tensor>) -> Vec<String> {
        let mut reasons = base_not_supported_reasons(&self.caps, inp);
        eligibility::decoder_reasons(&self.limits, inp, &mut reasons);
        if !reasons.is_empty() {
            trace!(op = NAME, ?reasons, "request not supported");
        }
        reasons
    }

    fn apply(&self, inp: &mut Inputs<K::Tensor>, needs_gradient: bool) -> Result<K::Tensor> {
        if needs_gradient {
            return Err(Error::NotImplemented("gradient".into()));
        }
        inp.validate_inputs()?;

        let device = inp.query.device();
        let kind = inp.attn_bias.kind();
        let mask = inp
            .attn_bias
            .as_padded_keys_mut()
            .ok_or_else(|| dispatch::unsupported_bias(kind))?;
        mask.k_seqinfo.to(device);
        mask.q_seqinfo.to(device);

        let request = dispatch::normalize(inp)?;
        self.kernel.forward(request)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::attn_bias::{AttentionBias, BlockDiagonalCausalWithOffsetPaddedKeysMask};
    use crate::device::Device;
    use crate::tensor::tests::FakeTensor;
    use crate::view::TensorView;

    /// What the kernel saw: (shape, strides, offset) per view, positions, scale.
    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        query: (Vec<usize>, Vec<usize>, usize),
        key: (Vec<usize>, Vec<usize>, usize),
        value: (Vec<usize>, Vec<usize>, usize),
        seq_positions: Vec<i32>,
        scale: f32,
        key_aliases_input: bool,
    }

    #[derive(Default)]
    struct RecordingKernel {
        seen: RefCell<Option<Seen>>,
        key_base: RefCell<Option<*const FakeTensor>>,
    }

    impl DecoderKernel for RecordingKernel {
        type Tensor = FakeTensor;

        fn forward(&self, request: DecoderRequest<'_, FakeTensor>) -> Result<FakeTensor> {
            let key_aliases_input = self
                .key_base
                .borrow()
                .is_some_and(|p| std::ptr::eq(p, request.key.base()));
            *self.seen.borrow_mut() = Some(Seen {
                query: parts(&request.query),
                key: parts(&request.key),
                value: parts(&request.value),
                seq_positions: request.seq_positions.to_vec(),
                scale: request.scale,
                key_aliases_input,
            });
            Ok(FakeTensor::contiguous(
                request.query.shape(),
                request.query.dtype(),
                request.query.device(),
            ))
        }
    }

    fn parts(v: &TensorView<'_, FakeTensor>) -> (Vec<usize>, Vec<usize>, usize) {
        (v.shape().to_vec(), v.strides().to_vec(), v.offset())
    }

    impl RecordingKernel {
        fn seen(&self) -> Seen {
            self.seen.borrow().clone().expect("kernel was not invoked")
        }
    }

    const DEV: Device = Device::Cuda(0);

    fn bmhk(tokens: usize, heads: usize, head_dim: usize) -> FakeTensor {
        FakeTensor::contiguous(&[1, tokens, heads, head_dim], DType::F16, DEV)
    }

    /// `[1, tokens, heads, head_dim]` where every head aliases head 0.
    fn shared_kv(tokens: usize, heads: usize, head_dim: usize) -> FakeTensor {
        FakeTensor {
            shape: vec![1, tokens, heads, head_dim],
            strides: vec![tokens * head_dim, head_dim, 0, 1],
            dtype: DType::F16,
            device: DEV,
        }
    }

    fn decode_inputs(
        seqlens: &[usize],
        padding: usize,
        queries_per_seq: usize,
        heads: usize,
        head_dim: usize,
    ) -> Inputs<FakeTensor> {
        let b = seqlens.len();
        let q_seqlen = vec![queries_per_seq; b];
        let mask =
            BlockDiagonalCausalWithOffsetPaddedKeysMask::from_seqlens(&q_seqlen, padding, seqlens)
                .unwrap();
        Inputs::new(
            bmhk(b * queries_per_seq, heads, head_dim),
            bmhk(b * padding, heads, head_dim),
            bmhk(b * padding, heads, head_dim),
        )
        .with_bias(mask)
    }

    fn op() -> CkDecoderOp<RecordingKernel> {
        CkDecoderOp::new(RecordingKernel::default())
    }

    fn has(reasons: &[String], needle: &str) -> bool {
        reasons.iter().any(|r| r.contains(needle))
    }

    // ---- eligibility ----

    #[test]
    fn test_supported_decode_request() {
        let inp = decode_inputs(&[5, 9], 16, 1, 8, 64);
        assert_eq!(op().not_supported_reasons(&inp), Vec::<String>::new());
        assert!(op().supports(&inp));
        assert_eq!(op().name(), "ck_decoderF");
    }

    #[test]
    fn test_formal_batch_must_be_one() {
        let mut inp = decode_inputs(&[5, 9], 16, 1, 8, 64);
        inp.query = FakeTensor::contiguous(&[2, 1, 8, 64], DType::F16, DEV);
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "One formal batch element expected; got 2"));
    }

    #[test]
    fn test_head_dim_ceiling_and_alignment() {
        let inp = decode_inputs(&[3], 16, 1, 2, 257);
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "only head_dim<=256 is supported"));
        assert!(has(&reasons, "it needs to be divisible by 4"));

        let inp = decode_inputs(&[3], 16, 1, 2, 255);
        let reasons = op().not_supported_reasons(&inp);
        assert!(!has(&reasons, "only head_dim<=256 is supported"));
        assert!(has(&reasons, "Got head_dim=255; it needs to be divisible by 4"));

        let inp = decode_inputs(&[3], 16, 1, 2, 258);
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "Got head_dim=258; only head_dim<=256"));
        assert!(has(&reasons, "Got head_dim=258; it needs to be divisible by 4"));

        let inp = decode_inputs(&[3], 16, 1, 2, 256);
        assert!(op().supports(&inp));
    }

    #[test]
    fn test_key_must_be_contiguous_in_head_dim() {
        let mut inp = decode_inputs(&[3], 16, 1, 2, 64);
        inp.key.strides = vec![16 * 2 * 64, 1, 16, 32];
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "expect keys to have last dim contiguous"));
        assert!(!has(&reasons, "expect values"));

        // reported alongside unrelated failures too
        inp.query = FakeTensor::contiguous(&[3, 1, 2, 62], DType::F16, DEV);
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "expect keys to have last dim contiguous"));
    }

    #[test]
    fn test_value_must_be_contiguous_in_head_dim() {
        let mut inp = decode_inputs(&[3], 16, 1, 2, 64);
        inp.value.strides = vec![2048, 128, 1, 2];
        let reasons = op().not_supported_reasons(&inp);
        assert_eq!(reasons, vec!["expect values to have last dim contiguous".to_string()]);
    }

    #[test]
    fn test_empty_lanes() {
        // three sequences declared, but the key cache only holds two
        let mut inp = decode_inputs(&[3, 4, 5], 16, 1, 2, 64);
        inp.key = bmhk(32, 2, 64);
        inp.value = bmhk(32, 2, 64);
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "empty lanes not supported yet"));
    }

    #[test]
    fn test_padding_ceiling() {
        let inp = decode_inputs(&[1], 8193, 1, 2, 64);
        let reasons = op().not_supported_reasons(&inp);
        assert_eq!(reasons, vec!["key padding exceeds 8192".to_string()]);

        let inp = decode_inputs(&[1], 8192, 1, 2, 64);
        assert!(op().supports(&inp));
    }

    #[test]
    fn test_zero_padding_does_not_panic() {
        let inp = decode_inputs(&[0], 0, 1, 2, 64);
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "key padding must be positive"));
        assert!(!has(&reasons, "empty lanes"));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let inp = decode_inputs(&[], 16, 1, 2, 64);
        let reasons = op().not_supported_reasons(&inp);
        assert_eq!(reasons, vec!["batch has no sequences".to_string()]);
    }

    #[test]
    fn test_zero_head_dim_rejected() {
        let inp = decode_inputs(&[3], 16, 1, 2, 0);
        let reasons = op().not_supported_reasons(&inp);
        assert_eq!(reasons, vec!["head_dim must be positive".to_string()]);
    }

    #[test]
    fn test_ragged_query_lengths_rejected() {
        // two query tokens over two sequences, but both belong to the second
        let mut inp = decode_inputs(&[3, 4], 16, 1, 2, 64);
        inp.attn_bias =
            BlockDiagonalCausalWithOffsetPaddedKeysMask::from_seqlens(&[0, 2], 16, &[3, 4])
                .unwrap()
                .into();
        let reasons = op().not_supported_reasons(&inp);
        assert_eq!(
            reasons,
            vec!["query seqstart [0, 0, 2] does not give every sequence 1 tokens".to_string()]
        );

        // uniform lengths that disagree with the query tensor
        inp.attn_bias =
            BlockDiagonalCausalWithOffsetPaddedKeysMask::from_seqlens(&[2, 2], 16, &[3, 4])
                .unwrap()
                .into();
        assert!(has(
            &op().not_supported_reasons(&inp),
            "does not give every sequence 1 tokens"
        ));
    }

    #[test]
    fn test_kv_length_not_multiple_of_padding() {
        let mut inp = decode_inputs(&[3, 3], 16, 1, 2, 64);
        inp.key = bmhk(33, 2, 64);
        inp.value = bmhk(33, 2, 64);
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "key length 33 is not a multiple of key padding 16"));
    }

    #[test]
    fn test_query_tokens_not_divisible() {
        let mut inp = decode_inputs(&[3, 3], 16, 2, 2, 64);
        inp.query = bmhk(3, 2, 64);
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "query tokens (3) not evenly divisible across 2 sequences"));
    }

    #[test]
    fn test_bmk_rejected_without_panicking() {
        let mut inp = decode_inputs(&[3], 16, 1, 2, 64);
        inp.query = FakeTensor::contiguous(&[1, 1, 64], DType::F16, DEV);
        inp.key = FakeTensor::contiguous(&[1, 16, 64], DType::F16, DEV);
        inp.value = FakeTensor::contiguous(&[1, 16, 64], DType::F16, DEV);
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "Inputs must be BMHK. BMK not supported"));
    }

    #[test]
    fn test_other_bias_only_reports_bias_type() {
        let mut inp = decode_inputs(&[3], 16, 1, 2, 64);
        inp.attn_bias = AttentionBias::LowerTriangular;
        inp.query = FakeTensor::contiguous(&[2, 1, 2, 64], DType::F16, DEV);
        let reasons = op().not_supported_reasons(&inp);
        assert_eq!(reasons, vec!["attn_bias type is LowerTriangularMask".to_string()]);
    }

    #[test]
    fn test_device_and_dtype() {
        let mut inp = decode_inputs(&[3], 16, 1, 2, 64);
        inp.query.device = Device::Cpu;
        inp.query.dtype = DType::F64;
        let reasons = op().not_supported_reasons(&inp);
        assert!(has(&reasons, "device=cpu (supported: {cuda})"));
        assert!(has(&reasons, "dtype=f64 (supported: {f16, bf16, f32})"));
    }

    #[test]
    fn test_dropout_rejected_custom_scale_accepted() {
        let inp = decode_inputs(&[3], 16, 1, 2, 64).with_scale(0.3);
        assert!(op().supports(&inp));
        let inp = inp.with_dropout(0.1);
        assert_eq!(op().not_supported_reasons(&inp), vec!["dropout > 0.0".to_string()]);
    }

    #[test]
    fn test_reasons_are_idempotent() {
        let mut inp = decode_inputs(&[3, 4, 5], 16, 1, 2, 255);
        inp.key = bmhk(32, 2, 255);
        let first = op().not_supported_reasons(&inp);
        let second = op().not_supported_reasons(&inp);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_limits() {
        let limits = DecoderLimits {
            max_head_dim: 128,
            head_dim_multiple: 8,
            max_padding: 16,
        };
        let op = CkDecoderOp::with_limits(RecordingKernel::default(), limits);
        assert_eq!(op.limits().max_padding, 16);
        let inp = decode_inputs(&[3], 32, 1, 2, 132);
        let reasons = op.not_supported_reasons(&inp);
        assert!(has(&reasons, "only head_dim<=128"));
        assert!(has(&reasons, "divisible by 8"));
        assert!(has(&reasons, "key padding exceeds 16"));
    }

    // ---- apply ----

    #[test]
    fn test_apply_multiquery_layout() {
        let mut inp = decode_inputs(&[5, 16], 16, 1, 8, 64);
        inp.key = shared_kv(32, 8, 64);
        inp.value = shared_kv(32, 8, 64);
        let op = op();
        assert!(op.supports(&inp));
        *op.kernel().key_base.borrow_mut() = Some(std::ptr::from_ref(&inp.key));

        let out = op.apply(&mut inp, false).unwrap();
        let seen = op.kernel().seen();

        assert_eq!(seen.key.0, vec![2, 16, 1, 64]);
        assert_eq!(seen.key.1, vec![16 * 64, 64, 0, 1]);
        assert_eq!(seen.value.0, vec![2, 16, 1, 64]);
        assert_eq!(seen.query.0, vec![2, 1, 8, 64]);
        assert_eq!(seen.query.1, vec![8 * 64, 8 * 64, 64, 1]);
        assert_eq!(seen.seq_positions, vec![5, 16]);
        assert!((seen.scale - 0.125).abs() < f32::EPSILON);
        assert!(seen.key_aliases_input);
        assert_eq!(out.shape, vec![2, 1, 8, 64]);
    }

    #[test]
    fn test_apply_keeps_all_heads_without_sharing() {
        let mut inp = decode_inputs(&[1, 2, 3], 4, 2, 4, 32);
        let op = op();
        op.apply(&mut inp, false).unwrap();
        let seen = op.kernel().seen();

        assert_eq!(seen.key.0, vec![3, 4, 4, 32]);
        assert_eq!(seen.key.1, vec![4 * 128, 128, 32, 1]);
        assert_eq!(seen.value.0, vec![3, 4, 4, 32]);
        assert_eq!(seen.query.0, vec![3, 2, 4, 32]);
        assert_eq!(seen.seq_positions, vec![1, 2, 3]);
    }

    #[test]
    fn test_apply_forwards_explicit_scale() {
        let mut inp = decode_inputs(&[2], 8, 1, 2, 64).with_scale(0.25);
        let op = op();
        op.apply(&mut inp, false).unwrap();
        assert!((op.kernel().seen().scale - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_default_scale_ignores_dtype() {
        for dtype in [DType::F16, DType::BF16, DType::F32] {
            let mut inp = decode_inputs(&[2], 8, 1, 2, 64);
            inp.query.dtype = dtype;
            inp.key.dtype = dtype;
            inp.value.dtype = dtype;
            let op = op();
            op.apply(&mut inp, false).unwrap();
            assert_eq!(op.kernel().seen().scale.to_bits(), 0.125f32.to_bits());
        }
    }

    #[test]
    fn test_apply_moves_seqinfo_to_query_device() {
        let mut inp = decode_inputs(&[2, 3], 8, 1, 2, 64);
        let dev = Device::Cuda(3);
        for t in [&mut inp.query, &mut inp.key, &mut inp.value] {
            t.device = dev;
        }
        op().apply(&mut inp, false).unwrap();
        let mask = inp.attn_bias.as_padded_keys().unwrap();
        assert_eq!(mask.q_seqinfo.device(), dev);
        assert_eq!(mask.k_seqinfo.device(), dev);
    }

    #[test]
    fn test_gradient_is_not_implemented() {
        let mut inp = decode_inputs(&[5, 9], 16, 1, 8, 64);
        let op = op();
        let err = op.apply(&mut inp, true).unwrap_err();
        assert!(matches!(err, Error::NotImplemented(ref what) if what == "gradient"));
        assert!(op.kernel().seen.borrow().is_none());
    }

    #[test]
    fn test_apply_rejects_other_bias() {
        let mut inp = decode_inputs(&[5], 16, 1, 8, 64);
        inp.attn_bias = AttentionBias::None;
        let err = op().apply(&mut inp, false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedBias(_)));
    }

    #[test]
    fn test_apply_shape_errors_propagate() {
        let mut inp = decode_inputs(&[3, 3], 16, 2, 2, 64);
        inp.query = bmhk(3, 2, 64);
        let err = op().apply(&mut inp, false).unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
    }
}
