//! fmha: memory-efficient attention operator dispatch
//!
//! This crate provides the backend-neutral pieces of attention dispatch:
//! tensor layout descriptions, attention-bias descriptors, the operator
//! interface, and the split-K decoder operator that adapts flat ragged
//! inputs to a fused decode kernel. Kernels themselves live in backend
//! crates (see `fmha-cpu` for the reference implementation).

pub mod attn_bias;
pub mod ck_decoder;
pub mod config;
pub mod device;
pub mod dtype;
pub mod error;
pub mod inputs;
pub mod op;
pub mod tensor;
pub mod view;

pub use attn_bias::{
    AttentionBias, AttentionBiasKind, BlockDiagonalCausalWithOffsetPaddedKeysMask,
    BlockDiagonalMask, PaddedSeqLenInfo, SeqLenInfo,
};
pub use ck_decoder::{CkDecoderOp, DecoderKernel, DecoderRequest};
pub use config::DecoderLimits;
pub use device::{Device, DeviceKind};
pub use dtype::{DType, TensorDType};
pub use error::{Error, Result};
pub use inputs::{default_scale, Inputs};
pub use op::{AttentionFwOp, OpCapabilities};
pub use tensor::Tensor;
pub use view::TensorView;
