//! CPU backend for fmha.
//!
//! Provides a strided host tensor and a pure-CPU reference for the split-K
//! decoder kernel. All compute is done in f32; bf16/f16 inputs are cast on
//! load.
//!
//! This backend is intended for debugging and testing dispatch on machines
//! without a GPU. It is not optimised for throughput.

#![allow(clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod decoder;
pub mod tensor;

pub use decoder::CpuDecoderKernel;
pub use tensor::CpuTensor;

/// Decoder operator wired to the CPU reference kernel.
pub type CpuDecoderOp = fmha::CkDecoderOp<CpuDecoderKernel>;

/// Build a [`CpuDecoderOp`] with default limits.
#[must_use]
pub fn cpu_decoder_op() -> CpuDecoderOp {
    fmha::CkDecoderOp::new(CpuDecoderKernel)
}
