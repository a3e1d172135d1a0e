//! Attention-bias descriptors for ragged batches.
//!
//! A ragged batch packs `B` independent sequences into one flat token axis.
//! The side tables here say where each sequence starts (query side) and, for
//! padded key caches, how many slots each sequence reserves and how many of
//! them hold real keys.

use std::fmt;

use crate::device::Device;
use crate::error::{Error, Result};

/// The closed set of bias layouts a generic dispatcher can hand to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttentionBiasKind {
    None,
    LowerTriangular,
    BlockDiagonal,
    BlockDiagonalCausal,
    BlockDiagonalCausalWithOffsetPaddedKeys,
}

impl fmt::Display for AttentionBiasKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::LowerTriangular => "LowerTriangularMask",
            Self::BlockDiagonal => "BlockDiagonalMask",
            Self::BlockDiagonalCausal => "BlockDiagonalCausalMask",
            Self::BlockDiagonalCausalWithOffsetPaddedKeys => {
                "BlockDiagonalCausalWithOffsetPaddedKeysMask"
            }
        };
        f.write_str(name)
    }
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::InvalidArgument(format!("{what} {value} does not fit in i32")))
}

/// Start offsets of each sequence in a flat token axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqLenInfo {
    seqstart: Vec<i32>,
    min_seqlen: usize,
    max_seqlen: usize,
    device: Device,
}

impl SeqLenInfo {
    /// Build from per-sequence lengths: `seqstart` is their running sum,
    /// starting at 0.
    ///
    /// # Errors
    /// Returns an error if the total length does not fit in `i32`.
    pub fn from_seqlens(seqlens: &[usize]) -> Result<Self> {
        let mut seqstart = Vec::with_capacity(seqlens.len() + 1);
        let mut total = 0usize;
        seqstart.push(0);
        for &len in seqlens {
            total += len;
            seqstart.push(to_i32(total, "cumulative sequence length")?);
        }
        Ok(Self {
            seqstart,
            min_seqlen: seqlens.iter().copied().min().unwrap_or(0),
            max_seqlen: seqlens.iter().copied().max().unwrap_or(0),
            device: Device::Cpu,
        })
    }

    /// Build from explicit start offsets.
    ///
    /// # Errors
    /// Returns an error if `seqstart` is empty, does not start at 0, or
    /// decreases anywhere.
    pub fn from_seqstart(seqstart: Vec<i32>) -> Result<Self> {
        if seqstart.first() != Some(&0) {
            return Err(Error::InvalidArgument(format!(
                "seqstart must begin at 0, got {seqstart:?}"
            )));
        }
        let mut lens = Vec::with_capacity(seqstart.len() - 1);
        for pair in seqstart.windows(2) {
            let len = usize::try_from(i64::from(pair[1]) - i64::from(pair[0])).map_err(|_| {
                Error::InvalidArgument(format!("seqstart must be non-decreasing, got {seqstart:?}"))
            })?;
            lens.push(len);
        }
        Ok(Self {
            min_seqlen: lens.iter().copied().min().unwrap_or(0),
            max_seqlen: lens.iter().copied().max().unwrap_or(0),
            seqstart,
            device: Device::Cpu,
        })
    }

    /// `B + 1` start offsets; the last one is the total token count.
    #[must_use]
    pub fn seqstart(&self) -> &[i32] {
        &self.seqstart
    }

    /// Number of sequences declared by `seqstart`.
    #[must_use]
    pub fn num_sequences(&self) -> usize {
        self.seqstart.len().saturating_sub(1)
    }

    #[must_use]
    pub fn min_seqlen(&self) -> usize {
        self.min_seqlen
    }

    #[must_use]
    pub fn max_seqlen(&self) -> usize {
        self.max_seqlen
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Relocate onto `device`. Idempotent.
    pub fn to(&mut self, device: Device) {
        self.device = device;
    }
}

/// Key-side layout where every sequence reserves exactly `padding` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedSeqLenInfo {
    seqlen: Vec<i32>,
    seqstart: Vec<i32>,
    padding: usize,
    min_seqlen: usize,
    max_seqlen: usize,
    device: Device,
}

impl PaddedSeqLenInfo {
    /// Build from the real (unpadded) length of each sequence.
    ///
    /// # Errors
    /// Returns an error if any length exceeds `padding` or the padded total
    /// does not fit in `i32`.
    pub fn from_seqlens_padded(seqlens: &[usize], padding: usize) -> Result<Self> {
        if let Some(&len) = seqlens.iter().find(|&&len| len > padding) {
            return Err(Error::InvalidArgument(format!(
                "sequence length {len} exceeds key padding {padding}"
            )));
        }
        let seqlen = seqlens
            .iter()
            .map(|&len| to_i32(len, "sequence length"))
            .collect::<Result<Vec<_>>>()?;
        let seqstart = (0..=seqlens.len())
            .map(|i| to_i32(i * padding, "padded sequence start"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            seqlen,
            seqstart,
            padding,
            min_seqlen: seqlens.iter().copied().min().unwrap_or(0),
            max_seqlen: seqlens.iter().copied().max().unwrap_or(0),
            device: Device::Cpu,
        })
    }

    /// Real key length of each sequence.
    #[must_use]
    pub fn seqlen(&self) -> &[i32] {
        &self.seqlen
    }

    /// Slot offsets `[0, P, 2P, .., B*P]`.
    #[must_use]
    pub fn seqstart(&self) -> &[i32] {
        &self.seqstart
    }

    /// Slots reserved per sequence.
    #[must_use]
    pub fn padding(&self) -> usize {
        self.padding
    }

    #[must_use]
    pub fn num_sequences(&self) -> usize {
        self.seqlen.len()
    }

    #[must_use]
    pub fn min_seqlen(&self) -> usize {
        self.min_seqlen
    }

    #[must_use]
    pub fn max_seqlen(&self) -> usize {
        self.max_seqlen
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Relocate onto `device`. Idempotent.
    pub fn to(&mut self, device: Device) {
        self.device = device;
    }
}

/// Block-diagonal mask: sequence `i` of the queries only sees sequence `i`
/// of the keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDiagonalMask {
    pub q_seqinfo: SeqLenInfo,
    pub k_seqinfo: SeqLenInfo,
}

impl BlockDiagonalMask {
    /// Keys default to the query lengths when `kv_seqlen` is `None`.
    ///
    /// # Errors
    /// Returns an error if the two length lists differ in size.
    pub fn from_seqlens(q_seqlen: &[usize], kv_seqlen: Option<&[usize]>) -> Result<Self> {
        let kv_seqlen = kv_seqlen.unwrap_or(q_seqlen);
        if kv_seqlen.len() != q_seqlen.len() {
            return Err(Error::InvalidArgument(format!(
                "{} query sequences but {} key sequences",
                q_seqlen.len(),
                kv_seqlen.len()
            )));
        }
        Ok(Self {
            q_seqinfo: SeqLenInfo::from_seqlens(q_seqlen)?,
            k_seqinfo: SeqLenInfo::from_seqlens(kv_seqlen)?,
        })
    }
}

/// Block-diagonal causal mask over a padded key cache.
///
/// Query `m` of a sequence with `Mq` queries and `L` real keys may attend to
/// key slots `j < L - (Mq - 1 - m)`; slots at or past `L` are padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDiagonalCausalWithOffsetPaddedKeysMask {
    pub q_seqinfo: SeqLenInfo,
    pub k_seqinfo: PaddedSeqLenInfo,
}

impl BlockDiagonalCausalWithOffsetPaddedKeysMask {
    /// # Errors
    /// Returns an error if the query and key length lists differ in size or
    /// any key length exceeds `kv_padding`.
    pub fn from_seqlens(q_seqlen: &[usize], kv_padding: usize, kv_seqlen: &[usize]) -> Result<Self> {
        if q_seqlen.len() != kv_seqlen.len() {
            return Err(Error::InvalidArgument(format!(
                "{} query sequences but {} key sequences",
                q_seqlen.len(),
                kv_seqlen.len()
            )));
        }
        Ok(Self {
            q_seqinfo: SeqLenInfo::from_seqlens(q_seqlen)?,
            k_seqinfo: PaddedSeqLenInfo::from_seqlens_padded(kv_seqlen, kv_padding)?,
        })
    }
}

/// Bias attached to one attention request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttentionBias {
    #[default]
    None,
    LowerTriangular,
    BlockDiagonal(BlockDiagonalMask),
    BlockDiagonalCausal(BlockDiagonalMask),
    BlockDiagonalCausalWithOffsetPaddedKeys(BlockDiagonalCausalWithOffsetPaddedKeysMask),
}

impl AttentionBias {
    #[must_use]
    pub fn kind(&self) -> AttentionBiasKind {
        match self {
            Self::None => AttentionBiasKind::None,
            Self::LowerTriangular => AttentionBiasKind::LowerTriangular,
            Self::BlockDiagonal(_) => AttentionBiasKind::BlockDiagonal,
            Self::BlockDiagonalCausal(_) => AttentionBiasKind::BlockDiagonalCausal,
            Self::BlockDiagonalCausalWithOffsetPaddedKeys(_) => {
                AttentionBiasKind::BlockDiagonalCausalWithOffsetPaddedKeys
            }
        }
    }

    #[must_use]
    pub fn as_padded_keys(&self) -> Option<&BlockDiagonalCausalWithOffsetPaddedKeysMask> {
        match self {
            Self::BlockDiagonalCausalWithOffsetPaddedKeys(mask) => Some(mask),
            _ => None,
        }
    }

    pub fn as_padded_keys_mut(&mut self) -> Option<&mut BlockDiagonalCausalWithOffsetPaddedKeysMask> {
        match self {
            Self::BlockDiagonalCausalWithOffsetPaddedKeys(mask) => Some(mask),
            _ => None,
        }
    }
}

impl From<BlockDiagonalCausalWithOffsetPaddedKeysMask> for AttentionBias {
    fn from(mask: BlockDiagonalCausalWithOffsetPaddedKeysMask) -> Self {
        Self::BlockDiagonalCausalWithOffsetPaddedKeys(mask)
    }
}
