//! Decoder kernel limits
//!
//! The defaults describe the CK split-K decoder: head vectors stay resident
//! in registers up to 256 lanes, loads are 4-wide, and the key cache reserves
//! at most 8192 slots per sequence.

use serde::Deserialize;
use std::path::Path;

use crate::{Error, Result};

/// Shape limits enforced by the decoder eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderLimits {
    /// Largest supported head dimension
    pub max_head_dim: usize,

    /// Head dimension must be a multiple of this
    pub head_dim_multiple: usize,

    /// Largest supported per-sequence key padding
    pub max_padding: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_head_dim: 256,
            head_dim_multiple: 4,
            max_padding: 8192,
        }
    }
}

impl DecoderLimits {
    /// Parse limits from a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed, names an unknown field, or
    /// fails [`Self::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let limits: Self = serde_json::from_str(json)?;
        limits.validate()?;
        Ok(limits)
    }

    /// Reject limits that would make every request ineligible.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if any limit is zero.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_head_dim", self.max_head_dim),
            ("head_dim_multiple", self.head_dim_multiple),
            ("max_padding", self.max_padding),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Load limits from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}
