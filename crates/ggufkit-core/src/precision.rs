//! Precision tag inference from a checkpoint's `config.json`.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{GgufkitError, Result};

/// Output type passed to `convert_hf_to_gguf.py --outtype` for the base GGUF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionTag {
    Bf16,
    F16,
}

impl PrecisionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecisionTag::Bf16 => "bf16",
            PrecisionTag::F16 => "f16",
        }
    }

    /// Map a transformers dtype string to a tag. Only `bfloat16` is kept as-is.
    pub fn from_dtype(dtype: Option<&str>) -> Self {
        match dtype {
            Some("bfloat16") => PrecisionTag::Bf16,
            _ => PrecisionTag::F16,
        }
    }
}

impl fmt::Display for PrecisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of a transformers `config.json` we read.
#[derive(Debug, Deserialize)]
struct CheckpointConfig {
    #[serde(default)]
    torch_dtype: Option<String>,
    /// Newer transformers releases write `dtype` instead of `torch_dtype`.
    #[serde(default)]
    dtype: Option<String>,
    #[serde(default)]
    model_type: Option<String>,
}

/// Infer the base conversion precision from `{checkpoint}/config.json`.
pub fn infer_precision_tag(checkpoint_path: &Path) -> Result<PrecisionTag> {
    let config_path = checkpoint_path.join("config.json");
    if !config_path.exists() {
        return Err(GgufkitError::FileNotFound(config_path));
    }

    let raw = std::fs::read_to_string(&config_path)
        .map_err(|e| GgufkitError::io("reading checkpoint config", &config_path, e))?;
    let config: CheckpointConfig = serde_json::from_str(&raw)?;

    let dtype = config.torch_dtype.as_deref().or(config.dtype.as_deref());
    let tag = PrecisionTag::from_dtype(dtype);
    info!(
        "Checkpoint model_type={} dtype={} -> base precision {}",
        config.model_type.as_deref().unwrap_or("unknown"),
        dtype.unwrap_or("unset"),
        tag
    );
    Ok(tag)
}
