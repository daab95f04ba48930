//! llama.cpp command templates.
//!
//! Builds the three invocations the pipeline needs, `convert_hf_to_gguf.py`,
//! `llama-imatrix` and `llama-quantize`, from the configured tool paths,
//! and knows the quantization type names llama.cpp accepts.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::ToolsSection;
use crate::precision::PrecisionTag;
use crate::process::ToolInvocation;

pub const CONVERT_TOOL: &str = "convert_hf_to_gguf.py";
pub const IMATRIX_TOOL: &str = "llama-imatrix";
pub const QUANTIZE_TOOL: &str = "llama-quantize";

/// Quantization type names accepted by `llama-quantize`.
const QUANT_TYPES: &[&str] = &[
    // Legacy quants
    "Q4_0", "Q4_1", "Q5_0", "Q5_1", "Q8_0",
    // K-quants
    "Q2_K", "Q2_K_S", "Q3_K_S", "Q3_K_M", "Q3_K_L", "Q4_K_S", "Q4_K_M", "Q5_K_S", "Q5_K_M",
    "Q6_K",
    // I-quants (importance matrix strongly recommended)
    "IQ1_S", "IQ1_M", "IQ2_XXS", "IQ2_XS", "IQ2_S", "IQ2_M", "IQ3_XXS", "IQ3_XS", "IQ3_S",
    "IQ3_M", "IQ4_NL", "IQ4_XS",
    // Ternary
    "TQ1_0", "TQ2_0",
    // Lossless / base types
    "BF16", "F16", "F32", "COPY",
];

/// Whether `name` is a quantization type `llama-quantize` knows.
pub fn is_known_quant_type(name: &str) -> bool {
    QUANT_TYPES.contains(&name)
}

/// Paths and settings for the llama.cpp tools.
#[derive(Debug, Clone)]
pub struct LlamaCppTools {
    python: PathBuf,
    convert_script: PathBuf,
    quantize_binary: PathBuf,
    imatrix_binary: PathBuf,
    imatrix_chunks: u32,
}

impl LlamaCppTools {
    pub fn new(tools: &ToolsSection) -> Self {
        Self {
            python: tools.python.clone(),
            convert_script: tools.convert_script.clone(),
            quantize_binary: tools.quantize_binary.clone(),
            imatrix_binary: tools.imatrix_binary.clone(),
            imatrix_chunks: tools.imatrix_chunks,
        }
    }

    /// `{python} {convert_script} {checkpoint} --outfile {dest} --outtype {precision}`
    pub fn convert(&self, checkpoint: &Path, dest: &Path, precision: PrecisionTag) -> ToolInvocation {
        ToolInvocation::new(CONVERT_TOOL, &self.python)
            .arg(&self.convert_script)
            .arg(checkpoint)
            .arg("--outfile")
            .arg(dest)
            .arg("--outtype")
            .arg(precision.as_str())
    }

    /// `{imatrix_binary} -m {model} -f {dataset} -o {dest} --chunks {n}`
    pub fn imatrix(&self, model: &Path, dataset: &Path, dest: &Path) -> ToolInvocation {
        ToolInvocation::new(IMATRIX_TOOL, &self.imatrix_binary)
            .arg("-m")
            .arg(model)
            .arg("-f")
            .arg(dataset)
            .arg("-o")
            .arg(dest)
            .arg("--chunks")
            .arg(self.imatrix_chunks.to_string())
    }

    /// `{quantize_binary} [--imatrix {matrix}] {source} {dest} {quant_type}`
    pub fn quantize(
        &self,
        source: &Path,
        dest: &Path,
        quant_type: &str,
        imatrix: Option<&Path>,
    ) -> ToolInvocation {
        let mut inv = ToolInvocation::new(QUANTIZE_TOOL, &self.quantize_binary);
        if let Some(matrix) = imatrix {
            inv = inv.arg("--imatrix").arg(matrix);
        }
        inv.arg(source).arg(dest).arg(quant_type)
    }

    /// Tool paths that do not exist on disk.
    ///
    /// Bare program names (no directory part) are looked up on `PATH` by the
    /// OS at spawn time and are never reported here.
    pub fn preflight(&self, needs_imatrix: bool) -> Vec<PathBuf> {
        let mut required = vec![&self.convert_script, &self.quantize_binary, &self.python];
        if needs_imatrix {
            required.push(&self.imatrix_binary);
        }
        required
            .into_iter()
            .filter(|p| p.components().count() > 1 && !p.exists())
            .cloned()
            .collect()
    }
}

/// One per-tensor progress line from `llama-quantize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorProgress {
    pub index: u32,
    pub total: u32,
    pub tensor: String,
}

/// Parse `llama-quantize` output lines like:
///
/// ```text
/// [ 123/ 456]  model.layers.5.attn_k.weight - [ 4096,  4096,     1,     1], type = f16, ...
/// ```
pub fn parse_tensor_progress(line: &str) -> Option<TensorProgress> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"\[\s*(\d+)/\s*(\d+)\]\s+(\S+)").ok())
        .as_ref()?;
    let caps = re.captures(line)?;
    Some(TensorProgress {
        index: caps[1].parse().ok()?,
        total: caps[2].parse().ok()?,
        tensor: caps[3].to_string(),
    })
}
