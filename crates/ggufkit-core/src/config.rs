//! Pipeline configuration.
//!
//! A run is described by a single TOML file, loaded once and never mutated:
//!
//! ```toml
//! [huggingface]
//! model_name = "meta-llama/Meta-Llama-3-8B-Instruct"
//! hugging_face_username = "alice"
//!
//! [gguf]
//! model_name_base = "Llama-3-8B-Instruct"
//! output_types = ["Q4_K_M", "Q8_0", "IQ3_XS"]
//! output_directory = "models"
//!
//! [dataset]
//! imatrix = "data/calibration.txt"
//! ```
//!
//! `[tools]` and `[upload]` are optional and default to a llama.cpp checkout
//! in the working directory and uploading enabled.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{GgufkitError, Result};
use crate::llama_cpp::is_known_quant_type;
use crate::naming;

/// Hub-related constants.
pub struct HubConfig;

impl HubConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "https://huggingface.co";
    pub const ENDPOINT_ENV_VAR: &'static str = "HF_ENDPOINT";
    pub const DEFAULT_REVISION: &'static str = "main";
    pub const USER_AGENT: &'static str = concat!("ggufkit/", env!("CARGO_PKG_VERSION"));
}

/// Default values for the `[tools]` section.
pub struct ToolDefaults;

impl ToolDefaults {
    pub const PYTHON: &'static str = "python";
    pub const CONVERT_SCRIPT: &'static str = "llama.cpp/convert_hf_to_gguf.py";
    pub const QUANTIZE_BINARY: &'static str = "llama.cpp/llama-quantize";
    pub const IMATRIX_BINARY: &'static str = "llama.cpp/llama-imatrix";
    pub const IMATRIX_CHUNKS: u32 = 100;
}

/// Complete configuration for one pipeline run.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub huggingface: HuggingFaceSection,
    pub gguf: GgufSection,
    #[serde(default)]
    pub dataset: DatasetSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub upload: UploadSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HuggingFaceSection {
    /// Checkpoint identifier, `owner/name`.
    pub model_name: String,
    /// Account that owns the `{base}-GGUF` upload repository.
    pub hugging_face_username: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Hub base URL. `HF_ENDPOINT` takes precedence when set.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Create the upload repository as private.
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GgufSection {
    pub model_name_base: String,
    pub output_types: Vec<String>,
    pub output_directory: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetSection {
    /// Calibration text used by `llama-imatrix`.
    #[serde(default)]
    pub imatrix: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub python: PathBuf,
    pub convert_script: PathBuf,
    pub quantize_binary: PathBuf,
    pub imatrix_binary: PathBuf,
    pub imatrix_chunks: u32,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            python: PathBuf::from(ToolDefaults::PYTHON),
            convert_script: PathBuf::from(ToolDefaults::CONVERT_SCRIPT),
            quantize_binary: PathBuf::from(ToolDefaults::QUANTIZE_BINARY),
            imatrix_binary: PathBuf::from(ToolDefaults::IMATRIX_BINARY),
            imatrix_chunks: ToolDefaults::IMATRIX_CHUNKS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub enabled: bool,
    pub commit_message: Option<String>,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            enabled: true,
            commit_message: None,
        }
    }
}

fn default_revision() -> String {
    HubConfig::DEFAULT_REVISION.to_string()
}

impl PipelineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading config from {} ...", path.display());
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GgufkitError::io("reading config file", path, e))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let hf = &self.huggingface;
        if hf.model_name.trim().is_empty() || hf.model_name.ends_with('/') {
            return Err(invalid("huggingface.model_name", "must be a Hub model id"));
        }
        if hf.hugging_face_username.trim().is_empty() {
            return Err(invalid("huggingface.hugging_face_username", "must not be empty"));
        }
        if hf.revision.trim().is_empty() {
            return Err(invalid("huggingface.revision", "must not be empty"));
        }
        if let Some(endpoint) = &hf.endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| invalid("huggingface.endpoint", &e.to_string()))?;
        }

        let base = &self.gguf.model_name_base;
        if base.trim().is_empty() || base.contains('/') {
            return Err(invalid(
                "gguf.model_name_base",
                "must be a non-empty file name without '/'",
            ));
        }
        if self.gguf.output_types.is_empty() {
            return Err(invalid("gguf.output_types", "at least one output type is required"));
        }
        for tag in &self.gguf.output_types {
            if tag.is_empty() || tag.contains('/') || tag.chars().any(char::is_whitespace) {
                return Err(invalid(
                    "gguf.output_types",
                    &format!("'{tag}' is not a valid output type"),
                ));
            }
            if !is_known_quant_type(tag) {
                warn!("Output type '{}' is not a known llama.cpp quantization type", tag);
            }
        }
        if self.gguf.output_directory.as_os_str().is_empty() {
            return Err(invalid("gguf.output_directory", "must not be empty"));
        }

        if self.needs_calibration() && self.dataset.imatrix.is_none() {
            return Err(invalid(
                "dataset.imatrix",
                "required because an output type needs an importance matrix",
            ));
        }
        if self.tools.imatrix_chunks == 0 {
            return Err(invalid("tools.imatrix_chunks", "must be greater than zero"));
        }
        Ok(())
    }

    /// Whether any requested output type needs an importance matrix.
    pub fn needs_calibration(&self) -> bool {
        naming::any_needs_calibration(&self.gguf.output_types)
    }

    /// Directory the checkpoint is downloaded into: `{output}/{model_name}`.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.gguf.output_directory.join(&self.huggingface.model_name)
    }

    /// Calibration dataset path, or a config error when absent.
    pub fn calibration_dataset(&self) -> Result<&Path> {
        self.dataset
            .imatrix
            .as_deref()
            .ok_or_else(|| GgufkitError::config("dataset.imatrix is not set"))
    }

    /// Hub base URL without a trailing slash.
    pub fn hub_endpoint(&self) -> String {
        resolve_endpoint(
            std::env::var(HubConfig::ENDPOINT_ENV_VAR).ok(),
            self.huggingface.endpoint.as_deref(),
        )
    }

    pub fn upload_allow_patterns(&self) -> Vec<String> {
        naming::upload_allow_patterns(&self.gguf.model_name_base, &self.huggingface.model_name)
    }

    pub fn commit_message(&self) -> String {
        self.upload.commit_message.clone().unwrap_or_else(|| {
            format!(
                "Upload GGUF quantizations of {}",
                self.huggingface.model_name
            )
        })
    }
}

fn resolve_endpoint(env_value: Option<String>, configured: Option<&str>) -> String {
    env_value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| HubConfig::DEFAULT_ENDPOINT.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn invalid(field: &str, message: &str) -> GgufkitError {
    GgufkitError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[huggingface]
model_name = "meta-llama/Meta-Llama-3-8B"
hugging_face_username = "alice"

[gguf]
model_name_base = "Llama3"
output_types = ["Q4_0", "Q8_0"]
output_directory = "out"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = PipelineConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.huggingface.revision, "main");
        assert!(!config.huggingface.private);
        assert!(config.upload.enabled);
        assert_eq!(config.tools.imatrix_chunks, 100);
        assert_eq!(
            config.tools.quantize_binary,
            PathBuf::from("llama.cpp/llama-quantize")
        );
        assert_eq!(
            config.checkpoint_dir(),
            PathBuf::from("out/meta-llama/Meta-Llama-3-8B")
        );
        assert!(!config.needs_calibration());
    }

    #[test]
    fn test_output_types_keep_order() {
        let config = PipelineConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.gguf.output_types, vec!["Q4_0", "Q8_0"]);
    }

    #[test]
    fn test_iq_type_requires_dataset() {
        let raw = MINIMAL.replace(r#"["Q4_0", "Q8_0"]"#, r#"["Q4_0", "IQ3_XS"]"#);
        let err = PipelineConfig::from_toml_str(&raw).unwrap_err();
        assert!(
            matches!(err, GgufkitError::Validation { ref field, .. } if field == "dataset.imatrix")
        );

        let with_dataset = format!("{raw}\n[dataset]\nimatrix = \"calibration.txt\"\n");
        let config = PipelineConfig::from_toml_str(&with_dataset).unwrap();
        assert!(config.needs_calibration());
        assert_eq!(
            config.calibration_dataset().unwrap(),
            Path::new("calibration.txt")
        );
    }

    #[test]
    fn test_missing_section_is_a_toml_error() {
        let err = PipelineConfig::from_toml_str("[gguf]\nmodel_name_base = \"x\"").unwrap_err();
        assert!(matches!(err, GgufkitError::Toml { .. }));
    }

    #[test]
    fn test_empty_output_types_rejected() {
        let raw = MINIMAL.replace(r#"["Q4_0", "Q8_0"]"#, "[]");
        assert!(matches!(
            PipelineConfig::from_toml_str(&raw).unwrap_err(),
            GgufkitError::Validation { .. }
        ));
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let raw = MINIMAL.replace(
            "hugging_face_username = \"alice\"",
            "hugging_face_username = \"alice\"\nendpoint = \"not a url\"",
        );
        assert!(PipelineConfig::from_toml_str(&raw).is_err());
    }

    #[test]
    fn test_tools_section_overrides() {
        let raw = format!(
            "{MINIMAL}\n[tools]\nquantize_binary = \"/opt/llama/bin/llama-quantize\"\nimatrix_chunks = 50\n"
        );
        let config = PipelineConfig::from_toml_str(&raw).unwrap();
        assert_eq!(
            config.tools.quantize_binary,
            PathBuf::from("/opt/llama/bin/llama-quantize")
        );
        assert_eq!(config.tools.imatrix_chunks, 50);
        assert_eq!(config.tools.python, PathBuf::from("python"));
    }

    #[test]
    fn test_resolve_endpoint_precedence() {
        assert_eq!(resolve_endpoint(None, None), "https://huggingface.co");
        assert_eq!(
            resolve_endpoint(None, Some("http://127.0.0.1:9000/")),
            "http://127.0.0.1:9000"
        );
        assert_eq!(
            resolve_endpoint(Some("https://hf-mirror.example".into()), Some("http://x")),
            "https://hf-mirror.example"
        );
        assert_eq!(
            resolve_endpoint(Some("  ".into()), Some("http://x")),
            "http://x"
        );
    }

    #[test]
    fn test_default_commit_message() {
        let config = PipelineConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(
            config.commit_message(),
            "Upload GGUF quantizations of meta-llama/Meta-Llama-3-8B"
        );
    }
}
