//! ggufkit - Turn a HuggingFace checkpoint into a set of GGUF quantizations.
//!
//! A run downloads the checkpoint, converts it once to a base GGUF at its
//! native precision, optionally computes an importance matrix, quantizes the
//! base model to every configured output type with llama.cpp, and uploads the
//! results to `{account}/{base}-GGUF` on the Hub. Artifacts that already exist
//! in the output directory are reused, so an interrupted run can be restarted.
//!
//! # Example
//!
//! ```rust,ignore
//! use ggufkit::{HuggingFaceHub, PipelineConfig, PipelineContext, SystemToolRunner};
//!
//! #[tokio::main]
//! async fn main() -> ggufkit::Result<()> {
//!     let config = PipelineConfig::load("config.toml".as_ref())?;
//!     let hub = HuggingFaceHub::new(&config.hub_endpoint())?;
//!     let runner = SystemToolRunner;
//!
//!     let report = ggufkit::run(&PipelineContext::new(&config, &runner, &hub)).await;
//!     report.log_summary();
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod hub;
pub mod llama_cpp;
pub mod naming;
pub mod pipeline;
pub mod precision;
pub mod process;
pub mod report;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{GgufkitError, Result};
pub use hub::{HubClient, HuggingFaceHub, UploadSummary};
pub use llama_cpp::LlamaCppTools;
pub use pipeline::{run, Artifact, PipelineContext};
pub use precision::PrecisionTag;
pub use process::{SystemToolRunner, ToolInvocation, ToolOutput, ToolRunner};
pub use report::{RunReport, Stage, StageOutcome};
