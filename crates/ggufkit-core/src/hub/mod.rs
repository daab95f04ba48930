//! HuggingFace Hub client.
//!
//! The pipeline only needs three Hub operations: download a checkpoint
//! snapshot, create the target repository, and upload the produced artifacts.
//! They sit behind the [`HubClient`] trait so the pipeline can be driven by a
//! fake in tests; [`HuggingFaceHub`] implements them over the Hub REST API.
//!
//! # Module Organization
//!
//! - [`auth`] - Token resolution
//! - `download` - Repository tree listing and snapshot download
//! - `upload` - Repository creation, LFS transfer and commits
//! - `types` - API request/response structs

pub mod auth;
mod download;
mod types;
mod upload;

pub use types::UploadSummary;
pub use upload::collect_upload_files;

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use tracing::info;

use crate::config::HubConfig;
use crate::error::{GgufkitError, Result};

/// Hub operations used by the pipeline.
#[async_trait::async_trait]
pub trait HubClient: Send + Sync {
    /// Download every file of `repo_id` at `revision` into `local_dir`.
    ///
    /// Files already present with the expected size are kept.
    async fn snapshot_download(
        &self,
        repo_id: &str,
        revision: &str,
        local_dir: &Path,
    ) -> Result<PathBuf>;

    /// Create a model repository. An existing repository is not an error.
    async fn create_repo(&self, repo_id: &str, private: bool) -> Result<()>;

    /// Commit the files of `folder` (non-recursive) whose names match any of
    /// `allow_patterns` to the repository's main branch.
    async fn upload_folder(
        &self,
        repo_id: &str,
        folder: &Path,
        allow_patterns: &[String],
        commit_message: &str,
    ) -> Result<UploadSummary>;
}

/// [`HubClient`] over the HuggingFace REST API.
pub struct HuggingFaceHub {
    endpoint: String,
    /// HTTP client for API requests (has total timeout)
    client: Client,
    /// HTTP client for file transfers (connect timeout only, no total timeout)
    transfer_client: Client,
    token: Option<String>,
}

impl std::fmt::Debug for HuggingFaceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceHub")
            .field("endpoint", &self.endpoint)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl HuggingFaceHub {
    /// API request timeout.
    const API_TIMEOUT: Duration = Duration::from_secs(30);
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a client for `endpoint` (e.g. `https://huggingface.co`) using
    /// the token from `HF_TOKEN` or the HuggingFace CLI cache, if any.
    pub fn new(endpoint: &str) -> Result<Self> {
        let token = auth::resolve_token().map(|(token, source)| {
            info!("HuggingFace auth token found from {}", source);
            token
        });
        Self::with_token(endpoint, token)
    }

    /// Create a client with an explicit token.
    pub fn with_token(endpoint: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Self::API_TIMEOUT)
            .user_agent(HubConfig::USER_AGENT)
            .build()
            .map_err(|e| GgufkitError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        // Checkpoint shards and quantized models are multi-gigabyte; a total
        // timeout would abort them.
        let transfer_client = Client::builder()
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .user_agent(HubConfig::USER_AGENT)
            .build()
            .map_err(|e| GgufkitError::Network {
                message: format!("Failed to create transfer HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            transfer_client,
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Attach the bearer token, when one is configured.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn require_token(&self, repo_id: &str) -> Result<()> {
        if self.token.is_none() {
            return Err(GgufkitError::UploadFailed {
                repo_id: repo_id.to_string(),
                message: "no HuggingFace token found (set HF_TOKEN or run `huggingface-cli login`)"
                    .to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HubClient for HuggingFaceHub {
    async fn snapshot_download(
        &self,
        repo_id: &str,
        revision: &str,
        local_dir: &Path,
    ) -> Result<PathBuf> {
        self.download_snapshot(repo_id, revision, local_dir).await
    }

    async fn create_repo(&self, repo_id: &str, private: bool) -> Result<()> {
        self.create_model_repo(repo_id, private).await
    }

    async fn upload_folder(
        &self,
        repo_id: &str,
        folder: &Path,
        allow_patterns: &[String],
        commit_message: &str,
    ) -> Result<UploadSummary> {
        self.upload_matching_files(repo_id, folder, allow_patterns, commit_message)
            .await
    }
}

/// Return the response if it is a success, else a [`GgufkitError::HubApi`]
/// carrying the status and body.
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(GgufkitError::HubApi {
        url,
        status: status.as_u16(),
        body,
    })
}

/// Percent-encode each segment of a repository path, keeping the separators.
fn encode_repo_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_repo_path_keeps_separators() {
        assert_eq!(encode_repo_path("model.safetensors"), "model.safetensors");
        assert_eq!(
            encode_repo_path("sub dir/weights #1.bin"),
            "sub%20dir/weights%20%231.bin"
        );
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let hub = HuggingFaceHub::with_token("http://127.0.0.1:8080/", None).unwrap();
        assert_eq!(hub.endpoint(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_debug_redacts_token() {
        let hub = HuggingFaceHub::with_token("https://huggingface.co", Some("hf_secret".into()))
            .unwrap();
        let debug = format!("{hub:?}");
        assert!(!debug.contains("hf_secret"));
        assert!(debug.contains("has_token: true"));
    }

    #[test]
    fn test_require_token() {
        let hub = HuggingFaceHub::with_token("https://huggingface.co", None).unwrap();
        assert!(matches!(
            hub.require_token("alice/x").unwrap_err(),
            GgufkitError::UploadFailed { .. }
        ));
    }
}
