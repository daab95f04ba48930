//! Repository creation and folder upload.
//!
//! The upload flow mirrors what `git push` to a Hub repository does:
//! 1. Ask `preupload` which files must go through LFS
//! 2. Hash LFS files (SHA256) and negotiate them with the LFS batch endpoint
//! 3. PUT the content the server does not already have (basic or multipart)
//! 4. Create a single commit referencing the LFS objects and inlining the
//!    regular files as base64

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::{RequestBuilder, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::types::{
    CommitResponse, CompletedPart, CreateRepoRequest, LfsAction, LfsBatchRequest,
    LfsBatchResponse, LfsObjectId, MultipartCompletion, PreuploadFile, PreuploadRequest,
    PreuploadResponse, UploadMode, UploadSummary,
};
use super::{encode_repo_path, ensure_success, HuggingFaceHub};
use crate::config::HubConfig;
use crate::error::{GgufkitError, Result};

/// Chunk size for streaming file bodies (8 MB).
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Bytes of each file sent to `preupload` for LFS detection.
const PREUPLOAD_SAMPLE_SIZE: usize = 512;

const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";

/// A local file scheduled for upload.
#[derive(Debug, Clone)]
struct LocalFile {
    path: PathBuf,
    repo_path: String,
    size: u64,
    sample: Vec<u8>,
    mode: UploadMode,
    /// Filled in for LFS files only.
    sha256: Option<String>,
}

/// Files directly inside `folder` whose name matches any of `allow_patterns`,
/// sorted by path.
pub fn collect_upload_files(folder: &Path, allow_patterns: &[String]) -> Result<Vec<PathBuf>> {
    let patterns = allow_patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| GgufkitError::Validation {
                field: "upload pattern".to_string(),
                message: format!("'{p}': {e}"),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let entries = std::fs::read_dir(folder)
        .map_err(|e| GgufkitError::io("reading upload folder", folder, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| GgufkitError::io("reading upload folder", folder, e))?
            .path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if patterns.iter().any(|p| p.matches(name)) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl HuggingFaceHub {
    pub(super) async fn create_model_repo(&self, repo_id: &str, private: bool) -> Result<()> {
        self.require_token(repo_id)?;
        info!("Creating repo {} on HuggingFace ...", repo_id);

        let (organization, name) = match repo_id.split_once('/') {
            Some((org, name)) => (Some(org), name),
            None => (None, repo_id),
        };
        let url = format!("{}/api/repos/create", self.endpoint);
        let response = self
            .authorize(self.client.post(&url))
            .json(&CreateRepoRequest {
                name,
                organization,
                repo_type: "model",
                private,
            })
            .send()
            .await
            .map_err(|e| network_err("Failed to create repo", e))?;

        if response.status() == StatusCode::CONFLICT {
            info!("Repo {} already exists", repo_id);
            return Ok(());
        }
        ensure_success(response).await?;
        info!("Created repo {}", repo_id);
        Ok(())
    }

    pub(super) async fn upload_matching_files(
        &self,
        repo_id: &str,
        folder: &Path,
        allow_patterns: &[String],
        commit_message: &str,
    ) -> Result<UploadSummary> {
        self.require_token(repo_id)?;
        info!("Uploading models to HuggingFace repo {} ...", repo_id);

        let paths = collect_upload_files(folder, allow_patterns)?;
        if paths.is_empty() {
            warn!(
                "No files in {} match {:?}; nothing to upload",
                folder.display(),
                allow_patterns
            );
            return Ok(UploadSummary {
                repo_id: repo_id.to_string(),
                ..Default::default()
            });
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(inspect_file(&path).await?);
        }

        let mut files = self.preupload(repo_id, files).await?;
        for file in files.iter_mut().filter(|f| f.mode == UploadMode::Lfs) {
            info!(
                "Computing SHA256 for {} ({:.1} GB)",
                file.repo_path,
                file.size as f64 / 1e9
            );
            file.sha256 = Some(compute_sha256_async(&file.path).await?);
        }

        let (lfs_uploaded, lfs_skipped) = self.upload_lfs_objects(repo_id, &files).await?;
        let commit = self.create_commit(repo_id, &files, commit_message).await?;

        if let Some(url) = &commit.commit_url {
            info!("Upload committed: {}", url);
        }
        debug!("Commit oid: {:?}", commit.commit_oid);

        Ok(UploadSummary {
            repo_id: repo_id.to_string(),
            files: files.into_iter().map(|f| f.repo_path).collect(),
            lfs_uploaded,
            lfs_skipped,
            commit_url: commit.commit_url,
        })
    }

    /// Ask the Hub which files need LFS and drop the ones it says to ignore.
    async fn preupload(&self, repo_id: &str, mut files: Vec<LocalFile>) -> Result<Vec<LocalFile>> {
        let url = format!(
            "{}/api/models/{}/preupload/{}",
            self.endpoint,
            repo_id,
            HubConfig::DEFAULT_REVISION
        );
        let request = PreuploadRequest {
            files: files
                .iter()
                .map(|f| PreuploadFile {
                    path: f.repo_path.clone(),
                    sample: BASE64.encode(&f.sample),
                    size: f.size,
                })
                .collect(),
        };

        let response = self
            .authorize(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| network_err("Preupload request failed", e))?;
        let response: PreuploadResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GgufkitError::Json {
                message: format!("Failed to parse preupload response: {}", e),
                source: None,
            })?;

        let modes: HashMap<String, (UploadMode, bool)> = response
            .files
            .into_iter()
            .map(|r| (r.path, (r.upload_mode, r.should_ignore)))
            .collect();

        files.retain_mut(|file| match modes.get(&file.repo_path) {
            Some((_, true)) => {
                warn!("Hub ignores {}; skipping", file.repo_path);
                false
            }
            Some((mode, false)) => {
                file.mode = *mode;
                true
            }
            None => true,
        });
        Ok(files)
    }

    /// Transfer LFS content the server does not have yet.
    ///
    /// Returns `(uploaded, already_present)`.
    async fn upload_lfs_objects(&self, repo_id: &str, files: &[LocalFile]) -> Result<(usize, usize)> {
        let lfs_files: HashMap<&str, &LocalFile> = files
            .iter()
            .filter(|f| f.mode == UploadMode::Lfs)
            .filter_map(|f| f.sha256.as_deref().map(|oid| (oid, f)))
            .collect();
        if lfs_files.is_empty() {
            return Ok((0, 0));
        }

        let url = format!("{}/{}.git/info/lfs/objects/batch", self.endpoint, repo_id);
        let request = LfsBatchRequest {
            operation: "upload",
            transfers: vec!["basic", "multipart"],
            objects: lfs_files
                .values()
                .map(|f| LfsObjectId {
                    oid: f.sha256.clone().unwrap_or_default(),
                    size: f.size,
                })
                .collect(),
            hash_algo: "sha256",
        };

        let response = self
            .authorize(self.client.post(&url))
            .header(ACCEPT, LFS_CONTENT_TYPE)
            .header(CONTENT_TYPE, LFS_CONTENT_TYPE)
            .body(serde_json::to_vec(&request)?)
            .send()
            .await
            .map_err(|e| network_err("LFS batch request failed", e))?;
        let batch: LfsBatchResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GgufkitError::Json {
                message: format!("Failed to parse LFS batch response: {}", e),
                source: None,
            })?;
        debug!("LFS transfer mode: {:?}", batch.transfer);

        let mut uploaded = 0;
        let mut skipped = 0;
        for object in batch.objects {
            if let Some(err) = object.error {
                return Err(GgufkitError::UploadFailed {
                    repo_id: repo_id.to_string(),
                    message: format!("LFS object {} rejected ({}): {}", object.oid, err.code, err.message),
                });
            }
            let Some(file) = lfs_files.get(object.oid.as_str()) else {
                warn!("LFS batch returned unknown object {}", object.oid);
                continue;
            };
            let actions = object.actions.unwrap_or_default();

            let Some(upload) = actions.upload else {
                debug!("{} already on the Hub", file.repo_path);
                skipped += 1;
                continue;
            };

            info!("Uploading {} ({:.1} GB)", file.repo_path, file.size as f64 / 1e9);
            if upload.header.contains_key("chunk_size") {
                self.upload_multipart(repo_id, file, &upload).await?;
            } else {
                self.upload_basic(repo_id, file, &upload).await?;
            }

            if let Some(verify) = actions.verify {
                let response = apply_headers(self.transfer_client.post(&verify.href), &verify)
                    .header(ACCEPT, LFS_CONTENT_TYPE)
                    .json(&LfsObjectId {
                        oid: object.oid.clone(),
                        size: file.size,
                    })
                    .send()
                    .await
                    .map_err(|e| network_err("LFS verify failed", e))?;
                ensure_success(response).await?;
            }
            uploaded += 1;
        }
        Ok((uploaded, skipped))
    }

    async fn upload_basic(&self, repo_id: &str, file: &LocalFile, action: &LfsAction) -> Result<()> {
        let body = file_body(&file.path, 0, file.size).await?;
        let response = apply_headers(self.transfer_client.put(&action.href), action)
            .header(CONTENT_LENGTH, file.size)
            .body(body)
            .send()
            .await
            .map_err(|e| upload_err(repo_id, &file.repo_path, e))?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn upload_multipart(&self, repo_id: &str, file: &LocalFile, action: &LfsAction) -> Result<()> {
        let chunk_size: u64 = action
            .header
            .get("chunk_size")
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .ok_or_else(|| GgufkitError::UploadFailed {
                repo_id: repo_id.to_string(),
                message: "multipart upload without a valid chunk_size".to_string(),
            })?;

        let mut part_urls: Vec<(u32, &String)> = action
            .header
            .iter()
            .filter_map(|(key, url)| key.parse::<u32>().ok().map(|n| (n, url)))
            .collect();
        part_urls.sort_by_key(|(n, _)| *n);

        let mut parts = Vec::with_capacity(part_urls.len());
        for (part_number, url) in part_urls {
            let offset = u64::from(part_number.saturating_sub(1)) * chunk_size;
            let len = chunk_size.min(file.size.saturating_sub(offset));
            debug!("Uploading part {} of {} ({} bytes)", part_number, file.repo_path, len);

            let response = self
                .transfer_client
                .put(url.as_str())
                .header(CONTENT_LENGTH, len)
                .body(file_body(&file.path, offset, len).await?)
                .send()
                .await
                .map_err(|e| upload_err(repo_id, &file.repo_path, e))?;
            let response = ensure_success(response).await?;
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| GgufkitError::UploadFailed {
                    repo_id: repo_id.to_string(),
                    message: format!("part {part_number} of {} returned no ETag", file.repo_path),
                })?;
            parts.push(CompletedPart { part_number, etag });
        }

        let response = self
            .transfer_client
            .post(&action.href)
            .header(ACCEPT, LFS_CONTENT_TYPE)
            .json(&MultipartCompletion {
                oid: file.sha256.clone().unwrap_or_default(),
                parts,
            })
            .send()
            .await
            .map_err(|e| upload_err(repo_id, &file.repo_path, e))?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn create_commit(
        &self,
        repo_id: &str,
        files: &[LocalFile],
        commit_message: &str,
    ) -> Result<CommitResponse> {
        let mut lines = vec![serde_json::json!({
            "key": "header",
            "value": { "summary": commit_message, "description": "" },
        })];

        for file in files {
            let line = match file.mode {
                UploadMode::Lfs => serde_json::json!({
                    "key": "lfsFile",
                    "value": {
                        "path": file.repo_path,
                        "algo": "sha256",
                        "oid": file.sha256,
                        "size": file.size,
                    },
                }),
                UploadMode::Regular => {
                    let content = tokio::fs::read(&file.path)
                        .await
                        .map_err(|e| GgufkitError::io("reading upload file", &file.path, e))?;
                    serde_json::json!({
                        "key": "file",
                        "value": {
                            "path": file.repo_path,
                            "content": BASE64.encode(content),
                            "encoding": "base64",
                        },
                    })
                }
            };
            lines.push(line);
        }

        let body = lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        let url = format!(
            "{}/api/models/{}/commit/{}",
            self.endpoint,
            repo_id,
            encode_repo_path(HubConfig::DEFAULT_REVISION)
        );
        let response = self
            .authorize(self.transfer_client.post(&url))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| network_err("Commit request failed", e))?;

        ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GgufkitError::Json {
                message: format!("Failed to parse commit response: {}", e),
                source: None,
            })
    }
}

/// Read size and the preupload sample of a file.
async fn inspect_file(path: &Path) -> Result<LocalFile> {
    let repo_path = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| GgufkitError::Validation {
            field: "upload file".to_string(),
            message: format!("{} has no UTF-8 file name", path.display()),
        })?
        .to_string();

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| GgufkitError::io("opening upload file", path, e))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| GgufkitError::io("reading upload file metadata", path, e))?
        .len();

    let mut sample = Vec::with_capacity(PREUPLOAD_SAMPLE_SIZE);
    (&mut file)
        .take(PREUPLOAD_SAMPLE_SIZE as u64)
        .read_to_end(&mut sample)
        .await
        .map_err(|e| GgufkitError::io("reading upload file", path, e))?;

    Ok(LocalFile {
        path: path.to_path_buf(),
        repo_path,
        size,
        sample,
        mode: UploadMode::Regular,
        sha256: None,
    })
}

/// Stream `len` bytes of a file starting at `offset` as a request body.
async fn file_body(path: &Path, offset: u64, len: u64) -> Result<reqwest::Body> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| GgufkitError::io("opening upload file", path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| GgufkitError::io("seeking upload file", path, e))?;

    let reader = file.take(len);
    let file_stream = stream::unfold(reader, |mut reader| async move {
        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok::<_, std::io::Error>(bytes::Bytes::from(buf)), reader))
            }
            Err(e) => Some((Err(e), reader)),
        }
    });
    Ok(reqwest::Body::wrap_stream(file_stream))
}

async fn compute_sha256_async(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file =
            std::fs::File::open(&path).map_err(|e| GgufkitError::io("hashing", &path, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
        loop {
            let n = std::io::Read::read(&mut file, &mut buffer)
                .map_err(|e| GgufkitError::io("hashing", &path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| GgufkitError::Other(format!("SHA256 computation task failed: {}", e)))?
}

fn apply_headers(mut request: RequestBuilder, action: &LfsAction) -> RequestBuilder {
    for (name, value) in &action.header {
        if name == "chunk_size" || name.parse::<u32>().is_ok() {
            continue;
        }
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

fn network_err(context: &str, e: reqwest::Error) -> GgufkitError {
    GgufkitError::Network {
        message: format!("{context}: {e}"),
        cause: Some(e.to_string()),
    }
}

fn upload_err(repo_id: &str, repo_path: &str, e: reqwest::Error) -> GgufkitError {
    GgufkitError::UploadFailed {
        repo_id: repo_id.to_string(),
        message: format!("{repo_path}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_collect_upload_files_filters_by_pattern() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "Llama3-GGUF-Q4_0.gguf", b"q4");
        touch(temp.path(), "Llama3-GGUF-bf16.gguf", b"bf16");
        touch(temp.path(), "Llama3-GGUF-Q8_0.gguf.part", b"partial");
        touch(temp.path(), "imatrix_Meta-Llama-3-8B.dat", b"m");
        touch(temp.path(), "Other-GGUF-Q4_0.gguf", b"x");
        std::fs::create_dir(temp.path().join("Llama3-GGUF-dir.gguf")).unwrap();

        let patterns = vec![
            "Llama3-GGUF-*.gguf".to_string(),
            "imatrix_Meta-Llama-3-8B.dat".to_string(),
        ];
        let files = collect_upload_files(temp.path(), &patterns).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "Llama3-GGUF-Q4_0.gguf",
                "Llama3-GGUF-bf16.gguf",
                "imatrix_Meta-Llama-3-8B.dat"
            ]
        );
    }

    #[test]
    fn test_collect_upload_files_with_bracketed_base_name() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "M[v2]-GGUF-Q4_0.gguf", b"q4");
        touch(temp.path(), "Mv-GGUF-Q4_0.gguf", b"other");

        let patterns = crate::naming::upload_allow_patterns("M[v2]", "acme/M[v2]");
        let files = collect_upload_files(temp.path(), &patterns).unwrap();
        assert_eq!(files, vec![temp.path().join("M[v2]-GGUF-Q4_0.gguf")]);
    }

    #[test]
    fn test_collect_upload_files_rejects_bad_pattern() {
        let temp = TempDir::new().unwrap();
        assert!(collect_upload_files(temp.path(), &["[".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_compute_sha256_async() {
        let temp = TempDir::new().unwrap();
        let path = touch(temp.path(), "a.bin", b"hello");
        assert_eq!(
            compute_sha256_async(&path).await.unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_inspect_file_reads_sample() {
        let temp = TempDir::new().unwrap();
        let content = vec![7u8; 2048];
        let path = touch(temp.path(), "m.gguf", &content);
        let file = inspect_file(&path).await.unwrap();
        assert_eq!(file.repo_path, "m.gguf");
        assert_eq!(file.size, 2048);
        assert_eq!(file.sample.len(), PREUPLOAD_SAMPLE_SIZE);
        assert_eq!(file.mode, UploadMode::Regular);
    }
}
