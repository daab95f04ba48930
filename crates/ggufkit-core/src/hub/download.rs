//! Snapshot download.
//!
//! Lists the repository tree at a revision and fetches every file through the
//! `resolve` endpoint, streaming to a part file. Files already on disk with
//! the size the tree reports are left alone, so an interrupted download
//! resumes at file granularity.

use std::path::{Component, Path, PathBuf};

use futures::StreamExt;
use reqwest::header::LINK;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::types::HfTreeEntry;
use super::{encode_repo_path, ensure_success, HuggingFaceHub};
use crate::artifact::{clear_stale_part, finalize_part, part_path};
use crate::error::{GgufkitError, Result};

impl HuggingFaceHub {
    /// List all entries of `repo_id` at `revision`, following pagination.
    pub(crate) async fn list_repo_tree(
        &self,
        repo_id: &str,
        revision: &str,
    ) -> Result<Vec<HfTreeEntry>> {
        let mut url = format!(
            "{}/api/models/{}/tree/{}?recursive=true",
            self.endpoint,
            repo_id,
            urlencoding::encode(revision)
        );
        let mut entries = Vec::new();

        loop {
            debug!("Listing repo tree: {}", url);
            let response = self
                .authorize(self.client.get(&url))
                .send()
                .await
                .map_err(|e| GgufkitError::Network {
                    message: format!("Failed to fetch repo tree: {}", e),
                    cause: Some(e.to_string()),
                })?;
            let response = ensure_success(response).await?;

            let next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_next_link);

            let page: Vec<HfTreeEntry> =
                response.json().await.map_err(|e| GgufkitError::Json {
                    message: format!("Failed to parse file tree: {}", e),
                    source: None,
                })?;
            entries.extend(page);

            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }
        Ok(entries)
    }

    pub(super) async fn download_snapshot(
        &self,
        repo_id: &str,
        revision: &str,
        local_dir: &Path,
    ) -> Result<PathBuf> {
        info!("Downloading HuggingFace model {} ({}) ...", repo_id, revision);
        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|e| GgufkitError::io("creating checkpoint dir", local_dir, e))?;

        let files: Vec<HfTreeEntry> = self
            .list_repo_tree(repo_id, revision)
            .await?
            .into_iter()
            .filter(HfTreeEntry::is_file)
            .collect();

        let mut fetched = 0usize;
        for (idx, entry) in files.iter().enumerate() {
            let dest = local_dir.join(safe_relative_path(&entry.path)?);
            if is_complete(&dest, entry.content_size()) {
                debug!("Already downloaded: {}", entry.path);
                continue;
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| GgufkitError::io("creating checkpoint subdir", parent, e))?;
            }

            self.download_file(repo_id, revision, entry, &dest).await?;
            fetched += 1;
            info!(
                "File {}/{} complete ({}/{})",
                repo_id,
                entry.path,
                idx + 1,
                files.len()
            );
        }

        info!(
            "Snapshot of {} ready in {} ({} fetched, {} already present)",
            repo_id,
            local_dir.display(),
            fetched,
            files.len() - fetched
        );
        Ok(local_dir.to_path_buf())
    }

    async fn download_file(
        &self,
        repo_id: &str,
        revision: &str,
        entry: &HfTreeEntry,
        dest: &Path,
    ) -> Result<()> {
        let url = format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint,
            repo_id,
            urlencoding::encode(revision),
            encode_repo_path(&entry.path)
        );
        let part = part_path(dest);
        clear_stale_part(&part)?;

        let response = self
            .authorize(self.transfer_client.get(&url))
            .send()
            .await
            .map_err(|e| GgufkitError::DownloadFailed {
                url: url.clone(),
                message: e.to_string(),
            })?;
        let response = ensure_success(response).await?;
        let expected = entry.content_size().or(response.content_length());

        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| GgufkitError::io("creating download part file", &part, e))?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GgufkitError::DownloadFailed {
                url: url.clone(),
                message: format!("stream error: {e}"),
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| GgufkitError::io("writing download", &part, e))?;
            downloaded += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| GgufkitError::io("flushing download", &part, e))?;
        drop(file);

        if let Some(total) = expected {
            if downloaded != total {
                return Err(GgufkitError::DownloadFailed {
                    url,
                    message: format!("incomplete download: got {downloaded} of {total} bytes"),
                });
            }
        }

        finalize_part(&part, dest)
    }
}

/// Whether `dest` exists with the expected size (any size when unknown).
fn is_complete(dest: &Path, expected: Option<u64>) -> bool {
    match std::fs::metadata(dest) {
        Ok(meta) if meta.is_file() => expected.map_or(true, |size| meta.len() == size),
        _ => false,
    }
}

/// Reject repository paths that would escape the download directory.
fn safe_relative_path(repo_path: &str) -> Result<PathBuf> {
    let path = Path::new(repo_path);
    let safe = !repo_path.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(GgufkitError::Validation {
            field: "repo file path".to_string(),
            message: format!("refusing to write '{repo_path}' outside the checkpoint dir"),
        });
    }
    Ok(path.to_path_buf())
}

/// Extract the `rel="next"` target from a `Link` header.
fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if is_next {
            target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .map(str::to_string)
        } else {
            None
        }
    })
}
