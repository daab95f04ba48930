//! Hub API request and response types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Entry of `GET /api/models/{repo}/tree/{revision}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HfTreeEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub lfs: Option<HfLfsInfo>,
}

impl HfTreeEntry {
    pub fn is_file(&self) -> bool {
        self.kind == "file"
    }

    /// Size of the downloadable content; the object size for LFS files.
    pub fn content_size(&self) -> Option<u64> {
        self.lfs.as_ref().map(|l| l.size).or(self.size)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HfLfsInfo {
    pub size: u64,
}

/// Body of `POST /api/repos/create`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateRepoRequest<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<&'a str>,
    #[serde(rename = "type")]
    pub repo_type: &'a str,
    pub private: bool,
}

/// Body of `POST /api/models/{repo}/preupload/{revision}`.
#[derive(Debug, Serialize)]
pub(crate) struct PreuploadRequest {
    pub files: Vec<PreuploadFile>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PreuploadFile {
    pub path: String,
    /// Base64 of the first 512 bytes.
    pub sample: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreuploadResponse {
    pub files: Vec<PreuploadResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PreuploadResult {
    pub path: String,
    pub upload_mode: UploadMode,
    #[serde(default)]
    pub should_ignore: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum UploadMode {
    Lfs,
    Regular,
}

/// Body of the git-lfs batch endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct LfsBatchRequest<'a> {
    pub operation: &'a str,
    pub transfers: Vec<&'a str>,
    pub objects: Vec<LfsObjectId>,
    pub hash_algo: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LfsObjectId {
    pub oid: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LfsBatchResponse {
    #[serde(default)]
    pub transfer: Option<String>,
    pub objects: Vec<LfsBatchObject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LfsBatchObject {
    pub oid: String,
    #[serde(default)]
    pub actions: Option<LfsActions>,
    #[serde(default)]
    pub error: Option<LfsObjectError>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LfsActions {
    #[serde(default)]
    pub upload: Option<LfsAction>,
    #[serde(default)]
    pub verify: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LfsAction {
    pub href: String,
    #[serde(default)]
    pub header: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LfsObjectError {
    pub code: i64,
    pub message: String,
}

/// Completion body for a multipart LFS upload.
#[derive(Debug, Serialize)]
pub(crate) struct MultipartCompletion {
    pub oid: String,
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Response of `POST /api/models/{repo}/commit/{revision}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommitResponse {
    #[serde(default)]
    pub commit_url: Option<String>,
    #[serde(default)]
    pub commit_oid: Option<String>,
}

/// What an upload sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub repo_id: String,
    /// Repository paths included in the commit.
    pub files: Vec<String>,
    /// LFS objects whose content was transferred.
    pub lfs_uploaded: usize,
    /// LFS objects the server already had.
    pub lfs_skipped: usize,
    pub commit_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_entry_content_size_prefers_lfs() {
        let entry: HfTreeEntry = serde_json::from_str(
            r#"{"type":"file","oid":"abc","size":134,"path":"model.safetensors",
                "lfs":{"oid":"deadbeef","size":4976698672,"pointerSize":134}}"#,
        )
        .unwrap();
        assert!(entry.is_file());
        assert_eq!(entry.content_size(), Some(4_976_698_672));
    }

    #[test]
    fn test_preupload_response_parses_modes() {
        let resp: PreuploadResponse = serde_json::from_str(
            r#"{"files":[{"path":"a.gguf","uploadMode":"lfs","shouldIgnore":false},
                         {"path":"imatrix_a.dat","uploadMode":"regular"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.files[0].upload_mode, UploadMode::Lfs);
        assert_eq!(resp.files[1].upload_mode, UploadMode::Regular);
        assert!(!resp.files[1].should_ignore);
    }

    #[test]
    fn test_create_repo_request_shape() {
        let body = serde_json::to_value(CreateRepoRequest {
            name: "Llama3-GGUF",
            organization: Some("alice"),
            repo_type: "model",
            private: false,
        })
        .unwrap();
        assert_eq!(body["name"], "Llama3-GGUF");
        assert_eq!(body["organization"], "alice");
        assert_eq!(body["type"], "model");
    }

    #[test]
    fn test_completed_part_is_camel_case() {
        let body = serde_json::to_value(CompletedPart {
            part_number: 1,
            etag: "\"e1\"".into(),
        })
        .unwrap();
        assert_eq!(body["partNumber"], 1);
    }
}
