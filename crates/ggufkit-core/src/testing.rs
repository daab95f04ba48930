//! In-memory collaborators for pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{GgufkitError, Result};
use crate::hub::{collect_upload_files, HubClient, UploadSummary};
use crate::llama_cpp::{CONVERT_TOOL, IMATRIX_TOOL, QUANTIZE_TOOL};
use crate::process::{ToolInvocation, ToolOutput, ToolRunner};

/// Records invocations and writes each tool's output file, unless a failure
/// rule matches, in which case it exits 1 without writing anything.
#[derive(Default)]
pub struct FakeToolRunner {
    calls: Mutex<Vec<ToolInvocation>>,
    failures: Vec<(String, Option<String>)>,
}

impl FakeToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail invocations of `tool`, optionally only those with `arg` among their args.
    pub fn fail_when(mut self, tool: &str, arg: Option<&str>) -> Self {
        self.failures
            .push((tool.to_string(), arg.map(str::to_string)));
        self
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    fn should_fail(&self, invocation: &ToolInvocation) -> bool {
        let args = invocation.args_lossy();
        self.failures.iter().any(|(tool, arg)| {
            *tool == invocation.name && arg.as_ref().map_or(true, |a| args.contains(a))
        })
    }

    fn output_path(invocation: &ToolInvocation) -> Option<PathBuf> {
        match invocation.name.as_str() {
            CONVERT_TOOL => invocation.flag_value("--outfile").map(Path::to_path_buf),
            IMATRIX_TOOL => invocation.flag_value("-o").map(Path::to_path_buf),
            QUANTIZE_TOOL => {
                let n = invocation.args.len();
                invocation.args.get(n.checked_sub(2)?).map(PathBuf::from)
            }
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl ToolRunner for FakeToolRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        if self.should_fail(invocation) {
            return Ok(ToolOutput::failure(1, "simulated failure"));
        }
        if let Some(path) = Self::output_path(invocation) {
            std::fs::write(&path, invocation.display())?;
        }
        Ok(ToolOutput::success())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCall {
    Download { repo_id: String, local_dir: PathBuf },
    CreateRepo { repo_id: String, private: bool },
    Upload { repo_id: String, files: Vec<String> },
}

/// Hub fake that materializes a checkpoint with a `config.json`.
pub struct FakeHub {
    calls: Mutex<Vec<HubCall>>,
    dtype: String,
    fail_download: bool,
    write_config: bool,
    fail_upload: bool,
}

impl FakeHub {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            dtype: "float16".to_string(),
            fail_download: false,
            write_config: true,
            fail_upload: false,
        }
    }

    /// Snapshot without a `config.json`.
    pub fn without_config(mut self) -> Self {
        self.write_config = false;
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn with_dtype(mut self, dtype: &str) -> Self {
        self.dtype = dtype.to_string();
        self
    }

    pub fn failing_download(mut self) -> Self {
        self.fail_download = true;
        self
    }

    pub fn calls(&self) -> Vec<HubCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, HubCall::Upload { .. }))
            .count()
    }

    /// File names of the most recent upload.
    pub fn uploaded_files(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                HubCall::Upload { files, .. } => Some(files),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl HubClient for FakeHub {
    async fn snapshot_download(
        &self,
        repo_id: &str,
        _revision: &str,
        local_dir: &Path,
    ) -> Result<PathBuf> {
        self.calls.lock().unwrap().push(HubCall::Download {
            repo_id: repo_id.to_string(),
            local_dir: local_dir.to_path_buf(),
        });
        if self.fail_download {
            return Err(GgufkitError::DownloadFailed {
                url: format!("fake://{repo_id}"),
                message: "simulated network failure".to_string(),
            });
        }
        std::fs::create_dir_all(local_dir)?;
        if self.write_config {
            std::fs::write(
                local_dir.join("config.json"),
                format!(r#"{{"model_type": "llama", "torch_dtype": "{}"}}"#, self.dtype),
            )?;
        }
        Ok(local_dir.to_path_buf())
    }

    async fn create_repo(&self, repo_id: &str, private: bool) -> Result<()> {
        self.calls.lock().unwrap().push(HubCall::CreateRepo {
            repo_id: repo_id.to_string(),
            private,
        });
        Ok(())
    }

    async fn upload_folder(
        &self,
        repo_id: &str,
        folder: &Path,
        allow_patterns: &[String],
        _commit_message: &str,
    ) -> Result<UploadSummary> {
        let files: Vec<String> = collect_upload_files(folder, allow_patterns)?
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        self.calls.lock().unwrap().push(HubCall::Upload {
            repo_id: repo_id.to_string(),
            files: files.clone(),
        });
        if self.fail_upload {
            return Err(GgufkitError::UploadFailed {
                repo_id: repo_id.to_string(),
                message: "simulated commit rejection".to_string(),
            });
        }
        Ok(UploadSummary {
            repo_id: repo_id.to_string(),
            files,
            ..Default::default()
        })
    }
}
