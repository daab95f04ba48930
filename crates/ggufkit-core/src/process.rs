//! External tool invocation.
//!
//! Tools are described by an explicit program + argument list (no shell) and
//! run through the [`ToolRunner`] trait, which returns a structured
//! [`ToolOutput`]. Callers decide what a non-zero exit means with
//! [`check_exit`]; the runner itself only fails when the process could not
//! be started or waited on.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{GgufkitError, Result};
use crate::llama_cpp::parse_tensor_progress;

/// Number of trailing output lines kept for error reports.
const TAIL_LINES: usize = 20;

/// A fully-specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Short name used in logs and errors (e.g. `llama-quantize`).
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Argument list rendered lossily, for logs and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Whether `flag` appears as a standalone argument.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// The argument following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&Path> {
        let idx = self.args.iter().position(|a| a == flag)?;
        self.args.get(idx + 1).map(Path::new)
    }

    /// Command line for display only; arguments are never passed through a shell.
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in self.args_lossy() {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }
}

/// Result of a finished tool process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
}

impl ToolOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stderr: &str) -> Self {
        Self {
            code: Some(code),
            stdout_tail: Vec::new(),
            stderr_tail: stderr.lines().map(str::to_string).collect(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Turn a non-zero or signal exit into [`GgufkitError::ToolFailed`].
pub fn check_exit(invocation: &ToolInvocation, output: ToolOutput) -> Result<ToolOutput> {
    if output.is_success() {
        return Ok(output);
    }
    let tail = if output.stderr_tail.is_empty() {
        &output.stdout_tail
    } else {
        &output.stderr_tail
    };
    Err(GgufkitError::ToolFailed {
        tool: invocation.name.clone(),
        code: output.code,
        stderr_tail: tail.join("\n"),
    })
}

/// Runs external tools. Implemented by [`SystemToolRunner`] and by test fakes.
#[async_trait::async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

/// Runs tools as child processes of this one.
///
/// Children are killed if the returned future is dropped, so cancelling a run
/// does not leave a quantizer running in the background.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner;

#[async_trait::async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        debug!("Running: {}", invocation.display());

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GgufkitError::ToolSpawn {
                tool: invocation.name.clone(),
                message: format!("{} ({})", e, invocation.program.display()),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout_tail, stderr_tail) = tokio::join!(
            drain_lines(&invocation.name, "stdout", stdout),
            drain_lines(&invocation.name, "stderr", stderr),
        );

        let status = child.wait().await.map_err(|e| GgufkitError::ToolSpawn {
            tool: invocation.name.clone(),
            message: format!("waiting for process: {e}"),
        })?;

        Ok(ToolOutput {
            code: status.code(),
            stdout_tail,
            stderr_tail,
        })
    }
}

/// Read a child stream to the end, logging each line and keeping the tail.
async fn drain_lines<R>(tool: &str, stream: &str, reader: Option<R>) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Vec::new();
    };
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(TAIL_LINES);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(progress) = parse_tensor_progress(&line) {
                    debug!(
                        "[{}] tensor {}/{} {}",
                        tool, progress.index, progress.total, progress.tensor
                    );
                } else {
                    debug!("[{}] {}: {}", tool, stream, line);
                }
                if tail.len() == TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading {} {}: {}", tool, stream, e);
                break;
            }
        }
    }
    tail.into_iter().collect()
}
