//! The pipeline driver.
//!
//! Each stage is a free function over an immutable [`PipelineContext`], so
//! stages can be exercised one at a time. [`run`] sequences them:
//!
//! 1. fetch the checkpoint
//! 2. infer the base precision from its `config.json`
//! 3. convert to a base GGUF (skipped if it exists)
//! 4. build the importance matrix once if any output type needs it (skipped
//!    if it exists)
//! 5. quantize to every output type (each skipped if it exists)
//! 6. upload the artifacts
//!
//! Failures in stages 1-4 stop the run. A failed quantization is recorded and
//! the run moves on to the next output type; the upload still happens and the
//! report marks the run as failed.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::artifact::{clear_stale_part, finalize_part, part_path};
use crate::config::PipelineConfig;
use crate::error::{GgufkitError, Result};
use crate::hub::{HubClient, UploadSummary};
use crate::llama_cpp::LlamaCppTools;
use crate::naming::{create_model_name, imatrix_file_name, needs_calibration, upload_repo_id};
use crate::precision::{infer_precision_tag, PrecisionTag};
use crate::process::{check_exit, ToolInvocation, ToolRunner};
use crate::report::{RunReport, Stage, StageOutcome};

/// Everything a stage needs: the configuration and the two collaborators.
pub struct PipelineContext<'a> {
    pub config: &'a PipelineConfig,
    pub tools: LlamaCppTools,
    pub runner: &'a dyn ToolRunner,
    pub hub: &'a dyn HubClient,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        runner: &'a dyn ToolRunner,
        hub: &'a dyn HubClient,
    ) -> Self {
        Self {
            config,
            tools: LlamaCppTools::new(&config.tools),
            runner,
            hub,
        }
    }

    fn output_dir(&self) -> &Path {
        &self.config.gguf.output_directory
    }
}

/// A stage's artifact, and whether this run produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Built(PathBuf),
    Existing(PathBuf),
}

impl Artifact {
    pub fn path(&self) -> &Path {
        match self {
            Artifact::Built(p) | Artifact::Existing(p) => p,
        }
    }

    fn outcome(&self) -> StageOutcome {
        match self {
            Artifact::Built(p) => StageOutcome::Completed(Some(p.clone())),
            Artifact::Existing(p) => {
                StageOutcome::Skipped(format!("{} already exists", p.display()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Download `repo_id` into `dest_dir`.
pub async fn fetch_checkpoint(
    ctx: &PipelineContext<'_>,
    repo_id: &str,
    dest_dir: &Path,
) -> Result<PathBuf> {
    ctx.hub
        .snapshot_download(repo_id, &ctx.config.huggingface.revision, dest_dir)
        .await
}

/// Base precision for the first conversion.
pub fn infer_precision(checkpoint_path: &Path) -> Result<PrecisionTag> {
    infer_precision_tag(checkpoint_path)
}

/// Convert the checkpoint to `{output_dir}/{output_name}` at `precision`.
pub async fn convert_base(
    ctx: &PipelineContext<'_>,
    checkpoint_path: &Path,
    output_name: &str,
    precision: PrecisionTag,
) -> Result<Artifact> {
    let dest = ctx.output_dir().join(output_name);
    info!(
        "Starting initial GGUF conversion of {} to {} ...",
        checkpoint_path.display(),
        precision
    );
    produce(ctx, &dest, "Initial converted model", |part| {
        ctx.tools.convert(checkpoint_path, part, precision)
    })
    .await
}

/// Compute the importance matrix for `repo_id` from the base artifact.
pub async fn build_calibration_matrix(
    ctx: &PipelineContext<'_>,
    repo_id: &str,
    base_artifact: &Path,
) -> Result<Artifact> {
    let dest = ctx.output_dir().join(imatrix_file_name(repo_id));
    let dataset = ctx.config.calibration_dataset()?;
    info!("Generating importance matrix for {} ...", repo_id);
    produce(ctx, &dest, "Importance matrix", |part| {
        ctx.tools.imatrix(base_artifact, dataset, part)
    })
    .await
}

/// Quantize with an importance matrix.
pub async fn quantize_with_calibration(
    ctx: &PipelineContext<'_>,
    base_artifact: &Path,
    output_path: &Path,
    output_type: &str,
    matrix_path: &Path,
) -> Result<Artifact> {
    info!(
        "Starting conversion of {} to {} (imatrix {}) ...",
        base_artifact.display(),
        output_type,
        matrix_path.display()
    );
    produce(ctx, output_path, "Quantized model", |part| {
        ctx.tools
            .quantize(base_artifact, part, output_type, Some(matrix_path))
    })
    .await
}

/// Quantize without an importance matrix.
pub async fn quantize_standard(
    ctx: &PipelineContext<'_>,
    base_artifact: &Path,
    output_path: &Path,
    output_type: &str,
) -> Result<Artifact> {
    info!(
        "Starting conversion of {} to {} ...",
        base_artifact.display(),
        output_type
    );
    produce(ctx, output_path, "Quantized model", |part| {
        ctx.tools.quantize(base_artifact, part, output_type, None)
    })
    .await
}

/// Create `{account}/{base}-GGUF` and upload the run's artifacts from `output_dir`.
pub async fn upload(
    ctx: &PipelineContext<'_>,
    output_dir: &Path,
    model_base: &str,
    account: &str,
) -> Result<UploadSummary> {
    let repo_id = upload_repo_id(account, model_base);
    ctx.hub
        .create_repo(&repo_id, ctx.config.huggingface.private)
        .await?;
    ctx.hub
        .upload_folder(
            &repo_id,
            output_dir,
            &ctx.config.upload_allow_patterns(),
            &ctx.config.commit_message(),
        )
        .await
}

/// Run `build(part)` unless `dest` already exists, then move the part file
/// into place. A failed tool leaves neither file behind.
async fn produce<F>(
    ctx: &PipelineContext<'_>,
    dest: &Path,
    label: &str,
    build: F,
) -> Result<Artifact>
where
    F: FnOnce(&Path) -> ToolInvocation,
{
    if dest.exists() {
        info!("{} already exists: {}", label, dest.display());
        return Ok(Artifact::Existing(dest.to_path_buf()));
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| GgufkitError::io("creating output dir", parent, e))?;
    }
    let part = part_path(dest);
    clear_stale_part(&part)?;

    let invocation = build(&part);
    let result = match ctx.runner.run(&invocation).await {
        Ok(output) => check_exit(&invocation, output).map(|_| ()),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        let _ = std::fs::remove_file(&part);
        return Err(e);
    }

    finalize_part(&part, dest)?;
    info!("{} complete: {}", label, dest.display());
    Ok(Artifact::Built(dest.to_path_buf()))
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

fn record_failure(report: &mut RunReport, stage: Stage, err: &GgufkitError, started: Instant) {
    error!("Stage {} failed: {}", stage, err);
    report.record(stage, StageOutcome::Failed(err.to_string()), started.elapsed());
}

/// Run every stage in order and report what happened.
pub async fn run(ctx: &PipelineContext<'_>) -> RunReport {
    let config = ctx.config;
    let mut report = RunReport::new();
    let wants_imatrix = config.needs_calibration();
    info!("Starting run for {} ...", config.huggingface.model_name);

    for missing in ctx.tools.preflight(wants_imatrix) {
        warn!("Tool not found: {}", missing.display());
    }

    // 1. Fetch
    let started = Instant::now();
    let checkpoint_dir = config.checkpoint_dir();
    let checkpoint =
        match fetch_checkpoint(ctx, &config.huggingface.model_name, &checkpoint_dir).await {
            Ok(path) => {
                report.record(
                    Stage::Fetch,
                    StageOutcome::Completed(Some(path.clone())),
                    started.elapsed(),
                );
                path
            }
            Err(e) => {
                record_failure(&mut report, Stage::Fetch, &e, started);
                return report;
            }
        };

    // 2. Precision
    let started = Instant::now();
    let precision = match infer_precision(&checkpoint) {
        Ok(tag) => {
            report.record(Stage::InferPrecision, StageOutcome::Completed(None), started.elapsed());
            tag
        }
        Err(e) => {
            record_failure(&mut report, Stage::InferPrecision, &e, started);
            return report;
        }
    };

    // 3. Base conversion
    let started = Instant::now();
    let base_name = create_model_name(&config.gguf.model_name_base, precision.as_str());
    let base = match convert_base(ctx, &checkpoint, &base_name, precision).await {
        Ok(artifact) => {
            report.record(Stage::Convert, artifact.outcome(), started.elapsed());
            artifact.path().to_path_buf()
        }
        Err(e) => {
            record_failure(&mut report, Stage::Convert, &e, started);
            return report;
        }
    };

    // 4. Importance matrix
    let started = Instant::now();
    let matrix = if wants_imatrix {
        match build_calibration_matrix(ctx, &config.huggingface.model_name, &base).await {
            Ok(artifact) => {
                report.record(Stage::Calibrate, artifact.outcome(), started.elapsed());
                Some(artifact.path().to_path_buf())
            }
            Err(e) => {
                record_failure(&mut report, Stage::Calibrate, &e, started);
                return report;
            }
        }
    } else {
        report.record(
            Stage::Calibrate,
            StageOutcome::Skipped("no output type needs an importance matrix".to_string()),
            started.elapsed(),
        );
        None
    };

    // 5. Quantize each output type
    for output_type in &config.gguf.output_types {
        let started = Instant::now();
        let stage = Stage::Quantize(output_type.clone());
        let output_path = ctx
            .output_dir()
            .join(create_model_name(&config.gguf.model_name_base, output_type));

        let result = match (&matrix, needs_calibration(output_type)) {
            (Some(matrix), true) => {
                quantize_with_calibration(ctx, &base, &output_path, output_type, matrix).await
            }
            _ => quantize_standard(ctx, &base, &output_path, output_type).await,
        };
        match result {
            Ok(artifact) => report.record(stage, artifact.outcome(), started.elapsed()),
            Err(e) => record_failure(&mut report, stage, &e, started),
        }
    }

    // 6. Upload
    let started = Instant::now();
    if !config.upload.enabled {
        report.record(
            Stage::Upload,
            StageOutcome::Skipped("upload disabled in config".to_string()),
            started.elapsed(),
        );
        return report;
    }
    match upload(
        ctx,
        ctx.output_dir(),
        &config.gguf.model_name_base,
        &config.huggingface.hugging_face_username,
    )
    .await
    {
        Ok(summary) => {
            info!(
                "Uploaded {} file(s) to {} ({} LFS transferred, {} already present)",
                summary.files.len(),
                summary.repo_id,
                summary.lfs_uploaded,
                summary.lfs_skipped
            );
            report.record(Stage::Upload, StageOutcome::Completed(None), started.elapsed());
        }
        Err(e) => record_failure(&mut report, Stage::Upload, &e, started),
    }

    report
}
