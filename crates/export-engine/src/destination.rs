//! Post-processing of a finished render, one strategy per destination.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cap_common::error::{ExportError, ExportResult};
use cap_export_model::settings::ExportSettings;
use cap_export_model::state::{ExportAction, ExportEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{MediaCommands, UploadMode};

/// Sink for state events of the job being post-processed.
///
/// Emitting fails with [`ExportError::Cancelled`] once the job is no longer
/// the active one.
pub trait JobEvents: Send + Sync {
    fn emit(&self, event: ExportEvent) -> ExportResult<()>;
}

/// Everything a post-processor may touch.
pub struct PostProcessContext<'a> {
    pub project: &'a Path,
    /// Artifact produced by the render pipeline.
    pub rendered: &'a Path,
    pub settings: &'a ExportSettings,
    /// User-chosen destination for save jobs.
    pub output_path: Option<&'a Path>,
    pub media: &'a dyn MediaCommands,
    pub events: &'a dyn JobEvents,
    pub cancel: &'a CancellationToken,
}

/// Result of a successful post-processing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessOutput {
    Saved(PathBuf),
    Copied,
    Uploaded { link: String },
}

#[async_trait]
pub trait PostProcessor: Send + Sync {
    fn action(&self) -> ExportAction;

    async fn run(&self, ctx: PostProcessContext<'_>) -> ExportResult<PostProcessOutput>;
}

/// Strategy for `action`.
pub fn post_processor_for(action: ExportAction) -> Box<dyn PostProcessor> {
    match action {
        ExportAction::Save => Box::new(SaveToPath),
        ExportAction::Copy => Box::new(CopyToClipboard),
        ExportAction::Upload => Box::new(UploadToLink),
    }
}

/// Copy the rendered file to the path the user picked.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveToPath;

#[async_trait]
impl PostProcessor for SaveToPath {
    fn action(&self) -> ExportAction {
        ExportAction::Save
    }

    async fn run(&self, ctx: PostProcessContext<'_>) -> ExportResult<PostProcessOutput> {
        let target = ctx
            .output_path
            .ok_or_else(|| ExportError::backend("No output path chosen for save"))?;
        ctx.media.copy_file_to_path(ctx.rendered, target).await?;

        // The copy is not interruptible, so a cancel that landed while it
        // ran may have cleaned up before the file existed.
        if ctx.cancel.is_cancelled() {
            remove_partial_output(target).await;
            return Err(ExportError::Cancelled);
        }
        tracing::info!(path = %target.display(), "Export saved");
        Ok(PostProcessOutput::Saved(target.to_path_buf()))
    }
}

/// Put the rendered video on the system clipboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyToClipboard;

#[async_trait]
impl PostProcessor for CopyToClipboard {
    fn action(&self) -> ExportAction {
        ExportAction::Copy
    }

    async fn run(&self, ctx: PostProcessContext<'_>) -> ExportResult<PostProcessOutput> {
        ctx.media.copy_video_to_clipboard(ctx.rendered).await?;
        tracing::info!(path = %ctx.rendered.display(), "Export copied to clipboard");
        Ok(PostProcessOutput::Copied)
    }
}

/// Upload the rendered video and report whole-percent progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadToLink;

#[async_trait]
impl PostProcessor for UploadToLink {
    fn action(&self) -> ExportAction {
        ExportAction::Upload
    }

    async fn run(&self, ctx: PostProcessContext<'_>) -> ExportResult<PostProcessOutput> {
        let meta = ctx.media.project_meta(ctx.project).await?;
        let mode = if meta.sharing.is_some() {
            UploadMode::Reupload
        } else {
            UploadMode::Initial {
                pre_created_video: None,
            }
        };
        tracing::info!(
            reupload = matches!(mode, UploadMode::Reupload),
            organization_id = ?ctx.settings.organization_id,
            "Starting upload"
        );

        ctx.events.emit(ExportEvent::UploadStarted)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let upload = ctx.media.upload_exported_video(
            ctx.project,
            mode,
            tx,
            ctx.settings.organization_id.clone(),
        );
        tokio::pin!(upload);

        let result = loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(ExportError::Cancelled),
                result = &mut upload => break result?,
                Some(update) = rx.recv() => {
                    ctx.events.emit(ExportEvent::UploadProgress(upload_percent(update.progress)))?;
                }
            }
        };
        // Progress sent right before the upload returned is still buffered.
        while let Ok(update) = rx.try_recv() {
            ctx.events.emit(ExportEvent::UploadProgress(upload_percent(update.progress)))?;
        }

        let link = result.into_result()?;
        tracing::info!(%link, "Upload complete");

        // Pick up the new share so the next upload is a reupload.
        match ctx.media.project_meta(ctx.project).await {
            Ok(meta) => tracing::debug!(shared = meta.sharing.is_some(), "Project meta refreshed"),
            Err(e) => tracing::warn!(error = %e, "Failed to refresh project meta after upload"),
        }
        Ok(PostProcessOutput::Uploaded { link })
    }
}

/// Best-effort removal of a cancelled save; failures are only logged.
pub(crate) async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::info!(path = %path.display(), "Removed cancelled export output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Failed to delete cancelled file")
        }
    }
}

/// Fraction in `[0, 1]` to a whole percentage.
pub fn upload_percent(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}
