//! Contracts for the media backend and the host UI.
//!
//! The export engine never renders, encodes, or uploads anything itself.
//! Those commands are served by the desktop backend; the wire types here
//! mirror the shapes it sends and expects.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cap_common::error::{ExportError, ExportResult};
use cap_export_model::settings::{ExportCompression, ExportFormat, ExportSettings};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Integer 2D size as the backend expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XY {
    pub x: u32,
    pub y: u32,
}

/// Settings for a single-frame preview render.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewSettings {
    pub fps: u32,
    pub resolution_base: XY,
    pub compression_bpp: f64,
}

/// Single-frame preview plus a whole-export estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub jpeg_base64: String,
    pub frame_render_time_ms: f64,
    pub total_frames: u64,
    pub estimated_size_mb: f64,
}

/// Settings handed to the render pipeline, one shape per container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format")]
pub enum RenderSettings {
    Mp4 {
        fps: u32,
        resolution_base: XY,
        compression: ExportCompression,
        custom_bpp: Option<f64>,
        force_ffmpeg_decoder: bool,
    },
    Gif {
        fps: u32,
        resolution_base: XY,
        quality: Option<u32>,
    },
}

impl RenderSettings {
    pub fn fps(&self) -> u32 {
        match self {
            Self::Mp4 { fps, .. } | Self::Gif { fps, .. } => *fps,
        }
    }
}

impl From<&ExportSettings> for RenderSettings {
    fn from(settings: &ExportSettings) -> Self {
        let resolution_base = XY {
            x: settings.width(),
            y: settings.height(),
        };
        match settings.format {
            ExportFormat::Mp4 => Self::Mp4 {
                fps: settings.fps,
                resolution_base,
                compression: settings.compression,
                custom_bpp: settings.custom_bpp,
                force_ffmpeg_decoder: settings.force_ffmpeg_decoder,
            },
            ExportFormat::Gif => Self::Gif {
                fps: settings.fps,
                resolution_base,
                quality: None,
            },
        }
    }
}

/// Render progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramesRendered {
    pub rendered_count: u32,
    pub total_frames: u32,
}

/// Progress callback for rendering. Called from the pipeline's own context.
pub type RenderProgressCallback = Box<dyn Fn(FramesRendered) + Send + Sync>;

/// Fractional upload progress in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub progress: f64,
}

/// Subset of the recording's media metadata used for share gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Duration in seconds.
    pub duration: f64,
    #[serde(default)]
    pub size: f64,
}

/// Existing share of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingMeta {
    pub id: String,
    pub link: String,
}

/// Recording metadata relevant to export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    pub pretty_name: String,
    #[serde(default)]
    pub sharing: Option<SharingMeta>,
}

/// Video record created ahead of the upload by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCreatedVideo {
    pub id: String,
    pub link: String,
}

/// Whether an upload creates a new share or replaces an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadMode {
    Reupload,
    Initial {
        pre_created_video: Option<PreCreatedVideo>,
    },
}

/// Upload outcome as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadResult {
    /// Upload finished; carries the share link.
    Success(String),
    NotAuthenticated,
    PlanCheckFailed,
    UpgradeRequired,
}

impl UploadResult {
    /// Map the failure sentinels to their dedicated errors.
    pub fn into_result(self) -> ExportResult<String> {
        match self {
            Self::Success(link) => Ok(link),
            Self::NotAuthenticated => Err(ExportError::NotAuthenticated),
            Self::PlanCheckFailed => Err(ExportError::PlanCheckFailed),
            Self::UpgradeRequired => Err(ExportError::UpgradeRequired),
        }
    }
}

/// Preview rendering service.
#[async_trait]
pub trait PreviewBackend: Send + Sync {
    async fn generate_export_preview_fast(
        &self,
        frame_time: f64,
        settings: &PreviewSettings,
    ) -> ExportResult<PreviewResponse>;
}

/// Full render of a project to a temporary artifact.
#[async_trait]
pub trait RenderPipeline: Send + Sync {
    /// Render `project` and return the path of the rendered file.
    ///
    /// Implementations should stop early once `cancel` is triggered; the
    /// caller also stops polling the returned future at that point.
    async fn render(
        &self,
        project: &Path,
        settings: &RenderSettings,
        progress: RenderProgressCallback,
        cancel: CancellationToken,
    ) -> ExportResult<PathBuf>;
}

/// Side-effecting backend commands used around a render.
#[async_trait]
pub trait MediaCommands: Send + Sync {
    async fn copy_video_to_clipboard(&self, path: &Path) -> ExportResult<()>;

    async fn copy_file_to_path(&self, src: &Path, dst: &Path) -> ExportResult<()>;

    async fn open_file_path(&self, path: &Path) -> ExportResult<()>;

    async fn get_video_metadata(&self, project: &Path) -> ExportResult<VideoMetadata>;

    /// Refresh the cached plan and report whether the user is upgraded.
    async fn check_upgraded_and_update(&self) -> ExportResult<bool>;

    async fn is_signed_in(&self) -> ExportResult<bool>;

    async fn project_meta(&self, project: &Path) -> ExportResult<ProjectMeta>;

    async fn upload_exported_video(
        &self,
        project: &Path,
        mode: UploadMode,
        progress: mpsc::UnboundedSender<UploadProgress>,
        organization_id: Option<String>,
    ) -> ExportResult<UploadResult>;
}

/// Noun used in user-facing messages for the exported media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Gif,
    Recording,
}

impl From<ExportFormat> for MediaKind {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Gif => Self::Gif,
            ExportFormat::Mp4 => Self::Recording,
        }
    }
}

/// Success notification shown after a job completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Toast {
    ExportedToFile { media: MediaKind },
    CopiedToClipboard { media: MediaKind },
    LinkCreated { link: String },
}

/// Host UI hooks the controller needs.
#[async_trait]
pub trait ExportUi: Send + Sync {
    /// Ask where to save; `None` when the user dismisses the dialog.
    async fn prompt_save_path(&self, extension: &str, default_name: &str) -> Option<PathBuf>;

    /// Ask the user to confirm cancelling the running export.
    async fn confirm_cancel(&self) -> bool;

    /// Kick off the sign-in flow without waiting for it to finish.
    async fn start_sign_in(&self);

    async fn show_upgrade_window(&self) -> ExportResult<()>;

    /// Blocking error dialog.
    fn message_dialog(&self, message: &str);

    fn toast(&self, toast: Toast);
}

/// Opaque handle to a displayable image registered with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u64);

/// Host-side store for preview images.
pub trait AssetStore: Send + Sync {
    /// Register a JPEG and return a handle the UI can display.
    fn create(&self, jpeg: Vec<u8>) -> AssetId;

    /// Free a handle. Called once per handle.
    fn release(&self, id: AssetId);
}
