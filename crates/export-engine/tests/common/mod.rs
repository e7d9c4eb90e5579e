#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cap_common::config::ExportJobConfig;
use cap_common::error::{ExportError, ExportResult};
use cap_export_engine::backend::{
    ExportUi, FramesRendered, MediaCommands, ProjectMeta, RenderPipeline, RenderProgressCallback,
    RenderSettings, SharingMeta, Toast, UploadMode, UploadProgress, UploadResult, VideoMetadata,
};
use cap_export_engine::controller::ExportController;
use cap_export_model::state::ExportState;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const SHARE_LINK: &str = "https://cap.so/s/abc123";

pub enum RenderScript {
    /// Report every frame, then write the artifact.
    Complete { total: u32 },
    /// Report frames up to `at`, keep the progress callback, then wait
    /// for cancellation.
    StallAt { total: u32, at: u32 },
    Fail(String),
}

pub struct MockRender {
    script: RenderScript,
    dir: PathBuf,
    calls: AtomicU32,
    pub settings: Mutex<Vec<RenderSettings>>,
    /// Callback of the last stalled render.
    pub stashed: Mutex<Option<RenderProgressCallback>>,
}

impl MockRender {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderPipeline for MockRender {
    async fn render(
        &self,
        _project: &Path,
        settings: &RenderSettings,
        progress: RenderProgressCallback,
        cancel: CancellationToken,
    ) -> ExportResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.settings.lock().unwrap().push(settings.clone());

        match &self.script {
            RenderScript::Complete { total } => {
                for rendered_count in 0..=*total {
                    progress(FramesRendered {
                        rendered_count,
                        total_frames: *total,
                    });
                }
                let path = self.dir.join("rendered.mp4");
                tokio::fs::write(&path, b"rendered video").await?;
                Ok(path)
            }
            RenderScript::StallAt { total, at } => {
                for rendered_count in 0..=*at {
                    progress(FramesRendered {
                        rendered_count,
                        total_frames: *total,
                    });
                }
                *self.stashed.lock().unwrap() = Some(progress);
                cancel.cancelled().await;
                Err(ExportError::Cancelled)
            }
            RenderScript::Fail(message) => Err(ExportError::render(message.clone())),
        }
    }
}

pub struct MockMedia {
    pub signed_in: bool,
    pub upgraded: bool,
    pub duration: f64,
    pub sharing: Option<SharingMeta>,
    pub upload_progress: Vec<f64>,
    /// Yield after each progress update instead of sending them in a burst.
    pub upload_yields: bool,
    pub upload_result: UploadResult,
    pub copy_delay: Duration,
    pub clipboard: Mutex<Vec<PathBuf>>,
    pub upload_modes: Mutex<Vec<UploadMode>>,
    pub upload_orgs: Mutex<Vec<Option<String>>>,
    pub opened: Mutex<Vec<PathBuf>>,
}

impl Default for MockMedia {
    fn default() -> Self {
        Self {
            signed_in: true,
            upgraded: true,
            duration: 42.0,
            sharing: None,
            upload_progress: Vec::new(),
            upload_yields: true,
            upload_result: UploadResult::Success(SHARE_LINK.to_string()),
            copy_delay: Duration::ZERO,
            clipboard: Mutex::new(Vec::new()),
            upload_modes: Mutex::new(Vec::new()),
            upload_orgs: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MediaCommands for MockMedia {
    async fn copy_video_to_clipboard(&self, path: &Path) -> ExportResult<()> {
        self.clipboard.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn copy_file_to_path(&self, src: &Path, dst: &Path) -> ExportResult<()> {
        if !self.copy_delay.is_zero() {
            tokio::time::sleep(self.copy_delay).await;
        }
        tokio::fs::copy(src, dst).await?;
        Ok(())
    }

    async fn open_file_path(&self, path: &Path) -> ExportResult<()> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn get_video_metadata(&self, _project: &Path) -> ExportResult<VideoMetadata> {
        Ok(VideoMetadata {
            duration: self.duration,
            size: 12.0,
        })
    }

    async fn check_upgraded_and_update(&self) -> ExportResult<bool> {
        Ok(self.upgraded)
    }

    async fn is_signed_in(&self) -> ExportResult<bool> {
        Ok(self.signed_in)
    }

    async fn project_meta(&self, _project: &Path) -> ExportResult<ProjectMeta> {
        Ok(ProjectMeta {
            pretty_name: "Demo Recording".to_string(),
            sharing: self.sharing.clone(),
        })
    }

    async fn upload_exported_video(
        &self,
        _project: &Path,
        mode: UploadMode,
        progress: mpsc::UnboundedSender<UploadProgress>,
        organization_id: Option<String>,
    ) -> ExportResult<UploadResult> {
        self.upload_modes.lock().unwrap().push(mode);
        self.upload_orgs.lock().unwrap().push(organization_id);
        for fraction in &self.upload_progress {
            let _ = progress.send(UploadProgress {
                progress: *fraction,
            });
            if self.upload_yields {
                tokio::task::yield_now().await;
            }
        }
        Ok(self.upload_result.clone())
    }
}

pub struct MockUi {
    pub save_path: Option<PathBuf>,
    pub confirm: bool,
    pub save_prompts: Mutex<Vec<(String, String)>>,
    pub dialogs: Mutex<Vec<String>>,
    pub toasts: Mutex<Vec<Toast>>,
    pub sign_ins: AtomicU32,
    pub upgrade_windows: AtomicU32,
}

impl MockUi {
    pub fn new(save_path: Option<PathBuf>) -> Self {
        Self {
            save_path,
            confirm: true,
            save_prompts: Mutex::new(Vec::new()),
            dialogs: Mutex::new(Vec::new()),
            toasts: Mutex::new(Vec::new()),
            sign_ins: AtomicU32::new(0),
            upgrade_windows: AtomicU32::new(0),
        }
    }

    pub fn dialogs(&self) -> Vec<String> {
        self.dialogs.lock().unwrap().clone()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExportUi for MockUi {
    async fn prompt_save_path(&self, extension: &str, default_name: &str) -> Option<PathBuf> {
        self.save_prompts
            .lock()
            .unwrap()
            .push((extension.to_string(), default_name.to_string()));
        self.save_path.clone()
    }

    async fn confirm_cancel(&self) -> bool {
        self.confirm
    }

    async fn start_sign_in(&self) {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
    }

    async fn show_upgrade_window(&self) -> ExportResult<()> {
        self.upgrade_windows.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn message_dialog(&self, message: &str) {
        self.dialogs.lock().unwrap().push(message.to_string());
    }

    fn toast(&self, toast: Toast) {
        self.toasts.lock().unwrap().push(toast);
    }
}

pub struct Harness {
    pub controller: Arc<ExportController>,
    pub render: Arc<MockRender>,
    pub media: Arc<MockMedia>,
    pub ui: Arc<MockUi>,
    pub states: Arc<Mutex<Vec<ExportState>>>,
    pub dir: TempDir,
}

impl Harness {
    /// Controller over mocks; the save dialog answers `save_name` inside
    /// the harness directory, or is dismissed when `None`.
    pub fn new(script: RenderScript, media: MockMedia, save_name: Option<&str>) -> Self {
        Self::with_ui(script, media, |dir| MockUi::new(save_name.map(|name| dir.join(name))))
    }

    pub fn with_ui(
        script: RenderScript,
        media: MockMedia,
        ui: impl FnOnce(&Path) -> MockUi,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let render = Arc::new(MockRender {
            script,
            dir: dir.path().to_path_buf(),
            calls: AtomicU32::new(0),
            settings: Mutex::new(Vec::new()),
            stashed: Mutex::new(None),
        });
        let media = Arc::new(media);
        let ui = Arc::new(ui(dir.path()));

        let controller = Arc::new(ExportController::new(
            dir.path().join("demo.cap"),
            render.clone(),
            media.clone(),
            ui.clone(),
            ExportJobConfig::default(),
        ));

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        controller.observe(Arc::new(move |state: &ExportState| {
            sink.lock().unwrap().push(*state);
        }));

        Self {
            controller,
            render,
            media,
            ui,
            states,
            dir,
        }
    }

    pub fn states(&self) -> Vec<ExportState> {
        self.states.lock().unwrap().clone()
    }
}
