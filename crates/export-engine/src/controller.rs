//! Export job controller.
//!
//! Drives one export at a time through render and post-processing:
//!
//! ```text
//! Idle ─► Starting ─► Rendering ─► PostProcessing ─┬─────────────► Done
//!  ▲          │            │              │        └─► Uploading ─► Done
//!  └──────────┴────────────┴──────────────┴── cancel / error
//! ```
//!
//! Every state mutation is tagged with the id of the job that issued it and
//! is dropped if that job is no longer active, so late callbacks from a
//! cancelled job cannot overwrite a newer job's state. Observers are called
//! after the controller lock is released and may call back into it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cap_common::config::ExportJobConfig;
use cap_common::error::{ExportError, ExportResult};
use cap_common::sync::lock;
use cap_export_model::settings::ExportSettings;
use cap_export_model::state::{
    ExportAction, ExportEvent, ExportState, ExportStateMachine, StateNotifier, StateObserver,
};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    ExportUi, FramesRendered, MediaCommands, MediaKind, RenderPipeline, RenderProgressCallback,
    RenderSettings, Toast,
};
use crate::destination::{
    post_processor_for, remove_partial_output, JobEvents, PostProcessContext, PostProcessOutput,
};

/// How a call to [`ExportController::start_export`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Done,
    /// Stopped by the user or by share gating; nothing was shown.
    Cancelled,
    /// Failed; carries the message shown to the user.
    Failed(String),
    /// Another job was active, so nothing happened.
    Ignored,
}

/// Summary of the most recent finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub action: ExportAction,
    pub outcome: ExportOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_path: Option<PathBuf>,
    pub share_link: Option<String>,
}

#[derive(Debug, Clone)]
struct ActiveJob {
    id: u64,
    action: ExportAction,
    token: CancellationToken,
    output_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct ControllerState {
    machine: ExportStateMachine,
    job: Option<ActiveJob>,
    last_report: Option<JobReport>,
}

/// Handle a running job uses to publish state changes.
#[derive(Clone)]
struct JobHandle {
    id: u64,
    token: CancellationToken,
    shared: Arc<Mutex<ControllerState>>,
    notifier: Arc<StateNotifier>,
}

impl JobHandle {
    fn ensure_live(&self) -> ExportResult<()> {
        if self.token.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        Ok(())
    }

    fn with_job<T>(
        &self,
        f: impl FnOnce(&mut ControllerState) -> ExportResult<T>,
    ) -> ExportResult<T> {
        self.ensure_live()?;
        let mut state = lock(&self.shared);
        if state.job.as_ref().map(|job| job.id) != Some(self.id) {
            return Err(ExportError::Cancelled);
        }
        f(&mut state)
    }

    fn progress_callback(&self) -> RenderProgressCallback {
        let handle = self.clone();
        Box::new(move |frames: FramesRendered| {
            let event = ExportEvent::Progress {
                rendered_count: frames.rendered_count,
                total_frames: frames.total_frames,
            };
            match handle.emit(event) {
                Ok(()) | Err(ExportError::Cancelled) => {}
                Err(e) => tracing::warn!(error = %e, job_id = handle.id, "Dropped render progress"),
            }
        })
    }
}

impl JobEvents for JobHandle {
    fn emit(&self, event: ExportEvent) -> ExportResult<()> {
        let result = self.with_job(|state| {
            state
                .machine
                .transition(event)
                .map(|_| ())
                .map_err(|e| ExportError::Other(e.into()))
        });
        self.notifier.deliver();
        result
    }
}

/// Runs export jobs against the media backend and reports to the host UI.
pub struct ExportController {
    project: PathBuf,
    render: Arc<dyn RenderPipeline>,
    media: Arc<dyn MediaCommands>,
    ui: Arc<dyn ExportUi>,
    config: ExportJobConfig,
    shared: Arc<Mutex<ControllerState>>,
    notifier: Arc<StateNotifier>,
    next_job_id: AtomicU64,
}

impl ExportController {
    pub fn new(
        project: impl Into<PathBuf>,
        render: Arc<dyn RenderPipeline>,
        media: Arc<dyn MediaCommands>,
        ui: Arc<dyn ExportUi>,
        config: ExportJobConfig,
    ) -> Self {
        let state = ControllerState::default();
        let notifier = state.machine.notifier();
        Self {
            project: project.into(),
            render,
            media,
            ui,
            config,
            shared: Arc::new(Mutex::new(state)),
            notifier,
            next_job_id: AtomicU64::new(0),
        }
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    pub fn state(&self) -> ExportState {
        lock(&self.shared).machine.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        lock(&self.shared).machine.subscribe()
    }

    /// Register an observer that sees every state transition in order.
    pub fn observe(&self, observer: Arc<dyn StateObserver>) {
        self.notifier.observe(observer);
    }

    pub fn last_report(&self) -> Option<JobReport> {
        lock(&self.shared).last_report.clone()
    }

    /// Run one export job to completion.
    ///
    /// Does nothing and returns [`ExportOutcome::Ignored`] unless the
    /// controller is idle.
    pub async fn start_export(&self, action: ExportAction, settings: &ExportSettings) -> ExportOutcome {
        let started_at = Utc::now();
        let Some(handle) = self.begin(action) else {
            tracing::debug!(?action, state = ?self.state(), "Export already in progress, ignoring");
            return ExportOutcome::Ignored;
        };

        tracing::info!(
            job_id = handle.id,
            ?action,
            format = settings.format.as_str(),
            fps = settings.fps,
            width = settings.width(),
            height = settings.height(),
            "Starting export"
        );

        let result = self.run_job(&handle, action, settings).await;
        let output = result.as_ref().ok().cloned();
        let outcome = self.finish(&handle, action, settings, result);

        let report = JobReport {
            action,
            outcome: outcome.clone(),
            started_at,
            finished_at: Utc::now(),
            output_path: match &output {
                Some(PostProcessOutput::Saved(path)) => Some(path.clone()),
                _ => None,
            },
            share_link: match output {
                Some(PostProcessOutput::Uploaded { link }) => Some(link),
                _ => None,
            },
        };
        tracing::info!(
            job_id = handle.id,
            ?action,
            outcome = ?report.outcome,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Export finished"
        );
        lock(&self.shared).last_report = Some(report);

        outcome
    }

    /// Cancel the active job, if any.
    ///
    /// The state returns to `Idle` immediately. For save jobs the partially
    /// written output file is removed on a best-effort basis.
    pub async fn cancel(&self) -> bool {
        let cancelled = {
            let mut state = lock(&self.shared);
            let Some(job) = state.job.take() else {
                return false;
            };
            job.token.cancel();
            if let Err(e) = state.machine.transition(ExportEvent::Reset) {
                tracing::warn!(error = %e, "Failed to reset export state");
            }
            job
        };
        self.notifier.deliver();

        tracing::info!(job_id = cancelled.id, action = ?cancelled.action, "Export cancelled");

        if cancelled.action == ExportAction::Save {
            if let Some(path) = &cancelled.output_path {
                remove_partial_output(path).await;
            }
        }
        true
    }

    /// Ask the user to confirm, then cancel.
    pub async fn confirm_and_cancel(&self) -> bool {
        if !self.state().is_active() {
            return false;
        }
        if !self.ui.confirm_cancel().await {
            return false;
        }
        self.cancel().await
    }

    /// Leave the `Done` state so a new job can start.
    pub fn reset(&self) -> bool {
        let reset = {
            let mut state = lock(&self.shared);
            matches!(state.machine.current(), ExportState::Done { .. })
                && state.machine.transition(ExportEvent::Reset).is_ok()
        };
        self.notifier.deliver();
        reset
    }

    /// Reveal the file written by the last successful save.
    pub async fn open_exported_file(&self) -> ExportResult<bool> {
        let path = self
            .last_report()
            .filter(|report| report.outcome == ExportOutcome::Done)
            .and_then(|report| report.output_path);
        match path {
            Some(path) => {
                self.media.open_file_path(&path).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn begin(&self, action: ExportAction) -> Option<JobHandle> {
        let handle = {
            let mut state = lock(&self.shared);
            if !state.machine.current().is_idle() {
                return None;
            }
            state.machine.transition(ExportEvent::Start(action)).ok()?;

            let id = self.next_job_id.fetch_add(1, Ordering::SeqCst) + 1;
            let token = CancellationToken::new();
            state.job = Some(ActiveJob {
                id,
                action,
                token: token.clone(),
                output_path: None,
            });

            JobHandle {
                id,
                token,
                shared: Arc::clone(&self.shared),
                notifier: Arc::clone(&self.notifier),
            }
        };
        self.notifier.deliver();
        Some(handle)
    }

    async fn run_job(
        &self,
        handle: &JobHandle,
        action: ExportAction,
        settings: &ExportSettings,
    ) -> ExportResult<PostProcessOutput> {
        let output_path = match action {
            ExportAction::Upload => {
                self.check_can_share(handle).await?;
                None
            }
            ExportAction::Save => {
                let path = self.choose_save_path(settings).await?;
                handle.with_job(|state| {
                    if let Some(job) = state.job.as_mut() {
                        job.output_path = Some(path.clone());
                    }
                    Ok(())
                })?;
                Some(path)
            }
            ExportAction::Copy => None,
        };

        handle.ensure_live()?;
        let render_settings = RenderSettings::from(settings);
        let rendered = tokio::select! {
            biased;
            _ = handle.token.cancelled() => return Err(ExportError::Cancelled),
            result = self.render.render(
                &self.project,
                &render_settings,
                handle.progress_callback(),
                handle.token.clone(),
            ) => result?,
        };
        tracing::debug!(job_id = handle.id, path = %rendered.display(), "Render complete");

        handle.emit(ExportEvent::RenderFinished)?;

        let processor = post_processor_for(action);
        let output = processor
            .run(PostProcessContext {
                project: &self.project,
                rendered: &rendered,
                settings,
                output_path: output_path.as_deref(),
                media: self.media.as_ref(),
                events: handle,
                cancel: &handle.token,
            })
            .await?;

        handle.emit(ExportEvent::Finish)?;
        Ok(output)
    }

    /// Sign-in nudge and duration-based plan gating for uploads.
    async fn check_can_share(&self, handle: &JobHandle) -> ExportResult<()> {
        if !self.media.is_signed_in().await? {
            tracing::info!("Not signed in, starting sign-in flow");
            self.ui.start_sign_in().await;
        }

        let metadata = self.media.get_video_metadata(&self.project).await?;
        let upgraded = self.media.check_upgraded_and_update().await?;
        handle.ensure_live()?;

        if !upgraded && metadata.duration >= self.config.free_share_limit_secs {
            tracing::info!(
                duration_secs = metadata.duration,
                limit_secs = self.config.free_share_limit_secs,
                "Recording too long to share on the free plan"
            );
            self.ui.show_upgrade_window().await?;
            tokio::time::sleep(self.config.upgrade_redirect_delay()).await;
            return Err(ExportError::Cancelled);
        }
        Ok(())
    }

    async fn choose_save_path(&self, settings: &ExportSettings) -> ExportResult<PathBuf> {
        let default_name = match self.media.project_meta(&self.project).await {
            Ok(meta) => meta.pretty_name,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load project meta for save name");
                self.project
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "recording".to_string())
            }
        };
        let extension = settings.format.extension();
        self.ui
            .prompt_save_path(extension, &format!("{default_name}.{extension}"))
            .await
            .ok_or(ExportError::Cancelled)
    }

    fn finish(
        &self,
        handle: &JobHandle,
        action: ExportAction,
        settings: &ExportSettings,
        result: ExportResult<PostProcessOutput>,
    ) -> ExportOutcome {
        match result {
            Ok(output) if self.release_job(handle.id).is_some() => {
                self.ui.toast(success_toast(&output, settings));
                ExportOutcome::Done
            }
            Ok(_) => {
                tracing::info!(job_id = handle.id, ?action, "Export cancelled after finishing");
                ExportOutcome::Cancelled
            }
            Err(e) if e.is_silent() || handle.token.is_cancelled() => {
                tracing::info!(job_id = handle.id, ?action, "Export stopped without error");
                let job = self.release_job(handle.id);
                self.reset_if_current(handle.id, job.is_some());
                ExportOutcome::Cancelled
            }
            Err(e) => {
                let message = user_message(&e, action);
                tracing::error!(job_id = handle.id, ?action, error = %e, "Export failed");
                let job = self.release_job(handle.id);
                self.reset_if_current(handle.id, job.is_some());
                self.ui.message_dialog(&message);
                ExportOutcome::Failed(message)
            }
        }
    }

    /// Detach the job if it is still the active one.
    fn release_job(&self, job_id: u64) -> Option<ActiveJob> {
        let mut state = lock(&self.shared);
        match &state.job {
            Some(job) if job.id == job_id => state.job.take(),
            _ => None,
        }
    }

    fn reset_if_current(&self, job_id: u64, was_current: bool) {
        if !was_current {
            tracing::debug!(job_id, "Job no longer active, leaving state alone");
            return;
        }
        if let Err(e) = lock(&self.shared).machine.transition(ExportEvent::Reset) {
            tracing::warn!(error = %e, "Failed to reset export state");
        }
        self.notifier.deliver();
    }
}

/// Toast for a completed job.
pub fn success_toast(output: &PostProcessOutput, settings: &ExportSettings) -> Toast {
    let media = MediaKind::from(settings.format);
    match output {
        PostProcessOutput::Saved(_) => Toast::ExportedToFile { media },
        PostProcessOutput::Copied => Toast::CopiedToClipboard { media },
        PostProcessOutput::Uploaded { link } => Toast::LinkCreated { link: link.clone() },
    }
}

/// Message for the failure dialog: the error text, or a per-action fallback.
pub fn user_message(error: &ExportError, action: ExportAction) -> String {
    let message = error.to_string();
    if !message.trim().is_empty() {
        return message;
    }
    match action {
        ExportAction::Save => "Failed to export recording".to_string(),
        ExportAction::Copy => "Failed to copy recording to clipboard".to_string(),
        ExportAction::Upload => "Failed to upload recording".to_string(),
    }
}
