//! Export job state machine.
//!
//! Exactly one export job can be visible at a time. The machine validates
//! every transition and notifies observers in the order transitions are
//! applied, outside of whatever lock guards the machine.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// What the user asked the export to produce. Fixed for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportAction {
    /// Render and write to a user-chosen path.
    Save,
    /// Render and place the video on the clipboard.
    Copy,
    /// Render and upload to a shareable link.
    Upload,
}

/// State of the currently visible export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExportState {
    Idle,
    Starting {
        action: ExportAction,
    },
    #[serde(rename_all = "camelCase")]
    Rendering {
        action: ExportAction,
        rendered_count: u32,
        total_frames: u32,
    },
    /// Copying, saving, or preparing the upload.
    PostProcessing {
        action: ExportAction,
    },
    /// Upload in flight; only reachable for [`ExportAction::Upload`].
    Uploading {
        progress: u8,
    },
    Done {
        action: ExportAction,
    },
}

impl ExportState {
    pub fn action(&self) -> Option<ExportAction> {
        match *self {
            Self::Idle => None,
            Self::Starting { action }
            | Self::Rendering { action, .. }
            | Self::PostProcessing { action }
            | Self::Done { action } => Some(action),
            Self::Uploading { .. } => Some(ExportAction::Upload),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// A job is running and may still be cancelled.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Done { .. })
    }
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportEvent {
    Start(ExportAction),
    Progress { rendered_count: u32, total_frames: u32 },
    RenderFinished,
    UploadStarted,
    UploadProgress(u8),
    Finish,
    Reset,
}

/// Rejected transition; the machine keeps its previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid export transition from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: ExportState,
    pub event: ExportEvent,
}

/// Receives every applied transition, in order.
pub trait StateObserver: Send + Sync {
    fn on_state(&self, state: &ExportState);
}

impl<F> StateObserver for F
where
    F: Fn(&ExportState) + Send + Sync,
{
    fn on_state(&self, state: &ExportState) {
        self(state)
    }
}

/// Ordered delivery of applied transitions to observers.
///
/// Transitions are queued while the machine is mutably borrowed, usually
/// under its owner's lock, and handed to observers by [`deliver`] once that
/// lock is released. An observer may call back into the owner; states it
/// causes are appended to the drain already in progress.
///
/// [`deliver`]: StateNotifier::deliver
#[derive(Default)]
pub struct StateNotifier {
    queue: Mutex<NotifyQueue>,
}

#[derive(Default)]
struct NotifyQueue {
    observers: Vec<Arc<dyn StateObserver>>,
    pending: VecDeque<ExportState>,
    draining: bool,
}

impl StateNotifier {
    fn queue(&self) -> MutexGuard<'_, NotifyQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn observe(&self, observer: Arc<dyn StateObserver>) {
        self.queue().observers.push(observer);
    }

    fn enqueue(&self, state: ExportState) {
        let mut queue = self.queue();
        if !queue.observers.is_empty() {
            queue.pending.push_back(state);
        }
    }

    /// Deliver queued states in order. Returns immediately if another call
    /// is already draining; that call picks up everything queued.
    pub fn deliver(&self) {
        {
            let mut queue = self.queue();
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        let _guard = DrainGuard(self);

        loop {
            let (state, observers) = {
                let mut queue = self.queue();
                match queue.pending.pop_front() {
                    Some(state) => (state, queue.observers.clone()),
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            for observer in &observers {
                observer.on_state(&state);
            }
        }
    }
}

/// Releases the drain if an observer panics.
struct DrainGuard<'a>(&'a StateNotifier);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.queue().draining = false;
        }
    }
}

impl fmt::Debug for StateNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue();
        f.debug_struct("StateNotifier")
            .field("observers", &queue.observers.len())
            .field("pending", &queue.pending.len())
            .finish()
    }
}

/// Validating state machine with watch and observer notification.
pub struct ExportStateMachine {
    state: ExportState,
    watch: watch::Sender<ExportState>,
    notifier: Arc<StateNotifier>,
}

impl ExportStateMachine {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(ExportState::Idle);
        Self {
            state: ExportState::Idle,
            watch,
            notifier: Arc::new(StateNotifier::default()),
        }
    }

    pub fn current(&self) -> ExportState {
        self.state
    }

    /// Latest-state subscription; intermediate states may be coalesced.
    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.watch.subscribe()
    }

    /// Register an observer that sees every transition.
    pub fn observe(&self, observer: Arc<dyn StateObserver>) {
        self.notifier.observe(observer);
    }

    /// Shared handle for delivering queued transitions outside a lock.
    pub fn notifier(&self) -> Arc<StateNotifier> {
        Arc::clone(&self.notifier)
    }

    /// Deliver queued transitions now.
    pub fn notify(&self) {
        self.notifier.deliver();
    }

    /// Apply `event`, returning the new state. Observers see it on the
    /// next [`notify`](Self::notify) or [`StateNotifier::deliver`].
    pub fn transition(&mut self, event: ExportEvent) -> Result<ExportState, TransitionError> {
        let next = next_state(self.state, event)?;
        self.state = next;
        self.watch.send_replace(next);
        self.notifier.enqueue(next);
        Ok(next)
    }
}

impl Default for ExportStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExportStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportStateMachine")
            .field("state", &self.state)
            .field("notifier", &self.notifier)
            .finish()
    }
}

fn next_state(from: ExportState, event: ExportEvent) -> Result<ExportState, TransitionError> {
    use ExportEvent as E;
    use ExportState as S;

    let next = match (from, event) {
        (_, E::Reset) => S::Idle,
        (S::Idle, E::Start(action)) => S::Starting { action },
        (
            S::Starting { action } | S::Rendering { action, .. },
            E::Progress {
                rendered_count,
                total_frames,
            },
        ) => S::Rendering {
            action,
            rendered_count: rendered_count.min(total_frames),
            total_frames,
        },
        (S::Starting { action } | S::Rendering { action, .. }, E::RenderFinished) => {
            S::PostProcessing { action }
        }
        (
            S::PostProcessing {
                action: ExportAction::Upload,
            },
            E::UploadStarted,
        ) => S::Uploading { progress: 0 },
        (S::Uploading { .. }, E::UploadProgress(progress)) => S::Uploading {
            progress: progress.min(100),
        },
        (S::PostProcessing { action }, E::Finish) => S::Done { action },
        (S::Uploading { .. }, E::Finish) => S::Done {
            action: ExportAction::Upload,
        },
        (from, event) => return Err(TransitionError { from, event }),
    };
    Ok(next)
}
