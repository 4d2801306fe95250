//! One synchronization run: resolve, copy in order, report, honour stop requests

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::console::{ConsoleSink, LineKind};
use crate::events::{EventReporter, RunEvent};
use crate::resolver::{CopyTask, MappingResolver};
use crate::worker::{CopyError, CopyOutcome, CopyStatus, CopyWorker};

/// Identifier of a run, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is what the console tabs show
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    Manual,
    CompileFinished,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Manual => write!(f, "manual"),
            Trigger::CompileFinished => write!(f, "compile"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    /// Stop requested; the in-flight task is finishing
    Interrupting,
    Stopped,
    Failed,
    Completed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Stopped | RunStatus::Failed | RunStatus::Completed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Interrupting => "interrupting",
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
        };
        write!(f, "{}", text)
    }
}

/// Who asked a run to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopKind {
    Interrupt,
    Stop,
    Shutdown,
}

impl fmt::Display for StopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopKind::Interrupt => write!(f, "Interrupt"),
            StopKind::Stop => write!(f, "Stop"),
            StopKind::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Task counters of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub copied: usize,
    pub failed: usize,
    /// Tasks not copied: target already up to date, or never attempted after a stop
    pub skipped: usize,
    pub bytes_copied: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} copied, {} failed, {} skipped ({} bytes)",
            self.copied, self.failed, self.skipped, self.bytes_copied
        )
    }
}

/// State shared between a run, the run manager and run handles
#[derive(Debug)]
pub(crate) struct RunShared {
    pub(crate) id: RunId,
    pub(crate) trigger: Trigger,
    pub(crate) files: Vec<PathBuf>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) sink: Arc<ConsoleSink>,
    status: watch::Sender<RunStatus>,
    cancel: CancellationToken,
    stop_kind: OnceLock<StopKind>,
    /// Set once the run has processed its last task; later stop requests are ignored
    closing: AtomicBool,
    tasks: OnceLock<Arc<[CopyTask]>>,
    summary: Mutex<RunSummary>,
}

impl RunShared {
    pub(crate) fn new(id: RunId, trigger: Trigger, files: Vec<PathBuf>, sink: Arc<ConsoleSink>) -> Self {
        let (status, _) = watch::channel(RunStatus::Pending);
        Self {
            id,
            trigger,
            files,
            created_at: Utc::now(),
            sink,
            status,
            cancel: CancellationToken::new(),
            stop_kind: OnceLock::new(),
            closing: AtomicBool::new(false),
            tasks: OnceLock::new(),
            summary: Mutex::new(RunSummary::default()),
        }
    }

    pub(crate) fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    pub(crate) fn summary(&self) -> RunSummary {
        *self.summary.lock()
    }

    pub(crate) fn tasks(&self) -> Option<Arc<[CopyTask]>> {
        self.tasks.get().cloned()
    }

    /// Move a non-terminal run to `Interrupting`. Returns false if the run had already finished.
    pub(crate) fn request_stop(&self, kind: StopKind) -> bool {
        let requested = self.status.send_if_modified(|status| match status {
            RunStatus::Pending | RunStatus::Running if !self.closing.load(Ordering::Acquire) => {
                let _ = self.stop_kind.set(kind);
                *status = RunStatus::Interrupting;
                true
            }
            _ => false,
        });
        if requested {
            self.cancel.cancel();
        }
        requested
    }

    /// `Pending -> Running`; fails if a stop arrived first
    fn start_running(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == RunStatus::Pending {
                *status = RunStatus::Running;
                true
            } else {
                false
            }
        })
    }

    fn finish(&self, status: RunStatus) {
        self.status.send_replace(status);
    }

    /// Refuse further stop requests; true if one was accepted before
    fn close(&self) -> bool {
        let mut stopped = false;
        self.status.send_if_modified(|status| {
            self.closing.store(true, Ordering::Release);
            stopped = *status == RunStatus::Interrupting;
            false
        });
        stopped
    }

    fn stop_kind(&self) -> StopKind {
        self.stop_kind.get().copied().unwrap_or(StopKind::Stop)
    }
}

/// Drives one run from `Pending` to a terminal state.
///
/// The configuration snapshot is captured at launch, and tasks are resolved
/// once while the run is still `Pending`; the list never changes afterwards.
/// Tasks execute sequentially so console output follows resolution order.
/// Cancellation is checked before each task, never during a copy.
pub struct SynchronizationRun {
    shared: Arc<RunShared>,
    config: Arc<SyncConfig>,
    resolver: MappingResolver,
    worker: CopyWorker,
    events: EventReporter,
}

impl SynchronizationRun {
    pub(crate) fn new(shared: Arc<RunShared>, config: Arc<SyncConfig>, events: EventReporter) -> Self {
        let worker = CopyWorker::new((&config.general).into());
        Self {
            shared,
            config,
            resolver: MappingResolver::new(),
            worker,
            events,
        }
    }

    #[instrument(skip(self), fields(run_id = %self.shared.id, trigger = %self.shared.trigger))]
    pub async fn execute(self) -> RunStatus {
        let shared = &self.shared;
        let sink = &shared.sink;

        let tasks = match self.resolve().await {
            Some(tasks) => tasks,
            None => {
                sink.append(LineKind::Summary, "Synchronization failed: mappings could not be resolved");
                return self.finish(RunStatus::Failed);
            }
        };
        let tasks = shared.tasks.get_or_init(|| tasks.into()).clone();

        if !shared.start_running() {
            shared.summary.lock().skipped = tasks.len();
            self.stop_notice(tasks.len());
            sink.append(LineKind::Summary, format!("Synchronization stopped: {}", shared.summary()));
            return self.finish(RunStatus::Stopped);
        }
        self.events.send(RunEvent::RunStarted {
            run_id: shared.id,
            trigger: shared.trigger,
            total_tasks: tasks.len(),
        });
        self.events.send(RunEvent::StatusChanged {
            run_id: shared.id,
            status: RunStatus::Running,
        });

        info!(tasks = tasks.len(), "Synchronization started");
        sink.append(LineKind::Info, format!("Synchronizing {} file(s)", tasks.len()));

        let mut remaining = 0;
        for (index, task) in tasks.iter().enumerate() {
            if shared.cancel.is_cancelled() {
                remaining = tasks.len() - index;
                break;
            }

            let result = self.worker.copy(task).await;
            self.record(task, result);
        }

        let stopped = shared.close();
        if stopped {
            shared.summary.lock().skipped += remaining;
            self.stop_notice(remaining);
        }

        let summary = shared.summary();
        let status = if stopped {
            RunStatus::Stopped
        } else if summary.failed > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let verb = match status {
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "finished with errors",
            _ => "completed",
        };
        sink.append(LineKind::Summary, format!("Synchronization {}: {}", verb, summary));
        self.finish(status)
    }

    fn record(&self, task: &CopyTask, result: Result<CopyOutcome, CopyError>) {
        let sink = &self.shared.sink;
        match result {
            Ok(outcome) if outcome.status == CopyStatus::Copied => {
                {
                    let mut summary = self.shared.summary.lock();
                    summary.copied += 1;
                    summary.bytes_copied += outcome.bytes_copied;
                }
                sink.append(
                    LineKind::Copied,
                    format!("{} -> {}", task.source_file.display(), task.target_file.display()),
                );
            }
            Ok(_) => {
                self.shared.summary.lock().skipped += 1;
                sink.append(
                    LineKind::UpToDate,
                    format!("{} (up to date)", task.target_file.display()),
                );
            }
            Err(e) => {
                self.shared.summary.lock().failed += 1;
                debug!(error = %e, "Copy task failed");
                sink.append(
                    LineKind::Failed,
                    format!("{}: {}", task.source_file.display(), e.cause),
                );
            }
        }
    }

    /// Console notice written by the run itself, the sink's only writer
    fn stop_notice(&self, remaining: usize) {
        let kind = self.shared.stop_kind();
        debug!(%kind, remaining, "Stop observed, skipping remaining tasks");
        self.shared.sink.append(
            LineKind::Info,
            format!("{} requested, skipping {} remaining task(s)", kind, remaining),
        );
    }

    /// Resolve on the blocking pool; warnings go to the console
    async fn resolve(&self) -> Option<Vec<CopyTask>> {
        let config = Arc::clone(&self.config);
        let resolver = self.resolver.clone();
        let files = self.shared.files.clone();
        let trigger = self.shared.trigger;

        let joined = tokio::task::spawn_blocking(move || {
            let groups = MappingResolver::groups_for(&config, trigger);
            resolver.resolve(&files, groups)
        })
        .await;

        match joined {
            Ok(resolution) => {
                for warning in &resolution.warnings {
                    self.shared.sink.append(LineKind::Warning, warning.to_string());
                }
                Some(resolution.tasks)
            }
            Err(e) => {
                error!(error = %e, "Mapping resolution panicked");
                None
            }
        }
    }

    fn finish(&self, status: RunStatus) -> RunStatus {
        let summary = self.shared.summary();
        self.shared.finish(status);
        info!(status = %status, %summary, "Synchronization finished");
        self.events.send(RunEvent::StatusChanged {
            run_id: self.shared.id,
            status,
        });
        self.events.send(RunEvent::RunFinished {
            run_id: self.shared.id,
            status,
            summary,
        });
        status
    }
}
