//! Admission control and bookkeeping of live synchronization runs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::classifier::PathClassifier;
use crate::config::ConfigStore;
use crate::console::{ConsoleRegistry, ConsoleSink, LineKind};
use crate::error::{Result, SyncError};
use crate::events::{EventReporter, RunEvent};
use crate::host::HostBridge;
use crate::resolver::CopyTask;
use crate::run::{RunId, RunShared, RunStatus, RunSummary, StopKind, SynchronizationRun, Trigger};

/// The inputs of a launch, kept so the last one can be replayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub files: Vec<PathBuf>,
    pub trigger: Trigger,
}

/// A launch refused because another run is active and concurrency is disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRejected {
    pub active_runs: usize,
}

impl fmt::Display for AdmissionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Synchronization already running ({} active)", self.active_runs)
    }
}

#[derive(Debug)]
pub enum LaunchOutcome {
    Launched(RunHandle),
    Rejected(AdmissionRejected),
}

impl LaunchOutcome {
    pub fn handle(self) -> Option<RunHandle> {
        match self {
            LaunchOutcome::Launched(handle) => Some(handle),
            LaunchOutcome::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, LaunchOutcome::Rejected(_))
    }
}

/// Caller-side view of one run
#[derive(Debug, Clone)]
pub struct RunHandle {
    shared: Arc<RunShared>,
    status: watch::Receiver<RunStatus>,
}

impl RunHandle {
    fn new(shared: Arc<RunShared>) -> Self {
        let status = shared.subscribe();
        Self { shared, status }
    }

    pub fn id(&self) -> RunId {
        self.shared.id
    }

    pub fn trigger(&self) -> Trigger {
        self.shared.trigger
    }

    pub fn status(&self) -> RunStatus {
        self.shared.status()
    }

    pub fn summary(&self) -> RunSummary {
        self.shared.summary()
    }

    /// Resolved tasks; `None` while the run is still resolving
    pub fn tasks(&self) -> Option<Arc<[CopyTask]>> {
        self.shared.tasks()
    }

    pub fn console(&self) -> Arc<ConsoleSink> {
        Arc::clone(&self.shared.sink)
    }

    /// Wait until the run reaches a terminal state
    pub async fn wait(&self) -> RunStatus {
        let mut status = self.status.clone();
        let terminal = match status.wait_for(|s| s.is_terminal()).await {
            Ok(terminal) => *terminal,
            Err(_) => self.shared.status(),
        };
        terminal
    }
}

/// Snapshot of a tracked run for listings
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub id: RunId,
    pub trigger: Trigger,
    pub status: RunStatus,
    pub summary: RunSummary,
    pub files: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub console_visible: bool,
}

struct RunEntry {
    shared: Arc<RunShared>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RunRegistry {
    runs: IndexMap<RunId, RunEntry>,
    last_request: Option<LaunchRequest>,
}

impl RunRegistry {
    fn active_count(&self) -> usize {
        self.runs
            .values()
            .filter(|entry| entry.shared.status().is_active())
            .count()
    }

    fn evict_if_finished(&mut self, id: RunId) {
        let finished = self
            .runs
            .get(&id)
            .map(|entry| entry.shared.status().is_terminal() && entry.shared.sink.is_removed())
            .unwrap_or(false);
        if finished {
            self.runs.shift_remove(&id);
            debug!(run_id = %id, "Evicted finished run");
        }
    }
}

/// Sole owner of the live run set.
///
/// Checking for active runs and registering a new one happen under a single
/// lock, so concurrent launches cannot both pass admission when concurrent
/// runs are disabled.
#[derive(Clone)]
pub struct RunManager {
    registry: Arc<Mutex<RunRegistry>>,
    consoles: Arc<ConsoleRegistry>,
    config: ConfigStore,
    host: Arc<dyn HostBridge>,
    events: EventReporter,
}

impl RunManager {
    pub fn new(config: ConfigStore, host: Arc<dyn HostBridge>, events: EventReporter) -> Self {
        Self {
            registry: Arc::new(Mutex::new(RunRegistry::default())),
            consoles: Arc::new(ConsoleRegistry::new()),
            config,
            host,
            events,
        }
    }

    /// Start a run over `files`. Must be called from within a Tokio runtime.
    #[instrument(skip(self, files), fields(file_count = files.len()))]
    pub fn launch(&self, files: Vec<PathBuf>, trigger: Trigger) -> LaunchOutcome {
        let snapshot = self.config.snapshot();
        let general = &snapshot.config.general;

        let (shared, was_idle) = {
            let mut registry = self.registry.lock();
            let active_runs = registry.active_count();
            if !general.allow_concurrent_runs && active_runs > 0 {
                info!(active_runs, "Synchronization already running, launch rejected");
                return LaunchOutcome::Rejected(AdmissionRejected { active_runs });
            }

            let id = RunId::new();
            let sink = Arc::new(ConsoleSink::new(id, self.events.clone()));
            let shared = Arc::new(RunShared::new(id, trigger, files.clone(), Arc::clone(&sink)));
            registry.runs.insert(
                id,
                RunEntry {
                    shared: Arc::clone(&shared),
                    handle: None,
                },
            );
            registry.last_request = Some(LaunchRequest { files, trigger });
            self.consoles.insert(sink);
            (shared, active_runs == 0)
        };

        let id = shared.id;
        info!(run_id = %id, config_version = snapshot.version, "Synchronization launched");
        self.events.send(RunEvent::StatusChanged {
            run_id: id,
            status: RunStatus::Pending,
        });

        if general.save_before_copy {
            if let Err(e) = self.host.save_all_open_documents() {
                warn!(run_id = %id, error = %e, "Failed to save open documents");
                shared.sink.append(LineKind::Warning, format!("Could not save open documents: {}", e));
            }
        }

        if was_idle && PathClassifier::from_config(&snapshot.config).any_source_file(&shared.files) {
            debug!(run_id = %id, "Source file selected, refreshing filesystem view");
            if let Err(e) = self.host.refresh_filesystem_view() {
                warn!(run_id = %id, error = %e, "Failed to refresh filesystem view");
            }
        }

        let run = SynchronizationRun::new(Arc::clone(&shared), Arc::clone(&snapshot.config), self.events.clone());
        let registry = Arc::clone(&self.registry);
        let handle = tokio::spawn(async move {
            run.execute().await;
            registry.lock().evict_if_finished(id);
        });

        if let Some(entry) = self.registry.lock().runs.get_mut(&id) {
            entry.handle = Some(handle);
        }

        LaunchOutcome::Launched(RunHandle::new(shared))
    }

    /// Relaunch the most recent request against the current configuration
    pub fn rerun_last(&self) -> Option<LaunchOutcome> {
        let request = self.registry.lock().last_request.clone()?;
        debug!(trigger = %request.trigger, files = request.files.len(), "Rerunning last synchronization");
        Some(self.launch(request.files, request.trigger))
    }

    pub fn last_request(&self) -> Option<LaunchRequest> {
        self.registry.lock().last_request.clone()
    }

    /// True iff any tracked run is non-terminal
    pub fn has_running_synchro(&self) -> bool {
        self.active_count() > 0
    }

    pub fn active_count(&self) -> usize {
        self.registry.lock().active_count()
    }

    /// Whether a launch issued now would be admitted
    pub fn can_launch(&self) -> bool {
        self.config.snapshot().config.general.allow_concurrent_runs || !self.has_running_synchro()
    }

    pub fn interrupt(&self, id: RunId) -> Result<()> {
        self.request_stop(id, StopKind::Interrupt)
    }

    pub fn stop(&self, id: RunId) -> Result<()> {
        self.request_stop(id, StopKind::Stop)
    }

    fn request_stop(&self, id: RunId, kind: StopKind) -> Result<()> {
        let shared = self.lookup(id)?;
        if shared.request_stop(kind) {
            info!(run_id = %id, "{} requested, finishing current file", kind);
            self.events.send(RunEvent::StatusChanged {
                run_id: id,
                status: RunStatus::Interrupting,
            });
        } else {
            debug!(run_id = %id, status = %shared.status(), "{} ignored, run already finished", kind);
        }
        Ok(())
    }

    pub fn clear_console(&self, id: RunId) -> Result<()> {
        self.lookup(id)?.sink.clear();
        Ok(())
    }

    /// Hide a run's console. The run is forgotten once it is also terminal.
    pub fn remove_console(&self, id: RunId) -> Result<()> {
        self.lookup(id)?;
        if self.consoles.remove(id).is_some() {
            self.events.send(RunEvent::ConsoleRemoved { run_id: id });
        }
        self.registry.lock().evict_if_finished(id);
        Ok(())
    }

    pub fn console(&self, id: RunId) -> Option<Arc<ConsoleSink>> {
        self.consoles.get(id)
    }

    pub fn consoles(&self) -> Vec<Arc<ConsoleSink>> {
        self.consoles.visible()
    }

    pub fn handle(&self, id: RunId) -> Option<RunHandle> {
        self.registry
            .lock()
            .runs
            .get(&id)
            .map(|entry| RunHandle::new(Arc::clone(&entry.shared)))
    }

    pub fn runs(&self) -> Vec<RunInfo> {
        self.registry
            .lock()
            .runs
            .values()
            .map(|entry| {
                let shared = &entry.shared;
                RunInfo {
                    id: shared.id,
                    trigger: shared.trigger,
                    status: shared.status(),
                    summary: shared.summary(),
                    files: shared.files.clone(),
                    created_at: shared.created_at,
                    console_visible: !shared.sink.is_removed(),
                }
            })
            .collect()
    }

    /// Stop every active run and wait for all run tasks to end
    pub async fn shutdown(&self) {
        let handles: Vec<_> = {
            let mut registry = self.registry.lock();
            registry
                .runs
                .values_mut()
                .filter_map(|entry| {
                    entry.shared.request_stop(StopKind::Shutdown);
                    entry.handle.take()
                })
                .collect()
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Synchronization task ended abnormally");
            }
        }
    }

    fn lookup(&self, id: RunId) -> Result<Arc<RunShared>> {
        match self.registry.lock().runs.get(&id) {
            Some(entry) => Ok(Arc::clone(&entry.shared)),
            None => {
                error!(run_id = %id, "Operation on unknown synchronization run");
                Err(SyncError::UnknownRun(id))
            }
        }
    }
}
