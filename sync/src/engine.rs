//! Engine entry point wiring configuration, host hooks, runs and consoles together

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ConfigStore;
use crate::console::ConsoleSink;
use crate::error::Result;
use crate::events::EventChannel;
use crate::host::HostBridge;
use crate::manager::{LaunchOutcome, RunHandle, RunInfo, RunManager};
use crate::run::{RunId, Trigger};

/// One engine per host project, constructed explicitly and passed around.
#[derive(Clone)]
pub struct Engine {
    config: ConfigStore,
    manager: RunManager,
}

impl Engine {
    /// Create an engine and the channel its runs report to
    pub fn new(config: ConfigStore, host: Arc<dyn HostBridge>) -> (Self, EventChannel) {
        let (reporter, channel) = EventChannel::new();
        let manager = RunManager::new(config.clone(), host, reporter);
        (Self { config, manager }, channel)
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn manager(&self) -> &RunManager {
        &self.manager
    }

    /// Synchronize `files`; an empty set synchronizes every mapping in full
    pub fn launch(&self, files: Vec<PathBuf>, trigger: Trigger) -> LaunchOutcome {
        self.manager.launch(files, trigger)
    }

    pub fn has_running_synchro(&self) -> bool {
        self.manager.has_running_synchro()
    }

    pub fn can_launch(&self) -> bool {
        self.manager.can_launch()
    }

    pub fn interrupt(&self, id: RunId) -> Result<()> {
        self.manager.interrupt(id)
    }

    pub fn stop(&self, id: RunId) -> Result<()> {
        self.manager.stop(id)
    }

    pub fn rerun_last(&self) -> Option<LaunchOutcome> {
        self.manager.rerun_last()
    }

    pub fn clear_console(&self, id: RunId) -> Result<()> {
        self.manager.clear_console(id)
    }

    pub fn remove_console(&self, id: RunId) -> Result<()> {
        self.manager.remove_console(id)
    }

    pub fn console(&self, id: RunId) -> Option<Arc<ConsoleSink>> {
        self.manager.console(id)
    }

    pub fn consoles(&self) -> Vec<Arc<ConsoleSink>> {
        self.manager.consoles()
    }

    pub fn run(&self, id: RunId) -> Option<RunHandle> {
        self.manager.handle(id)
    }

    pub fn runs(&self) -> Vec<RunInfo> {
        self.manager.runs()
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await
    }
}
