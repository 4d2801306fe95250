//! Remote Sync Library
//!
//! Mirrors files produced in a project onto configured target locations:
//! - Named groups of source to target mappings, versioned in a config store
//! - Resolution of changed paths into per-file copy tasks
//! - Atomic per-file copies with timestamp preservation
//! - Concurrent runs with admission control and cooperative cancellation
//! - One console per run, streamed to a single event consumer
//! - Mapping import from build module properties

pub mod classifier;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod import;
pub mod manager;
pub mod resolver;
pub mod run;
pub mod worker;

// Re-export main types and functions
pub use classifier::PathClassifier;
pub use config::{
    default_config_path, ConfigSnapshot, ConfigStore, GeneralOptions, SyncConfig, SynchroMapping,
    TargetMappingGroup,
};
pub use console::{ConsoleLine, ConsoleRegistry, ConsoleSink, LineKind};
pub use engine::Engine;
pub use error::{Result, SyncError};
pub use events::{EventChannel, EventReporter, RunEvent};
pub use host::{HostBridge, NoopHost};
pub use import::{BuildModule, ImportDecision, SkipReason};
pub use manager::{AdmissionRejected, LaunchOutcome, LaunchRequest, RunHandle, RunInfo, RunManager};
pub use resolver::{CopyTask, MappingResolver, Resolution, ResolveWarning};
pub use run::{RunId, RunStatus, RunSummary, StopKind, SynchronizationRun, Trigger};
pub use worker::{CopyError, CopyOptions, CopyOutcome, CopyStatus, CopyWorker};

/// Load a configuration file into a fresh store
pub async fn load_config_store(path: impl AsRef<std::path::Path>) -> Result<ConfigStore> {
    Ok(ConfigStore::new(SyncConfig::load(path).await?))
}

// Test modules
#[cfg(test)]
mod engine_tests;
