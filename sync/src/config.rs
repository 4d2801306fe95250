//! Mapping configuration and the versioned snapshot store the engine reads from

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Result, SyncError};

/// Process-wide options, mutated only through [`ConfigStore::apply`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralOptions {
    /// Permit a new run while another one is still active
    #[serde(default)]
    pub allow_concurrent_runs: bool,
    /// Flush pending editor modifications before resolving mappings
    #[serde(default = "default_save_before_copy")]
    pub save_before_copy: bool,
    /// Give copied files the modification time of their source
    #[serde(default = "default_preserve_timestamps")]
    pub preserve_timestamps: bool,
    /// Skip files whose target already has the same size and a newer or equal mtime
    #[serde(default)]
    pub skip_unchanged: bool,
}

/// One source to target correspondence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchroMapping {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// Named collection of mappings, toggled as a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetMappingGroup {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub execute_on_compile: bool,
    #[serde(default)]
    pub mappings: Vec<SynchroMapping>,
}

/// Complete persisted configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub general: GeneralOptions,
    /// Roots under which files are treated as compiled-language sources
    #[serde(default)]
    pub source_roots: Vec<PathBuf>,
    /// Extensions recognised as compiled-language sources
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
    #[serde(default)]
    pub target_mappings: Vec<TargetMappingGroup>,
}

impl SynchroMapping {
    pub fn new(source_path: impl Into<PathBuf>, target_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: target_path.into(),
            active: true,
        }
    }
}

impl TargetMappingGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            execute_on_compile: false,
            mappings: Vec::new(),
        }
    }

    pub fn with_mapping(mut self, mapping: SynchroMapping) -> Self {
        self.mappings.push(mapping);
        self
    }
}

impl Default for GeneralOptions {
    fn default() -> Self {
        Self {
            allow_concurrent_runs: false,
            save_before_copy: default_save_before_copy(),
            preserve_timestamps: default_preserve_timestamps(),
            skip_unchanged: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            general: GeneralOptions::default(),
            source_roots: Vec::new(),
            source_extensions: default_source_extensions(),
            target_mappings: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SyncError::path_error(path, format!("Failed to read configuration: {}", e))
        })?;
        let config: SyncConfig = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), groups = config.target_mappings.len(), "Loaded configuration");
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for group in &self.target_mappings {
            if group.name.trim().is_empty() {
                return Err(SyncError::config_error("Mapping group name cannot be empty"));
            }
            if !names.insert(group.name.as_str()) {
                return Err(SyncError::config_error(format!(
                    "Duplicate mapping group name: {}",
                    group.name
                )));
            }
            for mapping in &group.mappings {
                if mapping.source_path.as_os_str().is_empty() || mapping.target_path.as_os_str().is_empty() {
                    return Err(SyncError::config_error(format!(
                        "Mapping group '{}' contains a mapping with an empty path",
                        group.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn group(&self, name: &str) -> Option<&TargetMappingGroup> {
        self.target_mappings.iter().find(|g| g.name == name)
    }
}

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remote-sync")
        .join("config.toml")
}

/// An immutable configuration view tagged with the version it was published under
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: Arc<SyncConfig>,
}

/// Versioned configuration provider.
///
/// Runs capture a [`ConfigSnapshot`] when they are launched and never observe
/// later changes. Publishing a new configuration wakes every receiver
/// obtained through [`ConfigStore::subscribe`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    tx: Arc<watch::Sender<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(config: SyncConfig) -> Self {
        let (tx, _) = watch::channel(ConfigSnapshot {
            version: 0,
            config: Arc::new(config),
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.tx.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    pub fn subscribe(&self) -> watch::Receiver<ConfigSnapshot> {
        self.tx.subscribe()
    }

    /// Replace the whole configuration
    pub fn apply(&self, config: SyncConfig) -> Result<u64> {
        self.update(move |current| *current = config)
    }

    /// Edit a copy of the current configuration and publish it if it validates
    pub fn update<F>(&self, edit: F) -> Result<u64>
    where
        F: FnOnce(&mut SyncConfig),
    {
        let mut outcome = Ok(0);
        self.tx.send_if_modified(|snapshot| {
            let mut next = (*snapshot.config).clone();
            edit(&mut next);
            if let Err(e) = next.validate() {
                outcome = Err(e);
                return false;
            }
            snapshot.version += 1;
            snapshot.config = Arc::new(next);
            outcome = Ok(snapshot.version);
            true
        });

        if let Ok(version) = outcome {
            debug!(version, "Configuration changed");
        }
        outcome
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

// Default value functions
fn default_active() -> bool { true }
fn default_save_before_copy() -> bool { true }
fn default_preserve_timestamps() -> bool { true }

fn default_source_extensions() -> Vec<String> {
    ["java", "kt", "groovy", "scala"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}
