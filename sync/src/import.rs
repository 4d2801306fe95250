//! Build-tool property import: upserts one mapping per module into a dedicated group

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{ConfigStore, SyncConfig, SynchroMapping, TargetMappingGroup};
use crate::error::Result;
use crate::resolver::canonical;

pub const SKIP_PROPERTY: &str = "remoteSynchronizer.skip";
pub const SOURCE_PROPERTY: &str = "remoteSynchronizer.source";
pub const TARGET_PROPERTY: &str = "remoteSynchronizer.destination";

/// Name of the group holding imported mappings
pub const IMPORTED_GROUP_NAME: &str = "Maven";

/// A build module as seen by the importer
#[derive(Debug, Clone, Default)]
pub struct BuildModule {
    pub name: String,
    /// Where the build writes compiled output; the default mapping source
    pub output_directory: PathBuf,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `remoteSynchronizer.skip` is `true`; wins over a defined destination
    SkipProperty,
    NoDestination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDecision {
    Configure(SynchroMapping),
    Skip(SkipReason),
}

impl BuildModule {
    pub fn new(name: impl Into<String>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            output_directory: output_directory.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Decide what this module contributes
    pub fn decision(&self) -> ImportDecision {
        let skip = self
            .properties
            .get(SKIP_PROPERTY)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if skip {
            return ImportDecision::Skip(SkipReason::SkipProperty);
        }

        let Some(target) = self.properties.get(TARGET_PROPERTY) else {
            return ImportDecision::Skip(SkipReason::NoDestination);
        };

        let source = self
            .properties
            .get(SOURCE_PROPERTY)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.output_directory.clone());

        ImportDecision::Configure(SynchroMapping::new(source, target))
    }
}

/// Key used to detect that two mappings share a source
pub fn canonical_key(path: &Path) -> PathBuf {
    canonical(path)
}

/// Replace any mapping with the same canonical source, then append `mapping`
pub fn upsert(group: &TargetMappingGroup, mapping: SynchroMapping) -> TargetMappingGroup {
    let key = canonical_key(&mapping.source_path);
    let mut mappings: Vec<SynchroMapping> = group
        .mappings
        .iter()
        .filter(|m| canonical_key(&m.source_path) != key)
        .cloned()
        .collect();
    mappings.push(mapping);

    TargetMappingGroup {
        mappings,
        ..group.clone()
    }
}

/// Apply `mapping` to the imported group of `config`, creating the group if needed
pub fn apply_mapping(config: &mut SyncConfig, mapping: SynchroMapping) {
    match config
        .target_mappings
        .iter_mut()
        .find(|g| g.name == IMPORTED_GROUP_NAME)
    {
        Some(group) => *group = upsert(group, mapping),
        None => {
            let mut group = TargetMappingGroup::new(IMPORTED_GROUP_NAME);
            group.execute_on_compile = true;
            config.target_mappings.push(upsert(&group, mapping));
        }
    }
}

/// Import one module into the store, publishing the change when it configures a mapping
pub fn import_module(store: &ConfigStore, module: &BuildModule) -> Result<ImportDecision> {
    let decision = module.decision();
    match &decision {
        ImportDecision::Configure(mapping) => {
            let mapping = mapping.clone();
            info!(
                module = %module.name,
                source = %mapping.source_path.display(),
                target = %mapping.target_path.display(),
                "Configured synchronization from build properties"
            );
            store.update(move |config| apply_mapping(config, mapping))?;
        }
        ImportDecision::Skip(reason) => {
            let cause = match reason {
                SkipReason::SkipProperty => format!("{} set to true", SKIP_PROPERTY),
                SkipReason::NoDestination => format!("no {} property defined", TARGET_PROPERTY),
            };
            warn!(module = %module.name, "Build property import disabled: {}", cause);
        }
    }
    Ok(decision)
}
