//! Expands a changed-file set into concrete copy tasks using the mapping configuration

use std::fmt;
use std::path::{Component, Path, PathBuf};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{SyncConfig, SynchroMapping, TargetMappingGroup};
use crate::run::Trigger;

/// A single file delivery resolved for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyTask {
    pub source_file: PathBuf,
    pub target_file: PathBuf,
    /// Name of the mapping group that produced this task
    pub group: String,
}

/// A mapping that could not be resolved and was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveWarning {
    pub group: String,
    pub source_path: PathBuf,
    pub message: String,
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Skipping mapping '{}' of group '{}': {}",
            self.source_path.display(),
            self.group,
            self.message
        )
    }
}

/// Output of a resolution pass
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub tasks: Vec<CopyTask>,
    pub warnings: Vec<ResolveWarning>,
}

/// Computes (source file, target file) pairs for a run.
///
/// Resolution walks the filesystem, so it observes the tree as it is at call
/// time. Mapping order is preserved and overlapping mappings each produce
/// their own task.
#[derive(Debug, Clone, Default)]
pub struct MappingResolver {
    follow_links: bool,
}

impl MappingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Groups taking part in a run started by `trigger`
    pub fn groups_for(config: &SyncConfig, trigger: Trigger) -> Vec<&TargetMappingGroup> {
        config
            .target_mappings
            .iter()
            .filter(|g| g.active)
            .filter(|g| trigger != Trigger::CompileFinished || g.execute_on_compile)
            .collect()
    }

    /// Resolve `changed` against `groups`.
    ///
    /// An empty `changed` set means a full resynchronization of every active
    /// mapping. A changed path that contains a mapping's source (a content
    /// root, for instance) selects that mapping's whole tree.
    pub fn resolve<'a, I>(&self, changed: &[PathBuf], groups: I) -> Resolution
    where
        I: IntoIterator<Item = &'a TargetMappingGroup>,
    {
        let changed: Vec<PathBuf> = changed.iter().map(|p| canonical(p)).collect();
        let mut resolution = Resolution::default();

        for group in groups.into_iter().filter(|g| g.active) {
            for mapping in group.mappings.iter().filter(|m| m.active) {
                self.resolve_mapping(group, mapping, &changed, &mut resolution);
            }
        }

        debug!(
            tasks = resolution.tasks.len(),
            warnings = resolution.warnings.len(),
            "Resolved copy tasks"
        );
        resolution
    }

    fn resolve_mapping(
        &self,
        group: &TargetMappingGroup,
        mapping: &SynchroMapping,
        changed: &[PathBuf],
        resolution: &mut Resolution,
    ) {
        let source = canonical(&mapping.source_path);
        let target = normalize(&mapping.target_path);

        if let Err(e) = std::fs::metadata(&source) {
            let warning = ResolveWarning {
                group: group.name.clone(),
                source_path: source,
                message: format!("source is not readable: {}", e),
            };
            warn!("{}", warning);
            resolution.warnings.push(warning);
            return;
        }

        let roots: Vec<&Path> = if changed.is_empty() {
            vec![source.as_path()]
        } else {
            changed
                .iter()
                .filter_map(|path| {
                    if path.starts_with(&source) {
                        Some(path.as_path())
                    } else if source.starts_with(path) {
                        Some(source.as_path())
                    } else {
                        None
                    }
                })
                .collect()
        };

        // A file reached through several changed paths is delivered once per mapping
        let mut files = IndexSet::new();
        for root in roots {
            self.expand(root, group, resolution, &mut files);
        }

        for file in files {
            let target_file = match file.strip_prefix(&source) {
                Ok(rel) if rel.as_os_str().is_empty() => target.clone(),
                Ok(rel) if rel.components().all(|c| matches!(c, Component::Normal(_))) => {
                    target.join(rel)
                }
                Ok(rel) => {
                    let warning = ResolveWarning {
                        group: group.name.clone(),
                        source_path: file.clone(),
                        message: format!("relative path '{}' leaves the target", rel.display()),
                    };
                    warn!("{}", warning);
                    resolution.warnings.push(warning);
                    continue;
                }
                Err(_) => continue,
            };
            resolution.tasks.push(CopyTask {
                source_file: file,
                target_file,
                group: group.name.clone(),
            });
        }
    }

    fn expand(
        &self,
        root: &Path,
        group: &TargetMappingGroup,
        resolution: &mut Resolution,
        files: &mut IndexSet<PathBuf>,
    ) {
        if !root.exists() {
            debug!(path = %root.display(), "Changed path no longer exists, nothing to copy");
            return;
        }

        let walker = WalkDir::new(root)
            .follow_links(self.follow_links)
            .sort_by_file_name();

        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    files.insert(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => {
                    let warning = ResolveWarning {
                        group: group.name.clone(),
                        source_path: e.path().unwrap_or(root).to_path_buf(),
                        message: format!("walk error: {}", e),
                    };
                    warn!("{}", warning);
                    resolution.warnings.push(warning);
                }
            }
        }
    }
}

/// Lexical normalisation: anchors relative paths at the working directory,
/// drops `.` components and folds `..` into its parent
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let anchored = if path.is_relative() {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    };

    let mut normalized = PathBuf::new();
    for component in anchored.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Resolved form of a path used for matching: the canonical path when it
/// exists, its lexical normalisation otherwise
pub(crate) fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| normalize(path))
}
