//! Executes a single copy task

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::GeneralOptions;
use crate::error::SyncError;
use crate::resolver::CopyTask;

/// Options for copy operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Give the target the source modification time
    pub preserve_timestamps: bool,
    /// Leave the target alone when it already matches the source
    pub skip_unchanged: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            preserve_timestamps: true,
            skip_unchanged: false,
        }
    }
}

impl From<&GeneralOptions> for CopyOptions {
    fn from(options: &GeneralOptions) -> Self {
        Self {
            preserve_timestamps: options.preserve_timestamps,
            skip_unchanged: options.skip_unchanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStatus {
    Copied,
    /// Target already had the same size and a newer or equal mtime
    UpToDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub task: CopyTask,
    pub bytes_copied: u64,
    pub status: CopyStatus,
}

/// Per-task failure; recorded against the task, never fatal to the run
#[derive(Debug, thiserror::Error)]
#[error("{cause}")]
pub struct CopyError {
    pub task: CopyTask,
    #[source]
    pub cause: SyncError,
}

/// Copies one file.
///
/// Bytes are written to a hidden sibling of the target and renamed into
/// place, so an observer sees either the previous target or the complete
/// new one.
#[derive(Debug, Clone, Default)]
pub struct CopyWorker {
    options: CopyOptions,
}

impl CopyWorker {
    pub fn new(options: CopyOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    pub async fn copy(&self, task: &CopyTask) -> Result<CopyOutcome, CopyError> {
        let source = task.source_file.as_path();
        let target = task.target_file.as_path();

        let source_meta = fs::metadata(source)
            .await
            .map_err(|e| self.fail(task, format!("Failed to read source: {}", e)))?;
        if !source_meta.is_file() {
            return Err(self.fail(task, "Source is not a regular file"));
        }

        if self.options.skip_unchanged && is_up_to_date(&source_meta, target).await {
            debug!(target = %target.display(), "Target up to date");
            return Ok(CopyOutcome {
                task: task.clone(),
                bytes_copied: 0,
                status: CopyStatus::UpToDate,
            });
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.fail(task, format!("Failed to create parent directory: {}", e)))?;
        }

        let partial = partial_path(target);
        let bytes_copied = match fs::copy(source, &partial).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&partial).await;
                return Err(self.fail(task, format!("Failed to copy file: {}", e)));
            }
        };

        if self.options.preserve_timestamps {
            let mtime = FileTime::from_last_modification_time(&source_meta);
            if let Err(e) = filetime::set_file_mtime(&partial, mtime) {
                warn!("Failed to preserve modification time for '{}': {}", target.display(), e);
            }
        }

        if let Err(e) = fs::rename(&partial, target).await {
            discard(&partial).await;
            return Err(self.fail(task, format!("Failed to move file into place: {}", e)));
        }

        Ok(CopyOutcome {
            task: task.clone(),
            bytes_copied,
            status: CopyStatus::Copied,
        })
    }

    fn fail(&self, task: &CopyTask, message: impl Into<String>) -> CopyError {
        CopyError {
            task: task.clone(),
            cause: SyncError::copy_error(&task.source_file, &task.target_file, message),
        }
    }
}

async fn is_up_to_date(source_meta: &Metadata, target: &Path) -> bool {
    let Ok(target_meta) = fs::metadata(target).await else {
        return false;
    };
    target_meta.is_file()
        && target_meta.len() == source_meta.len()
        && FileTime::from_last_modification_time(&target_meta)
            >= FileTime::from_last_modification_time(source_meta)
}

/// Unique per call, so concurrent runs writing the same target never share one
fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let token = Uuid::new_v4().simple().to_string();
    target.with_file_name(format!(".{}.{}.sync-part", name, &token[..8]))
}

async fn discard(partial: &Path) {
    if fs::remove_file(partial).await.is_ok() {
        debug!(path = %partial.display(), "Removed partial copy");
    }
}
