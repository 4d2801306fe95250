//! Recognises compiled-language source files under the configured source roots

use std::path::{Path, PathBuf};

use crate::config::SyncConfig;
use crate::resolver::canonical;

/// Decides whether a changed path is a source file whose build output may
/// not be visible yet without a filesystem refresh.
#[derive(Debug, Clone, Default)]
pub struct PathClassifier {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
}

impl PathClassifier {
    pub fn new(roots: Vec<PathBuf>, extensions: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        let roots = roots.iter().map(|root| canonical(root)).collect();
        Self { roots, extensions }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.source_roots.clone(), config.source_extensions.clone())
    }

    /// True if `path` lies under a configured root and carries a source extension
    pub fn is_source_file(&self, path: &Path) -> bool {
        let has_source_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|known| known.eq_ignore_ascii_case(e)))
            .unwrap_or(false);

        if !has_source_extension {
            return false;
        }
        let path = canonical(path);
        self.roots.iter().any(|root| path.starts_with(root))
    }

    pub fn any_source_file<'a, I>(&self, paths: I) -> bool
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        paths.into_iter().any(|p| self.is_source_file(p))
    }
}
