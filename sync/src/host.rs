//! Hooks into the hosting environment (editor buffers, filesystem view)

use tracing::debug;

use crate::error::Result;

/// Operations the engine asks of its host before resolving mappings.
pub trait HostBridge: Send + Sync {
    /// Flush every pending editor modification to disk
    fn save_all_open_documents(&self) -> Result<()>;

    /// Make freshly generated build output visible to subsequent directory listings
    fn refresh_filesystem_view(&self) -> Result<()>;
}

/// Host with no editor and a filesystem that is always current
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHost;

impl HostBridge for NoopHost {
    fn save_all_open_documents(&self) -> Result<()> {
        debug!("No open documents to save");
        Ok(())
    }

    fn refresh_filesystem_view(&self) -> Result<()> {
        debug!("Filesystem view needs no refresh");
        Ok(())
    }
}
