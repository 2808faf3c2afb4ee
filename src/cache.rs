//! Values memoised for the lifetime of one publishing run.

use std::collections::HashMap;

use tracing::debug;

use crate::error::PublishResult;
use crate::pool::DiskPool;

/// Per-run cache owned by the orchestrator and lent to each publisher.
#[derive(Debug, Default)]
pub struct RunCache {
    pool_usage: HashMap<String, u64>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes used by `archive`'s pool, measured once per run.
    pub fn pool_usage(&mut self, archive: &str, pool: &DiskPool) -> PublishResult<u64> {
        if let Some(used) = self.pool_usage.get(archive) {
            return Ok(*used);
        }
        let used = pool.size()?;
        debug!("Pool of {} uses {} bytes", archive, used);
        self.pool_usage.insert(archive.to_string(), used);
        Ok(used)
    }

    /// Account for a file added to `archive`'s pool.
    pub fn record_added(&mut self, archive: &str, bytes: u64) {
        if let Some(used) = self.pool_usage.get_mut(archive) {
            *used += bytes;
        }
    }
}
