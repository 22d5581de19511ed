//! Commit-log to permanent-storage compaction for edge writes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::graph::{EdgeMetadataStore, EdgeStore, MarkedEdge};
use crate::model::ApplicationScope;

/// Moves staged edge versions into permanent storage.
///
/// The hard ordering rule: a commit-log entry is deleted only after its
/// permanent-storage write has returned successfully. A storage failure
/// surfaces as [`StoreError::DeleteRace`] with the log untouched, so
/// redelivering the event is always safe.
pub struct EdgeWriteCompactor {
    log: Arc<dyn EdgeStore>,
    storage: Arc<dyn EdgeStore>,
    metadata: Arc<dyn EdgeMetadataStore>,
    config: Config,
}

impl EdgeWriteCompactor {
    pub fn new(
        log: Arc<dyn EdgeStore>,
        storage: Arc<dyn EdgeStore>,
        metadata: Arc<dyn EdgeMetadataStore>,
        config: Config,
    ) -> Self {
        Self {
            log,
            storage,
            metadata,
            config,
        }
    }

    /// Handles one edge-written event. Every staged version of the event's
    /// (source, type, target) triple at or below the event version moves to
    /// storage, newest first; versions written after the event stay staged
    /// for their own events. Returns the number of versions moved.
    pub fn compact(&self, scope: &ApplicationScope, event: &MarkedEdge) -> Result<usize> {
        let mut moved = 0;

        loop {
            let staged = self.log.edge_versions(
                scope,
                &event.source,
                &event.edge_type,
                &event.target,
                event.version,
                self.config.scan_page_size,
            )?;
            if staged.is_empty() {
                break;
            }
            let last_page = staged.len() < self.config.scan_page_size;

            for edge in &staged {
                self.storage.write_edge(scope, edge).map_err(|e| {
                    warn!(version = edge.version, error = %e, "storage write failed, leaving commit log intact");
                    StoreError::DeleteRace(format!(
                        "storage write for edge version {} failed: {e}",
                        edge.version
                    ))
                })?;
                self.metadata.write_meta(scope, edge)?;
                // the write confirmation above gates this delete
                self.log.delete_edge(scope, edge)?;
                moved += 1;
            }

            if last_page {
                break;
            }
        }

        debug!(
            edge_type = %event.edge_type,
            version = event.version,
            moved,
            "edge write compacted"
        );
        Ok(moved)
    }
}
