//! Retires every edge touching a tombstoned node.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::graph::{
    DirectedEdgeMeta, EdgeDirection, EdgeMetaRepair, EdgeMetadataStore, EdgeStore, GraphId,
    NodeMarkStore,
};
use crate::model::ApplicationScope;

/// Consumes "node marked for delete" events.
///
/// The recorded mark, not the event, is authoritative: an event for an
/// unmarked node is a no-op. Deletion walks the metadata index to find every
/// edge type the node participates in from either side, removes edge rows in
/// bounded batches from both permanent storage and the commit log, repairs
/// the metadata of every (node, type) coordinate it touched, and removes the
/// mark last. Redelivery after completion finds no mark and removes nothing.
pub struct NodeDeleteListener {
    log: Arc<dyn EdgeStore>,
    storage: Arc<dyn EdgeStore>,
    metadata: Arc<dyn EdgeMetadataStore>,
    marks: Arc<dyn NodeMarkStore>,
    repair: EdgeMetaRepair,
    config: Config,
}

impl NodeDeleteListener {
    pub fn new(
        log: Arc<dyn EdgeStore>,
        storage: Arc<dyn EdgeStore>,
        metadata: Arc<dyn EdgeMetadataStore>,
        marks: Arc<dyn NodeMarkStore>,
        config: Config,
    ) -> Self {
        let repair = EdgeMetaRepair::new(
            Arc::clone(&storage),
            Arc::clone(&metadata),
            config.clone(),
        );
        Self {
            log,
            storage,
            metadata,
            marks,
            repair,
            config,
        }
    }

    /// Handles one node-delete event. Returns the number of distinct edge
    /// versions removed.
    pub fn receive(&self, scope: &ApplicationScope, node: &GraphId) -> Result<usize> {
        let Some(version) = self.marks.max_mark(scope, node)? else {
            debug!(node = %node.uuid, "no mark recorded, nothing to delete");
            return Ok(0);
        };

        let mut touched: HashSet<DirectedEdgeMeta> = HashSet::new();
        let mut removed = 0;

        for edge_type in self.metadata.edge_types_from_source(scope, node)? {
            removed += self.drain(scope, node, &edge_type, EdgeDirection::FromSource, version, &mut touched)?;
        }
        for edge_type in self.metadata.edge_types_to_target(scope, node)? {
            removed += self.drain(scope, node, &edge_type, EdgeDirection::ToTarget, version, &mut touched)?;
        }

        for meta in &touched {
            match meta.direction {
                EdgeDirection::FromSource => {
                    self.repair
                        .repair_sources(scope, &meta.node, &meta.edge_type, version)?;
                }
                EdgeDirection::ToTarget => {
                    self.repair
                        .repair_targets(scope, &meta.node, &meta.edge_type, version)?;
                }
            }
        }

        // the mark goes last: a crash above leaves the event re-drivable
        self.marks.remove_mark(scope, node)?;
        info!(node = %node.uuid, removed, "node delete applied");
        Ok(removed)
    }

    /// Deletes one (node, type, direction) family of edges in batches,
    /// recording every metadata coordinate the deletions invalidated.
    fn drain(
        &self,
        scope: &ApplicationScope,
        node: &GraphId,
        edge_type: &str,
        direction: EdgeDirection,
        version: i64,
        touched: &mut HashSet<DirectedEdgeMeta>,
    ) -> Result<usize> {
        let mut removed = 0;
        // an edge staged in the commit log may not have been compacted yet;
        // a redelivered write must not resurrect an edge of a deleted node,
        // so both stores are enumerated
        for store in [&self.storage, &self.log] {
            loop {
                let batch = match direction {
                    EdgeDirection::FromSource => store.edges_from_source(
                        scope,
                        node,
                        edge_type,
                        version,
                        self.config.scan_page_size,
                    )?,
                    EdgeDirection::ToTarget => store.edges_to_target(
                        scope,
                        node,
                        edge_type,
                        version,
                        self.config.scan_page_size,
                    )?,
                };
                if batch.is_empty() {
                    break;
                }

                for edge in &batch {
                    self.storage.delete_edge(scope, edge)?;
                    self.log.delete_edge(scope, edge)?;
                    removed += 1;

                    touched.insert(DirectedEdgeMeta {
                        node: edge.source.clone(),
                        edge_type: edge.edge_type.clone(),
                        direction: EdgeDirection::FromSource,
                    });
                    touched.insert(DirectedEdgeMeta {
                        node: edge.target.clone(),
                        edge_type: edge.edge_type.clone(),
                        direction: EdgeDirection::ToTarget,
                    });
                }
            }
        }
        Ok(removed)
    }
}
