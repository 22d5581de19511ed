//! Background dedup compaction: one surviving version per edge triple.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::graph::{EdgeMetadataStore, EdgeStore, GraphId, MarkedEdge};
use crate::model::ApplicationScope;

/// Repairs graph consistency by deleting superseded edge versions. Runs
/// over a caller-supplied node enumeration (the entity store owns the full
/// id scan); per node it walks the source-side metadata so each triple is
/// visited exactly once.
pub struct DedupCompactor {
    storage: Arc<dyn EdgeStore>,
    metadata: Arc<dyn EdgeMetadataStore>,
    config: Config,
}

impl DedupCompactor {
    pub fn new(
        storage: Arc<dyn EdgeStore>,
        metadata: Arc<dyn EdgeMetadataStore>,
        config: Config,
    ) -> Self {
        Self {
            storage,
            metadata,
            config,
        }
    }

    /// Dedups every triple sourced at any of `nodes`. Returns the number of
    /// superseded versions deleted.
    pub fn compact<'a>(
        &self,
        scope: &ApplicationScope,
        nodes: impl IntoIterator<Item = &'a GraphId>,
    ) -> Result<usize> {
        let mut removed = 0;
        for node in nodes {
            removed += self.compact_node(scope, node)?;
        }
        info!(removed, "dedup compaction pass finished");
        Ok(removed)
    }

    /// Dedups every triple with `source` as its source node.
    pub fn compact_node(&self, scope: &ApplicationScope, source: &GraphId) -> Result<usize> {
        let mut removed = 0;
        for edge_type in self.metadata.edge_types_from_source(scope, source)? {
            let mut by_triple: BTreeMap<GraphId, BTreeSet<i64>> = BTreeMap::new();
            for edge in self.enumerate(scope, source, &edge_type)? {
                by_triple
                    .entry(edge.target.clone())
                    .or_default()
                    .insert(edge.version);
            }

            for (target, versions) in by_triple {
                if versions.len() < 2 {
                    continue;
                }
                let newest = *versions.iter().next_back().unwrap();
                for version in versions {
                    if version == newest {
                        continue;
                    }
                    let stale =
                        MarkedEdge::new(source.clone(), edge_type.clone(), target.clone(), version);
                    self.storage.delete_edge(scope, &stale)?;
                    removed += 1;
                }
                debug!(edge_type = %edge_type, newest, "triple deduplicated");
            }
        }
        Ok(removed)
    }

    /// Pages through every edge of `(source, edge_type)` newest-first. The
    /// next page is bounded by the oldest version seen; equal-version edges
    /// of different triples are deduplicated by the seen set. A full page
    /// tied on a single version cannot move the bound, so the page widens
    /// until the tie group fits.
    fn enumerate(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
    ) -> Result<Vec<MarkedEdge>> {
        let mut seen: BTreeSet<MarkedEdge> = BTreeSet::new();
        let mut bound = i64::MAX;
        let mut page_size = self.config.scan_page_size;
        loop {
            let page =
                self.storage
                    .edges_from_source(scope, source, edge_type, bound, page_size)?;
            let mut progressed = false;
            for edge in &page {
                bound = bound.min(edge.version);
                progressed |= seen.insert(edge.clone());
            }
            if page.len() < page_size {
                break;
            }
            if !progressed {
                page_size *= 2;
            }
        }
        Ok(seen.into_iter().collect())
    }
}
