//! Metadata index repair after edge deletion.
//!
//! Metadata rows carry no reference count; a row is live exactly while a
//! scan still finds an edge of its type. Repair probes storage for one
//! surviving edge per sub-type and removes the rows nothing references.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::graph::{EdgeMetadataStore, EdgeStore, GraphId};
use crate::model::ApplicationScope;

pub struct EdgeMetaRepair {
    storage: Arc<dyn EdgeStore>,
    metadata: Arc<dyn EdgeMetadataStore>,
    config: Config,
}

impl EdgeMetaRepair {
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

    /// Audits the source-side metadata of `(source, edge_type)`: removes
    /// each target-type row with no surviving edge at or below `version`,
    /// and the edge-type row itself once every target-type row is gone.
    /// Returns the number of sub-types still in use.
    pub fn repair_sources(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
        version: i64,
    ) -> Result<usize> {
        let sub_types = self.metadata.target_types(scope, source, edge_type)?;
        let in_use = self.audit(&sub_types, |sub_type| {
            Ok(!self
                .storage
                .edges_from_source_by_target_type(scope, source, edge_type, sub_type, version, 1)?
                .is_empty())
        })?;

        for sub_type in &in_use.unused {
            self.metadata
                .remove_target_type(scope, source, edge_type, sub_type)?;
        }
        if in_use.count == 0 {
            self.metadata
                .remove_edge_type_from_source(scope, source, edge_type)?;
        }
        debug!(edge_type, in_use = in_use.count, "source metadata repaired");
        Ok(in_use.count)
    }

    /// Mirror of [`EdgeMetaRepair::repair_sources`] for the target side.
    pub fn repair_targets(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
        version: i64,
    ) -> Result<usize> {
        let sub_types = self.metadata.source_types(scope, target, edge_type)?;
        let in_use = self.audit(&sub_types, |sub_type| {
            Ok(!self
                .storage
                .edges_to_target_by_source_type(scope, target, edge_type, sub_type, version, 1)?
                .is_empty())
        })?;

        for sub_type in &in_use.unused {
            self.metadata
                .remove_source_type(scope, target, edge_type, sub_type)?;
        }
        if in_use.count == 0 {
            self.metadata
                .remove_edge_type_to_target(scope, target, edge_type)?;
        }
        debug!(edge_type, in_use = in_use.count, "target metadata repaired");
        Ok(in_use.count)
    }

    /// Probes each sub-type for a surviving edge, a bounded batch at a time.
    fn audit<F>(&self, sub_types: &[String], probe: F) -> Result<Audit>
    where
        F: Fn(&str) -> Result<bool> + Sync,
    {
        let mut audit = Audit {
            count: 0,
            unused: Vec::new(),
        };
        for batch in sub_types.chunks(self.config.repair_concurrent_size.max(1)) {
            let probed: Vec<(String, bool)> = batch
                .par_iter()
                .map(|sub_type| Ok((sub_type.clone(), probe(sub_type)?)))
                .collect::<Result<_>>()?;
            for (sub_type, survives) in probed {
                if survives {
                    audit.count += 1;
                } else {
                    audit.unused.push(sub_type);
                }
            }
        }
        Ok(audit)
    }
}

struct Audit {
    count: usize,
    unused: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MarkedEdge, MemoryEdgeStore, MemoryMetadataStore};
    use uuid::Uuid;

    fn scope() -> ApplicationScope {
        ApplicationScope::new(Uuid::from_u128(1))
    }

    fn node(n: u128, t: &str) -> GraphId {
        GraphId::new(Uuid::from_u128(n), t)
    }

    fn repair_over(
        storage: &Arc<MemoryEdgeStore>,
        metadata: &Arc<MemoryMetadataStore>,
    ) -> EdgeMetaRepair {
        EdgeMetaRepair::new(
            Arc::clone(storage) as Arc<dyn EdgeStore>,
            Arc::clone(metadata) as Arc<dyn EdgeMetadataStore>,
            Config::default(),
        )
    }

    #[test]
    fn removes_only_unreferenced_rows() {
        let storage = Arc::new(MemoryEdgeStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let source = node(1, "user");

        // two target types recorded, but only "device" edges survive
        let device_edge = MarkedEdge::new(source.clone(), "owns", node(2, "device"), 5);
        let car_edge = MarkedEdge::new(source.clone(), "owns", node(3, "car"), 5);
        metadata.write_meta(&scope(), &device_edge).unwrap();
        metadata.write_meta(&scope(), &car_edge).unwrap();
        storage.write_edge(&scope(), &device_edge).unwrap();

        let in_use = repair_over(&storage, &metadata)
            .repair_sources(&scope(), &source, "owns", 10)
            .unwrap();
        assert_eq!(in_use, 1);
        assert_eq!(
            metadata.target_types(&scope(), &source, "owns").unwrap(),
            vec!["device"]
        );
        // type row survives while any sub-type is referenced
        assert_eq!(
            metadata.edge_types_from_source(&scope(), &source).unwrap(),
            vec!["owns"]
        );
    }

    #[test]
    fn type_row_falls_with_its_last_sub_type() {
        let storage = Arc::new(MemoryEdgeStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let source = node(1, "user");
        let edge = MarkedEdge::new(source.clone(), "owns", node(2, "device"), 5);
        metadata.write_meta(&scope(), &edge).unwrap();

        let in_use = repair_over(&storage, &metadata)
            .repair_sources(&scope(), &source, "owns", 10)
            .unwrap();
        assert_eq!(in_use, 0);
        assert!(metadata
            .edge_types_from_source(&scope(), &source)
            .unwrap()
            .is_empty());
    }
}
