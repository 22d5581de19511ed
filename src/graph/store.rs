//! Edge storage collaborator traits and in-memory reference implementations.
//!
//! Two [`EdgeStore`] instances back the write path: the commit log and
//! permanent storage share the interface, so the pipeline components are
//! written once against the trait. Every read method returns newest-first,
//! bounded above by `max_version`.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::graph::{GraphId, MarkedEdge};
use crate::model::ApplicationScope;

/// Versioned edge rows, queryable from either end.
pub trait EdgeStore: Send + Sync {
    fn write_edge(&self, scope: &ApplicationScope, edge: &MarkedEdge) -> Result<()>;

    fn delete_edge(&self, scope: &ApplicationScope, edge: &MarkedEdge) -> Result<()>;

    /// All stored versions of one (source, type, target) triple at or below
    /// `max_version`, newest first.
    fn edge_versions(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
        target: &GraphId,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>>;

    fn edges_from_source(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>>;

    fn edges_to_target(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>>;

    fn edges_from_source_by_target_type(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
        target_type: &str,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>>;

    fn edges_to_target_by_source_type(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
        source_type: &str,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>>;
}

/// The metadata index: which edge types a node participates in, and which
/// id types appear on the far side of each. Rows here are implicitly
/// reference-counted by "does a scan still find such an edge".
pub trait EdgeMetadataStore: Send + Sync {
    fn write_meta(&self, scope: &ApplicationScope, edge: &MarkedEdge) -> Result<()>;

    fn edge_types_from_source(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
    ) -> Result<Vec<String>>;

    fn edge_types_to_target(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
    ) -> Result<Vec<String>>;

    /// Id types of targets reachable from `source` over `edge_type`.
    fn target_types(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
    ) -> Result<Vec<String>>;

    /// Id types of sources reaching `target` over `edge_type`.
    fn source_types(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
    ) -> Result<Vec<String>>;

    fn remove_edge_type_from_source(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
    ) -> Result<()>;

    fn remove_edge_type_to_target(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
    ) -> Result<()>;

    fn remove_target_type(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
        target_type: &str,
    ) -> Result<()>;

    fn remove_source_type(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
        source_type: &str,
    ) -> Result<()>;
}

/// Node tombstone marks. Marks, not delete calls, are authoritative: the
/// delete listener is a no-op for an unmarked node.
pub trait NodeMarkStore: Send + Sync {
    fn mark(&self, scope: &ApplicationScope, node: &GraphId, version: i64) -> Result<()>;

    fn max_mark(&self, scope: &ApplicationScope, node: &GraphId) -> Result<Option<i64>>;

    fn remove_mark(&self, scope: &ApplicationScope, node: &GraphId) -> Result<()>;
}

/// In-memory [`EdgeStore`].
#[derive(Default)]
pub struct MemoryEdgeStore {
    edges: RwLock<HashMap<Uuid, BTreeSet<MarkedEdge>>>,
}

impl MemoryEdgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, scope: &ApplicationScope) -> usize {
        self.edges
            .read()
            .get(&scope.application)
            .map(BTreeSet::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, scope: &ApplicationScope) -> bool {
        self.len(scope) == 0
    }

    fn collect<F>(
        &self,
        scope: &ApplicationScope,
        max_version: i64,
        limit: usize,
        matches: F,
    ) -> Vec<MarkedEdge>
    where
        F: Fn(&MarkedEdge) -> bool,
    {
        let guard = self.edges.read();
        let Some(set) = guard.get(&scope.application) else {
            return Vec::new();
        };
        let mut out: Vec<MarkedEdge> = set
            .iter()
            .filter(|e| e.version <= max_version && matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.version.cmp(&a.version));
        out.truncate(limit);
        out
    }
}

impl EdgeStore for MemoryEdgeStore {
    fn write_edge(&self, scope: &ApplicationScope, edge: &MarkedEdge) -> Result<()> {
        self.edges
            .write()
            .entry(scope.application)
            .or_default()
            .insert(edge.clone());
        Ok(())
    }

    fn delete_edge(&self, scope: &ApplicationScope, edge: &MarkedEdge) -> Result<()> {
        if let Some(set) = self.edges.write().get_mut(&scope.application) {
            set.remove(edge);
        }
        Ok(())
    }

    fn edge_versions(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
        target: &GraphId,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>> {
        Ok(self.collect(scope, max_version, limit, |e| {
            &e.source == source && e.edge_type == edge_type && &e.target == target
        }))
    }

    fn edges_from_source(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>> {
        Ok(self.collect(scope, max_version, limit, |e| {
            &e.source == source && e.edge_type == edge_type
        }))
    }

    fn edges_to_target(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>> {
        Ok(self.collect(scope, max_version, limit, |e| {
            &e.target == target && e.edge_type == edge_type
        }))
    }

    fn edges_from_source_by_target_type(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
        target_type: &str,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>> {
        Ok(self.collect(scope, max_version, limit, |e| {
            &e.source == source && e.edge_type == edge_type && e.target.id_type == target_type
        }))
    }

    fn edges_to_target_by_source_type(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
        source_type: &str,
        max_version: i64,
        limit: usize,
    ) -> Result<Vec<MarkedEdge>> {
        Ok(self.collect(scope, max_version, limit, |e| {
            &e.target == target && e.edge_type == edge_type && e.source.id_type == source_type
        }))
    }
}

#[derive(Default)]
struct MetaMaps {
    types_from: HashMap<GraphId, BTreeSet<String>>,
    types_to: HashMap<GraphId, BTreeSet<String>>,
    target_types: HashMap<(GraphId, String), BTreeSet<String>>,
    source_types: HashMap<(GraphId, String), BTreeSet<String>>,
}

/// In-memory [`EdgeMetadataStore`].
#[derive(Default)]
pub struct MemoryMetadataStore {
    scopes: RwLock<HashMap<Uuid, MetaMaps>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(set: Option<&BTreeSet<String>>) -> Vec<String> {
    set.map(|s| s.iter().cloned().collect()).unwrap_or_default()
}

impl EdgeMetadataStore for MemoryMetadataStore {
    fn write_meta(&self, scope: &ApplicationScope, edge: &MarkedEdge) -> Result<()> {
        let mut guard = self.scopes.write();
        let maps = guard.entry(scope.application).or_default();
        maps.types_from
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.edge_type.clone());
        maps.types_to
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.edge_type.clone());
        maps.target_types
            .entry((edge.source.clone(), edge.edge_type.clone()))
            .or_default()
            .insert(edge.target.id_type.clone());
        maps.source_types
            .entry((edge.target.clone(), edge.edge_type.clone()))
            .or_default()
            .insert(edge.source.id_type.clone());
        Ok(())
    }

    fn edge_types_from_source(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
    ) -> Result<Vec<String>> {
        let guard = self.scopes.read();
        Ok(sorted(
            guard
                .get(&scope.application)
                .and_then(|m| m.types_from.get(source)),
        ))
    }

    fn edge_types_to_target(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
    ) -> Result<Vec<String>> {
        let guard = self.scopes.read();
        Ok(sorted(
            guard
                .get(&scope.application)
                .and_then(|m| m.types_to.get(target)),
        ))
    }

    fn target_types(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
    ) -> Result<Vec<String>> {
        let guard = self.scopes.read();
        Ok(sorted(guard.get(&scope.application).and_then(|m| {
            m.target_types.get(&(source.clone(), edge_type.to_string()))
        })))
    }

    fn source_types(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
    ) -> Result<Vec<String>> {
        let guard = self.scopes.read();
        Ok(sorted(guard.get(&scope.application).and_then(|m| {
            m.source_types.get(&(target.clone(), edge_type.to_string()))
        })))
    }

    fn remove_edge_type_from_source(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
    ) -> Result<()> {
        if let Some(maps) = self.scopes.write().get_mut(&scope.application) {
            if let Some(types) = maps.types_from.get_mut(source) {
                types.remove(edge_type);
            }
        }
        Ok(())
    }

    fn remove_edge_type_to_target(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
    ) -> Result<()> {
        if let Some(maps) = self.scopes.write().get_mut(&scope.application) {
            if let Some(types) = maps.types_to.get_mut(target) {
                types.remove(edge_type);
            }
        }
        Ok(())
    }

    fn remove_target_type(
        &self,
        scope: &ApplicationScope,
        source: &GraphId,
        edge_type: &str,
        target_type: &str,
    ) -> Result<()> {
        if let Some(maps) = self.scopes.write().get_mut(&scope.application) {
            if let Some(types) = maps
                .target_types
                .get_mut(&(source.clone(), edge_type.to_string()))
            {
                types.remove(target_type);
            }
        }
        Ok(())
    }

    fn remove_source_type(
        &self,
        scope: &ApplicationScope,
        target: &GraphId,
        edge_type: &str,
        source_type: &str,
    ) -> Result<()> {
        if let Some(maps) = self.scopes.write().get_mut(&scope.application) {
            if let Some(types) = maps
                .source_types
                .get_mut(&(target.clone(), edge_type.to_string()))
            {
                types.remove(source_type);
            }
        }
        Ok(())
    }
}

/// In-memory [`NodeMarkStore`]. Re-marking keeps the highest version.
#[derive(Default)]
pub struct MemoryNodeMarkStore {
    marks: RwLock<HashMap<(Uuid, GraphId), i64>>,
}

impl MemoryNodeMarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeMarkStore for MemoryNodeMarkStore {
    fn mark(&self, scope: &ApplicationScope, node: &GraphId, version: i64) -> Result<()> {
        self.marks
            .write()
            .entry((scope.application, node.clone()))
            .and_modify(|v| *v = (*v).max(version))
            .or_insert(version);
        Ok(())
    }

    fn max_mark(&self, scope: &ApplicationScope, node: &GraphId) -> Result<Option<i64>> {
        Ok(self
            .marks
            .read()
            .get(&(scope.application, node.clone()))
            .copied())
    }

    fn remove_mark(&self, scope: &ApplicationScope, node: &GraphId) -> Result<()> {
        self.marks
            .write()
            .remove(&(scope.application, node.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ApplicationScope {
        ApplicationScope::new(Uuid::from_u128(1))
    }

    fn node(n: u128, t: &str) -> GraphId {
        GraphId::new(Uuid::from_u128(n), t)
    }

    #[test]
    fn versions_come_back_newest_first_and_bounded() {
        let store = MemoryEdgeStore::new();
        let (a, b) = (node(1, "user"), node(2, "device"));
        for v in [10, 30, 20] {
            store
                .write_edge(&scope(), &MarkedEdge::new(a.clone(), "owns", b.clone(), v))
                .unwrap();
        }

        let versions: Vec<i64> = store
            .edge_versions(&scope(), &a, "owns", &b, 25, 10)
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![20, 10]);
    }

    #[test]
    fn metadata_tracks_both_directions() {
        let meta = MemoryMetadataStore::new();
        let edge = MarkedEdge::new(node(1, "user"), "owns", node(2, "device"), 1);
        meta.write_meta(&scope(), &edge).unwrap();

        assert_eq!(
            meta.edge_types_from_source(&scope(), &edge.source).unwrap(),
            vec!["owns"]
        );
        assert_eq!(
            meta.edge_types_to_target(&scope(), &edge.target).unwrap(),
            vec!["owns"]
        );
        assert_eq!(
            meta.target_types(&scope(), &edge.source, "owns").unwrap(),
            vec!["device"]
        );
        assert_eq!(
            meta.source_types(&scope(), &edge.target, "owns").unwrap(),
            vec!["user"]
        );

        meta.remove_target_type(&scope(), &edge.source, "owns", "device")
            .unwrap();
        assert!(meta
            .target_types(&scope(), &edge.source, "owns")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn marks_keep_the_highest_version() {
        let marks = MemoryNodeMarkStore::new();
        let n = node(1, "user");
        marks.mark(&scope(), &n, 5).unwrap();
        marks.mark(&scope(), &n, 3).unwrap();
        assert_eq!(marks.max_mark(&scope(), &n).unwrap(), Some(5));
        marks.remove_mark(&scope(), &n).unwrap();
        assert_eq!(marks.max_mark(&scope(), &n).unwrap(), None);
    }
}
