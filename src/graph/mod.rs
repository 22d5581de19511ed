//! Directed, typed, versioned edge graph: core types and the asynchronous
//! delete/compaction pipeline.
//!
//! Edges are written through a two-phase path: a commit log (fast, durable
//! staging) and permanent storage. The pipeline components in this module
//! move data between the two, retire edges of deleted nodes, and keep the
//! metadata index consistent. Every component is idempotent under
//! redelivery; retries belong to the caller.

mod dedup;
mod dispatcher;
mod meta_repair;
mod node_delete;
mod store;
mod write_compact;

pub use dedup::DedupCompactor;
pub use dispatcher::{PipelineDispatcher, PipelineEvent};
pub use meta_repair::EdgeMetaRepair;
pub use node_delete::NodeDeleteListener;
pub use store::{
    EdgeMetadataStore, EdgeStore, MemoryEdgeStore, MemoryMetadataStore, MemoryNodeMarkStore,
    NodeMarkStore,
};
pub use write_compact::EdgeWriteCompactor;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in the graph: an entity id plus its declared type.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GraphId {
    pub uuid: Uuid,
    pub id_type: String,
}

impl GraphId {
    pub fn new(uuid: Uuid, id_type: impl Into<String>) -> Self {
        Self {
            uuid,
            id_type: id_type.into(),
        }
    }
}

/// One stored version of a directed, typed edge. Multiple versions of the
/// same (source, type, target) triple coexist; the current one is the
/// highest version not marked deleted.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MarkedEdge {
    pub source: GraphId,
    pub edge_type: String,
    pub target: GraphId,
    pub version: i64,
    pub deleted: bool,
}

impl MarkedEdge {
    pub fn new(
        source: GraphId,
        edge_type: impl Into<String>,
        target: GraphId,
        version: i64,
    ) -> Self {
        Self {
            source,
            edge_type: edge_type.into(),
            target,
            version,
            deleted: false,
        }
    }

    /// The node on the far side of the edge from `node`.
    pub fn other(&self, node: &GraphId) -> &GraphId {
        if &self.source == node {
            &self.target
        } else {
            &self.source
        }
    }
}

/// Which side of its edges a node is viewed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeDirection {
    FromSource,
    ToTarget,
}

/// One metadata index coordinate touched by a delete: a node's edge type
/// seen from one direction. Repair re-audits these after edge rows are gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectedEdgeMeta {
    pub node: GraphId,
    pub edge_type: String,
    pub direction: EdgeDirection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_side_of_an_edge() {
        let a = GraphId::new(Uuid::from_u128(1), "user");
        let b = GraphId::new(Uuid::from_u128(2), "device");
        let edge = MarkedEdge::new(a.clone(), "owns", b.clone(), 10);
        assert_eq!(edge.other(&a), &b);
        assert_eq!(edge.other(&b), &a);
    }

    #[test]
    fn edges_order_by_triple_then_version() {
        let a = GraphId::new(Uuid::from_u128(1), "user");
        let b = GraphId::new(Uuid::from_u128(2), "device");
        let v1 = MarkedEdge::new(a.clone(), "owns", b.clone(), 1);
        let v2 = MarkedEdge::new(a, "owns", b, 2);
        assert!(v1 < v2);
    }
}
