//! Node delete pipeline: marks, fan-out, metadata repair, idempotence.

use std::sync::Arc;

use quarry::graph::{
    EdgeMetadataStore, EdgeStore, GraphId, MarkedEdge, MemoryEdgeStore, MemoryMetadataStore,
    MemoryNodeMarkStore, NodeDeleteListener, NodeMarkStore,
};
use quarry::model::ApplicationScope;
use quarry::Config;
use uuid::Uuid;

fn scope() -> ApplicationScope {
    ApplicationScope::new(Uuid::from_u128(1))
}

fn node(n: u128, t: &str) -> GraphId {
    GraphId::new(Uuid::from_u128(n), t)
}

struct Fixture {
    log: Arc<MemoryEdgeStore>,
    storage: Arc<MemoryEdgeStore>,
    metadata: Arc<MemoryMetadataStore>,
    marks: Arc<MemoryNodeMarkStore>,
    listener: NodeDeleteListener,
}

fn fixture(config: Config) -> Fixture {
    let log = Arc::new(MemoryEdgeStore::new());
    let storage = Arc::new(MemoryEdgeStore::new());
    let metadata = Arc::new(MemoryMetadataStore::new());
    let marks = Arc::new(MemoryNodeMarkStore::new());
    let listener = NodeDeleteListener::new(
        Arc::clone(&log) as Arc<dyn EdgeStore>,
        Arc::clone(&storage) as Arc<dyn EdgeStore>,
        Arc::clone(&metadata) as Arc<dyn EdgeMetadataStore>,
        Arc::clone(&marks) as Arc<dyn NodeMarkStore>,
        config,
    );
    Fixture {
        log,
        storage,
        metadata,
        marks,
        listener,
    }
}

fn write(fx: &Fixture, edge: &MarkedEdge) {
    fx.storage.write_edge(&scope(), edge).unwrap();
    fx.metadata.write_meta(&scope(), edge).unwrap();
}

#[test]
fn deletes_every_edge_type_and_direction_of_the_marked_node() {
    // batches smaller than the edge count exercise the paging loop
    let config = Config {
        scan_page_size: 2,
        ..Config::default()
    };
    let fx = fixture(config);
    let victim = node(1, "user");

    // 5 outgoing "owns", 3 outgoing "likes", 4 incoming "follows"
    for i in 0..5u128 {
        write(
            &fx,
            &MarkedEdge::new(victim.clone(), "owns", node(10 + i, "device"), i as i64),
        );
    }
    for i in 0..3u128 {
        write(
            &fx,
            &MarkedEdge::new(victim.clone(), "likes", node(20 + i, "post"), i as i64),
        );
    }
    for i in 0..4u128 {
        write(
            &fx,
            &MarkedEdge::new(node(30 + i, "user"), "follows", victim.clone(), i as i64),
        );
    }
    // bystander edge between unrelated nodes
    write(
        &fx,
        &MarkedEdge::new(node(30, "user"), "follows", node(31, "user"), 99),
    );

    fx.marks.mark(&scope(), &victim, 1_000).unwrap();
    let removed = fx.listener.receive(&scope(), &victim).unwrap();
    assert_eq!(removed, 12);
    assert_eq!(fx.storage.len(&scope()), 1);

    // the victim's metadata is fully repaired away
    assert!(fx
        .metadata
        .edge_types_from_source(&scope(), &victim)
        .unwrap()
        .is_empty());
    assert!(fx
        .metadata
        .edge_types_to_target(&scope(), &victim)
        .unwrap()
        .is_empty());

    // the bystander's metadata survives
    assert_eq!(
        fx.metadata
            .edge_types_from_source(&scope(), &node(30, "user"))
            .unwrap(),
        vec!["follows"]
    );

    // the mark is consumed
    assert_eq!(fx.marks.max_mark(&scope(), &victim).unwrap(), None);
}

#[test]
fn second_delivery_of_the_same_mark_is_a_clean_noop() {
    let fx = fixture(Config::default());
    let victim = node(1, "user");
    write(
        &fx,
        &MarkedEdge::new(victim.clone(), "owns", node(2, "device"), 5),
    );

    fx.marks.mark(&scope(), &victim, 10).unwrap();
    assert_eq!(fx.listener.receive(&scope(), &victim).unwrap(), 1);
    assert_eq!(fx.listener.receive(&scope(), &victim).unwrap(), 0);
    assert_eq!(fx.listener.receive(&scope(), &victim).unwrap(), 0);
}

#[test]
fn delete_without_a_mark_removes_nothing() {
    let fx = fixture(Config::default());
    let victim = node(1, "user");
    write(
        &fx,
        &MarkedEdge::new(victim.clone(), "owns", node(2, "device"), 5),
    );

    assert_eq!(fx.listener.receive(&scope(), &victim).unwrap(), 0);
    assert_eq!(fx.storage.len(&scope()), 1);
    assert_eq!(
        fx.metadata
            .edge_types_from_source(&scope(), &victim)
            .unwrap(),
        vec!["owns"]
    );
}

#[test]
fn edges_only_in_the_commit_log_are_also_removed() {
    // the edge was staged but never compacted into permanent storage
    let fx = fixture(Config::default());
    let victim = node(1, "user");
    let edge = MarkedEdge::new(victim.clone(), "owns", node(2, "device"), 5);
    fx.log.write_edge(&scope(), &edge).unwrap();
    fx.metadata.write_meta(&scope(), &edge).unwrap();

    fx.marks.mark(&scope(), &victim, 10).unwrap();
    assert_eq!(fx.listener.receive(&scope(), &victim).unwrap(), 1);
    assert!(fx.log.is_empty(&scope()));
    assert!(fx
        .metadata
        .edge_types_from_source(&scope(), &victim)
        .unwrap()
        .is_empty());
}

#[test]
fn staged_commit_log_copies_are_removed_with_the_edge() {
    let fx = fixture(Config::default());
    let victim = node(1, "user");
    let edge = MarkedEdge::new(victim.clone(), "owns", node(2, "device"), 5);
    write(&fx, &edge);
    fx.log.write_edge(&scope(), &edge).unwrap();

    fx.marks.mark(&scope(), &victim, 10).unwrap();
    assert_eq!(fx.listener.receive(&scope(), &victim).unwrap(), 1);
    assert!(fx.log.is_empty(&scope()));
    assert!(fx.storage.is_empty(&scope()));
}
