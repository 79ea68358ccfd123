use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use crossbeam_channel::bounded;

use scopewatch::{
    InMemorySource, LabelSet, Node, Pod, PodPhase, QpsLimiterSet, ResourceKind, Selector,
    ViewHandlers, WatchError, WatchRegistry, WatchSource, WatchedResource,
};

fn api_selector() -> Selector {
    Selector::new(LabelSet::try_from_pairs([("run", "api")]).unwrap())
}

fn api_pod(name: &str) -> Pod {
    Pod::new(name, LabelSet::try_from_pairs([("run", "api")]).unwrap())
}

fn batch_pod(name: &str) -> Pod {
    Pod::new(name, LabelSet::try_from_pairs([("run", "batch")]).unwrap())
}

fn relabelled(pod: &Pod, labels: LabelSet) -> Pod {
    let mut out = pod.clone();
    out.meta.labels = labels;
    out
}

fn setup() -> (Arc<InMemorySource>, WatchRegistry) {
    let source = Arc::new(InMemorySource::with_capacity(128));
    let registry = WatchRegistry::new(Arc::clone(&source) as Arc<dyn WatchSource>);
    (source, registry)
}

#[test]
fn scoped_adds_and_deletes_drive_callbacks_in_order() {
    let (source, registry) = setup();
    let selector = api_selector();

    let (journal_tx, journal_rx) = bounded::<String>(64);
    let adds = journal_tx.clone();
    let deletes = journal_tx.clone();
    let counts = journal_tx;
    registry
        .listen_pods(
            &selector,
            ViewHandlers::new()
                .on_add(move |pod: &Pod| {
                    let _ = adds.send(format!("add:{}", pod.name()));
                })
                .on_delete(move |pod: &Pod| {
                    let _ = deletes.send(format!("delete:{}", pod.name()));
                })
                .on_count_changed(move |count| {
                    let _ = counts.send(format!("count:{count}"));
                }),
        )
        .unwrap();

    let (stop_tx, stop_rx) = bounded::<()>(1);
    registry.start(&selector, stop_rx).unwrap();

    source.pods().push_added(api_pod("api-0"));
    source.pods().push_added(api_pod("api-1"));
    source.pods().push_deleted(api_pod("api-0"));

    let mut seen = Vec::new();
    for _ in 0..6 {
        seen.push(journal_rx.recv_timeout(Duration::from_secs(1)).unwrap());
    }
    assert_eq!(
        seen,
        vec![
            "add:api-0",
            "count:1",
            "add:api-1",
            "count:2",
            "delete:api-0",
            "count:1"
        ]
    );

    let pods = registry.pods(&selector).unwrap();
    let names: Vec<String> = pods
        .list()
        .unwrap()
        .into_iter()
        .map(|pod| pod.name().to_string())
        .collect();
    assert_eq!(names, vec!["api-1"]);

    drop(stop_tx);
}

#[test]
fn label_mutation_moves_pod_across_the_scope_boundary() {
    let (source, registry) = setup();
    let selector = api_selector();

    let (deleted_tx, deleted_rx) = bounded::<Pod>(8);
    let (added_tx, added_rx) = bounded::<Pod>(8);
    registry
        .listen_pods(
            &selector,
            ViewHandlers::new()
                .on_add(move |pod: &Pod| {
                    let _ = added_tx.send(pod.clone());
                })
                .on_delete(move |pod: &Pod| {
                    let _ = deleted_tx.send(pod.clone());
                }),
        )
        .unwrap();

    let (_stop_tx, stop_rx) = bounded::<()>(1);
    registry.start(&selector, stop_rx).unwrap();

    // In scope, then the label is stripped away: the scope sees a delete
    // carrying the last in-scope payload.
    let resident = api_pod("api-0").with_phase(PodPhase::Running);
    source.pods().push_added(resident.clone());
    added_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let stripped = relabelled(&resident, LabelSet::new()).with_phase(PodPhase::Failed);
    source.pods().push_modified(resident.clone(), stripped.clone());

    let evicted = deleted_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(evicted.name(), "api-0");
    assert_eq!(evicted.phase, PodPhase::Running);
    assert_eq!(evicted.labels().get("run"), Some("api"));

    // And back across the boundary: label gained means the scope sees an add.
    let regained = relabelled(&stripped, LabelSet::try_from_pairs([("run", "api")]).unwrap());
    source.pods().push_modified(stripped, regained.clone());

    let entered = added_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(entered.name(), "api-0");
    assert_eq!(entered.phase, PodPhase::Failed);

    let pods = registry.pods(&selector).unwrap();
    assert_eq!(pods.len().unwrap(), 1);
}

#[test]
fn duplicate_add_keeps_first_payload_and_reports_update() {
    let (source, registry) = setup();
    let selector = api_selector();

    let (journal_tx, journal_rx) = bounded::<String>(16);
    let adds = journal_tx.clone();
    let updates = journal_tx.clone();
    let counts = journal_tx;
    registry
        .listen_pods(
            &selector,
            ViewHandlers::new()
                .on_add(move |pod: &Pod| {
                    let _ = adds.send(format!("add:{}", pod.name()));
                })
                .on_update(move |_: &Pod, new: &Pod| {
                    let _ = updates.send(format!("update:{}", new.name()));
                })
                .on_count_changed(move |count| {
                    let _ = counts.send(format!("count:{count}"));
                }),
        )
        .unwrap();

    let (_stop_tx, stop_rx) = bounded::<()>(1);
    registry.start(&selector, stop_rx).unwrap();

    source.pods().push_added(api_pod("api-0"));
    source.pods().push_added(api_pod("api-0").with_phase(PodPhase::Running));

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(journal_rx.recv_timeout(Duration::from_secs(1)).unwrap());
    }
    assert_eq!(seen, vec!["add:api-0", "count:1", "update:api-0"]);

    // The first payload is the one retained.
    let stored = registry.pods(&selector).unwrap().get("api-0").unwrap().unwrap();
    assert_eq!(stored.phase, PodPhase::Pending);
}

#[test]
fn stale_delete_is_ignored_without_disturbing_the_view() {
    let (source, registry) = setup();
    let selector = api_selector();

    let (journal_tx, journal_rx) = bounded::<String>(16);
    let adds = journal_tx.clone();
    let deletes = journal_tx;
    registry
        .listen_pods(
            &selector,
            ViewHandlers::new()
                .on_add(move |pod: &Pod| {
                    let _ = adds.send(format!("add:{}", pod.name()));
                })
                .on_delete(move |pod: &Pod| {
                    let _ = deletes.send(format!("delete:{}", pod.name()));
                }),
        )
        .unwrap();

    let (_stop_tx, stop_rx) = bounded::<()>(1);
    registry.start(&selector, stop_rx).unwrap();

    // A delete for a pod the scope never saw must vanish quietly; the add
    // after it proves the worker is still alive.
    source.pods().push_deleted(api_pod("ghost"));
    source.pods().push_added(api_pod("api-0"));

    assert_eq!(
        journal_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        "add:api-0"
    );
    assert!(journal_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(registry.pods(&selector).unwrap().len().unwrap(), 1);
}

#[test]
fn kind_conflict_leaves_the_existing_binding_functional() {
    let (source, registry) = setup();
    let selector = api_selector();

    let (added_tx, added_rx) = bounded::<Pod>(8);
    registry
        .listen_pods(
            &selector,
            ViewHandlers::new().on_add(move |pod: &Pod| {
                let _ = added_tx.send(pod.clone());
            }),
        )
        .unwrap();

    // Same key, different kind: refused.
    let err = registry.listen_nodes(&selector, ViewHandlers::new()).unwrap_err();
    assert!(matches!(err, WatchError::Registry(_)));
    assert_eq!(registry.kind_of(&selector).unwrap(), Some(ResourceKind::Pod));

    // The pod binding still binds, starts, and delivers.
    let (_stop_tx, stop_rx) = bounded::<()>(1);
    registry.start(&selector, stop_rx).unwrap();

    source.pods().push_added(api_pod("api-0"));
    let seen = added_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(seen.name(), "api-0");
}

#[test]
fn stop_message_halts_delivery() {
    let (source, registry) = setup();
    let selector = api_selector();

    let (added_tx, added_rx) = bounded::<Pod>(16);
    registry
        .listen_pods(
            &selector,
            ViewHandlers::new().on_add(move |pod: &Pod| {
                let _ = added_tx.send(pod.clone());
            }),
        )
        .unwrap();

    let (stop_tx, stop_rx) = bounded::<()>(1);
    registry.start(&selector, stop_rx).unwrap();

    source.pods().push_added(api_pod("api-0"));
    added_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    stop_tx.send(()).unwrap();

    // The worker's subscription is pruned once it exits; out-of-scope noise
    // events trigger the pruning without touching the view.
    let mut live = source.pods().subscriber_count();
    for i in 0..50 {
        source.pods().push_added(batch_pod(&format!("noise-{i}")));
        live = source.pods().subscriber_count();
        if live == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(live, 0);

    // Events after the stop never reach the scope.
    source.pods().push_added(api_pod("late"));
    assert!(added_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(registry.pods(&selector).unwrap().len().unwrap(), 1);
}

#[test]
fn dropping_the_stop_sender_also_halts_delivery() {
    let (source, registry) = setup();
    let selector = api_selector();

    registry.listen_pods(&selector, ViewHandlers::new()).unwrap();

    let (stop_tx, stop_rx) = bounded::<()>(1);
    registry.start(&selector, stop_rx).unwrap();

    source.pods().push_added(api_pod("api-0"));

    // Wait until the event landed before pulling the plug.
    let pods = registry.pods(&selector).unwrap();
    for _ in 0..50 {
        if pods.len().unwrap() == 1 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(pods.len().unwrap(), 1);

    drop(stop_tx);

    let mut live = source.pods().subscriber_count();
    for i in 0..50 {
        source.pods().push_added(batch_pod(&format!("noise-{i}")));
        live = source.pods().subscriber_count();
        if live == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(live, 0);
    assert_eq!(pods.len().unwrap(), 1);
}

#[test]
fn mixed_kind_scopes_run_independently() {
    let (source, registry) = setup();
    let pod_scope = api_selector();
    let node_scope = Selector::new(LabelSet::try_from_pairs([("role", "infra")]).unwrap());

    let (pods_tx, pods_rx) = bounded::<Pod>(8);
    let (nodes_tx, nodes_rx) = bounded::<Node>(8);
    registry
        .listen_pods(
            &pod_scope,
            ViewHandlers::new().on_add(move |pod: &Pod| {
                let _ = pods_tx.send(pod.clone());
            }),
        )
        .unwrap();
    registry
        .listen_nodes(
            &node_scope,
            ViewHandlers::new().on_add(move |node: &Node| {
                let _ = nodes_tx.send(node.clone());
            }),
        )
        .unwrap();

    let (_pod_stop_tx, pod_stop_rx) = bounded::<()>(1);
    let (_node_stop_tx, node_stop_rx) = bounded::<()>(1);
    registry.start(&pod_scope, pod_stop_rx).unwrap();
    registry.start(&node_scope, node_stop_rx).unwrap();

    source.pods().push_added(api_pod("api-0"));
    source.nodes().push_added(Node::new(
        "worker-0",
        LabelSet::try_from_pairs([("role", "infra")]).unwrap(),
    ));

    assert_eq!(
        pods_rx.recv_timeout(Duration::from_secs(1)).unwrap().name(),
        "api-0"
    );
    assert_eq!(
        nodes_rx.recv_timeout(Duration::from_secs(1)).unwrap().name(),
        "worker-0"
    );

    assert_eq!(registry.pods(&pod_scope).unwrap().len().unwrap(), 1);
    assert_eq!(registry.nodes(&node_scope).unwrap().len().unwrap(), 1);
}

#[test]
fn counts_reflect_membership_under_concurrent_producers() {
    let (source, registry) = setup();
    let selector = api_selector();

    let (counts_tx, counts_rx) = bounded::<usize>(128);
    registry
        .listen_pods(
            &selector,
            ViewHandlers::new().on_count_changed(move |count| {
                let _ = counts_tx.send(count);
            }),
        )
        .unwrap();

    let (_stop_tx, stop_rx) = bounded::<()>(1);
    registry.start(&selector, stop_rx).unwrap();

    let mut producers = Vec::new();
    for shard in 0..2 {
        let feed = source.pods();
        producers.push(std::thread::spawn(move || {
            for i in 0..25 {
                feed.push_added(api_pod(&format!("pod-{shard}-{i}")));
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    // Delivery is serialized, so each add observes the cache size at its own
    // commit point: the counts are exactly 1..=50 in order.
    let mut counts = Vec::new();
    for _ in 0..50 {
        counts.push(counts_rx.recv_timeout(Duration::from_secs(2)).unwrap());
    }
    let expected: Vec<usize> = (1..=50).collect();
    assert_eq!(counts, expected);

    assert_eq!(registry.pods(&selector).unwrap().len().unwrap(), 50);
}

#[test]
fn deployment_watch_drives_limiter_replica_count() {
    let (source, registry) = setup();
    let selector = Selector::new(LabelSet::try_from_pairs([("app", "gateway")]).unwrap());

    let limiter = Arc::new(QpsLimiterSet::new());
    limiter.set_top_limit("list-pods", 8).unwrap();

    let (ack_tx, ack_rx) = bounded::<u32>(8);
    let on_add_limiter = Arc::clone(&limiter);
    let on_add_ack = ack_tx.clone();
    let on_update_limiter = Arc::clone(&limiter);
    let on_update_ack = ack_tx;
    registry
        .listen_deployments(
            &selector,
            ViewHandlers::new()
                .on_add(move |deploy: &scopewatch::Deployment| {
                    if let Some(replicas) = NonZeroU32::new(deploy.replicas) {
                        on_add_limiter.set_replicas(replicas);
                        let _ = on_add_ack.send(replicas.get());
                    }
                })
                .on_update(move |_: &scopewatch::Deployment, new: &scopewatch::Deployment| {
                    if let Some(replicas) = NonZeroU32::new(new.replicas) {
                        on_update_limiter.set_replicas(replicas);
                        let _ = on_update_ack.send(replicas.get());
                    }
                }),
        )
        .unwrap();

    let (_stop_tx, stop_rx) = bounded::<()>(1);
    registry.start(&selector, stop_rx).unwrap();

    let labels = LabelSet::try_from_pairs([("app", "gateway")]).unwrap();
    let single = scopewatch::Deployment::new("gateway", labels.clone(), 1);
    source.deployments().push_added(single.clone());
    assert_eq!(ack_rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);

    // One replica owns the whole budget.
    let at = DateTime::from_timestamp(1_714_000_000, 0).unwrap();
    for _ in 0..8 {
        assert_eq!(limiter.check_at("list-pods", at), Ok(true));
    }
    assert_eq!(limiter.check_at("list-pods", at), Ok(false));

    // Scaling out rescales every replica's share on the next window.
    let mut scaled = single.clone();
    scaled.replicas = 4;
    source.deployments().push_modified(single, scaled);
    assert_eq!(ack_rx.recv_timeout(Duration::from_secs(1)).unwrap(), 4);

    let later = DateTime::from_timestamp(1_714_000_001, 0).unwrap();
    assert_eq!(limiter.check_at("list-pods", later), Ok(true));
    assert_eq!(limiter.check_at("list-pods", later), Ok(true));
    assert_eq!(limiter.check_at("list-pods", later), Ok(false));
}
