//! Ring swaps driven by the coordination service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use strand_meta::{MemoryMetadataService, MetadataService};
use strand_types::PeerList;

use super::helpers::*;
use crate::{DistributorConfig, NoopRebalancer, RebalanceSummary};

fn quiet_config() -> DistributorConfig {
    DistributorConfig {
        listen: false,
        ..test_config()
    }
}

fn members(count: u32) -> Vec<String> {
    (1..=count).map(|i| format!("n{i}")).collect()
}

fn growing_model(version: u32) -> strand_ring::RingModel {
    let uuids = members(version);
    let refs: Vec<&str> = uuids.iter().map(String::as_str).collect();
    ketama_model(version, 1, &refs)
}

#[tokio::test]
async fn test_published_ring_is_swapped_in() {
    let meta = MemoryMetadataService::new("a", ketama_model(1, 2, &["a", "b"])).unwrap();
    let node = start_node(Arc::new(meta.clone()), quiet_config(), Arc::new(NoopRebalancer)).await;

    meta.set_ring(ketama_model(2, 2, &["a", "b", "c"])).await.unwrap();
    wait_for_version(&node.distributor, 2).await;

    let ring = node.distributor.ring();
    assert!(ring.members().same_members(&PeerList::new(["a", "b", "c"])));
    assert_eq!(ring.replication(), 2);

    node.distributor.close().await.unwrap();
}

#[tokio::test]
async fn test_update_ring_publishes_through_coordination_service() {
    let meta = MemoryMetadataService::new("a", ketama_model(1, 1, &["a"])).unwrap();
    let node = start_node(Arc::new(meta.clone()), quiet_config(), Arc::new(NoopRebalancer)).await;

    let next = node
        .distributor
        .ring()
        .add_peers(&PeerList::new(["b"]), &[])
        .unwrap();
    node.distributor.update_ring(next.as_ref()).await.unwrap();

    assert_eq!(meta.get_ring().await.unwrap().version, 2);
    wait_for_version(&node.distributor, 2).await;

    // Republishing the same version is rejected by the coordination service.
    assert!(node.distributor.update_ring(next.as_ref()).await.is_err());

    node.distributor.close().await.unwrap();
}

#[tokio::test]
async fn test_stale_version_is_ignored() {
    let meta = MemoryMetadataService::new("a", ketama_model(1, 1, &["a"])).unwrap();
    let rings = Arc::new(InjectedRings::new(meta));
    let recorder = Arc::new(RecordingRebalancer::new(
        Arc::new(NoopRebalancer),
        Duration::ZERO,
    ));
    let node = start_node(rings.clone(), quiet_config(), recorder.clone()).await;

    rings.broadcast(ketama_model(3, 1, &["a", "c"]));
    wait_for_version(&node.distributor, 3).await;

    rings.broadcast(ketama_model(3, 1, &["a", "d"]));
    rings.broadcast(ketama_model(2, 1, &["a", "b"]));
    // Give the watcher time to receive and drop both.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let ring = node.distributor.ring();
    assert_eq!(ring.version(), 3);
    assert!(ring.members().same_members(&PeerList::new(["a", "c"])));

    let rec = &recorder;
    eventually("one rebalance", || async move { rec.runs().len() == 1 }).await;
    assert_eq!((recorder.runs()[0].from, recorder.runs()[0].to), (1, 3));

    node.distributor.close().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_ring_is_skipped() {
    let meta = MemoryMetadataService::new("a", ketama_model(1, 1, &["a"])).unwrap();
    let rings = Arc::new(InjectedRings::new(meta));
    let recorder = Arc::new(RecordingRebalancer::new(
        Arc::new(NoopRebalancer),
        Duration::ZERO,
    ));
    let node = start_node(rings.clone(), quiet_config(), recorder.clone()).await;

    rings.broadcast(strand_ring::RingModel {
        ring_type: 99,
        version: 2,
        replication_factor: 1,
        uuids: vec!["a".into()],
    });
    rings.broadcast(ketama_model(3, 1, &["a", "b"]));
    wait_for_version(&node.distributor, 3).await;

    // The watcher survived the bad ring and rebalanced from the ring it held.
    let rec = &recorder;
    eventually("one rebalance", || async move { rec.runs().len() == 1 }).await;
    assert_eq!((recorder.runs()[0].from, recorder.runs()[0].to), (1, 3));

    node.distributor.close().await.unwrap();
}

#[tokio::test]
async fn test_rebalances_run_one_at_a_time_in_order() {
    let meta = MemoryMetadataService::new("n1", growing_model(1)).unwrap();
    let recorder = Arc::new(RecordingRebalancer::new(
        Arc::new(NoopRebalancer),
        Duration::from_millis(30),
    ));
    let node = start_node(Arc::new(meta.clone()), quiet_config(), recorder.clone()).await;

    for version in 2..=6 {
        meta.set_ring(growing_model(version)).await.unwrap();
    }
    let rec = &recorder;
    eventually("five rebalances", || async move { rec.runs().len() == 5 }).await;

    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    let transitions: Vec<(u32, u32)> = recorder.runs().iter().map(|r| (r.from, r.to)).collect();
    assert_eq!(transitions, vec![(1, 2), (2, 3), (3, 4), (4, 5), (5, 6)]);
    assert!(
        recorder
            .runs()
            .iter()
            .all(|r| r.summary == RebalanceSummary::default())
    );

    node.distributor.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_a_torn_ring() {
    const VERSIONS: u32 = 30;

    let meta = MemoryMetadataService::new("n1", growing_model(1)).unwrap();
    let node = start_node(Arc::new(meta.clone()), quiet_config(), Arc::new(NoopRebalancer)).await;
    let distributor = Arc::new(node.distributor);
    let stop = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let distributor = distributor.clone();
        let stop = stop.clone();
        readers.push(tokio::spawn(async move {
            let mut reads = 0usize;
            let mut last_seen = 0;
            while !stop.load(Ordering::Relaxed) {
                let ring = distributor.ring();
                let version = ring.version();
                assert!(version >= last_seen, "version went backwards");
                assert!(
                    ring.members().same_members(&PeerList::new(members(version))),
                    "ring v{version} has the wrong members"
                );
                last_seen = version;
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        }));
    }

    for version in 2..=VERSIONS {
        meta.set_ring(growing_model(version)).await.unwrap();
        tokio::task::yield_now().await;
    }
    wait_for_version(&distributor, VERSIONS).await;
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
    distributor.close().await.unwrap();
}
