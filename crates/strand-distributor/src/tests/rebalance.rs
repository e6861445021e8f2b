//! Data movement when members join or leave.

use std::sync::Arc;
use std::time::Duration;

use strand_meta::{MemoryMetadataService, MetadataService};
use strand_ring::Ring;
use strand_store::BlockStore;
use strand_types::{BlockRef, INodeRef, PeerList};

use super::helpers::*;
use crate::{DistributorConfig, ReplicationRebalancer, WriteLevel};

#[tokio::test]
async fn test_join_and_leave_move_blocks() {
    let mut cluster = TestCluster::start(&["a", "b", "c"], 2, test_config()).await;
    let keys = blocks(48);
    for (i, key) in keys.iter().enumerate() {
        cluster
            .node("a")
            .distributor
            .put_block(*key, test_data(512, i as u32))
            .await
            .unwrap();
    }

    // d registers before the ring that includes it is published.
    cluster.join("d", test_config()).await;
    let v1 = cluster.node("a").distributor.ring();
    let v2: Arc<dyn Ring> = Arc::from(v1.add_peers(&PeerList::new(["d"]), &[]).unwrap());
    cluster.node("a").distributor.update_ring(v2.as_ref()).await.unwrap();
    cluster.wait_for_version(2).await;

    for key in &keys {
        let before = v1.get_peers(key).unwrap();
        let after = v2.get_peers(key).unwrap();
        assert!(
            after.primaries().iter().any(|p| before.is_primary(p)),
            "{key} lost every old primary"
        );
    }

    cluster.wait_for_placement(v2.as_ref(), &keys).await;
    let d = cluster.node("d");
    assert!(!d.blocks.list().await.unwrap().is_empty());
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(
            d.distributor.get_block(*key).await.unwrap(),
            test_data(512, i as u32)
        );
    }

    // d leaves again and drains.
    let v3 = v2.remove_peers(&PeerList::new(["d"]), &[]).unwrap();
    cluster.node("b").distributor.update_ring(v3.as_ref()).await.unwrap();
    cluster.wait_for_version(3).await;

    cluster.wait_for_placement(v3.as_ref(), &keys).await;
    assert!(cluster.node("d").blocks.list().await.unwrap().is_empty());
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(
            cluster.node("c").distributor.get_block(*key).await.unwrap(),
            test_data(512, i as u32)
        );
    }

    cluster.close().await;
}

#[tokio::test]
async fn test_inodes_follow_ring_changes() {
    let mut cluster = TestCluster::start(&["a", "b", "c"], 1, test_config()).await;
    let inodes: Vec<INodeRef> = (0..16).map(|i| INodeRef::new(3, i)).collect();
    for inode in &inodes {
        cluster
            .node("a")
            .distributor
            .put_inode(*inode, test_data(64, inode.inode as u32))
            .await
            .unwrap();
    }

    cluster.join("d", test_config()).await;
    let v2 = cluster
        .node("a")
        .distributor
        .ring()
        .add_peers(&PeerList::new(["d"]), &[])
        .unwrap();
    cluster.node("a").distributor.update_ring(v2.as_ref()).await.unwrap();
    cluster.wait_for_version(2).await;

    let (cluster, ring, inodes) = (&cluster, v2.as_ref(), &inodes);
    eventually("inode records placed for v2", || async move {
        cluster.inodes_placed(ring, inodes, 3).await
    })
    .await;
    for inode in inodes {
        assert_eq!(
            cluster.node("d").distributor.get_inode(*inode).await.unwrap(),
            test_data(64, inode.inode as u32)
        );
    }

    cluster.close().await;
}

#[tokio::test]
async fn test_failed_push_keeps_local_copy() {
    let meta = MemoryMetadataService::new("a", ketama_model(1, 1, &["a"])).unwrap();
    let recorder = Arc::new(RecordingRebalancer::new(
        Arc::new(ReplicationRebalancer::new()),
        Duration::ZERO,
    ));
    let node = start_node(Arc::new(meta.clone()), test_config(), recorder.clone()).await;

    let keys = blocks(32);
    for (i, key) in keys.iter().enumerate() {
        node.distributor
            .put_block(*key, test_data(64, i as u32))
            .await
            .unwrap();
    }

    // "ghost" never registers, so every push to it fails.
    meta.set_ring(ketama_model(2, 1, &["a", "ghost"])).await.unwrap();

    let rec = &recorder;
    eventually("rebalance to finish", || async move { rec.runs().len() == 1 }).await;
    let summary = recorder.runs()[0].summary;
    let ring = node.distributor.ring();
    let moved = keys
        .iter()
        .filter(|key| ring.get_peers(key).unwrap().is_primary("ghost"))
        .count();

    assert!(moved > 0, "some keys move to ghost");
    assert_eq!(summary.scanned, keys.len());
    assert_eq!(summary.pushed, 0);
    assert_eq!(summary.failed, moved);
    assert_eq!(summary.dropped, 0);
    assert_eq!(node.blocks.list().await.unwrap().len(), keys.len());

    node.distributor.close().await.unwrap();
}

#[tokio::test]
async fn test_kept_copy_survives_a_second_transition() {
    let meta = MemoryMetadataService::new("a", ketama_model(1, 1, &["a"])).unwrap();
    let recorder = Arc::new(RecordingRebalancer::new(
        Arc::new(ReplicationRebalancer::new()),
        Duration::ZERO,
    ));
    let a = start_node(Arc::new(meta.clone()), test_config(), recorder.clone()).await;
    let zed = start_node(
        Arc::new(meta.for_node("zed")),
        test_config(),
        Arc::new(ReplicationRebalancer::new()),
    )
    .await;

    let keys = blocks(32);
    for (i, key) in keys.iter().enumerate() {
        a.distributor
            .put_block(*key, test_data(64, i as u32))
            .await
            .unwrap();
    }

    // Every push to "ghost" fails, so a keeps what it could not hand off.
    meta.set_ring(ketama_model(2, 1, &["a", "ghost"])).await.unwrap();
    let rec = &recorder;
    eventually("first rebalance", || async move { rec.runs().len() == 1 }).await;
    assert_eq!(a.blocks.list().await.unwrap().len(), keys.len());

    meta.set_ring(ketama_model(3, 1, &["a", "ghost", "zed"])).await.unwrap();
    eventually("second rebalance", || async move { rec.runs().len() == 2 }).await;
    let summary = recorder.runs()[1].summary;

    let v3 = a.distributor.ring();
    let owner = |key: &BlockRef| v3.get_peers(key).unwrap().primaries()[0].clone();
    let to_ghost = keys.iter().filter(|&k| owner(k) == "ghost").count();
    let to_zed = keys.iter().filter(|&k| owner(k) == "zed").count();
    assert!(to_ghost > 0 && to_zed > 0);

    assert_eq!(summary.failed, to_ghost);
    assert_eq!(summary.pushed, to_zed);
    assert_eq!(summary.dropped, to_zed);
    for (i, key) in keys.iter().enumerate() {
        let holder = match owner(key).as_str() {
            "zed" => &zed,
            _ => &a,
        };
        assert_eq!(
            holder.blocks.get(*key).await.unwrap(),
            Some(test_data(64, i as u32)),
            "{key} was lost"
        );
    }

    a.distributor.close().await.unwrap();
    zed.distributor.close().await.unwrap();
}

#[tokio::test]
async fn test_local_copies_reach_their_primaries() {
    let config = DistributorConfig {
        write_level: WriteLevel::Local,
        ..test_config()
    };
    let mut cluster = TestCluster::start(&["a", "b"], 1, config.clone()).await;
    let keys = blocks(24);
    for (i, key) in keys.iter().enumerate() {
        cluster
            .node("a")
            .distributor
            .put_block(*key, test_data(128, i as u32))
            .await
            .unwrap();
    }
    assert_eq!(cluster.node("a").blocks.list().await.unwrap().len(), keys.len());

    cluster.join("c", config).await;
    let v2 = cluster
        .node("a")
        .distributor
        .ring()
        .add_peers(&PeerList::new(["c"]), &[])
        .unwrap();
    cluster.node("a").distributor.update_ring(v2.as_ref()).await.unwrap();
    cluster.wait_for_version(2).await;

    cluster.wait_for_placement(v2.as_ref(), &keys).await;
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(
            cluster.node("b").distributor.get_block(*key).await.unwrap(),
            test_data(128, i as u32)
        );
    }

    cluster.close().await;
}
