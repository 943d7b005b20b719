//! What survives a restart: routing snapshots and stored metadata.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dredge_bencode::Value;
    use dredge_dht::{DhtConfig, DhtNode};
    use dredge_store::{MetadataStore, StoreError};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(15);

    #[tokio::test]
    async fn routing_snapshot_survives_restart() {
        let scratch = tempfile::tempdir().unwrap();
        let snapshot_path = scratch.path().join("routing.snapshot");
        let config = DhtConfig {
            routing_snapshot_path: Some(snapshot_path.clone()),
            metadata_base_dir: scratch.path().join("meta"),
            ..DhtConfig::for_testing()
        };

        let peer = DhtNode::start(DhtConfig::for_testing()).await.unwrap();

        let first = DhtNode::start(config.clone()).await.unwrap();
        let first_id = first.id();
        timeout(WAIT, first.ping(peer.local_addr()))
            .await
            .expect("timed out")
            .expect("ping");
        first.stop().await;
        assert!(snapshot_path.is_file());

        // Restart with the same config: same identity, table pre-seeded.
        let second = DhtNode::start(config).await.unwrap();
        assert_eq!(second.id(), first_id);
        assert!(second.stats().routing.total_nodes >= 1);
        second.stop().await;
        peer.stop().await;
    }

    #[tokio::test]
    async fn corrupted_snapshot_is_rejected_and_left_in_place() {
        let scratch = tempfile::tempdir().unwrap();
        let snapshot_path = scratch.path().join("routing.snapshot");

        // Valid bencode, wrong schema.
        let bogus = dredge_bencode::encode(&Value::dict([(
            &b"own_id"[..],
            Value::bytes(b"short"),
        )]));
        std::fs::write(&snapshot_path, &bogus).unwrap();

        let config = DhtConfig {
            routing_snapshot_path: Some(snapshot_path.clone()),
            metadata_base_dir: scratch.path().join("meta"),
            ..DhtConfig::for_testing()
        };
        let err = DhtNode::start(config).await.err().expect("must refuse");
        assert!(err.to_string().contains("schema"), "{err}");

        // The file is untouched for post-mortems.
        assert_eq!(std::fs::read(&snapshot_path).unwrap(), bogus);
    }

    #[tokio::test]
    async fn store_integrity_flow_detects_tampering() {
        let scratch = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(scratch.path(), 2).unwrap();

        let payload = b"d4:name7:payload6:lengthi3ee".to_vec();
        let hash = MetadataStore::digest(&payload);
        store.put(&hash, &payload).unwrap();
        assert_eq!(store.get(&hash).unwrap(), Some(payload.clone()));

        // Flip bytes on disk behind the store's back.
        let hex = hash.iter().map(|b| format!("{b:02x}")).collect::<String>();
        let path = scratch
            .path()
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{hex}.meta"));
        std::fs::write(&path, b"tampered payload").unwrap();

        assert!(matches!(store.get(&hash), Err(StoreError::Corrupt { .. })));
        assert!(!store.exists(&hash));
        assert_eq!(store.count(), 0);
        assert!(path.with_extension("bad").is_file());

        // The same key can be stored again after quarantine.
        store.put(&hash, &payload).unwrap();
        assert_eq!(store.count(), 1);
    }
}
