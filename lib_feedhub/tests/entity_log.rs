use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use lib_feedhub::core::{EntityLogRegistry, LogSettings, VersionedEntityLog};
use lib_feedhub::model::{EntityId, EntityUpdate};
use lib_feedhub::sources::{Archive, ArchiveError, NoArchive};

const VERSIONS: u64 = 300;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_and_readers_never_tear() {
    let log: Arc<VersionedEntityLog> = Arc::new(VersionedEntityLog::new(EntityId::new("game"), LogSettings::default()));
    let mut sub = log.subscribe();

    let mut writers = Vec::new();
    for writer in 0..4u64 {
        let log = Arc::clone(&log);
        writers.push(tokio::spawn(async move {
            // Every writer covers every version, in its own order, so each
            // version is delivered four times.
            let mut accepted = 0;
            for step in 0..VERSIONS {
                let version = (step * 7 + writer * 13) % VERSIONS;
                if log.apply_update(version, json!({ "v": version })).await.unwrap() {
                    accepted += 1;
                }
            }
            accepted
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..3 {
        let log = Arc::clone(&log);
        readers.push(tokio::spawn(async move {
            let mut last_len = 0;
            for _ in 0..200 {
                let snapshot = log.snapshot().await;
                assert!(snapshot.len() >= last_len, "snapshot shrank");
                for (version, payload) in &snapshot {
                    assert_eq!(**payload, json!({ "v": version }));
                }
                last_len = snapshot.len();
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut accepted = 0;
    for writer in writers {
        accepted += writer.await.unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(accepted, VERSIONS as usize);
    let snapshot = log.snapshot().await;
    assert_eq!(snapshot.len(), VERSIONS as usize);
    assert_eq!(log.latest_version().await, Some(VERSIONS - 1));

    let mut published = Vec::new();
    while let Ok(entry) = sub.try_recv() {
        published.push(entry.version);
    }
    published.sort_unstable();
    assert_eq!(published, (0..VERSIONS).collect::<Vec<_>>());
}

#[tokio::test]
async fn slow_subscriber_still_gets_every_update() {
    let log: Arc<VersionedEntityLog> = Arc::new(VersionedEntityLog::new(
        EntityId::new("game"),
        LogSettings {
            subscriber_buffer: 2,
            ..LogSettings::default()
        },
    ));
    let mut sub = log.subscribe();

    let writer = {
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            for version in 0..10 {
                log.apply_update(version, json!(version)).await.unwrap();
            }
        })
    };

    let mut seen = Vec::new();
    while seen.len() < 10 {
        seen.push(sub.recv().await.unwrap().version);
    }
    writer.await.unwrap();

    assert_eq!(seen, (0..10).collect::<Vec<_>>());
    assert_eq!(sub.dropped(), 0);
}

/// Waits until `version` shows up in a snapshot, or panics after a second.
async fn wait_for_version(log: &VersionedEntityLog, version: u64) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !log.snapshot().await.contains_key(&version) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("version {version} never became readable"));
}

#[tokio::test]
async fn blocked_delivery_does_not_hold_the_write_permit() {
    let log: Arc<VersionedEntityLog> = Arc::new(VersionedEntityLog::new(
        EntityId::new("game"),
        LogSettings {
            subscriber_buffer: 1,
            ..LogSettings::default()
        },
    ));
    let mut sub = log.subscribe();
    log.apply_update(0, json!(0)).await.unwrap();

    // The buffer is full, so this publish parks until `sub` reads.
    let first = {
        let log = Arc::clone(&log);
        tokio::spawn(async move { log.apply_update(1, json!(1)).await })
    };
    wait_for_version(&log, 1).await;
    assert!(!first.is_finished());

    // Another writer still gets the gate while the first one waits.
    let second = {
        let log = Arc::clone(&log);
        tokio::spawn(async move { log.apply_update(2, json!(2)).await })
    };
    wait_for_version(&log, 2).await;
    assert!(!first.is_finished());

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(sub.recv().await.unwrap().version);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2]);
    assert!(first.await.unwrap().unwrap());
    assert!(second.await.unwrap().unwrap());
    assert_eq!(sub.dropped(), 0);
}

#[tokio::test]
async fn subscriber_sees_only_updates_after_subscribing() {
    let log: VersionedEntityLog = VersionedEntityLog::new(EntityId::new("game"), LogSettings::default());
    log.apply_update(0, json!("before")).await.unwrap();

    let mut sub = log.subscribe();
    log.apply_update(1, json!("after")).await.unwrap();

    let entry = sub.recv().await.unwrap();
    assert_eq!(entry.version, 1);
    assert_eq!(*entry.payload, json!("after"));
    assert!(sub.try_recv().is_err());
    assert_eq!(log.snapshot().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_access_creates_one_log() {
    let registry = Arc::new(EntityLogRegistry::<NoArchive>::new(NoArchive, LogSettings::default()));
    let id = EntityId::new("game-7");

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        tasks.push(tokio::spawn(async move { registry.log_for(&id) }));
    }

    let mut logs = Vec::new();
    for task in tasks {
        logs.push(task.await.unwrap());
    }
    assert!(logs.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn registry_routes_updates_by_entity() {
    let registry = EntityLogRegistry::<NoArchive>::new(NoArchive, LogSettings::default());

    let update = |entity: &str, version: u64| EntityUpdate {
        entity_id: EntityId::new(entity),
        version,
        payload: json!({ "entity": entity, "version": version }),
    };
    assert!(registry.apply(update("a", 0)).await.unwrap());
    assert!(registry.apply(update("b", 0)).await.unwrap());
    assert!(registry.apply(update("a", 1)).await.unwrap());
    assert!(!registry.apply(update("a", 1)).await.unwrap());

    assert_eq!(registry.entity_ids(), vec![EntityId::new("a"), EntityId::new("b")]);
    let a = registry.historical_snapshot(&EntityId::new("a")).await.unwrap();
    assert_eq!(a.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
}

/// Archive double that counts lookups and fails the first one when asked to.
struct CountingArchive {
    calls: Arc<AtomicUsize>,
    fail_first: bool,
}

impl Archive<Value> for CountingArchive {
    async fn historical_snapshot(&self, entity_id: &EntityId) -> Result<BTreeMap<u64, Value>, ArchiveError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_first && call == 0 {
            return Err(ArchiveError::Network("archive timeout".into()));
        }
        if entity_id.as_str() == "missing" {
            return Err(ArchiveError::NotFound(entity_id.clone()));
        }
        Ok(BTreeMap::from([(0, json!("start")), (5, json!("end"))]))
    }
}

#[tokio::test]
async fn archived_history_is_fetched_once_and_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry: EntityLogRegistry<CountingArchive> = EntityLogRegistry::new(
        CountingArchive {
            calls: Arc::clone(&calls),
            fail_first: false,
        },
        LogSettings::default(),
    );
    let id = EntityId::new("old-game");

    let first = registry.historical_snapshot(&id).await.unwrap();
    let second = registry.historical_snapshot(&id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(*first[&5], json!("end"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(registry.cached_histories(), 1);
    assert_eq!(registry.len(), 0, "archive lookups must not create live logs");
}

#[tokio::test]
async fn archive_failures_are_not_cached() {
    let archive = CountingArchive {
        calls: Arc::new(AtomicUsize::new(0)),
        fail_first: true,
    };
    let registry: EntityLogRegistry<CountingArchive> = EntityLogRegistry::new(archive, LogSettings::default());
    let id = EntityId::new("old-game");

    assert!(matches!(
        registry.historical_snapshot(&id).await,
        Err(ArchiveError::Network(_))
    ));
    assert_eq!(registry.cached_histories(), 0);
    assert_eq!(registry.historical_snapshot(&id).await.unwrap().len(), 2);
    assert!(matches!(
        registry.historical_snapshot(&EntityId::new("missing")).await,
        Err(ArchiveError::NotFound(_))
    ));
    assert_eq!(registry.cached_histories(), 1);
}

#[tokio::test]
async fn without_archive_unknown_entities_are_not_found() {
    let registry = EntityLogRegistry::<NoArchive>::new(NoArchive, LogSettings::default());
    assert!(matches!(
        registry.historical_snapshot(&EntityId::new("nope")).await,
        Err(ArchiveError::NotFound(_))
    ));
}
