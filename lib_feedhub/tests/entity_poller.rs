use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use lib_feedhub::core::{EntityLogRegistry, LogSettings, TimeSource};
use lib_feedhub::ingestors::{EntityPoller, PollReport};
use lib_feedhub::model::{EntityId, EntityUpdate};
use lib_feedhub::sources::{NoArchive, StaticFeed};

type Poller = EntityPoller<StaticFeed, NoArchive, TimeSource>;

fn update(entity: &str, version: u64) -> EntityUpdate {
    EntityUpdate {
        entity_id: EntityId::new(entity),
        version,
        payload: json!({ "entity": entity, "version": version }),
    }
}

fn setup(settings: LogSettings) -> (Arc<StaticFeed>, Arc<EntityLogRegistry<NoArchive>>, Poller) {
    let upstream = Arc::new(StaticFeed::default());
    let registry = Arc::new(EntityLogRegistry::new(NoArchive, settings));
    let poller = EntityPoller::new(
        Arc::clone(&upstream),
        Arc::clone(&registry),
        Arc::new(TimeSource::Real),
        Duration::from_secs(1),
    );
    (upstream, registry, poller)
}

#[tokio::test]
async fn repolling_an_unchanged_entity_is_a_no_op() {
    let (upstream, registry, poller) = setup(LogSettings::default());
    upstream.set_entity(update("g1", 3));
    upstream.set_entity(update("g2", 0));
    assert!(poller.track(EntityId::new("g1")));
    assert!(poller.track(EntityId::new("g2")));
    assert!(!poller.track(EntityId::new("g1")));

    let first = poller.poll_once().await;
    assert_eq!(
        first,
        PollReport {
            applied: 2,
            unchanged: 0,
            failed: 0
        }
    );

    let second = poller.poll_once().await;
    assert_eq!(second.applied, 0);
    assert_eq!(second.unchanged, 2);

    upstream.set_entity(update("g1", 4));
    let third = poller.poll_once().await;
    assert_eq!(third.applied, 1);

    let history = registry.historical_snapshot(&EntityId::new("g1")).await.unwrap();
    assert_eq!(history.keys().copied().collect::<Vec<_>>(), vec![3, 4]);
}

#[tokio::test]
async fn failures_are_counted_per_entity() {
    let (upstream, _registry, poller) = setup(LogSettings {
        max_version: 10,
        ..LogSettings::default()
    });
    upstream.set_entity(update("ok", 1));
    upstream.set_entity(update("huge", 11));
    for id in ["ok", "huge", "unknown"] {
        poller.track(EntityId::new(id));
    }

    let report = poller.poll_once().await;
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 2);
}

#[tokio::test]
async fn untracked_entities_are_no_longer_polled() {
    let (upstream, registry, poller) = setup(LogSettings::default());
    upstream.set_entity(update("g1", 0));
    poller.track(EntityId::new("g1"));
    poller.poll_once().await;

    assert!(poller.untrack(&EntityId::new("g1")));
    assert!(poller.tracked().is_empty());
    upstream.set_entity(update("g1", 1));

    assert_eq!(poller.poll_once().await, PollReport::default());
    // The log outlives tracking.
    let log = registry.get(&EntityId::new("g1")).unwrap();
    assert_eq!(log.latest_version().await, Some(0));
}

#[tokio::test(start_paused = true)]
async fn run_keeps_polling_until_cancelled() {
    let (upstream, registry, poller) = setup(LogSettings::default());
    let id = EntityId::new("live");
    upstream.set_entity(update("live", 0));
    poller.track(id.clone());
    let mut updates = registry.log_for(&id).subscribe();

    let poller = Arc::new(poller);
    let cancel = CancellationToken::new();
    let task = {
        let poller = Arc::clone(&poller);
        let cancel = cancel.clone();
        tokio::spawn(async move { poller.run(cancel).await })
    };

    assert_eq!(updates.recv().await.unwrap().version, 0);
    upstream.set_entity(update("live", 1));
    let next = updates.recv().await.unwrap();
    assert_eq!(next.version, 1);
    assert_eq!(*next.payload, json!({ "entity": "live", "version": 1 }));

    cancel.cancel();
    task.await.unwrap();
}
