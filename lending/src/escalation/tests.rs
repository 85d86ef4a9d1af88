#![allow(clippy::unwrap_used)]

use super::*;
use crate::dispatch::{DispatchEnvironment, Dispatcher, MessageTemplates};
use crate::error::LendingError;
use crate::store::{InMemoryLendingStore, InventoryLedger};
use crate::types::{AlertKind, CatalogItem, Condition, ItemId, Station, StationId};
use chrono::Duration;
use lending_core::environment::Clock;
use lending_core::notification::Channel;
use lending_testing::{InMemoryAuditLog, ManualClock, RecordingNotifier, test_clock};
use std::sync::Arc;

struct Fixture {
    store: Arc<InMemoryLendingStore>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    audit: Arc<InMemoryAuditLog>,
    dispatcher: Dispatcher,
    engine: EscalationEngine,
    station: Station,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_notifier(RecordingNotifier::new()).await
    }

    async fn with_notifier(notifier: RecordingNotifier) -> Self {
        let store = Arc::new(InMemoryLendingStore::new());
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let notifier = Arc::new(notifier);
        let audit = Arc::new(InMemoryAuditLog::new());
        let dispatcher = Dispatcher::new(DispatchEnvironment {
            notifier: notifier.clone(),
            audit: audit.clone(),
            templates: MessageTemplates::new("https://lend.example.org"),
        });
        let engine = EscalationEngine::new(
            store.clone(),
            clock.clone(),
            dispatcher.clone(),
            AlertPolicy::default(),
        );

        let station = Station {
            id: StationId::new(),
            name: "North".to_string(),
            manager_emails: vec!["manager@north.org".to_string()],
        };
        store.add_station(station.clone()).await;

        Self {
            store,
            clock,
            notifier,
            audit,
            dispatcher,
            engine,
            station,
        }
    }

    async fn stock(&self, name: &str, quantity: u32) -> CatalogItem {
        let item = CatalogItem {
            id: ItemId::new(),
            name: name.to_string(),
            is_consumable: true,
        };
        self.store
            .put_stock(self.station.id, &item, quantity, Condition::Working, None)
            .await;
        item
    }

    async fn run(&self, kind: AlertKind) -> KindReport {
        let report = self.engine.run(self.station.id, kind).await.unwrap();
        self.dispatcher
            .wait_idle(std::time::Duration::from_secs(1))
            .await
            .unwrap();
        report
    }

    async fn open_rows(&self, kind: AlertKind) -> Vec<crate::types::AlertTracking> {
        self.store
            .tracking_rows()
            .await
            .into_iter()
            .filter(|r| r.kind == kind && r.is_open())
            .collect()
    }
}

#[tokio::test]
async fn gloves_first_notice_cooldown_then_follow_up() {
    let fx = Fixture::new().await;
    let gloves = fx.stock("gloves", 5).await;

    let report = fx.run(AlertKind::LowStock).await;
    assert_eq!(report.raised, 0);
    assert!(fx.notifier.sent().is_empty());

    fx.store
        .adjust_quantity(fx.station.id, gloves.id, -3)
        .await
        .unwrap();

    let report = fx.run(AlertKind::LowStock).await;
    assert_eq!(report.raised, 1);
    assert_eq!(fx.notifier.sent_on(Channel::Email).len(), 1);
    let rows = fx.open_rows(AlertKind::LowStock).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].alert_count, 1);

    fx.clock.advance(Duration::days(1));
    let report = fx.run(AlertKind::LowStock).await;
    assert_eq!((report.raised, report.followed_up, report.skipped), (0, 0, 1));
    assert_eq!(fx.notifier.sent().len(), 1);
    assert_eq!(fx.open_rows(AlertKind::LowStock).await[0].alert_count, 1);

    fx.clock.advance(Duration::days(7));
    let report = fx.run(AlertKind::LowStock).await;
    assert_eq!(report.followed_up, 1);
    let sent = fx.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].subject.contains("Reminder"));
    assert!(sent[1].body.contains("gloves"));

    let rows = fx.open_rows(AlertKind::LowStock).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].alert_count, 2);
    assert_eq!(rows[0].last_alert_at, fx.clock.now());
}

#[tokio::test]
async fn new_subjects_are_batched_into_one_message() {
    let fx = Fixture::new().await;
    fx.stock("gloves", 1).await;
    fx.stock("masks", 0).await;
    fx.stock("rope", 9).await;

    let report = fx.run(AlertKind::LowStock).await;

    assert_eq!(report.raised, 2);
    let sent = fx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("gloves") && sent[0].body.contains("masks"));
    assert!(!sent[0].body.contains("rope"));
}

#[tokio::test]
async fn replenished_subject_resolves_and_reoccurrence_opens_new_row() {
    let fx = Fixture::new().await;
    let gloves = fx.stock("gloves", 2).await;

    fx.run(AlertKind::LowStock).await;
    let first = fx.open_rows(AlertKind::LowStock).await.remove(0);

    fx.store
        .adjust_quantity(fx.station.id, gloves.id, 10)
        .await
        .unwrap();
    fx.clock.advance(Duration::days(1));
    let report = fx.run(AlertKind::LowStock).await;
    assert_eq!(report.resolved, 1);
    assert!(fx.open_rows(AlertKind::LowStock).await.is_empty());
    assert_eq!(fx.notifier.sent().len(), 1);

    fx.store
        .adjust_quantity(fx.station.id, gloves.id, -12)
        .await
        .unwrap();
    fx.clock.advance(Duration::days(1));
    let report = fx.run(AlertKind::LowStock).await;
    assert_eq!(report.raised, 1);

    let rows = fx.store.tracking_rows().await;
    assert_eq!(rows.len(), 2);
    let resolved = rows.iter().find(|r| r.id == first.id).unwrap();
    assert!(resolved.resolved_at.is_some());
    let reopened = rows.iter().find(|r| r.id != first.id).unwrap();
    assert!(reopened.is_open());
    assert_eq!(reopened.alert_count, 1);
}

#[tokio::test]
async fn faulty_equipment_alerts_after_three_weeks() {
    let fx = Fixture::new().await;
    let stretcher = fx.stock("stretcher", 4).await;
    fx.store
        .set_condition(fx.station.id, stretcher.id, Condition::Faulty, fx.clock.now())
        .await
        .unwrap();

    fx.clock.advance(Duration::days(20));
    assert_eq!(fx.run(AlertKind::FaultyEquipment).await.raised, 0);

    fx.clock.advance(Duration::days(1));
    assert_eq!(fx.run(AlertKind::FaultyEquipment).await.raised, 1);
    let sent = fx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("Faulty equipment"));

    fx.store
        .set_condition(fx.station.id, stretcher.id, Condition::Working, fx.clock.now())
        .await
        .unwrap();
    assert_eq!(fx.run(AlertKind::FaultyEquipment).await.resolved, 1);
}

#[tokio::test]
async fn failing_notifier_still_writes_tracking() {
    let fx = Fixture::with_notifier(RecordingNotifier::failing()).await;
    fx.stock("gloves", 1).await;

    let report = fx.run(AlertKind::LowStock).await;

    assert_eq!(report.raised, 1);
    assert_eq!(fx.open_rows(AlertKind::LowStock).await.len(), 1);
    assert_eq!(fx.notifier.attempts().len(), 1);
    assert_eq!(fx.dispatcher.stats().await.failed, 1);

    fx.clock.advance(Duration::days(1));
    assert_eq!(fx.run(AlertKind::LowStock).await.skipped, 1);
}

#[tokio::test]
async fn notices_are_audited_against_the_station() {
    let fx = Fixture::new().await;
    fx.stock("gloves", 1).await;
    fx.run(AlertKind::LowStock).await;

    let entries = fx.audit.entries_for(&fx.station.id.to_string());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "alert.low_stock.first");
    assert_eq!(entries[0].actor, "system");
}

#[tokio::test]
async fn run_station_covers_both_kinds() {
    let fx = Fixture::new().await;
    fx.stock("gloves", 1).await;

    let report = fx.engine.run_station(fx.station.id).await.unwrap();
    assert_eq!(report.kinds.len(), 2);
    assert_eq!(report.kind(AlertKind::LowStock).unwrap().raised, 1);
    assert_eq!(report.kind(AlertKind::FaultyEquipment).unwrap().raised, 0);
}

#[tokio::test]
async fn run_all_visits_every_station() {
    let fx = Fixture::new().await;
    fx.stock("gloves", 1).await;
    let other = Station {
        id: StationId::new(),
        name: "South".to_string(),
        manager_emails: vec![],
    };
    fx.store.add_station(other.clone()).await;

    let results = fx.engine.run_all(4).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
}

#[tokio::test]
async fn unknown_station_is_not_found() {
    let fx = Fixture::new().await;
    let err = fx
        .engine
        .run(StationId::new(), AlertKind::LowStock)
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::NotFound { entity: "station", .. }));
}
