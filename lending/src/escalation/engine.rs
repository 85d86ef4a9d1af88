//! Adapter running [`evaluate`] against a store and the dispatcher.

use super::evaluate::{EscalationPlan, evaluate};
use super::policy::AlertPolicy;
use crate::dispatch::{AlertEvent, AlertedItem, Dispatcher, Notice};
use crate::error::{LendingError, Result};
use crate::store::LendingStore;
use crate::types::{AlertKind, ItemId, Station, StationId, StationStock};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use lending_core::environment::Clock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// What one (station, kind) run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindReport {
    /// Alert kind
    pub kind: AlertKind,
    /// Subjects in the first-notice batch
    pub raised: usize,
    /// Subjects in the follow-up batch
    pub followed_up: usize,
    /// Rows resolved
    pub resolved: usize,
    /// Open subjects inside the cooldown
    pub skipped: usize,
}

/// What one station run did, per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationReport {
    /// Station
    pub station_id: StationId,
    /// One entry per alert kind
    pub kinds: Vec<KindReport>,
}

impl EscalationReport {
    /// Report for one kind.
    #[must_use]
    pub fn kind(&self, kind: AlertKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

/// Debounced alerting for low stock and long-faulty equipment.
pub struct EscalationEngine {
    store: Arc<dyn LendingStore>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    policy: AlertPolicy,
}

impl EscalationEngine {
    /// Creates a new `EscalationEngine`.
    #[must_use]
    pub fn new(
        store: Arc<dyn LendingStore>,
        clock: Arc<dyn Clock>,
        dispatcher: Dispatcher,
        policy: AlertPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            dispatcher,
            policy,
        }
    }

    /// Active thresholds.
    #[must_use]
    pub const fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Run one alert kind for one station.
    ///
    /// Tracking rows are written before any message is queued, so a failed
    /// send still counts as an attempt.
    ///
    /// # Errors
    ///
    /// Returns [`LendingError::NotFound`] for an unknown station and
    /// [`LendingError::Storage`] if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, station_id: StationId, kind: AlertKind) -> Result<KindReport> {
        let station = self.load_station(station_id).await?;
        self.run_for(&station, kind).await
    }

    /// Run both alert kinds for one station.
    ///
    /// # Errors
    ///
    /// Same as [`EscalationEngine::run`].
    #[tracing::instrument(skip(self))]
    pub async fn run_station(&self, station_id: StationId) -> Result<EscalationReport> {
        let started = Instant::now();
        let station = self.load_station(station_id).await?;

        let mut kinds = Vec::with_capacity(AlertKind::ALL.len());
        for kind in AlertKind::ALL {
            kinds.push(self.run_for(&station, kind).await?);
        }

        metrics::histogram!("lending_escalation_run_seconds").record(started.elapsed().as_secs_f64());
        Ok(EscalationReport { station_id, kinds })
    }

    /// Run every station, at most `parallelism` at a time.
    ///
    /// Stations share no state, so a failure at one does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns [`LendingError::Storage`] if the station list cannot be read.
    pub async fn run_all(
        &self,
        parallelism: usize,
    ) -> Result<Vec<(StationId, Result<EscalationReport>)>> {
        let stations = self.store.list_stations().await?;

        let results = stream::iter(stations)
            .map(|station| async move { (station.id, self.run_station(station.id).await) })
            .buffer_unordered(parallelism.max(1))
            .collect::<Vec<_>>()
            .await;

        for (station_id, result) in &results {
            if let Err(error) = result {
                tracing::warn!(%station_id, %error, "escalation run failed");
            }
        }
        Ok(results)
    }

    async fn load_station(&self, station_id: StationId) -> Result<Station> {
        self.store
            .station(station_id)
            .await?
            .ok_or_else(|| LendingError::NotFound {
                entity: "station",
                id: station_id.to_string(),
            })
    }

    async fn run_for(&self, station: &Station, kind: AlertKind) -> Result<KindReport> {
        let now = self.clock.now();
        let stock = self.store.station_stock(station.id).await?;
        let current = self.policy.current_subjects(kind, &stock, now);
        let open = self.store.open_tracking(station.id, kind).await?;

        let plan = evaluate(&current, &open, now, self.policy.follow_up);

        let changes = plan.tracking_changes(station.id, kind, now);
        if !changes.is_empty() {
            self.store.apply_tracking(changes).await?;
        }

        let report = KindReport {
            kind,
            raised: plan.new.len(),
            followed_up: plan.due.len(),
            resolved: plan.resolve.len(),
            skipped: plan.recent.len(),
        };

        if report.resolved > 0 {
            metrics::counter!("lending_alerts_resolved_total", "kind" => kind.as_str())
                .increment(report.resolved as u64);
        }

        self.notify(station, kind, &plan, &stock, now).await;

        tracing::debug!(
            station_id = %station.id,
            raised = report.raised,
            followed_up = report.followed_up,
            resolved = report.resolved,
            skipped = report.skipped,
            "escalation run finished"
        );
        Ok(report)
    }

    async fn notify(
        &self,
        station: &Station,
        kind: AlertKind,
        plan: &EscalationPlan,
        stock: &[StationStock],
        now: DateTime<Utc>,
    ) {
        let by_item: HashMap<ItemId, &StationStock> =
            stock.iter().map(|row| (row.item_id, row)).collect();

        let describe = |item_id: ItemId, alert_count: u32| {
            by_item.get(&item_id).map(|row| AlertedItem {
                item_id,
                item_name: row.item_name.clone(),
                quantity: row.quantity,
                faulty_since: row.faulty_since,
                alert_count,
            })
        };

        let batches = [
            (
                Notice::First,
                plan.new
                    .iter()
                    .filter_map(|&id| describe(id, 1))
                    .collect::<Vec<_>>(),
            ),
            (
                Notice::FollowUp,
                plan.due
                    .iter()
                    .filter_map(|f| describe(f.item_id, f.alert_count))
                    .collect::<Vec<_>>(),
            ),
        ];

        for (notice, items) in batches {
            if items.is_empty() {
                continue;
            }
            metrics::counter!(
                "lending_alerts_total",
                "kind" => kind.as_str(),
                "notice" => notice.as_str()
            )
            .increment(items.len() as u64);

            self.dispatcher
                .publish(AlertEvent {
                    station_id: station.id,
                    station_name: station.name.clone(),
                    manager_emails: station.manager_emails.clone(),
                    kind,
                    notice,
                    items,
                    at: now,
                })
                .await;
        }
    }
}
