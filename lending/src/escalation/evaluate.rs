//! The debounce decision, as a pure function.

use crate::store::TrackingChanges;
use crate::types::{AlertKind, AlertTracking, ItemId, StationId, TrackingId};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// A subject whose cooldown has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUp {
    /// Open row being re-notified
    pub tracking_id: TrackingId,
    /// Subject
    pub item_id: ItemId,
    /// Count after this notice
    pub alert_count: u32,
}

/// Outcome of comparing current subjects with open tracking rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationPlan {
    /// Open rows to resolve (cleared conditions and duplicates)
    pub resolve: Vec<TrackingId>,
    /// Subjects with no open row: first notice
    pub new: Vec<ItemId>,
    /// Subjects past the cooldown: follow-up notice
    pub due: Vec<FollowUp>,
    /// Subjects inside the cooldown: nothing to do
    pub recent: Vec<ItemId>,
}

impl EscalationPlan {
    /// Whether the run sends nothing.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.new.is_empty() && self.due.is_empty()
    }

    /// Tracking writes for this plan.
    #[must_use]
    pub fn tracking_changes(
        &self,
        station_id: StationId,
        kind: AlertKind,
        now: DateTime<Utc>,
    ) -> TrackingChanges {
        TrackingChanges {
            resolve: self.resolve.clone(),
            create: self
                .new
                .iter()
                .map(|&item_id| AlertTracking {
                    id: TrackingId::new(),
                    station_id,
                    kind,
                    item_id,
                    first_alert_at: now,
                    last_alert_at: now,
                    alert_count: 1,
                    resolved_at: None,
                })
                .collect(),
            renotify: self.due.iter().map(|f| f.tracking_id).collect(),
            at: now,
        }
    }
}

/// Decide, per subject, whether to raise, re-notify, skip or resolve.
///
/// `open` should hold only unresolved rows of one station and alert kind;
/// resolved rows are ignored. If several open rows exist for one subject,
/// the most recently notified is kept and the others are resolved.
#[must_use]
pub fn evaluate(
    current: &BTreeSet<ItemId>,
    open: &[AlertTracking],
    now: DateTime<Utc>,
    follow_up: Duration,
) -> EscalationPlan {
    let mut plan = EscalationPlan::default();
    let mut by_subject: BTreeMap<ItemId, &AlertTracking> = BTreeMap::new();

    for row in open.iter().filter(|r| r.is_open()) {
        match by_subject.get(&row.item_id) {
            Some(kept) if (kept.last_alert_at, kept.id) >= (row.last_alert_at, row.id) => {
                plan.resolve.push(row.id);
            },
            Some(kept) => {
                plan.resolve.push(kept.id);
                by_subject.insert(row.item_id, row);
            },
            None => {
                by_subject.insert(row.item_id, row);
            },
        }
    }

    for (item_id, row) in &by_subject {
        if !current.contains(item_id) {
            plan.resolve.push(row.id);
        }
    }

    for &item_id in current {
        match by_subject.get(&item_id) {
            None => plan.new.push(item_id),
            Some(row) if now - row.last_alert_at >= follow_up => plan.due.push(FollowUp {
                tracking_id: row.id,
                item_id,
                alert_count: row.alert_count.saturating_add(1),
            }),
            Some(_) => plan.recent.push(item_id),
        }
    }

    plan
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn open_row(item_id: ItemId, last: DateTime<Utc>, count: u32) -> AlertTracking {
        AlertTracking {
            id: TrackingId::new(),
            station_id: StationId::new(),
            kind: AlertKind::LowStock,
            item_id,
            first_alert_at: last,
            last_alert_at: last,
            alert_count: count,
            resolved_at: None,
        }
    }

    #[test]
    fn new_subject_is_raised() {
        let item = ItemId::new();
        let plan = evaluate(&BTreeSet::from([item]), &[], t0(), Duration::days(7));
        assert_eq!(plan.new, vec![item]);
        assert!(plan.resolve.is_empty());
    }

    #[test]
    fn recent_subject_is_skipped() {
        let item = ItemId::new();
        let row = open_row(item, t0(), 1);
        let plan = evaluate(
            &BTreeSet::from([item]),
            &[row],
            t0() + Duration::days(1),
            Duration::days(7),
        );
        assert!(plan.is_silent());
        assert_eq!(plan.recent, vec![item]);
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        let item = ItemId::new();
        let row = open_row(item, t0(), 1);
        let plan = evaluate(
            &BTreeSet::from([item]),
            &[row.clone()],
            t0() + Duration::days(7),
            Duration::days(7),
        );
        assert_eq!(
            plan.due,
            vec![FollowUp {
                tracking_id: row.id,
                item_id: item,
                alert_count: 2
            }]
        );
    }

    #[test]
    fn cleared_subject_is_resolved_silently() {
        let item = ItemId::new();
        let row = open_row(item, t0(), 3);
        let plan = evaluate(&BTreeSet::new(), &[row.clone()], t0(), Duration::days(7));
        assert_eq!(plan.resolve, vec![row.id]);
        assert!(plan.is_silent());
    }

    #[test]
    fn resolved_rows_are_ignored() {
        let item = ItemId::new();
        let mut row = open_row(item, t0(), 1);
        row.resolved_at = Some(t0());
        let plan = evaluate(&BTreeSet::from([item]), &[row], t0(), Duration::days(7));
        assert_eq!(plan.new, vec![item]);
    }

    #[test]
    fn duplicate_open_rows_keep_latest() {
        let item = ItemId::new();
        let older = open_row(item, t0(), 1);
        let newer = open_row(item, t0() + Duration::days(2), 1);
        let plan = evaluate(
            &BTreeSet::from([item]),
            &[newer.clone(), older.clone()],
            t0() + Duration::days(3),
            Duration::days(7),
        );
        assert_eq!(plan.resolve, vec![older.id]);
        assert_eq!(plan.recent, vec![item]);
    }

    #[test]
    fn changes_create_fresh_rows() {
        let item = ItemId::new();
        let station = StationId::new();
        let plan = evaluate(&BTreeSet::from([item]), &[], t0(), Duration::days(7));
        let changes = plan.tracking_changes(station, AlertKind::FaultyEquipment, t0());

        assert_eq!(changes.create.len(), 1);
        let row = &changes.create[0];
        assert_eq!((row.station_id, row.kind, row.item_id), (station, AlertKind::FaultyEquipment, item));
        assert_eq!((row.alert_count, row.last_alert_at), (1, t0()));
        assert!(row.is_open());
    }

    proptest! {
        #[test]
        fn every_subject_lands_in_exactly_one_bucket(
            current_mask in prop::collection::vec(any::<bool>(), 1..12),
            ages in prop::collection::vec(prop::option::of(0i64..20), 1..12),
        ) {
            let items: Vec<ItemId> = (0..current_mask.len().max(ages.len())).map(|_| ItemId::new()).collect();
            let now = t0() + Duration::days(30);

            let current: BTreeSet<ItemId> = items
                .iter()
                .zip(current_mask.iter())
                .filter(|(_, on)| **on)
                .map(|(id, _)| *id)
                .collect();
            let open: Vec<AlertTracking> = items
                .iter()
                .zip(ages.iter())
                .filter_map(|(id, age)| age.map(|days| open_row(*id, now - Duration::days(days), 1)))
                .collect();

            let plan = evaluate(&current, &open, now, Duration::days(7));

            for item in &current {
                let hits = usize::from(plan.new.contains(item))
                    + plan.due.iter().filter(|f| f.item_id == *item).count()
                    + usize::from(plan.recent.contains(item));
                prop_assert_eq!(hits, 1);
            }

            // A subject still current never has its only open row resolved.
            for row in &open {
                let resolved = plan.resolve.contains(&row.id);
                prop_assert_eq!(resolved, !current.contains(&row.item_id));
            }
        }
    }
}
