//! Which stock rows satisfy an alert condition.

use crate::types::{AlertKind, Condition, ItemId, StationStock};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

/// Thresholds for both alert kinds and the re-notification cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    /// Low stock when `quantity <= low_stock_threshold`
    pub low_stock_threshold: u32,
    /// Faulty equipment once faulty for at least this long
    pub faulty_after: Duration,
    /// Minimum gap between two notices for the same open subject
    pub follow_up: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            low_stock_threshold: 2,
            faulty_after: Duration::days(21),
            follow_up: Duration::days(7),
        }
    }
}

impl AlertPolicy {
    /// Whether `stock` satisfies the `kind` condition at `now`.
    ///
    /// Faulty stock without a recorded `faulty_since` has no known age and
    /// never counts as faulty equipment.
    #[must_use]
    pub fn holds(&self, kind: AlertKind, stock: &StationStock, now: DateTime<Utc>) -> bool {
        match kind {
            AlertKind::LowStock => stock.quantity <= self.low_stock_threshold,
            AlertKind::FaultyEquipment => {
                stock.condition == Condition::Faulty
                    && stock
                        .faulty_since
                        .is_some_and(|since| now - since >= self.faulty_after)
            },
        }
    }

    /// Items of a station currently satisfying the `kind` condition.
    #[must_use]
    pub fn current_subjects(
        &self,
        kind: AlertKind,
        stock: &[StationStock],
        now: DateTime<Utc>,
    ) -> BTreeSet<ItemId> {
        stock
            .iter()
            .filter(|row| self.holds(kind, row, now))
            .map(|row| row.item_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StationId;

    fn row(quantity: u32, condition: Condition, faulty_since: Option<DateTime<Utc>>) -> StationStock {
        StationStock {
            station_id: StationId::new(),
            item_id: ItemId::new(),
            item_name: "gloves".to_string(),
            quantity,
            condition,
            is_consumable: false,
            faulty_since,
        }
    }

    #[test]
    fn low_stock_includes_the_threshold() {
        let policy = AlertPolicy::default();
        let now = Utc::now();
        assert!(policy.holds(AlertKind::LowStock, &row(2, Condition::Working, None), now));
        assert!(policy.holds(AlertKind::LowStock, &row(0, Condition::Working, None), now));
        assert!(!policy.holds(AlertKind::LowStock, &row(3, Condition::Working, None), now));
    }

    #[test]
    fn faulty_equipment_needs_age() {
        let policy = AlertPolicy::default();
        let now = Utc::now();
        let old = row(5, Condition::Faulty, Some(now - Duration::days(21)));
        let young = row(5, Condition::Faulty, Some(now - Duration::days(20)));
        let unknown = row(5, Condition::Faulty, None);
        let working = row(5, Condition::Working, Some(now - Duration::days(30)));

        assert!(policy.holds(AlertKind::FaultyEquipment, &old, now));
        assert!(!policy.holds(AlertKind::FaultyEquipment, &young, now));
        assert!(!policy.holds(AlertKind::FaultyEquipment, &unknown, now));
        assert!(!policy.holds(AlertKind::FaultyEquipment, &working, now));
    }

    #[test]
    fn current_subjects_filters_by_kind() {
        let policy = AlertPolicy::default();
        let now = Utc::now();
        let low = row(1, Condition::Working, None);
        let full = row(9, Condition::Working, None);
        let subjects = policy.current_subjects(AlertKind::LowStock, &[low.clone(), full], now);
        assert_eq!(subjects.into_iter().collect::<Vec<_>>(), vec![low.item_id]);
    }
}
