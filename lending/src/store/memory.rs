//! In-memory store.
//!
//! All tables sit behind one `tokio::sync::Mutex`, so each method (and in
//! particular each commit) is atomic with respect to every other call. Used
//! by tests and by the server when no database is configured.

use super::{
    AlertTrackingStore, ApprovalCommit, BorrowRecordStore, InventoryLedger, LendingStore,
    RequestRepository, StationDirectory, StoreFuture, TrackingChanges, Transition, UndoCommit,
};
use crate::error::RepositoryError;
use crate::types::{
    AlertKind, AlertTracking, BorrowRecord, BorrowStatus, CatalogItem, Condition,
    EquipmentRequest, ItemId, RequestId, RequestItem, RequestStatus, Station, StationId,
    StationStock,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    stations: HashMap<StationId, Station>,
    catalog: HashMap<ItemId, CatalogItem>,
    stock: HashMap<(StationId, ItemId), StationStock>,
    requests: HashMap<RequestId, EquipmentRequest>,
    items: HashMap<RequestId, Vec<RequestItem>>,
    borrows: Vec<BorrowRecord>,
    tracking: Vec<AlertTracking>,
}

impl Tables {
    fn request_mut(&mut self, id: RequestId) -> Result<&mut EquipmentRequest, RepositoryError> {
        self.requests
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::Missing(format!("request {id}")))
    }

    fn check_status(&self, id: RequestId, expected: RequestStatus) -> Result<(), RepositoryError> {
        let request = self
            .requests
            .get(&id)
            .ok_or_else(|| RepositoryError::Missing(format!("request {id}")))?;
        if request.status == expected {
            Ok(())
        } else {
            Err(RepositoryError::Conflict(format!(
                "request {id} is {} (expected {expected})",
                request.status
            )))
        }
    }
}

/// In-memory [`LendingStore`].
#[derive(Debug, Default)]
pub struct InMemoryLendingStore {
    tables: Mutex<Tables>,
}

impl InMemoryLendingStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a station.
    pub async fn add_station(&self, station: Station) {
        self.tables.lock().await.stations.insert(station.id, station);
    }

    /// Register a catalog item.
    pub async fn add_catalog_item(&self, item: CatalogItem) {
        self.tables.lock().await.catalog.insert(item.id, item);
    }

    /// Create or replace a stock row, registering the catalog item too.
    pub async fn put_stock(
        &self,
        station_id: StationId,
        item: &CatalogItem,
        quantity: u32,
        condition: Condition,
        faulty_since: Option<DateTime<Utc>>,
    ) -> StationStock {
        let row = StationStock {
            station_id,
            item_id: item.id,
            item_name: item.name.clone(),
            quantity,
            condition,
            is_consumable: item.is_consumable,
            faulty_since,
        };
        let mut tables = self.tables.lock().await;
        tables.catalog.insert(item.id, item.clone());
        tables.stock.insert((station_id, item.id), row.clone());
        row
    }

    /// Remove a stock row.
    pub async fn remove_stock(&self, station_id: StationId, item_id: ItemId) {
        self.tables.lock().await.stock.remove(&(station_id, item_id));
    }

    /// Insert a tracking row as-is.
    pub async fn put_tracking(&self, row: AlertTracking) {
        self.tables.lock().await.tracking.push(row);
    }

    /// Every tracking row, open or resolved.
    pub async fn tracking_rows(&self) -> Vec<AlertTracking> {
        self.tables.lock().await.tracking.clone()
    }

    /// Every stock row.
    pub async fn all_stock(&self) -> Vec<StationStock> {
        self.tables.lock().await.stock.values().cloned().collect()
    }

    /// Every custody record.
    pub async fn all_borrow_records(&self) -> Vec<BorrowRecord> {
        self.tables.lock().await.borrows.clone()
    }
}

impl RequestRepository for InMemoryLendingStore {
    fn insert_request(
        &self,
        request: EquipmentRequest,
        items: Vec<RequestItem>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            if tables.requests.contains_key(&request.id) {
                return Err(RepositoryError::Conflict(format!(
                    "request {} already exists",
                    request.id
                )));
            }
            let mut seen = std::collections::HashSet::with_capacity(items.len());
            if let Some(dup) = items.iter().find(|line| !seen.insert(line.item_id)) {
                return Err(RepositoryError::Conflict(format!(
                    "item {} listed twice on request {}",
                    dup.item_id, request.id
                )));
            }
            tables.items.insert(request.id, items);
            tables.requests.insert(request.id, request);
            Ok(())
        })
    }

    fn load_request(&self, id: RequestId) -> StoreFuture<'_, Option<EquipmentRequest>> {
        Box::pin(async move { Ok(self.tables.lock().await.requests.get(&id).cloned()) })
    }

    fn load_items(&self, id: RequestId) -> StoreFuture<'_, Vec<RequestItem>> {
        Box::pin(async move {
            Ok(self
                .tables
                .lock()
                .await
                .items
                .get(&id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn find_by_token_hash(
        &self,
        token_hash: String,
    ) -> StoreFuture<'_, Option<EquipmentRequest>> {
        Box::pin(async move {
            Ok(self
                .tables
                .lock()
                .await
                .requests
                .values()
                .find(|r| r.token_hash == token_hash)
                .cloned())
        })
    }

    fn transition(&self, transition: Transition) -> StoreFuture<'_, EquipmentRequest> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            tables.check_status(transition.request_id, transition.expected)?;

            let request = tables.request_mut(transition.request_id)?;
            request.status = transition.to;
            request.updated_at = transition.at;
            if let Some(reason) = transition.rejected_reason {
                request.rejected_reason = Some(reason);
            }
            if let Some(token) = transition.token {
                request.token = token.token;
                request.token_hash = token.token_hash;
                request.expires_at = token.expires_at;
            }
            Ok(request.clone())
        })
    }

    fn list_expirable(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<EquipmentRequest>> {
        Box::pin(async move {
            let tables = self.tables.lock().await;
            let mut overdue: Vec<_> = tables
                .requests
                .values()
                .filter(|r| {
                    matches!(r.status, RequestStatus::Pending | RequestStatus::Approved)
                        && now > r.expires_at
                })
                .cloned()
                .collect();
            overdue.sort_by_key(|r| r.expires_at);
            Ok(overdue)
        })
    }
}

impl InventoryLedger for InMemoryLendingStore {
    fn stock(
        &self,
        station_id: StationId,
        item_id: ItemId,
    ) -> StoreFuture<'_, Option<StationStock>> {
        Box::pin(async move {
            Ok(self
                .tables
                .lock()
                .await
                .stock
                .get(&(station_id, item_id))
                .cloned())
        })
    }

    fn station_stock(&self, station_id: StationId) -> StoreFuture<'_, Vec<StationStock>> {
        Box::pin(async move {
            let tables = self.tables.lock().await;
            let mut rows: Vec<_> = tables
                .stock
                .values()
                .filter(|s| s.station_id == station_id)
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.item_name.cmp(&b.item_name));
            Ok(rows)
        })
    }

    fn catalog_item(&self, item_id: ItemId) -> StoreFuture<'_, Option<CatalogItem>> {
        Box::pin(async move { Ok(self.tables.lock().await.catalog.get(&item_id).cloned()) })
    }

    fn set_condition(
        &self,
        station_id: StationId,
        item_id: ItemId,
        condition: Condition,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, StationStock> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            let row = tables
                .stock
                .get_mut(&(station_id, item_id))
                .ok_or_else(|| RepositoryError::Missing(format!("stock {station_id}/{item_id}")))?;

            match (row.condition, condition) {
                (Condition::Working, Condition::Faulty) => row.faulty_since = Some(at),
                (_, Condition::Working) => row.faulty_since = None,
                (Condition::Faulty, Condition::Faulty) => {},
            }
            row.condition = condition;
            Ok(row.clone())
        })
    }

    fn adjust_quantity(
        &self,
        station_id: StationId,
        item_id: ItemId,
        delta: i64,
    ) -> StoreFuture<'_, StationStock> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            let row = tables
                .stock
                .get_mut(&(station_id, item_id))
                .ok_or_else(|| RepositoryError::Missing(format!("stock {station_id}/{item_id}")))?;

            let next = (i64::from(row.quantity) + delta).clamp(0, i64::from(u32::MAX));
            row.quantity = u32::try_from(next).unwrap_or(u32::MAX);
            Ok(row.clone())
        })
    }
}

impl BorrowRecordStore for InMemoryLendingStore {
    fn borrow_records(&self, station_id: StationId) -> StoreFuture<'_, Vec<BorrowRecord>> {
        Box::pin(async move {
            Ok(self
                .tables
                .lock()
                .await
                .borrows
                .iter()
                .filter(|b| b.station_id == station_id)
                .cloned()
                .collect())
        })
    }
}

impl AlertTrackingStore for InMemoryLendingStore {
    fn open_tracking(
        &self,
        station_id: StationId,
        kind: AlertKind,
    ) -> StoreFuture<'_, Vec<AlertTracking>> {
        Box::pin(async move {
            Ok(self
                .tables
                .lock()
                .await
                .tracking
                .iter()
                .filter(|t| t.station_id == station_id && t.kind == kind && t.is_open())
                .cloned()
                .collect())
        })
    }

    fn apply_tracking(&self, changes: TrackingChanges) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;

            for row in &mut tables.tracking {
                if changes.resolve.contains(&row.id) && row.is_open() {
                    row.resolved_at = Some(changes.at);
                } else if changes.renotify.contains(&row.id) && row.is_open() {
                    row.last_alert_at = changes.at;
                    row.alert_count += 1;
                }
            }

            for row in changes.create {
                let already_open = tables.tracking.iter().any(|t| {
                    t.is_open()
                        && t.station_id == row.station_id
                        && t.kind == row.kind
                        && t.item_id == row.item_id
                });
                if !already_open {
                    tables.tracking.push(row);
                }
            }
            Ok(())
        })
    }
}

impl StationDirectory for InMemoryLendingStore {
    fn station(&self, id: StationId) -> StoreFuture<'_, Option<Station>> {
        Box::pin(async move { Ok(self.tables.lock().await.stations.get(&id).cloned()) })
    }

    fn list_stations(&self) -> StoreFuture<'_, Vec<Station>> {
        Box::pin(async move {
            let mut stations: Vec<_> = self.tables.lock().await.stations.values().cloned().collect();
            stations.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(stations)
        })
    }
}

impl LendingStore for InMemoryLendingStore {
    fn commit_approval(&self, commit: ApprovalCommit) -> StoreFuture<'_, EquipmentRequest> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            tables.check_status(commit.request_id, commit.expected)?;

            // Repeated lines for one row are guarded on their sum.
            let mut totals: HashMap<(StationId, ItemId), u32> = HashMap::new();
            for dec in &commit.decrements {
                let total = totals.entry((dec.station_id, dec.item_id)).or_default();
                *total = total.saturating_add(dec.quantity);
            }

            // Guards first so a failure leaves every row untouched.
            for dec in &commit.decrements {
                let wanted = totals[&(dec.station_id, dec.item_id)];
                let ok = tables
                    .stock
                    .get(&(dec.station_id, dec.item_id))
                    .is_some_and(|s| s.condition == Condition::Working && s.quantity >= wanted);
                if !ok {
                    return Err(RepositoryError::StockGuard {
                        item_id: dec.item_id,
                    });
                }
            }

            for ((station_id, item_id), wanted) in totals {
                if let Some(row) = tables.stock.get_mut(&(station_id, item_id)) {
                    row.quantity = row
                        .quantity
                        .checked_sub(wanted)
                        .ok_or(RepositoryError::StockGuard { item_id })?;
                }
            }
            tables.borrows.extend(commit.borrow_records);

            let request = tables.request_mut(commit.request_id)?;
            request.status = commit.to;
            request.approved_by = Some(commit.approved_by);
            request.approved_at = Some(commit.approved_at);
            request.updated_at = commit.approved_at;
            Ok(request.clone())
        })
    }

    fn commit_undo_pickup(&self, commit: UndoCommit) -> StoreFuture<'_, EquipmentRequest> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            tables.check_status(commit.request_id, commit.expected)?;

            for restore in commit.restores {
                tables
                    .catalog
                    .entry(restore.item.id)
                    .or_insert_with(|| restore.item.clone());
                tables
                    .stock
                    .entry((restore.station_id, restore.item.id))
                    .and_modify(|row| row.quantity = row.quantity.saturating_add(restore.quantity))
                    .or_insert_with(|| StationStock {
                        station_id: restore.station_id,
                        item_id: restore.item.id,
                        item_name: restore.item.name.clone(),
                        quantity: restore.quantity,
                        condition: Condition::Working,
                        is_consumable: restore.item.is_consumable,
                        faulty_since: None,
                    });
            }

            for release in &commit.releases {
                let candidates = tables.borrows.iter().enumerate().filter(|(_, b)| {
                    b.station_id == release.station_id
                        && b.item_id == release.item_id
                        && b.borrower_phone == release.borrower_phone
                        && b.status == BorrowStatus::Borrowed
                });
                // Prefer the record this request created, then the newest.
                let chosen = candidates
                    .max_by_key(|(_, b)| (b.request_id == Some(release.request_id), b.borrow_date))
                    .map(|(idx, _)| idx);
                if let Some(idx) = chosen {
                    tables.borrows.remove(idx);
                }
            }

            let request = tables.request_mut(commit.request_id)?;
            request.status = commit.to;
            request.updated_at = commit.at;
            Ok(request.clone())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::StockDecrement;
    use crate::types::TrackingId;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn item(name: &str, consumable: bool) -> CatalogItem {
        CatalogItem {
            id: ItemId::new(),
            name: name.to_string(),
            is_consumable: consumable,
        }
    }

    fn request(station_id: StationId) -> EquipmentRequest {
        EquipmentRequest {
            id: RequestId::new(),
            station_id,
            requester_name: "Dana".to_string(),
            requester_phone: "+972500000000".to_string(),
            call_id: None,
            status: RequestStatus::Pending,
            token: "t".to_string(),
            token_hash: "h".to_string(),
            expires_at: t0(),
            approved_by: None,
            approved_at: None,
            rejected_reason: None,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    #[tokio::test]
    async fn failed_guard_leaves_everything_untouched() {
        let store = InMemoryLendingStore::new();
        let station = StationId::new();
        let rope = item("rope", false);
        let gloves = item("gloves", true);
        store.put_stock(station, &rope, 1, Condition::Working, None).await;
        store.put_stock(station, &gloves, 1, Condition::Working, None).await;
        let req = request(station);
        store.insert_request(req.clone(), vec![]).await.unwrap();

        let result = store
            .commit_approval(ApprovalCommit {
                request_id: req.id,
                expected: RequestStatus::Pending,
                to: RequestStatus::PickedUp,
                approved_by: "alice".to_string(),
                approved_at: t0(),
                decrements: vec![
                    StockDecrement { station_id: station, item_id: rope.id, quantity: 1 },
                    StockDecrement { station_id: station, item_id: gloves.id, quantity: 3 },
                ],
                borrow_records: vec![],
            })
            .await;

        assert_eq!(result.unwrap_err(), RepositoryError::StockGuard { item_id: gloves.id });
        assert_eq!(store.stock(station, rope.id).await.unwrap().unwrap().quantity, 1);
        let unchanged = store.load_request(req.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn repeated_lines_are_guarded_on_their_sum() {
        let store = InMemoryLendingStore::new();
        let station = StationId::new();
        let rope = item("rope", false);
        store.put_stock(station, &rope, 3, Condition::Working, None).await;
        let req = request(station);
        store.insert_request(req.clone(), vec![]).await.unwrap();

        let result = store
            .commit_approval(ApprovalCommit {
                request_id: req.id,
                expected: RequestStatus::Pending,
                to: RequestStatus::PickedUp,
                approved_by: "alice".to_string(),
                approved_at: t0(),
                decrements: vec![
                    StockDecrement { station_id: station, item_id: rope.id, quantity: 2 },
                    StockDecrement { station_id: station, item_id: rope.id, quantity: 2 },
                ],
                borrow_records: vec![],
            })
            .await;

        assert_eq!(result.unwrap_err(), RepositoryError::StockGuard { item_id: rope.id });
        assert_eq!(store.stock(station, rope.id).await.unwrap().unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn repeated_lines_within_stock_take_the_sum() {
        let store = InMemoryLendingStore::new();
        let station = StationId::new();
        let gloves = item("gloves", true);
        store.put_stock(station, &gloves, 5, Condition::Working, None).await;
        let req = request(station);
        store.insert_request(req.clone(), vec![]).await.unwrap();

        store
            .commit_approval(ApprovalCommit {
                request_id: req.id,
                expected: RequestStatus::Pending,
                to: RequestStatus::PickedUp,
                approved_by: "alice".to_string(),
                approved_at: t0(),
                decrements: vec![
                    StockDecrement { station_id: station, item_id: gloves.id, quantity: 2 },
                    StockDecrement { station_id: station, item_id: gloves.id, quantity: 3 },
                ],
                borrow_records: vec![],
            })
            .await
            .unwrap();

        assert_eq!(store.stock(station, gloves.id).await.unwrap().unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn duplicate_item_lines_are_refused_on_insert() {
        let store = InMemoryLendingStore::new();
        let rope = item("rope", false);
        let req = request(StationId::new());
        let line = RequestItem {
            request_id: req.id,
            item_id: rope.id,
            quantity: 1,
        };

        let result = store.insert_request(req.clone(), vec![line.clone(), line]).await;

        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        assert!(store.load_request(req.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_is_compare_and_swap() {
        let store = InMemoryLendingStore::new();
        let req = request(StationId::new());
        store.insert_request(req.clone(), vec![]).await.unwrap();

        let first = Transition::new(req.id, RequestStatus::Pending, RequestStatus::Rejected, t0());
        store.transition(first.clone()).await.unwrap();
        assert!(matches!(
            store.transition(first).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn condition_changes_maintain_faulty_since() {
        let store = InMemoryLendingStore::new();
        let station = StationId::new();
        let rope = item("rope", false);
        store.put_stock(station, &rope, 3, Condition::Working, None).await;

        let row = store.set_condition(station, rope.id, Condition::Faulty, t0()).await.unwrap();
        assert_eq!(row.faulty_since, Some(t0()));

        let later = t0() + chrono::Duration::days(2);
        let row = store.set_condition(station, rope.id, Condition::Faulty, later).await.unwrap();
        assert_eq!(row.faulty_since, Some(t0()));

        let row = store.set_condition(station, rope.id, Condition::Working, later).await.unwrap();
        assert_eq!(row.faulty_since, None);
    }

    #[tokio::test]
    async fn adjust_quantity_never_goes_negative() {
        let store = InMemoryLendingStore::new();
        let station = StationId::new();
        let rope = item("rope", false);
        store.put_stock(station, &rope, 2, Condition::Working, None).await;

        let row = store.adjust_quantity(station, rope.id, -5).await.unwrap();
        assert_eq!(row.quantity, 0);
        let row = store.adjust_quantity(station, rope.id, 4).await.unwrap();
        assert_eq!(row.quantity, 4);
    }

    #[tokio::test]
    async fn create_skips_subject_that_is_already_open() {
        let store = InMemoryLendingStore::new();
        let station = StationId::new();
        let item_id = ItemId::new();
        let row = AlertTracking {
            id: TrackingId::new(),
            station_id: station,
            kind: AlertKind::LowStock,
            item_id,
            first_alert_at: t0(),
            last_alert_at: t0(),
            alert_count: 1,
            resolved_at: None,
        };
        store.put_tracking(row.clone()).await;

        let duplicate = AlertTracking { id: TrackingId::new(), ..row };
        store
            .apply_tracking(TrackingChanges {
                create: vec![duplicate],
                at: t0(),
                ..TrackingChanges::default()
            })
            .await
            .unwrap();

        assert_eq!(store.tracking_rows().await.len(), 1);
    }
}
