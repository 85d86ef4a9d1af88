//! PostgreSQL-backed store.
//!
//! Runtime-checked `sqlx` queries. Stock decrements are single guarded
//! `UPDATE`s and each commit runs in one transaction scoped to the request,
//! so two approvals racing for the last unit serialize on the stock row and
//! exactly one of them sees `rows_affected() == 1`.

use super::{
    AlertTrackingStore, ApprovalCommit, BorrowRecordStore, InventoryLedger, LendingStore,
    RequestRepository, StationDirectory, StoreFuture, TrackingChanges, Transition, UndoCommit,
};
use crate::error::RepositoryError;
use crate::types::{
    AlertKind, AlertTracking, BorrowRecord, BorrowRecordId, CatalogItem, Condition,
    EquipmentRequest, ItemId, RequestId, RequestItem, RequestStatus, Station, StationId,
    StationStock, TrackingId,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

const REQUEST_COLUMNS: &str = "id, station_id, requester_name, requester_phone, call_id, status, \
     token, token_hash, expires_at, approved_by, approved_at, rejected_reason, created_at, updated_at";

const STOCK_SELECT: &str = "SELECT s.station_id, s.item_id, c.name AS item_name, s.quantity, \
     s.condition, s.is_consumable, s.faulty_since \
     FROM station_stock s JOIN catalog_items c ON c.id = s.item_id";

const TRACKING_COLUMNS: &str =
    "id, station_id, alert_kind, item_id, first_alert_at, last_alert_at, alert_count, resolved_at";

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    station_id: Uuid,
    requester_name: String,
    requester_phone: String,
    call_id: Option<String>,
    status: String,
    token: String,
    token_hash: String,
    expires_at: DateTime<Utc>,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    rejected_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for EquipmentRequest {
    type Error = RepositoryError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: RequestId::from_uuid(row.id),
            station_id: StationId::from_uuid(row.station_id),
            requester_name: row.requester_name,
            requester_phone: row.requester_phone,
            call_id: row.call_id,
            status: parse(&row.status)?,
            token: row.token,
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejected_reason: row.rejected_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StockRow {
    station_id: Uuid,
    item_id: Uuid,
    item_name: String,
    quantity: i64,
    condition: String,
    is_consumable: bool,
    faulty_since: Option<DateTime<Utc>>,
}

impl TryFrom<StockRow> for StationStock {
    type Error = RepositoryError;

    fn try_from(row: StockRow) -> Result<Self, Self::Error> {
        Ok(Self {
            station_id: StationId::from_uuid(row.station_id),
            item_id: ItemId::from_uuid(row.item_id),
            item_name: row.item_name,
            quantity: to_u32(row.quantity)?,
            condition: parse(&row.condition)?,
            is_consumable: row.is_consumable,
            faulty_since: row.faulty_since,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BorrowRow {
    id: Uuid,
    request_id: Option<Uuid>,
    station_id: Uuid,
    item_id: Uuid,
    quantity: i64,
    borrower_name: String,
    borrower_phone: String,
    status: String,
    borrow_date: DateTime<Utc>,
    return_date: Option<DateTime<Utc>>,
    return_condition: Option<String>,
}

impl TryFrom<BorrowRow> for BorrowRecord {
    type Error = RepositoryError;

    fn try_from(row: BorrowRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: BorrowRecordId::from_uuid(row.id),
            request_id: row.request_id.map(RequestId::from_uuid),
            station_id: StationId::from_uuid(row.station_id),
            item_id: ItemId::from_uuid(row.item_id),
            quantity: to_u32(row.quantity)?,
            borrower_name: row.borrower_name,
            borrower_phone: row.borrower_phone,
            status: parse(&row.status)?,
            borrow_date: row.borrow_date,
            return_date: row.return_date,
            return_condition: row.return_condition.as_deref().map(parse).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrackingRow {
    id: Uuid,
    station_id: Uuid,
    alert_kind: String,
    item_id: Uuid,
    first_alert_at: DateTime<Utc>,
    last_alert_at: DateTime<Utc>,
    alert_count: i64,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<TrackingRow> for AlertTracking {
    type Error = RepositoryError;

    fn try_from(row: TrackingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TrackingId::from_uuid(row.id),
            station_id: StationId::from_uuid(row.station_id),
            kind: parse(&row.alert_kind)?,
            item_id: ItemId::from_uuid(row.item_id),
            first_alert_at: row.first_alert_at,
            last_alert_at: row.last_alert_at,
            alert_count: to_u32(row.alert_count)?,
            resolved_at: row.resolved_at,
        })
    }
}

fn parse<T>(value: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| RepositoryError::Corrupt(e.to_string()))
}

fn to_u32(value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("out of range: {value}")))
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, RepositoryError>
where
    T: TryFrom<R, Error = RepositoryError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ============================================================================
// Store
// ============================================================================

/// PostgreSQL [`LendingStore`].
#[derive(Clone)]
pub struct PostgresLendingStore {
    pool: Arc<PgPool>,
}

impl PostgresLendingStore {
    /// Creates a new `PostgresLendingStore`.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    /// Run embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns error if a migration fails to apply.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to run migrations: {e}")))
    }

    /// Insert or update a station.
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails.
    pub async fn upsert_station(&self, station: &Station) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO stations (id, name, manager_emails) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, manager_emails = EXCLUDED.manager_emails",
        )
        .bind(station.id.as_uuid())
        .bind(&station.name)
        .bind(&station.manager_emails)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Insert or update a catalog item.
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails.
    pub async fn upsert_catalog_item(&self, item: &CatalogItem) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO catalog_items (id, name, is_consumable) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, is_consumable = EXCLUDED.is_consumable",
        )
        .bind(item.id.as_uuid())
        .bind(&item.name)
        .bind(item.is_consumable)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Create or replace a stock row.
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails.
    pub async fn put_stock(
        &self,
        station_id: StationId,
        item: &CatalogItem,
        quantity: u32,
        condition: Condition,
    ) -> Result<(), RepositoryError> {
        self.upsert_catalog_item(item).await?;
        sqlx::query(
            "INSERT INTO station_stock (station_id, item_id, quantity, condition, is_consumable)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (station_id, item_id) DO UPDATE
             SET quantity = EXCLUDED.quantity, condition = EXCLUDED.condition,
                 is_consumable = EXCLUDED.is_consumable",
        )
        .bind(station_id.as_uuid())
        .bind(item.id.as_uuid())
        .bind(i64::from(quantity))
        .bind(condition.as_str())
        .bind(item.is_consumable)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn fetch_stock(
        &self,
        station_id: StationId,
        item_id: ItemId,
    ) -> Result<Option<StationStock>, RepositoryError> {
        let row: Option<StockRow> =
            sqlx::query_as(&format!("{STOCK_SELECT} WHERE s.station_id = $1 AND s.item_id = $2"))
                .bind(station_id.as_uuid())
                .bind(item_id.as_uuid())
                .fetch_optional(self.pool.as_ref())
                .await?;
        row.map(StationStock::try_from).transpose()
    }

    /// Guarded status update inside a transaction.
    async fn cas_status(
        tx: &mut Transaction<'_, Postgres>,
        request_id: RequestId,
        expected: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE equipment_requests SET status = $3, updated_at = $4
             WHERE id = $1 AND status = $2",
        )
        .bind(request_id.as_uuid())
        .bind(expected.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(RepositoryError::Conflict(format!(
                "request {request_id} is no longer {expected}"
            )))
        }
    }

    async fn fetch_request_in(
        tx: &mut Transaction<'_, Postgres>,
        request_id: RequestId,
    ) -> Result<EquipmentRequest, RepositoryError> {
        let row: RequestRow = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM equipment_requests WHERE id = $1"
        ))
        .bind(request_id.as_uuid())
        .fetch_one(&mut **tx)
        .await?;
        row.try_into()
    }
}

impl RequestRepository for PostgresLendingStore {
    fn insert_request(
        &self,
        request: EquipmentRequest,
        items: Vec<RequestItem>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            sqlx::query(&format!(
                "INSERT INTO equipment_requests ({REQUEST_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
            ))
            .bind(request.id.as_uuid())
            .bind(request.station_id.as_uuid())
            .bind(&request.requester_name)
            .bind(&request.requester_phone)
            .bind(&request.call_id)
            .bind(request.status.as_str())
            .bind(&request.token)
            .bind(&request.token_hash)
            .bind(request.expires_at)
            .bind(&request.approved_by)
            .bind(request.approved_at)
            .bind(&request.rejected_reason)
            .bind(request.created_at)
            .bind(request.updated_at)
            .execute(&mut *tx)
            .await?;

            for item in &items {
                sqlx::query(
                    "INSERT INTO request_items (request_id, item_id, quantity) VALUES ($1, $2, $3)",
                )
                .bind(item.request_id.as_uuid())
                .bind(item.item_id.as_uuid())
                .bind(i64::from(item.quantity))
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        })
    }

    fn load_request(&self, id: RequestId) -> StoreFuture<'_, Option<EquipmentRequest>> {
        Box::pin(async move {
            let row: Option<RequestRow> = sqlx::query_as(&format!(
                "SELECT {REQUEST_COLUMNS} FROM equipment_requests WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await?;
            row.map(EquipmentRequest::try_from).transpose()
        })
    }

    fn load_items(&self, id: RequestId) -> StoreFuture<'_, Vec<RequestItem>> {
        Box::pin(async move {
            let rows: Vec<(Uuid, i64)> = sqlx::query_as(
                "SELECT item_id, quantity FROM request_items WHERE request_id = $1 ORDER BY item_id",
            )
            .bind(id.as_uuid())
            .fetch_all(self.pool.as_ref())
            .await?;

            rows.into_iter()
                .map(|(item_id, quantity)| {
                    Ok(RequestItem {
                        request_id: id,
                        item_id: ItemId::from_uuid(item_id),
                        quantity: to_u32(quantity)?,
                    })
                })
                .collect()
        })
    }

    fn find_by_token_hash(
        &self,
        token_hash: String,
    ) -> StoreFuture<'_, Option<EquipmentRequest>> {
        Box::pin(async move {
            let row: Option<RequestRow> = sqlx::query_as(&format!(
                "SELECT {REQUEST_COLUMNS} FROM equipment_requests WHERE token_hash = $1"
            ))
            .bind(token_hash)
            .fetch_optional(self.pool.as_ref())
            .await?;
            row.map(EquipmentRequest::try_from).transpose()
        })
    }

    fn transition(&self, transition: Transition) -> StoreFuture<'_, EquipmentRequest> {
        Box::pin(async move {
            let (token, token_hash, expires_at) = match transition.token {
                Some(t) => (Some(t.token), Some(t.token_hash), Some(t.expires_at)),
                None => (None, None, None),
            };

            let row: Option<RequestRow> = sqlx::query_as(&format!(
                "UPDATE equipment_requests
                 SET status = $3,
                     updated_at = $4,
                     rejected_reason = COALESCE($5, rejected_reason),
                     token = COALESCE($6, token),
                     token_hash = COALESCE($7, token_hash),
                     expires_at = COALESCE($8, expires_at)
                 WHERE id = $1 AND status = $2
                 RETURNING {REQUEST_COLUMNS}"
            ))
            .bind(transition.request_id.as_uuid())
            .bind(transition.expected.as_str())
            .bind(transition.to.as_str())
            .bind(transition.at)
            .bind(transition.rejected_reason)
            .bind(token)
            .bind(token_hash)
            .bind(expires_at)
            .fetch_optional(self.pool.as_ref())
            .await?;

            match row {
                Some(row) => row.try_into(),
                None => Err(RepositoryError::Conflict(format!(
                    "request {} is no longer {}",
                    transition.request_id, transition.expected
                ))),
            }
        })
    }

    fn list_expirable(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<EquipmentRequest>> {
        Box::pin(async move {
            let rows: Vec<RequestRow> = sqlx::query_as(&format!(
                "SELECT {REQUEST_COLUMNS} FROM equipment_requests
                 WHERE status IN ('pending', 'approved') AND expires_at < $1
                 ORDER BY expires_at"
            ))
            .bind(now)
            .fetch_all(self.pool.as_ref())
            .await?;
            convert_all(rows)
        })
    }
}

impl InventoryLedger for PostgresLendingStore {
    fn stock(
        &self,
        station_id: StationId,
        item_id: ItemId,
    ) -> StoreFuture<'_, Option<StationStock>> {
        Box::pin(self.fetch_stock(station_id, item_id))
    }

    fn station_stock(&self, station_id: StationId) -> StoreFuture<'_, Vec<StationStock>> {
        Box::pin(async move {
            let rows: Vec<StockRow> =
                sqlx::query_as(&format!("{STOCK_SELECT} WHERE s.station_id = $1 ORDER BY c.name"))
                    .bind(station_id.as_uuid())
                    .fetch_all(self.pool.as_ref())
                    .await?;
            convert_all(rows)
        })
    }

    fn catalog_item(&self, item_id: ItemId) -> StoreFuture<'_, Option<CatalogItem>> {
        Box::pin(async move {
            let row: Option<(Uuid, String, bool)> =
                sqlx::query_as("SELECT id, name, is_consumable FROM catalog_items WHERE id = $1")
                    .bind(item_id.as_uuid())
                    .fetch_optional(self.pool.as_ref())
                    .await?;
            Ok(row.map(|(id, name, is_consumable)| CatalogItem {
                id: ItemId::from_uuid(id),
                name,
                is_consumable,
            }))
        })
    }

    fn set_condition(
        &self,
        station_id: StationId,
        item_id: ItemId,
        condition: Condition,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, StationStock> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE station_stock
                 SET faulty_since = CASE
                         WHEN $3 = 'working' THEN NULL
                         WHEN condition = 'working' THEN $4
                         ELSE faulty_since
                     END,
                     condition = $3
                 WHERE station_id = $1 AND item_id = $2",
            )
            .bind(station_id.as_uuid())
            .bind(item_id.as_uuid())
            .bind(condition.as_str())
            .bind(at)
            .execute(self.pool.as_ref())
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::Missing(format!("stock {station_id}/{item_id}")));
            }
            self.fetch_stock(station_id, item_id)
                .await?
                .ok_or_else(|| RepositoryError::Missing(format!("stock {station_id}/{item_id}")))
        })
    }

    fn adjust_quantity(
        &self,
        station_id: StationId,
        item_id: ItemId,
        delta: i64,
    ) -> StoreFuture<'_, StationStock> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE station_stock SET quantity = GREATEST(quantity + $3, 0)
                 WHERE station_id = $1 AND item_id = $2",
            )
            .bind(station_id.as_uuid())
            .bind(item_id.as_uuid())
            .bind(delta)
            .execute(self.pool.as_ref())
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::Missing(format!("stock {station_id}/{item_id}")));
            }
            self.fetch_stock(station_id, item_id)
                .await?
                .ok_or_else(|| RepositoryError::Missing(format!("stock {station_id}/{item_id}")))
        })
    }
}

impl BorrowRecordStore for PostgresLendingStore {
    fn borrow_records(&self, station_id: StationId) -> StoreFuture<'_, Vec<BorrowRecord>> {
        Box::pin(async move {
            let rows: Vec<BorrowRow> = sqlx::query_as(
                "SELECT id, request_id, station_id, item_id, quantity, borrower_name, borrower_phone,
                        status, borrow_date, return_date, return_condition
                 FROM borrow_records WHERE station_id = $1 ORDER BY borrow_date",
            )
            .bind(station_id.as_uuid())
            .fetch_all(self.pool.as_ref())
            .await?;
            convert_all(rows)
        })
    }
}

impl AlertTrackingStore for PostgresLendingStore {
    fn open_tracking(
        &self,
        station_id: StationId,
        kind: AlertKind,
    ) -> StoreFuture<'_, Vec<AlertTracking>> {
        Box::pin(async move {
            let rows: Vec<TrackingRow> = sqlx::query_as(&format!(
                "SELECT {TRACKING_COLUMNS} FROM alert_tracking
                 WHERE station_id = $1 AND alert_kind = $2 AND resolved_at IS NULL"
            ))
            .bind(station_id.as_uuid())
            .bind(kind.as_str())
            .fetch_all(self.pool.as_ref())
            .await?;
            convert_all(rows)
        })
    }

    fn apply_tracking(&self, changes: TrackingChanges) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            let resolve: Vec<Uuid> = changes.resolve.iter().map(|id| *id.as_uuid()).collect();
            if !resolve.is_empty() {
                sqlx::query(
                    "UPDATE alert_tracking SET resolved_at = $2
                     WHERE id = ANY($1) AND resolved_at IS NULL",
                )
                .bind(&resolve)
                .bind(changes.at)
                .execute(&mut *tx)
                .await?;
            }

            let renotify: Vec<Uuid> = changes.renotify.iter().map(|id| *id.as_uuid()).collect();
            if !renotify.is_empty() {
                sqlx::query(
                    "UPDATE alert_tracking SET last_alert_at = $2, alert_count = alert_count + 1
                     WHERE id = ANY($1) AND resolved_at IS NULL",
                )
                .bind(&renotify)
                .bind(changes.at)
                .execute(&mut *tx)
                .await?;
            }

            for row in &changes.create {
                sqlx::query(&format!(
                    "INSERT INTO alert_tracking ({TRACKING_COLUMNS})
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (station_id, alert_kind, item_id) WHERE resolved_at IS NULL
                     DO NOTHING"
                ))
                .bind(row.id.as_uuid())
                .bind(row.station_id.as_uuid())
                .bind(row.kind.as_str())
                .bind(row.item_id.as_uuid())
                .bind(row.first_alert_at)
                .bind(row.last_alert_at)
                .bind(i64::from(row.alert_count))
                .bind(row.resolved_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        })
    }
}

impl StationDirectory for PostgresLendingStore {
    fn station(&self, id: StationId) -> StoreFuture<'_, Option<Station>> {
        Box::pin(async move {
            let row: Option<(Uuid, String, Vec<String>)> =
                sqlx::query_as("SELECT id, name, manager_emails FROM stations WHERE id = $1")
                    .bind(id.as_uuid())
                    .fetch_optional(self.pool.as_ref())
                    .await?;
            Ok(row.map(|(id, name, manager_emails)| Station {
                id: StationId::from_uuid(id),
                name,
                manager_emails,
            }))
        })
    }

    fn list_stations(&self) -> StoreFuture<'_, Vec<Station>> {
        Box::pin(async move {
            let rows: Vec<(Uuid, String, Vec<String>)> =
                sqlx::query_as("SELECT id, name, manager_emails FROM stations ORDER BY name")
                    .fetch_all(self.pool.as_ref())
                    .await?;
            Ok(rows
                .into_iter()
                .map(|(id, name, manager_emails)| Station {
                    id: StationId::from_uuid(id),
                    name,
                    manager_emails,
                })
                .collect())
        })
    }
}

impl LendingStore for PostgresLendingStore {
    fn commit_approval(&self, commit: ApprovalCommit) -> StoreFuture<'_, EquipmentRequest> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            Self::cas_status(
                &mut tx,
                commit.request_id,
                commit.expected,
                commit.to,
                commit.approved_at,
            )
            .await?;

            for dec in &commit.decrements {
                let result = sqlx::query(
                    "UPDATE station_stock SET quantity = quantity - $3
                     WHERE station_id = $1 AND item_id = $2
                       AND quantity >= $3 AND condition = 'working'",
                )
                .bind(dec.station_id.as_uuid())
                .bind(dec.item_id.as_uuid())
                .bind(i64::from(dec.quantity))
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() != 1 {
                    // Dropping `tx` rolls back everything above.
                    return Err(RepositoryError::StockGuard {
                        item_id: dec.item_id,
                    });
                }
            }

            for record in &commit.borrow_records {
                sqlx::query(
                    "INSERT INTO borrow_records (id, request_id, station_id, item_id, quantity,
                         borrower_name, borrower_phone, status, borrow_date, return_date, return_condition)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                )
                .bind(record.id.as_uuid())
                .bind(record.request_id.map(|id| *id.as_uuid()))
                .bind(record.station_id.as_uuid())
                .bind(record.item_id.as_uuid())
                .bind(i64::from(record.quantity))
                .bind(&record.borrower_name)
                .bind(&record.borrower_phone)
                .bind(record.status.as_str())
                .bind(record.borrow_date)
                .bind(record.return_date)
                .bind(record.return_condition.map(Condition::as_str))
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                "UPDATE equipment_requests SET approved_by = $2, approved_at = $3 WHERE id = $1",
            )
            .bind(commit.request_id.as_uuid())
            .bind(&commit.approved_by)
            .bind(commit.approved_at)
            .execute(&mut *tx)
            .await?;

            let request = Self::fetch_request_in(&mut tx, commit.request_id).await?;
            tx.commit().await?;
            Ok(request)
        })
    }

    fn commit_undo_pickup(&self, commit: UndoCommit) -> StoreFuture<'_, EquipmentRequest> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            Self::cas_status(&mut tx, commit.request_id, commit.expected, commit.to, commit.at)
                .await?;

            for restore in &commit.restores {
                sqlx::query(
                    "INSERT INTO catalog_items (id, name, is_consumable) VALUES ($1, $2, $3)
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(restore.item.id.as_uuid())
                .bind(&restore.item.name)
                .bind(restore.item.is_consumable)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO station_stock (station_id, item_id, quantity, condition, is_consumable)
                     VALUES ($1, $2, $3, 'working', $4)
                     ON CONFLICT (station_id, item_id) DO UPDATE
                     SET quantity = station_stock.quantity + EXCLUDED.quantity",
                )
                .bind(restore.station_id.as_uuid())
                .bind(restore.item.id.as_uuid())
                .bind(i64::from(restore.quantity))
                .bind(restore.item.is_consumable)
                .execute(&mut *tx)
                .await?;
            }

            for release in &commit.releases {
                sqlx::query(
                    "DELETE FROM borrow_records WHERE id = (
                         SELECT id FROM borrow_records
                         WHERE station_id = $1 AND item_id = $2 AND borrower_phone = $3
                           AND status = 'borrowed'
                         ORDER BY (request_id IS NOT DISTINCT FROM $4) DESC, borrow_date DESC
                         LIMIT 1
                     )",
                )
                .bind(release.station_id.as_uuid())
                .bind(release.item_id.as_uuid())
                .bind(&release.borrower_phone)
                .bind(release.request_id.as_uuid())
                .execute(&mut *tx)
                .await?;
            }

            let request = Self::fetch_request_in(&mut tx, commit.request_id).await?;
            tx.commit().await?;
            Ok(request)
        })
    }
}
