//! Storage for requests, inventory, custody records and alert tracking.
//!
//! Each concern is its own trait so the escalation engine and the lifecycle
//! controller depend only on what they read. [`LendingStore`] ties them
//! together and adds the two multi-row commits that must be atomic.
//!
//! # Dyn Compatibility
//!
//! Methods return [`StoreFuture`] (a boxed future) instead of using
//! `async fn`, so stores can be shared as `Arc<dyn LendingStore>`.
//!
//! # Concurrency
//!
//! Stock is the contended resource. Implementations never read-modify-write
//! a quantity from application code: every decrement is a guarded in-place
//! update that fails with [`RepositoryError::StockGuard`] instead of going
//! negative, and every request status change is a compare-and-swap on the
//! expected prior status.

use crate::error::RepositoryError;
use crate::token::IssuedToken;
use crate::types::{
    AlertKind, AlertTracking, BorrowRecord, CatalogItem, Condition, EquipmentRequest, ItemId,
    RequestId, RequestItem, RequestStatus, Station, StationId, StationStock, TrackingId,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLendingStore;
pub use postgres::PostgresLendingStore;

/// Future returned by every store method.
pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, RepositoryError>>;

// ============================================================================
// Write models
// ============================================================================

/// A single-row status change guarded by the expected current status.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Request to update
    pub request_id: RequestId,
    /// Status the request must still have
    pub expected: RequestStatus,
    /// New status
    pub to: RequestStatus,
    /// Rejection reason to store, if any
    pub rejected_reason: Option<String>,
    /// Replacement token, if the transition re-issues one
    pub token: Option<IssuedToken>,
    /// Time of the change
    pub at: DateTime<Utc>,
}

impl Transition {
    /// Status change with no other field updates.
    #[must_use]
    pub const fn new(
        request_id: RequestId,
        expected: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            expected,
            to,
            rejected_reason: None,
            token: None,
            at,
        }
    }
}

/// One guarded stock decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDecrement {
    /// Station
    pub station_id: StationId,
    /// Item
    pub item_id: ItemId,
    /// Units to take; the row must hold at least this many and be working
    pub quantity: u32,
}

/// Everything an approval writes, applied in one transaction.
#[derive(Debug, Clone)]
pub struct ApprovalCommit {
    /// Request being approved
    pub request_id: RequestId,
    /// Status the request must still have
    pub expected: RequestStatus,
    /// Status after commit
    pub to: RequestStatus,
    /// Approving manager
    pub approved_by: String,
    /// Approval time
    pub approved_at: DateTime<Utc>,
    /// Stock decrements, one per request item
    pub decrements: Vec<StockDecrement>,
    /// Custody records for reusable items
    pub borrow_records: Vec<BorrowRecord>,
}

/// One stock restore, applied even when the row changed since approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRestore {
    /// Station
    pub station_id: StationId,
    /// Item (catalog entry used if the stock row has to be recreated)
    pub item: CatalogItem,
    /// Units to put back
    pub quantity: u32,
}

/// Identifies the open custody record an undo releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowRelease {
    /// Station
    pub station_id: StationId,
    /// Item
    pub item_id: ItemId,
    /// Borrower phone
    pub borrower_phone: String,
    /// Request that created the record; preferred when several match
    pub request_id: RequestId,
}

/// Everything `undo_pickup` writes, applied in one transaction.
#[derive(Debug, Clone)]
pub struct UndoCommit {
    /// Request being compensated
    pub request_id: RequestId,
    /// Status the request must still have
    pub expected: RequestStatus,
    /// Status after commit
    pub to: RequestStatus,
    /// Stock to restore
    pub restores: Vec<StockRestore>,
    /// Custody records to delete
    pub releases: Vec<BorrowRelease>,
    /// Time of the change
    pub at: DateTime<Utc>,
}

/// Tracking mutations produced by one escalation run.
#[derive(Debug, Clone, Default)]
pub struct TrackingChanges {
    /// Rows to resolve
    pub resolve: Vec<TrackingId>,
    /// New open rows
    pub create: Vec<AlertTracking>,
    /// Rows re-notified now (`last_alert_at = at`, `alert_count += 1`)
    pub renotify: Vec<TrackingId>,
    /// Time of the run
    pub at: DateTime<Utc>,
}

impl TrackingChanges {
    /// Whether there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolve.is_empty() && self.create.is_empty() && self.renotify.is_empty()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Equipment requests and their items.
pub trait RequestRepository: Send + Sync {
    /// Insert a new request with its items.
    fn insert_request(
        &self,
        request: EquipmentRequest,
        items: Vec<RequestItem>,
    ) -> StoreFuture<'_, ()>;

    /// Load a request by id.
    fn load_request(&self, id: RequestId) -> StoreFuture<'_, Option<EquipmentRequest>>;

    /// Load a request's items.
    fn load_items(&self, id: RequestId) -> StoreFuture<'_, Vec<RequestItem>>;

    /// Find the request whose current token hashes to `token_hash`.
    fn find_by_token_hash(&self, token_hash: String)
    -> StoreFuture<'_, Option<EquipmentRequest>>;

    /// Apply a guarded status change. Fails with
    /// [`RepositoryError::Conflict`] if the status moved.
    fn transition(&self, transition: Transition) -> StoreFuture<'_, EquipmentRequest>;

    /// Pending or approved requests whose token lapsed before `now`.
    fn list_expirable(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<EquipmentRequest>>;
}

/// Per-station, per-item stock.
pub trait InventoryLedger: Send + Sync {
    /// Stock of one item at one station.
    fn stock(&self, station_id: StationId, item_id: ItemId)
    -> StoreFuture<'_, Option<StationStock>>;

    /// All stock rows of a station.
    fn station_stock(&self, station_id: StationId) -> StoreFuture<'_, Vec<StationStock>>;

    /// Catalog entry for an item.
    fn catalog_item(&self, item_id: ItemId) -> StoreFuture<'_, Option<CatalogItem>>;

    /// Change the condition of a stock row, maintaining `faulty_since`.
    fn set_condition(
        &self,
        station_id: StationId,
        item_id: ItemId,
        condition: Condition,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, StationStock>;

    /// Add `delta` units (negative to remove), clamping at zero.
    fn adjust_quantity(
        &self,
        station_id: StationId,
        item_id: ItemId,
        delta: i64,
    ) -> StoreFuture<'_, StationStock>;
}

/// Physical custody records.
pub trait BorrowRecordStore: Send + Sync {
    /// All custody records of a station.
    fn borrow_records(&self, station_id: StationId) -> StoreFuture<'_, Vec<BorrowRecord>>;
}

/// Debounce rows for the escalation engine.
pub trait AlertTrackingStore: Send + Sync {
    /// Open rows for a station and alert kind.
    fn open_tracking(
        &self,
        station_id: StationId,
        kind: AlertKind,
    ) -> StoreFuture<'_, Vec<AlertTracking>>;

    /// Apply one run's tracking mutations.
    fn apply_tracking(&self, changes: TrackingChanges) -> StoreFuture<'_, ()>;
}

/// Station lookups.
pub trait StationDirectory: Send + Sync {
    /// One station.
    fn station(&self, id: StationId) -> StoreFuture<'_, Option<Station>>;

    /// Every station.
    fn list_stations(&self) -> StoreFuture<'_, Vec<Station>>;
}

/// The full store used by the lifecycle controller.
pub trait LendingStore:
    RequestRepository + InventoryLedger + BorrowRecordStore + AlertTrackingStore + StationDirectory
{
    /// Apply an approval atomically: every decrement succeeds, every custody
    /// record is written and the status CAS holds, or nothing changes.
    fn commit_approval(&self, commit: ApprovalCommit) -> StoreFuture<'_, EquipmentRequest>;

    /// Apply an undo atomically.
    fn commit_undo_pickup(&self, commit: UndoCommit) -> StoreFuture<'_, EquipmentRequest>;
}
