//! Pure transition rules and write planning.
//!
//! Nothing here touches a store. The controller loads rows, asks these
//! functions what to write, then hands the plan to the store as one commit.

use super::actions::LifecycleAction;
use crate::error::{LendingError, Result};
use crate::store::{ApprovalCommit, BorrowRelease, StockDecrement, StockRestore, UndoCommit};
use crate::types::{
    BorrowRecord, BorrowRecordId, BorrowStatus, CatalogItem, Condition, EquipmentRequest,
    RequestItem, RequestStatus, StationStock,
};
use chrono::{DateTime, Utc};

/// Statuses an action may start from.
#[must_use]
pub const fn allowed_from(action: &LifecycleAction) -> &'static [RequestStatus] {
    match action {
        LifecycleAction::Approve | LifecycleAction::Reject { .. } => &[RequestStatus::Pending],
        LifecycleAction::Cancel => &[RequestStatus::Pending, RequestStatus::Approved],
        LifecycleAction::Regenerate => &[RequestStatus::Expired, RequestStatus::Approved],
        LifecycleAction::UndoPickup => &[RequestStatus::PickedUp],
        LifecycleAction::ResendToken => &[
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::PickedUp,
        ],
    }
}

/// Fail with [`LendingError::InvalidTransition`] unless `action` is legal from `from`.
///
/// # Errors
///
/// Returns [`LendingError::InvalidTransition`].
pub fn ensure_allowed(action: &LifecycleAction, from: RequestStatus) -> Result<()> {
    if !from.is_terminal() && allowed_from(action).contains(&from) {
        Ok(())
    } else {
        Err(LendingError::InvalidTransition {
            action: action.name(),
            from,
        })
    }
}

/// Status after `regenerate`: an expired request goes back to pending.
#[must_use]
pub const fn regenerated_status(from: RequestStatus) -> RequestStatus {
    match from {
        RequestStatus::Expired => RequestStatus::Pending,
        other => other,
    }
}

/// Validate every item against its stock row and plan the approval commit.
///
/// All items are checked before anything is planned, so a failure names the
/// first offending item and nothing is written. A reusable item needs at
/// least the requested number of units, which also rules out an empty shelf.
///
/// # Errors
///
/// Returns [`LendingError::NotFound`] for a missing stock row,
/// [`LendingError::EquipmentUnavailable`] for faulty stock and
/// [`LendingError::InsufficientStock`] when too few units are on hand.
pub fn plan_approval(
    request: &EquipmentRequest,
    lines: &[(RequestItem, Option<StationStock>)],
    actor: &str,
    now: DateTime<Utc>,
) -> Result<ApprovalCommit> {
    let mut decrements = Vec::with_capacity(lines.len());
    let mut borrow_records = Vec::new();

    for (item, stock) in lines {
        let stock = stock.as_ref().ok_or_else(|| LendingError::NotFound {
            entity: "stock",
            id: format!("{}/{}", request.station_id, item.item_id),
        })?;

        if stock.condition != Condition::Working {
            return Err(LendingError::EquipmentUnavailable {
                item_id: item.item_id,
                item_name: stock.item_name.clone(),
            });
        }

        if stock.quantity < item.quantity {
            return Err(LendingError::InsufficientStock {
                item_id: item.item_id,
                item_name: stock.item_name.clone(),
                requested: item.quantity,
                available: stock.quantity,
            });
        }

        decrements.push(StockDecrement {
            station_id: request.station_id,
            item_id: item.item_id,
            quantity: item.quantity,
        });

        if !stock.is_consumable {
            borrow_records.push(BorrowRecord {
                id: BorrowRecordId::new(),
                request_id: Some(request.id),
                station_id: request.station_id,
                item_id: item.item_id,
                quantity: item.quantity,
                borrower_name: request.requester_name.clone(),
                borrower_phone: request.requester_phone.clone(),
                status: BorrowStatus::Borrowed,
                borrow_date: now,
                return_date: None,
                return_condition: None,
            });
        }
    }

    Ok(ApprovalCommit {
        request_id: request.id,
        expected: request.status,
        to: RequestStatus::PickedUp,
        approved_by: actor.to_string(),
        approved_at: now,
        decrements,
        borrow_records,
    })
}

/// Plan the compensating writes of `undo_pickup`.
///
/// Restores every requested quantity regardless of the current stock or
/// condition, and releases one open custody record per reusable item.
#[must_use]
pub fn plan_undo(
    request: &EquipmentRequest,
    lines: &[(RequestItem, CatalogItem)],
    now: DateTime<Utc>,
) -> UndoCommit {
    let restores = lines
        .iter()
        .map(|(item, catalog)| StockRestore {
            station_id: request.station_id,
            item: catalog.clone(),
            quantity: item.quantity,
        })
        .collect();

    let releases = lines
        .iter()
        .filter(|(_, catalog)| !catalog.is_consumable)
        .map(|(item, _)| BorrowRelease {
            station_id: request.station_id,
            item_id: item.item_id,
            borrower_phone: request.requester_phone.clone(),
            request_id: request.id,
        })
        .collect();

    UndoCommit {
        request_id: request.id,
        expected: request.status,
        to: RequestStatus::Cancelled,
        restores,
        releases,
        at: now,
    }
}
