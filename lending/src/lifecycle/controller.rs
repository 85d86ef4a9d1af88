//! The request state machine.

use super::actions::{
    ActionOutcome, ActionRequest, LifecycleAction, NewRequest, RequestStatusView,
};
use super::plan::{ensure_allowed, plan_approval, plan_undo, regenerated_status};
use crate::authz::Authorizer;
use crate::dispatch::{Dispatcher, RequestChange, RequestEvent};
use crate::error::{LendingError, RepositoryError, Result};
use crate::escalation::EscalationEngine;
use crate::store::{LendingStore, Transition};
use crate::token::{TokenIssuer, hash_token};
use crate::types::{
    AlertKind, CatalogItem, EquipmentRequest, ItemId, RequestId, RequestItem, RequestStatus,
    StationId,
};
use lending_core::environment::Clock;
use std::collections::HashSet;
use std::sync::Arc;

/// Actor recorded for scheduled work.
pub const SYSTEM_ACTOR: &str = "system";

/// Actor recorded for submissions.
pub const REQUESTER_ACTOR: &str = "requester";

/// Runs lifecycle operations against a [`LendingStore`].
///
/// Every manager action checks approve-capability first, then loads the
/// request, then checks the transition table. All three happen before any
/// write. Side effects are published to the [`Dispatcher`] only after the
/// write commits.
pub struct LifecycleController {
    store: Arc<dyn LendingStore>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    tokens: TokenIssuer,
    low_stock_scan: Option<Arc<EscalationEngine>>,
}

impl LifecycleController {
    /// Creates a new `LifecycleController` issuing tokens with the default validity.
    #[must_use]
    pub fn new(
        store: Arc<dyn LendingStore>,
        authorizer: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            store,
            authorizer,
            clock,
            dispatcher,
            tokens: TokenIssuer::default(),
            low_stock_scan: None,
        }
    }

    /// Use `tokens` to issue tokens.
    #[must_use]
    pub const fn with_token_issuer(mut self, tokens: TokenIssuer) -> Self {
        self.tokens = tokens;
        self
    }

    /// Run a low-stock scan of the station after each approval.
    #[must_use]
    pub fn with_low_stock_scan(mut self, engine: Arc<EscalationEngine>) -> Self {
        self.low_stock_scan = Some(engine);
        self
    }

    // ------------------------------------------------------------------
    // Requester operations
    // ------------------------------------------------------------------

    /// Create a pending request and send the requester their status link.
    ///
    /// # Errors
    ///
    /// Returns [`LendingError::Invalid`] for an empty or malformed request and
    /// [`LendingError::NotFound`] for an unknown station or catalog item.
    #[tracing::instrument(skip(self, new), fields(station_id = %new.station_id))]
    pub async fn submit(&self, new: NewRequest) -> Result<ActionOutcome> {
        let result = self.submit_inner(new).await;
        record_outcome("submit", &result);
        result
    }

    async fn submit_inner(&self, new: NewRequest) -> Result<ActionOutcome> {
        validate_new_request(&new)?;

        if self.store.station(new.station_id).await?.is_none() {
            return Err(LendingError::NotFound {
                entity: "station",
                id: new.station_id.to_string(),
            });
        }
        for line in &new.items {
            self.catalog_item(line.item_id).await?;
        }

        let now = self.clock.now();
        let issued = self.tokens.issue(now);
        let request = EquipmentRequest {
            id: RequestId::new(),
            station_id: new.station_id,
            requester_name: new.requester_name.trim().to_string(),
            requester_phone: new.requester_phone.trim().to_string(),
            call_id: new.call_id.filter(|c| !c.trim().is_empty()),
            status: RequestStatus::Pending,
            token: issued.token,
            token_hash: issued.token_hash,
            expires_at: issued.expires_at,
            approved_by: None,
            approved_at: None,
            rejected_reason: None,
            created_at: now,
            updated_at: now,
        };
        let items = new
            .items
            .iter()
            .map(|line| RequestItem {
                request_id: request.id,
                item_id: line.item_id,
                quantity: line.quantity,
            })
            .collect();

        self.store.insert_request(request.clone(), items).await?;
        tracing::info!(request_id = %request.id, "request submitted");

        self.publish(RequestChange::Submitted, REQUESTER_ACTOR, &request)
            .await;
        Ok(ActionOutcome::with_token(&request))
    }

    /// Find the request a presented token belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`LendingError::NotFound`] if no request carries this token
    /// (including a token replaced by `regenerate`) and
    /// [`LendingError::Expired`] if it is past its validity window.
    pub async fn verify(&self, token: &str) -> Result<EquipmentRequest> {
        let request = self
            .store
            .find_by_token_hash(hash_token(token))
            .await?
            .ok_or_else(|| LendingError::NotFound {
                entity: "token",
                id: "presented token".to_string(),
            })?;

        if self.clock.now() > request.expires_at {
            return Err(LendingError::Expired {
                expires_at: request.expires_at,
            });
        }
        Ok(request)
    }

    /// Status page contents for a token holder.
    ///
    /// # Errors
    ///
    /// Same as [`LifecycleController::verify`].
    pub async fn status(&self, token: &str) -> Result<RequestStatusView> {
        let request = self.verify(token).await?;
        let items = self.store.load_items(request.id).await?;
        Ok(RequestStatusView::new(request, items))
    }

    // ------------------------------------------------------------------
    // Manager operations
    // ------------------------------------------------------------------

    /// Approve: commit stock and hand the equipment over.
    ///
    /// # Errors
    ///
    /// See [`LifecycleController::perform`].
    pub async fn approve(
        &self,
        request_id: RequestId,
        actor: &str,
        station_id: StationId,
    ) -> Result<ActionOutcome> {
        self.perform(ActionRequest::new(request_id, station_id, actor, LifecycleAction::Approve))
            .await
    }

    /// Reject a pending request.
    ///
    /// # Errors
    ///
    /// See [`LifecycleController::perform`].
    pub async fn reject(
        &self,
        request_id: RequestId,
        actor: &str,
        station_id: StationId,
        reason: Option<String>,
    ) -> Result<ActionOutcome> {
        self.perform(ActionRequest::new(
            request_id,
            station_id,
            actor,
            LifecycleAction::Reject { reason },
        ))
        .await
    }

    /// Cancel a request that has not been handed over.
    ///
    /// # Errors
    ///
    /// See [`LifecycleController::perform`].
    pub async fn cancel(
        &self,
        request_id: RequestId,
        actor: &str,
        station_id: StationId,
    ) -> Result<ActionOutcome> {
        self.perform(ActionRequest::new(request_id, station_id, actor, LifecycleAction::Cancel))
            .await
    }

    /// Issue a fresh token, reopening an expired request.
    ///
    /// # Errors
    ///
    /// See [`LifecycleController::perform`].
    pub async fn regenerate(
        &self,
        request_id: RequestId,
        actor: &str,
        station_id: StationId,
    ) -> Result<ActionOutcome> {
        self.perform(ActionRequest::new(
            request_id,
            station_id,
            actor,
            LifecycleAction::Regenerate,
        ))
        .await
    }

    /// Compensate a pickup.
    ///
    /// # Errors
    ///
    /// See [`LifecycleController::perform`].
    pub async fn undo_pickup(
        &self,
        request_id: RequestId,
        actor: &str,
        station_id: StationId,
    ) -> Result<ActionOutcome> {
        self.perform(ActionRequest::new(
            request_id,
            station_id,
            actor,
            LifecycleAction::UndoPickup,
        ))
        .await
    }

    /// Send the current token to the requester again.
    ///
    /// # Errors
    ///
    /// See [`LifecycleController::perform`].
    pub async fn resend_token(
        &self,
        request_id: RequestId,
        actor: &str,
        station_id: StationId,
    ) -> Result<ActionOutcome> {
        self.perform(ActionRequest::new(
            request_id,
            station_id,
            actor,
            LifecycleAction::ResendToken,
        ))
        .await
    }

    /// Run one manager action.
    ///
    /// # Errors
    ///
    /// - [`LendingError::Unauthorized`] if the caller may not manage the station
    /// - [`LendingError::NotFound`] if the request does not exist at that station
    /// - [`LendingError::InvalidTransition`] if the action is illegal from the current status
    /// - [`LendingError::EquipmentUnavailable`] / [`LendingError::InsufficientStock`] on approve
    /// - [`LendingError::Storage`] if the store fails
    #[tracing::instrument(
        skip(self, request),
        fields(
            request_id = %request.request_id,
            action = request.action.name(),
            actor = %request.actor_name,
        )
    )]
    pub async fn perform(&self, request: ActionRequest) -> Result<ActionOutcome> {
        let action_name = request.action.name();
        let result = self.perform_inner(request).await;
        record_outcome(action_name, &result);
        result
    }

    async fn perform_inner(&self, request: ActionRequest) -> Result<ActionOutcome> {
        let ActionRequest {
            request_id,
            station_id,
            actor_name,
            action,
        } = request;

        if !self.authorizer.may_approve(&actor_name, station_id) {
            return Err(LendingError::Unauthorized {
                actor: actor_name,
                station_id,
            });
        }

        let current = self
            .store
            .load_request(request_id)
            .await?
            .filter(|r| r.station_id == station_id)
            .ok_or_else(|| LendingError::request_not_found(request_id))?;

        ensure_allowed(&action, current.status)?;

        match action {
            LifecycleAction::Approve => self.do_approve(current, &actor_name).await,
            LifecycleAction::Reject { reason } => {
                let mut transition = Transition::new(
                    current.id,
                    current.status,
                    RequestStatus::Rejected,
                    self.clock.now(),
                );
                transition.rejected_reason.clone_from(&reason);
                let updated = self.transition("reject", transition).await?;
                self.publish(RequestChange::Rejected { reason }, &actor_name, &updated)
                    .await;
                Ok(ActionOutcome::of(&updated))
            },
            LifecycleAction::Cancel => {
                let transition = Transition::new(
                    current.id,
                    current.status,
                    RequestStatus::Cancelled,
                    self.clock.now(),
                );
                let updated = self.transition("cancel", transition).await?;
                self.publish(RequestChange::Cancelled, &actor_name, &updated)
                    .await;
                Ok(ActionOutcome::of(&updated))
            },
            LifecycleAction::Regenerate => {
                let now = self.clock.now();
                let mut transition = Transition::new(
                    current.id,
                    current.status,
                    regenerated_status(current.status),
                    now,
                );
                transition.token = Some(self.tokens.issue(now));
                let updated = self.transition("regenerate", transition).await?;
                self.publish(RequestChange::Regenerated, &actor_name, &updated)
                    .await;
                Ok(ActionOutcome::with_token(&updated))
            },
            LifecycleAction::UndoPickup => self.do_undo_pickup(current, &actor_name).await,
            LifecycleAction::ResendToken => {
                self.publish(RequestChange::TokenResent, &actor_name, &current)
                    .await;
                Ok(ActionOutcome::of(&current))
            },
        }
    }

    async fn do_approve(&self, request: EquipmentRequest, actor: &str) -> Result<ActionOutcome> {
        let items = self.store.load_items(request.id).await?;
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let stock = self.store.stock(request.station_id, item.item_id).await?;
            lines.push((item, stock));
        }

        let now = self.clock.now();
        let commit = plan_approval(&request, &lines, actor, now)?;

        let updated = match self.store.commit_approval(commit).await {
            Ok(updated) => updated,
            Err(RepositoryError::StockGuard { item_id }) => {
                let requested = lines
                    .iter()
                    .find(|(item, _)| item.item_id == item_id)
                    .map_or(0, |(item, _)| item.quantity);
                return Err(self
                    .explain_stock_guard(request.station_id, item_id, requested)
                    .await);
            },
            Err(RepositoryError::Conflict(_)) => {
                return Err(self.explain_conflict("approve", request.id).await);
            },
            Err(other) => return Err(other.into()),
        };

        tracing::info!(request_id = %updated.id, items = lines.len(), "request approved and picked up");
        self.publish(RequestChange::PickedUp, actor, &updated).await;

        if let Some(engine) = &self.low_stock_scan {
            if let Err(error) = engine.run(updated.station_id, AlertKind::LowStock).await {
                tracing::warn!(station_id = %updated.station_id, %error, "low-stock scan after approval failed");
            }
        }

        Ok(ActionOutcome::of(&updated))
    }

    async fn do_undo_pickup(
        &self,
        request: EquipmentRequest,
        actor: &str,
    ) -> Result<ActionOutcome> {
        let items = self.store.load_items(request.id).await?;
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let catalog = self.catalog_item(item.item_id).await?;
            lines.push((item, catalog));
        }

        let commit = plan_undo(&request, &lines, self.clock.now());
        let updated = match self.store.commit_undo_pickup(commit).await {
            Ok(updated) => updated,
            Err(RepositoryError::Conflict(_)) => {
                return Err(self.explain_conflict("undo_pickup", request.id).await);
            },
            Err(other) => return Err(other.into()),
        };

        tracing::info!(request_id = %updated.id, "pickup undone, stock restored");
        self.publish(RequestChange::PickupUndone, actor, &updated)
            .await;
        Ok(ActionOutcome::of(&updated))
    }

    // ------------------------------------------------------------------
    // Scheduled work
    // ------------------------------------------------------------------

    /// Move every pending request whose token lapsed to `expired`.
    ///
    /// Returns the number of requests expired. A request changed concurrently
    /// is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`LendingError::Storage`] if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn expire_overdue(&self) -> Result<usize> {
        let now = self.clock.now();
        let overdue = self.store.list_expirable(now).await?;
        let mut expired = 0;

        for request in overdue {
            let transition =
                Transition::new(request.id, request.status, RequestStatus::Expired, now);
            match self.store.transition(transition).await {
                Ok(updated) => {
                    expired += 1;
                    metrics::counter!("lending_requests_total", "action" => "expire").increment(1);
                    self.publish(RequestChange::Expired, SYSTEM_ACTOR, &updated)
                        .await;
                },
                Err(RepositoryError::Conflict(reason)) => {
                    tracing::debug!(request_id = %request.id, %reason, "skipped expiry");
                },
                Err(other) => return Err(other.into()),
            }
        }

        if expired > 0 {
            tracing::info!(expired, "expired overdue requests");
        }
        Ok(expired)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn transition(
        &self,
        action: &'static str,
        transition: Transition,
    ) -> Result<EquipmentRequest> {
        let request_id = transition.request_id;
        match self.store.transition(transition).await {
            Ok(updated) => Ok(updated),
            Err(RepositoryError::Conflict(_)) => Err(self.explain_conflict(action, request_id).await),
            Err(other) => Err(other.into()),
        }
    }

    async fn catalog_item(&self, item_id: ItemId) -> Result<CatalogItem> {
        self.store
            .catalog_item(item_id)
            .await?
            .ok_or_else(|| LendingError::NotFound {
                entity: "catalog item",
                id: item_id.to_string(),
            })
    }

    /// A status CAS lost: report the status that won.
    async fn explain_conflict(&self, action: &'static str, request_id: RequestId) -> LendingError {
        match self.store.load_request(request_id).await {
            Ok(Some(request)) => LendingError::InvalidTransition {
                action,
                from: request.status,
            },
            Ok(None) => LendingError::request_not_found(request_id),
            Err(error) => error.into(),
        }
    }

    /// A guarded decrement failed: report what the row holds now.
    async fn explain_stock_guard(
        &self,
        station_id: StationId,
        item_id: ItemId,
        requested: u32,
    ) -> LendingError {
        match self.store.stock(station_id, item_id).await {
            Ok(Some(stock)) if stock.condition != crate::types::Condition::Working => {
                LendingError::EquipmentUnavailable {
                    item_id,
                    item_name: stock.item_name,
                }
            },
            Ok(Some(stock)) => LendingError::InsufficientStock {
                item_id,
                item_name: stock.item_name,
                requested,
                available: stock.quantity,
            },
            Ok(None) => LendingError::NotFound {
                entity: "stock",
                id: format!("{station_id}/{item_id}"),
            },
            Err(error) => error.into(),
        }
    }

    async fn publish(&self, change: RequestChange, actor: &str, request: &EquipmentRequest) {
        let event = RequestEvent::new(change, actor, request, self.clock.now());
        self.dispatcher.publish(event).await;
    }
}

fn validate_new_request(new: &NewRequest) -> Result<()> {
    if new.requester_name.trim().is_empty() {
        return Err(LendingError::Invalid("requester name is required".to_string()));
    }
    if new.requester_phone.trim().is_empty() {
        return Err(LendingError::Invalid("requester phone is required".to_string()));
    }
    if new.items.is_empty() {
        return Err(LendingError::Invalid("at least one item is required".to_string()));
    }

    let mut seen = HashSet::with_capacity(new.items.len());
    for line in &new.items {
        if line.quantity < 1 {
            return Err(LendingError::Invalid(format!(
                "quantity for item {} must be at least 1",
                line.item_id
            )));
        }
        if !seen.insert(line.item_id) {
            return Err(LendingError::Invalid(format!(
                "item {} is listed more than once",
                line.item_id
            )));
        }
    }
    Ok(())
}

fn record_outcome<T>(action: &'static str, result: &Result<T>) {
    match result {
        Ok(_) => {
            metrics::counter!("lending_requests_total", "action" => action).increment(1);
        },
        Err(error) => {
            metrics::counter!("lending_lifecycle_rejections_total", "reason" => error.code())
                .increment(1);
            if error.is_retryable() {
                tracing::error!(action, %error, "lifecycle operation failed");
            } else {
                tracing::debug!(action, %error, "lifecycle operation rejected");
            }
        },
    }
}
