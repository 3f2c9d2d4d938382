//! Order state machine
//!
//! Owns the canonical status of an order and validates/executes transitions.
//! Every caller (customer API, admin API, SLA scheduler) goes through the
//! same entry points; the adjacency table in [`OrderStatus::allowed_next`] is
//! the single source of truth.
//!
//! # Transition flow
//!
//! ```text
//! transition(order_id, target, actor, ...)
//!     ├─ 1. Load order (NotFound)
//!     ├─ 2. Validate target against allowed_next (InvalidTransition)
//!     ├─ 3. Mutate status + updated_at + lifecycle timestamp
//!     ├─ 4. Conditional save (retry once on ConcurrentModification)
//!     ├─ 5. Audit write
//!     ├─ 6. Invoice sync
//!     └─ 7. Notification emission
//! ```
//!
//! Steps 5-7 run after the state mutation committed; their failures are
//! logged and surfaced as warnings, never rolled back; the transition is the
//! authoritative fact and invoice derivation is idempotent and re-runnable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;
use serde_json::{Value, json};
use shared::util::{HOUR_MS, now_millis, snowflake_id};
use shared::{
    Actor, ActorKind, AuditAction, NotificationIntent, NotificationKind, Offer, Order,
    OrderStatus, Priority, RecipientRole,
};

use crate::audit::{AuditDraft, AuditRecorder};
use crate::config::SharedConfig;
use crate::error::{EngineError, EngineResult};
use crate::invoices::InvoiceLedger;
use crate::notify::Notifier;
use crate::store::{EngineStore, MerchantStore, OrderStore};

/// Result of a successful transition.
///
/// `warnings` carries post-mutation fan-out failures (audit/invoice/notify);
/// the status change itself has already committed.
#[derive(Debug)]
pub struct TransitionOutcome {
    pub order: Order,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct OrderMachine {
    store: Arc<dyn EngineStore>,
    config: SharedConfig,
    audit: Arc<AuditRecorder>,
    ledger: InvoiceLedger,
    notifier: Notifier,
    /// Per-instance order number counter
    order_seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for OrderMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderMachine").finish_non_exhaustive()
    }
}

impl OrderMachine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        config: SharedConfig,
        audit: Arc<AuditRecorder>,
        ledger: InvoiceLedger,
        notifier: Notifier,
    ) -> Self {
        Self {
            store,
            config,
            audit,
            ledger,
            notifier,
            order_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_order_number(&self) -> String {
        let count = self.order_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let date_str = chrono::Utc::now().format("%Y%m%d").to_string();
        format!("ORD{}{}", date_str, 10000 + count)
    }

    // ========== Request / Offer Phase ==========

    /// Create an order from a customer part request (AWAITING_OFFERS).
    pub async fn create_order(
        &self,
        customer: &Actor,
        part_description: impl Into<String>,
    ) -> EngineResult<Order> {
        let part_description = part_description.into();
        if part_description.trim().is_empty() {
            return Err(EngineError::Validation(
                "part description must not be empty".to_string(),
            ));
        }
        let now = now_millis();
        let order = Order::new(
            snowflake_id(),
            self.next_order_number(),
            customer.id,
            part_description,
            now,
        );
        self.store.insert_order(order.clone()).await?;
        self.audit
            .record(
                AuditDraft::new(AuditAction::OrderCreated, "order", order.id.to_string(), customer)
                    .with_states(Value::Null, json!({ "status": order.status })),
            )
            .await?;
        tracing::info!(order_id = order.id, order_number = %order.order_number, "Order created");
        Ok(order)
    }

    /// Record a merchant offer. Only while the order is AWAITING_OFFERS,
    /// only from an ACTIVE merchant, and at most one offer per merchant.
    pub async fn submit_offer(
        &self,
        order_id: i64,
        merchant: &Actor,
        unit_price: Decimal,
        shipping_cost: Decimal,
        condition: Option<String>,
        warranty_months: Option<u32>,
        note: Option<String>,
    ) -> EngineResult<Offer> {
        let order = self.load(order_id).await?;
        if order.status != OrderStatus::AwaitingOffers {
            return Err(EngineError::Validation(format!(
                "order {} is no longer taking offers",
                order.order_number
            )));
        }
        if unit_price <= Decimal::ZERO || shipping_cost < Decimal::ZERO {
            return Err(EngineError::Validation("invalid offer pricing".to_string()));
        }
        self.require_active_merchant(merchant.id).await?;
        let existing = self.store.list_offers_for_order(order_id).await?;
        if existing.iter().any(|o| o.merchant_id == merchant.id) {
            return Err(EngineError::Validation(format!(
                "merchant {} already has an offer on order {}",
                merchant.id, order.order_number
            )));
        }

        let offer = Offer {
            id: snowflake_id(),
            order_id,
            merchant_id: merchant.id,
            unit_price,
            shipping_cost,
            condition,
            warranty_months,
            note,
            submitted_at: now_millis(),
        };
        self.store.insert_offer(offer.clone()).await?;
        self.audit
            .record(
                AuditDraft::new(AuditAction::OfferSubmitted, "order", order_id.to_string(), merchant)
                    .with_details(json!({ "offer_id": offer.id, "unit_price": unit_price })),
            )
            .await?;
        self.notifier.emit(
            NotificationIntent::new(
                order.customer_id,
                RecipientRole::Customer,
                NotificationKind::OfferReceived,
                format!("New offer on order {}", order.order_number),
                format!("/orders/{}", order.id),
            )
            .with_order(order.id),
        );
        Ok(offer)
    }

    /// Accept an offer: binds the merchant and commercial terms and moves the
    /// order to AWAITING_PAYMENT. Rejects offers from non-ACTIVE merchants;
    /// this is the enforcement point for license gating.
    pub async fn accept_offer(
        &self,
        order_id: i64,
        offer_id: i64,
        actor: &Actor,
    ) -> EngineResult<TransitionOutcome> {
        let offer = self
            .store
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("offer {offer_id}")))?;
        if offer.order_id != order_id {
            return Err(EngineError::Validation(format!(
                "offer {offer_id} does not belong to order {order_id}"
            )));
        }
        self.require_active_merchant(offer.merchant_id).await?;

        let commission_rate = self.config.snapshot().commission_rate;
        let total = offer.unit_price + offer.shipping_cost;
        let commission = (commission_rate * total).round_dp(2);

        self.execute(
            order_id,
            OrderStatus::AwaitingPayment,
            actor,
            None,
            json!({ "offer_id": offer_id }),
            false,
            &|order, now| {
                order.merchant_id = Some(offer.merchant_id);
                order.accepted_offer_id = Some(offer.id);
                order.price = Some(offer.unit_price);
                order.shipping_cost = Some(offer.shipping_cost);
                order.commission = Some(commission);
                order.offer_accepted_at = Some(now);
            },
        )
        .await
    }

    // ========== Transitions ==========

    /// Request a status transition.
    ///
    /// Fails with [`EngineError::InvalidTransition`] when `target` is not in
    /// the allowed-next set, [`EngineError::NotFound`] for unknown orders.
    /// `RETURNED → COMPLETED` is an admin-only manual closure.
    pub async fn transition(
        &self,
        order_id: i64,
        target: OrderStatus,
        actor: &Actor,
        reason: Option<String>,
        metadata: Value,
    ) -> EngineResult<TransitionOutcome> {
        self.execute(order_id, target, actor, reason, metadata, false, &|_, _| {})
            .await
    }

    /// Privileged transition past the adjacency table. SuperAdmin only; the
    /// justification is mandatory and persisted as audit metadata. The full
    /// fan-out (audit, invoice sync, notifications) still applies.
    pub async fn force_transition(
        &self,
        order_id: i64,
        target: OrderStatus,
        actor: &Actor,
        justification: &str,
    ) -> EngineResult<TransitionOutcome> {
        if actor.kind != ActorKind::SuperAdmin {
            return Err(EngineError::Unauthorized(
                "force transitions require the super-admin role".to_string(),
            ));
        }
        if justification.trim().is_empty() {
            return Err(EngineError::Validation(
                "force transitions require a justification".to_string(),
            ));
        }
        self.execute(
            order_id,
            target,
            actor,
            Some(justification.to_string()),
            json!({ "forced": true }),
            true,
            &|_, _| {},
        )
        .await
    }

    /// Record logistics details. Allowed from PREPARATION onward; does not
    /// touch the status or `updated_at`.
    pub async fn set_shipping_details(
        &self,
        order_id: i64,
        actor: &Actor,
        waybill_number: String,
        courier: String,
        expected_delivery_at: Option<i64>,
    ) -> EngineResult<Order> {
        let mut order = self.load(order_id).await?;
        if !order.status.reached_preparation() {
            return Err(EngineError::Validation(format!(
                "order {} has no shipment yet",
                order.order_number
            )));
        }
        let expected_version = order.version;
        order.waybill_number = Some(waybill_number.clone());
        order.courier = Some(courier.clone());
        order.expected_delivery_at = expected_delivery_at;
        let saved = self.store.save_order(order, expected_version).await?;
        self.audit
            .record(
                AuditDraft::new(AuditAction::ShippingDetailsSet, "order", order_id.to_string(), actor)
                    .with_details(json!({ "waybill": waybill_number, "courier": courier })),
            )
            .await?;
        Ok(saved)
    }

    // ========== Read Projections ==========

    pub async fn get_order(&self, order_id: i64) -> EngineResult<Order> {
        self.load(order_id).await
    }

    /// Legal next states from the order's current status. Pure projection.
    pub async fn valid_next(&self, order_id: i64) -> EngineResult<Vec<OrderStatus>> {
        Ok(self.load(order_id).await?.status.allowed_next().to_vec())
    }

    /// Milliseconds of SLA budget left for the current status (negative when
    /// overdue); None for states without a deadline.
    pub async fn sla_remaining(&self, order_id: i64) -> EngineResult<Option<i64>> {
        let order = self.load(order_id).await?;
        let sla = self.config.snapshot().sla;
        let Some(hours) = sla.hours_for(order.status) else {
            return Ok(None);
        };
        let anchor = sla_anchor(&order);
        Ok(Some(anchor + hours * HOUR_MS - now_millis()))
    }

    // ========== Internals ==========

    async fn load(&self, order_id: i64) -> EngineResult<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))
    }

    async fn require_active_merchant(&self, merchant_id: i64) -> EngineResult<()> {
        let merchant = self
            .store
            .get_merchant(merchant_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("merchant {merchant_id}")))?;
        if !merchant.is_active() {
            return Err(EngineError::Validation(format!(
                "merchant {} is not active ({:?})",
                merchant.name, merchant.status
            )));
        }
        Ok(())
    }

    /// Read-validate-mutate-write with one automatic retry on a version
    /// conflict; the retry re-reads and re-validates against the state the
    /// first writer produced.
    async fn execute(
        &self,
        order_id: i64,
        target: OrderStatus,
        actor: &Actor,
        reason: Option<String>,
        metadata: Value,
        forced: bool,
        mutate: &(dyn Fn(&mut Order, i64) + Sync),
    ) -> EngineResult<TransitionOutcome> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .try_execute(order_id, target, actor, reason.clone(), metadata.clone(), forced, mutate)
                .await
            {
                Err(EngineError::ConcurrentModification(msg)) if attempts == 1 => {
                    tracing::debug!(order_id, %msg, "Version conflict, retrying transition once");
                    continue;
                }
                other => return other,
            }
        }
    }

    async fn try_execute(
        &self,
        order_id: i64,
        target: OrderStatus,
        actor: &Actor,
        reason: Option<String>,
        metadata: Value,
        forced: bool,
        mutate: &(dyn Fn(&mut Order, i64) + Sync),
    ) -> EngineResult<TransitionOutcome> {
        let mut order = self.load(order_id).await?;
        let from = order.status;

        if !forced {
            if !from.allowed_next().contains(&target) {
                return Err(EngineError::InvalidTransition { from, to: target });
            }
            // Manual closure of a completed return is reserved for admins.
            if from == OrderStatus::Returned
                && target == OrderStatus::Completed
                && !actor.kind.is_admin()
            {
                return Err(EngineError::Unauthorized(
                    "closing a returned order is an admin action".to_string(),
                ));
            }
        }

        // --- 1. State mutation ---
        let now = now_millis();
        let expected_version = order.version;
        mutate(&mut order, now);
        order.status = target;
        order.updated_at = now;
        match target {
            OrderStatus::Shipped => order.shipped_at = Some(now),
            OrderStatus::Delivered => order.delivered_at = Some(now),
            _ => {}
        }
        let saved = self.store.save_order(order, expected_version).await?;

        tracing::info!(
            order_id,
            from = ?from,
            to = ?target,
            actor = %actor.name,
            forced,
            "Order transition"
        );

        // --- 2-4. Fan-out: audit → invoice sync → notification ---
        // Failures here never roll the transition back; derivation is
        // idempotent and re-run by the next scheduler tick.
        let mut warnings = Vec::new();

        let action = if forced {
            AuditAction::OrderForceTransition
        } else {
            AuditAction::OrderTransition
        };
        let mut draft = AuditDraft::new(action, "order", order_id.to_string(), actor)
            .with_states(json!({ "status": from }), json!({ "status": target }))
            .with_details(metadata);
        if let Some(reason) = &reason {
            draft = draft.with_reason(reason.clone());
        }
        if let Err(e) = self.audit.record(draft).await {
            tracing::warn!(order_id, error = %e, "Audit write failed after transition");
            warnings.push(format!("audit write failed: {e}"));
        }

        if let Err(e) = self.ledger.sync_order(&saved).await {
            tracing::warn!(order_id, error = %e, "Invoice sync failed after transition");
            warnings.push(format!("invoice sync failed: {e}"));
        }

        self.emit_transition_notifications(&saved, from, target);

        Ok(TransitionOutcome {
            order: saved,
            warnings,
        })
    }

    fn emit_transition_notifications(&self, order: &Order, from: OrderStatus, target: OrderStatus) {
        let (kind, priority) = match target {
            OrderStatus::Cancelled => (NotificationKind::OrderCancelled, Priority::High),
            OrderStatus::AwaitingPayment => (NotificationKind::OfferAccepted, Priority::Normal),
            _ => (NotificationKind::OrderStatusChanged, Priority::Normal),
        };
        let message = format!(
            "Order {}: {:?} -> {:?}",
            order.order_number, from, target
        );
        let link = format!("/orders/{}", order.id);

        self.notifier.emit(
            NotificationIntent::new(order.customer_id, RecipientRole::Customer, kind, &message, &link)
                .with_order(order.id)
                .with_priority(priority),
        );
        if let Some(merchant_id) = order.merchant_id {
            self.notifier.emit(
                NotificationIntent::new(merchant_id, RecipientRole::Merchant, kind, &message, &link)
                    .with_order(order.id)
                    .with_priority(priority),
            );
        }
    }
}

/// Timestamp the SLA budget for the current status counts from.
pub(crate) fn sla_anchor(order: &Order) -> i64 {
    match order.status {
        OrderStatus::AwaitingOffers => order.created_at,
        // Payment and preparation deadlines both count from acceptance.
        OrderStatus::AwaitingPayment | OrderStatus::Preparation => {
            order.offer_accepted_at.unwrap_or(order.updated_at)
        }
        OrderStatus::Shipped => order.shipped_at.unwrap_or(order.updated_at),
        OrderStatus::Delivered => order.delivered_at.unwrap_or(order.updated_at),
        _ => order.updated_at,
    }
}

#[cfg(test)]
mod tests;
