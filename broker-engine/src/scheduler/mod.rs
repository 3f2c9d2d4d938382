//! SLA scheduler
//!
//! Single periodic loop that enforces time-based rules over orders, cases and
//! merchants. Each tick runs a full sweep; a poke channel lets callers request
//! an immediate re-evaluation of one order after an external change.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ tick (interval from config, hot-reloadable) │
//! └──────────────────┬──────────────────────────┘
//!                    ▼
//!            sweep(now)
//!              ├─ 0. invoice resync for open orders
//!              ├─ 1. cancel unpaid orders past SLA
//!              ├─ 2. preparation-delay alerts (dedup per day)
//!              ├─ 3. merchant license expiry
//!              └─ 4. escalate cases past the merchant deadline
//! ```
//!
//! Rules are independent: a failing candidate is logged and skipped, the
//! sweep continues. All thresholds come from the shared SLA table.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use shared::util::{HOUR_MS, day_label, now_millis};
use shared::{
    Actor, AuditAction, MerchantStatus, NotificationIntent, NotificationKind, Order, OrderStatus,
    Priority, RecipientRole,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditDraft, AuditRecorder};
use crate::cases::CaseMachine;
use crate::config::SharedConfig;
use crate::error::EngineResult;
use crate::invoices::InvoiceLedger;
use crate::notify::Notifier;
use crate::orders::{OrderMachine, sla_anchor};
use crate::store::{CaseStore, EngineStore, MerchantStore, OrderStore};

/// Order states the resync pass covers: past PREPARATION, not yet terminal.
const OPEN_BILLABLE: [OrderStatus; 5] = [
    OrderStatus::Preparation,
    OrderStatus::Shipped,
    OrderStatus::Delivered,
    OrderStatus::Disputed,
    OrderStatus::Returned,
];

#[derive(Clone)]
pub struct SlaScheduler {
    store: Arc<dyn EngineStore>,
    config: SharedConfig,
    audit: Arc<AuditRecorder>,
    ledger: InvoiceLedger,
    notifier: Notifier,
    orders: OrderMachine,
    cases: CaseMachine,
    /// Alert dedup: (entity id, rule) -> day the alert was last raised.
    alerted: Arc<DashMap<(i64, &'static str), String>>,
}

impl std::fmt::Debug for SlaScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaScheduler").finish_non_exhaustive()
    }
}

impl SlaScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn EngineStore>,
        config: SharedConfig,
        audit: Arc<AuditRecorder>,
        ledger: InvoiceLedger,
        notifier: Notifier,
        orders: OrderMachine,
        cases: CaseMachine,
    ) -> Self {
        Self {
            store,
            config,
            audit,
            ledger,
            notifier,
            orders,
            cases,
            alerted: Arc::new(DashMap::new()),
        }
    }

    /// Periodic loop. Re-reads the interval every tick so a config update
    /// takes effect without a restart.
    pub async fn run(self, shutdown: CancellationToken, mut poke_rx: mpsc::Receiver<i64>) {
        tracing::info!("SLA scheduler started");
        loop {
            let interval = self.config.snapshot().sweep_interval_secs;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("SLA scheduler shutting down");
                    break;
                }
                Some(order_id) = poke_rx.recv() => {
                    self.reevaluate(order_id).await;
                }
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                    self.sweep(now_millis()).await;
                }
            }
        }
    }

    /// Re-run the invoice derivation for one order right now, without waiting
    /// for the next tick.
    pub async fn reevaluate(&self, order_id: i64) {
        match self.store.get_order(order_id).await {
            Ok(Some(order)) => {
                if let Err(e) = self.ledger.sync_order(&order).await {
                    tracing::warn!(order_id, error = %e, "Poked invoice resync failed");
                }
            }
            Ok(None) => tracing::warn!(order_id, "Poked order not found"),
            Err(e) => tracing::error!(order_id, error = %e, "Poked order load failed"),
        }
    }

    /// One full sweep at the given timestamp. Public so the rules can be
    /// exercised at controlled times.
    pub async fn sweep(&self, now: i64) {
        let sla = self.config.snapshot().sla;

        self.resync_invoices().await;
        self.cancel_unpaid(now, sla.awaiting_payment_hours).await;
        self.alert_preparation_delays(now, sla.preparation_hours).await;
        self.expire_merchant_licenses(now).await;
        self.escalate_stale_cases(now).await;
    }

    // ========== Rule 0: invoice resync ==========

    async fn resync_invoices(&self) {
        let orders = match self.store.list_orders_in(&OPEN_BILLABLE).await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(error = %e, "Order listing failed, skipping resync pass");
                return;
            }
        };
        for order in orders {
            if let Err(e) = self.ledger.sync_order(&order).await {
                tracing::warn!(order_id = order.id, error = %e, "Invoice resync failed");
            }
        }
    }

    // ========== Rule 1: unpaid timeout ==========

    async fn cancel_unpaid(&self, now: i64, window_hours: i64) {
        let candidates = match self
            .store
            .list_orders_in(&[OrderStatus::AwaitingPayment])
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(error = %e, "Order listing failed, skipping unpaid pass");
                return;
            }
        };
        for order in candidates {
            if !overdue(&order, now, window_hours) {
                continue;
            }
            match self
                .orders
                .transition(
                    order.id,
                    OrderStatus::Cancelled,
                    &Actor::system(),
                    Some("unpaid timeout".to_string()),
                    json!({ "window_hours": window_hours }),
                )
                .await
            {
                Ok(_) => {
                    tracing::info!(
                        order_id = order.id,
                        order_number = %order.order_number,
                        "Unpaid order cancelled"
                    );
                }
                Err(e) => {
                    tracing::warn!(order_id = order.id, error = %e, "Unpaid cancellation failed");
                }
            }
        }
    }

    // ========== Rule 2: preparation delay ==========

    async fn alert_preparation_delays(&self, now: i64, window_hours: i64) {
        let candidates = match self.store.list_orders_in(&[OrderStatus::Preparation]).await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(error = %e, "Order listing failed, skipping delay pass");
                return;
            }
        };
        let today = day_label(now);
        // Evict dedup entries from other days or for orders that left
        // PREPARATION, so the map tracks only live candidates.
        let in_preparation: HashSet<i64> = candidates.iter().map(|o| o.id).collect();
        self.alerted
            .retain(|(order_id, _), day| *day == today && in_preparation.contains(order_id));

        for order in candidates {
            if !overdue(&order, now, window_hours) {
                continue;
            }
            // At most one alert per order per day.
            let key = (order.id, "prep_delay");
            if self.alerted.contains_key(&key) {
                continue;
            }
            if let Err(e) = self.raise_alert(&order, now, window_hours).await {
                tracing::warn!(order_id = order.id, error = %e, "Delay alert failed");
                continue;
            }
            self.alerted.insert(key, today.clone());
        }
    }

    async fn raise_alert(&self, order: &Order, now: i64, window_hours: i64) -> EngineResult<()> {
        self.audit
            .record(
                AuditDraft::new(
                    AuditAction::SlaAlertRaised,
                    "order",
                    order.id.to_string(),
                    &Actor::system(),
                )
                .with_reason("preparation window exceeded")
                .with_details(json!({
                    "window_hours": window_hours,
                    "overdue_ms": now - sla_anchor(order),
                })),
            )
            .await?;
        self.notifier.emit(
            NotificationIntent::new(
                0,
                RecipientRole::Admin,
                NotificationKind::PreparationDelayed,
                format!(
                    "Order {} stuck in preparation past the {}h window",
                    order.order_number, window_hours
                ),
                format!("/admin/orders/{}", order.id),
            )
            .with_order(order.id)
            .with_priority(Priority::High),
        );
        Ok(())
    }

    // ========== Rule 3: license expiry ==========

    async fn expire_merchant_licenses(&self, now: i64) {
        let merchants = match self.store.list_merchants().await {
            Ok(merchants) => merchants,
            Err(e) => {
                tracing::error!(error = %e, "Merchant listing failed, skipping license pass");
                return;
            }
        };
        for mut merchant in merchants {
            let expired = merchant.license_expires_at.is_some_and(|at| at < now);
            if !expired
                || matches!(
                    merchant.status,
                    MerchantStatus::LicenseExpired | MerchantStatus::Blocked
                )
            {
                continue;
            }
            let merchant_id = merchant.id;
            merchant.status = MerchantStatus::LicenseExpired;
            merchant.updated_at = now;
            let expected_version = merchant.version;
            if let Err(e) = self.store.save_merchant(merchant, expected_version).await {
                tracing::warn!(merchant_id, error = %e, "License expiry save failed");
                continue;
            }
            if let Err(e) = self
                .audit
                .record(
                    AuditDraft::new(
                        AuditAction::MerchantLicenseExpired,
                        "merchant",
                        merchant_id.to_string(),
                        &Actor::system(),
                    )
                    .with_states(json!("ACTIVE"), json!("LICENSE_EXPIRED")),
                )
                .await
            {
                tracing::warn!(merchant_id, error = %e, "License expiry audit failed");
            }
            self.notifier.emit(
                NotificationIntent::new(
                    merchant_id,
                    RecipientRole::Merchant,
                    NotificationKind::LicenseExpired,
                    "Your trading license has expired, offers are suspended",
                    "/merchant/license",
                )
                .with_priority(Priority::Urgent),
            );
            tracing::info!(merchant_id, "Merchant license expired");
        }
    }

    // ========== Rule 4: case escalation ==========

    async fn escalate_stale_cases(&self, now: i64) {
        let candidates = match self
            .store
            .list_cases_in(&[shared::CaseStatus::AwaitingMerchant])
            .await
        {
            Ok(cases) => cases,
            Err(e) => {
                tracing::error!(error = %e, "Case listing failed, skipping escalation pass");
                return;
            }
        };
        for case in candidates {
            if !case.deadline.is_some_and(|d| d < now) {
                continue;
            }
            match self
                .cases
                .escalate(case.id, &Actor::system(), "no merchant response timeout")
                .await
            {
                Ok(_) => {
                    tracing::info!(case_id = case.id, case_number = %case.case_number, "Stale case escalated");
                }
                // A concurrent merchant response makes the case ineligible;
                // that is the race resolving itself, not a failure.
                Err(e) if e.is_business_rule() => {
                    tracing::debug!(case_id = case.id, error = %e, "Escalation skipped");
                }
                Err(e) => {
                    tracing::warn!(case_id = case.id, error = %e, "Escalation failed");
                }
            }
        }
    }
}

/// Whether the order's SLA window for its current state has elapsed.
fn overdue(order: &Order, now: i64, window_hours: i64) -> bool {
    sla_anchor(order) + window_hours * HOUR_MS < now
}
