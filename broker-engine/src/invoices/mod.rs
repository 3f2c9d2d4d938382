//! Invoice ledger
//!
//! Pure-derivation component: invoices are recomputed from order/case state,
//! never patched incrementally. Derivation is idempotent: ids come from the
//! order number and timestamps from lifecycle fields, so regenerating over
//! unchanged state yields identical records.
//!
//! Payout invoices are the one exception: they are created out-of-band for
//! merchant settlements and move PENDING → PAID only through an explicit,
//! audited admin action.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use shared::util::{now_millis, snowflake_id};
use shared::{
    Actor, AuditAction, Invoice, InvoiceKind, InvoiceStatus, Order, OrderStatus, ResolutionCase,
};

use crate::audit::{AuditDraft, AuditRecorder};
use crate::config::SharedConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::{CaseStore, EngineStore, InvoiceStore};

#[derive(Clone)]
pub struct InvoiceLedger {
    store: Arc<dyn EngineStore>,
    config: SharedConfig,
    audit: Arc<AuditRecorder>,
}

impl std::fmt::Debug for InvoiceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceLedger").finish_non_exhaustive()
    }
}

impl InvoiceLedger {
    pub fn new(
        store: Arc<dyn EngineStore>,
        config: SharedConfig,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            store,
            config,
            audit,
        }
    }

    // ========== Derivation ==========

    /// Recompute the derived invoices for an order and upsert them.
    ///
    /// Safe to call repeatedly; the scheduler's tick re-runs it for open
    /// orders, which is also the retry path after a derivation failure.
    pub async fn sync_order(&self, order: &Order) -> EngineResult<Vec<Invoice>> {
        let active_case = self.store.find_active_case_for_order(order.id).await?;
        let derived = self.derive(order, active_case.as_ref());
        for invoice in &derived {
            self.store.upsert_invoice(invoice.clone()).await?;
        }
        Ok(derived)
    }

    /// Pure derivation of invoice records from order/case state.
    pub fn derive(&self, order: &Order, active_case: Option<&ResolutionCase>) -> Vec<Invoice> {
        if !order.status.reached_preparation() {
            return Vec::new();
        }
        let config = self.config.snapshot();
        let price = order.price.unwrap_or_default();
        let shipping = order.shipping_cost.unwrap_or_default();
        let mut invoices = Vec::with_capacity(3);

        // --- Customer invoice: exists from PREPARATION onward ---
        let frozen = order.status == OrderStatus::Disputed
            || active_case.is_some_and(|c| c.status.freezes_invoice());
        let customer_status = if frozen {
            InvoiceStatus::Frozen
        } else if matches!(order.status, OrderStatus::Returned | OrderStatus::Refunded) {
            InvoiceStatus::Refunded
        } else {
            InvoiceStatus::Paid
        };
        let total = price + shipping;
        let tax = (price - price / (Decimal::ONE + config.tax_rate)).round_dp(2);
        invoices.push(Invoice {
            id: format!("INV-{}-CUST", order.order_number),
            kind: InvoiceKind::CustomerInvoice,
            order_id: Some(order.id),
            merchant_id: order.merchant_id,
            subtotal: price,
            tax,
            shipping,
            total,
            status: customer_status,
            issued_at: order.offer_accepted_at.unwrap_or(order.created_at),
        });

        // --- Shipping invoice: exists once the order has shipped ---
        if let Some(shipped_at) = order.shipped_at {
            invoices.push(Invoice {
                id: format!("INV-{}-SHIP", order.order_number),
                kind: InvoiceKind::ShippingInvoice,
                order_id: Some(order.id),
                merchant_id: order.merchant_id,
                subtotal: shipping,
                tax: Decimal::ZERO,
                shipping: Decimal::ZERO,
                total: shipping,
                status: InvoiceStatus::Paid,
                issued_at: shipped_at,
            });
        }

        // --- Commission invoice: exists once delivered ---
        if let Some(delivered_at) = order.delivered_at {
            let commission = order
                .commission
                .unwrap_or_else(|| (config.commission_rate * total).round_dp(2));
            // Commission is tax-inclusive; back the rate out of the total.
            let base = (commission / (Decimal::ONE + config.tax_rate)).round_dp(2);
            let commission_status = match order.status {
                OrderStatus::Completed => InvoiceStatus::Paid,
                OrderStatus::Returned | OrderStatus::Refunded => InvoiceStatus::Failed,
                _ => InvoiceStatus::Pending,
            };
            invoices.push(Invoice {
                id: format!("INV-{}-COMM", order.order_number),
                kind: InvoiceKind::CommissionInvoice,
                order_id: Some(order.id),
                merchant_id: order.merchant_id,
                subtotal: base,
                tax: commission - base,
                shipping: Decimal::ZERO,
                total: commission,
                status: commission_status,
                issued_at: delivered_at,
            });
        }

        invoices
    }

    // ========== Partial refunds ==========

    /// Append the compensating credit record for a partial-refund verdict.
    ///
    /// Written once at verdict time; not part of the regenerated set because
    /// it derives from the case's immutable admin decision.
    pub async fn apply_partial_refund(
        &self,
        order: &Order,
        amount: Decimal,
        decided_at: i64,
    ) -> EngineResult<Invoice> {
        let config = self.config.snapshot();
        let tax = (amount - amount / (Decimal::ONE + config.tax_rate)).round_dp(2);
        let credit = Invoice {
            id: format!("INV-{}-CREDIT", order.order_number),
            kind: InvoiceKind::CustomerInvoice,
            order_id: Some(order.id),
            merchant_id: order.merchant_id,
            subtotal: amount,
            tax,
            shipping: Decimal::ZERO,
            total: amount,
            status: InvoiceStatus::Refunded,
            issued_at: decided_at,
        };
        self.store.upsert_invoice(credit.clone()).await?;
        Ok(credit)
    }

    // ========== Payouts ==========

    /// Create a merchant settlement payout (PENDING).
    pub async fn create_payout(
        &self,
        merchant_id: i64,
        amount: Decimal,
        actor: &Actor,
    ) -> EngineResult<Invoice> {
        if !actor.kind.is_admin() {
            return Err(EngineError::Unauthorized(
                "only admins may create payouts".to_string(),
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "payout amount must be positive".to_string(),
            ));
        }
        let payout = Invoice {
            id: format!("PAY-{}", snowflake_id()),
            kind: InvoiceKind::PayoutInvoice,
            order_id: None,
            merchant_id: Some(merchant_id),
            subtotal: amount,
            tax: Decimal::ZERO,
            shipping: Decimal::ZERO,
            total: amount,
            status: InvoiceStatus::Pending,
            issued_at: now_millis(),
        };
        self.store.upsert_invoice(payout.clone()).await?;
        self.audit
            .record(
                AuditDraft::new(AuditAction::PayoutCreated, "invoice", &payout.id, actor)
                    .with_details(json!({ "merchant_id": merchant_id, "amount": amount })),
            )
            .await?;
        tracing::info!(payout_id = %payout.id, merchant_id, %amount, "Payout created");
        Ok(payout)
    }

    /// Mark a payout PAID. Irreversible; audited as a financial action.
    pub async fn mark_payout_paid(&self, payout_id: &str, actor: &Actor) -> EngineResult<Invoice> {
        if !actor.kind.is_admin() {
            return Err(EngineError::Unauthorized(
                "only admins may settle payouts".to_string(),
            ));
        }
        let mut payout = self
            .store
            .get_invoice(payout_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("invoice {payout_id}")))?;
        if payout.kind != InvoiceKind::PayoutInvoice {
            return Err(EngineError::Validation(format!(
                "{payout_id} is not a payout invoice"
            )));
        }
        if payout.status != InvoiceStatus::Pending {
            return Err(EngineError::Validation(format!(
                "payout {payout_id} is not pending (already settled?)"
            )));
        }
        payout.status = InvoiceStatus::Paid;
        self.store
            .update_invoice_status(payout_id, InvoiceStatus::Paid)
            .await?;
        self.audit
            .record(
                AuditDraft::new(AuditAction::PayoutMarkedPaid, "invoice", payout_id, actor)
                    .with_states(json!("PENDING"), json!("PAID")),
            )
            .await?;
        tracing::info!(payout_id, actor = %actor.name, "Payout marked paid");
        Ok(payout)
    }
}
