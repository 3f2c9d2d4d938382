//! Invoice model
//!
//! Invoices are derivations of order/case state, never the source of truth
//! for order progress. `PartialEq` backs the regeneration-idempotence tests.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Invoice document type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceKind {
    CustomerInvoice,
    CommissionInvoice,
    PayoutInvoice,
    ShippingInvoice,
}

/// Invoice settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Paid,
    Pending,
    Refunded,
    Failed,
    /// Escrow hold while a resolution case is pending; released only by a
    /// verdict on the linked case
    Frozen,
}

/// Financial document derived from (or attached to) an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Deterministic id, e.g. "INV-ORD20260829-00042-CUST"
    pub id: String,
    pub kind: InvoiceKind,
    /// Not set for payout invoices
    pub order_id: Option<i64>,
    /// Set for commission and payout invoices
    pub merchant_id: Option<i64>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub status: InvoiceStatus,
    /// Taken from lifecycle timestamps, never the wall clock, so that
    /// regeneration is byte-identical
    pub issued_at: i64,
}
