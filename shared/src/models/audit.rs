//! Audit log types
//!
//! Append-only record of every state change. Entries are immutable, never
//! updated or deleted, and carry a SHA256 hash chain:
//! - `prev_hash`: hash of the previous entry
//! - `curr_hash`: hash of this entry (covers prev_hash + all fields)

use serde::{Deserialize, Serialize};

use super::actor::ActorKind;

/// Audit action type (enumerated, never free text)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // === Orders ===
    /// Order created by customer request
    OrderCreated,
    /// Merchant submitted an offer
    OfferSubmitted,
    /// Regular status transition (offer acceptance included)
    OrderTransition,
    /// Privileged transition past the adjacency table
    OrderForceTransition,
    /// Logistics details recorded (waybill, courier)
    ShippingDetailsSet,

    // === Resolution cases ===
    CaseOpened,
    CaseMerchantResponded,
    CaseEscalated,
    CaseVerdictIssued,
    /// Closed without a verdict (withdrawal or administrative closure)
    CaseClosed,
    ReturnPhaseAdvanced,

    // === Financial ===
    PayoutCreated,
    PayoutMarkedPaid,

    // === Scheduler / monitoring ===
    SlaAlertRaised,
    MerchantLicenseExpired,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Audit log entry (immutable, write-once)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Globally increasing sequence number
    pub id: u64,
    /// Unix millis
    pub timestamp: i64,
    pub action: AuditAction,
    /// Entity type ("order", "case", "invoice", "merchant")
    pub entity_type: String,
    pub entity_id: String,
    /// None for system events
    pub actor_id: Option<i64>,
    pub actor_name: Option<String>,
    pub actor_kind: ActorKind,
    /// Snapshot of the relevant state before the change
    pub prev_state: Option<serde_json::Value>,
    /// Snapshot after the change
    pub next_state: Option<serde_json::Value>,
    /// Human-readable reason ("unpaid timeout", force justification, ...)
    pub reason: Option<String>,
    /// Structured details (JSON)
    pub details: serde_json::Value,
    pub prev_hash: String,
    pub curr_hash: String,
}
