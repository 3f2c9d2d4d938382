//! Persistence collaborator interface
//!
//! The engine owns no storage engine; it consumes these traits. All writes
//! are atomic single-entity writes; cross-entity consistency comes from the
//! fixed call order in the machines, never from multi-entity transactions.
//!
//! Mutable entities (`Order`, `ResolutionCase`, `Merchant`) carry a
//! `version` field; `save_*` is a conditional update that fails with
//! [`EngineError::ConcurrentModification`] when the stored version no longer
//! matches, which gives per-entity write serialization.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use shared::{
    AuditEntry, CaseStatus, Invoice, InvoiceStatus, Merchant, Offer, Order, OrderStatus,
    ResolutionCase,
};

use crate::error::EngineResult;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, id: i64) -> EngineResult<Option<Order>>;
    async fn insert_order(&self, order: Order) -> EngineResult<()>;
    /// Conditional write: succeeds only if the stored version equals
    /// `expected_version`; bumps the version and returns the stored record.
    async fn save_order(&self, order: Order, expected_version: u64) -> EngineResult<Order>;
    async fn list_orders_in(&self, statuses: &[OrderStatus]) -> EngineResult<Vec<Order>>;

    async fn insert_offer(&self, offer: Offer) -> EngineResult<()>;
    async fn get_offer(&self, id: i64) -> EngineResult<Option<Offer>>;
    async fn list_offers_for_order(&self, order_id: i64) -> EngineResult<Vec<Offer>>;
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn get_case(&self, id: i64) -> EngineResult<Option<ResolutionCase>>;
    async fn insert_case(&self, case: ResolutionCase) -> EngineResult<()>;
    /// Conditional write, same contract as `save_order`.
    async fn save_case(
        &self,
        case: ResolutionCase,
        expected_version: u64,
    ) -> EngineResult<ResolutionCase>;
    async fn list_cases_in(&self, statuses: &[CaseStatus]) -> EngineResult<Vec<ResolutionCase>>;
    /// The single non-terminal case linked to an order, if any.
    async fn find_active_case_for_order(
        &self,
        order_id: i64,
    ) -> EngineResult<Option<ResolutionCase>>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Insert-or-replace keyed by invoice id (derivation is idempotent).
    async fn upsert_invoice(&self, invoice: Invoice) -> EngineResult<()>;
    async fn get_invoice(&self, id: &str) -> EngineResult<Option<Invoice>>;
    async fn list_invoices_for_order(&self, order_id: i64) -> EngineResult<Vec<Invoice>>;
    async fn update_invoice_status(&self, id: &str, status: InvoiceStatus) -> EngineResult<()>;
}

#[async_trait]
pub trait MerchantStore: Send + Sync {
    async fn get_merchant(&self, id: i64) -> EngineResult<Option<Merchant>>;
    async fn insert_merchant(&self, merchant: Merchant) -> EngineResult<()>;
    /// Conditional write, same contract as `save_order`.
    async fn save_merchant(&self, merchant: Merchant, expected_version: u64)
        -> EngineResult<Merchant>;
    async fn list_merchants(&self) -> EngineResult<Vec<Merchant>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append-only; entries are never updated or deleted.
    async fn append_audit(&self, entry: AuditEntry) -> EngineResult<()>;
    /// Chain head, used to seed the recorder's hash chain.
    async fn latest_audit(&self) -> EngineResult<Option<AuditEntry>>;
    async fn list_audit_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> EngineResult<Vec<AuditEntry>>;
}

/// Everything the engine needs from persistence.
pub trait EngineStore:
    OrderStore + CaseStore + InvoiceStore + MerchantStore + AuditStore
{
}

impl<T> EngineStore for T where
    T: OrderStore + CaseStore + InvoiceStore + MerchantStore + AuditStore
{
}
