//! Shared domain models for the parts-brokerage order engine
//!
//! This crate holds the canonical data model consumed by `broker-engine`:
//! orders and offers, dispute/return resolution cases, derived invoices,
//! merchants, actor identities, audit entries and notification intents.
//!
//! The models are transport-agnostic: no HTTP types, no storage types.
//! Status enums are closed; the engine's transition tables are the only
//! place that decides which moves are legal.

pub mod models;
pub mod util;

pub use models::actor::{Actor, ActorKind};
pub use models::audit::{AuditAction, AuditEntry};
pub use models::case::{
    AdminDecision, CaseStatus, CaseType, MerchantResponse, ResolutionCase, ReturnPhase, Verdict,
};
pub use models::invoice::{Invoice, InvoiceKind, InvoiceStatus};
pub use models::merchant::{Merchant, MerchantStatus};
pub use models::notification::{Channel, NotificationIntent, NotificationKind, Priority, RecipientRole};
pub use models::order::{Offer, Order, OrderStatus};
