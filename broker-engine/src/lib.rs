//! Broker Engine - order lifecycle and dispute resolution for a used
//! auto-parts brokerage
//!
//! # Architecture overview
//!
//! - **Order machine** (`orders`): request/offer flow and the canonical
//!   status adjacency table
//! - **Case machine** (`cases`): dispute/return cases with deadlines,
//!   escalation and admin verdicts
//! - **Invoice ledger** (`invoices`): invoices derived idempotently from
//!   order/case state, plus out-of-band payouts
//! - **SLA scheduler** (`scheduler`): periodic sweep enforcing time rules
//! - **Audit recorder** (`audit`): hash-chained append-only trail
//! - **Notifier** (`notify`): fire-and-forget notification intents
//!
//! # Module structure
//!
//! ```text
//! broker-engine/src/
//! ├── orders/        # Order state machine
//! ├── cases/         # Dispute/return state machine
//! ├── invoices/      # Derived invoice ledger
//! ├── scheduler/     # SLA sweep loop
//! ├── audit/         # Hash-chained audit recorder
//! ├── notify/        # Notification emitter
//! ├── store/         # Persistence traits + in-memory store
//! ├── config.rs      # SLA table, rates, hot reload
//! ├── engine.rs      # Wiring
//! ├── error.rs       # Error taxonomy
//! ├── logger.rs      # tracing init
//! └── tasks.rs       # Background task management
//! ```

pub mod audit;
pub mod cases;
pub mod config;
pub mod engine;
pub mod error;
pub mod invoices;
pub mod logger;
pub mod notify;
pub mod orders;
pub mod scheduler;
pub mod store;
pub mod tasks;

pub use audit::{AuditDraft, AuditRecorder, verify_chain};
pub use cases::CaseMachine;
pub use config::{EngineConfig, SharedConfig, SlaTable};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use invoices::InvoiceLedger;
pub use notify::Notifier;
pub use orders::{OrderMachine, TransitionOutcome};
pub use scheduler::SlaScheduler;
pub use store::{EngineStore, MemoryStore};
pub use tasks::{BackgroundTasks, TaskKind};

pub use logger::{init_logger, init_logger_with_file};
