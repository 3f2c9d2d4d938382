//! Engine wiring
//!
//! Builds the machines, ledger, audit recorder and notifier over one storage
//! collaborator and hands the notification receiver back to the caller.

use std::sync::Arc;

use shared::NotificationIntent;
use tokio::sync::mpsc;

use crate::audit::AuditRecorder;
use crate::cases::CaseMachine;
use crate::config::{EngineConfig, SharedConfig};
use crate::invoices::InvoiceLedger;
use crate::notify::Notifier;
use crate::orders::OrderMachine;
use crate::scheduler::SlaScheduler;
use crate::store::EngineStore;

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn EngineStore>,
    config: SharedConfig,
    audit: Arc<AuditRecorder>,
    ledger: InvoiceLedger,
    notifier: Notifier,
    orders: OrderMachine,
    cases: CaseMachine,
}

impl Engine {
    /// Wire up a full engine over the given store.
    ///
    /// The returned receiver carries every notification intent the engine
    /// emits; the caller decides how to deliver them.
    pub fn new(
        store: Arc<dyn EngineStore>,
        config: EngineConfig,
    ) -> (Self, mpsc::Receiver<NotificationIntent>) {
        let buffer = config.notification_buffer;
        let config = SharedConfig::new(config);
        let audit = Arc::new(AuditRecorder::new(store.clone()));
        let ledger = InvoiceLedger::new(store.clone(), config.clone(), audit.clone());
        let (notifier, notifications) = Notifier::new(buffer);
        let orders = OrderMachine::new(
            store.clone(),
            config.clone(),
            audit.clone(),
            ledger.clone(),
            notifier.clone(),
        );
        let cases = CaseMachine::new(
            store.clone(),
            config.clone(),
            audit.clone(),
            ledger.clone(),
            notifier.clone(),
            orders.clone(),
        );
        let engine = Self {
            store,
            config,
            audit,
            ledger,
            notifier,
            orders,
            cases,
        };
        (engine, notifications)
    }

    /// Build the SLA scheduler over the same collaborators. Pair it with a
    /// poke channel and hand both to [`SlaScheduler::run`].
    pub fn scheduler(&self) -> SlaScheduler {
        SlaScheduler::new(
            self.store.clone(),
            self.config.clone(),
            self.audit.clone(),
            self.ledger.clone(),
            self.notifier.clone(),
            self.orders.clone(),
            self.cases.clone(),
        )
    }

    pub fn orders(&self) -> &OrderMachine {
        &self.orders
    }

    pub fn cases(&self) -> &CaseMachine {
        &self.cases
    }

    pub fn ledger(&self) -> &InvoiceLedger {
        &self.ledger
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
