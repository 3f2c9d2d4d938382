//! In-memory store
//!
//! DashMap-backed implementation of the store traits. Backs the test suite
//! and the bootstrap binary; a production deployment plugs a database-backed
//! implementation into the same traits.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use shared::{
    AuditEntry, CaseStatus, Invoice, InvoiceStatus, Merchant, Offer, Order, OrderStatus,
    ResolutionCase,
};

use super::{AuditStore, CaseStore, InvoiceStore, MerchantStore, OrderStore};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Default)]
pub struct MemoryStore {
    orders: DashMap<i64, Order>,
    offers: DashMap<i64, Offer>,
    cases: DashMap<i64, ResolutionCase>,
    invoices: DashMap<String, Invoice>,
    merchants: DashMap<i64, Merchant>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full audit trail, oldest first. Test/inspection helper.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().clone()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn get_order(&self, id: i64) -> EngineResult<Option<Order>> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn insert_order(&self, order: Order) -> EngineResult<()> {
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn save_order(&self, mut order: Order, expected_version: u64) -> EngineResult<Order> {
        // The map entry guard serializes concurrent writers on the same id.
        let mut slot = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| EngineError::NotFound(format!("order {}", order.id)))?;
        if slot.version != expected_version {
            return Err(EngineError::ConcurrentModification(format!(
                "order {}: expected version {}, found {}",
                order.id, expected_version, slot.version
            )));
        }
        order.version = expected_version + 1;
        *slot = order.clone();
        Ok(order)
    }

    async fn list_orders_in(&self, statuses: &[OrderStatus]) -> EngineResult<Vec<Order>> {
        Ok(self
            .orders
            .iter()
            .filter(|o| statuses.contains(&o.status))
            .map(|o| o.clone())
            .collect())
    }

    async fn insert_offer(&self, offer: Offer) -> EngineResult<()> {
        self.offers.insert(offer.id, offer);
        Ok(())
    }

    async fn get_offer(&self, id: i64) -> EngineResult<Option<Offer>> {
        Ok(self.offers.get(&id).map(|o| o.clone()))
    }

    async fn list_offers_for_order(&self, order_id: i64) -> EngineResult<Vec<Offer>> {
        let mut offers: Vec<Offer> = self
            .offers
            .iter()
            .filter(|o| o.order_id == order_id)
            .map(|o| o.clone())
            .collect();
        offers.sort_by_key(|o| o.submitted_at);
        Ok(offers)
    }
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn get_case(&self, id: i64) -> EngineResult<Option<ResolutionCase>> {
        Ok(self.cases.get(&id).map(|c| c.clone()))
    }

    async fn insert_case(&self, case: ResolutionCase) -> EngineResult<()> {
        self.cases.insert(case.id, case);
        Ok(())
    }

    async fn save_case(
        &self,
        mut case: ResolutionCase,
        expected_version: u64,
    ) -> EngineResult<ResolutionCase> {
        let mut slot = self
            .cases
            .get_mut(&case.id)
            .ok_or_else(|| EngineError::NotFound(format!("case {}", case.id)))?;
        if slot.version != expected_version {
            return Err(EngineError::ConcurrentModification(format!(
                "case {}: expected version {}, found {}",
                case.id, expected_version, slot.version
            )));
        }
        case.version = expected_version + 1;
        *slot = case.clone();
        Ok(case)
    }

    async fn list_cases_in(&self, statuses: &[CaseStatus]) -> EngineResult<Vec<ResolutionCase>> {
        Ok(self
            .cases
            .iter()
            .filter(|c| statuses.contains(&c.status))
            .map(|c| c.clone())
            .collect())
    }

    async fn find_active_case_for_order(
        &self,
        order_id: i64,
    ) -> EngineResult<Option<ResolutionCase>> {
        Ok(self
            .cases
            .iter()
            .find(|c| c.order_id == order_id && !c.status.is_terminal())
            .map(|c| c.clone()))
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn upsert_invoice(&self, invoice: Invoice) -> EngineResult<()> {
        self.invoices.insert(invoice.id.clone(), invoice);
        Ok(())
    }

    async fn get_invoice(&self, id: &str) -> EngineResult<Option<Invoice>> {
        Ok(self.invoices.get(id).map(|i| i.clone()))
    }

    async fn list_invoices_for_order(&self, order_id: i64) -> EngineResult<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .invoices
            .iter()
            .filter(|i| i.order_id == Some(order_id))
            .map(|i| i.clone())
            .collect();
        invoices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(invoices)
    }

    async fn update_invoice_status(&self, id: &str, status: InvoiceStatus) -> EngineResult<()> {
        let mut invoice = self
            .invoices
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("invoice {id}")))?;
        invoice.status = status;
        Ok(())
    }
}

#[async_trait]
impl MerchantStore for MemoryStore {
    async fn get_merchant(&self, id: i64) -> EngineResult<Option<Merchant>> {
        Ok(self.merchants.get(&id).map(|m| m.clone()))
    }

    async fn insert_merchant(&self, merchant: Merchant) -> EngineResult<()> {
        self.merchants.insert(merchant.id, merchant);
        Ok(())
    }

    async fn save_merchant(
        &self,
        mut merchant: Merchant,
        expected_version: u64,
    ) -> EngineResult<Merchant> {
        let mut slot = self
            .merchants
            .get_mut(&merchant.id)
            .ok_or_else(|| EngineError::NotFound(format!("merchant {}", merchant.id)))?;
        if slot.version != expected_version {
            return Err(EngineError::ConcurrentModification(format!(
                "merchant {}: expected version {}, found {}",
                merchant.id, expected_version, slot.version
            )));
        }
        merchant.version = expected_version + 1;
        *slot = merchant.clone();
        Ok(merchant)
    }

    async fn list_merchants(&self) -> EngineResult<Vec<Merchant>> {
        Ok(self.merchants.iter().map(|m| m.clone()).collect())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: AuditEntry) -> EngineResult<()> {
        self.audit.lock().push(entry);
        Ok(())
    }

    async fn latest_audit(&self) -> EngineResult<Option<AuditEntry>> {
        Ok(self.audit.lock().last().cloned())
    }

    async fn list_audit_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> EngineResult<Vec<AuditEntry>> {
        Ok(self
            .audit
            .lock()
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::util::now_millis;

    #[tokio::test]
    async fn conditional_write_rejects_stale_version() {
        let store = MemoryStore::new();
        let order = Order::new(1, "ORD-1".into(), 10, "radiator".into(), now_millis());
        store.insert_order(order.clone()).await.unwrap();

        let saved = store.save_order(order.clone(), 0).await.unwrap();
        assert_eq!(saved.version, 1);

        // Second writer still holding version 0 must lose.
        let err = store.save_order(order, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::ConcurrentModification(_)));
    }
}
