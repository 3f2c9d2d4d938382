use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use shared::util::now_millis;
use shared::{
    Actor, ActorKind, AuditAction, Merchant, MerchantStatus, Order, OrderStatus,
};

use super::*;
use crate::config::EngineConfig;
use crate::store::{InvoiceStore, MemoryStore};

fn customer() -> Actor {
    Actor::new(100, "carla", ActorKind::Customer)
}

fn merchant_actor() -> Actor {
    Actor::new(200, "partes-lopez", ActorKind::Merchant)
}

fn admin() -> Actor {
    Actor::new(300, "ana", ActorKind::Admin)
}

fn super_admin() -> Actor {
    Actor::new(301, "root", ActorKind::SuperAdmin)
}

fn build_machine() -> (OrderMachine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = SharedConfig::new(EngineConfig::default());
    let audit = Arc::new(AuditRecorder::new(store.clone()));
    let ledger = InvoiceLedger::new(store.clone(), config.clone(), audit.clone());
    let (notifier, _rx) = Notifier::new(64);
    let machine = OrderMachine::new(store.clone(), config, audit, ledger, notifier);
    (machine, store)
}

async fn seed_merchant(store: &MemoryStore, id: i64) {
    store
        .insert_merchant(Merchant::new(id, format!("merchant-{id}"), None, now_millis()))
        .await
        .unwrap();
}

/// Insert an order directly in the given state, bypassing the machine.
/// Used by the exhaustive grid test.
async fn seed_order_in(store: &MemoryStore, id: i64, status: OrderStatus) -> Order {
    let now = now_millis();
    let mut order = Order::new(id, format!("ORD-{id}"), 100, "alternator".into(), now);
    order.status = status;
    if status.reached_preparation() {
        order.merchant_id = Some(200);
        order.price = Some(Decimal::new(10000, 2));
        order.shipping_cost = Some(Decimal::new(500, 2));
        order.offer_accepted_at = Some(now);
    }
    store.insert_order(order.clone()).await.unwrap();
    order
}

#[tokio::test]
async fn create_order_starts_awaiting_offers() {
    let (machine, store) = build_machine();
    let order = machine.create_order(&customer(), "left headlight").await.unwrap();
    assert_eq!(order.status, OrderStatus::AwaitingOffers);
    assert_eq!(order.created_at, order.updated_at);

    let audited = store.audit_entries();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].action, AuditAction::OrderCreated);
}

#[tokio::test]
async fn accept_offer_binds_merchant_and_computes_commission() {
    let (machine, store) = build_machine();
    seed_merchant(&store, 200).await;
    let order = machine.create_order(&customer(), "brake disc").await.unwrap();

    let offer = machine
        .submit_offer(
            order.id,
            &merchant_actor(),
            Decimal::new(10000, 2), // 100.00
            Decimal::new(1000, 2),  // 10.00
            Some("used - grade A".into()),
            Some(6),
            None,
        )
        .await
        .unwrap();

    let outcome = machine.accept_offer(order.id, offer.id, &customer()).await.unwrap();
    let order = outcome.order;
    assert_eq!(order.status, OrderStatus::AwaitingPayment);
    assert_eq!(order.merchant_id, Some(200));
    assert_eq!(order.price, Some(Decimal::new(10000, 2)));
    // 10% of 110.00
    assert_eq!(order.commission, Some(Decimal::new(1100, 2)));
    assert!(order.offer_accepted_at.is_some());
}

#[tokio::test]
async fn one_offer_per_merchant_per_order() {
    let (machine, store) = build_machine();
    seed_merchant(&store, 200).await;
    let order = machine.create_order(&customer(), "radiator").await.unwrap();

    machine
        .submit_offer(order.id, &merchant_actor(), Decimal::new(8000, 2), Decimal::ZERO, None, None, None)
        .await
        .unwrap();
    let err = machine
        .submit_offer(order.id, &merchant_actor(), Decimal::new(7500, 2), Decimal::ZERO, None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    assert_eq!(store.list_offers_for_order(order.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn offers_rejected_from_inactive_merchant() {
    let (machine, store) = build_machine();
    let mut merchant = Merchant::new(200, "expired-parts".into(), Some(0), now_millis());
    merchant.status = MerchantStatus::LicenseExpired;
    store.insert_merchant(merchant).await.unwrap();

    let order = machine.create_order(&customer(), "wing mirror").await.unwrap();
    let err = machine
        .submit_offer(
            order.id,
            &merchant_actor(),
            Decimal::new(5000, 2),
            Decimal::ZERO,
            None,
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn exhaustive_transition_grid() {
    // For every (state, target) pair, transition succeeds iff the adjacency
    // table allows it, including self-transitions and terminal states.
    let admin = admin();
    let mut next_id = 1_000;
    for from in OrderStatus::ALL {
        for target in OrderStatus::ALL {
            let (machine, store) = build_machine();
            next_id += 1;
            seed_order_in(&store, next_id, from).await;

            let result = machine
                .transition(next_id, target, &admin, None, json!({}))
                .await;
            let allowed = from.allowed_next().contains(&target);
            match result {
                Ok(outcome) => {
                    assert!(allowed, "{from:?} -> {target:?} should have been rejected");
                    assert_eq!(outcome.order.status, target);
                }
                Err(EngineError::InvalidTransition { from: f, to }) => {
                    assert!(!allowed, "{from:?} -> {target:?} should have been accepted");
                    assert_eq!((f, to), (from, target));
                }
                Err(other) => panic!("unexpected error for {from:?} -> {target:?}: {other}"),
            }
        }
    }
}

#[tokio::test]
async fn transition_updates_lifecycle_timestamps() {
    let (machine, store) = build_machine();
    seed_order_in(&store, 1, OrderStatus::Preparation).await;

    let shipped = machine
        .transition(1, OrderStatus::Shipped, &admin(), None, json!({}))
        .await
        .unwrap()
        .order;
    assert!(shipped.shipped_at.is_some());
    assert_eq!(shipped.updated_at, shipped.shipped_at.unwrap());

    let delivered = machine
        .transition(1, OrderStatus::Delivered, &admin(), None, json!({}))
        .await
        .unwrap()
        .order;
    assert!(delivered.delivered_at.is_some());
}

#[tokio::test]
async fn missing_order_is_not_found() {
    let (machine, _) = build_machine();
    let err = machine
        .transition(9999, OrderStatus::Cancelled, &admin(), None, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn returned_to_completed_is_admin_only() {
    let (machine, store) = build_machine();
    seed_order_in(&store, 1, OrderStatus::Returned).await;

    let err = machine
        .transition(1, OrderStatus::Completed, &customer(), None, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    // The system actor must not close returns either.
    let err = machine
        .transition(1, OrderStatus::Completed, &Actor::system(), None, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    let outcome = machine
        .transition(1, OrderStatus::Completed, &admin(), None, json!({}))
        .await
        .unwrap();
    assert_eq!(outcome.order.status, OrderStatus::Completed);
}

#[tokio::test]
async fn force_transition_requires_super_admin_and_justification() {
    let (machine, store) = build_machine();
    seed_order_in(&store, 1, OrderStatus::Completed).await;

    // Regular path: terminal states never transition.
    let err = machine
        .transition(1, OrderStatus::Preparation, &admin(), None, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    // Admins below super-admin cannot force even reachable targets.
    let err = machine
        .force_transition(1, OrderStatus::Preparation, &admin(), "reopening")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    // Super-admin without justification is rejected.
    let err = machine
        .force_transition(1, OrderStatus::Preparation, &super_admin(), "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let outcome = machine
        .force_transition(1, OrderStatus::Preparation, &super_admin(), "courier lost the part, reopening fulfilment")
        .await
        .unwrap();
    assert_eq!(outcome.order.status, OrderStatus::Preparation);

    let entries = store.audit_entries();
    let forced = entries
        .iter()
        .find(|e| e.action == AuditAction::OrderForceTransition)
        .expect("force transition must be audited");
    assert_eq!(
        forced.reason.as_deref(),
        Some("courier lost the part, reopening fulfilment")
    );
}

#[tokio::test]
async fn transition_fans_out_to_invoices() {
    let (machine, store) = build_machine();
    seed_order_in(&store, 1, OrderStatus::AwaitingPayment).await;

    machine
        .transition(1, OrderStatus::Preparation, &customer(), None, json!({}))
        .await
        .unwrap();

    let invoices = store.list_invoices_for_order(1).await.unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].kind, shared::InvoiceKind::CustomerInvoice);
    assert_eq!(invoices[0].status, shared::InvoiceStatus::Paid);
}

#[tokio::test]
async fn valid_next_is_a_pure_projection() {
    let (machine, store) = build_machine();
    seed_order_in(&store, 1, OrderStatus::Shipped).await;
    let next = machine.valid_next(1).await.unwrap();
    assert_eq!(
        next,
        vec![OrderStatus::Delivered, OrderStatus::Returned, OrderStatus::Disputed]
    );
    // No side effects: status unchanged, no audit entries for the read.
    assert_eq!(store.get_order(1).await.unwrap().unwrap().status, OrderStatus::Shipped);
}

#[tokio::test]
async fn sla_remaining_counts_down_from_the_anchor() {
    let (machine, store) = build_machine();
    let mut order = seed_order_in(&store, 1, OrderStatus::AwaitingPayment).await;
    // Accepted 23h ago: about one hour of the 24h budget left.
    order.offer_accepted_at = Some(now_millis() - 23 * HOUR_MS);
    store.save_order(order, 0).await.unwrap();

    let remaining = machine.sla_remaining(1).await.unwrap().unwrap();
    assert!(remaining > 0 && remaining <= HOUR_MS);

    // Terminal states carry no budget.
    seed_order_in(&store, 2, OrderStatus::Completed).await;
    assert!(machine.sla_remaining(2).await.unwrap().is_none());
}

#[tokio::test]
async fn shipping_details_require_preparation() {
    let (machine, store) = build_machine();
    seed_order_in(&store, 1, OrderStatus::AwaitingOffers).await;
    let err = machine
        .set_shipping_details(1, &merchant_actor(), "WB-1".into(), "SEUR".into(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    seed_order_in(&store, 2, OrderStatus::Preparation).await;
    let order = machine
        .set_shipping_details(2, &merchant_actor(), "WB-2".into(), "SEUR".into(), None)
        .await
        .unwrap();
    assert_eq!(order.waybill_number.as_deref(), Some("WB-2"));
    assert_eq!(order.courier.as_deref(), Some("SEUR"));
}
