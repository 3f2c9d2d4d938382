//! Time-rule scenarios: the scheduler sweep over backdated records.

use std::sync::Arc;

use broker_engine::store::{CaseStore, MerchantStore, OrderStore};
use broker_engine::{Engine, EngineConfig, MemoryStore};
use rust_decimal::Decimal;
use shared::util::{HOUR_MS, now_millis};
use shared::{
    Actor, ActorKind, AuditAction, CaseStatus, CaseType, Merchant, NotificationKind, OrderStatus,
};

fn customer() -> Actor {
    Actor::new(100, "carla", ActorKind::Customer)
}

fn merchant_actor() -> Actor {
    Actor::new(200, "partes-lopez", ActorKind::Merchant)
}

fn build_engine() -> (
    Engine,
    Arc<MemoryStore>,
    tokio::sync::mpsc::Receiver<shared::NotificationIntent>,
) {
    let store = Arc::new(MemoryStore::new());
    let (engine, notifications) = Engine::new(store.clone(), EngineConfig::default());
    (engine, store, notifications)
}

/// Create an order and accept an offer, leaving it in AWAITING_PAYMENT.
async fn unpaid_order(engine: &Engine, store: &MemoryStore) -> i64 {
    store
        .insert_merchant(Merchant::new(200, "partes-lopez".into(), None, now_millis()))
        .await
        .unwrap();
    let order = engine
        .orders()
        .create_order(&customer(), "fuel pump")
        .await
        .unwrap();
    let offer = engine
        .orders()
        .submit_offer(
            order.id,
            &merchant_actor(),
            Decimal::new(9000, 2),
            Decimal::new(600, 2),
            None,
            None,
            None,
        )
        .await
        .unwrap();
    engine
        .orders()
        .accept_offer(order.id, offer.id, &customer())
        .await
        .unwrap();
    order.id
}

#[tokio::test]
async fn unpaid_order_is_cancelled_by_the_system() {
    let (engine, store, mut notifications) = build_engine();
    let order_id = unpaid_order(&engine, &store).await;

    // Backdate the acceptance past the 24h payment window.
    let mut order = store.get_order(order_id).await.unwrap().unwrap();
    order.offer_accepted_at = Some(now_millis() - 25 * HOUR_MS);
    let version = order.version;
    store.save_order(order, version).await.unwrap();

    engine.scheduler().sweep(now_millis()).await;

    let order = store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    let entries = store.audit_entries();
    let cancelled = entries
        .iter()
        .rev()
        .find(|e| e.action == AuditAction::OrderTransition)
        .expect("cancellation must be audited");
    assert_eq!(cancelled.actor_kind, ActorKind::System);
    assert_eq!(cancelled.reason.as_deref(), Some("unpaid timeout"));

    let mut saw_cancellation = false;
    while let Ok(intent) = notifications.try_recv() {
        if intent.kind == NotificationKind::OrderCancelled {
            saw_cancellation = true;
        }
    }
    assert!(saw_cancellation, "customer must be told about the cancellation");
}

#[tokio::test]
async fn sweep_inside_the_window_changes_nothing() {
    let (engine, store, _notifications) = build_engine();
    let order_id = unpaid_order(&engine, &store).await;

    engine.scheduler().sweep(now_millis()).await;

    assert_eq!(
        store.get_order(order_id).await.unwrap().unwrap().status,
        OrderStatus::AwaitingPayment
    );
}

#[tokio::test]
async fn stale_case_is_escalated_by_the_system() {
    let (engine, store, _notifications) = build_engine();
    let order_id = unpaid_order(&engine, &store).await;
    for target in [
        OrderStatus::Preparation,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        engine
            .orders()
            .transition(order_id, target, &merchant_actor(), None, serde_json::json!({}))
            .await
            .unwrap();
    }

    let case = engine
        .cases()
        .open_case(order_id, CaseType::Dispute, "damaged", "", vec![], &customer())
        .await
        .unwrap();

    // Backdate the merchant deadline.
    let mut stored = store.get_case(case.id).await.unwrap().unwrap();
    stored.deadline = Some(now_millis() - 1_000);
    let version = stored.version;
    store.save_case(stored, version).await.unwrap();

    engine.scheduler().sweep(now_millis()).await;

    let case = store.get_case(case.id).await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Escalated);

    let entries = store.audit_entries();
    let escalated = entries
        .iter()
        .find(|e| e.action == AuditAction::CaseEscalated)
        .expect("escalation must be audited");
    assert_eq!(escalated.actor_kind, ActorKind::System);
    assert_eq!(escalated.reason.as_deref(), Some("no merchant response timeout"));
}
