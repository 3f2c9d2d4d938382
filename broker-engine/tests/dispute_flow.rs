//! End-to-end dispute scenarios through the public engine surface.

use std::sync::Arc;

use broker_engine::store::{AuditStore, InvoiceStore, MerchantStore};
use broker_engine::{Engine, EngineConfig, EngineError, MemoryStore, verify_chain};
use rust_decimal::Decimal;
use shared::util::now_millis;
use shared::{
    Actor, ActorKind, CaseStatus, CaseType, InvoiceKind, InvoiceStatus, Merchant, Order,
    OrderStatus, Verdict,
};

fn customer() -> Actor {
    Actor::new(100, "carla", ActorKind::Customer)
}

fn merchant_actor() -> Actor {
    Actor::new(200, "partes-lopez", ActorKind::Merchant)
}

fn admin() -> Actor {
    Actor::new(300, "ana", ActorKind::Admin)
}

fn build_engine() -> (Engine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let (engine, _notifications) = Engine::new(store.clone(), EngineConfig::default());
    (engine, store)
}

/// Walk an order through the full happy path up to DELIVERED.
async fn delivered_order(engine: &Engine, store: &MemoryStore) -> Order {
    store
        .insert_merchant(Merchant::new(200, "partes-lopez".into(), None, now_millis()))
        .await
        .unwrap();

    let order = engine
        .orders()
        .create_order(&customer(), "front brake caliper")
        .await
        .unwrap();
    let offer = engine
        .orders()
        .submit_offer(
            order.id,
            &merchant_actor(),
            Decimal::new(12000, 2), // 120.00
            Decimal::new(800, 2),   // 8.00
            Some("used - tested".into()),
            Some(3),
            None,
        )
        .await
        .unwrap();
    engine
        .orders()
        .accept_offer(order.id, offer.id, &customer())
        .await
        .unwrap();
    engine
        .orders()
        .transition(order.id, OrderStatus::Preparation, &customer(), None, serde_json::json!({}))
        .await
        .unwrap();
    engine
        .orders()
        .set_shipping_details(order.id, &merchant_actor(), "WB-77".into(), "SEUR".into(), None)
        .await
        .unwrap();
    engine
        .orders()
        .transition(order.id, OrderStatus::Shipped, &merchant_actor(), None, serde_json::json!({}))
        .await
        .unwrap();
    engine
        .orders()
        .transition(order.id, OrderStatus::Delivered, &merchant_actor(), None, serde_json::json!({}))
        .await
        .unwrap()
        .order
}

async fn invoice_status(store: &MemoryStore, order_id: i64, kind: InvoiceKind) -> InvoiceStatus {
    store
        .list_invoices_for_order(order_id)
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.kind == kind && !i.id.ends_with("-CREDIT"))
        .map(|i| i.status)
        .expect("invoice must exist")
}

#[tokio::test]
async fn refund_verdict_flow() {
    let (engine, store) = build_engine();
    let order = delivered_order(&engine, &store).await;
    assert_eq!(
        invoice_status(&store, order.id, InvoiceKind::CustomerInvoice).await,
        InvoiceStatus::Paid
    );

    // Customer disputes the delivery.
    let case = engine
        .cases()
        .open_case(
            order.id,
            CaseType::Dispute,
            "damaged in transit",
            "caliper housing cracked",
            vec!["crack.jpg".into()],
            &customer(),
        )
        .await
        .unwrap();
    assert_eq!(case.status, CaseStatus::AwaitingMerchant);
    assert_eq!(
        engine.orders().get_order(order.id).await.unwrap().status,
        OrderStatus::Disputed
    );
    assert_eq!(
        invoice_status(&store, order.id, InvoiceKind::CustomerInvoice).await,
        InvoiceStatus::Frozen
    );
    let remaining = engine
        .cases()
        .deadline_remaining(case.id)
        .await
        .unwrap()
        .expect("open case carries a response deadline");
    assert!(remaining > 0);

    // Merchant rejects, admin refunds.
    let case = engine
        .cases()
        .respond_to_case(case.id, "packed correctly", false, vec![], &merchant_actor())
        .await
        .unwrap();
    assert_eq!(case.status, CaseStatus::AwaitingAdmin);

    let case = engine
        .cases()
        .issue_verdict(case.id, Verdict::Refund, None, "photo evidence is clear", &admin())
        .await
        .unwrap();
    assert_eq!(case.status, CaseStatus::Refunded);
    assert_eq!(
        engine.orders().get_order(order.id).await.unwrap().status,
        OrderStatus::Returned
    );
    assert_eq!(
        invoice_status(&store, order.id, InvoiceKind::CustomerInvoice).await,
        InvoiceStatus::Refunded
    );
    assert_eq!(
        invoice_status(&store, order.id, InvoiceKind::CommissionInvoice).await,
        InvoiceStatus::Failed
    );

    // Settled cases no longer carry a deadline.
    assert!(engine.cases().deadline_remaining(case.id).await.unwrap().is_none());

    // Every step of the scenario is on the tamper-evident trail, and the
    // order's own trail covers creation through the dispute transitions.
    assert!(verify_chain(&store.audit_entries()));
    let order_trail = store
        .list_audit_for_entity("order", &order.id.to_string())
        .await
        .unwrap();
    assert!(order_trail.len() >= 6);
}

#[tokio::test]
async fn deny_verdict_flow() {
    let (engine, store) = build_engine();
    let order = delivered_order(&engine, &store).await;

    let case = engine
        .cases()
        .open_case(order.id, CaseType::Dispute, "wrong color", "", vec![], &customer())
        .await
        .unwrap();
    let case = engine
        .cases()
        .respond_to_case(case.id, "color matches the listing", false, vec![], &merchant_actor())
        .await
        .unwrap();
    let case = engine
        .cases()
        .issue_verdict(case.id, Verdict::Deny, None, "listing photo matches", &admin())
        .await
        .unwrap();
    assert_eq!(case.status, CaseStatus::Resolved);

    // Denial completes the order and thaws the invoice back to PAID.
    assert_eq!(
        engine.orders().get_order(order.id).await.unwrap().status,
        OrderStatus::Completed
    );
    assert_eq!(
        invoice_status(&store, order.id, InvoiceKind::CustomerInvoice).await,
        InvoiceStatus::Paid
    );
    assert_eq!(
        invoice_status(&store, order.id, InvoiceKind::CommissionInvoice).await,
        InvoiceStatus::Paid
    );
}

#[tokio::test]
async fn partial_verdict_flow() {
    let (engine, store) = build_engine();
    let order = delivered_order(&engine, &store).await;

    let case = engine
        .cases()
        .open_case(order.id, CaseType::Dispute, "scratched", "", vec![], &customer())
        .await
        .unwrap();
    let case = engine
        .cases()
        .respond_to_case(case.id, "cosmetic only", false, vec![], &merchant_actor())
        .await
        .unwrap();
    engine
        .cases()
        .issue_verdict(
            case.id,
            Verdict::Partial,
            Some(Decimal::new(4000, 2)),
            "split the difference",
            &admin(),
        )
        .await
        .unwrap();

    assert_eq!(
        engine.cases().get_case(case.id).await.unwrap().status,
        CaseStatus::Resolved
    );
    assert_eq!(
        engine.orders().get_order(order.id).await.unwrap().status,
        OrderStatus::Completed
    );
    let credit = store
        .get_invoice(&format!("INV-{}-CREDIT", order.order_number))
        .await
        .unwrap()
        .expect("credit record expected");
    assert_eq!(credit.status, InvoiceStatus::Refunded);
    assert_eq!(credit.total, Decimal::new(4000, 2));
}

#[tokio::test]
async fn closed_orders_reject_new_cases() {
    let (engine, store) = build_engine();
    let order = delivered_order(&engine, &store).await;
    engine
        .orders()
        .transition(order.id, OrderStatus::Completed, &customer(), None, serde_json::json!({}))
        .await
        .unwrap();

    let err = engine
        .cases()
        .open_case(order.id, CaseType::Return, "too late", "", vec![], &customer())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}
