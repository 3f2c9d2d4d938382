//! Order and Offer models
//!
//! `OrderStatus` is a closed enumeration; `allowed_next()` is the single
//! source of truth for legal transitions and is shared by every caller,
//! human or automated. Presentation labels live entirely outside this crate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Customer request published, waiting for merchant offers
    AwaitingOffers,
    /// Offer accepted, waiting for customer payment
    AwaitingPayment,
    /// Paid; merchant is preparing the part for shipment
    Preparation,
    /// Handed over to the courier
    Shipped,
    /// Courier confirmed delivery
    Delivered,
    /// Part on its way back to the merchant
    Returned,
    /// An open resolution case is attached
    Disputed,
    /// Settled successfully (terminal)
    Completed,
    /// Cancelled before fulfilment (terminal)
    Cancelled,
    /// Fully refunded after a dispute (terminal)
    Refunded,
}

impl OrderStatus {
    /// Every status, for exhaustive transition-table tests.
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::AwaitingOffers,
        OrderStatus::AwaitingPayment,
        OrderStatus::Preparation,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Returned,
        OrderStatus::Disputed,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    /// Legal next states. Identical for every caller; the force path is the
    /// only bypass and it is privileged and audited.
    pub fn allowed_next(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::AwaitingOffers => {
                &[OrderStatus::AwaitingPayment, OrderStatus::Cancelled]
            }
            OrderStatus::AwaitingPayment => &[OrderStatus::Preparation, OrderStatus::Cancelled],
            OrderStatus::Preparation => &[OrderStatus::Shipped],
            OrderStatus::Shipped => &[
                OrderStatus::Delivered,
                OrderStatus::Returned,
                OrderStatus::Disputed,
            ],
            OrderStatus::Delivered => &[
                OrderStatus::Completed,
                OrderStatus::Returned,
                OrderStatus::Disputed,
            ],
            OrderStatus::Returned => &[OrderStatus::Completed],
            OrderStatus::Disputed => &[
                OrderStatus::Completed,
                OrderStatus::Returned,
                OrderStatus::Refunded,
            ],
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded => &[],
        }
    }

    /// Terminal states are final but the records are retained (archival only).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// True once the order has passed the payment gate, the point from which
    /// customer invoices exist and logistics fields are meaningful.
    pub fn reached_preparation(self) -> bool {
        !matches!(
            self,
            OrderStatus::AwaitingOffers | OrderStatus::AwaitingPayment | OrderStatus::Cancelled
        )
    }

    /// States in which a resolution case may be opened against the order.
    pub fn case_eligible(self) -> bool {
        matches!(
            self,
            OrderStatus::Shipped | OrderStatus::Delivered | OrderStatus::Disputed
        )
    }
}

/// A merchant's offer on an order request.
///
/// Immutable once the order leaves AWAITING_OFFERS via acceptance; at most
/// one offer per order is ever accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: i64,
    pub order_id: i64,
    pub merchant_id: i64,
    /// Tax-inclusive unit price
    pub unit_price: Decimal,
    pub shipping_cost: Decimal,
    /// Part condition ("used - grade A", "refurbished", ...)
    pub condition: Option<String>,
    pub warranty_months: Option<u32>,
    pub note: Option<String>,
    /// Unix millis
    pub submitted_at: i64,
}

/// Order entity, the canonical record owned by the order state machine.
///
/// The `status` field only ever changes through the state machine; `version`
/// backs the optimistic conditional write in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub customer_id: i64,
    /// Bound once an offer is accepted
    pub merchant_id: Option<i64>,
    /// Requested part, free text ("left headlight, 2014 Golf VII")
    pub part_description: String,
    pub accepted_offer_id: Option<i64>,
    /// Accepted tax-inclusive price (from the accepted offer)
    pub price: Option<Decimal>,
    pub shipping_cost: Option<Decimal>,
    /// Platform commission on (price + shipping), computed at acceptance
    pub commission: Option<Decimal>,
    pub status: OrderStatus,

    // === Logistics (present only from PREPARATION onward) ===
    pub waybill_number: Option<String>,
    pub courier: Option<String>,
    /// Expected delivery, Unix millis
    pub expected_delivery_at: Option<i64>,

    // === Lifecycle timestamps (Unix millis) ===
    pub created_at: i64,
    /// Always reflects the last successful status transition
    pub updated_at: i64,
    pub offer_accepted_at: Option<i64>,
    pub shipped_at: Option<i64>,
    pub delivered_at: Option<i64>,

    /// Optimistic concurrency version, bumped on every conditional write
    pub version: u64,
}

impl Order {
    pub fn new(id: i64, order_number: String, customer_id: i64, part_description: String, now: i64) -> Self {
        Self {
            id,
            order_number,
            customer_id,
            merchant_id: None,
            part_description,
            accepted_offer_id: None,
            price: None,
            shipping_cost: None,
            commission: None,
            status: OrderStatus::AwaitingOffers,
            waybill_number: None,
            courier: None,
            expected_delivery_at: None,
            created_at: now,
            updated_at: now,
            offer_accepted_at: None,
            shipped_at: None,
            delivered_at: None,
            version: 0,
        }
    }

    /// Accepted price plus shipping; zero before an offer is accepted.
    pub fn total(&self) -> Decimal {
        self.price.unwrap_or_default() + self.shipping_cost.unwrap_or_default()
    }
}
