//! Engine configuration
//!
//! All knobs can be overridden through environment variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | SWEEP_INTERVAL_SECS | 60 | SLA scheduler cadence |
//! | COMMISSION_RATE | 0.10 | Platform commission on order total |
//! | TAX_RATE | 0.21 | VAT rate (amounts are tax-inclusive) |
//! | SLA_AWAITING_OFFERS_HOURS | 24 | |
//! | SLA_AWAITING_PAYMENT_HOURS | 24 | Unpaid auto-cancel threshold |
//! | SLA_PREPARATION_HOURS | 48 | Preparation-delay alert threshold |
//! | SLA_SHIPPED_HOURS | 336 | |
//! | SLA_DELIVERED_HOURS | 168 | |
//! | SLA_DISPUTED_HOURS | 72 | Merchant response window / escalation |
//! | NOTIFICATION_BUFFER | 1024 | Notification channel capacity |
//!
//! The scheduler re-reads the shared config on every tick, so operators can
//! tune thresholds at runtime without restarting the loop.

use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use shared::OrderStatus;

/// SLA hour budget per order status.
///
/// Used both for UI risk display (`sla_remaining`) and as rule thresholds;
/// the scheduler never hard-codes an hour count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaTable {
    pub awaiting_offers_hours: i64,
    pub awaiting_payment_hours: i64,
    pub preparation_hours: i64,
    pub shipped_hours: i64,
    pub delivered_hours: i64,
    pub disputed_hours: i64,
}

impl SlaTable {
    /// Hour budget for a status; None for states without a deadline.
    pub fn hours_for(&self, status: OrderStatus) -> Option<i64> {
        match status {
            OrderStatus::AwaitingOffers => Some(self.awaiting_offers_hours),
            OrderStatus::AwaitingPayment => Some(self.awaiting_payment_hours),
            OrderStatus::Preparation => Some(self.preparation_hours),
            OrderStatus::Shipped => Some(self.shipped_hours),
            OrderStatus::Delivered => Some(self.delivered_hours),
            OrderStatus::Disputed => Some(self.disputed_hours),
            _ => None,
        }
    }
}

impl Default for SlaTable {
    fn default() -> Self {
        Self {
            awaiting_offers_hours: 24,
            awaiting_payment_hours: 24,
            preparation_hours: 48,
            shipped_hours: 336,  // 14 days
            delivered_hours: 168, // 7 days
            disputed_hours: 72,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SLA scheduler cadence (seconds)
    pub sweep_interval_secs: u64,
    /// Commission rate on (price + shipping)
    pub commission_rate: Decimal,
    /// VAT rate; customer-facing amounts are tax-inclusive
    pub tax_rate: Decimal,
    pub sla: SlaTable,
    /// Notification channel capacity
    pub notification_buffer: usize,
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 60),
            commission_rate: env_decimal("COMMISSION_RATE", Decimal::new(10, 2)),
            tax_rate: env_decimal("TAX_RATE", Decimal::new(21, 2)),
            sla: SlaTable {
                awaiting_offers_hours: env_parse("SLA_AWAITING_OFFERS_HOURS", 24),
                awaiting_payment_hours: env_parse("SLA_AWAITING_PAYMENT_HOURS", 24),
                preparation_hours: env_parse("SLA_PREPARATION_HOURS", 48),
                shipped_hours: env_parse("SLA_SHIPPED_HOURS", 336),
                delivered_hours: env_parse("SLA_DELIVERED_HOURS", 168),
                disputed_hours: env_parse("SLA_DISPUTED_HOURS", 72),
            },
            notification_buffer: env_parse("NOTIFICATION_BUFFER", 1024),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            commission_rate: Decimal::new(10, 2),
            tax_rate: Decimal::new(21, 2),
            sla: SlaTable::default(),
            notification_buffer: 1024,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .unwrap_or(default)
}

/// Hot-reloadable configuration handle shared by the machines and the
/// scheduler loop.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<EngineConfig>>,
}

impl SharedConfig {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Cheap point-in-time copy; never held across an await point.
    pub fn snapshot(&self) -> EngineConfig {
        self.inner.read().clone()
    }

    /// Replace configuration at runtime (hot reload).
    pub fn update(&self, config: EngineConfig) {
        *self.inner.write() = config;
        tracing::info!("Engine configuration reloaded");
    }
}
