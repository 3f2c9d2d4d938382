//! Merchant model
//!
//! Merchant standing gates the offer-acceptance path: only ACTIVE merchants
//! may be bound to new orders. License expiry is enforced by the SLA
//! scheduler, not by ad-hoc checks at read time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MerchantStatus {
    Active,
    /// Temporarily suspended by an admin
    Suspended,
    /// Trade license lapsed; flipped automatically by the scheduler
    LicenseExpired,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: i64,
    pub name: String,
    pub status: MerchantStatus,
    /// Unix millis; None for merchants without a license requirement
    pub license_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: u64,
}

impl Merchant {
    pub fn new(id: i64, name: String, license_expires_at: Option<i64>, now: i64) -> Self {
        Self {
            id,
            name,
            status: MerchantStatus::Active,
            license_expires_at,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MerchantStatus::Active
    }
}
