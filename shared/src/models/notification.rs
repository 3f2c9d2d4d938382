//! Notification intents
//!
//! The engine only emits intents; delivery (push/email/SMS) belongs to an
//! external collaborator and is never awaited.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Customer,
    Merchant,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Email,
    Sms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderStatusChanged,
    OrderCancelled,
    OfferReceived,
    OfferAccepted,
    CaseOpened,
    CaseEscalated,
    CaseVerdictIssued,
    PreparationDelayed,
    LicenseExpired,
}

/// Event handed to the notification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub recipient_id: i64,
    pub recipient_role: RecipientRole,
    pub kind: NotificationKind,
    pub message: String,
    pub order_id: Option<i64>,
    pub case_id: Option<i64>,
    /// Relative UI path the recipient should be taken to
    pub link_to: String,
    pub priority: Priority,
    pub channels: Vec<Channel>,
}

impl NotificationIntent {
    /// Default-channel intent (push + email, normal priority).
    pub fn new(
        recipient_id: i64,
        recipient_role: RecipientRole,
        kind: NotificationKind,
        message: impl Into<String>,
        link_to: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            recipient_role,
            kind,
            message: message.into(),
            order_id: None,
            case_id: None,
            link_to: link_to.into(),
            priority: Priority::Normal,
            channels: vec![Channel::Push, Channel::Email],
        }
    }

    pub fn with_order(mut self, order_id: i64) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_case(mut self, case_id: i64) -> Self {
        self.case_id = Some(case_id);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
