//! Resolution case model (disputes and returns)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Case type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    Return,
    Dispute,
}

/// Case status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    /// Under negotiation between customer and merchant
    Open,
    /// Waiting for the merchant's response (deadline-bound)
    AwaitingMerchant,
    /// Routed to admin review after a merchant rejection
    AwaitingAdmin,
    /// Auto-escalated: the merchant response window expired
    Escalated,
    /// Closed by a deny/partial verdict (terminal)
    Resolved,
    /// Closed with the customer refunded, by verdict or by a completed
    /// return ladder (terminal)
    Refunded,
    /// Closed without a verdict (terminal)
    Closed,
}

impl CaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaseStatus::Resolved | CaseStatus::Refunded | CaseStatus::Closed
        )
    }

    /// While the case sits in one of these states the customer invoice for
    /// the linked order must stay FROZEN.
    pub fn freezes_invoice(self) -> bool {
        matches!(
            self,
            CaseStatus::AwaitingMerchant | CaseStatus::AwaitingAdmin | CaseStatus::Escalated
        )
    }
}

/// Physical handling progress, tracked only for return-type cases.
/// Intermediate phases are independent of the case's overall status;
/// reaching the final phase settles the case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnPhase {
    Requested,
    Negotiation,
    ApprovedByStore,
    WaybillIssued,
    CustomerHandover,
    StoreReceived,
    RefundProcessed,
}

impl ReturnPhase {
    /// The ladder is strictly sequential; phases are never skipped.
    pub fn next(self) -> Option<ReturnPhase> {
        match self {
            ReturnPhase::Requested => Some(ReturnPhase::Negotiation),
            ReturnPhase::Negotiation => Some(ReturnPhase::ApprovedByStore),
            ReturnPhase::ApprovedByStore => Some(ReturnPhase::WaybillIssued),
            ReturnPhase::WaybillIssued => Some(ReturnPhase::CustomerHandover),
            ReturnPhase::CustomerHandover => Some(ReturnPhase::StoreReceived),
            ReturnPhase::StoreReceived => Some(ReturnPhase::RefundProcessed),
            ReturnPhase::RefundProcessed => None,
        }
    }
}

/// Admin verdict on a case. Terminal and irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Refund,
    Deny,
    Partial,
}

/// Merchant's answer to an open case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantResponse {
    pub text: String,
    pub accepted_return: bool,
    /// Attachment references (external document storage)
    pub evidence: Vec<String>,
    pub responded_at: i64,
}

/// Admin decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminDecision {
    pub verdict: Verdict,
    /// Required for partial verdicts, strictly within (0, order total)
    pub amount: Option<Decimal>,
    pub notes: String,
    pub decided_at: i64,
}

/// Dispute or return case linked to an order.
///
/// At most one active (non-terminal) case per order; multiple historical
/// cases may exist sequentially.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionCase {
    pub id: i64,
    pub case_number: String,
    pub order_id: i64,
    pub case_type: CaseType,
    pub status: CaseStatus,
    /// Only meaningful for return-type cases
    pub return_phase: Option<ReturnPhase>,
    /// Absolute deadline (Unix millis) for the current waiting state.
    /// Invariant: non-null whenever status is AWAITING_MERCHANT.
    pub deadline: Option<i64>,
    pub reason: String,
    pub description: String,
    /// Attachment references supplied by the customer
    pub customer_evidence: Vec<String>,
    pub merchant_response: Option<MerchantResponse>,
    pub admin_decision: Option<AdminDecision>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: u64,
}

impl ResolutionCase {
    pub fn new(
        id: i64,
        case_number: String,
        order_id: i64,
        case_type: CaseType,
        reason: String,
        description: String,
        customer_evidence: Vec<String>,
        deadline: i64,
        now: i64,
    ) -> Self {
        Self {
            id,
            case_number,
            order_id,
            case_type,
            status: CaseStatus::AwaitingMerchant,
            return_phase: match case_type {
                CaseType::Return => Some(ReturnPhase::Requested),
                CaseType::Dispute => None,
            },
            deadline: Some(deadline),
            reason,
            description,
            customer_evidence,
            merchant_response: None,
            admin_decision: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_phase_ladder_is_linear() {
        let mut phase = ReturnPhase::Requested;
        let mut steps = 0;
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
            steps += 1;
        }
        assert_eq!(phase, ReturnPhase::RefundProcessed);
        assert_eq!(steps, 6);
    }

    #[test]
    fn new_case_awaits_merchant_with_deadline() {
        let case = ResolutionCase::new(
            1,
            "DSP-1".into(),
            42,
            CaseType::Dispute,
            "damaged".into(),
            "arrived cracked".into(),
            vec![],
            1_000,
            500,
        );
        assert_eq!(case.status, CaseStatus::AwaitingMerchant);
        assert_eq!(case.deadline, Some(1_000));
        assert!(case.return_phase.is_none());
    }
}
