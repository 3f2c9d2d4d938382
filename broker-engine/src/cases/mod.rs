//! Dispute/return case state machine
//!
//! A case is a secondary, order-linked record with its own states and
//! deadlines. Opening a case drives the linked order into DISPUTED (which
//! freezes the customer invoice via derivation); an admin verdict, a
//! completed return ladder, or an explicit closure settles the case
//! terminally along with the order and the ledger.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;
use serde_json::{Value, json};
use shared::util::{HOUR_MS, now_millis, snowflake_id};
use shared::{
    Actor, AdminDecision, AuditAction, CaseStatus, CaseType, MerchantResponse, NotificationIntent,
    NotificationKind, OrderStatus, Priority, RecipientRole, ResolutionCase, ReturnPhase, Verdict,
};

use crate::audit::{AuditDraft, AuditRecorder};
use crate::config::SharedConfig;
use crate::error::{EngineError, EngineResult};
use crate::invoices::InvoiceLedger;
use crate::notify::Notifier;
use crate::orders::OrderMachine;
use crate::store::{CaseStore, EngineStore, OrderStore};

#[derive(Clone)]
pub struct CaseMachine {
    store: Arc<dyn EngineStore>,
    config: SharedConfig,
    audit: Arc<AuditRecorder>,
    ledger: InvoiceLedger,
    notifier: Notifier,
    orders: OrderMachine,
    case_seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for CaseMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseMachine").finish_non_exhaustive()
    }
}

impl CaseMachine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        config: SharedConfig,
        audit: Arc<AuditRecorder>,
        ledger: InvoiceLedger,
        notifier: Notifier,
        orders: OrderMachine,
    ) -> Self {
        Self {
            store,
            config,
            audit,
            ledger,
            notifier,
            orders,
            case_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_case_number(&self, case_type: CaseType) -> String {
        let prefix = match case_type {
            CaseType::Dispute => "DSP",
            CaseType::Return => "RET",
        };
        format!("{}-{}", prefix, self.case_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    // ========== Operations ==========

    /// Open a claim against a shipped-or-later order.
    ///
    /// Sets AWAITING_MERCHANT with a deadline from the SLA table and drives
    /// the order into DISPUTED, freezing the customer invoice.
    pub async fn open_case(
        &self,
        order_id: i64,
        case_type: CaseType,
        reason: impl Into<String>,
        description: impl Into<String>,
        evidence: Vec<String>,
        actor: &Actor,
    ) -> EngineResult<ResolutionCase> {
        let order = self.orders.get_order(order_id).await?;
        if !order.status.case_eligible() {
            return Err(EngineError::Validation(format!(
                "order {} is not eligible for a claim ({:?})",
                order.order_number, order.status
            )));
        }
        if let Some(existing) = self.store.find_active_case_for_order(order_id).await? {
            return Err(EngineError::Validation(format!(
                "order {} already has an active case ({})",
                order.order_number, existing.case_number
            )));
        }

        let now = now_millis();
        let window_hours = self.config.snapshot().sla.disputed_hours;
        let case = ResolutionCase::new(
            snowflake_id(),
            self.next_case_number(case_type),
            order_id,
            case_type,
            reason.into(),
            description.into(),
            evidence,
            now + window_hours * HOUR_MS,
            now,
        );
        self.store.insert_case(case.clone()).await?;

        self.audit
            .record(
                AuditDraft::new(AuditAction::CaseOpened, "case", case.id.to_string(), actor)
                    .with_states(Value::Null, json!({ "status": case.status }))
                    .with_details(json!({
                        "order_id": order_id,
                        "case_number": case.case_number,
                        "type": case.case_type,
                    })),
            )
            .await?;

        // Drive the order into DISPUTED through the regular transition path;
        // the invoice freeze falls out of the derivation.
        if order.status != OrderStatus::Disputed {
            if let Err(e) = self
                .orders
                .transition(
                    order_id,
                    OrderStatus::Disputed,
                    actor,
                    Some(format!("case {} opened", case.case_number)),
                    json!({ "case_id": case.id }),
                )
                .await
            {
                tracing::warn!(case_id = case.id, order_id, error = %e, "Failed to move order to DISPUTED");
            }
        } else if let Err(e) = self.ledger.sync_order(&order).await {
            tracing::warn!(order_id, error = %e, "Invoice sync failed after case open");
        }

        if let Some(merchant_id) = order.merchant_id {
            self.notifier.emit(
                NotificationIntent::new(
                    merchant_id,
                    RecipientRole::Merchant,
                    NotificationKind::CaseOpened,
                    format!(
                        "Case {} opened on order {}, response due in {}h",
                        case.case_number, order.order_number, window_hours
                    ),
                    format!("/cases/{}", case.id),
                )
                .with_order(order_id)
                .with_case(case.id)
                .with_priority(Priority::High),
            );
        }

        tracing::info!(
            case_id = case.id,
            case_number = %case.case_number,
            order_id,
            "Resolution case opened"
        );
        Ok(case)
    }

    /// Merchant answer to an open case. Acceptance approves the return;
    /// rejection routes the case to admin review.
    pub async fn respond_to_case(
        &self,
        case_id: i64,
        text: impl Into<String>,
        accepted_return: bool,
        evidence: Vec<String>,
        actor: &Actor,
    ) -> EngineResult<ResolutionCase> {
        let text = text.into();
        retry_once(case_id, "merchant response", || {
            self.try_respond(case_id, &text, accepted_return, &evidence, actor)
        })
        .await
    }

    async fn try_respond(
        &self,
        case_id: i64,
        text: &str,
        accepted_return: bool,
        evidence: &[String],
        actor: &Actor,
    ) -> EngineResult<ResolutionCase> {
        let mut case = self.load(case_id).await?;
        match case.status {
            CaseStatus::AwaitingMerchant => {}
            // Past merchant control: the window closed.
            CaseStatus::AwaitingAdmin | CaseStatus::Escalated => {
                return Err(EngineError::DeadlineExpired(format!(
                    "case {} has been escalated past merchant control",
                    case.case_number
                )));
            }
            status => {
                return Err(EngineError::InvalidCaseState {
                    status,
                    action: "merchant response",
                });
            }
        }
        let now = now_millis();
        if case.deadline.is_some_and(|d| now > d) {
            return Err(EngineError::DeadlineExpired(format!(
                "response window for case {} closed",
                case.case_number
            )));
        }

        let prev_status = case.status;
        case.merchant_response = Some(MerchantResponse {
            text: text.to_string(),
            accepted_return,
            evidence: evidence.to_vec(),
            responded_at: now,
        });
        if accepted_return {
            case.status = CaseStatus::Open;
            if case.case_type == CaseType::Return {
                case.return_phase = Some(ReturnPhase::ApprovedByStore);
            }
        } else {
            case.status = CaseStatus::AwaitingAdmin;
        }
        case.deadline = None;
        case.updated_at = now;
        let expected_version = case.version;
        let saved = self.store.save_case(case, expected_version).await?;

        self.audit
            .record(
                AuditDraft::new(AuditAction::CaseMerchantResponded, "case", case_id.to_string(), actor)
                    .with_states(
                        json!({ "status": prev_status }),
                        json!({ "status": saved.status, "return_phase": saved.return_phase }),
                    )
                    .with_details(json!({ "accepted_return": accepted_return })),
            )
            .await?;

        self.notify_case_parties(
            &saved,
            NotificationKind::OrderStatusChanged,
            format!(
                "Merchant responded to case {} ({})",
                saved.case_number,
                if accepted_return { "return accepted" } else { "rejected, sent to review" }
            ),
            Priority::Normal,
        )
        .await;

        Ok(saved)
    }

    /// Escalate a case whose merchant response window expired. Retries the
    /// conditional write once; a concurrent merchant response wins the race
    /// and makes the escalation invalid.
    pub async fn escalate(
        &self,
        case_id: i64,
        actor: &Actor,
        reason: impl Into<String>,
    ) -> EngineResult<ResolutionCase> {
        let reason = reason.into();
        retry_once(case_id, "escalation", || {
            self.try_escalate(case_id, actor, &reason)
        })
        .await
    }

    async fn try_escalate(
        &self,
        case_id: i64,
        actor: &Actor,
        reason: &str,
    ) -> EngineResult<ResolutionCase> {
        let mut case = self.load(case_id).await?;
        if case.status != CaseStatus::AwaitingMerchant {
            return Err(EngineError::InvalidCaseState {
                status: case.status,
                action: "escalation",
            });
        }
        let now = now_millis();
        case.status = CaseStatus::Escalated;
        case.deadline = None;
        case.updated_at = now;
        let expected_version = case.version;
        let saved = self.store.save_case(case, expected_version).await?;

        self.audit
            .record(
                AuditDraft::new(AuditAction::CaseEscalated, "case", case_id.to_string(), actor)
                    .with_states(
                        json!({ "status": CaseStatus::AwaitingMerchant }),
                        json!({ "status": CaseStatus::Escalated }),
                    )
                    .with_reason(reason),
            )
            .await?;

        // Route to admin review.
        self.notifier.emit(
            NotificationIntent::new(
                0,
                RecipientRole::Admin,
                NotificationKind::CaseEscalated,
                format!("Case {} escalated: {}", saved.case_number, reason),
                format!("/admin/cases/{}", saved.id),
            )
            .with_order(saved.order_id)
            .with_case(saved.id)
            .with_priority(Priority::High),
        );

        tracing::info!(case_id, case_number = %saved.case_number, "Case escalated");
        Ok(saved)
    }

    /// Admin verdict. Terminal and irreversible.
    pub async fn issue_verdict(
        &self,
        case_id: i64,
        verdict: Verdict,
        amount: Option<Decimal>,
        notes: impl Into<String>,
        actor: &Actor,
    ) -> EngineResult<ResolutionCase> {
        let notes = notes.into();
        retry_once(case_id, "verdict", || {
            self.try_issue_verdict(case_id, verdict, amount, &notes, actor)
        })
        .await
    }

    async fn try_issue_verdict(
        &self,
        case_id: i64,
        verdict: Verdict,
        amount: Option<Decimal>,
        notes: &str,
        actor: &Actor,
    ) -> EngineResult<ResolutionCase> {
        if !actor.kind.is_admin() {
            return Err(EngineError::Unauthorized(
                "verdicts are an admin action".to_string(),
            ));
        }
        let mut case = self.load(case_id).await?;
        if !matches!(case.status, CaseStatus::AwaitingAdmin | CaseStatus::Escalated) {
            return Err(EngineError::InvalidCaseState {
                status: case.status,
                action: "verdict",
            });
        }
        let order = self.orders.get_order(case.order_id).await?;

        if verdict == Verdict::Partial {
            let amount = amount.ok_or_else(|| {
                EngineError::Validation("partial verdicts require an amount".to_string())
            })?;
            if amount <= Decimal::ZERO || amount >= order.total() {
                return Err(EngineError::Validation(format!(
                    "partial refund amount must be strictly between 0 and {}",
                    order.total()
                )));
            }
        }

        let now = now_millis();
        let prev_status = case.status;
        case.admin_decision = Some(AdminDecision {
            verdict,
            amount,
            notes: notes.to_string(),
            decided_at: now,
        });
        case.status = match verdict {
            Verdict::Refund => CaseStatus::Refunded,
            Verdict::Deny | Verdict::Partial => CaseStatus::Resolved,
        };
        if verdict == Verdict::Refund && case.case_type == CaseType::Return {
            case.return_phase = Some(ReturnPhase::RefundProcessed);
        }
        case.updated_at = now;
        let expected_version = case.version;
        // Close the case before settling the order so the invoice derivation
        // no longer sees an active freezing case.
        let saved = self.store.save_case(case, expected_version).await?;

        let order_target = match verdict {
            Verdict::Refund => OrderStatus::Returned,
            Verdict::Deny | Verdict::Partial => OrderStatus::Completed,
        };
        if order.status != order_target {
            if let Err(e) = self
                .orders
                .transition(
                    order.id,
                    order_target,
                    actor,
                    Some(format!("verdict on case {}", saved.case_number)),
                    json!({ "case_id": saved.id, "verdict": verdict }),
                )
                .await
            {
                tracing::warn!(
                    case_id,
                    order_id = order.id,
                    error = %e,
                    "Failed to settle order after verdict"
                );
            }
        }

        if verdict == Verdict::Partial {
            if let Some(amount) = amount {
                if let Err(e) = self.ledger.apply_partial_refund(&order, amount, now).await {
                    tracing::warn!(case_id, error = %e, "Failed to record partial-refund credit");
                }
            }
        }

        self.audit
            .record(
                AuditDraft::new(AuditAction::CaseVerdictIssued, "case", case_id.to_string(), actor)
                    .with_states(
                        json!({ "status": prev_status }),
                        json!({ "status": saved.status }),
                    )
                    .with_details(json!({ "verdict": verdict, "amount": amount })),
            )
            .await?;

        self.notify_case_parties(
            &saved,
            NotificationKind::CaseVerdictIssued,
            format!("Verdict issued on case {}: {:?}", saved.case_number, verdict),
            Priority::High,
        )
        .await;

        tracing::info!(case_id, ?verdict, "Verdict issued");
        Ok(saved)
    }

    /// Advance the physical-handling ladder of a return case by one phase.
    /// Phases are strictly sequential. Reaching REFUND_PROCESSED settles the
    /// case (REFUNDED) and drives the order to RETURNED, so the customer
    /// invoice derivation flips to REFUNDED.
    pub async fn advance_return_phase(
        &self,
        case_id: i64,
        actor: &Actor,
    ) -> EngineResult<ResolutionCase> {
        retry_once(case_id, "return phase advance", || {
            self.try_advance_return_phase(case_id, actor)
        })
        .await
    }

    async fn try_advance_return_phase(
        &self,
        case_id: i64,
        actor: &Actor,
    ) -> EngineResult<ResolutionCase> {
        let mut case = self.load(case_id).await?;
        if case.case_type != CaseType::Return {
            return Err(EngineError::Validation(format!(
                "case {} is not a return case",
                case.case_number
            )));
        }
        if case.status.is_terminal() {
            return Err(EngineError::InvalidCaseState {
                status: case.status,
                action: "return phase advance",
            });
        }
        let current = case.return_phase.unwrap_or(ReturnPhase::Requested);
        let next = current.next().ok_or_else(|| {
            EngineError::Validation(format!(
                "case {} already reached the final return phase",
                case.case_number
            ))
        })?;
        let prev_status = case.status;
        let settled = next == ReturnPhase::RefundProcessed;
        case.return_phase = Some(next);
        if settled {
            case.status = CaseStatus::Refunded;
            case.deadline = None;
        }
        case.updated_at = now_millis();
        let expected_version = case.version;
        let saved = self.store.save_case(case, expected_version).await?;

        self.audit
            .record(
                AuditDraft::new(AuditAction::ReturnPhaseAdvanced, "case", case_id.to_string(), actor)
                    .with_states(
                        json!({ "return_phase": current, "status": prev_status }),
                        json!({ "return_phase": next, "status": saved.status }),
                    ),
            )
            .await?;

        if settled {
            self.settle_returned_order(&saved, actor).await;
            self.notify_case_parties(
                &saved,
                NotificationKind::OrderStatusChanged,
                format!("Return case {} completed, refund processed", saved.case_number),
                Priority::High,
            )
            .await;
            tracing::info!(case_id, case_number = %saved.case_number, "Return refund processed, case settled");
        }
        Ok(saved)
    }

    /// Close a case without a verdict: customer withdrawal or administrative
    /// closure. Completes the linked order, thawing the frozen invoice.
    pub async fn close_case(
        &self,
        case_id: i64,
        reason: impl Into<String>,
        actor: &Actor,
    ) -> EngineResult<ResolutionCase> {
        let reason = reason.into();
        retry_once(case_id, "closure", || self.try_close(case_id, &reason, actor)).await
    }

    async fn try_close(
        &self,
        case_id: i64,
        reason: &str,
        actor: &Actor,
    ) -> EngineResult<ResolutionCase> {
        let mut case = self.load(case_id).await?;
        if case.status.is_terminal() {
            return Err(EngineError::InvalidCaseState {
                status: case.status,
                action: "closure",
            });
        }
        let now = now_millis();
        let prev_status = case.status;
        case.status = CaseStatus::Closed;
        case.deadline = None;
        case.updated_at = now;
        let expected_version = case.version;
        let saved = self.store.save_case(case, expected_version).await?;

        self.audit
            .record(
                AuditDraft::new(AuditAction::CaseClosed, "case", case_id.to_string(), actor)
                    .with_states(
                        json!({ "status": prev_status }),
                        json!({ "status": saved.status }),
                    )
                    .with_reason(reason),
            )
            .await?;

        match self.orders.get_order(saved.order_id).await {
            Ok(order) if order.status == OrderStatus::Disputed => {
                if let Err(e) = self
                    .orders
                    .transition(
                        saved.order_id,
                        OrderStatus::Completed,
                        actor,
                        Some(format!("case {} closed without a verdict", saved.case_number)),
                        json!({ "case_id": saved.id }),
                    )
                    .await
                {
                    tracing::warn!(case_id, order_id = saved.order_id, error = %e, "Failed to complete order after closure");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(case_id, error = %e, "Order load failed after closure");
            }
        }

        self.notify_case_parties(
            &saved,
            NotificationKind::OrderStatusChanged,
            format!("Case {} closed without a verdict", saved.case_number),
            Priority::Normal,
        )
        .await;

        tracing::info!(case_id, case_number = %saved.case_number, "Case closed");
        Ok(saved)
    }

    // ========== Read Projections ==========

    pub async fn get_case(&self, case_id: i64) -> EngineResult<ResolutionCase> {
        self.load(case_id).await
    }

    /// Milliseconds until the current deadline (negative when overdue);
    /// None for states without one.
    pub async fn deadline_remaining(&self, case_id: i64) -> EngineResult<Option<i64>> {
        let case = self.load(case_id).await?;
        Ok(case.deadline.map(|d| d - now_millis()))
    }

    // ========== Internals ==========

    /// Drive the linked order to RETURNED after a processed refund. The case
    /// is already terminal here, so the derivation no longer sees it as a
    /// freezing case and marks the customer invoice REFUNDED.
    async fn settle_returned_order(&self, case: &ResolutionCase, actor: &Actor) {
        let order = match self.orders.get_order(case.order_id).await {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(case_id = case.id, error = %e, "Order load failed after return refund");
                return;
            }
        };
        if order.status == OrderStatus::Returned {
            return;
        }
        if let Err(e) = self
            .orders
            .transition(
                case.order_id,
                OrderStatus::Returned,
                actor,
                Some(format!("return case {} refunded", case.case_number)),
                json!({ "case_id": case.id }),
            )
            .await
        {
            tracing::warn!(
                case_id = case.id,
                order_id = case.order_id,
                error = %e,
                "Failed to settle order after return refund"
            );
        }
    }

    async fn load(&self, case_id: i64) -> EngineResult<ResolutionCase> {
        self.store
            .get_case(case_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("case {case_id}")))
    }

    async fn notify_case_parties(
        &self,
        case: &ResolutionCase,
        kind: NotificationKind,
        message: String,
        priority: Priority,
    ) {
        let order = match self.store.get_order(case.order_id).await {
            Ok(Some(order)) => order,
            _ => return,
        };
        let link = format!("/cases/{}", case.id);
        self.notifier.emit(
            NotificationIntent::new(order.customer_id, RecipientRole::Customer, kind, &message, &link)
                .with_order(order.id)
                .with_case(case.id)
                .with_priority(priority),
        );
        if let Some(merchant_id) = order.merchant_id {
            self.notifier.emit(
                NotificationIntent::new(merchant_id, RecipientRole::Merchant, kind, &message, &link)
                    .with_order(order.id)
                    .with_case(case.id)
                    .with_priority(priority),
            );
        }
    }
}

/// Run a conditional-write case operation, retrying once on a version
/// conflict before surfacing the failure. The retry re-reads the record, so
/// a competing writer's state change is evaluated, not clobbered.
async fn retry_once<F, Fut>(
    case_id: i64,
    action: &'static str,
    op: F,
) -> EngineResult<ResolutionCase>
where
    F: Fn() -> Fut,
    Fut: Future<Output = EngineResult<ResolutionCase>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Err(EngineError::ConcurrentModification(msg)) if attempts == 1 => {
                tracing::debug!(case_id, action, %msg, "Version conflict, retrying once");
                continue;
            }
            other => return other,
        }
    }
}
