//! Unified error handling
//!
//! Business-rule violations (`InvalidTransition`, `DeadlineExpired`, ...) are
//! explicit results the caller can act on; `Storage` wraps infrastructure
//! failures that propagate as failures of the whole operation.

use shared::{CaseStatus, OrderStatus};

/// Engine-level error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ========== Business Rule Errors ==========
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("invalid case state for {action}: {status:?}")]
    InvalidCaseState {
        status: CaseStatus,
        action: &'static str,
    },

    #[error("deadline expired: {0}")]
    DeadlineExpired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    // ========== Infrastructure Errors ==========
    /// Per-entity version conflict; retried once before surfacing
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Recoverable locally by the caller (show valid options / retry later),
    /// as opposed to infrastructure failures.
    pub fn is_business_rule(&self) -> bool {
        !matches!(
            self,
            EngineError::ConcurrentModification(_) | EngineError::Storage(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
