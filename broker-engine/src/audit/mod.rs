//! Audit recorder
//!
//! Append-only log of every state change. Each entry carries a SHA256 hash
//! chain (`prev_hash`/`curr_hash`) so tampering with historical entries is
//! detectable. Appends are serialized through the chain-head mutex; the head
//! is seeded lazily from the store on first use.

use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use shared::util::now_millis;
use shared::{Actor, AuditAction, AuditEntry};
use tokio::sync::Mutex;

use crate::error::EngineResult;
use crate::store::{AuditStore, EngineStore};

/// First prev_hash in the chain.
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Entry under construction; the recorder fills in sequence, timestamp and
/// the hash chain.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub actor: Actor,
    pub prev_state: Option<Value>,
    pub next_state: Option<Value>,
    pub reason: Option<String>,
    pub details: Value,
}

impl AuditDraft {
    pub fn new(action: AuditAction, entity_type: &'static str, entity_id: impl Into<String>, actor: &Actor) -> Self {
        Self {
            action,
            entity_type,
            entity_id: entity_id.into(),
            actor: actor.clone(),
            prev_state: None,
            next_state: None,
            reason: None,
            details: Value::Null,
        }
    }

    pub fn with_states(mut self, prev: Value, next: Value) -> Self {
        self.prev_state = Some(prev);
        self.next_state = Some(next);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Chain head: (sequence, curr_hash) of the latest entry.
type ChainHead = Option<(u64, String)>;

pub struct AuditRecorder {
    store: Arc<dyn EngineStore>,
    /// None until seeded from the store; async mutex because the store is
    /// consulted while it is held.
    head: Mutex<Option<ChainHead>>,
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder").finish_non_exhaustive()
    }
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self {
            store,
            head: Mutex::new(None),
        }
    }

    /// Append an entry to the chain and persist it.
    pub async fn record(&self, draft: AuditDraft) -> EngineResult<AuditEntry> {
        let mut head = self.head.lock().await;

        // Seed the chain head from storage on first use.
        if head.is_none() {
            let latest = self.store.latest_audit().await?;
            *head = Some(latest.map(|e| (e.id, e.curr_hash)));
        }

        let (prev_id, prev_hash) = match head.as_ref().and_then(|h| h.as_ref()) {
            Some((id, hash)) => (*id, hash.clone()),
            None => (0, GENESIS_HASH.to_string()),
        };

        let mut entry = AuditEntry {
            id: prev_id + 1,
            timestamp: now_millis(),
            action: draft.action,
            entity_type: draft.entity_type.to_string(),
            entity_id: draft.entity_id,
            actor_id: (draft.actor.id != 0).then_some(draft.actor.id),
            actor_name: Some(draft.actor.name),
            actor_kind: draft.actor.kind,
            prev_state: draft.prev_state,
            next_state: draft.next_state,
            reason: draft.reason,
            details: draft.details,
            prev_hash,
            curr_hash: String::new(),
        };
        entry.curr_hash = compute_hash(&entry);

        self.store.append_audit(entry.clone()).await?;
        *head = Some(Some((entry.id, entry.curr_hash.clone())));

        tracing::debug!(
            sequence = entry.id,
            action = %entry.action,
            entity = %entry.entity_id,
            "Audit entry appended"
        );
        Ok(entry)
    }
}

/// SHA256 over the previous hash plus every content field.
fn compute_hash(entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry.prev_hash.as_bytes());
    hasher.update(entry.id.to_le_bytes());
    hasher.update(entry.timestamp.to_le_bytes());
    hasher.update(entry.action.to_string().as_bytes());
    hasher.update(entry.entity_type.as_bytes());
    hasher.update(entry.entity_id.as_bytes());
    if let Some(id) = entry.actor_id {
        hasher.update(id.to_le_bytes());
    }
    if let Some(name) = &entry.actor_name {
        hasher.update(name.as_bytes());
    }
    hasher.update(format!("{:?}", entry.actor_kind).as_bytes());
    for state in [&entry.prev_state, &entry.next_state] {
        if let Some(value) = state {
            hasher.update(value.to_string().as_bytes());
        }
    }
    if let Some(reason) = &entry.reason {
        hasher.update(reason.as_bytes());
    }
    hasher.update(entry.details.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify the hash chain over a slice of entries (oldest first).
pub fn verify_chain(entries: &[AuditEntry]) -> bool {
    let mut prev_hash = GENESIS_HASH.to_string();
    for entry in entries {
        if entry.prev_hash != prev_hash || entry.curr_hash != compute_hash(entry) {
            return false;
        }
        prev_hash = entry.curr_hash.clone();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use shared::ActorKind;

    #[tokio::test]
    async fn chain_links_and_verifies() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AuditRecorder::new(store.clone());
        let admin = Actor::new(7, "ana", ActorKind::Admin);

        for i in 0..3 {
            recorder
                .record(
                    AuditDraft::new(AuditAction::OrderTransition, "order", format!("{i}"), &admin)
                        .with_reason("test"),
                )
                .await
                .unwrap();
        }

        let entries = store.audit_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].prev_hash, GENESIS_HASH);
        assert_eq!(entries[1].prev_hash, entries[0].curr_hash);
        assert!(verify_chain(&entries));
    }

    #[tokio::test]
    async fn tampering_breaks_verification() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AuditRecorder::new(store.clone());
        let actor = Actor::system();

        recorder
            .record(AuditDraft::new(
                AuditAction::OrderCreated,
                "order",
                "1",
                &actor,
            ))
            .await
            .unwrap();

        let mut entries = store.audit_entries();
        entries[0].entity_id = "999".to_string();
        assert!(!verify_chain(&entries));
    }
}
