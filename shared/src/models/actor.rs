//! Actor identity
//!
//! Every state change carries the identity that requested it. The scheduler
//! uses the fixed system identity and goes through the same transition entry
//! points as human actors, never a private bypass.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorKind {
    Customer,
    Merchant,
    Admin,
    /// Highest administrative role; the only principal allowed to force
    /// transitions past the adjacency table
    SuperAdmin,
    /// The SLA scheduler's privileged automation identity
    System,
}

impl ActorKind {
    pub fn is_admin(self) -> bool {
        matches!(self, ActorKind::Admin | ActorKind::SuperAdmin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub name: String,
    pub kind: ActorKind,
}

impl Actor {
    pub fn new(id: i64, name: impl Into<String>, kind: ActorKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }

    /// The scheduler's automation identity.
    pub fn system() -> Self {
        Self {
            id: 0,
            name: "system".to_string(),
            kind: ActorKind::System,
        }
    }
}
