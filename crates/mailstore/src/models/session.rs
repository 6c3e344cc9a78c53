//! Session model: an ephemeral authentication grant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issued login session
///
/// Sessions are created at login and never mutated afterwards. Validity is
/// computed at read time against `expires_at`; nothing sweeps expired rows
/// except an explicit, externally scheduled purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    /// Opaque unique token handed to the client
    pub token: String,
    /// Client address at login; advisory, audit-only
    pub ip_address: Option<String>,
    /// Client user-agent at login; advisory, audit-only
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is past its expiry at the given instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
