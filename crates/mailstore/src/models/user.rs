//! User model: identity and quota holder

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default storage ceiling for a new account: 1 GiB
pub const DEFAULT_MAX_STORAGE: i64 = 1024 * 1024 * 1024;

/// A registered account
///
/// Users are never hard-deleted; deactivation flips `is_active` so that
/// emails referencing the account stay resolvable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Internal numeric id, assigned on creation, stable for the row's lifetime
    pub id: i64,
    /// Unique login name; immutable after creation
    pub username: String,
    /// Unique mail address; may change later (emails snapshot it at send time)
    pub email: String,
    /// Opaque credential hash; never the plaintext. Absent (empty) in any
    /// round-tripped serialized form.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_admin: bool,
    /// Optional custom mail domain owned by this account
    pub custom_domain: Option<String>,
    /// Bytes of attachment content currently charged to this account
    pub storage_used: i64,
    /// Quota ceiling in bytes
    pub max_storage: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Remaining quota headroom in bytes (never negative)
    pub fn storage_remaining(&self) -> i64 {
        (self.max_storage - self.storage_used).max(0)
    }
}

/// Parameters for registering an account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    /// Already-hashed credential; hashing is the caller's concern
    pub password_hash: String,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
        }
    }
}

/// Advisory signal for the registration flow
///
/// `NeedsAdmin` means no admin account exists yet and the flow should promote
/// the account it just registered. The store only reports this; it never
/// promotes anyone itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminBootstrap {
    /// No admin exists; the next registered account should be promoted
    NeedsAdmin,
    /// At least one admin already exists
    Satisfied,
}
