//! SQLite-backed persistence for mail entities
//!
//! One durable store owns the four entity tables (users, emails,
//! attachments, sessions) and enforces their lifecycle rules: identity
//! uniqueness, referential integrity, quota accounting, soft deletes,
//! and read-time session expiry.

mod sqlite;

pub use sqlite::Mailstore;
