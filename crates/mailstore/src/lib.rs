//! Mailstore - persistence core for the SwiftPost webmail service
//!
//! This crate owns the durable data model for users, messages, attachments,
//! and sessions, and enforces the invariants a mail server needs:
//! - Identity uniqueness (username, email, session token)
//! - Referential integrity between messages and their owners
//! - Storage quota accounting, transactional with the writes it meters
//! - Read-time session expiry with no implicit renewal
//! - First-user-becomes-admin bootstrap, surfaced as an advisory signal
//!
//! It is a library-level storage interface, not a server: transport,
//! authentication protocol details, and attachment byte storage all live in
//! external collaborators. The backing store is a single SQLite file whose
//! path comes from [`StoreConfig`].

pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use models::{
    AdminBootstrap, Attachment, Email, Folder, NewAttachment, NewUser, OutgoingEmail, PageCursor,
    Session, User, DEFAULT_MAX_STORAGE,
};
pub use storage::Mailstore;
