//! Email model: a stored message record, not a transport artifact

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message row
///
/// `id` is the internal join key; `uuid` is the stable handle exposed to
/// clients. `sender_email`/`recipient_email` are snapshots copied from the
/// users table at write time, so the message stays readable even if the
/// owning account's address later changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: i64,
    pub uuid: Uuid,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub sender_email: String,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    pub is_read: bool,
    pub is_starred: bool,
    /// Soft-delete flag; the row is never physically removed by normal operation
    pub is_deleted: bool,
    pub is_draft: bool,
    pub has_attachment: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Email {
    /// Cursor positioned at this email, for fetching the next (older) page
    pub fn page_cursor(&self) -> PageCursor {
        PageCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Parameters for creating a message (send or draft-save)
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub sender_id: i64,
    pub recipient_id: i64,
    pub subject: String,
    pub body: String,
    pub is_draft: bool,
}

impl OutgoingEmail {
    pub fn new(
        sender_id: i64,
        recipient_id: i64,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender_id,
            recipient_id,
            subject: subject.into(),
            body: body.into(),
            is_draft: false,
        }
    }

    /// Mark this message as a draft rather than a sent mail
    pub fn draft(mut self) -> Self {
        self.is_draft = true;
        self
    }
}

/// Keyset pagination cursor over `(created_at, id)`
///
/// Listing pages resume strictly after the last-seen row, so concurrent
/// inserts can never double-count or skip rows the way OFFSET paging does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: i64,
}

/// Mailbox folders, each a filtered view over the emails table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folder {
    /// Received, not deleted, not drafts
    Inbox,
    /// Sent, not deleted, not drafts
    Sent,
    /// Starred in either direction, not deleted
    Starred,
    /// Unsent drafts owned by the user
    Drafts,
    /// Soft-deleted mail in either direction
    Trash,
}
