//! Attachment model: binary payload descriptor bound to one email

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata for an attachment
///
/// Only the descriptor lives here; the actual bytes live behind `filepath`
/// in whatever blob store the serving layer uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub email_id: i64,
    pub uuid: Uuid,
    pub filename: String,
    /// Opaque location reference into the external blob store
    pub filepath: String,
    /// Size in bytes; this is the amount charged against the owner's quota
    pub size: i64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for attaching a file to a message
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub filepath: String,
    pub size: i64,
    pub mime_type: String,
}

impl NewAttachment {
    pub fn new(
        filename: impl Into<String>,
        filepath: impl Into<String>,
        size: i64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            filepath: filepath.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}
