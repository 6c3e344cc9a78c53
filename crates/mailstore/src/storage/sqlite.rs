//! SQLite-backed mail store

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::models::{
    AdminBootstrap, Attachment, Email, Folder, NewAttachment, NewUser, OutgoingEmail, PageCursor,
    Session, User, DEFAULT_MAX_STORAGE,
};

/// Database migrations
///
/// Applied in order on every open; the user_version pragma tracks which
/// migrations have already run, so re-opening an existing store is a no-op.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                custom_domain TEXT,
                storage_used INTEGER NOT NULL DEFAULT 0,
                max_storage INTEGER NOT NULL DEFAULT 1073741824,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX idx_users_username ON users(username);
            CREATE UNIQUE INDEX idx_users_email ON users(email);

            -- Message records. sender_email/recipient_email are snapshots
            -- taken at write time; is_deleted is a soft-delete flag, never a
            -- row removal.
            CREATE TABLE emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                sender_id INTEGER NOT NULL,
                recipient_id INTEGER NOT NULL,
                sender_email TEXT NOT NULL,
                recipient_email TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                is_draft INTEGER NOT NULL DEFAULT 0,
                has_attachment INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (sender_id) REFERENCES users (id),
                FOREIGN KEY (recipient_id) REFERENCES users (id)
            );

            CREATE UNIQUE INDEX idx_emails_uuid ON emails(uuid);
            CREATE INDEX idx_emails_recipient ON emails(recipient_id, created_at DESC);
            CREATE INDEX idx_emails_sender ON emails(sender_id, created_at DESC);

            CREATE TABLE attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id INTEGER NOT NULL,
                uuid TEXT NOT NULL,
                filename TEXT NOT NULL,
                filepath TEXT NOT NULL,
                size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (email_id) REFERENCES emails (id)
            );

            CREATE UNIQUE INDEX idx_attachments_uuid ON attachments(uuid);
            CREATE INDEX idx_attachments_email ON attachments(email_id);

            CREATE TABLE sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                token TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (id)
            );

            CREATE UNIQUE INDEX idx_sessions_token ON sessions(token);
            "#,
        ),
    ])
}

const USER_COLS: &str = "id, username, email, password_hash, is_admin, custom_domain, \
                         storage_used, max_storage, is_active, created_at, updated_at";

const EMAIL_COLS: &str = "id, uuid, sender_id, recipient_id, sender_email, recipient_email, \
                          subject, body, is_read, is_starred, is_deleted, is_draft, \
                          has_attachment, created_at, updated_at";

const ATTACHMENT_COLS: &str = "id, email_id, uuid, filename, filepath, size, mime_type, created_at";

/// Parse a stored RFC 3339 timestamp
///
/// A corrupt value is a conversion failure, never silently replaced: a
/// made-up timestamp would quietly resort mailboxes.
fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_uuid(idx: usize, s: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        is_admin: row.get(4)?,
        custom_domain: row.get(5)?,
        storage_used: row.get(6)?,
        max_storage: row.get(7)?,
        is_active: row.get(8)?,
        created_at: parse_ts(9, &row.get::<_, String>(9)?)?,
        updated_at: parse_ts(10, &row.get::<_, String>(10)?)?,
    })
}

fn email_from_row(row: &rusqlite::Row) -> rusqlite::Result<Email> {
    Ok(Email {
        id: row.get(0)?,
        uuid: parse_uuid(1, row.get(1)?)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        sender_email: row.get(4)?,
        recipient_email: row.get(5)?,
        subject: row.get(6)?,
        body: row.get(7)?,
        is_read: row.get(8)?,
        is_starred: row.get(9)?,
        is_deleted: row.get(10)?,
        is_draft: row.get(11)?,
        has_attachment: row.get(12)?,
        created_at: parse_ts(13, &row.get::<_, String>(13)?)?,
        updated_at: parse_ts(14, &row.get::<_, String>(14)?)?,
    })
}

fn attachment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        email_id: row.get(1)?,
        uuid: parse_uuid(2, row.get(2)?)?,
        filename: row.get(3)?,
        filepath: row.get(4)?,
        size: row.get(5)?,
        mime_type: row.get(6)?,
        created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
    })
}

/// The SwiftPost persistence core
///
/// A single SQLite file holds all four entity tables. The store is safe to
/// share across request handlers (`Send + Sync`); every multi-row mutation
/// runs inside one transaction so partial application is impossible.
pub struct Mailstore {
    conn: Mutex<Connection>,
}

impl Mailstore {
    /// Open (or create) the store at the configured path
    ///
    /// Idempotent: creates parent directories, applies the schema if absent,
    /// and is a no-op on a store that is already up to date. Any failure to
    /// open or write the backing file surfaces as `StorageUnavailable`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(&config.db_path)?;

        // WAL keeps readers unblocked during writes; foreign_keys ON turns
        // dangling sender/recipient references into constraint errors at
        // write time instead of silent corruption.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations().to_latest(&mut conn)?;

        info!("Mailstore ready at {:?}", config.db_path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Liveness probe for an external supervisor
    ///
    /// A trivial query against the connection; nothing else. The supervisor
    /// owns the polling schedule.
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    // === Users ===

    /// Register an account
    ///
    /// Returns the stored user together with the admin-bootstrap advisory:
    /// `NeedsAdmin` exactly when the store held no users before this
    /// creation. The registration flow decides whether to promote; the store
    /// never does it unilaterally. Duplicate username or email fails with
    /// `ConstraintViolation`.
    pub fn create_user(&self, new: NewUser) -> Result<(User, AdminBootstrap)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let prior: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;

        let now = Utc::now();
        let ts = now.to_rfc3339();
        tx.execute(
            "INSERT INTO users (username, email, password_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![new.username, new.email, new.password_hash, ts, ts],
        )?;
        let id = tx.last_insert_rowid();

        tx.commit()?;

        let advisory = if prior == 0 {
            info!("First account {:?} registered with no admin present", new.username);
            AdminBootstrap::NeedsAdmin
        } else {
            AdminBootstrap::Satisfied
        };

        Ok((
            User {
                id,
                username: new.username,
                email: new.email,
                password_hash: new.password_hash,
                is_admin: false,
                custom_domain: None,
                storage_used: 0,
                max_storage: DEFAULT_MAX_STORAGE,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            advisory,
        ))
    }

    /// Advisory check for the registration flow: does any admin exist yet?
    pub fn admin_bootstrap(&self) -> Result<AdminBootstrap> {
        let conn = self.conn.lock().unwrap();
        let admins: i64 =
            conn.query_row("SELECT COUNT(*) FROM users WHERE is_admin = 1", [], |row| {
                row.get(0)
            })?;
        Ok(if admins == 0 {
            AdminBootstrap::NeedsAdmin
        } else {
            AdminBootstrap::Satisfied
        })
    }

    pub fn user_by_id(&self, id: i64) -> Result<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?"),
            [id],
            user_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn user_by_email(&self, email: &str) -> Result<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE email = ?"),
            [email],
            user_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn user_by_username(&self, username: &str) -> Result<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE username = ?"),
            [username],
            user_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    /// Replace the stored credential hash
    pub fn set_password(&self, user_id: i64, password_hash: &str) -> Result<()> {
        self.update_user_column(user_id, "password_hash", password_hash)
    }

    /// Change the account's mail address
    ///
    /// Existing emails keep their snapshot of the old address.
    pub fn set_email(&self, user_id: i64, email: &str) -> Result<()> {
        self.update_user_column(user_id, "email", email)
    }

    pub fn set_custom_domain(&self, user_id: i64, domain: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE users SET custom_domain = ?, updated_at = ? WHERE id = ?",
            params![domain, Utc::now().to_rfc3339(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Adjust the quota ceiling (admin operation)
    pub fn set_max_storage(&self, user_id: i64, max_storage: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE users SET max_storage = ?, updated_at = ? WHERE id = ?",
            params![max_storage, Utc::now().to_rfc3339(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Grant or revoke admin status (explicit action, post-bootstrap)
    pub fn set_admin(&self, user_id: i64, is_admin: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE users SET is_admin = ?, updated_at = ? WHERE id = ?",
            params![is_admin, Utc::now().to_rfc3339(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Activate or deactivate an account
    ///
    /// Deactivation stands in for deletion: user rows are never removed, so
    /// emails referencing them stay resolvable.
    pub fn set_active(&self, user_id: i64, is_active: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?",
            params![is_active, Utc::now().to_rfc3339(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn update_user_column(&self, user_id: i64, column: &str, value: &str) -> Result<()> {
        // column is always a literal from the caller above, never user input
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!("UPDATE users SET {column} = ?, updated_at = ? WHERE id = ?"),
            params![value, Utc::now().to_rfc3339(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// List accounts for the admin surface, newest first
    pub fn list_users(&self, limit: usize, offset: usize) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLS} FROM users ORDER BY id DESC LIMIT ? OFFSET ?"
        ))?;
        let users = stmt
            .query_map(params![limit as i64, offset as i64], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn count_users(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// List every message across all accounts, newest first (admin surface)
    ///
    /// Includes drafts and soft-deleted rows; oversight sees everything.
    /// Offset paging, like `list_users`: this is an operator view, not a
    /// mailbox under concurrent delivery.
    pub fn list_all_emails(&self, limit: usize, offset: usize) -> Result<Vec<Email>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EMAIL_COLS} FROM emails ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))?;
        let emails = stmt
            .query_map(params![limit as i64, offset as i64], email_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(emails)
    }

    pub fn count_all_emails(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Attachment count and total bytes across a user's mail, both directions
    ///
    /// A reporting view over the attachment rows themselves, independent of
    /// the `storage_used` counter (which charges senders only).
    pub fn attachment_stats_for_user(&self, user_id: i64) -> Result<(usize, i64)> {
        let conn = self.conn.lock().unwrap();
        let (count, bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(a.size), 0)
             FROM attachments a
             JOIN emails e ON a.email_id = e.id
             WHERE e.sender_id = ?1 OR e.recipient_id = ?1",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count as usize, bytes))
    }

    /// Whether `incoming_bytes` more would still fit under the user's ceiling
    ///
    /// Callers must check this before accepting new content and treat a
    /// `false` as `QuotaExceeded`, not as something to retry.
    pub fn check_quota(&self, user_id: i64, incoming_bytes: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let (used, max): (i64, i64) = conn
            .query_row(
                "SELECT storage_used, max_storage FROM users WHERE id = ?",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;
        Ok(used + incoming_bytes <= max)
    }

    /// Adjust a user's storage counter inside the caller's transaction
    ///
    /// Positive deltas are checked against the ceiling first and fail with
    /// `QuotaExceeded` before anything is written. Must only be called inside
    /// the same transaction as the row writes the delta accounts for.
    fn charge_storage(tx: &Connection, user_id: i64, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        if delta > 0 {
            let (used, max): (i64, i64) = tx
                .query_row(
                    "SELECT storage_used, max_storage FROM users WHERE id = ?",
                    [user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| {
                    StoreError::ConstraintViolation(format!("no such user {user_id}"))
                })?;
            if used + delta > max {
                return Err(StoreError::QuotaExceeded {
                    used,
                    incoming: delta,
                    max,
                });
            }
        }
        tx.execute(
            "UPDATE users SET storage_used = storage_used + ?, updated_at = ? WHERE id = ?",
            params![delta, Utc::now().to_rfc3339(), user_id],
        )?;
        Ok(())
    }

    // === Emails ===

    /// Persist a message (send or draft-save) with its attachments
    ///
    /// One transaction covers the whole unit: both user references are
    /// resolved (and their addresses snapshotted), attachment rows written,
    /// and the sender's storage counter charged by the exact attachment byte
    /// total. Either everything becomes visible or nothing does.
    pub fn create_email(
        &self,
        outgoing: OutgoingEmail,
        attachments: &[NewAttachment],
    ) -> Result<Email> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let sender_email: String = tx
            .query_row(
                "SELECT email FROM users WHERE id = ?",
                [outgoing.sender_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                StoreError::ConstraintViolation(format!("no such sender {}", outgoing.sender_id))
            })?;
        let recipient_email: String = tx
            .query_row(
                "SELECT email FROM users WHERE id = ?",
                [outgoing.recipient_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                StoreError::ConstraintViolation(format!(
                    "no such recipient {}",
                    outgoing.recipient_id
                ))
            })?;

        let incoming: i64 = attachments.iter().map(|a| a.size).sum();
        // Reject over-quota sends before any row is written.
        Self::charge_storage(&tx, outgoing.sender_id, incoming)?;

        let uuid = Uuid::new_v4();
        let now = Utc::now();
        let ts = now.to_rfc3339();
        let has_attachment = !attachments.is_empty();

        tx.execute(
            "INSERT INTO emails (
                uuid, sender_id, recipient_id, sender_email, recipient_email,
                subject, body, is_draft, has_attachment, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                uuid.to_string(),
                outgoing.sender_id,
                outgoing.recipient_id,
                sender_email,
                recipient_email,
                outgoing.subject,
                outgoing.body,
                outgoing.is_draft,
                has_attachment,
                ts,
                ts,
            ],
        )?;
        let email_id = tx.last_insert_rowid();

        for attachment in attachments {
            tx.execute(
                "INSERT INTO attachments (email_id, uuid, filename, filepath, size, mime_type, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    email_id,
                    Uuid::new_v4().to_string(),
                    attachment.filename,
                    attachment.filepath,
                    attachment.size,
                    attachment.mime_type,
                    ts,
                ],
            )?;
        }

        tx.commit()?;

        debug!(
            "Stored email {} from {} to {} ({} attachments, {} bytes)",
            uuid,
            outgoing.sender_id,
            outgoing.recipient_id,
            attachments.len(),
            incoming
        );

        Ok(Email {
            id: email_id,
            uuid,
            sender_id: outgoing.sender_id,
            recipient_id: outgoing.recipient_id,
            sender_email,
            recipient_email,
            subject: outgoing.subject,
            body: outgoing.body,
            is_read: false,
            is_starred: false,
            is_deleted: false,
            is_draft: outgoing.is_draft,
            has_attachment,
            created_at: now,
            updated_at: now,
        })
    }

    /// Resolve the externally exposed handle to a full record
    ///
    /// Soft-deleted emails still resolve; only queries hide them.
    pub fn email_by_uuid(&self, uuid: &Uuid) -> Result<Email> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {EMAIL_COLS} FROM emails WHERE uuid = ?"),
            [uuid.to_string()],
            email_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    /// Inbox view: received mail, newest first, soft-deleted rows excluded
    pub fn list_inbox(
        &self,
        user_id: i64,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> Result<Vec<Email>> {
        self.list_folder(user_id, Folder::Inbox, cursor, limit)
    }

    /// Sent view, symmetric to the inbox
    pub fn list_sent(
        &self,
        user_id: i64,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> Result<Vec<Email>> {
        self.list_folder(user_id, Folder::Sent, cursor, limit)
    }

    /// List a folder newest-first with keyset pagination
    ///
    /// Pages are keyed on `(created_at, id)` of the last-seen row, so rows
    /// inserted between page fetches can never duplicate or skip results.
    pub fn list_folder(
        &self,
        user_id: i64,
        folder: Folder,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> Result<Vec<Email>> {
        let conn = self.conn.lock().unwrap();
        let filter = Self::folder_filter(folder);

        let emails = match cursor {
            Some(c) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {EMAIL_COLS} FROM emails
                     WHERE {filter}
                       AND (created_at < ?2 OR (created_at = ?2 AND id < ?3))
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?4"
                ))?;
                stmt.query_map(
                    params![user_id, c.created_at.to_rfc3339(), c.id, limit as i64],
                    email_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {EMAIL_COLS} FROM emails
                     WHERE {filter}
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2"
                ))?;
                stmt.query_map(params![user_id, limit as i64], email_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        Ok(emails)
    }

    /// Count the rows a folder view would return
    pub fn count_folder(&self, user_id: i64, folder: Folder) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let filter = Self::folder_filter(folder);
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM emails WHERE {filter}"),
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// WHERE fragment for a folder view; `?1` binds the user id
    fn folder_filter(folder: Folder) -> &'static str {
        match folder {
            Folder::Inbox => "recipient_id = ?1 AND is_deleted = 0 AND is_draft = 0",
            Folder::Sent => "sender_id = ?1 AND is_deleted = 0 AND is_draft = 0",
            Folder::Starred => {
                "(sender_id = ?1 OR recipient_id = ?1) AND is_starred = 1 AND is_deleted = 0"
            }
            Folder::Drafts => "sender_id = ?1 AND is_draft = 1 AND is_deleted = 0",
            Folder::Trash => "(sender_id = ?1 OR recipient_id = ?1) AND is_deleted = 1",
        }
    }

    /// Set the read flag; idempotent, setting the current value is a no-op
    pub fn set_read(&self, uuid: &Uuid, is_read: bool) -> Result<()> {
        self.set_email_flag(uuid, "is_read", is_read)
    }

    /// Set the starred flag; idempotent
    pub fn set_starred(&self, uuid: &Uuid, is_starred: bool) -> Result<()> {
        self.set_email_flag(uuid, "is_starred", is_starred)
    }

    /// Soft-delete (move to trash) or undelete; idempotent
    ///
    /// The row and its attachments stay in place; only folder views change.
    pub fn set_deleted(&self, uuid: &Uuid, is_deleted: bool) -> Result<()> {
        self.set_email_flag(uuid, "is_deleted", is_deleted)
    }

    fn set_email_flag(&self, uuid: &Uuid, column: &str, value: bool) -> Result<()> {
        // column is always a literal from the callers above, never user input
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!("UPDATE emails SET {column} = ?, updated_at = ? WHERE uuid = ?"),
            params![value, Utc::now().to_rfc3339(), uuid.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Edit an unsent draft's subject and body
    pub fn update_draft(&self, uuid: &Uuid, subject: &str, body: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE emails SET subject = ?, body = ?, updated_at = ?
             WHERE uuid = ? AND is_draft = 1",
            params![subject, body, Utc::now().to_rfc3339(), uuid.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Permanently remove an email, its attachments, and their quota charge
    ///
    /// This is the one explicit hard-delete path; normal deletion is the
    /// soft-delete flag. Attachment bytes are reclaimed from the sender's
    /// counter in the same transaction as the row removals.
    pub fn purge_email(&self, uuid: &Uuid) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let (email_id, sender_id): (i64, i64) = tx
            .query_row(
                "SELECT id, sender_id FROM emails WHERE uuid = ?",
                [uuid.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        let freed: i64 = tx.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM attachments WHERE email_id = ?",
            [email_id],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM attachments WHERE email_id = ?", [email_id])?;
        tx.execute("DELETE FROM emails WHERE id = ?", [email_id])?;
        Self::charge_storage(&tx, sender_id, -freed)?;

        tx.commit()?;

        info!("Purged email {} ({} bytes reclaimed)", uuid, freed);
        Ok(())
    }

    // === Attachments ===

    /// Append an attachment to an existing email (typically a draft)
    ///
    /// Charges the sender's quota in the same transaction and keeps the
    /// email's has_attachment flag in sync.
    pub fn add_attachment(&self, email_uuid: &Uuid, new: NewAttachment) -> Result<Attachment> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let (email_id, sender_id): (i64, i64) = tx
            .query_row(
                "SELECT id, sender_id FROM emails WHERE uuid = ?",
                [email_uuid.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        Self::charge_storage(&tx, sender_id, new.size)?;

        let uuid = Uuid::new_v4();
        let now = Utc::now();
        tx.execute(
            "INSERT INTO attachments (email_id, uuid, filename, filepath, size, mime_type, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                email_id,
                uuid.to_string(),
                new.filename,
                new.filepath,
                new.size,
                new.mime_type,
                now.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE emails SET has_attachment = 1, updated_at = ? WHERE id = ?",
            params![now.to_rfc3339(), email_id],
        )?;

        tx.commit()?;

        Ok(Attachment {
            id,
            email_id,
            uuid,
            filename: new.filename,
            filepath: new.filepath,
            size: new.size,
            mime_type: new.mime_type,
            created_at: now,
        })
    }

    pub fn attachment_by_uuid(&self, uuid: &Uuid) -> Result<Attachment> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {ATTACHMENT_COLS} FROM attachments WHERE uuid = ?"),
            [uuid.to_string()],
            attachment_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn attachments_for_email(&self, email_id: i64) -> Result<Vec<Attachment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ATTACHMENT_COLS} FROM attachments WHERE email_id = ? ORDER BY id"
        ))?;
        let attachments = stmt
            .query_map([email_id], attachment_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(attachments)
    }

    /// Remove an attachment and reclaim its bytes from the sender's counter
    ///
    /// Re-derives the owning email's has_attachment flag in the same
    /// transaction.
    pub fn delete_attachment(&self, uuid: &Uuid) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let (attachment_id, email_id, size): (i64, i64, i64) = tx
            .query_row(
                "SELECT id, email_id, size FROM attachments WHERE uuid = ?",
                [uuid.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        let sender_id: i64 = tx.query_row(
            "SELECT sender_id FROM emails WHERE id = ?",
            [email_id],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM attachments WHERE id = ?", [attachment_id])?;
        Self::charge_storage(&tx, sender_id, -size)?;

        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM attachments WHERE email_id = ?",
            [email_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE emails SET has_attachment = ?, updated_at = ? WHERE id = ?",
            params![remaining > 0, Utc::now().to_rfc3339(), email_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    // === Sessions ===

    /// Issue a session for a user at login
    ///
    /// The token is the opaque handle handed back to the client; it is never
    /// renewed or mutated afterwards.
    pub fn create_session(
        &self,
        user_id: i64,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        ttl: Duration,
    ) -> Result<Session> {
        let conn = self.conn.lock().unwrap();

        let token = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let expires_at = now + ttl;

        conn.execute(
            "INSERT INTO sessions (user_id, token, ip_address, user_agent, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                user_id,
                token,
                ip_address,
                user_agent,
                expires_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(Session {
            id,
            user_id,
            token,
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            expires_at,
            created_at: now,
        })
    }

    /// Resolve a session token to its user
    ///
    /// Returns `None` both for a token that was never issued and for one
    /// past its expiry; callers cannot distinguish the two. Validation never
    /// extends the expiry, and expired rows are left in place for the
    /// external reclamation sweep.
    pub fn validate_session(&self, token: &str) -> Result<Option<User>> {
        match self.session_user(token) {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) | Err(StoreError::Expired) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Look up a session and its user, distinguishing absent from expired
    ///
    /// Internal only: the public surface collapses both failure cases.
    fn session_user(&self, token: &str) -> Result<User> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                "SELECT s.expires_at, u.id, u.username, u.email, u.password_hash,
                        u.is_admin, u.custom_domain, u.storage_used, u.max_storage,
                        u.is_active, u.created_at, u.updated_at
                 FROM sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?",
                [token],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        User {
                            id: row.get(1)?,
                            username: row.get(2)?,
                            email: row.get(3)?,
                            password_hash: row.get(4)?,
                            is_admin: row.get(5)?,
                            custom_domain: row.get(6)?,
                            storage_used: row.get(7)?,
                            max_storage: row.get(8)?,
                            is_active: row.get(9)?,
                            created_at: parse_ts(10, &row.get::<_, String>(10)?)?,
                            updated_at: parse_ts(11, &row.get::<_, String>(11)?)?,
                        },
                    ))
                },
            )
            .optional()?;

        let (expires_at, user) = row.ok_or(StoreError::NotFound)?;
        if Utc::now() >= parse_ts(0, &expires_at)? {
            return Err(StoreError::Expired);
        }
        Ok(user)
    }

    /// Drop a session (logout); idempotent, a missing token is not an error
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
        Ok(())
    }

    /// Remove expired session rows; returns how many were reclaimed
    ///
    /// Invoked on an externally owned schedule; the store itself holds no
    /// background timer.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let purged = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?",
            [Utc::now().to_rfc3339()],
        )?;
        if purged > 0 {
            debug!("Purged {} expired sessions", purged);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_store() -> (Mailstore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("mail.test.sqlite"));
        let store = Mailstore::open(&config).unwrap();
        (store, dir)
    }

    fn register(store: &Mailstore, username: &str) -> User {
        let new = NewUser::new(username, format!("{username}@example.com"), "hash");
        store.create_user(new).unwrap().0
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("mail.test.sqlite"));

        let store = Mailstore::open(&config).unwrap();
        register(&store, "alice");
        drop(store);

        // Re-opening must not recreate tables or lose data.
        let store = Mailstore::open(&config).unwrap();
        assert_eq!(store.count_users().unwrap(), 1);
        store.ping().unwrap();
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("nested/deeper/mail.test.sqlite"));
        let store = Mailstore::open(&config).unwrap();
        store.ping().unwrap();
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let (store, _dir) = create_test_store();
        register(&store, "alice");

        let dup = NewUser::new("alice", "other@example.com", "hash");
        let err = store.create_user(dup).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let (store, _dir) = create_test_store();
        register(&store, "alice");

        let dup = NewUser::new("alice2", "alice@example.com", "hash");
        let err = store.create_user(dup).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));

        // Distinct pair still succeeds.
        register(&store, "bob");
        assert_eq!(store.count_users().unwrap(), 2);
    }

    #[test]
    fn test_admin_bootstrap_advisory() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.admin_bootstrap().unwrap(), AdminBootstrap::NeedsAdmin);

        let (alice, advisory) = store
            .create_user(NewUser::new("alice", "alice@example.com", "hash"))
            .unwrap();
        assert_eq!(advisory, AdminBootstrap::NeedsAdmin);

        let (_, advisory) = store
            .create_user(NewUser::new("bob", "bob@example.com", "hash"))
            .unwrap();
        assert_eq!(advisory, AdminBootstrap::Satisfied);

        // The store only advises; promotion is the caller's explicit action.
        store.set_admin(alice.id, true).unwrap();
        assert_eq!(store.admin_bootstrap().unwrap(), AdminBootstrap::Satisfied);
        assert!(store.user_by_id(alice.id).unwrap().is_admin);
    }

    #[test]
    fn test_user_lookup_by_either_identifier() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");

        assert_eq!(store.user_by_username("alice").unwrap().id, alice.id);
        assert_eq!(store.user_by_email("alice@example.com").unwrap().id, alice.id);
        assert!(matches!(
            store.user_by_username("nobody"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_deactivate_keeps_row() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");

        store.set_active(alice.id, false).unwrap();
        let reloaded = store.user_by_id(alice.id).unwrap();
        assert!(!reloaded.is_active);
        assert_eq!(store.count_users().unwrap(), 1);
    }

    #[test]
    fn test_email_change_keeps_snapshot() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");

        let email = store
            .create_email(OutgoingEmail::new(alice.id, bob.id, "hi", "body"), &[])
            .unwrap();
        assert_eq!(email.sender_email, "alice@example.com");

        store.set_email(alice.id, "new-alice@example.com").unwrap();

        // The message keeps the address it was sent from.
        let reloaded = store.email_by_uuid(&email.uuid).unwrap();
        assert_eq!(reloaded.sender_email, "alice@example.com");
        assert_eq!(
            store.user_by_id(alice.id).unwrap().email,
            "new-alice@example.com"
        );
    }

    #[test]
    fn test_email_to_missing_user_rejected() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");

        let err = store
            .create_email(OutgoingEmail::new(alice.id, 999, "hi", "body"), &[])
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_attachment_send_charges_sender() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");

        let attachment = NewAttachment::new("a.pdf", "blobs/a", 4096, "application/pdf");
        let email = store
            .create_email(
                OutgoingEmail::new(alice.id, bob.id, "doc", "see attached"),
                &[attachment],
            )
            .unwrap();

        assert!(email.has_attachment);
        assert_eq!(store.user_by_id(alice.id).unwrap().storage_used, 4096);
        assert_eq!(store.user_by_id(bob.id).unwrap().storage_used, 0);
        assert_eq!(store.attachments_for_email(email.id).unwrap().len(), 1);
    }

    #[test]
    fn test_quota_exceeded_rolls_back_everything() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");
        store.set_max_storage(alice.id, 1000).unwrap();

        let attachment = NewAttachment::new("big.bin", "blobs/big", 1001, "application/octet-stream");
        let err = store
            .create_email(
                OutgoingEmail::new(alice.id, bob.id, "big", "body"),
                &[attachment],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));

        // Nothing was persisted: no email, no counter movement.
        assert_eq!(store.user_by_id(alice.id).unwrap().storage_used, 0);
        assert_eq!(store.count_folder(bob.id, Folder::Inbox).unwrap(), 0);

        // Exactly at the ceiling is allowed.
        let attachment = NewAttachment::new("fits.bin", "blobs/fits", 1000, "application/octet-stream");
        store
            .create_email(
                OutgoingEmail::new(alice.id, bob.id, "fits", "body"),
                &[attachment],
            )
            .unwrap();
        assert_eq!(store.user_by_id(alice.id).unwrap().storage_used, 1000);
    }

    #[test]
    fn test_check_quota() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        store.set_max_storage(alice.id, 100).unwrap();

        assert!(store.check_quota(alice.id, 100).unwrap());
        assert!(!store.check_quota(alice.id, 101).unwrap());
        assert!(matches!(
            store.check_quota(999, 1),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_flags_are_idempotent() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");
        let email = store
            .create_email(OutgoingEmail::new(alice.id, bob.id, "hi", "body"), &[])
            .unwrap();

        store.set_read(&email.uuid, true).unwrap();
        store.set_read(&email.uuid, true).unwrap();
        store.set_starred(&email.uuid, true).unwrap();

        let reloaded = store.email_by_uuid(&email.uuid).unwrap();
        assert!(reloaded.is_read);
        assert!(reloaded.is_starred);

        store.set_starred(&email.uuid, false).unwrap();
        assert!(!store.email_by_uuid(&email.uuid).unwrap().is_starred);

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.set_read(&missing, true),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_soft_delete_hides_but_keeps_rows() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");
        let attachment = NewAttachment::new("a.txt", "blobs/a", 10, "text/plain");
        let email = store
            .create_email(
                OutgoingEmail::new(alice.id, bob.id, "hi", "body"),
                &[attachment],
            )
            .unwrap();

        store.set_deleted(&email.uuid, true).unwrap();

        // Hidden from the inbox, visible in trash, still resolvable by uuid,
        // attachments untouched.
        assert!(store.list_inbox(bob.id, None, 10).unwrap().is_empty());
        assert_eq!(store.count_folder(bob.id, Folder::Trash).unwrap(), 1);
        assert!(store.email_by_uuid(&email.uuid).unwrap().is_deleted);
        assert_eq!(store.attachments_for_email(email.id).unwrap().len(), 1);

        // Undelete restores the inbox view.
        store.set_deleted(&email.uuid, false).unwrap();
        assert_eq!(store.list_inbox(bob.id, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_folder_views() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");

        let sent = store
            .create_email(OutgoingEmail::new(alice.id, bob.id, "sent", "body"), &[])
            .unwrap();
        let draft = store
            .create_email(
                OutgoingEmail::new(alice.id, bob.id, "draft", "wip").draft(),
                &[],
            )
            .unwrap();
        store.set_starred(&sent.uuid, true).unwrap();

        assert_eq!(store.count_folder(alice.id, Folder::Sent).unwrap(), 1);
        assert_eq!(store.count_folder(alice.id, Folder::Drafts).unwrap(), 1);
        assert_eq!(store.count_folder(alice.id, Folder::Starred).unwrap(), 1);
        // Drafts never show up in the recipient's inbox.
        assert_eq!(store.count_folder(bob.id, Folder::Inbox).unwrap(), 1);

        store.update_draft(&draft.uuid, "draft v2", "more").unwrap();
        assert_eq!(store.email_by_uuid(&draft.uuid).unwrap().subject, "draft v2");

        // Sent mail is not a draft and cannot be edited as one.
        assert!(matches!(
            store.update_draft(&sent.uuid, "x", "y"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_cursor_pagination_is_stable_under_inserts() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");
        let carol = register(&store, "carol");

        for i in 0..5 {
            store
                .create_email(
                    OutgoingEmail::new(alice.id, bob.id, format!("mail {i}"), "body"),
                    &[],
                )
                .unwrap();
        }

        let page1 = store.list_inbox(bob.id, None, 2).unwrap();
        assert_eq!(page1.len(), 2);

        // New mail from a different sender arrives mid-pagination.
        store
            .create_email(OutgoingEmail::new(carol.id, bob.id, "interloper", "body"), &[])
            .unwrap();

        let cursor = page1.last().unwrap().page_cursor();
        let page2 = store.list_inbox(bob.id, Some(cursor), 2).unwrap();
        let cursor = page2.last().unwrap().page_cursor();
        let page3 = store.list_inbox(bob.id, Some(cursor), 2).unwrap();

        let mut seen: Vec<i64> = page1
            .iter()
            .chain(&page2)
            .chain(&page3)
            .map(|e| e.id)
            .collect();

        // Strictly decreasing (created_at, id) across pages: the original
        // five rows each appear exactly once, the interloper never does.
        let keys: Vec<PageCursor> = page1
            .iter()
            .chain(&page2)
            .chain(&page3)
            .map(Email::page_cursor)
            .collect();
        for pair in keys.windows(2) {
            assert!(
                (pair[1].created_at, pair[1].id) < (pair[0].created_at, pair[0].id),
                "pages must be strictly decreasing"
            );
        }

        assert_eq!(seen.len(), 5);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 5, "no duplicate or skipped rows");
    }

    #[test]
    fn test_add_and_delete_attachment() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");
        let draft = store
            .create_email(
                OutgoingEmail::new(alice.id, bob.id, "draft", "wip").draft(),
                &[],
            )
            .unwrap();
        assert!(!draft.has_attachment);

        let attachment = store
            .add_attachment(&draft.uuid, NewAttachment::new("a.png", "blobs/a", 256, "image/png"))
            .unwrap();
        assert!(store.email_by_uuid(&draft.uuid).unwrap().has_attachment);
        assert_eq!(store.user_by_id(alice.id).unwrap().storage_used, 256);
        assert_eq!(
            store.attachment_by_uuid(&attachment.uuid).unwrap().filename,
            "a.png"
        );

        store.delete_attachment(&attachment.uuid).unwrap();
        assert_eq!(store.user_by_id(alice.id).unwrap().storage_used, 0);
        assert!(!store.email_by_uuid(&draft.uuid).unwrap().has_attachment);
        assert!(matches!(
            store.attachment_by_uuid(&attachment.uuid),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_purge_email_reclaims_quota() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");
        let email = store
            .create_email(
                OutgoingEmail::new(alice.id, bob.id, "hi", "body"),
                &[
                    NewAttachment::new("a", "blobs/a", 100, "text/plain"),
                    NewAttachment::new("b", "blobs/b", 200, "text/plain"),
                ],
            )
            .unwrap();
        assert_eq!(store.user_by_id(alice.id).unwrap().storage_used, 300);

        store.purge_email(&email.uuid).unwrap();

        assert_eq!(store.user_by_id(alice.id).unwrap().storage_used, 0);
        assert!(matches!(
            store.email_by_uuid(&email.uuid),
            Err(StoreError::NotFound)
        ));
        assert!(store.attachments_for_email(email.id).unwrap().is_empty());
    }

    #[test]
    fn test_session_lifecycle() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");

        let session = store
            .create_session(alice.id, Some("127.0.0.1"), Some("test-agent"), Duration::hours(1))
            .unwrap();

        let user = store.validate_session(&session.token).unwrap().unwrap();
        assert_eq!(user.id, alice.id);

        store.delete_session(&session.token).unwrap();
        assert!(store.validate_session(&session.token).unwrap().is_none());
        // Logout is idempotent.
        store.delete_session(&session.token).unwrap();
    }

    #[test]
    fn test_absent_and_expired_tokens_look_identical() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");

        let expired = store
            .create_session(alice.id, None, None, Duration::zero())
            .unwrap();

        // Same Ok(None) shape for a token that was never issued and for one
        // that expired; callers cannot tell the cases apart.
        assert!(store.validate_session("never-issued").unwrap().is_none());
        assert!(store.validate_session(&expired.token).unwrap().is_none());
    }

    #[test]
    fn test_validation_never_extends_expiry() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let session = store
            .create_session(alice.id, None, None, Duration::hours(1))
            .unwrap();

        store.validate_session(&session.token).unwrap().unwrap();

        // expires_at is unchanged after validation.
        let conn = store.conn.lock().unwrap();
        let stored: String = conn
            .query_row(
                "SELECT expires_at FROM sessions WHERE token = ?",
                [&session.token],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, session.expires_at.to_rfc3339());
    }

    #[test]
    fn test_purge_expired_sessions() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");

        store
            .create_session(alice.id, None, None, Duration::zero())
            .unwrap();
        let live = store
            .create_session(alice.id, None, None, Duration::hours(1))
            .unwrap();

        assert_eq!(store.purge_expired_sessions().unwrap(), 1);
        assert!(store.validate_session(&live.token).unwrap().is_some());
    }

    #[test]
    fn test_session_for_missing_user_rejected() {
        let (store, _dir) = create_test_store();
        let err = store
            .create_session(42, None, None, Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_admin_email_oversight() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");

        for i in 0..3 {
            store
                .create_email(
                    OutgoingEmail::new(alice.id, bob.id, format!("mail {i}"), "body"),
                    &[],
                )
                .unwrap();
        }
        let draft = store
            .create_email(
                OutgoingEmail::new(bob.id, alice.id, "draft", "wip").draft(),
                &[],
            )
            .unwrap();
        store.set_deleted(&draft.uuid, true).unwrap();

        // The oversight view spans all accounts and hides nothing, drafts
        // and trashed mail included.
        assert_eq!(store.count_all_emails().unwrap(), 4);
        let all = store.list_all_emails(10, 0).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].uuid, draft.uuid);

        let page = store.list_all_emails(2, 2).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_attachment_stats_span_both_directions() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");
        let carol = register(&store, "carol");

        store
            .create_email(
                OutgoingEmail::new(alice.id, bob.id, "to bob", "body"),
                &[NewAttachment::new("a", "blobs/a", 100, "text/plain")],
            )
            .unwrap();
        store
            .create_email(
                OutgoingEmail::new(carol.id, alice.id, "to alice", "body"),
                &[
                    NewAttachment::new("b", "blobs/b", 200, "text/plain"),
                    NewAttachment::new("c", "blobs/c", 300, "text/plain"),
                ],
            )
            .unwrap();

        // Sent and received both count, unlike the sender-only quota counter.
        assert_eq!(store.attachment_stats_for_user(alice.id).unwrap(), (3, 600));
        assert_eq!(store.attachment_stats_for_user(bob.id).unwrap(), (1, 100));
        assert_eq!(store.user_by_id(alice.id).unwrap().storage_used, 100);
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error_not_a_guess() {
        let (store, _dir) = create_test_store();
        let alice = register(&store, "alice");

        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET created_at = 'not-a-timestamp' WHERE id = ?",
                [alice.id],
            )
            .unwrap();
        }

        // A mangled stored timestamp surfaces as a failure instead of being
        // silently replaced with the current time.
        let err = store.user_by_id(alice.id).unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }

    #[test]
    fn test_list_users_newest_first() {
        let (store, _dir) = create_test_store();
        register(&store, "alice");
        register(&store, "bob");
        register(&store, "carol");

        let users = store.list_users(2, 0).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "carol");

        let users = store.list_users(10, 2).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
    }
}
