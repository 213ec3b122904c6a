//! SQLite dedup store keyed by message UID.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use crate::error::{MailError, Result};
use crate::model::email::{BodyFormat, NormalizedContent, NormalizedEmail, Uid};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS emails (
        id          TEXT PRIMARY KEY,   -- UUID v4
        uid         TEXT NOT NULL UNIQUE,
        subject     TEXT NOT NULL,
        sender      TEXT NOT NULL,
        body        TEXT,
        format      TEXT NOT NULL CHECK (format IN ('text', 'html')),
        sent_at     TEXT,               -- RFC 3339, NULL if the Date header was unusable
        saved_at    TEXT NOT NULL       -- RFC 3339
    );

    CREATE INDEX IF NOT EXISTS idx_emails_sent_at ON emails(sent_at);
";

/// Aggregate figures for `mailgrab stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub html: u64,
    pub without_body: u64,
    pub without_date: u64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    /// Database file size in bytes (0 for in-memory stores).
    pub file_size: u64,
}

/// Append-only table of [`NormalizedEmail`] rows, unique by UID.
///
/// Rows are never updated or deleted.
pub struct EmailStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl EmailStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MailError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!(path = %path.display(), "Opened store");
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn exists(&self, uid: &Uid) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM emails WHERE uid = ?1",
                params![uid.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a row unless its UID is already stored.
    ///
    /// The check and the write are one statement, so two writers racing on
    /// the same UID produce one row. Returns `false` when the UID existed.
    pub fn insert(&self, email: &NormalizedEmail) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT INTO emails (id, uid, subject, sender, body, format, sent_at, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(uid) DO NOTHING",
            params![
                uuid::Uuid::new_v4().to_string(),
                email.uid.as_str(),
                email.content.subject,
                email.content.sender,
                email.content.body,
                email.content.format().as_str(),
                email.content.sent_at.map(to_rfc3339),
                to_rfc3339(email.saved_at),
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM emails", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn get(&self, uid: &Uid) -> Result<Option<NormalizedEmail>> {
        let email = self
            .conn
            .query_row(
                "SELECT uid, subject, sender, body, format, sent_at, saved_at
                 FROM emails WHERE uid = ?1",
                params![uid.as_str()],
                row_to_email,
            )
            .optional()?;
        Ok(email)
    }

    /// `(uid, body)` for every row with a body, oldest message first.
    pub fn bodies(&self) -> Result<Vec<(Uid, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, body FROM emails
             WHERE body IS NOT NULL
             ORDER BY sent_at IS NULL, sent_at, saved_at",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((Uid::new(r.get::<_, String>(0)?), r.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let (total, html, without_body, without_date, earliest, latest) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(format = 'html'), 0),
                    COALESCE(SUM(body IS NULL), 0),
                    COALESCE(SUM(sent_at IS NULL), 0),
                    MIN(sent_at),
                    MAX(sent_at)
             FROM emails",
            [],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                ))
            },
        )?;

        let file_size = match &self.path {
            Some(p) => std::fs::metadata(p).map(|m| m.len()).unwrap_or(0),
            None => 0,
        };

        Ok(StoreStats {
            total: total as u64,
            html: html as u64,
            without_body: without_body as u64,
            without_date: without_date as u64,
            earliest: earliest.as_deref().and_then(from_rfc3339),
            latest: latest.as_deref().and_then(from_rfc3339),
            file_size,
        })
    }
}

fn row_to_email(row: &Row<'_>) -> rusqlite::Result<NormalizedEmail> {
    let format: String = row.get(4)?;
    let sent_at: Option<String> = row.get(5)?;
    let saved_at: String = row.get(6)?;
    let content = NormalizedContent {
        subject: row.get(1)?,
        sender: row.get(2)?,
        body: row.get(3)?,
        is_html: BodyFormat::from_column(&format) == Some(BodyFormat::Html),
        sent_at: sent_at.as_deref().and_then(from_rfc3339),
    };
    Ok(NormalizedEmail::with_saved_at(
        Uid::new(row.get::<_, String>(0)?),
        content,
        from_rfc3339(&saved_at).unwrap_or_default(),
    ))
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn from_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
