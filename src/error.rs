//! Centralized error types for mailgrab.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailgrab library.
#[derive(Error, Debug)]
pub enum MailError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The credentials file does not exist.
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// A credentials line or value could not be parsed.
    #[error("Config parse error in '{path}' line {line}: {reason}")]
    ConfigParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A required credential key is absent from every accepted alias.
    #[error("Missing config key '{0}'")]
    ConfigMissingKey(String),

    /// LOGIN was rejected by the server.
    #[error("Authentication failed for '{user}': {reason}")]
    Auth { user: String, reason: String },

    /// TCP/TLS connection could not be established or was lost.
    #[error("Connection to {host}:{port} failed: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },

    /// SELECT on the named mailbox failed.
    #[error("Mailbox '{mailbox}' unavailable: {reason}")]
    MailboxUnavailable { mailbox: String, reason: String },

    /// A FETCH returned an error or a malformed response.
    #[error("Fetch of message {id} failed: {reason}")]
    Fetch { id: String, reason: String },

    /// The raw payload could not be parsed as an RFC 5322 message.
    #[error("MIME parse error: {0}")]
    Parse(String),

    /// An operation was issued in the wrong session state.
    #[error("Invalid session state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// A `.zip` archive or one of its members could not be read.
    #[error("Archive error in '{path}': {reason}")]
    Archive { path: PathBuf, reason: String },

    /// The SQLite store reported an error.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Convenience alias for `Result<T, MailError>`.
pub type Result<T> = std::result::Result<T, MailError>;

/// How far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Fatal before any connection is made.
    Setup,
    /// Aborts the current run; the store stays consistent.
    Session,
    /// Only the current message is lost; the batch continues.
    Message,
}

impl MailError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error by how far it is allowed to propagate.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::ConfigNotFound(_) | Self::ConfigParse { .. } | Self::ConfigMissingKey(_) => {
                ErrorScope::Setup
            }
            Self::Auth { .. }
            | Self::Connection { .. }
            | Self::MailboxUnavailable { .. }
            | Self::InvalidState { .. }
            | Self::Store(_)
            | Self::Io { .. } => ErrorScope::Session,
            Self::Fetch { .. } | Self::Parse(_) | Self::Archive { .. } => ErrorScope::Message,
        }
    }
}
