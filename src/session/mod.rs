//! Mailbox sessions: the protocol seam between the driver and a mail server.

pub mod imap;

pub use self::imap::ImapSession;

use crate::error::Result;
use crate::model::email::{RawMessage, Uid};

/// Lifecycle of a session. A failed connect never yields a session, so
/// there is no disconnected state to represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Logged in, no mailbox selected.
    Connected,
    /// A mailbox is selected; fetches are allowed.
    MailboxSelected,
    /// Logged out. Terminal.
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::MailboxSelected => "MailboxSelected",
            Self::Closed => "Closed",
        }
    }
}

/// An authenticated connection to one mail account.
///
/// Implemented by [`ImapSession`] and by in-memory doubles in tests.
pub trait MailboxSession {
    /// Select `mailbox` and return every message sequence number, ascending.
    fn list_message_ids(&mut self, mailbox: &str) -> Result<Vec<u32>>;

    /// The stable unique identifier of the message at `seq`.
    fn fetch_unique_id(&mut self, seq: u32) -> Result<Uid>;

    /// The message at `seq`, with its UID and full RFC 822 bytes.
    fn fetch_raw(&mut self, seq: u32) -> Result<RawMessage>;

    /// The message with the given UID.
    fn fetch_raw_by_uid(&mut self, uid: &Uid) -> Result<RawMessage>;

    /// Log out. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    fn state(&self) -> SessionState;
}
