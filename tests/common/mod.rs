//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mailgrab::error::{MailError, Result};
use mailgrab::model::email::{RawMessage, Uid};
use mailgrab::session::{MailboxSession, SessionState};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture_bytes(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap()
}

/// In-memory mailbox. Message `i` in `messages` has sequence number `i + 1`.
pub struct MemorySession {
    messages: Vec<(Uid, Vec<u8>)>,
    state: SessionState,
    /// SELECT fails with `MailboxUnavailable`.
    pub fail_select: bool,
    /// Sequence numbers whose body fetch fails with `Fetch`.
    pub broken_fetches: HashSet<u32>,
    /// The connection drops when this sequence number is fetched.
    pub drop_at: Option<u32>,
    /// Number of `close` calls.
    pub closes: Rc<Cell<u32>>,
}

impl MemorySession {
    pub fn new(messages: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            messages: messages
                .into_iter()
                .map(|(uid, bytes)| (Uid::new(uid), bytes))
                .collect(),
            state: SessionState::Connected,
            fail_select: false,
            broken_fetches: HashSet::new(),
            drop_at: None,
            closes: Rc::new(Cell::new(0)),
        }
    }

    fn seq_of(&self, uid: &Uid) -> Option<u32> {
        self.messages
            .iter()
            .position(|(u, _)| u == uid)
            .map(|i| i as u32 + 1)
    }

    fn require_selected(&self) -> Result<()> {
        if self.state == SessionState::MailboxSelected {
            Ok(())
        } else {
            Err(MailError::InvalidState {
                expected: SessionState::MailboxSelected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    fn message(&mut self, seq: u32) -> Result<RawMessage> {
        if self.drop_at == Some(seq) {
            self.state = SessionState::Closed;
            return Err(MailError::Connection {
                host: "memory".into(),
                port: 0,
                reason: "connection reset".into(),
            });
        }
        if self.broken_fetches.contains(&seq) {
            return Err(MailError::Fetch {
                id: seq.to_string(),
                reason: "BAD response".into(),
            });
        }
        self.messages
            .get(seq as usize - 1)
            .map(|(uid, bytes)| RawMessage {
                seq,
                uid: uid.clone(),
                bytes: bytes.clone(),
            })
            .ok_or_else(|| MailError::Fetch {
                id: seq.to_string(),
                reason: "no such message".into(),
            })
    }
}

impl MailboxSession for MemorySession {
    fn list_message_ids(&mut self, mailbox: &str) -> Result<Vec<u32>> {
        if self.fail_select {
            return Err(MailError::MailboxUnavailable {
                mailbox: mailbox.to_string(),
                reason: "NO [NONEXISTENT] Unknown Mailbox".into(),
            });
        }
        self.state = SessionState::MailboxSelected;
        Ok((1..=self.messages.len() as u32).collect())
    }

    fn fetch_unique_id(&mut self, seq: u32) -> Result<Uid> {
        self.require_selected()?;
        self.messages
            .get(seq as usize - 1)
            .map(|(uid, _)| uid.clone())
            .ok_or_else(|| MailError::Fetch {
                id: seq.to_string(),
                reason: "no such message".into(),
            })
    }

    fn fetch_raw(&mut self, seq: u32) -> Result<RawMessage> {
        self.require_selected()?;
        self.message(seq)
    }

    fn fetch_raw_by_uid(&mut self, uid: &Uid) -> Result<RawMessage> {
        self.require_selected()?;
        let seq = self.seq_of(uid).ok_or_else(|| MailError::Fetch {
            id: uid.to_string(),
            reason: "no such UID".into(),
        })?;
        self.message(seq)
    }

    fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closed;
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }

    fn state(&self) -> SessionState {
        self.state
    }
}
