//! IMAP4rev1 over implicit TLS.

use std::io::{Read, Write};
use std::net::TcpStream;

use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, info, warn};

use super::{MailboxSession, SessionState};
use crate::credentials::MailboxCredentials;
use crate::error::{MailError, Result};
use crate::model::email::{RawMessage, Uid};

/// `ID` payload sent to servers that refuse SELECT from anonymous clients.
const CLIENT_ID_COMMAND: &str = concat!(
    r#"ID ("name" "mailgrab" "version" ""#,
    env!("CARGO_PKG_VERSION"),
    r#"" "vendor" "mailgrab")"#
);

/// A logged-in IMAP session, over TLS unless built with
/// [`ImapSession::from_session`].
///
/// Dropping a session that was not closed logs out on a best-effort basis.
pub struct ImapSession<T: Read + Write = TlsStream<TcpStream>> {
    inner: ::imap::Session<T>,
    state: SessionState,
    host: String,
    port: u16,
}

impl ImapSession {
    /// Open a TLS connection and LOGIN.
    pub fn connect(credentials: &MailboxCredentials) -> Result<Self> {
        let host = credentials.host.clone();
        let port = credentials.port;
        let connection_error = |reason: String| MailError::Connection {
            host: host.clone(),
            port,
            reason,
        };

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| connection_error(format!("TLS connector build failed: {e}")))?;

        debug!(host = %host, port, "Connecting");
        let client = ::imap::connect((host.as_str(), port), &host, &tls)
            .map_err(|e| connection_error(e.to_string()))?;

        let mut inner = client
            .login(&credentials.username, credentials.secret())
            .map_err(|(e, _client)| MailError::Auth {
                user: credentials.username.clone(),
                reason: e.to_string(),
            })?;

        if credentials.send_client_id {
            // Not fatal here; SELECT reports the real failure if the server insists.
            if let Err(e) = inner.run_command_and_check_ok(CLIENT_ID_COMMAND) {
                warn!(host = %host, error = %e, "IMAP ID command rejected");
            }
        }

        info!(host = %host, user = %credentials.username, "Logged in");
        Ok(Self::from_session(inner, host, port))
    }
}

impl<T: Read + Write> ImapSession<T> {
    /// Wrap an already authenticated session over any stream.
    pub fn from_session(inner: ::imap::Session<T>, host: impl Into<String>, port: u16) -> Self {
        Self {
            inner,
            state: SessionState::Connected,
            host: host.into(),
            port,
        }
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

    /// Transport failures end the session; protocol-level failures only
    /// affect the message being fetched.
    fn fetch_error(&mut self, id: String, e: ::imap::Error) -> MailError {
        match e {
            ::imap::Error::Io(_) | ::imap::Error::ConnectionLost => {
                self.state = SessionState::Closed;
                MailError::Connection {
                    host: self.host.clone(),
                    port: self.port,
                    reason: e.to_string(),
                }
            }
            other => MailError::Fetch {
                id,
                reason: other.to_string(),
            },
        }
    }

    fn fetch_message(&mut self, id: String, uid_command: bool) -> Result<RawMessage> {
        let response = if uid_command {
            self.inner.uid_fetch(&id, "RFC822")
        } else {
            self.inner.fetch(&id, "(UID RFC822)")
        };
        let fetches = response.map_err(|e| self.fetch_error(id.clone(), e))?;
        let missing = |reason: &str| MailError::Fetch {
            id: id.clone(),
            reason: reason.to_string(),
        };

        let fetch = fetches
            .iter()
            .next()
            .ok_or_else(|| missing("empty FETCH response"))?;
        let bytes = fetch
            .body()
            .ok_or_else(|| missing("response carried no RFC822 body"))?
            .to_vec();
        let uid = match fetch.uid {
            Some(uid) => Uid::from(uid),
            // UID FETCH responses may omit the UID item; it is the one asked for.
            None if uid_command => Uid::new(id.clone()),
            None => return Err(missing("response carried no UID")),
        };

        Ok(RawMessage {
            seq: fetch.message,
            uid,
            bytes,
        })
    }
}

impl<T: Read + Write> MailboxSession for ImapSession<T> {
    fn list_message_ids(&mut self, mailbox: &str) -> Result<Vec<u32>> {
        if self.state == SessionState::Closed {
            return Err(MailError::InvalidState {
                expected: SessionState::Connected.as_str(),
                actual: self.state.as_str(),
            });
        }

        let selected = self
            .inner
            .select(mailbox)
            .map_err(|e| MailError::MailboxUnavailable {
                mailbox: mailbox.to_string(),
                reason: e.to_string(),
            })?;
        self.state = SessionState::MailboxSelected;
        debug!(
            mailbox,
            exists = selected.exists,
            uid_validity = ?selected.uid_validity,
            "Mailbox selected"
        );

        let found = self
            .inner
            .search("ALL")
            .map_err(|e| MailError::MailboxUnavailable {
                mailbox: mailbox.to_string(),
                reason: format!("SEARCH failed: {e}"),
            })?;
        let mut ids: Vec<u32> = found.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn fetch_unique_id(&mut self, seq: u32) -> Result<Uid> {
        self.require_selected()?;
        let fetches = self
            .inner
            .fetch(seq.to_string(), "UID")
            .map_err(|e| self.fetch_error(seq.to_string(), e))?;

        fetches
            .iter()
            .find_map(|f| f.uid)
            .map(Uid::from)
            .ok_or_else(|| MailError::Fetch {
                id: seq.to_string(),
                reason: "response carried no UID".into(),
            })
    }

    fn fetch_raw(&mut self, seq: u32) -> Result<RawMessage> {
        self.require_selected()?;
        self.fetch_message(seq.to_string(), false)
    }

    fn fetch_raw_by_uid(&mut self, uid: &Uid) -> Result<RawMessage> {
        self.require_selected()?;
        self.fetch_message(uid.to_string(), true)
    }

    fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.inner.logout().map_err(|e| MailError::Connection {
            host: self.host.clone(),
            port: self.port,
            reason: format!("LOGOUT failed: {e}"),
        })?;
        debug!(host = %self.host, "Logged out");
        Ok(())
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

impl<T: Read + Write> Drop for ImapSession<T> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Err(e) = self.close() {
                debug!(error = %e, "Logout on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::min;

    /// Replays scripted server bytes and records what the client sent.
    struct ScriptedStream {
        replies: Vec<u8>,
        pos: usize,
        sent: Vec<u8>,
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = min(buf.len(), self.replies.len() - self.pos);
            buf[..n].copy_from_slice(&self.replies[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted_session(replies: &[u8]) -> ImapSession<ScriptedStream> {
        let stream = ScriptedStream {
            replies: replies.to_vec(),
            pos: 0,
            sent: Vec::new(),
        };
        let inner = ::imap::Client::new(stream)
            .login("user@example.com", "pw")
            .map_err(|(e, _)| e)
            .unwrap();
        ImapSession::from_session(inner, "scripted", 993)
    }

    #[test]
    fn test_fetch_before_select_is_invalid_state() {
        let mut session =
            scripted_session(b"a1 OK Logged in\r\na2 OK Logout completed\r\n");
        assert_eq!(session.state(), SessionState::Connected);

        match session.fetch_unique_id(1) {
            Err(MailError::InvalidState { expected, actual }) => {
                assert_eq!(expected, "MailboxSelected");
                assert_eq!(actual, "Connected");
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }
        assert!(matches!(
            session.fetch_raw_by_uid(&Uid::new("9")),
            Err(MailError::InvalidState { .. })
        ));
        session.close().unwrap();
    }

    #[test]
    fn test_closed_session_rejects_select_and_close_is_idempotent() {
        let mut session =
            scripted_session(b"a1 OK Logged in\r\na2 OK Logout completed\r\n");
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        session.close().unwrap();

        assert!(matches!(
            session.list_message_ids("INBOX"),
            Err(MailError::InvalidState {
                actual: "Closed",
                ..
            })
        ));
    }

    #[test]
    fn test_client_id_command_shape() {
        assert!(CLIENT_ID_COMMAND.starts_with("ID (\"name\" \"mailgrab\""));
        assert!(CLIENT_ID_COMMAND.ends_with(')'));
    }

    #[test]
    fn test_unreachable_host_is_connection_error() {
        let creds = MailboxCredentials::new("127.0.0.1", 1, "user@example.com", "pw");
        match ImapSession::connect(&creds) {
            Err(e @ MailError::Connection { .. }) => {
                assert_eq!(e.scope(), crate::error::ErrorScope::Session)
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
