//! Ingestion driver: session → normalizer → store, one message at a time.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, error, info, warn, Span};

use crate::credentials::MailboxCredentials;
use crate::error::{ErrorScope, Result};
use crate::export::quarantine;
use crate::model::email::{NormalizedEmail, RawMessage};
use crate::parser::mime;
use crate::session::{ImapSession, MailboxSession};
use crate::store::EmailStore;

/// Mailbox selected when none is configured.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunStatus {
    /// Every listed message was attempted.
    Completed,
    /// A session-level error stopped the run early.
    Aborted { reason: String },
}

/// Counters for one run. `ingested + skipped + failed == attempted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub attempted: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(flatten)]
    pub status: RunStatus,
}

impl Default for IngestionReport {
    fn default() -> Self {
        Self {
            attempted: 0,
            ingested: 0,
            skipped: 0,
            failed: 0,
            status: RunStatus::Completed,
        }
    }
}

impl IngestionReport {
    fn aborted(reason: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Aborted {
                reason: reason.into(),
            },
            ..Self::default()
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

enum Outcome {
    Ingested,
    Skipped,
}

type ProgressFn<'a> = Box<dyn FnMut(usize, usize) + 'a>;

/// Drives one ingestion run against a [`EmailStore`].
///
/// Logging context comes from the span given to [`Ingestor::with_span`];
/// the driver itself holds no global state.
pub struct Ingestor<'a> {
    store: &'a EmailStore,
    mailbox: String,
    quarantine_dir: Option<PathBuf>,
    span: Span,
    progress: Option<ProgressFn<'a>>,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a EmailStore) -> Self {
        Self {
            store,
            mailbox: DEFAULT_MAILBOX.to_string(),
            quarantine_dir: None,
            span: Span::none(),
            progress: None,
        }
    }

    pub fn with_mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = mailbox.into();
        self
    }

    /// Write raw bytes of unparseable messages under `dir`.
    pub fn with_quarantine_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.quarantine_dir = Some(dir.into());
        self
    }

    /// Span entered for the duration of each run.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Called with `(done, total)` after every message.
    pub fn on_progress(mut self, f: impl FnMut(usize, usize) + 'a) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Connect with `credentials` and ingest the configured mailbox.
    ///
    /// Connection and login failures produce an aborted report.
    pub fn run(&mut self, credentials: &MailboxCredentials) -> IngestionReport {
        let span = self.span.clone();
        let _guard = span.enter();

        match ImapSession::connect(credentials) {
            Ok(session) => self.drive_and_close(session),
            Err(e) => {
                error!(error = %e, "Could not open session");
                IngestionReport::aborted(e.to_string())
            }
        }
    }

    /// Ingest the configured mailbox through an already-open session.
    ///
    /// The session is closed before returning, whatever the outcome.
    pub fn run_with_session<S: MailboxSession>(&mut self, session: S) -> IngestionReport {
        let span = self.span.clone();
        let _guard = span.enter();
        self.drive_and_close(session)
    }

    fn drive_and_close<S: MailboxSession>(&mut self, mut session: S) -> IngestionReport {
        let mut report = IngestionReport::default();
        if let Err(e) = self.drive(&mut session, &mut report) {
            error!(error = %e, "Run aborted");
            report.status = RunStatus::Aborted {
                reason: e.to_string(),
            };
        }
        if let Err(e) = session.close() {
            warn!(error = %e, "Closing session failed");
        }

        info!(
            attempted = report.attempted,
            ingested = report.ingested,
            skipped = report.skipped,
            failed = report.failed,
            completed = report.is_completed(),
            "Ingestion finished"
        );
        report
    }

    /// Returns `Err` only for errors that must stop the run.
    fn drive<S: MailboxSession>(
        &mut self,
        session: &mut S,
        report: &mut IngestionReport,
    ) -> Result<()> {
        let ids = session.list_message_ids(&self.mailbox)?;
        let total = ids.len();
        info!(mailbox = %self.mailbox, messages = total, "Mailbox listed");

        for (done, seq) in ids.into_iter().enumerate() {
            report.attempted += 1;
            match self.ingest_one(session, seq) {
                Ok(Outcome::Ingested) => report.ingested += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) if e.scope() == ErrorScope::Message => {
                    warn!(seq, error = %e, "Message failed");
                    report.failed += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    return Err(e);
                }
            }
            if let Some(progress) = self.progress.as_mut() {
                progress(done + 1, total);
            }
        }
        Ok(())
    }

    fn ingest_one<S: MailboxSession>(&self, session: &mut S, seq: u32) -> Result<Outcome> {
        let uid = session.fetch_unique_id(seq)?;
        if self.store.exists(&uid)? {
            debug!(seq, uid = %uid, "Already stored");
            return Ok(Outcome::Skipped);
        }

        // Fetch by UID so the bytes belong to the UID just checked.
        let message = session.fetch_raw_by_uid(&uid)?;
        let content = match mime::normalize(&message.bytes) {
            Ok(content) => content,
            Err(e) => {
                self.quarantine(&message);
                return Err(e);
            }
        };

        let email = NormalizedEmail::new(message.uid, content);
        if self.store.insert(&email)? {
            debug!(seq, uid = %email.uid, subject = %email.content.subject, "Stored");
            Ok(Outcome::Ingested)
        } else {
            // Another writer stored it between the check and the insert.
            Ok(Outcome::Skipped)
        }
    }

    fn quarantine(&self, message: &RawMessage) {
        let Some(dir) = &self.quarantine_dir else {
            return;
        };
        if let Err(e) = quarantine::quarantine(dir, message) {
            warn!(uid = %message.uid, error = %e, "Could not quarantine message");
        }
    }
}
