//! `mailgrab`: pull messages from an IMAP mailbox, normalize them, and
//! keep them in a deduplicating SQLite store.
//!
//! The pipeline is [`session`] → [`parser::mime`] → [`store`], driven by
//! [`ingest::Ingestor`]. Credentials come from [`credentials`], application
//! settings from [`config`].

pub mod config;
pub mod credentials;
pub mod error;
pub mod export;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod session;
pub mod store;
