//! Persistent storage of normalized messages.

pub mod sqlite;

pub use sqlite::{EmailStore, StoreStats};
