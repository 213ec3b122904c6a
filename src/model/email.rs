//! Fetched and normalized message types.

use std::fmt;

use chrono::{DateTime, Utc};

/// Subject stored when a message has none.
pub const NO_SUBJECT: &str = "(无主题)";

/// Sender stored when the `From:` header is missing or empty.
pub const UNKNOWN_SENDER: &str = "(未知发件人)";

/// The mailbox-scoped IMAP UID, kept as an opaque string.
///
/// Unlike sequence numbers it survives reconnects, so it is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u32> for Uid {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as it came off the wire.
///
/// Returned by session fetches; the driver drops it after normalization or
/// hands it to quarantine when normalization fails.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Sequence number in the selected mailbox (valid for this session only).
    pub seq: u32,
    /// Stable unique identifier.
    pub uid: Uid,
    /// Full RFC 822 bytes.
    pub bytes: Vec<u8>,
}

/// Which branch of body extraction produced the stored text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    Text,
    Html,
}

impl BodyFormat {
    /// Value of the `format` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Html => "html",
        }
    }

    pub fn from_column(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "html" => Some(Self::Html),
            _ => None,
        }
    }
}

/// Normalizer output: everything except identifiers and ingestion time.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NormalizedContent {
    /// Decoded subject; [`NO_SUBJECT`] when absent.
    pub subject: String,
    /// Bare sender address; [`UNKNOWN_SENDER`] when absent.
    pub sender: String,
    /// Decoded body text, `None` if no text or HTML part was found.
    pub body: Option<String>,
    /// `true` when the body was transcoded from an HTML part.
    pub is_html: bool,
    /// Parsed `Date:` header; `None` when absent or malformed.
    pub sent_at: Option<DateTime<Utc>>,
}

impl NormalizedContent {
    pub fn format(&self) -> BodyFormat {
        if self.is_html {
            BodyFormat::Html
        } else {
            BodyFormat::Text
        }
    }
}

/// A row of the dedup store.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NormalizedEmail {
    pub uid: Uid,
    #[serde(flatten)]
    pub content: NormalizedContent,
    pub saved_at: DateTime<Utc>,
}

impl NormalizedEmail {
    /// Attach identifiers to normalizer output, stamped with the current time.
    pub fn new(uid: Uid, content: NormalizedContent) -> Self {
        Self::with_saved_at(uid, content, Utc::now())
    }

    pub fn with_saved_at(uid: Uid, content: NormalizedContent, saved_at: DateTime<Utc>) -> Self {
        Self {
            uid,
            content,
            saved_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_column_round_trip() {
        assert_eq!(BodyFormat::from_column(BodyFormat::Html.as_str()), Some(BodyFormat::Html));
        assert_eq!(BodyFormat::from_column("rtf"), None);
    }

    #[test]
    fn test_uid_from_number() {
        assert_eq!(Uid::from(4021u32).as_str(), "4021");
    }
}
