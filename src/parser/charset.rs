//! Byte-to-text decoding over an ordered list of candidate charsets.
//!
//! Mail in the wild frequently mislabels its charset (GBK bodies declared as
//! UTF-8, or no declaration at all). Each candidate is tried strictly; the
//! first one that decodes without malformed sequences wins. If none does,
//! the first candidate decodes lossily with U+FFFD replacements, so this
//! module never fails.

use encoding_rs::{Encoding, GB18030, UTF_8};
use tracing::{debug, warn};

/// Fallbacks tried after the declared charset, in order.
const FALLBACKS: &[&Encoding] = &[UTF_8, GB18030];

/// Result of a decode attempt.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub text: String,
    /// The encoding that produced `text`.
    pub encoding: &'static Encoding,
    /// `true` if replacement characters were substituted.
    pub lossy: bool,
}

/// Build the candidate list: declared charset first (when recognized),
/// then the fallbacks, without duplicates.
pub fn candidates(declared: Option<&str>) -> Vec<&'static Encoding> {
    let mut list: Vec<&'static Encoding> = Vec::with_capacity(FALLBACKS.len() + 1);
    if let Some(label) = declared.map(str::trim).filter(|l| !l.is_empty()) {
        match Encoding::for_label(label.trim_matches('"').as_bytes()) {
            Some(enc) => list.push(enc),
            None => warn!(charset = label, "Unknown charset, trying fallbacks"),
        }
    }
    for enc in FALLBACKS {
        if !list.contains(enc) {
            list.push(enc);
        }
    }
    list
}

/// Decode `bytes`, trying each candidate in turn.
pub fn decode(bytes: &[u8], declared: Option<&str>) -> Decoded {
    let bytes = strip_utf8_bom(bytes);
    let list = candidates(declared);

    for enc in &list {
        if let Some(text) = enc.decode_without_bom_handling_and_without_replacement(bytes) {
            if list.first() != Some(enc) {
                debug!(
                    declared = declared.unwrap_or(""),
                    used = enc.name(),
                    "Charset fallback"
                );
            }
            return Decoded {
                text: text.into_owned(),
                encoding: enc,
                lossy: false,
            };
        }
    }

    // The list always holds at least the fallbacks.
    let first = list.first().copied().unwrap_or(UTF_8);
    let (text, had_errors) = first.decode_without_bom_handling(bytes);
    warn!(
        charset = first.name(),
        replaced = had_errors,
        "No candidate charset decoded cleanly, using replacement characters"
    );
    Decoded {
        text: text.into_owned(),
        encoding: first,
        lossy: true,
    }
}

/// Shorthand for callers that only need the text.
pub fn decode_text(bytes: &[u8], declared: Option<&str>) -> String {
    decode(bytes, declared).text
}

fn strip_utf8_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}
