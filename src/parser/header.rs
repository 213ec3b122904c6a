//! RFC 5322 header handling: block splitting, folding, encoded-words
//! (RFC 2047) and date parsing.

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::parser::charset;

/// Base64 engine for encoded-words: senders often drop the trailing `=`.
const B64: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Unfolded header fields of one message, in order of appearance.
#[derive(Debug, Clone, Default)]
pub struct HeaderBlock {
    fields: Vec<(String, String)>,
}

impl HeaderBlock {
    /// Decode and unfold raw header bytes.
    ///
    /// Raw 8-bit bytes (unencoded GBK subjects are common) go through the
    /// charset candidate chain before unfolding.
    pub fn parse(raw_headers: &[u8]) -> Self {
        let text = charset::decode_text(raw_headers, None);
        Self {
            fields: unfold_headers(&text),
        }
    }

    /// First value for a header name (case-insensitive), still encoded.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value with RFC 2047 encoded-words resolved.
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_encoded_words)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Split a message into its header bytes and the offset where the body starts.
///
/// A message without a blank line is all headers.
pub fn split_header_block(data: &[u8]) -> (&[u8], usize) {
    for i in 0..data.len() {
        if data[i..].starts_with(b"\r\n\r\n") {
            return (&data[..i], i + 4);
        }
        if data[i..].starts_with(b"\n\n") {
            return (&data[..i], i + 2);
        }
    }
    (data, data.len())
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
///
/// Returns a list of `(lowercase_name, raw_value)` pairs. Lines that are
/// neither a field nor a continuation are dropped.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
            continue;
        }
        let Some(colon) = line.find(':') else {
            continue;
        };
        let name = line[..colon].trim();
        // Field names are printable ASCII without spaces (RFC 5322 §2.2).
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic()) {
            continue;
        }
        result.push((name.to_lowercase(), line[colon + 1..].trim().to_string()));
    }

    result
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Each encoded run is decoded with its own charset and the results are
/// concatenated in order. Whitespace between two adjacent encoded-words is
/// dropped (RFC 2047 §6.2). A malformed word is kept as literal text.
///
/// Example: `"=?UTF-8?B?5rWL?= =?GBK?B?ytQ=?="` → `"测试"`
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let gap = &remaining[..start];
        if !(last_was_encoded && gap.trim().is_empty()) {
            result.push_str(gap);
        }

        let word = &remaining[start + 2..];
        match decode_one_word(word) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &word[consumed..];
                last_was_encoded = true;
            }
            None => {
                debug!(word = word, "Leaving malformed encoded-word as text");
                result.push_str("=?");
                remaining = word;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=` (the leading `=?` already stripped).
///
/// Returns the text and the number of bytes consumed.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let mut pieces = s.splitn(3, '?');
    let charset_spec = pieces.next()?;
    let encoding = pieces.next()?;
    let rest = pieces.next()?;
    let end = rest.find("?=")?;
    let payload = &rest[..end];

    if charset_spec.is_empty() || charset_spec.contains(char::is_whitespace) {
        return None;
    }
    // RFC 2231 language suffix: `utf-8*zh-cn`
    let charset_name = charset_spec.split('*').next().unwrap_or(charset_spec);

    let bytes = match encoding {
        "B" | "b" => {
            let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
            B64.decode(compact.as_bytes()).ok()?
        }
        "Q" | "q" => decode_q_encoding(payload),
        _ => return None,
    };

    let consumed = charset_spec.len() + 1 + encoding.len() + 1 + end + 2;
    Some((charset::decode_text(&bytes, Some(charset_name)), consumed))
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < bytes.len() => {
                match hex_pair(bytes[i + 1], bytes[i + 2]) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'='),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Parse an email date string in the formats real servers emit.
///
/// Supports RFC 2822 (with or without trailing `(CST)`-style comments),
/// ISO 8601, IMAP-style `16-JUL-2025` dates and named zones. Returns
/// `None` instead of failing.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = strip_comment(date_str.trim());
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(trimmed);
    let candidates = [
        no_dow.to_string(),
        normalize_imap_date(no_dow),
        replace_named_tz(no_dow),
    ];
    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];

    for candidate in &candidates {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Let `mail-parser` try a header we could not handle.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    let wrapped = format!("Date: {input}\n\n");
    let parsed = mail_parser::MessageParser::default().parse(wrapped.as_bytes())?;
    let date = parsed.date().filter(|d| d.is_valid() && d.year > 0)?;
    let rfc3339 = date.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Drop a trailing RFC 5322 comment: `"... +0800 (CST)"` → `"... +0800"`.
fn strip_comment(s: &str) -> &str {
    match (s.rfind('('), s.ends_with(')')) {
        (Some(open), true) => s[..open].trim_end(),
        _ => s,
    }
}

fn strip_day_of_week(s: &str) -> &str {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches(',').trim_start();
        }
    }
    s
}

/// `"16-JUL-2025 03:01:03"` → `"16 Jul 2025 03:01:03"`.
fn normalize_imap_date(s: &str) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let Some((date, time)) = s.split_once(' ') else {
        return s.to_string();
    };
    let parts: Vec<&str> = date.split('-').collect();
    if parts.len() != 3 {
        return s.to_string();
    }
    match MONTHS.iter().find(|m| m.eq_ignore_ascii_case(parts[1])) {
        Some(month) => format!("{} {} {} {}", parts[0], month, parts[2], time),
        None => s.to_string(),
    }
}

/// Replace a trailing zone abbreviation with its numeric offset.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 9] = [
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            if head.ends_with(' ') {
                return format!("{head}{offset}");
            }
        }
    }
    s.to_string()
}
