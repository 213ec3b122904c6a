//! MIME normalization: raw message bytes → [`NormalizedContent`].
//!
//! `mail-parser` provides the part tree. Body bytes are taken from the raw
//! message by offset and decoded here (transfer encoding, then the charset
//! candidate chain), so a mislabelled charset degrades to a fallback or to
//! replacement characters instead of failing the message.

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use quoted_printable::ParseMode;
use tracing::{debug, warn};

use crate::error::{MailError, Result};
use crate::model::address::Mailbox;
use crate::model::email::{NormalizedContent, NO_SUBJECT, UNKNOWN_SENDER};
use crate::parser::charset;
use crate::parser::header::{self, HeaderBlock};

const BODY_B64: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Normalize one raw message.
///
/// Fails with [`MailError::Parse`] only when the payload has no usable
/// structure at all (empty, no header fields, or rejected by the MIME
/// parser). Every later step degrades instead of failing.
pub fn normalize(raw: &[u8]) -> Result<NormalizedContent> {
    let data = skip_from_line(raw);
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(MailError::Parse("empty payload".into()));
    }

    let (header_bytes, _) = header::split_header_block(data);
    let headers = HeaderBlock::parse(header_bytes);
    if headers.is_empty() {
        return Err(MailError::Parse("no header fields found".into()));
    }

    let message = MessageParser::default()
        .parse(data)
        .ok_or_else(|| MailError::Parse("rejected by MIME parser".into()))?;

    let subject = headers
        .get_decoded("subject")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let sender = headers
        .get_decoded("from")
        .map(|v| Mailbox::parse_first(&v))
        .filter(|m| !m.is_empty())
        .map(|m| m.address)
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

    let sent_at = headers.get("date").and_then(header::parse_date);
    if sent_at.is_none() {
        debug!(subject = %subject, "No usable Date header");
    }

    let (body, is_html) = match extract_body(&message) {
        Some(body) => (Some(body.text), body.is_html),
        None => (None, false),
    };

    Ok(NormalizedContent {
        subject,
        sender,
        body,
        is_html,
        sent_at,
    })
}

struct ExtractedBody {
    text: String,
    is_html: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Plain,
    Html,
}

/// Pick the body: first `text/plain` in document order, else first
/// `text/html` transcoded to text.
fn extract_body(message: &Message<'_>) -> Option<ExtractedBody> {
    let root = message.parts.first()?;

    if !matches!(root.body, PartType::Multipart(_)) {
        let kind = text_kind(root)?;
        let text = part_text(message, root);
        return Some(match kind {
            TextKind::Plain => ExtractedBody {
                text,
                is_html: false,
            },
            TextKind::Html => ExtractedBody {
                text: html_to_text(&text),
                is_html: true,
            },
        });
    }

    let mut first_html: Option<&MessagePart<'_>> = None;
    for part in message.parts.iter().skip(1) {
        if matches!(part.body, PartType::Multipart(_) | PartType::Message(_)) || is_attachment(part)
        {
            continue;
        }
        match text_kind(part) {
            Some(TextKind::Plain) => {
                return Some(ExtractedBody {
                    text: part_text(message, part),
                    is_html: false,
                });
            }
            Some(TextKind::Html) if first_html.is_none() => first_html = Some(part),
            _ => {}
        }
    }

    first_html.map(|part| ExtractedBody {
        text: html_to_text(&part_text(message, part)),
        is_html: true,
    })
}

/// Classify a part by its declared content type. A missing
/// `Content-Type` means `text/plain` (RFC 2045 §5.2).
fn text_kind(part: &MessagePart<'_>) -> Option<TextKind> {
    let Some(ct) = part.content_type() else {
        return Some(TextKind::Plain);
    };
    if !ct.ctype().eq_ignore_ascii_case("text") {
        return None;
    }
    match ct.subtype() {
        Some(sub) if sub.eq_ignore_ascii_case("html") => Some(TextKind::Html),
        Some(sub) if sub.eq_ignore_ascii_case("plain") => Some(TextKind::Plain),
        None => Some(TextKind::Plain),
        Some(_) => None,
    }
}

fn is_attachment(part: &MessagePart<'_>) -> bool {
    part.content_disposition()
        .map(|d| d.ctype().eq_ignore_ascii_case("attachment"))
        .unwrap_or(false)
}

/// Decode one part's body to text.
///
/// The raw bytes are transfer-decoded, then run through the charset
/// candidate chain starting with the declared charset. If the offsets or
/// the transfer encoding are unusable, `mail-parser`'s own decoding is used.
/// Line endings come out as `\n`.
fn part_text(message: &Message<'_>, part: &MessagePart<'_>) -> String {
    let declared = part.content_type().and_then(|ct| ct.attribute("charset"));

    let text = match transfer_decoded(message, part) {
        Some(bytes) => charset::decode_text(&bytes, declared),
        None => {
            warn!("Falling back to parser-decoded part contents");
            match &part.body {
                PartType::Text(text) | PartType::Html(text) => text.to_string(),
                _ => charset::decode_text(part.contents(), declared),
            }
        }
    };
    normalize_newlines(text)
}

fn transfer_decoded(message: &Message<'_>, part: &MessagePart<'_>) -> Option<Vec<u8>> {
    let raw: &[u8] = message.raw_message.as_ref();
    let start = part.offset_body as usize;
    let end = (part.offset_end as usize).min(raw.len());
    if start > end {
        return None;
    }
    let body = &raw[start..end];

    let encoding = part
        .content_transfer_encoding()
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();
    match encoding.as_str() {
        "base64" => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            match BODY_B64.decode(&compact) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "Invalid base64 body");
                    None
                }
            }
        }
        "quoted-printable" => match quoted_printable::decode(body, ParseMode::Robust) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "Invalid quoted-printable body");
                None
            }
        },
        _ => Some(body.to_vec()),
    }
}

/// Convert CRLF and lone CR line endings to `\n`.
fn normalize_newlines(text: String) -> String {
    if !text.contains('\r') {
        return text;
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Skip a leading BOM and an mbox `From ` separator line, which `.eml`
/// exports sometimes carry.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Block-level tags that start a new line.
const BLOCK_TAGS: &[&str] = &[
    "br", "p", "div", "tr", "li", "table", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
];

/// Convert HTML to plain text.
///
/// - `<br>`, `<p>`, `<div>`, table rows and list items become line breaks
/// - `<script>` and `<style>` blocks are removed
/// - named and numeric entities are decoded
/// - runs of blank lines collapse to one
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&decode_entities(&rest[..open]));
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            // Unterminated tag: drop the remainder.
            rest = "";
            break;
        };
        let tag = &after[..close];
        rest = &after[close + 1..];

        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if (name == "script" || name == "style") && !tag.starts_with('/') {
            let closing = format!("</{name}");
            rest = match find_ascii_case_insensitive(rest, &closing) {
                Some(pos) => rest[pos..].find('>').map_or("", |gt| &rest[pos + gt + 1..]),
                None => "",
            };
            continue;
        }
        if BLOCK_TAGS.contains(&name.as_str()) {
            if !out.ends_with('\n') {
                out.push('\n');
            }
        } else if (name == "td" || name == "th")
            && !tag.starts_with('/')
            && !out.ends_with(char::is_whitespace)
        {
            out.push(' ');
        }
    }
    out.push_str(&decode_entities(rest));

    collapse_blank_lines(&out)
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| entity(&after[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "yen" => '¥',
        "middot" => '·',
        _ => return None,
    })
}

fn collapse_blank_lines(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut prev_blank = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_blank {
                cleaned.push('\n');
            }
            prev_blank = true;
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_blank = false;
        }
    }
    cleaned.trim().to_string()
}
