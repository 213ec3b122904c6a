//! Sender address extraction (RFC 5322 §3.4).

/// A mailbox taken from a `From:` header.
///
/// # Examples
/// - `"张三 <zhangsan@example.com>"` → `name = "张三"`, `address = "zhangsan@example.com"`
/// - `"user@example.com"` → `name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mailbox {
    /// Human-readable display name (may be empty).
    pub name: String,
    /// The bare `local@domain` address (may be empty).
    pub address: String,
}

impl Mailbox {
    /// Parse the first mailbox of an already-decoded header value.
    ///
    /// Only the first entry of a list is kept; commas inside quotes or
    /// angle brackets do not split.
    pub fn parse_first(raw: &str) -> Self {
        let first = split_first(raw);
        let trimmed = first.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    name: unquote(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self {
            name: String::new(),
            address: trimmed.trim_matches('"').to_string(),
        }
    }

    /// `true` if no address could be extracted.
    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }
}

/// Return the text before the first list separator outside quotes/brackets.
fn split_first(raw: &str) -> &str {
    let mut in_quotes = false;
    let mut depth = 0usize;
    for (pos, ch) in raw.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => depth += 1,
            '>' if !in_quotes => depth = depth.saturating_sub(1),
            ',' | ';' if !in_quotes && depth == 0 => return &raw[..pos],
            _ => {}
        }
    }
    raw
}

fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} <{}>", self.name, self.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_address() {
        let mb = Mailbox::parse_first("user@example.com");
        assert_eq!(mb.address, "user@example.com");
        assert_eq!(mb.name, "");
    }

    #[test]
    fn test_name_and_address() {
        let mb = Mailbox::parse_first("招商银行信用卡 <ccsvc@message.cmbchina.com>");
        assert_eq!(mb.address, "ccsvc@message.cmbchina.com");
        assert_eq!(mb.name, "招商银行信用卡");
    }

    #[test]
    fn test_quoted_name_with_comma() {
        let mb = Mailbox::parse_first("\"Last, First\" <a@b.com>, other@c.com");
        assert_eq!(mb.name, "Last, First");
        assert_eq!(mb.address, "a@b.com");
    }

    #[test]
    fn test_list_keeps_first() {
        let mb = Mailbox::parse_first("one@a.com, two@b.com");
        assert_eq!(mb.address, "one@a.com");
    }

    #[test]
    fn test_empty() {
        assert!(Mailbox::parse_first("   ").is_empty());
    }

    #[test]
    fn test_display() {
        let mb = Mailbox {
            name: "Alice".into(),
            address: "alice@example.com".into(),
        };
        assert_eq!(mb.to_string(), "Alice <alice@example.com>");
    }
}
