//! Credit-card statement extraction.
//!
//! Statement mails render each transaction as a pipe-delimited table row:
//!
//! ```text
//! | 1234 | 2024-01-02 | 2024-01-03 | Purchase | Coffee/Shanghai | 35.00/CNY | 35.00/CNY |
//! ```
//!
//! Every stored body is scanned line by line and matching rows are written
//! to a CSV report.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::export::csv::write_csv;
use crate::store::EmailStore;

/// CSV header, one entry per captured column.
pub const HEADERS: [&str; 7] = [
    "卡号后四位",
    "交易日",
    "记账日",
    "交易类型",
    "商户名称/城市",
    "交易金额/币种",
    "记账金额/币种",
];

fn row_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\|\s*(\d+)\s*\|\s*(\d{4}-\d{2}-\d{2})\s*\|\s*(\d{4}-\d{2}-\d{2})\s*\|\s*([^|]*?)\s*\|\s*([^|]*?)\s*\|\s*([^|]*?)\s*\|\s*([^|]*?)\s*\|",
        )
        .expect("statement row regex must compile")
    })
}

/// One transaction line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementRow {
    pub card_last4: String,
    pub transaction_date: String,
    pub posting_date: String,
    pub transaction_type: String,
    pub merchant: String,
    pub transaction_amount: String,
    pub posting_amount: String,
}

impl StatementRow {
    fn fields(&self) -> [&str; 7] {
        [
            self.card_last4.as_str(),
            self.transaction_date.as_str(),
            self.posting_date.as_str(),
            self.transaction_type.as_str(),
            self.merchant.as_str(),
            self.transaction_amount.as_str(),
            self.posting_amount.as_str(),
        ]
    }
}

/// All transaction rows in `body`, in order. Lines must start with `|`.
pub fn extract_rows(body: &str) -> Vec<StatementRow> {
    let re = row_pattern();
    body.lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| {
            let field = |i: usize| caps.get(i).map_or("", |m| m.as_str()).trim().to_string();
            StatementRow {
                card_last4: field(1),
                transaction_date: field(2),
                posting_date: field(3),
                transaction_type: field(4),
                merchant: field(5),
                transaction_amount: field(6),
                posting_amount: field(7),
            }
        })
        .collect()
}

/// Extract rows from every stored body and write them to `output_path`.
///
/// Returns the number of rows written. When nothing matches, no file is
/// created and `0` is returned.
pub fn export_statement(
    store: &EmailStore,
    output_path: &Path,
    separator: char,
) -> anyhow::Result<usize> {
    let mut rows = Vec::new();
    for (uid, body) in store.bodies()? {
        let found = extract_rows(&body);
        if !found.is_empty() {
            debug!(uid = %uid, rows = found.len(), "Statement rows found");
        }
        rows.extend(found);
    }

    if rows.is_empty() {
        warn!("No statement rows found in stored messages");
        return Ok(0);
    }

    write_csv(output_path, &HEADERS, rows.iter().map(StatementRow::fields), separator)?;
    info!(path = %output_path.display(), rows = rows.len(), "Statement exported");
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_row() {
        let body = "Dear customer,\n\
                    | 1234 | 2024-01-02 | 2024-01-03 | Purchase | Coffee/Shanghai | 35.00/CNY | 35.00/CNY |\n\
                    Thank you.";
        let rows = extract_rows(body);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].card_last4, "1234");
        assert_eq!(rows[0].merchant, "Coffee/Shanghai");
        assert_eq!(rows[0].posting_amount, "35.00/CNY");
    }

    #[test]
    fn test_empty_cells_allowed() {
        let rows = extract_rows("|9|2024-05-01|2024-05-02||Refund|-1.00/USD||");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_type, "");
        assert_eq!(rows[0].posting_amount, "");
    }

    #[test]
    fn test_indented_or_malformed_lines_ignored() {
        let body = "  | 1234 | 2024-01-02 | 2024-01-03 | a | b | c | d |\n\
                    | 1234 | 2024/01/02 | 2024-01-03 | a | b | c | d |\n\
                    | card | 2024-01-02 | 2024-01-03 | a | b | c | d |";
        assert!(extract_rows(body).is_empty());
    }
}
