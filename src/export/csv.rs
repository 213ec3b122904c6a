//! CSV writer shared by the exporters.
//!
//! Output is UTF-8 with BOM for Excel compatibility.

use std::io::{BufWriter, Write};
use std::path::Path;

/// Write `headers` and `rows` to `output_path`, separated by `separator`.
pub fn write_csv<R, F>(
    output_path: &Path,
    headers: &[&str],
    rows: R,
    separator: char,
) -> anyhow::Result<()>
where
    R: IntoIterator<Item = F>,
    F: IntoIterator,
    F::Item: AsRef<str>,
{
    let file = std::fs::File::create(output_path)?;
    let mut out = BufWriter::new(file);

    // UTF-8 BOM for Excel
    out.write_all(&[0xEF, 0xBB, 0xBF])?;

    writeln!(out, "{}", join_row(headers.iter(), separator))?;
    for row in rows {
        writeln!(out, "{}", join_row(row, separator))?;
    }
    out.flush()?;
    Ok(())
}

fn join_row<I>(fields: I, separator: char) -> String
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let sep = separator.to_string();
    fields
        .into_iter()
        .map(|f| csv_escape(f.as_ref(), separator))
        .collect::<Vec<_>>()
        .join(&sep)
}

/// Escape a value for CSV (RFC 4180).
///
/// Wraps in double quotes if the value contains the separator, quotes, or newlines.
fn csv_escape(value: &str, separator: char) -> String {
    if value.contains(separator) || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_escape_simple() {
        assert_eq!(csv_escape("hello", ','), "hello");
    }

    #[test]
    fn test_csv_escape_separator() {
        assert_eq!(csv_escape("hello, world", ','), "\"hello, world\"");
        assert_eq!(csv_escape("hello, world", ';'), "hello, world");
        assert_eq!(csv_escape("a;b", ';'), "\"a;b\"");
    }

    #[test]
    fn test_csv_escape_quotes() {
        assert_eq!(csv_escape("say \"hi\"", ','), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_write_csv_has_bom_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&path, &["A", "B"], vec![vec!["1", "x;y"]], ';').unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(&[0xEF, 0xBB, 0xBF]));
        assert_eq!(&bytes[3..], "A;B\n1;\"x;y\"\n".as_bytes());
    }
}
