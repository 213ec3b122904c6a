//! Raw copies of messages that could not be normalized.
//!
//! Files are named `<uid>.eml` so they can be re-read with `mailgrab scan`.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{MailError, Result};
use crate::model::email::{RawMessage, Uid};

/// Write the bytes of `message` to `<dir>/<uid>.eml`, creating `dir` if
/// needed.
///
/// An existing file for the same UID is overwritten; the payload for a UID
/// does not change between runs.
pub fn quarantine(dir: &Path, message: &RawMessage) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| MailError::io(dir, e))?;
    let path = dir.join(file_name(&message.uid));
    std::fs::write(&path, &message.bytes).map_err(|e| MailError::io(&path, e))?;
    info!(
        uid = %message.uid,
        seq = message.seq,
        path = %path.display(),
        "Quarantined unparseable message"
    );
    Ok(path)
}

fn file_name(uid: &Uid) -> String {
    format!("{}.eml", sanitize_filename_part(uid.as_str(), 120))
}

/// Replace filesystem-unsafe characters with `_` and cap the length.
fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename_part("4021", 50), "4021");
        assert_eq!(sanitize_filename_part("../../etc/passwd", 50), "______etc_passwd");
        assert_eq!(sanitize_filename_part("", 50), "unknown");
        assert_eq!(sanitize_filename_part("abcdef", 3), "abc");
    }

    #[test]
    fn test_quarantine_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("bad");
        let message = RawMessage {
            seq: 3,
            uid: Uid::new("77"),
            bytes: b"\x00garbage".to_vec(),
        };
        let path = quarantine(&target, &message).unwrap();
        assert_eq!(path, target.join("77.eml"));
        assert_eq!(std::fs::read(path).unwrap(), b"\x00garbage");
    }
}
