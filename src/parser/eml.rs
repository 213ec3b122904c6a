//! `.eml` files on disk: single-file reads and recursive scans of
//! directories holding `.eml` files and `.zip` archives of them.

use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{MailError, Result};
use crate::model::email::NormalizedContent;
use crate::parser::mime;

/// Default number of body lines shown by [`ScanEntry::preview`].
pub const DEFAULT_PREVIEW_LINES: usize = 20;

/// One successfully normalized message.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    /// The `.eml` file, or the archive holding it.
    pub path: PathBuf,
    /// Member name when the message came out of a `.zip` archive.
    pub member: Option<String>,
    pub content: NormalizedContent,
}

impl ScanEntry {
    /// The first `lines` lines of the body, or an empty string.
    pub fn preview(&self, lines: usize) -> String {
        self.content
            .body
            .as_deref()
            .map(|b| b.lines().take(lines).collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    /// `path`, or `path!member` for archive members.
    pub fn display_name(&self) -> String {
        match &self.member {
            Some(member) => format!("{}!{member}", self.path.display()),
            None => self.path.display().to_string(),
        }
    }
}

/// Result of [`scan_dir`].
#[derive(Debug, Default)]
pub struct ScanReport {
    pub entries: Vec<ScanEntry>,
    /// Entries, files, archives or members that could not be read or
    /// normalized. Archive members are reported as `archive/member`.
    pub failed: Vec<(PathBuf, MailError)>,
}

/// Read and normalize a single `.eml` file.
pub fn read_eml(path: impl AsRef<Path>) -> Result<NormalizedContent> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| MailError::io(path, e))?;
    mime::normalize(&data)
}

/// Normalize every `*.eml` file and every `.eml` member of every `*.zip`
/// archive below `dir`.
///
/// Symlinks are not followed. Directories are visited in file-name order.
/// Anything that fails is recorded in [`ScanReport::failed`] and the scan
/// moves on; only an unreadable `dir` itself is an error.
pub fn scan_dir(dir: impl AsRef<Path>) -> Result<ScanReport> {
    let dir = dir.as_ref();
    std::fs::read_dir(dir).map_err(|e| MailError::io(dir, e))?;

    let mut report = ScanReport::default();
    let walker = WalkDir::new(dir).follow_links(false).sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                warn!(path = %path.display(), error = %e, "Cannot read directory entry");
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                report.failed.push((path.clone(), MailError::io(path, source)));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.into_path();
        if has_extension(&path, "eml") {
            match read_eml(&path) {
                Ok(content) => report.entries.push(ScanEntry {
                    path,
                    member: None,
                    content,
                }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable .eml file");
                    report.failed.push((path, e));
                }
            }
        } else if has_extension(&path, "zip") {
            scan_zip(&path, &mut report);
        }
    }

    debug!(
        dir = %dir.display(),
        entries = report.entries.len(),
        failed = report.failed.len(),
        "Scan finished"
    );
    Ok(report)
}

/// Normalize the `.eml` members of one archive in memory.
fn scan_zip(path: &Path, report: &mut ScanReport) {
    let mut archive = match File::open(path)
        .map_err(|e| MailError::io(path, e))
        .and_then(|file| ZipArchive::new(file).map_err(|e| archive_error(path, e)))
    {
        Ok(archive) => archive,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable archive");
            report.failed.push((path.to_path_buf(), e));
            return;
        }
    };
    info!(path = %path.display(), members = archive.len(), "Scanning archive");

    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                report.failed.push((path.to_path_buf(), archive_error(path, e)));
                continue;
            }
        };
        if file.is_dir() {
            continue;
        }
        let member = member_name(file.name_raw(), file.name());
        if !has_extension(Path::new(&member), "eml") {
            continue;
        }

        let mut data = Vec::new();
        let result = file
            .read_to_end(&mut data)
            .map_err(|e| MailError::io(path.join(&member), e))
            .and_then(|_| mime::normalize(&data));
        match result {
            Ok(content) => report.entries.push(ScanEntry {
                path: path.to_path_buf(),
                member: Some(member),
                content,
            }),
            Err(e) => {
                warn!(path = %path.display(), member = %member, error = %e, "Skipping archive member");
                report.failed.push((path.join(&member), e));
            }
        }
    }
}

/// Recover an archive member name.
///
/// Names written by Chinese Windows tools are GBK bytes without the UTF-8
/// flag, which the archive reader decodes as CP437 (`stored`).
fn member_name(raw: &[u8], stored: &str) -> String {
    if let Ok(name) = std::str::from_utf8(raw) {
        return name.to_string();
    }
    encoding_rs::GBK
        .decode_without_bom_handling_and_without_replacement(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|| stored.to_string())
}

fn archive_error(path: &Path, e: zip::result::ZipError) -> MailError {
    MailError::Archive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MESSAGE: &str = "From: a@b.com\r\nSubject: Zipped\r\n\r\nBody\r\n";

    #[test]
    fn test_preview_truncates() {
        let entry = ScanEntry {
            path: PathBuf::from("a.eml"),
            member: None,
            content: NormalizedContent {
                subject: "s".into(),
                sender: "a@b.com".into(),
                body: Some("1\n2\n3\n4".into()),
                is_html: false,
                sent_at: None,
            },
        };
        assert_eq!(entry.preview(2), "1\n2");
        assert_eq!(entry.preview(10), "1\n2\n3\n4");
        assert_eq!(entry.display_name(), "a.eml");
    }

    #[test]
    fn test_scan_dir_recurses_and_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2024").join("01");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join("ok.EML"),
            "From: a@b.com\r\nSubject: Nested\r\n\r\nBody\r\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("empty.eml"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "Subject: ignored\n\n").unwrap();

        let report = scan_dir(dir.path()).unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].content.subject, "Nested");
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, MailError::Parse(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.eml"), MESSAGE).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let report = scan_dir(dir.path()).unwrap();
        assert_eq!(report.entries.len(), 1);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_zip_members_are_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("batch.zip")).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("inbox/one.eml", options).unwrap();
        zip.write_all(MESSAGE.as_bytes()).unwrap();
        zip.start_file("broken.eml", options).unwrap();
        zip.write_all(b"no headers, just prose").unwrap();
        zip.start_file("notes.txt", options).unwrap();
        zip.write_all(MESSAGE.as_bytes()).unwrap();
        zip.finish().unwrap();

        let report = scan_dir(dir.path()).unwrap();
        assert_eq!(report.entries.len(), 1);
        let entry = &report.entries[0];
        assert_eq!(entry.member.as_deref(), Some("inbox/one.eml"));
        assert_eq!(entry.content.subject, "Zipped");
        assert!(entry.display_name().ends_with("batch.zip!inbox/one.eml"));

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("batch.zip/broken.eml"));
        assert!(matches!(report.failed[0].1, MailError::Parse(_)));
    }

    #[test]
    fn test_corrupt_zip_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.zip"), b"PK not really").unwrap();
        std::fs::write(dir.path().join("ok.eml"), MESSAGE).unwrap();

        let report = scan_dir(dir.path()).unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, MailError::Archive { .. }));
    }

    #[test]
    fn test_member_name_recovery() {
        assert_eq!(member_name("账单.eml".as_bytes(), "ignored"), "账单.eml");
        assert_eq!(member_name(b"\xd5\xcb\xb5\xa5.eml", "╒╦╡Ñ.eml"), "账单.eml");
        assert_eq!(member_name(b"\xff\xff.eml", "ÿÿ.eml"), "ÿÿ.eml");
    }

    #[test]
    fn test_scan_missing_dir_is_error() {
        assert!(scan_dir("/nonexistent/mailgrab-scan").is_err());
    }
}
