//! Application settings.
//!
//! Settings are loaded from a TOML file at:
//! 1. `$MAILGRAB_CONFIG` (environment variable)
//! 2. `~/.config/mailgrab/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailgrab\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Mailbox credentials are deliberately not part of this file; see
//! [`crate::credentials`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Ingestion defaults.
    pub ingest: IngestConfig,
    /// Statement export defaults.
    pub export: ExportConfig,
    /// EML directory scan defaults.
    pub scan: ScanConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Override the SQLite database location.
    pub database_path: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Ingestion defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Mailbox to select when none is given on the command line.
    pub mailbox: String,
    /// Where raw bytes of unparseable messages are written. Disabled if unset.
    pub quarantine_dir: Option<PathBuf>,
    /// Default credentials file (`key=value` format).
    pub credentials_path: Option<PathBuf>,
}

/// Statement export defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// CSV field separator character.
    pub csv_separator: char,
}

/// EML scan defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of body lines shown per message.
    pub preview_lines: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            database_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mailbox: "INBOX".to_string(),
            quarantine_dir: None,
            credentials_path: None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { csv_separator: ',' }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            preview_lines: crate::parser::eml::DEFAULT_PREVIEW_LINES,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load settings, searching standard locations.
///
/// Returns the defaults if no file is found or on parse error.
pub fn load_settings() -> Settings {
    if let Some(path) = settings_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Settings>(&contents) {
                    Ok(settings) => {
                        tracing::info!(path = %path.display(), "Loaded settings");
                        return settings;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse settings, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read settings file, using defaults"
                    );
                }
            }
        }
    }
    Settings::default()
}

/// Determine the settings file path (env var first, then standard dirs).
pub fn settings_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILGRAB_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailgrab").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(settings: &Settings) -> PathBuf {
    if let Some(ref dir) = settings.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailgrab")
}

/// Return the SQLite database path.
///
/// Defaults to `mailgrab.db` in the platform data directory.
pub fn database_path(settings: &Settings) -> PathBuf {
    if let Some(ref path) = settings.general.database_path {
        return path.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailgrab")
        .join("mailgrab.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.general.log_level, "info");
        assert_eq!(settings.ingest.mailbox, "INBOX");
        assert!(settings.ingest.quarantine_dir.is_none());
        assert_eq!(settings.export.csv_separator, ',');
        assert_eq!(settings.scan.preview_lines, 20);
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let partial = r#"
[general]
database_path = "/tmp/mail.db"

[ingest]
quarantine_dir = "/tmp/bad"
"#;
        let settings: Settings = toml::from_str(partial).expect("parse partial");
        assert_eq!(
            database_path(&settings),
            PathBuf::from("/tmp/mail.db")
        );
        assert_eq!(
            settings.ingest.quarantine_dir.as_deref(),
            Some(std::path::Path::new("/tmp/bad"))
        );
        // Other fields use defaults
        assert_eq!(settings.ingest.mailbox, "INBOX");
        assert_eq!(settings.scan.preview_lines, 20);
    }

    #[test]
    fn test_database_path_default_file_name() {
        let settings = Settings::default();
        assert!(database_path(&settings).ends_with("mailgrab/mailgrab.db"));
    }
}
