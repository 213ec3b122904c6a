//! Mailbox credential loading.
//!
//! Three sources are understood:
//! - a flat `key=value` file, one pair per line, no comments or sections;
//! - an INI-style file with an `[email]` section (`imap_server`,
//!   `imap_ssl_port`, `imap_user`, `imap_pwd`);
//! - an environment namespace (`{PREFIX}_USERNAME`, `{PREFIX}_PASSWORD`,
//!   `{PREFIX}_IMAP_SERVER`, `{PREFIX}_IMAP_PORT`), also read from a `.env`
//!   file; exported variables win over the file.
//!
//! All three feed the same alias schema, so `imap_server` and `host` are
//! interchangeable everywhere.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{MailError, Result};

const HOST_KEYS: &[&str] = &["host", "imap_server"];
const PORT_KEYS: &[&str] = &["port", "imap_port", "imap_ssl_port"];
const USER_KEYS: &[&str] = &["username", "email", "user", "imap_user"];
const SECRET_KEYS: &[&str] = &["password", "secret", "imap_pwd"];
const PROVIDER_KEY: &str = "provider";

/// Section read from INI-style credential files.
const INI_SECTION: &str = "email";

/// Default IMAPS port.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Known mailbox providers with built-in endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Generic,
    Qq,
    Netease126,
    Netease163,
}

impl Provider {
    /// Resolve a provider from an explicit `provider=` value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "generic" => Some(Self::Generic),
            "qq" => Some(Self::Qq),
            "126" => Some(Self::Netease126),
            "163" => Some(Self::Netease163),
            _ => None,
        }
    }

    /// Guess the provider from the domain of a login name.
    pub fn from_username(username: &str) -> Self {
        let domain = username
            .rsplit_once('@')
            .map(|(_, d)| d.to_lowercase())
            .unwrap_or_default();
        match domain.as_str() {
            "qq.com" | "foxmail.com" => Self::Qq,
            "126.com" => Self::Netease126,
            "163.com" => Self::Netease163,
            _ => Self::Generic,
        }
    }

    /// Default IMAPS host for this provider, if it has one.
    pub fn default_host(self) -> Option<&'static str> {
        match self {
            Self::Generic => None,
            Self::Qq => Some("imap.qq.com"),
            Self::Netease126 => Some("imap.126.com"),
            Self::Netease163 => Some("imap.163.com"),
        }
    }

    /// NetEase servers refuse SELECT ("Unsafe Login") until the client
    /// identifies itself with an IMAP `ID` command.
    pub fn requires_client_id(self) -> bool {
        matches!(self, Self::Netease126 | Self::Netease163)
    }
}

/// Credentials for one mailbox. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct MailboxCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    secret: String,
    pub provider: Provider,
    /// Send an IMAP `ID` command right after LOGIN.
    pub send_client_id: bool,
}

impl MailboxCredentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let username = username.into();
        let provider = Provider::from_username(&username);
        Self {
            host: host.into(),
            port,
            username,
            secret: secret.into(),
            provider,
            send_client_id: provider.requires_client_id(),
        }
    }

    /// The password or app-specific authorization code.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for MailboxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("provider", &self.provider)
            .field("send_client_id", &self.send_client_id)
            .finish()
    }
}

/// Where credentials come from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Line-oriented `key=value` file.
    FlatFile(PathBuf),
    /// INI file with an `[email]` section.
    IniFile(PathBuf),
    /// Environment variables sharing a prefix, e.g. `EMAIL_QQ`.
    ///
    /// Without `env_file`, a `.env` found from the working directory
    /// upwards is used when present.
    Env {
        prefix: String,
        env_file: Option<PathBuf>,
    },
}

/// A raw value and the line it came from (0 for environment values).
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    line: usize,
}

type RawConfig = HashMap<String, Entry>;

/// Load credentials from `source`.
pub fn load(source: &CredentialSource) -> Result<MailboxCredentials> {
    let (origin, raw) = match source {
        CredentialSource::FlatFile(path) => (path.clone(), parse_flat(&read(path)?, path)?),
        CredentialSource::IniFile(path) => (path.clone(), parse_ini(&read(path)?, path)?),
        CredentialSource::Env { prefix, env_file } => {
            let file_vars = dotenv_vars(env_file.as_deref())?;
            let raw = read_env(prefix, |key| {
                std::env::var(key)
                    .ok()
                    .or_else(|| file_vars.get(key).cloned())
            });
            (PathBuf::from(format!("${prefix}_*")), raw)
        }
    };
    let creds = from_raw(&raw, &origin)?;
    info!(
        source = %origin.display(),
        host = %creds.host,
        port = creds.port,
        user = %creds.username,
        "Loaded mailbox credentials"
    );
    Ok(creds)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MailError::ConfigNotFound(path.to_path_buf())
        } else {
            MailError::io(path, e)
        }
    })
}

/// Parse `key=value` lines. Every non-blank line must split into exactly
/// one key and one value.
fn parse_flat(text: &str, path: &Path) -> Result<RawConfig> {
    let mut raw = RawConfig::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parts: Vec<&str> = trimmed.split('=').collect();
        if parts.len() != 2 || parts[0].trim().is_empty() {
            return Err(MailError::ConfigParse {
                path: path.to_path_buf(),
                line: line_no,
                reason: "expected exactly one 'key=value' pair".to_string(),
            });
        }
        raw.insert(
            parts[0].trim().to_lowercase(),
            Entry {
                value: parts[1].trim().to_string(),
                line: line_no,
            },
        );
    }
    Ok(raw)
}

/// Parse the `[email]` section of an INI file.
fn parse_ini(text: &str, path: &Path) -> Result<RawConfig> {
    let mut raw = RawConfig::new();
    let mut in_section = false;
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            in_section = name.trim().eq_ignore_ascii_case(INI_SECTION);
            continue;
        }
        if !in_section {
            continue;
        }
        // INI allows `key = value` and `key: value`; the first separator wins.
        let split = trimmed
            .find(['=', ':'])
            .map(|pos| (&trimmed[..pos], &trimmed[pos + 1..]));
        match split {
            Some((key, value)) if !key.trim().is_empty() => {
                raw.insert(
                    key.trim().to_lowercase(),
                    Entry {
                        value: value.trim().to_string(),
                        line: line_no,
                    },
                );
            }
            _ => {
                return Err(MailError::ConfigParse {
                    path: path.to_path_buf(),
                    line: line_no,
                    reason: "expected 'key = value'".to_string(),
                });
            }
        }
    }
    Ok(raw)
}

/// Variables defined in a `.env` file. Without `path` the file is optional.
fn dotenv_vars(path: Option<&Path>) -> Result<HashMap<String, String>> {
    let (origin, iter) = match path {
        Some(path) => (
            path,
            dotenvy::from_path_iter(path).map_err(|e| dotenv_error(path, e))?,
        ),
        None => match dotenvy::dotenv_iter() {
            Ok(iter) => (Path::new(".env"), iter),
            Err(e) if e.not_found() => return Ok(HashMap::new()),
            Err(e) => return Err(dotenv_error(Path::new(".env"), e)),
        },
    };

    let mut vars = HashMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| dotenv_error(origin, e))?;
        vars.insert(key, value);
    }
    debug!(path = %origin.display(), vars = vars.len(), "Read .env file");
    Ok(vars)
}

fn dotenv_error(path: &Path, e: dotenvy::Error) -> MailError {
    match e {
        e if e.not_found() => MailError::ConfigNotFound(path.to_path_buf()),
        dotenvy::Error::Io(source) => MailError::io(path, source),
        other => MailError::ConfigParse {
            path: path.to_path_buf(),
            line: 0,
            reason: other.to_string(),
        },
    }
}

/// Collect `{prefix}_*` variables through `lookup`.
fn read_env(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> RawConfig {
    let mut raw = RawConfig::new();
    for suffix in ["USERNAME", "PASSWORD", "IMAP_SERVER", "IMAP_PORT", "PROVIDER"] {
        let var = format!("{prefix}_{suffix}");
        if let Some(value) = lookup(&var) {
            debug!(var = %var, "Found credential variable");
            raw.insert(
                suffix.to_lowercase(),
                Entry {
                    value: value.trim().to_string(),
                    line: 0,
                },
            );
        }
    }
    raw
}

fn first_of<'a>(raw: &'a RawConfig, aliases: &[&str]) -> Option<&'a Entry> {
    aliases.iter().find_map(|k| raw.get(*k))
}

/// Validate the alias schema and build credentials.
fn from_raw(raw: &RawConfig, origin: &Path) -> Result<MailboxCredentials> {
    let username = first_of(raw, USER_KEYS)
        .ok_or_else(|| MailError::ConfigMissingKey(USER_KEYS[0].to_string()))?
        .value
        .clone();
    let secret = first_of(raw, SECRET_KEYS)
        .ok_or_else(|| MailError::ConfigMissingKey(SECRET_KEYS[0].to_string()))?
        .value
        .clone();

    let provider = match raw.get(PROVIDER_KEY) {
        Some(entry) => Provider::from_name(&entry.value).ok_or_else(|| MailError::ConfigParse {
            path: origin.to_path_buf(),
            line: entry.line,
            reason: format!("unknown provider '{}'", entry.value),
        })?,
        None => Provider::from_username(&username),
    };

    let host = match first_of(raw, HOST_KEYS) {
        Some(entry) => entry.value.clone(),
        None => provider
            .default_host()
            .ok_or_else(|| MailError::ConfigMissingKey(HOST_KEYS[0].to_string()))?
            .to_string(),
    };

    let port = match first_of(raw, PORT_KEYS) {
        Some(entry) => entry.value.parse::<u16>().map_err(|e| MailError::ConfigParse {
            path: origin.to_path_buf(),
            line: entry.line,
            reason: format!("invalid port '{}': {e}", entry.value),
        })?,
        None => DEFAULT_IMAP_PORT,
    };

    Ok(MailboxCredentials {
        host,
        port,
        username,
        secret,
        provider,
        send_client_id: provider.requires_client_id(),
    })
}
