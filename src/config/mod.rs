use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TriageError};

/// Global configuration instance
static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();

/// Largest UID set sent in a single FETCH/STORE command.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    /// Map of account name to account configuration
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Cache file location; defaults to the platform data dir
    pub path: Option<PathBuf>,
}

/// Which UIDs a sync run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Only messages carrying no \Seen flag
    #[default]
    Unread,
    /// Every message in the mailbox
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Minutes between background runs
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Mode used by interval runs once the account has a cursor
    #[serde(default)]
    pub mode: SyncMode,

    /// UIDs per FETCH/STORE command (clamped to 1..=MAX_BATCH_SIZE)
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,

    /// Applied to every remote call
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Email address, also the account identifier
    pub email: String,

    /// Mailbox to triage
    #[serde(default = "default_mailbox")]
    pub mailbox: String,

    pub imap: ImapConfig,
}

/// IMAP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,

    /// IMAP server port (implicit TLS)
    #[serde(default = "default_imap_port")]
    pub port: u16,

    pub auth: AuthConfig,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    Password {
        /// Username (usually email address)
        user: String,
        /// Password (can use command for keychain integration)
        password: PasswordSource,
    },
}

/// Password source - can be raw value or command to execute
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PasswordSource {
    /// Raw password value
    Raw(String),
    /// Command to execute to get password
    Command { command: String },
}

impl std::fmt::Debug for PasswordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordSource::Raw(_) => f.write_str("Raw(<redacted>)"),
            PasswordSource::Command { command } => {
                f.debug_struct("Command").field("command", command).finish()
            }
        }
    }
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_fetch_batch_size() -> usize {
    500
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_imap_port() -> u16 {
    993
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            mode: SyncMode::default(),
            fetch_batch_size: default_fetch_batch_size(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl SyncSettings {
    pub fn batch_size(&self) -> usize {
        self.fetch_batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }
}

impl AppConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        for account in config.accounts.values() {
            if account.email.trim().is_empty() {
                return Err(TriageError::Config("account email must not be empty".into()));
            }
        }
        Ok(config)
    }

    pub fn account(&self, email: &str) -> Option<&AccountConfig> {
        self.accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
    }

    /// Cache file path, falling back to the platform data directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("inbox-cleanup").join("inboxcleanup.sqlite3"))
            .ok_or_else(|| TriageError::Config("Failed to determine data directory".into()))
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("inbox-cleanup").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("inbox-cleanup")
                .join("config.toml"),
        );
        paths.push(home_dir.join(".inbox-cleanup.toml"));
    }

    paths
}

/// Initialize configuration from default paths
pub fn init_config() -> Result<()> {
    info!("Initializing configuration from default paths");

    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return init_config_from_path(&path);
        }
    }

    info!("No config file found, using empty config");
    set_config(AppConfig::default())
}

/// Initialize configuration from a specific path
pub fn init_config_from_path(path: &Path) -> Result<()> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| TriageError::Config(format!("Failed to read config: {}", e)))?;

    set_config(AppConfig::parse(&content)?)
}

/// Set the global configuration
fn set_config(config: AppConfig) -> Result<()> {
    match CONFIG.get() {
        Some(lock) => {
            let mut guard = lock
                .write()
                .map_err(|e| TriageError::Config(format!("Failed to lock config: {}", e)))?;
            *guard = config;
        }
        None => {
            CONFIG.set(RwLock::new(config)).ok();
        }
    }
    Ok(())
}

/// Snapshot of the global configuration
pub fn get_config() -> Result<AppConfig> {
    let lock = CONFIG
        .get()
        .ok_or_else(|| TriageError::Config("Configuration not initialized".into()))?;
    let guard = lock
        .read()
        .map_err(|e| TriageError::Config(format!("Failed to lock config: {}", e)))?;
    Ok(guard.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [sync]
        interval_minutes = 10
        mode = "full"

        [accounts.personal]
        email = "a@x.com"

        [accounts.personal.imap]
        host = "imap.x.com"
        auth = { type = "password", user = "a@x.com", password = { command = "pass show mail" } }
    "#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.sync.interval_minutes, 10);
        assert_eq!(config.sync.mode, SyncMode::Full);
        assert_eq!(config.sync.fetch_batch_size, 500);

        let account = config.account("A@X.com").unwrap();
        assert_eq!(account.mailbox, "INBOX");
        assert_eq!(account.imap.port, 993);
        let AuthConfig::Password { user, password } = &account.imap.auth;
        assert_eq!(user, "a@x.com");
        assert!(matches!(password, PasswordSource::Command { command } if command == "pass show mail"));
    }

    #[test]
    fn test_example_config_parses() {
        let config = AppConfig::parse(include_str!("../../config.example.toml")).unwrap();
        assert!(config.account("me@example.com").is_some());
        assert!(config.database.path.is_none());
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.accounts.is_empty());
        assert_eq!(config.sync.mode, SyncMode::Unread);
        assert_eq!(config.sync.interval(), Duration::from_secs(300));
        assert_eq!(config.sync.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_batch_size_is_clamped() {
        let mut settings = SyncSettings::default();
        settings.fetch_batch_size = 0;
        assert_eq!(settings.batch_size(), 1);
        settings.fetch_batch_size = 50_000;
        assert_eq!(settings.batch_size(), MAX_BATCH_SIZE);
    }

    #[test]
    fn test_raw_password_is_redacted() {
        let source = PasswordSource::Raw("hunter2".into());
        assert!(!format!("{:?}", source).contains("hunter2"));
    }

    #[test]
    fn test_rejects_empty_email() {
        let bad = r#"
            [accounts.x]
            email = " "
            [accounts.x.imap]
            host = "h"
            auth = { type = "password", user = "u", password = "p" }
        "#;
        assert!(matches!(AppConfig::parse(bad), Err(TriageError::Config(_))));
    }
}
