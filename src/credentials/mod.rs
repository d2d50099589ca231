//! Credential providers
//!
//! Credentials are resolved on demand, handed to the remote client to open a
//! session, and dropped afterwards. Nothing here writes to the cache.

use std::collections::HashMap;
use std::process::Command;
use std::sync::RwLock;
use tracing::debug;

use crate::config::{AppConfig, AuthConfig, PasswordSource};
use crate::error::{Result, TriageError};

#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Source of `(username, secret)` pairs keyed by account identifier.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self, account: &str) -> Result<Credential>;
}

/// In-memory provider for embedders that manage secrets themselves.
#[derive(Default)]
pub struct StaticCredentialProvider {
    entries: RwLock<HashMap<String, Credential>>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: &str, credential: Credential) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| TriageError::Credential(format!("Failed to lock credentials: {}", e)))?;
        entries.insert(account.to_lowercase(), credential);
        Ok(())
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn credential(&self, account: &str) -> Result<Credential> {
        let entries = self
            .entries
            .read()
            .map_err(|e| TriageError::Credential(format!("Failed to lock credentials: {}", e)))?;
        entries
            .get(&account.to_lowercase())
            .cloned()
            .ok_or_else(|| TriageError::Credential(format!("No credential for {}", account)))
    }
}

/// Resolves the password source declared in the config file.
pub struct ConfigCredentialProvider {
    config: AppConfig,
}

impl ConfigCredentialProvider {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

impl CredentialProvider for ConfigCredentialProvider {
    fn credential(&self, account: &str) -> Result<Credential> {
        let account_config = self
            .config
            .account(account)
            .ok_or_else(|| TriageError::AccountNotFound(account.to_string()))?;

        let AuthConfig::Password { user, password } = &account_config.imap.auth;
        let secret = resolve_password(password)?;
        Ok(Credential::new(user.clone(), secret))
    }
}

fn resolve_password(source: &PasswordSource) -> Result<String> {
    match source {
        PasswordSource::Raw(value) => Ok(value.clone()),
        PasswordSource::Command { command } => {
            debug!("Resolving password via command");
            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .output()
                .map_err(|e| TriageError::Credential(format!("Failed to run password command: {}", e)))?;

            if !output.status.success() {
                return Err(TriageError::Credential(format!(
                    "Password command exited with {}",
                    output.status
                )));
            }

            let secret = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if secret.is_empty() {
                return Err(TriageError::Credential("Password command returned nothing".into()));
            }
            Ok(secret)
        }
    }
}
