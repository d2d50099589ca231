use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    /// Server rejected the credential. Never retried automatically.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Timeouts and dropped connections.
    #[error("Network error: {0}")]
    Network(String),

    /// NO/BAD responses or a response we could not parse.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Filter not found: {0}")]
    FilterNotFound(i64),

    #[error("A sync is already running for {0}")]
    SyncInProgress(String),
}

/// Coarse failure class reported alongside `error` progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Auth,
    Network,
    Protocol,
    Store,
    Other,
}

impl TriageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TriageError::Auth(_) | TriageError::Credential(_) => ErrorClass::Auth,
            TriageError::Network(_) => ErrorClass::Network,
            TriageError::Protocol(_) => ErrorClass::Protocol,
            TriageError::Database(_) => ErrorClass::Store,
            _ => ErrorClass::Other,
        }
    }

    /// Whether the scheduler's next tick may reasonably succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, TriageError::Network(_) | TriageError::SyncInProgress(_))
    }
}

// Serialize as a plain string so the presentation layer gets a readable message.
impl Serialize for TriageError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<r2d2::Error> for TriageError {
    fn from(e: r2d2::Error) -> Self {
        TriageError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for TriageError {
    fn from(e: rusqlite::Error) -> Self {
        TriageError::Database(e.to_string())
    }
}

impl From<std::io::Error> for TriageError {
    fn from(e: std::io::Error) -> Self {
        TriageError::Network(e.to_string())
    }
}

impl From<toml::de::Error> for TriageError {
    fn from(e: toml::de::Error) -> Self {
        TriageError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(TriageError::Auth("bad".into()).class(), ErrorClass::Auth);
        assert_eq!(TriageError::Credential("missing".into()).class(), ErrorClass::Auth);
        assert_eq!(TriageError::Network("timeout".into()).class(), ErrorClass::Network);
        assert_eq!(TriageError::Protocol("BAD".into()).class(), ErrorClass::Protocol);
        assert_eq!(TriageError::Database("locked".into()).class(), ErrorClass::Store);
        assert_eq!(TriageError::FilterNotFound(3).class(), ErrorClass::Other);
    }

    #[test]
    fn test_serializes_as_message() {
        let json = serde_json::to_string(&TriageError::InvalidInput("empty uid set".into())).unwrap();
        assert_eq!(json, "\"Invalid input: empty uid set\"");
    }

    #[test]
    fn test_sqlite_errors_become_database() {
        let err: TriageError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, TriageError::Database(_)));
        assert!(!err.is_transient());
    }
}
