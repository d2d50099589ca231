//! Inbox Cleanup - mail triage sync and cache engine
//!
//! Keeps a local SQLite cache of one IMAP mailbox per account, evaluates
//! user-authored text/regex filters against it and serves paginated reads.
//!
//! ## Module Organization
//!
//! - `adapters/`: SQLite store and IMAP client implementations
//! - `backend/`: Remote mailbox traits and batch types
//! - `engine/`: Filter evaluation and header-to-row shaping
//! - `services/`: Query façade, filter service, sync coordinator and scheduler
//! - `state/`: Application state tying the services together
//! - `config/`: Configuration management
//! - `credentials/`: Credential providers
//! - `types/`: Data structures and read models

pub mod adapters;
pub mod backend;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod services;
pub mod state;
pub mod types;

pub use error::{Result, TriageError};
pub use state::AppState;
