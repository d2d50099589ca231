//! Remote mailbox client interface
//!
//! The sync coordinator talks to the server only through these traits. A
//! session is bound to one account and one selected mailbox and must not be
//! shared between callers. Every UID-set operation goes out as a single
//! command over a bounded [`UidSet`].

pub mod uid_set;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::config::AccountConfig;
use crate::credentials::Credential;
use crate::error::Result;

pub use uid_set::UidSet;

/// Header data for one message as returned by the server, before it is
/// shaped into a cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeaderRecord {
    pub uid: u32,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    /// Already rendered as "Display Name <mailbox@host>"
    pub sender: Option<String>,
    /// Date header as sent
    pub date: Option<String>,
    /// Server arrival time, unix seconds
    pub internal_date: Option<i64>,
    pub seen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagPredicate {
    /// Every message in the mailbox
    All,
    /// Messages without \Seen
    Unseen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagDelta {
    AddSeen,
    RemoveSeen,
}

impl FlagPredicate {
    pub fn search_query(&self) -> &'static str {
        match self {
            FlagPredicate::All => "ALL",
            FlagPredicate::Unseen => "UNSEEN",
        }
    }
}

impl FlagDelta {
    pub fn store_query(&self) -> &'static str {
        match self {
            FlagDelta::AddSeen => "+FLAGS (\\Seen)",
            FlagDelta::RemoveSeen => "-FLAGS (\\Seen)",
        }
    }

    /// Local `is_read` value after the delta is applied.
    pub fn marks_read(&self) -> bool {
        matches!(self, FlagDelta::AddSeen)
    }
}

/// Opens authenticated sessions with the account's mailbox selected.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn open_session(
        &self,
        account: &AccountConfig,
        credential: &Credential,
    ) -> Result<Box<dyn MailboxSession>>;
}

#[async_trait]
pub trait MailboxSession: Send {
    /// UIDVALIDITY reported when the mailbox was selected.
    fn uid_validity(&self) -> Option<u32>;

    /// Message count (EXISTS) reported when the mailbox was selected.
    fn exists(&self) -> u32;

    async fn search_uids(&mut self, predicate: FlagPredicate) -> Result<Vec<u32>>;

    async fn fetch_headers(&mut self, uids: &UidSet) -> Result<Vec<RawHeaderRecord>>;

    /// Returns how many messages the server reported as updated.
    async fn store_flags(&mut self, uids: &UidSet, delta: FlagDelta) -> Result<usize>;

    async fn logout(&mut self) -> Result<()>;
}
