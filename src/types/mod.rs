pub mod responses;

use serde::{Deserialize, Serialize};

use crate::error::TriageError;

/// A cached mailbox message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Local row id, also the snapshot watermark for pagination
    pub id: i64,
    pub account: String,
    pub mailbox: String,
    pub uid: u32,
    pub uid_validity: u32,
    pub message_id: String,
    pub subject: String,
    /// "Display Name <addr>" as rendered from the envelope
    pub sender: String,
    /// RFC 3339
    pub date_received: String,
    pub date_epoch: i64,
    pub is_read: bool,
}

/// Which header a filter inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Subject,
    Sender,
    /// Subject first, then sender
    Any,
}

impl FilterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterField::Subject => "subject",
            FilterField::Sender => "sender",
            FilterField::Any => "any",
        }
    }
}

impl std::str::FromStr for FilterField {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "subject" => Ok(FilterField::Subject),
            "sender" | "from" => Ok(FilterField::Sender),
            "any" => Ok(FilterField::Any),
            other => Err(TriageError::InvalidInput(format!("Unknown filter field: {}", other))),
        }
    }
}

/// A user-authored rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: i64,
    pub name: String,
    pub pattern: String,
    pub field: FilterField,
    pub is_regex: bool,
    pub enabled: bool,
}

/// Fields accepted by filter create/update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterInput {
    pub name: String,
    pub pattern: String,
    pub field: FilterField,
    pub is_regex: bool,
    pub enabled: bool,
}

/// Row selection for list/count reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    All,
    Unread,
}

/// Pagination request. `snapshot` comes from the first page served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based
    pub page: usize,
    pub page_size: usize,
    #[serde(default)]
    pub snapshot: Option<i64>,
}

pub const MAX_PAGE_SIZE: usize = 500;

impl PageRequest {
    pub fn first(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size,
            snapshot: None,
        }
    }

    /// Same snapshot, another page.
    pub fn at(&self, page: usize) -> Self {
        Self { page, ..*self }
    }

    pub fn with_snapshot(self, snapshot: Option<i64>) -> Self {
        Self { snapshot, ..self }
    }

    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
            snapshot: self.snapshot,
        }
    }

    pub fn offset(&self) -> usize {
        let req = self.normalized();
        (req.page - 1) * req.page_size
    }
}
