//! Read models handed to the presentation layer
//!
//! These types are serialized as-is. Keep them lean.

use serde::{Deserialize, Serialize};

use super::Message;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub total: i64,
    pub unread: i64,
}

/// One page of cached messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    pub rows: Vec<Message>,
    pub total_count: i64,
    pub page: usize,
    pub page_size: usize,
    /// Pass back with later page requests to keep row identity stable
    pub snapshot: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterMatchCount {
    pub filter_id: i64,
    pub name: String,
    pub enabled: bool,
    pub match_count: i64,
}

/// Result of trying a pattern before saving it as a filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternPreview {
    pub match_count: i64,
    pub total_count: i64,
    /// Subjects of the first few matches, newest first
    pub sample_matches: Vec<String>,
}
