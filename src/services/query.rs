//! Read-only views over the local cache
//!
//! Never triggers a sync. Store failures are logged and turned into empty
//! results so a broken read never takes down the caller's view.

use tracing::error;

use crate::adapters::sqlite::{filter_matches, filters, messages, DbPool};
use crate::types::responses::{Counts, FilterMatchCount, Page};
use crate::types::{Filter, PageRequest, Scope};

#[derive(Clone)]
pub struct QueryFacade {
    pool: DbPool,
}

impl QueryFacade {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Cached messages, newest first. Pass the returned `snapshot` back when
    /// asking for later pages.
    pub fn list(&self, account: &str, scope: Scope, request: PageRequest) -> Page {
        messages::list_messages(&self.pool, account, scope, request)
            .unwrap_or_else(|e| empty_page("list", account, request, e))
    }

    /// Messages matched by at least one enabled filter.
    pub fn list_filtered(&self, account: &str, scope: Scope, request: PageRequest) -> Page {
        messages::list_filtered(&self.pool, account, scope, request)
            .unwrap_or_else(|e| empty_page("list_filtered", account, request, e))
    }

    pub fn counts(&self, account: &str) -> Counts {
        messages::count_messages(&self.pool, account).unwrap_or_else(|e| {
            error!(account, "Failed to count messages: {}", e);
            Counts::default()
        })
    }

    pub fn count_filtered(&self, account: &str, scope: Scope) -> i64 {
        messages::count_filtered(&self.pool, account, scope).unwrap_or_else(|e| {
            error!(account, "Failed to count filtered messages: {}", e);
            0
        })
    }

    pub fn filter_match_counts(&self, account: &str, scope: Scope) -> Vec<FilterMatchCount> {
        filter_matches::filter_match_counts(&self.pool, account, scope).unwrap_or_else(|e| {
            error!(account, "Failed to count filter matches: {}", e);
            Vec::new()
        })
    }

    pub fn filters(&self) -> Vec<Filter> {
        filters::get_filters(&self.pool).unwrap_or_else(|e| {
            error!("Failed to load filters: {}", e);
            Vec::new()
        })
    }

    /// Ids of the filters currently matching one cached message.
    pub fn message_filters(&self, message_id: i64) -> Vec<i64> {
        filter_matches::filters_for_message(&self.pool, message_id).unwrap_or_else(|e| {
            error!(message_id, "Failed to load message filters: {}", e);
            Vec::new()
        })
    }
}

fn empty_page(op: &str, account: &str, request: PageRequest, e: crate::error::TriageError) -> Page {
    error!(account, op, "Failed to read page: {}", e);
    let request = request.normalized();
    Page {
        page: request.page,
        page_size: request.page_size,
        snapshot: request.snapshot,
        ..Page::default()
    }
}
