//! Filter evaluation
//!
//! Pure functions over subject/sender text. A pattern that cannot be compiled
//! never fails the caller; it simply matches nothing.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::types::{Filter, FilterField};

/// Upper bound on compiled regex size, guards against pathological patterns.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone)]
enum Matcher {
    /// Lowercased needle for substring search
    Text(String),
    Regex(Regex),
    Never,
}

/// A filter with its pattern prepared for repeated evaluation.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub id: i64,
    field: FilterField,
    matcher: Matcher,
}

impl CompiledFilter {
    pub fn compile(filter: &Filter) -> Self {
        Self {
            id: filter.id,
            field: filter.field,
            matcher: build_matcher(filter.id, &filter.pattern, filter.is_regex),
        }
    }

    /// Matches one message. `any` checks subject before sender.
    pub fn matches(&self, subject: &str, sender: &str) -> bool {
        match self.field {
            FilterField::Subject => self.matches_text(subject),
            FilterField::Sender => self.matches_text(sender),
            FilterField::Any => self.matches_text(subject) || self.matches_text(sender),
        }
    }

    fn matches_text(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Text(needle) => text.to_lowercase().contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(text),
            Matcher::Never => false,
        }
    }
}

fn build_matcher(filter_id: i64, pattern: &str, is_regex: bool) -> Matcher {
    if pattern.trim().is_empty() {
        return Matcher::Never;
    }
    if !is_regex {
        return Matcher::Text(pattern.to_lowercase());
    }
    match compile_regex(pattern) {
        Ok(re) => Matcher::Regex(re),
        Err(e) => {
            warn!(filter_id, "Invalid filter pattern, matching nothing: {}", e);
            Matcher::Never
        }
    }
}

fn compile_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

pub fn compile_filters(filters: &[Filter]) -> Vec<CompiledFilter> {
    filters.iter().map(CompiledFilter::compile).collect()
}

/// Single evaluation without keeping the compiled form around.
pub fn matches(subject: &str, sender: &str, filter: &Filter) -> bool {
    CompiledFilter::compile(filter).matches(subject, sender)
}

/// Ids of every filter (enabled or not) matching the message.
pub fn matching_filter_ids(subject: &str, sender: &str, filters: &[CompiledFilter]) -> Vec<i64> {
    filters
        .iter()
        .filter(|f| f.matches(subject, sender))
        .map(|f| f.id)
        .collect()
}

/// Describes why a pattern would match nothing, for display next to the input.
pub fn pattern_error(pattern: &str, is_regex: bool) -> Option<String> {
    if pattern.trim().is_empty() {
        return Some("Pattern is empty".to_string());
    }
    if is_regex {
        return compile_regex(pattern).err().map(|e| e.to_string());
    }
    None
}
