//! Filter management
//!
//! Validates input before it reaches the store. Every write keeps the
//! filter's match edges in step inside the store transaction.

use tracing::info;

use crate::adapters::sqlite::filter_matches::{self, MatchScope};
use crate::adapters::sqlite::{filters, messages, DbPool};
use crate::engine::filter::{pattern_error, CompiledFilter};
use crate::error::{Result, TriageError};
use crate::types::responses::PatternPreview;
use crate::types::{Filter, FilterField, FilterInput};

/// Subjects returned with a pattern preview
const PREVIEW_SAMPLES: usize = 5;

#[derive(Clone)]
pub struct FilterService {
    pool: DbPool,
}

impl FilterService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn list(&self) -> Result<Vec<Filter>> {
        filters::get_filters(&self.pool)
    }

    pub fn get(&self, id: i64) -> Result<Filter> {
        filters::get_filter(&self.pool, id)?.ok_or(TriageError::FilterNotFound(id))
    }

    pub fn create(&self, input: FilterInput) -> Result<Filter> {
        let input = validate(input)?;
        filters::create_filter(&self.pool, &input)
    }

    pub fn update(&self, id: i64, input: FilterInput) -> Result<Filter> {
        let input = validate(input)?;
        filters::update_filter(&self.pool, id, &input)
    }

    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<Filter> {
        filters::set_filter_enabled(&self.pool, id, enabled)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        filters::delete_filter(&self.pool, id)
    }

    /// Rebuilds every edge from scratch.
    pub fn rematch_all(&self) -> Result<usize> {
        let edges = filter_matches::recompute_matches(&self.pool, MatchScope::All)?;
        info!(edges, "Recomputed all filter matches");
        Ok(edges)
    }

    /// Runs an unsaved pattern against the account's cached messages.
    pub fn preview_pattern(
        &self,
        account: &str,
        pattern: &str,
        field: FilterField,
        is_regex: bool,
    ) -> Result<PatternPreview> {
        if let Some(reason) = pattern_error(pattern, is_regex) {
            return Err(TriageError::InvalidInput(reason));
        }

        let candidate = CompiledFilter::compile(&Filter {
            id: 0,
            name: String::new(),
            pattern: pattern.to_string(),
            field,
            is_regex,
            enabled: true,
        });

        let rows = messages::match_fields(&self.pool, account)?;
        let mut preview = PatternPreview {
            total_count: rows.len() as i64,
            ..PatternPreview::default()
        };
        for (_, subject, sender) in &rows {
            if candidate.matches(subject, sender) {
                preview.match_count += 1;
                if preview.sample_matches.len() < PREVIEW_SAMPLES {
                    preview.sample_matches.push(subject.clone());
                }
            }
        }
        Ok(preview)
    }
}

fn validate(mut input: FilterInput) -> Result<FilterInput> {
    input.name = input.name.trim().to_string();
    if input.name.is_empty() {
        return Err(TriageError::InvalidInput("Filter name is empty".into()));
    }
    if input.pattern.trim().is_empty() {
        return Err(TriageError::InvalidInput("Pattern is empty".into()));
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::test_support::{seed, temp_pool};

    const ACCOUNT: &str = "a@x.com";

    fn input(name: &str, pattern: &str, is_regex: bool) -> FilterInput {
        FilterInput {
            name: name.into(),
            pattern: pattern.into(),
            field: FilterField::Any,
            is_regex,
            enabled: true,
        }
    }

    #[test]
    fn test_crud_round() {
        let (_dir, pool) = temp_pool();
        let service = FilterService::new(pool);

        let created = service.create(input("  News  ", "newsletter", false)).unwrap();
        assert_eq!(created.name, "News");
        assert_eq!(service.get(created.id).unwrap(), created);

        let updated = service.update(created.id, input("Promo", "sale", false)).unwrap();
        assert_eq!(updated.pattern, "sale");
        assert!(!service.set_enabled(created.id, false).unwrap().enabled);

        service.delete(created.id).unwrap();
        assert!(service.list().unwrap().is_empty());
        assert!(matches!(service.get(created.id), Err(TriageError::FilterNotFound(_))));
        assert!(matches!(service.delete(created.id), Err(TriageError::FilterNotFound(_))));
    }

    #[test]
    fn test_rejects_blank_input() {
        let (_dir, pool) = temp_pool();
        let service = FilterService::new(pool);
        assert!(matches!(service.create(input(" ", "x", false)), Err(TriageError::InvalidInput(_))));
        assert!(matches!(service.create(input("x", "  ", false)), Err(TriageError::InvalidInput(_))));
        assert!(matches!(
            service.update(99, input("x", "y", false)),
            Err(TriageError::FilterNotFound(99))
        ));
    }

    #[test]
    fn test_invalid_regex_is_saved_but_matches_nothing() {
        let (_dir, pool) = temp_pool();
        seed(&pool, ACCOUNT, &[(1, "(unclosed", false)]);
        let service = FilterService::new(pool);

        service.create(input("Broken", "(unclosed", true)).unwrap();
        assert_eq!(service.rematch_all().unwrap(), 0);
    }

    #[test]
    fn test_preview_pattern() {
        let (_dir, pool) = temp_pool();
        let rows: Vec<(u32, String, bool)> = (1..=8)
            .map(|uid| {
                let subject = if uid % 2 == 0 { format!("Newsletter {}", uid) } else { format!("Invoice {}", uid) };
                (uid, subject, false)
            })
            .collect();
        let rows: Vec<(u32, &str, bool)> = rows.iter().map(|(u, s, r)| (*u, s.as_str(), *r)).collect();
        seed(&pool, ACCOUNT, &rows);
        let service = FilterService::new(pool);

        let preview = service.preview_pattern(ACCOUNT, "^newsletter", FilterField::Subject, true).unwrap();
        assert_eq!(preview.total_count, 8);
        assert_eq!(preview.match_count, 4);
        assert_eq!(preview.sample_matches[0], "Newsletter 8");

        let many = service.preview_pattern(ACCOUNT, "e", FilterField::Subject, false).unwrap();
        assert_eq!(many.match_count, 8);
        assert_eq!(many.sample_matches.len(), PREVIEW_SAMPLES);

        assert!(matches!(
            service.preview_pattern(ACCOUNT, "(unclosed", FilterField::Any, true),
            Err(TriageError::InvalidInput(_))
        ));
    }
}
