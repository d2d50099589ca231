use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::info;

use super::filter_matches::rewrite_filter_edges;
use super::DbPool;
use crate::error::{Result, TriageError};
use crate::types::{Filter, FilterField, FilterInput};

const FILTER_COLUMNS: &str = "id, name, pattern, field, is_regex, enabled";

fn filter_from_row(row: &Row<'_>) -> rusqlite::Result<Filter> {
    let field: String = row.get(3)?;
    Ok(Filter {
        id: row.get(0)?,
        name: row.get(1)?,
        pattern: row.get(2)?,
        field: field.parse().unwrap_or(FilterField::Any),
        is_regex: row.get::<_, i64>(4)? != 0,
        enabled: row.get::<_, i64>(5)? != 0,
    })
}

pub(crate) fn load_filters(conn: &Connection) -> Result<Vec<Filter>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {} FROM filters ORDER BY id", FILTER_COLUMNS))?;
    let filters = stmt
        .query_map([], filter_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(filters)
}

fn load_filter(conn: &Connection, id: i64) -> Result<Option<Filter>> {
    let filter = conn
        .query_row(
            &format!("SELECT {} FROM filters WHERE id = ?1", FILTER_COLUMNS),
            params![id],
            filter_from_row,
        )
        .optional()?;
    Ok(filter)
}

pub fn get_filters(pool: &DbPool) -> Result<Vec<Filter>> {
    let conn = pool.get()?;
    load_filters(&conn)
}

pub fn get_filter(pool: &DbPool, id: i64) -> Result<Option<Filter>> {
    let conn = pool.get()?;
    load_filter(&conn, id)
}

/// Stores a new filter and computes its edges across the cache in the same transaction.
pub fn create_filter(pool: &DbPool, input: &FilterInput) -> Result<Filter> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = chrono::Utc::now().timestamp();

    tx.execute(
        "INSERT INTO filters (name, pattern, field, is_regex, enabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            input.name,
            input.pattern,
            input.field.as_str(),
            input.is_regex as i32,
            input.enabled as i32,
            now,
        ],
    )?;

    let filter = Filter {
        id: tx.last_insert_rowid(),
        name: input.name.clone(),
        pattern: input.pattern.clone(),
        field: input.field,
        is_regex: input.is_regex,
        enabled: input.enabled,
    };
    let edges = rewrite_filter_edges(&tx, &filter)?;
    tx.commit()?;

    info!(filter_id = filter.id, edges, "Created filter");
    Ok(filter)
}

/// Replaces one filter's definition. Edges are rebuilt only when the
/// pattern, field or regex flag changed.
pub fn update_filter(pool: &DbPool, id: i64, input: &FilterInput) -> Result<Filter> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing = load_filter(&tx, id)?.ok_or(TriageError::FilterNotFound(id))?;
    let now = chrono::Utc::now().timestamp();
    tx.execute(
        "UPDATE filters
         SET name = ?1, pattern = ?2, field = ?3, is_regex = ?4, enabled = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            input.name,
            input.pattern,
            input.field.as_str(),
            input.is_regex as i32,
            input.enabled as i32,
            now,
            id,
        ],
    )?;

    let filter = Filter {
        id,
        name: input.name.clone(),
        pattern: input.pattern.clone(),
        field: input.field,
        is_regex: input.is_regex,
        enabled: input.enabled,
    };
    let matching_changed = existing.pattern != filter.pattern
        || existing.field != filter.field
        || existing.is_regex != filter.is_regex;
    if matching_changed {
        rewrite_filter_edges(&tx, &filter)?;
    }
    tx.commit()?;
    Ok(filter)
}

/// Toggles inclusion in the filtered view. Matching is unaffected, so edges stay.
pub fn set_filter_enabled(pool: &DbPool, id: i64, enabled: bool) -> Result<Filter> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE filters SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
        params![enabled as i32, now, id],
    )?;
    if updated == 0 {
        return Err(TriageError::FilterNotFound(id));
    }
    load_filter(&conn, id)?.ok_or(TriageError::FilterNotFound(id))
}

/// Deletes one filter; its edges cascade. The id is never handed out again.
pub fn delete_filter(pool: &DbPool, id: i64) -> Result<()> {
    let conn = pool.get()?;
    let deleted = conn.execute("DELETE FROM filters WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(TriageError::FilterNotFound(id));
    }
    info!(filter_id = id, "Deleted filter");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::test_support::temp_pool;

    fn input(name: &str) -> FilterInput {
        FilterInput {
            name: name.into(),
            pattern: "promo".into(),
            field: FilterField::Subject,
            is_regex: false,
            enabled: true,
        }
    }

    #[test]
    fn test_ids_are_never_reused() {
        let (_dir, pool) = temp_pool();
        let a = create_filter(&pool, &input("a")).unwrap();
        let b = create_filter(&pool, &input("b")).unwrap();
        delete_filter(&pool, b.id).unwrap();
        let c = create_filter(&pool, &input("c")).unwrap();

        assert!(c.id > b.id);
        assert_eq!(get_filters(&pool).unwrap().iter().map(|f| f.id).collect::<Vec<_>>(), vec![a.id, c.id]);
    }

    #[test]
    fn test_update_keeps_id() {
        let (_dir, pool) = temp_pool();
        let created = create_filter(&pool, &input("a")).unwrap();
        let mut changed = input("renamed");
        changed.field = FilterField::Sender;
        changed.is_regex = true;

        let updated = update_filter(&pool, created.id, &changed).unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(get_filter(&pool, created.id).unwrap().unwrap(), updated);
    }

    #[test]
    fn test_missing_filter_errors() {
        let (_dir, pool) = temp_pool();
        assert!(matches!(update_filter(&pool, 42, &input("x")), Err(TriageError::FilterNotFound(42))));
        assert!(matches!(delete_filter(&pool, 42), Err(TriageError::FilterNotFound(42))));
        assert!(matches!(set_filter_enabled(&pool, 42, false), Err(TriageError::FilterNotFound(42))));
        assert!(get_filter(&pool, 42).unwrap().is_none());
    }

    #[test]
    fn test_toggle_enabled() {
        let (_dir, pool) = temp_pool();
        let created = create_filter(&pool, &input("a")).unwrap();
        let disabled = set_filter_enabled(&pool, created.id, false).unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.pattern, "promo");
    }
}
