//! Filter match edges
//!
//! Edges are always rebuilt from scratch for the rows in question rather than
//! patched, so a message's edge set is exactly the filters matching its
//! current subject and sender. Disabled filters keep their edges; they are
//! only excluded when building the filtered view.

use rusqlite::{params, Connection, TransactionBehavior};
use tracing::debug;

use super::filters::load_filters;
use super::DbPool;
use crate::engine::filter::{compile_filters, matching_filter_ids, CompiledFilter};
use crate::error::Result;
use crate::types::responses::FilterMatchCount;
use crate::types::{Filter, Scope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchScope {
    Messages(Vec<i64>),
    All,
}

/// Recomputes edges for the given rows, or for the whole cache, in one transaction.
/// Returns the number of edges written.
pub fn recompute_matches(pool: &DbPool, scope: MatchScope) -> Result<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let written = match scope {
        MatchScope::Messages(ids) => rewrite_edges(&tx, &ids)?,
        MatchScope::All => rewrite_all_edges(&tx)?,
    };
    tx.commit()?;
    Ok(written)
}

/// Rewrites edges of the given message rows against every current filter.
/// Runs inside the caller's transaction.
pub(crate) fn rewrite_edges(conn: &Connection, message_ids: &[i64]) -> Result<usize> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let compiled = compile_filters(&load_filters(conn)?);
    let now = chrono::Utc::now().timestamp();

    let mut select = conn.prepare_cached("SELECT subject, sender FROM messages WHERE id = ?1")?;
    let mut delete = conn.prepare_cached("DELETE FROM filtered_emails WHERE message_ref = ?1")?;
    let mut insert = conn.prepare_cached(
        "INSERT INTO filtered_emails (message_ref, filter_id, matched_at) VALUES (?1, ?2, ?3)",
    )?;

    let mut written = 0;
    for id in message_ids {
        delete.execute(params![id])?;
        let fields: Option<(String, String)> = {
            let mut rows = select.query(params![id])?;
            match rows.next()? {
                Some(row) => Some((row.get(0)?, row.get(1)?)),
                None => None,
            }
        };
        let Some((subject, sender)) = fields else {
            continue;
        };
        for filter_id in matching_filter_ids(&subject, &sender, &compiled) {
            written += insert.execute(params![id, filter_id, now])?;
        }
    }
    Ok(written)
}

/// Rewrites every edge of one filter across the whole cache.
pub(crate) fn rewrite_filter_edges(conn: &Connection, filter: &Filter) -> Result<usize> {
    conn.execute("DELETE FROM filtered_emails WHERE filter_id = ?1", params![filter.id])?;
    let compiled = [CompiledFilter::compile(filter)];
    scan_and_insert(conn, &compiled)
}

fn rewrite_all_edges(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM filtered_emails", [])?;
    let compiled = compile_filters(&load_filters(conn)?);
    let written = scan_and_insert(conn, &compiled)?;
    debug!(filters = compiled.len(), edges = written, "Full filter rematch");
    Ok(written)
}

fn scan_and_insert(conn: &Connection, compiled: &[CompiledFilter]) -> Result<usize> {
    if compiled.is_empty() {
        return Ok(0);
    }
    let now = chrono::Utc::now().timestamp();

    let mut select = conn.prepare("SELECT id, subject, sender FROM messages")?;
    let mut insert = conn.prepare_cached(
        "INSERT INTO filtered_emails (message_ref, filter_id, matched_at) VALUES (?1, ?2, ?3)",
    )?;

    let mut written = 0;
    let mut rows = select.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let subject: String = row.get(1)?;
        let sender: String = row.get(2)?;
        for filter_id in matching_filter_ids(&subject, &sender, compiled) {
            written += insert.execute(params![id, filter_id, now])?;
        }
    }
    Ok(written)
}

/// Match count per filter (enabled or not) over one account's messages.
pub fn filter_match_counts(pool: &DbPool, account: &str, scope: Scope) -> Result<Vec<FilterMatchCount>> {
    let conn = pool.get()?;
    let unread_only = scope == Scope::Unread;
    let mut stmt = conn.prepare_cached(
        "SELECT f.id, f.name, f.enabled, COUNT(m.id)
         FROM filters f
         LEFT JOIN filtered_emails fe ON fe.filter_id = f.id
         LEFT JOIN messages m ON m.id = fe.message_ref
             AND m.account = ?1
             AND (?2 = 0 OR m.is_read = 0)
         GROUP BY f.id
         ORDER BY f.id",
    )?;
    let counts = stmt
        .query_map(params![account, unread_only as i32], |row| {
            Ok(FilterMatchCount {
                filter_id: row.get(0)?,
                name: row.get(1)?,
                enabled: row.get::<_, i64>(2)? != 0,
                match_count: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(counts)
}

/// Filter ids currently matching one message row.
pub fn filters_for_message(pool: &DbPool, message_ref: i64) -> Result<Vec<i64>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare_cached(
        "SELECT filter_id FROM filtered_emails WHERE message_ref = ?1 ORDER BY filter_id",
    )?;
    let ids = stmt
        .query_map(params![message_ref], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::filters::{create_filter, delete_filter, get_filters, update_filter};
    use crate::adapters::sqlite::messages::{count_filtered, get_message, list_filtered, upsert_messages};
    use crate::adapters::sqlite::test_support::{new_message, seed, temp_pool};
    use crate::engine::filter::matches;
    use crate::types::{FilterField, FilterInput, PageRequest};

    const ACCOUNT: &str = "a@x.com";

    fn input(name: &str, pattern: &str, field: FilterField, is_regex: bool) -> FilterInput {
        FilterInput {
            name: name.into(),
            pattern: pattern.into(),
            field,
            is_regex,
            enabled: true,
        }
    }

    fn newsletter_cache(pool: &DbPool) -> Vec<i64> {
        let mut rows: Vec<(u32, String)> = (1..=3).map(|uid| (uid, format!("Weekly Newsletter #{}", uid))).collect();
        rows.extend((4..=10).map(|uid| (uid, format!("Invoice {}", uid))));
        let batch: Vec<_> = rows
            .iter()
            .map(|(uid, subject)| new_message(ACCOUNT, *uid, subject, "Billing <billing@x.com>", false))
            .collect();
        upsert_messages(pool, &batch).unwrap()
    }

    /// Every message's edges equal the filters that match it.
    fn assert_edges_exact(pool: &DbPool, ids: &[i64]) {
        let filters = get_filters(pool).unwrap();
        let conn = pool.get().unwrap();
        for id in ids {
            let (subject, sender): (String, String) = conn
                .query_row("SELECT subject, sender FROM messages WHERE id = ?1", params![id], |r| {
                    Ok((r.get(0)?, r.get(1)?))
                })
                .unwrap();
            let expected: Vec<i64> = filters
                .iter()
                .filter(|f| matches(&subject, &sender, f))
                .map(|f| f.id)
                .collect();
            assert_eq!(filters_for_message(pool, *id).unwrap(), expected, "message {}", id);
        }
    }

    #[test]
    fn test_newsletter_count_is_three() {
        let (_dir, pool) = temp_pool();
        newsletter_cache(&pool);
        let filter = create_filter(&pool, &input("News", "newsletter", FilterField::Any, false)).unwrap();

        let counts = filter_match_counts(&pool, ACCOUNT, Scope::All).unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].filter_id, filter.id);
        assert_eq!(counts[0].match_count, 3);
    }

    #[test]
    fn test_both_rewrite_paths_write_the_engine_match_set() {
        let (_dir, pool) = temp_pool();
        create_filter(&pool, &input("News", "newsletter", FilterField::Subject, false)).unwrap();
        let mut billing = input("Billing", r"^billing\b", FilterField::Any, true);
        billing.enabled = false;
        create_filter(&pool, &billing).unwrap();

        // Per-row path, inside the upsert transaction
        let ids = newsletter_cache(&pool);
        let compiled = compile_filters(&get_filters(&pool).unwrap());
        let conn = pool.get().unwrap();
        let expected: Vec<Vec<i64>> = ids
            .iter()
            .map(|id| {
                let (subject, sender): (String, String) = conn
                    .query_row("SELECT subject, sender FROM messages WHERE id = ?1", params![id], |r| {
                        Ok((r.get(0)?, r.get(1)?))
                    })
                    .unwrap();
                matching_filter_ids(&subject, &sender, &compiled)
            })
            .collect();
        drop(conn);
        let per_row: Vec<Vec<i64>> = ids.iter().map(|id| filters_for_message(&pool, *id).unwrap()).collect();
        assert_eq!(per_row, expected);
        assert_eq!(per_row[0].len(), 2);

        // Full scan path
        recompute_matches(&pool, MatchScope::All).unwrap();
        let rescanned: Vec<Vec<i64>> = ids.iter().map(|id| filters_for_message(&pool, *id).unwrap()).collect();
        assert_eq!(rescanned, expected);
    }

    #[test]
    fn test_invalid_regex_full_recompute() {
        let (_dir, pool) = temp_pool();
        newsletter_cache(&pool);
        create_filter(&pool, &input("Broken", "(unclosed", FilterField::Any, true)).unwrap();
        create_filter(&pool, &input("Invoices", "^invoice", FilterField::Subject, true)).unwrap();

        let written = recompute_matches(&pool, MatchScope::All).unwrap();
        assert_eq!(written, 7);

        let counts = filter_match_counts(&pool, ACCOUNT, Scope::All).unwrap();
        assert_eq!(counts[0].match_count, 0);
        assert_eq!(counts[1].match_count, 7);
    }

    #[test]
    fn test_edges_follow_upserts_and_crud() {
        let (_dir, pool) = temp_pool();
        let ids = newsletter_cache(&pool);
        let news = create_filter(&pool, &input("News", "newsletter", FilterField::Any, false)).unwrap();
        let billing = create_filter(&pool, &input("Billing", "billing@", FilterField::Sender, false)).unwrap();
        assert_edges_exact(&pool, &ids);

        // Subject change on upsert drops the newsletter edge
        let renamed = new_message(ACCOUNT, 1, "Renewal notice", "Billing <billing@x.com>", false);
        upsert_messages(&pool, &[renamed]).unwrap();
        assert_edges_exact(&pool, &ids);
        assert_eq!(filter_match_counts(&pool, ACCOUNT, Scope::All).unwrap()[0].match_count, 2);

        // Pattern edit replaces that filter's edges
        update_filter(&pool, news.id, &input("News", "invoice", FilterField::Subject, false)).unwrap();
        assert_edges_exact(&pool, &ids);

        // Deleting cascades its edges away
        delete_filter(&pool, billing.id).unwrap();
        assert_edges_exact(&pool, &ids);
        let conn = pool.get().unwrap();
        let orphans: i64 = conn
            .query_row("SELECT COUNT(*) FROM filtered_emails WHERE filter_id = ?1", params![billing.id], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_disabled_filters_count_but_do_not_filter_view() {
        let (_dir, pool) = temp_pool();
        newsletter_cache(&pool);
        let mut disabled = input("News", "newsletter", FilterField::Any, false);
        disabled.enabled = false;
        create_filter(&pool, &disabled).unwrap();

        assert_eq!(filter_match_counts(&pool, ACCOUNT, Scope::All).unwrap()[0].match_count, 3);
        let page = list_filtered(&pool, ACCOUNT, Scope::All, PageRequest::first(50)).unwrap();
        assert_eq!(page.total_count, 0);

        create_filter(&pool, &input("Invoices", "invoice", FilterField::Subject, false)).unwrap();
        let page = list_filtered(&pool, ACCOUNT, Scope::All, PageRequest::first(50)).unwrap();
        assert_eq!(page.total_count, 7);
        assert_eq!(count_filtered(&pool, ACCOUNT, Scope::All).unwrap(), 7);
        assert_eq!(count_filtered(&pool, ACCOUNT, Scope::Unread).unwrap(), 7);
    }

    #[test]
    fn test_unread_scope_counts() {
        let (_dir, pool) = temp_pool();
        seed(&pool, ACCOUNT, &[(1, "Newsletter", true), (2, "Newsletter", false)]);
        create_filter(&pool, &input("News", "newsletter", FilterField::Any, false)).unwrap();

        assert_eq!(filter_match_counts(&pool, ACCOUNT, Scope::All).unwrap()[0].match_count, 2);
        assert_eq!(filter_match_counts(&pool, ACCOUNT, Scope::Unread).unwrap()[0].match_count, 1);
        assert_eq!(filter_match_counts(&pool, "other@x.com", Scope::All).unwrap()[0].match_count, 0);
    }

    #[test]
    fn test_recompute_subset_leaves_others() {
        let (_dir, pool) = temp_pool();
        let ids = newsletter_cache(&pool);
        create_filter(&pool, &input("News", "newsletter", FilterField::Any, false)).unwrap();

        // Wipe edges behind the store's back, then repair one row.
        pool.get().unwrap().execute("DELETE FROM filtered_emails", []).unwrap();
        recompute_matches(&pool, MatchScope::Messages(vec![ids[0]])).unwrap();

        assert_eq!(filters_for_message(&pool, ids[0]).unwrap().len(), 1);
        assert!(filters_for_message(&pool, ids[1]).unwrap().is_empty());
        assert!(get_message(&pool, ACCOUNT, "INBOX", 2).unwrap().is_some());
    }
}
