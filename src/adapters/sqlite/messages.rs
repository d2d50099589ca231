use std::collections::{HashMap, HashSet};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use tracing::debug;

use super::filter_matches;
use super::DbPool;
use crate::error::Result;
use crate::types::responses::{Counts, Page};
use crate::types::{Message, PageRequest, Scope};

/// Placeholders per IN (...) clause, well below SQLite's variable limit.
const IN_CLAUSE_CHUNK: usize = 500;

/// A message ready to be stored. Any source can produce this.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub account: String,
    pub mailbox: String,
    pub uid: u32,
    pub uid_validity: u32,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub date_received: String,
    pub date_epoch: i64,
    pub is_read: bool,
}

const MESSAGE_COLUMNS: &str = "m.id, m.account, m.mailbox, m.uid, m.uid_validity, m.message_id,
    m.subject, m.sender, m.date_received, m.date_epoch, m.is_read";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        account: row.get(1)?,
        mailbox: row.get(2)?,
        uid: row.get(3)?,
        uid_validity: row.get(4)?,
        message_id: row.get(5)?,
        subject: row.get(6)?,
        sender: row.get(7)?,
        date_received: row.get(8)?,
        date_epoch: row.get(9)?,
        is_read: row.get::<_, i64>(10)? != 0,
    })
}

/// Inserts or updates a batch keyed by (account, mailbox, uid) and rewrites
/// the filter match edges of every touched row, all in one transaction.
/// Returns the row ids in batch order.
pub fn upsert_messages(pool: &DbPool, messages: &[NewMessage]) -> Result<Vec<i64>> {
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = chrono::Utc::now().timestamp();

    let mut ids = Vec::with_capacity(messages.len());
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO messages (
                account, mailbox, uid, uid_validity, message_id, subject, sender,
                date_received, date_epoch, is_read, fetched_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            ON CONFLICT(account, mailbox, uid) DO UPDATE SET
                uid_validity = excluded.uid_validity,
                message_id = excluded.message_id,
                subject = excluded.subject,
                sender = excluded.sender,
                date_received = excluded.date_received,
                date_epoch = excluded.date_epoch,
                is_read = excluded.is_read,
                updated_at = excluded.updated_at
            RETURNING id",
        )?;

        for msg in messages {
            let id: i64 = stmt.query_row(
                params![
                    msg.account,
                    msg.mailbox,
                    msg.uid,
                    msg.uid_validity,
                    msg.message_id,
                    msg.subject,
                    msg.sender,
                    msg.date_received,
                    msg.date_epoch,
                    msg.is_read as i32,
                    now,
                ],
                |row| row.get(0),
            )?;
            ids.push(id);
        }
    }

    filter_matches::rewrite_edges(&tx, &ids)?;
    tx.commit()?;

    debug!(count = ids.len(), "Upserted message batch");
    Ok(ids)
}

/// Sets `is_read` for the given UIDs in one transaction. Unknown UIDs are ignored.
pub fn set_read_state(
    pool: &DbPool,
    account: &str,
    mailbox: &str,
    uids: &[u32],
    is_read: bool,
) -> Result<usize> {
    if uids.is_empty() {
        return Ok(0);
    }

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = chrono::Utc::now().timestamp();
    let mut updated = 0;

    for chunk in uids.chunks(IN_CLAUSE_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "UPDATE messages SET is_read = ?, updated_at = ?
             WHERE account = ? AND mailbox = ? AND uid IN ({})",
            placeholders
        );

        let mut values: Vec<Box<dyn ToSql>> = vec![
            Box::new(is_read as i32),
            Box::new(now),
            Box::new(account.to_string()),
            Box::new(mailbox.to_string()),
        ];
        for uid in chunk {
            values.push(Box::new(*uid));
        }

        updated += tx.execute(&sql, params_from_iter(values.iter().map(|v| v.as_ref())))?;
    }

    tx.commit()?;
    Ok(updated)
}

pub fn mark_read(pool: &DbPool, account: &str, mailbox: &str, uids: &[u32]) -> Result<usize> {
    set_read_state(pool, account, mailbox, uids, true)
}

pub fn mark_unread(pool: &DbPool, account: &str, mailbox: &str, uids: &[u32]) -> Result<usize> {
    set_read_state(pool, account, mailbox, uids, false)
}

/// UID -> is_read for every cached row of the mailbox.
pub fn cached_read_states(pool: &DbPool, account: &str, mailbox: &str) -> Result<HashMap<u32, bool>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare_cached(
        "SELECT uid, is_read FROM messages WHERE account = ?1 AND mailbox = ?2",
    )?;
    let rows = stmt.query_map(params![account, mailbox], |row| {
        Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)? != 0))
    })?;

    let mut states = HashMap::new();
    for row in rows {
        let (uid, is_read) = row?;
        states.insert(uid, is_read);
    }
    Ok(states)
}

/// Aligns `is_read` of cached rows with the server's search results.
///
/// A cached UID in `server_unread` becomes unread. Any other cached unread
/// UID becomes read, unless `server_all` is known and lacks it (expunged on
/// the server; left alone since sync never deletes rows).
pub fn reconcile_read_flags(
    pool: &DbPool,
    account: &str,
    mailbox: &str,
    server_unread: &HashSet<u32>,
    server_all: Option<&HashSet<u32>>,
) -> Result<usize> {
    let cached = cached_read_states(pool, account, mailbox)?;

    let mut now_read = Vec::new();
    let mut now_unread = Vec::new();
    for (uid, is_read) in cached {
        let unread_on_server = server_unread.contains(&uid);
        if unread_on_server && is_read {
            now_unread.push(uid);
        } else if !unread_on_server && !is_read {
            let still_present = server_all.map(|all| all.contains(&uid)).unwrap_or(true);
            if still_present {
                now_read.push(uid);
            }
        }
    }

    if now_read.is_empty() && now_unread.is_empty() {
        return Ok(0);
    }

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = chrono::Utc::now().timestamp();
    let mut changed = 0;
    {
        let mut stmt = tx.prepare_cached(
            "UPDATE messages SET is_read = ?1, updated_at = ?2
             WHERE account = ?3 AND mailbox = ?4 AND uid = ?5",
        )?;
        for uid in &now_read {
            changed += stmt.execute(params![1, now, account, mailbox, uid])?;
        }
        for uid in &now_unread {
            changed += stmt.execute(params![0, now, account, mailbox, uid])?;
        }
    }
    tx.commit()?;

    debug!(account, read = now_read.len(), unread = now_unread.len(), "Reconciled read flags");
    Ok(changed)
}

/// Removes rows belonging to any UID-validity epoch other than `uid_validity`.
/// Match edges go with them through the foreign key cascade.
pub fn drop_stale_epoch(pool: &DbPool, account: &str, mailbox: &str, uid_validity: u32) -> Result<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let removed = tx.execute(
        "DELETE FROM messages WHERE account = ?1 AND mailbox = ?2 AND uid_validity != ?3",
        params![account, mailbox, uid_validity],
    )?;
    tx.commit()?;
    Ok(removed)
}

pub fn highest_uid(pool: &DbPool, account: &str, mailbox: &str) -> Result<u32> {
    let conn = pool.get()?;
    let uid: u32 = conn.query_row(
        "SELECT COALESCE(MAX(uid), 0) FROM messages WHERE account = ?1 AND mailbox = ?2",
        params![account, mailbox],
        |row| row.get(0),
    )?;
    Ok(uid)
}

pub fn get_message(pool: &DbPool, account: &str, mailbox: &str, uid: u32) -> Result<Option<Message>> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {} FROM messages m WHERE m.account = ?1 AND m.mailbox = ?2 AND m.uid = ?3",
        MESSAGE_COLUMNS
    );
    let message = conn
        .query_row(&sql, params![account, mailbox, uid], message_from_row)
        .optional()?;
    Ok(message)
}

pub fn count_messages(pool: &DbPool, account: &str) -> Result<Counts> {
    let conn = pool.get()?;
    let counts = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0)
         FROM messages WHERE account = ?1",
        params![account],
        |row| {
            Ok(Counts {
                total: row.get(0)?,
                unread: row.get(1)?,
            })
        },
    )?;
    Ok(counts)
}

/// (row id, subject, sender), newest first. Used for pattern previews.
pub fn match_fields(pool: &DbPool, account: &str) -> Result<Vec<(i64, String, String)>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, subject, sender FROM messages
         WHERE account = ?1
         ORDER BY date_epoch DESC, uid DESC",
    )?;
    let rows = stmt
        .query_map(params![account], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// One page sorted by date_epoch DESC, uid DESC.
pub fn list_messages(pool: &DbPool, account: &str, scope: Scope, request: PageRequest) -> Result<Page> {
    let conn = pool.get()?;
    query_page(&conn, account, scope, request, false)
}

/// Like [`list_messages`] but limited to rows matched by an enabled filter.
pub fn list_filtered(pool: &DbPool, account: &str, scope: Scope, request: PageRequest) -> Result<Page> {
    let conn = pool.get()?;
    query_page(&conn, account, scope, request, true)
}

/// Rows matched by at least one enabled filter.
pub fn count_filtered(pool: &DbPool, account: &str, scope: Scope) -> Result<i64> {
    let conn = pool.get()?;
    let count = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM messages m WHERE {}",
            row_conditions(scope, true)
        ),
        params![account, i64::MAX],
        |row| row.get(0),
    )?;
    Ok(count)
}

// Binds ?1 = account, ?2 = snapshot row id.
fn row_conditions(scope: Scope, filtered_only: bool) -> String {
    let mut conditions = String::from("m.account = ?1 AND m.id <= ?2");
    if scope == Scope::Unread {
        conditions.push_str(" AND m.is_read = 0");
    }
    if filtered_only {
        conditions.push_str(
            " AND EXISTS (
                SELECT 1 FROM filtered_emails fe
                JOIN filters f ON f.id = fe.filter_id
                WHERE fe.message_ref = m.id AND f.enabled = 1
            )",
        );
    }
    conditions
}

fn query_page(
    conn: &Connection,
    account: &str,
    scope: Scope,
    request: PageRequest,
    filtered_only: bool,
) -> Result<Page> {
    let request = request.normalized();

    // Rows inserted after the first page was served have larger ids and stay
    // out of later pages, so already-served rows never shift.
    let snapshot = match request.snapshot {
        Some(snapshot) => snapshot,
        None => conn.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM messages WHERE account = ?1",
            params![account],
            |row| row.get(0),
        )?,
    };

    let conditions = row_conditions(scope, filtered_only);
    let total_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM messages m WHERE {}", conditions),
        params![account, snapshot],
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {} FROM messages m WHERE {}
         ORDER BY m.date_epoch DESC, m.uid DESC
         LIMIT ?3 OFFSET ?4",
        MESSAGE_COLUMNS, conditions
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![account, snapshot, request.page_size as i64, request.offset() as i64],
            message_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Page {
        rows,
        total_count,
        page: request.page,
        page_size: request.page_size,
        snapshot: Some(snapshot),
    })
}
