use rusqlite::{params, OptionalExtension};

use super::DbPool;
use crate::error::Result;

/// Delta marker for one account's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    pub account: String,
    pub mailbox: String,
    pub uid_validity: Option<u32>,
    pub highest_uid: u32,
    /// Unix seconds of the last fully committed run
    pub last_sync_at: i64,
}

pub fn get_cursor(pool: &DbPool, account: &str, mailbox: &str) -> Result<Option<SyncCursor>> {
    let conn = pool.get()?;
    let cursor = conn
        .query_row(
            "SELECT account, mailbox, uid_validity, highest_uid, last_sync_at
             FROM sync_cursor WHERE account = ?1 AND mailbox = ?2",
            params![account, mailbox],
            |row| {
                Ok(SyncCursor {
                    account: row.get(0)?,
                    mailbox: row.get(1)?,
                    uid_validity: row.get(2)?,
                    highest_uid: row.get(3)?,
                    last_sync_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(cursor)
}

/// Only called once every batch of a run has committed.
pub fn advance_cursor(pool: &DbPool, cursor: &SyncCursor) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO sync_cursor (account, mailbox, uid_validity, highest_uid, last_sync_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(account, mailbox) DO UPDATE SET
            uid_validity = excluded.uid_validity,
            highest_uid = excluded.highest_uid,
            last_sync_at = excluded.last_sync_at",
        params![
            cursor.account,
            cursor.mailbox,
            cursor.uid_validity,
            cursor.highest_uid,
            cursor.last_sync_at,
        ],
    )?;
    Ok(())
}
