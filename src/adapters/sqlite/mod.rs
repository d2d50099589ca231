pub mod filter_matches;
pub mod filters;
pub mod messages;
pub mod pool;
pub mod schema;
pub mod sync_cursor;

pub use pool::DbPool;

#[cfg(test)]
pub mod test_support {
    use tempfile::TempDir;

    use super::DbPool;
    use crate::adapters::sqlite::messages::{upsert_messages, NewMessage};

    /// Fresh on-disk cache. Keep the TempDir alive for the pool's lifetime.
    pub fn temp_pool() -> (TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = super::pool::open(&dir.path().join("cache.sqlite3")).unwrap();
        (dir, pool)
    }

    pub fn new_message(account: &str, uid: u32, subject: &str, sender: &str, is_read: bool) -> NewMessage {
        NewMessage {
            account: account.to_string(),
            mailbox: "INBOX".to_string(),
            uid,
            uid_validity: 1,
            message_id: format!("<{}@test>", uid),
            subject: subject.to_string(),
            sender: sender.to_string(),
            date_received: chrono::DateTime::<chrono::Utc>::from_timestamp(1_700_000_000 + uid as i64 * 60, 0)
                .unwrap()
                .to_rfc3339(),
            date_epoch: 1_700_000_000 + uid as i64 * 60,
            is_read,
        }
    }

    pub fn seed(pool: &DbPool, account: &str, rows: &[(u32, &str, bool)]) -> Vec<i64> {
        let batch: Vec<NewMessage> = rows
            .iter()
            .map(|(uid, subject, is_read)| new_message(account, *uid, subject, "Sender <s@x.com>", *is_read))
            .collect();
        upsert_messages(pool, &batch).unwrap()
    }
}
