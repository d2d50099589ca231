use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TriageError};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Writers wait this long for the lock before failing the transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (or creates) the cache file, builds the pool and applies the schema.
pub fn open(db_path: &Path) -> Result<DbPool> {
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| TriageError::Database(format!("Failed to create cache dir: {e}")))?;
    }

    let pool = create_pool(db_path)?;
    let conn = pool.get()?;
    super::schema::initialize_schema(&conn)?;

    info!(path = %db_path.display(), "Cache database ready");
    Ok(pool)
}

fn create_pool(db_path: &Path) -> Result<DbPool> {
    // PRAGMAs are per connection, so every pooled connection gets them.
    let manager = SqliteConnectionManager::file(db_path).with_init(configure_connection);

    let pool = Pool::builder().max_size(8).build(manager)?;
    Ok(pool)
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_connection_enforces_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(&dir.path().join("nested").join("cache.sqlite3")).unwrap();

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        for conn in [&a, &b] {
            let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
            assert_eq!(fk, 1);
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
            assert_eq!(mode.to_lowercase(), "wal");
        }
    }
}
