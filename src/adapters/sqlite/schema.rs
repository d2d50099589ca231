use rusqlite::Connection;

use crate::error::Result;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("
        -- Cached message metadata, one row per (account, mailbox, uid)
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,  -- never reused, doubles as page snapshot
            account         TEXT NOT NULL,
            mailbox         TEXT NOT NULL,
            uid             INTEGER NOT NULL,
            uid_validity    INTEGER NOT NULL,   -- epoch the uid belongs to
            message_id      TEXT NOT NULL DEFAULT '',
            subject         TEXT NOT NULL,
            sender          TEXT NOT NULL,      -- \"Display Name <addr>\"
            date_received   TEXT NOT NULL,      -- RFC 3339
            date_epoch      INTEGER NOT NULL,   -- unix seconds, same instant as date_received
            is_read         INTEGER NOT NULL DEFAULT 0,
            fetched_at      INTEGER NOT NULL,   -- unix seconds
            updated_at      INTEGER NOT NULL,
            UNIQUE(account, mailbox, uid)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_account_read
            ON messages(account, is_read);
        CREATE INDEX IF NOT EXISTS idx_messages_account_date
            ON messages(account, date_epoch DESC, uid DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_message_id
            ON messages(message_id);

        -- User filters; AUTOINCREMENT keeps deleted ids from coming back
        CREATE TABLE IF NOT EXISTS filters (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL,
            pattern         TEXT NOT NULL,
            field           TEXT NOT NULL DEFAULT 'any'
                            CHECK (field IN ('subject', 'sender', 'any')),
            is_regex        INTEGER NOT NULL DEFAULT 0,
            enabled         INTEGER NOT NULL DEFAULT 1,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        -- Message <-> filter match edges
        CREATE TABLE IF NOT EXISTS filtered_emails (
            message_ref     INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            filter_id       INTEGER NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
            matched_at      INTEGER NOT NULL,
            PRIMARY KEY (message_ref, filter_id)
        );

        CREATE INDEX IF NOT EXISTS idx_filtered_emails_filter
            ON filtered_emails(filter_id);

        -- Delta marker, written only after a sync run commits
        CREATE TABLE IF NOT EXISTS sync_cursor (
            account         TEXT NOT NULL,
            mailbox         TEXT NOT NULL,
            uid_validity    INTEGER,
            highest_uid     INTEGER NOT NULL DEFAULT 0,
            last_sync_at    INTEGER NOT NULL,   -- unix seconds
            PRIMARY KEY (account, mailbox)
        );
    ")?;

    Ok(())
}
