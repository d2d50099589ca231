pub mod imap;
pub mod sqlite;
