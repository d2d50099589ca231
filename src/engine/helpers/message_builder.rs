use chrono::{DateTime, Utc};

use crate::adapters::sqlite::messages::NewMessage;
use crate::backend::RawHeaderRecord;

const NO_SUBJECT: &str = "(No Subject)";
const UNKNOWN_SENDER: &str = "Unknown";

pub fn prepare_messages(
    account: &str,
    mailbox: &str,
    uid_validity: u32,
    records: &[RawHeaderRecord],
) -> Vec<NewMessage> {
    records
        .iter()
        .map(|r| record_to_new_message(r, account, mailbox, uid_validity))
        .collect()
}

/// Resolves the message date: Date header first, then server arrival time.
/// Unparseable dates fall back to the unix epoch so sorting stays total.
pub fn resolve_date(date: Option<&str>, internal_date: Option<i64>) -> DateTime<Utc> {
    date.and_then(parse_date_header)
        .or_else(|| internal_date.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn parse_date_header(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            mailparse::dateparse(trimmed)
                .ok()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn record_to_new_message(
    record: &RawHeaderRecord,
    account: &str,
    mailbox: &str,
    uid_validity: u32,
) -> NewMessage {
    let date = resolve_date(record.date.as_deref(), record.internal_date);

    NewMessage {
        account: account.to_string(),
        mailbox: mailbox.to_string(),
        uid: record.uid,
        uid_validity,
        message_id: non_empty(record.message_id.as_ref()).unwrap_or_default(),
        subject: non_empty(record.subject.as_ref()).unwrap_or_else(|| NO_SUBJECT.to_string()),
        sender: non_empty(record.sender.as_ref()).unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        date_received: date.to_rfc3339(),
        date_epoch: date.timestamp(),
        is_read: record.seen,
    }
}
