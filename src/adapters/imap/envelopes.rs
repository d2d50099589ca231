use std::collections::BTreeMap;

use async_imap::types::{Fetch, Flag};

use crate::backend::{RawHeaderRecord, UidSet};

/// Data items requested per message. No bodies.
pub const HEADER_FETCH_QUERY: &str = "(UID FLAGS ENVELOPE INTERNALDATE)";

/// One FETCH response reduced to what a header sync needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    Header(RawHeaderRecord),
    /// No ENVELOPE attached, e.g. an unsolicited flag update
    Flags { uid: u32, seen: bool },
}

pub fn parse_fetch(fetch: &Fetch) -> Option<FetchItem> {
    let uid = fetch.uid?;
    let seen = fetch.flags().any(|f| matches!(f, Flag::Seen));
    let internal_date = fetch.internal_date().map(|d| d.timestamp());

    let Some(envelope) = fetch.envelope() else {
        return Some(FetchItem::Flags { uid, seen });
    };

    let message_id = envelope
        .message_id
        .as_ref()
        .map(|id| String::from_utf8_lossy(id).trim().to_string());

    let date = envelope
        .date
        .as_ref()
        .map(|d| String::from_utf8_lossy(d).to_string());

    let subject = envelope
        .subject
        .as_ref()
        .map(|s| decode_rfc2047(&String::from_utf8_lossy(s)));

    // First From address only
    let sender = envelope
        .from
        .as_ref()
        .and_then(|addrs| addrs.first())
        .and_then(|addr| {
            let name = addr
                .name
                .as_ref()
                .map(|n| decode_rfc2047(&String::from_utf8_lossy(n)));
            let mailbox = addr
                .mailbox
                .as_ref()
                .map(|m| String::from_utf8_lossy(m).to_string());
            let host = addr
                .host
                .as_ref()
                .map(|h| String::from_utf8_lossy(h).to_string());
            format_sender(name.as_deref(), mailbox.as_deref(), host.as_deref())
        });

    Some(FetchItem::Header(RawHeaderRecord {
        uid,
        message_id,
        subject,
        sender,
        date,
        internal_date,
        seen,
    }))
}

/// Folds the responses of one UID FETCH into a record per requested UID.
///
/// Only responses carrying an envelope create records. A server may send
/// several responses for one UID (the answer plus flag updates); the header
/// comes from the envelope and `seen` from whichever response arrived last.
pub fn collect_headers(items: impl IntoIterator<Item = FetchItem>, wanted: &UidSet) -> Vec<RawHeaderRecord> {
    let mut records: BTreeMap<u32, RawHeaderRecord> = BTreeMap::new();

    for item in items {
        match item {
            FetchItem::Header(record) if wanted.contains(record.uid) => {
                records.insert(record.uid, record);
            }
            // A flag update ahead of the header is superseded by the header's own flags.
            FetchItem::Flags { uid, seen } => {
                if let Some(record) = records.get_mut(&uid) {
                    record.seen = seen;
                }
            }
            FetchItem::Header(_) => {}
        }
    }

    records.into_values().collect()
}

/// "Display Name <mailbox@host>", falling back to whichever part exists.
pub fn format_sender(name: Option<&str>, mailbox: Option<&str>, host: Option<&str>) -> Option<String> {
    fn clean<'a>(s: Option<&'a str>) -> Option<&'a str> {
        s.map(str::trim).filter(|s| !s.is_empty())
    }

    let address = match (clean(mailbox), clean(host)) {
        (Some(m), Some(h)) => Some(format!("{}@{}", m, h)),
        (Some(m), None) => Some(m.to_string()),
        _ => None,
    };

    match (clean(name), address) {
        (Some(n), Some(a)) => Some(format!("{} <{}>", n, a)),
        (None, Some(a)) => Some(a),
        (Some(n), None) => Some(n.to_string()),
        (None, None) => None,
    }
}

pub fn decode_rfc2047(input: &str) -> String {
    let fake_header = format!("X: {}", input);
    match mailparse::parse_header(fake_header.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => input.to_string(),
    }
}
