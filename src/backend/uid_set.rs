use std::fmt;

use crate::config::MAX_BATCH_SIZE;
use crate::error::{Result, TriageError};

/// A non-empty, bounded set of UIDs sent as one protocol command.
///
/// UIDs are kept sorted and unique so the rendered sequence set can be
/// range-compressed (`1:5,9,12:14`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidSet {
    uids: Vec<u32>,
}

impl UidSet {
    pub fn new(uids: impl IntoIterator<Item = u32>) -> Result<Self> {
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        uids.dedup();

        if uids.is_empty() {
            return Err(TriageError::InvalidInput("UID set must not be empty".into()));
        }
        if uids[0] == 0 {
            return Err(TriageError::InvalidInput("UID 0 is not a valid message UID".into()));
        }
        if uids.len() > MAX_BATCH_SIZE {
            return Err(TriageError::InvalidInput(format!(
                "UID set of {} exceeds the batch limit of {}",
                uids.len(),
                MAX_BATCH_SIZE
            )));
        }
        Ok(Self { uids })
    }

    /// Splits `uids` into batches of at most `batch_size`, keeping the
    /// caller's order between batches. Duplicates and zero are dropped.
    pub fn chunked(uids: &[u32], batch_size: usize) -> Vec<UidSet> {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let mut seen = std::collections::HashSet::with_capacity(uids.len());
        let ordered: Vec<u32> = uids
            .iter()
            .copied()
            .filter(|uid| *uid != 0 && seen.insert(*uid))
            .collect();

        ordered
            .chunks(batch_size)
            .map(|chunk| {
                let mut uids = chunk.to_vec();
                uids.sort_unstable();
                UidSet { uids }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.uids
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.uids.binary_search(&uid).is_ok()
    }

    /// IMAP sequence-set syntax with consecutive runs collapsed.
    pub fn to_sequence_set(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut iter = self.uids.iter().copied();
        let Some(first) = iter.next() else {
            return String::new();
        };

        let (mut start, mut end) = (first, first);
        for uid in iter {
            if uid == end + 1 {
                end = uid;
                continue;
            }
            parts.push(render_range(start, end));
            start = uid;
            end = uid;
        }
        parts.push(render_range(start, end));
        parts.join(",")
    }
}

fn render_range(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}:{}", start, end)
    }
}

impl fmt::Display for UidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sequence_set())
    }
}
