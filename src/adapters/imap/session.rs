use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_imap::types::Fetch;
use async_trait::async_trait;
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use super::connection::{self, with_timeout, ImapSession};
use super::envelopes::{collect_headers, parse_fetch, HEADER_FETCH_QUERY};
use crate::backend::{FlagDelta, FlagPredicate, MailboxConnector, MailboxSession, RawHeaderRecord, UidSet};
use crate::config::AccountConfig;
use crate::credentials::Credential;
use crate::error::Result;

/// Opens TLS IMAP sessions with the account's mailbox selected read-write.
pub struct ImapConnector {
    timeout: Duration,
}

impl ImapConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn open_session(
        &self,
        account: &AccountConfig,
        credential: &Credential,
    ) -> Result<Box<dyn MailboxSession>> {
        let started = Instant::now();
        let mut session = connection::connect(
            &account.imap.host,
            account.imap.port,
            &credential.username,
            &credential.secret,
            self.timeout,
        )
        .await?;

        let selected = with_timeout(self.timeout, "SELECT", session.select(&account.mailbox)).await;
        let mailbox = match selected {
            Ok(mailbox) => mailbox,
            Err(e) => {
                let _ = with_timeout(self.timeout, "LOGOUT", session.logout()).await;
                return Err(e);
            }
        };

        info!(
            account = %account.email,
            mailbox = %account.mailbox,
            exists = mailbox.exists,
            uid_validity = ?mailbox.uid_validity,
            elapsed = ?started.elapsed(),
            "IMAP session opened"
        );

        Ok(Box::new(ImapMailbox {
            session,
            uid_validity: mailbox.uid_validity,
            exists: mailbox.exists,
            timeout: self.timeout,
        }))
    }
}

pub struct ImapMailbox {
    session: ImapSession,
    uid_validity: Option<u32>,
    exists: u32,
    timeout: Duration,
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    fn uid_validity(&self) -> Option<u32> {
        self.uid_validity
    }

    fn exists(&self) -> u32 {
        self.exists
    }

    async fn search_uids(&mut self, predicate: FlagPredicate) -> Result<Vec<u32>> {
        let found: HashSet<u32> = with_timeout(
            self.timeout,
            "UID SEARCH",
            self.session.uid_search(predicate.search_query()),
        )
        .await?;

        let mut uids: Vec<u32> = found.into_iter().collect();
        uids.sort_unstable();
        debug!(query = predicate.search_query(), count = uids.len(), "UID SEARCH");
        Ok(uids)
    }

    async fn fetch_headers(&mut self, uids: &UidSet) -> Result<Vec<RawHeaderRecord>> {
        let started = Instant::now();
        let seq = uids.to_sequence_set();
        let session = &mut self.session;

        let fetches: Vec<Fetch> = with_timeout(self.timeout, "UID FETCH", async move {
            let stream = session.uid_fetch(&seq, HEADER_FETCH_QUERY).await?;
            stream.try_collect::<Vec<_>>().await
        })
        .await?;

        // Servers may push unsolicited FETCH responses for other messages.
        let records = collect_headers(fetches.iter().filter_map(parse_fetch), uids);

        if records.len() < uids.len() {
            warn!(
                requested = uids.len(),
                returned = records.len(),
                "UID FETCH returned fewer messages than requested"
            );
        }
        debug!(count = records.len(), elapsed = ?started.elapsed(), "UID FETCH");
        Ok(records)
    }

    async fn store_flags(&mut self, uids: &UidSet, delta: FlagDelta) -> Result<usize> {
        let seq = uids.to_sequence_set();
        let session = &mut self.session;

        let updates: Vec<Fetch> = with_timeout(self.timeout, "UID STORE", async move {
            let stream = session.uid_store(&seq, delta.store_query()).await?;
            stream.try_collect::<Vec<_>>().await
        })
        .await?;

        let applied = updates
            .iter()
            .filter(|f| f.uid.map(|uid| uids.contains(uid)).unwrap_or(false))
            .count();
        debug!(requested = uids.len(), applied, "UID STORE");
        Ok(applied)
    }

    async fn logout(&mut self) -> Result<()> {
        with_timeout(self.timeout, "LOGOUT", self.session.logout()).await
    }
}
