//! In-memory mailbox used by coordinator and scheduler tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{FlagDelta, FlagPredicate, MailboxConnector, MailboxSession, RawHeaderRecord, UidSet};
use crate::config::AccountConfig;
use crate::credentials::Credential;
use crate::error::{Result, TriageError};

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub seen: bool,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub uid_validity: u32,
    pub messages: BTreeMap<u32, FakeMessage>,
    pub reject_login: bool,
    pub fail_store: bool,
    /// 1-based index of the FETCH call that fails
    pub fail_fetch_call: Option<usize>,
    pub fetch_delay: Option<Duration>,

    pub sessions_opened: usize,
    pub live_sessions: usize,
    pub max_live_sessions: usize,
    pub search_calls: usize,
    pub fetch_calls: usize,
    pub store_calls: usize,
    pub fetched_uids: Vec<u32>,
}

#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    pub fn new(uid_validity: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                uid_validity,
                ..Default::default()
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add(&self, uid: u32, subject: &str, sender: &str, seen: bool) {
        let date = format!("Mon, 1 Jan 2024 {:02}:{:02}:00 +0000", (uid / 60) % 24, uid % 60);
        self.state().messages.insert(
            uid,
            FakeMessage {
                subject: subject.to_string(),
                sender: sender.to_string(),
                date,
                seen,
            },
        );
    }

    pub fn is_seen(&self, uid: u32) -> bool {
        self.state().messages.get(&uid).map(|m| m.seen).unwrap_or(false)
    }
}

#[async_trait]
impl MailboxConnector for FakeServer {
    async fn open_session(
        &self,
        _account: &AccountConfig,
        _credential: &Credential,
    ) -> Result<Box<dyn MailboxSession>> {
        let mut state = self.state();
        if state.reject_login {
            return Err(TriageError::Auth("LOGIN rejected".into()));
        }
        state.sessions_opened += 1;
        state.live_sessions += 1;
        state.max_live_sessions = state.max_live_sessions.max(state.live_sessions);
        let uid_validity = state.uid_validity;
        let exists = state.messages.len() as u32;
        drop(state);

        Ok(Box::new(FakeSession {
            server: self.clone(),
            uid_validity,
            exists,
            open: true,
        }))
    }
}

struct FakeSession {
    server: FakeServer,
    uid_validity: u32,
    exists: u32,
    open: bool,
}

impl FakeSession {
    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.server.state().live_sessions -= 1;
        }
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    fn uid_validity(&self) -> Option<u32> {
        Some(self.uid_validity)
    }

    fn exists(&self) -> u32 {
        self.exists
    }

    async fn search_uids(&mut self, predicate: FlagPredicate) -> Result<Vec<u32>> {
        let mut state = self.server.state();
        state.search_calls += 1;
        Ok(state
            .messages
            .iter()
            .filter(|(_, m)| predicate == FlagPredicate::All || !m.seen)
            .map(|(uid, _)| *uid)
            .collect())
    }

    async fn fetch_headers(&mut self, uids: &UidSet) -> Result<Vec<RawHeaderRecord>> {
        let delay = {
            let mut state = self.server.state();
            state.fetch_calls += 1;
            if state.fail_fetch_call == Some(state.fetch_calls) {
                return Err(TriageError::Network("connection reset during FETCH".into()));
            }
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.server.state();
        state.fetched_uids.extend_from_slice(uids.as_slice());
        Ok(uids
            .as_slice()
            .iter()
            .filter_map(|uid| {
                state.messages.get(uid).map(|m| RawHeaderRecord {
                    uid: *uid,
                    message_id: Some(format!("<{}@fake>", uid)),
                    subject: Some(m.subject.clone()),
                    sender: Some(m.sender.clone()),
                    date: Some(m.date.clone()),
                    internal_date: None,
                    seen: m.seen,
                })
            })
            .collect())
    }

    async fn store_flags(&mut self, uids: &UidSet, delta: FlagDelta) -> Result<usize> {
        let mut state = self.server.state();
        state.store_calls += 1;
        if state.fail_store {
            return Err(TriageError::Network("timed out waiting for STORE".into()));
        }
        let mut applied = 0;
        for uid in uids.as_slice() {
            if let Some(message) = state.messages.get_mut(uid) {
                message.seen = delta.marks_read();
                applied += 1;
            }
        }
        Ok(applied)
    }

    async fn logout(&mut self) -> Result<()> {
        self.close();
        Ok(())
    }
}
