//! Sync run orchestration
//!
//! One run per account at a time: `Idle -> Starting -> Fetching ->
//! Upserting -> Recomputing -> Completing -> Idle`, with `ErrorHalt` on any
//! failure. The current phase lives in a per-account watch channel so
//! observers never read ambient flags. Every remote session for an account,
//! sync or flag update, is opened under that account's session lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::status_emit::ProgressEmitter;
use crate::adapters::sqlite::sync_cursor::{self, SyncCursor};
use crate::adapters::sqlite::{filter_matches, messages, DbPool};
use crate::backend::{FlagPredicate, MailboxConnector, MailboxSession, UidSet};
use crate::config::{AccountConfig, SyncMode, SyncSettings};
use crate::credentials::{Credential, CredentialProvider};
use crate::engine::helpers::message_builder::prepare_messages;
use crate::error::{Result, TriageError};
use crate::types::responses::{Counts, FilterMatchCount};
use crate::types::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    Starting,
    Fetching,
    Upserting,
    Recomputing,
    Completing,
    ErrorHalt,
}

/// Outcome of a committed run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub account: String,
    pub mode: SyncMode,
    /// UIDs whose headers were requested
    pub total: usize,
    /// Rows written from fetched headers
    pub fetched: usize,
    /// Fetched UIDs above the previous run's highest UID
    pub new_arrivals: usize,
    pub flags_reconciled: usize,
    pub dropped_stale: usize,
    pub counts: Counts,
    pub filter_counts: Vec<FilterMatchCount>,
}

pub(crate) struct AccountSlot {
    phase: watch::Sender<SyncPhase>,
    /// Held for the lifetime of any remote session on this account
    pub(crate) session: tokio::sync::Mutex<()>,
}

/// Claims the slot on creation and hands it back to `Idle` when dropped.
struct RunGuard {
    slot: Arc<AccountSlot>,
}

impl RunGuard {
    fn begin(slot: Arc<AccountSlot>) -> Option<Self> {
        let mut claimed = false;
        slot.phase.send_if_modified(|phase| {
            if *phase == SyncPhase::Idle {
                *phase = SyncPhase::Starting;
                claimed = true;
                true
            } else {
                false
            }
        });
        claimed.then_some(RunGuard { slot })
    }

    fn enter(&self, phase: SyncPhase) {
        self.slot.phase.send_replace(phase);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.slot.phase.send_replace(SyncPhase::Idle);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RunProgress {
    processed: usize,
    total: usize,
}

pub struct SyncCoordinator {
    pool: DbPool,
    connector: Arc<dyn MailboxConnector>,
    credentials: Arc<dyn CredentialProvider>,
    settings: SyncSettings,
    /// Keyed by lowercased email
    accounts: HashMap<String, AccountConfig>,
    slots: Mutex<HashMap<String, Arc<AccountSlot>>>,
    progress: ProgressEmitter,
}

impl SyncCoordinator {
    pub fn new(
        pool: DbPool,
        connector: Arc<dyn MailboxConnector>,
        credentials: Arc<dyn CredentialProvider>,
        settings: SyncSettings,
        accounts: Vec<AccountConfig>,
        progress: ProgressEmitter,
    ) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|a| (a.email.to_lowercase(), a))
            .collect();
        Self {
            pool,
            connector,
            credentials,
            settings,
            accounts,
            slots: Mutex::new(HashMap::new()),
            progress,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub(crate) fn connector(&self) -> &dyn MailboxConnector {
        self.connector.as_ref()
    }

    /// Providers may shell out to a password command, so the lookup runs on
    /// the blocking pool rather than a runtime worker.
    pub(crate) async fn resolve_credential(&self, account: &str) -> Result<Credential> {
        let provider = self.credentials.clone();
        let account = account.to_string();
        tokio::task::spawn_blocking(move || provider.credential(&account))
            .await
            .map_err(|e| TriageError::Credential(format!("Credential lookup aborted: {}", e)))?
    }

    pub fn account(&self, account: &str) -> Result<&AccountConfig> {
        self.accounts
            .get(&account.to_lowercase())
            .ok_or_else(|| TriageError::AccountNotFound(account.to_string()))
    }

    pub fn account_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.accounts.values().map(|a| a.email.clone()).collect();
        ids.sort();
        ids
    }

    pub(crate) fn slot(&self, account: &str) -> Result<Arc<AccountSlot>> {
        let key = account.to_lowercase();
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| TriageError::Database(format!("Failed to lock sync slots: {}", e)))?;
        let slot = slots.entry(key).or_insert_with(|| {
            let (phase, _) = watch::channel(SyncPhase::Idle);
            Arc::new(AccountSlot {
                phase,
                session: tokio::sync::Mutex::new(()),
            })
        });
        Ok(slot.clone())
    }

    pub fn phase(&self, account: &str) -> Result<SyncPhase> {
        self.account(account)?;
        Ok(*self.slot(account)?.phase.borrow())
    }

    /// Stream of phase changes for one account.
    pub fn watch_phase(&self, account: &str) -> Result<watch::Receiver<SyncPhase>> {
        self.account(account)?;
        Ok(self.slot(account)?.phase.subscribe())
    }

    /// Mode for a run nobody asked for explicitly: a full pass until the
    /// account has a cursor, the configured mode afterwards.
    pub fn default_mode(&self, account: &str) -> SyncMode {
        let Ok(config) = self.account(account) else {
            return self.settings.mode;
        };
        match sync_cursor::get_cursor(&self.pool, &config.email, &config.mailbox) {
            Ok(Some(_)) => self.settings.mode,
            Ok(None) => SyncMode::Full,
            Err(e) => {
                warn!(account, "Could not read sync cursor: {}", e);
                self.settings.mode
            }
        }
    }

    /// Runs one sync for the account. Rejected with `SyncInProgress` while
    /// another run for the same account is active.
    pub async fn sync(&self, account: &str, mode: SyncMode) -> Result<SyncReport> {
        let config = self.account(account)?.clone();
        let slot = self.slot(&config.email)?;
        let guard = RunGuard::begin(slot.clone())
            .ok_or_else(|| TriageError::SyncInProgress(config.email.clone()))?;

        let account = config.email.as_str();
        let started = Instant::now();
        info!(account, ?mode, "Sync run starting");
        self.progress.start(account);

        let mut progress = RunProgress::default();
        let outcome = self.execute(&guard, &slot, &config, mode, &mut progress).await;
        if outcome.is_err() {
            guard.enter(SyncPhase::ErrorHalt);
        }
        // The terminal event goes out once the slot is free again, so a
        // listener may start the next run as soon as it sees it.
        drop(guard);

        match outcome {
            Ok(report) => {
                self.progress.complete(account, report.total);
                info!(
                    account,
                    total = report.total,
                    fetched = report.fetched,
                    new = report.new_arrivals,
                    reconciled = report.flags_reconciled,
                    elapsed = ?started.elapsed(),
                    "Sync run complete"
                );
                Ok(report)
            }
            Err(e) => {
                error!(account, class = ?e.class(), elapsed = ?started.elapsed(), "Sync run halted: {}", e);
                self.progress.error(account, progress.processed, progress.total, &e);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        guard: &RunGuard,
        slot: &AccountSlot,
        config: &AccountConfig,
        mode: SyncMode,
        progress: &mut RunProgress,
    ) -> Result<SyncReport> {
        let _session_lock = slot.session.lock().await;
        let credential = self.resolve_credential(&config.email).await?;

        guard.enter(SyncPhase::Fetching);
        let mut session = self.connector.open_session(config, &credential).await?;
        drop(credential);

        let outcome = self
            .run_with_session(guard, session.as_mut(), config, mode, progress)
            .await;

        if let Err(e) = session.logout().await {
            debug!(account = %config.email, "Logout after sync failed: {}", e);
        }
        outcome
    }

    async fn run_with_session(
        &self,
        guard: &RunGuard,
        session: &mut dyn MailboxSession,
        config: &AccountConfig,
        mode: SyncMode,
        progress: &mut RunProgress,
    ) -> Result<SyncReport> {
        let account = config.email.as_str();
        let mailbox = config.mailbox.as_str();

        // UIDVALIDITY is mandatory in IMAP4rev1; 0 stands in for a server that omits it.
        let uid_validity = session.uid_validity().unwrap_or(0);
        let cursor = sync_cursor::get_cursor(&self.pool, account, mailbox)?;
        if let Some(previous) = cursor.as_ref().and_then(|c| c.uid_validity) {
            if previous != uid_validity {
                warn!(account, previous, current = uid_validity, "UIDVALIDITY changed, invalidating cached rows");
            }
        }
        // UIDs are only comparable within one UIDVALIDITY epoch.
        let arrival_floor = cursor
            .as_ref()
            .filter(|c| c.uid_validity == Some(uid_validity))
            .map(|c| c.highest_uid)
            .unwrap_or(0);
        let dropped_stale = messages::drop_stale_epoch(&self.pool, account, mailbox, uid_validity)?;

        let unread = session.search_uids(FlagPredicate::Unseen).await?;
        let all = match mode {
            SyncMode::Full => Some(session.search_uids(FlagPredicate::All).await?),
            SyncMode::Unread => None,
        };
        let unread_set: HashSet<u32> = unread.iter().copied().collect();
        let all_set: Option<HashSet<u32>> = all.as_ref().map(|uids| uids.iter().copied().collect());

        guard.enter(SyncPhase::Upserting);
        let flags_reconciled =
            messages::reconcile_read_flags(&self.pool, account, mailbox, &unread_set, all_set.as_ref())?;

        // Only headers we do not hold yet; newest first so the top of the list fills in early.
        let cached = messages::cached_read_states(&self.pool, account, mailbox)?;
        let target = all.as_ref().unwrap_or(&unread);
        let mut delta: Vec<u32> = target
            .iter()
            .copied()
            .filter(|uid| !cached.contains_key(uid))
            .collect();
        delta.sort_unstable_by(|a, b| b.cmp(a));

        progress.total = delta.len();
        let new_arrivals = delta.iter().filter(|uid| **uid > arrival_floor).count();
        debug!(
            account,
            server = target.len(),
            cached = cached.len(),
            delta = delta.len(),
            new_arrivals,
            "Sync delta"
        );

        let mut fetched = 0;
        for batch in UidSet::chunked(&delta, self.settings.batch_size()) {
            guard.enter(SyncPhase::Fetching);
            let records = session.fetch_headers(&batch).await?;

            guard.enter(SyncPhase::Upserting);
            let rows = prepare_messages(account, mailbox, uid_validity, &records);
            fetched += messages::upsert_messages(&self.pool, &rows)?.len();

            progress.processed += batch.len();
            self.progress.progress(account, progress.processed, progress.total);
        }

        // Edges were rewritten inside each batch's transaction; take the
        // post-run snapshot the caller reports.
        guard.enter(SyncPhase::Recomputing);
        let counts = messages::count_messages(&self.pool, account)?;
        let filter_counts = filter_matches::filter_match_counts(&self.pool, account, Scope::All)?;

        guard.enter(SyncPhase::Completing);
        let highest_uid = messages::highest_uid(&self.pool, account, mailbox)?;
        sync_cursor::advance_cursor(
            &self.pool,
            &SyncCursor {
                account: account.to_string(),
                mailbox: mailbox.to_string(),
                uid_validity: Some(uid_validity),
                highest_uid,
                last_sync_at: Utc::now().timestamp(),
            },
        )?;

        Ok(SyncReport {
            account: account.to_string(),
            mode,
            total: progress.total,
            fetched,
            new_arrivals,
            flags_reconciled,
            dropped_stale,
            counts,
            filter_counts,
        })
    }
}
