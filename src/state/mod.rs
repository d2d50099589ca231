//! Application state
//!
//! Owns the coordinator, the read/write services and one scheduler per
//! account. This is the surface a presentation layer holds on to.

use std::collections::HashMap;
use std::sync::Arc;

use flume::Receiver;
use tokio::sync::RwLock;
use tracing::info;

use crate::adapters::sqlite::pool;
use crate::backend::MailboxConnector;
use crate::config::{AppConfig, SyncMode};
use crate::credentials::CredentialProvider;
use crate::error::Result;
use crate::services::sync::{scheduler, ConnectionCheck, FlagUpdate, ProgressEmitter, ProgressEvent, SchedulerHandle, SyncCoordinator};
use crate::services::{FilterService, QueryFacade};

pub struct AppState {
    coordinator: Arc<SyncCoordinator>,
    query: QueryFacade,
    filters: FilterService,
    schedulers: RwLock<HashMap<String, SchedulerHandle>>,
}

impl AppState {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        let pool = coordinator.pool().clone();
        Self {
            coordinator,
            query: QueryFacade::new(pool.clone()),
            filters: FilterService::new(pool),
            schedulers: RwLock::new(HashMap::new()),
        }
    }

    /// Opens the cache named in the config and wires everything to it.
    pub fn from_config(
        config: &AppConfig,
        connector: Arc<dyn MailboxConnector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<(Self, Receiver<ProgressEvent>)> {
        let db_path = config.database_path()?;
        let pool = pool::open(&db_path)?;
        let (emitter, events) = ProgressEmitter::channel();

        let coordinator = SyncCoordinator::new(
            pool,
            connector,
            credentials,
            config.sync.clone(),
            config.accounts.values().cloned().collect(),
            emitter,
        );
        Ok((Self::new(Arc::new(coordinator)), events))
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn query(&self) -> &QueryFacade {
        &self.query
    }

    pub fn filters(&self) -> &FilterService {
        &self.filters
    }

    /// Starts the account's scheduler, or asks a running one for an
    /// immediate run.
    pub async fn start_background_sync(&self, account: &str) -> Result<()> {
        let key = account.to_lowercase();
        let mut schedulers = self.schedulers.write().await;
        if let Some(handle) = schedulers.get(&key) {
            return handle.trigger(None);
        }
        let handle = scheduler::spawn(self.coordinator.clone(), account)?;
        schedulers.insert(key, handle);
        Ok(())
    }

    pub async fn start_all(&self) -> Result<()> {
        for account in self.coordinator.account_ids() {
            self.start_background_sync(&account).await?;
        }
        Ok(())
    }

    /// Explicit user-requested run through the account's scheduler.
    pub async fn refresh(&self, account: &str, mode: Option<SyncMode>) -> Result<()> {
        let key = account.to_lowercase();
        {
            let schedulers = self.schedulers.read().await;
            if let Some(handle) = schedulers.get(&key) {
                return handle.trigger(mode);
            }
        }
        self.start_background_sync(account).await
    }

    /// Checks that the account's credentials and mailbox work without syncing.
    pub async fn verify_account(&self, account: &str) -> Result<ConnectionCheck> {
        self.coordinator.test_connection(account).await
    }

    pub async fn mark_as_read(&self, account: &str, uids: &[u32]) -> Result<FlagUpdate> {
        self.coordinator.mark_as_read(account, uids).await
    }

    pub async fn mark_as_unread(&self, account: &str, uids: &[u32]) -> Result<FlagUpdate> {
        self.coordinator.mark_as_unread(account, uids).await
    }

    /// Applies a new interval to every running scheduler.
    pub async fn set_interval(&self, minutes: u64) -> Result<()> {
        let schedulers = self.schedulers.read().await;
        for handle in schedulers.values() {
            handle.set_interval_minutes(minutes)?;
        }
        Ok(())
    }

    /// Stops all schedulers and waits for their in-flight runs.
    pub async fn shutdown(&self) {
        let handles: Vec<SchedulerHandle> = self.schedulers.write().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            info!(account = %handle.account(), "Stopping scheduler");
            handle.shutdown().await;
        }
    }
}
