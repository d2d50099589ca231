use serde::Serialize;
use tracing::{debug, info, warn};

use super::coordinator::SyncCoordinator;
use crate::adapters::sqlite::messages;
use crate::backend::{FlagDelta, MailboxSession, UidSet};
use crate::error::{Result, TriageError};

/// Outcome of a flag update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlagUpdate {
    /// Distinct UIDs asked for
    pub requested: usize,
    /// UIDs the server confirmed
    pub remote_applied: usize,
    /// Cached rows whose read state was written
    pub local_updated: usize,
}

impl SyncCoordinator {
    /// Sets `\Seen` on the server, then mirrors it in the cache.
    pub async fn mark_as_read(&self, account: &str, uids: &[u32]) -> Result<FlagUpdate> {
        self.update_flags(account, uids, FlagDelta::AddSeen).await
    }

    pub async fn mark_as_unread(&self, account: &str, uids: &[u32]) -> Result<FlagUpdate> {
        self.update_flags(account, uids, FlagDelta::RemoveSeen).await
    }

    async fn update_flags(&self, account: &str, uids: &[u32], delta: FlagDelta) -> Result<FlagUpdate> {
        let config = self.account(account)?.clone();
        let batches = UidSet::chunked(uids, self.settings().batch_size());
        if batches.is_empty() {
            return Err(TriageError::InvalidInput("No UIDs given".into()));
        }
        let requested: usize = batches.iter().map(UidSet::len).sum();

        // Waits out a running sync rather than opening a second session.
        let slot = self.slot(&config.email)?;
        let _session_lock = slot.session.lock().await;

        let credential = self.resolve_credential(&config.email).await?;
        let mut session = self.connector().open_session(&config, &credential).await?;
        drop(credential);

        let stored = store_all(session.as_mut(), &batches, delta).await;
        if let Err(e) = session.logout().await {
            debug!(account = %config.email, "Logout after flag update failed: {}", e);
        }

        // The cache is only touched once every batch went through.
        let remote_applied = match stored {
            Ok(applied) => applied,
            Err(e) => {
                warn!(account = %config.email, requested, "Flag update failed, cache left unchanged: {}", e);
                return Err(e);
            }
        };

        let confirmed: Vec<u32> = batches.iter().flat_map(|b| b.as_slice().iter().copied()).collect();
        let local_updated =
            messages::set_read_state(self.pool(), &config.email, &config.mailbox, &confirmed, delta.marks_read())?;

        info!(
            account = %config.email,
            read = delta.marks_read(),
            requested,
            remote_applied,
            local_updated,
            "Flag update applied"
        );
        Ok(FlagUpdate {
            requested,
            remote_applied,
            local_updated,
        })
    }
}

async fn store_all(session: &mut dyn MailboxSession, batches: &[UidSet], delta: FlagDelta) -> Result<usize> {
    let mut applied = 0;
    for batch in batches {
        applied += session.store_flags(batch, delta).await?;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use crate::services::sync::coordinator::tests::{harness, ACCOUNT};
    use crate::types::responses::Counts;

    #[tokio::test]
    async fn test_mark_two_of_three_read() {
        let h = harness(500);
        for uid in 1..=3 {
            h.server.add(uid, "m", "s@x.com", false);
        }
        h.coordinator.sync(ACCOUNT, SyncMode::Unread).await.unwrap();

        let update = h.coordinator.mark_as_read(ACCOUNT, &[1, 2]).await.unwrap();
        assert_eq!(
            update,
            FlagUpdate {
                requested: 2,
                remote_applied: 2,
                local_updated: 2
            }
        );
        assert!(h.server.is_seen(1) && h.server.is_seen(2));
        assert!(!h.server.is_seen(3));
        assert_eq!(
            messages::count_messages(h.coordinator.pool(), ACCOUNT).unwrap(),
            Counts { total: 3, unread: 1 }
        );
    }

    #[tokio::test]
    async fn test_failed_store_leaves_cache_untouched() {
        let h = harness(500);
        for uid in 1..=3 {
            h.server.add(uid, "m", "s@x.com", false);
        }
        h.coordinator.sync(ACCOUNT, SyncMode::Unread).await.unwrap();
        h.server.state().fail_store = true;

        let err = h.coordinator.mark_as_read(ACCOUNT, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, TriageError::Network(_)));
        assert_eq!(
            messages::count_messages(h.coordinator.pool(), ACCOUNT).unwrap(),
            Counts { total: 3, unread: 3 }
        );
        assert_eq!(h.server.state().live_sessions, 0);
    }

    #[tokio::test]
    async fn test_mark_unread_and_duplicates() {
        let h = harness(500);
        h.server.add(7, "m", "s@x.com", true);
        h.coordinator.sync(ACCOUNT, SyncMode::Full).await.unwrap();

        let update = h.coordinator.mark_as_unread(ACCOUNT, &[7, 7]).await.unwrap();
        assert_eq!(update.requested, 1);
        assert_eq!(update.local_updated, 1);
        assert!(!h.server.is_seen(7));
    }

    #[tokio::test]
    async fn test_empty_uid_list_is_rejected() {
        let h = harness(500);
        assert!(matches!(
            h.coordinator.mark_as_read(ACCOUNT, &[]).await,
            Err(TriageError::InvalidInput(_))
        ));
        assert!(matches!(
            h.coordinator.mark_as_read(ACCOUNT, &[0]).await,
            Err(TriageError::InvalidInput(_))
        ));
        assert_eq!(h.server.state().sessions_opened, 0);
    }

    #[tokio::test]
    async fn test_flag_update_waits_for_running_sync() {
        let h = harness(500);
        h.server.add(1, "m", "s@x.com", false);
        h.server.state().fetch_delay = Some(std::time::Duration::from_millis(100));

        let coordinator = h.coordinator.clone();
        let sync = tokio::spawn(async move { coordinator.sync(ACCOUNT, SyncMode::Unread).await });
        let mut phase = h.coordinator.watch_phase(ACCOUNT).unwrap();
        phase
            .wait_for(|p| *p == crate::services::sync::coordinator::SyncPhase::Fetching)
            .await
            .unwrap();

        h.coordinator.mark_as_read(ACCOUNT, &[1]).await.unwrap();
        sync.await.unwrap().unwrap();
        assert_eq!(h.server.state().max_live_sessions, 1);
        assert!(h.server.is_seen(1));
    }
}
