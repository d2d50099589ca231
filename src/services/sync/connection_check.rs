use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::coordinator::SyncCoordinator;
use crate::error::Result;

/// What the server reported for the account's mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    pub account: String,
    pub mailbox: String,
    pub uid_validity: Option<u32>,
    /// EXISTS count at SELECT
    pub exists: u32,
}

impl SyncCoordinator {
    /// Logs in, selects the mailbox and logs out again. Touches neither the
    /// cache nor the sync phase.
    pub async fn test_connection(&self, account: &str) -> Result<ConnectionCheck> {
        let config = self.account(account)?.clone();
        let started = Instant::now();

        let slot = self.slot(&config.email)?;
        let _session_lock = slot.session.lock().await;

        let credential = self.resolve_credential(&config.email).await?;
        let opened = self.connector().open_session(&config, &credential).await;
        drop(credential);

        let mut session = match opened {
            Ok(session) => session,
            Err(e) => {
                warn!(account = %config.email, class = ?e.class(), "Connection check failed: {}", e);
                return Err(e);
            }
        };

        let check = ConnectionCheck {
            account: config.email.clone(),
            mailbox: config.mailbox.clone(),
            uid_validity: session.uid_validity(),
            exists: session.exists(),
        };
        if let Err(e) = session.logout().await {
            debug!(account = %config.email, "Logout after connection check failed: {}", e);
        }

        info!(
            account = %check.account,
            mailbox = %check.mailbox,
            exists = check.exists,
            elapsed = ?started.elapsed(),
            "Connection check succeeded"
        );
        Ok(check)
    }
}
