use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ErrorClass, TriageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Start,
    Progress,
    Complete,
    Error,
}

/// Sync progress as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub account: String,
    pub stage: ProgressStage,
    pub processed: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
}

#[derive(Clone)]
pub struct ProgressEmitter {
    tx: Sender<ProgressEvent>,
}

impl ProgressEmitter {
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    pub fn start(&self, account: &str) {
        self.send(event(account, ProgressStage::Start, 0, 0));
    }

    pub fn progress(&self, account: &str, processed: usize, total: usize) {
        self.send(event(account, ProgressStage::Progress, processed, total));
    }

    pub fn complete(&self, account: &str, total: usize) {
        self.send(event(account, ProgressStage::Complete, total, total));
    }

    pub fn error(&self, account: &str, processed: usize, total: usize, err: &TriageError) {
        let mut e = event(account, ProgressStage::Error, processed, total);
        e.message = Some(err.to_string());
        e.error_class = Some(err.class());
        self.send(e);
    }

    // Nobody listening is fine; the headless driver may not subscribe.
    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            trace!("Progress event dropped, no receiver");
        }
    }
}

fn event(account: &str, stage: ProgressStage, processed: usize, total: usize) -> ProgressEvent {
    ProgressEvent {
        account: account.to_string(),
        stage,
        processed,
        total,
        message: None,
        error_class: None,
    }
}
