//! Sync engine
//!
//! - `connection_check`: login-and-select check for account settings
//! - `coordinator`: per-account run state machine and the delta logic
//! - `flags`: mark-as-read / mark-as-unread against server and cache
//! - `scheduler`: background task that decides when runs happen
//! - `status_emit`: progress events for the presentation layer

pub mod connection_check;
pub mod coordinator;
pub mod flags;
pub mod scheduler;
pub mod status_emit;

pub use connection_check::ConnectionCheck;
pub use coordinator::{SyncCoordinator, SyncPhase, SyncReport};
pub use flags::FlagUpdate;
pub use scheduler::{SchedulerCommand, SchedulerHandle};
pub use status_emit::{ProgressEmitter, ProgressEvent, ProgressStage};
