pub mod connection;
pub mod envelopes;
pub mod session;

pub use session::ImapConnector;
