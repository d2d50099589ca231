//! Business logic services
//!
//! Nothing in here knows about a presentation layer. The query façade and
//! the filter service read and write the local store only; `sync` is the
//! single place that talks to the server.

mod filters;
mod query;
pub mod sync;

pub use filters::*;
pub use query::*;
