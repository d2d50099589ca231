pub mod filter;
pub mod helpers;
