//! Shared row types and wire protocol for the tasklist store.

pub mod codec;
pub mod filter;
pub mod store;
pub mod task;
