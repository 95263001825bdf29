//! Hosted task store.
//!
//! Serves the `tasks` table over WebSocket: queries, inserts, filtered
//! updates and deletes, and per-connection change feeds.

pub mod config;
pub mod server;
pub mod table;
