//! `tasklist`: terminal task list kept in sync with a hosted task store.

pub mod app;
pub mod config;
pub mod controller;
pub mod remote;
pub mod tasks;
pub mod ui;
