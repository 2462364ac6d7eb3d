//! Fetch-and-persist sync of MAGE roles, users, layers and static features
//! into a local SQLite store.

pub mod config;
pub mod db;
pub mod logging;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;

pub use service::{SyncService, SyncStatus};
