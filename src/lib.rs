//! Sheetsync - client-side delta sync and caching for sheet-backed data
//!
//! Keeps spreadsheet-sourced datasets available locally through a
//! version-based delta protocol, a persistent compressed cache with LRU
//! eviction, and stale-while-revalidate loaders.

pub mod cache;
pub mod config;
pub mod error;
pub mod loader;
pub mod models;
pub mod sync;
pub mod tasks;

pub use cache::CacheStore;
pub use config::Config;
pub use error::{Result, SyncError};
pub use loader::{DataLoader, Visibility};
pub use sync::DeltaSyncClient;
pub use tasks::spawn_poll_task;
