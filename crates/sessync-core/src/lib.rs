//! sessync-core: normalized store for AI agent session logs
//!
//! This crate holds the canonical session/message model shared by the parsers
//! and the sync engine, the configuration layer, and the SQLite-backed store
//! that sessions are committed to.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod schema;
pub mod store;

pub use config::Config;
pub use db::Database;
pub use error::Error;
pub use error::Result;
pub use store::SessionStore;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "sessync";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "SESSYNC".to_string()
}
