//! SQLite persistent storage.
//!
//! # Overview
//!
//! The storage system consists of:
//! - **Database**: pooled SQLite handle shared by every component of one process
//! - **Migrations**: idempotent schema creation, safe to run from many processes
//! - **ConfigStore**: the `max-retries` / `backoff-base` key-value settings
//!
//! Job rows themselves are read and written by [`crate::scheduler::JobQueue`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use queuectl::storage::{ConfigStore, Database};
//!
//! let db = Database::connect(Path::new("/home/me/.queuectl/queuectl.db")).await?;
//! let config = ConfigStore::new(db.pool().clone());
//! config.set("max-retries", "5").await?;
//! ```

pub mod config_store;
pub mod database;
pub mod migrations;
pub mod schema;

pub use config_store::{
    ConfigStore, BACKOFF_BASE_KEY, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES, MAX_RETRIES_KEY,
};
pub use database::Database;
pub use migrations::{MigrationError, MigrationRunner};
