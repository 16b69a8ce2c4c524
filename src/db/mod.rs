//! Database layer
//!
//! SQLite persistence for accounts, sessions, checkout intents, the legacy
//! exchange ledger and email verification codes.
//!
//! # Usage
//!
//! ```ignore
//! use tiergate::config::DatabaseConfig;
//! use tiergate::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, DatabasePool, DynDatabasePool, SqliteDatabase};
