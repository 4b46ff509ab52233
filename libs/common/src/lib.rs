//! Common library for the kids check-in service
//!
//! This crate provides the PostgreSQL plumbing shared by the services:
//! pool configuration, connection set-up, migrations, health checks and
//! the error type every store backend reports.
//!
//! ```rust,no_run
//! use common::database::{DatabaseConfig, health_check, init_pool};
//!
//! # async fn connect() -> Result<(), common::error::DatabaseError> {
//! let config = DatabaseConfig::from_env()?;
//! let pool = init_pool(&config).await?;
//! assert!(health_check(&pool).await?);
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod error;
