//! Kids check-in service
//!
//! Household lookup by phone digits, per-service sessions, security codes
//! shared by siblings, guest check-in, code-matched checkout, a live
//! attendance projection and printable labels.

pub mod attendance;
pub mod config;
pub mod error;
pub mod feed;
pub mod household;
pub mod labels;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod security_code;
pub mod service;
pub mod session;
pub mod state;
pub mod store;
pub mod suggestion;
pub mod validation;

pub use state::AppState;

/// Schema migrations for the check-in ledger
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
