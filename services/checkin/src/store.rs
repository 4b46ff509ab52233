//! Storage abstraction for the check-in workflow
//!
//! The workflow never talks to a database directly. It is handed an
//! `Arc<dyn CheckinStore>`, so PostgreSQL in production and the in-memory
//! store in tests are interchangeable.

use async_trait::async_trait;
use chrono::NaiveDate;
use common::error::DatabaseResult;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    feed::LedgerFeed,
    models::{Checkin, CheckinDetail, Household, Location, NewCheckin, NewSession, Session},
};

/// Shared handle to a store
pub type SharedStore = Arc<dyn CheckinStore>;

/// Trait defining every store operation the check-in workflow performs
#[async_trait]
pub trait CheckinStore: Send + Sync {
    /// Households whose stored phone fingerprint equals `last_four` exactly,
    /// each with its contacts and children in display order
    async fn households_by_phone_last_four(&self, last_four: &str)
        -> DatabaseResult<Vec<Household>>;

    /// A single household with contacts and children
    async fn household(&self, id: Uuid) -> DatabaseResult<Option<Household>>;

    /// Locations ordered by sort order then name
    async fn locations(&self, active_only: bool) -> DatabaseResult<Vec<Location>>;

    /// Active sessions on `date`, earliest start time first
    async fn active_sessions_on(&self, date: NaiveDate) -> DatabaseResult<Vec<Session>>;

    /// Most recent sessions first
    async fn sessions(&self, limit: u32) -> DatabaseResult<Vec<Session>>;

    async fn insert_session(&self, new_session: &NewSession) -> DatabaseResult<Session>;

    /// Mint a security code unused in the session, atomically
    async fn generate_security_code(
        &self,
        session_id: Uuid,
        household_id: Option<Uuid>,
    ) -> DatabaseResult<String>;

    /// Insert a ledger row; id and check-in time are assigned by the store
    async fn insert_checkin(&self, new_checkin: &NewCheckin) -> DatabaseResult<CheckinDetail>;

    /// Rows of the session carrying `code` that are not checked out yet
    async fn active_checkins_by_code(
        &self,
        session_id: Uuid,
        code: &str,
    ) -> DatabaseResult<Vec<CheckinDetail>>;

    /// Every row of the session carrying `code`
    async fn checkins_by_code(
        &self,
        session_id: Uuid,
        code: &str,
    ) -> DatabaseResult<Vec<CheckinDetail>>;

    /// Every row of the session, most recent check-in first
    async fn checkins_for_session(&self, session_id: Uuid) -> DatabaseResult<Vec<CheckinDetail>>;

    /// Set the checkout pair on a row that is still active
    ///
    /// Fails with `DatabaseError::Conflict` when the row is already checked
    /// out and `DatabaseError::NotFound` when it does not exist.
    async fn mark_checked_out(&self, checkin_id: Uuid, operator_id: Uuid)
        -> DatabaseResult<Checkin>;

    /// Administrative removal; returns whether a row was deleted
    async fn delete_checkin(&self, checkin_id: Uuid) -> DatabaseResult<bool>;

    /// The feed this store publishes ledger changes on
    fn ledger_feed(&self) -> &LedgerFeed;
}
