//! PostgreSQL store

use async_trait::async_trait;
use chrono::NaiveDate;
use common::error::{DatabaseError, DatabaseResult};
use serde::Deserialize;
use sqlx::{FromRow, PgPool, Row, postgres::PgListener, postgres::PgRow};
use std::{collections::HashMap, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    feed::{LedgerChange, LedgerFeed},
    models::{
        Checkin, CheckinDetail, Child, Contact, Household, Location, NewCheckin, NewSession,
        Session,
    },
    store::CheckinStore,
};

/// Channel the ledger trigger notifies on
pub const CHANGE_CHANNEL: &str = "checkin_changes";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const UNIQUE_VIOLATION: &str = "23505";

const CHECKIN_COLUMNS: &str = r#"
    c.id, c.session_id, c.child_id, c.location_id, c.household_id, c.security_code,
    c.is_guest, c.guest_name, c.guest_birth_year, c.guest_parent_name,
    c.guest_parent_phone, c.guest_allergies, c.guest_notes,
    c.checked_in_at, c.checked_in_by, c.checked_out_at, c.checked_out_by,
    COALESCE(ch.full_name, c.guest_name, '') AS display_name,
    COALESCE(ch.birth_year, c.guest_birth_year) AS birth_year,
    COALESCE(ch.allergies, c.guest_allergies) AS allergies,
    l.name AS location_name,
    l.room_number
"#;

/// Build a detail query over `source`, which is aliased as `c`
fn detail_query(source: &str, filter: &str) -> String {
    format!(
        r#"
        SELECT {CHECKIN_COLUMNS}
        FROM {source} c
        LEFT JOIN children ch ON ch.id = c.child_id
        JOIN locations l ON l.id = c.location_id
        {filter}
        ORDER BY c.checked_in_at DESC
        "#
    )
}

fn detail_from_row(row: &PgRow) -> Result<CheckinDetail, sqlx::Error> {
    Ok(CheckinDetail {
        checkin: Checkin::from_row(row)?,
        display_name: row.try_get("display_name")?,
        birth_year: row.try_get("birth_year")?,
        allergies: row.try_get("allergies")?,
        location_name: row.try_get("location_name")?,
        room_number: row.try_get("room_number")?,
    })
}

/// Check-in store backed by PostgreSQL
#[derive(Clone)]
pub struct PgCheckinStore {
    pool: PgPool,
    feed: LedgerFeed,
}

impl PgCheckinStore {
    /// Create a new store; call [`spawn_change_listener`](Self::spawn_change_listener)
    /// to start feeding ledger changes
    pub fn new(pool: PgPool, feed: LedgerFeed) -> Self {
        Self { pool, feed }
    }

    /// Forward ledger trigger notifications into the feed until the task is aborted
    pub fn spawn_change_listener(&self) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let feed = self.feed.clone();
        tokio::spawn(async move { listen_for_changes(pool, feed).await })
    }

    /// Attach contacts and children to household rows
    async fn with_members(&self, rows: Vec<PgRow>) -> DatabaseResult<Vec<Household>> {
        let mut households: Vec<Household> = rows
            .into_iter()
            .map(|row| Household {
                id: row.get("id"),
                family_name: row.get("family_name"),
                phone_last_four: row.get("phone_last_four"),
                contacts: Vec::new(),
                children: Vec::new(),
            })
            .collect();

        if households.is_empty() {
            return Ok(households);
        }

        let ids: Vec<Uuid> = households.iter().map(|h| h.id).collect();

        let contacts = sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, household_id, full_name, phone, is_primary
            FROM contacts
            WHERE household_id = ANY($1)
            ORDER BY is_primary DESC, sort_order, full_name
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let children = sqlx::query_as::<_, Child>(
            r#"
            SELECT id, household_id, full_name, birth_year, allergies
            FROM children
            WHERE household_id = ANY($1)
            ORDER BY sort_order, full_name
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let index: HashMap<Uuid, usize> = households
            .iter()
            .enumerate()
            .map(|(i, h)| (h.id, i))
            .collect();

        for contact in contacts {
            if let Some(&i) = index.get(&contact.household_id) {
                households[i].contacts.push(contact);
            }
        }
        for child in children {
            if let Some(&i) = index.get(&child.household_id) {
                households[i].children.push(child);
            }
        }

        Ok(households)
    }
}

#[async_trait]
impl CheckinStore for PgCheckinStore {
    async fn households_by_phone_last_four(
        &self,
        last_four: &str,
    ) -> DatabaseResult<Vec<Household>> {
        let rows = sqlx::query(
            r#"
            SELECT id, family_name, phone_last_four
            FROM households
            WHERE phone_last_four = $1
            ORDER BY family_name, id
            "#,
        )
        .bind(last_four)
        .fetch_all(&self.pool)
        .await?;

        self.with_members(rows).await
    }

    async fn household(&self, id: Uuid) -> DatabaseResult<Option<Household>> {
        let row = sqlx::query("SELECT id, family_name, phone_last_four FROM households WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let households = self.with_members(row.into_iter().collect()).await?;
        Ok(households.into_iter().next())
    }

    async fn locations(&self, active_only: bool) -> DatabaseResult<Vec<Location>> {
        let locations = sqlx::query_as::<_, Location>(
            r#"
            SELECT id, name, room_number, min_age, max_age, capacity, is_active, sort_order
            FROM locations
            WHERE is_active OR NOT $1
            ORDER BY sort_order, name
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(locations)
    }

    async fn active_sessions_on(&self, date: NaiveDate) -> DatabaseResult<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, name, session_date, start_time, end_time, is_active, created_by, created_at
            FROM sessions
            WHERE session_date = $1 AND is_active
            ORDER BY start_time, created_at
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn sessions(&self, limit: u32) -> DatabaseResult<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, name, session_date, start_time, end_time, is_active, created_by, created_at
            FROM sessions
            ORDER BY session_date DESC, start_time DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn insert_session(&self, new_session: &NewSession) -> DatabaseResult<Session> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (name, session_date, start_time, end_time, is_active, created_by)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            RETURNING id, name, session_date, start_time, end_time, is_active, created_by, created_at
            "#,
        )
        .bind(&new_session.name)
        .bind(new_session.session_date)
        .bind(new_session.start_time)
        .bind(new_session.end_time)
        .bind(new_session.created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    async fn generate_security_code(
        &self,
        session_id: Uuid,
        household_id: Option<Uuid>,
    ) -> DatabaseResult<String> {
        sqlx::query_scalar::<_, String>("SELECT generate_security_code($1, $2)")
            .bind(session_id)
            .bind(household_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let exhausted = e
                    .as_database_error()
                    .and_then(|db| db.code())
                    .is_some_and(|code| code == UNIQUE_VIOLATION);
                if exhausted {
                    DatabaseError::Conflict(format!(
                        "no free security code left in session {}",
                        session_id
                    ))
                } else {
                    e.into()
                }
            })
    }

    async fn insert_checkin(&self, new_checkin: &NewCheckin) -> DatabaseResult<CheckinDetail> {
        let guest = new_checkin.guest();
        let sql = format!(
            r#"
            WITH c AS (
                INSERT INTO checkins (
                    session_id, child_id, location_id, household_id, security_code, is_guest,
                    guest_name, guest_birth_year, guest_parent_name, guest_parent_phone,
                    guest_allergies, guest_notes, checked_in_by
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                RETURNING *
            )
            {}
            "#,
            detail_query("c", "")
        );

        let row = sqlx::query(&sql)
            .bind(new_checkin.session_id)
            .bind(new_checkin.child_id())
            .bind(new_checkin.location_id)
            .bind(new_checkin.household_id())
            .bind(&new_checkin.security_code)
            .bind(new_checkin.is_guest())
            .bind(guest.map(|g| g.name.as_str()))
            .bind(guest.map(|g| g.birth_year))
            .bind(guest.map(|g| g.parent_name.as_str()))
            .bind(guest.map(|g| g.parent_phone.as_str()))
            .bind(guest.and_then(|g| g.allergies.as_deref()))
            .bind(guest.and_then(|g| g.notes.as_deref()))
            .bind(new_checkin.checked_in_by)
            .fetch_one(&self.pool)
            .await?;

        Ok(detail_from_row(&row)?)
    }

    async fn active_checkins_by_code(
        &self,
        session_id: Uuid,
        code: &str,
    ) -> DatabaseResult<Vec<CheckinDetail>> {
        let sql = detail_query(
            "checkins",
            "WHERE c.session_id = $1 AND c.security_code = $2 AND c.checked_out_at IS NULL",
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .bind(code)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(detail_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn checkins_by_code(
        &self,
        session_id: Uuid,
        code: &str,
    ) -> DatabaseResult<Vec<CheckinDetail>> {
        let sql = detail_query(
            "checkins",
            "WHERE c.session_id = $1 AND c.security_code = $2",
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .bind(code)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(detail_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn checkins_for_session(&self, session_id: Uuid) -> DatabaseResult<Vec<CheckinDetail>> {
        let sql = detail_query("checkins", "WHERE c.session_id = $1");
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(detail_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn mark_checked_out(
        &self,
        checkin_id: Uuid,
        operator_id: Uuid,
    ) -> DatabaseResult<Checkin> {
        let updated = sqlx::query_as::<_, Checkin>(
            r#"
            UPDATE checkins
            SET checked_out_at = NOW(), checked_out_by = $2
            WHERE id = $1 AND checked_out_at IS NULL
            RETURNING *
            "#,
        )
        .bind(checkin_id)
        .bind(operator_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(checkin) = updated {
            return Ok(checkin);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM checkins WHERE id = $1)")
            .bind(checkin_id)
            .fetch_one(&self.pool)
            .await?;

        if exists {
            Err(DatabaseError::Conflict(format!(
                "check-in {} is already checked out",
                checkin_id
            )))
        } else {
            Err(DatabaseError::NotFound(format!("check-in {}", checkin_id)))
        }
    }

    async fn delete_checkin(&self, checkin_id: Uuid) -> DatabaseResult<bool> {
        let result = sqlx::query("DELETE FROM checkins WHERE id = $1")
            .bind(checkin_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    fn ledger_feed(&self) -> &LedgerFeed {
        &self.feed
    }
}

/// Operation named in a trigger notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Payload written by the `notify_checkin_change` trigger
///
/// Carries the row identity only; the row itself is fetched on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
struct ChangeNotification {
    op: ChangeOp,
    id: Uuid,
    session_id: Uuid,
}

fn parse_notification(payload: &str) -> Result<ChangeNotification, serde_json::Error> {
    serde_json::from_str(payload)
}

async fn fetch_checkin(pool: &PgPool, id: Uuid) -> Result<Option<Checkin>, sqlx::Error> {
    sqlx::query_as::<_, Checkin>("SELECT * FROM checkins WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Turn a notification into a ledger change
///
/// `None` when the row is already gone, a later DELETE notification
/// follows in that case.
async fn resolve_change(
    pool: &PgPool,
    notification: ChangeNotification,
) -> Result<Option<LedgerChange>, sqlx::Error> {
    let ChangeNotification { op, id, session_id } = notification;
    if op == ChangeOp::Delete {
        return Ok(Some(LedgerChange::Deleted { id, session_id }));
    }

    let Some(record) = fetch_checkin(pool, id).await? else {
        debug!("Check-in {} vanished before its {:?} was forwarded", id, op);
        return Ok(None);
    };

    Ok(Some(match op {
        ChangeOp::Insert => LedgerChange::Inserted { record },
        _ => LedgerChange::Updated { record },
    }))
}

async fn listen_for_changes(pool: PgPool, feed: LedgerFeed) {
    loop {
        match PgListener::connect_with(&pool).await {
            Ok(mut listener) => {
                if let Err(e) = listener.listen(CHANGE_CHANNEL).await {
                    error!("Failed to listen on {}: {}", CHANGE_CHANNEL, e);
                } else {
                    info!("Listening for ledger changes on {}", CHANGE_CHANNEL);
                    loop {
                        let notification = match listener.recv().await {
                            Ok(notification) => notification,
                            Err(e) => {
                                error!("Ledger listener failed: {}", e);
                                break;
                            }
                        };

                        let notification = match parse_notification(notification.payload()) {
                            Ok(notification) => notification,
                            Err(e) => {
                                warn!("Ignoring malformed ledger notification: {}", e);
                                continue;
                            }
                        };

                        match resolve_change(&pool, notification).await {
                            Ok(Some(change)) => feed.publish(change),
                            Ok(None) => {}
                            Err(e) => error!(
                                "Failed to load check-in {} for the feed: {}",
                                notification.id, e
                            ),
                        }
                    }
                }
            }
            Err(e) => error!("Failed to connect ledger listener: {}", e),
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = include_str!("../../migrations/20260301000000_checkin_schema.sql");

    /// Body of the `notify_checkin_change` function in the migration
    fn trigger_body() -> &'static str {
        let start = SCHEMA
            .find("FUNCTION notify_checkin_change()")
            .expect("trigger function is defined");
        let end = start + SCHEMA[start..].find("LANGUAGE plpgsql").unwrap();
        &SCHEMA[start..end]
    }

    #[test]
    fn trigger_sends_identity_only() {
        let body = trigger_body();
        assert!(!body.contains("row_to_json"));
        assert!(body.contains("'op', TG_OP"));
        assert!(body.contains("'id', changed.id"));
        assert!(body.contains("'session_id', changed.session_id"));
        assert_eq!(body.matches("pg_notify").count(), 1);
    }

    #[test]
    fn parses_trigger_payloads() {
        let id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        // json_build_object(..)::TEXT spacing
        for (op, expected) in [
            ("INSERT", ChangeOp::Insert),
            ("UPDATE", ChangeOp::Update),
            ("DELETE", ChangeOp::Delete),
        ] {
            let payload = format!(
                r#"{{"op" : "{}", "id" : "{}", "session_id" : "{}"}}"#,
                op, id, session_id
            );
            assert_eq!(
                parse_notification(&payload).unwrap(),
                ChangeNotification {
                    op: expected,
                    id,
                    session_id
                }
            );
        }
    }

    #[test]
    fn rejects_unknown_operation() {
        let payload = format!(
            r#"{{"op":"TRUNCATE","id":"{}","session_id":"{}"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        assert!(parse_notification(&payload).is_err());
        assert!(parse_notification(r#"{"op":"INSERT"}"#).is_err());
    }

    #[test]
    fn detail_query_places_filter_before_order() {
        let sql = detail_query("checkins", "WHERE c.session_id = $1");
        let filter = sql.find("WHERE c.session_id").unwrap();
        let order = sql.find("ORDER BY").unwrap();
        assert!(filter < order);
    }
}
