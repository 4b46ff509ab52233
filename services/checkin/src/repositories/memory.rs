//! In-memory store
//!
//! Keeps every table in process memory with the same semantics as the
//! PostgreSQL store: server-assigned ids and timestamps, referential
//! checks on insert, atomic code minting, single checkout per row and a
//! change published for every ledger write.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use common::error::{DatabaseError, DatabaseResult};
use rand::Rng;
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    feed::{LedgerChange, LedgerFeed},
    models::{Checkin, CheckinDetail, CheckinSubject, Household, Location, NewCheckin, NewSession, Session},
    security_code::{CODE_SPACE, MAX_MINT_ATTEMPTS, format_code},
    store::CheckinStore,
};

#[derive(Default)]
struct Tables {
    households: Vec<Household>,
    locations: Vec<Location>,
    sessions: Vec<Session>,
    checkins: Vec<Checkin>,
    codes: HashSet<(Uuid, String)>,
}

impl Tables {
    fn detail(&self, checkin: &Checkin) -> DatabaseResult<CheckinDetail> {
        let location = self
            .locations
            .iter()
            .find(|l| l.id == checkin.location_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("location {}", checkin.location_id)))?;

        let child = checkin.child_id.and_then(|child_id| {
            self.households
                .iter()
                .find_map(|h| h.children.iter().find(|c| c.id == child_id))
        });

        let (display_name, birth_year, allergies) = match child {
            Some(child) => (
                child.full_name.clone(),
                child.birth_year,
                child.allergies.clone(),
            ),
            None => (
                checkin.guest_name.clone().unwrap_or_default(),
                checkin.guest_birth_year,
                checkin.guest_allergies.clone(),
            ),
        };

        Ok(CheckinDetail {
            checkin: checkin.clone(),
            display_name,
            birth_year,
            allergies,
            location_name: location.name.clone(),
            room_number: location.room_number.clone(),
        })
    }

    /// Details of the matching rows, most recent check-in first
    fn details<F>(&self, filter: F) -> DatabaseResult<Vec<CheckinDetail>>
    where
        F: Fn(&Checkin) -> bool,
    {
        let mut details = self
            .checkins
            .iter()
            .filter(|c| filter(c))
            .map(|c| self.detail(c))
            .collect::<DatabaseResult<Vec<_>>>()?;
        details.sort_by(|a, b| b.checkin.checked_in_at.cmp(&a.checkin.checked_in_at));
        Ok(details)
    }
}

/// Check-in store living in process memory
pub struct MemoryStore {
    tables: Mutex<Tables>,
    feed: LedgerFeed,
}

impl MemoryStore {
    pub fn new(feed: LedgerFeed) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            feed,
        }
    }

    pub async fn add_household(&self, household: Household) {
        self.tables.lock().await.households.push(household);
    }

    pub async fn add_location(&self, location: Location) {
        self.tables.lock().await.locations.push(location);
    }

    pub async fn add_session(&self, session: Session) {
        self.tables.lock().await.sessions.push(session);
    }

    /// Raw ledger rows, in insertion order
    pub async fn checkins(&self) -> Vec<Checkin> {
        self.tables.lock().await.checkins.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(LedgerFeed::new(256))
    }
}

#[async_trait]
impl CheckinStore for MemoryStore {
    async fn households_by_phone_last_four(
        &self,
        last_four: &str,
    ) -> DatabaseResult<Vec<Household>> {
        let tables = self.tables.lock().await;
        let mut households: Vec<Household> = tables
            .households
            .iter()
            .filter(|h| h.phone_last_four == last_four)
            .cloned()
            .collect();
        households.sort_by(|a, b| a.family_name.cmp(&b.family_name).then(a.id.cmp(&b.id)));
        Ok(households)
    }

    async fn household(&self, id: Uuid) -> DatabaseResult<Option<Household>> {
        let tables = self.tables.lock().await;
        Ok(tables.households.iter().find(|h| h.id == id).cloned())
    }

    async fn locations(&self, active_only: bool) -> DatabaseResult<Vec<Location>> {
        let tables = self.tables.lock().await;
        let mut locations: Vec<Location> = tables
            .locations
            .iter()
            .filter(|l| l.is_active || !active_only)
            .cloned()
            .collect();
        locations.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
        Ok(locations)
    }

    async fn active_sessions_on(&self, date: NaiveDate) -> DatabaseResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .iter()
            .filter(|s| s.session_date == date && s.is_active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(sessions)
    }

    async fn sessions(&self, limit: u32) -> DatabaseResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut sessions = tables.sessions.clone();
        sessions.sort_by(|a, b| {
            b.session_date
                .cmp(&a.session_date)
                .then(b.start_time.cmp(&a.start_time))
        });
        sessions.truncate(limit as usize);
        Ok(sessions)
    }

    async fn insert_session(&self, new_session: &NewSession) -> DatabaseResult<Session> {
        let session = Session {
            id: Uuid::new_v4(),
            name: new_session.name.clone(),
            session_date: new_session.session_date,
            start_time: new_session.start_time,
            end_time: new_session.end_time,
            is_active: true,
            created_by: Some(new_session.created_by),
            created_at: Utc::now(),
        };
        self.tables.lock().await.sessions.push(session.clone());
        Ok(session)
    }

    async fn generate_security_code(
        &self,
        session_id: Uuid,
        _household_id: Option<Uuid>,
    ) -> DatabaseResult<String> {
        let mut tables = self.tables.lock().await;
        if !tables.sessions.iter().any(|s| s.id == session_id) {
            return Err(DatabaseError::NotFound(format!("session {}", session_id)));
        }

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_MINT_ATTEMPTS {
            let code = format_code(rng.gen_range(0..CODE_SPACE));
            if tables.codes.insert((session_id, code.clone())) {
                return Ok(code);
            }
        }

        Err(DatabaseError::Conflict(format!(
            "no free security code left in session {}",
            session_id
        )))
    }

    async fn insert_checkin(&self, new_checkin: &NewCheckin) -> DatabaseResult<CheckinDetail> {
        let mut tables = self.tables.lock().await;

        if !tables.sessions.iter().any(|s| s.id == new_checkin.session_id) {
            return Err(DatabaseError::NotFound(format!(
                "session {}",
                new_checkin.session_id
            )));
        }
        if !tables.locations.iter().any(|l| l.id == new_checkin.location_id) {
            return Err(DatabaseError::NotFound(format!(
                "location {}",
                new_checkin.location_id
            )));
        }
        if let CheckinSubject::Member { child_id, household_id } = &new_checkin.subject {
            let known = tables
                .households
                .iter()
                .any(|h| h.id == *household_id && h.child(*child_id).is_some());
            if !known {
                return Err(DatabaseError::NotFound(format!(
                    "child {} in household {}",
                    child_id, household_id
                )));
            }
        }

        let guest = new_checkin.guest();
        let checkin = Checkin {
            id: Uuid::new_v4(),
            session_id: new_checkin.session_id,
            child_id: new_checkin.child_id(),
            location_id: new_checkin.location_id,
            household_id: new_checkin.household_id(),
            security_code: new_checkin.security_code.clone(),
            is_guest: new_checkin.is_guest(),
            guest_name: guest.map(|g| g.name.clone()),
            guest_birth_year: guest.map(|g| g.birth_year),
            guest_parent_name: guest.map(|g| g.parent_name.clone()),
            guest_parent_phone: guest.map(|g| g.parent_phone.clone()),
            guest_allergies: guest.and_then(|g| g.allergies.clone()),
            guest_notes: guest.and_then(|g| g.notes.clone()),
            checked_in_at: Utc::now(),
            checked_in_by: Some(new_checkin.checked_in_by),
            checked_out_at: None,
            checked_out_by: None,
        };

        let detail = tables.detail(&checkin)?;
        tables.checkins.push(checkin.clone());
        drop(tables);

        self.feed.publish(LedgerChange::Inserted { record: checkin });
        Ok(detail)
    }

    async fn active_checkins_by_code(
        &self,
        session_id: Uuid,
        code: &str,
    ) -> DatabaseResult<Vec<CheckinDetail>> {
        let tables = self.tables.lock().await;
        tables.details(|c| c.session_id == session_id && c.security_code == code && c.is_active())
    }

    async fn checkins_by_code(
        &self,
        session_id: Uuid,
        code: &str,
    ) -> DatabaseResult<Vec<CheckinDetail>> {
        let tables = self.tables.lock().await;
        tables.details(|c| c.session_id == session_id && c.security_code == code)
    }

    async fn checkins_for_session(&self, session_id: Uuid) -> DatabaseResult<Vec<CheckinDetail>> {
        let tables = self.tables.lock().await;
        tables.details(|c| c.session_id == session_id)
    }

    async fn mark_checked_out(
        &self,
        checkin_id: Uuid,
        operator_id: Uuid,
    ) -> DatabaseResult<Checkin> {
        let mut tables = self.tables.lock().await;
        let checkin = tables
            .checkins
            .iter_mut()
            .find(|c| c.id == checkin_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("check-in {}", checkin_id)))?;

        if !checkin.is_active() {
            return Err(DatabaseError::Conflict(format!(
                "check-in {} is already checked out",
                checkin_id
            )));
        }

        checkin.checked_out_at = Some(Utc::now());
        checkin.checked_out_by = Some(operator_id);
        let updated = checkin.clone();
        drop(tables);

        self.feed.publish(LedgerChange::Updated {
            record: updated.clone(),
        });
        Ok(updated)
    }

    async fn delete_checkin(&self, checkin_id: Uuid) -> DatabaseResult<bool> {
        let mut tables = self.tables.lock().await;
        let Some(index) = tables.checkins.iter().position(|c| c.id == checkin_id) else {
            return Ok(false);
        };
        let removed = tables.checkins.remove(index);
        drop(tables);

        self.feed.publish(LedgerChange::Deleted {
            id: removed.id,
            session_id: removed.session_id,
        });
        Ok(true)
    }

    fn ledger_feed(&self) -> &LedgerFeed {
        &self.feed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedEvent;
    use chrono::NaiveTime;

    fn session() -> Session {
        Session {
            id: Uuid::new_v4(),
            name: "Sunday Service".to_string(),
            session_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            is_active: true,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn codes_are_unique_within_a_session() {
        let store = MemoryStore::default();
        let session = session();
        store.add_session(session.clone()).await;

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let code = store.generate_security_code(session.id, None).await.unwrap();
            assert_eq!(code.len(), 4);
            assert!(seen.insert(code), "code minted twice in one session");
        }
    }

    #[tokio::test]
    async fn code_for_unknown_session_fails() {
        let store = MemoryStore::default();
        let result = store.generate_security_code(Uuid::new_v4(), None).await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn deleting_publishes_change() {
        let store = MemoryStore::default();
        let session = session();
        store.add_session(session.clone()).await;
        let location = Location {
            id: Uuid::new_v4(),
            name: "Nursery".to_string(),
            room_number: None,
            min_age: None,
            max_age: Some(1),
            capacity: None,
            is_active: true,
            sort_order: 0,
        };
        store.add_location(location.clone()).await;

        let detail = store
            .insert_checkin(&NewCheckin {
                session_id: session.id,
                location_id: location.id,
                security_code: "1111".to_string(),
                checked_in_by: Uuid::new_v4(),
                subject: CheckinSubject::Guest(crate::models::Guest {
                    name: "Zoe".to_string(),
                    birth_year: 2025,
                    parent_name: "Ola".to_string(),
                    parent_phone: "555 0101".to_string(),
                    allergies: None,
                    notes: None,
                }),
            })
            .await
            .unwrap();

        let mut sub = store.ledger_feed().subscribe(session.id);
        assert!(store.delete_checkin(detail.checkin.id).await.unwrap());
        assert!(!store.delete_checkin(detail.checkin.id).await.unwrap());

        assert_eq!(
            sub.try_recv(),
            Some(FeedEvent::Change(LedgerChange::Deleted {
                id: detail.checkin.id,
                session_id: session.id,
            }))
        );
    }
}
