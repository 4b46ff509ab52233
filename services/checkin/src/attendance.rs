//! Attendance projection
//!
//! A session's ledger rows split into present and checked out, plus room
//! occupancy. The view is loaded once and then kept current by applying
//! pushed [`LedgerChange`]s one at a time instead of refetching.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::CheckinResult,
    feed::{FeedEvent, LedgerChange, LedgerSubscription},
    models::{Checkin, Location},
    store::CheckinStore,
};

/// Fill percentage at which a room turns to warning
pub const WARNING_THRESHOLD: f64 = 70.0;
/// Fill percentage at which a room turns critical
pub const CRITICAL_THRESHOLD: f64 = 90.0;

/// How full a room is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyLevel {
    Nominal,
    Warning,
    Critical,
}

impl OccupancyLevel {
    /// Classify a fill percentage; lower bounds are inclusive
    pub fn classify(fill_percentage: f64) -> Self {
        if fill_percentage >= CRITICAL_THRESHOLD {
            OccupancyLevel::Critical
        } else if fill_percentage >= WARNING_THRESHOLD {
            OccupancyLevel::Warning
        } else {
            OccupancyLevel::Nominal
        }
    }
}

/// Occupancy of one room
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LocationOccupancy {
    pub location_id: Uuid,
    pub name: String,
    pub active_count: usize,
    pub capacity: Option<i32>,
    /// `None` for rooms without a capacity
    pub fill_percentage: Option<f64>,
    pub level: Option<OccupancyLevel>,
}

impl LocationOccupancy {
    fn new(location: &Location, active_count: usize) -> Self {
        let fill_percentage = location
            .capacity
            .filter(|&c| c > 0)
            .map(|c| active_count as f64 * 100.0 / f64::from(c));

        Self {
            location_id: location.id,
            name: location.name.clone(),
            active_count,
            capacity: location.capacity,
            fill_percentage,
            level: fill_percentage.map(OccupancyLevel::classify),
        }
    }
}

/// Head counts for a session
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AttendanceSummary {
    pub session_id: Uuid,
    pub present: usize,
    pub checked_out: usize,
    pub guests: usize,
    pub total: usize,
}

/// Live attendance of one session
#[derive(Debug, Clone)]
pub struct AttendanceView {
    session_id: Uuid,
    locations: Vec<Location>,
    /// Most recent check-in first
    rows: Vec<Checkin>,
}

impl AttendanceView {
    pub fn new(session_id: Uuid, locations: Vec<Location>, mut rows: Vec<Checkin>) -> Self {
        rows.retain(|r| r.session_id == session_id);
        Self {
            session_id,
            locations,
            rows,
        }
    }

    /// Fetch the current snapshot of a session
    pub async fn load(store: &dyn CheckinStore, session_id: Uuid) -> CheckinResult<Self> {
        let locations = store.locations(false).await?;
        let rows = store
            .checkins_for_session(session_id)
            .await?
            .into_iter()
            .map(|d| d.checkin)
            .collect::<Vec<_>>();

        info!(
            "Loaded attendance for session {}: {} rows",
            session_id,
            rows.len()
        );
        Ok(Self::new(session_id, locations, rows))
    }

    /// Replace the rows with a fresh snapshot, after the feed lagged
    pub async fn reload(&mut self, store: &dyn CheckinStore) -> CheckinResult<()> {
        *self = Self::load(store, self.session_id).await?;
        Ok(())
    }

    /// Apply pushed changes until the subscription ends
    ///
    /// `on_update` sees the view after every change that altered it and
    /// after every reload forced by a lag.
    pub async fn track<F>(
        &mut self,
        store: &dyn CheckinStore,
        mut subscription: LedgerSubscription,
        mut on_update: F,
    ) -> CheckinResult<()>
    where
        F: FnMut(&AttendanceView),
    {
        while let Some(event) = subscription.recv().await {
            match event {
                FeedEvent::Change(change) => {
                    if self.apply(&change) {
                        on_update(self);
                    }
                }
                FeedEvent::Lagged(_) => {
                    self.reload(store).await?;
                    on_update(self);
                }
            }
        }

        info!("Attendance tracking for session {} ended", self.session_id);
        Ok(())
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Apply one pushed change; returns whether the view changed
    pub fn apply(&mut self, change: &LedgerChange) -> bool {
        if change.session_id() != self.session_id {
            return false;
        }

        match change {
            LedgerChange::Inserted { record } => {
                if self.rows.iter().any(|r| r.id == record.id) {
                    return false;
                }
                self.rows.insert(0, record.clone());
            }
            LedgerChange::Updated { record } => {
                // Replace by id; an unseen row means the view is stale and
                // is repaired by the reload that follows a lag
                let Some(row) = self.rows.iter_mut().find(|r| r.id == record.id) else {
                    debug!("Ignoring update for unknown check-in {}", record.id);
                    return false;
                };
                *row = record.clone();
            }
            LedgerChange::Deleted { id, .. } => {
                let before = self.rows.len();
                self.rows.retain(|r| r.id != *id);
                if self.rows.len() == before {
                    return false;
                }
            }
        }
        true
    }

    pub fn rows(&self) -> &[Checkin] {
        &self.rows
    }

    /// Children still in the building, most recent first
    pub fn active(&self) -> impl Iterator<Item = &Checkin> {
        self.rows.iter().filter(|r| r.is_active())
    }

    /// Children already picked up, most recent check-in first
    pub fn checked_out(&self) -> impl Iterator<Item = &Checkin> {
        self.rows.iter().filter(|r| !r.is_active())
    }

    fn active_counts(&self) -> HashMap<Uuid, usize> {
        let mut counts = HashMap::new();
        for row in self.active() {
            *counts.entry(row.location_id).or_insert(0) += 1;
        }
        counts
    }

    /// Occupancy of every active room and of any inactive room that still
    /// holds children, in location order
    pub fn occupancy(&self) -> Vec<LocationOccupancy> {
        let counts = self.active_counts();
        self.locations
            .iter()
            .filter_map(|location| {
                let count = counts.get(&location.id).copied().unwrap_or(0);
                (location.is_active || count > 0).then(|| LocationOccupancy::new(location, count))
            })
            .collect()
    }

    pub fn occupancy_of(&self, location_id: Uuid) -> Option<LocationOccupancy> {
        let count = self.active().filter(|r| r.location_id == location_id).count();
        self.locations
            .iter()
            .find(|l| l.id == location_id)
            .map(|l| LocationOccupancy::new(l, count))
    }

    pub fn summary(&self) -> AttendanceSummary {
        AttendanceSummary {
            session_id: self.session_id,
            present: self.active().count(),
            checked_out: self.checked_out().count(),
            guests: self.rows.iter().filter(|r| r.is_guest).count(),
            total: self.rows.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{feed::LedgerFeed, repositories::MemoryStore};
    use chrono::Utc;

    fn location(name: &str, capacity: Option<i32>) -> Location {
        Location {
            id: Uuid::new_v4(),
            name: name.to_string(),
            room_number: None,
            min_age: Some(1),
            max_age: Some(3),
            capacity,
            is_active: true,
            sort_order: 0,
        }
    }

    fn checkin(session_id: Uuid, location_id: Uuid) -> Checkin {
        Checkin {
            id: Uuid::new_v4(),
            session_id,
            child_id: Some(Uuid::new_v4()),
            location_id,
            household_id: Some(Uuid::new_v4()),
            security_code: "1234".to_string(),
            is_guest: false,
            guest_name: None,
            guest_birth_year: None,
            guest_parent_name: None,
            guest_parent_phone: None,
            guest_allergies: None,
            guest_notes: None,
            checked_in_at: Utc::now(),
            checked_in_by: None,
            checked_out_at: None,
            checked_out_by: None,
        }
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(OccupancyLevel::classify(0.0), OccupancyLevel::Nominal);
        assert_eq!(OccupancyLevel::classify(69.0), OccupancyLevel::Nominal);
        assert_eq!(OccupancyLevel::classify(69.99), OccupancyLevel::Nominal);
        assert_eq!(OccupancyLevel::classify(70.0), OccupancyLevel::Warning);
        assert_eq!(OccupancyLevel::classify(89.0), OccupancyLevel::Warning);
        assert_eq!(OccupancyLevel::classify(90.0), OccupancyLevel::Critical);
        assert_eq!(OccupancyLevel::classify(120.0), OccupancyLevel::Critical);
    }

    #[test]
    fn fill_percentage_from_active_rows() {
        let session_id = Uuid::new_v4();
        let room = location("Big Room", Some(100));
        let rows: Vec<Checkin> = (0..69).map(|_| checkin(session_id, room.id)).collect();
        let mut view = AttendanceView::new(session_id, vec![room.clone()], rows);

        let occupancy = view.occupancy_of(room.id).unwrap();
        assert_eq!(occupancy.fill_percentage, Some(69.0));
        assert_eq!(occupancy.level, Some(OccupancyLevel::Nominal));

        view.apply(&LedgerChange::Inserted {
            record: checkin(session_id, room.id),
        });
        assert_eq!(
            view.occupancy_of(room.id).unwrap().level,
            Some(OccupancyLevel::Warning)
        );
    }

    #[test]
    fn fifth_toddler_fills_the_room() {
        let session_id = Uuid::new_v4();
        let toddlers = location("Toddlers", Some(5));
        let rows: Vec<Checkin> = (0..4).map(|_| checkin(session_id, toddlers.id)).collect();
        let mut view = AttendanceView::new(session_id, vec![toddlers.clone()], rows);

        let before = view.occupancy_of(toddlers.id).unwrap();
        assert_eq!(before.fill_percentage, Some(80.0));
        assert_eq!(before.level, Some(OccupancyLevel::Warning));

        assert!(view.apply(&LedgerChange::Inserted {
            record: checkin(session_id, toddlers.id),
        }));

        let after = view.occupancy_of(toddlers.id).unwrap();
        assert_eq!(after.active_count, 5);
        assert_eq!(after.fill_percentage, Some(100.0));
        assert_eq!(after.level, Some(OccupancyLevel::Critical));
    }

    #[test]
    fn unlimited_rooms_have_no_percentage() {
        let session_id = Uuid::new_v4();
        let hall = location("Hall", None);
        let view = AttendanceView::new(session_id, vec![hall.clone()], vec![checkin(session_id, hall.id)]);

        let occupancy = view.occupancy_of(hall.id).unwrap();
        assert_eq!(occupancy.active_count, 1);
        assert_eq!(occupancy.fill_percentage, None);
        assert_eq!(occupancy.level, None);
    }

    #[test]
    fn changes_are_applied_incrementally() {
        let session_id = Uuid::new_v4();
        let room = location("Toddlers", Some(5));
        let first = checkin(session_id, room.id);
        let mut view = AttendanceView::new(session_id, vec![room.clone()], vec![first.clone()]);

        let second = checkin(session_id, room.id);
        assert!(view.apply(&LedgerChange::Inserted { record: second.clone() }));
        assert_eq!(view.rows()[0].id, second.id, "inserts are prepended");
        assert!(!view.apply(&LedgerChange::Inserted { record: second.clone() }));

        let mut picked_up = first.clone();
        picked_up.checked_out_at = Some(Utc::now());
        assert!(view.apply(&LedgerChange::Updated { record: picked_up }));
        assert_eq!(view.active().count(), 1);
        assert_eq!(view.checked_out().count(), 1);
        assert_eq!(view.rows().len(), 2);

        assert!(view.apply(&LedgerChange::Deleted {
            id: second.id,
            session_id,
        }));
        assert_eq!(view.active().count(), 0);
        assert_eq!(view.summary().total, 1);
    }

    #[tokio::test]
    async fn track_applies_changes_until_the_feed_closes() {
        let store = MemoryStore::default();
        let session_id = Uuid::new_v4();
        let room = location("Toddlers", Some(5));
        let feed = LedgerFeed::new(16);
        let subscription = feed.subscribe(session_id);
        let mut view = AttendanceView::new(session_id, vec![room.clone()], vec![]);

        let first = checkin(session_id, room.id);
        let mut picked_up = first.clone();
        picked_up.checked_out_at = Some(Utc::now());
        feed.publish(LedgerChange::Inserted { record: first });
        feed.publish(LedgerChange::Inserted {
            record: checkin(Uuid::new_v4(), room.id),
        });
        feed.publish(LedgerChange::Updated { record: picked_up });
        drop(feed);

        let mut updates = 0;
        view.track(&store, subscription, |_| updates += 1).await.unwrap();

        assert_eq!(updates, 2);
        assert_eq!(view.rows().len(), 1);
        assert_eq!(view.checked_out().count(), 1);
    }

    #[tokio::test]
    async fn track_reloads_after_lag() {
        let store = MemoryStore::default();
        let session_id = Uuid::new_v4();
        let room = location("Toddlers", Some(5));
        store.add_location(room.clone()).await;

        let feed = LedgerFeed::new(1);
        let subscription = feed.subscribe(session_id);
        let mut view = AttendanceView::new(session_id, vec![], vec![]);
        for _ in 0..3 {
            feed.publish(LedgerChange::Inserted {
                record: checkin(session_id, room.id),
            });
        }
        drop(feed);

        let mut updates = 0;
        view.track(&store, subscription, |_| updates += 1).await.unwrap();

        // One reload, then the change still buffered after the lag
        assert_eq!(updates, 2);
        assert_eq!(view.rows().len(), 1);
        assert_eq!(view.occupancy().len(), 1);
    }

    #[test]
    fn update_of_unknown_row_is_ignored() {
        let session_id = Uuid::new_v4();
        let room = location("Toddlers", Some(5));
        let known = checkin(session_id, room.id);
        let mut view = AttendanceView::new(session_id, vec![room.clone()], vec![known.clone()]);

        let stranger = checkin(session_id, room.id);
        assert!(!view.apply(&LedgerChange::Updated { record: stranger }));
        assert_eq!(view.rows().len(), 1);
        assert_eq!(view.rows()[0].id, known.id);
    }

    #[test]
    fn other_sessions_are_ignored() {
        let session_id = Uuid::new_v4();
        let room = location("Toddlers", Some(5));
        let mut view = AttendanceView::new(session_id, vec![room.clone()], vec![]);

        assert!(!view.apply(&LedgerChange::Inserted {
            record: checkin(Uuid::new_v4(), room.id),
        }));
        assert_eq!(view.summary().total, 0);
    }

    #[test]
    fn inactive_empty_rooms_are_hidden() {
        let session_id = Uuid::new_v4();
        let mut closed = location("Closed", Some(10));
        closed.is_active = false;
        let open = location("Open", Some(10));
        let mut view = AttendanceView::new(session_id, vec![closed.clone(), open.clone()], vec![]);

        let names: Vec<String> = view.occupancy().into_iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["Open"]);

        view.apply(&LedgerChange::Inserted {
            record: checkin(session_id, closed.id),
        });
        assert_eq!(view.occupancy().len(), 2);
    }
}
