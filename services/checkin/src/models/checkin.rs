//! Check-in ledger models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One ledger row: a child or guest present in a session
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Checkin {
    pub id: Uuid,
    pub session_id: Uuid,
    pub child_id: Option<Uuid>,
    pub location_id: Uuid,
    pub household_id: Option<Uuid>,
    pub security_code: String,
    pub is_guest: bool,
    pub guest_name: Option<String>,
    pub guest_birth_year: Option<i32>,
    pub guest_parent_name: Option<String>,
    pub guest_parent_phone: Option<String>,
    pub guest_allergies: Option<String>,
    pub guest_notes: Option<String>,
    pub checked_in_at: DateTime<Utc>,
    pub checked_in_by: Option<Uuid>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub checked_out_by: Option<Uuid>,
}

impl Checkin {
    /// Still present, not yet picked up
    pub fn is_active(&self) -> bool {
        self.checked_out_at.is_none()
    }
}

/// A ledger row joined with the names needed for display and labels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckinDetail {
    #[serde(flatten)]
    pub checkin: Checkin,
    /// Child name, or the guest name for guests
    pub display_name: String,
    pub birth_year: Option<i32>,
    pub allergies: Option<String>,
    pub location_name: String,
    pub room_number: Option<String>,
}

/// Guest check-in form as typed by the operator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestProfile {
    #[serde(default)]
    pub name: String,
    pub birth_year: Option<i32>,
    #[serde(default)]
    pub parent_name: String,
    #[serde(default)]
    pub parent_phone: String,
    pub allergies: Option<String>,
    pub notes: Option<String>,
}

/// Guest fields after validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Guest {
    pub name: String,
    pub birth_year: i32,
    pub parent_name: String,
    pub parent_phone: String,
    pub allergies: Option<String>,
    pub notes: Option<String>,
}

/// Who a new ledger row is for
///
/// Members carry child and household references and never guest fields;
/// guests carry guest fields and never references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckinSubject {
    Member { child_id: Uuid, household_id: Uuid },
    Guest(Guest),
}

/// New ledger row payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCheckin {
    pub session_id: Uuid,
    pub location_id: Uuid,
    pub security_code: String,
    pub checked_in_by: Uuid,
    pub subject: CheckinSubject,
}

impl NewCheckin {
    pub fn child_id(&self) -> Option<Uuid> {
        match &self.subject {
            CheckinSubject::Member { child_id, .. } => Some(*child_id),
            CheckinSubject::Guest(_) => None,
        }
    }

    pub fn household_id(&self) -> Option<Uuid> {
        match &self.subject {
            CheckinSubject::Member { household_id, .. } => Some(*household_id),
            CheckinSubject::Guest(_) => None,
        }
    }

    pub fn guest(&self) -> Option<&Guest> {
        match &self.subject {
            CheckinSubject::Member { .. } => None,
            CheckinSubject::Guest(guest) => Some(guest),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.guest().is_some()
    }
}
