//! Location model: a room children are checked into

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Location entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    pub room_number: Option<String>,
    /// Inclusive lower age bound, `None` means unbounded
    pub min_age: Option<i32>,
    /// Inclusive upper age bound, `None` means unbounded
    pub max_age: Option<i32>,
    /// `None` means unlimited
    pub capacity: Option<i32>,
    pub is_active: bool,
    pub sort_order: i32,
}

impl Location {
    /// Whether `age` falls inside the inclusive `[min_age, max_age]` range
    pub fn accepts_age(&self, age: i32) -> bool {
        self.min_age.is_none_or(|min| age >= min) && self.max_age.is_none_or(|max| age <= max)
    }

    /// Name with the room number appended when there is one
    pub fn display_name(&self) -> String {
        match &self.room_number {
            Some(room) if !room.is_empty() => format!("{} (Room {})", self.name, room),
            _ => self.name.clone(),
        }
    }
}
