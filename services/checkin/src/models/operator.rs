//! The person operating a check-in station

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operator identity, passed into every operation that writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: Uuid,
}

impl Operator {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }
}
