//! Check-in domain models

pub mod checkin;
pub mod household;
pub mod location;
pub mod operator;
pub mod session;

// Re-export for convenience
pub use checkin::{Checkin, CheckinDetail, CheckinSubject, Guest, GuestProfile, NewCheckin};
pub use household::{Child, Contact, Household, HouseholdSummary};
pub use location::Location;
pub use operator::Operator;
pub use session::{NewSession, Session};
