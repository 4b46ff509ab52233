//! Resolution of today's check-in session
//!
//! Two operators opening the first session of the day at the same moment
//! can both create one. Nothing prevents that; instead resolution always
//! returns the earliest active session of the day, so once both rows
//! exist every station converges on the same one.

use chrono::{Datelike, Local, NaiveDate, Weekday};
use tracing::{info, warn};

use crate::{
    config::SessionDefaults,
    error::CheckinResult,
    models::{NewSession, Operator, Session},
    store::CheckinStore,
};

/// The operator's calendar date
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Default name for a session created on `date`, e.g. "Sunday Service"
pub fn default_session_name(date: NaiveDate) -> String {
    format!("{} Service", weekday_name(date.weekday()))
}

/// Get the active session for `date`, creating one if there is none
pub async fn get_or_create_session(
    store: &dyn CheckinStore,
    operator: &Operator,
    defaults: &SessionDefaults,
    date: NaiveDate,
) -> CheckinResult<Session> {
    let sessions = store.active_sessions_on(date).await?;
    if sessions.len() > 1 {
        warn!(
            "{} active sessions on {}, using the earliest",
            sessions.len(),
            date
        );
    }
    if let Some(session) = sessions.into_iter().next() {
        return Ok(session);
    }

    let new_session = NewSession {
        name: default_session_name(date),
        session_date: date,
        start_time: defaults.start_time,
        end_time: defaults.end_time,
        created_by: operator.id,
    };
    let session = store.insert_session(&new_session).await?;
    info!(
        "Created session '{}' ({}) for {}",
        session.name, session.id, date
    );
    Ok(session)
}
