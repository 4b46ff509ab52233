//! Check-in, guest check-in and checkout operations
//!
//! Every operation is a short sequence of store round trips. Batches are
//! written row by row with no transaction around them: a failure part way
//! leaves the earlier rows written, and the returned [`BatchOutcome`]
//! says exactly which rows made it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::{CheckinError, CheckinResult},
    models::{Checkin, CheckinDetail, CheckinSubject, GuestProfile, Household, NewCheckin, Operator},
    security_code,
    store::CheckinStore,
    validation::{GuestRules, validate_guest, validate_security_code},
};

/// One child picked for check-in and the room chosen for them
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChildSelection {
    pub child_id: Uuid,
    pub location_id: Uuid,
}

/// Result for one row of a batch
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowOutcome<T> {
    Done { target: Uuid, record: T },
    Failed { target: Uuid, reason: String },
}

impl<T> RowOutcome<T> {
    pub fn target(&self) -> Uuid {
        match self {
            RowOutcome::Done { target, .. } | RowOutcome::Failed { target, .. } => *target,
        }
    }

    pub fn record(&self) -> Option<&T> {
        match self {
            RowOutcome::Done { record, .. } => Some(record),
            RowOutcome::Failed { .. } => None,
        }
    }
}

/// Per-row results of a check-in or checkout batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome<T> {
    pub security_code: String,
    pub rows: Vec<RowOutcome<T>>,
}

impl<T> BatchOutcome<T> {
    fn new(security_code: String) -> Self {
        Self {
            security_code,
            rows: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &T> {
        self.rows.iter().filter_map(RowOutcome::record)
    }

    pub fn failed(&self) -> impl Iterator<Item = &RowOutcome<T>> {
        self.rows
            .iter()
            .filter(|r| matches!(r, RowOutcome::Failed { .. }))
    }

    /// Every row went through
    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Rows matching a typed checkout code
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutCandidates {
    pub security_code: String,
    pub rows: Vec<CheckinDetail>,
    /// Rows ticked by default: the only row when there is exactly one
    pub preselected: Vec<Uuid>,
}

impl CheckoutCandidates {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

async fn insert_member(
    store: &dyn CheckinStore,
    operator: &Operator,
    session_id: Uuid,
    security_code: &str,
    household_id: Uuid,
    selection: ChildSelection,
) -> CheckinResult<CheckinDetail> {
    let new_checkin = NewCheckin {
        session_id,
        location_id: selection.location_id,
        security_code: security_code.to_string(),
        checked_in_by: operator.id,
        subject: CheckinSubject::Member {
            child_id: selection.child_id,
            household_id,
        },
    };
    Ok(store.insert_checkin(&new_checkin).await?)
}

/// Check one child in under a freshly minted code
pub async fn check_in_child(
    store: &dyn CheckinStore,
    operator: &Operator,
    session_id: Uuid,
    child_id: Uuid,
    location_id: Uuid,
    household_id: Uuid,
) -> CheckinResult<CheckinDetail> {
    let code = security_code::mint(store, session_id, Some(household_id)).await?;
    let selection = ChildSelection {
        child_id,
        location_id,
    };

    let detail = insert_member(store, operator, session_id, &code, household_id, selection)
        .await
        .inspect_err(|e| error!("Check-in of child {} failed: {}", child_id, e))?;

    info!(
        "Checked in child {} to location {} with code {}",
        child_id, location_id, code
    );
    Ok(detail)
}

/// Check in several children of one household under one shared code
///
/// The selection is validated in full before the code is minted, so a bad
/// selection writes nothing.
pub async fn check_in_household(
    store: &dyn CheckinStore,
    operator: &Operator,
    session_id: Uuid,
    household: &Household,
    selections: &[ChildSelection],
) -> CheckinResult<BatchOutcome<CheckinDetail>> {
    if selections.is_empty() {
        return Err(CheckinError::validation("Select at least one child"));
    }

    let mut seen = HashSet::new();
    for selection in selections {
        if household.child(selection.child_id).is_none() {
            return Err(CheckinError::Validation(format!(
                "Child {} is not part of the {} household",
                selection.child_id, household.family_name
            )));
        }
        if !seen.insert(selection.child_id) {
            return Err(CheckinError::validation("A child was selected twice"));
        }
    }

    let code = security_code::mint(store, session_id, Some(household.id)).await?;
    let mut outcome = BatchOutcome::new(code);

    for selection in selections {
        let result = insert_member(
            store,
            operator,
            session_id,
            &outcome.security_code,
            household.id,
            *selection,
        )
        .await;

        outcome.rows.push(match result {
            Ok(detail) => RowOutcome::Done {
                target: selection.child_id,
                record: detail,
            },
            Err(e) => {
                error!("Check-in of child {} failed: {}", selection.child_id, e);
                RowOutcome::Failed {
                    target: selection.child_id,
                    reason: e.user_message(),
                }
            }
        });
    }

    info!(
        "Checked in {}/{} children of household {} with code {}",
        outcome.succeeded().count(),
        selections.len(),
        household.id,
        outcome.security_code
    );
    Ok(outcome)
}

/// Check in a visiting child with no household record
pub async fn check_in_guest(
    store: &dyn CheckinStore,
    operator: &Operator,
    session_id: Uuid,
    location_id: Option<Uuid>,
    profile: &GuestProfile,
    current_year: i32,
    rules: &GuestRules,
) -> CheckinResult<CheckinDetail> {
    let guest =
        validate_guest(profile, location_id, current_year, rules).map_err(CheckinError::Validation)?;
    let location_id = location_id.ok_or_else(|| CheckinError::validation("Location is required"))?;

    let code = security_code::mint(store, session_id, None).await?;
    let new_checkin = NewCheckin {
        session_id,
        location_id,
        security_code: code,
        checked_in_by: operator.id,
        subject: CheckinSubject::Guest(guest),
    };

    let detail = store
        .insert_checkin(&new_checkin)
        .await
        .inspect_err(|e| error!("Guest check-in failed: {}", e))?;

    info!(
        "Checked in guest {} to location {} with code {}",
        detail.checkin.id, location_id, detail.checkin.security_code
    );
    Ok(detail)
}

/// Look up the rows a typed code would check out
pub async fn find_checkout(
    store: &dyn CheckinStore,
    session_id: Uuid,
    code: &str,
) -> CheckinResult<CheckoutCandidates> {
    validate_security_code(code).map_err(CheckinError::Validation)?;

    let rows = store.active_checkins_by_code(session_id, code).await?;
    if rows.is_empty() {
        info!("No active check-in for code {} in session {}", code, session_id);
    }

    let preselected = match rows.as_slice() {
        [only] => vec![only.checkin.id],
        _ => Vec::new(),
    };

    Ok(CheckoutCandidates {
        security_code: code.to_string(),
        rows,
        preselected,
    })
}

/// Check out the selected rows of a pickup group
///
/// Rows that are not an active part of the group in this session are
/// reported as failed rather than touched.
pub async fn check_out(
    store: &dyn CheckinStore,
    operator: &Operator,
    session_id: Uuid,
    code: &str,
    selected: &[Uuid],
) -> CheckinResult<BatchOutcome<Checkin>> {
    validate_security_code(code).map_err(CheckinError::Validation)?;
    if selected.is_empty() {
        return Err(CheckinError::validation("Select at least one child to check out"));
    }

    let group: HashSet<Uuid> = store
        .active_checkins_by_code(session_id, code)
        .await?
        .into_iter()
        .map(|d| d.checkin.id)
        .collect();

    let mut outcome = BatchOutcome::new(code.to_string());
    let mut seen = HashSet::new();

    for &checkin_id in selected {
        if !seen.insert(checkin_id) {
            continue;
        }

        if !group.contains(&checkin_id) {
            warn!(
                "Check-in {} is not an active member of code {} in session {}",
                checkin_id, code, session_id
            );
            outcome.rows.push(RowOutcome::Failed {
                target: checkin_id,
                reason: "Not checked in under this code".to_string(),
            });
            continue;
        }

        match store.mark_checked_out(checkin_id, operator.id).await {
            Ok(checkin) => outcome.rows.push(RowOutcome::Done {
                target: checkin_id,
                record: checkin,
            }),
            Err(e) => {
                let e = CheckinError::from(e);
                error!("Checkout of {} failed: {}", checkin_id, e);
                outcome.rows.push(RowOutcome::Failed {
                    target: checkin_id,
                    reason: e.user_message(),
                });
            }
        }
    }

    info!(
        "Checked out {}/{} rows for code {} in session {}",
        outcome.succeeded().count(),
        seen.len(),
        code,
        session_id
    );
    Ok(outcome)
}

/// Check out every active row of a pickup group
pub async fn check_out_group(
    store: &dyn CheckinStore,
    operator: &Operator,
    session_id: Uuid,
    code: &str,
) -> CheckinResult<BatchOutcome<Checkin>> {
    let candidates = find_checkout(store, session_id, code).await?;
    if candidates.is_empty() {
        return Ok(BatchOutcome::new(code.to_string()));
    }

    let ids: Vec<Uuid> = candidates.rows.iter().map(|d| d.checkin.id).collect();
    check_out(store, operator, session_id, code, &ids).await
}

/// Every row of a pickup group in check-in order, for printing again
pub async fn reprint(
    store: &dyn CheckinStore,
    session_id: Uuid,
    code: &str,
) -> CheckinResult<Vec<CheckinDetail>> {
    validate_security_code(code).map_err(CheckinError::Validation)?;

    let mut rows = store.checkins_by_code(session_id, code).await?;
    rows.sort_by_key(|d| d.checkin.checked_in_at);
    Ok(rows)
}

/// Administrative removal of a ledger row
pub async fn remove_checkin(
    store: &dyn CheckinStore,
    operator: &Operator,
    checkin_id: Uuid,
) -> CheckinResult<()> {
    if !store.delete_checkin(checkin_id).await? {
        return Err(CheckinError::NotFound(format!("Check-in {}", checkin_id)));
    }

    warn!("Check-in {} deleted by operator {}", checkin_id, operator.id);
    Ok(())
}
