//! Household search by the last four digits of a phone number
//!
//! The digits are a phone fragment, not a PIN, so unrelated families
//! regularly share them. Several matches are a normal outcome that the
//! operator resolves by picking from a list.

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{CheckinError, CheckinResult},
    models::{Household, HouseholdSummary},
    store::CheckinStore,
    validation::validate_phone_digits,
};

/// Outcome of a phone search
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "households", rename_all = "snake_case")]
pub enum HouseholdMatch {
    /// Nobody matched; offer guest check-in
    None,
    /// Go straight to child selection
    Single(Household),
    /// Disambiguation list, with the full records kept for selection
    Multiple(Vec<HouseholdChoice>),
}

/// One entry of a disambiguation list
#[derive(Debug, Clone, Serialize)]
pub struct HouseholdChoice {
    pub summary: HouseholdSummary,
    #[serde(skip)]
    household: Household,
}

impl HouseholdChoice {
    pub fn household(&self) -> &Household {
        &self.household
    }
}

impl HouseholdMatch {
    pub fn len(&self) -> usize {
        match self {
            HouseholdMatch::None => 0,
            HouseholdMatch::Single(_) => 1,
            HouseholdMatch::Multiple(choices) => choices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, HouseholdMatch::None)
    }

    /// Pick the household the operator selected
    ///
    /// Only households that were part of this result can be selected.
    pub fn select(self, household_id: Uuid) -> Option<Household> {
        match self {
            HouseholdMatch::None => None,
            HouseholdMatch::Single(household) => {
                (household.id == household_id).then_some(household)
            }
            HouseholdMatch::Multiple(choices) => choices
                .into_iter()
                .map(|c| c.household)
                .find(|h| h.id == household_id),
        }
    }
}

impl From<Vec<Household>> for HouseholdMatch {
    fn from(mut households: Vec<Household>) -> Self {
        match households.len() {
            0 => HouseholdMatch::None,
            1 => HouseholdMatch::Single(households.remove(0)),
            _ => HouseholdMatch::Multiple(
                households
                    .into_iter()
                    .map(|household| HouseholdChoice {
                        summary: household.summary(),
                        household,
                    })
                    .collect(),
            ),
        }
    }
}

/// Find households whose phone fingerprint equals `digits` exactly
pub async fn search_households(
    store: &dyn CheckinStore,
    digits: &str,
) -> CheckinResult<HouseholdMatch> {
    validate_phone_digits(digits).map_err(CheckinError::Validation)?;

    let households = store.households_by_phone_last_four(digits).await?;
    info!("Phone search matched {} households", households.len());

    // Guard against a backend that matches loosely
    let households: Vec<Household> = households
        .into_iter()
        .filter(|h| h.phone_last_four == digits)
        .collect();

    Ok(households.into())
}
