//! Household model: a family with its contacts and children

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How many child names a disambiguation row previews
const CHILD_PREVIEW_LEN: usize = 3;

/// Household entity, read-only for check-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Household {
    pub id: Uuid,
    pub family_name: String,
    /// Last four digits of the household phone, the search fingerprint
    pub phone_last_four: String,
    pub contacts: Vec<Contact>,
    pub children: Vec<Child>,
}

/// Parent or guardian attached to a household
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: Uuid,
    pub household_id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub is_primary: bool,
}

/// Child (student) belonging to exactly one household
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Child {
    pub id: Uuid,
    pub household_id: Uuid,
    pub full_name: String,
    pub birth_year: Option<i32>,
    pub allergies: Option<String>,
}

/// One row of a disambiguation list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HouseholdSummary {
    pub id: Uuid,
    pub family_name: String,
    pub primary_contact: Option<String>,
    pub child_count: usize,
    pub child_preview: Vec<String>,
}

impl Household {
    /// The first contact flagged primary, else the first contact
    pub fn primary_contact(&self) -> Option<&Contact> {
        self.contacts
            .iter()
            .find(|c| c.is_primary)
            .or_else(|| self.contacts.first())
    }

    pub fn child(&self, child_id: Uuid) -> Option<&Child> {
        self.children.iter().find(|c| c.id == child_id)
    }

    pub fn summary(&self) -> HouseholdSummary {
        HouseholdSummary {
            id: self.id,
            family_name: self.family_name.clone(),
            primary_contact: self.primary_contact().map(|c| c.full_name.clone()),
            child_count: self.children.len(),
            child_preview: self
                .children
                .iter()
                .take(CHILD_PREVIEW_LEN)
                .map(|c| c.full_name.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(household_id: Uuid, name: &str, is_primary: bool) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            household_id,
            full_name: name.to_string(),
            phone: None,
            is_primary,
        }
    }

    fn child(household_id: Uuid, name: &str) -> Child {
        Child {
            id: Uuid::new_v4(),
            household_id,
            full_name: name.to_string(),
            birth_year: Some(2020),
            allergies: None,
        }
    }

    #[test]
    fn primary_contact_prefers_flagged_contact() {
        let id = Uuid::new_v4();
        let household = Household {
            id,
            family_name: "Nowak".to_string(),
            phone_last_four: "1234".to_string(),
            contacts: vec![contact(id, "Jan Nowak", false), contact(id, "Anna Nowak", true)],
            children: vec![],
        };

        assert_eq!(household.primary_contact().unwrap().full_name, "Anna Nowak");
    }

    #[test]
    fn primary_contact_falls_back_to_first() {
        let id = Uuid::new_v4();
        let household = Household {
            id,
            family_name: "Nowak".to_string(),
            phone_last_four: "1234".to_string(),
            contacts: vec![contact(id, "Jan Nowak", false)],
            children: vec![],
        };

        assert_eq!(household.primary_contact().unwrap().full_name, "Jan Nowak");
    }

    #[test]
    fn summary_previews_first_three_children() {
        let id = Uuid::new_v4();
        let household = Household {
            id,
            family_name: "Smith".to_string(),
            phone_last_four: "5678".to_string(),
            contacts: vec![],
            children: ["Amy", "Ben", "Cal", "Dot"]
                .iter()
                .map(|n| child(id, n))
                .collect(),
        };

        let summary = household.summary();
        assert_eq!(summary.child_count, 4);
        assert_eq!(summary.child_preview, vec!["Amy", "Ben", "Cal"]);
        assert_eq!(summary.primary_contact, None);
    }
}
