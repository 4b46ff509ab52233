//! Age-based location suggestion
//!
//! Advisory only: the operator can override the suggested room.

use crate::models::Location;

/// Age in whole years as check-in computes it
///
/// `None` when the difference does not fit in an `i32`.
pub fn age_from_birth_year(birth_year: i32, current_year: i32) -> Option<i32> {
    current_year.checked_sub(birth_year)
}

/// Suggest a location for a child born in `birth_year`
///
/// First active location whose inclusive age range contains the age,
/// else the first active location, else the first location. Returns
/// `None` only when `locations` is empty.
pub fn suggest_location(
    birth_year: i32,
    current_year: i32,
    locations: &[Location],
) -> Option<&Location> {
    let age = age_from_birth_year(birth_year, current_year);

    locations
        .iter()
        .find(|l| l.is_active && age.is_some_and(|age| l.accepts_age(age)))
        .or_else(|| locations.iter().find(|l| l.is_active))
        .or_else(|| locations.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn location(name: &str, min_age: Option<i32>, max_age: Option<i32>, is_active: bool) -> Location {
        Location {
            id: Uuid::new_v4(),
            name: name.to_string(),
            room_number: None,
            min_age,
            max_age,
            capacity: None,
            is_active,
            sort_order: 0,
        }
    }

    fn rooms() -> Vec<Location> {
        vec![
            location("Nursery", None, Some(0), true),
            location("Toddlers", Some(1), Some(3), true),
            location("Preschool", Some(4), Some(5), true),
            location("Elementary", Some(6), Some(11), true),
        ]
    }

    #[test]
    fn picks_first_matching_range() {
        let rooms = rooms();
        assert_eq!(suggest_location(2025, 2026, &rooms).unwrap().name, "Toddlers");
        assert_eq!(suggest_location(2022, 2026, &rooms).unwrap().name, "Preschool");
        assert_eq!(suggest_location(2026, 2026, &rooms).unwrap().name, "Nursery");
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let rooms = rooms();
        // age 1 and age 3 are both Toddlers
        assert_eq!(suggest_location(2025, 2026, &rooms).unwrap().name, "Toddlers");
        assert_eq!(suggest_location(2023, 2026, &rooms).unwrap().name, "Toddlers");
        assert_eq!(suggest_location(2020, 2026, &rooms).unwrap().name, "Elementary");
        assert_eq!(suggest_location(2015, 2026, &rooms).unwrap().name, "Elementary");
    }

    #[test]
    fn falls_back_to_first_active() {
        let rooms = vec![
            location("Closed", Some(12), Some(14), false),
            location("Toddlers", Some(1), Some(3), true),
        ];
        assert_eq!(suggest_location(2000, 2026, &rooms).unwrap().name, "Toddlers");
    }

    #[test]
    fn inactive_rooms_are_not_matched_by_range() {
        let rooms = vec![
            location("Old Toddlers", Some(1), Some(3), false),
            location("Big Kids", Some(6), None, true),
        ];
        assert_eq!(suggest_location(2024, 2026, &rooms).unwrap().name, "Big Kids");
    }

    #[test]
    fn falls_back_to_first_overall() {
        let rooms = vec![
            location("Closed A", Some(1), Some(3), false),
            location("Closed B", Some(4), Some(5), false),
        ];
        assert_eq!(suggest_location(1990, 2026, &rooms).unwrap().name, "Closed A");
    }

    #[test]
    fn total_for_any_birth_year() {
        let rooms = rooms();
        for birth_year in 1900..2100 {
            assert!(suggest_location(birth_year, 2026, &rooms).is_some());
        }
        assert!(suggest_location(2020, 2026, &[]).is_none());
    }

    #[test]
    fn extreme_birth_years_fall_back() {
        let rooms = vec![
            location("Closed", None, None, false),
            location("Toddlers", Some(1), Some(3), true),
            location("Anyone", None, None, true),
        ];
        // Overflowing ages match no range, not even an unbounded one
        assert_eq!(suggest_location(i32::MIN, 2026, &rooms).unwrap().name, "Toddlers");
        assert_eq!(suggest_location(i32::MAX, -2, &rooms).unwrap().name, "Toddlers");
        // Huge but representable ages still match unbounded rooms
        assert_eq!(suggest_location(i32::MAX, 2026, &rooms).unwrap().name, "Anyone");
        assert_eq!(age_from_birth_year(i32::MIN, 2026), None);
        assert_eq!(age_from_birth_year(2020, 2026), Some(6));
    }
}
