//! Input validation run before anything reaches the store

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::{
    models::{Guest, GuestProfile},
    security_code::is_valid_code,
    suggestion::age_from_birth_year,
};

/// Birth years implying an older age than this are typing mistakes
pub const MAX_PLAUSIBLE_AGE: i32 = 120;

/// Optional limits on the guest form beyond the required fields
///
/// Both are off unless configured.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GuestRules {
    /// Oldest a guest child may be
    pub max_age: Option<i32>,
    /// Fewest digits a parent phone may have
    pub min_phone_digits: Option<usize>,
}

/// Validate the four digits typed at the search screen
pub fn validate_phone_digits(digits: &str) -> Result<(), String> {
    if digits.is_empty() {
        return Err("Enter the last 4 digits of a phone number".to_string());
    }

    static DIGITS_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex =
        DIGITS_REGEX.get_or_init(|| Regex::new(r"^[0-9]{4}$").expect("Failed to compile digits regex"));

    if !regex.is_match(digits) {
        return Err("Enter exactly 4 digits".to_string());
    }

    Ok(())
}

/// Validate a security code typed at checkout
pub fn validate_security_code(code: &str) -> Result<(), String> {
    if code.is_empty() {
        return Err("Enter the 4 digit security code".to_string());
    }

    if !is_valid_code(code) {
        return Err("Security codes are exactly 4 digits".to_string());
    }

    Ok(())
}

/// Validate a parent phone number
pub fn validate_phone(phone: &str, min_digits: Option<usize>) -> Result<(), String> {
    if phone.trim().is_empty() {
        return Err("Parent phone is required".to_string());
    }

    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = PHONE_REGEX
        .get_or_init(|| Regex::new(r"^\+?[0-9()\-.\s]+$").expect("Failed to compile phone regex"));

    if !regex.is_match(phone.trim()) {
        return Err("Parent phone may only contain digits, spaces and + ( ) - .".to_string());
    }

    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if let Some(min_digits) = min_digits.filter(|min| digits < *min) {
        return Err(format!(
            "Parent phone must have at least {} digits",
            min_digits
        ));
    }

    Ok(())
}

/// Validate a birth year against the current year
pub fn validate_birth_year(
    birth_year: i32,
    current_year: i32,
    max_age: Option<i32>,
) -> Result<(), String> {
    if birth_year > current_year {
        return Err("Birth year cannot be in the future".to_string());
    }

    let age = age_from_birth_year(birth_year, current_year)
        .filter(|age| *age <= MAX_PLAUSIBLE_AGE)
        .ok_or_else(|| "Enter a valid birth year".to_string())?;

    if let Some(max_age) = max_age.filter(|max| age > *max) {
        return Err(format!("Guests must be {} or younger", max_age));
    }

    Ok(())
}

fn required(value: &str, field: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{} is required", field));
    }
    Ok(trimmed.to_string())
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Validate the guest form and the chosen location
///
/// Checks run in form order so the first missing field is reported.
pub fn validate_guest(
    profile: &GuestProfile,
    location_id: Option<Uuid>,
    current_year: i32,
    rules: &GuestRules,
) -> Result<Guest, String> {
    let name = required(&profile.name, "Child name")?;
    let birth_year = profile
        .birth_year
        .ok_or_else(|| "Birth year is required".to_string())?;
    validate_birth_year(birth_year, current_year, rules.max_age)?;
    let parent_name = required(&profile.parent_name, "Parent name")?;
    validate_phone(&profile.parent_phone, rules.min_phone_digits)?;
    if location_id.is_none() {
        return Err("Location is required".to_string());
    }

    Ok(Guest {
        name,
        birth_year,
        parent_name,
        parent_phone: profile.parent_phone.trim().to_string(),
        allergies: optional(&profile.allergies),
        notes: optional(&profile.notes),
    })
}
