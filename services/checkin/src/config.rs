//! Service settings
//!
//! Defaults overlaid by `CHECKIN_*` environment variables, e.g.
//! `CHECKIN_BIND_ADDRESS=0.0.0.0:8080` or
//! `CHECKIN_SESSION__START_TIME=10:30:00`.

use chrono::NaiveTime;
use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::validation::GuestRules;

/// Settings for the check-in service
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Changes buffered per ledger subscriber before it lags
    pub feed_capacity: usize,
    /// RS256 public key used to verify operator tokens, PEM text or a path
    pub jwt_public_key: Option<String>,
    pub session: SessionDefaults,
    /// Extra guest form limits, e.g. `CHECKIN_GUEST__MAX_AGE=18`
    #[serde(default)]
    pub guest: GuestRules,
}

/// Times used when a session has to be created on the fly
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionDefaults {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .set_default("bind_address", "0.0.0.0:3002")?
            .set_default("feed_capacity", 256_i64)?
            .set_default("session.start_time", "09:00:00")?
            .set_default("session.end_time", "12:00:00")?
            .add_source(
                Environment::with_prefix("CHECKIN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if settings.session.end_time <= settings.session.start_time {
            return Err(ConfigError::Message(
                "session.end_time must be after session.start_time".to_string(),
            ));
        }

        Ok(settings)
    }

    /// The PEM text of the token verification key
    ///
    /// Values that do not look like PEM are read as a file path.
    pub fn jwt_public_key_pem(&self) -> Result<String, ConfigError> {
        let key = self.jwt_public_key.as_deref().ok_or_else(|| {
            ConfigError::Message("CHECKIN_JWT_PUBLIC_KEY is not set".to_string())
        })?;

        if key.trim_start().starts_with("-----BEGIN") {
            return Ok(key.to_string());
        }

        std::fs::read_to_string(key)
            .map(|pem| pem.trim().to_string())
            .map_err(|e| ConfigError::Message(format!("Failed to read public key file: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        unsafe {
            std::env::remove_var("CHECKIN_BIND_ADDRESS");
            std::env::remove_var("CHECKIN_FEED_CAPACITY");
            std::env::remove_var("CHECKIN_JWT_PUBLIC_KEY");
            std::env::remove_var("CHECKIN_SESSION__START_TIME");
            std::env::remove_var("CHECKIN_SESSION__END_TIME");
            std::env::remove_var("CHECKIN_GUEST__MAX_AGE");
            std::env::remove_var("CHECKIN_GUEST__MIN_PHONE_DIGITS");
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_without_environment() {
        clear_env();

        let settings = Settings::load().unwrap();
        assert_eq!(settings.bind_address, "0.0.0.0:3002");
        assert_eq!(settings.feed_capacity, 256);
        assert_eq!(settings.jwt_public_key, None);
        assert_eq!(
            settings.session.start_time,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap()
        );
        assert_eq!(
            settings.session.end_time,
            NaiveTime::from_hms_opt(12, 0, 0).unwrap()
        );
        assert_eq!(settings.guest, GuestRules::default());
    }

    #[test]
    #[serial]
    fn guest_rules_come_from_environment() {
        clear_env();
        unsafe {
            std::env::set_var("CHECKIN_GUEST__MAX_AGE", "18");
            std::env::set_var("CHECKIN_GUEST__MIN_PHONE_DIGITS", "7");
        }

        let settings = Settings::load().unwrap();
        assert_eq!(settings.guest.max_age, Some(18));
        assert_eq!(settings.guest.min_phone_digits, Some(7));

        clear_env();
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        clear_env();
        unsafe {
            std::env::set_var("CHECKIN_BIND_ADDRESS", "127.0.0.1:9000");
            std::env::set_var("CHECKIN_FEED_CAPACITY", "32");
            std::env::set_var("CHECKIN_SESSION__START_TIME", "10:30:00");
        }

        let settings = Settings::load().unwrap();
        assert_eq!(settings.bind_address, "127.0.0.1:9000");
        assert_eq!(settings.feed_capacity, 32);
        assert_eq!(
            settings.session.start_time,
            NaiveTime::from_hms_opt(10, 30, 0).unwrap()
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn rejects_session_ending_before_it_starts() {
        clear_env();
        unsafe {
            std::env::set_var("CHECKIN_SESSION__END_TIME", "08:00:00");
        }

        assert!(Settings::load().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn inline_pem_is_used_as_is() {
        clear_env();
        unsafe {
            std::env::set_var(
                "CHECKIN_JWT_PUBLIC_KEY",
                "-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----",
            );
        }

        let settings = Settings::load().unwrap();
        assert!(settings.jwt_public_key_pem().unwrap().starts_with("-----BEGIN"));

        clear_env();
    }
}
