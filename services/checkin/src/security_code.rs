//! Security codes
//!
//! A code is four decimal digits. It groups every ledger row written in
//! one check-in batch (one household, or one guest) so they print and
//! check out together. Codes are unique per session only; every lookup
//! is scoped by session id.

use tracing::info;
use uuid::Uuid;

use crate::{error::CheckinResult, store::CheckinStore};

/// Number of distinct codes per session
pub const CODE_SPACE: u32 = 10_000;

/// Random draws a store makes before giving up on a crowded session
pub const MAX_MINT_ATTEMPTS: usize = 50;

pub const CODE_LEN: usize = 4;

/// Zero-padded four digit rendering of `n`
pub fn format_code(n: u32) -> String {
    format!("{:04}", n % CODE_SPACE)
}

/// Whether `code` has the shape of a security code
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

/// Mint a fresh code for one check-in batch
///
/// Every batch gets its own code, even when the same household already
/// checked in earlier in the session.
pub async fn mint(
    store: &dyn CheckinStore,
    session_id: Uuid,
    household_id: Option<Uuid>,
) -> CheckinResult<String> {
    let code = store.generate_security_code(session_id, household_id).await?;
    info!(
        "Minted security code for session {} ({})",
        session_id,
        household_id.map_or_else(|| "guest".to_string(), |id| format!("household {}", id))
    );
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_zero_padded() {
        assert_eq!(format_code(7), "0007");
        assert_eq!(format_code(9999), "9999");
        assert_eq!(format_code(10_042), "0042");
    }

    #[test]
    fn code_shape() {
        assert!(is_valid_code("0420"));
        assert!(!is_valid_code("420"));
        assert!(!is_valid_code("04201"));
        assert!(!is_valid_code("04a0"));
        assert!(!is_valid_code("٠١٢٣"));
    }
}
