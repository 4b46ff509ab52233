//! Operator authentication
//!
//! Every check-in route needs a Bearer JWT. The token subject is the
//! operator id that ends up in `checked_in_by` / `checked_out_by`.

use axum::{
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{error::CheckinError, models::Operator, state::AppState};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Operator ID
    pub sub: Uuid,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
}

/// Verifies operator tokens
pub struct OperatorAuth {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl OperatorAuth {
    /// Verify RS256 tokens against a PEM public key
    pub fn rs256(public_key_pem: &str) -> Result<Self, CheckinError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes()).map_err(|e| {
            error!("Failed to create decoding key: {}", e);
            CheckinError::Internal(format!("invalid JWT public key: {}", e))
        })?;
        Ok(Self::new(decoding_key, Algorithm::RS256))
    }

    /// Verify HS256 tokens signed with a shared secret
    pub fn hs256(secret: &[u8]) -> Self {
        Self::new(DecodingKey::from_secret(secret), Algorithm::HS256)
    }

    fn new(decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        Self {
            decoding_key,
            validation,
        }
    }

    /// Decode a token into the operator it was issued to
    pub fn verify(&self, token: &str) -> Result<Operator, CheckinError> {
        let token_data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                warn!("Rejected operator token: {}", e);
                CheckinError::Unauthorized
            })?;

        Ok(Operator::new(token_data.claims.sub))
    }
}

/// The token of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware
///
/// Inserts the verified [`Operator`] into the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, CheckinError> {
    let token = bearer_token(req.headers()).ok_or(CheckinError::Unauthorized)?;
    let operator = state.auth.verify(token)?;

    req.extensions_mut().insert(operator);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn now() -> u64 {
        chrono::Utc::now().timestamp() as u64
    }

    fn token(secret: &[u8], sub: Uuid, exp: u64) -> String {
        let claims = Claims {
            sub,
            iat: now(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn valid_token_yields_operator() {
        let auth = OperatorAuth::hs256(b"station-secret");
        let operator_id = Uuid::new_v4();

        let operator = auth
            .verify(&token(b"station-secret", operator_id, now() + 600))
            .unwrap();
        assert_eq!(operator.id, operator_id);
    }

    #[test]
    fn wrong_key_or_expired_token_is_rejected() {
        let auth = OperatorAuth::hs256(b"station-secret");

        let forged = token(b"other-secret", Uuid::new_v4(), now() + 600);
        assert!(matches!(auth.verify(&forged), Err(CheckinError::Unauthorized)));

        let expired = token(b"station-secret", Uuid::new_v4(), now() - 3600);
        assert!(matches!(auth.verify(&expired), Err(CheckinError::Unauthorized)));
    }
}
