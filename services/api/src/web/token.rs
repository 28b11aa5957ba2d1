//! services/api/src/web/token.rs
//!
//! Issues and verifies the HMAC-signed bearer tokens that gate WebSocket
//! connections and stateless HTTP requests.
//!
//! A token is `base64url(claims JSON) . base64url(HMAC-SHA256(payload))`,
//! signed with the configured secret. Verification is pure: signature and
//! expiry only, no storage lookups.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// The decoded, verified payload of a bearer credential.
/// Never persisted; lives for one connection or one HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaim {
    pub user_id: i64,
    pub email: String,
    /// Issued-at (Unix timestamp, seconds).
    pub iat: i64,
    /// Expiry (Unix timestamp, seconds).
    pub exp: i64,
}

/// Authentication failures. All of these are fatal to the connection or
/// request they occur on; none are retried.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No credential supplied")]
    MissingToken,
    #[error("Credential signature is invalid")]
    InvalidToken,
    #[error("Credential has expired")]
    ExpiredToken,
    #[error("Credential could not be verified: {0}")]
    AuthFailure(String),
}

/// Signs a fresh token for the given identity.
pub fn issue(user_id: i64, email: &str, secret: &str, ttl: Duration) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    let claims = IdentityClaim {
        user_id,
        email: email.to_string(),
        iat: now,
        exp: now + ttl.as_secs() as i64,
    };

    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&claims).map_err(|e| AuthError::AuthFailure(e.to_string()))?,
    );
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AuthError::AuthFailure(e.to_string()))?;
    mac.update(payload.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{payload}.{signature}"))
}

/// Verifies a raw bearer credential and extracts its identity claim.
///
/// Accepts the token with or without a `Bearer ` scheme prefix. Fails with
/// `MissingToken` when absent, `InvalidToken` on signature mismatch,
/// `ExpiredToken` past expiry, and `AuthFailure` for any other
/// verification fault.
pub fn authenticate(raw: Option<&str>, secret: &str) -> Result<IdentityClaim, AuthError> {
    let raw = raw.map(str::trim).filter(|t| !t.is_empty());
    let Some(raw) = raw else {
        return Err(AuthError::MissingToken);
    };
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw);

    let (payload, signature) = token
        .split_once('.')
        .ok_or_else(|| AuthError::AuthFailure("malformed token".to_string()))?;

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| AuthError::AuthFailure(e.to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AuthError::AuthFailure(e.to_string()))?;
    mac.update(payload.as_bytes());
    if mac.verify_slice(&signature_bytes).is_err() {
        return Err(AuthError::InvalidToken);
    }

    let claims_json = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::AuthFailure(e.to_string()))?;
    let claims: IdentityClaim = serde_json::from_slice(&claims_json)
        .map_err(|e| AuthError::AuthFailure(e.to_string()))?;

    if claims.exp < Utc::now().timestamp() {
        return Err(AuthError::ExpiredToken);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_verifies_round_trip() {
        let token = issue(42, "kim@example.com", SECRET, Duration::from_secs(3600)).unwrap();
        let claims = authenticate(Some(&token), SECRET).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.email, "kim@example.com");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn bearer_scheme_prefix_is_stripped() {
        let token = issue(7, "a@b.c", SECRET, Duration::from_secs(3600)).unwrap();
        let claims = authenticate(Some(&format!("Bearer {token}")), SECRET).unwrap();
        assert_eq!(claims.user_id, 7);
    }

    #[test]
    fn absent_or_blank_token_is_missing() {
        assert!(matches!(
            authenticate(None, SECRET),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            authenticate(Some("   "), SECRET),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let token = issue(7, "a@b.c", SECRET, Duration::from_secs(3600)).unwrap();
        let (payload, signature) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&IdentityClaim {
                user_id: 8,
                email: "a@b.c".to_string(),
                iat: 0,
                exp: i64::MAX,
            })
            .unwrap(),
        );
        assert!(payload != forged_payload);
        let forged = format!("{forged_payload}.{signature}");
        assert!(matches!(
            authenticate(Some(&forged), SECRET),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_invalid() {
        let token = issue(7, "a@b.c", "other-secret", Duration::from_secs(3600)).unwrap();
        assert!(matches!(
            authenticate(Some(&token), SECRET),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue(7, "a@b.c", SECRET, Duration::ZERO).unwrap();
        // exp == iat; anything issued with a zero TTL is already stale.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(matches!(
            authenticate(Some(&token), SECRET),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn garbage_token_is_a_generic_auth_failure() {
        assert!(matches!(
            authenticate(Some("not-a-token"), SECRET),
            Err(AuthError::AuthFailure(_))
        ));
    }
}
