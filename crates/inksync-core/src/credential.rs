//! Bearer credential checks.
//!
//! The token is JWT-shaped (`header.payload.signature`). Only the payload
//! claims are inspected here; signature verification belongs to the
//! backend that issued the token.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Malformed credential: {0}")]
    Malformed(String),
    #[error("Credential has no subject")]
    MissingSubject,
    #[error("Credential role {found:?} does not match required role {required:?}")]
    WrongRole { required: String, found: Option<String> },
    #[error("Credential expired at {expired_at}")]
    Expired { expired_at: u64 },
}

/// Verified claims. `sub` is the owner identity for cloud writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    /// Unix seconds.
    pub exp: u64,
}

#[derive(Deserialize)]
struct RawClaims {
    sub: Option<String>,
    role: Option<String>,
    exp: Option<u64>,
}

fn decode_payload(token: &str) -> Result<RawClaims, CredentialError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => {
            return Err(CredentialError::Malformed(
                "expected three dot-separated segments".to_string(),
            ));
        }
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| CredentialError::Malformed(format!("payload is not base64url: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CredentialError::Malformed(format!("payload is not JSON claims: {}", e)))
}

/// Check subject, role and expiry of `token` at `now_secs`.
pub fn validate(token: &str, required_role: &str, now_secs: u64) -> Result<Claims, CredentialError> {
    let raw = decode_payload(token)?;

    let sub = raw
        .sub
        .filter(|s| !s.trim().is_empty())
        .ok_or(CredentialError::MissingSubject)?;

    let role = match raw.role {
        Some(role) if role == required_role => role,
        found => {
            return Err(CredentialError::WrongRole {
                required: required_role.to_string(),
                found,
            });
        }
    };

    let exp = raw
        .exp
        .ok_or_else(|| CredentialError::Malformed("missing exp claim".to_string()))?;
    if exp <= now_secs {
        return Err(CredentialError::Expired { expired_at: exp });
    }

    Ok(Claims { sub, role, exp })
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    crate::version::now_millis() / 1000
}

#[cfg(test)]
pub(crate) fn make_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_valid_token() {
        let token = make_token(&json!({"sub": "user-1", "role": "authenticated", "exp": NOW + 60}));
        let claims = validate(&token, "authenticated", NOW).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.exp, NOW + 60);
    }

    #[test]
    fn test_malformed_token() {
        assert!(matches!(
            validate("not-a-token", "authenticated", NOW),
            Err(CredentialError::Malformed(_))
        ));
        assert!(matches!(
            validate("a.!!!.c", "authenticated", NOW),
            Err(CredentialError::Malformed(_))
        ));
        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("hello"));
        assert!(matches!(
            validate(&not_json, "authenticated", NOW),
            Err(CredentialError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_subject() {
        let token = make_token(&json!({"role": "authenticated", "exp": NOW + 60}));
        assert_eq!(
            validate(&token, "authenticated", NOW),
            Err(CredentialError::MissingSubject)
        );
        let blank = make_token(&json!({"sub": " ", "role": "authenticated", "exp": NOW + 60}));
        assert_eq!(
            validate(&blank, "authenticated", NOW),
            Err(CredentialError::MissingSubject)
        );
    }

    #[test]
    fn test_wrong_role() {
        let token = make_token(&json!({"sub": "u", "role": "anon", "exp": NOW + 60}));
        assert_eq!(
            validate(&token, "authenticated", NOW),
            Err(CredentialError::WrongRole {
                required: "authenticated".to_string(),
                found: Some("anon".to_string()),
            })
        );
    }

    #[test]
    fn test_expired() {
        let token = make_token(&json!({"sub": "u", "role": "authenticated", "exp": NOW}));
        assert_eq!(
            validate(&token, "authenticated", NOW),
            Err(CredentialError::Expired { expired_at: NOW })
        );
    }

    #[test]
    fn test_padded_payload_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE
            .encode(json!({"sub": "u", "role": "authenticated", "exp": NOW + 1}).to_string());
        let token = format!("h.{}.s", payload);
        assert!(validate(&token, "authenticated", NOW).is_ok());
    }
}
