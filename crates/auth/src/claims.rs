//! Access token claims
//!
//! Tokens are decoded without verifying the signature. Verification is the
//! API's job; the client only needs `exp` and the user claims.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::types::{UserId, UserProfile, UserRole};

/// Claims carried by a VENTU access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<UserRole>,
}

impl AccessClaims {
    /// Decode the payload of `token`.
    pub fn decode(token: &str) -> Result<Self, AuthError> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
        Ok(data.claims)
    }

    /// True once `now + leeway` has reached `exp`.
    pub fn is_expired_at(&self, now: i64, leeway: i64) -> bool {
        now.saturating_add(leeway) >= self.exp
    }

    /// Build a profile from the claims alone, used when `/users/me/` fails.
    pub fn to_profile(&self) -> UserProfile {
        let username = self.username.clone().or_else(|| {
            self.email
                .as_deref()
                .and_then(|email| email.split('@').next())
                .map(str::to_string)
        });

        UserProfile {
            id: self.user_id.clone(),
            email: self.email.clone(),
            username,
            first_name: self.first_name.clone().unwrap_or_default(),
            last_name: self.last_name.clone().unwrap_or_default(),
            role: self.role.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Current Unix time in seconds
pub(crate) fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Whether `token` should be refreshed. Undecodable tokens count as expired.
pub(crate) fn needs_refresh(token: &str, leeway: i64) -> bool {
    match AccessClaims::decode(token) {
        Ok(claims) => claims.is_expired_at(now_timestamp(), leeway),
        Err(e) => {
            log::debug!("Stored access token could not be decoded, treating as expired: {}", e);
            true
        }
    }
}

/// Shortened token for log lines
pub(crate) fn preview(token: &str) -> String {
    let head: String = token.chars().take(10).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn token(payload: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &payload,
            &EncodingKey::from_secret(b"server-side-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_claims() {
        let exp = now_timestamp() + 600;
        let access = token(json!({
            "token_type": "access",
            "exp": exp,
            "user_id": 42,
            "email": "ana@example.com",
            "first_name": "Ana",
            "role": "TRAVELER"
        }));

        let claims = AccessClaims::decode(&access).unwrap();
        assert_eq!(claims.exp, exp);
        assert_eq!(claims.user_id, Some(UserId::Int(42)));
        assert_eq!(claims.role, Some(UserRole::Traveler));
        assert!(!needs_refresh(&access, 0));
    }

    #[test]
    fn test_expired_and_leeway() {
        let now = now_timestamp();
        let claims = AccessClaims {
            exp: now + 5,
            user_id: None,
            email: None,
            username: None,
            first_name: None,
            last_name: None,
            role: None,
        };
        assert!(!claims.is_expired_at(now, 0));
        assert!(claims.is_expired_at(now, 5));
        assert!(claims.is_expired_at(now + 6, 0));
        assert!(claims.is_expired_at(now, i64::MAX));
    }

    #[test]
    fn test_malformed_token_needs_refresh() {
        assert!(AccessClaims::decode("not-a-jwt").is_err());
        assert!(needs_refresh("not-a-jwt", 0));
        assert!(needs_refresh(&token(json!({"user_id": 1})), 0));
    }

    #[test]
    fn test_profile_from_claims() {
        let claims = AccessClaims {
            exp: 0,
            user_id: Some(UserId::Int(9)),
            email: Some("luis@example.com".into()),
            username: None,
            first_name: None,
            last_name: Some("Gil".into()),
            role: Some(UserRole::Operator),
        };

        let profile = claims.to_profile();
        assert_eq!(profile.id, Some(UserId::Int(9)));
        assert_eq!(profile.username.as_deref(), Some("luis"));
        assert_eq!(profile.last_name, "Gil");
        assert!(profile.is_operator());
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("abcdefghijklmnop"), "abcdefghij...");
    }
}
