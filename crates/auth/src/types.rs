//! Types exchanged with the VENTU auth endpoints

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The persisted credential pair. Serialized as `{"access": .., "refresh": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access: String,
    pub refresh: String,
}

impl AuthTokens {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

/// User id as issued by the API (integer primary key or string id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Int(i64),
    Str(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Int(id) => write!(f, "{}", id),
            UserId::Str(id) => f.write_str(id),
        }
    }
}

/// Account role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[default]
    Traveler,
    Operator,
    Admin,
    #[serde(other)]
    Unknown,
}

/// User profile as returned by `GET /users/me/`, or rebuilt from token claims
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role: UserRole,
    /// Any other fields the API sends (phone number, organization, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn is_operator(&self) -> bool {
        self.role == UserRole::Operator
    }

    /// "First Last", or the username/email when no name is set
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        self.username
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_default()
    }
}

/// The current authenticated session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub tokens: AuthTokens,
    pub user: Option<UserProfile>,
}

impl Session {
    pub fn access_token(&self) -> &str {
        &self.tokens.access
    }

    pub fn refresh_token(&self) -> &str {
        &self.tokens.refresh
    }
}

/// Login credentials for `POST /token/`
#[derive(Debug, Clone, Serialize)]
pub struct SignInCredentials {
    pub email: String,
    pub password: String,
}

/// Body of `POST /token/`. Both fields are checked before use.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

/// Body of `POST /token/refresh/`
#[derive(Debug, Deserialize)]
pub(crate) struct RefreshResponse {
    pub access: String,
}

/// Registration request for `POST /users/register/`
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(flatten)]
    pub profile: RegistrationProfile,
}

/// Role-specific registration fields. Only the fields of the chosen role are
/// sent, together with the `role` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationProfile {
    Traveler {
        #[serde(skip_serializing_if = "Option::is_none")]
        cedula: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
        can_contact_by_whatsapp: bool,
    },
    Operator {
        organization_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rif_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rif_number: Option<String>,
    },
}

impl RegistrationProfile {
    pub fn role(&self) -> UserRole {
        match self {
            RegistrationProfile::Traveler { .. } => UserRole::Traveler,
            RegistrationProfile::Operator { .. } => UserRole::Operator,
        }
    }
}

/// Response of `POST /users/register/`
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}
