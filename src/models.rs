use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tokens and user record of the current login.
///
/// `authenticated` holds exactly when both an access token and a user are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(
        default,
        serialize_with = "serialize_secret_option",
        deserialize_with = "deserialize_secret_option"
    )]
    pub access_token: Option<SecretString>,
    #[serde(
        default,
        serialize_with = "serialize_secret_option",
        deserialize_with = "deserialize_secret_option"
    )]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some() && self.user.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(u64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(id) => write!(f, "{}", id),
            UserId::Text(id) => write!(f, "{}", id),
        }
    }
}

/// Authenticated user as returned by the login and `/users/me` endpoints.
///
/// Fields the client does not know about are kept in `extra` so that a stored
/// session round-trips whatever the backend sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.has_role(role.as_ref()))
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

// --- 認証APIのリクエスト/レスポンス ---
#[derive(Debug, Clone, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    #[serde(serialize_with = "serialize_secret")]
    pub password: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(deserialize_with = "deserialize_secret")]
    pub access_token: SecretString,
    #[serde(default, deserialize_with = "deserialize_secret_option")]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    #[serde(deserialize_with = "deserialize_secret")]
    pub access_token: SecretString,
    #[serde(default, deserialize_with = "deserialize_secret_option")]
    pub refresh_token: Option<SecretString>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub valid: bool,
}

/// First characters of a token, safe to put in logs.
pub fn token_preview(token: &SecretString) -> String {
    let token = token.expose_secret();
    if token.len() > 12 {
        let cut = token
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(token.len());
        format!("{}...", &token[..cut])
    } else {
        "***".to_string()
    }
}

// Custom serialization for SecretString
pub fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::ser::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

pub fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

// Custom serialization for Option<SecretString>
pub fn serialize_secret_option<S>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::ser::Serializer,
{
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize_secret_option<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.map(SecretString::new))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        serde_json::from_str(
            r#"{
                "id": 7,
                "username": "admin",
                "email": "admin@example.com",
                "roles": ["admin", "editor"],
                "permissions": ["menu:write"],
                "department": "IT"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_user_deserialization_keeps_unknown_fields() {
        let user = sample_user();
        assert_eq!(user.id, Some(UserId::Number(7)));
        assert_eq!(user.username, "admin");
        assert!(user.has_role("editor"));
        assert!(!user.has_role("viewer"));
        assert!(user.has_any_role(&["viewer", "admin"]));
        assert!(user.has_permission("menu:write"));
        assert_eq!(user.extra.get("department").unwrap(), "IT");
    }

    #[test]
    fn test_user_with_string_id_and_missing_lists() {
        let user: User = serde_json::from_str(r#"{"id": "u-1", "username": "guest"}"#).unwrap();
        assert_eq!(user.id.as_ref().unwrap().to_string(), "u-1");
        assert!(user.roles.is_empty());
        assert!(user.permissions.is_empty());
    }

    #[test]
    fn test_session_serialization() {
        let session = Session {
            access_token: Some(SecretString::new("access".to_string())),
            refresh_token: Some(SecretString::new("refresh".to_string())),
            user: Some(sample_user()),
            updated_at: None,
        };

        let serialized = serde_json::to_string(&session).unwrap();
        assert!(serialized.contains("\"access_token\":\"access\""));

        let deserialized: Session = serde_json::from_str(&serialized).unwrap();
        assert!(deserialized.is_authenticated());
        assert_eq!(
            deserialized.refresh_token.unwrap().expose_secret(),
            "refresh"
        );
    }

    #[test]
    fn test_session_missing_fields_default_to_empty() {
        let session: Session = serde_json::from_str("{}").unwrap();
        assert!(session.is_empty());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_session_debug_does_not_leak_tokens() {
        let session = Session {
            access_token: Some(SecretString::new("super-secret-token".to_string())),
            ..Default::default()
        };
        assert!(!format!("{:?}", session).contains("super-secret-token"));
    }

    #[test]
    fn test_refresh_response_without_rotation() {
        let response: RefreshResponse = serde_json::from_str(r#"{"access_token": "T2"}"#).unwrap();
        assert_eq!(response.access_token.expose_secret(), "T2");
        assert!(response.refresh_token.is_none());
    }

    #[test]
    fn test_token_preview() {
        let long = SecretString::new("abcdefghijklmnop".to_string());
        assert_eq!(token_preview(&long), "abcdefgh...");
        let short = SecretString::new("short".to_string());
        assert_eq!(token_preview(&short), "***");
    }
}
