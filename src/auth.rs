use crate::config::SessionConfig;
use crate::error::ClientError;
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Nurse,
    Admin,
}

impl Role {
    /// Parse a role claim. Accepts Spring-style `ROLE_` prefixes.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let raw = raw.strip_prefix("ROLE_").unwrap_or(raw);
        match raw.to_ascii_lowercase().as_str() {
            "patient" => Some(Role::Patient),
            "doctor" => Some(Role::Doctor),
            "nurse" => Some(Role::Nurse),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Role inferred from the account name, as the login screen does when
    /// the backend hands back no role.
    pub fn from_username(username: &str) -> Self {
        let lower = username.to_ascii_lowercase();
        if lower.contains("doctor") {
            Role::Doctor
        } else if lower.contains("nurse") {
            Role::Nurse
        } else if lower.contains("admin") {
            Role::Admin
        } else {
            Role::Patient
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionIdentity {
    pub username: String,
    pub role: Role,
}

impl SessionIdentity {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    pub fn is_patient(&self) -> bool {
        self.role == Role::Patient
    }
}

/// Claims the backend embeds in its session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Source of the bearer credential attached to outbound calls.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;

    fn authorization_header(&self) -> Option<String> {
        self.bearer_token().map(|token| format!("Bearer {}", token))
    }
}

#[derive(Debug, Clone)]
struct Session {
    identity: SessionIdentity,
    token: Option<String>,
}

/// Authenticated identity plus bearer credential.
///
/// Written only by login/restore and logout; read by every component that
/// talks to the backend.
#[derive(Debug, Default)]
pub struct SessionStore {
    session: RwLock<Option<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the store from configuration: a token wins over a bare
    /// username, and an empty config leaves the store logged out.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ClientError> {
        let store = Self::new();
        if let Some(raw) = config.token.as_deref().filter(|t| !t.trim().is_empty()) {
            let token = extract_bearer_token(Some(raw)).unwrap_or_else(|_| raw.trim().to_string());
            store.restore(&token)?;
        } else if let Some(username) = config.username.as_deref() {
            let role = match config.role.as_deref() {
                Some(raw) => Role::parse(raw)
                    .ok_or_else(|| ClientError::Session(format!("unknown role {:?}", raw)))?,
                None => Role::from_username(username),
            };
            store.login(SessionIdentity::new(username, role), None);
        }
        Ok(store)
    }

    pub fn login(&self, identity: SessionIdentity, token: Option<String>) {
        if let Ok(mut session) = self.session.write() {
            *session = Some(Session { identity, token });
        }
    }

    /// Restore a session from a backend-issued token.
    ///
    /// The client cannot check the signature (it does not hold the signing
    /// key); it reads the subject and role claims and rejects expired tokens.
    pub fn restore(&self, token: &str) -> Result<SessionIdentity, ClientError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = true;

        let claims = decode::<SessionClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|e| ClientError::Session(format!("token rejected: {}", e)))?;

        let role = claims
            .role
            .as_deref()
            .and_then(Role::parse)
            .unwrap_or_else(|| Role::from_username(&claims.sub));
        let identity = SessionIdentity::new(claims.sub, role);

        tracing::info!(
            role = ?identity.role,
            expires_in_secs = claims.exp - Utc::now().timestamp(),
            "Session restored from token"
        );
        self.login(identity.clone(), Some(token.to_string()));
        Ok(identity)
    }

    pub fn logout(&self) {
        if let Ok(mut session) = self.session.write() {
            *session = None;
        }
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.session
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.identity.clone()))
    }
}

impl CredentialProvider for SessionStore {
    fn bearer_token(&self) -> Option<String> {
        self.session
            .read()
            .ok()
            .and_then(|s| s.as_ref().and_then(|s| s.token.clone()))
    }
}

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(auth_header: Option<&str>) -> Result<String, ClientError> {
    match auth_header {
        Some(header) if header.starts_with("Bearer ") => {
            Ok(header.trim_start_matches("Bearer ").trim().to_string())
        }
        _ => Err(ClientError::Session("Missing or invalid Authorization header".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn issue(sub: &str, role: Option<&str>, exp_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: sub.to_string(),
            role: role.map(str::to_string),
            exp: now + exp_offset,
            iat: Some(now),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"backend_secret_key_minimum_32_chars_long"),
        )
        .expect("Token generation failed")
    }

    #[test]
    fn test_restore_reads_subject_and_role() {
        let store = SessionStore::new();
        let token = issue("dr_house", Some("doctor"), 3600);

        let identity = store.restore(&token).expect("Token should be accepted");

        assert_eq!(identity.username, "dr_house");
        assert_eq!(identity.role, Role::Doctor);
        assert_eq!(store.bearer_token(), Some(token.clone()));
        assert_eq!(store.authorization_header(), Some(format!("Bearer {}", token)));
    }

    #[test]
    fn test_restore_falls_back_to_username_role() {
        let store = SessionStore::new();
        let identity = store.restore(&issue("nurse_joy", None, 3600)).unwrap();
        assert_eq!(identity.role, Role::Nurse);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let store = SessionStore::new();
        let result = store.restore(&issue("patient_alpha", Some("patient"), -3600));

        assert!(result.is_err());
        assert!(store.identity().is_none());
    }

    #[test]
    fn test_invalid_token() {
        let store = SessionStore::new();
        assert!(store.restore("invalid.token.here").is_err());
    }

    #[test]
    fn test_logout_clears_credentials() {
        let store = SessionStore::new();
        store.login(SessionIdentity::new("p1", Role::Patient), Some("abc".to_string()));
        store.logout();

        assert!(store.identity().is_none());
        assert!(store.bearer_token().is_none());
    }

    #[test]
    fn test_from_config_username_only() {
        let config = SessionConfig {
            token: None,
            username: Some("doctor_who".to_string()),
            role: None,
            subject: None,
        };
        let store = SessionStore::from_config(&config).unwrap();
        assert_eq!(store.identity().map(|i| i.role), Some(Role::Doctor));
        assert!(store.bearer_token().is_none());
    }

    #[test]
    fn test_from_config_rejects_unknown_role() {
        let config = SessionConfig {
            token: None,
            username: Some("x".to_string()),
            role: Some("janitor".to_string()),
            subject: None,
        };
        assert!(SessionStore::from_config(&config).is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert!(extract_bearer_token(Some("Basic abc")).is_err());
        assert!(extract_bearer_token(None).is_err());
    }

    #[test]
    fn test_role_parse_accepts_spring_prefix() {
        assert_eq!(Role::parse("ROLE_ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("Patient"), Some(Role::Patient));
        assert_eq!(Role::parse("janitor"), None);
    }
}
