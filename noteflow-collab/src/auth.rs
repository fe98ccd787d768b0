//! JWT-based identity for noteflow.
//!
//! Tokens are HS256 JWTs carrying the user id (`sub`) and display name
//! (`name`). [`KeyStore`] verifies them and supports key rotation via `kid`.
//! [`TokenAuth`] is the client-side [`AuthProvider`]; the daemon uses the
//! [`MaybeIdentity`] extractor.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use noteflow_types::UserIdentity;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// JWT claims structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Display name shown next to the user's cursor
    #[serde(default)]
    pub name: String,
    /// Expiry (Unix timestamp)
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    pub fn identity(&self) -> UserIdentity {
        let name = if self.name.is_empty() {
            self.sub.clone()
        } else {
            self.name.clone()
        };
        UserIdentity::new(self.sub.clone(), name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("unknown key id: {0}")]
    UnknownKeyId(String),

    #[error("not signed in")]
    SignedOut,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Holds signing keys for JWT verification.
/// Supports multiple keys via `kid` for rotation.
#[derive(Clone)]
pub struct KeyStore {
    keys: HashMap<String, DecodingKey>,
    /// Used when a token carries no kid
    default_kid: Option<String>,
    expected_aud: Option<String>,
    /// Clock skew leeway in seconds
    leeway_secs: u64,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            default_kid: None,
            expected_aud: None,
            leeway_secs: 60,
        }
    }

    /// Add a key with the given id and secret. The first key added becomes
    /// the default.
    pub fn add_key(&mut self, kid: impl Into<String>, secret: impl AsRef<[u8]>) {
        let kid = kid.into();
        let key = DecodingKey::from_secret(secret.as_ref());
        if self.default_kid.is_none() {
            self.default_kid = Some(kid.clone());
        }
        self.keys.insert(kid, key);
    }

    pub fn set_default_kid(&mut self, kid: impl Into<String>) {
        self.default_kid = Some(kid.into());
    }

    pub fn set_expected_aud(&mut self, aud: impl Into<String>) {
        self.expected_aud = Some(aud.into());
    }

    pub fn set_leeway(&mut self, secs: u64) {
        self.leeway_secs = secs;
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Decode and validate a JWT token.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        // Fail closed if no keys configured
        if self.keys.is_empty() {
            return Err(AuthError::InvalidToken("no keys configured".into()));
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let kid = header
            .kid
            .or_else(|| self.default_kid.clone())
            .ok_or_else(|| AuthError::InvalidToken("no key id and no default key".into()))?;

        let key = self
            .keys
            .get(&kid)
            .ok_or_else(|| AuthError::UnknownKeyId(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = self.leeway_secs;

        if let Some(ref aud) = self.expected_aud {
            validation.set_audience(&[aud]);
        } else {
            validation.validate_aud = false;
        }

        let token_data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                AuthError::InvalidToken("audience mismatch".into())
            }
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        Ok(token_data.claims)
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for authentication.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Secret for user tokens (env: NOTEFLOW_USER_SECRET)
    pub user_secret: Option<String>,
    pub expected_aud: Option<String>,
    /// Whether anonymous requests are rejected
    pub require_auth: bool,
}

impl AuthConfig {
    pub fn build_keystore(&self) -> KeyStore {
        let mut store = KeyStore::new();
        if let Some(ref secret) = self.user_secret {
            store.add_key("user", secret.as_bytes());
        }
        if let Some(ref aud) = self.expected_aud {
            store.set_expected_aud(aud);
        }
        store
    }
}

/// Who is signed in on this client.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserIdentity>;

    async fn sign_in(&self, credential: &str) -> Result<UserIdentity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// [`AuthProvider`] backed by a bearer token the client was handed.
pub struct TokenAuth {
    keystore: KeyStore,
    session: RwLock<Option<(String, UserIdentity)>>,
}

impl TokenAuth {
    pub fn new(keystore: KeyStore) -> Self {
        Self {
            keystore,
            session: RwLock::new(None),
        }
    }

    /// Raw token of the signed-in user, for bearer headers.
    pub fn token(&self) -> Option<String> {
        self.session.read().as_ref().map(|(token, _)| token.clone())
    }
}

#[async_trait]
impl AuthProvider for TokenAuth {
    fn current_user(&self) -> Option<UserIdentity> {
        self.session.read().as_ref().map(|(_, user)| user.clone())
    }

    async fn sign_in(&self, credential: &str) -> Result<UserIdentity, AuthError> {
        let claims = self.keystore.verify(credential)?;
        let identity = claims.identity();
        info!(user = %identity.id, "signed in");
        *self.session.write() = Some((credential.to_string(), identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        match self.session.write().take() {
            Some((_, user)) => {
                info!(user = %user.id, "signed out");
                Ok(())
            }
            None => Err(AuthError::SignedOut),
        }
    }
}

/// Verified caller identity, if any (used in routes that work with or
/// without auth).
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<UserIdentity>);

/// State extension that holds auth config
#[derive(Clone)]
pub struct AuthState {
    pub keystore: Arc<KeyStore>,
    pub require_auth: bool,
}

fn extract_bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(auth_state) = parts.extensions.get::<AuthState>().cloned() else {
            return Ok(MaybeIdentity(None));
        };

        let Some(token) = extract_bearer_token(parts) else {
            if auth_state.require_auth {
                return Err(AuthError::MissingToken);
            }
            return Ok(MaybeIdentity(None));
        };

        match auth_state.keystore.verify(token) {
            Ok(claims) => Ok(MaybeIdentity(Some(claims.identity()))),
            Err(e) => {
                warn!("auth failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Issue a user token, for tests and the CLI.
pub fn create_user_token(
    secret: &[u8],
    user: &UserIdentity,
    expires_in_secs: u64,
) -> Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = u64::try_from(chrono::Utc::now().timestamp())
        .map_err(|_| anyhow!("system clock before the epoch"))?;

    let claims = Claims {
        sub: user.id.clone(),
        name: user.display_name.clone(),
        exp: now + expires_in_secs,
        aud: None,
    };

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("user".to_string());

    encode(&header, &claims, &EncodingKey::from_secret(secret))
        .map_err(|e| anyhow!("failed to encode token: {}", e))
}
