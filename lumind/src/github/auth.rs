//! GitHub App authentication.
//!
//! The App signs a short-lived RS256 JWT with its private key and exchanges it
//! for an installation access token, which is then used for the archive and
//! check-run calls. Tokens are cached per installation until shortly before
//! they expire.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use super::FetchError;

/// GitHub rejects App JWTs valid for more than ten minutes.
const JWT_LIFETIME_SECS: i64 = 9 * 60;

/// Backdate `iat` to tolerate clock drift between us and GitHub.
const JWT_CLOCK_SKEW_SECS: i64 = 60;

/// Refresh cached installation tokens this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl AppClaims {
    pub fn new(app_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            iat: (now - ChronoDuration::seconds(JWT_CLOCK_SKEW_SECS)).timestamp(),
            exp: (now + ChronoDuration::seconds(JWT_LIFETIME_SECS)).timestamp(),
            iss: app_id.to_string(),
        }
    }
}

/// App id plus parsed private key.
#[derive(Clone)]
pub struct AppCredentials {
    app_id: u64,
    key: EncodingKey,
}

impl AppCredentials {
    /// Parse a PEM-encoded RSA private key.
    ///
    /// Keys copied into environment variables often carry literal `\n`
    /// sequences instead of newlines; those are unescaped first.
    pub fn from_pem(app_id: u64, pem: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        let pem = pem.replace("\\n", "\n");
        let key = EncodingKey::from_rsa_pem(pem.trim().as_bytes())?;
        Ok(Self { app_id, key })
    }

    pub fn app_id(&self) -> u64 {
        self.app_id
    }

    /// Sign an App JWT valid from `now`.
    pub fn app_jwt(&self, now: DateTime<Utc>) -> Result<String, FetchError> {
        let claims = AppClaims::new(self.app_id, now);
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| FetchError::Auth(format!("failed to sign app JWT: {e}")))
    }
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("key", &"***")
            .finish()
    }
}

/// Installation access token as returned by
/// `POST /app/installations/{id}/access_tokens`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl InstallationToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Per-installation token cache.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<u64, InstallationToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token for `installation_id`, if it is not about to expire.
    pub fn get(&self, installation_id: u64, now: DateTime<Utc>) -> Option<String> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        tokens
            .get(&installation_id)
            .filter(|token| token.is_fresh(now))
            .map(|token| token.token.clone())
    }

    pub fn insert(&self, installation_id: u64, token: InstallationToken) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert(installation_id, token);
    }

    /// Drop a token the host rejected.
    pub fn invalidate(&self, installation_id: u64) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&installation_id);
    }
}
