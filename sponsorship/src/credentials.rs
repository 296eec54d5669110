//! Authentication of store requests.
//!
//! Service account keys are exchanged for short lived OAuth2 access tokens
//! with a signed JWT assertion. The token is cached and refreshed shortly
//! before it expires.

use crate::config::StoreCredentials;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &str =
    "https://www.googleapis.com/auth/firebase.database https://www.googleapis.com/auth/userinfo.email";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum CredentialsError {
    #[error("could not read service account key: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse service account key: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid service account private key: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),
    #[error("token exchange failed: {0}")]
    Exchange(#[from] reqwest::Error),
    #[error("token endpoint answered {0}")]
    Rejected(reqwest::StatusCode),
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

pub struct ServiceAccount {
    client: reqwest::Client,
    client_email: String,
    token_uri: String,
    key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
    ready: AtomicBool,
}

impl ServiceAccount {
    pub fn from_file(path: &Path, client: reqwest::Client) -> Result<Self, CredentialsError> {
        let data = std::fs::read(path)?;
        let key: ServiceAccountKey = serde_json::from_slice(&data)?;
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;

        Ok(ServiceAccount {
            client,
            client_email: key.client_email,
            token_uri: key
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            key: encoding_key,
            cached: Mutex::new(None),
            ready: AtomicBool::new(false),
        })
    }

    /// Returns a valid access token, exchanging a new assertion if the cached
    /// one is missing or about to expire.
    pub async fn access_token(&self) -> Result<String, CredentialsError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.access_token.clone());
        }

        let token = self.exchange().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        self.ready.store(true, Ordering::Relaxed);

        Ok(access_token)
    }

    async fn exchange(&self) -> Result<CachedToken, CredentialsError> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: SCOPES,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)?;

        let requested_at = Instant::now();
        let response = self
            .client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::error!(
                status = %response.status(),
                client_email = %self.client_email,
                "Service account token exchange rejected"
            );
            return Err(CredentialsError::Rejected(response.status()));
        }

        let token = response.json::<TokenResponse>().await?;
        tracing::debug!(expires_in = token.expires_in, "Obtained store access token");

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: requested_at + lifetime,
        })
    }
}

/// Credentials attached to every store request.
pub enum Credentials {
    None,
    DatabaseSecret(String),
    ServiceAccount(ServiceAccount),
}

impl Credentials {
    pub fn from_config(
        config: &StoreCredentials,
        client: reqwest::Client,
    ) -> Result<Self, CredentialsError> {
        Ok(match config {
            StoreCredentials::None => Credentials::None,
            StoreCredentials::DatabaseSecret { secret } => {
                Credentials::DatabaseSecret(secret.clone())
            }
            StoreCredentials::ServiceAccount { path } => {
                Credentials::ServiceAccount(ServiceAccount::from_file(path, client)?)
            }
        })
    }

    /// Query parameter that authenticates a request, if any.
    pub async fn query_param(&self) -> Result<Option<(&'static str, String)>, CredentialsError> {
        match self {
            Credentials::None => Ok(None),
            Credentials::DatabaseSecret(secret) => Ok(Some(("auth", secret.clone()))),
            Credentials::ServiceAccount(account) => {
                Ok(Some(("access_token", account.access_token().await?)))
            }
        }
    }

    /// Service accounts are ready once a token has been obtained.
    pub fn is_ready(&self) -> bool {
        match self {
            Credentials::ServiceAccount(account) => account.ready.load(Ordering::Relaxed),
            _ => true,
        }
    }
}
