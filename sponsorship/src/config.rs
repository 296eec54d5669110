use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Route prefix must start with '/': {0}")]
    InvalidRoutePrefix(String),

    #[error("Bearer token signing key is empty")]
    EmptySigningKey,

    #[error("Basic auth username is empty")]
    EmptyUsername,

    #[error("Default collection path is empty")]
    EmptyDefaultCollection,
}

/// How identifier tokens that are not unsigned integers are treated.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierParsing {
    /// Unparsable tokens become 0, out-of-range tokens saturate.
    #[default]
    Lenient,
    /// Unparsable tokens reject the whole request.
    Strict,
}

/// Sponsorship service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for the public HTTP API
    #[serde(default)]
    pub listener: Listener,
    /// Listener for health and readiness probes
    #[serde(default = "Listener::admin_default")]
    pub admin_listener: Listener,
    /// Path prefix for every public route, e.g. "/urwaldpate"
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
    #[serde(default)]
    pub identifiers: IdentifierParsing,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if !self.route_prefix.starts_with('/') {
            return Err(ValidationError::InvalidRoutePrefix(
                self.route_prefix.clone(),
            ));
        }

        if self.auth.signing_key.is_empty() {
            return Err(ValidationError::EmptySigningKey);
        }

        if self.auth.basic.username.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }

        if self.store.default_collection.trim_matches('/').is_empty() {
            return Err(ValidationError::EmptyDefaultCollection);
        }

        Ok(())
    }

    /// Route prefix without a trailing slash, so "/" becomes "".
    pub fn normalized_prefix(&self) -> &str {
        self.route_prefix.trim_end_matches('/')
    }
}

fn default_route_prefix() -> String {
    "/urwaldpate".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }

    fn admin_default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3001,
        }
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Credentials used to talk to the document store.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum StoreCredentials {
    /// Unauthenticated access, for emulators and tests
    None,
    /// Legacy database secret passed as the `auth` query parameter
    DatabaseSecret { secret: String },
    /// Google service account key file exchanged for OAuth2 access tokens
    ServiceAccount { path: PathBuf },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Base URL of the realtime database, e.g. "https://example.firebaseio.com"
    pub url: Url,
    pub credentials: StoreCredentials,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Collection used when the request names no area
    #[serde(default = "default_collection")]
    pub default_collection: String,
    /// Parent of the per-area collections: `<areas_root>/<area>/features`
    #[serde(default = "default_areas_root")]
    pub areas_root: String,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_collection() -> String {
    "biesenthalerbecken/features".into()
}

fn default_areas_root() -> String {
    "wildnispate".into()
}

fn default_max_conflict_retries() -> u32 {
    3
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// HMAC key that bearer tokens are signed with
    pub signing_key: String,
    pub basic: BasicAuthConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
    #[serde(default = "default_realm")]
    pub realm: String,
}

fn default_realm() -> String {
    "urwaldpate".into()
}

/// Where uploaded datasets end up.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum UploadTarget {
    /// Raw bytes are sent with HTTP PUT to an external endpoint
    Relay { url: Url },
    /// The document is written to the store under `<root>/<projectname>`
    Store { root: String },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UploadConfig {
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,
    #[serde(default = "default_upload_target")]
    pub target: UploadTarget,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            static_dir: default_static_dir(),
            max_size_bytes: default_max_size_bytes(),
            target: default_upload_target(),
        }
    }
}

fn default_static_dir() -> PathBuf {
    "static".into()
}

fn default_max_size_bytes() -> usize {
    10 << 20
}

fn default_upload_target() -> UploadTarget {
    UploadTarget::Store {
        root: default_areas_root(),
    }
}
