//! Request authentication: HMAC-signed bearer tokens for the assignment
//! endpoint, HTTP basic auth for the upload pages.

use crate::config::AuthConfig;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use sha2::Sha256;
use std::collections::HashSet;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Header the bearer token has historically been sent in.
const TOKEN_HEADER: &str = "token";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("no credentials supplied")]
    Missing,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("invalid credentials")]
    InvalidCredentials,
}

pub struct Authenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    username: String,
    password_mac: HmacSha256,
    password_tag: Vec<u8>,
    challenge: HeaderValue,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // Tokens carry no mandatory claims; exp and nbf are checked when present.
        validation.required_spec_claims = HashSet::new();
        validation.validate_nbf = true;
        validation.validate_aud = false;

        // Passwords are compared as MACs so the comparison runs in constant
        // time regardless of where the inputs differ.
        let password_mac = HmacSha256::new_from_slice(config.signing_key.as_bytes())
            .expect("HMAC can take key of any size");
        let password_tag = password_mac
            .clone()
            .chain_update(config.basic.password.as_bytes())
            .finalize()
            .into_bytes()
            .to_vec();

        let realm = config.basic.realm.replace('"', "");
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{realm}\""))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic"));

        Authenticator {
            decoding_key: DecodingKey::from_secret(config.signing_key.as_bytes()),
            validation,
            username: config.basic.username.clone(),
            password_mac,
            password_tag,
            challenge,
        }
    }

    /// Verifies the bearer token from the `Token` header or, failing that,
    /// from `Authorization: Bearer`.
    pub fn verify_bearer(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let token = headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            })
            .ok_or(AuthError::Missing)?;

        jsonwebtoken::decode::<serde_json::Value>(
            token.trim(),
            &self.decoding_key,
            &self.validation,
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Ok(())
    }

    pub fn verify_basic(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let encoded = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
            .ok_or(AuthError::Missing)?;

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::InvalidCredentials)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidCredentials)?;
        let (user, pass) = decoded
            .split_once(':')
            .ok_or(AuthError::InvalidCredentials)?;

        let user_ok = self.equal_in_constant_time(user, &self.username);
        let pass_ok = self
            .password_mac
            .clone()
            .chain_update(pass.as_bytes())
            .verify_slice(&self.password_tag)
            .is_ok();

        if user_ok && pass_ok {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    fn equal_in_constant_time(&self, given: &str, expected: &str) -> bool {
        let expected_tag = self
            .password_mac
            .clone()
            .chain_update(expected.as_bytes())
            .finalize()
            .into_bytes();
        self.password_mac
            .clone()
            .chain_update(given.as_bytes())
            .verify_slice(&expected_tag)
            .is_ok()
    }
}

pub async fn require_bearer(
    State(auth): State<Arc<Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    match auth.verify_bearer(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::info!(path = %request.uri().path(), error = %e, "Rejected bearer token");
            (StatusCode::UNAUTHORIZED, "Not Authorized\n").into_response()
        }
    }
}

pub async fn require_basic(
    State(auth): State<Arc<Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    match auth.verify_basic(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::info!(path = %request.uri().path(), error = %e, "Rejected basic auth");
            (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, auth.challenge.clone())],
                "Unauthorized.\n",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::BasicAuthConfig;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    pub(crate) fn auth_config() -> AuthConfig {
        AuthConfig {
            signing_key: "signing-secret".into(),
            basic: BasicAuthConfig {
                username: "admin".into(),
                password: "hunter2".into(),
                realm: "Urwald".into(),
            },
        }
    }

    pub(crate) fn token(key: &str, algorithm: Algorithm, claims: serde_json::Value) -> String {
        jsonwebtoken::encode(
            &Header::new(algorithm),
            &claims,
            &EncodingKey::from_secret(key.as_bytes()),
        )
        .unwrap()
    }

    pub(crate) fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn test_bearer_token_headers() {
        let auth = Authenticator::new(&auth_config());
        let valid = token("signing-secret", Algorithm::HS256, json!({"user": "x"}));

        assert_eq!(auth.verify_bearer(&headers("token", &valid)), Ok(()));
        assert_eq!(
            auth.verify_bearer(&headers("authorization", &format!("Bearer {valid}"))),
            Ok(())
        );
        assert_eq!(auth.verify_bearer(&HeaderMap::new()), Err(AuthError::Missing));
    }

    #[test]
    fn test_bearer_token_algorithms_and_keys() {
        let auth = Authenticator::new(&auth_config());

        for algorithm in [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512] {
            let valid = token("signing-secret", algorithm, json!({}));
            assert_eq!(auth.verify_bearer(&headers("token", &valid)), Ok(()));
        }

        let wrong_key = token("other-secret", Algorithm::HS256, json!({}));
        assert!(matches!(
            auth.verify_bearer(&headers("token", &wrong_key)),
            Err(AuthError::InvalidToken(_))
        ));

        assert!(matches!(
            auth.verify_bearer(&headers("token", "not.a.token")),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_bearer_token_expiry() {
        let auth = Authenticator::new(&auth_config());

        let fresh = token("signing-secret", Algorithm::HS256, json!({"exp": now() + 600}));
        assert_eq!(auth.verify_bearer(&headers("token", &fresh)), Ok(()));

        let expired = token("signing-secret", Algorithm::HS256, json!({"exp": now() - 600}));
        assert!(matches!(
            auth.verify_bearer(&headers("token", &expired)),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_basic_auth() {
        let auth = Authenticator::new(&auth_config());

        assert_eq!(
            auth.verify_basic(&headers("authorization", &basic("admin", "hunter2"))),
            Ok(())
        );
        assert_eq!(
            auth.verify_basic(&headers("authorization", &basic("admin", "hunter3"))),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            auth.verify_basic(&headers("authorization", &basic("root", "hunter2"))),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            auth.verify_basic(&headers("authorization", "Basic !!!")),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(auth.verify_basic(&HeaderMap::new()), Err(AuthError::Missing));
    }

    #[test]
    fn test_password_with_colon() {
        let mut config = auth_config();
        config.basic.password = "a:b".into();
        let auth = Authenticator::new(&config);

        assert_eq!(
            auth.verify_basic(&headers("authorization", &basic("admin", "a:b"))),
            Ok(())
        );
    }
}
