// GA Realtime Exporter - Service account authentication
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! OAuth2 access tokens via the service account JWT bearer flow.
//!
//! A signed RS256 assertion is exchanged at the key's `token_uri` for a
//! short-lived access token. Tokens are cached and shared by every polling
//! task until shortly before they expire.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::credentials::ServiceAccountKey;

/// Read-only Analytics scope.
pub const ANALYTICS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/analytics.readonly";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
/// Upper bound on the lifetime the token endpoint may claim.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Source of bearer tokens for API requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Token source backed by a service account key.
pub struct ServiceAccountTokenSource {
    client_email: String,
    key_id: String,
    token_uri: String,
    scope: String,
    signing_key: EncodingKey,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    /// Build a token source, parsing the private key up front.
    pub fn new(key: &ServiceAccountKey, http: reqwest::Client) -> Result<Self, AuthError> {
        let signing_key =
            EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(AuthError::InvalidKey)?;

        Ok(Self {
            client_email: key.client_email.clone(),
            key_id: key.private_key_id.clone(),
            token_uri: key.token_uri.clone(),
            scope: ANALYTICS_READONLY_SCOPE.to_string(),
            signing_key,
            http,
            cache: Mutex::new(None),
        })
    }

    /// Signed assertion issued at `now` (unix seconds).
    fn assertion(&self, now: i64) -> Result<String, AuthError> {
        let mut header = Header::new(Algorithm::RS256);
        if !self.key_id.is_empty() {
            header.kid = Some(self.key_id.clone());
        }

        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        encode(&header, &claims, &self.signing_key).map_err(AuthError::Signing)
    }

    async fn fetch(&self) -> Result<CachedToken, AuthError> {
        let assertion = self.assertion(Utc::now().timestamp())?;

        let response = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        debug!(expires_in = token.expires_in, "obtained access token");
        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: refresh_deadline(Instant::now(), token.expires_in),
        })
    }
}

/// When a token issued at `now` with the given `expires_in` must be refreshed.
fn refresh_deadline(now: Instant, expires_in: u64) -> Instant {
    let lifetime = Duration::from_secs(expires_in).min(MAX_TOKEN_LIFETIME);
    now + lifetime.saturating_sub(EXPIRY_MARGIN)
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> Result<String, AuthError> {
        // Held across the fetch so concurrent tasks wait for one refresh.
        let mut cache = self.cache.lock().await;
        if let Some(ref cached) = *cache {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.fetch().await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

/// Authentication errors.
///
/// `InvalidKey` is fatal at startup; everything else surfaces as a failed
/// query for the cycle that needed the token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid private key: {0}")]
    InvalidKey(jsonwebtoken::errors::Error),

    #[error("Cannot sign assertion: {0}")]
    Signing(jsonwebtoken::errors::Error),

    #[error("Token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed token response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    const PRIVATE_KEY: &str = include_str!("../testdata/service_account_key.pem");
    const PUBLIC_KEY: &str = include_str!("../testdata/service_account_pub.pem");

    struct TokenEndpoint {
        requests: AtomicUsize,
        expires_in: u64,
        reject: bool,
        token_uri: std::sync::Mutex<String>,
    }

    async fn issue_token(
        State(endpoint): State<Arc<TokenEndpoint>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, String)> {
        let n = endpoint.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if endpoint.reject {
            return Err((
                axum::http::StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant"}"#.to_string(),
            ));
        }
        assert_eq!(form.get("grant_type").map(String::as_str), Some(JWT_BEARER_GRANT));

        let assertion = form.get("assertion").expect("assertion field");
        let header = decode_header(assertion).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("key-1"));

        let token_uri = endpoint.token_uri.lock().unwrap().clone();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[token_uri]);
        let claims = decode::<AssertionClaims>(
            assertion,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap()
        .claims;
        assert_eq!(claims.iss, "exporter@test.iam.gserviceaccount.com");
        assert_eq!(claims.scope, ANALYTICS_READONLY_SCOPE);
        assert_eq!(claims.exp - claims.iat, ASSERTION_LIFETIME_SECS);

        Ok(Json(serde_json::json!({
            "access_token": format!("token-{n}"),
            "expires_in": endpoint.expires_in,
            "token_type": "Bearer"
        })))
    }

    async fn spawn_endpoint(expires_in: u64, reject: bool) -> (Arc<TokenEndpoint>, String) {
        let endpoint = Arc::new(TokenEndpoint {
            requests: AtomicUsize::new(0),
            expires_in,
            reject,
            token_uri: std::sync::Mutex::new(String::new()),
        });
        let app = Router::new()
            .route("/token", post(issue_token))
            .with_state(Arc::clone(&endpoint));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let token_uri = format!("http://{}/token", listener.local_addr().unwrap());
        *endpoint.token_uri.lock().unwrap() = token_uri.clone();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (endpoint, token_uri)
    }

    fn key(token_uri: &str) -> ServiceAccountKey {
        ServiceAccountKey {
            client_email: "exporter@test.iam.gserviceaccount.com".to_string(),
            private_key: PRIVATE_KEY.to_string(),
            private_key_id: "key-1".to_string(),
            token_uri: token_uri.to_string(),
        }
    }

    #[test]
    fn test_invalid_key_rejected() {
        let mut bad = key("http://localhost/token");
        bad.private_key = "not a pem".to_string();

        let result = ServiceAccountTokenSource::new(&bad, reqwest::Client::new());
        assert!(matches!(result, Err(AuthError::InvalidKey(_))));
    }

    #[test]
    fn test_assertion_claims() {
        let source =
            ServiceAccountTokenSource::new(&key("https://oauth2.example/token"), reqwest::Client::new())
                .unwrap();
        let assertion = source.assertion(1_700_000_000).unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://oauth2.example/token"]);
        validation.validate_exp = false;
        let claims = decode::<AssertionClaims>(
            &assertion,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap()
        .claims;

        assert_eq!(claims.iat, 1_700_000_000);
        assert_eq!(claims.exp, 1_700_003_600);
        assert_eq!(claims.aud, "https://oauth2.example/token");
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let (endpoint, token_uri) = spawn_endpoint(3600, false).await;
        let source = ServiceAccountTokenSource::new(&key(&token_uri), reqwest::Client::new()).unwrap();

        assert_eq!(source.token().await.unwrap(), "token-1");
        assert_eq!(source.token().await.unwrap(), "token-1");
        assert_eq!(endpoint.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refreshed() {
        // Lifetime inside the refresh margin: every call fetches again.
        let (endpoint, token_uri) = spawn_endpoint(30, false).await;
        let source = ServiceAccountTokenSource::new(&key(&token_uri), reqwest::Client::new()).unwrap();

        assert_eq!(source.token().await.unwrap(), "token-1");
        assert_eq!(source.token().await.unwrap(), "token-2");
        assert_eq!(endpoint.requests.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresh_deadline_is_capped() {
        let now = Instant::now();
        assert_eq!(refresh_deadline(now, 3600), now + Duration::from_secs(3540));
        assert_eq!(refresh_deadline(now, 30), now);
        assert_eq!(
            refresh_deadline(now, u64::MAX),
            now + MAX_TOKEN_LIFETIME - EXPIRY_MARGIN
        );
    }

    #[tokio::test]
    async fn test_huge_expires_in_is_cached() {
        let (endpoint, token_uri) = spawn_endpoint(u64::MAX, false).await;
        let source = ServiceAccountTokenSource::new(&key(&token_uri), reqwest::Client::new()).unwrap();

        assert_eq!(source.token().await.unwrap(), "token-1");
        assert_eq!(source.token().await.unwrap(), "token-1");
        assert_eq!(endpoint.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_grant() {
        let (_endpoint, token_uri) = spawn_endpoint(3600, true).await;
        let source = ServiceAccountTokenSource::new(&key(&token_uri), reqwest::Client::new()).unwrap();

        let result = source.token().await;
        assert!(matches!(result, Err(AuthError::Rejected { status: 400, .. })));
    }
}
