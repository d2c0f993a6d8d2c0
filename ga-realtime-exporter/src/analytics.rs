// GA Realtime Exporter - Real Time Reporting API client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Client for the Google Analytics Real Time Reporting API (v3).

use std::sync::Arc;

use async_trait::async_trait;
use ga_realtime::{AnalyticsQuery, MetricDefinition, QueryError, QueryRequest, Row};
use serde::Deserialize;
use tracing::debug;

use crate::auth::TokenSource;

/// Production API root.
pub const REALTIME_API_BASE: &str = "https://www.googleapis.com/analytics/v3";

#[derive(Debug, Deserialize)]
struct RealtimeResponse {
    // Omitted by the API when the query matched nothing.
    #[serde(default)]
    rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Authorized client for `data/realtime` queries against one view.
pub struct RealtimeClient {
    http: reqwest::Client,
    base_url: String,
    view_id: String,
    tokens: Arc<dyn TokenSource>,
}

impl RealtimeClient {
    pub fn new(http: reqwest::Client, view_id: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            base_url: REALTIME_API_BASE.to_string(),
            view_id: view_id.into(),
            tokens,
        }
    }

    /// Point the client at a different API root.
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/data/realtime", self.base_url)
    }
}

#[async_trait]
impl AnalyticsQuery for RealtimeClient {
    async fn query(&self, definition: &MetricDefinition) -> Result<Vec<Row>, QueryError> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| QueryError::Auth(e.to_string()))?;
        let request = QueryRequest::new(&self.view_id, definition);

        let response = self
            .http
            .get(self.endpoint())
            .bearer_auth(token)
            .query(&request.params())
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let body: RealtimeResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Malformed(e.to_string()))?;
        debug!(metric = %definition.name, rows = body.rows.len(), "query returned");
        Ok(body.rows)
    }
}

/// The API's own error message if the body carries one, else the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    struct StaticToken(&'static str);

    #[async_trait]
    impl TokenSource for StaticToken {
        async fn token(&self) -> Result<String, AuthError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingToken;

    #[async_trait]
    impl TokenSource for FailingToken {
        async fn token(&self) -> Result<String, AuthError> {
            Err(AuthError::Rejected {
                status: 401,
                body: "invalid_client".to_string(),
            })
        }
    }

    type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn realtime(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-token") {
            return (StatusCode::UNAUTHORIZED, "missing token").into_response();
        }
        seen.lock().unwrap().push(params.clone());

        match params.get("metrics").map(String::as_str) {
            Some("rt:activeUsers") => axum::Json(serde_json::json!({
                "kind": "analytics#realtimeData",
                "totalResults": 1,
                "rows": [["42"]]
            }))
            .into_response(),
            Some("rt:pageviews") => axum::Json(serde_json::json!({
                "rows": [["organic", "10"], ["referral", "3"]]
            }))
            .into_response(),
            Some("rt:empty") => axum::Json(serde_json::json!({"totalResults": 0})).into_response(),
            Some("rt:garbage") => (StatusCode::OK, "<html>oops</html>").into_response(),
            _ => (
                StatusCode::FORBIDDEN,
                axum::Json(serde_json::json!({
                    "error": {"code": 403, "message": "User does not have sufficient permissions"}
                })),
            )
                .into_response(),
        }
    }

    async fn spawn_api() -> (Seen, String) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/data/realtime", get(realtime))
            .with_state(Arc::clone(&seen));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (seen, base)
    }

    fn client(base: &str, tokens: Arc<dyn TokenSource>) -> RealtimeClient {
        RealtimeClient::new(reqwest::Client::new(), "ga:12345", tokens).with_base_url(base)
    }

    #[tokio::test]
    async fn test_scalar_query() {
        let (seen, base) = spawn_api().await;
        let client = client(&base, Arc::new(StaticToken("test-token")));

        let rows = client
            .query(&MetricDefinition::new("rt:activeUsers"))
            .await
            .unwrap();
        assert_eq!(rows, vec![vec!["42".to_string()]]);

        let params = seen.lock().unwrap()[0].clone();
        assert_eq!(params.get("ids").map(String::as_str), Some("ga:12345"));
        assert!(!params.contains_key("dimensions"));
        assert!(!params.contains_key("max-results"));
    }

    #[tokio::test]
    async fn test_dimensioned_query_params() {
        let (seen, base) = spawn_api().await;
        let client = client(&base, Arc::new(StaticToken("test-token")));
        let definition = MetricDefinition::new("rt:pageviews")
            .with_dimensions(["rt:medium"])
            .with_sort(["-rt:pageviews"])
            .with_limit(5);

        let rows = client.query(&definition).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["referral".to_string(), "3".to_string()]);

        let params = seen.lock().unwrap()[0].clone();
        assert_eq!(params.get("dimensions").map(String::as_str), Some("rt:medium"));
        assert_eq!(params.get("sort").map(String::as_str), Some("-rt:pageviews"));
        assert_eq!(params.get("max-results").map(String::as_str), Some("5"));
        assert!(!params.contains_key("filters"));
    }

    #[tokio::test]
    async fn test_missing_rows_means_empty() {
        let (_seen, base) = spawn_api().await;
        let client = client(&base, Arc::new(StaticToken("test-token")));

        let rows = client.query(&MetricDefinition::new("rt:empty")).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_api_error_message() {
        let (_seen, base) = spawn_api().await;
        let client = client(&base, Arc::new(StaticToken("test-token")));

        let result = client.query(&MetricDefinition::new("rt:forbidden")).await;
        match result {
            Err(QueryError::Api { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "User does not have sufficient permissions");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (_seen, base) = spawn_api().await;
        let client = client(&base, Arc::new(StaticToken("test-token")));

        let result = client.query(&MetricDefinition::new("rt:garbage")).await;
        assert!(matches!(result, Err(QueryError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_token_failure_is_query_error() {
        let (seen, base) = spawn_api().await;
        let client = client(&base, Arc::new(FailingToken));

        let result = client.query(&MetricDefinition::new("rt:activeUsers")).await;
        assert!(matches!(result, Err(QueryError::Auth(_))));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_api() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = client(&base, Arc::new(StaticToken("test-token")));
        let result = client.query(&MetricDefinition::new("rt:activeUsers")).await;
        assert!(matches!(result, Err(QueryError::Transport(_))));
    }

    #[test]
    fn test_api_error_message_fallback() {
        assert_eq!(api_error_message("  plain failure \n"), "plain failure");
    }
}
