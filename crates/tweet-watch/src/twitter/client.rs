//! Timeline API client.
//!
//! Every call uses exactly one credential and classifies the outcome into a
//! [`RemoteFailure`]; choosing and rotating credentials is the caller's job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::types::{join_errors, Item, TimelineEnvelope, UserEnvelope};
use crate::error::{RemoteFailure, WatchError, WatchResult};
use crate::quota::Credential;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com/2";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Smallest and largest page the timeline endpoint accepts.
pub const MIN_RESULTS: u32 = 5;
pub const MAX_RESULTS: u32 = 100;

const USER_AGENT: &str = concat!("tweet-watch/", env!("CARGO_PKG_VERSION"));

/// Operations the watcher needs from the timeline provider.
#[async_trait]
pub trait TimelineApi: Send + Sync {
    /// Resolve a handle to its account id.
    async fn fetch_user_id(
        &self,
        handle: &str,
        credential: &Credential,
    ) -> Result<String, RemoteFailure>;

    /// Fetch up to `max_count` original posts newer than `since_id`, in the
    /// order the provider returns them.
    async fn fetch_recent_items(
        &self,
        user_id: &str,
        since_id: Option<&str>,
        max_count: u32,
        credential: &Credential,
    ) -> Result<Vec<Item>, RemoteFailure>;
}

/// HTTP client for the v2 timeline API.
pub struct TwitterClient {
    base_url: String,
    client: reqwest::Client,
}

impl TwitterClient {
    /// Create a client against `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> WatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| WatchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        credential: &Credential,
    ) -> Result<T, RemoteFailure> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.token())
            .query(query)
            .send()
            .await
            .map_err(|e| RemoteFailure::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteFailure::Transient(e.to_string()))?;

        if let Some(failure) = classify_status(status, &body) {
            tracing::debug!(
                path,
                credential = credential.index(),
                status = status.as_u16(),
                "Request rejected"
            );
            return Err(failure);
        }

        serde_json::from_str(&body).map_err(|e| RemoteFailure::Malformed(e.to_string()))
    }
}

/// Map a non-success HTTP status to a failure; `None` for 200.
fn classify_status(status: StatusCode, body: &str) -> Option<RemoteFailure> {
    match status {
        StatusCode::OK => None,
        StatusCode::TOO_MANY_REQUESTS => Some(RemoteFailure::RateLimited),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(RemoteFailure::Unauthorized {
            status: status.as_u16(),
        }),
        s if s.is_server_error() => Some(RemoteFailure::Transient(format!("HTTP {s}"))),
        s => Some(RemoteFailure::Malformed(format!(
            "unexpected HTTP {s}: {}",
            truncate(body, 200)
        ))),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[async_trait]
impl TimelineApi for TwitterClient {
    async fn fetch_user_id(
        &self,
        handle: &str,
        credential: &Credential,
    ) -> Result<String, RemoteFailure> {
        let envelope: UserEnvelope = self
            .get(
                &format!("/users/by/username/{handle}"),
                &[("user.fields", "id,name,username".to_string())],
                credential,
            )
            .await?;

        match envelope.data {
            Some(user) => {
                tracing::debug!(handle, user_id = %user.id, name = %user.name, "Resolved user");
                Ok(user.id)
            }
            None if envelope.errors.is_empty() => {
                Err(RemoteFailure::Malformed("user lookup returned no data".to_string()))
            }
            None => Err(RemoteFailure::Malformed(join_errors(&envelope.errors))),
        }
    }

    async fn fetch_recent_items(
        &self,
        user_id: &str,
        since_id: Option<&str>,
        max_count: u32,
        credential: &Credential,
    ) -> Result<Vec<Item>, RemoteFailure> {
        let mut query = vec![
            ("max_results", max_count.clamp(MIN_RESULTS, MAX_RESULTS).to_string()),
            ("tweet.fields", "created_at".to_string()),
            ("exclude", "retweets,replies".to_string()),
        ];
        if let Some(since_id) = since_id {
            query.push(("since_id", since_id.to_string()));
        }

        let envelope: TimelineEnvelope = self
            .get(&format!("/users/{user_id}/tweets"), &query, credential)
            .await?;

        match envelope.data {
            Some(items) => Ok(items),
            // No `data` and no `errors` means nothing newer than `since_id`.
            None if envelope.errors.is_empty() => Ok(Vec::new()),
            None => Err(RemoteFailure::Malformed(join_errors(&envelope.errors))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{CredentialRotator, QuotaLedger, QuotaPolicy};
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential() -> Credential {
        let mut rotator = CredentialRotator::new(
            vec!["secret-token".to_string()],
            QuotaLedger::in_memory(QuotaPolicy::default()),
        )
        .unwrap();
        rotator.next_usable(Utc::now()).unwrap()
    }

    async fn client_with(status: u16, body: serde_json::Value) -> (MockServer, TwitterClient) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;
        let client = TwitterClient::new(server.uri(), DEFAULT_TIMEOUT).unwrap();
        (server, client)
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK, ""), None);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            Some(RemoteFailure::RateLimited)
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, ""),
            Some(RemoteFailure::Unauthorized { status: 403 })
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            Some(RemoteFailure::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "nope"),
            Some(RemoteFailure::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/by/username/binancezh"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "1234", "name": "Binance", "username": "binancezh"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TwitterClient::new(server.uri(), DEFAULT_TIMEOUT).unwrap();
        let id = client.fetch_user_id("binancezh", &credential()).await.unwrap();
        assert_eq!(id, "1234");
    }

    #[tokio::test]
    async fn test_fetch_user_id_errors_are_malformed() {
        let (_server, client) = client_with(
            200,
            json!({"errors": [{"title": "Not Found Error", "detail": "Could not find user"}]}),
        )
        .await;
        let err = client.fetch_user_id("ghost", &credential()).await.unwrap_err();
        assert_eq!(
            err,
            RemoteFailure::Malformed("Not Found Error: Could not find user".to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_recent_items_passes_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/1234/tweets"))
            .and(query_param("since_id", "99"))
            .and(query_param("max_results", "10"))
            .and(query_param("exclude", "retweets,replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": "101", "text": "alpha airdrop live", "created_at": "2025-06-01T04:00:00.000Z"},
                    {"id": "100", "text": "hello", "created_at": "2025-06-01T03:00:00.000Z"}
                ],
                "meta": {"result_count": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TwitterClient::new(server.uri(), DEFAULT_TIMEOUT).unwrap();
        let items = client
            .fetch_recent_items("1234", Some("99"), 10, &credential())
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "101");
        assert_eq!(
            items[0].permalink("binancezh"),
            "https://twitter.com/binancezh/status/101"
        );
    }

    #[tokio::test]
    async fn test_fetch_recent_items_empty_page() {
        let (_server, client) = client_with(200, json!({"meta": {"result_count": 0}})).await;
        let items = client
            .fetch_recent_items("1234", Some("101"), 10, &credential())
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let (_server, client) = client_with(429, json!({"title": "Too Many Requests"})).await;
        let err = client
            .fetch_recent_items("1234", None, 10, &credential())
            .await
            .unwrap_err();
        assert_eq!(err, RemoteFailure::RateLimited);
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_malformed() {
        let (_server, client) = client_with(200, json!({"data": {"not": "a list"}})).await;
        let err = client
            .fetch_recent_items("1234", None, 10, &credential())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::Malformed);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let client = TwitterClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let err = client.fetch_user_id("x", &credential()).await.unwrap_err();
        assert!(matches!(err, RemoteFailure::Transient(_)));
    }
}
