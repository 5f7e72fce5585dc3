//! Remote API client.
//!
//! Wraps a [`Transport`] with the behavior every caller relies on:
//!
//! - JSON decoding; an unparseable 2xx body is an error like any other
//! - identical concurrent GETs (same resolved URL) share one request
//! - a 403/404 GET is remembered and re-requests fail fast until the
//!   negative-result window elapses
//! - 429 surfaces as [`AppError::RateLimited`] for the caller to cool down

pub mod socket;
pub mod source;
pub mod transport;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use serde_json::Value;
use url::Url;

use crate::error::{ApiError, AppError, Result};
use crate::models::ApiConfig;

pub use socket::{PushMessage, PushStream, decode_message};
pub use source::ListSource;
pub use transport::{HttpTransport, Method, RawResponse, Transport, create_async_client};

/// One API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, e.g. `auth/user/notifications`
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub data: Value,
}

type ApiOutcome = std::result::Result<ApiResponse, ApiError>;
type PendingGet = Shared<LocalBoxFuture<'static, ApiOutcome>>;

/// Releases an in-flight GET from the join table once a waiter finishes or is
/// dropped. Waiters still holding a clone complete unaffected.
struct PendingSlot<'a> {
    pending: &'a RefCell<HashMap<String, PendingGet>>,
    key: &'a str,
    shared: PendingGet,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.borrow_mut();
        if pending.get(self.key).is_some_and(|p| p.ptr_eq(&self.shared)) {
            pending.remove(self.key);
        }
    }
}

pub struct ApiClient<T: Transport + 'static = HttpTransport> {
    transport: Rc<T>,
    base_url: Url,
    pending: RefCell<HashMap<String, PendingGet>>,
    /// resolved URL -> (when, status) of the last 403/404
    failures: RefCell<HashMap<String, (DateTime<Utc>, u16)>>,
    negative_window: Duration,
}

impl ApiClient<HttpTransport> {
    /// Client over `reqwest` configured from `[api]`.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(
            HttpTransport::new(config)?,
            &config.base_url,
            Duration::seconds(config.negative_cache_secs as i64),
        )
    }
}

impl<T: Transport + 'static> ApiClient<T> {
    pub fn new(transport: T, base_url: &str, negative_window: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            transport: Rc::new(transport),
            base_url,
            pending: RefCell::new(HashMap::new()),
            failures: RefCell::new(HashMap::new()),
            negative_window,
        })
    }

    /// Absolute URL for a request, query included.
    pub fn resolve(&self, request: &ApiRequest) -> Result<Url> {
        let mut url = self.base_url.join(request.endpoint.trim_start_matches('/'))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    /// Issue a request.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = self.resolve(&request)?;

        if request.method != Method::Get {
            let raw = self
                .transport
                .send(request.method, &url, request.body.as_ref())
                .await?;
            return Ok(decode(raw, &request.endpoint)?);
        }

        let key = url.to_string();
        self.check_suppressed(&key, &request.endpoint)?;

        let shared = {
            let mut pending = self.pending.borrow_mut();
            match pending.get(&key) {
                Some(existing) => {
                    log::debug!("Joining in-flight GET {}", key);
                    existing.clone()
                }
                None => {
                    let transport = Rc::clone(&self.transport);
                    let endpoint = request.endpoint.clone();
                    let future = async move {
                        let raw = transport.send(Method::Get, &url, None).await?;
                        decode(raw, &endpoint)
                    }
                    .boxed_local()
                    .shared();
                    pending.insert(key.clone(), future.clone());
                    future
                }
            }
        };

        let slot = PendingSlot {
            pending: &self.pending,
            key: &key,
            shared,
        };
        let outcome = slot.shared.clone().await;
        drop(slot);

        if let Err(err) = &outcome {
            if let Some(status @ (403 | 404)) = err.status {
                self.failures.borrow_mut().insert(key, (Utc::now(), status));
            }
        }
        Ok(outcome?)
    }

    fn check_suppressed(&self, key: &str, endpoint: &str) -> Result<()> {
        let mut failures = self.failures.borrow_mut();
        let Some(&(at, status)) = failures.get(key) else {
            return Ok(());
        };
        let remaining = self.negative_window - (Utc::now() - at);
        if remaining > Duration::zero() {
            return Err(AppError::Suppressed {
                endpoint: endpoint.to_string(),
                status,
                remaining_secs: remaining.num_seconds(),
            });
        }
        failures.remove(key);
        Ok(())
    }
}

/// Classify a raw response.
fn decode(raw: RawResponse, endpoint: &str) -> ApiOutcome {
    if (200..300).contains(&raw.status) {
        if raw.body.trim().is_empty() {
            return Ok(ApiResponse {
                status: raw.status,
                data: Value::Null,
            });
        }
        return serde_json::from_str(&raw.body)
            .map(|data| ApiResponse {
                status: raw.status,
                data,
            })
            .map_err(|e| {
                ApiError::new(
                    Some(raw.status),
                    format!("Invalid JSON response: {e}"),
                    endpoint,
                )
            });
    }

    Err(ApiError::new(
        Some(raw.status),
        error_message(&raw.body, raw.status),
        endpoint,
    ))
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str, status: u16) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json
            .pointer("/error/message")
            .or_else(|| json.get("error"))
            .or_else(|| json.get("message"));
        if let Some(Value::String(message)) = message {
            return message.clone();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    /// Answers every request with a fixed response after yielding once.
    struct FixedTransport {
        status: u16,
        body: String,
        calls: Cell<usize>,
    }

    impl FixedTransport {
        fn new(status: u16, body: &str) -> Self {
            Self {
                status,
                body: body.to_string(),
                calls: Cell::new(0),
            }
        }
    }

    #[async_trait(?Send)]
    impl Transport for FixedTransport {
        async fn send(&self, _: Method, _: &Url, _: Option<&Value>) -> SendResult {
            self.calls.set(self.calls.get() + 1);
            tokio::task::yield_now().await;
            Ok(RawResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    type SendResult = std::result::Result<RawResponse, ApiError>;

    fn client(status: u16, body: &str) -> ApiClient<FixedTransport> {
        ApiClient::new(
            FixedTransport::new(status, body),
            "https://api.example.com/api/1",
            Duration::minutes(15),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve() {
        let client = client(200, "{}");
        let url = client
            .resolve(&ApiRequest::get("auth/user/notifications").with_query("n", 100).with_query("offset", 0))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/1/auth/user/notifications?n=100&offset=0"
        );
    }

    #[tokio::test]
    async fn test_decode_json() {
        let client = client(200, r#"{"id":"usr_1"}"#);
        let response = client.call(ApiRequest::get("users/usr_1")).await.unwrap();
        assert_eq!(response.data, json!({ "id": "usr_1" }));
    }

    #[tokio::test]
    async fn test_invalid_json_is_error() {
        let client = client(200, "<html>");
        let err = client.call(ApiRequest::get("users/usr_1")).await.unwrap_err();
        assert!(matches!(err, AppError::Api(ApiError { status: Some(200), .. })));
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_request() {
        let client = client(200, "[]");
        let (a, b) = futures::join!(
            client.call(ApiRequest::get("auth/user/friends")),
            client.call(ApiRequest::get("auth/user/friends"))
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(client.transport.calls.get(), 1);
        assert!(client.pending.borrow().is_empty());

        // Sequential calls are not merged.
        client.call(ApiRequest::get("auth/user/friends")).await.unwrap();
        assert_eq!(client.transport.calls.get(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_get_is_not_joined_later() {
        let client = client(200, "[]");
        assert!(client.call(ApiRequest::get("auth/user/friends")).now_or_never().is_none());
        assert_eq!(client.transport.calls.get(), 1);
        assert!(client.pending.borrow().is_empty());

        client.call(ApiRequest::get("auth/user/friends")).await.unwrap();
        assert_eq!(client.transport.calls.get(), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_suppressed() {
        let client = client(404, r#"{"error":{"message":"User not found","status_code":404}}"#);
        let err = client.call(ApiRequest::get("users/usr_x")).await.unwrap_err();
        match err {
            AppError::Api(api) => {
                assert_eq!(api.status, Some(404));
                assert_eq!(api.message, "User not found");
                assert_eq!(api.endpoint, "users/usr_x");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let err = client.call(ApiRequest::get("users/usr_x")).await.unwrap_err();
        assert!(matches!(err, AppError::Suppressed { status: 404, .. }));
        assert_eq!(client.transport.calls.get(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let client = client(429, "");
        let err = client.call(ApiRequest::get("auth/user/friends")).await.unwrap_err();
        assert!(err.is_rate_limited());

        // Not remembered as a negative result.
        let _ = client.call(ApiRequest::get("auth/user/friends")).await;
        assert_eq!(client.transport.calls.get(), 2);
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(error_message("", 503), "Service Unavailable");
        assert_eq!(error_message(r#"{"error":"nope"}"#, 400), "nope");
        assert_eq!(error_message("plain text", 500), "plain text");
    }
}
