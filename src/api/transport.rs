//! HTTP transport.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::{ApiError, Result};
use crate::models::ApiConfig;

/// HTTP method subset the service uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(&self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Status and undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Sends one request. Implementations only move bytes; status handling lives
/// in the API client.
#[async_trait(?Send)]
pub trait Transport {
    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
    ) -> std::result::Result<RawResponse, ApiError>;
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &ApiConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Transport over `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait(?Send)]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
    ) -> std::result::Result<RawResponse, ApiError> {
        let endpoint = url.path().to_string();
        let mut request = self.client.request(method.as_reqwest(), url.clone());
        if let Some(token) = &self.auth_token {
            request = request.header(reqwest::header::COOKIE, format!("auth={token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::transport(e, endpoint.clone()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(e, endpoint))?;
        Ok(RawResponse { status, body })
    }
}
