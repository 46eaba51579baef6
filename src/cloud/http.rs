//! HTTP transport for cloud REST APIs
//!
//! Thin wrapper over `reqwest` returning a uniform `{headers, body, code}`
//! envelope on success and classifying failures by status code:
//!
//! - 401 -> [`Error::Unauthorized`]
//! - 404 -> [`Error::NotFound`]
//! - other 4xx -> [`Error::HttpRequest`]
//! - 5xx -> [`Error::ServerError`]

use crate::error::{Error, Result};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the session token on every authenticated call
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Accept self-signed certificates (common on private clouds)
    pub insecure: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            insecure: false,
        }
    }
}

// =============================================================================
// Response Envelope
// =============================================================================

/// Successful response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub headers: HeaderMap,
    /// Parsed JSON body, or the raw text when the body is not JSON
    pub body: Value,
    pub code: u16,
}

impl HttpResponse {
    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

// =============================================================================
// Client
// =============================================================================

#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()?;
        Ok(Self { http })
    }

    /// Send `method` to `base` + `action`, optionally authenticated and
    /// with a JSON body.
    pub async fn request(
        &self,
        method: Method,
        base: &str,
        action: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<HttpResponse> {
        let url = join_url(base, action);
        info!("{} {}", method, url);
        if let Some(body) = body {
            debug!("Request body for {}: {}", url, redact(body));
        }

        let mut builder = self.http.request(method, &url);
        if let Some(token) = token {
            builder = builder.header(AUTH_TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = Self::check(builder.send().await?, &url).await?;
        let code = resp.status().as_u16();
        let headers = resp.headers().clone();
        let text = resp.text().await?;
        debug!("Response {} from {}: {}", code, url, text);

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Non-JSON response body from {}: {}", url, e);
                    Value::String(text)
                }
            }
        };

        Ok(HttpResponse { headers, body, code })
    }

    /// Pass 2xx responses through; turn anything else into an error
    /// carrying the response body.
    async fn check(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!("Response {} from {}: {}", status, url, body);
            return Err(classify_status(status, url, body));
        }
        Ok(resp)
    }

    pub async fn get(&self, base: &str, action: &str, token: Option<&str>) -> Result<HttpResponse> {
        self.request(Method::GET, base, action, token, None).await
    }

    pub async fn post(
        &self,
        base: &str,
        action: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<HttpResponse> {
        self.request(Method::POST, base, action, token, Some(body)).await
    }

    pub async fn delete(&self, base: &str, action: &str, token: Option<&str>) -> Result<HttpResponse> {
        self.request(Method::DELETE, base, action, token, None).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Join a base URL and an action path with exactly one slash between them
pub fn join_url(base: &str, action: &str) -> String {
    let mut url = base.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(action.trim_start_matches('/'));
    url
}

/// Map a non-2xx status to the matching error variant
pub fn classify_status(status: StatusCode, url: &str, message: String) -> Error {
    let code = status.as_u16();
    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized(format!("{}: {}", url, message)),
        StatusCode::NOT_FOUND => Error::NotFound {
            kind: "url".to_string(),
            id: url.to_string(),
        },
        s if s.is_client_error() => Error::HttpRequest { code, message },
        _ => Error::ServerError { code, message },
    }
}

/// Copy of a request body with credentials masked, for logging
fn redact(body: &Value) -> Value {
    match body {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if k == "password" {
                        (k.clone(), Value::String("******".to_string()))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}
