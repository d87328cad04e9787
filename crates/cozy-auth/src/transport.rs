//! HTTP transport seam
//!
//! The protocol functions never talk to reqwest directly: they build an
//! `HttpRequest` and hand it to a `Transport`. `ReqwestTransport` is the
//! production implementation; tests substitute a stub. Retry and backoff are
//! the transport's business. A timeout surfaces as `Error::Http` like any
//! other transport failure.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
pub use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};

/// Request body variants used by the cozy endpoints.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A transport-agnostic HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Bearer credential for the `Authorization` header.
    pub bearer: Option<String>,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            bearer: None,
            body: Body::Empty,
        }
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = Body::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }
}

/// Status and raw body of a completed request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }
}

/// Injected HTTP function (`httpRequest(url, options) -> response`).
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`). Non-2xx statuses are responses, not errors;
/// `Err` means no response was obtained.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>>;
}

/// `Transport` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a client with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>> {
        Box::pin(async move {
            debug!(method = %request.method, url = %request.url, "sending request");
            let mut builder = self
                .client
                .request(request.method.clone(), request.url.clone())
                .header(ACCEPT, "application/json");
            if let Some(token) = &request.bearer {
                builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            builder = match &request.body {
                Body::Empty => builder,
                Body::Json(value) => builder.json(value),
                Body::Form(fields) => builder.form(fields),
            };

            let response = builder
                .send()
                .await
                .map_err(|e| Error::Http(format!("{} {} failed: {e}", request.method, request.url)))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| Error::Http(format!("reading response body: {e}")))?;
            Ok(HttpResponse { status, body })
        })
    }
}

/// Resolve an absolute endpoint path against the cozy base URL.
///
/// The base may carry a path prefix and trailing slashes; both are kept
/// and normalized so `endpoint("https://x/", "/auth")` is `https://x/auth`.
pub fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let joined = format!("{}{}", base.as_str().trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| Error::Configuration(format!("invalid URL {joined}: {e}")))
}
