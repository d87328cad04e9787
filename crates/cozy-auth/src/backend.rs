//! Backend generation detection and legacy token acquisition
//!
//! The cozy stack exists in two generations. The legacy one (v2) has no
//! OAuth support and hands out application tokens through the host page;
//! the current one (v3) supports dynamic client registration. The manager
//! asks a `BackendProbe` which one it is talking to before choosing a flow.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::constants::STATUS_PATH;
use crate::error::{Error, Result};
use crate::transport::{HttpRequest, Method, Transport, Url, endpoint};
use crate::types::AppToken;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability probe: is the server the legacy generation?
pub trait BackendProbe: Send + Sync {
    fn is_legacy(&self) -> BoxFuture<'_, Result<bool>>;
}

/// Source of application tokens on the legacy generation.
pub trait AppTokenSource: Send + Sync {
    fn app_token(&self) -> BoxFuture<'_, Result<AppToken>>;
}

/// Probe based on `GET /status/`: legacy instances report a `datasystem`
/// member. The first successful answer is cached for the probe's lifetime.
pub struct StatusProbe {
    transport: Arc<dyn Transport>,
    base: Url,
    legacy: OnceCell<bool>,
}

impl StatusProbe {
    pub fn new(transport: Arc<dyn Transport>, base: Url) -> Self {
        Self {
            transport,
            base,
            legacy: OnceCell::new(),
        }
    }

    async fn fetch(&self) -> Result<bool> {
        let request = HttpRequest::new(Method::GET, endpoint(&self.base, STATUS_PATH)?);
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(Error::Http(format!(
                "could not fetch cozy status: {}",
                response.status
            )));
        }
        let status: serde_json::Value = response
            .json()
            .map_err(|e| Error::Http(format!("invalid status response: {e}")))?;
        let legacy = status.get("datasystem").is_some();
        debug!(legacy, "probed backend generation");
        Ok(legacy)
    }
}

impl BackendProbe for StatusProbe {
    fn is_legacy(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { self.legacy.get_or_try_init(|| self.fetch()).await.copied() })
    }
}

/// Probe with a known answer, for hosts that already know the generation.
#[derive(Debug, Clone, Copy)]
pub struct KnownBackend {
    pub legacy: bool,
}

impl BackendProbe for KnownBackend {
    fn is_legacy(&self) -> BoxFuture<'_, Result<bool>> {
        let legacy = self.legacy;
        Box::pin(async move { Ok(legacy) })
    }
}
