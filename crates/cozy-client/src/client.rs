//! The `Cozy` facade
//!
//! Binds one `AuthManager` to one instance and makes authorized JSON
//! requests with it. Access tokens close to expiry are refreshed before the
//! request; a request rejected with 401 is retried once after a refresh.
//! Refreshed credentials are deposited back into the manager.

use std::sync::Arc;
use std::time::Duration;

use cozy_auth::{
    AuthManager, AuthOptions, Body, CredentialStore, Credentials, FileBackend, HttpRequest,
    HttpResponse, LocalStorage, MemoryStorage, Method, OAuthOptions, RegistrationHandler,
    ReqwestTransport, StatusProbe, Transport, Url, endpoint,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Tokens expiring within this window are refreshed before use.
const REFRESH_THRESHOLD: Duration = Duration::from_secs(60);

const DISK_USAGE_PATH: &str = "/settings/disk-usage";

/// Client for one cozy instance.
#[derive(Clone)]
pub struct Cozy {
    base: Url,
    transport: Arc<dyn Transport>,
    auth: AuthManager,
    /// Held while refreshing, so concurrent requests spend a refresh token once.
    refresh_lock: Arc<Mutex<()>>,
}

impl Cozy {
    /// Build a client over `transport`, probing the backend generation
    /// through `GET /status/` on first authorization.
    pub fn new(base: Url, transport: Arc<dyn Transport>, options: AuthOptions) -> Result<Self> {
        let probe = Arc::new(StatusProbe::new(transport.clone(), base.clone()));
        let auth = AuthManager::new(base.clone(), transport.clone(), probe, options)?;
        Ok(Self {
            base,
            transport,
            auth,
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Build a client from a loaded `Config`.
    ///
    /// In OAuth mode credentials go to the file at `storage_path`, or stay
    /// in memory without one. `on_registered` is required in OAuth mode.
    pub fn from_config(
        config: &Config,
        on_registered: Option<Arc<dyn RegistrationHandler>>,
    ) -> Result<Self> {
        let base = config.base_url()?;
        let transport = Arc::new(ReqwestTransport::with_timeout(config.timeout())?);

        let oauth = match &config.oauth {
            Some(oauth) => {
                let storage: Arc<dyn CredentialStore> = match &oauth.storage_path {
                    Some(path) => {
                        let backend = Arc::new(FileBackend::open(path)?);
                        match &oauth.storage_prefix {
                            Some(prefix) => Arc::new(LocalStorage::with_prefix(backend, prefix.clone())),
                            None => Arc::new(LocalStorage::new(backend)),
                        }
                    }
                    None => Arc::new(MemoryStorage::new()),
                };
                Some(OAuthOptions {
                    storage: Some(storage),
                    client_params: oauth.client.clone(),
                    on_registered,
                })
            }
            None => None,
        };
        let options = AuthOptions {
            token: config.cozy.token.as_ref().map(|t| t.expose().clone()),
            oauth,
            app_token_source: None,
        };

        info!(url = %base, oauth = options.oauth.is_some(), "cozy client configured");
        Self::new(base, transport, options)
    }

    /// The manager, for the manual half of the OAuth flow and for
    /// depositing credentials obtained elsewhere.
    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn settings(&self) -> Settings<'_> {
        Settings { cozy: self }
    }

    /// Authorized request to `path`, decoding the JSON response.
    ///
    /// An empty response body decodes as JSON `null`.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let mut creds = self.auth.authorize().await?;
        if needs_refresh(&creds) {
            debug!(path, "access token about to expire, refreshing");
            creds = self.renew(&creds).await?;
        }

        let mut response = self.send(&method, path, body.clone(), &creds).await?;
        if response.status == 401 && creds.client.is_some() && creds.token.as_access_token().is_some() {
            warn!(path, "access token rejected, refreshing and retrying");
            creds = self.renew(&creds).await?;
            response = self.send(&method, path, body, &creds).await?;
        }

        if !response.is_success() {
            return Err(Error::Status {
                method: method.to_string(),
                path: path.to_string(),
                status: response.status,
                body: response.body,
            });
        }
        let raw = if response.body.trim().is_empty() {
            "null"
        } else {
            response.body.as_str()
        };
        serde_json::from_str(raw).map_err(|e| Error::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<serde_json::Value>,
        creds: &Credentials,
    ) -> Result<HttpResponse> {
        let mut request =
            HttpRequest::new(method.clone(), endpoint(&self.base, path)?).bearer(creds.token.bearer());
        if let Some(body) = body {
            request.body = Body::Json(body);
        }
        Ok(self.transport.send(request).await?)
    }

    /// Refresh `stale`, unless a concurrent request already replaced it.
    async fn renew(&self, stale: &Credentials) -> Result<Credentials> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.auth.authorize().await?;
        if current.token != stale.token {
            debug!("token already refreshed by a concurrent request");
            return Ok(current);
        }
        let refreshed = self.auth.refresh(&current).await?;
        Ok(self
            .auth
            .save_credentials(refreshed.client, refreshed.token)
            .await?)
    }
}

fn needs_refresh(creds: &Credentials) -> bool {
    creds.client.is_some()
        && creds
            .token
            .as_access_token()
            .is_some_and(|t| t.refresh_token.is_some() && t.expires_soon(REFRESH_THRESHOLD))
}

/// Instance settings endpoints.
pub struct Settings<'a> {
    cozy: &'a Cozy,
}

/// Storage used by the instance, as reported by `/settings/disk-usage`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiskUsage {
    /// Bytes used, as a decimal string.
    #[serde(default)]
    pub used: Option<String>,
    /// Quota in bytes, absent when unlimited.
    #[serde(default)]
    pub quota: Option<String>,
    /// Number of files.
    #[serde(default)]
    pub count: Option<u64>,
}

#[derive(Deserialize)]
struct Document<T> {
    data: Resource<T>,
}

#[derive(Deserialize)]
struct Resource<T> {
    attributes: T,
}

impl Settings<'_> {
    pub async fn disk_usage(&self) -> Result<DiskUsage> {
        let doc: Document<DiskUsage> = self
            .cozy
            .fetch_json(Method::GET, DISK_USAGE_PATH, None)
            .await?;
        Ok(doc.data.attributes)
    }
}
