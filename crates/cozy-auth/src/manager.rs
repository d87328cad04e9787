//! Authentication manager
//!
//! One `AuthManager` per cozy. It picks the authentication mode at
//! construction (application token, OAuth, or nothing), runs the
//! authorization at most once, and hands the same `{client, token}` outcome
//! to every caller.
//!
//! The authorization runs in its own task: a caller that drops its
//! `authorize()` future does not cancel it, and later callers still observe
//! its result. Both success and failure are kept; only `save_credentials`
//! replaces the held credentials afterwards.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::backend::{AppTokenSource, BackendProbe};
use crate::constants::CREDS_KEY;
use crate::error::{Error, Result};
use crate::flow::{OAuthFlow, RegistrationHandler};
use crate::protocol;
use crate::storage::{CredentialStore, MemoryStorage, save_as};
use crate::transport::{Transport, Url};
use crate::types::{AccessToken, AppToken, Client, ClientParams, ClientPatch, Credentials, Token};

/// Progress of the one authorization a manager performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// `authorize()` was never called.
    None,
    Running,
    Ok,
    Error,
}

/// Whether a credential deposit was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Stored,
    /// Not in OAuth mode, or an authorization is running.
    Ignored,
}

/// Construction options. `token` and `oauth` are mutually exclusive.
#[derive(Clone, Default)]
pub struct AuthOptions {
    /// Application token. An empty string counts as absent.
    pub token: Option<String>,
    pub oauth: Option<OAuthOptions>,
    /// Token source for the legacy generation when neither mode is set.
    pub app_token_source: Option<Arc<dyn AppTokenSource>>,
}

#[derive(Clone, Default)]
pub struct OAuthOptions {
    /// Where credentials and pending registrations are kept. In memory when
    /// not set.
    pub storage: Option<Arc<dyn CredentialStore>>,
    pub client_params: ClientParams,
    pub on_registered: Option<Arc<dyn RegistrationHandler>>,
}

enum Mode {
    Token(AppToken),
    OAuth {
        storage: Arc<dyn CredentialStore>,
        params: ClientParams,
        handler: Option<Arc<dyn RegistrationHandler>>,
    },
    Unconfigured,
}

type Outcome = std::result::Result<Credentials, Error>;

enum Handle {
    Unset,
    Pending(watch::Receiver<Option<Outcome>>),
    Settled(Outcome),
}

struct Slot {
    state: AuthState,
    handle: Handle,
}

struct Inner {
    base: Url,
    transport: Arc<dyn Transport>,
    probe: Arc<dyn BackendProbe>,
    mode: Mode,
    app_token_source: Option<Arc<dyn AppTokenSource>>,
    /// Target of `save_credentials`. Only OAuth mode has one.
    storage: Option<Arc<dyn CredentialStore>>,
    slot: Mutex<Slot>,
}

/// Shared handle to a cozy's authentication state. Cheap to clone.
#[derive(Clone)]
pub struct AuthManager {
    inner: Arc<Inner>,
}

impl AuthManager {
    /// Build a manager for the cozy at `base`.
    ///
    /// Fails with `Error::Configuration` when both a token and OAuth options
    /// are given, or when `base` is not an http(s) URL. Makes no request.
    pub fn new(
        base: Url,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn BackendProbe>,
        options: AuthOptions,
    ) -> Result<Self> {
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Configuration(format!(
                "cozy URL must be http or https: {base}"
            )));
        }

        let token = options.token.filter(|t| !t.is_empty());
        let (mode, storage) = match (token, options.oauth) {
            (Some(_), Some(_)) => {
                return Err(Error::Configuration(
                    "a token and OAuth options cannot be used together".into(),
                ));
            }
            (Some(token), None) => (Mode::Token(AppToken::new(token)), None),
            (None, Some(oauth)) => {
                let flow_storage = oauth
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn CredentialStore>);
                let mode = Mode::OAuth {
                    storage: flow_storage.clone(),
                    params: oauth.client_params.with_defaults(),
                    handler: oauth.on_registered,
                };
                (mode, Some(flow_storage))
            }
            (None, None) => (Mode::Unconfigured, None),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                base,
                transport,
                probe,
                mode,
                app_token_source: options.app_token_source,
                storage,
                slot: Mutex::new(Slot {
                    state: AuthState::None,
                    handle: Handle::Unset,
                }),
            }),
        })
    }

    pub fn base(&self) -> &Url {
        &self.inner.base
    }

    pub async fn state(&self) -> AuthState {
        self.inner.slot.lock().await.state
    }

    /// Obtain the credentials requests are made with.
    ///
    /// The first call starts the authorization; concurrent and later calls
    /// share its outcome, error included.
    pub async fn authorize(&self) -> Result<Credentials> {
        let mut rx = {
            let mut guard = self.inner.slot.lock().await;
            let slot = &mut *guard;
            match &slot.handle {
                Handle::Settled(outcome) => return outcome.clone(),
                Handle::Pending(rx) => rx.clone(),
                Handle::Unset => {
                    if let Mode::OAuth { handler: None, .. } = self.inner.mode {
                        return Err(Error::Configuration(
                            "OAuth mode requires an on_registered handler".into(),
                        ));
                    }
                    let (tx, rx) = watch::channel(None);
                    slot.state = AuthState::Running;
                    slot.handle = Handle::Pending(rx.clone());

                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        let flow = tokio::spawn({
                            let inner = Arc::clone(&inner);
                            async move { inner.run().await }
                        });
                        let outcome = match flow.await {
                            Ok(outcome) => outcome,
                            Err(e) => Err(Error::Aborted(format!("authorization task failed: {e}"))),
                        };
                        inner.settle(&outcome).await;
                        tx.send_replace(Some(outcome));
                    });
                    rx
                }
            }
        };

        let settled = rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| Error::Aborted("authorization task ended without a result".into()))?;
        match settled.as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(Error::Aborted("authorization task ended without a result".into())),
        }
    }

    /// Deposit credentials obtained outside `authorize()` (a refreshed
    /// token, a manually completed redirect) and return them unchanged.
    ///
    /// See `deposit_credentials` for when the deposit is ignored.
    pub async fn save_credentials(&self, client: Option<Client>, token: Token) -> Result<Credentials> {
        let creds = Credentials { client, token };
        self.deposit_credentials(creds.clone()).await?;
        Ok(creds)
    }

    /// Persist `creds` under `"oauth-client"` and make them the outcome of
    /// `authorize()`.
    ///
    /// Ignored outside OAuth mode and while an authorization is running.
    /// The state is left as is.
    pub async fn deposit_credentials(&self, creds: Credentials) -> Result<SaveOutcome> {
        let Some(storage) = &self.inner.storage else {
            debug!("no credential storage outside OAuth mode, deposit ignored");
            return Ok(SaveOutcome::Ignored);
        };
        let mut slot = self.inner.slot.lock().await;
        if slot.state == AuthState::Running {
            warn!("authorization in progress, credential deposit ignored");
            return Ok(SaveOutcome::Ignored);
        }
        save_as(storage.as_ref(), CREDS_KEY, &creds).await?;
        slot.handle = Handle::Settled(Ok(creds));
        debug!("credentials deposited");
        Ok(SaveOutcome::Stored)
    }

    /// Refresh the access token of `creds`. The result is not deposited.
    pub async fn refresh(&self, creds: &Credentials) -> Result<Credentials> {
        let client = creds
            .client
            .as_ref()
            .ok_or_else(|| Error::MissingCredential("credentials have no OAuth client".into()))?;
        let token = creds.token.as_access_token().ok_or_else(|| {
            Error::MissingCredential("application tokens cannot be refreshed".into())
        })?;
        let refreshed = self.refresh_token(client, token).await?;
        Ok(Credentials {
            client: Some(client.clone()),
            token: Token::Access(refreshed),
        })
    }

    pub async fn register_client(&self, params: &ClientParams) -> Result<Client> {
        protocol::register_client(self.transport(), &self.inner.base, params).await
    }

    pub fn get_auth_code_url(&self, client: &Client, scopes: &[String], state: &str) -> Result<Url> {
        protocol::get_auth_code_url(&self.inner.base, client, scopes, state)
    }

    pub async fn update_client(&self, client: &Client, patch: &ClientPatch) -> Result<Client> {
        protocol::update_client(self.transport(), &self.inner.base, client, patch).await
    }

    pub async fn unregister_client(&self, client: &Client) -> Result<()> {
        protocol::unregister_client(self.transport(), &self.inner.base, client).await
    }

    pub async fn get_access_token(&self, client: &Client, code: &str) -> Result<AccessToken> {
        protocol::get_access_token(self.transport(), &self.inner.base, client, code).await
    }

    pub async fn refresh_token(&self, client: &Client, token: &AccessToken) -> Result<AccessToken> {
        protocol::refresh_token(self.transport(), &self.inner.base, client, token).await
    }

    pub async fn get_client(&self, client: &Client) -> Result<Client> {
        protocol::get_client(self.transport(), &self.inner.base, client).await
    }

    fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }
}

impl Inner {
    async fn run(&self) -> Outcome {
        let legacy = self.probe.is_legacy().await?;
        match &self.mode {
            Mode::OAuth { .. } if legacy => Err(Error::UnsupportedBackend(
                "OAuth is not available on this cozy".into(),
            )),
            Mode::OAuth {
                storage,
                params,
                handler,
            } => {
                let handler = handler.as_deref().ok_or_else(|| {
                    Error::Configuration("OAuth mode requires an on_registered handler".into())
                })?;
                let flow = OAuthFlow {
                    transport: self.transport.as_ref(),
                    base: &self.base,
                    storage: storage.as_ref(),
                    params,
                    handler,
                };
                flow.run().await
            }
            Mode::Token(token) => Ok(Credentials {
                client: None,
                token: Token::App(token.clone()),
            }),
            Mode::Unconfigured => match (&self.app_token_source, legacy) {
                (Some(source), true) => Ok(Credentials {
                    client: None,
                    token: Token::App(source.app_token().await?),
                }),
                _ => Err(Error::MissingCredential(
                    "no token or OAuth options configured".into(),
                )),
            },
        }
    }

    async fn settle(&self, outcome: &Outcome) {
        let mut slot = self.slot.lock().await;
        match outcome {
            Ok(_) => {
                slot.state = AuthState::Ok;
                info!("authorization succeeded");
            }
            Err(e) => {
                slot.state = AuthState::Error;
                warn!(error = %e, "authorization failed");
            }
        }
        slot.handle = Handle::Settled(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KnownBackend, StatusProbe};
    use crate::storage::load_as;
    use crate::test_support::{
        ApprovingHandler, GatedHandler, StubTransport, base_url, registration_body, token_body,
    };
    use crate::transport::Method;
    use std::future::Future;
    use std::pin::Pin;

    fn params() -> ClientParams {
        ClientParams {
            redirect_uris: vec!["http://localhost/callback".into()],
            client_name: Some("Test app".into()),
            scopes: vec!["io.cozy.files".into()],
            ..ClientParams::default()
        }
    }

    fn oauth_options(
        storage: Arc<dyn CredentialStore>,
        handler: Arc<dyn RegistrationHandler>,
    ) -> AuthOptions {
        AuthOptions {
            oauth: Some(OAuthOptions {
                storage: Some(storage),
                client_params: params(),
                on_registered: Some(handler),
            }),
            ..AuthOptions::default()
        }
    }

    fn manager(stub: &Arc<StubTransport>, legacy: bool, options: AuthOptions) -> AuthManager {
        AuthManager::new(
            base_url(),
            stub.clone(),
            Arc::new(KnownBackend { legacy }),
            options,
        )
        .unwrap()
    }

    fn stub_oauth_server(stub: &StubTransport) {
        stub.respond(Method::POST, "/auth/register", 201, registration_body("abc"));
        stub.respond(Method::POST, "/auth/access_token", 200, token_body("tok1", "ref1"));
    }

    #[tokio::test]
    async fn token_mode_returns_app_token_without_client() {
        let stub = StubTransport::new();
        let manager = manager(
            &stub,
            false,
            AuthOptions {
                token: Some("t0k".into()),
                ..AuthOptions::default()
            },
        );

        let creds = manager.authorize().await.unwrap();
        assert!(creds.client.is_none());
        assert_eq!(creds.token, Token::App(AppToken::new("t0k")));
        assert_eq!(manager.state().await, AuthState::Ok);
        assert_eq!(stub.total_requests(), 0);
    }

    #[tokio::test]
    async fn token_and_oauth_together_is_configuration_error() {
        let stub = StubTransport::new();
        let mut options = oauth_options(
            Arc::new(MemoryStorage::new()),
            Arc::new(ApprovingHandler::default()),
        );
        options.token = Some("t0k".into());

        let result = AuthManager::new(
            base_url(),
            stub.clone(),
            Arc::new(KnownBackend { legacy: false }),
            options,
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert_eq!(stub.total_requests(), 0);
    }

    #[tokio::test]
    async fn empty_token_counts_as_absent() {
        let stub = StubTransport::new();
        let manager = manager(
            &stub,
            false,
            AuthOptions {
                token: Some(String::new()),
                ..AuthOptions::default()
            },
        );
        assert!(matches!(
            manager.authorize().await,
            Err(Error::MissingCredential(_))
        ));
    }

    #[tokio::test]
    async fn non_http_base_is_rejected() {
        let result = AuthManager::new(
            Url::parse("ftp://alice.cozy.example").unwrap(),
            StubTransport::new(),
            Arc::new(KnownBackend { legacy: false }),
            AuthOptions::default(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn oauth_on_legacy_backend_is_unsupported() {
        let stub = StubTransport::new();
        stub_oauth_server(&stub);
        let manager = manager(
            &stub,
            true,
            oauth_options(
                Arc::new(MemoryStorage::new()),
                Arc::new(ApprovingHandler::default()),
            ),
        );

        let err = manager.authorize().await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedBackend(_)));
        assert_eq!(stub.count(Method::POST, "/auth/register"), 0);
        assert_eq!(manager.state().await, AuthState::Error);
    }

    #[tokio::test]
    async fn end_to_end_oauth_persists_credentials() {
        let stub = StubTransport::new();
        stub.respond(Method::GET, "/status/", 200, r#"{"couchdb":"ok"}"#);
        stub_oauth_server(&stub);
        let storage = Arc::new(MemoryStorage::new());
        let handler = Arc::new(ApprovingHandler::default());
        let probe = Arc::new(StatusProbe::new(stub.clone(), base_url()));
        let manager = AuthManager::new(
            base_url(),
            stub.clone(),
            probe,
            oauth_options(storage.clone(), handler.clone()),
        )
        .unwrap();

        let creds = manager.authorize().await.unwrap();
        assert_eq!(creds.client.as_ref().unwrap().client_id, "abc");
        assert_eq!(creds.token.bearer(), "tok1");
        assert_eq!(handler.calls(), 1);

        let persisted = storage.load(CREDS_KEY).await.unwrap().unwrap();
        assert_eq!(persisted["client"]["client_id"], "abc");
        assert_eq!(persisted["token"]["accessToken"], "tok1");
        assert_eq!(persisted["token"]["refreshToken"], "ref1");

        let requests = stub.requests(Method::POST, "/auth/access_token");
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_authorize_calls_share_one_flow() {
        let stub = StubTransport::new();
        stub_oauth_server(&stub);
        let manager = manager(
            &stub,
            false,
            oauth_options(
                Arc::new(MemoryStorage::new()),
                Arc::new(ApprovingHandler::default()),
            ),
        );

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.authorize().await })
            })
            .collect();
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }

        assert!(results.iter().all(|c| *c == results[0]));
        assert_eq!(stub.count(Method::POST, "/auth/register"), 1);
        assert_eq!(stub.count(Method::POST, "/auth/access_token"), 1);
    }

    #[tokio::test]
    async fn deposit_while_running_is_ignored() {
        let stub = StubTransport::new();
        stub_oauth_server(&stub);
        let storage = Arc::new(MemoryStorage::new());
        let handler = Arc::new(GatedHandler::default());
        let manager = manager(&stub, false, oauth_options(storage.clone(), handler.clone()));

        let running = tokio::spawn({
            let manager = manager.clone();
            async move { manager.authorize().await }
        });
        handler.entered.notified().await;
        assert_eq!(manager.state().await, AuthState::Running);

        let outcome = manager
            .deposit_credentials(Credentials {
                client: None,
                token: AppToken::new("intruder").into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Ignored);
        assert_eq!(storage.load(CREDS_KEY).await.unwrap(), None);

        handler.release.notify_one();
        let creds = running.await.unwrap().unwrap();
        assert_eq!(creds.token.bearer(), "tok1");
        let persisted: Credentials = load_as(storage.as_ref(), CREDS_KEY).await.unwrap().unwrap();
        assert_eq!(persisted.token.bearer(), "tok1");
    }

    #[tokio::test]
    async fn rotated_token_deposit_is_what_storage_returns() {
        let stub = StubTransport::new();
        stub_oauth_server(&stub);
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(
            &stub,
            false,
            oauth_options(storage.clone(), Arc::new(ApprovingHandler::default())),
        );
        let creds = manager.authorize().await.unwrap();

        stub.respond(Method::POST, "/auth/access_token", 200, token_body("tok2", "ref2"));
        let refreshed = manager.refresh(&creds).await.unwrap();
        let saved = manager
            .save_credentials(refreshed.client.clone(), refreshed.token.clone())
            .await
            .unwrap();
        assert_eq!(saved, refreshed);

        let persisted: Credentials = load_as(storage.as_ref(), CREDS_KEY).await.unwrap().unwrap();
        let token = persisted.token.as_access_token().unwrap();
        assert_eq!(token.access_token, "tok2");
        assert_eq!(token.refresh_token.as_deref(), Some("ref2"));
        assert_eq!(manager.authorize().await.unwrap(), refreshed);
        assert_eq!(manager.state().await, AuthState::Ok);
    }

    #[tokio::test]
    async fn failure_is_kept_until_credentials_are_deposited() {
        let stub = StubTransport::new();
        stub.respond(Method::POST, "/auth/register", 500, "boom");
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(
            &stub,
            false,
            oauth_options(storage.clone(), Arc::new(ApprovingHandler::default())),
        );

        let first = manager.authorize().await.unwrap_err();
        assert!(matches!(first, Error::Registration(_)));
        let second = manager.authorize().await.unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(stub.count(Method::POST, "/auth/register"), 1);
        assert_eq!(manager.state().await, AuthState::Error);

        let token = Token::App(AppToken::new("manual"));
        let outcome = manager
            .deposit_credentials(Credentials {
                client: None,
                token: token.clone(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Stored);
        assert_eq!(manager.authorize().await.unwrap().token, token);
        assert_eq!(manager.state().await, AuthState::Error);
    }

    #[tokio::test]
    async fn oauth_without_handler_fails_before_any_request() {
        let stub = StubTransport::new();
        let manager = manager(
            &stub,
            false,
            AuthOptions {
                oauth: Some(OAuthOptions {
                    client_params: params(),
                    ..OAuthOptions::default()
                }),
                ..AuthOptions::default()
            },
        );

        assert!(matches!(
            manager.authorize().await,
            Err(Error::Configuration(_))
        ));
        assert_eq!(manager.state().await, AuthState::None);
        assert_eq!(stub.total_requests(), 0);
    }

    struct FixedSource;

    impl AppTokenSource for FixedSource {
        fn app_token(&self) -> Pin<Box<dyn Future<Output = Result<AppToken>> + Send + '_>> {
            Box::pin(async { Ok(AppToken::new("legacy-token")) })
        }
    }

    #[tokio::test]
    async fn unconfigured_manager_uses_legacy_token_source() {
        let stub = StubTransport::new();
        let with_source = || AuthOptions {
            app_token_source: Some(Arc::new(FixedSource) as Arc<dyn AppTokenSource>),
            ..AuthOptions::default()
        };

        let legacy = manager(&stub, true, with_source());
        let creds = legacy.authorize().await.unwrap();
        assert_eq!(creds.token.bearer(), "legacy-token");
        assert!(creds.client.is_none());

        let current = manager(&stub, false, with_source());
        assert!(matches!(
            current.authorize().await,
            Err(Error::MissingCredential(_))
        ));

        let bare = manager(&stub, true, AuthOptions::default());
        assert!(matches!(
            bare.authorize().await,
            Err(Error::MissingCredential(_))
        ));
    }

    struct PanickingHandler;

    impl RegistrationHandler for PanickingHandler {
        fn on_registered<'a>(
            &'a self,
            _client: &'a Client,
            _url: &'a Url,
        ) -> Pin<Box<dyn Future<Output = Result<Url>> + Send + 'a>> {
            Box::pin(async { host_callback_bug() })
        }
    }

    fn host_callback_bug() -> Result<Url> {
        panic!("host callback bug")
    }

    #[tokio::test]
    async fn panicking_flow_settles_as_error() {
        let stub = StubTransport::new();
        stub_oauth_server(&stub);
        let manager = manager(
            &stub,
            false,
            oauth_options(Arc::new(MemoryStorage::new()), Arc::new(PanickingHandler)),
        );

        let err = manager.authorize().await.unwrap_err();
        assert!(matches!(err, Error::Aborted(_)));
        assert_eq!(manager.state().await, AuthState::Error);
        assert!(matches!(manager.authorize().await, Err(Error::Aborted(_))));

        let outcome = manager
            .deposit_credentials(Credentials {
                client: None,
                token: AppToken::new("manual").into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Stored);
        assert_eq!(manager.authorize().await.unwrap().token.bearer(), "manual");
    }

    #[tokio::test]
    async fn oauth_without_configured_storage_keeps_rotated_token() {
        let stub = StubTransport::new();
        stub_oauth_server(&stub);
        let manager = manager(
            &stub,
            false,
            AuthOptions {
                oauth: Some(OAuthOptions {
                    client_params: params(),
                    on_registered: Some(
                        Arc::new(ApprovingHandler::default()) as Arc<dyn RegistrationHandler>
                    ),
                    ..OAuthOptions::default()
                }),
                ..AuthOptions::default()
            },
        );
        let creds = manager.authorize().await.unwrap();

        stub.respond(Method::POST, "/auth/access_token", 200, token_body("tok2", "ref2"));
        let refreshed = manager.refresh(&creds).await.unwrap();
        let outcome = manager.deposit_credentials(refreshed.clone()).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Stored);

        let after = manager.authorize().await.unwrap();
        assert_eq!(after, refreshed);
        assert_eq!(
            after.token.as_access_token().unwrap().refresh_token.as_deref(),
            Some("ref2")
        );
    }

    #[tokio::test]
    async fn deposit_without_storage_is_ignored() {
        let stub = StubTransport::new();
        let manager = manager(
            &stub,
            false,
            AuthOptions {
                token: Some("t0k".into()),
                ..AuthOptions::default()
            },
        );
        let outcome = manager
            .deposit_credentials(Credentials {
                client: None,
                token: AppToken::new("other").into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Ignored);
        assert_eq!(manager.authorize().await.unwrap().token.bearer(), "t0k");
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_the_flow() {
        let stub = StubTransport::new();
        stub_oauth_server(&stub);
        let handler = Arc::new(GatedHandler::default());
        let manager = manager(
            &stub,
            false,
            oauth_options(Arc::new(MemoryStorage::new()), handler.clone()),
        );

        let abandoned = tokio::spawn({
            let manager = manager.clone();
            async move { manager.authorize().await }
        });
        handler.entered.notified().await;
        abandoned.abort();
        assert!(abandoned.await.unwrap_err().is_cancelled());

        handler.release.notify_one();
        let creds = manager.authorize().await.unwrap();
        assert_eq!(creds.token.bearer(), "tok1");
        assert_eq!(stub.count(Method::POST, "/auth/register"), 1);
    }

    #[tokio::test]
    async fn delegated_operations_use_manager_base() {
        let stub = StubTransport::new();
        stub.respond(Method::POST, "/auth/register", 201, registration_body("abc"));
        let manager = manager(&stub, false, AuthOptions::default());

        let client = manager.register_client(&params()).await.unwrap();
        let url = manager
            .get_auth_code_url(&client, &["io.cozy.files".into()], "s")
            .unwrap();
        assert_eq!(url.host_str(), Some("alice.cozy.example"));
        assert_eq!(url.path(), "/auth/authorize");
    }
}
