//! OAuth authorization flow
//!
//! Produces a `{client, token}` pair for a cozy, reusing what the store
//! already holds when possible:
//!
//! 1. Stored credentials are re-validated against the registration endpoint.
//!    A revoked client is forgotten; an unreachable server keeps the stored
//!    pair usable.
//! 2. Otherwise a pending registration (client registered, redirect not yet
//!    completed) is resumed, or a new client is registered and its
//!    authorization URL recorded under `STATE_KEY`.
//! 3. The host is handed the authorization URL and resolves to the redirect
//!    page URL; the code on it is exchanged and the result persisted.
//!
//! A revoked client or unreadable stored data clears the store and restarts
//! the flow once.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::{CREDS_KEY, STATE_KEY};
use crate::error::{Error, Result};
use crate::protocol;
use crate::storage::{CredentialStore, load_as, save_as};
use crate::transport::{Transport, Url};
use crate::types::{Client, ClientParams, Credentials, Token};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Host callback invoked once a client is registered (`onRegistered`).
///
/// The host displays `url` to the user (or redirects to it) and resolves to
/// the URL the authorization server redirected back to, carrying `code` and
/// `state` in its query.
pub trait RegistrationHandler: Send + Sync {
    fn on_registered<'a>(&'a self, client: &'a Client, url: &'a Url) -> BoxFuture<'a, Result<Url>>;
}

/// A registered client waiting for its authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PendingRegistration {
    pub client: Client,
    pub url: String,
    pub state: String,
}

/// Collaborators of one flow run.
pub(crate) struct OAuthFlow<'a> {
    pub transport: &'a dyn Transport,
    pub base: &'a Url,
    pub storage: &'a dyn CredentialStore,
    pub params: &'a ClientParams,
    pub handler: &'a dyn RegistrationHandler,
}

impl OAuthFlow<'_> {
    pub async fn run(&self) -> Result<Credentials> {
        match self.attempt().await {
            Err(e) if e.is_revoked() || matches!(e, Error::CredentialParse(_)) => {
                warn!(error = %e, "stored OAuth data unusable, clearing and starting over");
                self.storage.clear().await?;
                self.attempt().await
            }
            other => other,
        }
    }

    async fn attempt(&self) -> Result<Credentials> {
        if let Some(stored) = load_as::<Credentials>(self.storage, CREDS_KEY).await? {
            let creds = self.revalidate(stored).await?;
            save_as(self.storage, CREDS_KEY, &creds).await?;
            return Ok(creds);
        }

        let pending = match load_as::<PendingRegistration>(self.storage, STATE_KEY).await? {
            Some(pending) => {
                info!(client_id = %pending.client.client_id, "resuming pending registration");
                pending
            }
            None => self.register().await?,
        };

        let url = Url::parse(&pending.url)
            .map_err(|e| Error::CredentialParse(format!("stored authorization URL: {e}")))?;
        let page = self.handler.on_registered(&pending.client, &url).await?;
        let code = protocol::parse_redirect(&page, &pending.state)?;
        let token =
            protocol::get_access_token(self.transport, self.base, &pending.client, &code).await?;
        self.storage.delete(STATE_KEY).await?;

        let creds = Credentials {
            client: Some(pending.client),
            token: Token::Access(token),
        };
        save_as(self.storage, CREDS_KEY, &creds).await?;
        info!("OAuth authorization completed");
        Ok(creds)
    }

    /// Check a stored pair against the server before reusing it.
    async fn revalidate(&self, stored: Credentials) -> Result<Credentials> {
        let (Some(client), Token::Access(token)) = (stored.client, stored.token) else {
            return Err(Error::CredentialParse(
                "stored credentials are not an OAuth client and access token".into(),
            ));
        };
        match protocol::get_client(self.transport, self.base, &client).await {
            Ok(fresh) => {
                debug!(client_id = %fresh.client_id, "reusing stored OAuth client");
                Ok(Credentials {
                    client: Some(fresh),
                    token: Token::Access(token),
                })
            }
            Err(e) if e.is_revoked() => Err(e),
            Err(e) => {
                warn!(client_id = %client.client_id, error = %e, "could not refresh stored client, using it as is");
                Ok(Credentials {
                    client: Some(client),
                    token: Token::Access(token),
                })
            }
        }
    }

    /// Register a fresh client and record its authorization URL.
    async fn register(&self) -> Result<PendingRegistration> {
        self.storage.clear().await?;
        let client = protocol::register_client(self.transport, self.base, self.params).await?;
        let state = protocol::generate_state();
        let url = protocol::get_auth_code_url(self.base, &client, &self.params.scopes, &state)?;
        let pending = PendingRegistration {
            client,
            url: url.to_string(),
            state,
        };
        save_as(self.storage, STATE_KEY, &pending).await?;
        Ok(pending)
    }
}
