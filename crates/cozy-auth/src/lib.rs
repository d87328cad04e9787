//! Cozy authentication core
//!
//! Everything a cozy client needs to obtain and keep a bearer credential:
//! the OAuth2 dynamic client registration protocol, a pluggable credential
//! store, and the `AuthManager` state machine that runs the authorization
//! once and shares its outcome. HTTP goes through the injected `Transport`
//! so the crate can be driven by a stub in tests.
//!
//! OAuth flow:
//! 1. `AuthManager::authorize()` probes the backend generation
//! 2. A stored client is re-validated with `protocol::get_client()`, or a new
//!    one registered with `protocol::register_client()`
//! 3. The host's `RegistrationHandler` opens `protocol::get_auth_code_url()`
//!    and returns the redirect page
//! 4. `protocol::get_access_token()` exchanges the code; the pair is saved
//!    under `"oauth-client"`
//! 5. Refreshed tokens are deposited with `AuthManager::save_credentials()`

pub mod backend;
pub mod constants;
pub mod error;
pub mod flow;
pub mod manager;
pub mod protocol;
pub mod storage;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use backend::{AppTokenSource, BackendProbe, KnownBackend, StatusProbe};
pub use constants::*;
pub use error::{Error, Result, ServerError};
pub use flow::RegistrationHandler;
pub use manager::{AuthManager, AuthOptions, AuthState, OAuthOptions, SaveOutcome};
pub use protocol::{
    generate_state, get_access_token, get_auth_code_url, get_client, parse_redirect,
    refresh_token, register_client, unregister_client, update_client,
};
pub use storage::{CredentialStore, FileBackend, KeyValueBackend, LocalStorage, MemoryStorage};
pub use transport::{
    Body, HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, Url, endpoint,
};
pub use types::{
    AccessToken, AppToken, Client, ClientParams, ClientPatch, Credentials, Token, TokenResponse,
};
