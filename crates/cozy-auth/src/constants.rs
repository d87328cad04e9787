//! Cozy OAuth constants
//!
//! Endpoint paths are relative to the cozy base URL. Storage keys are the
//! logical keys the flow uses inside a `CredentialStore`; each store adds its
//! own namespace prefix.

/// Dynamic client registration endpoint (`POST`), and the base for
/// per-client `GET`/`PUT`/`DELETE` at `/auth/register/{client_id}`.
pub const REGISTER_PATH: &str = "/auth/register";

/// Authorization endpoint. Opened in a browser, never fetched by the SDK.
pub const AUTHORIZE_PATH: &str = "/auth/authorize";

/// Token endpoint for code exchange and token refresh.
pub const TOKEN_PATH: &str = "/auth/access_token";

/// Instance status endpoint used to detect the backend generation.
pub const STATUS_PATH: &str = "/status/";

/// Storage key holding the persisted `{client, token}` pair.
pub const CREDS_KEY: &str = "oauth-client";

/// Storage key holding a registration waiting for its redirect.
pub const STATE_KEY: &str = "state";

/// Default namespace prefix for durable stores.
pub const DEFAULT_STORAGE_PREFIX: &str = "cozy:oauth:";

/// Software ID sent at registration when the caller does not provide one.
pub const DEFAULT_SOFTWARE_ID: &str = "github.com/cozy/cozy-client-rs";
