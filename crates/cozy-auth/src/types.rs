//! Credential and client registration types
//!
//! Field names follow the persisted shape: client fields are snake_case (as
//! the registration endpoint returns them), token fields are camelCase.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SOFTWARE_ID;
use crate::error::{Error, Result};

/// Description of the requesting application, sent at registration.
///
/// `scopes` are not part of the registration document; they are requested
/// on the authorization URL. Immutable once handed to the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientParams {
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub software_id: Option<String>,
    #[serde(default)]
    pub software_version: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_kind: Option<String>,
    #[serde(default)]
    pub client_uri: Option<String>,
    #[serde(default)]
    pub logo_uri: Option<String>,
    #[serde(default)]
    pub policy_uri: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ClientParams {
    /// Fill the fields the caller left empty with SDK defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.software_id.as_deref().is_none_or(str::is_empty) {
            self.software_id = Some(DEFAULT_SOFTWARE_ID.to_string());
        }
        self
    }
}

/// An OAuth2 client as registered on the cozy.
///
/// `client_id` is empty until the client has been registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub registration_access_token: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_uri: Option<String>,
}

impl Client {
    /// An unregistered client carrying the application metadata.
    pub fn from_params(params: &ClientParams) -> Self {
        Self {
            redirect_uris: params.redirect_uris.clone(),
            software_id: params.software_id.clone(),
            software_version: params.software_version.clone(),
            client_name: params.client_name.clone(),
            client_kind: params.client_kind.clone(),
            client_uri: params.client_uri.clone(),
            logo_uri: params.logo_uri.clone(),
            policy_uri: params.policy_uri.clone(),
            ..Self::default()
        }
    }

    pub fn is_registered(&self) -> bool {
        !self.client_id.is_empty()
    }

    /// Fail unless the client has an ID (and thus a registration endpoint).
    pub(crate) fn ensure_registered(&self) -> Result<()> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(Error::Configuration("client is not registered".into()))
        }
    }

    /// The first redirect URI, used for the authorization request.
    pub fn redirect_uri(&self) -> Result<&str> {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .ok_or_else(|| Error::Configuration("client has no redirect URI".into()))
    }

    /// Registration document (metadata only, without credentials).
    pub(crate) fn registration_document(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut doc = serde_json::Map::new();
        doc.insert("redirect_uris".into(), self.redirect_uris.clone().into());
        let optional = [
            ("software_id", &self.software_id),
            ("software_version", &self.software_version),
            ("client_name", &self.client_name),
            ("client_kind", &self.client_kind),
            ("client_uri", &self.client_uri),
            ("logo_uri", &self.logo_uri),
            ("policy_uri", &self.policy_uri),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                doc.insert(name.into(), value.clone().into());
            }
        }
        doc
    }

    /// Merge a registration endpoint response over this client.
    ///
    /// The read endpoint omits the secret and registration token, so absent
    /// fields keep their current value.
    pub(crate) fn merged_with(&self, response: RegistrationResponse) -> Result<Client> {
        let client_id = response
            .client_id
            .or_else(|| self.is_registered().then(|| self.client_id.clone()))
            .ok_or_else(|| Error::CredentialParse("registration response has no client_id".into()))?;
        Ok(Client {
            client_id,
            client_secret: response
                .client_secret
                .unwrap_or_else(|| self.client_secret.clone()),
            registration_access_token: response
                .registration_access_token
                .unwrap_or_else(|| self.registration_access_token.clone()),
            redirect_uris: response
                .redirect_uris
                .unwrap_or_else(|| self.redirect_uris.clone()),
            software_id: response.software_id.or_else(|| self.software_id.clone()),
            software_version: response
                .software_version
                .or_else(|| self.software_version.clone()),
            client_name: response.client_name.or_else(|| self.client_name.clone()),
            client_kind: response.client_kind.or_else(|| self.client_kind.clone()),
            client_uri: response.client_uri.or_else(|| self.client_uri.clone()),
            logo_uri: response.logo_uri.or_else(|| self.logo_uri.clone()),
            policy_uri: response.policy_uri.or_else(|| self.policy_uri.clone()),
        })
    }
}

/// Body of the registration endpoints (`POST`, `GET`, `PUT`).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RegistrationResponse {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub registration_access_token: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub software_id: Option<String>,
    pub software_version: Option<String>,
    pub client_name: Option<String>,
    pub client_kind: Option<String>,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
    pub policy_uri: Option<String>,
}

/// Changes applied by `update_client`. `None` fields are left as registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPatch {
    pub redirect_uris: Option<Vec<String>>,
    pub software_version: Option<String>,
    pub client_name: Option<String>,
    pub client_kind: Option<String>,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
    pub policy_uri: Option<String>,
    /// Ask the server to issue a new client secret.
    pub reset_secret: bool,
}

impl ClientPatch {
    pub(crate) fn apply(&self, client: &Client) -> Client {
        let mut patched = client.clone();
        if let Some(uris) = &self.redirect_uris {
            patched.redirect_uris = uris.clone();
        }
        let fields = [
            (&mut patched.software_version, &self.software_version),
            (&mut patched.client_name, &self.client_name),
            (&mut patched.client_kind, &self.client_kind),
            (&mut patched.client_uri, &self.client_uri),
            (&mut patched.logo_uri, &self.logo_uri),
            (&mut patched.policy_uri, &self.policy_uri),
        ];
        for (target, value) in fields {
            if value.is_some() {
                *target = value.clone();
            }
        }
        patched
    }
}

/// OAuth access token as persisted.
///
/// `expires_at` is a unix timestamp in milliseconds, computed from the
/// server's `expires_in` delta at receipt time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl AccessToken {
    /// Whether the token expires within `threshold_millis` of `now_millis`.
    /// Tokens without a known expiry never report as expiring.
    pub fn expires_within(&self, now_millis: u64, threshold_millis: u64) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now_millis.saturating_add(threshold_millis))
    }

    /// `expires_within` against the current clock.
    pub fn expires_soon(&self, threshold: std::time::Duration) -> bool {
        self.expires_within(now_millis(), threshold.as_millis() as u64)
    }
}

/// Opaque application token used by the legacy and token-only modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppToken {
    pub token: String,
}

impl AppToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

/// Either kind of bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Access(AccessToken),
    App(AppToken),
}

impl Token {
    /// Raw bearer value.
    pub fn bearer(&self) -> &str {
        match self {
            Token::Access(t) => &t.access_token,
            Token::App(t) => &t.token,
        }
    }

    /// Value for the `Authorization` header.
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.bearer())
    }

    pub fn as_access_token(&self) -> Option<&AccessToken> {
        match self {
            Token::Access(t) => Some(t),
            Token::App(_) => None,
        }
    }
}

impl From<AccessToken> for Token {
    fn from(token: AccessToken) -> Self {
        Token::Access(token)
    }
}

impl From<AppToken> for Token {
    fn from(token: AppToken) -> Self {
        Token::App(token)
    }
}

/// The `{client, token}` pair every authorized request is made with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub client: Option<Client>,
    pub token: Token,
}

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Convert to a persisted token. `previous_refresh` is kept when the
    /// server did not rotate the refresh token.
    pub fn into_access_token(self, now_millis: u64, previous_refresh: Option<String>) -> AccessToken {
        AccessToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            scope: self.scope,
            token_type: self.token_type,
            expires_at: self
                .expires_in
                .map(|secs| now_millis.saturating_add(secs.saturating_mul(1000))),
        }
    }
}

/// Current time as unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
