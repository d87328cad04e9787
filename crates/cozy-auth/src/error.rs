//! Error types for authentication operations
//!
//! `Error` is `Clone` because a single authorization outcome is handed to
//! every caller waiting on it.

use std::fmt;

use serde::Deserialize;

/// Error details reported by the authorization server.
///
/// `status` is `None` when the request never produced a response (transport
/// failure, timeout). `code` is the OAuth `error` member when the body had one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub description: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

impl ServerError {
    /// Build from a non-success response, decoding an OAuth error body if present.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody {
                error: Some(code),
                error_description,
            }) => Self {
                status: Some(status),
                description: error_description.unwrap_or_else(|| code.clone()),
                code: Some(code),
            },
            _ => Self {
                status: Some(status),
                code: None,
                description: if body.trim().is_empty() {
                    String::from("<no body>")
                } else {
                    body.trim().to_string()
                },
            },
        }
    }

    /// A failure that happened before any response was received.
    pub fn transport(description: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            description: description.into(),
        }
    }

    /// A 2xx response whose body could not be decoded.
    pub fn malformed(status: u16, description: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: Some(String::from("malformed_response")),
            description: description.into(),
        }
    }

    /// Whether the registration this request used no longer exists server-side.
    pub fn is_revoked(&self) -> bool {
        matches!(self.status, Some(401) | Some(404))
            || matches!(
                self.description.as_str(),
                "Client not found" | "Invalid JWT token" | "Invalid token"
            )
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "{status} {code}: {}", self.description),
            (Some(status), None) => write!(f, "{status}: {}", self.description),
            (None, _) => write!(f, "{}", self.description),
        }
    }
}

/// Errors from authentication operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("client registration failed: {0}")]
    Registration(ServerError),

    #[error("token exchange failed: {0}")]
    TokenExchange(ServerError),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("authorization aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// The server details carried by registration and token errors.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Error::Registration(e) | Error::TokenExchange(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the refresh token (or code) was rejected as `invalid_grant`.
    ///
    /// The caller has to run the full authorization flow again.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Error::TokenExchange(e) if e.code.as_deref() == Some("invalid_grant"))
    }

    /// Whether the client registration behind this error has been revoked.
    pub fn is_revoked(&self) -> bool {
        self.server_error().is_some_and(ServerError::is_revoked)
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
