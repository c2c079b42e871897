//! Error types for authorization, remote calls and sync rounds.

use std::path::PathBuf;

use quire_core::StoreError;
use thiserror::Error;

/// Errors from the authorization flow and token endpoint.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials are stored; the user must connect first.
    #[error("Not connected to the remote store")]
    NotConnected,

    /// The user declined access on the provider's consent page.
    #[error("Authorization denied: {reason}")]
    Denied { reason: String },

    /// The redirect's `state` does not match the pending request.
    #[error("Authorization state mismatch")]
    StateMismatch,

    /// The redirect carried neither a code nor an error.
    #[error("Redirect URL has no authorization code")]
    MissingCode,

    /// The redirect URL could not be parsed.
    #[error("Invalid redirect URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The token endpoint refused the request.
    #[error("Token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    /// The remote kept rejecting a freshly refreshed token.
    #[error("Access token rejected by the remote store")]
    Rejected,

    /// Transport failure talking to the token endpoint.
    #[error("Network error talking to the token endpoint: {0}")]
    Http(#[from] reqwest::Error),

    /// Credential file could not be read or written.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Credential file is not valid JSON.
    #[error("Invalid credentials file {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl AuthError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from a single remote store call.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The access token was missing, expired or revoked (HTTP 401).
    #[error("Remote store rejected the access token")]
    Unauthorized,

    /// The path does not exist remotely.
    #[error("Remote path not found: {path}")]
    NotFound { path: String },

    /// The API refused the call with a structured error.
    #[error("{endpoint} failed: {summary}")]
    Api { endpoint: String, summary: String },

    /// Unexpected HTTP status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The remote could not be reached.
    #[error("Remote store unreachable: {message}")]
    Unavailable { message: String },

    /// Transport failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("Unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl RemoteError {
    /// Transient failures worth retrying on the next trigger.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::Network(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Why a sync round failed. Local state is untouched whenever this is returned.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing, expired or rejected credentials; the user has to reconnect.
    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthError),

    /// Transient connectivity problem.
    #[error("Network failure: {0}")]
    Network(#[source] RemoteError),

    /// The remote store refused an operation.
    #[error("Remote store error: {0}")]
    Remote(#[source] RemoteError),

    /// Local state could not be loaded or saved.
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Whether the next trigger may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Auth(AuthError::Http(_)) => true,
            Self::Remote(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the user has to reconnect before syncing again.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            Self::Auth(
                AuthError::NotConnected | AuthError::Rejected | AuthError::TokenEndpoint { .. }
            )
        )
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Unauthorized => Self::Auth(AuthError::Rejected),
            e if e.is_transient() => Self::Network(e),
            e => Self::Remote(e),
        }
    }
}
