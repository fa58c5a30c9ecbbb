//! Authentication error taxonomy.
//!
//! Terminal protocol outcomes (`AccessDenied`, `DeviceCodeExpired`) are never
//! retried; transient transport failures are retried within a bounded budget
//! and then surface as `BackendUnavailable`. Error text never contains raw
//! token material.

use thiserror::Error;

/// Errors produced by the device authorization orchestrator and the
/// session/credential lifecycle manager.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The authorization server does not advertise the device authorization
    /// grant (no `device_authorization_endpoint` in its metadata).
    #[error("authorization server does not support the device authorization grant")]
    UnsupportedGrant,

    /// Fetching or validating the authorization server metadata failed.
    #[error("authorization server metadata discovery failed: {0}")]
    MetadataDiscovery(String),

    /// The device authorization endpoint rejected the initiation request.
    #[error("device authorization initiation failed: {error} ({})", .description.as_deref().unwrap_or("no description"))]
    DeviceInitiationFailed {
        /// OAuth error code returned by the backend.
        error: String,
        /// Optional human-readable description from the backend.
        description: Option<String>,
    },

    /// The user denied the authorization request. Terminal, never retried.
    #[error("authorization was denied; restart the flow to try again")]
    AccessDenied,

    /// The device code expired before the user completed authorization.
    /// Terminal, never retried.
    #[error("device code expired; restart the flow to obtain a new code")]
    DeviceCodeExpired,

    /// The grant's absolute deadline passed while polling.
    #[error("device authorization timed out before the user completed it")]
    Timeout,

    /// The caller cancelled the flow (for example, the client disconnected
    /// during authentication).
    #[error("device authorization was cancelled")]
    Cancelled,

    /// The session exists but has no bound user, or the session is unknown.
    #[error("session is not authenticated")]
    NotAuthenticated,

    /// The stored credential is expired and could not be refreshed; the user
    /// must re-authenticate.
    #[error("credential expired; re-authentication required")]
    CredentialExpired,

    /// A session that is already bound to one user was asked to bind to a
    /// different user.
    #[error("session is already bound to a different user")]
    SessionRebind,

    /// Transient network or backend failure after the retry budget was
    /// exhausted. Try again later.
    #[error("authorization backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend returned a response we could not parse.
    #[error("invalid response from authorization backend: {0}")]
    InvalidResponse(String),

    /// HTTP-level failure (client construction, malformed endpoint URL).
    #[error("http error: {0}")]
    Http(String),
}

impl AuthError {
    /// Whether the caller can recover by restarting the device flow.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied
                | Self::DeviceCodeExpired
                | Self::Timeout
                | Self::CredentialExpired
                | Self::NotAuthenticated
        )
    }
}
