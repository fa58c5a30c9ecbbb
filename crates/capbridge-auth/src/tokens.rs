//! Token material and the token-endpoint client.
//!
//! A [`TokenSet`] is owned exclusively by the credential store; sessions hold
//! only the owning user id. `expires_at` is computed in exactly one place,
//! [`TokenSet::from_grant`], from the token endpoint's `expires_in` — no
//! other component computes or guesses expiry.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::AuthError;

/// Successful response from the token endpoint (device grant poll or
/// refresh grant).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenGrant {
    /// Access token value.
    pub access_token: String,
    /// Token type, typically `Bearer`.
    pub token_type: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: Option<u64>,
    /// Refresh token, if the server issued one.
    pub refresh_token: Option<String>,
    /// Space-separated granted scopes.
    pub scope: Option<String>,
}

/// Error response from the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEndpointError {
    /// OAuth error code (`authorization_pending`, `slow_down`, ...).
    pub error: String,
    /// Optional human-readable description.
    pub error_description: Option<String>,
}

/// Current token material for one user.
///
/// Mutated in place on refresh; the previous access token value is invalid
/// for forwarding the moment the store entry is overwritten.
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// Owning user identity (not a connection id).
    pub user_id: String,
    /// The bearer credential. Redacted in `Debug` output.
    pub access_token: SecretString,
    /// Token type as reported by the server.
    pub token_type: String,
    /// Refresh token, when the grant included one.
    pub refresh_token: Option<SecretString>,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Absolute expiry derived from the most recent grant or refresh
    /// response. `None` means the server declared no lifetime.
    pub expires_at: Option<SystemTime>,
}

impl TokenSet {
    /// Build a token set from a token endpoint response.
    ///
    /// This is the only constructor; it is the single place `expires_at` is
    /// derived from `expires_in`.
    pub fn from_grant(user_id: impl Into<String>, grant: TokenGrant) -> Self {
        let expires_at = grant
            .expires_in
            .map(|secs| SystemTime::now() + Duration::from_secs(secs));
        Self {
            user_id: user_id.into(),
            access_token: SecretString::new(grant.access_token),
            token_type: grant.token_type,
            refresh_token: grant.refresh_token.map(SecretString::new),
            scopes: grant
                .scope
                .map(|s| s.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            expires_at,
        }
    }

    /// Whether the access token's absolute expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expiry| SystemTime::now() >= expiry)
    }

    /// Masked representation of the access token for log correlation.
    ///
    /// Never log the raw value; this keeps only the first and last four
    /// characters.
    pub fn masked_access_token(&self) -> String {
        mask_token(self.access_token.expose_secret())
    }
}

/// Mask a secret value for logging, keeping first/last four characters.
pub fn mask_token(token: &str) -> String {
    if token.len() <= 8 {
        return "****".to_string();
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}

/// Refreshes an expired token set against the token endpoint.
///
/// Trait-shaped so the session manager can be exercised without network I/O
/// and so a durable-store deployment can substitute its own implementation.
#[async_trait]
pub trait TokenRefresher: Send + Sync + std::fmt::Debug {
    /// Exchange a refresh token for a new token set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CredentialExpired`] when the server rejects the
    /// refresh token, [`AuthError::BackendUnavailable`] on transport failure.
    async fn refresh(
        &self,
        user_id: &str,
        refresh_token: &SecretString,
    ) -> Result<TokenSet, AuthError>;
}

/// HTTP refresher that posts the `refresh_token` grant to the token endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    revocation_endpoint: Option<String>,
}

impl HttpTokenRefresher {
    /// Create a refresher for a fixed token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] if the HTTP client cannot be built.
    pub fn new(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Http(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            revocation_endpoint: None,
        })
    }

    /// Set the revocation endpoint (RFC 7009) advertised by the server.
    #[must_use]
    pub fn with_revocation_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.revocation_endpoint = Some(endpoint.into());
        self
    }

    /// Best-effort revocation of a token. Failures are logged, not
    /// propagated: the local store entry is removed regardless.
    pub async fn revoke(&self, token: &SecretString) {
        let Some(endpoint) = &self.revocation_endpoint else {
            return;
        };
        let result = self
            .http
            .post(endpoint)
            .form(&[
                ("token", token.expose_secret().as_str()),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!("token revoked");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "token revocation rejected");
            }
            Err(e) => {
                warn!(error = %e, "token revocation request failed");
            }
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(
        &self,
        user_id: &str,
        refresh_token: &SecretString,
    ) -> Result<TokenSet, AuthError> {
        debug!(user_id = %user_id, "refreshing expired access token");

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret().as_str()),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::BackendUnavailable(format!("token endpoint: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let grant: TokenGrant = response
                .json()
                .await
                .map_err(|e| AuthError::InvalidResponse(format!("token response: {e}")))?;
            let mut set = TokenSet::from_grant(user_id, grant);
            // Servers that do not rotate refresh tokens omit the field; the
            // previous refresh token stays valid in that case.
            if set.refresh_token.is_none() {
                set.refresh_token = Some(refresh_token.clone());
            }
            debug!(user_id = %user_id, token = %set.masked_access_token(), "token refreshed");
            return Ok(set);
        }

        if status.is_server_error() {
            return Err(AuthError::BackendUnavailable(format!(
                "token endpoint returned {status}"
            )));
        }

        let detail = response
            .json::<TokenEndpointError>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| "unparsable error body".to_string());
        warn!(user_id = %user_id, error = %detail, "refresh token rejected");
        Err(AuthError::CredentialExpired)
    }
}
