//! Device authorization grant orchestration (RFC 8628).
//!
//! The polling loop is an explicit state machine over [`PollOutcome`] with
//! an absolute deadline taken from the grant's `expires_in`. Terminal
//! protocol outcomes (`access_denied`, `expired_token`) are never retried;
//! transient failures retry within a bounded budget with backoff derived
//! from the *current* poll interval, so backoff composes with a prior
//! `slow_down` adjustment.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::console::{VerificationDetails, VerificationPrompt};
use crate::error::AuthError;
use crate::metadata::MetadataCache;
use crate::tokens::{TokenEndpointError, TokenGrant, TokenSet};

/// Device grant media type, sent on every poll.
const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Configuration for the device authorization flow.
#[derive(Debug, Clone)]
pub struct DeviceFlowConfig {
    /// OAuth client identifier.
    pub client_id: String,
    /// Scopes requested at initiation.
    pub scopes: Vec<String>,
    /// Bounded retry budget for transient failures. Terminal outcomes
    /// ignore this entirely.
    pub max_transient_retries: u32,
    /// Poll interval used when the server does not suggest one.
    pub default_poll_interval: Duration,
    /// Amount added to the poll interval on each `slow_down` (RFC 8628
    /// recommends 5 seconds).
    pub slow_down_increment: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl DeviceFlowConfig {
    /// Config for a client id with default polling behavior.
    pub fn new(client_id: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scopes,
            max_transient_retries: 3,
            default_poll_interval: Duration::from_secs(5),
            slow_down_increment: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Response from the device authorization endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    /// Opaque backend-issued code used for polling. Secret; never shown to
    /// the user and never logged.
    pub device_code: String,
    /// Short human-presentable code.
    pub user_code: String,
    /// Page the user visits to authorize.
    pub verification_uri: String,
    /// Variant with the code pre-filled.
    pub verification_uri_complete: Option<String>,
    /// Lifetime of the device code in seconds.
    pub expires_in: u64,
    /// Server-suggested poll interval in seconds.
    pub interval: Option<u64>,
}

/// Classified result of one token-endpoint poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The user approved; token material follows.
    Authorized(TokenGrant),
    /// The user has not acted yet; keep polling unchanged.
    Pending,
    /// The server asked for a larger poll interval.
    SlowDown,
    /// The user denied the request. Terminal.
    Denied,
    /// The device code expired. Terminal.
    Expired,
    /// Transport failure or unrecognized error; eligible for bounded retry.
    Retryable(String),
}

impl PollOutcome {
    /// Classify an RFC 8628 token-endpoint error code.
    pub fn from_error_code(error: &str, description: Option<&str>) -> Self {
        match error {
            "authorization_pending" => Self::Pending,
            "slow_down" => Self::SlowDown,
            "access_denied" => Self::Denied,
            "expired_token" => Self::Expired,
            other => Self::Retryable(format!(
                "{other}: {}",
                description.unwrap_or("no description")
            )),
        }
    }
}

/// Orchestrates the headless device authorization grant end to end:
/// initiate, present instructions, poll with backoff, terminate.
#[derive(Debug)]
pub struct DeviceAuthorizer {
    http: reqwest::Client,
    metadata: Arc<MetadataCache>,
    issuer: String,
    config: DeviceFlowConfig,
}

impl DeviceAuthorizer {
    /// Create an orchestrator for one issuer.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] if the HTTP client cannot be built.
    pub fn new(
        metadata: Arc<MetadataCache>,
        issuer: impl Into<String>,
        config: DeviceFlowConfig,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::Http(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            metadata,
            issuer: issuer.into(),
            config,
        })
    }

    /// Run the full device flow and return the resulting token set.
    ///
    /// Suspends at every network call and at each poll wait. The wait is a
    /// three-way race between the next poll tick, the grant's absolute
    /// deadline, and `cancel` — the deadline and cancellation both interrupt
    /// a sleep in progress.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnsupportedGrant`] when the server advertises no
    ///   device authorization endpoint.
    /// - [`AuthError::DeviceInitiationFailed`] when initiation is rejected.
    /// - [`AuthError::AccessDenied`] / [`AuthError::DeviceCodeExpired`] on
    ///   terminal poll outcomes; these are never retried.
    /// - [`AuthError::Timeout`] when the grant's deadline passes.
    /// - [`AuthError::Cancelled`] when `cancel` fires.
    /// - [`AuthError::BackendUnavailable`] once the transient retry budget
    ///   is exhausted.
    pub async fn authenticate(
        &self,
        user_id: &str,
        prompt: &dyn VerificationPrompt,
        cancel: &CancellationToken,
    ) -> Result<TokenSet, AuthError> {
        let metadata = self.metadata.get_or_fetch(&self.issuer).await?;
        let device_endpoint = metadata
            .device_authorization_endpoint
            .clone()
            .ok_or(AuthError::UnsupportedGrant)?;
        let token_endpoint = metadata
            .token_endpoint
            .clone()
            .ok_or(AuthError::UnsupportedGrant)?;

        let authorization = self.initiate(&device_endpoint).await?;
        info!(
            user_code = %authorization.user_code,
            expires_in = authorization.expires_in,
            "device authorization initiated"
        );

        prompt.present(&VerificationDetails {
            user_code: authorization.user_code.clone(),
            verification_uri: authorization.verification_uri.clone(),
            verification_uri_complete: authorization.verification_uri_complete.clone(),
            expires_in: authorization.expires_in,
        });

        let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);
        let mut interval = authorization
            .interval
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_poll_interval);
        let mut next_wait = interval;
        let mut transient_failures: u32 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("device flow cancelled while waiting to poll");
                    return Err(AuthError::Cancelled);
                }
                () = tokio::time::sleep_until(deadline) => {
                    return Err(AuthError::Timeout);
                }
                () = tokio::time::sleep(next_wait) => {}
            }

            match self
                .poll_once(&token_endpoint, &authorization.device_code)
                .await
            {
                PollOutcome::Authorized(grant) => {
                    let set = TokenSet::from_grant(user_id, grant);
                    info!(user_id = %user_id, token = %set.masked_access_token(), "device authorization completed");
                    return Ok(set);
                }
                PollOutcome::Pending => {
                    transient_failures = 0;
                    next_wait = interval;
                }
                PollOutcome::SlowDown => {
                    transient_failures = 0;
                    interval += self.config.slow_down_increment;
                    next_wait = interval;
                    debug!(interval_secs = interval.as_secs(), "server requested slower polling");
                }
                PollOutcome::Denied => return Err(AuthError::AccessDenied),
                PollOutcome::Expired => return Err(AuthError::DeviceCodeExpired),
                PollOutcome::Retryable(reason) => {
                    transient_failures += 1;
                    if transient_failures > self.config.max_transient_retries {
                        warn!(reason = %reason, "transient retry budget exhausted");
                        return Err(AuthError::BackendUnavailable(reason));
                    }
                    // Backoff grows off the current interval, not a fixed
                    // constant, so it stacks with any slow_down adjustment.
                    next_wait = interval * transient_failures;
                    debug!(
                        attempt = transient_failures,
                        backoff_secs = next_wait.as_secs(),
                        reason = %reason,
                        "transient poll failure, backing off"
                    );
                }
            }
        }
    }

    /// POST client identity and scopes to the device authorization endpoint.
    async fn initiate(&self, endpoint: &str) -> Result<DeviceAuthorization, AuthError> {
        let scope = self.config.scopes.join(" ");
        let response = self
            .http
            .post(endpoint)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::BackendUnavailable(format!("device endpoint: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return match response.json::<TokenEndpointError>().await {
                Ok(body) => Err(AuthError::DeviceInitiationFailed {
                    error: body.error,
                    description: body.error_description,
                }),
                Err(_) => Err(AuthError::DeviceInitiationFailed {
                    error: format!("http_{}", status.as_u16()),
                    description: None,
                }),
            };
        }

        response
            .json::<DeviceAuthorization>()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("device authorization: {e}")))
    }

    /// One poll of the token endpoint with the device grant.
    async fn poll_once(&self, token_endpoint: &str, device_code: &str) -> PollOutcome {
        let response = match self
            .http
            .post(token_endpoint)
            .form(&[
                ("grant_type", DEVICE_GRANT_TYPE),
                ("device_code", device_code),
                ("client_id", self.config.client_id.as_str()),
            ])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return PollOutcome::Retryable(format!("token endpoint: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<TokenGrant>().await {
                Ok(grant) => PollOutcome::Authorized(grant),
                Err(e) => PollOutcome::Retryable(format!("unparsable token response: {e}")),
            };
        }

        if status.is_client_error() {
            return match response.json::<TokenEndpointError>().await {
                Ok(body) => {
                    PollOutcome::from_error_code(&body.error, body.error_description.as_deref())
                }
                Err(_) => PollOutcome::Retryable(format!("HTTP {status} with unparsable body")),
            };
        }

        PollOutcome::Retryable(format!("token endpoint returned HTTP {status}"))
    }
}
