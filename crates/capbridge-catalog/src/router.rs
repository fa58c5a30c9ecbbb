//! Dynamic invocation router.
//!
//! Routes a named invocation through five steps: catalog lookup, argument
//! validation against the capability's compiled schema, credential
//! resolution when the capability requires it, forwarding to the backend,
//! and error-taxonomy mapping of the response. Token material is exposed
//! only at the point the bearer header is attached and never appears in
//! errors or logs.

use std::sync::Arc;
use std::time::Duration;

use capbridge_auth::SessionManager;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::catalog::CatalogHandle;
use crate::descriptor::HttpMethod;
use crate::error::InvocationError;

/// Longest response-body prefix carried into [`InvocationError::Backend`].
const BACKEND_MESSAGE_LIMIT: usize = 512;

/// Tuning knobs for invocation forwarding.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Per-invocation timeout on the backend call.
    pub call_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Routes invocations from sessions to backend capability endpoints.
#[derive(Debug)]
pub struct InvocationRouter {
    catalog: Arc<CatalogHandle>,
    sessions: Arc<SessionManager>,
    http: reqwest::Client,
    base_url: Url,
}

impl InvocationRouter {
    /// Build a router forwarding to `base_url` with default config.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError::BackendUnavailable`] if the base URL is
    /// unparseable or the HTTP client cannot be built.
    pub fn new(
        catalog: Arc<CatalogHandle>,
        sessions: Arc<SessionManager>,
        base_url: &str,
    ) -> Result<Self, InvocationError> {
        Self::with_config(catalog, sessions, base_url, RouterConfig::default())
    }

    /// Build a router with explicit config.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError::BackendUnavailable`] if the base URL is
    /// unparseable or the HTTP client cannot be built.
    pub fn with_config(
        catalog: Arc<CatalogHandle>,
        sessions: Arc<SessionManager>,
        base_url: &str,
        config: RouterConfig,
    ) -> Result<Self, InvocationError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| InvocationError::BackendUnavailable(format!("invalid base URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|e| {
                InvocationError::BackendUnavailable(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            catalog,
            sessions,
            http,
            base_url,
        })
    }

    /// Invoke `capability` with `arguments` on behalf of `session_id`.
    ///
    /// # Errors
    ///
    /// - [`InvocationError::UnknownCapability`] when the name is not in the
    ///   current catalog generation.
    /// - [`InvocationError::InvalidArguments`] when the arguments fail the
    ///   capability's input schema; the backend is never contacted.
    /// - [`InvocationError::AuthenticationRequired`] when the capability
    ///   requires auth and the session has no usable credential.
    /// - [`InvocationError::BackendUnavailable`] on transport failure or a
    ///   backend 5xx.
    /// - [`InvocationError::Backend`] for any other non-success status.
    pub async fn invoke(
        &self,
        session_id: &str,
        capability: &str,
        arguments: &Value,
    ) -> Result<Value, InvocationError> {
        self.catalog.refresh_if_stale().await;
        // Snapshot one catalog generation for the whole invocation.
        let catalog = self.catalog.load();
        let registered = catalog
            .get(capability)
            .ok_or_else(|| InvocationError::UnknownCapability(capability.to_string()))?;

        let failures: Vec<String> = registered
            .validator
            .iter_errors(arguments)
            .map(|e| e.to_string())
            .collect();
        if !failures.is_empty() {
            return Err(InvocationError::InvalidArguments {
                capability: capability.to_string(),
                details: failures.join("; "),
            });
        }

        let credential = if registered.descriptor.requires_auth {
            let set = self
                .sessions
                .resolve_credential(session_id)
                .await
                .map_err(InvocationError::AuthenticationRequired)?;
            debug!(
                capability = %capability,
                token = %set.masked_access_token(),
                "forwarding authenticated invocation"
            );
            Some(set)
        } else {
            None
        };

        let url = self
            .base_url
            .join(&format!(
                "{}/{}",
                self.base_url.path().trim_end_matches('/'),
                registered.descriptor.endpoint.trim_start_matches('/')
            ))
            .map_err(|e| {
                InvocationError::BackendUnavailable(format!("invalid capability endpoint: {e}"))
            })?;

        let mut request = self
            .http
            .request(registered.descriptor.method.as_reqwest(), url);
        request = match registered.descriptor.method {
            HttpMethod::Get => request.query(&flatten_query(arguments)),
            _ => request.json(arguments),
        };
        if let Some(set) = &credential {
            request = request.bearer_auth(set.access_token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            InvocationError::BackendUnavailable(format!("backend request failed: {e}"))
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            InvocationError::BackendUnavailable(format!("failed to read backend response: {e}"))
        })?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| {
                InvocationError::BackendUnavailable(format!("malformed backend response: {e}"))
            });
        }

        let message = truncated_message(&body);
        warn!(capability = %capability, status = %status, "backend rejected invocation");
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Err(InvocationError::AuthenticationRequired(
                capbridge_auth::AuthError::CredentialExpired,
            ))
        } else if status.is_server_error() {
            Err(InvocationError::BackendUnavailable(format!(
                "backend returned HTTP {status}"
            )))
        } else {
            Err(InvocationError::Backend {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Top-level string/number/bool fields become query parameters for GET
/// capabilities; nested values are serialized as JSON.
fn flatten_query(arguments: &Value) -> Vec<(String, String)> {
    match arguments {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn truncated_message(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut message: String = text.chars().take(BACKEND_MESSAGE_LIMIT).collect();
    if text.chars().count() > BACKEND_MESSAGE_LIMIT {
        message.push_str("...");
    }
    message
}
