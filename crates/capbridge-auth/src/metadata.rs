//! Authorization server metadata discovery and caching (RFC 8414).
//!
//! The cache is keyed by issuer and TTL-based: entries respect
//! `Cache-Control: max-age` (capped) and fall back to a default TTL.
//! A cached document is immutable until it expires or is explicitly cleared.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::AuthError;

/// RFC 8414 well-known path, relative to the issuer.
const WELL_KNOWN_PATH: &str = "/.well-known/oauth-authorization-server";

/// OAuth 2.0 Authorization Server Metadata (RFC 8414), restricted to the
/// fields the bridge consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationServerMetadata {
    /// The authorization server's issuer identifier.
    pub issuer: String,

    /// Authorization endpoint (used by the interactive redirect flow, which
    /// is a collaborator of this crate, not implemented here).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint; required for both device polling and refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Device authorization endpoint (RFC 8628). Absence means the server
    /// does not support the device grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_authorization_endpoint: Option<String>,

    /// Revocation endpoint (RFC 7009).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,

    /// Introspection endpoint (RFC 7662).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,

    /// Supported grant types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Supported response types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_types_supported: Option<Vec<String>>,

    /// PKCE code challenge methods (RFC 7636).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Fields the bridge does not consume, preserved as-is.
    #[serde(flatten)]
    pub additional_fields: HashMap<String, serde_json::Value>,
}

impl AuthorizationServerMetadata {
    /// Validate issuer and endpoint URLs.
    ///
    /// `allow_insecure_issuer` relaxes the https requirement only; issuer
    /// matching and endpoint well-formedness are always enforced.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MetadataDiscovery`] when the issuer is not an
    /// HTTPS URL, the issuer does not match the expected one, or an
    /// advertised endpoint is malformed.
    pub fn validate(
        &self,
        expected_issuer: &str,
        allow_insecure_issuer: bool,
    ) -> Result<(), AuthError> {
        let issuer_url = Url::parse(&self.issuer)
            .map_err(|e| AuthError::MetadataDiscovery(format!("invalid issuer URL: {e}")))?;
        if issuer_url.scheme() != "https" && !allow_insecure_issuer {
            return Err(AuthError::MetadataDiscovery(
                "issuer must use the https scheme".to_string(),
            ));
        }
        if self.issuer.trim_end_matches('/') != expected_issuer.trim_end_matches('/') {
            return Err(AuthError::MetadataDiscovery(format!(
                "issuer in document ({}) does not match expected issuer ({expected_issuer})",
                self.issuer
            )));
        }
        for (field, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            (
                "device_authorization_endpoint",
                &self.device_authorization_endpoint,
            ),
            ("revocation_endpoint", &self.revocation_endpoint),
            ("introspection_endpoint", &self.introspection_endpoint),
        ] {
            if let Some(endpoint) = value {
                Url::parse(endpoint).map_err(|e| {
                    AuthError::MetadataDiscovery(format!("invalid {field} URL: {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Whether the server advertises the device authorization grant.
    pub fn supports_device_grant(&self) -> bool {
        self.device_authorization_endpoint.is_some()
            && self.grant_types_supported.as_ref().is_none_or(|grants| {
                grants
                    .iter()
                    .any(|g| g == "urn:ietf:params:oauth:grant-type:device_code")
            })
    }
}

/// Cached metadata with its absolute expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    metadata: Arc<AuthorizationServerMetadata>,
    expires_at: SystemTime,
}

/// Configuration for metadata fetching and caching.
#[derive(Debug, Clone)]
pub struct MetadataCacheConfig {
    /// Request timeout for the discovery fetch.
    pub request_timeout: Duration,
    /// Maximum response body size in bytes.
    pub max_response_size: usize,
    /// TTL used when the response carries no cache headers.
    pub default_ttl: Duration,
    /// Upper bound on any TTL, including header-provided ones.
    pub max_ttl: Duration,
    /// Accept plain-HTTP issuers. Test hook only; defaults to `false`.
    pub allow_insecure_issuer: bool,
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_response_size: 16 * 1024,
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(86400),
            allow_insecure_issuer: false,
        }
    }
}

/// TTL-based cache of authorization server metadata, keyed by issuer.
#[derive(Debug)]
pub struct MetadataCache {
    http: reqwest::Client,
    config: MetadataCacheConfig,
    entries: DashMap<String, CacheEntry>,
}

impl MetadataCache {
    /// Create a cache with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, AuthError> {
        Self::with_config(MetadataCacheConfig::default())
    }

    /// Create a cache with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] if the HTTP client cannot be built.
    pub fn with_config(config: MetadataCacheConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::Http(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            entries: DashMap::new(),
        })
    }

    /// Return cached metadata for an issuer, fetching it when absent or
    /// expired.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MetadataDiscovery`] on fetch, parse, or
    /// validation failure.
    pub async fn get_or_fetch(
        &self,
        issuer: &str,
    ) -> Result<Arc<AuthorizationServerMetadata>, AuthError> {
        if let Some(cached) = self.get_cached(issuer) {
            debug!(issuer = %issuer, "metadata cache hit");
            return Ok(cached);
        }

        let discovery_url = self.discovery_url(issuer)?;
        debug!(url = %discovery_url, "fetching authorization server metadata");

        let response = self
            .http
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| AuthError::MetadataDiscovery(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::MetadataDiscovery(format!(
                "discovery document returned HTTP {}",
                response.status()
            )));
        }

        let ttl = self.response_ttl(&response);

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::MetadataDiscovery(format!("failed to read response: {e}")))?;
        if body.len() > self.config.max_response_size {
            return Err(AuthError::MetadataDiscovery(
                "discovery document exceeds size limit".to_string(),
            ));
        }

        let metadata: AuthorizationServerMetadata = serde_json::from_slice(&body)
            .map_err(|e| AuthError::MetadataDiscovery(format!("invalid JSON: {e}")))?;
        metadata.validate(issuer, self.config.allow_insecure_issuer)?;

        let metadata = Arc::new(metadata);
        self.entries.insert(
            issuer.to_string(),
            CacheEntry {
                metadata: Arc::clone(&metadata),
                expires_at: SystemTime::now() + ttl,
            },
        );
        debug!(issuer = %issuer, ttl_secs = ttl.as_secs(), "cached authorization server metadata");
        Ok(metadata)
    }

    /// Drop a single issuer's cached document.
    pub fn invalidate(&self, issuer: &str) {
        self.entries.remove(issuer);
    }

    /// Drop every cached document.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn get_cached(&self, issuer: &str) -> Option<Arc<AuthorizationServerMetadata>> {
        if let Some(entry) = self.entries.get(issuer) {
            if SystemTime::now() < entry.expires_at {
                return Some(Arc::clone(&entry.metadata));
            }
            drop(entry);
            self.entries.remove(issuer);
        }
        None
    }

    fn discovery_url(&self, issuer: &str) -> Result<String, AuthError> {
        let mut url = Url::parse(issuer)
            .map_err(|e| AuthError::MetadataDiscovery(format!("invalid issuer URL: {e}")))?;
        if url.scheme() != "https" && !self.config.allow_insecure_issuer {
            return Err(AuthError::MetadataDiscovery(
                "issuer must use the https scheme".to_string(),
            ));
        }
        let path = url.path().trim_end_matches('/');
        let discovery_path = if path.is_empty() || path == "/" {
            WELL_KNOWN_PATH.to_string()
        } else {
            format!("{WELL_KNOWN_PATH}{path}")
        };
        url.set_path(&discovery_path);
        Ok(url.to_string())
    }

    fn response_ttl(&self, response: &reqwest::Response) -> Duration {
        if let Some(value) = response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok())
        {
            for directive in value.split(',') {
                if let Some(max_age) = directive.trim().strip_prefix("max-age=")
                    && let Ok(seconds) = max_age.parse::<u64>()
                {
                    return Duration::from_secs(seconds).min(self.config.max_ttl);
                }
            }
            if value.contains("no-cache") || value.contains("no-store") {
                return Duration::ZERO;
            }
        }
        self.config.default_ttl
    }
}
