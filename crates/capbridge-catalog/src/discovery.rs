//! Capability discovery against a backend's `/capabilities` endpoint.
//!
//! A discovery pass fetches the full capability list in one shot. Individual
//! entries that fail validation are dropped with a warning; a pass that
//! yields zero usable entries is an error the caller treats as fatal at
//! startup.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::descriptor::{CapabilityDescriptor, RawCapability};
use crate::error::DiscoveryError;

/// Path appended to the backend base URL for discovery.
pub const CAPABILITIES_PATH: &str = "/capabilities";

/// The discovery endpoint's response document: an object wrapping the
/// capability list under a `capabilities` key.
#[derive(Debug, Deserialize)]
struct CapabilityDocument {
    capabilities: Vec<RawCapability>,
}

/// Tuning knobs for discovery requests.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Maximum accepted response body size in bytes.
    pub max_response_size: usize,
    /// How long a fetched catalog stays fresh before a re-discovery pass.
    pub catalog_ttl: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_response_size: 4 * 1024 * 1024,
            catalog_ttl: Duration::from_secs(300),
        }
    }
}

/// Fetches and normalizes the backend's capability list.
#[derive(Debug)]
pub struct CapabilityDiscovery {
    http: reqwest::Client,
    discovery_url: Url,
    config: DiscoveryConfig,
}

impl CapabilityDiscovery {
    /// Create a discovery client for `base_url` with default config.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Http`] if the base URL is unparseable or
    /// the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, DiscoveryError> {
        Self::with_config(base_url, DiscoveryConfig::default())
    }

    /// Create a discovery client with explicit config.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Http`] if the base URL is unparseable or
    /// the HTTP client cannot be built.
    pub fn with_config(base_url: &str, config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let base = Url::parse(base_url)
            .map_err(|e| DiscoveryError::Http(format!("invalid base URL: {e}")))?;
        let discovery_url = base
            .join(&format!(
                "{}{CAPABILITIES_PATH}",
                base.path().trim_end_matches('/')
            ))
            .map_err(|e| DiscoveryError::Http(format!("invalid discovery URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DiscoveryError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            discovery_url,
            config,
        })
    }

    /// The configured catalog TTL.
    pub fn catalog_ttl(&self) -> Duration {
        self.config.catalog_ttl
    }

    /// Run one discovery pass and return the usable descriptors.
    ///
    /// Entries that fail validation are logged at `warn` and dropped; they
    /// never abort the pass. The pass itself fails only when the endpoint
    /// is unreachable, the body is malformed, the backend reports zero
    /// capabilities, or every reported entry was dropped.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::Http`] on transport/status failure,
    /// [`DiscoveryError::InvalidBody`] on unparseable JSON,
    /// [`DiscoveryError::EmptyCatalog`] on an empty list, and
    /// [`DiscoveryError::NoUsableCapabilities`] when validation dropped
    /// every entry.
    pub async fn discover(&self) -> Result<Vec<CapabilityDescriptor>, DiscoveryError> {
        debug!(url = %self.discovery_url, "running capability discovery pass");

        let response = self
            .http
            .get(self.discovery_url.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| DiscoveryError::Http(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Http(format!(
                "discovery endpoint returned HTTP {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::Http(format!("failed to read body: {e}")))?;
        if body.len() > self.config.max_response_size {
            return Err(DiscoveryError::InvalidBody(format!(
                "response of {} bytes exceeds the {} byte limit",
                body.len(),
                self.config.max_response_size
            )));
        }

        let document: CapabilityDocument = serde_json::from_slice(&body)
            .map_err(|e| DiscoveryError::InvalidBody(e.to_string()))?;
        let raw = document.capabilities;

        if raw.is_empty() {
            return Err(DiscoveryError::EmptyCatalog);
        }

        let reported = raw.len();
        let mut descriptors = Vec::with_capacity(reported);
        for entry in raw {
            let label = entry.name.clone().unwrap_or_else(|| "<unnamed>".into());
            match CapabilityDescriptor::from_raw(entry) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(reason) => {
                    warn!(capability = %label, %reason, "dropping unusable capability entry");
                }
            }
        }

        if descriptors.is_empty() {
            return Err(DiscoveryError::NoUsableCapabilities(reported));
        }

        debug!(
            usable = descriptors.len(),
            reported, "capability discovery pass complete"
        );
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_joins_the_well_known_path() {
        let discovery = CapabilityDiscovery::new("https://backend.example.com").unwrap();
        assert_eq!(
            discovery.discovery_url.as_str(),
            "https://backend.example.com/capabilities"
        );
    }

    #[test]
    fn discovery_url_preserves_a_base_path() {
        let discovery = CapabilityDiscovery::new("https://backend.example.com/api/v2/").unwrap();
        assert_eq!(
            discovery.discovery_url.as_str(),
            "https://backend.example.com/api/v2/capabilities"
        );
    }

    #[test]
    fn junk_base_url_is_rejected() {
        assert!(matches!(
            CapabilityDiscovery::new("not a url"),
            Err(DiscoveryError::Http(_))
        ));
    }
}
