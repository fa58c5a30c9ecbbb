//! Compiled capability catalog with wholesale atomic replacement.
//!
//! A [`CapabilityCatalog`] is immutable once built: descriptors paired with
//! their compiled argument validators. [`CatalogHandle`] holds the current
//! catalog behind an [`ArcSwap`] so readers always see a complete
//! generation, never a partially applied one, while a re-discovery pass
//! swaps in its replacement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use jsonschema::Validator;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::descriptor::CapabilityDescriptor;
use crate::discovery::CapabilityDiscovery;
use crate::error::{DiscoveryError, SchemaError};

/// A capability ready to serve invocations.
#[derive(Debug)]
pub struct RegisteredCapability {
    /// The validated descriptor.
    pub descriptor: CapabilityDescriptor,
    /// Compiled argument validator.
    pub validator: Validator,
}

impl RegisteredCapability {
    fn compile(descriptor: CapabilityDescriptor) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(&descriptor.input_schema)
            .map_err(|e| SchemaError::Compile(e.to_string()))?;
        Ok(Self {
            descriptor,
            validator,
        })
    }
}

/// One immutable generation of the capability catalog.
#[derive(Debug)]
pub struct CapabilityCatalog {
    entries: HashMap<String, RegisteredCapability>,
    built_at: Instant,
}

impl CapabilityCatalog {
    /// Compile a catalog from discovered descriptors.
    ///
    /// Descriptors whose schemas fail to compile are dropped with a warning,
    /// mirroring how discovery drops malformed entries. Duplicate names keep
    /// the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoUsableCapabilities`] when compilation
    /// dropped every descriptor.
    pub fn compile(descriptors: Vec<CapabilityDescriptor>) -> Result<Self, DiscoveryError> {
        let reported = descriptors.len();
        let mut entries = HashMap::with_capacity(reported);
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if entries.contains_key(&name) {
                warn!(capability = %name, "dropping duplicate capability entry");
                continue;
            }
            match RegisteredCapability::compile(descriptor) {
                Ok(registered) => {
                    entries.insert(name, registered);
                }
                Err(reason) => {
                    warn!(capability = %name, %reason, "dropping capability with uncompilable schema");
                }
            }
        }
        if entries.is_empty() {
            return Err(DiscoveryError::NoUsableCapabilities(reported));
        }
        Ok(Self {
            entries,
            built_at: Instant::now(),
        })
    }

    /// Look up a capability by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredCapability> {
        self.entries.get(name)
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog holds no capabilities. Never true for a catalog
    /// built through [`CapabilityCatalog::compile`].
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptors of every registered capability, for listing to clients.
    pub fn descriptors(&self) -> Vec<&CapabilityDescriptor> {
        self.entries.values().map(|r| &r.descriptor).collect()
    }

    fn age(&self) -> Duration {
        self.built_at.elapsed()
    }
}

/// Shared handle to the current catalog generation.
///
/// Readers call [`CatalogHandle::load`] and work against that snapshot for
/// the duration of one operation; a concurrent [`CatalogHandle::replace`]
/// never tears a snapshot.
#[derive(Debug)]
pub struct CatalogHandle {
    current: ArcSwap<CapabilityCatalog>,
    discovery: CapabilityDiscovery,
    // Serializes re-discovery passes so a slow backend cannot stack them.
    refresh_gate: Mutex<()>,
}

impl CatalogHandle {
    /// Run an initial discovery pass and wrap the resulting catalog.
    ///
    /// # Errors
    ///
    /// Propagates any [`DiscoveryError`] from the pass or from catalog
    /// compilation. Callers treat this as startup-fatal.
    pub async fn bootstrap(discovery: CapabilityDiscovery) -> Result<Self, DiscoveryError> {
        let descriptors = discovery.discover().await?;
        let catalog = CapabilityCatalog::compile(descriptors)?;
        info!(capabilities = catalog.len(), "capability catalog bootstrapped");
        Ok(Self {
            current: ArcSwap::from_pointee(catalog),
            discovery,
            refresh_gate: Mutex::new(()),
        })
    }

    /// Snapshot the current catalog generation.
    pub fn load(&self) -> Arc<CapabilityCatalog> {
        self.current.load_full()
    }

    /// Atomically install a replacement catalog.
    pub fn replace(&self, catalog: CapabilityCatalog) {
        let fresh = catalog.len();
        let previous = self.current.swap(Arc::new(catalog));
        info!(
            previous = previous.len(),
            current = fresh,
            "capability catalog replaced"
        );
    }

    /// Re-discover and replace the catalog when the current generation has
    /// outlived its TTL.
    ///
    /// A failed re-discovery pass keeps the previous generation serving and
    /// logs the failure; once bootstrapped, the bridge never loses its
    /// catalog to a flaky backend.
    pub async fn refresh_if_stale(&self) {
        if self.load().age() < self.discovery.catalog_ttl() {
            return;
        }
        let _gate = self.refresh_gate.lock().await;
        // Another task may have refreshed while we waited on the gate.
        if self.load().age() < self.discovery.catalog_ttl() {
            return;
        }
        match self.discovery.discover().await {
            Ok(descriptors) => match CapabilityCatalog::compile(descriptors) {
                Ok(catalog) => self.replace(catalog),
                Err(reason) => {
                    warn!(%reason, "re-discovery produced no usable catalog, keeping the current one");
                }
            },
            Err(reason) => {
                warn!(%reason, "re-discovery pass failed, keeping the current catalog");
            }
        }
    }
}
