//! # capbridge-catalog
//!
//! Capability side of the capbridge core: runtime discovery of a backend's
//! capability list, per-entry validation and schema compilation, the
//! atomically replaceable catalog, and the dynamic invocation router that
//! forwards validated calls with the session's bearer credential.
//!
//! ## Catalog lifecycle
//!
//! - [`CapabilityDiscovery::discover`] — one fetch-and-normalize pass;
//!   unusable entries are dropped individually, an unusable pass fails.
//! - [`CatalogHandle::bootstrap`] — the initial pass; failure here is fatal
//!   for the owning process, a bridge with no capabilities serves nothing.
//! - [`CatalogHandle::refresh_if_stale`] — later passes; failure keeps the
//!   previous catalog serving.
//! - [`InvocationRouter::invoke`] — lookup, validate, resolve credential,
//!   forward, map.

pub mod catalog;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod router;

pub use catalog::{CapabilityCatalog, CatalogHandle, RegisteredCapability};
pub use descriptor::{CapabilityDescriptor, HttpMethod, RawCapability};
pub use discovery::{CapabilityDiscovery, DiscoveryConfig, CAPABILITIES_PATH};
pub use error::{DiscoveryError, InvocationError, SchemaError};
pub use router::{InvocationRouter, RouterConfig};
