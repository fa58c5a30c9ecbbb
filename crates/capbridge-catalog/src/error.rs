//! Catalog and invocation error taxonomy.
//!
//! Discovery failures are fatal to the owning process; per-entry schema
//! failures are isolated and logged; invocation failures are returned to
//! the caller with enough detail to act on, and never leak raw transport
//! errors or token material.

use capbridge_auth::AuthError;
use thiserror::Error;

/// Failure of a whole discovery pass. Startup-fatal for the owning process.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery endpoint could not be reached or returned non-success.
    #[error("capability discovery request failed: {0}")]
    Http(String),

    /// The discovery response body could not be parsed.
    #[error("capability discovery returned a malformed body: {0}")]
    InvalidBody(String),

    /// The backend reported zero capabilities.
    #[error("backend reported an empty capability list")]
    EmptyCatalog,

    /// Entries were returned but none survived validation and schema
    /// compilation.
    #[error("no usable capabilities: all {0} discovered entries were dropped")]
    NoUsableCapabilities(usize),
}

/// Per-capability validation/compilation failure. Never aborts a discovery
/// pass; the entry is dropped with a warning.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A mandatory descriptor field is missing or empty.
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),

    /// The schema document is not a JSON object.
    #[error("input schema must be a JSON object")]
    NotAnObject,

    /// The HTTP method is not one the router can forward.
    #[error("unsupported method `{0}`")]
    UnsupportedMethod(String),

    /// The schema document failed to compile into a validator.
    #[error("schema compilation failed: {0}")]
    Compile(String),
}

/// Failure of a single invocation, returned to the caller.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// No capability with the requested name exists in the catalog.
    #[error("unknown capability `{0}`")]
    UnknownCapability(String),

    /// The arguments did not satisfy the capability's input schema.
    #[error("invalid arguments for `{capability}`: {details}")]
    InvalidArguments {
        /// Capability name.
        capability: String,
        /// Joined validator error messages.
        details: String,
    },

    /// The capability requires authentication and the session has no usable
    /// credential.
    #[error("authentication required: {0}")]
    AuthenticationRequired(#[source] AuthError),

    /// Transport failure or backend 5xx; try again later.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend rejected the call with a non-success status.
    #[error("backend rejected the call with HTTP {status}: {message}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Truncated response body for diagnosis.
        message: String,
    },
}
