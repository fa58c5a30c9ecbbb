//! # capbridge-auth
//!
//! Credential side of the capbridge core: authorization server metadata
//! discovery, the headless device authorization grant (RFC 8628), and the
//! session/credential lifecycle that maps ephemeral connections to durable
//! per-user token material.
//!
//! ## Lifecycle contract
//!
//! - [`SessionManager::create_session`] — ephemeral session, no identity.
//! - [`DeviceAuthorizer::authenticate`] — runs the device flow, yields a
//!   [`TokenSet`].
//! - [`SessionManager::bind_user`] — links session to user, stores tokens.
//! - [`SessionManager::resolve_credential`] — read path before every
//!   authenticated invocation; refreshes single-flight when expired.
//! - [`SessionManager::close_session`] — destroys the session only; the
//!   credential store entry survives for reconnects.

pub mod console;
pub mod device;
pub mod error;
pub mod headless;
pub mod metadata;
pub mod session;
pub mod tokens;

pub use console::{LogPrompt, VerificationDetails, VerificationPrompt};
pub use device::{DeviceAuthorization, DeviceAuthorizer, DeviceFlowConfig, PollOutcome};
pub use error::AuthError;
pub use headless::EnvironmentSignals;
pub use metadata::{AuthorizationServerMetadata, MetadataCache, MetadataCacheConfig};
pub use session::{CredentialStore, Session, SessionManager};
pub use tokens::{
    HttpTokenRefresher, TokenEndpointError, TokenGrant, TokenRefresher, TokenSet, mask_token,
};
