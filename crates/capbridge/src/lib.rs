//! # capbridge
//!
//! Credential and capability bridge between connection-oriented clients
//! and an HTTP backend: headless OAuth device-grant authentication
//! ([`auth`]), session and credential lifecycle ([`auth`]), and runtime
//! capability discovery with dynamic, schema-validated invocation
//! ([`catalog`]).
//!
//! [`Bridge`] wires the pieces together and exposes the process-level
//! operation surface. Startup runs one discovery pass and fails outright
//! when it yields no capabilities; a bridge with an empty catalog serves
//! nothing and must not come up.
//!
//! ```no_run
//! use std::sync::Arc;
//! use capbridge::{Bridge, HttpTokenRefresher, SessionManager, TokenRefresher};
//! use capbridge::catalog::CapabilityDiscovery;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let refresher = HttpTokenRefresher::new(
//!     "https://auth.example.com/token".to_string(),
//!     "my-client",
//! )?;
//! let sessions = Arc::new(SessionManager::new(
//!     Arc::new(refresher) as Arc<dyn TokenRefresher>,
//! ));
//! let discovery = CapabilityDiscovery::new("https://backend.example.com")?;
//! let bridge = Bridge::bootstrap(sessions, discovery, "https://backend.example.com").await?;
//!
//! let session = bridge.create_session();
//! let capabilities = bridge.discover();
//! # let _ = (session, capabilities);
//! # Ok(())
//! # }
//! ```

pub use capbridge_auth as auth;
pub use capbridge_catalog as catalog;

pub use capbridge_auth::{
    AuthError, DeviceAuthorizer, DeviceFlowConfig, EnvironmentSignals, HttpTokenRefresher,
    LogPrompt, MetadataCache, MetadataCacheConfig, Session, SessionManager, TokenGrant,
    TokenRefresher, TokenSet, VerificationDetails, VerificationPrompt,
};
pub use capbridge_catalog::{
    CapabilityDescriptor, CapabilityDiscovery, CatalogHandle, DiscoveryConfig, DiscoveryError,
    HttpMethod, InvocationError, InvocationRouter, RouterConfig,
};

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

/// The assembled bridge: sessions, catalog, and the invocation router.
#[derive(Debug)]
pub struct Bridge {
    sessions: Arc<SessionManager>,
    catalog: Arc<CatalogHandle>,
    router: InvocationRouter,
}

impl Bridge {
    /// Run the startup discovery pass and assemble the bridge.
    ///
    /// # Errors
    ///
    /// Any [`DiscoveryError`] from the initial pass is returned as-is; the
    /// caller treats it as fatal. An empty or wholly-unusable capability
    /// list never produces a degraded bridge.
    pub async fn bootstrap(
        sessions: Arc<SessionManager>,
        discovery: CapabilityDiscovery,
        backend_base_url: &str,
    ) -> Result<Self, DiscoveryError> {
        let catalog = Arc::new(CatalogHandle::bootstrap(discovery).await?);
        let router = InvocationRouter::new(
            Arc::clone(&catalog),
            Arc::clone(&sessions),
            backend_base_url,
        )
        .map_err(|e| DiscoveryError::Http(e.to_string()))?;
        info!(
            capabilities = catalog.load().len(),
            backend = %backend_base_url,
            "bridge bootstrapped"
        );
        Ok(Self {
            sessions,
            catalog,
            router,
        })
    }

    /// Create a new anonymous session.
    pub fn create_session(&self) -> String {
        self.sessions.create_session()
    }

    /// Link a session to an authenticated user, storing the token set.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::bind_user`].
    pub async fn bind_user(
        &self,
        session_id: &str,
        user_id: &str,
        token_set: TokenSet,
    ) -> Result<(), AuthError> {
        self.sessions.bind_user(session_id, user_id, token_set).await
    }

    /// Link a session to a user with an existing stored credential.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::resume_user`].
    pub fn resume_user(&self, session_id: &str, user_id: &str) -> Result<(), AuthError> {
        self.sessions.resume_user(session_id, user_id)
    }

    /// Return a valid token set for the session's user, refreshing if needed.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::resolve_credential`].
    pub async fn resolve_credential(&self, session_id: &str) -> Result<TokenSet, AuthError> {
        self.sessions.resolve_credential(session_id).await
    }

    /// Destroy a session; the user's stored credential survives.
    pub fn close_session(&self, session_id: &str) {
        self.sessions.close_session(session_id);
    }

    /// The current capability list.
    pub fn discover(&self) -> Vec<CapabilityDescriptor> {
        self.catalog
            .load()
            .descriptors()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Invoke a capability on behalf of a session.
    ///
    /// # Errors
    ///
    /// See [`InvocationRouter::invoke`].
    pub async fn invoke(
        &self,
        session_id: &str,
        capability: &str,
        arguments: &Value,
    ) -> Result<Value, InvocationError> {
        self.router.invoke(session_id, capability, arguments).await
    }

    /// The shared session manager, for wiring into an authenticator.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}
