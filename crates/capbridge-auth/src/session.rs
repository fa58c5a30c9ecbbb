//! Session registry and credential store.
//!
//! Two separate owned stores with an explicit lifecycle contract: the
//! session registry is ephemeral per-connection state, the credential store
//! is durable per-user state. Closing a session never deletes the user's
//! token set, which is what lets a user reconnect without re-authenticating.
//!
//! Refresh is single-flight per user: the credential slot's write lock is
//! the per-key mutual exclusion, and every waiter re-checks freshness after
//! acquiring it, so N concurrent resolvers of the same expired credential
//! produce exactly one refresh call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::tokens::{TokenRefresher, TokenSet};

/// Ephemeral per-connection state. Created before any identity is known,
/// linked to a user once authentication completes, destroyed on disconnect.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque id generated at connection time.
    pub id: String,
    /// Bound user identity; absent until authentication completes. Once
    /// set, never reassigned to a different user.
    pub user_id: Option<String>,
    /// Capability names negotiated for this connection.
    pub capabilities: HashSet<String>,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

/// One user's credential slot. The write lock doubles as the per-user
/// refresh mutex.
#[derive(Debug, Default)]
struct CredentialSlot {
    token: RwLock<Option<TokenSet>>,
}

/// Durable (process-lifetime) user-id → token-set store.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: DashMap<String, Arc<CredentialSlot>>,
}

impl CredentialStore {
    fn slot(&self, user_id: &str) -> Option<Arc<CredentialSlot>> {
        self.entries.get(user_id).map(|e| Arc::clone(&e))
    }

    fn slot_or_insert(&self, user_id: &str) -> Arc<CredentialSlot> {
        Arc::clone(
            &self
                .entries
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(CredentialSlot::default())),
        )
    }

    fn remove(&self, user_id: &str) {
        self.entries.remove(user_id);
    }

    /// Whether a token set is stored for the user.
    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }
}

/// Session & credential lifecycle manager.
///
/// The process-level surface the rest of the system uses:
/// [`create_session`](Self::create_session),
/// [`bind_user`](Self::bind_user),
/// [`resolve_credential`](Self::resolve_credential),
/// [`close_session`](Self::close_session).
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, Session>,
    credentials: CredentialStore,
    refresher: Arc<dyn TokenRefresher>,
}

impl SessionManager {
    /// Create a manager that refreshes expired credentials through
    /// `refresher`.
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            sessions: DashMap::new(),
            credentials: CredentialStore::default(),
            refresher,
        }
    }

    /// Create a new anonymous session. Always succeeds; no I/O.
    pub fn create_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                user_id: None,
                capabilities: HashSet::new(),
                created_at: SystemTime::now(),
            },
        );
        debug!(session_id = %id, "session created");
        id
    }

    /// Snapshot of a session, if it exists.
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Link a session to a user, writing the user's token set into the
    /// credential store. Idempotent for the same user.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if the session does not exist.
    /// - [`AuthError::SessionRebind`] if the session is already bound to a
    ///   different user; the other user's stored credential is untouched.
    pub async fn bind_user(
        &self,
        session_id: &str,
        user_id: &str,
        mut token_set: TokenSet,
    ) -> Result<(), AuthError> {
        {
            let mut session = self
                .sessions
                .get_mut(session_id)
                .ok_or(AuthError::NotAuthenticated)?;
            match &session.user_id {
                Some(bound) if bound != user_id => return Err(AuthError::SessionRebind),
                _ => session.user_id = Some(user_id.to_string()),
            }
        }

        token_set.user_id = user_id.to_string();
        let slot = self.credentials.slot_or_insert(user_id);
        *slot.token.write().await = Some(token_set);
        debug!(session_id = %session_id, user_id = %user_id, "session bound to user");
        Ok(())
    }

    /// Link a session to a user who already has a stored credential, the
    /// reconnection path: no new token material, no device flow.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if the session does not exist.
    /// - [`AuthError::SessionRebind`] if the session is bound to another user.
    /// - [`AuthError::CredentialExpired`] if the user has no stored
    ///   credential; a fresh device flow is required.
    pub fn resume_user(&self, session_id: &str, user_id: &str) -> Result<(), AuthError> {
        if !self.credentials.contains(user_id) {
            return Err(AuthError::CredentialExpired);
        }
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(AuthError::NotAuthenticated)?;
        match &session.user_id {
            Some(bound) if bound != user_id => Err(AuthError::SessionRebind),
            _ => {
                session.user_id = Some(user_id.to_string());
                debug!(session_id = %session_id, user_id = %user_id, "session resumed existing credential");
                Ok(())
            }
        }
    }

    /// Record the capability names negotiated for a session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotAuthenticated`] if the session does not exist.
    pub fn grant_capabilities<I>(&self, session_id: &str, names: I) -> Result<(), AuthError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(AuthError::NotAuthenticated)?;
        session.capabilities.extend(names);
        Ok(())
    }

    /// Return a valid token set for the session's user, refreshing it
    /// synchronously when expired.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] when the session is unknown or has
    ///   no bound user.
    /// - [`AuthError::CredentialExpired`] when the credential is expired and
    ///   cannot be refreshed; the stale entry is removed so the user is
    ///   forced to re-authenticate rather than retrying a dead token.
    /// - [`AuthError::BackendUnavailable`] on transient refresh transport
    ///   failure; the stored entry is kept since a later attempt may succeed.
    pub async fn resolve_credential(&self, session_id: &str) -> Result<TokenSet, AuthError> {
        let user_id = self
            .sessions
            .get(session_id)
            .and_then(|s| s.user_id.clone())
            .ok_or(AuthError::NotAuthenticated)?;

        let slot = self
            .credentials
            .slot(&user_id)
            .ok_or(AuthError::CredentialExpired)?;

        // Fast path: concurrent readers of a live credential never contend.
        {
            let guard = slot.token.read().await;
            match guard.as_ref() {
                Some(set) if !set.is_expired() => return Ok(set.clone()),
                Some(_) => {}
                None => return Err(AuthError::CredentialExpired),
            }
        }

        // Refresh path: the write lock serializes refreshes per user.
        let mut guard = slot.token.write().await;
        let current = match guard.as_ref() {
            Some(set) if !set.is_expired() => return Ok(set.clone()),
            Some(set) => set.clone(),
            None => return Err(AuthError::CredentialExpired),
        };

        let Some(refresh_token) = current.refresh_token.clone() else {
            warn!(user_id = %user_id, "credential expired with no refresh token");
            *guard = None;
            drop(guard);
            self.credentials.remove(&user_id);
            return Err(AuthError::CredentialExpired);
        };

        match self.refresher.refresh(&user_id, &refresh_token).await {
            Ok(fresh) => {
                debug!(user_id = %user_id, token = %fresh.masked_access_token(), "credential refreshed in place");
                *guard = Some(fresh.clone());
                Ok(fresh)
            }
            Err(AuthError::BackendUnavailable(reason)) => {
                // Transient: keep the stale entry, a later resolve may succeed.
                Err(AuthError::BackendUnavailable(reason))
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "refresh rejected, purging stale credential");
                *guard = None;
                drop(guard);
                self.credentials.remove(&user_id);
                Err(AuthError::CredentialExpired)
            }
        }
    }

    /// Destroy a session and its capability grants. The user's credential
    /// store entry survives, so a reconnect does not re-authenticate.
    pub fn close_session(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            debug!(session_id = %session_id, "session closed");
        }
    }

    /// Whether a credential is stored for a user, regardless of sessions.
    pub fn has_credential(&self, user_id: &str) -> bool {
        self.credentials.contains(user_id)
    }
}
