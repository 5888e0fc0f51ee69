pub mod backend;
pub mod login;

pub use backend::{AccountBackend, DeleteResponse, ExchangeRequest, ExchangeResponse, ReqwestAccountBackend};
pub use login::LoginOutcome;

use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::auth::{CredentialStore, StoreError, StoreExt};
use crate::config::ClientConfig;
use crate::model::UserProfile;
use crate::notify::Notifier;

/// What the rest of the client sees of the signed-in user.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    /// True while an initialization or login is in flight.
    pub loading: bool,
    pub profile: Option<UserProfile>,
}

#[derive(Clone)]
pub struct SessionManager {
    backend: Arc<dyn AccountBackend>,
    store: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    state: Arc<watch::Sender<SessionSnapshot>>,
}

impl SessionManager {
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, SessionError> {
        let backend = Arc::new(ReqwestAccountBackend::new(config)?);
        Ok(Self::with_backend(backend, store, notifier))
    }

    pub fn with_backend(
        backend: Arc<dyn AccountBackend>,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot {
            loading: true,
            ..SessionSnapshot::default()
        });
        Self {
            backend,
            store,
            notifier,
            state: Arc::new(state),
        }
    }

    pub fn backend(&self) -> &Arc<dyn AccountBackend> {
        &self.backend
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.state.borrow().profile.clone()
    }

    /// Restores the session from the persisted token, if it still verifies.
    /// A token the backend rejects is removed.
    pub async fn initialize(&self) -> SessionSnapshot {
        self.state.send_modify(|state| state.loading = true);

        let token = match self.store.token() {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(target: "jobpulse::session", error = %err, "failed to read stored token");
                None
            }
        };

        let Some(token) = token else {
            tracing::debug!(target: "jobpulse::session", "no stored token");
            self.publish(false, None);
            return self.snapshot();
        };

        match self.backend.verify(&token).await {
            Ok(profile) => {
                tracing::debug!(
                    target: "jobpulse::session",
                    user_id = %profile.id,
                    "restored session"
                );
                self.publish(true, Some(profile));
            }
            Err(err) => {
                if err.is_unauthorized() {
                    tracing::info!(
                        target: "jobpulse::session",
                        error = %err,
                        "stored token rejected; signing out"
                    );
                } else {
                    tracing::warn!(
                        target: "jobpulse::session",
                        error = %err,
                        "could not verify stored token; signing out"
                    );
                }
                if let Err(err) = self.store.clear_token() {
                    tracing::warn!(target: "jobpulse::session", error = %err, "failed to clear token");
                }
                self.publish(false, None);
            }
        }
        self.snapshot()
    }

    /// Replaces the profile wholesale.
    pub fn set_profile(&self, profile: Option<UserProfile>) {
        self.state.send_modify(|state| state.profile = profile);
    }

    /// Clears in-memory state first so a storage failure cannot leave the
    /// session looking signed in.
    pub fn logout(&self) -> Result<(), SessionError> {
        self.publish(false, None);
        self.store.clear_token()?;
        tracing::debug!(target: "jobpulse::session", "logged out");
        Ok(())
    }

    /// Guard for anything that needs a signed-in user.
    pub fn require_profile(&self) -> Result<UserProfile, SessionError> {
        let state = self.state.borrow();
        match (&state.profile, state.authenticated) {
            (Some(profile), true) => Ok(profile.clone()),
            _ => Err(SessionError::NotLoggedIn),
        }
    }

    /// Token and profile for an authorized call.
    pub fn credentials(&self) -> Result<(String, UserProfile), SessionError> {
        let profile = self.require_profile()?;
        Ok((self.token()?, profile))
    }

    pub fn token(&self) -> Result<String, SessionError> {
        self.store.token()?.ok_or(SessionError::NotLoggedIn)
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.state.send_modify(|state| state.loading = loading);
    }

    pub(crate) fn publish(&self, authenticated: bool, profile: Option<UserProfile>) {
        self.state.send_replace(SessionSnapshot {
            authenticated,
            loading: false,
            profile,
        });
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{message}")]
    Backend { status: StatusCode, message: String },
    #[error("{0}")]
    RateLimited(String),
    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("mailbox provisioning failed: {0}")]
    Provisioning(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            SessionError::Backend {
                status: StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN,
                ..
            } | SessionError::NotLoggedIn
        )
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::model::{EmailData, ProfileUpdate};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted backend: each call pops the next queued reply for its
    /// endpoint and records what it was asked.
    #[derive(Default)]
    pub(crate) struct MockAccountBackend {
        pub verify: Mutex<VecDeque<Result<UserProfile, SessionError>>>,
        pub exchange: Mutex<VecDeque<Result<ExchangeResponse, SessionError>>>,
        pub provision: Mutex<VecDeque<Result<(), SessionError>>>,
        pub update: Mutex<VecDeque<Result<UserProfile, SessionError>>>,
        pub delete: Mutex<VecDeque<Result<DeleteResponse, SessionError>>>,
        pub emails: Mutex<VecDeque<Result<Vec<EmailData>, SessionError>>>,
        pub calls: Mutex<Vec<String>>,
        pub exchanges: Mutex<Vec<ExchangeRequest>>,
        pub updates: Mutex<Vec<ProfileUpdate>>,
    }

    impl MockAccountBackend {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    fn next<T>(queue: &Mutex<VecDeque<Result<T, SessionError>>>, name: &str) -> Result<T, SessionError> {
        queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SessionError::InvalidResponse(format!("unscripted {name}"))))
    }

    #[async_trait]
    impl AccountBackend for MockAccountBackend {
        async fn verify(&self, token: &str) -> Result<UserProfile, SessionError> {
            self.calls.lock().push(format!("verify:{token}"));
            next(&self.verify, "verify")
        }

        async fn exchange(
            &self,
            request: &ExchangeRequest,
        ) -> Result<ExchangeResponse, SessionError> {
            self.calls.lock().push("exchange".into());
            self.exchanges.lock().push(request.clone());
            next(&self.exchange, "exchange")
        }

        async fn provision_mailbox(&self, token: &str) -> Result<(), SessionError> {
            self.calls.lock().push(format!("provision:{token}"));
            next(&self.provision, "provision")
        }

        async fn update_profile(
            &self,
            token: &str,
            update: &ProfileUpdate,
        ) -> Result<UserProfile, SessionError> {
            self.calls.lock().push(format!("update:{token}"));
            self.updates.lock().push(update.clone());
            next(&self.update, "update")
        }

        async fn delete_account(
            &self,
            token: &str,
            user_id: &str,
            _email: &str,
        ) -> Result<DeleteResponse, SessionError> {
            self.calls.lock().push(format!("delete:{token}:{user_id}"));
            next(&self.delete, "delete")
        }

        async fn fetch_emails(
            &self,
            token: &str,
            refresh: bool,
        ) -> Result<Vec<EmailData>, SessionError> {
            self.calls.lock().push(format!("emails:{token}:{refresh}"));
            next(&self.emails, "emails")
        }
    }

    pub(crate) fn backend_error(status: StatusCode, message: &str) -> SessionError {
        SessionError::Backend {
            status,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockAccountBackend, backend_error};
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::model::profile::tests::sample_profile;
    use crate::notify::NoticeLog;

    fn manager(backend: Arc<MockAccountBackend>) -> (SessionManager, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let manager = SessionManager::with_backend(backend, store.clone(), Arc::new(NoticeLog::new()));
        (manager, store)
    }

    #[test]
    fn starts_loading_and_signed_out() {
        let (manager, _) = manager(Arc::new(MockAccountBackend::default()));
        let snapshot = manager.snapshot();
        assert!(snapshot.loading);
        assert!(!snapshot.authenticated);
        assert!(snapshot.profile.is_none());
    }

    #[tokio::test]
    async fn initialize_without_token_skips_backend() {
        let backend = Arc::new(MockAccountBackend::default());
        let (manager, _) = manager(backend.clone());

        let snapshot = manager.initialize().await;
        assert!(!snapshot.authenticated);
        assert!(!snapshot.loading);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn initialize_restores_verified_session() {
        let backend = Arc::new(MockAccountBackend::default());
        backend.verify.lock().push_back(Ok(sample_profile()));
        let (manager, store) = manager(backend.clone());
        store.set_token("jwt-1").unwrap();

        let snapshot = manager.initialize().await;
        assert!(snapshot.authenticated);
        assert_eq!(snapshot.profile.map(|p| p.id), Some("u-1".to_string()));
        assert_eq!(backend.calls(), vec!["verify:jwt-1".to_string()]);
    }

    #[tokio::test]
    async fn initialize_discards_rejected_token() {
        let backend = Arc::new(MockAccountBackend::default());
        backend
            .verify
            .lock()
            .push_back(Err(backend_error(StatusCode::UNAUTHORIZED, "jwt expired")));
        let (manager, store) = manager(backend);
        store.set_token("stale").unwrap();

        let snapshot = manager.initialize().await;
        assert!(!snapshot.authenticated);
        assert!(!snapshot.loading);
        assert_eq!(store.token().unwrap(), None);
    }

    #[tokio::test]
    async fn initialize_signs_out_when_verification_cannot_complete() {
        let backend = Arc::new(MockAccountBackend::default());
        backend
            .verify
            .lock()
            .push_back(Err(SessionError::InvalidResponse("bad gateway".into())));
        let (manager, store) = manager(backend);
        store.set_token("jwt-1").unwrap();

        let snapshot = manager.initialize().await;
        assert!(!snapshot.authenticated);
        assert!(snapshot.profile.is_none());
        assert_eq!(store.token().unwrap(), None);
    }

    #[tokio::test]
    async fn logout_clears_token_and_profile() {
        let backend = Arc::new(MockAccountBackend::default());
        backend.verify.lock().push_back(Ok(sample_profile()));
        let (manager, store) = manager(backend);
        store.set_token("jwt-1").unwrap();
        manager.initialize().await;

        let mut rx = manager.subscribe();
        manager.logout().unwrap();
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert!(!snapshot.authenticated);
        assert!(snapshot.profile.is_none());
        assert_eq!(store.token().unwrap(), None);
        assert!(matches!(manager.credentials(), Err(SessionError::NotLoggedIn)));
        assert!(matches!(manager.require_profile(), Err(SessionError::NotLoggedIn)));
    }

    #[test]
    fn backend_errors_display_their_message_verbatim() {
        let err = backend_error(StatusCode::BAD_REQUEST, "invalid_grant");
        assert_eq!(err.to_string(), "invalid_grant");
        assert!(!err.is_unauthorized());
        assert!(backend_error(StatusCode::UNAUTHORIZED, "no").is_unauthorized());
    }
}
