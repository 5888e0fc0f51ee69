use super::{ExchangeRequest, ExchangeResponse, SessionError, SessionManager};
use crate::auth::{StoreExt, TestAccountSnapshot};
use crate::model::{OnboardingState, UserProfile};
use crate::notify::Notice;

pub const RATE_LIMIT_NOTICE: &str = "Too many login attempts. Please wait a moment and try again.";
pub const WELCOME_NOTICE: &str = "Welcome";

#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    pub profile: UserProfile,
    /// The backend created the account during this exchange.
    pub first_time: bool,
}

impl SessionManager {
    /// Exchanges an authorization code for a backend session.
    ///
    /// In test mode a previously stored test account is reused: its user id
    /// replaces `artifact`, so returning testers skip the consent screen.
    /// First real logins also provision the Gmail push watch; if that fails
    /// the freshly stored token is removed again and the login fails.
    pub async fn login_with_authorization_artifact(
        &self,
        artifact: &str,
        is_test_mode: bool,
    ) -> Result<LoginOutcome, SessionError> {
        self.set_loading(true);
        let result = self.exchange_and_persist(artifact, is_test_mode).await;
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    target: "jobpulse::session",
                    user_id = %outcome.profile.id,
                    first_time = outcome.first_time,
                    test_mode = is_test_mode,
                    "login complete"
                );
                self.notifier().notify(Notice::success(WELCOME_NOTICE));
            }
            Err(err) => {
                self.set_loading(false);
                tracing::warn!(target: "jobpulse::session", error = %err, "login failed");
                if matches!(err, SessionError::RateLimited(_)) {
                    self.notifier().notify(Notice::error(RATE_LIMIT_NOTICE));
                }
            }
        }
        result
    }

    async fn exchange_and_persist(
        &self,
        artifact: &str,
        is_test_mode: bool,
    ) -> Result<LoginOutcome, SessionError> {
        let mut code = artifact.trim().to_string();
        if is_test_mode {
            if let Some(snapshot) = self.store().test_snapshot()? {
                tracing::debug!(
                    target: "jobpulse::session",
                    user_id = %snapshot.user.id,
                    "reusing stored test account"
                );
                code = snapshot.user.id;
            }
        }
        if code.is_empty() {
            return Err(SessionError::InvalidConfig(
                "an authorization code is required".into(),
            ));
        }

        let response = self
            .backend()
            .exchange(&ExchangeRequest {
                token: code,
                is_test_user: is_test_mode,
            })
            .await?;
        if response.token.trim().is_empty() {
            return Err(SessionError::InvalidResponse(
                "login response did not include a token".into(),
            ));
        }

        self.store().set_token(&response.token)?;
        if let Err(err) = self.settle_new_login(&response, is_test_mode).await {
            if let Err(clear_err) = self.store().clear_token() {
                tracing::warn!(
                    target: "jobpulse::session",
                    error = %clear_err,
                    "failed to remove token after incomplete login"
                );
            }
            return Err(err);
        }

        self.publish(true, Some(response.user.clone()));
        Ok(LoginOutcome {
            profile: response.user,
            first_time: response.first_time,
        })
    }

    /// Everything that must succeed once the token is stored. The caller
    /// removes the token again if any step fails.
    async fn settle_new_login(
        &self,
        response: &ExchangeResponse,
        is_test_mode: bool,
    ) -> Result<(), SessionError> {
        if is_test_mode {
            self.store().set_test_snapshot(&TestAccountSnapshot {
                user: response.user.clone(),
            })?;
        }
        if response.first_time && !is_test_mode {
            self.backend()
                .provision_mailbox(&response.token)
                .await
                .map_err(|err| SessionError::Provisioning(err.to_string()))?;
        }
        if response.first_time {
            self.store().set_onboarding(&OnboardingState::default())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::{ONBOARDING_KEY, TEST_INFO_KEY};
    use crate::auth::{CredentialStore, MemoryCredentialStore, StoreError};
    use crate::model::profile::tests::sample_profile;
    use crate::notify::NoticeLog;
    use crate::session::mock::{MockAccountBackend, backend_error};
    use reqwest::StatusCode;
    use std::sync::Arc;

    struct Harness {
        manager: SessionManager,
        backend: Arc<MockAccountBackend>,
        store: Arc<MemoryCredentialStore>,
        notices: Arc<NoticeLog>,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MockAccountBackend::default());
        let store = Arc::new(MemoryCredentialStore::new());
        let notices = Arc::new(NoticeLog::new());
        let manager = SessionManager::with_backend(backend.clone(), store.clone(), notices.clone());
        Harness {
            manager,
            backend,
            store,
            notices,
        }
    }

    fn exchange_reply(token: &str, first_time: bool) -> ExchangeResponse {
        ExchangeResponse {
            token: token.to_string(),
            user: sample_profile(),
            first_time,
            message: None,
        }
    }

    #[tokio::test]
    async fn returning_user_gets_token_without_provisioning() {
        let h = harness();
        h.backend.exchange.lock().push_back(Ok(exchange_reply("jwt-1", false)));

        let outcome = h
            .manager
            .login_with_authorization_artifact("code-1", false)
            .await
            .unwrap();

        assert!(!outcome.first_time);
        assert_eq!(h.store.token().unwrap().as_deref(), Some("jwt-1"));
        assert_eq!(h.backend.calls(), vec!["exchange".to_string()]);
        assert_eq!(h.backend.exchanges.lock()[0].token, "code-1");
        let snapshot = h.manager.snapshot();
        assert!(snapshot.authenticated);
        assert!(!snapshot.loading);
        assert_eq!(h.notices.messages(), vec![WELCOME_NOTICE.to_string()]);
        assert_eq!(h.store.onboarding().unwrap(), None);
    }

    #[tokio::test]
    async fn first_login_provisions_and_resets_onboarding() {
        let h = harness();
        h.backend.exchange.lock().push_back(Ok(exchange_reply("jwt-2", true)));
        h.backend.provision.lock().push_back(Ok(()));

        let outcome = h
            .manager
            .login_with_authorization_artifact("code-2", false)
            .await
            .unwrap();

        assert!(outcome.first_time);
        assert_eq!(
            h.backend.calls(),
            vec!["exchange".to_string(), "provision:jwt-2".to_string()]
        );
        assert_eq!(h.store.onboarding().unwrap(), Some(OnboardingState::default()));
    }

    #[tokio::test]
    async fn provisioning_failure_removes_token() {
        let h = harness();
        h.backend.exchange.lock().push_back(Ok(exchange_reply("jwt-3", true)));
        h.backend
            .provision
            .lock()
            .push_back(Err(backend_error(StatusCode::BAD_GATEWAY, "pubsub down")));

        let err = h
            .manager
            .login_with_authorization_artifact("code-3", false)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Provisioning(ref msg) if msg == "pubsub down"));
        assert_eq!(h.store.token().unwrap(), None);
        assert!(!h.manager.snapshot().authenticated);
        assert!(!h.manager.snapshot().loading);
    }

    #[tokio::test]
    async fn test_mode_reuses_stored_identity_and_skips_provisioning() {
        let h = harness();
        h.store
            .set_test_snapshot(&TestAccountSnapshot {
                user: sample_profile(),
            })
            .unwrap();
        h.backend.exchange.lock().push_back(Ok(exchange_reply("jwt-t", true)));

        h.manager
            .login_with_authorization_artifact("ignored", true)
            .await
            .unwrap();

        let request = h.backend.exchanges.lock()[0].clone();
        assert_eq!(request.token, "u-1");
        assert!(request.is_test_user);
        assert_eq!(h.backend.calls(), vec!["exchange".to_string()]);
        assert!(h.store.test_snapshot().unwrap().is_some());
        assert_eq!(h.store.onboarding().unwrap(), Some(OnboardingState::default()));
    }

    #[tokio::test]
    async fn first_test_login_stores_snapshot() {
        let h = harness();
        h.backend.exchange.lock().push_back(Ok(exchange_reply("jwt-t", false)));

        h.manager
            .login_with_authorization_artifact("code-t", true)
            .await
            .unwrap();

        assert_eq!(h.backend.exchanges.lock()[0].token, "code-t");
        let stored = h.store.test_snapshot().unwrap().unwrap();
        assert_eq!(stored.user, sample_profile());
    }

    #[tokio::test]
    async fn rate_limit_surfaces_distinct_notice() {
        let h = harness();
        h.backend
            .exchange
            .lock()
            .push_back(Err(SessionError::RateLimited("slow down".into())));

        let err = h
            .manager
            .login_with_authorization_artifact("code-4", false)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "slow down");
        assert_eq!(h.notices.messages(), vec![RATE_LIMIT_NOTICE.to_string()]);
        assert_eq!(h.store.token().unwrap(), None);
    }

    #[tokio::test]
    async fn backend_rejection_keeps_message_and_stores_nothing() {
        let h = harness();
        h.backend
            .exchange
            .lock()
            .push_back(Err(backend_error(StatusCode::BAD_REQUEST, "invalid_grant")));

        let err = h
            .manager
            .login_with_authorization_artifact("used-code", false)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "invalid_grant");
        assert_eq!(h.store.token().unwrap(), None);
        assert!(h.notices.messages().is_empty());
    }

    #[tokio::test]
    async fn empty_code_is_rejected_before_any_request() {
        let h = harness();
        let err = h
            .manager
            .login_with_authorization_artifact("  ", false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
        assert!(h.backend.calls().is_empty());
    }

    /// Store that refuses writes to one key.
    struct RefusingStore {
        inner: MemoryCredentialStore,
        refused: &'static str,
    }

    impl CredentialStore for RefusingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if key == self.refused {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    fn refusing(
        refused: &'static str,
    ) -> (SessionManager, Arc<MockAccountBackend>, Arc<RefusingStore>) {
        let backend = Arc::new(MockAccountBackend::default());
        let store = Arc::new(RefusingStore {
            inner: MemoryCredentialStore::new(),
            refused,
        });
        let manager = SessionManager::with_backend(
            backend.clone(),
            store.clone(),
            Arc::new(NoticeLog::new()),
        );
        (manager, backend, store)
    }

    #[tokio::test]
    async fn unsaved_test_snapshot_removes_token() {
        let (manager, backend, store) = refusing(TEST_INFO_KEY);
        backend.exchange.lock().push_back(Ok(exchange_reply("jwt-t", false)));

        let err = manager
            .login_with_authorization_artifact("code-t", true)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Store(StoreError::Io(_))));
        assert_eq!(store.token().unwrap(), None);
        let snapshot = manager.snapshot();
        assert!(!snapshot.authenticated);
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn unsaved_onboarding_removes_token() {
        let (manager, backend, store) = refusing(ONBOARDING_KEY);
        backend.exchange.lock().push_back(Ok(exchange_reply("jwt-2", true)));
        backend.provision.lock().push_back(Ok(()));

        let err = manager
            .login_with_authorization_artifact("code-2", false)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Store(_)));
        assert_eq!(store.token().unwrap(), None);
        assert_eq!(store.onboarding().unwrap(), None);
        assert!(!manager.snapshot().authenticated);
    }
}
