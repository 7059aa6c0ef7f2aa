//! In-memory authentication state, kept in step with the persisted store.

use std::future::Future;

use tracing::{info, warn};

use crate::db::{PersistedSession, SessionStore};
use crate::error::StoreError;
use crate::models::{BearerToken, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Persisted state has not been read yet.
    Loading,
    Ready,
}

/// Outcome of checking a restored token against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    /// The backend refused the token.
    Rejected,
    /// The backend could not be asked.
    Unreachable,
}

/// Anything that can tell whether a bearer token is still accepted.
pub trait TokenVerifier {
    fn verify(&self, token: &BearerToken) -> impl Future<Output = Verification>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub user: Option<User>,
    pub access_token: Option<BearerToken>,
    pub refresh_token: Option<BearerToken>,
}

impl SessionState {
    fn loading() -> Self {
        Self {
            phase: Phase::Loading,
            user: None,
            access_token: None,
            refresh_token: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    pub fn is_logged_in(&self) -> bool {
        self.access_token.is_some()
    }
}

pub struct SessionManager {
    store: SessionStore,
    state: SessionState,
}

impl SessionManager {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            state: SessionState::loading(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.is_logged_in()
    }

    pub fn current_user(&self) -> Option<&User> {
        self.state.user.as_ref()
    }

    pub fn access_token(&self) -> Option<&BearerToken> {
        self.state.access_token.as_ref()
    }

    /// Restores the persisted session, checking the token once.
    ///
    /// Never fails: unreadable storage, a rejected token or an unreachable
    /// backend all leave the manager logged out. The phase is `Ready`
    /// afterwards in every case.
    pub async fn initialize<V: TokenVerifier>(&mut self, verifier: &V) {
        let persisted = match self.store.load().await {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(error = %err, "could not read persisted session");
                None
            }
        };

        if let Some(persisted) = persisted {
            match verifier.verify(&persisted.access_token).await {
                Verification::Valid => {
                    info!(user = %persisted.user.email, "session restored");
                    self.state.user = Some(persisted.user);
                    self.state.access_token = Some(persisted.access_token);
                    self.state.refresh_token = persisted.refresh_token;
                }
                Verification::Rejected => {
                    warn!(user = %persisted.user.email, "stored token rejected, clearing session");
                    if let Err(err) = self.store.clear().await {
                        warn!(error = %err, "could not clear rejected session");
                    }
                }
                Verification::Unreachable => {
                    warn!("could not verify stored session, continuing logged out");
                }
            }
        }

        self.state.phase = Phase::Ready;
    }

    pub async fn login(
        &mut self,
        access_token: BearerToken,
        refresh_token: Option<BearerToken>,
        user: User,
    ) -> Result<(), StoreError> {
        let persisted = PersistedSession {
            access_token,
            refresh_token,
            user,
        };
        self.store.save(&persisted).await?;

        info!(user = %persisted.user.email, "logged in");
        self.state.user = Some(persisted.user);
        self.state.access_token = Some(persisted.access_token);
        self.state.refresh_token = persisted.refresh_token;
        self.state.phase = Phase::Ready;
        Ok(())
    }

    /// Ends the session on this client only.
    pub async fn logout(&mut self) -> Result<(), StoreError> {
        self.state.user = None;
        self.state.access_token = None;
        self.state.refresh_token = None;
        self.store.clear().await?;
        info!("logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::models::UserId;

    struct FixedVerifier {
        answer: Verification,
        calls: Cell<usize>,
    }

    impl FixedVerifier {
        fn new(answer: Verification) -> Self {
            Self {
                answer,
                calls: Cell::new(0),
            }
        }
    }

    impl TokenVerifier for FixedVerifier {
        async fn verify(&self, _token: &BearerToken) -> Verification {
            self.calls.set(self.calls.get() + 1);
            self.answer
        }
    }

    fn jan() -> User {
        User {
            id: UserId::Number(1),
            email: "jan@example.com".to_string(),
        }
    }

    async fn logged_in_store() -> SessionStore {
        let store = SessionStore::in_memory().await.unwrap();
        let mut manager = SessionManager::new(store.clone());
        manager
            .login(
                BearerToken::parse("access-1").unwrap(),
                BearerToken::parse("refresh-1"),
                jan(),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn starts_loading_and_is_ready_after_initialize() {
        let store = SessionStore::in_memory().await.unwrap();
        let mut manager = SessionManager::new(store);
        assert!(manager.state().is_loading());

        let verifier = FixedVerifier::new(Verification::Valid);
        manager.initialize(&verifier).await;

        assert!(!manager.state().is_loading());
        assert!(!manager.is_logged_in());
        assert_eq!(verifier.calls.get(), 0);
    }

    #[tokio::test]
    async fn login_sets_state_and_persists() {
        let store = SessionStore::in_memory().await.unwrap();
        let mut manager = SessionManager::new(store.clone());
        manager
            .login(BearerToken::parse("access-1").unwrap(), None, jan())
            .await
            .unwrap();

        assert!(manager.is_logged_in());
        assert_eq!(manager.access_token().unwrap().as_str(), "access-1");
        assert_eq!(manager.current_user(), Some(&jan()));
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn login_then_logout_leaves_nothing_behind() {
        let store = logged_in_store().await;
        let mut manager = SessionManager::new(store.clone());
        manager.initialize(&FixedVerifier::new(Verification::Valid)).await;
        assert!(manager.is_logged_in());

        manager.logout().await.unwrap();

        assert!(!manager.is_logged_in());
        assert!(manager.current_user().is_none());
        assert!(store.load().await.unwrap().is_none());
        for key in [
            crate::db::ACCESS_TOKEN_KEY,
            crate::db::REFRESH_TOKEN_KEY,
            crate::db::USER_KEY,
        ] {
            assert!(store.get(key).await.unwrap().is_none(), "{key} survived logout");
        }
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let store = logged_in_store().await;
        let mut once = SessionManager::new(store.clone());
        once.initialize(&FixedVerifier::new(Verification::Valid)).await;
        once.logout().await.unwrap();
        let after_one = once.state().clone();

        once.logout().await.unwrap();

        assert_eq!(once.state(), &after_one);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn valid_token_restores_the_session() {
        let store = logged_in_store().await;
        let mut manager = SessionManager::new(store);
        let verifier = FixedVerifier::new(Verification::Valid);

        manager.initialize(&verifier).await;

        assert!(manager.is_logged_in());
        assert_eq!(manager.current_user(), Some(&jan()));
        assert_eq!(
            manager.state().refresh_token.as_ref().map(BearerToken::as_str),
            Some("refresh-1")
        );
        assert_eq!(verifier.calls.get(), 1);
    }

    #[tokio::test]
    async fn rejected_token_clears_persisted_session() {
        let store = logged_in_store().await;
        let mut manager = SessionManager::new(store.clone());

        manager.initialize(&FixedVerifier::new(Verification::Rejected)).await;

        assert_eq!(manager.state().phase, Phase::Ready);
        assert!(!manager.is_logged_in());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_backend_keeps_storage_but_stays_logged_out() {
        let store = logged_in_store().await;
        let mut manager = SessionManager::new(store.clone());

        manager.initialize(&FixedVerifier::new(Verification::Unreachable)).await;

        assert_eq!(manager.state().phase, Phase::Ready);
        assert!(!manager.is_logged_in());
        assert!(store.load().await.unwrap().is_some());
    }
}
