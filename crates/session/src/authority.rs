//! Session & permission authority.
//!
//! Owns the token slot and the published [`SessionSnapshot`]. Every write to
//! either goes through the snapshot channel's write lock, together with the
//! generation bump that tags it, so writes are totally ordered.
//!
//! # Generations
//! Each verification (and each `login`/`logout`) takes a new generation. A
//! verification result is applied only if its generation is still the
//! latest when it completes; otherwise it is discarded entirely, token
//! eviction included. This gives last-call-wins ordering regardless of the
//! order responses arrive in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use scholaris_auth::{PermissionSet, SessionToken, User};

use crate::config::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_TOKEN_TTL_DAYS, SessionConfig};
use crate::error::SessionError;
use crate::remote::{HttpAuthorityClient, RemoteAuthority, RemoteError, VerifyResponse};
use crate::snapshot::{SessionPhase, SessionSnapshot};
use crate::token_store::{FileTokenStore, TokenStore, TokenStoreError};

/// Tunables of an [`Authority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthoritySettings {
    /// Bound on each remote call.
    pub request_timeout: Duration,
    pub token_ttl_days: u32,
}

impl Default for AuthoritySettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            token_ttl_days: DEFAULT_TOKEN_TTL_DAYS,
        }
    }
}

impl From<&SessionConfig> for AuthoritySettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            token_ttl_days: config.token_ttl_days,
        }
    }
}

/// How a [`Authority::verify_session`] call ended.
#[derive(Debug)]
pub enum VerifyOutcome {
    /// No stored token; settled unauthenticated without a network call.
    Anonymous,
    /// The snapshot now holds the verified user and permissions.
    Verified,
    /// The authority refused the token (or could not be reached); the token
    /// was evicted and the snapshot reset.
    Rejected(SessionError),
    /// A newer operation started while this one was in flight; its result
    /// was discarded.
    Superseded,
}

/// Result of applying one verification round trip.
enum Applied {
    Verified(User),
    Rejected(SessionError),
    Superseded,
}

pub struct Authority {
    remote: Arc<dyn RemoteAuthority>,
    store: Arc<dyn TokenStore>,
    settings: AuthoritySettings,
    state: watch::Sender<SessionSnapshot>,
    generation: AtomicU64,
}

impl Authority {
    /// Create an authority in the `Uninitialized` state.
    ///
    /// Nothing is read or fetched until [`verify_session`](Self::verify_session)
    /// (or [`spawn_verification`](Self::spawn_verification)) is called.
    pub fn new(
        remote: Arc<dyn RemoteAuthority>,
        store: Arc<dyn TokenStore>,
        settings: AuthoritySettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::initial());
        Self {
            remote,
            store,
            settings,
            state,
            generation: AtomicU64::new(0),
        }
    }

    /// HTTP client + file-backed token store, as configured.
    pub fn from_config(config: &SessionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!("failed to build HTTP client with timeout: {err}; using defaults");
                reqwest::Client::new()
            });

        Self::new(
            Arc::new(HttpAuthorityClient::with_client(config.api_url.clone(), client)),
            Arc::new(FileTokenStore::new(config.token_path.clone())),
            AuthoritySettings::from(config),
        )
    }

    /// Current snapshot (cloned).
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Read-only subscription to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Latest generation issued.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run the start-up verification in the background.
    pub fn spawn_verification(self: &Arc<Self>) -> JoinHandle<VerifyOutcome> {
        let authority = Arc::clone(self);
        tokio::spawn(async move { authority.verify_session().await })
    }

    /// Verify the stored token against the remote authority.
    ///
    /// Never returns an error: a failed verification is a normal outcome
    /// (anonymous visitor) and is reported through [`VerifyOutcome`].
    pub async fn verify_session(&self) -> VerifyOutcome {
        let Some(token) = self.stored_token() else {
            self.state.send_modify(|snap| {
                self.next_generation();
                *snap = SessionSnapshot::unauthenticated();
            });
            tracing::info!("no stored token; session is anonymous");
            return VerifyOutcome::Anonymous;
        };

        let generation = self.begin_verification();
        match self.complete_verification(generation, &token).await {
            Applied::Verified(_) => VerifyOutcome::Verified,
            Applied::Rejected(err) => VerifyOutcome::Rejected(err),
            Applied::Superseded => VerifyOutcome::Superseded,
        }
    }

    /// Authenticate with credentials, store the issued token, then verify it
    /// to obtain the permission set.
    ///
    /// A rejected login leaves the snapshot and the token slot untouched. If
    /// the follow-up verification is rejected the session is torn down and
    /// that error is returned. If a newer operation (e.g. `logout`) overtakes
    /// the verification, the user from the login response is returned and the
    /// newer operation owns the snapshot.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<User, SessionError> {
        let bound = self.settings.request_timeout;
        let response = match tokio::time::timeout(bound, self.remote.login(identifier, password)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::warn!("login rejected: {err}");
                return Err(SessionError::from_login(err));
            }
            Err(_) => return Err(SessionError::from_login(RemoteError::Timeout(bound))),
        };

        let token = response.token;
        let user = response.user;

        let mut begun: Result<u64, TokenStoreError> = Ok(0);
        self.state.send_if_modified(|snap| {
            if let Err(err) = self.store.set(&token, self.settings.token_ttl_days) {
                begun = Err(err);
                return false;
            }

            begun = Ok(self.next_generation());
            *snap = SessionSnapshot {
                user: Some(user.clone()),
                permissions: PermissionSet::empty(),
                loading: true,
                phase: SessionPhase::Verifying,
            };
            true
        });

        let generation = begun.inspect_err(|err| {
            tracing::error!("failed to store session token after login: {err}");
        })?;
        tracing::info!(user_id = %user.id, generation, "login accepted; verifying session");

        match self.complete_verification(generation, &token).await {
            Applied::Verified(verified) => Ok(verified),
            Applied::Rejected(err) => Err(err),
            Applied::Superseded => Ok(user),
        }
    }

    /// Drop the session: remove the token and reset the snapshot.
    ///
    /// Synchronous, makes no network call and always succeeds. Any
    /// verification still in flight is discarded when it completes.
    pub fn logout(&self) {
        self.state.send_modify(|snap| {
            self.next_generation();
            if let Err(err) = self.store.remove() {
                tracing::error!("failed to remove session token: {err}");
            }
            *snap = SessionSnapshot::unauthenticated();
        });
        tracing::info!("session closed");
    }

    /// Re-read the user record only; permissions are left untouched.
    ///
    /// Only meaningful for an authenticated session: otherwise returns
    /// `Ok(None)` without a network call. A failure is logged and returned but
    /// never clears the session. Returns `Ok(None)` as well when a newer
    /// operation overtook the refresh.
    pub async fn refresh_user(&self) -> Result<Option<User>, SessionError> {
        let generation = self.generation();

        if self.state.borrow().phase != SessionPhase::Authenticated {
            tracing::debug!("identity refresh skipped; session is not authenticated");
            return Ok(None);
        }

        let Some(token) = self.stored_token() else {
            return Ok(None);
        };

        let user = match self.call_verify(&token).await {
            Ok(response) => response.user,
            Err(err) => {
                tracing::warn!("identity refresh failed; keeping current session: {err}");
                return Err(err);
            }
        };

        let applied = self.state.send_if_modified(|snap| {
            if !self.is_current(generation) || snap.phase != SessionPhase::Authenticated {
                return false;
            }
            snap.user = Some(user.clone());
            true
        });

        if applied {
            tracing::debug!(user_id = %user.id, "identity refreshed");
            Ok(Some(user))
        } else {
            tracing::debug!(generation, "discarding stale identity refresh");
            Ok(None)
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    /// Must be called under the snapshot write lock.
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn stored_token(&self) -> Option<SessionToken> {
        match self.store.get() {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!("token store unreadable; treating session as anonymous: {err}");
                if let Err(err) = self.store.remove() {
                    tracing::error!("failed to clear unreadable token store: {err}");
                }
                None
            }
        }
    }

    /// Enter `Verifying`, keeping the (non-authoritative) previous values.
    fn begin_verification(&self) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|snap| {
            generation = self.next_generation();
            snap.loading = true;
            snap.phase = SessionPhase::Verifying;
        });
        generation
    }

    async fn call_verify(&self, token: &SessionToken) -> Result<VerifyResponse, SessionError> {
        let bound = self.settings.request_timeout;
        match tokio::time::timeout(bound, self.remote.verify_session(token)).await {
            Ok(result) => result.map_err(SessionError::from_verify),
            Err(_) => Err(SessionError::from_verify(RemoteError::Timeout(bound))),
        }
    }

    async fn complete_verification(&self, generation: u64, token: &SessionToken) -> Applied {
        let result = self.call_verify(token).await;

        let mut applied = Applied::Superseded;
        self.state.send_if_modified(|snap| {
            if !self.is_current(generation) {
                return false;
            }

            match result {
                Ok(VerifyResponse { user, permissions }) => {
                    for fault in permissions.integrity_faults() {
                        tracing::warn!(
                            node = %fault.node,
                            count = fault.count,
                            "remote authority returned conflicting grants; access to this node is denied"
                        );
                    }
                    tracing::info!(
                        user_id = %user.id,
                        permissions = permissions.len(),
                        generation,
                        "session verified"
                    );
                    applied = Applied::Verified(user.clone());
                    *snap = SessionSnapshot::authenticated(user, permissions);
                }
                Err(err) => {
                    tracing::warn!(generation, "session verification failed: {err}");
                    if let Err(store_err) = self.store.remove() {
                        tracing::error!("failed to evict rejected token: {store_err}");
                    }
                    *snap = SessionSnapshot::unauthenticated();
                    applied = Applied::Rejected(err);
                }
            }
            true
        });

        if matches!(applied, Applied::Superseded) {
            tracing::debug!(
                generation,
                latest = self.generation(),
                "discarding stale verification result"
            );
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use scholaris_auth::{Capability, NavNode, Permission};
    use scholaris_core::{MenuId, RoleId, UserId};

    use crate::remote::LoginResponse;
    use crate::snapshot::Access;
    use crate::token_store::MemoryTokenStore;

    type VerifyReply = Result<VerifyResponse, RemoteError>;

    enum Script {
        Reply(VerifyReply),
        Gated(oneshot::Receiver<VerifyReply>),
        Hang,
    }

    /// Scripted remote authority that counts its calls.
    #[derive(Default)]
    struct FakeRemote {
        login_replies: Mutex<VecDeque<Option<Result<LoginResponse, RemoteError>>>>,
        verify_scripts: Mutex<VecDeque<Script>>,
        login_calls: AtomicUsize,
        verify_calls: AtomicUsize,
        seen_tokens: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        fn script_login(&self, reply: Result<LoginResponse, RemoteError>) {
            self.login_replies.lock().unwrap().push_back(Some(reply));
        }

        fn script_login_hang(&self) {
            self.login_replies.lock().unwrap().push_back(None);
        }

        fn script_verify(&self, script: Script) {
            self.verify_scripts.lock().unwrap().push_back(script);
        }

        fn network_calls(&self) -> usize {
            self.login_calls.load(Ordering::SeqCst) + self.verify_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteAuthority for FakeRemote {
        async fn login(&self, _identifier: &str, _password: &str) -> Result<LoginResponse, RemoteError> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.login_replies.lock().unwrap().pop_front();
            match reply {
                Some(Some(reply)) => reply,
                Some(None) => std::future::pending().await,
                None => Err(RemoteError::Transport("no scripted login".into())),
            }
        }

        async fn verify_session(&self, token: &SessionToken) -> VerifyReply {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_tokens.lock().unwrap().push(token.as_str().to_string());

            let script = self.verify_scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Reply(reply)) => reply,
                Some(Script::Gated(rx)) => rx
                    .await
                    .unwrap_or_else(|_| Err(RemoteError::Transport("gate dropped".into()))),
                Some(Script::Hang) => std::future::pending::<VerifyReply>().await,
                None => Err(RemoteError::Transport("no scripted verification".into())),
            }
        }
    }

    fn token(value: &str) -> SessionToken {
        SessionToken::new(value).unwrap()
    }

    fn user(id: i64, name: &str) -> User {
        User {
            id: UserId::new(id),
            first_name: name.to_string(),
            last_name: "Quispe".to_string(),
            email: format!("{}@colegio.edu.pe", name.to_lowercase()),
            role_name: "Administrador".to_string(),
            role_id: RoleId::new(1),
            active: true,
            avatar: None,
        }
    }

    fn perm(menu: i64, view: bool) -> Permission {
        Permission {
            menu_id: MenuId::new(menu),
            menu_name: format!("Menu {menu}"),
            menu_route: format!("/menu-{menu}"),
            menu_icon: None,
            submenu_id: None,
            submenu_name: None,
            submenu_route: None,
            can_view: view,
            can_create: false,
            can_edit: false,
            can_delete: false,
        }
    }

    fn verified(user: User, perms: Vec<Permission>) -> VerifyReply {
        Ok(VerifyResponse {
            user,
            permissions: PermissionSet::new(perms),
        })
    }

    fn settings(timeout_ms: u64) -> AuthoritySettings {
        AuthoritySettings {
            request_timeout: Duration::from_millis(timeout_ms),
            token_ttl_days: 7,
        }
    }

    fn authority(remote: &Arc<FakeRemote>, store: &Arc<MemoryTokenStore>) -> Authority {
        Authority::new(remote.clone(), store.clone(), settings(500))
    }

    async fn wait_for_verify_calls(remote: &FakeRemote, n: usize) {
        for _ in 0..200 {
            if remote.verify_calls.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {n} verification call(s)");
    }

    #[tokio::test]
    async fn starts_uninitialized_and_loading() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(MemoryTokenStore::new());
        let authority = authority(&remote, &store);

        let snap = authority.snapshot();
        assert!(snap.loading);
        assert!(snap.user.is_none());
        assert_eq!(snap.phase(), SessionPhase::Uninitialized);
        assert_eq!(remote.network_calls(), 0);
    }

    #[tokio::test]
    async fn missing_token_settles_anonymous_without_network() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(MemoryTokenStore::new());
        let authority = authority(&remote, &store);

        let outcome = authority.verify_session().await;

        assert!(matches!(outcome, VerifyOutcome::Anonymous));
        assert_eq!(authority.snapshot(), SessionSnapshot::unauthenticated());
        assert_eq!(remote.network_calls(), 0);
    }

    #[tokio::test]
    async fn valid_token_publishes_user_and_permissions() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true)])));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = authority(&remote, &store);

        let outcome = authority.verify_session().await;

        assert!(matches!(outcome, VerifyOutcome::Verified));
        let snap = authority.snapshot();
        assert!(!snap.loading);
        assert_eq!(snap.phase(), SessionPhase::Authenticated);
        assert_eq!(snap.user.as_ref().map(|u| u.id), Some(UserId::new(1)));
        assert_eq!(snap.permissions.as_slice(), &[perm(5, true)]);
        assert_eq!(
            snap.gate(NavNode::menu(MenuId::new(5)), Capability::View),
            Access::Allowed
        );
        assert_eq!(remote.seen_tokens.lock().unwrap().as_slice(), &["valid".to_string()]);
    }

    #[tokio::test]
    async fn rejected_token_is_evicted() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Reply(Err(RemoteError::SessionInvalid("expired".into()))));
        let store = Arc::new(MemoryTokenStore::with_token(token("revoked")));
        let authority = authority(&remote, &store);

        let outcome = authority.verify_session().await;

        assert!(matches!(
            outcome,
            VerifyOutcome::Rejected(SessionError::SessionInvalid(_))
        ));
        assert!(store.get().unwrap().is_none());
        assert_eq!(authority.snapshot(), SessionSnapshot::unauthenticated());
    }

    #[tokio::test]
    async fn transport_failure_is_treated_as_invalid_session() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Reply(Err(RemoteError::Transport("connection refused".into()))));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = authority(&remote, &store);

        let outcome = authority.verify_session().await;

        assert!(matches!(outcome, VerifyOutcome::Rejected(SessionError::Transport(_))));
        assert!(store.get().unwrap().is_none());
        assert_eq!(authority.snapshot(), SessionSnapshot::unauthenticated());
    }

    #[tokio::test]
    async fn hung_verification_times_out_as_invalid_session() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Hang);
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = Authority::new(remote.clone(), store.clone(), settings(30));

        let outcome = authority.verify_session().await;

        assert!(matches!(
            outcome,
            VerifyOutcome::Rejected(SessionError::SessionInvalid(_))
        ));
        assert!(store.get().unwrap().is_none());
        assert!(!authority.snapshot().loading);
    }

    #[tokio::test]
    async fn repeated_verification_converges_to_the_same_snapshot() {
        let remote = Arc::new(FakeRemote::default());
        for _ in 0..3 {
            remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true)])));
        }
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = authority(&remote, &store);

        authority.verify_session().await;
        let once = authority.snapshot();

        let (first, second) = tokio::join!(authority.verify_session(), authority.verify_session());
        assert!(!matches!(first, VerifyOutcome::Rejected(_)));
        assert!(!matches!(second, VerifyOutcome::Rejected(_)));

        assert_eq!(authority.snapshot(), once);
        assert!(store.get().unwrap().is_some());
    }

    #[tokio::test]
    async fn late_response_from_superseded_call_is_discarded() {
        let remote = Arc::new(FakeRemote::default());
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        remote.script_verify(Script::Gated(rx_a));
        remote.script_verify(Script::Gated(rx_b));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = Arc::new(authority(&remote, &store));

        let call_a = authority.spawn_verification();
        wait_for_verify_calls(&remote, 1).await;
        let call_b = authority.spawn_verification();
        wait_for_verify_calls(&remote, 2).await;

        tx_b.send(verified(user(2, "Beto"), vec![perm(7, true)])).unwrap();
        assert!(matches!(call_b.await.unwrap(), VerifyOutcome::Verified));

        tx_a.send(verified(user(1, "Ana"), vec![perm(5, true)])).unwrap();
        assert!(matches!(call_a.await.unwrap(), VerifyOutcome::Superseded));

        let snap = authority.snapshot();
        assert_eq!(snap.user.map(|u| u.id), Some(UserId::new(2)));
        assert_eq!(snap.permissions.as_slice(), &[perm(7, true)]);
    }

    #[tokio::test]
    async fn late_failure_from_superseded_call_keeps_token() {
        let remote = Arc::new(FakeRemote::default());
        let (tx_a, rx_a) = oneshot::channel();
        remote.script_verify(Script::Gated(rx_a));
        remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true)])));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = Arc::new(authority(&remote, &store));

        let call_a = authority.spawn_verification();
        wait_for_verify_calls(&remote, 1).await;
        assert!(matches!(authority.verify_session().await, VerifyOutcome::Verified));

        tx_a.send(Err(RemoteError::SessionInvalid("late".into()))).unwrap();
        assert!(matches!(call_a.await.unwrap(), VerifyOutcome::Superseded));

        assert_eq!(store.get().unwrap(), Some(token("valid")));
        assert!(authority.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn login_stores_token_and_takes_permissions_from_verification() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_login(Ok(LoginResponse {
            token: token("fresh"),
            user: user(1, "Ana"),
        }));
        remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true), perm(6, false)])));
        let store = Arc::new(MemoryTokenStore::new());
        let authority = authority(&remote, &store);

        let logged_in = authority.login("ana@colegio.edu.pe", "secreto").await.unwrap();

        assert_eq!(logged_in.id, UserId::new(1));
        assert_eq!(store.get().unwrap(), Some(token("fresh")));
        assert_eq!(remote.verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.seen_tokens.lock().unwrap().as_slice(), &["fresh".to_string()]);

        let snap = authority.snapshot();
        assert_eq!(snap.phase(), SessionPhase::Authenticated);
        assert_eq!(snap.permissions.len(), 2);
    }

    #[tokio::test]
    async fn login_publishes_user_while_permissions_load() {
        let remote = Arc::new(FakeRemote::default());
        let (tx, rx) = oneshot::channel();
        remote.script_login(Ok(LoginResponse {
            token: token("fresh"),
            user: user(1, "Ana"),
        }));
        remote.script_verify(Script::Gated(rx));
        let store = Arc::new(MemoryTokenStore::new());
        let authority = Arc::new(authority(&remote, &store));

        let login = tokio::spawn({
            let authority = authority.clone();
            async move { authority.login("ana", "secreto").await }
        });
        wait_for_verify_calls(&remote, 1).await;

        let mid = authority.snapshot();
        assert!(mid.loading);
        assert_eq!(mid.phase(), SessionPhase::Verifying);
        assert_eq!(mid.user.as_ref().map(|u| u.id), Some(UserId::new(1)));
        assert!(mid.permissions.is_empty());
        assert_eq!(
            mid.gate(NavNode::menu(MenuId::new(5)), Capability::View),
            Access::Pending
        );

        tx.send(verified(user(1, "Ana"), vec![perm(5, true)])).unwrap();
        login.await.unwrap().unwrap();

        let done = authority.snapshot();
        assert!(!done.loading);
        assert_eq!(done.permissions.len(), 1);
    }

    #[tokio::test]
    async fn bad_credentials_leave_everything_untouched() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true)])));
        remote.script_login(Err(RemoteError::Authentication("Credenciales inválidas".into())));
        let store = Arc::new(MemoryTokenStore::with_token(token("existing")));
        let authority = authority(&remote, &store);

        authority.verify_session().await;
        let before = authority.snapshot();
        let generation = authority.generation();

        let err = authority.login("ana", "wrong").await.unwrap_err();

        assert!(matches!(err, SessionError::Authentication(ref msg) if msg == "Credenciales inválidas"));
        assert_eq!(authority.snapshot(), before);
        assert_eq!(authority.generation(), generation);
        assert_eq!(store.get().unwrap(), Some(token("existing")));
        assert_eq!(remote.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bad_credentials_from_anonymous_keep_slot_empty() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_login(Err(RemoteError::Authentication("Credenciales inválidas".into())));
        let store = Arc::new(MemoryTokenStore::new());
        let authority = authority(&remote, &store);
        authority.verify_session().await;

        assert!(authority.login("ana", "wrong").await.is_err());

        assert!(store.get().unwrap().is_none());
        assert_eq!(authority.snapshot(), SessionSnapshot::unauthenticated());
    }

    #[tokio::test]
    async fn hung_login_times_out_without_side_effects() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_login_hang();
        let store = Arc::new(MemoryTokenStore::new());
        let authority = Authority::new(remote.clone(), store.clone(), settings(30));
        authority.verify_session().await;
        let generation = authority.generation();

        let err = authority.login("ana", "secreto").await.unwrap_err();

        assert!(matches!(err, SessionError::Transport(_)));
        assert!(!err.is_rejection());
        assert!(store.get().unwrap().is_none());
        assert_eq!(authority.snapshot(), SessionSnapshot::unauthenticated());
        assert_eq!(authority.generation(), generation);
        assert_eq!(remote.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unstorable_token_fails_login_with_storage_error() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_login(Ok(LoginResponse {
            token: token("fresh"),
            user: user(1, "Ana"),
        }));
        let store = Arc::new(MemoryTokenStore::new());
        let authority = Authority::new(
            remote.clone(),
            store.clone(),
            AuthoritySettings {
                request_timeout: Duration::from_millis(500),
                token_ttl_days: u32::MAX,
            },
        );
        let before = authority.snapshot();

        let err = authority.login("ana", "secreto").await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::Storage(TokenStoreError::TtlOutOfRange(_))
        ));
        assert_eq!(authority.snapshot(), before);
        assert!(store.get().unwrap().is_none());
        assert_eq!(remote.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn login_followed_by_rejected_verification_tears_down() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_login(Ok(LoginResponse {
            token: token("fresh"),
            user: user(1, "Ana"),
        }));
        remote.script_verify(Script::Reply(Err(RemoteError::SessionInvalid("revoked".into()))));
        let store = Arc::new(MemoryTokenStore::new());
        let authority = authority(&remote, &store);

        let err = authority.login("ana", "secreto").await.unwrap_err();

        assert!(matches!(err, SessionError::SessionInvalid(_)));
        assert!(store.get().unwrap().is_none());
        assert_eq!(authority.snapshot(), SessionSnapshot::unauthenticated());
    }

    #[tokio::test]
    async fn logout_is_synchronous_and_offline() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true)])));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = authority(&remote, &store);
        authority.verify_session().await;
        let calls = remote.network_calls();

        authority.logout();

        assert_eq!(authority.snapshot(), SessionSnapshot::unauthenticated());
        assert!(store.get().unwrap().is_none());
        assert_eq!(remote.network_calls(), calls);

        // From any state, including before the first verification.
        let fresh = Authority::new(remote.clone(), Arc::new(MemoryTokenStore::new()), settings(500));
        fresh.logout();
        assert_eq!(fresh.snapshot(), SessionSnapshot::unauthenticated());
    }

    #[tokio::test]
    async fn logout_discards_verification_in_flight() {
        let remote = Arc::new(FakeRemote::default());
        let (tx, rx) = oneshot::channel();
        remote.script_verify(Script::Gated(rx));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = Arc::new(authority(&remote, &store));

        let pending = authority.spawn_verification();
        wait_for_verify_calls(&remote, 1).await;

        authority.logout();
        tx.send(verified(user(1, "Ana"), vec![perm(5, true)])).unwrap();

        assert!(matches!(pending.await.unwrap(), VerifyOutcome::Superseded));
        assert_eq!(authority.snapshot(), SessionSnapshot::unauthenticated());
        assert!(store.get().unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_updates_identity_only() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true)])));
        let mut renamed = user(1, "Ana");
        renamed.last_name = "Mamani".to_string();
        remote.script_verify(Script::Reply(verified(renamed.clone(), vec![perm(9, true)])));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = authority(&remote, &store);
        authority.verify_session().await;

        let refreshed = authority.refresh_user().await.unwrap();

        assert_eq!(refreshed, Some(renamed.clone()));
        let snap = authority.snapshot();
        assert_eq!(snap.user, Some(renamed));
        assert_eq!(snap.permissions.as_slice(), &[perm(5, true)]);
        assert!(!snap.loading);
    }

    #[tokio::test]
    async fn refresh_failure_keeps_session() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true)])));
        remote.script_verify(Script::Reply(Err(RemoteError::Transport("503".into()))));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = authority(&remote, &store);
        authority.verify_session().await;
        let before = authority.snapshot();

        let err = authority.refresh_user().await.unwrap_err();

        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(authority.snapshot(), before);
        assert_eq!(store.get().unwrap(), Some(token("valid")));
    }

    #[tokio::test]
    async fn refresh_without_session_makes_no_call() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(MemoryTokenStore::new());
        let authority = authority(&remote, &store);
        authority.verify_session().await;

        assert_eq!(authority.refresh_user().await.unwrap(), None);
        assert_eq!(remote.network_calls(), 0);
    }

    #[tokio::test]
    async fn refresh_overtaken_by_logout_is_discarded() {
        let remote = Arc::new(FakeRemote::default());
        let (tx, rx) = oneshot::channel();
        remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true)])));
        remote.script_verify(Script::Gated(rx));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = Arc::new(authority(&remote, &store));
        authority.verify_session().await;

        let refresh = tokio::spawn({
            let authority = authority.clone();
            async move { authority.refresh_user().await }
        });
        wait_for_verify_calls(&remote, 2).await;

        authority.logout();
        tx.send(verified(user(1, "Ana"), vec![])).unwrap();

        assert_eq!(refresh.await.unwrap().unwrap(), None);
        assert!(authority.snapshot().user.is_none());
    }

    #[tokio::test]
    async fn subscribers_observe_settled_state() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Reply(verified(user(1, "Ana"), vec![perm(5, true)])));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = authority(&remote, &store);
        let mut rx = authority.subscribe();

        authority.verify_session().await;

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert!(seen.is_authenticated());

        authority.logout();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().user.is_none());
    }

    #[tokio::test]
    async fn duplicate_grants_are_applied_but_denied() {
        let remote = Arc::new(FakeRemote::default());
        remote.script_verify(Script::Reply(verified(
            user(1, "Ana"),
            vec![perm(5, true), perm(5, false)],
        )));
        let store = Arc::new(MemoryTokenStore::with_token(token("valid")));
        let authority = authority(&remote, &store);

        authority.verify_session().await;

        let snap = authority.snapshot();
        assert_eq!(snap.permissions.len(), 2);
        assert_eq!(snap.permissions.integrity_faults().len(), 1);
        assert_eq!(
            snap.gate(NavNode::menu(MenuId::new(5)), Capability::View),
            Access::Denied
        );
    }
}
