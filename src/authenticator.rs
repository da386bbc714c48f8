use std::{error, fmt, sync::Mutex};

use aliri_clock::{Clock, System};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    refresh::{RefreshError, RefreshExecutor},
    store::TokenStore,
    AccessToken, AccessTokenRef, RefreshPolicy, TokenRecord, TokenStatus,
};

/// An outgoing request that can carry a bearer credential
///
/// Implemented by the surrounding network layer for whatever request type it
/// sends. Requests that must never carry credentials (the token endpoint
/// itself, registration, password reset) report themselves as anonymous and
/// pass through [`Authenticator::authorize`] untouched.
pub trait Credentialed {
    /// Whether this request must be sent without credentials
    fn is_anonymous(&self) -> bool {
        false
    }

    /// Attaches the access token as the request's bearer credential
    fn set_bearer(&mut self, access_token: &AccessTokenRef);
}

/// Notified whenever an unrecoverable refresh failure forces the session
/// to be cleared
///
/// Implemented for any `Fn()` closure.
pub trait LogoutSink: Send + Sync {
    /// Invoked after the stored credentials have been cleared
    fn on_forced_logout(&self);
}

impl<F: Fn() + Send + Sync> LogoutSink for F {
    fn on_forced_logout(&self) {
        self()
    }
}

/// What the caller should do with a request that came back unauthorized
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Re-authorize and resend the original request once
    Retry,
    /// Surface the original authorization failure to the caller
    GiveUp,
}

/// An error while authorizing an outgoing request
#[derive(Debug, Error)]
pub enum AuthError {
    /// No access token is stored; the caller is responsible for surfacing
    /// "not logged in"
    ///
    /// This is a local decision and never touches the network.
    #[error("no access token is available; the session is not authenticated")]
    MissingAccessToken,

    /// The access token needed a refresh, and the refresh failed
    #[error("the access token could not be refreshed")]
    RefreshFailed(#[from] RefreshError),

    /// Token storage could not be read
    #[error("token storage failed")]
    Store(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

type RefreshSlot = Option<Result<AccessToken, RefreshError>>;

struct AuthState {
    invalid_token_retries: u32,
    generation: u64,
    in_flight: Option<watch::Receiver<RefreshSlot>>,
}

/// The credential lifecycle state machine
///
/// Owns the retry counter and the refresh-in-flight marker, and coordinates
/// every refresh so that concurrent callers never trigger more than one
/// simultaneous round trip to the authority. The token record itself lives
/// in the [`TokenStore`]; every decision re-reads it, so instances sharing
/// storage observe consistent state.
///
/// All methods take `&self`; share the authenticator across tasks behind an
/// [`Arc`][std::sync::Arc] (or via the service that owns it).
pub struct Authenticator<S, X, C = System> {
    store: S,
    executor: X,
    policy: RefreshPolicy<C>,
    max_retries: u32,
    logout_sink: Option<Box<dyn LogoutSink>>,
    state: Mutex<AuthState>,
}

impl<S, X> Authenticator<S, X, System> {
    /// Constructs an authenticator over the given store and refresh executor
    ///
    /// Defaults to a ceiling of 5 consecutive authorization failures before
    /// giving up.
    pub fn new(store: S, executor: X, policy: RefreshPolicy) -> Self {
        Self {
            store,
            executor,
            policy,
            max_retries: 5,
            logout_sink: None,
            state: Mutex::new(AuthState {
                invalid_token_retries: 0,
                generation: 0,
                in_flight: None,
            }),
        }
    }
}

impl<S, X, C> Authenticator<S, X, C> {
    /// Replaces the ceiling on consecutive authorization failures
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Registers a sink to be notified when a forced logout occurs
    pub fn with_logout_sink(mut self, sink: impl LogoutSink + 'static) -> Self {
        self.logout_sink = Some(Box::new(sink));
        self
    }

    /// Replaces the clock used for expiry decisions
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> Authenticator<S, X, D> {
        Authenticator {
            store: self.store,
            executor: self.executor,
            policy: self.policy.with_clock(clock),
            max_retries: self.max_retries,
            logout_sink: self.logout_sink,
            state: self.state,
        }
    }

    /// The number of consecutive authorization failures observed since the
    /// last accepted response
    pub fn invalid_token_retries(&self) -> u32 {
        self.state.lock().unwrap().invalid_token_retries
    }
}

impl<S, X, C> Authenticator<S, X, C>
where
    S: TokenStore,
    X: RefreshExecutor,
    C: Clock,
{
    /// Authorizes an outgoing request, refreshing the access token first if
    /// it is within the preemptive-refresh window or already expired
    ///
    /// Anonymous requests pass through unmodified. A missing access token
    /// fails locally with [`AuthError::MissingAccessToken`] without touching
    /// the network.
    pub async fn authorize<R: Credentialed>(&self, mut request: R) -> Result<R, AuthError> {
        if request.is_anonymous() {
            tracing::trace!("request is anonymous, passing through without credentials");
            return Ok(request);
        }

        let record = self.store.read().await.map_err(store_error)?;
        let Some(access_token) = record.access_token() else {
            return Err(AuthError::MissingAccessToken);
        };

        match self.policy.status(&record) {
            TokenStatus::Fresh => {
                request.set_bearer(access_token);
                Ok(request)
            }
            status => {
                tracing::debug!(token.status = ?status, "access token needs refresh before use");
                let access_token = self.refresh_coordinated().await?;
                request.set_bearer(&access_token);
                Ok(request)
            }
        }
    }

    /// Classifies an authorization failure reported for a sent request
    ///
    /// Increments the failure counter; past the ceiling this gives up
    /// without attempting another refresh and without resetting the counter.
    /// Below the ceiling, a coordinated refresh is attempted: on success the
    /// caller should re-authorize and resend the original request exactly
    /// once; on failure the original error is surfaced. Unrecoverable
    /// refresh failures clear the session and notify the logout sink before
    /// this returns.
    pub async fn handle_unauthorized(&self, status: u16, error_code: Option<&str>) -> Disposition {
        {
            let mut state = self.state.lock().unwrap();
            state.invalid_token_retries += 1;
            if state.invalid_token_retries > self.max_retries {
                tracing::warn!(
                    retries = state.invalid_token_retries,
                    response.status = status,
                    "authorization failures exceeded the retry ceiling, giving up"
                );
                return Disposition::GiveUp;
            }
        }

        tracing::debug!(
            response.status = status,
            response.error_code = error_code.unwrap_or(""),
            "request came back unauthorized, attempting token refresh"
        );

        match self.refresh_coordinated().await {
            Ok(_) => Disposition::Retry,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "token refresh failed, giving up on this request"
                );
                Disposition::GiveUp
            }
        }
    }

    /// Reports that a request received a successfully authorized response
    ///
    /// Resets the consecutive-failure counter. A successful refresh alone
    /// does not reset it; only an accepted response does.
    pub fn report_success(&self) {
        let mut state = self.state.lock().unwrap();
        if state.invalid_token_retries != 0 {
            tracing::debug!(
                retries = state.invalid_token_retries,
                "authorized response received, resetting failure counter"
            );
            state.invalid_token_retries = 0;
        }
    }

    /// Clears the stored credentials and all retry state
    ///
    /// Idempotent. A refresh that is still in flight when this is called
    /// will have its result discarded rather than resurrecting the session.
    pub async fn reset(&self) -> Result<(), AuthError> {
        {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            state.invalid_token_retries = 0;
        }
        self.store.clear().await.map_err(store_error)?;
        tracing::debug!("session state cleared");
        Ok(())
    }

    /// Whether the store holds a non-expired access token
    pub async fn has_valid_session(&self) -> bool {
        match self.store.read().await {
            Ok(record) => {
                record.access_token().is_some()
                    && self.policy.status(&record) != TokenStatus::Expired
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to read token storage, reporting no session"
                );
                false
            }
        }
    }

    /// Refreshes the access token, joining an already in-flight refresh if
    /// one exists
    ///
    /// At most one exchange with the authority is in flight at any time.
    /// Every caller that waited on the same flight receives the identical
    /// outcome, and none is released before the store reflects it.
    pub async fn refresh_coordinated(&self) -> Result<AccessToken, RefreshError> {
        enum Role {
            Leader(u64, watch::Sender<RefreshSlot>),
            Follower(watch::Receiver<RefreshSlot>),
        }

        let role = {
            let mut state = self.state.lock().unwrap();
            match &state.in_flight {
                Some(receiver) => Role::Follower(receiver.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.in_flight = Some(rx);
                    Role::Leader(state.generation, tx)
                }
            }
        };

        match role {
            Role::Leader(generation, tx) => {
                tracing::debug!("starting token refresh");
                let outcome = self.run_refresh(generation).await;
                let mut state = self.state.lock().unwrap();
                state.in_flight = None;
                drop(state);
                tx.send_replace(Some(outcome.clone()));
                outcome
            }
            Role::Follower(mut rx) => {
                tracing::debug!("joining in-flight token refresh");
                loop {
                    if let Some(outcome) = rx.borrow_and_update().clone() {
                        return outcome;
                    }
                    if rx.changed().await.is_err() {
                        // The leader was cancelled before publishing. Clear
                        // the dead marker so the next caller can lead.
                        let mut state = self.state.lock().unwrap();
                        if let Some(current) = &state.in_flight {
                            if current.same_channel(&rx) {
                                state.in_flight = None;
                            }
                        }
                        return Err(RefreshError::Superseded);
                    }
                }
            }
        }
    }

    async fn run_refresh(&self, generation: u64) -> Result<AccessToken, RefreshError> {
        let outcome = self.try_refresh(generation).await;

        if let Err(error) = &outcome {
            if error.is_unrecoverable() {
                tracing::warn!(
                    error = (error as &dyn error::Error),
                    "session is unrecoverable, clearing stored credentials"
                );
                if let Err(error) = self.store.clear().await {
                    tracing::error!(
                        error = (&error as &dyn error::Error),
                        "unable to clear stored credentials"
                    );
                }
                if let Some(sink) = &self.logout_sink {
                    sink.on_forced_logout();
                }
            }
        }

        outcome
    }

    async fn try_refresh(&self, generation: u64) -> Result<AccessToken, RefreshError> {
        let record = self.store.read().await.map_err(RefreshError::other)?;
        let Some(refresh_token) = record.refresh_token() else {
            return Err(RefreshError::NoRefreshToken);
        };

        let fresh = self.executor.exchange(refresh_token).await?;

        // A reset that landed while the exchange was in flight wins; the
        // minted tokens must not resurrect the cleared session.
        {
            let state = self.state.lock().unwrap();
            if state.generation != generation {
                tracing::debug!("session was reset during refresh, discarding minted tokens");
                return Err(RefreshError::Superseded);
            }
        }

        let expiry = self.policy.now() + fresh.expires_in;
        let rotated = fresh
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_owned());
        let new_record = TokenRecord::new(fresh.access_token.clone(), Some(rotated), expiry);
        self.store.write(&new_record).await.map_err(RefreshError::other)?;

        // A reset may also land between the check above and the write. The
        // write is not gated by the lock, so re-check afterward and undo the
        // persist if the generation moved; the reset always wins.
        let superseded = {
            let state = self.state.lock().unwrap();
            state.generation != generation
        };
        if superseded {
            tracing::debug!("session was reset during refresh, discarding persisted tokens");
            if let Err(error) = self.store.clear().await {
                tracing::error!(
                    error = (&error as &dyn error::Error),
                    "unable to clear stale credentials after reset"
                );
            }
            return Err(RefreshError::Superseded);
        }

        tracing::info!(token.expiry = expiry.0, "persisted refreshed credentials");
        Ok(fresh.access_token)
    }
}

impl<S, X, C> fmt::Debug for Authenticator<S, X, C>
where
    S: fmt::Debug,
    X: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("store", &self.store)
            .field("executor", &self.executor)
            .field("policy", &self.policy)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

fn store_error<E: error::Error + Send + Sync + 'static>(error: E) -> AuthError {
    AuthError::Store(Box::new(error))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use aliri_clock::{DurationSecs, TestClock, UnixTime};
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::{
        refresh::FreshTokens,
        store::{MemoryTokenStore, TokenStore},
        RefreshToken,
    };

    const NOW: UnixTime = UnixTime(1_600_000_000);
    const WINDOW: DurationSecs = DurationSecs(300);

    #[derive(Clone, Copy)]
    enum Script {
        Succeed,
        InvalidGrant,
        NetworkDown,
    }

    /// Mints `access-1`, `access-2`, … while counting exchanges, optionally
    /// holding each exchange at a gate until the test releases it.
    struct ScriptedExecutor {
        script: Script,
        exchanges: Arc<AtomicU32>,
        started: Arc<Semaphore>,
        gate: Option<Arc<Semaphore>>,
    }

    impl ScriptedExecutor {
        fn new(script: Script) -> Self {
            Self {
                script,
                exchanges: Arc::new(AtomicU32::new(0)),
                started: Arc::new(Semaphore::new(0)),
                gate: None,
            }
        }

        fn gated(mut self) -> (Self, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            self.gate = Some(gate.clone());
            (self, gate)
        }

        fn exchange_count(&self) -> Arc<AtomicU32> {
            self.exchanges.clone()
        }

        fn started(&self) -> Arc<Semaphore> {
            self.started.clone()
        }
    }

    #[async_trait]
    impl RefreshExecutor for ScriptedExecutor {
        async fn exchange(
            &self,
            _refresh_token: &crate::RefreshTokenRef,
        ) -> Result<FreshTokens, RefreshError> {
            self.started.add_permits(1);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
            match self.script {
                Script::Succeed => Ok(FreshTokens {
                    access_token: AccessToken::from(format!("access-{}", n)),
                    refresh_token: Some(RefreshToken::from_static("rotated-refresh")),
                    expires_in: DurationSecs(3600),
                }),
                Script::InvalidGrant => Err(RefreshError::InvalidRefreshToken),
                Script::NetworkDown => Err(RefreshError::network(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "token endpoint unreachable",
                ))),
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    struct FakeRequest {
        anonymous: bool,
        bearer: Option<AccessToken>,
    }

    impl Credentialed for FakeRequest {
        fn is_anonymous(&self) -> bool {
            self.anonymous
        }

        fn set_bearer(&mut self, access_token: &AccessTokenRef) {
            self.bearer = Some(access_token.to_owned());
        }
    }

    /// Memory-backed store that holds each write at a gate until released.
    struct GatedWriteStore {
        inner: MemoryTokenStore,
        write_started: Arc<Semaphore>,
        write_gate: Arc<Semaphore>,
    }

    impl GatedWriteStore {
        fn new(record: TokenRecord) -> Self {
            Self {
                inner: MemoryTokenStore::with_record(record),
                write_started: Arc::new(Semaphore::new(0)),
                write_gate: Arc::new(Semaphore::new(0)),
            }
        }
    }

    #[async_trait]
    impl TokenStore for GatedWriteStore {
        type Error = std::convert::Infallible;

        async fn read(&self) -> Result<TokenRecord, Self::Error> {
            self.inner.read().await
        }

        async fn write(&self, record: &TokenRecord) -> Result<(), Self::Error> {
            self.write_started.add_permits(1);
            self.write_gate.acquire().await.unwrap().forget();
            self.inner.write(record).await
        }

        async fn clear(&self) -> Result<(), Self::Error> {
            self.inner.clear().await
        }
    }

    fn record_expiring_in(valid_for: DurationSecs) -> TokenRecord {
        TokenRecord::new(
            AccessToken::from_static("old-access"),
            Some(RefreshToken::from_static("old-refresh")),
            NOW + valid_for,
        )
    }

    fn authenticator(
        record: TokenRecord,
        executor: ScriptedExecutor,
    ) -> Authenticator<MemoryTokenStore, ScriptedExecutor, TestClock> {
        Authenticator::new(
            MemoryTokenStore::with_record(record),
            executor,
            RefreshPolicy::new(WINDOW),
        )
        .with_clock(TestClock::new(NOW))
    }

    #[tokio::test]
    async fn fresh_token_is_attached_without_refresh() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let exchanges = executor.exchange_count();
        let auth = authenticator(record_expiring_in(DurationSecs(7200)), executor);

        let request = auth.authorize(FakeRequest::default()).await.unwrap();

        assert_eq!(request.bearer.unwrap().as_str(), "old-access");
        assert_eq!(exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn anonymous_request_passes_through_untouched() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let auth = authenticator(TokenRecord::empty(), executor);

        let request = auth
            .authorize(FakeRequest {
                anonymous: true,
                bearer: None,
            })
            .await
            .unwrap();

        assert!(request.bearer.is_none());
    }

    #[tokio::test]
    async fn missing_access_token_fails_locally() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let exchanges = executor.exchange_count();
        let auth = authenticator(TokenRecord::empty(), executor);

        let err = auth.authorize(FakeRequest::default()).await.unwrap_err();

        assert!(matches!(err, AuthError::MissingAccessToken));
        assert_eq!(exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_within_preemptive_window_is_refreshed_before_use() {
        // expires_in = 30s against a 300s window: refresh preemptively
        let executor = ScriptedExecutor::new(Script::Succeed);
        let exchanges = executor.exchange_count();
        let auth = authenticator(record_expiring_in(DurationSecs(30)), executor);

        let request = auth.authorize(FakeRequest::default()).await.unwrap();

        assert_eq!(request.bearer.unwrap().as_str(), "access-1");
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_refresh_persists_rotated_pair_and_new_expiry() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let auth = authenticator(record_expiring_in(DurationSecs(30)), executor);

        auth.refresh_coordinated().await.unwrap();

        let record = auth.store.read().await.unwrap();
        assert_eq!(record.access_token().unwrap().as_str(), "access-1");
        assert_eq!(record.refresh_token().unwrap().as_str(), "rotated-refresh");
        assert_eq!(record.expiry(), NOW + DurationSecs(3600));
    }

    #[tokio::test]
    async fn concurrent_authorize_calls_share_one_refresh() {
        let (executor, gate) = ScriptedExecutor::new(Script::Succeed).gated();
        let exchanges = executor.exchange_count();
        let started = executor.started();
        let auth = Arc::new(authenticator(record_expiring_in(DurationSecs(30)), executor));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let auth = Arc::clone(&auth);
            tasks.push(tokio::spawn(
                async move { auth.authorize(FakeRequest::default()).await },
            ));
        }

        // One task is now inside the exchange; release it (and only it).
        started.acquire().await.unwrap().forget();
        gate.add_permits(8);

        for task in tasks {
            let request = task.await.unwrap().unwrap();
            assert_eq!(request.bearer.unwrap().as_str(), "access-1");
        }
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_token_fails_every_waiter_and_clears_session() {
        let (executor, gate) = ScriptedExecutor::new(Script::InvalidGrant).gated();
        let exchanges = executor.exchange_count();
        let started = executor.started();
        let logouts = Arc::new(AtomicU32::new(0));
        let logout_count = Arc::clone(&logouts);
        let auth = Arc::new(
            authenticator(record_expiring_in(DurationSecs(30)), executor)
                .with_logout_sink(move || {
                    logout_count.fetch_add(1, Ordering::SeqCst);
                }),
        );

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let auth = Arc::clone(&auth);
            tasks.push(tokio::spawn(
                async move { auth.refresh_coordinated().await },
            ));
        }

        started.acquire().await.unwrap().forget();
        gate.add_permits(4);

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, RefreshError::InvalidRefreshToken));
        }
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(logouts.load(Ordering::SeqCst), 1);

        let record = auth.store.read().await.unwrap();
        assert!(record.access_token().is_none());
        assert!(record.refresh_token().is_none());
        assert!(!auth.has_valid_session().await);
    }

    #[tokio::test]
    async fn retry_ceiling_gives_up_without_another_refresh() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let exchanges = executor.exchange_count();
        let auth = authenticator(record_expiring_in(DurationSecs(7200)), executor)
            .with_max_retries(2);

        assert_eq!(
            auth.handle_unauthorized(401, Some("invalid_token")).await,
            Disposition::Retry
        );
        assert_eq!(
            auth.handle_unauthorized(401, Some("invalid_token")).await,
            Disposition::Retry
        );
        assert_eq!(
            auth.handle_unauthorized(401, Some("invalid_token")).await,
            Disposition::GiveUp
        );
        assert_eq!(auth.invalid_token_retries(), 3);
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);

        // The ceiling does not re-arm on further failures.
        assert_eq!(
            auth.handle_unauthorized(401, Some("invalid_token")).await,
            Disposition::GiveUp
        );
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn counter_resets_only_on_accepted_response() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let auth = authenticator(record_expiring_in(DurationSecs(7200)), executor);

        assert_eq!(
            auth.handle_unauthorized(401, Some("invalid_token")).await,
            Disposition::Retry
        );
        // The successful refresh alone does not reset the counter.
        assert_eq!(auth.invalid_token_retries(), 1);

        auth.report_success();
        assert_eq!(auth.invalid_token_retries(), 0);
    }

    #[tokio::test]
    async fn missing_refresh_token_short_circuits_and_clears_session() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let exchanges = executor.exchange_count();
        let logouts = Arc::new(AtomicU32::new(0));
        let logout_count = Arc::clone(&logouts);
        let record = TokenRecord::new(
            AccessToken::from_static("old-access"),
            None,
            NOW + DurationSecs(7200),
        );
        let auth = authenticator(record, executor).with_logout_sink(move || {
            logout_count.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(
            auth.handle_unauthorized(401, Some("invalid_token")).await,
            Disposition::GiveUp
        );
        assert_eq!(exchanges.load(Ordering::SeqCst), 0);
        assert_eq!(logouts.load(Ordering::SeqCst), 1);

        let record = auth.store.read().await.unwrap();
        assert!(record.access_token().is_none());
    }

    #[tokio::test]
    async fn network_failure_gives_up_without_touching_tokens() {
        let executor = ScriptedExecutor::new(Script::NetworkDown);
        let auth = authenticator(record_expiring_in(DurationSecs(7200)), executor);

        assert_eq!(
            auth.handle_unauthorized(401, Some("invalid_token")).await,
            Disposition::GiveUp
        );

        let record = auth.store.read().await.unwrap();
        assert_eq!(record.access_token().unwrap().as_str(), "old-access");
        assert_eq!(record.refresh_token().unwrap().as_str(), "old-refresh");
    }

    #[tokio::test]
    async fn reset_during_refresh_discards_the_minted_tokens() {
        let (executor, gate) = ScriptedExecutor::new(Script::Succeed).gated();
        let started = executor.started();
        let auth = Arc::new(authenticator(record_expiring_in(DurationSecs(30)), executor));

        let refresher = {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.refresh_coordinated().await })
        };

        started.acquire().await.unwrap().forget();
        auth.reset().await.unwrap();
        gate.add_permits(1);

        let err = refresher.await.unwrap().unwrap_err();
        assert!(matches!(err, RefreshError::Superseded));

        let record = auth.store.read().await.unwrap();
        assert!(record.access_token().is_none());
        assert!(record.refresh_token().is_none());
    }

    #[tokio::test]
    async fn reset_while_the_refresh_is_being_persisted_still_wins() {
        // The reset lands after the exchange has completed but before the
        // minted tokens reach the store; the write must not stick.
        let store = GatedWriteStore::new(record_expiring_in(DurationSecs(30)));
        let write_started = Arc::clone(&store.write_started);
        let write_gate = Arc::clone(&store.write_gate);
        let auth = Arc::new(
            Authenticator::new(
                store,
                ScriptedExecutor::new(Script::Succeed),
                RefreshPolicy::new(WINDOW),
            )
            .with_clock(TestClock::new(NOW)),
        );

        let refresher = {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.refresh_coordinated().await })
        };

        write_started.acquire().await.unwrap().forget();
        auth.reset().await.unwrap();
        write_gate.add_permits(1);

        let err = refresher.await.unwrap().unwrap_err();
        assert!(matches!(err, RefreshError::Superseded));

        let record = auth.store.read().await.unwrap();
        assert!(record.access_token().is_none());
        assert!(record.refresh_token().is_none());
    }

    #[tokio::test]
    async fn reset_is_idempotent_and_clears_retry_state() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let auth = authenticator(record_expiring_in(DurationSecs(7200)), executor);

        let _ = auth.handle_unauthorized(401, Some("invalid_token")).await;
        assert_eq!(auth.invalid_token_retries(), 1);

        auth.reset().await.unwrap();
        auth.reset().await.unwrap();

        assert_eq!(auth.invalid_token_retries(), 0);
        assert!(!auth.has_valid_session().await);
    }

    #[tokio::test]
    async fn expired_session_is_not_valid() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let auth = authenticator(
            TokenRecord::new(
                AccessToken::from_static("old-access"),
                None,
                UnixTime(NOW.0 - 1),
            ),
            executor,
        );

        assert!(!auth.has_valid_session().await);
    }

    #[tokio::test]
    async fn stale_session_is_still_valid() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let auth = authenticator(record_expiring_in(DurationSecs(30)), executor);

        assert!(auth.has_valid_session().await);
    }
}
