use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use iamdb_clock::{Clock, DurationSecs, System, UnixTime};
use thiserror::Error;
use tokio::sync::watch;

use crate::{issuers::IssuerError, IssuedToken, Token, TokenIssuer, TokenScope, TokenStatus};

/// Lead time before expiry at which a cached token stops being handed out
pub const DEFAULT_SAFETY_MARGIN: DurationSecs = DurationSecs(60);

/// The reason a token could not be obtained
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IssueFailure {
    /// The issuer reported an error
    #[error("token issuer failed")]
    Issuer(#[from] IssuerError),
    /// The issuer returned an empty token
    #[error("token issuer returned an empty token")]
    EmptySecret,
    /// The issuer returned a token that expires before it was requested
    #[error("issued token expires at {expiry}, which is not after its issue time {issued}")]
    InvalidLifetime {
        /// Time the token was requested
        issued: UnixTime,
        /// Expiry reported by the issuer
        expiry: UnixTime,
    },
    /// The issuer returned a token that is already inside the safety margin
    #[error("issued token expires at {expiry}, inside the {margin} safety margin")]
    TooShortLived {
        /// Expiry reported by the issuer
        expiry: UnixTime,
        /// The cache's safety margin
        margin: DurationSecs,
    },
}

/// Indicates that no usable token could be obtained for a scope
#[derive(Clone, Debug, Error)]
#[error("unable to obtain an authentication token for {scope}")]
pub struct CredentialUnavailable {
    scope: TokenScope,
    #[source]
    cause: IssueFailure,
}

impl CredentialUnavailable {
    /// The scope for which a token was requested
    pub fn scope(&self) -> &TokenScope {
        &self.scope
    }

    /// Why no token was available
    pub fn cause(&self) -> &IssueFailure {
        &self.cause
    }
}

type RefreshOutcome = Result<Arc<Token>, IssueFailure>;

/// Per-scope cache state
#[derive(Default)]
struct Slot {
    current: Option<Arc<Token>>,
    in_flight: Option<watch::Receiver<Option<RefreshOutcome>>>,
    #[cfg(test)]
    followers: usize,
}

enum Role {
    Lead(watch::Sender<Option<RefreshOutcome>>),
    Follow(watch::Receiver<Option<RefreshOutcome>>),
}

/// An in-memory cache of authentication tokens, keyed by scope
///
/// A cached token is reused until the current time comes within the safety
/// margin of its expiry. After that, the next caller refreshes it from the
/// issuer. Callers that arrive while a refresh for the same scope is already
/// running wait for that refresh and share its outcome, so there is at most
/// one outstanding issuer call per scope.
///
/// Staleness is only ever checked when a token is requested; nothing runs in
/// the background.
pub struct CredentialCache<I, C = System> {
    issuer: I,
    slots: Mutex<HashMap<TokenScope, Slot>>,
    safety_margin: DurationSecs,
    clock: C,
}

impl<I> CredentialCache<I, System> {
    /// Constructs a new, empty credential cache backed by `issuer`
    pub fn new(issuer: I) -> Self {
        Self {
            issuer,
            slots: Mutex::default(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            clock: System,
        }
    }
}

impl<I, C> CredentialCache<I, C> {
    /// Sets the lead time before expiry at which tokens are refreshed
    pub fn with_safety_margin(mut self, safety_margin: DurationSecs) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> CredentialCache<I, D> {
        CredentialCache {
            issuer: self.issuer,
            slots: self.slots,
            safety_margin: self.safety_margin,
            clock,
        }
    }

    /// The configured safety margin
    pub fn safety_margin(&self) -> DurationSecs {
        self.safety_margin
    }

    /// The expiry of the token most recently stored for `scope`, if any
    ///
    /// The token itself may be stale. This is meant for diagnostics after a
    /// failed refresh; stale tokens are never handed out.
    pub fn last_known_expiry(&self, scope: &TokenScope) -> Option<UnixTime> {
        self.lock_slots()
            .get(scope)
            .and_then(|slot| slot.current.as_ref())
            .map(|token| token.expiry())
    }

    /// Drops the cached token for `scope`, forcing the next request to refresh
    pub fn invalidate(&self, scope: &TokenScope) {
        if let Some(slot) = self.lock_slots().get_mut(scope) {
            if slot.current.take().is_some() {
                tracing::debug!(token.scope = %scope, "cached token invalidated");
            }
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<TokenScope, Slot>> {
        // Slot updates are single assignments, so a poisoned map is still consistent.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of callers that have joined another caller's refresh for `scope`
    #[cfg(test)]
    fn followers(&self, scope: &TokenScope) -> usize {
        self.lock_slots().get(scope).map_or(0, |slot| slot.followers)
    }

    fn is_fresh(&self, token: &Token, now: UnixTime) -> bool {
        matches!(token.status_at(now, self.safety_margin), TokenStatus::Fresh)
    }

    fn unavailable(scope: &TokenScope, cause: IssueFailure) -> CredentialUnavailable {
        CredentialUnavailable {
            scope: scope.clone(),
            cause,
        }
    }

    fn accept(&self, issued: IssuedToken, now: UnixTime) -> RefreshOutcome {
        let expiry = issued.valid_until;

        if issued.secret.as_str().is_empty() {
            Err(IssueFailure::EmptySecret)
        } else if expiry <= now {
            Err(IssueFailure::InvalidLifetime {
                issued: now,
                expiry,
            })
        } else if expiry - self.safety_margin <= now {
            Err(IssueFailure::TooShortLived {
                expiry,
                margin: self.safety_margin,
            })
        } else {
            Ok(Arc::new(Token::new(issued.secret, now, expiry)))
        }
    }

    /// Clears a refresh whose leader went away without publishing an outcome
    fn abandon(&self, scope: &TokenScope, rx: &watch::Receiver<Option<RefreshOutcome>>) {
        let mut slots = self.lock_slots();
        if let Some(slot) = slots.get_mut(scope) {
            if slot
                .in_flight
                .as_ref()
                .map_or(false, |current| current.same_channel(rx))
            {
                tracing::debug!(token.scope = %scope, "token refresh was abandoned, retrying");
                slot.in_flight = None;
            }
        }
    }
}

impl<I: TokenIssuer, C: Clock> CredentialCache<I, C> {
    /// Gets a usable token for `scope`, refreshing it if required
    pub async fn get_token(&self, scope: &TokenScope) -> Result<Arc<Token>, CredentialUnavailable> {
        self.get_token_at(scope, self.clock.now()).await
    }

    /// Gets a token for `scope` that is usable as of the provided time
    ///
    /// If no token is cached, or `now` is within the safety margin of the
    /// cached token's expiry, the issuer is asked for a new token. A failed
    /// refresh leaves the previously cached token in place but never returns
    /// it.
    pub async fn get_token_at(
        &self,
        scope: &TokenScope,
        now: UnixTime,
    ) -> Result<Arc<Token>, CredentialUnavailable> {
        loop {
            let role = {
                let mut slots = self.lock_slots();
                let slot = slots.entry(scope.clone()).or_default();

                if let Some(token) = slot.current.as_ref().filter(|t| self.is_fresh(t, now)) {
                    tracing::trace!(
                        token.scope = %scope,
                        token.expiry = token.expiry().0,
                        "using cached token"
                    );
                    return Ok(Arc::clone(token));
                }

                match &slot.in_flight {
                    Some(rx) => {
                        #[cfg(test)]
                        {
                            slot.followers += 1;
                        }
                        Role::Follow(rx.clone())
                    }
                    None => {
                        let (tx, rx) = watch::channel(None);
                        slot.in_flight = Some(rx);
                        Role::Lead(tx)
                    }
                }
            };

            match role {
                Role::Lead(tx) => return self.refresh(scope, now, tx).await,
                Role::Follow(mut rx) => {
                    tracing::trace!(token.scope = %scope, "waiting on token refresh in flight");
                    let outcome = rx
                        .wait_for(Option::is_some)
                        .await
                        .map(|published| (*published).clone());

                    match outcome {
                        Ok(Some(Ok(token))) if self.is_fresh(&token, now) => return Ok(token),
                        Ok(Some(Ok(_))) => {
                            tracing::trace!(token.scope = %scope, "shared token is already stale");
                        }
                        Ok(Some(Err(cause))) => return Err(Self::unavailable(scope, cause)),
                        Ok(None) => {}
                        Err(_) => self.abandon(scope, &rx),
                    }
                }
            }
        }
    }

    #[tracing::instrument(skip_all, fields(token.scope = %scope))]
    async fn refresh(
        &self,
        scope: &TokenScope,
        now: UnixTime,
        tx: watch::Sender<Option<RefreshOutcome>>,
    ) -> Result<Arc<Token>, CredentialUnavailable> {
        tracing::debug!("requesting new token from issuer");

        let outcome = match self.issuer.issue_token(scope).await {
            Ok(issued) => self.accept(issued, now),
            Err(error) => Err(IssueFailure::Issuer(error)),
        };

        match &outcome {
            Ok(token) => tracing::info!(
                token.lifetime = token.lifetime().0,
                token.expiry = token.expiry().0,
                "received new token"
            ),
            Err(error) => tracing::warn!(
                error = (error as &dyn std::error::Error),
                "unable to refresh token"
            ),
        }

        {
            let mut slots = self.lock_slots();
            let slot = slots.entry(scope.clone()).or_default();
            slot.in_flight = None;
            if let Ok(token) = &outcome {
                slot.current = Some(Arc::clone(token));
            }
        }

        tx.send_replace(Some(outcome.clone()));

        outcome.map_err(|cause| Self::unavailable(scope, cause))
    }
}

impl<I, C> fmt::Debug for CredentialCache<I, C>
where
    I: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let slots = self.lock_slots();
        f.debug_struct("CredentialCache")
            .field("issuer", &self.issuer)
            .field("scopes", &slots.keys().collect::<Vec<_>>())
            .field("safety_margin", &self.safety_margin)
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use color_eyre::Result;
    use iamdb_clock::TestClock;
    use tokio::sync::Notify;
    use tracing_test::traced_test;

    use super::*;
    use crate::AuthToken;

    const START: UnixTime = UnixTime(1_700_000_000);

    /// Issues `tok1`, `tok2`, … valid for 900 seconds from the test clock
    #[derive(Debug)]
    struct CountingIssuer {
        clock: TestClock,
        calls: AtomicUsize,
        fail_with: Mutex<Option<IssuerError>>,
        gate: Option<Arc<Notify>>,
    }

    impl CountingIssuer {
        fn new(clock: TestClock) -> Self {
            Self {
                clock,
                calls: AtomicUsize::new(0),
                fail_with: Mutex::new(None),
                gate: None,
            }
        }

        fn gated(clock: TestClock, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(clock)
            }
        }

        fn fail_with(&self, error: IssuerError) {
            *self.fail_with.lock().unwrap() = Some(error);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenIssuer for CountingIssuer {
        async fn issue_token(&self, _scope: &TokenScope) -> Result<IssuedToken, IssuerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(error) = self.fail_with.lock().unwrap().clone() {
                return Err(error);
            }
            Ok(IssuedToken::new(
                format!("tok{}", n),
                self.clock.now() + DurationSecs(900),
            ))
        }
    }

    fn scope() -> TokenScope {
        TokenScope::new("us-east-1", "db.cluster.example.com", "app")
    }

    fn cache(issuer: &Arc<CountingIssuer>) -> CredentialCache<Arc<CountingIssuer>, TestClock> {
        CredentialCache::new(Arc::clone(issuer)).with_clock(issuer.clock.clone())
    }

    #[tokio::test]
    #[traced_test]
    async fn reuses_token_until_the_safety_margin() -> Result<()> {
        let clock = TestClock::new(START);
        let issuer = Arc::new(CountingIssuer::new(clock.clone()));
        let cache = cache(&issuer);

        let first = cache.get_token(&scope()).await?;
        assert_eq!(first.secret().as_str(), "tok1");
        assert_eq!(issuer.calls(), 1);

        clock.advance(DurationSecs(100));
        let second = cache.get_token(&scope()).await?;
        assert_eq!(second.secret().as_str(), "tok1");
        assert_eq!(issuer.calls(), 1);

        clock.advance(DurationSecs(760));
        let third = cache.get_token(&scope()).await?;
        assert_eq!(third.secret().as_str(), "tok2");
        assert_eq!(issuer.calls(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn never_returns_a_token_inside_the_margin() -> Result<()> {
        let clock = TestClock::new(START);
        let issuer = Arc::new(CountingIssuer::new(clock.clone()));
        let cache = cache(&issuer);
        let margin = cache.safety_margin();

        for step in [0, 1, 59, 300, 839, 840, 841, 899, 900, 1_500, 2_000, 2_001] {
            let now = START + DurationSecs(step);
            clock.set(now);
            let token = cache.get_token(&scope()).await?;
            assert!(token.expiry() - margin > now, "stale token at +{}s", step);
        }

        Ok(())
    }

    #[tokio::test]
    async fn scopes_are_cached_independently() -> Result<()> {
        let clock = TestClock::new(START);
        let issuer = Arc::new(CountingIssuer::new(clock.clone()));
        let cache = cache(&issuer);
        let other = TokenScope::new("us-east-1", "db.cluster.example.com", "reporting");

        let a = cache.get_token(&scope()).await?;
        let b = cache.get_token(&other).await?;
        let a_again = cache.get_token(&scope()).await?;

        assert_ne!(a.secret(), b.secret());
        assert!(Arc::ptr_eq(&a, &a_again));
        assert_eq!(issuer.calls(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn issuer_failure_keeps_the_stale_token_but_does_not_return_it() -> Result<()> {
        let clock = TestClock::new(START);
        let issuer = Arc::new(CountingIssuer::new(clock.clone()));
        let cache = cache(&issuer);

        let first = cache.get_token(&scope()).await?;

        clock.advance(DurationSecs(860));
        issuer.fail_with(IssuerError::new("AccessDenied", "not authorized to rds-db:connect"));

        let error = cache.get_token(&scope()).await.unwrap_err();
        assert_eq!(
            error.cause(),
            &IssueFailure::Issuer(IssuerError::new(
                "AccessDenied",
                "not authorized to rds-db:connect"
            ))
        );
        assert_eq!(cache.last_known_expiry(&scope()), Some(first.expiry()));

        // Not cached as a failure either: the next call asks again.
        let _ = cache.get_token(&scope()).await.unwrap_err();
        assert_eq!(issuer.calls(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn rejects_tokens_the_cache_could_never_hand_out() {
        let clock = TestClock::new(START);
        let scope = scope();

        let short = CredentialCache::new(StaticIssuer::new("short", START + DurationSecs(30)))
            .with_clock(clock.clone());
        let error = short.get_token(&scope).await.unwrap_err();
        assert!(matches!(error.cause(), IssueFailure::TooShortLived { .. }));
        assert_eq!(short.last_known_expiry(&scope), None);

        let expired = CredentialCache::new(StaticIssuer::new("expired", START))
            .with_clock(clock.clone());
        let error = expired.get_token(&scope).await.unwrap_err();
        assert!(matches!(error.cause(), IssueFailure::InvalidLifetime { .. }));

        let empty = CredentialCache::new(StaticIssuer::new("", START + DurationSecs(900)))
            .with_clock(clock);
        let error = empty.get_token(&scope).await.unwrap_err();
        assert_eq!(error.cause(), &IssueFailure::EmptySecret);
    }

    #[tokio::test]
    async fn invalidate_forces_a_refresh() -> Result<()> {
        let clock = TestClock::new(START);
        let issuer = Arc::new(CountingIssuer::new(clock.clone()));
        let cache = cache(&issuer);

        cache.get_token(&scope()).await?;
        cache.invalidate(&scope());
        let token = cache.get_token(&scope()).await?;

        assert_eq!(token.secret().as_str(), "tok2");
        Ok(())
    }

    #[tokio::test]
    async fn errors_never_mention_the_secret() -> Result<()> {
        let clock = TestClock::new(START);
        let issuer = Arc::new(CountingIssuer::new(clock.clone()));
        let cache = cache(&issuer);

        let token = cache.get_token(&scope()).await?;
        clock.advance(DurationSecs(900));
        issuer.fail_with(IssuerError::new("Throttling", "rate exceeded"));
        let error = cache.get_token(&scope()).await.unwrap_err();

        let secret = token.secret().as_str();
        assert!(!format!("{}", error).contains(secret));
        assert!(!format!("{:?}", error).contains(secret));
        assert!(!format!("{:?}", cache).contains(secret));
        Ok(())
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }

    mod when_callers_race_on_an_empty_cache {
        use super::*;

        async fn race(
            cache: &Arc<CredentialCache<Arc<CountingIssuer>, TestClock>>,
            gate: &Arc<Notify>,
            n: usize,
        ) -> Vec<Result<Arc<Token>, CredentialUnavailable>> {
            let handles: Vec<_> = (0..n)
                .map(|_| {
                    let cache = Arc::clone(cache);
                    tokio::spawn(async move { cache.get_token(&scope()).await })
                })
                .collect();

            // Every caller must have reached the cache before the issuer answers.
            wait_until(|| cache.followers(&scope()) == n - 1).await;
            gate.notify_one();

            let mut results = Vec::with_capacity(n);
            for handle in handles {
                results.push(handle.await.expect("caller panicked"));
            }
            results
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn the_issuer_is_called_once_and_everyone_gets_its_token() {
            let clock = TestClock::new(START);
            let gate = Arc::new(Notify::new());
            let issuer = Arc::new(CountingIssuer::gated(clock.clone(), Arc::clone(&gate)));
            let cache = Arc::new(cache(&issuer));

            let results = race(&cache, &gate, 16).await;

            assert_eq!(issuer.calls(), 1);
            for result in results {
                assert_eq!(result.unwrap().secret().as_str(), "tok1");
            }
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn everyone_observes_the_same_failure() {
            let clock = TestClock::new(START);
            let gate = Arc::new(Notify::new());
            let issuer = Arc::new(CountingIssuer::gated(clock.clone(), Arc::clone(&gate)));
            issuer.fail_with(IssuerError::new("ExpiredToken", "session credentials expired"));
            let cache = Arc::new(cache(&issuer));

            let results = race(&cache, &gate, 16).await;

            assert_eq!(issuer.calls(), 1);
            for result in results {
                let error = result.unwrap_err();
                assert_eq!(
                    error.cause(),
                    &IssueFailure::Issuer(IssuerError::new(
                        "ExpiredToken",
                        "session credentials expired"
                    ))
                );
            }
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn a_waiter_refreshes_again_when_the_shared_token_is_stale_for_it() -> Result<()> {
            let clock = TestClock::new(START);
            let gate = Arc::new(Notify::new());
            let issuer = Arc::new(CountingIssuer::gated(clock.clone(), Arc::clone(&gate)));
            let cache = Arc::new(cache(&issuer));

            let early = {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_token_at(&scope(), START).await })
            };
            wait_until(|| issuer.calls() == 1).await;

            let late = {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache
                        .get_token_at(&scope(), START + DurationSecs(860))
                        .await
                })
            };
            wait_until(|| cache.followers(&scope()) == 1).await;

            gate.notify_one();
            let early = early.await??;
            assert_eq!(early.secret().as_str(), "tok1");

            // The late caller finds `tok1` inside its margin and starts its own refresh.
            wait_until(|| issuer.calls() == 2).await;
            clock.set(START + DurationSecs(860));
            gate.notify_one();
            let late = late.await??;

            assert_eq!(late.secret().as_str(), "tok2");
            assert_eq!(late.expiry(), START + DurationSecs(1_760));
            assert_eq!(issuer.calls(), 2);
            Ok(())
        }

        #[tokio::test]
        async fn a_cancelled_refresh_is_taken_over() -> Result<()> {
            let clock = TestClock::new(START);
            let gate = Arc::new(Notify::new());
            let issuer = Arc::new(CountingIssuer::gated(clock.clone(), Arc::clone(&gate)));
            let cache = cache(&issuer);

            let abandoned = tokio::time::timeout(
                std::time::Duration::from_millis(10),
                cache.get_token(&scope()),
            )
            .await;
            assert!(abandoned.is_err());

            gate.notify_one();
            let token = cache.get_token(&scope()).await?;

            assert_eq!(token.secret().as_str(), "tok2");
            assert_eq!(issuer.calls(), 2);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct StaticIssuer {
        secret: AuthToken,
        valid_until: UnixTime,
    }

    impl StaticIssuer {
        fn new(secret: &str, valid_until: UnixTime) -> Self {
            Self {
                secret: AuthToken::from(secret),
                valid_until,
            }
        }
    }

    #[async_trait]
    impl TokenIssuer for StaticIssuer {
        async fn issue_token(&self, _scope: &TokenScope) -> Result<IssuedToken, IssuerError> {
            Ok(IssuedToken::new(self.secret.clone(), self.valid_until))
        }
    }
}
