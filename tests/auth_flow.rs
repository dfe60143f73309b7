//! End-to-end composition: rate-limit gate first, lockout check second,
//! credential verification last, mirroring how a login endpoint wires the
//! primitives together.

use std::sync::Arc;

use keyfence::{
    CoordinationError, InMemoryStore, KeyStrategy, LockoutPolicy, LockoutTracker, ManualClock,
    RateLimiter, RequestIdentity, RouteLimit,
};

#[derive(Debug)]
enum LoginError {
    Refused(CoordinationError),
    BadCredentials,
}

impl From<CoordinationError> for LoginError {
    fn from(e: CoordinationError) -> Self {
        Self::Refused(e)
    }
}

impl LoginError {
    fn refusal(&self) -> Option<&CoordinationError> {
        match self {
            Self::Refused(e) => Some(e),
            Self::BadCredentials => None,
        }
    }
}

struct AuthService {
    limiter: RateLimiter<InMemoryStore>,
    tracker: LockoutTracker<InMemoryStore>,
    login_rule: RouteLimit,
}

impl AuthService {
    fn new(store: Arc<InMemoryStore>) -> Self {
        Self {
            limiter: RateLimiter::new(store.clone()),
            tracker: LockoutTracker::new(store, LockoutPolicy::default()),
            login_rule: RouteLimit::new(10, 60, KeyStrategy::ByEndpoint),
        }
    }

    async fn login(
        &self,
        identity: &RequestIdentity,
        username: &str,
        password: &str,
    ) -> Result<(), LoginError> {
        let key = self.login_rule.strategy.key_for(identity);
        self.limiter.enforce(&key, self.login_rule.limit, self.login_rule.window()).await?;

        self.tracker.ensure_unlocked(username).await?;

        if password == "correct horse" {
            self.tracker.reset_attempts(username).await?;
            Ok(())
        } else {
            self.tracker.record_failure(username).await?;
            Err(LoginError::BadCredentials)
        }
    }
}

fn login_identity(addr: &str) -> RequestIdentity {
    RequestIdentity::from_remote_addr(addr).with_endpoint("POST:/api/v1/auth/login")
}

fn service() -> (AuthService, ManualClock) {
    let clock = ManualClock::new();
    let store = Arc::new(InMemoryStore::with_clock(Arc::new(clock.clone())));
    (AuthService::new(store), clock)
}

#[tokio::test]
async fn repeated_failures_lock_even_with_the_right_password_afterwards() {
    let (auth, _clock) = service();
    let identity = login_identity("203.0.113.7");

    for _ in 0..5 {
        assert!(auth.login(&identity, "alice", "wrong").await.is_err());
    }

    // Credentials are correct now, but the lockout wins.
    let err = auth.login(&identity, "alice", "correct horse").await.unwrap_err();
    let refusal = err.refusal().expect("lockout refusal");
    assert!(refusal.is_account_locked());
    assert!(refusal.retry_after().is_some());
}

#[tokio::test]
async fn lockout_expires_and_login_succeeds_again() {
    let (auth, clock) = service();
    let identity = login_identity("203.0.113.7");

    for _ in 0..5 {
        let _ = auth.login(&identity, "alice", "wrong").await;
    }
    clock.advance(LockoutPolicy::default().lockout_duration());

    // Rate-limit window also rolled over with the clock.
    auth.login(&identity, "alice", "correct horse").await.unwrap();
}

#[tokio::test]
async fn successful_login_resets_the_failure_count() {
    let (auth, _clock) = service();
    let identity = login_identity("203.0.113.7");

    for _ in 0..4 {
        let _ = auth.login(&identity, "bob", "wrong").await;
    }
    auth.login(&identity, "bob", "correct horse").await.unwrap();

    // Four more failures only reach a count of four: no lock.
    for _ in 0..4 {
        let _ = auth.login(&identity, "bob", "wrong").await;
    }
    assert!(!auth.tracker.is_locked("bob").await.unwrap());
}

#[tokio::test]
async fn rate_limit_gate_trips_before_the_credential_check() {
    let (auth, _clock) = service();
    let identity = login_identity("203.0.113.7");

    for _ in 0..10 {
        let _ = auth.login(&identity, "carol", "wrong").await;
    }
    let err = auth.login(&identity, "carol", "correct horse").await.unwrap_err();
    assert!(err.refusal().expect("rate limit refusal").is_rate_limited());

    // Another address is unaffected by carol's flood.
    let other = login_identity("198.51.100.9");
    auth.login(&other, "dave", "correct horse").await.unwrap();
}

#[tokio::test]
async fn admin_unlock_restores_access_immediately() {
    let (auth, _clock) = service();
    let identity = login_identity("203.0.113.7");

    for _ in 0..5 {
        let _ = auth.login(&identity, "erin", "wrong").await;
    }
    assert!(auth.tracker.is_locked("erin").await.unwrap());

    auth.tracker.unlock("erin").await.unwrap();
    auth.login(&identity, "erin", "correct horse").await.unwrap();
}
