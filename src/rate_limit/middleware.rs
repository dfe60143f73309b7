//! Tower middleware that gates a service behind the rate limiter.
//!
//! The explicit-decorator replacement for annotation-driven interception: the
//! check is ordinary code wrapping the handler, configured per route with a
//! [`RouteLimit`] and a key-extractor closure that pulls a [`RequestIdentity`]
//! out of the request. A denial surfaces as
//! [`CoordinationError::RateLimitExceeded`], which the boundary maps to HTTP
//! 429 plus the `X-RateLimit-*` headers from the decision.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;

use crate::config::RouteLimit;
use crate::error::CoordinationError;
use crate::identity::RequestIdentity;
use crate::rate_limit::RateLimiter;
use crate::store::KeyValueStore;

/// Error type of a rate-limited service: either the gate refused the request
/// or the inner service failed.
#[derive(Debug, thiserror::Error)]
pub enum GateError<E> {
    /// The coordination layer refused the request.
    #[error(transparent)]
    Refused(#[from] CoordinationError),
    /// The wrapped service failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> GateError<E> {
    /// Check if the gate itself refused the request.
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused(_))
    }

    /// Get the inner service error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Refused(_) => None,
        }
    }
}

/// A layer that enforces a [`RouteLimit`] using a shared [`RateLimiter`].
pub struct RateLimitLayer<S, F> {
    limiter: Arc<RateLimiter<S>>,
    rule: RouteLimit,
    extract: Arc<F>,
}

impl<S, F> RateLimitLayer<S, F> {
    /// Create a layer gating requests by `rule`, deriving each request's
    /// identity with `extract`.
    pub fn new(limiter: Arc<RateLimiter<S>>, rule: RouteLimit, extract: F) -> Self {
        Self { limiter, rule, extract: Arc::new(extract) }
    }
}

impl<S, F> Clone for RateLimitLayer<S, F> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            rule: self.rule.clone(),
            extract: self.extract.clone(),
        }
    }
}

impl<Svc, S, F> Layer<Svc> for RateLimitLayer<S, F> {
    type Service = RateLimitService<Svc, S, F>;

    fn layer(&self, service: Svc) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            rule: self.rule.clone(),
            extract: self.extract.clone(),
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
pub struct RateLimitService<Svc, S, F> {
    inner: Svc,
    limiter: Arc<RateLimiter<S>>,
    rule: RouteLimit,
    extract: Arc<F>,
}

impl<Svc: Clone, S, F> Clone for RateLimitService<Svc, S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            rule: self.rule.clone(),
            extract: self.extract.clone(),
        }
    }
}

impl<Svc, S, F, Req> Service<Req> for RateLimitService<Svc, S, F>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send,
    S: KeyValueStore + 'static,
    F: Fn(&Req) -> RequestIdentity + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = Svc::Response;
    type Error = GateError<Svc::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GateError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let key = self.rule.strategy.key_for(&(*self.extract)(&req));
        let limit = self.rule.limit;
        let window = self.rule.window();
        let limiter = self.limiter.clone();
        // Take the service that was polled ready, leave the clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            limiter.enforce(&key, limit, window).await?;
            inner.call(req).await.map_err(GateError::Inner)
        })
    }
}
