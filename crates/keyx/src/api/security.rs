use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tower::{Layer, Service};
use tracing::debug;

use crate::api::extract::{client_address, peer_address};
use crate::api::handlers::error_response;
use crate::config::RateLimitConfig;

const WINDOW: Duration = Duration::from_secs(60);

/// Rate limiting state shared between middleware instances
#[derive(Clone)]
struct RateLimitState {
    config: RateLimitConfig,
    trust_proxy: bool,
    counters: Arc<DashMap<String, (u32, Instant)>>,
}

impl RateLimitState {
    fn new(config: RateLimitConfig, trust_proxy: bool) -> Self {
        Self {
            config,
            trust_proxy,
            counters: Arc::new(DashMap::new()),
        }
    }

    fn is_rate_limited(&self, key: &str, now: Instant) -> bool {
        let mut is_limited = false;

        let _entry = self
            .counters
            .entry(key.to_owned())
            .and_modify(|(count, window_start)| {
                if now.duration_since(*window_start) >= WINDOW {
                    *count = 1;
                    *window_start = now;
                } else if *count >= self.config.requests_per_minute {
                    is_limited = true;
                } else {
                    *count += 1;
                }
            })
            .or_insert((1, now));

        is_limited
    }
}

/// Fixed-window, per-client rate limiting layer
#[derive(Clone)]
pub struct RateLimitLayer {
    state: RateLimitState,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig, trust_proxy: bool) -> Self {
        Self {
            state: RateLimitState::new(config, trust_proxy),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: RateLimitState,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let client_id = client_address(
            peer_address(request.extensions()),
            request.headers(),
            self.state.trust_proxy,
        )
        .map_or_else(|| "unknown".to_owned(), |ip| ip.to_string());

        if self.state.is_rate_limited(&client_id, Instant::now()) {
            debug!(%client_id, "Rate limit exceeded");
            return Box::pin(async {
                Ok(error_response(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded", None)
                    .into_response())
            });
        }

        let future = self.inner.call(request);
        Box::pin(future)
    }
}
