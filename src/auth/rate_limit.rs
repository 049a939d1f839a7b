//! Per-client token bucket rate limiting.
//!
//! Each client IP gets its own `governor` direct limiter. A purge loop started with
//! [`RateLimiter::start`] drops clients that have been idle for [`IDLE_AFTER`].

use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultDirectRateLimiter, Quota};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::state::AppState;

pub const PURGE_EVERY: Duration = Duration::from_secs(60);
pub const IDLE_AFTER: Duration = Duration::from_secs(3 * 60);

struct Client {
    limiter: DefaultDirectRateLimiter,
    last_seen: Instant,
}

struct Inner {
    enabled: bool,
    quota: Quota,
    clients: Mutex<HashMap<String, Client>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota = Quota::per_second(non_zero(config.rps)).allow_burst(non_zero(config.burst));
        Self {
            inner: Arc::new(Inner {
                enabled: config.enabled,
                quota,
                clients: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes one token from `client`'s bucket. Always true when disabled.
    pub fn check(&self, client: &str) -> bool {
        if !self.inner.enabled {
            return true;
        }

        let mut clients = self.clients();
        let entry = clients.entry(client.to_string()).or_insert_with(|| Client {
            limiter: governor::RateLimiter::direct(self.inner.quota),
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();
        entry.limiter.check().is_ok()
    }

    /// Drops clients not seen for `idle`; returns how many were removed.
    pub fn purge_idle(&self, idle: Duration) -> usize {
        let mut clients = self.clients();
        let before = clients.len();
        clients.retain(|_, c| c.last_seen.elapsed() <= idle);
        before - clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients().len()
    }

    /// Spawns the purge loop; it runs until [`RateLimiter::stop`].
    pub fn start(&self) -> JoinHandle<()> {
        let limiter = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_EVERY);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.purge_idle(IDLE_AFTER);
                        if removed > 0 {
                            debug!(
                                removed,
                                remaining = limiter.tracked_clients(),
                                "purged idle rate limit clients"
                            );
                        }
                    }
                }
            }
            debug!("rate limiter purge loop stopped");
        })
    }

    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }
}

/// Client key: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
pub fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ip.to_string();
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ip.to_string();
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_ip(&request);
    if !state.rate_limiter.check(&client) {
        warn!(client = %client, "rate limit exceeded");
        return Err(AppError::RateLimitExceeded);
    }
    Ok(next.run(request).await)
}
