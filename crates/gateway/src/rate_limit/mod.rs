//! Sliding-window rate limiting, ported from `SlidingWindowRateLimiter`.
//!
//! Three interchangeable backends behind one trait: an in-process
//! implementation for standalone deployments, a Redis-backed one for
//! multi-instance deployments (admission evaluated by a single atomic
//! Lua script so the two windows are checked and recorded as one
//! transaction), and a no-op fallback used when neither is available.

mod memory;
mod noop;
mod redis_backend;

pub use memory::InMemoryLimiter;
pub use noop::NoopLimiter;
pub use redis_backend::RedisLimiter;

use async_trait::async_trait;
use std::sync::Arc;

pub const MINUTE_WINDOW_SECS: u64 = 60;
pub const HOUR_WINDOW_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    pub requests_this_minute: u64,
    pub requests_this_hour: u64,
    pub minute_limit: u32,
    pub hour_limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageInfo {
    pub requests_last_minute: u64,
    pub requests_last_hour: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LimitType {
    Minute,
    Hour,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Minute => "minute",
            LimitType::Hour => "hour",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitOutcome {
    Allowed(RateLimitInfo),
    Denied {
        limit_type: LimitType,
        limit: u32,
        retry_after: u64,
    },
}

/// Shared interface for every rate-limiter backend.
///
/// `check` is the only mutating operation: it MUST evaluate both windows
/// and, on denial, record nothing in either window. `usage` is a pure
/// read.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    async fn check(&self, user_id: &str, minute_limit: u32, hour_limit: u32) -> RateLimitOutcome;
    async fn usage(&self, user_id: &str) -> UsageInfo;
    async fn reset(&self, user_id: &str);
    async fn available(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

/// Selects a backend at startup. `bypass` always wins and yields the no-op
/// limiter regardless of Redis availability. When a Redis URL is
/// configured but the store cannot be reached, this is a *degradation*:
/// per the admission contract, the factory MUST fail open to the no-op
/// limiter (with a warning) rather than silently falling back to a
/// single-instance in-memory limiter that would under-enforce in a
/// multi-instance deployment. When no Redis URL is configured at all,
/// the in-memory limiter is the correct standalone choice.
pub async fn connect(redis_url: Option<&str>, bypass: bool) -> Arc<dyn RateLimiterBackend> {
    if bypass {
        tracing::info!("rate_limit: bypass enabled, using no-op limiter");
        return Arc::new(NoopLimiter::default());
    }

    match redis_url {
        Some(url) => match RedisLimiter::connect(url).await {
            Ok(limiter) => {
                tracing::info!("rate_limit: connected to redis backend");
                Arc::new(limiter)
            }
            Err(e) => {
                tracing::warn!(
                    "rate_limit: redis unavailable at startup ({}), degrading to no-op limiter",
                    e
                );
                Arc::new(NoopLimiter::default())
            }
        },
        None => {
            tracing::info!("rate_limit: no redis url configured, using in-memory limiter");
            Arc::new(InMemoryLimiter::default())
        }
    }
}
