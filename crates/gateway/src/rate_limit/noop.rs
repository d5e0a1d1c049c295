use super::{RateLimitInfo, RateLimitOutcome, RateLimiterBackend, UsageInfo};
use async_trait::async_trait;

/// Admits everything and reports zero usage. Used for the `bypass` switch
/// and as the degradation target when a distributed store is configured
/// but unreachable at startup.
#[derive(Default)]
pub struct NoopLimiter;

#[async_trait]
impl RateLimiterBackend for NoopLimiter {
    async fn check(&self, _user_id: &str, minute_limit: u32, hour_limit: u32) -> RateLimitOutcome {
        RateLimitOutcome::Allowed(RateLimitInfo {
            requests_this_minute: 0,
            requests_this_hour: 0,
            minute_limit,
            hour_limit,
        })
    }

    async fn usage(&self, _user_id: &str) -> UsageInfo {
        UsageInfo {
            requests_last_minute: 0,
            requests_last_hour: 0,
        }
    }

    async fn reset(&self, _user_id: &str) {}

    async fn available(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "noop"
    }
}
