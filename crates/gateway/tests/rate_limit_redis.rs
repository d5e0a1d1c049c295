//! Integration tests for the Redis-backed sliding-window rate limiter.
//!
//! Requires Docker (via testcontainers) and is skipped in environments
//! without Docker by simply failing at container startup.
//!
//! Run with: `cargo test --test rate_limit_redis`

use embedserve_gateway::rate_limit::{self, RateLimitOutcome, RateLimiterBackend};
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

async fn start_redis() -> (std::sync::Arc<dyn RateLimiterBackend>, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379_u16.tcp())
        .start()
        .await
        .expect("failed to start redis container");

    let host = container.get_host().await.expect("get host");
    let port = container.get_host_port_ipv4(6379).await.expect("get port");
    let url = format!("redis://{host}:{port}");

    let limiter = rate_limit::connect(Some(&url), false).await;
    assert_eq!(limiter.backend_name(), "redis");
    (limiter, container)
}

#[tokio::test]
async fn admits_until_minute_limit_then_denies() {
    let (limiter, _container) = start_redis().await;

    for _ in 0..3 {
        let outcome = limiter.check("user-a", 3, 1000).await;
        assert!(matches!(outcome, RateLimitOutcome::Allowed(_)));
    }

    let denied = limiter.check("user-a", 3, 1000).await;
    assert!(matches!(
        denied,
        RateLimitOutcome::Denied {
            limit_type: rate_limit::LimitType::Minute,
            ..
        }
    ));
}

#[tokio::test]
async fn denial_does_not_consume_either_window() {
    let (limiter, _container) = start_redis().await;

    assert!(matches!(
        limiter.check("user-b", 1, 1000).await,
        RateLimitOutcome::Allowed(_)
    ));
    // Second call trips the minute limit and must not record anything.
    assert!(matches!(
        limiter.check("user-b", 1, 1000).await,
        RateLimitOutcome::Denied { .. }
    ));

    let usage = limiter.usage("user-b").await;
    assert_eq!(usage.requests_last_minute, 1);
}

#[tokio::test]
async fn reset_clears_state_across_both_windows() {
    let (limiter, _container) = start_redis().await;

    limiter.check("user-c", 5, 5).await;
    limiter.check("user-c", 5, 5).await;
    limiter.reset("user-c").await;

    let usage = limiter.usage("user-c").await;
    assert_eq!(usage.requests_last_minute, 0);
    assert_eq!(usage.requests_last_hour, 0);
}

#[tokio::test]
async fn independent_users_do_not_share_windows() {
    let (limiter, _container) = start_redis().await;

    for _ in 0..2 {
        limiter.check("user-d1", 2, 1000).await;
    }
    assert!(matches!(
        limiter.check("user-d1", 2, 1000).await,
        RateLimitOutcome::Denied { .. }
    ));
    assert!(matches!(
        limiter.check("user-d2", 2, 1000).await,
        RateLimitOutcome::Allowed(_)
    ));
}
