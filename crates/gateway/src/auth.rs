use crate::apikey::{ApiKeyRecord, ApiKeyStore};
use crate::error::GatewayError;
use crate::rate_limit::{RateLimitInfo, RateLimitOutcome, RateLimiterBackend};
use std::sync::Arc;

pub struct AuthenticatedUser {
    pub record: ApiKeyRecord,
    pub rate_limit_info: RateLimitInfo,
}

/// Verifies a bearer token against the key store, then checks it against
/// the rate limiter. Ported from `AuthService.verify_api_key`: an invalid
/// key is rejected before the limiter is ever consulted, and bypass mode
/// skips the limiter entirely while reporting unlimited headroom.
pub async fn authenticate(
    store: &ApiKeyStore,
    limiter: &Arc<dyn RateLimiterBackend>,
    bypass_rate_limits: bool,
    bearer_token: &str,
) -> Result<AuthenticatedUser, GatewayError> {
    let record = store
        .get_key_info(bearer_token)
        .ok_or(GatewayError::InvalidApiKey)?;

    if bypass_rate_limits {
        return Ok(AuthenticatedUser {
            rate_limit_info: RateLimitInfo {
                requests_this_minute: 0,
                requests_this_hour: 0,
                minute_limit: u32::MAX,
                hour_limit: u32::MAX,
            },
            record,
        });
    }

    match limiter
        .check(
            &record.user_id,
            record.rate_limit_per_minute,
            record.rate_limit_per_hour,
        )
        .await
    {
        RateLimitOutcome::Allowed(info) => Ok(AuthenticatedUser {
            record,
            rate_limit_info: info,
        }),
        RateLimitOutcome::Denied {
            limit_type,
            limit,
            retry_after,
        } => Err(GatewayError::RateLimited {
            limit_type: limit_type.as_str(),
            limit,
            retry_after,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::NoopLimiter;

    #[tokio::test]
    async fn rejects_unknown_key_before_touching_limiter() {
        let store = ApiKeyStore::new();
        let limiter: Arc<dyn RateLimiterBackend> = Arc::new(NoopLimiter::default());
        let result = authenticate(&store, &limiter, false, "sk_live_unknown").await;
        assert!(matches!(result, Err(GatewayError::InvalidApiKey)));
    }

    #[tokio::test]
    async fn bypass_reports_unlimited_headroom() {
        let store = ApiKeyStore::new();
        let key = ApiKeyStore::generate("sk_test");
        store.add_key(&key, "u1", "k", 1, 1, None);
        let limiter: Arc<dyn RateLimiterBackend> = Arc::new(NoopLimiter::default());

        let user = authenticate(&store, &limiter, true, &key).await.unwrap();
        assert_eq!(user.rate_limit_info.minute_limit, u32::MAX);
    }

    #[tokio::test]
    async fn valid_key_consults_limiter() {
        let store = ApiKeyStore::new();
        let key = ApiKeyStore::generate("sk_test");
        store.add_key(&key, "u1", "k", 60, 1000, None);
        let limiter: Arc<dyn RateLimiterBackend> = Arc::new(NoopLimiter::default());

        let user = authenticate(&store, &limiter, false, &key).await.unwrap();
        assert_eq!(user.record.user_id, "u1");
    }
}
