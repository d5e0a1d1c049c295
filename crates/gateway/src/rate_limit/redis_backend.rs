use super::{LimitType, RateLimitInfo, RateLimitOutcome, RateLimiterBackend, UsageInfo};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomically evaluates both windows and, only on admission, records the
/// event in both sorted sets. Steps 1-5 of the admission algorithm run as
/// a single Lua script so a shared Redis instance can serve many gateway
/// instances without a cross-process race between "check" and "record".
///
/// Returns `(admitted, limit_type, limit_hit, retry_after, minute_count, hour_count)`.
const CHECK_AND_RECORD: &str = r#"
local minute_key = KEYS[1]
local hour_key = KEYS[2]
local now = tonumber(ARGV[1])
local minute_limit = tonumber(ARGV[2])
local hour_limit = tonumber(ARGV[3])
local minute_window = tonumber(ARGV[4])
local hour_window = tonumber(ARGV[5])
local member = ARGV[6]

redis.call('ZREMRANGEBYSCORE', minute_key, '-inf', now - minute_window)
redis.call('ZREMRANGEBYSCORE', hour_key, '-inf', now - hour_window)

local minute_count = redis.call('ZCARD', minute_key)
local hour_count = redis.call('ZCARD', hour_key)

if minute_count >= minute_limit then
    local oldest = redis.call('ZRANGE', minute_key, 0, 0, 'WITHSCORES')
    local retry_after = 1
    if oldest[2] then
        retry_after = math.max(1, math.ceil(tonumber(oldest[2]) + minute_window - now))
    end
    return {0, 'minute', minute_limit, retry_after, minute_count, hour_count}
end

if hour_count >= hour_limit then
    local oldest = redis.call('ZRANGE', hour_key, 0, 0, 'WITHSCORES')
    local retry_after = 1
    if oldest[2] then
        retry_after = math.max(1, math.ceil(tonumber(oldest[2]) + hour_window - now))
    end
    return {0, 'hour', hour_limit, retry_after, minute_count, hour_count}
end

redis.call('ZADD', minute_key, now, member)
redis.call('ZADD', hour_key, now, member)
redis.call('EXPIRE', minute_key, minute_window * 2)
redis.call('EXPIRE', hour_key, hour_window * 2)

return {1, '', 0, 0, minute_count + 1, hour_count + 1}
"#;

pub struct RedisLimiter {
    conn: ConnectionManager,
    script: Script,
}

impl RedisLimiter {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            script: Script::new(CHECK_AND_RECORD),
        })
    }

    fn keys(user_id: &str) -> (String, String) {
        (
            format!("ratelimit:{{{user_id}}}:minute"),
            format!("ratelimit:{{{user_id}}}:hour"),
        )
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[async_trait]
impl RateLimiterBackend for RedisLimiter {
    async fn check(&self, user_id: &str, minute_limit: u32, hour_limit: u32) -> RateLimitOutcome {
        let (minute_key, hour_key) = Self::keys(user_id);
        let member = format!("{}-{}", now_secs(), rand::random::<u64>());
        let mut conn = self.conn.clone();

        let result: redis::RedisResult<(i64, String, i64, i64, i64, i64)> = self
            .script
            .key(minute_key)
            .key(hour_key)
            .arg(now_secs())
            .arg(minute_limit)
            .arg(hour_limit)
            .arg(super::MINUTE_WINDOW_SECS)
            .arg(super::HOUR_WINDOW_SECS)
            .arg(member)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok((1, _, _, _, minute_count, hour_count)) => RateLimitOutcome::Allowed(RateLimitInfo {
                requests_this_minute: minute_count as u64,
                requests_this_hour: hour_count as u64,
                minute_limit,
                hour_limit,
            }),
            Ok((_, limit_type, limit_hit, retry_after, _, _)) => RateLimitOutcome::Denied {
                limit_type: if limit_type == "minute" {
                    LimitType::Minute
                } else {
                    LimitType::Hour
                },
                limit: limit_hit as u32,
                retry_after: retry_after as u64,
            },
            Err(e) => {
                // A mid-flight Redis failure degrades to fail-open for this
                // single call; the factory already decided at startup
                // whether Redis should be trusted at all.
                tracing::error!("rate_limit: redis script failed, admitting request: {}", e);
                RateLimitOutcome::Allowed(RateLimitInfo {
                    requests_this_minute: 0,
                    requests_this_hour: 0,
                    minute_limit,
                    hour_limit,
                })
            }
        }
    }

    async fn usage(&self, user_id: &str) -> UsageInfo {
        let (minute_key, hour_key) = Self::keys(user_id);
        let now = now_secs();
        let mut conn = self.conn.clone();

        let _: redis::RedisResult<i64> = conn
            .zrembyscore(&minute_key, "-inf", now - super::MINUTE_WINDOW_SECS as f64)
            .await;
        let _: redis::RedisResult<i64> = conn
            .zrembyscore(&hour_key, "-inf", now - super::HOUR_WINDOW_SECS as f64)
            .await;

        let minute_count: i64 = conn.zcard(&minute_key).await.unwrap_or(0);
        let hour_count: i64 = conn.zcard(&hour_key).await.unwrap_or(0);

        UsageInfo {
            requests_last_minute: minute_count.max(0) as u64,
            requests_last_hour: hour_count.max(0) as u64,
        }
    }

    async fn reset(&self, user_id: &str) {
        let (minute_key, hour_key) = Self::keys(user_id);
        let mut conn = self.conn.clone();
        let _: redis::RedisResult<i64> = conn.del(&[minute_key, hour_key]).await;
    }

    async fn available(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
