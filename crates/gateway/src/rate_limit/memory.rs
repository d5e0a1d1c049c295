use super::{LimitType, RateLimitInfo, RateLimitOutcome, RateLimiterBackend, UsageInfo};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Per-user timestamp deques for the minute and hour windows. A `Mutex`
/// (not a lock-free structure) guards each user's pair of windows because
/// the five-step admission algorithm must run as one logical transaction —
/// matching the teacher's own `tokio::sync::Mutex`-per-bucket choice in
/// `proxy/filter/rate_limit.rs`, where a CAS-based predecessor was found to
/// under-count under contention.
struct UserWindows {
    minute: VecDeque<f64>,
    hour: VecDeque<f64>,
}

impl UserWindows {
    fn new() -> Self {
        Self {
            minute: VecDeque::new(),
            hour: VecDeque::new(),
        }
    }
}

/// Entries not touched for this long are eligible for GC, mirroring the
/// teacher's `GC_EXPIRE_SECS` / `GC_INTERVAL_SECS` constants.
const GC_EXPIRE_SECS: u64 = 2 * HOUR_WINDOW_SECS_U64;
const HOUR_WINDOW_SECS_U64: u64 = 3600;
const MAX_ENTRIES: usize = 100_000;

pub struct InMemoryLimiter {
    users: DashMap<String, Mutex<UserWindows>>,
}

impl Default for InMemoryLimiter {
    fn default() -> Self {
        Self {
            users: DashMap::new(),
        }
    }
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn evict_expired(window: &mut VecDeque<f64>, now: f64, window_secs: u64) {
    // Keep a 2x safety margin, matching `_cleanup_old_windows`.
    let cutoff = now - (window_secs as f64 * 2.0);
    while matches!(window.front(), Some(&ts) if ts <= cutoff) {
        window.pop_front();
    }
}

fn count_in_window(window: &VecDeque<f64>, now: f64, window_secs: u64) -> u64 {
    let cutoff = now - window_secs as f64;
    window.iter().filter(|&&ts| ts > cutoff).count() as u64
}

fn retry_after(window: &VecDeque<f64>, now: f64, window_secs: u64) -> u64 {
    let cutoff = now - window_secs as f64;
    match window.iter().find(|&&ts| ts > cutoff) {
        Some(&oldest) => {
            let secs = (oldest + window_secs as f64 - now).ceil() as i64;
            secs.max(1) as u64
        }
        None => 1,
    }
}

#[async_trait]
impl RateLimiterBackend for InMemoryLimiter {
    async fn check(&self, user_id: &str, minute_limit: u32, hour_limit: u32) -> RateLimitOutcome {
        let entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| Mutex::new(UserWindows::new()));
        let mut windows = entry.lock().await;
        let t = now();

        evict_expired(&mut windows.minute, t, super::MINUTE_WINDOW_SECS);
        evict_expired(&mut windows.hour, t, super::HOUR_WINDOW_SECS);

        let minute_count = count_in_window(&windows.minute, t, super::MINUTE_WINDOW_SECS);
        let hour_count = count_in_window(&windows.hour, t, super::HOUR_WINDOW_SECS);

        if minute_count >= minute_limit as u64 {
            return RateLimitOutcome::Denied {
                limit_type: LimitType::Minute,
                limit: minute_limit,
                retry_after: retry_after(&windows.minute, t, super::MINUTE_WINDOW_SECS),
            };
        }
        if hour_count >= hour_limit as u64 {
            return RateLimitOutcome::Denied {
                limit_type: LimitType::Hour,
                limit: hour_limit,
                retry_after: retry_after(&windows.hour, t, super::HOUR_WINDOW_SECS),
            };
        }

        // Insert with sub-millisecond jitter so concurrent admissions at
        // the same instant keep individually distinct timestamps.
        let jittered = t + (rand_epsilon());
        windows.minute.push_back(jittered);
        windows.hour.push_back(jittered);

        if self.users.len() > MAX_ENTRIES {
            drop(windows);
            self.evict_stale_users();
        }

        RateLimitOutcome::Allowed(RateLimitInfo {
            requests_this_minute: minute_count + 1,
            requests_this_hour: hour_count + 1,
            minute_limit,
            hour_limit,
        })
    }

    async fn usage(&self, user_id: &str) -> UsageInfo {
        let Some(entry) = self.users.get(user_id) else {
            return UsageInfo {
                requests_last_minute: 0,
                requests_last_hour: 0,
            };
        };
        let windows = entry.lock().await;
        let t = now();
        UsageInfo {
            requests_last_minute: count_in_window(&windows.minute, t, super::MINUTE_WINDOW_SECS),
            requests_last_hour: count_in_window(&windows.hour, t, super::HOUR_WINDOW_SECS),
        }
    }

    async fn reset(&self, user_id: &str) {
        self.users.remove(user_id);
    }

    async fn available(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

impl InMemoryLimiter {
    /// Drops the oldest-touched entries once the map exceeds `MAX_ENTRIES`,
    /// bounding memory under a workload with many distinct users.
    fn evict_stale_users(&self) {
        let overflow = self.users.len().saturating_sub(MAX_ENTRIES);
        if overflow == 0 {
            return;
        }
        let stale: Vec<String> = self
            .users
            .iter()
            .filter(|e| {
                e.value()
                    .try_lock()
                    .map(|w| w.minute.back().copied().unwrap_or(0.0) < now() - GC_EXPIRE_SECS as f64)
                    .unwrap_or(false)
            })
            .map(|e| e.key().clone())
            .take(overflow)
            .collect();
        for key in stale {
            self.users.remove(&key);
        }
    }
}

fn rand_epsilon() -> f64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0.0..0.000_001)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_minute_limit() {
        let limiter = InMemoryLimiter::default();
        for _ in 0..5 {
            assert!(matches!(
                limiter.check("u1", 5, 1000).await,
                RateLimitOutcome::Allowed(_)
            ));
        }
        assert!(matches!(
            limiter.check("u1", 5, 1000).await,
            RateLimitOutcome::Denied {
                limit_type: LimitType::Minute,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn hour_limit_trips_before_repeated_minute_admission() {
        let limiter = InMemoryLimiter::default();
        for _ in 0..3 {
            assert!(matches!(
                limiter.check("u2", 1000, 3).await,
                RateLimitOutcome::Allowed(_)
            ));
        }
        assert!(matches!(
            limiter.check("u2", 1000, 3).await,
            RateLimitOutcome::Denied {
                limit_type: LimitType::Hour,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn denial_does_not_record_in_either_window() {
        let limiter = InMemoryLimiter::default();
        assert!(matches!(
            limiter.check("u3", 1, 1000).await,
            RateLimitOutcome::Allowed(_)
        ));
        assert!(matches!(
            limiter.check("u3", 1, 1000).await,
            RateLimitOutcome::Denied { .. }
        ));
        let usage = limiter.usage("u3").await;
        assert_eq!(usage.requests_last_minute, 1);
    }

    #[tokio::test]
    async fn usage_is_read_only() {
        let limiter = InMemoryLimiter::default();
        limiter.check("u4", 5, 1000).await;
        let before = limiter.usage("u4").await;
        let after = limiter.usage("u4").await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn reset_clears_all_state() {
        let limiter = InMemoryLimiter::default();
        limiter.check("u5", 1, 1000).await;
        limiter.reset("u5").await;
        let usage = limiter.usage("u5").await;
        assert_eq!(usage.requests_last_minute, 0);
    }

    #[tokio::test]
    async fn independent_users_do_not_share_state() {
        let limiter = InMemoryLimiter::default();
        assert!(matches!(
            limiter.check("a", 1, 1000).await,
            RateLimitOutcome::Allowed(_)
        ));
        assert!(matches!(
            limiter.check("b", 1, 1000).await,
            RateLimitOutcome::Allowed(_)
        ));
    }
}
