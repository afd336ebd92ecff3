use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use derive_more::Constructor;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::Mutex;

#[derive(Constructor, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds.
    pub reset: i64,
}

/// Last known quota, fed by response headers and `/rate_limit`.
#[derive(Clone, Default)]
pub struct RateLimiter {
    limit: Arc<Mutex<Option<RateLimit>>>,
}

impl RateLimiter {
    pub async fn snapshot(&self) -> Option<RateLimit> {
        *self.limit.lock().await
    }

    pub(crate) async fn store(&self, limit: RateLimit) {
        debug!("Rate limit: {:?}", limit);
        *self.limit.lock().await = Some(limit);
    }

    pub(crate) async fn update(&self, headers: &HeaderMap<HeaderValue>) {
        let update = match read_limit(headers) {
            Ok(update) => update,
            Err(err) => {
                debug!("No rate limit headers: {}", err);
                return;
            }
        };
        let mut rate_limit = self.limit.lock().await;
        let merged = match *rate_limit {
            // Same window: a late response may carry an older, higher `remaining`.
            Some(current) if current.reset == update.reset => RateLimit {
                remaining: std::cmp::min(current.remaining, update.remaining),
                ..update
            },
            Some(current) if current.reset > update.reset => current,
            _ => update,
        };
        debug!("Updated limits: {:?}", merged);
        *rate_limit = Some(merged);
    }

    async fn time_to_reset(&self) -> Option<Duration> {
        let rate_limit = (*self.limit.lock().await)?;
        let now = Utc::now().timestamp();
        if rate_limit.reset < now {
            return Some(Duration::ZERO);
        }
        Some(Duration::from_secs((rate_limit.reset - now) as u64 + 1))
    }

    /// Sleeps until the quota resets, unless that is unknown or further away than `max_wait`.
    pub async fn wait_for_reset(&self, max_wait: Duration) -> bool {
        match self.time_to_reset().await {
            Some(delay) if delay <= max_wait => {
                info!("Rate limiting wait: {} sec", delay.as_secs());
                tokio::time::sleep(delay).await;
                true
            }
            Some(delay) => {
                info!("Rate limit resets in {} sec, longer than {} sec", delay.as_secs(), max_wait.as_secs());
                false
            }
            None => false,
        }
    }
}

fn read_limit(headers: &HeaderMap<HeaderValue>) -> anyhow::Result<RateLimit> {
    Ok(RateLimit::new(
        read_header(headers, "x-ratelimit-limit")?,
        read_header(headers, "x-ratelimit-remaining")?,
        read_header(headers, "x-ratelimit-reset")?,
    ))
}

pub(crate) fn read_header<T>(headers: &HeaderMap<HeaderValue>, header: &str) -> anyhow::Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    let value = headers
        .get(header)
        .with_context(|| format!("Header {} not found", header))?
        .to_str()?;
    value
        .parse::<T>()
        .with_context(|| format!("Header {} has invalid value {}", header, value))
}

#[cfg(test)]
fn headers(limit: u32, remaining: u32, reset: i64) -> HeaderMap<HeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
    headers
}

#[tokio::test]
async fn wait_test() {
    let limiter = RateLimiter::default();
    assert!(!limiter.wait_for_reset(Duration::from_secs(120)).await, "Unknown reset never waits");

    let reset = Utc::now().timestamp() + 1;
    limiter.store(RateLimit::new(5000, 0, reset)).await;
    assert!(limiter.wait_for_reset(Duration::from_secs(5)).await);
    assert!(Utc::now().timestamp() >= reset, "Limiter should wait until the reset");

    limiter.store(RateLimit::new(5000, 0, Utc::now().timestamp() + 600)).await;
    let before = Utc::now().timestamp();
    assert!(!limiter.wait_for_reset(Duration::from_secs(120)).await);
    assert!(Utc::now().timestamp() - before <= 1, "Limiter should not wait past max wait");

    limiter.store(RateLimit::new(5000, 0, Utc::now().timestamp() - 10)).await;
    assert!(limiter.wait_for_reset(Duration::from_secs(1)).await, "Passed reset needs no wait");
}

#[tokio::test]
async fn update_test() {
    let limiter = RateLimiter::default();
    limiter.update(&HeaderMap::new()).await;
    assert_eq!(limiter.snapshot().await, None);

    limiter.update(&headers(5000, 10, 100)).await;
    limiter.update(&headers(5000, 12, 100)).await;
    assert_eq!(
        limiter.snapshot().await,
        Some(RateLimit::new(5000, 10, 100)),
        "Late response of the same window must not raise remaining"
    );

    limiter.update(&headers(5000, 4999, 200)).await;
    assert_eq!(limiter.snapshot().await, Some(RateLimit::new(5000, 4999, 200)));
    limiter.update(&headers(5000, 3, 100)).await;
    assert_eq!(limiter.snapshot().await.map(|l| l.remaining), Some(4999), "Older window ignored");
}
