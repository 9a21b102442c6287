use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_DELAY_MS: u64 = 700;

/// Fixed-interval retry policy: `retries + 1` attempts, `delay_ms` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl RetryPolicy {
    /// Total attempts, saturating at `u32::MAX`.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

/// Suspends the current task between retry attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[async_trait]
impl<T: Sleeper + ?Sized> Sleeper for &T {
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs `operation` until it succeeds or the policy's attempts are used up.
///
/// Sleeps between attempts but never after the last one. On exhaustion the
/// error of the final attempt is returned.
pub async fn retry<T, E, F, Fut, S>(
    mut operation: F,
    policy: RetryPolicy,
    sleeper: &S,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    S: Sleeper + ?Sized,
{
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt > u64::from(policy.retries) => {
                debug!("Giving up after {attempt} attempt(s): {e}");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "Attempt {}/{} failed ({}), retrying in {}ms...",
                    attempt,
                    policy.attempts(),
                    e,
                    policy.delay_ms
                );
                sleeper.sleep(policy.delay()).await;
            }
        }
    }
}
