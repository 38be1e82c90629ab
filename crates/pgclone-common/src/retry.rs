use std::time::Duration;

use rand::Rng;

/// Exponential backoff with full jitter, used for `CopyAborted` part retries
/// and `ReplicationDisconnected` reconnects.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Backoff {
            base,
            max,
            attempt: 0,
            max_attempts,
        }
    }

    /// Returns `None` once the retry budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let exp = self.base.saturating_mul(1 << self.attempt.min(16));
        let capped = exp.min(self.max);
        let jittered_millis = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64);
        Some(Duration::from_millis(jittered_millis))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Runs `f` until it succeeds or the backoff budget is exhausted, sleeping
/// between attempts. Used by the table-copy worker for `CopyAborted` and by
/// the CDC receiver for `ReplicationDisconnected`.
pub async fn retry<F, Fut, T, E>(mut backoff: Backoff, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let Some(delay) = backoff.next_delay() else {
                    return Err(err);
                };
                tracing::warn!(attempt = backoff.attempt(), ?delay, "retrying after error");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
