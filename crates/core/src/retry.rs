use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule with a capped ceiling and optional jitter.
///
/// The schedule itself carries no bound; pair it with [`RetryPolicy`] for
/// bounded retry loops, or drive it directly for unbounded reconnection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 500, max_delay_ms: 60_000, jitter: true }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`
    /// capped at the ceiling, with up to 25% random jitter subtracted so that
    /// concurrent reconnectors do not stampede in lockstep.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let capped = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);

        let delay_ms = if self.jitter && capped > 0 {
            let spread = capped / 4;
            capped - rand::thread_rng().gen_range(0..=spread)
        } else {
            capped
        };

        Duration::from_millis(delay_ms)
    }
}

/// Bounded retry schedule for per-operation failures (message delivery,
/// host forwarding). `max_attempts` counts the initial try.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy { base_delay_ms: 250, max_delay_ms: 5_000, jitter: false },
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` failures so far.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the next attempt. A backend-specified wait (rate-limit
    /// `retry_after`) overrides the computed backoff outright.
    pub fn delay(&self, attempt: u32, server_wait: Option<Duration>) -> Duration {
        server_wait.unwrap_or_else(|| self.backoff.delay(attempt))
    }
}
