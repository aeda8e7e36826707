//! Attempt budget and per-attempt timeout policy.
//!
//! Every attempt reuses the request-id; only the wait before giving up on an
//! attempt changes between policies. Attempt timeouts always stay within
//! [`MIN_ATTEMPT_TIMEOUT`]..=[`MAX_ATTEMPT_TIMEOUT`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = MAX_ATTEMPT_TIMEOUT;
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// How many times a request is sent and how long each attempt waits.
///
/// ```rust
/// use snmp_query::Retry;
/// use std::time::Duration;
///
/// let fixed = Retry::fixed(3, Duration::from_secs(2));
/// assert_eq!(fixed.attempt_timeout(2), Duration::from_secs(2));
///
/// let growing = Retry::exponential(4).jitter(0.0).build();
/// assert_eq!(growing.attempt_timeout(0), Duration::from_secs(1));
/// assert_eq!(growing.attempt_timeout(1), Duration::from_secs(2));
/// assert_eq!(growing.attempt_timeout(3), Duration::from_secs(5));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Retry {
    /// Total sends, including the first. Never less than 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    /// Every attempt waits the same time.
    Fixed { timeout: Duration },
    /// Attempt `n` waits `initial * 2^n`, capped at `max`, scaled by a
    /// factor in `[1 - jitter, 1 + jitter]`.
    Exponential {
        initial: Duration,
        max: Duration,
        jitter: f64,
    },
}

impl Default for Retry {
    fn default() -> Self {
        Self::fixed(DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT)
    }
}

impl Retry {
    /// Single attempt with the default timeout.
    pub fn none() -> Self {
        Self::fixed(1, DEFAULT_TIMEOUT)
    }

    pub fn fixed(attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts: attempts.max(1),
            backoff: Backoff::Fixed { timeout },
        }
    }

    /// Exponential policy starting at 1s and capped at 5s.
    pub fn exponential(attempts: u32) -> RetryBuilder {
        RetryBuilder {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Wait for the zero-based `attempt`.
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        let timeout = match &self.backoff {
            Backoff::Fixed { timeout } => *timeout,
            Backoff::Exponential {
                initial,
                max,
                jitter,
            } => {
                let multiplier = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                let base = initial.saturating_mul(multiplier).min(*max);
                Duration::from_secs_f64(base.as_secs_f64() * jitter_factor(*jitter))
            }
        };
        timeout.clamp(MIN_ATTEMPT_TIMEOUT, MAX_ATTEMPT_TIMEOUT)
    }

    /// Upper bound on a call's total wait.
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts.max(1))
            .map(|n| match &self.backoff {
                Backoff::Exponential { initial, max, jitter } => {
                    let multiplier = 1u32.checked_shl(n.min(31)).unwrap_or(u32::MAX);
                    let base = initial.saturating_mul(multiplier).min(*max);
                    Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
                        .clamp(MIN_ATTEMPT_TIMEOUT, MAX_ATTEMPT_TIMEOUT)
                }
                Backoff::Fixed { .. } => self.attempt_timeout(n),
            })
            .sum()
    }
}

/// Builder returned by [`Retry::exponential`].
#[derive(Clone, Debug)]
pub struct RetryBuilder {
    max_attempts: u32,
    initial: Duration,
    max: Duration,
    jitter: f64,
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ATTEMPTS,
            initial: MIN_ATTEMPT_TIMEOUT,
            max: MAX_ATTEMPT_TIMEOUT,
            jitter: 0.1,
        }
    }
}

impl RetryBuilder {
    pub fn initial(mut self, timeout: Duration) -> Self {
        self.initial = timeout;
        self
    }

    pub fn max(mut self, timeout: Duration) -> Self {
        self.max = timeout;
        self
    }

    /// Clamped to `0.0..=1.0`.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn build(self) -> Retry {
        Retry {
            max_attempts: self.max_attempts.max(1),
            backoff: Backoff::Exponential {
                initial: self.initial,
                max: self.max,
                jitter: self.jitter,
            },
        }
    }
}

impl From<RetryBuilder> for Retry {
    fn from(builder: RetryBuilder) -> Self {
        builder.build()
    }
}

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Spread factor in `[1 - jitter, 1 + jitter]` from a hashed counter.
fn jitter_factor(jitter: f64) -> f64 {
    if jitter <= 0.0 {
        return 1.0;
    }
    let counter = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let hash = counter.wrapping_mul(0x5851_f42d_4c95_7f2d);
    let unit = (hash >> 11) as f64 / (1u64 << 53) as f64;
    1.0 + (unit - 0.5) * 2.0 * jitter
}
