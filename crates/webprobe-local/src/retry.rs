use rand::Rng;
use std::time::Duration;

/// Exponential backoff for rate-limited requests.
///
/// There is no attempt limit: callers loop until the backend stops answering 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn start(&self) -> Backoff {
        Backoff {
            current: self.initial,
            max: self.max,
        }
    }
}

/// Mutable backoff state for one logical request.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// Base delay for the next wait, before jitter.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns `backoff + uniform(0, backoff)` and doubles the base (capped).
    pub fn next_wait(&mut self) -> Duration {
        let base = self.current;
        let jitter = rand::thread_rng().gen_range(0.0..=base.as_secs_f64());
        self.current = (base * 2).min(self.max);
        base + Duration::from_secs_f64(jitter)
    }
}
