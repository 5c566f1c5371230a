//! Retry policies for link and broker (re)connection.

/// Growth of the pause between attempts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed,
    /// Delay multiplied by `factor` after each failure, capped at `max_delay_ms`.
    Exponential { factor: u32, max_delay_ms: u32 },
}

/// How often, and how patiently, a failing operation is retried.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Retry every `delay_ms` until success.
    #[must_use]
    pub const fn forever(delay_ms: u32) -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: delay_ms,
            backoff: Backoff::Fixed,
        }
    }

    /// Give up after `max_attempts` attempts in total.
    #[must_use]
    pub const fn bounded(max_attempts: u32, initial_delay_ms: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            initial_delay_ms,
            backoff,
        }
    }

    /// Fresh attempt counter for one retry sequence.
    #[must_use]
    pub const fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempts: 0,
            next_delay_ms: self.initial_delay_ms,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(100)
    }
}

/// Progress through one retry sequence.
///
/// Callers loop: attempt the operation, and on failure ask
/// [`RetryState::next_delay`] how long to wait, stopping when it yields `None`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
    next_delay_ms: u32,
}

impl RetryState {
    /// Records a failed attempt and returns the pause before the next one, or
    /// `None` once the policy's attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<u32> {
        self.attempts = self.attempts.saturating_add(1);
        let attempts = self.attempts;
        if self
            .policy
            .max_attempts
            .is_some_and(|limit| attempts >= limit)
        {
            return None;
        }

        let delay = self.next_delay_ms;
        if let Backoff::Exponential {
            factor,
            max_delay_ms,
        } = self.policy.backoff
        {
            self.next_delay_ms = delay.saturating_mul(factor).min(max_delay_ms);
        }
        Some(delay)
    }

    /// Failed attempts recorded so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Asynchronous millisecond pause.
#[allow(async_fn_in_trait)]
pub trait AsyncDelay {
    async fn delay_ms(&mut self, ms: u32);
}
