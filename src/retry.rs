//! Reconnect backoff.
//!
//! Exponential backoff with a cap and down-jitter: the delay before retry `n`
//! is `initial * multiplier^n`, capped at `max_delay`, then shortened by a
//! random share of up to `jitter_percent`. Integer arithmetic only, so it runs
//! on cores without an FPU.

use embassy_time::Duration;
use rand_core::RngCore;

/// How `ensure_connected` paces and bounds its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts per `ensure_connected` call. `None` retries
    /// until success or cancellation.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
    /// Down-jitter: each delay is reduced by a random 0..=jitter_percent %.
    pub jitter_percent: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
            jitter_percent: 25,
        }
    }
}

impl RetryPolicy {
    /// Unbounded retries at a constant pace, no jitter.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1,
            jitter_percent: 0,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Whether attempt number `attempt` (1-based) may start.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// The un-jittered delay before retry number `step` (0-based).
    pub fn base_delay(&self, step: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(step);
        let millis = self.initial_delay.as_millis().saturating_mul(factor);
        Duration::from_millis(millis.min(self.max_delay.as_millis()))
    }
}

/// Running backoff state for one reconnect sequence.
pub struct Backoff<R> {
    policy: RetryPolicy,
    rng: R,
    step: u32,
}

impl<R: RngCore> Backoff<R> {
    pub fn new(policy: RetryPolicy, rng: R) -> Self {
        Self {
            policy,
            rng,
            step: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Starts over from `initial_delay`.
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// The jittered delay to wait before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.policy.base_delay(self.step).as_millis();
        self.step = self.step.saturating_add(1);

        let jitter = u64::from(self.policy.jitter_percent.min(100));
        if jitter == 0 || base == 0 {
            return Duration::from_millis(base);
        }

        // Reduction in thousandths of the jitter window, 0..=1000.
        let roll = u64::from(self.rng.next_u32() % 1001);
        let reduction = base.saturating_mul(jitter).saturating_mul(roll) / 100_000;
        Duration::from_millis(base - reduction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Always returns the same value.
    struct ConstRng(u32);

    impl RngCore for ConstRng {
        fn next_u32(&mut self) -> u32 {
            self.0
        }

        fn next_u64(&mut self) -> u64 {
            u64::from(self.0)
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(self.0 as u8);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn default_delays_double_until_capped() {
        let policy = RetryPolicy {
            jitter_percent: 0,
            ..RetryPolicy::default()
        };
        let mut backoff = Backoff::new(policy, ConstRng(0));
        let delays: [u64; 8] = core::array::from_fn(|_| backoff.next_delay().as_secs());
        assert_eq!(delays, [1, 2, 4, 8, 16, 32, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_only_shortens() {
        let policy = RetryPolicy::default();

        let mut no_reduction = Backoff::new(policy, ConstRng(0));
        assert_eq!(no_reduction.next_delay(), Duration::from_secs(1));

        // 1000 is the top of the roll, so the full 25 % comes off.
        let mut full_reduction = Backoff::new(policy, ConstRng(1000));
        assert_eq!(full_reduction.next_delay(), Duration::from_millis(750));
        assert_eq!(full_reduction.next_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn fixed_policy_never_grows() {
        let mut backoff = Backoff::new(RetryPolicy::fixed(Duration::from_secs(1)), ConstRng(1000));
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        }
    }

    #[test]
    fn attempt_budget() {
        let unbounded = RetryPolicy::default();
        assert!(unbounded.allows_attempt(u32::MAX));

        let bounded = RetryPolicy::default().with_max_attempts(3);
        assert!(bounded.allows_attempt(3));
        assert!(!bounded.allows_attempt(4));
    }

    #[test]
    fn huge_step_saturates_at_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(200), Duration::from_secs(60));
    }
}
