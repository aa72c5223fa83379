//! Constant-timeout retry/backoff policy (§4.2). Mirrors the reference implementation's
//! standalone `backoff` value type rather than inlining attempt-counting into the session.

use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How long to wait for a reply, and how many times to retransmit before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub timeout: Duration,
	pub max_attempts: u32,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
			max_attempts: DEFAULT_MAX_ATTEMPTS,
		}
	}
}

impl RetryPolicy {
	pub fn new(timeout: Duration, max_attempts: u32) -> Self {
		Self { timeout, max_attempts }
	}

	/// Starts a fresh attempt counter bound to this policy.
	pub fn start(&self) -> Backoff {
		Backoff { policy: *self, attempt: 1 }
	}
}

/// A single lockstep step's attempt counter. `reset()` between steps; `wait()` sleeps
/// the per-attempt timeout and advances the counter; `should_retry()` tells the caller
/// whether another attempt is permitted.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
	policy: RetryPolicy,
	attempt: u32,
}

impl Backoff {
	pub fn reset(&mut self) {
		self.attempt = 1;
	}

	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	pub fn max_attempts(&self) -> u32 {
		self.policy.max_attempts
	}

	pub fn timeout(&self) -> Duration {
		self.policy.timeout
	}

	pub fn should_retry(&self) -> bool {
		self.attempt <= self.policy.max_attempts
	}

	/// Waits out the per-attempt timeout and advances to the next attempt. Since every
	/// session runs on the Tokio runtime, this yields cooperatively rather than parking
	/// an OS thread.
	pub async fn wait(&mut self) {
		tokio::time::sleep(self.policy.timeout).await;
		self.attempt += 1;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_the_reference_policy() {
		let policy = RetryPolicy::default();
		assert_eq!(policy.timeout, Duration::from_secs(1));
		assert_eq!(policy.max_attempts, 5);
	}

	#[test]
	fn should_retry_covers_exactly_max_attempts() {
		let mut b = RetryPolicy::default().start();
		for _ in 1..=5 {
			assert!(b.should_retry());
			b.attempt += 1;
		}
		assert!(!b.should_retry());
	}

	#[test]
	fn reset_restores_attempt_one() {
		let mut b = RetryPolicy::default().start();
		b.attempt = 4;
		b.reset();
		assert_eq!(b.attempt(), 1);
	}
}
