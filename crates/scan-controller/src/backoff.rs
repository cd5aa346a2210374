//! Per-identity exponential retry delays for failed reconciliations.

use std::{
	collections::HashMap,
	sync::{Mutex, PoisonError},
	time::{Duration, Instant},
};

use crate::{config::BackoffConfig, reconciler::Identity};

#[derive(Debug, Clone, Copy)]
struct Failures {
	count: u32,
	last: Instant,
}

/// Tracks consecutive failures per identity.
///
/// The n-th consecutive failure waits `base * 2^n`, capped at `max`.
///
/// An identity whose last failure is more than twice `max` ago is forgotten.
/// Its retry was due long before that, so it either stopped failing or will
/// never be retried, as happens to objects deleted after a failure.
#[derive(Debug)]
pub struct Backoff {
	base: Duration,
	max: Duration,
	failures: Mutex<HashMap<Identity, Failures>>,
}

impl Backoff {
	pub fn new(config: BackoffConfig) -> Self {
		Self {
			base: config.base(),
			max: config.max(),
			failures: Mutex::new(HashMap::new()),
		}
	}

	/// Record a failure and return how long to wait before retrying.
	pub fn next_delay(&self, identity: &Identity) -> Duration {
		self.next_delay_at(identity, Instant::now())
	}

	fn next_delay_at(&self, identity: &Identity, now: Instant) -> Duration {
		let stale_after = self.max.saturating_mul(2);
		let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
		failures.retain(|_, f| now.saturating_duration_since(f.last) <= stale_after);

		let entry = failures
			.entry(identity.clone())
			.or_insert(Failures { count: 0, last: now });

		let delay = 2u32
			.checked_pow(entry.count)
			.and_then(|factor| self.base.checked_mul(factor))
			.map_or(self.max, |delay| delay.min(self.max));
		entry.count = entry.count.saturating_add(1);
		entry.last = now;
		delay
	}

	/// Forget the failures of an identity that reconciled successfully.
	pub fn reset(&self, identity: &Identity) {
		self.failures
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(identity);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn backoff(base_seconds: u64, max_seconds: u64) -> Backoff {
		Backoff::new(BackoffConfig {
			base_seconds,
			max_seconds,
		})
	}

	fn tracked(backoff: &Backoff) -> usize {
		backoff.failures.lock().unwrap().len()
	}

	#[test]
	fn test_delay_doubles_until_max() {
		let backoff = backoff(5, 60);
		let id = Identity::new("scans", "probe");
		let delays: Vec<_> = (0..6).map(|_| backoff.next_delay(&id).as_secs()).collect();
		assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
	}

	#[test]
	fn test_identities_are_independent() {
		let backoff = backoff(1, 100);
		let a = Identity::new("scans", "a");
		let b = Identity::new("scans", "b");
		backoff.next_delay(&a);
		backoff.next_delay(&a);
		assert_eq!(backoff.next_delay(&a), Duration::from_secs(4));
		assert_eq!(backoff.next_delay(&b), Duration::from_secs(1));
	}

	#[test]
	fn test_reset_starts_over() {
		let backoff = backoff(2, 100);
		let id = Identity::new("scans", "probe");
		backoff.next_delay(&id);
		backoff.next_delay(&id);
		backoff.reset(&id);
		assert_eq!(backoff.next_delay(&id), Duration::from_secs(2));
		assert_eq!(tracked(&backoff), 1);
	}

	#[test]
	fn test_many_failures_do_not_overflow() {
		let backoff = backoff(1, 300);
		let id = Identity::new("scans", "probe");
		for _ in 0..100 {
			assert!(backoff.next_delay(&id) <= Duration::from_secs(300));
		}
	}

	#[test]
	fn test_abandoned_identities_are_forgotten() {
		let backoff = backoff(5, 60);
		let deleted = Identity::new("scans", "deleted");
		let other = Identity::new("scans", "other");
		let start = Instant::now();

		backoff.next_delay_at(&deleted, start);
		backoff.next_delay_at(&deleted, start);
		assert_eq!(tracked(&backoff), 1);

		// Nothing retries `deleted` again; later failures elsewhere prune it
		backoff.next_delay_at(&other, start + Duration::from_secs(121));
		assert_eq!(tracked(&backoff), 1);
		assert_eq!(
			backoff.next_delay_at(&deleted, start + Duration::from_secs(122)),
			Duration::from_secs(5)
		);
	}

	#[test]
	fn test_retry_within_window_keeps_counting() {
		let backoff = backoff(5, 60);
		let id = Identity::new("scans", "probe");
		let start = Instant::now();

		backoff.next_delay_at(&id, start);
		backoff.next_delay_at(&id, start + Duration::from_secs(5));
		assert_eq!(
			backoff.next_delay_at(&id, start + Duration::from_secs(120)),
			Duration::from_secs(20)
		);
	}
}
