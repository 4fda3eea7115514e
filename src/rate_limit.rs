//! Per-identity sliding-window admission control.
//!
//! Admission is purely time-based and independent of anomaly severity. When an
//! identity's trailing-minute window is full, behavior follows the configured
//! [`AdmitPolicy`](crate::config::AdmitPolicy): `Wait` sleeps until the window frees a
//! slot (concurrent waiters for one identity are serialized through a per-identity
//! async guard so they line up instead of stampeding), `Reject` surfaces
//! [`Error::Throttled`] carrying the remaining wait.

// self
use crate::{
	_prelude::*,
	config::{AdmitPolicy, SecurityConfig},
	context::Identity,
};

const WINDOW: Duration = Duration::minutes(1);

/// Successful admission, with the total time spent waiting for a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmitOutcome {
	/// Accumulated wait before the request was admitted.
	pub waited: Duration,
}

/// Sliding-window rate limiter keyed by caller identity.
///
/// The window map is owned exclusively by the limiter and only mutated here.
pub struct RateLimiter {
	config: Arc<RwLock<SecurityConfig>>,
	windows: Mutex<HashMap<Identity, VecDeque<OffsetDateTime>>>,
	admit_guards: Mutex<HashMap<Identity, Arc<AsyncMutex<()>>>>,
}
impl RateLimiter {
	/// Creates a limiter reading thresholds from the shared configuration.
	pub fn new(config: Arc<RwLock<SecurityConfig>>) -> Self {
		Self {
			config,
			windows: Mutex::new(HashMap::new()),
			admit_guards: Mutex::new(HashMap::new()),
		}
	}

	/// Admits one request for the identity, waiting or rejecting per policy.
	pub async fn admit(&self, identity: &Identity) -> Result<AdmitOutcome> {
		let guard = self.admit_guard(identity);
		let _serialized = guard.lock().await;
		let mut waited = Duration::ZERO;

		loop {
			let (limit, policy) = {
				let config = self.config.read();

				(config.max_requests_per_minute, config.admit_policy)
			};

			if limit == 0 {
				return Err(Error::Throttled {
					identity: identity.to_string(),
					retry_after: WINDOW,
				});
			}

			let Some(wait) = self.try_admit(identity, limit) else {
				return Ok(AdmitOutcome { waited });
			};

			if policy == AdmitPolicy::Reject {
				return Err(Error::Throttled {
					identity: identity.to_string(),
					retry_after: wait,
				});
			}

			tokio::time::sleep(std_duration(wait)).await;

			waited += wait;
		}
	}

	/// Number of timestamps currently tracked for the identity.
	pub fn window_len(&self, identity: &Identity) -> usize {
		self.windows.lock().get(identity).map_or(0, VecDeque::len)
	}

	/// Drops identities whose windows no longer hold any timestamps.
	pub fn purge_idle(&self) {
		let now = OffsetDateTime::now_utc();
		let mut windows = self.windows.lock();

		windows.retain(|_, window| {
			prune(window, now);

			!window.is_empty()
		});
	}

	// Returns `None` on admission (the timestamp is appended) or the remaining wait.
	fn try_admit(&self, identity: &Identity, limit: u32) -> Option<Duration> {
		let mut windows = self.windows.lock();
		let window = windows.entry(identity.clone()).or_default();
		// Clamp against the newest entry so the window stays non-decreasing even if
		// the wall clock steps backwards.
		let now = OffsetDateTime::now_utc();
		let now = window.back().map_or(now, |latest| now.max(*latest));

		prune(window, now);

		if (window.len() as u32) < limit {
			window.push_back(now);

			return None;
		}

		let Some(oldest) = window.front().copied() else {
			return Some(WINDOW);
		};

		Some((WINDOW - (now - oldest)).max(Duration::ZERO))
	}

	fn admit_guard(&self, identity: &Identity) -> Arc<AsyncMutex<()>> {
		let mut guards = self.admit_guards.lock();

		guards.entry(identity.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	#[cfg(test)]
	fn seed_window(&self, identity: &Identity, timestamps: impl IntoIterator<Item = OffsetDateTime>) {
		self.windows.lock().entry(identity.clone()).or_default().extend(timestamps);
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("tracked_identities", &self.windows.lock().len())
			.finish()
	}
}

fn prune(window: &mut VecDeque<OffsetDateTime>, now: OffsetDateTime) {
	while window.front().is_some_and(|oldest| now - *oldest >= WINDOW) {
		window.pop_front();
	}
}

fn std_duration(duration: Duration) -> std::time::Duration {
	std::time::Duration::try_from(duration).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::config::SecurityConfigPatch;

	fn limiter(limit: u32, policy: AdmitPolicy) -> RateLimiter {
		let config = SecurityConfig {
			max_requests_per_minute: limit,
			admit_policy: policy,
			..Default::default()
		};

		RateLimiter::new(Arc::new(RwLock::new(config)))
	}

	fn identity() -> Identity {
		Identity::new("10.0.0.1").expect("Test identity should be valid.")
	}

	#[tokio::test]
	async fn admits_under_the_limit_without_waiting() {
		let limiter = limiter(3, AdmitPolicy::Wait);
		let identity = identity();

		for _ in 0..3 {
			let outcome =
				limiter.admit(&identity).await.expect("Admission under the limit should succeed.");

			assert_eq!(outcome.waited, Duration::ZERO);
		}

		assert_eq!(limiter.window_len(&identity), 3);
	}

	#[tokio::test]
	async fn reject_policy_surfaces_the_remaining_wait() {
		let limiter = limiter(2, AdmitPolicy::Reject);
		let identity = identity();

		limiter.admit(&identity).await.expect("First admission should succeed.");
		limiter.admit(&identity).await.expect("Second admission should succeed.");

		let error = limiter
			.admit(&identity)
			.await
			.expect_err("Third admission should be rejected over the limit.");

		match error {
			Error::Throttled { retry_after, .. } => {
				assert!(retry_after > Duration::ZERO);
				assert!(retry_after <= WINDOW);
			},
			other => panic!("Expected Throttled, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn wait_policy_sleeps_until_the_window_frees_a_slot() {
		let limiter = limiter(3, AdmitPolicy::Wait);
		let identity = identity();
		let stale = OffsetDateTime::now_utc() - Duration::milliseconds(59_500);

		limiter.seed_window(&identity, [stale, stale, stale]);

		let started = std::time::Instant::now();
		let outcome =
			limiter.admit(&identity).await.expect("Waiting admission should succeed eventually.");

		assert!(started.elapsed() >= std::time::Duration::from_millis(300));
		assert!(outcome.waited > Duration::ZERO);
		// The stale seeds aged out during the wait; only the fresh admission remains.
		assert_eq!(limiter.window_len(&identity), 1);
	}

	#[tokio::test]
	async fn zero_limit_always_throttles() {
		let limiter = limiter(0, AdmitPolicy::Wait);

		assert!(matches!(
			limiter.admit(&identity()).await,
			Err(Error::Throttled { .. })
		));
	}

	#[tokio::test]
	async fn config_updates_apply_to_subsequent_admissions() {
		let limiter = limiter(1, AdmitPolicy::Reject);
		let identity = identity();

		limiter.admit(&identity).await.expect("First admission should succeed.");
		assert!(limiter.admit(&identity).await.is_err());

		limiter
			.config
			.write()
			.apply(SecurityConfigPatch::default().with_max_requests_per_minute(10));

		limiter.admit(&identity).await.expect("Raised limit should admit again.");
	}

	#[tokio::test]
	async fn purge_idle_drops_expired_windows() {
		let limiter = limiter(5, AdmitPolicy::Wait);
		let identity = identity();
		let stale = OffsetDateTime::now_utc() - Duration::minutes(5);

		limiter.seed_window(&identity, [stale]);
		limiter.purge_idle();

		assert_eq!(limiter.window_len(&identity), 0);
	}
}
