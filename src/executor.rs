//! Retry-aware request execution with exponential backoff and cancellation.
//!
//! The executor owns the per-attempt policy: each attempt runs under
//! [`RetryPolicy::timeout`], 429 responses honor a server-supplied Retry-After before
//! falling back to `base_delay * 2^attempt`, 5xx and transport failures back off the
//! same way, and any other 4xx fails immediately. Every attempt (success, failure,
//! or abort) is recorded against the shared [`UsageMonitor`] under the call's
//! correlation id.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use tokio::{sync::Notify, time};
// self
use crate::{
	_prelude::*,
	context::{CorrelationId, HttpMethod, Identity},
	error::{AttemptError, TransportError},
	http::{ApiRequest, ApiResponse, GatewayHttpClient},
	usage::{AttemptOutcome, UsageLogEntry, UsageMonitor},
};

const STATUS_TOO_MANY_REQUESTS: u16 = 429;
const BODY_EXCERPT_LEN: usize = 2_048;

/// Retry budget and pacing applied to every outbound call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Maximum number of attempts (minimum 1).
	pub max_attempts: u32,
	/// Base delay doubled on every retry.
	pub base_delay: Duration,
	/// Per-attempt timeout.
	pub timeout: Duration,
}
impl RetryPolicy {
	/// Overrides the attempt budget.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}

	/// Overrides the base backoff delay.
	pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
		self.base_delay = base_delay;

		self
	}

	/// Overrides the per-attempt timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Effective backoff before retrying attempt `attempt` (0-indexed): `base * 2^attempt`.
	pub fn backoff_delay(&self, attempt: u32) -> Duration {
		let factor = 2_i32.checked_pow(attempt).unwrap_or(i32::MAX);

		self.base_delay.checked_mul(factor).unwrap_or(Duration::MAX)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::milliseconds(500),
			timeout: Duration::seconds(30),
		}
	}
}

/// Cooperative cancellation handle shared between a caller and in-flight calls.
///
/// Cancelling aborts the current attempt (or backoff pause) and surfaces
/// [`Error::Cancelled`], which callers can distinguish from a per-attempt timeout.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<CancelInner>);
impl CancelToken {
	/// Creates a token in the non-cancelled state.
	pub fn new() -> Self {
		Self::default()
	}

	/// Flips the token; every pending and future wait resolves immediately.
	pub fn cancel(&self) {
		self.0.cancelled.store(true, Ordering::SeqCst);
		self.0.notify.notify_waiters();
	}

	/// Whether the token has been cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.0.cancelled.load(Ordering::SeqCst)
	}

	/// Resolves once the token is cancelled.
	pub async fn cancelled(&self) {
		loop {
			if self.is_cancelled() {
				return;
			}

			let notified = self.0.notify.notified();

			if self.is_cancelled() {
				return;
			}

			notified.await;
		}
	}
}

#[derive(Debug, Default)]
struct CancelInner {
	cancelled: AtomicBool,
	notify: Notify,
}

/// Identifying metadata recorded with every attempt of one call.
#[derive(Clone, Debug)]
pub struct CallMeta {
	/// Correlation identifier shared by all attempts.
	pub correlation_id: CorrelationId,
	/// Caller identity behind the call.
	pub identity: Identity,
	/// Logical endpoint targeted by the call.
	pub endpoint: String,
	/// HTTP method of the call.
	pub method: HttpMethod,
}

/// Executes requests against a transport with bounded, status-aware retries.
pub struct RetryingExecutor {
	transport: Arc<dyn GatewayHttpClient>,
	monitor: Arc<UsageMonitor>,
	policy: RetryPolicy,
}
impl RetryingExecutor {
	/// Creates an executor over the provided transport, monitor, and policy.
	pub fn new(
		transport: Arc<dyn GatewayHttpClient>,
		monitor: Arc<UsageMonitor>,
		policy: RetryPolicy,
	) -> Self {
		Self { transport, monitor, policy }
	}

	/// The policy this executor applies.
	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Runs the request until success, a fatal response, cancellation, or exhaustion.
	pub async fn execute(
		&self,
		request: ApiRequest,
		meta: &CallMeta,
		cancel: Option<&CancelToken>,
	) -> Result<ApiResponse> {
		let max_attempts = self.policy.max_attempts.max(1);
		let mut attempts: Vec<AttemptError> = Vec::new();

		for attempt in 0..max_attempts {
			let started = OffsetDateTime::now_utc();

			match self.attempt(request.clone(), cancel).await {
				AttemptResult::Cancelled => {
					self.record(meta, started, None, AttemptOutcome::Aborted);

					return Err(Error::Cancelled);
				},
				AttemptResult::TimedOut => {
					self.record(meta, started, None, AttemptOutcome::TimedOut);
					attempts.push(AttemptError::TimedOut { timeout: self.policy.timeout });
				},
				AttemptResult::Transport(error) => {
					self.record(meta, started, None, AttemptOutcome::TransportFailed);
					attempts.push(AttemptError::Transport(error));
				},
				AttemptResult::Response(response) => {
					self.record(meta, started, Some(response.status), AttemptOutcome::Completed);

					if response.is_success() {
						return Ok(response);
					}
					if response.status == STATUS_TOO_MANY_REQUESTS {
						attempts
							.push(AttemptError::RateLimited { retry_after: response.retry_after });
					} else if response.is_server_error() {
						attempts.push(AttemptError::Server { status: response.status });
					} else {
						return Err(Error::Client {
							status: response.status,
							body: body_excerpt(&response.body),
						});
					}
				},
			}

			if attempt + 1 < max_attempts {
				self.pause(retry_delay(&self.policy, attempt, attempts.last()), cancel).await?;
			}
		}

		Err(Error::Exhausted { attempts })
	}

	async fn attempt(&self, request: ApiRequest, cancel: Option<&CancelToken>) -> AttemptResult {
		let call = time::timeout(std_duration(self.policy.timeout), self.transport.execute(request));

		match cancel {
			Some(token) => tokio::select! {
				biased;
				() = token.cancelled() => AttemptResult::Cancelled,
				outcome = call => AttemptResult::from_timeout(outcome),
			},
			None => AttemptResult::from_timeout(call.await),
		}
	}

	async fn pause(&self, delay: Duration, cancel: Option<&CancelToken>) -> Result<()> {
		match cancel {
			Some(token) => tokio::select! {
				biased;
				() = token.cancelled() => Err(Error::Cancelled),
				() = time::sleep(std_duration(delay)) => Ok(()),
			},
			None => {
				time::sleep(std_duration(delay)).await;

				Ok(())
			},
		}
	}

	fn record(
		&self,
		meta: &CallMeta,
		started: OffsetDateTime,
		status: Option<u16>,
		outcome: AttemptOutcome,
	) {
		let finished = OffsetDateTime::now_utc();

		self.monitor.record(UsageLogEntry {
			correlation_id: meta.correlation_id.as_str().to_owned(),
			endpoint: meta.endpoint.clone(),
			method: meta.method,
			status,
			duration: finished - started,
			timestamp: finished,
			identity: meta.identity.clone(),
			outcome,
		});
	}
}
impl Debug for RetryingExecutor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RetryingExecutor").field("policy", &self.policy).finish()
	}
}

enum AttemptResult {
	Response(ApiResponse),
	Transport(TransportError),
	TimedOut,
	Cancelled,
}
impl AttemptResult {
	fn from_timeout(
		outcome: Result<Result<ApiResponse, TransportError>, time::error::Elapsed>,
	) -> Self {
		match outcome {
			Ok(Ok(response)) => Self::Response(response),
			Ok(Err(error)) => Self::Transport(error),
			Err(_) => Self::TimedOut,
		}
	}
}

// A 429 with a Retry-After hint follows the server's pacing; everything else doubles
// the base delay per attempt.
fn retry_delay(policy: &RetryPolicy, attempt: u32, last: Option<&AttemptError>) -> Duration {
	match last {
		Some(AttemptError::RateLimited { retry_after: Some(delay) }) => *delay,
		_ => policy.backoff_delay(attempt),
	}
}

fn std_duration(duration: Duration) -> std::time::Duration {
	std::time::Duration::try_from(duration).unwrap_or_default()
}

fn body_excerpt(body: &[u8]) -> String {
	let mut excerpt = String::from_utf8_lossy(body).into_owned();

	excerpt.truncate(BODY_EXCERPT_LEN);

	excerpt
}
