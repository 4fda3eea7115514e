//! Gateway-level error types shared across admission, security, and transport layers.

// self
use crate::_prelude::*;

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gateway error exposed by public APIs.
///
/// Variants are grouped by how callers should react: [`Error::Config`] and
/// [`Error::Security`] surface immediately and are never retried, while transport
/// and upstream failures are retried locally by the executor before the final
/// [`Error::Exhausted`] carries the full attempt history back to the caller.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Request blocked before dispatch by anomaly detection.
	#[error(transparent)]
	Security(#[from] crate::security::anomaly::SecurityViolation),
	/// Transport failure (DNS, TCP, TLS) outside the retried request path.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Identity sits on the temporary block-list.
	#[error("Identity `{identity}` is blocked until {until}.")]
	Blocked {
		/// Blocked caller identity.
		identity: String,
		/// Instant the block expires.
		until: OffsetDateTime,
	},
	/// Admission was rejected by the local rate limiter.
	#[error("Rate limit for `{identity}` exceeded; retry after {retry_after}.")]
	Throttled {
		/// Throttled caller identity.
		identity: String,
		/// Remaining wait before the window frees a slot.
		retry_after: Duration,
	},
	/// Upstream rejected the request with a non-retryable client error.
	#[error("Upstream rejected the request with status {status}.")]
	Client {
		/// HTTP status code returned by the upstream API.
		status: u16,
		/// Response body excerpt retained for diagnostics.
		body: String,
	},
	/// Retry budget exhausted without a successful response.
	#[error("Retry budget exhausted after {} attempt(s).", attempts.len())]
	Exhausted {
		/// Per-attempt failures in execution order.
		attempts: Vec<AttemptError>,
	},
	/// Upstream returned a body that could not be parsed as JSON.
	#[error("Upstream returned a malformed JSON body (status {status}).")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the malformed response.
		status: u16,
	},
	/// The caller cancelled the request.
	#[error("Request was cancelled by the caller.")]
	Cancelled,
}

/// Failure recorded for a single executor attempt.
#[derive(Debug, ThisError)]
pub enum AttemptError {
	/// Transport-level failure; retryable.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Upstream asked to slow down (HTTP 429); retryable with server-guided delay.
	#[error("Upstream rate limited the request (429).")]
	RateLimited {
		/// Retry-After hint supplied by the upstream, if any.
		retry_after: Option<Duration>,
	},
	/// Upstream server failure (HTTP 5xx); retryable.
	#[error("Upstream returned server error {status}.")]
	Server {
		/// HTTP status code returned by the upstream API.
		status: u16,
	},
	/// The attempt exceeded the per-attempt timeout; retryable.
	#[error("Attempt timed out after {timeout}.")]
	TimedOut {
		/// Per-attempt timeout that elapsed.
		timeout: Duration,
	},
}

/// Configuration and validation failures raised at construction time.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// API credential is missing or empty.
	#[error("API credential is missing.")]
	MissingCredential,
	/// Base URL cannot be parsed.
	#[error("Base URL is invalid.")]
	InvalidBaseUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Base URL cannot carry path segments (e.g. `data:` or `mailto:`).
	#[error("Base URL cannot be extended with path segments.")]
	OpaqueBaseUrl,
	/// Webhook URL cannot be parsed.
	#[error("Webhook URL `{value}` is invalid.")]
	InvalidWebhook {
		/// Offending raw value.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Allow-listed network entry cannot be parsed.
	#[error("Allow-listed network entry is invalid.")]
	InvalidNetwork(#[from] crate::security::net::NetworkParseError),
	/// Business-hours window is out of range.
	#[error("Business hours [{start}, {end}) are invalid.")]
	InvalidBusinessHours {
		/// Requested opening hour.
		start: u8,
		/// Requested closing hour.
		end: u8,
	},
	/// Numeric or boolean option carries an unparseable value.
	#[error("Configuration option `{key}` has an invalid value `{value}`.")]
	InvalidOption {
		/// Environment-style option key.
		key: String,
		/// Offending raw value.
		value: String,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the upstream API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the upstream API.")]
	Io(#[from] std::io::Error),
	/// Request could not be constructed before dispatch.
	#[error("Request could not be constructed.")]
	InvalidRequest {
		/// Transport-specific build failure.
		#[source]
		source: BoxError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Wraps a transport-specific request construction error.
	pub fn invalid_request(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::InvalidRequest { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_builder() { Self::invalid_request(e) } else { Self::network(e) }
	}
}
