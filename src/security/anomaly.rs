//! Rule-based anomaly detection over request contexts.
//!
//! [`AnomalyDetector::evaluate`] is synchronous and side-effect-free apart from its
//! frequency bookkeeping, which tracks sliding windows keyed `identity:endpoint`:
//! a per-endpoint hot-spot is an anomaly in its own right, distinct from the
//! identity-wide rate limiting in [`crate::rate_limit`]. Detected anomalies fan out
//! to every registered [`AlertSink`] in registration order; one sink's failure never
//! prevents the others from running.

// self
use crate::{
	_prelude::*,
	config::SecurityConfig,
	context::RequestContext,
	obs,
	security::net,
};

const MINUTE: Duration = Duration::minutes(1);
const HOUR: Duration = Duration::hours(1);

/// Anomaly severity, totally ordered from [`Severity::Low`] to [`Severity::Critical`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
	/// Informational finding.
	Low,
	/// Worth reviewing.
	Medium,
	/// Triggers alert forwarding and block-listing.
	High,
	/// Reserved for the most severe findings.
	Critical,
}
impl Severity {
	/// Returns the stable upper-case label used in alert payloads.
	pub const fn as_str(self) -> &'static str {
		match self {
			Severity::Low => "LOW",
			Severity::Medium => "MEDIUM",
			Severity::High => "HIGH",
			Severity::Critical => "CRITICAL",
		}
	}
}
impl Display for Severity {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Classified anomaly kinds emitted by the detector's rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
	/// Per-endpoint request frequency exceeded a threshold.
	HighFrequency,
	/// Identity failed the network allow-list check.
	UnauthorizedIdentity,
	/// Activity outside the configured business hours.
	OffHours,
	/// Endpoint matched a suspicious pattern.
	SuspiciousPattern,
	/// Client identifier missing or matching a blocked substring.
	InvalidClientId,
}
impl AnomalyKind {
	/// Returns the stable upper-case label used in alert payloads.
	pub const fn as_str(self) -> &'static str {
		match self {
			AnomalyKind::HighFrequency => "HIGH_FREQUENCY",
			AnomalyKind::UnauthorizedIdentity => "UNAUTHORIZED_IDENTITY",
			AnomalyKind::OffHours => "OFF_HOURS",
			AnomalyKind::SuspiciousPattern => "SUSPICIOUS_PATTERN",
			AnomalyKind::InvalidClientId => "INVALID_CLIENT_ID",
		}
	}
}
impl Display for AnomalyKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// One detected deviation from expected request behavior.
///
/// Anomalies are ephemeral: produced, dispatched to sinks, and discarded.
#[derive(Clone, Debug)]
pub struct SecurityAnomaly {
	/// Classified anomaly kind.
	pub kind: AnomalyKind,
	/// Severity of the finding.
	pub severity: Severity,
	/// Human-readable description.
	pub message: String,
	/// Context of the triggering request.
	pub context: RequestContext,
}

/// Pre-flight rejection raised when a request trips a high-severity rule.
#[derive(Debug, ThisError)]
#[error("Request blocked by security policy; {} anomaly(ies) detected.", anomalies.len())]
pub struct SecurityViolation {
	/// Every anomaly the request produced, high-severity or not.
	pub anomalies: Vec<SecurityAnomaly>,
}
impl SecurityViolation {
	/// Highest severity across the attached anomalies.
	pub fn max_severity(&self) -> Option<Severity> {
		self.anomalies.iter().map(|anomaly| anomaly.severity).max()
	}
}

/// Error surfaced by an [`AlertSink`] delivery.
#[derive(Debug, ThisError)]
pub enum AlertError {
	/// Forwarding to an external channel failed.
	#[error(transparent)]
	Transport(#[from] crate::error::TransportError),

	/// Sink-specific failure.
	#[error("Alert sink failed: {message}.")]
	Sink {
		/// Sink-supplied failure description.
		message: String,
	},
}

/// Boxed future returned by [`AlertSink::on_anomaly`].
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AlertError>> + 'a + Send>>;

/// Observer notified of every detected anomaly.
pub trait AlertSink
where
	Self: Send + Sync,
{
	/// Consumes one anomaly; failures are isolated and logged by the dispatcher loop.
	fn on_anomaly<'a>(&'a self, anomaly: &'a SecurityAnomaly) -> SinkFuture<'a>;
}

/// Rule-based detector with per-`identity:endpoint` frequency windows.
///
/// The frequency map is owned exclusively by the detector and only mutated here.
pub struct AnomalyDetector {
	config: Arc<RwLock<SecurityConfig>>,
	windows: Mutex<HashMap<String, VecDeque<OffsetDateTime>>>,
	sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
}
impl AnomalyDetector {
	/// Creates a detector reading rules from the shared configuration.
	pub fn new(config: Arc<RwLock<SecurityConfig>>) -> Self {
		Self {
			config,
			windows: Mutex::new(HashMap::new()),
			sinks: RwLock::new(Vec::new()),
		}
	}

	/// Registers an observer; sinks run in registration order during dispatch.
	pub fn register_sink(&self, sink: Arc<dyn AlertSink>) {
		self.sinks.write().push(sink);
	}

	/// Evaluates every enabled rule against the context.
	///
	/// Rules fire independently; a single request may yield several anomalies of
	/// different kinds and severities.
	pub fn evaluate(&self, context: &RequestContext) -> Vec<SecurityAnomaly> {
		let config = self.config.read().clone();
		let mut anomalies = Vec::new();
		let (minute_count, hour_count) = self.bump_frequency(context);

		if minute_count > config.max_requests_per_minute {
			anomalies.push(anomaly(
				AnomalyKind::HighFrequency,
				Severity::High,
				format!(
					"{minute_count} requests to {} within a minute (limit {}).",
					context.endpoint, config.max_requests_per_minute,
				),
				context,
			));
		}
		if hour_count > config.max_requests_per_hour {
			anomalies.push(anomaly(
				AnomalyKind::HighFrequency,
				Severity::Medium,
				format!(
					"{hour_count} requests to {} within an hour (limit {}).",
					context.endpoint, config.max_requests_per_hour,
				),
				context,
			));
		}
		if config.ip_restriction_enabled
			&& !net::any_contains(&config.allowed_networks, context.identity.as_str())
		{
			anomalies.push(anomaly(
				AnomalyKind::UnauthorizedIdentity,
				Severity::High,
				format!("Identity {} is outside the allow-listed networks.", context.identity),
				context,
			));
		}
		if config.off_hours_alerting_enabled
			&& !config.business_hours.contains(context.observed_at.hour())
		{
			anomalies.push(anomaly(
				AnomalyKind::OffHours,
				Severity::Medium,
				format!(
					"Activity at hour {} outside business hours [{}, {}).",
					context.observed_at.hour(),
					config.business_hours.start,
					config.business_hours.end,
				),
				context,
			));
		}

		let endpoint = context.endpoint.to_lowercase();

		if let Some(pattern) = config
			.suspicious_patterns
			.iter()
			.find(|pattern| endpoint.contains(&pattern.to_lowercase()))
		{
			anomalies.push(anomaly(
				AnomalyKind::SuspiciousPattern,
				Severity::High,
				format!("Endpoint {} matches suspicious pattern `{pattern}`.", context.endpoint),
				context,
			));
		}

		match &context.client_id {
			None => anomalies.push(anomaly(
				AnomalyKind::InvalidClientId,
				Severity::Medium,
				"Request carries no client identifier.".into(),
				context,
			)),
			Some(client_id) =>
				if let Some(blocked) =
					config.blocked_client_ids.iter().find(|blocked| client_id.contains(*blocked))
				{
					anomalies.push(anomaly(
						AnomalyKind::InvalidClientId,
						Severity::High,
						format!("Client identifier matches blocked entry `{blocked}`."),
						context,
					));
				},
		}

		anomalies
	}

	/// Fans anomalies out to every registered sink, isolating per-sink failures.
	pub async fn dispatch(&self, anomalies: &[SecurityAnomaly]) {
		let sinks = self.sinks.read().clone();

		for anomaly in anomalies {
			for sink in &sinks {
				if let Err(error) = sink.on_anomaly(anomaly).await {
					obs::note_swallowed("alert_sink", &error);
				}
			}
		}
	}

	// Appends `observed_at` to the context's frequency window and returns the
	// (trailing-minute, trailing-hour) counts including the current request.
	fn bump_frequency(&self, context: &RequestContext) -> (u32, u32) {
		let key = format!("{}:{}", context.identity, context.endpoint);
		let mut windows = self.windows.lock();
		let window = windows.entry(key).or_default();
		let now = context.observed_at;
		let now = window.back().map_or(now, |latest| now.max(*latest));

		while window.front().is_some_and(|oldest| now - *oldest >= HOUR) {
			window.pop_front();
		}

		window.push_back(now);

		let minute_count =
			window.iter().rev().take_while(|stamp| now - **stamp < MINUTE).count() as u32;

		(minute_count, window.len() as u32)
	}
}
impl Debug for AnomalyDetector {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AnomalyDetector")
			.field("tracked_keys", &self.windows.lock().len())
			.field("sinks", &self.sinks.read().len())
			.finish()
	}
}

fn anomaly(
	kind: AnomalyKind,
	severity: Severity,
	message: String,
	context: &RequestContext,
) -> SecurityAnomaly {
	SecurityAnomaly { kind, severity, message, context: context.clone() }
}
