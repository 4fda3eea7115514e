//! Bounded in-memory usage log with on-demand aggregation.

// crates.io
use time::Time;
// self
use crate::{
	_prelude::*,
	context::{HttpMethod, Identity},
};

const DEFAULT_MAX_ENTRIES: usize = 10_000;
const ERROR_STATUS_FLOOR: u16 = 400;

/// Outcome label attached to each recorded attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
	/// The upstream answered with an HTTP status.
	Completed,
	/// The transport failed before a status was received.
	TransportFailed,
	/// The attempt exceeded its timeout.
	TimedOut,
	/// The caller cancelled the attempt mid-flight.
	Aborted,
}
impl AttemptOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			AttemptOutcome::Completed => "completed",
			AttemptOutcome::TransportFailed => "transport_failed",
			AttemptOutcome::TimedOut => "timed_out",
			AttemptOutcome::Aborted => "aborted",
		}
	}
}
impl Display for AttemptOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// One recorded request attempt.
#[derive(Clone, Debug)]
pub struct UsageLogEntry {
	/// Correlation identifier shared by all attempts of one call.
	pub correlation_id: String,
	/// Logical endpoint targeted by the call.
	pub endpoint: String,
	/// HTTP method of the call.
	pub method: HttpMethod,
	/// HTTP status, absent when the attempt never produced a response.
	pub status: Option<u16>,
	/// Wall-clock duration of the attempt.
	pub duration: Duration,
	/// Instant the attempt finished.
	pub timestamp: OffsetDateTime,
	/// Caller identity behind the call.
	pub identity: Identity,
	/// How the attempt ended.
	pub outcome: AttemptOutcome,
}
impl UsageLogEntry {
	/// Treats upstream 4xx/5xx and attempts without a status as errors.
	pub fn is_error(&self) -> bool {
		self.status.is_none_or(|status| status >= ERROR_STATUS_FLOOR)
	}
}

/// Time window accepted by [`UsageMonitor::report`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportWindow {
	/// Since midnight UTC of the current day.
	#[default]
	Today,
	/// Trailing seven days.
	LastWeek,
	/// Trailing thirty days.
	LastMonth,
}
impl ReportWindow {
	/// Earliest timestamp included by the window relative to `now`.
	pub fn since(self, now: OffsetDateTime) -> OffsetDateTime {
		match self {
			ReportWindow::Today => now.replace_time(Time::MIDNIGHT),
			ReportWindow::LastWeek => now - Duration::days(7),
			ReportWindow::LastMonth => now - Duration::days(30),
		}
	}
}
impl FromStr for ReportWindow {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"today" => Ok(ReportWindow::Today),
			"week" | "last-week" => Ok(ReportWindow::LastWeek),
			"month" | "last-month" => Ok(ReportWindow::LastMonth),
			other => Err(format!("Unsupported report window `{other}`.")),
		}
	}
}

/// Aggregate usage statistics derived from a windowed slice of the log.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
	/// Number of attempts inside the window.
	pub total_requests: u64,
	/// Share of attempts that errored, in `[0, 1]`.
	pub error_rate: f64,
	/// Mean attempt duration in milliseconds.
	pub average_response_time_ms: f64,
	/// Most frequently targeted endpoints, busiest first.
	pub top_endpoints: Vec<EndpointCount>,
}

/// Endpoint + request count pair inside a [`UsageReport`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointCount {
	/// Logical endpoint.
	pub endpoint: String,
	/// Number of attempts targeting it inside the window.
	pub count: u64,
}

/// Bounded, thread-safe request log with on-demand aggregation.
///
/// The log is owned exclusively by the monitor; recording never fails and never
/// propagates to the caller whose request produced the entry.
#[derive(Debug)]
pub struct UsageMonitor {
	log: Mutex<VecDeque<UsageLogEntry>>,
	max_entries: usize,
	top_endpoints: usize,
}
impl UsageMonitor {
	/// Creates a monitor bounded to `max_entries` (minimum 2).
	pub fn new(max_entries: usize, top_endpoints: usize) -> Self {
		Self {
			log: Mutex::new(VecDeque::new()),
			max_entries: max_entries.max(2),
			top_endpoints,
		}
	}

	/// Appends an entry, pruning the oldest half once the log grows past its bound.
	pub fn record(&self, entry: UsageLogEntry) {
		let mut log = self.log.lock();

		log.push_back(entry);

		if log.len() > self.max_entries {
			let keep = self.max_entries / 2;
			let drop = log.len() - keep;

			log.drain(..drop);
		}
	}

	/// Computes aggregate statistics over the window without mutating the log.
	pub fn report(&self, window: ReportWindow) -> UsageReport {
		let since = window.since(OffsetDateTime::now_utc());
		let log = self.log.lock();
		let mut total = 0_u64;
		let mut errors = 0_u64;
		let mut duration_ms = 0_f64;
		let mut per_endpoint: HashMap<&str, u64> = HashMap::new();

		for entry in log.iter().filter(|entry| entry.timestamp >= since) {
			total += 1;

			if entry.is_error() {
				errors += 1;
			}

			duration_ms += entry.duration.as_seconds_f64() * 1_000.0;
			*per_endpoint.entry(entry.endpoint.as_str()).or_default() += 1;
		}

		if total == 0 {
			return UsageReport::default();
		}

		let mut top_endpoints: Vec<EndpointCount> = per_endpoint
			.into_iter()
			.map(|(endpoint, count)| EndpointCount { endpoint: endpoint.to_owned(), count })
			.collect();

		top_endpoints.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.endpoint.cmp(&b.endpoint)));
		top_endpoints.truncate(self.top_endpoints);

		UsageReport {
			total_requests: total,
			error_rate: errors as f64 / total as f64,
			average_response_time_ms: duration_ms / total as f64,
			top_endpoints,
		}
	}

	/// Returns the `limit` most recent error entries, newest first.
	pub fn recent_errors(&self, limit: usize) -> Vec<UsageLogEntry> {
		self.log.lock().iter().rev().filter(|entry| entry.is_error()).take(limit).cloned().collect()
	}

	/// Current number of retained entries.
	pub fn len(&self) -> usize {
		self.log.lock().len()
	}

	/// Whether the log currently holds no entries.
	pub fn is_empty(&self) -> bool {
		self.log.lock().is_empty()
	}
}
impl Default for UsageMonitor {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_ENTRIES, 5)
	}
}
