//! Security policy configuration: thresholds, allow-lists, toggles, and webhooks.
//!
//! A [`SecurityConfig`] is loaded once at construction (programmatically or from
//! environment-style key/value pairs) and afterwards changes only through an explicit
//! [`SecurityConfig::apply`] of a [`SecurityConfigPatch`]; there is no implicit reload.

// std
use std::env;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, error::ConfigError, security::net::NetworkRange};

/// Environment key listing allow-listed networks (comma-separated literals/CIDRs).
pub const ENV_ALLOWED_NETWORKS: &str = "APIWARDEN_ALLOWED_NETWORKS";
/// Environment key for the per-minute request ceiling.
pub const ENV_MAX_REQUESTS_PER_MINUTE: &str = "APIWARDEN_MAX_REQUESTS_PER_MINUTE";
/// Environment key toggling the network allow-list rule.
pub const ENV_IP_RESTRICTION_ENABLED: &str = "APIWARDEN_IP_RESTRICTION_ENABLED";
/// Environment key for the operational monitoring webhook URL.
pub const ENV_MONITORING_WEBHOOK: &str = "APIWARDEN_MONITORING_WEBHOOK";
/// Environment key for the security alert webhook URL.
pub const ENV_SECURITY_WEBHOOK: &str = "APIWARDEN_SECURITY_WEBHOOK";

const DEFAULT_SUSPICIOUS_PATTERNS: &[&str] =
	&["/admin", "/internal", "../", "<script", "union select"];

/// Pre-provisioned upstream API credential.
///
/// The raw secret is only reachable through [`expose`](Self::expose); `Debug` prints a
/// SHA-256 fingerprint so credentials never leak into logs or panic messages.
#[derive(Clone)]
pub struct Credential(String);
impl Credential {
	/// Wraps a credential after rejecting empty values.
	pub fn new(secret: impl Into<String>) -> Result<Self, ConfigError> {
		let secret = secret.into();

		if secret.trim().is_empty() {
			return Err(ConfigError::MissingCredential);
		}

		Ok(Self(secret))
	}

	/// Returns the raw secret for request signing.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Stable fingerprint of the secret: base64 (no padding) of its SHA-256 digest.
	pub fn fingerprint(&self) -> String {
		let mut hasher = Sha256::new();

		hasher.update(self.0.as_bytes());

		STANDARD_NO_PAD.encode(hasher.finalize())
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Credential(sha256:{})", self.fingerprint())
	}
}

/// Policy applied when an identity exceeds its per-minute admission budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdmitPolicy {
	/// Sleep until the sliding window frees a slot, then admit.
	#[default]
	Wait,
	/// Reject immediately with the remaining wait attached.
	Reject,
}

/// Local business-hours window `[start, end)` in hour-of-day.
///
/// Windows may wrap midnight (`start > end`), e.g. `[22, 6)` for a night shift.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
	/// Opening hour (inclusive), 0..=23.
	pub start: u8,
	/// Closing hour (exclusive), 0..=23.
	pub end: u8,
}
impl BusinessHours {
	/// Builds a window after validating both hours.
	pub fn new(start: u8, end: u8) -> Result<Self, ConfigError> {
		if start > 23 || end > 23 || start == end {
			return Err(ConfigError::InvalidBusinessHours { start, end });
		}

		Ok(Self { start, end })
	}

	/// Tests whether the provided hour falls inside the window.
	pub fn contains(&self, hour: u8) -> bool {
		if self.start < self.end {
			(self.start..self.end).contains(&hour)
		} else {
			hour >= self.start || hour < self.end
		}
	}
}
impl Default for BusinessHours {
	fn default() -> Self {
		Self { start: 8, end: 20 }
	}
}

/// Security policy evaluated on every outbound call.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
	/// Per-minute request ceiling, shared by the rate limiter and the frequency rule.
	pub max_requests_per_minute: u32,
	/// Per-hour request ceiling used by the frequency rule.
	pub max_requests_per_hour: u32,
	/// Allow-listed identities (literal addresses/keys and IPv4 CIDR ranges).
	pub allowed_networks: Vec<NetworkRange>,
	/// Expected business-hours window for caller activity.
	pub business_hours: BusinessHours,
	/// Substrings that disqualify a caller-supplied client identifier.
	pub blocked_client_ids: Vec<String>,
	/// Case-insensitive endpoint substrings treated as suspicious.
	pub suspicious_patterns: Vec<String>,
	/// Enables the network allow-list rule.
	pub ip_restriction_enabled: bool,
	/// Enables the off-hours rule.
	pub off_hours_alerting_enabled: bool,
	/// Admission behavior once the per-minute window is full.
	pub admit_policy: AdmitPolicy,
	/// How long a high-severity offender stays on the block-list.
	pub block_duration: Duration,
	/// Operational monitoring webhook, if configured.
	pub monitoring_webhook: Option<Url>,
	/// Security alert webhook, if configured.
	pub security_webhook: Option<Url>,
	/// Number of endpoints reported by usage aggregation.
	pub top_endpoints: usize,
}
impl SecurityConfig {
	/// Loads recognized options from the process environment on top of defaults.
	pub fn from_env() -> Result<Self, ConfigError> {
		let vars: HashMap<String, String> = env::vars().collect();

		Self::from_env_map(&vars)
	}

	/// Loads recognized options from an environment-style map on top of defaults.
	///
	/// Unrecognized keys are ignored; recognized keys with unparseable values fail
	/// loudly instead of silently falling back to defaults.
	pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
		let mut config = Self::default();

		if let Some(raw) = non_empty(vars, ENV_ALLOWED_NETWORKS) {
			config.allowed_networks = raw
				.split(',')
				.map(|entry| NetworkRange::parse(entry.trim()))
				.collect::<Result<Vec<_>, _>>()?;
		}
		if let Some(raw) = non_empty(vars, ENV_MAX_REQUESTS_PER_MINUTE) {
			config.max_requests_per_minute = raw.parse().map_err(|_| {
				ConfigError::InvalidOption {
					key: ENV_MAX_REQUESTS_PER_MINUTE.into(),
					value: raw.to_owned(),
				}
			})?;
		}
		if let Some(raw) = non_empty(vars, ENV_IP_RESTRICTION_ENABLED) {
			config.ip_restriction_enabled = parse_bool(ENV_IP_RESTRICTION_ENABLED, raw)?;
		}
		if let Some(raw) = non_empty(vars, ENV_MONITORING_WEBHOOK) {
			config.monitoring_webhook = Some(parse_webhook(raw)?);
		}
		if let Some(raw) = non_empty(vars, ENV_SECURITY_WEBHOOK) {
			config.security_webhook = Some(parse_webhook(raw)?);
		}

		Ok(config)
	}

	/// Merges a partial update into this configuration; unspecified fields are unchanged.
	pub fn apply(&mut self, patch: SecurityConfigPatch) {
		let SecurityConfigPatch {
			max_requests_per_minute,
			max_requests_per_hour,
			allowed_networks,
			business_hours,
			blocked_client_ids,
			suspicious_patterns,
			ip_restriction_enabled,
			off_hours_alerting_enabled,
			admit_policy,
			block_duration,
			monitoring_webhook,
			security_webhook,
		} = patch;

		if let Some(value) = max_requests_per_minute {
			self.max_requests_per_minute = value;
		}
		if let Some(value) = max_requests_per_hour {
			self.max_requests_per_hour = value;
		}
		if let Some(value) = allowed_networks {
			self.allowed_networks = value;
		}
		if let Some(value) = business_hours {
			self.business_hours = value;
		}
		if let Some(value) = blocked_client_ids {
			self.blocked_client_ids = value;
		}
		if let Some(value) = suspicious_patterns {
			self.suspicious_patterns = value;
		}
		if let Some(value) = ip_restriction_enabled {
			self.ip_restriction_enabled = value;
		}
		if let Some(value) = off_hours_alerting_enabled {
			self.off_hours_alerting_enabled = value;
		}
		if let Some(value) = admit_policy {
			self.admit_policy = value;
		}
		if let Some(value) = block_duration {
			self.block_duration = value;
		}
		if let Some(value) = monitoring_webhook {
			self.monitoring_webhook = value;
		}
		if let Some(value) = security_webhook {
			self.security_webhook = value;
		}
	}
}
impl Default for SecurityConfig {
	fn default() -> Self {
		Self {
			max_requests_per_minute: 30,
			max_requests_per_hour: 500,
			allowed_networks: Vec::new(),
			business_hours: BusinessHours::default(),
			blocked_client_ids: Vec::new(),
			suspicious_patterns: DEFAULT_SUSPICIOUS_PATTERNS
				.iter()
				.map(|pattern| (*pattern).to_owned())
				.collect(),
			ip_restriction_enabled: false,
			off_hours_alerting_enabled: true,
			admit_policy: AdmitPolicy::default(),
			block_duration: Duration::hours(1),
			monitoring_webhook: None,
			security_webhook: None,
			top_endpoints: 5,
		}
	}
}

/// Partial [`SecurityConfig`] update; `None` fields leave the current value untouched.
#[derive(Clone, Debug, Default)]
pub struct SecurityConfigPatch {
	/// New per-minute ceiling.
	pub max_requests_per_minute: Option<u32>,
	/// New per-hour ceiling.
	pub max_requests_per_hour: Option<u32>,
	/// Replacement allow-list.
	pub allowed_networks: Option<Vec<NetworkRange>>,
	/// Replacement business-hours window.
	pub business_hours: Option<BusinessHours>,
	/// Replacement blocked client-identifier substrings.
	pub blocked_client_ids: Option<Vec<String>>,
	/// Replacement suspicious endpoint substrings.
	pub suspicious_patterns: Option<Vec<String>>,
	/// New allow-list toggle state.
	pub ip_restriction_enabled: Option<bool>,
	/// New off-hours toggle state.
	pub off_hours_alerting_enabled: Option<bool>,
	/// New admission policy.
	pub admit_policy: Option<AdmitPolicy>,
	/// New block-list expiry duration.
	pub block_duration: Option<Duration>,
	/// New monitoring webhook (`Some(None)` clears it).
	pub monitoring_webhook: Option<Option<Url>>,
	/// New security webhook (`Some(None)` clears it).
	pub security_webhook: Option<Option<Url>>,
}
impl SecurityConfigPatch {
	/// Sets the per-minute ceiling.
	pub fn with_max_requests_per_minute(mut self, value: u32) -> Self {
		self.max_requests_per_minute = Some(value);

		self
	}

	/// Sets the admission policy.
	pub fn with_admit_policy(mut self, value: AdmitPolicy) -> Self {
		self.admit_policy = Some(value);

		self
	}
}

fn non_empty<'m>(vars: &'m HashMap<String, String>, key: &str) -> Option<&'m str> {
	vars.get(key).map(String::as_str).filter(|raw| !raw.trim().is_empty())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(ConfigError::InvalidOption { key: key.into(), value: raw.to_owned() }),
	}
}

fn parse_webhook(raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw.trim())
		.map_err(|source| ConfigError::InvalidWebhook { value: raw.to_owned(), source })
}
