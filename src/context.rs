//! Strongly typed request metadata attached to every outbound call.

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::_prelude::*;

const IDENTITY_MAX_LEN: usize = 128;
const CORRELATION_ID_LEN: usize = 16;

/// Error returned when identity validation fails.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentityError {
	/// The identity was empty.
	#[error("Identity cannot be empty.")]
	Empty,
	/// The identity contains whitespace characters.
	#[error("Identity contains whitespace.")]
	ContainsWhitespace,
	/// The identity exceeded the allowed character count.
	#[error("Identity exceeds {max} characters.")]
	TooLong {
		/// Maximum permitted character count.
		max: usize,
	},
}

/// Caller identity used for admission control and block-listing.
///
/// Typically an IP address, but any non-empty whitespace-free key (an API key id,
/// a tenant slug) is accepted; only the anomaly detector's network allow-list rule
/// interprets the value as an address.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);
impl Identity {
	/// Creates a new identity after validation.
	pub fn new(value: impl AsRef<str>) -> Result<Self, IdentityError> {
		let view = value.as_ref();

		validate_identity(view)?;

		Ok(Self(view.to_owned()))
	}

	/// Returns the underlying string view.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for Identity {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl From<Identity> for String {
	fn from(value: Identity) -> Self {
		value.0
	}
}
impl TryFrom<String> for Identity {
	type Error = IdentityError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		validate_identity(&value)?;

		Ok(Self(value))
	}
}
impl FromStr for Identity {
	type Err = IdentityError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl Debug for Identity {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Identity({})", self.0)
	}
}
impl Display for Identity {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

fn validate_identity(view: &str) -> Result<(), IdentityError> {
	if view.is_empty() {
		return Err(IdentityError::Empty);
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentityError::ContainsWhitespace);
	}
	if view.len() > IDENTITY_MAX_LEN {
		return Err(IdentityError::TooLong { max: IDENTITY_MAX_LEN });
	}

	Ok(())
}

/// HTTP method carried by a [`RequestContext`] and the transport layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HttpMethod {
	/// HTTP GET.
	#[default]
	Get,
	/// HTTP POST.
	Post,
	/// HTTP PUT.
	Put,
	/// HTTP PATCH.
	Patch,
	/// HTTP DELETE.
	Delete,
}
impl HttpMethod {
	/// Returns the canonical upper-case method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			HttpMethod::Get => "GET",
			HttpMethod::Post => "POST",
			HttpMethod::Put => "PUT",
			HttpMethod::Patch => "PATCH",
			HttpMethod::Delete => "DELETE",
		}
	}
}
impl Display for HttpMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Per-request correlation identifier attached to outbound calls and usage entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);
impl CorrelationId {
	/// Generates a fresh random identifier.
	pub fn generate() -> Self {
		Self(rand::rng().sample_iter(Alphanumeric).take(CORRELATION_ID_LEN).map(char::from).collect())
	}

	/// Returns the underlying string view.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for CorrelationId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Immutable metadata describing one inbound call to the gateway.
#[derive(Clone, Debug)]
pub struct RequestContext {
	/// Caller identity (IP address or key).
	pub identity: Identity,
	/// Logical endpoint the caller targets.
	pub endpoint: String,
	/// HTTP method of the call.
	pub method: HttpMethod,
	/// Instant the gateway observed the call.
	pub observed_at: OffsetDateTime,
	/// Optional caller-supplied client identifier.
	pub client_id: Option<String>,
	/// Optional caller-supplied header bag forwarded upstream.
	pub headers: BTreeMap<String, String>,
}
impl RequestContext {
	/// Creates a new context for the given identity + endpoint pair.
	pub fn new(identity: Identity, endpoint: impl Into<String>) -> Self {
		Self {
			identity,
			endpoint: endpoint.into(),
			method: HttpMethod::Get,
			observed_at: OffsetDateTime::now_utc(),
			client_id: None,
			headers: BTreeMap::new(),
		}
	}

	/// Overrides the HTTP method.
	pub fn with_method(mut self, method: HttpMethod) -> Self {
		self.method = method;

		self
	}

	/// Attaches a caller-supplied client identifier.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Adds a caller-supplied header forwarded to the upstream API.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Overrides the timestamp associated with the observation.
	pub fn with_observed_at(mut self, instant: OffsetDateTime) -> Self {
		self.observed_at = instant;

		self
	}
}
