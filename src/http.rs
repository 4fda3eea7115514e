//! Transport primitives for outbound gateway calls.
//!
//! [`GatewayHttpClient`] is the crate's only dependency on an HTTP stack: it executes
//! exactly one exchange per call, with no internal retries; backoff, timeouts, and
//! attempt accounting all live in [`crate::executor`]. The Retry-After hint is parsed
//! here so the executor can honor server-guided pacing without touching raw headers.

// std
use std::ops::Deref;
// crates.io
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, context::HttpMethod, error::TransportError};

/// Boxed future returned by [`GatewayHttpClient::execute`].
pub type HttpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP transports capable of executing one outbound exchange.
///
/// Implementations must be `Send + Sync + 'static` so one transport can back the
/// executor and the alert webhook forwarder behind a shared `Arc` without wrappers.
pub trait GatewayHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Executes one HTTP exchange and resolves to the raw response.
	fn execute(&self, request: ApiRequest) -> HttpFuture<'_, ApiResponse>;
}

/// One outbound HTTP request.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: HttpMethod,
	/// Fully resolved target URL.
	pub url: Url,
	/// Header name/value pairs attached to the request.
	pub headers: BTreeMap<String, String>,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
}
impl ApiRequest {
	/// Builds a GET request for the URL.
	pub fn get(url: Url) -> Self {
		Self { method: HttpMethod::Get, url, headers: BTreeMap::new(), body: None }
	}

	/// Builds a POST request for the URL.
	pub fn post(url: Url) -> Self {
		Self { method: HttpMethod::Post, url, headers: BTreeMap::new(), body: None }
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Attaches a request body.
	pub fn with_body(mut self, body: Vec<u8>) -> Self {
		self.body = Some(body);

		self
	}
}

/// One upstream HTTP response with its pacing metadata.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Retry-After hint expressed as a relative duration, if supplied.
	pub retry_after: Option<Duration>,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Whether the status falls in the 2xx success class.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Whether the status falls in the 5xx server-error class.
	pub fn is_server_error(&self) -> bool {
		(500..600).contains(&self.status)
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// The wrapped client is reused for upstream API calls and webhook forwarding;
/// connection pooling and TLS configuration stay with the caller-provided client.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestGatewayClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestGatewayClient {
	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestGatewayClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestGatewayClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl GatewayHttpClient for ReqwestGatewayClient {
	fn execute(&self, request: ApiRequest) -> HttpFuture<'_, ApiResponse> {
		let client = self.0.clone();

		Box::pin(async move {
			let mut builder = client.request(reqwest_method(request.method), request.url);

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await.map_err(TransportError::from)?;
			let status = response.status().as_u16();
			let retry_after = parse_retry_after(response.headers());
			let body = response.bytes().await.map_err(TransportError::from)?.to_vec();

			Ok(ApiResponse { status, retry_after, body })
		})
	}
}

#[cfg(feature = "reqwest")]
fn reqwest_method(method: HttpMethod) -> reqwest::Method {
	match method {
		HttpMethod::Get => reqwest::Method::GET,
		HttpMethod::Post => reqwest::Method::POST,
		HttpMethod::Put => reqwest::Method::PUT,
		HttpMethod::Patch => reqwest::Method::PATCH,
		HttpMethod::Delete => reqwest::Method::DELETE,
	}
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	#[test]
	fn retry_after_parses_delta_seconds() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));

		assert_eq!(parse_retry_after(&headers), Some(Duration::seconds(5)));
	}

	#[test]
	fn retry_after_parses_rfc2822_dates_in_the_future() {
		let future = OffsetDateTime::now_utc() + Duration::minutes(2);
		let formatted = future.format(&Rfc2822).expect("Date should format as RFC 2822.");
		let mut headers = HeaderMap::new();

		headers.insert(
			RETRY_AFTER,
			HeaderValue::from_str(&formatted).expect("Formatted date should be a valid header."),
		);

		let parsed = parse_retry_after(&headers).expect("Future date should yield a delay.");

		assert!(parsed > Duration::minutes(1));
		assert!(parsed <= Duration::minutes(2));
	}

	#[test]
	fn retry_after_ignores_garbage_and_past_dates() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));

		assert_eq!(parse_retry_after(&headers), None);

		headers.insert(
			RETRY_AFTER,
			HeaderValue::from_static("Mon, 01 Jan 2001 00:00:00 +0000"),
		);

		assert_eq!(parse_retry_after(&headers), None);
	}

	#[test]
	fn request_builders_compose() {
		let url = Url::parse("https://api.example.com/resources/1")
			.expect("Fixture URL should parse.");
		let request = ApiRequest::get(url).with_header("X-Trace", "abc");

		assert_eq!(request.method, HttpMethod::Get);
		assert_eq!(request.headers.get("X-Trace").map(String::as_str), Some("abc"));
		assert!(request.body.is_none());
	}
}
