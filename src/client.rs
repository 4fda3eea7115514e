//! Gateway façade composing detection, admission, execution, and reduction.
//!
//! Every domain operation walks the same pipeline: anomaly evaluation (with fan-out
//! to alert sinks whether or not the call proceeds), block-list check, rate-limit
//! admission, retry-aware execution recorded by the usage monitor, then JSON parsing
//! and response reduction. High-severity anomalies short-circuit before any network
//! traffic happens.

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	config::{Credential, SecurityConfig, SecurityConfigPatch},
	context::{CorrelationId, Identity, RequestContext},
	error::{ConfigError, TransportError},
	executor::{CallMeta, CancelToken, RetryPolicy, RetryingExecutor},
	http::{ApiRequest, ApiResponse, GatewayHttpClient},
	obs::{self, CallKind, CallOutcome, CallSpan},
	rate_limit::RateLimiter,
	reduce::{ResponseShaper, WhitelistShaper},
	security::{
		alert::AlertDispatcher,
		anomaly::{AlertSink, AnomalyDetector, SecurityViolation, Severity},
	},
	usage::{ReportWindow, UsageLogEntry, UsageMonitor, UsageReport},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestGatewayClient;

const DEFAULT_USER_AGENT: &str = concat!("api-warden/", env!("CARGO_PKG_VERSION"));
const DEFAULT_MAX_LOG_ENTRIES: usize = 10_000;

/// Rendering options accepted by [`SecureApiClient::fetch_rendered_assets`].
#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
	/// Requested output format (e.g. `png`).
	pub format: Option<String>,
	/// Requested output width in pixels.
	pub width: Option<u32>,
	/// Requested output height in pixels.
	pub height: Option<u32>,
}
impl RenderOptions {
	/// Sets the output format.
	pub fn with_format(mut self, format: impl Into<String>) -> Self {
		self.format = Some(format.into());

		self
	}

	/// Sets the output dimensions.
	pub fn with_size(mut self, width: u32, height: u32) -> Self {
		self.width = Some(width);
		self.height = Some(height);

		self
	}
}

/// Façade mediating every outbound call to the upstream API.
///
/// The client owns its collaborators (the usage log, rate windows, and block-list
/// each live behind exactly one component and are mutated only through it), so
/// multiple isolated clients can coexist in one process.
pub struct SecureApiClient<C>
where
	C: GatewayHttpClient,
{
	transport: Arc<C>,
	base_url: Url,
	credential: Credential,
	user_agent: String,
	config: Arc<RwLock<SecurityConfig>>,
	monitor: Arc<UsageMonitor>,
	limiter: RateLimiter,
	detector: AnomalyDetector,
	dispatcher: Arc<AlertDispatcher>,
	executor: RetryingExecutor,
	shaper: Arc<dyn ResponseShaper>,
}
impl<C> SecureApiClient<C>
where
	C: GatewayHttpClient,
{
	/// Creates a client that reuses the caller-provided transport.
	pub fn with_transport(
		base_url: Url,
		credential: Credential,
		config: SecurityConfig,
		policy: RetryPolicy,
		transport: impl Into<Arc<C>>,
	) -> Result<Self> {
		if base_url.cannot_be_a_base() {
			return Err(ConfigError::OpaqueBaseUrl.into());
		}

		let transport = transport.into();
		let top_endpoints = config.top_endpoints;
		let config = Arc::new(RwLock::new(config));
		let monitor = Arc::new(UsageMonitor::new(DEFAULT_MAX_LOG_ENTRIES, top_endpoints));
		let limiter = RateLimiter::new(config.clone());
		let detector = AnomalyDetector::new(config.clone());
		let dispatcher = Arc::new(AlertDispatcher::new(
			config.clone(),
			transport.clone() as Arc<dyn GatewayHttpClient>,
		));

		detector.register_sink(dispatcher.clone());

		let executor = RetryingExecutor::new(
			transport.clone() as Arc<dyn GatewayHttpClient>,
			monitor.clone(),
			policy,
		);

		Ok(Self {
			transport,
			base_url,
			credential,
			user_agent: DEFAULT_USER_AGENT.into(),
			config,
			monitor,
			limiter,
			detector,
			dispatcher,
			executor,
			shaper: Arc::new(WhitelistShaper::default()),
		})
	}

	/// Overrides the User-Agent attached to outbound requests.
	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = user_agent.into();

		self
	}

	/// Replaces the response shaping strategy.
	pub fn with_shaper(mut self, shaper: impl ResponseShaper + 'static) -> Self {
		self.shaper = Arc::new(shaper);

		self
	}

	/// Registers an additional alert observer alongside the built-in dispatcher.
	pub fn register_alert_sink(&self, sink: Arc<dyn AlertSink>) {
		self.detector.register_sink(sink);
	}

	/// Fetches a single resource by id.
	pub async fn fetch_resource(
		&self,
		id: &str,
		context: &RequestContext,
		cancel: Option<&CancelToken>,
	) -> Result<Value> {
		let url = self.endpoint_url(&["resources", id], &[])?;

		self.call(CallKind::FetchResource, context, url, cancel).await
	}

	/// Fetches a filtered set of sub-resources under a parent resource.
	pub async fn fetch_sub_resources(
		&self,
		id: &str,
		ids: &[&str],
		context: &RequestContext,
		cancel: Option<&CancelToken>,
	) -> Result<Value> {
		let url = self.endpoint_url(
			&["resources", id, "subresources"],
			&[("ids", ids.join(","))],
		)?;

		self.call(CallKind::FetchSubResources, context, url, cancel).await
	}

	/// Fetches rendered assets for the selected sub-resources.
	pub async fn fetch_rendered_assets(
		&self,
		id: &str,
		ids: &[&str],
		options: &RenderOptions,
		context: &RequestContext,
		cancel: Option<&CancelToken>,
	) -> Result<Value> {
		let mut query = vec![("ids", ids.join(","))];

		if let Some(format) = &options.format {
			query.push(("format", format.clone()));
		}
		if let Some(width) = options.width {
			query.push(("width", width.to_string()));
		}
		if let Some(height) = options.height {
			query.push(("height", height.to_string()));
		}

		let url = self.endpoint_url(&["resources", id, "assets"], &query)?;

		self.call(CallKind::FetchRenderedAssets, context, url, cancel).await
	}

	/// Aggregate usage statistics over the window.
	pub fn usage_report(&self, window: ReportWindow) -> UsageReport {
		self.monitor.report(window)
	}

	/// The `limit` most recent error entries, newest first.
	pub fn recent_errors(&self, limit: usize) -> Vec<UsageLogEntry> {
		self.monitor.recent_errors(limit)
	}

	/// Merges a partial security-configuration update; unspecified fields are unchanged.
	pub fn update_security_config(&self, patch: SecurityConfigPatch) {
		self.config.write().apply(patch);
	}

	/// Snapshot of the current security configuration.
	pub fn config(&self) -> SecurityConfig {
		self.config.read().clone()
	}

	/// Whether the identity currently sits on the block-list.
	pub fn is_blocked(&self, identity: &Identity) -> bool {
		self.dispatcher.is_blocked(identity)
	}

	/// Expiry of the identity's block entry, if one is active.
	pub fn blocked_until(&self, identity: &Identity) -> Option<OffsetDateTime> {
		self.dispatcher.blocked_until(identity)
	}

	/// Drops expired block-list entries.
	pub fn purge_expired_blocks(&self) {
		self.dispatcher.purge_expired();
	}

	/// Publishes the windowed usage report to the monitoring webhook, if configured.
	///
	/// Returns `Ok(false)` when no webhook is configured. Unlike alert forwarding this
	/// is an explicit operational call, so delivery failures surface to the caller.
	pub async fn publish_usage_report(&self, window: ReportWindow) -> Result<bool> {
		const KIND: CallKind = CallKind::PublishReport;

		let Some(webhook) = self.config.read().monitoring_webhook.clone() else {
			return Ok(false);
		};
		let span = CallSpan::new(KIND, "publish_usage_report");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span
			.instrument(async move {
				let report = self.monitor.report(window);
				let body = serde_json::to_vec(&report)
					.map_err(|error| Error::Transport(TransportError::invalid_request(error)))?;
				let request = ApiRequest::post(webhook)
					.with_header("Content-Type", "application/json")
					.with_header("User-Agent", self.user_agent.clone())
					.with_body(body);
				let response = self.transport.execute(request).await?;

				if !response.is_success() {
					return Err(Error::Client {
						status: response.status,
						body: String::from_utf8_lossy(&response.body).into_owned(),
					});
				}

				Ok(true)
			})
			.await;

		match &result {
			Ok(_) => obs::record_call_outcome(KIND, CallOutcome::Success),
			Err(_) => obs::record_call_outcome(KIND, CallOutcome::Failure),
		}

		result
	}

	async fn call(
		&self,
		kind: CallKind,
		context: &RequestContext,
		url: Url,
		cancel: Option<&CancelToken>,
	) -> Result<Value> {
		let span = CallSpan::new(kind, "call");

		obs::record_call_outcome(kind, CallOutcome::Attempt);

		let result = span.instrument(self.call_inner(context, url, cancel)).await;

		match &result {
			Ok(_) => obs::record_call_outcome(kind, CallOutcome::Success),
			Err(Error::Security(_) | Error::Blocked { .. }) =>
				obs::record_call_outcome(kind, CallOutcome::Blocked),
			Err(_) => obs::record_call_outcome(kind, CallOutcome::Failure),
		}

		result
	}

	async fn call_inner(
		&self,
		context: &RequestContext,
		url: Url,
		cancel: Option<&CancelToken>,
	) -> Result<Value> {
		let anomalies = self.detector.evaluate(context);

		// Anomalies reach the sinks whether or not the call proceeds.
		self.detector.dispatch(&anomalies).await;

		if anomalies.iter().any(|anomaly| anomaly.severity >= Severity::High) {
			return Err(SecurityViolation { anomalies }.into());
		}
		if let Some(until) = self.dispatcher.blocked_until(&context.identity) {
			return Err(Error::Blocked { identity: context.identity.to_string(), until });
		}

		self.limiter.admit(&context.identity).await?;

		let correlation_id = CorrelationId::generate();
		let request = self.build_request(context, url, &correlation_id);
		let meta = CallMeta {
			correlation_id,
			identity: context.identity.clone(),
			endpoint: context.endpoint.clone(),
			method: context.method,
		};
		let response = self.executor.execute(request, &meta, cancel).await?;
		let value = parse_json(&response)?;

		Ok(self.shaper.shape(value))
	}

	fn build_request(
		&self,
		context: &RequestContext,
		url: Url,
		correlation_id: &CorrelationId,
	) -> ApiRequest {
		let mut request = ApiRequest { method: context.method, url, headers: context.headers.clone(), body: None };

		request = request
			.with_header("Authorization", format!("Bearer {}", self.credential.expose()))
			.with_header("X-Correlation-Id", correlation_id.as_str())
			.with_header("User-Agent", self.user_agent.clone());

		request
	}

	fn endpoint_url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url> {
		let mut url = self.base_url.clone();

		url.path_segments_mut()
			.map_err(|()| ConfigError::OpaqueBaseUrl)?
			.pop_if_empty()
			.extend(segments);

		if !query.is_empty() {
			let mut pairs = url.query_pairs_mut();

			for (name, value) in query {
				pairs.append_pair(name, value);
			}

			drop(pairs);
		}

		Ok(url)
	}
}
#[cfg(feature = "reqwest")]
impl SecureApiClient<ReqwestGatewayClient> {
	/// Creates a client with the crate's default reqwest transport and retry policy.
	pub fn new(base_url: Url, credential: Credential, config: SecurityConfig) -> Result<Self> {
		Self::with_transport(
			base_url,
			credential,
			config,
			RetryPolicy::default(),
			ReqwestGatewayClient::default(),
		)
	}
}
impl<C> Debug for SecureApiClient<C>
where
	C: GatewayHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SecureApiClient")
			.field("base_url", &self.base_url.as_str())
			.field("user_agent", &self.user_agent)
			.field("credential", &self.credential)
			.finish()
	}
}

fn parse_json(response: &ApiResponse) -> Result<Value> {
	let mut deserializer = serde_json::Deserializer::from_slice(&response.body);

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| Error::ResponseParse { source, status: response.status })
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::{config::AdmitPolicy, http::HttpFuture};

	struct StubTransport {
		requests: Mutex<Vec<ApiRequest>>,
		status: u16,
		body: Vec<u8>,
	}
	impl StubTransport {
		fn json(status: u16, body: Value) -> Arc<Self> {
			Arc::new(Self {
				requests: Mutex::new(Vec::new()),
				status,
				body: body.to_string().into_bytes(),
			})
		}

		fn calls(&self) -> usize {
			self.requests.lock().len()
		}
	}
	impl GatewayHttpClient for StubTransport {
		fn execute(&self, request: ApiRequest) -> HttpFuture<'_, ApiResponse> {
			self.requests.lock().push(request);

			let status = self.status;
			let body = self.body.clone();

			Box::pin(async move { Ok(ApiResponse { status, retry_after: None, body }) })
		}
	}

	fn quiet_config() -> SecurityConfig {
		SecurityConfig {
			max_requests_per_minute: 1_000,
			max_requests_per_hour: 10_000,
			off_hours_alerting_enabled: false,
			suspicious_patterns: Vec::new(),
			..Default::default()
		}
	}

	fn client(
		transport: Arc<StubTransport>,
		config: SecurityConfig,
	) -> SecureApiClient<StubTransport> {
		SecureApiClient::with_transport(
			Url::parse("https://api.example.com/v1/").expect("Base URL fixture should parse."),
			Credential::new("secret-token").expect("Credential fixture should be valid."),
			config,
			RetryPolicy::default(),
			transport,
		)
		.expect("Client should build successfully.")
	}

	fn context(identity: &str, endpoint: &str) -> RequestContext {
		RequestContext::new(
			Identity::new(identity).expect("Test identity should be valid."),
			endpoint,
		)
		.with_client_id("unit-tests")
	}

	#[test]
	fn opaque_base_urls_are_rejected() {
		let result = SecureApiClient::<StubTransport>::with_transport(
			Url::parse("mailto:ops@example.com").expect("Opaque URL fixture should parse."),
			Credential::new("secret-token").expect("Credential fixture should be valid."),
			quiet_config(),
			RetryPolicy::default(),
			StubTransport::json(200, json!({})),
		);

		assert!(matches!(result, Err(Error::Config(ConfigError::OpaqueBaseUrl))));
	}

	#[tokio::test]
	async fn successful_call_attaches_headers_and_shapes_the_payload() {
		let transport = StubTransport::json(
			200,
			json!({
				"id": "res-1",
				"title": "Example",
				"internal_cost": 12.5,
				"items": [1, 2, 3],
			}),
		);
		let client = client(transport.clone(), quiet_config());
		let value = client
			.fetch_resource("res-1", &context("10.0.0.1", "/resources/res-1"), None)
			.await
			.expect("Call should succeed.");

		// The non-whitelisted field was reduced away.
		assert_eq!(value, json!({"id": "res-1", "title": "Example", "items": [1, 2, 3]}));

		let requests = transport.requests.lock();

		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0].url.as_str(), "https://api.example.com/v1/resources/res-1");
		assert_eq!(
			requests[0].headers.get("Authorization").map(String::as_str),
			Some("Bearer secret-token"),
		);
		assert!(requests[0].headers.contains_key("X-Correlation-Id"));
		assert!(requests[0].headers.contains_key("User-Agent"));
	}

	#[tokio::test]
	async fn sub_resource_and_asset_urls_carry_query_parameters() {
		let transport = StubTransport::json(200, json!({}));
		let client = client(transport.clone(), quiet_config());
		let context = context("10.0.0.1", "/resources/res-1/assets");

		client
			.fetch_sub_resources("res-1", &["a", "b"], &context, None)
			.await
			.expect("Sub-resource call should succeed.");
		client
			.fetch_rendered_assets(
				"res-1",
				&["a"],
				&RenderOptions::default().with_format("png").with_size(640, 480),
				&context,
				None,
			)
			.await
			.expect("Asset call should succeed.");

		let requests = transport.requests.lock();

		assert_eq!(
			requests[0].url.as_str(),
			"https://api.example.com/v1/resources/res-1/subresources?ids=a%2Cb",
		);
		assert_eq!(
			requests[1].url.as_str(),
			"https://api.example.com/v1/resources/res-1/assets?ids=a&format=png&width=640&height=480",
		);
	}

	#[tokio::test]
	async fn high_severity_anomalies_block_before_any_network_call() {
		let transport = StubTransport::json(200, json!({}));
		let mut config = quiet_config();

		config.suspicious_patterns = vec!["/admin".into()];

		let client = client(transport.clone(), config);
		let error = client
			.fetch_resource("res-1", &context("10.0.0.1", "/admin/export"), None)
			.await
			.expect_err("Suspicious endpoint must be blocked pre-flight.");

		assert!(matches!(error, Error::Security(_)));
		assert_eq!(transport.calls(), 0);
	}

	#[tokio::test]
	async fn blocked_identities_are_rejected_until_expiry() {
		let transport = StubTransport::json(200, json!({}));
		let mut config = quiet_config();

		config.suspicious_patterns = vec!["/admin".into()];

		let client = client(transport.clone(), config);
		let offender = context("9.9.9.9", "/admin/export");

		// The violation lands the identity on the block-list.
		assert!(client.fetch_resource("res-1", &offender, None).await.is_err());
		assert!(client.is_blocked(&offender.identity));

		// A perfectly clean follow-up from the same identity is still rejected.
		let clean = context("9.9.9.9", "/resources/res-1");
		let error = client
			.fetch_resource("res-1", &clean, None)
			.await
			.expect_err("Blocked identities must not reach the upstream.");

		assert!(matches!(error, Error::Blocked { .. }));
		assert_eq!(transport.calls(), 0);
	}

	#[tokio::test]
	async fn reject_policy_surfaces_throttled_errors() {
		let transport = StubTransport::json(200, json!({}));
		let mut config = quiet_config();

		config.max_requests_per_minute = 2;
		config.admit_policy = AdmitPolicy::Reject;

		let client = client(transport.clone(), config);

		// Distinct endpoints keep the per-endpoint frequency rule quiet; the limiter
		// counts per identity.
		client
			.fetch_resource("a", &context("10.0.0.1", "/resources/a"), None)
			.await
			.expect("First call should be admitted.");
		client
			.fetch_resource("b", &context("10.0.0.1", "/resources/b"), None)
			.await
			.expect("Second call should be admitted.");

		let error = client
			.fetch_resource("c", &context("10.0.0.1", "/resources/c"), None)
			.await
			.expect_err("Third call should be throttled.");

		assert!(matches!(error, Error::Throttled { .. }));
		assert_eq!(transport.calls(), 2);
	}

	#[tokio::test]
	async fn config_updates_round_trip_through_the_facade() {
		let client = client(StubTransport::json(200, json!({})), quiet_config());

		client.update_security_config(
			SecurityConfigPatch::default().with_max_requests_per_minute(5),
		);

		let config = client.config();

		assert_eq!(config.max_requests_per_minute, 5);
		// Unspecified fields kept their previous values.
		assert_eq!(config.max_requests_per_hour, 10_000);
	}

	#[tokio::test]
	async fn empty_usage_report_is_all_zeros() {
		let client = client(StubTransport::json(200, json!({})), quiet_config());
		let report = client.usage_report(ReportWindow::Today);

		assert_eq!(report.total_requests, 0);
		assert_eq!(report.error_rate, 0.0);
		assert_eq!(report.average_response_time_ms, 0.0);
		assert!(report.top_endpoints.is_empty());
	}

	#[tokio::test]
	async fn malformed_upstream_json_maps_to_response_parse() {
		let transport = Arc::new(StubTransport {
			requests: Mutex::new(Vec::new()),
			status: 200,
			body: b"not json".to_vec(),
		});
		let client = client(transport, quiet_config());
		let error = client
			.fetch_resource("res-1", &context("10.0.0.1", "/resources/res-1"), None)
			.await
			.expect_err("Malformed JSON should fail parsing.");

		assert!(matches!(error, Error::ResponseParse { status: 200, .. }));
	}

	#[tokio::test]
	async fn publish_usage_report_requires_a_webhook() {
		let client = client(StubTransport::json(200, json!({})), quiet_config());

		assert!(!client
			.publish_usage_report(ReportWindow::Today)
			.await
			.expect("Publishing without a webhook is a no-op."));
	}

	#[tokio::test]
	async fn publish_usage_report_posts_the_serialized_report() {
		let transport = StubTransport::json(200, json!({}));
		let mut config = quiet_config();

		config.monitoring_webhook =
			Some(Url::parse("https://hooks.example.com/usage").expect("Webhook should parse."));

		let client = client(transport.clone(), config);

		client
			.fetch_resource("res-1", &context("10.0.0.1", "/resources/res-1"), None)
			.await
			.expect("Seed call should succeed.");

		assert!(client
			.publish_usage_report(ReportWindow::Today)
			.await
			.expect("Publishing should succeed."));

		let requests = transport.requests.lock();
		let publish = requests.last().expect("Publish request should be recorded.");

		assert_eq!(publish.url.as_str(), "https://hooks.example.com/usage");

		let body = publish.body.as_deref().expect("Publish request should carry a body.");
		let payload: Value = serde_json::from_slice(body).expect("Body should be JSON.");

		assert_eq!(payload["totalRequests"], 1);
	}
}
