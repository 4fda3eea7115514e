// crates.io
use httpmock::prelude::*;
// self
use api_warden::{
	client::SecureApiClient,
	config::{Credential, SecurityConfig, SecurityConfigPatch},
	context::{Identity, RequestContext},
	error::Error,
	executor::{CancelToken, RetryPolicy},
	http::ReqwestGatewayClient,
	time::{Duration, OffsetDateTime},
	url::Url,
	usage::ReportWindow,
};

fn permissive_config() -> SecurityConfig {
	SecurityConfig {
		max_requests_per_minute: 10_000,
		max_requests_per_hour: 100_000,
		off_hours_alerting_enabled: false,
		suspicious_patterns: Vec::new(),
		..Default::default()
	}
}

fn build_client(
	server: &MockServer,
	config: SecurityConfig,
	policy: RetryPolicy,
) -> SecureApiClient<ReqwestGatewayClient> {
	SecureApiClient::with_transport(
		Url::parse(&server.base_url()).expect("Mock base URL should parse successfully."),
		Credential::new("test-credential").expect("Test credential should be valid."),
		config,
		policy,
		ReqwestGatewayClient::default(),
	)
	.expect("Gateway client should build successfully.")
}

fn context(identity: &str, endpoint: &str) -> RequestContext {
	RequestContext::new(
		Identity::new(identity).expect("Test identity should be valid."),
		endpoint,
	)
	.with_client_id("integration-tests")
}

#[tokio::test]
async fn fetch_resource_authenticates_and_reduces_the_payload() {
	let server = MockServer::start_async().await;
	let oversized_items =
		(0..25).map(|item| item.to_string()).collect::<Vec<_>>().join(",");
	let body = format!(
		"{{\"id\":\"res-1\",\"title\":\"Example\",\"items\":[{oversized_items}],\"internal_cost\":12.5}}",
	);
	let mock = server
		.mock_async(move |when, then| {
			when.method(GET)
				.path("/resources/res-1")
				.header("authorization", "Bearer test-credential")
				.header_exists("x-correlation-id")
				.header_exists("user-agent");
			then.status(200).header("content-type", "application/json").body(&body);
		})
		.await;
	let client = build_client(&server, permissive_config(), RetryPolicy::default());
	let value = client
		.fetch_resource("res-1", &context("10.0.0.1", "/resources/res-1"), None)
		.await
		.expect("Fetch should succeed.");

	// Non-whitelisted fields are dropped and lists capped at the default of 20.
	assert!(value.get("internal_cost").is_none());
	assert_eq!(value["id"], "res-1");
	assert_eq!(
		value["items"].as_array().map(Vec::len),
		Some(20),
	);

	mock.assert_async().await;
}

#[tokio::test]
async fn security_violations_never_reach_the_upstream() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET);
			then.status(200).body("{}");
		})
		.await;
	let mut config = permissive_config();

	config.suspicious_patterns = vec!["/admin".into()];

	let client = build_client(&server, config, RetryPolicy::default());
	let error = client
		.fetch_resource("res-1", &context("10.0.0.1", "/admin/export"), None)
		.await
		.expect_err("Suspicious endpoint must be blocked pre-flight.");

	assert!(matches!(error, Error::Security(_)));

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn frequency_offenders_are_flagged_and_block_listed() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/resources/x");
			then.status(200).body("{\"id\":\"x\"}");
		})
		.await;
	let mut config = permissive_config();

	config.max_requests_per_minute = 30;

	let client = build_client(&server, config, RetryPolicy::default());
	let offender = context("1.2.3.4", "/resource/x");

	for call in 0..30 {
		client
			.fetch_resource("x", &offender, None)
			.await
			.unwrap_or_else(|error| panic!("Call {call} should be admitted: {error:?}"));
	}

	let error = client
		.fetch_resource("x", &offender, None)
		.await
		.expect_err("The 31st request inside the window must be flagged.");

	let Error::Security(violation) = error else {
		panic!("Expected Security, got another variant.");
	};

	assert!(violation.anomalies.iter().any(|anomaly| {
		anomaly.kind == api_warden::security::AnomalyKind::HighFrequency
			&& anomaly.severity == api_warden::security::Severity::High
	}));

	// The offender landed on the block-list with an expiry about an hour out.
	let until = client
		.blocked_until(&offender.identity)
		.expect("Offender should be block-listed.");
	let remaining = until - OffsetDateTime::now_utc();

	assert!(remaining > Duration::seconds(3_500));
	assert!(remaining <= Duration::seconds(3_700));

	// Clean requests from the same identity stay rejected without upstream traffic.
	let error = client
		.fetch_resource("x", &context("1.2.3.4", "/resources/clean"), None)
		.await
		.expect_err("Blocked identities must be rejected.");

	assert!(matches!(error, Error::Blocked { .. }));

	mock.assert_calls_async(30).await;
}

#[tokio::test]
async fn high_severity_alerts_reach_the_security_webhook() {
	let api = MockServer::start_async().await;
	let hooks = MockServer::start_async().await;
	let webhook_mock = hooks
		.mock_async(|when, then| {
			when.method(POST).path("/alerts");
			then.status(200);
		})
		.await;
	let mut config = permissive_config();

	config.suspicious_patterns = vec!["/admin".into()];
	config.security_webhook =
		Some(Url::parse(&hooks.url("/alerts")).expect("Webhook URL should parse."));

	let client = build_client(&api, config, RetryPolicy::default());
	let error = client
		.fetch_resource("res-1", &context("10.0.0.9", "/admin/keys"), None)
		.await
		.expect_err("Suspicious endpoint must be blocked.");

	assert!(matches!(error, Error::Security(_)));

	webhook_mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn webhook_outages_do_not_change_the_caller_outcome() {
	let api = MockServer::start_async().await;
	let hooks = MockServer::start_async().await;
	let webhook_mock = hooks
		.mock_async(|when, then| {
			when.method(POST).path("/alerts");
			then.status(500).body("hook down");
		})
		.await;
	let mut config = permissive_config();

	config.suspicious_patterns = vec!["/admin".into()];
	config.security_webhook =
		Some(Url::parse(&hooks.url("/alerts")).expect("Webhook URL should parse."));

	let client = build_client(&api, config, RetryPolicy::default());
	let error = client
		.fetch_resource("res-1", &context("10.0.0.9", "/admin/keys"), None)
		.await
		.expect_err("The security outcome must not depend on webhook health.");

	// Still a policy rejection, not a transport error, and the block still happened.
	assert!(matches!(error, Error::Security(_)));
	assert!(client.is_blocked(&Identity::new("10.0.0.9").expect("Identity should be valid.")));

	webhook_mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn usage_reporting_tracks_successes_and_failures() {
	let server = MockServer::start_async().await;
	let ok_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/resources/ok");
			then.status(200).body("{\"id\":\"ok\"}");
		})
		.await;
	let fail_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/resources/fail");
			then.status(500).body("{}");
		})
		.await;
	let policy = RetryPolicy::default().with_max_attempts(1);
	let client = build_client(&server, permissive_config(), policy);

	client
		.fetch_resource("ok", &context("10.0.0.1", "/resources/ok"), None)
		.await
		.expect("Successful call should resolve.");

	let error = client
		.fetch_resource("fail", &context("10.0.0.1", "/resources/fail"), None)
		.await
		.expect_err("Single-attempt 500 should exhaust immediately.");

	assert!(matches!(error, Error::Exhausted { .. }));

	let report = client.usage_report(ReportWindow::Today);

	assert_eq!(report.total_requests, 2);
	assert!((report.error_rate - 0.5).abs() < f64::EPSILON);
	assert_eq!(report.top_endpoints.len(), 2);

	let errors = client.recent_errors(5);

	assert_eq!(errors.len(), 1);
	assert_eq!(errors[0].status, Some(500));
	assert_eq!(errors[0].endpoint, "/resources/fail");

	ok_mock.assert_async().await;
	fail_mock.assert_async().await;
}

#[tokio::test]
async fn config_updates_round_trip() {
	let server = MockServer::start_async().await;
	let client = build_client(&server, permissive_config(), RetryPolicy::default());

	client.update_security_config(
		SecurityConfigPatch::default().with_max_requests_per_minute(5),
	);

	let config = client.config();

	assert_eq!(config.max_requests_per_minute, 5);
	assert_eq!(config.max_requests_per_hour, 100_000);
}

#[tokio::test]
async fn pre_cancelled_tokens_abort_before_any_network_call() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET);
			then.status(200).body("{}");
		})
		.await;
	let client = build_client(&server, permissive_config(), RetryPolicy::default());
	let token = CancelToken::new();

	token.cancel();

	let error = client
		.fetch_resource("res-1", &context("10.0.0.1", "/resources/res-1"), Some(&token))
		.await
		.expect_err("A cancelled token must abort the call.");

	assert!(matches!(error, Error::Cancelled));

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn monitoring_webhook_receives_published_reports() {
	let api = MockServer::start_async().await;
	let hooks = MockServer::start_async().await;
	let usage_mock = hooks
		.mock_async(|when, then| {
			when.method(POST).path("/usage");
			then.status(202);
		})
		.await;
	let api_mock = api
		.mock_async(|when, then| {
			when.method(GET).path("/resources/res-1");
			then.status(200).body("{\"id\":\"res-1\"}");
		})
		.await;
	let mut config = permissive_config();

	config.monitoring_webhook =
		Some(Url::parse(&hooks.url("/usage")).expect("Webhook URL should parse."));

	let client = build_client(&api, config, RetryPolicy::default());

	client
		.fetch_resource("res-1", &context("10.0.0.1", "/resources/res-1"), None)
		.await
		.expect("Seed call should succeed.");

	assert!(client
		.publish_usage_report(ReportWindow::Today)
		.await
		.expect("Publishing should succeed."));

	usage_mock.assert_calls_async(1).await;
	api_mock.assert_async().await;
}
