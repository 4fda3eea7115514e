//! Secure outbound API gateway client—compose anomaly detection, sliding-window rate limits,
//! temporary block-lists, and retry-aware transport in one crate built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod http;
pub mod obs;
pub mod rate_limit;
pub mod reduce;
pub mod security;
pub mod usage;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		client::SecureApiClient,
		config::{Credential, SecurityConfig},
		context::{Identity, RequestContext},
		executor::RetryPolicy,
		http::ReqwestGatewayClient,
	};

	/// Gateway client type alias used by reqwest-backed integration tests.
	pub type ReqwestTestClient = SecureApiClient<ReqwestGatewayClient>;

	/// Builds a reqwest transport that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_gateway_client() -> ReqwestGatewayClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestGatewayClient::with_client(client)
	}

	/// Constructs a [`SecureApiClient`] against the provided mock base URL with the supplied
	/// security configuration and retry policy.
	pub fn build_reqwest_test_client(
		base_url: &str,
		config: SecurityConfig,
		policy: RetryPolicy,
	) -> ReqwestTestClient {
		let base_url = Url::parse(base_url).expect("Mock base URL should parse successfully.");
		let credential =
			Credential::new("test-credential").expect("Test credential should be valid.");

		SecureApiClient::with_transport(
			base_url,
			credential,
			config,
			policy,
			test_reqwest_gateway_client(),
		)
		.expect("Test gateway client should build successfully.")
	}

	/// Permissive security configuration fixture that keeps every rule quiet by default.
	pub fn permissive_config() -> SecurityConfig {
		SecurityConfig {
			max_requests_per_minute: 10_000,
			max_requests_per_hour: 100_000,
			off_hours_alerting_enabled: false,
			suspicious_patterns: Vec::new(),
			..Default::default()
		}
	}

	/// Request context fixture for the provided identity + endpoint pair.
	pub fn test_context(identity: &str, endpoint: &str) -> RequestContext {
		let identity = Identity::new(identity).expect("Test identity should be valid.");

		RequestContext::new(identity, endpoint).with_client_id("test-client")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use time;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
