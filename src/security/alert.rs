//! Alert delivery: logging, webhook forwarding, and the temporary block-list.

// self
use crate::{
	_prelude::*,
	config::SecurityConfig,
	context::Identity,
	http::{ApiRequest, GatewayHttpClient},
	obs,
	security::anomaly::{AlertError, AlertSink, SecurityAnomaly, Severity, SinkFuture},
};

const SERVICE: &str = "api-warden";

/// Structured webhook payload forwarded for high-severity anomalies.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
	/// Reporting service name.
	pub service: String,
	/// Anomaly kind label.
	pub anomaly_type: String,
	/// Severity label.
	pub severity: String,
	/// Human-readable description.
	pub message: String,
	/// Offending caller identity.
	pub identity: String,
	/// Targeted endpoint.
	pub endpoint: String,
	/// Instant the anomaly was observed.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}
impl AlertPayload {
	/// Builds the payload for one anomaly.
	pub fn from_anomaly(anomaly: &SecurityAnomaly) -> Self {
		Self {
			service: SERVICE.into(),
			anomaly_type: anomaly.kind.as_str().into(),
			severity: anomaly.severity.as_str().into(),
			message: anomaly.message.clone(),
			identity: anomaly.context.identity.to_string(),
			endpoint: anomaly.context.endpoint.clone(),
			timestamp: anomaly.context.observed_at,
		}
	}
}

/// Default [`AlertSink`]: logs every anomaly, escalates high-severity ones.
///
/// High and critical anomalies are forwarded to the configured security webhook on a
/// best-effort basis (failures are logged and swallowed, never surfaced to the caller
/// whose request produced the anomaly) and land the offending identity on the
/// block-list until `block_duration` elapses. The block-list map is owned exclusively
/// by the dispatcher; expiry is lazy, with [`purge_expired`](Self::purge_expired) for
/// callers that want bounded memory.
pub struct AlertDispatcher {
	config: Arc<RwLock<SecurityConfig>>,
	transport: Arc<dyn GatewayHttpClient>,
	blocklist: RwLock<HashMap<Identity, OffsetDateTime>>,
}
impl AlertDispatcher {
	/// Creates a dispatcher forwarding through the provided transport.
	pub fn new(config: Arc<RwLock<SecurityConfig>>, transport: Arc<dyn GatewayHttpClient>) -> Self {
		Self { config, transport, blocklist: RwLock::new(HashMap::new()) }
	}

	/// Whether the identity currently sits on the block-list.
	pub fn is_blocked(&self, identity: &Identity) -> bool {
		self.blocked_until(identity).is_some()
	}

	/// Expiry of the identity's block entry, if one is active.
	pub fn blocked_until(&self, identity: &Identity) -> Option<OffsetDateTime> {
		let now = OffsetDateTime::now_utc();

		self.blocklist.read().get(identity).copied().filter(|until| *until > now)
	}

	/// Removes expired entries so long-running processes keep bounded memory.
	pub fn purge_expired(&self) {
		let now = OffsetDateTime::now_utc();

		self.blocklist.write().retain(|_, until| *until > now);
	}

	/// Number of entries currently held, expired or not.
	pub fn block_count(&self) -> usize {
		self.blocklist.read().len()
	}

	fn block(&self, identity: &Identity) {
		let until = OffsetDateTime::now_utc() + self.config.read().block_duration;

		self.blocklist.write().insert(identity.clone(), until);
	}

	async fn forward(&self, webhook: Url, payload: &AlertPayload) -> Result<(), AlertError> {
		let body = serde_json::to_vec(payload)
			.map_err(|error| AlertError::Sink { message: error.to_string() })?;
		let request = ApiRequest::post(webhook)
			.with_header("Content-Type", "application/json")
			.with_body(body);
		let response = self.transport.execute(request).await?;

		if response.is_success() {
			Ok(())
		} else {
			Err(AlertError::Sink {
				message: format!("security webhook answered with status {}", response.status),
			})
		}
	}
}
impl AlertSink for AlertDispatcher {
	fn on_anomaly<'a>(&'a self, anomaly: &'a SecurityAnomaly) -> SinkFuture<'a> {
		Box::pin(async move {
			obs::note_anomaly(anomaly);

			if anomaly.severity < Severity::High {
				return Ok(());
			}

			self.block(&anomaly.context.identity);

			let webhook = self.config.read().security_webhook.clone();

			if let Some(webhook) = webhook {
				let payload = AlertPayload::from_anomaly(anomaly);

				if let Err(error) = self.forward(webhook, &payload).await {
					obs::note_swallowed("security_webhook", &error);
				}
			}

			Ok(())
		})
	}
}
impl Debug for AlertDispatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AlertDispatcher")
			.field("block_count", &self.block_count())
			.finish()
	}
}
