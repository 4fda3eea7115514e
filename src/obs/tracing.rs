// self
use crate::{_prelude::*, obs::CallKind, security::anomaly::SecurityAnomaly};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedCall<F> = F;

/// A span builder used by gateway operations.
#[derive(Clone, Debug)]
pub struct CallSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl CallSpan {
	/// Creates a new span tagged with the provided operation + stage.
	pub fn new(kind: CallKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("api_warden.call", op = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Logs a detected anomaly (warn for high severities, info otherwise).
pub fn note_anomaly(anomaly: &SecurityAnomaly) {
	#[cfg(feature = "tracing")]
	{
		use crate::security::anomaly::Severity;

		if anomaly.severity >= Severity::High {
			tracing::warn!(
				kind = anomaly.kind.as_str(),
				severity = anomaly.severity.as_str(),
				identity = %anomaly.context.identity,
				endpoint = %anomaly.context.endpoint,
				message = %anomaly.message,
				"security anomaly",
			);
		} else {
			tracing::info!(
				kind = anomaly.kind.as_str(),
				severity = anomaly.severity.as_str(),
				identity = %anomaly.context.identity,
				endpoint = %anomaly.context.endpoint,
				message = %anomaly.message,
				"security anomaly",
			);
		}
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = anomaly;
	}
}

/// Logs a notification-channel failure that was swallowed to protect the request path.
pub fn note_swallowed(stage: &'static str, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(stage, error = %error, "notification failure swallowed");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (stage, error);
	}
}
