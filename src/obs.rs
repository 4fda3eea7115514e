//! Optional observability helpers for gateway calls.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `api_warden.call` with the `op`
//!   (domain operation) and `stage` (call site) fields, plus warn-level events for
//!   anomalies and swallowed notification failures.
//! - Enable `metrics` to increment the `api_warden_call_total` counter for every
//!   attempt/success/failure/blocked outcome, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Domain operations observed by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
	/// Single-resource fetch.
	FetchResource,
	/// Sub-resource listing fetch.
	FetchSubResources,
	/// Rendered-asset fetch.
	FetchRenderedAssets,
	/// Operational webhook publication.
	PublishReport,
}
impl CallKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallKind::FetchResource => "fetch_resource",
			CallKind::FetchSubResources => "fetch_sub_resources",
			CallKind::FetchRenderedAssets => "fetch_rendered_assets",
			CallKind::PublishReport => "publish_report",
		}
	}
}
impl Display for CallKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Entry to a gateway operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Rejected pre-flight by security policy or the block-list.
	Blocked,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
			CallOutcome::Blocked => "blocked",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
