//! Security building blocks: anomaly detection, alert delivery, and network matching.

pub mod alert;
pub mod anomaly;
pub mod net;

pub use alert::{AlertDispatcher, AlertPayload};
pub use anomaly::{
	AlertError, AlertSink, AnomalyDetector, AnomalyKind, SecurityAnomaly, SecurityViolation,
	Severity, SinkFuture,
};
pub use net::NetworkRange;
