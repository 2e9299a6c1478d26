//! Opt-in, on-host telemetry.
//!
//! Events are PII-scrubbed, appended to per-day JSON-lines files, retained
//! for a bounded window (default 90 days), and never transmitted anywhere.

/// PII scrubbing for event payloads.
pub mod scrub;
/// Event store, reports, retention, and purge.
pub mod store;

pub use scrub::{scrub_str, scrub_value};
pub use store::{TelemetryEvent, TelemetryReport, TelemetryStore, DEFAULT_RETENTION_DAYS};
