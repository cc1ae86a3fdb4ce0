//! Traits for reading published telemetry.

use crate::telemetry::data::TelemetrySnapshot;
use std::sync::Arc;

/// Read side of a telemetry session.
///
/// The collector only ever talks to this trait, so tests can substitute a
/// source with a hand-built snapshot. Implementations must never block: both
/// methods read state that a background task has already published.
pub trait TelemetrySource: Send + Sync {
    /// Whether a healthy snapshot is available.
    fn is_ready(&self) -> bool;

    /// The most recently published snapshot.
    ///
    /// Callers check [`is_ready`](Self::is_ready) first; a stale snapshot may
    /// still be returned after the backend dropped.
    fn snapshot(&self) -> Option<Arc<TelemetrySnapshot>>;
}
