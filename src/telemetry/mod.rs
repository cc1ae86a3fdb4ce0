//! Telemetry session and the snapshot data model.
//!
//! The session owns the connection to the hardware monitoring backend and
//! publishes a fresh [`TelemetrySnapshot`] each time the backend pushes one.

pub mod backoff;
pub mod data;
pub mod protocol;
pub mod session;
pub mod traits;

// Re-export commonly used items
pub use data::TelemetrySnapshot;
pub use session::{SessionConfig, StopGuard, TelemetrySession};
pub use traits::TelemetrySource;
