//! Error handling for the Jetson exporter.

/// A specialized `Result` type for exporter operations.
pub type Result<T> = std::result::Result<T, ExporterError>;

/// The main error type for the exporter.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The telemetry backend was unreachable or rejected the session
    #[error("Failed to start telemetry session: {0}")]
    SessionStart(String),

    /// The telemetry backend went away after a successful start
    #[error("Telemetry backend disconnected: {0}")]
    SessionDisconnected(String),

    /// A frame could not be decoded
    #[error("Failed to decode telemetry frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// Metric construction or registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Web server error
    #[error("Web server error: {0}")]
    WebServer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl ExporterError {
    /// Create a new session start error
    pub fn session_start(msg: impl Into<String>) -> Self {
        Self::SessionStart(msg.into())
    }

    /// Create a new disconnect error
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::SessionDisconnected(msg.into())
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Whether this error happened while opening the session.
    pub fn is_start_failure(&self) -> bool {
        matches!(self, Self::SessionStart(_))
    }
}
