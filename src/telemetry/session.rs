//! Lifecycle of the connection to the telemetry backend.

use crate::error::{ExporterError, Result};
use crate::telemetry::backoff::Backoff;
use crate::telemetry::data::TelemetrySnapshot;
use crate::telemetry::protocol::{BackendConnection, Frame};
use crate::telemetry::traits::TelemetrySource;
use arc_swap::ArcSwapOption;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Configuration for the telemetry session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unix socket the backend listens on
    pub socket_path: PathBuf,
    /// Refresh interval requested from the backend
    pub refresh_interval: Duration,
    /// Bound on connecting and on waiting for the handshake
    pub connect_timeout: Duration,
    /// First delay between reconnect attempts
    pub reconnect_initial: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(crate::DEFAULT_SOCKET_PATH),
            refresh_interval: Duration::from_millis(crate::DEFAULT_INTERVAL_MS),
            connect_timeout: Duration::from_millis(crate::DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// Create a configuration for the given backend socket.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Set the refresh interval requested from the backend.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the connect and handshake timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Set the reconnect backoff bounds.
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max;
        self
    }
}

/// State shared between the background reader and scrape handlers.
#[derive(Default)]
struct Shared {
    snapshot: ArcSwapOption<TelemetrySnapshot>,
    ready: AtomicBool,
    published: Notify,
}

impl Shared {
    fn publish(&self, snapshot: TelemetrySnapshot) {
        self.snapshot.store(Some(Arc::new(snapshot)));
        self.ready.store(true, Ordering::Release);
        self.published.notify_waiters();
    }

    /// Returns whether the session was ready before.
    fn mark_unready(&self) -> bool {
        self.ready.swap(false, Ordering::AcqRel)
    }
}

/// A live session with the telemetry backend.
///
/// A background task owns the connection, decodes every stats frame into a
/// [`TelemetrySnapshot`] and publishes it with a single pointer swap. Readers
/// never take a lock and never wait on I/O. When the backend drops, readiness
/// flips to false and the task reconnects with exponential backoff.
pub struct TelemetrySession {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    service: String,
}

impl TelemetrySession {
    /// Connect to the backend and start the background reader.
    ///
    /// Fails with [`ExporterError::SessionStart`] when the backend is
    /// unreachable or rejects the subscription.
    pub async fn start(config: SessionConfig) -> Result<Self> {
        let connection = BackendConnection::open(
            &config.socket_path,
            config.refresh_interval,
            config.connect_timeout,
        )
        .await?;

        let service = connection.service().to_string();
        info!(
            "Connected to telemetry backend {} at {}",
            service,
            config.socket_path.display()
        );

        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(run_reader(Arc::clone(&shared), config, connection));

        Ok(Self {
            shared,
            reader: Mutex::new(Some(reader)),
            service,
        })
    }

    /// Whether a healthy snapshot has been received on the current connection.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.shared.snapshot.load_full()
    }

    /// Backend name and version announced in the handshake.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Wait until the session is ready and return the snapshot.
    pub async fn wait_ready(&self, limit: Duration) -> Result<Arc<TelemetrySnapshot>> {
        let wait = async {
            loop {
                let published = self.shared.published.notified();
                if self.is_ready() {
                    if let Some(snapshot) = self.snapshot() {
                        return snapshot;
                    }
                }
                published.await;
            }
        };

        timeout(limit, wait)
            .await
            .map_err(|_| ExporterError::timeout("no telemetry snapshot received"))
    }

    /// Release the backend connection.
    ///
    /// Idempotent; only the first call does anything and returns `true`.
    pub fn stop(&self) -> bool {
        let reader = match self.reader.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match reader {
            Some(handle) => {
                info!("Closing telemetry connection...");
                handle.abort();
                self.shared.mark_unready();
                true
            }
            None => false,
        }
    }

    /// Guard that stops the session when it goes out of scope.
    pub fn stop_guard(self: &Arc<Self>) -> StopGuard {
        StopGuard {
            session: Arc::clone(self),
        }
    }

    /// Whether [`stop`](Self::stop) has run.
    pub fn is_stopped(&self) -> bool {
        match self.reader.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl TelemetrySource for TelemetrySession {
    fn is_ready(&self) -> bool {
        TelemetrySession::is_ready(self)
    }

    fn snapshot(&self) -> Option<Arc<TelemetrySnapshot>> {
        TelemetrySession::snapshot(self)
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stops a shared session when dropped, on every exit path out of a scope.
pub struct StopGuard {
    session: Arc<TelemetrySession>,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.session.stop();
    }
}

async fn run_reader(shared: Arc<Shared>, config: SessionConfig, mut connection: BackendConnection) {
    let mut backoff = Backoff::new(config.reconnect_initial, config.reconnect_max);

    loop {
        let cause = pump_frames(&shared, &mut connection).await;
        shared.mark_unready();
        warn!("{}", cause);

        connection = reconnect(&config, &mut backoff).await;
        info!("Reconnected to telemetry backend {}", connection.service());
    }
}

/// Publish frames until the connection ends.
async fn pump_frames(shared: &Shared, connection: &mut BackendConnection) -> ExporterError {
    loop {
        let line = match connection.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return ExporterError::disconnected("backend closed the connection"),
            Err(e) => return ExporterError::disconnected(e.to_string()),
        };

        if line.trim().is_empty() {
            continue;
        }

        match Frame::parse(&line) {
            Ok(Frame::Stats { ok: true, data }) => shared.publish(data.into()),
            Ok(Frame::Stats { ok: false, .. }) => {
                if shared.mark_unready() {
                    warn!("Telemetry backend reports an unhealthy state");
                }
            }
            Ok(Frame::Error { message }) => {
                shared.mark_unready();
                warn!("Telemetry backend error: {}", message);
            }
            Ok(Frame::Hello { .. }) => debug!("Ignoring repeated handshake"),
            Err(e) => {
                shared.mark_unready();
                warn!("Dropping malformed telemetry frame: {}", e);
            }
        }
    }
}

async fn reconnect(config: &SessionConfig, backoff: &mut Backoff) -> BackendConnection {
    loop {
        let delay = backoff.next_delay();
        debug!("Reconnecting to telemetry backend in {:?}", delay);
        tokio::time::sleep(delay).await;

        match BackendConnection::open(
            &config.socket_path,
            config.refresh_interval,
            config.connect_timeout,
        )
        .await
        {
            Ok(connection) => {
                backoff.reset();
                return connection;
            }
            Err(e) => warn!("Reconnect attempt failed: {}", e),
        }
    }
}
