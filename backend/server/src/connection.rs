//! # Connection Manager
//!
//! Owns the one database connection of the process and the state machine
//! describing it.
//!
//! ```text
//!   disconnected ──start──▶ connecting ──ok──▶ connected
//!        ▲                      │                  │
//!        └──────── failure ─────┘◀── ping fails ───┘
//!
//!   connected ──shutdown──▶ disconnecting ──▶ disconnected
//! ```
//!
//! ## Supervisor
//! - Runs as one background task started by [`ConnectionManager::start`]
//! - Failed attempts are logged with remediation hints and retried after
//!   [`RetryPolicy::delay`], forever unless the policy bounds the attempts
//! - Once connected, the store is pinged every heartbeat; a failed ping drops
//!   the store and the supervisor starts connecting again
//! - Failures are never fatal, the HTTP server keeps serving status and assets
//!
//! ## Gate
//! Request handlers call [`ConnectionManager::wait_until_connected`] before touching storage.
//! It polls the state every 100ms and gives up with a 503-class error when the
//! database is disconnected or does not come up in time.
//!
//! Only this module writes the state. Everyone else reads a [`ConnectionStatus`]
//! snapshot or subscribes to changes.
use std::{fmt, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{Mutex, RwLock, watch},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::AppError,
    repository::{Connector, StoreError, TodoStore},
    retry::RetryPolicy,
};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub is_connected: bool,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    heartbeat: Duration,
    poll_interval: Duration,
    target: String,
    verbose: bool,
    state: watch::Sender<ConnectionState>,
    store: RwLock<Option<Arc<dyn TodoStore>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            connector,
            policy,
            heartbeat: DEFAULT_HEARTBEAT,
            poll_interval: POLL_INTERVAL,
            target: String::new(),
            verbose: true,
            state,
            store: RwLock::new(None),
            supervisor: Mutex::new(None),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Masked connection string, only used in log lines.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Logs connection targets and full error details when set.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = *self.state.borrow();

        ConnectionStatus {
            state,
            is_connected: state == ConnectionState::Connected,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Spawns the supervisor. Calling it again while one is running does nothing.
    pub async fn start(self: &Arc<Self>) {
        let mut supervisor = self.supervisor.lock().await;

        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        *supervisor = Some(tokio::spawn(self.clone().supervise()));
    }

    pub async fn shutdown(&self) {
        let supervisor = self.supervisor.lock().await.take();

        if let Some(task) = supervisor {
            task.abort();
            // Resolves once the task is gone and can no longer publish a store.
            let _ = task.await;
        }

        self.state.send_replace(ConnectionState::Disconnecting);

        if let Some(store) = self.store.write().await.take() {
            store.close().await;
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!("Database connection closed");
    }

    pub async fn wait_until_connected(
        &self,
        timeout: Duration,
    ) -> Result<Arc<dyn TodoStore>, AppError> {
        let deadline = Instant::now() + timeout;
        let mut first_check = true;

        loop {
            let state = *self.state.borrow();

            match state {
                ConnectionState::Connected => {
                    if let Some(store) = self.store.read().await.clone() {
                        return Ok(store);
                    }
                }
                ConnectionState::Disconnected if first_check => {
                    return Err(AppError::ConnectionUnavailable { state });
                }
                ConnectionState::Disconnected => {
                    return Err(AppError::ConnectionLost { state });
                }
                ConnectionState::Connecting | ConnectionState::Disconnecting => {}
            }

            if Instant::now() >= deadline {
                return Err(AppError::ConnectionTimeout {
                    state,
                    waited: timeout,
                });
            }

            first_check = false;
            sleep(self.poll_interval).await;
        }
    }

    /// Store outages seen mid-request become 503s carrying the current state.
    /// Until the next heartbeat notices the outage that state is still `connected`.
    pub fn classify(&self, error: AppError) -> AppError {
        match error {
            AppError::Store(StoreError::Unavailable(reason)) => {
                let state = self.status().state;
                warn!("Database unavailable during request ({state}): {reason}");

                AppError::ConnectionUnavailable { state }
            }
            other => other,
        }
    }

    async fn supervise(self: Arc<Self>) {
        let mut failures: u32 = 0;

        loop {
            self.state.send_replace(ConnectionState::Connecting);

            if self.verbose {
                info!("Connecting to database at {}", self.target);
            } else {
                info!("Connecting to database...");
            }

            match self.connector.connect().await {
                Ok(store) => {
                    failures = 0;
                    *self.store.write().await = Some(store.clone());
                    self.state.send_replace(ConnectionState::Connected);
                    info!("Database connected");

                    self.monitor(store).await;
                }
                Err(error) => {
                    failures = failures.saturating_add(1);
                    self.state.send_replace(ConnectionState::Disconnected);
                    self.report_failure(&error, failures);

                    if !self.policy.should_retry(failures) {
                        error!("Giving up on the database after {failures} failed attempts");
                        return;
                    }

                    let delay = self.policy.delay(failures - 1);
                    warn!("Server keeps running without the database, retrying in {delay:?}");

                    sleep(delay).await;
                    info!("Retrying database connection...");
                }
            }
        }
    }

    async fn monitor(&self, store: Arc<dyn TodoStore>) {
        loop {
            sleep(self.heartbeat).await;

            match store.ping().await {
                Ok(()) => debug!("Database heartbeat ok"),
                Err(error) => {
                    warn!("Database connection lost: {error}");
                    break;
                }
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        self.store.write().await.take();
        store.close().await;
    }

    fn report_failure(&self, error: &StoreError, failures: u32) {
        error!("Database connection attempt {failures} failed: {error}");

        let reason = error.to_string().to_ascii_lowercase();
        if reason.contains("ssl") || reason.contains("tls") {
            warn!("TLS handshake with the database failed");
        }

        warn!("Check that this host is on the database network access allow-list (e.g. 0.0.0.0/0)");
        warn!("Check that the database user exists and has read/write permissions");

        if self.verbose {
            error!("Connection target: {}", self.target);
            error!("Full error: {error:?}");
        }
    }
}
