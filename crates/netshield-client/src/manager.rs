//! The connection manager.
//!
//! One live transport at a time, driven through
//! `Idle -> Connecting -> Open -> Closed -> (ReconnectScheduled -> Connecting | Idle)`.
//!
//! Every attempt gets a fresh generation number. Session tasks and reconnect
//! timers carry the generation they were started for and check it under the
//! state lock before touching anything, so a transport superseded by
//! `disconnect()` or a newer `connect()` can never notify subscribers or
//! move the state machine.
//!
//! Subscriber callbacks always run with the state lock released; they may
//! call back into the manager.
//!
//! Status notifications are serialized by a reentrant delivery gate taken
//! before the state transition and held until every status subscriber has
//! been called, so subscribers observe transitions in the order they
//! happened. Each callback is additionally skipped once the value being
//! delivered no longer matches the current state, which covers a callback
//! that changes the state from inside the delivery.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::registry::{Registry, Subscription};
use crate::transport::{Connector, Transport, WsConnector};
use netshield_core::{Alert, ConnectionState, DashboardUpdate, Frame, Notification};
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Owns the connection to the backend event stream and fans decoded events
/// out to subscribers.
///
/// Cloning is cheap and yields another handle to the same connection.
/// Create one in the application's composition root and pass it down.
pub struct StreamConnectionManager<C: Connector = WsConnector> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Connector> {
    connector: C,
    config: ClientConfig,
    runtime: Handle,
    shared: Mutex<Shared>,
    /// Held across state transition and status delivery. Lock order:
    /// `status_gate` before `shared`.
    status_gate: ReentrantMutex<()>,
    alerts: Registry<Alert>,
    updates: Registry<DashboardUpdate>,
    status: Registry<bool>,
}

struct Shared {
    state: ConnectionState,
    url: String,
    /// Consecutive automatic reconnects since the last successful open.
    attempts: u32,
    intentional_close: bool,
    generation: u64,
    session: Option<CancellationToken>,
    pending_reconnect: Option<JoinHandle<()>>,
}

impl StreamConnectionManager<WsConnector> {
    /// Manager speaking WebSocket. Must be called from within a tokio
    /// runtime; I/O is spawned onto it.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_connector(config, WsConnector)
    }
}

impl<C: Connector> StreamConnectionManager<C> {
    pub fn with_connector(config: ClientConfig, connector: C) -> Result<Self, ClientError> {
        config.validate()?;
        let runtime = Handle::try_current()?;
        let shared = Shared {
            state: ConnectionState::Idle,
            url: config.url.clone(),
            attempts: 0,
            intentional_close: false,
            generation: 0,
            session: None,
            pending_reconnect: None,
        };
        Ok(Self {
            inner: Arc::new(Inner {
                connector,
                config,
                runtime,
                shared: Mutex::new(shared),
                status_gate: ReentrantMutex::new(()),
                alerts: Registry::new("alert"),
                updates: Registry::new("dashboard"),
                status: Registry::new("connection"),
            }),
        })
    }

    /// Connect to the configured endpoint. No-op if already open.
    pub fn connect(&self) {
        self.inner.start(None);
    }

    /// Connect to `url`, which becomes the configured endpoint.
    pub fn connect_to(&self, url: impl Into<String>) {
        self.inner.start(Some(url.into()));
    }

    /// Close the connection and stop all automatic activity.
    ///
    /// Cancels keepalive and any pending reconnect. Calling it on an idle
    /// manager does nothing.
    pub fn disconnect(&self) {
        self.inner.stop();
    }

    /// Drop the current connection, reset the retry budget and connect
    /// again to the configured endpoint.
    pub fn reconnect(&self) {
        self.inner.stop();
        self.inner.shared.lock().attempts = 0;
        self.inner.start(None);
    }

    /// Change the endpoint. Reconnects immediately if currently open;
    /// otherwise the next attempt uses it.
    pub fn set_url(&self, url: impl Into<String>) {
        let url = url.into();
        let was_open = {
            let mut shared = self.inner.shared.lock();
            tracing::info!(from = %shared.url, to = %url, "endpoint changed");
            shared.url = url;
            shared.state.is_open()
        };
        if was_open {
            self.reconnect();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.lock().state.is_open()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    pub fn url(&self) -> String {
        self.inner.shared.lock().url.clone()
    }

    /// Automatic reconnects made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared.lock().attempts
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Subscribe to normalized alerts.
    pub fn on_alert(&self, callback: impl Fn(&Alert) + Send + Sync + 'static) -> Subscription {
        let subscription = self.inner.alerts.subscribe(callback);
        tracing::debug!(subscribers = self.inner.alerts.len(), "alert subscriber added");
        subscription
    }

    /// Subscribe to snapshots, counter updates, engine status and clears.
    pub fn on_dashboard_update(
        &self,
        callback: impl Fn(&DashboardUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        let subscription = self.inner.updates.subscribe(callback);
        tracing::debug!(subscribers = self.inner.updates.len(), "dashboard subscriber added");
        subscription
    }

    /// Subscribe to connection status. The callback is invoked once right
    /// away with the current status.
    pub fn on_connection_change(
        &self,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> Subscription {
        let callback = Arc::new(callback);
        let registered = Arc::clone(&callback);
        let _delivery = self.inner.status_gate.lock();
        let subscription = self
            .inner
            .status
            .subscribe(move |connected: &bool| registered(*connected));
        let current = self.is_connected();
        let _ = self
            .inner
            .status
            .deliver_to(&|connected: &bool| callback(*connected), &current);
        subscription
    }
}

impl<C: Connector> Clone for StreamConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for StreamConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("StreamConnectionManager")
            .field("url", &shared.url)
            .field("state", &shared.state)
            .field("attempts", &shared.attempts)
            .finish()
    }
}

impl<C: Connector> Inner<C> {
    fn start(self: &Arc<Self>, url: Option<String>) {
        let mut shared = self.shared.lock();
        if shared.state.is_open() {
            tracing::debug!("already connected");
            return;
        }
        if let Some(url) = url {
            shared.url = url;
        }
        shared.intentional_close = false;
        self.open_session(&mut shared);
    }

    fn stop(&self) {
        let _delivery = self.status_gate.lock();
        let was_open = {
            let mut shared = self.shared.lock();
            shared.intentional_close = true;
            if let Some(timer) = shared.pending_reconnect.take() {
                timer.abort();
            }
            if let Some(session) = shared.session.take() {
                session.cancel();
            }
            if shared.state != ConnectionState::Idle {
                tracing::info!(url = %shared.url, from = %shared.state, "disconnecting");
            }
            shared.generation += 1;
            let was_open = shared.state.is_open();
            shared.state = ConnectionState::Idle;
            was_open
        };
        if was_open {
            self.notify_status(false);
        }
    }

    fn is_open(&self) -> bool {
        self.shared.lock().state.is_open()
    }

    /// Deliver a status change. Caller holds `status_gate`.
    fn notify_status(&self, connected: bool) {
        let _ = self
            .status
            .notify_while(&connected, || self.is_open() == connected);
    }

    /// Supersede whatever is running and spawn a new session.
    fn open_session(self: &Arc<Self>, shared: &mut Shared) {
        if let Some(timer) = shared.pending_reconnect.take() {
            timer.abort();
        }
        if let Some(session) = shared.session.take() {
            session.cancel();
        }
        shared.generation += 1;
        shared.state = ConnectionState::Connecting;

        let cancel = CancellationToken::new();
        shared.session = Some(cancel.clone());
        let generation = shared.generation;
        let url = shared.url.clone();
        tracing::info!(%url, attempt = shared.attempts, "connecting");

        let inner = Arc::clone(self);
        drop(
            self.runtime
                .spawn(async move { inner.run_session(generation, url, cancel).await }),
        );
    }

    async fn run_session(self: Arc<Self>, generation: u64, url: String, cancel: CancellationToken) {
        let opened = tokio::select! {
            () = cancel.cancelled() => return,
            result = self.connector.connect(&url) => result,
        };
        let mut transport = match opened {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(%url, "connection failed: {}", e);
                self.handle_close(generation);
                return;
            }
        };
        if !self.handle_open(generation) {
            transport.close().await;
            return;
        }

        let period = self.config.keepalive_interval();
        let mut keepalive = time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    transport.close().await;
                    return;
                }
                _ = keepalive.tick() => {
                    tracing::debug!("sending keepalive");
                    if let Err(e) = transport.send_text(&self.config.ping_text).await {
                        tracing::warn!("keepalive failed: {}", e);
                        break;
                    }
                }
                frame = transport.next_frame() => match frame {
                    Some(Ok(text)) => self.handle_frame(generation, &text),
                    Some(Err(e)) => {
                        tracing::warn!("stream error: {}", e);
                        break;
                    }
                    None => {
                        tracing::info!(%url, "connection closed by peer");
                        break;
                    }
                },
            }
        }

        transport.close().await;
        self.handle_close(generation);
    }

    /// Returns false if this generation was superseded while opening.
    fn handle_open(&self, generation: u64) -> bool {
        let _delivery = self.status_gate.lock();
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.state != ConnectionState::Connecting {
                return false;
            }
            shared.state = ConnectionState::Open;
            shared.attempts = 0;
            tracing::info!(url = %shared.url, "connected");
        }
        self.notify_status(true);
        true
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        if self.shared.lock().generation != generation {
            return;
        }

        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(len = text.len(), "dropping frame: {}", e);
                return;
            }
        };
        match &frame {
            Frame::LivenessAck => tracing::trace!("keepalive acknowledged"),
            Frame::Unrecognized { kind } => {
                tracing::info!(%kind, "ignoring unrecognized message type");
            }
            Frame::Message(message) => tracing::debug!(kind = message.kind(), "message received"),
        }

        for notification in frame.into_notifications() {
            match notification {
                Notification::Alert(alert) => {
                    let _ = self.alerts.notify(&alert);
                }
                Notification::Dashboard(update) => {
                    let _ = self.updates.notify(&update);
                }
            }
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64) {
        let delivery = self.status_gate.lock();
        let retry = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            shared.session = None;
            shared.state = ConnectionState::Closed;
            if shared.intentional_close {
                shared.state = ConnectionState::Idle;
                None
            } else if self.config.reconnect.allows(shared.attempts) {
                shared.attempts += 1;
                shared.state = ConnectionState::ReconnectScheduled;
                Some(shared.attempts)
            } else {
                tracing::warn!(
                    attempts = shared.attempts,
                    "reconnect attempts exhausted; call reconnect() to resume"
                );
                shared.state = ConnectionState::Idle;
                None
            }
        };

        self.notify_status(false);
        drop(delivery);

        if let Some(attempt) = retry {
            self.schedule_reconnect(generation, attempt);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64, attempt: u32) {
        let mut shared = self.shared.lock();
        // A status callback may already have connected or disconnected.
        if shared.generation != generation || shared.state != ConnectionState::ReconnectScheduled {
            return;
        }
        let delay = self.config.reconnect.delay_for(attempt);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let deadline = Instant::now() + delay;
        let inner = Arc::clone(self);
        shared.pending_reconnect = Some(self.runtime.spawn(async move {
            time::sleep_until(deadline).await;
            inner.fire_reconnect(generation);
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let mut shared = self.shared.lock();
        if shared.generation != generation || shared.state != ConnectionState::ReconnectScheduled {
            return;
        }
        // This is the running timer; nothing to abort.
        shared.pending_reconnect = None;
        self.open_session(&mut shared);
    }
}
