//! Admin port session
//!
//! Owns one logical connection to a server and drives its lifecycle:
//!
//! - `open` resolves, connects, sends Join and reads exactly one response.
//!   Full/Banned/Error/Shutdown refuse the connection; anything else is
//!   accepted and a `Connect` event is emitted.
//! - A listen task reads and dispatches packets; a heartbeat task pings on a
//!   fixed interval and declares the link dead after five silent intervals.
//! - Either task tears the connection down and reconnects with backoff, but
//!   only while the transport it was started with is still the current one.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::{resolve_host, Backoff, SessionConfig, Transport, TransportError};
use crate::events::{DeliveryMode, Dispatcher, Event, EventKind, Subscription};
use crate::protocol::{
    ChatAction, CodecError, Destination, RequestPacket, ResponseKind, ResponsePacket,
    UpdateFrequency, UpdateType, POLL_ALL,
};
use crate::rcon::{RconCoordinator, RconError, RconLine, RconSink};
use crate::state::{ServerState, StateCache};

/// Token carried by heartbeat pings
const HEARTBEAT_TOKEN: u32 = 1;

/// Token used by [`scrape`] to mark the end of its poll burst
const SCRAPE_TOKEN: u32 = 65535;

/// Why a server turned the connection away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Full,
    Banned,
    Error(u8),
    Shutdown,
}

impl Refusal {
    pub fn from_packet(packet: &ResponsePacket) -> Option<Self> {
        match packet {
            ResponsePacket::Full => Some(Refusal::Full),
            ResponsePacket::Banned => Some(Refusal::Banned),
            ResponsePacket::Error { code } => Some(Refusal::Error(*code)),
            ResponsePacket::Shutdown => Some(Refusal::Shutdown),
            _ => None,
        }
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Full => write!(f, "server full"),
            Refusal::Banned => write!(f, "banned"),
            Refusal::Error(code) => match crate::protocol::NetError::from_u8(*code) {
                Some(error) => write!(f, "error {:?}", error),
                None => write!(f, "error code {}", code),
            },
            Refusal::Shutdown => write!(f, "server shutting down"),
        }
    }
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Server refused connection: {0}")]
    Refused(Refusal),

    #[error("Update frequency not supported by server")]
    InvalidUpdateFrequency,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("State cache is not enabled")]
    StateNotInitialized,

    #[error("Operation timed out")]
    Timeout,

    #[error("Could not resolve host: {0}")]
    Resolve(String),

    #[error("Rcon error: {0}")]
    Rcon(#[from] RconError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Update frequencies the server accepts, per update type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub version: u8,
    pub frequencies: BTreeMap<u16, u16>,
}

impl Capabilities {
    pub fn allows(&self, update_type: UpdateType, frequency: UpdateFrequency) -> bool {
        self.frequencies
            .get(&(update_type as u16))
            .map_or(false, |mask| mask & frequency.bits() != 0)
    }
}

#[derive(Debug, Default)]
struct Liveness {
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    ready: bool,
}

struct Connection {
    transport: Arc<Transport>,
    stop: watch::Sender<bool>,
}

struct Inner {
    config: SessionConfig,
    /// Serializes open and close
    lifecycle: tokio::sync::Mutex<()>,
    /// Set by an explicit close; stops the reconnect loop
    closed: AtomicBool,
    connection: RwLock<Option<Connection>>,
    capabilities: RwLock<Option<Capabilities>>,
    liveness: Mutex<Liveness>,
    dispatcher: Dispatcher,
    state: Option<Arc<StateCache>>,
    rcon: RconCoordinator,
}

/// A handle to an admin port session; clones share the same connection
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let mode = if config.sync_events {
            DeliveryMode::Sync
        } else {
            DeliveryMode::Concurrent
        };
        let state = config.state_enabled.then(|| Arc::new(StateCache::new()));

        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
                connection: RwLock::new(None),
                capabilities: RwLock::new(None),
                liveness: Mutex::new(Liveness::default()),
                dispatcher: Dispatcher::new(mode),
                state,
                rcon: RconCoordinator::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    fn liveness(&self) -> MutexGuard<'_, Liveness> {
        self.inner.liveness.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transport(&self) -> Option<Arc<Transport>> {
        self.inner
            .connection
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.transport.clone())
    }

    fn is_current(&self, transport: &Arc<Transport>) -> bool {
        self.transport()
            .map_or(false, |current| Arc::ptr_eq(&current, transport))
    }

    pub fn is_connected(&self) -> bool {
        self.transport().is_some()
    }

    /// Check if a Pong has been seen on the current connection
    pub fn is_ready(&self) -> bool {
        self.liveness().ready
    }

    /// Time between the last ping and the pong that followed it
    pub fn heartbeat_latency(&self) -> Option<Duration> {
        let liveness = self.liveness();
        match (liveness.last_ping, liveness.last_pong) {
            (Some(ping), Some(pong)) => pong.checked_duration_since(ping),
            _ => None,
        }
    }

    /// Get what the server advertised in its Protocol packet
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.inner
            .capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn supports(&self, update_type: UpdateType, frequency: UpdateFrequency) -> bool {
        self.inner
            .capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(false, |caps| caps.allows(update_type, frequency))
    }

    /// Get the state cache
    pub fn state(&self) -> SessionResult<Arc<StateCache>> {
        self.inner.state.clone().ok_or(SessionError::StateNotInitialized)
    }

    fn start_rcon(&self) {
        let sink = SessionSink {
            inner: Arc::downgrade(&self.inner),
        };
        if self.inner.rcon.start(Arc::new(sink)) {
            tracing::debug!("Started rcon worker");
        }
    }

    /// Connect and authenticate
    pub async fn open(&self) -> SessionResult<()> {
        self.inner.closed.store(false, Ordering::SeqCst);
        self.connect().await
    }

    async fn connect(&self) -> SessionResult<()> {
        let guard = self.inner.lifecycle.lock().await;
        if self.is_connected() {
            return Err(SessionError::AlreadyConnected);
        }

        let config = &self.inner.config;
        let addr = resolve_host(&config.host, config.port)
            .await
            .map_err(|e| SessionError::Resolve(format!("{}:{} ({})", config.host, config.port, e)))?;

        tracing::info!("Connecting to {}", addr);

        let transport = match tokio::time::timeout(config.connect_timeout, Transport::connect(addr)).await {
            Ok(result) => result?,
            Err(_) => return Err(SessionError::Timeout),
        };

        let first = match self.handshake(&transport).await {
            Ok(packet) => packet,
            Err(e) => {
                let _ = transport.shutdown().await;
                return Err(e);
            }
        };

        if let Some(refusal) = Refusal::from_packet(&first) {
            tracing::warn!("Server {} refused our connection: {}", addr, refusal);
            let _ = transport.shutdown().await;
            return Err(SessionError::Refused(refusal));
        }
        if !matches!(first, ResponsePacket::Protocol { .. }) {
            tracing::warn!("Expected Protocol as the first packet, got {:?}", first.kind());
        }

        let transport = Arc::new(transport);
        let (stop, stop_rx) = watch::channel(false);

        *self.inner.capabilities.write().unwrap_or_else(|e| e.into_inner()) = None;
        *self.liveness() = Liveness {
            last_ping: None,
            last_pong: Some(Instant::now()),
            ready: false,
        };
        *self.inner.connection.write().unwrap_or_else(|e| e.into_inner()) = Some(Connection {
            transport: transport.clone(),
            stop,
        });
        drop(guard);

        tracing::info!("Connected to {}", addr);
        self.start_rcon();

        self.dispatch(first).await;
        self.inner.dispatcher.dispatch(Event::Connect);

        tokio::spawn(self.clone().heartbeat(transport.clone(), stop_rx.clone()));
        tokio::spawn(self.clone().listen(transport, stop_rx));

        Ok(())
    }

    async fn handshake(&self, transport: &Transport) -> SessionResult<ResponsePacket> {
        let config = &self.inner.config;
        transport
            .send(&RequestPacket::Join {
                password: config.password.clone(),
                name: config.user_agent.clone(),
                version: config.client_version.clone(),
            })
            .await?;

        match tokio::time::timeout(config.connect_timeout, transport.recv()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    /// Say goodbye and drop the connection; stops any reconnect loop
    pub async fn close(&self) -> SessionResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.teardown(None).await;
        Ok(())
    }

    /// Drop the current connection, or only `expected` if given; returns
    /// whether anything was torn down
    async fn teardown(&self, expected: Option<&Arc<Transport>>) -> bool {
        let guard = self.inner.lifecycle.lock().await;

        let connection = {
            let mut slot = self.inner.connection.write().unwrap_or_else(|e| e.into_inner());
            let stale = match (slot.as_ref(), expected) {
                (Some(current), Some(expected)) => !Arc::ptr_eq(&current.transport, expected),
                _ => false,
            };
            if stale {
                None
            } else {
                slot.take()
            }
        };
        let Some(connection) = connection else {
            return false;
        };

        let _ = connection.stop.send(true);
        if let Err(e) = connection.transport.send(&RequestPacket::Quit).await {
            tracing::debug!("Could not send Quit: {}", e);
        }
        let _ = connection.transport.shutdown().await;

        self.liveness().ready = false;
        self.inner.rcon.abort_in_flight();
        drop(guard);

        tracing::info!(
            "Disconnected from {}:{}",
            self.inner.config.host,
            self.inner.config.port
        );
        self.inner.dispatcher.dispatch(Event::Disconnect);
        true
    }

    /// Reopen with exponential backoff until connected or closed
    fn reconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        let session = self.clone();
        Box::pin(async move {
            if !session.inner.config.auto_reconnect {
                return;
            }

            let mut backoff = Backoff::new();
            loop {
                if session.inner.closed.load(Ordering::SeqCst) {
                    tracing::info!("Session closed, giving up on reconnect");
                    return;
                }

                tracing::info!("Trying to reconnect to {}:{}", session.inner.config.host, session.inner.config.port);
                match session.connect().await {
                    Ok(()) => {
                        tracing::info!("Reconnected");
                        return;
                    }
                    Err(SessionError::AlreadyConnected) => {
                        tracing::info!("Connection already active, no need to reconnect");
                        return;
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::error!("Error reconnecting: {}, retrying in {:?}", e, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }

    async fn restart(&self, transport: &Arc<Transport>) {
        if self.teardown(Some(transport)).await {
            self.reconnect().await;
        }
    }

    async fn listen(self, transport: Arc<Transport>, mut stop: watch::Receiver<bool>) {
        tracing::debug!("Listen loop started");

        loop {
            let result = tokio::select! {
                _ = stop.changed() => return,
                result = transport.recv() => result,
            };

            match result {
                Ok(packet) => {
                    let shutdown = matches!(packet, ResponsePacket::Shutdown);
                    self.dispatch(packet).await;
                    if shutdown {
                        tracing::info!("Server is shutting down, disconnecting");
                        self.restart(&transport).await;
                        return;
                    }
                }
                Err(e) => {
                    if self.is_current(&transport) {
                        tracing::warn!("Error reading from {}: {}", self.inner.config.host, e);
                    }
                    self.restart(&transport).await;
                    return;
                }
            }
        }
    }

    async fn heartbeat(self, transport: Arc<Transport>, mut stop: watch::Receiver<bool>) {
        let timeout = self.inner.config.heartbeat_timeout();
        let mut ticker = tokio::time::interval(self.inner.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = stop.changed() => return,
                _ = ticker.tick() => {}
            }
            if !self.is_current(&transport) {
                return;
            }

            let last_pong = {
                let mut liveness = self.liveness();
                liveness.last_ping = Some(Instant::now());
                liveness.last_pong
            };

            tracing::debug!("Sending ping");
            let sent = transport.send(&RequestPacket::Ping { token: HEARTBEAT_TOKEN }).await;
            let silence = last_pong.map(|t| t.elapsed()).unwrap_or_default();

            let failure = match sent {
                Err(e) => Some(format!("error sending heartbeat: {}", e)),
                Ok(()) if silence > timeout => Some(format!("no pong for {:?}", silence)),
                Ok(()) => None,
            };

            if let Some(reason) = failure {
                if self.is_current(&transport) {
                    tracing::error!("Heartbeat failed ({}), reconnecting", reason);
                }
                self.restart(&transport).await;
                return;
            }
        }
    }

    /// Run internal steps, the state cache, the rcon coordinator and then
    /// registered handlers for one packet
    async fn dispatch(&self, packet: ResponsePacket) {
        tracing::debug!("Received {:?}", packet.kind());

        match &packet {
            ResponsePacket::Protocol { version, frequencies } => {
                *self.inner.capabilities.write().unwrap_or_else(|e| e.into_inner()) = Some(Capabilities {
                    version: *version,
                    frequencies: frequencies.clone(),
                });
            }
            ResponsePacket::Pong { token } => {
                tracing::debug!("Got pong {}", token);
                let mut liveness = self.liveness();
                liveness.last_pong = Some(Instant::now());
                liveness.ready = true;
            }
            ResponsePacket::Welcome { name, .. } => {
                tracing::info!("Welcomed by server {}", name);
                if self.inner.state.is_some() {
                    self.poll_everything().await;
                }
            }
            _ => {}
        }

        if let Some(state) = &self.inner.state {
            for follow_up in state.apply(&packet) {
                if let Err(e) = self.poll(follow_up.update_type, follow_up.id).await {
                    tracing::debug!("Follow-up poll {:?} {} not sent: {}", follow_up.update_type, follow_up.id, e);
                }
            }
        }

        self.inner.rcon.feed(&packet);
        self.inner.dispatcher.dispatch(Event::Packet(packet));
    }

    async fn poll_everything(&self) {
        let polls = [
            (UpdateType::Date, 0),
            (UpdateType::ClientInfo, POLL_ALL),
            (UpdateType::CompanyInfo, POLL_ALL),
            (UpdateType::CompanyEconomy, POLL_ALL),
            (UpdateType::CompanyStats, POLL_ALL),
        ];
        for (update_type, id) in polls {
            if let Err(e) = self.poll(update_type, id).await {
                tracing::debug!("Initial poll of {:?} not sent: {}", update_type, e);
            }
        }
    }

    async fn send(&self, packet: &RequestPacket) -> SessionResult<()> {
        let transport = self.transport().ok_or(SessionError::NotConnected)?;
        transport.send(packet).await?;
        Ok(())
    }

    /// Ask for the current value of `update_type` once
    pub async fn poll(&self, update_type: UpdateType, id: u32) -> SessionResult<()> {
        if !self.supports(update_type, UpdateFrequency::Poll) {
            return Err(SessionError::InvalidUpdateFrequency);
        }
        self.send(&RequestPacket::Poll { update_type, id }).await
    }

    /// Subscribe to `update_type` at a standing frequency
    pub async fn request_updates(&self, update_type: UpdateType, frequency: UpdateFrequency) -> SessionResult<()> {
        if frequency == UpdateFrequency::Poll || !self.supports(update_type, frequency) {
            return Err(SessionError::InvalidUpdateFrequency);
        }
        self.send(&RequestPacket::UpdateFrequency { update_type, frequency })
            .await
    }

    pub async fn chat(
        &self,
        action: ChatAction,
        destination: Destination,
        destination_id: u32,
        message: impl Into<String>,
    ) -> SessionResult<()> {
        self.send(&RequestPacket::Chat {
            action,
            destination,
            destination_id,
            message: message.into(),
        })
        .await
    }

    /// Send JSON to the server's GameScript
    pub async fn game_script(&self, json: impl Into<String>) -> SessionResult<()> {
        self.send(&RequestPacket::GameScript { json: json.into() }).await
    }

    pub async fn ping(&self, token: u32) -> SessionResult<()> {
        self.send(&RequestPacket::Ping { token }).await
    }

    /// Queue an rcon command without waiting for its output
    ///
    /// Commands queued before the first `open` are sent once it connects.
    pub fn submit(&self, command: impl Into<String>) -> SessionResult<()> {
        Ok(self.inner.rcon.submit(command)?)
    }

    /// Queue an rcon command and wait for its output
    pub async fn submit_sync(&self, command: impl Into<String>) -> SessionResult<Vec<RconLine>> {
        self.start_rcon();
        match tokio::time::timeout(self.inner.config.rcon_timeout, self.inner.rcon.submit_sync(command)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    pub fn register<F>(&self, kind: impl Into<EventKind>, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.dispatcher.register(kind, handler)
    }

    pub fn register_once<F>(&self, kind: impl Into<EventKind>, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.dispatcher.register_once(kind, handler)
    }

    pub fn register_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.dispatcher.register_all(handler)
    }
}

/// Sends rcon commands for the coordinator without keeping the session alive
struct SessionSink {
    inner: Weak<Inner>,
}

#[async_trait]
impl RconSink for SessionSink {
    async fn send_rcon(&self, command: &str) -> Result<(), SessionError> {
        let inner = self.inner.upgrade().ok_or(SessionError::NotConnected)?;
        let session = Session { inner };
        session
            .send(&RequestPacket::Rcon {
                command: command.to_string(),
            })
            .await
    }
}

/// Connect once, collect a full state snapshot and disconnect
pub async fn scrape(config: SessionConfig) -> SessionResult<ServerState> {
    let mut config = config;
    config.auto_reconnect = false;
    config.state_enabled = true;
    let deadline = config.connect_timeout;

    let session = Session::new(config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let welcome_tx = tx.clone();
    session.register(ResponseKind::Welcome, move |_: &Event| {
        let _ = welcome_tx.send(None);
    });
    session.register(ResponseKind::Pong, move |event: &Event| {
        if let Some(ResponsePacket::Pong { token }) = event.packet() {
            let _ = tx.send(Some(*token));
        }
    });

    session.open().await?;

    let result = match tokio::time::timeout(deadline, await_scrape(&session, &mut rx)).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout),
    };

    let snapshot = session.state().map(|state| state.snapshot());
    session.close().await?;
    result?;
    snapshot
}

/// Wait for Welcome, then for the Pong that trails the initial polls
async fn await_scrape(
    session: &Session,
    signals: &mut mpsc::UnboundedReceiver<Option<u32>>,
) -> SessionResult<()> {
    // the initial polls go out before Welcome handlers run
    loop {
        match signals.recv().await {
            Some(None) => break,
            Some(Some(_)) => continue,
            None => return Err(SessionError::NotConnected),
        }
    }

    session.ping(SCRAPE_TOKEN).await?;

    loop {
        match signals.recv().await {
            Some(Some(SCRAPE_TOKEN)) => return Ok(()),
            Some(_) => continue,
            None => return Err(SessionError::NotConnected),
        }
    }
}
