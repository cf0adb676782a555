//! Gateway connection manager.
//!
//! [`GatewayClient`] owns at most one WebSocket transport at a time. Each
//! transport runs in its own task and feeds inbound frames back into the
//! client. State changes happen under one reentrant guard, so transitions
//! never interleave and status subscribers observe them in order.
//!
//! Transports and timers carry the generation they were started under. Any
//! `connect`, `disconnect` or reconnect bumps the generation, which turns
//! late callbacks from superseded transports into no-ops.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use quill_proto::{
    ChallengePayload, ErrorCode, EventFrame, Features, GatewayFrame, ProtoError, ResponseFrame,
    ServerInfo, CONNECT_METHOD,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::{validate_url, ConfigResolver, RateLimitedResolver};
use crate::error::GatewayError;
use crate::events::{Observers, Subscription};
use crate::handshake::{ClientIdentity, HandshakeHandler, HandshakeOutcome};
use crate::keepalive::{KeepAlive, KeepAliveConfig};
use crate::reconnect::{ReconnectConfig, ReconnectDecision, ReconnectScheduler};
use crate::rpc::RpcCorrelator;
use crate::state::ConnectionStatus;

/// Default timeout for opening the WebSocket and completing the handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for RPC calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default minimum interval between config lookups on the reconnect path.
pub const DEFAULT_CONFIG_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

const DISCONNECT_REASON: &str = "client disconnect";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How the client describes itself during the handshake.
    pub identity: ClientIdentity,
    /// Backoff and auth throttling.
    pub reconnect: ReconnectConfig,
    /// Transport ping/pong.
    pub keepalive: KeepAliveConfig,
    /// Budget for opening the socket and again for the handshake.
    pub connect_timeout: Duration,
    /// Default per-request budget.
    pub request_timeout: Duration,
    /// Minimum time between config lookups when reconnecting.
    pub config_refresh_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            identity: ClientIdentity::default(),
            reconnect: ReconnectConfig::default(),
            keepalive: KeepAliveConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            config_refresh_interval: DEFAULT_CONFIG_REFRESH_INTERVAL,
        }
    }
}

impl ClientOptions {
    /// Set the client identity.
    #[must_use]
    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Set the reconnect configuration.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the keep-alive configuration.
    #[must_use]
    pub fn with_keepalive(mut self, keepalive: KeepAliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the default request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the config refresh interval.
    #[must_use]
    pub const fn with_config_refresh_interval(mut self, interval: Duration) -> Self {
        self.config_refresh_interval = interval;
        self
    }
}

/// Options for [`GatewayClient::disconnect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectOptions {
    /// Schedule a fresh reconnect after closing.
    pub reconnect: bool,
    /// Reason recorded for the close and handed to pending calls.
    pub reason: Option<String>,
}

impl DisconnectOptions {
    /// Close and stay closed.
    #[must_use]
    pub const fn stop() -> Self {
        Self {
            reconnect: false,
            reason: None,
        }
    }

    /// Close and reconnect with backoff, recording `reason`.
    #[must_use]
    pub fn reconnect(reason: impl Into<String>) -> Self {
        Self {
            reconnect: true,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseKind {
    /// Socket error, remote close or failed open.
    Transport,
    /// The gateway refused the handshake; already recorded.
    Rejected,
    /// No pong within the keep-alive window.
    KeepAlive,
}

#[derive(Debug, Clone)]
struct CloseReason {
    kind: CloseKind,
    message: String,
}

impl CloseReason {
    fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: CloseKind::Transport,
            message: message.into(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: CloseKind::Rejected,
            message: message.into(),
        }
    }

    fn keepalive(message: impl Into<String>) -> Self {
        Self {
            kind: CloseKind::KeepAlive,
            message: message.into(),
        }
    }
}

/// What the transport task should do after a frame was handled.
enum Dispatch {
    Continue,
    Close(CloseReason),
}

#[derive(Default)]
struct ConnectionCore {
    status: ConnectionStatus,
    url: Option<String>,
    token: Option<String>,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    handshake: HandshakeHandler,
    features: Features,
    server_info: Option<ServerInfo>,
    protocol: Option<u32>,
    scheduler: ReconnectScheduler,
    reconnect_timer: Option<AbortHandle>,
    /// Disconnected with retries suppressed by the auth cool-down.
    parked: bool,
}

struct Inner {
    options: ClientOptions,
    resolver: RateLimitedResolver,
    serial: ReentrantMutex<()>,
    core: Mutex<ConnectionCore>,
    rpc: RpcCorrelator,
    status_tx: watch::Sender<ConnectionStatus>,
    status_observers: Arc<Observers<ConnectionStatus>>,
    event_observers: Arc<Observers<EventFrame>>,
}

/// Handle to a gateway connection.
///
/// Cheap to clone; all clones share one connection. Background tasks only
/// hold weak references, so dropping the last handle tears everything down.
///
/// Methods that start transports or timers must be called from within a
/// Tokio runtime.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("status", &self.status())
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Create a disconnected client that pulls configuration from `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn ConfigResolver>, options: ClientOptions) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let core = ConnectionCore {
            scheduler: ReconnectScheduler::new(options.reconnect.clone()),
            ..ConnectionCore::default()
        };

        Self {
            inner: Arc::new(Inner {
                resolver: RateLimitedResolver::new(resolver, options.config_refresh_interval),
                options,
                serial: ReentrantMutex::new(()),
                core: Mutex::new(core),
                rpc: RpcCorrelator::new(),
                status_tx,
                status_observers: Observers::new("status"),
                event_observers: Observers::new("event"),
            }),
        }
    }

    /// Options the client was built with.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Open a transport to `url`, presenting `token` during the handshake.
    ///
    /// Does nothing while connecting or connected. Otherwise any pending
    /// reconnect is cancelled and a fresh attempt starts immediately.
    pub fn connect(&self, url: impl Into<String>, token: Option<String>) {
        let inner = &self.inner;
        let _serial = inner.serial.lock();
        {
            let mut core = inner.core.lock();
            if core.status.is_active() {
                debug!(status = %core.status, "connect ignored; already active");
                return;
            }
            core.url = Some(url.into());
            core.token = token;
        }
        inner.open_transport();
    }

    /// Close the transport.
    ///
    /// Cancels any pending reconnect and rejects every in-flight request.
    /// With `reconnect` set, a fresh backoff cycle starts afterwards.
    pub fn disconnect(&self, options: DisconnectOptions) {
        let inner = &self.inner;
        let _serial = inner.serial.lock();
        let reason = options
            .reason
            .unwrap_or_else(|| DISCONNECT_REASON.to_string());

        let generation = {
            let mut core = inner.core.lock();
            if let Some(timer) = core.reconnect_timer.take() {
                timer.abort();
            }
            core.generation += 1;
            if let Some(outbound) = core.outbound.take() {
                let _ = outbound.send(Outbound::Close);
            }
            core.handshake.reset();
            core.parked = false;
            if options.reconnect {
                core.scheduler.record_transport_failure(reason.clone());
            }
            core.generation
        };

        info!(%reason, reconnect = options.reconnect, "disconnecting from gateway");
        inner.rpc.fail_all(&reason);
        inner.transition(ConnectionStatus::Disconnected);

        if options.reconnect {
            inner.schedule_reconnect(generation);
        }
    }

    /// Replace the token presented on the next handshake.
    ///
    /// A client parked by the auth cool-down retries immediately when the
    /// token actually changed.
    pub fn set_token(&self, token: Option<String>) {
        let inner = &self.inner;
        let _serial = inner.serial.lock();
        let retry = {
            let mut core = inner.core.lock();
            let changed = core.token != token;
            core.token = token;
            changed && core.parked && core.status == ConnectionStatus::Disconnected
        };

        if retry {
            info!("credentials changed; retrying gateway connection");
            inner.open_transport();
        }
    }

    /// Send a request and wait for its response payload.
    ///
    /// Fails immediately with [`GatewayError::NotConnected`] unless the
    /// handshake has completed; nothing is queued. `timeout` defaults to the
    /// client's request timeout.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, GatewayError> {
        let timeout = timeout.unwrap_or(self.inner.options.request_timeout);

        let reply = {
            let core = self.inner.core.lock();
            let outbound = match (&core.outbound, core.status) {
                (Some(outbound), ConnectionStatus::Connected) => outbound.clone(),
                _ => {
                    return Err(GatewayError::NotConnected {
                        method: method.to_string(),
                        status: core.status,
                    });
                }
            };

            let id = self.inner.rpc.next_id();
            let json = GatewayFrame::request(id.clone(), method, params).to_json()?;
            let reply = self.inner.rpc.register(&id, method, timeout);
            if outbound.send(Outbound::Text(json)).is_err() {
                self.inner.rpc.cancel(&id);
                return Err(GatewayError::ConnectionClosed(
                    "transport closed".to_string(),
                ));
            }
            debug!(%id, method, "request sent");
            reply
        };

        reply.wait().await
    }

    /// Typed variant of [`request`](Self::request).
    pub async fn call<T, P>(
        &self,
        method: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| GatewayError::Protocol(ProtoError::Encoding(e.to_string())))?;
        let payload = self.request(method, params, timeout).await?;
        serde_json::from_value(payload).map_err(|source| GatewayError::Decode {
            method: method.to_string(),
            source,
        })
    }

    /// Make sure the client is connected, starting a connection from freshly
    /// resolved configuration if it is idle.
    ///
    /// `timeout` defaults to the connect timeout.
    pub async fn ensure_connected(&self, timeout: Option<Duration>) -> Result<(), GatewayError> {
        let timeout = timeout.unwrap_or(self.inner.options.connect_timeout);

        if self.status() == ConnectionStatus::Disconnected {
            let (url, token) = match self.inner.resolver.resolve_now() {
                Some(config) => {
                    let token = config.token.or_else(|| self.inner.core.lock().token.clone());
                    (config.url, token)
                }
                None => {
                    let core = self.inner.core.lock();
                    match &core.url {
                        Some(url) => (url.clone(), core.token.clone()),
                        None => {
                            return Err(GatewayError::Config(
                                "no gateway url configured".to_string(),
                            ));
                        }
                    }
                }
            };
            validate_url(&url)?;
            self.connect(url, token);
        }

        let mut status = self.inner.status_tx.subscribe();
        let connected = tokio::time::timeout(
            timeout,
            status.wait_for(|s| *s == ConnectionStatus::Connected),
        )
        .await
        .map(|result| result.is_ok());

        match connected {
            Ok(true) => Ok(()),
            Ok(false) => Err(GatewayError::ConnectionClosed(
                "status channel closed".to_string(),
            )),
            Err(_) => Err(GatewayError::ConnectTimeout { timeout }),
        }
    }

    /// Subscribe to server events (everything except the handshake
    /// challenge). Callbacks run on the connection task and must not block.
    pub fn on_event<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EventFrame) + Send + Sync + 'static,
    {
        self.inner.event_observers.subscribe(callback)
    }

    /// Subscribe to status changes. The callback receives the current status
    /// right away, then every transition.
    pub fn on_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        let _serial = self.inner.serial.lock();
        let current = self.status();
        self.inner
            .status_observers
            .subscribe_and_replay(callback, &current)
    }

    /// Async view of the connection status.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.core.lock().status
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Most recent connection error.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.core.lock().scheduler.state().last_error.clone()
    }

    /// Code of the most recent handshake rejection.
    #[must_use]
    pub fn last_error_code(&self) -> Option<ErrorCode> {
        self.inner.core.lock().scheduler.state().last_error_code.clone()
    }

    /// Features advertised by the last successful handshake.
    #[must_use]
    pub fn features(&self) -> Features {
        self.inner.core.lock().features.clone()
    }

    /// Server details from the last successful handshake.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.core.lock().server_info.clone()
    }

    /// Protocol version negotiated by the last successful handshake.
    #[must_use]
    pub fn protocol(&self) -> Option<u32> {
        self.inner.core.lock().protocol
    }

    /// Retries scheduled since the last successful handshake.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core.lock().scheduler.state().attempt_count
    }

    /// Whether reconnects are suppressed until the token changes.
    #[must_use]
    pub fn is_parked(&self) -> bool {
        self.inner.core.lock().parked
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.rpc.len()
    }
}

impl Inner {
    /// Move to `next` and notify subscribers. Must run under `serial`.
    fn transition(&self, next: ConnectionStatus) {
        let previous = {
            let mut core = self.core.lock();
            std::mem::replace(&mut core.status, next)
        };
        if previous == next {
            return;
        }

        debug!(from = %previous, to = %next, "gateway status changed");
        self.status_tx.send_replace(next);
        self.status_observers.emit(&next);
    }

    /// Start a new transport to the stored URL. Must run under `serial`.
    fn open_transport(self: &Arc<Self>) {
        let (generation, url) = {
            let mut core = self.core.lock();
            let Some(url) = core.url.clone() else {
                warn!("no gateway url; cannot open transport");
                return;
            };
            if let Some(timer) = core.reconnect_timer.take() {
                timer.abort();
            }
            core.generation += 1;
            core.outbound = None;
            core.handshake.reset();
            core.parked = false;
            (core.generation, url)
        };

        info!(%url, generation, "connecting to gateway");
        self.transition(ConnectionStatus::Connecting);

        tokio::spawn(run_transport(
            Arc::downgrade(self),
            generation,
            url,
            self.options.connect_timeout,
            self.options.keepalive.clone(),
        ));
    }

    /// Hand the transport's outbound channel to the client, unless the
    /// transport was superseded while it was opening.
    fn attach(&self, generation: u64, outbound: mpsc::UnboundedSender<Outbound>) -> bool {
        let mut core = self.core.lock();
        if core.generation != generation {
            return false;
        }
        core.outbound = Some(outbound);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.core.lock().generation == generation
    }

    fn handle_text(self: &Arc<Self>, generation: u64, text: &str) -> Dispatch {
        let frame = match GatewayFrame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed gateway frame");
                return Dispatch::Continue;
            }
        };

        let _serial = self.serial.lock();
        if !self.is_current(generation) {
            return Dispatch::Continue;
        }

        match frame {
            GatewayFrame::Event(event) if event.is_challenge() => self.on_challenge(&event),
            GatewayFrame::Event(event) => {
                debug!(event = %event.event, seq = ?event.seq, "gateway event");
                self.event_observers.emit(&event);
                Dispatch::Continue
            }
            GatewayFrame::Response(response) => self.on_response(response),
            GatewayFrame::Request(request) => {
                debug!(id = %request.id, method = %request.method, "ignoring request from gateway");
                Dispatch::Continue
            }
        }
    }

    fn on_challenge(&self, event: &EventFrame) -> Dispatch {
        let (status, in_progress, configured_token) = {
            let core = self.core.lock();
            (core.status, core.handshake.in_progress(), core.token.clone())
        };
        if status != ConnectionStatus::Connecting {
            debug!(%status, "ignoring challenge outside of handshake");
            return Dispatch::Continue;
        }
        if in_progress {
            debug!("ignoring repeated challenge");
            return Dispatch::Continue;
        }

        match ChallengePayload::from_value(&event.payload) {
            Ok(challenge) => {
                debug!(nonce = %challenge.nonce, ts = ?challenge.ts, "received connect challenge");
            }
            Err(e) => warn!(error = %e, "malformed challenge payload; answering anyway"),
        }

        let token = configured_token.or_else(|| self.resolver.resolve_now().and_then(|c| c.token));
        let id = self.rpc.next_id();
        let params = match serde_json::to_value(self.options.identity.connect_params(token.clone()))
        {
            Ok(params) => params,
            Err(e) => {
                return Dispatch::Close(CloseReason::transport(format!(
                    "failed to encode connect params: {e}"
                )));
            }
        };
        let json = match GatewayFrame::request(id.clone(), CONNECT_METHOD, params).to_json() {
            Ok(json) => json,
            Err(e) => return Dispatch::Close(CloseReason::transport(e.to_string())),
        };

        let mut core = self.core.lock();
        if core.token.is_none() {
            core.token.clone_from(&token);
        }
        core.handshake.begin(id.clone());
        core.scheduler.record_connect_attempt(token.as_deref());
        let sent = core
            .outbound
            .as_ref()
            .is_some_and(|outbound| outbound.send(Outbound::Text(json)).is_ok());
        if !sent {
            return Dispatch::Close(CloseReason::transport(
                "transport closed before connect request",
            ));
        }

        debug!(%id, has_token = token.is_some(), "sent connect request");
        Dispatch::Continue
    }

    fn on_response(&self, response: ResponseFrame) -> Dispatch {
        if self.rpc.contains(&response.id) {
            self.rpc.complete(response);
            return Dispatch::Continue;
        }

        let outcome = {
            let mut core = self.core.lock();
            if !core.handshake.awaiting(&response.id) {
                debug!(id = %response.id, "dropping unmatched response");
                return Dispatch::Continue;
            }
            core.handshake.interpret(response)
        };

        match outcome {
            HandshakeOutcome::Accepted(hello) => {
                {
                    let mut core = self.core.lock();
                    core.features = hello.features.unwrap_or_default();
                    core.server_info = hello.server;
                    core.protocol = hello.protocol;
                    core.scheduler.record_connected();
                    core.parked = false;
                }
                info!("gateway handshake complete");
                self.transition(ConnectionStatus::Connected);
                Dispatch::Continue
            }
            HandshakeOutcome::Rejected {
                code,
                message,
                auth,
            } => {
                warn!(
                    code = ?code,
                    %message,
                    auth,
                    "gateway rejected connect"
                );
                self.core
                    .lock()
                    .scheduler
                    .record_rejection(code, message.clone(), auth, Instant::now());
                Dispatch::Close(CloseReason::rejected(format!("connect rejected: {message}")))
            }
        }
    }

    /// Transport for `generation` ended.
    fn handle_close(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        let _serial = self.serial.lock();
        {
            let mut core = self.core.lock();
            if core.generation != generation {
                debug!(generation, "ignoring close of superseded transport");
                return;
            }
            core.outbound = None;
            core.handshake.reset();
            if reason.kind != CloseKind::Rejected {
                core.scheduler.record_transport_failure(reason.message.clone());
            }
        }

        warn!(reason = %reason.message, kind = ?reason.kind, "gateway connection closed");
        let failed = self.rpc.fail_all(&reason.message);
        if failed > 0 {
            debug!(failed, "rejected pending requests");
        }
        self.transition(ConnectionStatus::Disconnected);
        self.schedule_reconnect(generation);
    }

    /// Consult the scheduler and arm the retry timer. Must run under `serial`.
    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let decision = {
            let mut core = self.core.lock();
            // a status subscriber may have reconnected in the meantime
            if core.generation != generation || core.status != ConnectionStatus::Disconnected {
                return;
            }
            let token = core.token.clone();
            let decision = core.scheduler.next(Instant::now(), token.as_deref());
            core.parked = matches!(decision, ReconnectDecision::Suppressed { .. });
            decision
        };

        let delay = match decision {
            ReconnectDecision::Suppressed { remaining } => {
                warn!(
                    remaining_ms = remaining.as_millis() as u64,
                    "gateway rejected credentials; not retrying until the token changes"
                );
                return;
            }
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling gateway reconnect"
                );
                delay
            }
        };

        self.transition(ConnectionStatus::Reconnecting);

        let mut core = self.core.lock();
        if core.generation != generation || core.status != ConnectionStatus::Reconnecting {
            return;
        }
        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_reconnect(generation);
            }
        });
        if let Some(previous) = core.reconnect_timer.replace(timer.abort_handle()) {
            previous.abort();
        }
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let _serial = self.serial.lock();
        {
            let mut core = self.core.lock();
            if core.generation != generation || core.status != ConnectionStatus::Reconnecting {
                return;
            }
            core.reconnect_timer = None;
        }

        if let Some(config) = self.resolver.resolve_if_due() {
            let mut core = self.core.lock();
            core.url = Some(config.url);
            if config.token.is_some() {
                core.token = config.token;
            }
        }

        self.open_transport();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(timer) = core.reconnect_timer.take() {
            timer.abort();
        }
        self.rpc.fail_all("client dropped");
    }
}

/// Drive one transport from open to close.
async fn run_transport(
    weak: Weak<Inner>,
    generation: u64,
    url: String,
    connect_timeout: Duration,
    keepalive: KeepAliveConfig,
) {
    let opened =
        tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str())).await;
    let stream = match opened {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let reason = CloseReason::transport(format!("failed to connect: {e}"));
            finish(&weak, generation, reason);
            return;
        }
        Err(_) => {
            finish(
                &weak,
                generation,
                CloseReason::transport(format!(
                    "connect timed out after {}ms",
                    connect_timeout.as_millis()
                )),
            );
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    match weak.upgrade() {
        Some(inner) if inner.attach(generation, outbound_tx) => {
            debug!(generation, "gateway transport open");
        }
        _ => return,
    }

    let (mut write, mut read) = stream.split();
    let mut monitor = KeepAlive::new(keepalive.clone(), Instant::now());
    let period = keepalive.interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let handshake_deadline = tokio::time::sleep(connect_timeout);
    tokio::pin!(handshake_deadline);
    let mut awaiting_handshake = true;

    let reason = loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        break CloseReason::transport(format!("send failed: {e}"));
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break CloseReason::transport(DISCONNECT_REASON);
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let Some(inner) = weak.upgrade() else {
                        break CloseReason::transport("client dropped");
                    };
                    if let Dispatch::Close(reason) = inner.handle_text(generation, &text) {
                        let _ = write.send(Message::Close(None)).await;
                        break reason;
                    }
                }
                Some(Ok(Message::Pong(_))) => monitor.record_pong(Instant::now()),
                // tungstenite answers pings on its own
                Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Binary(data))) => {
                    warn!(len = data.len(), "dropping binary gateway frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    let detail = frame.map_or_else(
                        || "no close frame".to_string(),
                        |f| format!("{} {}", u16::from(f.code), f.reason),
                    );
                    break CloseReason::transport(format!("closed by gateway ({detail})"));
                }
                Some(Err(e)) => break CloseReason::transport(format!("websocket error: {e}")),
                None => break CloseReason::transport("connection closed"),
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                if monitor.is_stale(now) {
                    break CloseReason::keepalive(format!(
                        "keep-alive timeout: no pong for {}ms",
                        monitor.silence(now).as_millis()
                    ));
                }
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    break CloseReason::transport(format!("ping failed: {e}"));
                }
                monitor.ping_sent();
            },
            () = &mut handshake_deadline, if awaiting_handshake => {
                awaiting_handshake = false;
                let connected = weak
                    .upgrade()
                    .is_some_and(|inner| inner.core.lock().status == ConnectionStatus::Connected);
                if !connected {
                    let _ = write.send(Message::Close(None)).await;
                    break CloseReason::transport(format!(
                        "handshake not completed within {}ms",
                        connect_timeout.as_millis()
                    ));
                }
            },
        }
    };

    debug!(generation, pings = monitor.pings_sent(), "gateway transport finished");
    finish(&weak, generation, reason);
}

fn finish(weak: &Weak<Inner>, generation: u64, reason: CloseReason) {
    if let Some(inner) = weak.upgrade() {
        inner.handle_close(generation, reason);
    }
}
