//! WebSocket Game Server
//!
//! Async WebSocket server for the wagering clients. Owns the game state,
//! drives the 100 ms game loop, routes client commands and serves
//! Prometheus metrics on the same port.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{interval, interval_at, timeout, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::core::fair::{OsSeedSource, SeedSource};
use crate::core::money::Amount;
use crate::game::bet::PlayerId;
use crate::game::events::GameEvent;
use crate::game::state::{BetRejection, BetRequest, GameConfig, GameState};
use crate::game::tick::{tick, TICK_INTERVAL_MS};
use crate::game::wallet::Wallet;
use crate::network::metrics::{Direction, Metrics, METRICS_CONTENT_TYPE};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::rate_limit::{RateKey, RateLimiter, RATE_LIMIT_CAPACITY, RATE_LIMIT_WINDOW};
use crate::network::session::{ConnectionId, SessionManager};

/// Listen port when `PORT` is unset or invalid.
pub const DEFAULT_PORT: u16 = 8081;

/// Server-initiated ping interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound frames buffered per connection.
const OUTBOUND_QUEUE: usize = 256;

/// How long the writer task may take to flush and close.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

const METRICS_REQUEST: &[u8] = b"GET /metrics";

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Ping interval; a connection with no pong by the next ping is closed.
    /// Also bounds how long a socket may take to complete its handshake.
    pub heartbeat_interval: Duration,
    /// Messages per rate-limit window.
    pub rate_limit_capacity: u32,
    /// Rate-limit window.
    pub rate_limit_window: Duration,
    /// Economic parameters.
    pub game: GameConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            max_connections: 1000,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            rate_limit_capacity: RATE_LIMIT_CAPACITY,
            rate_limit_window: RATE_LIMIT_WINDOW,
            game: GameConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup; unset or invalid values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let port = parse_port(lookup("PORT").as_deref());
        let host = match lookup("HOST") {
            Some(raw) => raw.parse::<IpAddr>().unwrap_or_else(|_| {
                warn!("Invalid HOST environment value {:?}", raw);
                config.bind_addr.ip()
            }),
            None => config.bind_addr.ip(),
        };
        config.bind_addr = SocketAddr::new(host, port);

        if let Some(seed) = lookup("CLIENT_SEED").filter(|s| !s.is_empty()) {
            config.game.client_seed = seed;
        }
        if let Some(balance) = parse_amount("STARTING_BALANCE", lookup("STARTING_BALANCE")) {
            config.game.starting_balance = balance;
        }
        if let Some(bankroll) = parse_amount("INITIAL_BANKROLL", lookup("INITIAL_BANKROLL")) {
            config.game.initial_bankroll = bankroll;
        }
        if let Some(raw) = lookup("MAX_CONNECTIONS") {
            match raw.parse::<usize>() {
                Ok(max) if max > 0 => config.max_connections = max,
                _ => warn!("Invalid MAX_CONNECTIONS environment value {:?}", raw),
            }
        }

        config
    }
}

/// Parse `PORT`; anything but a non-zero u16 falls back to the default.
pub fn parse_port(raw: Option<&str>) -> u16 {
    match raw {
        None => DEFAULT_PORT,
        Some(value) => match value.trim().parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                warn!("Invalid PORT environment value {:?}, using {}", value, DEFAULT_PORT);
                DEFAULT_PORT
            }
        },
    }
}

fn parse_amount(key: &str, raw: Option<String>) -> Option<Amount> {
    let raw = raw?;
    match raw.parse::<f64>().map(Amount::from_whole_units) {
        Ok(Ok(amount)) => Some(amount),
        _ => {
            warn!("Invalid {} environment value {:?}", key, raw);
            None
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// SERVER
// =============================================================================

/// State shared by the accept loop, the game loop and connection tasks.
struct Shared {
    config: ServerConfig,
    clock: GameClock,
    /// Sockets accepted but not yet registered as sessions.
    pending: AtomicUsize,
    state: Mutex<GameState>,
    sessions: SessionManager,
    limiter: Mutex<RateLimiter>,
    metrics: Metrics,
    shutdown_tx: broadcast::Sender<()>,
}

/// Game time in unix milliseconds, pinned to the wall clock once at startup
/// and advanced by the monotonic clock after that.
#[derive(Debug, Clone, Copy)]
struct GameClock {
    started: tokio::time::Instant,
    offset_ms: u64,
}

impl GameClock {
    fn start() -> Self {
        Self {
            started: tokio::time::Instant::now(),
            offset_ms: u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0),
        }
    }

    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.saturating_add(elapsed)
    }
}

/// Holds one slot of the connection cap until the socket becomes a session
/// or goes away.
struct PendingSlot(Arc<Shared>);

impl PendingSlot {
    fn acquire(shared: Arc<Shared>) -> Self {
        shared.pending.fetch_add(1, Ordering::AcqRel);
        Self(shared)
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One connection's view of itself.
struct Client {
    id: ConnectionId,
    addr: SocketAddr,
    uid: Option<PlayerId>,
    tx: mpsc::Sender<Message>,
}

impl Client {
    fn uid_label(&self) -> &str {
        self.uid.as_deref().unwrap_or("unknown")
    }

    fn rate_key(&self) -> RateKey {
        match &self.uid {
            Some(uid) => RateKey::Player(uid.clone()),
            None => RateKey::Connection(self.id),
        }
    }
}

/// The game server.
pub struct GameServer {
    shared: Arc<Shared>,
}

impl GameServer {
    /// Create a new game server with OS-random server seeds.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_seed_source(config, Box::new(OsSeedSource))
    }

    /// Create a server drawing server seeds from `seeds`.
    pub fn with_seed_source(config: ServerConfig, seeds: Box<dyn SeedSource>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let clock = GameClock::start();
        let state = GameState::new(config.game.clone(), seeds, clock.now_ms());
        let limiter = RateLimiter::new(config.rate_limit_capacity, config.rate_limit_window);

        Self {
            shared: Arc::new(Shared {
                config,
                clock,
                pending: AtomicUsize::new(0),
                state: Mutex::new(state),
                sessions: SessionManager::new(),
                limiter: Mutex::new(limiter),
                metrics: Metrics::new(),
                shutdown_tx,
            }),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, GameServerError> {
        Ok(TcpListener::bind(self.shared.config.bind_addr).await?)
    }

    /// Bind and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let local = listener.local_addr()?;
        info!(host = %local.ip(), port = local.port(), version = %self.shared.config.version, "clash-dual server listening");

        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();

        let tick_shared = self.shared.clone();
        let tick_handle = tokio::spawn(async move {
            Self::run_tick_loop(tick_shared).await;
        });

        let cleanup_shared = self.shared.clone();
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_shared).await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let pending = self.shared.pending.load(Ordering::Acquire);
                            if self.shared.sessions.count().await + pending >= self.shared.config.max_connections {
                                warn!(ip = %addr, pending, "Connection limit reached, rejecting");
                                continue;
                            }
                            debug!(ip = %addr, "New connection");
                            let slot = PendingSlot::acquire(self.shared.clone());
                            tokio::spawn(Self::handle_stream(slot, stream, addr));
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        tick_handle.abort();
        cleanup_handle.abort();

        Ok(())
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        let _ = self.shared.shutdown_tx.send(());
    }

    /// Number of live WebSocket connections.
    pub async fn connection_count(&self) -> usize {
        self.shared.sessions.count().await
    }

    /// Text exposition of the server metrics.
    pub fn metrics_text(&self) -> Result<String, GameServerError> {
        self.shared
            .metrics
            .encode()
            .map_err(|e| GameServerError::Internal(e.to_string()))
    }

    // =========================================================================
    // GAME LOOP
    // =========================================================================

    async fn run_tick_loop(shared: Arc<Shared>) {
        let mut ticker = interval(Duration::from_millis(TICK_INTERVAL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let (result, snapshot) = {
                let mut state = shared.state.lock().await;
                let result = tick(&mut state, shared.clock.now_ms());
                (result, state.snapshot())
            };

            for event in result.events {
                Self::handle_game_event(&shared, event).await;
            }

            match (ServerMessage::Snapshot { snapshot }).to_json() {
                Ok(text) => {
                    let sent = shared.sessions.broadcast(&text).await;
                    shared.metrics.record_event(Direction::Out, "snapshot", sent as u64);
                }
                Err(e) => error!(error = %e, "Failed to serialize snapshot"),
            }
        }
    }

    async fn handle_game_event(shared: &Shared, event: GameEvent) {
        match event {
            GameEvent::RoundStarted { mode, round_id, nonce } => {
                debug!(mode = mode.as_str(), round = %round_id, nonce, "Round started");
            }
            GameEvent::PhaseChanged { mode, round_id, phase } => {
                debug!(mode = mode.as_str(), round = %round_id, phase, "Phase changed");
            }
            GameEvent::RoundSettled(summary) => {
                info!(
                    mode = summary.mode.as_str(),
                    nonce = summary.nonce,
                    wagered = %summary.wagered,
                    paid = %summary.payouts,
                    house = %summary.house_delta,
                    rtp = ?summary.rtp,
                    "Round settled"
                );
                shared.metrics.record_round(&summary);
            }
            GameEvent::WalletCredited { player_id, balance } => {
                Self::push_wallet(shared, &player_id, balance).await;
            }
        }
    }

    async fn run_cleanup_loop(shared: Arc<Shared>) {
        let mut ticker = interval(shared.config.rate_limit_window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            shared.limiter.lock().await.prune(Instant::now());
        }
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Sort a fresh socket into a metrics scrape or a WebSocket session. A
    /// peer that stays silent past the heartbeat interval is dropped.
    async fn handle_stream(slot: PendingSlot, stream: TcpStream, addr: SocketAddr) {
        let limit = slot.0.config.heartbeat_interval;

        match timeout(limit, is_metrics_request(&stream)).await {
            Ok(true) => {
                match timeout(limit, serve_metrics(stream, &slot.0.metrics)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(ip = %addr, error = %e, "Metrics request failed"),
                    Err(_) => debug!(ip = %addr, "Metrics request timed out"),
                }
                return;
            }
            Ok(false) => {}
            Err(_) => {
                debug!(ip = %addr, "No request before timeout, closing");
                return;
            }
        }

        match timeout(limit, accept_async(stream)).await {
            Ok(Ok(ws)) => Self::run_connection(slot, ws, addr).await,
            Ok(Err(e)) => debug!(ip = %addr, error = %e, "WebSocket handshake failed"),
            Err(_) => debug!(ip = %addr, "WebSocket handshake timed out"),
        }
    }

    async fn run_connection(slot: PendingSlot, ws: WebSocketStream<TcpStream>, addr: SocketAddr) {
        let shared = slot.0.clone();
        let (mut ws_sender, mut ws_receiver) = ws.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        let id = shared.sessions.register(addr, msg_tx.clone()).await;
        drop(slot);
        shared.metrics.client_connected();
        let mut shutdown_rx = shared.shutdown_tx.subscribe();

        // Spawn message sender task
        let mut sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let mut client = Client { id, addr, uid: None, tx: msg_tx };
        let period = shared.config.heartbeat_interval;
        let mut heartbeat = interval_at(tokio::time::Instant::now() + period, period);
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_text(&shared, &mut client, &text).await;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            warn!(ip = %client.addr, uid = client.uid_label(), "Invalid payload: binary frame");
                            Self::reply(&shared, &client, ServerMessage::error(ErrorCode::InvalidPayload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            awaiting_pong = false;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(ip = %client.addr, error = %e, "WebSocket error");
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if awaiting_pong {
                        info!(ip = %client.addr, uid = client.uid_label(), "Heartbeat missed, closing connection");
                        break;
                    }
                    awaiting_pong = true;
                    if client.tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        // Cleanup
        shared.sessions.unregister(id).await;
        shared.limiter.lock().await.forget(&RateKey::Connection(id));
        shared.metrics.client_disconnected();
        drop(client);
        if timeout(CLOSE_GRACE, &mut sender_task).await.is_err() {
            sender_task.abort();
        }

        debug!(ip = %addr, "Client disconnected");
    }

    async fn handle_text(shared: &Shared, client: &mut Client, text: &str) {
        if !shared.limiter.lock().await.check(client.rate_key(), Instant::now()) {
            debug!(ip = %client.addr, uid = client.uid_label(), "Rate limited");
            Self::reply(shared, client, ServerMessage::error(ErrorCode::RateLimit)).await;
            return;
        }

        let msg = match ClientMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(ip = %client.addr, uid = client.uid_label(), error = %e, "Invalid payload");
                Self::reply(shared, client, ServerMessage::error(ErrorCode::InvalidPayload)).await;
                return;
            }
        };

        shared.metrics.record_event(Direction::In, msg.kind(), 1);
        Self::handle_client_message(shared, client, msg).await;
    }

    /// Route a validated message. The state lock is never held across a send.
    async fn handle_client_message(shared: &Shared, client: &mut Client, msg: ClientMessage) {
        match msg {
            ClientMessage::Auth { uid } => {
                Self::handle_auth(shared, client, uid).await;
            }
            ClientMessage::SwitchMode { mode } => {
                let switched = shared.state.lock().await.switch_mode(mode, shared.clock.now_ms());
                if switched {
                    info!(mode = mode.as_str(), "Live mode switched");
                }
            }
            ClientMessage::Bet { amount, side, bet_id } => {
                let Some(uid) = client.uid.clone() else {
                    debug!(ip = %client.addr, "Bet before auth ignored");
                    return;
                };
                let result = shared.state.lock().await.place_bet(&uid, BetRequest { amount, side, bet_id });
                match result {
                    Ok(balance) => Self::push_wallet(shared, &uid, balance).await,
                    Err(BetRejection::DuplicateBet) => {
                        Self::reply(shared, client, ServerMessage::error(ErrorCode::DuplicateBet)).await;
                    }
                    Err(reason) => debug!(uid = %uid, %reason, "Bet rejected"),
                }
            }
            ClientMessage::Cashout => {
                let Some(uid) = client.uid.clone() else {
                    debug!(ip = %client.addr, "Cashout before auth ignored");
                    return;
                };
                let result = shared.state.lock().await.cashout(&uid);
                match result {
                    Ok(receipt) => {
                        debug!(uid = %uid, fills = receipt.fills.len(), "Cashed out");
                        Self::push_wallet(shared, &uid, receipt.balance).await;
                    }
                    Err(reason) => debug!(uid = %uid, %reason, "Cashout rejected"),
                }
            }
            ClientMessage::Micro { side, what, value } => {
                // `as` truncates toward zero and saturates.
                shared.state.lock().await.adjust_micro(side, what, value as i64);
            }
            ClientMessage::Topup { amount } => {
                let Some(uid) = client.uid.clone() else {
                    debug!(ip = %client.addr, "Topup before auth ignored");
                    return;
                };
                let credited = match Amount::from_whole_units(amount) {
                    Ok(credit) => shared.state.lock().await.top_up(&uid, &credit).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match credited {
                    Ok(balance) => Self::push_wallet(shared, &uid, balance).await,
                    Err(reason) => debug!(uid = %uid, %reason, "Topup rejected"),
                }
            }
            ClientMessage::Ping => {
                Self::reply(shared, client, ServerMessage::Pong).await;
            }
            ClientMessage::Fair { mode, nonce } => {
                let report = shared.state.lock().await.fair_report(mode, nonce);
                let msg = match report {
                    Some(report) => ServerMessage::Fair(report),
                    None => ServerMessage::error(ErrorCode::FairNotFound),
                };
                Self::reply(shared, client, msg).await;
            }
        }
    }

    async fn handle_auth(shared: &Shared, client: &mut Client, requested: Option<PlayerId>) {
        let (uid, balance, snapshot) = {
            let mut state = shared.state.lock().await;
            let (uid, balance) = state.authenticate(requested.as_deref());
            (uid, balance, state.snapshot())
        };

        shared.sessions.bind_player(client.id, &uid).await;
        client.uid = Some(uid.clone());
        debug!(ip = %client.addr, uid = %uid, "Client authenticated");

        let hello = ServerMessage::Hello {
            uid,
            wallet: Wallet { balance },
            snapshot,
        };
        Self::reply(shared, client, hello).await;
    }

    /// Send to this connection only.
    async fn reply(shared: &Shared, client: &Client, msg: ServerMessage) {
        let (kind, text) = match msg.to_json() {
            Ok(text) => (msg.kind(), text),
            Err(e) => {
                error!(ip = %client.addr, kind = msg.kind(), error = %e, "Failed to serialize message");
                match ServerMessage::error(ErrorCode::InternalError).to_json() {
                    Ok(text) => ("error", text),
                    Err(_) => return,
                }
            }
        };
        if client.tx.send(Message::Text(text)).await.is_ok() {
            shared.metrics.record_event(Direction::Out, kind, 1);
        }
    }

    /// Send a balance update to every connection of `uid`.
    async fn push_wallet(shared: &Shared, uid: &str, balance: Amount) {
        let msg = ServerMessage::Wallet { wallet: Wallet { balance } };
        match msg.to_json() {
            Ok(text) => {
                let sent = shared.sessions.send_to_player(uid, &text).await;
                shared.metrics.record_event(Direction::Out, msg.kind(), sent as u64);
            }
            Err(e) => error!(error = %e, "Failed to serialize wallet"),
        }
    }
}

// =============================================================================
// METRICS ENDPOINT
// =============================================================================

async fn is_metrics_request(stream: &TcpStream) -> bool {
    let mut head = [0u8; METRICS_REQUEST.len()];
    matches!(stream.peek(&mut head).await, Ok(n) if head[..n] == *METRICS_REQUEST)
}

async fn serve_metrics(mut stream: TcpStream, metrics: &Metrics) -> std::io::Result<()> {
    // Consume the request head; the path is all that matters.
    let mut request = [0u8; 2048];
    let _ = stream.read(&mut request).await?;

    let (status, body) = match metrics.encode() {
        Ok(body) => ("200 OK", body),
        Err(_) => ("500 Internal Server Error", String::new()),
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {METRICS_CONTENT_TYPE}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fair::SequentialSeedSource;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::{connect_async, MaybeTlsStream};

    type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    async fn start(config: ServerConfig) -> (Arc<GameServer>, SocketAddr, JoinHandle<Result<(), GameServerError>>) {
        let server = Arc::new(GameServer::with_seed_source(config, Box::new(SequentialSeedSource::new("e2e"))));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });
        (server, addr, handle)
    }

    async fn connect(addr: SocketAddr) -> WsClient {
        connect_async(format!("ws://{addr}")).await.unwrap().0
    }

    async fn send(ws: &mut WsClient, value: Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    /// Next text message that is not a snapshot.
    async fn next_reply(ws: &mut WsClient) -> Value {
        timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let value: Value = serde_json::from_str(&text).unwrap();
                        if value["t"] != "snapshot" {
                            return value;
                        }
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended: {other:?}"),
                }
            }
        })
        .await
        .expect("no reply within 5s")
    }

    async fn auth(ws: &mut WsClient, uid: Option<&str>) -> Value {
        match uid {
            Some(uid) => send(ws, json!({"t": "auth", "uid": uid})).await,
            None => send(ws, json!({"t": "auth"})).await,
        }
        let hello = next_reply(ws).await;
        assert_eq!(hello["t"], "hello");
        hello
    }

    /// True once the peer closes the connection.
    async fn closed_within(ws: &mut WsClient, limit: Duration) -> bool {
        timeout(limit, async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .is_ok()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8081);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.rate_limit_capacity, 20);
        assert_eq!(config.game.client_seed, "clash-dual");
    }

    #[test]
    fn test_port_fallback() {
        assert_eq!(parse_port(None), 8081);
        assert_eq!(parse_port(Some("9000")), 9000);
        assert_eq!(parse_port(Some("abc")), 8081);
        assert_eq!(parse_port(Some("0")), 8081);
        assert_eq!(parse_port(Some("70000")), 8081);
        assert_eq!(parse_port(Some("")), 8081);
    }

    #[test]
    fn test_config_from_lookup() {
        let env: BTreeMap<&str, &str> = [
            ("PORT", "9100"),
            ("HOST", "127.0.0.1"),
            ("CLIENT_SEED", "table-7"),
            ("STARTING_BALANCE", "250"),
            ("INITIAL_BANKROLL", "not-a-number"),
            ("MAX_CONNECTIONS", "12"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.bind_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.game.client_seed, "table-7");
        assert_eq!(config.game.starting_balance, Amount::from(250));
        assert_eq!(config.game.initial_bankroll, Amount::from(100_000));
        assert_eq!(config.max_connections, 12);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(test_config());
        assert_eq!(server.connection_count().await, 0);
        assert!(server.metrics_text().unwrap().contains("clash_active_clients 0"));
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            bind_addr: taken.local_addr().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config);
        assert!(matches!(server.run().await, Err(GameServerError::BindFailed(_))));
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let (server, addr, handle) = start(test_config()).await;
        let mut ws = connect(addr).await;
        auth(&mut ws, None).await;

        server.shutdown();
        let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(closed_within(&mut ws, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_hello_and_snapshots() {
        let (_server, addr, _handle) = start(test_config()).await;
        let mut ws = connect(addr).await;

        let hello = auth(&mut ws, None).await;
        assert!(!hello["uid"].as_str().unwrap().is_empty());
        assert_eq!(hello["wallet"]["balance"], 1000);
        assert_eq!(hello["snapshot"]["mode"], "crash_dual");

        let snapshot = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["t"] == "snapshot" {
                        return value;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert!(snapshot["snapshot"]["crash"]["phase"].is_string());
        assert!(snapshot["snapshot"]["bankroll"].is_number());
    }

    #[tokio::test]
    async fn test_invalid_payloads_keep_connection_open() {
        let (_server, addr, _handle) = start(test_config()).await;
        let mut ws = connect(addr).await;

        ws.send(Message::Text("not json".into())).await.unwrap();
        assert_eq!(next_reply(&mut ws).await, json!({"t": "error", "message": "invalid_payload"}));

        send(&mut ws, json!({"t": "bet", "amount": -5, "betId": "x"})).await;
        assert_eq!(next_reply(&mut ws).await["message"], "invalid_payload");

        send(&mut ws, json!({"t": "warp"})).await;
        assert_eq!(next_reply(&mut ws).await["message"], "invalid_payload");

        send(&mut ws, json!({"t": "ping"})).await;
        assert_eq!(next_reply(&mut ws).await, json!({"t": "pong"}));
    }

    #[tokio::test]
    async fn test_bet_then_duplicate() {
        let (_server, addr, _handle) = start(test_config()).await;
        let mut ws = connect(addr).await;
        auth(&mut ws, None).await;

        let bet = json!({"t": "bet", "amount": 50, "side": "A", "betId": "dup-1"});
        send(&mut ws, bet.clone()).await;
        let wallet = next_reply(&mut ws).await;
        assert_eq!(wallet, json!({"t": "wallet", "wallet": {"balance": 950}}));

        send(&mut ws, bet).await;
        assert_eq!(next_reply(&mut ws).await, json!({"t": "error", "message": "duplicate_bet"}));
    }

    #[tokio::test]
    async fn test_commands_before_auth_are_ignored() {
        let (_server, addr, _handle) = start(test_config()).await;
        let mut ws = connect(addr).await;

        send(&mut ws, json!({"t": "bet", "amount": 50, "betId": "early"})).await;
        send(&mut ws, json!({"t": "topup", "amount": 50})).await;
        send(&mut ws, json!({"t": "cashout"})).await;
        send(&mut ws, json!({"t": "ping"})).await;
        // The first reply is the pong; the earlier commands produced nothing.
        assert_eq!(next_reply(&mut ws).await["t"], "pong");
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let (_server, addr, _handle) = start(test_config()).await;
        let mut ws = connect(addr).await;

        for _ in 0..25 {
            send(&mut ws, json!({"t": "ping"})).await;
        }
        let mut pongs = 0;
        let mut limited = 0;
        for _ in 0..25 {
            let reply = next_reply(&mut ws).await;
            if reply["t"] == "pong" {
                pongs += 1;
            } else {
                assert_eq!(reply, json!({"t": "error", "message": "rate_limit"}));
                limited += 1;
            }
        }
        assert_eq!(pongs, 20);
        assert_eq!(limited, 5);
    }

    #[tokio::test]
    async fn test_reconnect_by_uid() {
        let (_server, addr, _handle) = start(test_config()).await;

        let mut first = connect(addr).await;
        let hello = auth(&mut first, None).await;
        let uid = hello["uid"].as_str().unwrap().to_string();
        send(&mut first, json!({"t": "bet", "amount": 120, "betId": "r-1"})).await;
        assert_eq!(next_reply(&mut first).await["wallet"]["balance"], 880);
        first.close(None).await.unwrap();

        let mut second = connect(addr).await;
        let hello = auth(&mut second, Some(&uid)).await;
        assert_eq!(hello["uid"], uid.as_str());
        assert_eq!(hello["wallet"]["balance"], 880);

        let mut stranger = connect(addr).await;
        let hello = auth(&mut stranger, Some("never-seen")).await;
        assert_ne!(hello["uid"], "never-seen");
        assert_eq!(hello["wallet"]["balance"], 1000);
    }

    #[tokio::test]
    async fn test_topup_and_fair_over_the_wire() {
        let (_server, addr, _handle) = start(test_config()).await;
        let mut ws = connect(addr).await;
        auth(&mut ws, None).await;

        send(&mut ws, json!({"t": "topup", "amount": 500})).await;
        assert_eq!(next_reply(&mut ws).await["wallet"]["balance"], 1500);

        send(&mut ws, json!({"t": "fair", "mode": "crash_dual"})).await;
        let fair = next_reply(&mut ws).await;
        assert_eq!(fair["t"], "fair");
        assert_eq!(fair["nonce"], 1);
        assert_eq!(fair["serverSeedHash"].as_str().unwrap().len(), 64);
        assert!(fair.get("serverSeed").is_none());

        send(&mut ws, json!({"t": "fair", "mode": "duel_ab", "nonce": 99})).await;
        assert_eq!(next_reply(&mut ws).await, json!({"t": "error", "message": "fair_not_found"}));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (_server, addr, _handle) = start(test_config()).await;
        let mut ws = connect(addr).await;
        auth(&mut ws, None).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
            .await
            .unwrap()
            .unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("clash_active_clients 1"));
        assert!(response.contains(r#"clash_events_total{direction="in",event="auth"} 1"#));
    }

    #[tokio::test]
    async fn test_idle_client_is_dropped_by_heartbeat() {
        let config = ServerConfig {
            heartbeat_interval: Duration::from_millis(100),
            ..test_config()
        };
        let (server, addr, _handle) = start(config).await;
        let mut ws = connect(addr).await;

        // Not polling the socket means pings go unanswered.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(closed_within(&mut ws, Duration::from_secs(5)).await);
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_silent_sockets_are_dropped_and_count_toward_the_cap() {
        let config = ServerConfig {
            max_connections: 1,
            heartbeat_interval: Duration::from_millis(100),
            ..test_config()
        };
        let (server, addr, _handle) = start(config).await;

        let mut sockets = Vec::new();
        for _ in 0..5 {
            sockets.push(TcpStream::connect(addr).await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Each socket is either refused at the cap or timed out mid-handshake.
        for socket in &mut sockets {
            let mut buf = [0u8; 16];
            let read = timeout(Duration::from_secs(2), socket.read(&mut buf)).await;
            assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))), "socket still open: {read:?}");
        }

        // The slot is free again for a real client.
        let mut ws = connect(addr).await;
        auth(&mut ws, None).await;
        assert_eq!(server.connection_count().await, 1);
    }

    #[test]
    fn test_game_clock_is_monotonic_from_wall_time() {
        let clock = GameClock::start();
        let wall = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap();
        let first = clock.now_ms();
        assert!(first.abs_diff(wall) < 1_000);

        std::thread::sleep(Duration::from_millis(20));
        let second = clock.now_ms();
        assert!(second >= first + 20);
    }

    #[tokio::test]
    async fn test_responsive_client_survives_heartbeat() {
        let config = ServerConfig {
            heartbeat_interval: Duration::from_millis(300),
            ..test_config()
        };
        let (server, addr, _handle) = start(config).await;
        let mut ws = connect(addr).await;

        // Reading keeps answering pings.
        assert!(!closed_within(&mut ws, Duration::from_millis(1500)).await);
        assert_eq!(server.connection_count().await, 1);
    }
}
