// SPDX-License-Identifier: MIT

//! The server runtime: accepts TCP or UDP connections and
//! speaks whichever of {newline-delimited TCP, HTTP, WebSocket, RESP2} the
//! first bytes look like, per connection. HTTP responses to a browser get
//! the auto-reconnect `<script>` tag injected when WebSocket
//! support is also enabled, so a page open in a browser reattaches its
//! socket after the runtime restarts.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use sl_core::clock::SystemClock;
use sl_core::model::{RuntimeConfig, RuntimeState, ServerMode};
use sl_core::rate_limit::TokenBucket;
use sl_core::timer::{reconnect_backoff, IDLE_SWEEP_INTERVAL};
use socket2::{Domain, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::context::{ManagerHandle, RuntimeContext};
use crate::error::{EngineError, EngineResult};
use crate::http::{self, Request, Response};
use crate::manager::ManagerCommand;
use crate::outbound::{self, OutboundSender};
use crate::protocol::{self, Detected};
use crate::runtime::{Runtime, RuntimeBase};

type ConnId = u64;

/// UDP mode's peer table cap: once this many peers are tracked, datagrams
/// from further unknown senders are dropped rather than admitted.
const MAX_UDP_PEERS: usize = 10_000;

/// Master-mode per-IP auth backoff: this many failures inside
/// `AUTH_BACKOFF_WINDOW` closes the next accepted connection from that IP
/// immediately, before it gets a chance to retry.
const AUTH_BACKOFF_LIMIT: usize = 10;
const AUTH_BACKOFF_WINDOW: Duration = Duration::from_secs(60);

struct Conn {
    outbound: OutboundSender,
    peer_ip: IpAddr,
    /// `Some` for a UDP peer (its datagram source address); `None` for TCP.
    udp_peer: Option<SocketAddr>,
    is_websocket: AtomicBool,
    last_active: Mutex<std::time::Instant>,
    limiter: Mutex<Option<TokenBucket<SystemClock>>>,
    auth_failures: AtomicU64,
    /// Set once a master-mode auth failure streak hits the limit; the read
    /// loop closes the connection after flushing the denial reply.
    closing: AtomicBool,
    /// Set by `route_client`: once present, messages on this connection are
    /// forwarded to the named server runtime instead of processed locally.
    routed: Mutex<Option<String>>,
}

struct Shared {
    connections: RwLock<HashMap<ConnId, Arc<Conn>>>,
    next_conn: AtomicU64,
    /// The fd that authenticated as master, server mode `master` only.
    master_conn: Mutex<Option<ConnId>>,
    /// Monotonic key counter for the "store every message under the
    /// linked cache" policy.
    cache_key: AtomicU64,
    global_limiter: Mutex<Option<TokenBucket<SystemClock>>>,
    interactive: crate::runtime::base::InteractiveSessions,
    /// UDP mode's peer table: source address to the `Conn` tracking it.
    udp_peers: RwLock<HashMap<SocketAddr, ConnId>>,
    /// Live upstream connections, keyed by their stable conn-id.
    upstreams: RwLock<HashMap<ConnId, OutboundSender>>,
    /// `(origin runtime name, conn_id)` pairs registered with this runtime
    /// via `route_client`, so `on_connect` fires only once per routed
    /// connection.
    routed_clients: RwLock<HashSet<(String, ConnId)>>,
    /// Recent master-mode auth failure timestamps per source IP.
    ip_auth_failures: Mutex<HashMap<IpAddr, Vec<std::time::Instant>>>,
}

impl Shared {
    fn new(global_rate_limit: f64, interactive: crate::runtime::base::InteractiveSessions) -> Self {
        let global_limiter = if global_rate_limit > 0.0 { Some(TokenBucket::new(global_rate_limit, SystemClock)) } else { None };
        Self {
            connections: RwLock::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
            master_conn: Mutex::new(None),
            cache_key: AtomicU64::new(0),
            global_limiter: Mutex::new(global_limiter),
            interactive,
            udp_peers: RwLock::new(HashMap::new()),
            upstreams: RwLock::new(HashMap::new()),
            routed_clients: RwLock::new(HashSet::new()),
            ip_auth_failures: Mutex::new(HashMap::new()),
        }
    }

    fn allow_globally(&self) -> bool {
        match self.global_limiter.lock().as_mut() {
            Some(bucket) => bucket.try_consume(),
            None => true,
        }
    }

    /// Send `payload` to every connection but `exclude`, wrapping it as a
    /// WebSocket text frame for connections that upgraded. Mirrored to any
    /// attached interactive control-plane session. Works for UDP peers the
    /// same as TCP connections, since both live in `connections`.
    fn broadcast(&self, payload: &[u8], exclude: Option<ConnId>) {
        let plain: Arc<[u8]> = Arc::from(payload.to_vec().into_boxed_slice());
        let ws_framed: Arc<[u8]> = Arc::from(sl_wire::ws::frame_text(payload).into_boxed_slice());
        for (id, conn) in self.connections.read().iter() {
            if Some(*id) == exclude {
                continue;
            }
            let sent = if conn.is_websocket.load(Ordering::Relaxed) {
                conn.outbound.push(Arc::clone(&ws_framed))
            } else {
                conn.outbound.push(Arc::clone(&plain))
            };
            if !sent {
                conn.closing.store(true, Ordering::Relaxed);
            }
        }
        crate::runtime::base::mirror_interactive(&self.interactive, payload);
    }

    /// Record a master-mode auth failure from `ip`, pruning entries older
    /// than the backoff window.
    fn record_auth_failure(&self, ip: IpAddr) {
        let now = std::time::Instant::now();
        let mut failures = self.ip_auth_failures.lock();
        let entry = failures.entry(ip).or_default();
        entry.retain(|t| now.duration_since(*t) < AUTH_BACKOFF_WINDOW);
        entry.push(now);
    }

    /// Whether `ip` has hit the master-mode auth failure limit within the
    /// backoff window.
    fn is_ip_auth_blocked(&self, ip: IpAddr) -> bool {
        let now = std::time::Instant::now();
        match self.ip_auth_failures.lock().get_mut(&ip) {
            Some(entries) => {
                entries.retain(|t| now.duration_since(*t) < AUTH_BACKOFF_WINDOW);
                entries.len() >= AUTH_BACKOFF_LIMIT
            }
            None => false,
        }
    }
}

/// Per-connection-task context, cloned once per accepted connection. Holds
/// everything a spawned connection task needs that would otherwise live on
/// `RuntimeBase`/`ServerRuntime`, which aren't reachable from a task that
/// only has `Arc<Shared>` (see `setup`).
#[derive(Clone)]
struct ConnEnv {
    /// This runtime's own name, so forwarded messages can name their
    /// origin back to `route_client`'s target.
    name: String,
    hooks: sl_core::hook::HookTable,
    server_hooks: crate::hooks::ServerExtraHooks,
    stats: Arc<sl_core::stats::RuntimeStats>,
    manager: ManagerHandle,
    mode: ServerMode,
    cache_name: Option<String>,
    master_pw: Option<String>,
    master_forward: bool,
    connection_rate: f64,
    http_dir: Option<std::path::PathBuf>,
    ws_port: u16,
    /// Parent runtime name, for `owner_send`/`owner_broadcast`.
    owner: Option<String>,
    /// Whether teardown flushes queued outbound data before closing.
    drain: bool,
    /// The runtime's teardown signal, so a connection task can react to
    /// `stop` without a back-pointer to `ServerRuntime` itself.
    shutdown: Arc<Notify>,
}

pub struct ServerRuntime {
    base: RuntimeBase,
    shared: Arc<Shared>,
    shutdown: Arc<Notify>,
}

impl ServerRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let global_rate_limit = config.global_rate_limit;
        let base = RuntimeBase::new(config);
        let interactive = base.interactive_sessions();
        Self { base, shared: Arc::new(Shared::new(global_rate_limit, interactive)), shutdown: Arc::new(Notify::new()) }
    }

    /// Number of connections currently open, for the control-plane `stats`
    /// verb and the `max_connections` gate.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.read().len()
    }

    /// Mark `conn_id` as routed to `target`: subsequent messages on that
    /// connection are forwarded there instead of handled locally.
    pub fn route_client(&self, conn_id: ConnId, target: &str) {
        if let Some(conn) = self.shared.connections.read().get(&conn_id) {
            *conn.routed.lock() = Some(target.to_string());
        }
    }

    /// The target side of `route_client`: write back through `conn_id`'s
    /// own write path on the `origin` runtime it was forwarded from (as
    /// seen by `receive_routed_message`).
    pub async fn send_to_client(&self, manager: &ManagerHandle, origin: &str, conn_id: ConnId, msg: &[u8]) -> bool {
        manager.deliver_to_connection(origin.to_string(), conn_id, msg.to_vec()).await
    }

    /// Queue `msg` for a specific upstream by its stable conn-id.
    pub fn upstream_send(&self, conn_id: ConnId, msg: &[u8]) -> bool {
        match self.shared.upstreams.read().get(&conn_id) {
            Some(tx) => tx.push_owned(msg.to_vec()),
            None => false,
        }
    }

    /// Queue `msg` for every connected upstream.
    pub fn upstream_broadcast(&self, msg: &[u8]) {
        for tx in self.shared.upstreams.read().values() {
            tx.push_owned(msg.to_vec());
        }
    }

    /// Sub-server owner-send: delegate to the parent server's write path
    /// for `conn_id` (this runtime has no listen socket of its own when
    /// `port == 0` and `owner` is set, so it rides on the parent's
    /// connections).
    pub async fn owner_send(&self, manager: &ManagerHandle, conn_id: ConnId, msg: &[u8]) -> bool {
        match self.base.config.read().owner.clone() {
            Some(owner) => manager.deliver_to_connection(owner, conn_id, msg.to_vec()).await,
            None => false,
        }
    }

    pub fn owner_broadcast(&self, manager: &ManagerHandle, msg: &[u8]) {
        if let Some(owner) = self.base.config.read().owner.clone() {
            manager.send(ManagerCommand::SendTo { target: owner, message: String::from_utf8_lossy(msg).into_owned() });
        }
    }
}

#[async_trait::async_trait]
impl Runtime for ServerRuntime {
    fn base(&self) -> &RuntimeBase {
        &self.base
    }

    async fn setup(&self, ctx: RuntimeContext) -> EngineResult<()> {
        let config = self.base.config.read().clone();
        let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse().map_err(|e| EngineError::Setup(format!("{e}")))?;

        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown);
        let env = ConnEnv {
            name: config.name.clone(),
            hooks: self.base.hooks.clone(),
            server_hooks: self.base.server_hooks.clone(),
            stats: Arc::clone(&self.base.stats),
            manager: ctx.manager.clone(),
            mode: config.mode,
            cache_name: config.cache_name.clone(),
            master_pw: config.master_pw.clone(),
            master_forward: config.master_forward,
            connection_rate: config.rate_limit,
            http_dir: config.http_dir.clone(),
            ws_port: config.port,
            owner: config.owner.clone(),
            drain: config.drain,
            shutdown: Arc::clone(&shutdown),
        };

        for upstream in config.upstreams.iter().cloned() {
            let conn_id = shared.next_conn.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(run_upstream(upstream, conn_id, Arc::clone(&shared), env.clone(), Arc::clone(&shutdown)));
        }

        if config.udp {
            let socket = UdpSocket::bind(addr).await.map_err(|source| EngineError::Bind { port: config.port, source })?;
            info!(name = %config.name, port = config.port, "server runtime listening (udp)");
            tokio::spawn(run_udp(socket, shared, shutdown, env));
            return Ok(());
        }

        let listener = bind_tcp_listener(addr).map_err(|source| EngineError::Bind { port: config.port, source })?;
        info!(name = %config.name, port = config.port, "server runtime listening");

        let buffers = Arc::clone(&ctx.buffers);
        let name = config.name.clone();
        let max_connections = config.max_connections;
        let is_master = config.mode == ServerMode::Master;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(name = %name, error = %err, "accept failed");
                                continue;
                            }
                        };
                        if is_master && shared.is_ip_auth_blocked(peer.ip()) {
                            drop(stream);
                            continue;
                        }
                        if max_connections > 0 && shared.connections.read().len() >= max_connections as usize {
                            drop(stream);
                            continue;
                        }
                        let _ = stream.set_nodelay(true);
                        let shared = Arc::clone(&shared);
                        let buffers = Arc::clone(&buffers);
                        let env = env.clone();
                        let conn_id = shared.next_conn.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(handle_tcp(stream, peer, conn_id, shared, buffers, env));
                    }
                }
            }
        });

        let idle_timeout = config.idle_timeout;
        if idle_timeout > 0 {
            let shared = Arc::clone(&self.shared);
            let shutdown = Arc::clone(&self.shutdown);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(IDLE_SWEEP_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = ticker.tick() => sweep_idle(&shared, idle_timeout),
                    }
                }
            });
        }

        Ok(())
    }

    async fn teardown(&self, _ctx: RuntimeContext) {
        // Every connection task (TCP, UDP, upstream) and background loop
        // holds its own `shutdown.notified()` branch and tears itself down
        // (draining outbound data first when `drain` is set); there's
        // nothing left to force-close here.
        self.shutdown.notify_waiters();
    }

    fn import_config(&self, config: RuntimeConfig) -> EngineResult<()> {
        if *self.base.state.read() == RuntimeState::Running && config.port != self.base.config.read().port {
            return Err(EngineError::ChangeWhileRunning { field: "port" });
        }
        *self.base.config.write() = config;
        Ok(())
    }

    async fn inject_message(&self, message: String) {
        self.shared.broadcast(message.as_bytes(), None);
    }

    async fn receive_routed_message(&self, origin: String, conn_id: u64, message: String) {
        let first_seen = self.shared.routed_clients.write().insert((origin, conn_id));
        if first_seen {
            if let Some(hook) = &self.base.hooks.on_connect {
                hook.call(conn_id);
            }
        }
        if let Some(hook) = &self.base.hooks.on_client_message {
            hook.call((conn_id, message.clone()));
        }
        if let Some(hook) = &self.base.hooks.on_message {
            hook.call(message);
        }
    }

    async fn routed_disconnect(&self, conn_id: u64) {
        self.shared.routed_clients.write().retain(|(_, id)| *id != conn_id);
        if let Some(hook) = &self.base.hooks.on_disconnect {
            hook.call(conn_id);
        }
    }

    async fn deliver_to_connection(&self, conn_id: u64, message: Vec<u8>) -> bool {
        match self.shared.connections.read().get(&conn_id) {
            Some(conn) => conn.outbound.push_owned(message),
            None => false,
        }
    }
}

/// Build the listening socket with `SO_REUSEADDR`/`SO_REUSEPORT` (unix) and
/// a fixed backlog before handing it to tokio. There's no safe,
/// cross-platform way to set `TCP_DEFER_ACCEPT` without a raw `setsockopt`
/// call (this workspace forbids `unsafe_code`), so that one knob is left
/// unapplied; `TCP_NODELAY` is set per accepted connection instead, since
/// it's a connected-socket option, not a listen-socket one.
fn bind_tcp_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(4096)?;
    TcpListener::from_std(socket.into())
}

fn sweep_idle(shared: &Shared, idle_timeout: u64) {
    let cutoff = Duration::from_secs(idle_timeout);
    let now = std::time::Instant::now();
    let stale: Vec<ConnId> = shared
        .connections
        .read()
        .iter()
        .filter(|(_, conn)| now.duration_since(*conn.last_active.lock()) > cutoff)
        .map(|(id, _)| *id)
        .collect();
    let mut connections = shared.connections.write();
    for id in stale {
        connections.remove(&id);
    }
}

/// Drains a UDP peer's outbound queue into `send_to`, so `Shared::broadcast`
/// reaches UDP peers the same way it reaches TCP connections.
async fn run_udp_peer(socket: Arc<UdpSocket>, peer: SocketAddr, mut rx: outbound::OutboundReceiver) {
    while let Some(buf) = rx.recv().await {
        if buf.is_empty() {
            break;
        }
        if socket.send_to(&buf, peer).await.is_err() {
            break;
        }
    }
}

async fn run_udp(socket: UdpSocket, shared: Arc<Shared>, shutdown: Arc<Notify>, env: ConnEnv) {
    let socket = Arc::new(socket);
    let mut buf = vec![0u8; crate::reactor::BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            received = socket.recv_from(&mut buf) => {
                let Ok((n, peer)) = received else { continue };
                let datagram = buf[..n].to_vec();

                let existing = shared.udp_peers.read().get(&peer).copied();
                let (conn_id, conn, is_new) = match existing.and_then(|id| shared.connections.read().get(&id).cloned().map(|conn| (id, conn))) {
                    Some((id, conn)) => (id, conn, false),
                    None => {
                        if shared.udp_peers.read().len() >= MAX_UDP_PEERS {
                            continue;
                        }
                        let id = shared.next_conn.fetch_add(1, Ordering::Relaxed);
                        let limiter = if env.connection_rate > 0.0 { Some(TokenBucket::new(env.connection_rate, SystemClock)) } else { None };
                        let (tx, rx) = outbound::channel(outbound::OUTBOUND_QUEUE_CAP);
                        let conn = Arc::new(Conn {
                            outbound: tx,
                            peer_ip: peer.ip(),
                            udp_peer: Some(peer),
                            is_websocket: AtomicBool::new(false),
                            last_active: Mutex::new(std::time::Instant::now()),
                            limiter: Mutex::new(limiter),
                            auth_failures: AtomicU64::new(0),
                            closing: AtomicBool::new(false),
                            routed: Mutex::new(None),
                        });
                        shared.udp_peers.write().insert(peer, id);
                        shared.connections.write().insert(id, Arc::clone(&conn));
                        env.stats.record_connection();
                        tokio::spawn(run_udp_peer(Arc::clone(&socket), peer, rx));
                        (id, conn, true)
                    }
                };

                *conn.last_active.lock() = std::time::Instant::now();
                if is_new {
                    if let Some(hook) = &env.hooks.on_connect {
                        hook.call(conn_id);
                    }
                }

                process_message(&env, &shared, &conn, conn_id, datagram).await;

                if conn.closing.load(Ordering::Relaxed) {
                    shared.connections.write().remove(&conn_id);
                    shared.udp_peers.write().remove(&peer);
                    if let Some(hook) = &env.hooks.on_disconnect {
                        hook.call(conn_id);
                    }
                }
            }
        }
    }

    let mut udp_peers = shared.udp_peers.write();
    let mut connections = shared.connections.write();
    for (_, id) in udp_peers.drain() {
        connections.remove(&id);
    }
}

/// Dial a configured upstream and keep it connected, reconnecting with
/// exponential backoff on failure or drop. Received lines dispatch to
/// `on_upstream(conn_id, line)` directly, not through `process_message` —
/// upstream data isn't a client request and never enters server-mode
/// dispatch or routing.
async fn run_upstream(addr: String, conn_id: ConnId, shared: Arc<Shared>, env: ConnEnv, shutdown: Arc<Notify>) {
    let mut attempt: u32 = 0;
    loop {
        match TcpStream::connect(&addr).await {
            Ok(mut stream) => {
                attempt = 0;
                let (tx, mut rx) = outbound::channel(outbound::OUTBOUND_QUEUE_CAP);
                shared.upstreams.write().insert(conn_id, tx);
                if let Some(hook) = &env.hooks.on_upstream_connect {
                    hook.call(conn_id);
                }

                let mut buf = bytes::BytesMut::with_capacity(crate::reactor::BUFFER_SIZE);
                'conn: loop {
                    tokio::select! {
                        _ = shutdown.notified() => {
                            shared.upstreams.write().remove(&conn_id);
                            return;
                        }
                        result = stream.read_buf(&mut buf) => {
                            match result {
                                Ok(0) | Err(_) => break 'conn,
                                Ok(_) => {
                                    while let Some(nl) = buf.iter().position(|&b| b == b'\n') {
                                        let line = buf[..nl].strip_suffix(b"\r").unwrap_or(&buf[..nl]).to_vec();
                                        let _ = buf.split_to(nl + 1);
                                        if let Some(hook) = &env.hooks.on_upstream {
                                            hook.call((conn_id, line));
                                        }
                                    }
                                }
                            }
                        }
                        Some(out) = rx.recv() => {
                            if stream.write_all(&out).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                }
                shared.upstreams.write().remove(&conn_id);
                if let Some(hook) = &env.hooks.on_upstream_disconnect {
                    hook.call(conn_id);
                }
            }
            Err(err) => {
                warn!(addr = %addr, error = %err, attempt, "upstream connect failed");
            }
        }

        attempt += 1;
        tokio::select! {
            _ = shutdown.notified() => return,
            _ = tokio::time::sleep(reconnect_backoff(attempt)) => {}
        }
    }
}

/// On drain-enabled teardown, flush whatever's already queued with a
/// blocking write before the socket closes.
async fn flush_outbound_drain(rx: &mut outbound::OutboundReceiver, stream: &mut TcpStream) {
    for buf in rx.drain_ready() {
        if stream.write_all(&buf).await.is_err() {
            break;
        }
    }
}

async fn handle_tcp(
    mut stream: TcpStream,
    peer: SocketAddr,
    conn_id: ConnId,
    shared: Arc<Shared>,
    buffers: Arc<crate::reactor::BufferPool>,
    env: ConnEnv,
) {
    if !env.hooks.dispatch_auth(conn_id) {
        return;
    }

    let limiter = if env.connection_rate > 0.0 { Some(TokenBucket::new(env.connection_rate, SystemClock)) } else { None };
    let (tx, mut rx) = outbound::channel(outbound::OUTBOUND_QUEUE_CAP);
    let conn = Arc::new(Conn {
        outbound: tx,
        peer_ip: peer.ip(),
        udp_peer: None,
        is_websocket: AtomicBool::new(false),
        last_active: Mutex::new(std::time::Instant::now()),
        limiter: Mutex::new(limiter),
        auth_failures: AtomicU64::new(0),
        closing: AtomicBool::new(false),
        routed: Mutex::new(None),
    });
    shared.connections.write().insert(conn_id, Arc::clone(&conn));
    env.stats.record_connection();

    if let Some(hook) = &env.hooks.on_connect {
        hook.call(conn_id);
    }

    let mut buf = buffers.acquire();
    let mut detected = Detected::Unknown;

    'outer: loop {
        tokio::select! {
            _ = shared_shutdown_signal(&env) => {
                if env.drain {
                    flush_outbound_drain(&mut rx, &mut stream).await;
                }
                break;
            }
            result = stream.read_buf(&mut buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                *conn.last_active.lock() = std::time::Instant::now();

                if detected == Detected::Unknown {
                    detected = match protocol::detect(&buf) {
                        Some(d) => d,
                        None => continue,
                    };
                }

                match detected {
                    Detected::WsUpgrading | Detected::Http => {
                        let Ok(Some((req, consumed))) = http::try_parse_request(&buf) else { continue };
                        let _ = buf.split_to(consumed);

                        if req.header("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false) {
                            if let Some(key) = req.header("sec-websocket-key") {
                                let response = sl_wire::ws::handshake_response(key);
                                if stream.write_all(response.as_bytes()).await.is_err() {
                                    break;
                                }
                                conn.is_websocket.store(true, Ordering::Relaxed);
                                detected = Detected::Ws;
                                continue;
                            }
                        }

                        let response = serve_http(&env, &req).await;
                        let keep_alive = req.keep_alive();
                        if stream.write_all(&response.encode(keep_alive)).await.is_err() || !keep_alive {
                            break;
                        }
                        detected = Detected::Unknown;
                    }
                    Detected::Ws => {
                        loop {
                            match sl_wire::ws::parse_frame(&buf) {
                                Ok(Some(frame)) => {
                                    let consumed = frame.consumed;
                                    if let Some(text) = ws_text_payload(&frame) {
                                        process_message(&env, &shared, &conn, conn_id, text).await;
                                    } else {
                                        handle_ws_control_frame(&frame, &conn);
                                    }
                                    let _ = buf.split_to(consumed);
                                    if conn.closing.load(Ordering::Relaxed) {
                                        break 'outer;
                                    }
                                }
                                Ok(None) => break,
                                Err(_) => {
                                    let _ = stream.write_all(&sl_wire::ws::frame_close()).await;
                                    break;
                                }
                            }
                        }
                    }
                    Detected::Resp2 => {
                        loop {
                            match sl_wire::resp::parse_views(&buf) {
                                Ok(sl_wire::resp::ParseOutcome::Complete { args, consumed }) => {
                                    let joined = args.iter().map(|a| String::from_utf8_lossy(a)).collect::<Vec<_>>().join(" ");
                                    process_message(&env, &shared, &conn, conn_id, joined.into_bytes()).await;
                                    let _ = buf.split_to(consumed);
                                    if conn.closing.load(Ordering::Relaxed) {
                                        break 'outer;
                                    }
                                }
                                Ok(sl_wire::resp::ParseOutcome::Incomplete) => break,
                                Err(_) => break,
                            }
                        }
                    }
                    Detected::Tcp => {
                        loop {
                            let Some(nl) = buf.iter().position(|&b| b == b'\n') else { break };
                            let line = buf[..nl].strip_suffix(b"\r").unwrap_or(&buf[..nl]).to_vec();
                            let _ = buf.split_to(nl + 1);
                            process_message(&env, &shared, &conn, conn_id, line).await;
                            if conn.closing.load(Ordering::Relaxed) {
                                break 'outer;
                            }
                        }
                    }
                    Detected::Unknown => {}
                }
            }
            Some(outgoing) = rx.recv() => {
                if outgoing.is_empty() {
                    break;
                }
                env.stats.record_bytes_out(outgoing.len() as u64);
                if stream.write_all(&outgoing).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(hook) = &env.hooks.on_disconnect {
        hook.call(conn_id);
    }
    if let Some(target) = conn.routed.lock().clone() {
        env.manager.routed_disconnect(target, conn_id);
    }
    shared.connections.write().remove(&conn_id);
    if *shared.master_conn.lock() == Some(conn_id) {
        *shared.master_conn.lock() = None;
    }
    buffers.release(buf);
}

/// `handle_tcp`'s `shutdown.notified()` branch needs its own `Notify`
/// handle threaded through `ConnEnv` so the connection task can react to
/// runtime teardown without a back-pointer to `ServerRuntime` itself.
async fn shared_shutdown_signal(env: &ConnEnv) {
    env.shutdown.notified().await
}

/// `Some(payload)` for text/binary frames (what `process_message` should
/// see); control frames (ping/pong/close) are answered directly.
fn ws_text_payload(frame: &sl_wire::ws::Frame) -> Option<Vec<u8>> {
    use sl_wire::ws::Opcode;
    matches!(frame.opcode, Opcode::Text | Opcode::Binary).then(|| frame.payload.clone())
}

fn handle_ws_control_frame(frame: &sl_wire::ws::Frame, conn: &Conn) {
    use sl_wire::ws::Opcode;
    match frame.opcode {
        Opcode::Ping => conn.outbound.push_owned(sl_wire::ws::frame_pong(&frame.payload)),
        Opcode::Close => conn.outbound.push_owned(sl_wire::ws::frame_close()),
        Opcode::Pong | Opcode::Text | Opcode::Binary => {}
    }
}

/// The message-processing pipeline, run once a line/frame/RESP2
/// command has been extracted from the wire regardless of which protocol
/// produced it.
async fn process_message(env: &ConnEnv, shared: &Arc<Shared>, conn: &Arc<Conn>, conn_id: ConnId, msg: Vec<u8>) {
    if let Some(limiter) = conn.limiter.lock().as_mut() {
        if !limiter.try_consume() {
            return;
        }
    }
    if !shared.allow_globally() {
        return;
    }

    env.stats.record_message_in(msg.len() as u64);
    let text = String::from_utf8_lossy(&msg).into_owned();

    if env.mode == ServerMode::Master {
        if let Some(pw) = text.strip_prefix("master ") {
            handle_master_auth(env, shared, conn, conn_id, pw).await;
            return;
        }
    }

    if let Some(hook) = &env.hooks.on_client_message {
        hook.call((conn_id, text.clone()));
    }

    if let Some(target) = conn.routed.lock().clone() {
        env.manager.route_message(target, env.name.clone(), conn_id, text);
        return;
    }

    if let Some(rest) = text.strip_prefix("cache ") {
        if let Some(cache_name) = &env.cache_name {
            if let Some(reply) = env.manager.execute_cache(cache_name.clone(), rest.as_bytes().to_vec()).await {
                conn.outbound.push_owned(reply);
            }
            return;
        }
    }

    if let Some(cache_name) = &env.cache_name {
        let key = shared.cache_key.fetch_add(1, Ordering::Relaxed);
        let line = format!("set {key} {text}");
        let _ = env.manager.execute_cache(cache_name.clone(), line.into_bytes()).await;
    }

    match env.mode {
        ServerMode::InOut => {
            let intercepted = env.hooks.on_message.is_some();
            if let Some(hook) = &env.hooks.on_message {
                hook.call(text);
            }
            if !intercepted {
                shared.broadcast(&msg, Some(conn_id));
            }
        }
        ServerMode::In => {
            if let Some(hook) = &env.hooks.on_message {
                hook.call(text);
            }
        }
        ServerMode::Out => {}
        ServerMode::Master => {
            let is_master = *shared.master_conn.lock() == Some(conn_id);
            if is_master {
                shared.broadcast(&msg, Some(conn_id));
            } else if env.master_forward {
                if let Some(master_id) = *shared.master_conn.lock() {
                    let framed = format!("[{conn_id}] {text}\n").into_bytes();
                    if let Some(master_conn) = shared.connections.read().get(&master_id) {
                        master_conn.outbound.push_owned(framed);
                    }
                }
            }
        }
    }
}

/// `"master <pw>"` line in master mode: constant-time compare
/// against the configured password, or the `on_master_auth` hook. After 5
/// failed attempts the connection is marked for closing; every failure
/// also counts toward that source IP's accept-time backoff.
async fn handle_master_auth(env: &ConnEnv, shared: &Arc<Shared>, conn: &Arc<Conn>, conn_id: ConnId, attempt: &str) {
    let literal_ok = env.master_pw.as_deref().map(|pw| constant_time_eq(pw.as_bytes(), attempt.as_bytes())).unwrap_or(false);
    let ok = literal_ok || env.hooks.dispatch_master_auth(conn_id, attempt.to_string());
    if ok {
        *shared.master_conn.lock() = Some(conn_id);
        conn.outbound.push_owned(b"master: ok\n".to_vec());
    } else {
        shared.record_auth_failure(conn.peer_ip);
        if conn.auth_failures.fetch_add(1, Ordering::Relaxed) + 1 >= 5 {
            conn.closing.store(true, Ordering::Relaxed);
        }
        conn.outbound.push_owned(b"master: denied\n".to_vec());
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn serve_http(env: &ConnEnv, req: &Request) -> Response {
    if let Some(hook) = &env.server_hooks.on_http_request {
        return hook.call(req.clone());
    }
    let Some(dir) = &env.http_dir else {
        return Response::not_found();
    };
    let Some(path) = http::resolve_static_path(dir, &req.path) else {
        return Response::not_found();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let is_html = path.extension().map(|e| e == "html" || e == "htm").unwrap_or(false);
            let body = if is_html { http::inject_reconnect_script(&bytes, env.ws_port) } else { bytes };
            Response::ok(body).with_header("Content-Type", guess_content_type(&path))
        }
        Err(_) => Response::not_found(),
    }
}

fn guess_content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::model::RuntimeKind;

    #[test]
    fn new_server_runtime_starts_created() {
        let config = RuntimeConfig::new("s", RuntimeKind::Server);
        let runtime = ServerRuntime::new(config);
        assert_eq!(runtime.state(), RuntimeState::Created);
        assert_eq!(runtime.connection_count(), 0);
    }

    #[test]
    fn guesses_html_content_type() {
        assert_eq!(guess_content_type(std::path::Path::new("x.html")), "text/html");
        assert_eq!(guess_content_type(std::path::Path::new("x.bin")), "application/octet-stream");
    }

    #[test]
    fn auth_backoff_trips_after_limit_and_resets_past_window() {
        let shared = Shared::new(0.0, crate::runtime::base::InteractiveSessions::default());
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..AUTH_BACKOFF_LIMIT {
            assert!(!shared.is_ip_auth_blocked(ip));
            shared.record_auth_failure(ip);
        }
        assert!(shared.is_ip_auth_blocked(ip));
    }

    #[test]
    fn route_client_marks_connection_routed() {
        let config = RuntimeConfig::new("s", RuntimeKind::Server);
        let runtime = ServerRuntime::new(config);
        let (tx, _rx) = outbound::channel(4);
        let conn = Arc::new(Conn {
            outbound: tx,
            peer_ip: "127.0.0.1".parse().unwrap(),
            udp_peer: None,
            is_websocket: AtomicBool::new(false),
            last_active: Mutex::new(std::time::Instant::now()),
            limiter: Mutex::new(None),
            auth_failures: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            routed: Mutex::new(None),
        });
        runtime.shared.connections.write().insert(1, Arc::clone(&conn));
        runtime.route_client(1, "downstream");
        assert_eq!(conn.routed.lock().clone(), Some("downstream".to_string()));
    }

    #[test]
    fn upstream_send_without_a_connection_fails() {
        let config = RuntimeConfig::new("s", RuntimeKind::Server);
        let runtime = ServerRuntime::new(config);
        assert!(!runtime.upstream_send(1, b"hi"));
    }
}
