// SPDX-License-Identifier: MIT

//! The proxy runtime: load-balances incoming connections across
//! `proxy.backends` in HTTP (path-forwarding) or raw TCP
//! (`copy_bidirectional`) mode, tracking each backend's health with a
//! periodic check and a circuit breaker that trips after
//! `circuit_threshold` consecutive failures and resets after
//! `circuit_timeout_secs`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use sl_core::model::{ProxyProtocol, ProxyStrategy, RuntimeConfig, RuntimeState};
use tokio::io::{copy_bidirectional, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::context::RuntimeContext;
use crate::error::{EngineError, EngineResult};
use crate::http::{self, Response};
use crate::runtime::{Runtime, RuntimeBase};

/// HTTP methods the product treats as safe to retry against a different
/// backend without `--retry-all`.
const IDEMPOTENT_METHODS: [&str; 5] = ["GET", "HEAD", "OPTIONS", "PUT", "DELETE"];

/// Per-backend idle HTTP connection pool: cap and eviction age for entries
/// returned by a request that left the backend connection in a reusable
/// (keep-alive) state.
const POOL_CAP: usize = 32;
const POOL_MAX_AGE: Duration = Duration::from_secs(60);

struct Backend {
    /// `host:port`, mutable because a bare runtime name is resolved to
    /// `127.0.0.1:<port>` once at `setup`, after which it never changes
    /// again.
    addr: Mutex<String>,
    healthy: std::sync::atomic::AtomicBool,
    consecutive_failures: AtomicU32,
    tripped_at: Mutex<Option<Instant>>,
    /// Idle backend connections from HTTP mode, available for reuse by the
    /// next request this backend serves.
    pool: Mutex<VecDeque<(TcpStream, Instant)>>,
}

impl Backend {
    fn addr(&self) -> String {
        self.addr.lock().clone()
    }

    /// Take a still-fresh pooled connection for this backend, discarding any
    /// entries that aged out past `POOL_MAX_AGE` along the way.
    fn acquire_pooled(&self) -> Option<TcpStream> {
        let mut pool = self.pool.lock();
        while let Some((stream, inserted_at)) = pool.pop_back() {
            if inserted_at.elapsed() < POOL_MAX_AGE {
                return Some(stream);
            }
        }
        None
    }

    /// Return a connection left in a reusable state to the pool, dropping it
    /// instead once the pool is at capacity.
    fn release_pooled(&self, stream: TcpStream) {
        let mut pool = self.pool.lock();
        if pool.len() < POOL_CAP {
            pool.push_back((stream, Instant::now()));
        }
    }
}

struct Shared {
    backends: Vec<Backend>,
    round_robin: AtomicUsize,
}

impl Shared {
    fn pick(&self, strategy: ProxyStrategy) -> Option<usize> {
        if self.backends.is_empty() {
            return None;
        }
        let mut available: Vec<usize> = self
            .backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.healthy.load(Ordering::Relaxed))
            .map(|(i, _)| i)
            .collect();
        if available.is_empty() {
            // Every backend looks unhealthy: still attempt one rather than
            // blackhole the request entirely.
            available = (0..self.backends.len()).collect();
        }
        match strategy {
            ProxyStrategy::RoundRobin | ProxyStrategy::Native => {
                let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % available.len();
                Some(available[idx])
            }
            ProxyStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..available.len());
                Some(available[idx])
            }
        }
    }

    /// Backend selection for an HTTP request. `lua`/native strategy calls
    /// `on_route_http(method, path)`; an absent hook or an out-of-range
    /// index falls back to round-robin.
    fn pick_http(&self, strategy: ProxyStrategy, hooks: &crate::hooks::ProxyHooks, method: &str, path: &str) -> Option<usize> {
        if strategy == ProxyStrategy::Native {
            if let Some(hook) = &hooks.on_route_http {
                if let Some(idx) = hook.call((method.to_string(), path.to_string())) {
                    if idx < self.backends.len() {
                        return Some(idx);
                    }
                }
            }
            return self.pick(ProxyStrategy::RoundRobin);
        }
        self.pick(strategy)
    }

    /// Backend selection for a raw TCP connection. `lua`/native strategy
    /// calls `on_route_tcp()`; an absent hook or an out-of-range index falls
    /// back to round-robin.
    fn pick_tcp(&self, strategy: ProxyStrategy, hooks: &crate::hooks::ProxyHooks) -> Option<usize> {
        if strategy == ProxyStrategy::Native {
            if let Some(hook) = &hooks.on_route_tcp {
                if let Some(idx) = hook.call(()) {
                    if idx < self.backends.len() {
                        return Some(idx);
                    }
                }
            }
            return self.pick(ProxyStrategy::RoundRobin);
        }
        self.pick(strategy)
    }

    /// Resolve every bare-name backend to a sibling runtime's port.
    /// Literal `host:port` backends (anything containing a `:`) are left
    /// untouched.
    async fn resolve_backends(&self, ctx: &RuntimeContext) {
        for backend in &self.backends {
            let current = backend.addr();
            if current.contains(':') {
                continue;
            }
            if let Some(port) = ctx.manager.resolve_port(current.clone()).await {
                *backend.addr.lock() = format!("127.0.0.1:{port}");
            } else {
                warn!(backend = %current, "proxy backend name did not resolve to a runtime port");
            }
        }
    }

    fn record_success(&self, idx: usize) {
        let backend = &self.backends[idx];
        backend.consecutive_failures.store(0, Ordering::Relaxed);
        backend.healthy.store(true, Ordering::Relaxed);
        *backend.tripped_at.lock() = None;
    }

    fn record_failure(&self, idx: usize, circuit_threshold: u32) {
        let backend = &self.backends[idx];
        let failures = backend.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= circuit_threshold {
            backend.healthy.store(false, Ordering::Relaxed);
            *backend.tripped_at.lock() = Some(Instant::now());
        }
    }

    fn maybe_reset_circuits(&self, timeout: Duration) {
        for backend in &self.backends {
            let tripped = *backend.tripped_at.lock();
            if let Some(at) = tripped {
                if at.elapsed() >= timeout {
                    backend.healthy.store(true, Ordering::Relaxed);
                    backend.consecutive_failures.store(0, Ordering::Relaxed);
                    *backend.tripped_at.lock() = None;
                }
            }
        }
    }
}

pub struct ProxyRuntime {
    base: RuntimeBase,
    shared: Arc<Shared>,
    shutdown: Arc<Notify>,
}

impl ProxyRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let backends = config
            .proxy
            .backends
            .iter()
            .map(|addr| Backend {
                addr: Mutex::new(addr.clone()),
                healthy: std::sync::atomic::AtomicBool::new(true),
                consecutive_failures: AtomicU32::new(0),
                tripped_at: Mutex::new(None),
                pool: Mutex::new(VecDeque::new()),
            })
            .collect();
        Self {
            base: RuntimeBase::new(config),
            shared: Arc::new(Shared { backends, round_robin: AtomicUsize::new(0) }),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn healthy_backend_count(&self) -> usize {
        self.shared.backends.iter().filter(|b| b.healthy.load(Ordering::Relaxed)).count()
    }
}

#[async_trait::async_trait]
impl Runtime for ProxyRuntime {
    fn base(&self) -> &RuntimeBase {
        &self.base
    }

    async fn setup(&self, ctx: RuntimeContext) -> EngineResult<()> {
        let config = self.base.config.read().clone();
        if config.proxy.backends.is_empty() {
            return Err(EngineError::Setup("proxy runtime configured with no backends".into()));
        }
        self.shared.resolve_backends(&ctx).await;

        let addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.port).parse().map_err(|e| EngineError::Setup(format!("{e}")))?;
        let listener = TcpListener::bind(addr).await.map_err(|source| EngineError::Bind { port: config.port, source })?;
        info!(name = %config.name, port = config.port, "proxy runtime listening");

        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown);
        let strategy = config.proxy.strategy;
        let protocol = config.proxy.protocol;
        let retry_count = config.proxy.retry_count;
        let retry_all = config.proxy.retry_all;
        let circuit_threshold = config.proxy.circuit_threshold;
        let name = config.name.clone();
        let prefix = name.clone();
        let hooks = self.base.proxy_hooks.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _peer)) = accepted else { continue };
                        let shared = Arc::clone(&shared);
                        let prefix = prefix.clone();
                        let hooks = hooks.clone();
                        tokio::spawn(handle_connection(stream, shared, strategy, protocol, retry_count, retry_all, circuit_threshold, prefix, hooks));
                    }
                }
            }
        });

        if config.proxy.health_check {
            let shared = Arc::clone(&self.shared);
            let shutdown = Arc::clone(&self.shutdown);
            let interval = Duration::from_secs(config.proxy.health_interval_secs.max(1));
            let circuit_timeout = Duration::from_secs(config.proxy.circuit_timeout_secs);
            let health_kind = config.proxy.health_kind;
            let health_path = config.proxy.health_path.clone();
            let threshold = config.proxy.health_threshold;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = ticker.tick() => {
                            run_health_checks(&shared, health_kind, &health_path, threshold).await;
                            shared.maybe_reset_circuits(circuit_timeout);
                        }
                    }
                }
            });
        }

        info!(name = %name, backends = config.proxy.backends.len(), "proxy runtime ready");
        Ok(())
    }

    async fn teardown(&self, _ctx: RuntimeContext) {
        self.shutdown.notify_waiters();
    }

    fn import_config(&self, config: RuntimeConfig) -> EngineResult<()> {
        if *self.base.state.read() == RuntimeState::Running {
            return Err(EngineError::ChangeWhileRunning { field: "backends" });
        }
        *self.base.config.write() = config;
        Ok(())
    }

    async fn inject_message(&self, _message: String) {}
}

async fn run_health_checks(shared: &Arc<Shared>, kind: sl_core::model::HealthCheckKind, path: &str, _threshold: u32) {
    for (idx, backend) in shared.backends.iter().enumerate() {
        let addr = backend.addr();
        let ok = match kind {
            sl_core::model::HealthCheckKind::Tcp => TcpStream::connect(&addr).await.is_ok(),
            sl_core::model::HealthCheckKind::Http => check_http(&addr, path).await,
        };
        if ok {
            shared.record_success(idx);
        } else {
            shared.record_failure(idx, u32::MAX); // health-check failures don't trip the request-path circuit breaker directly
            warn!(backend = %addr, "health check failed");
        }
    }
}

async fn check_http(addr: &str, path: &str) -> bool {
    let Ok(mut stream) = TcpStream::connect(addr).await else { return false };
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    if stream.write_all(request.as_bytes()).await.is_err() {
        return false;
    }
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    buf.starts_with(b"HTTP/1.1 2") || buf.starts_with(b"HTTP/1.0 2")
}

fn is_idempotent(method: &str) -> bool {
    IDEMPOTENT_METHODS.contains(&method.to_ascii_uppercase().as_str())
}

async fn handle_connection(
    mut inbound: TcpStream,
    shared: Arc<Shared>,
    strategy: ProxyStrategy,
    protocol: ProxyProtocol,
    retry_count: u32,
    retry_all: bool,
    circuit_threshold: u32,
    proxy_name: String,
    hooks: crate::hooks::ProxyHooks,
) {
    match protocol {
        ProxyProtocol::Tcp => handle_tcp(inbound, shared, strategy, retry_count, retry_all, circuit_threshold, &hooks).await,
        ProxyProtocol::Http => {
            if let Err(err) = handle_http(&mut inbound, &shared, strategy, retry_count, retry_all, circuit_threshold, &proxy_name, &hooks).await {
                warn!(proxy = %proxy_name, error = %err, "proxy http request failed");
            }
        }
    }
}

/// Raw TCP mode: on first read, select+connect a
/// backend and forward bytes both ways for the rest of the connection's
/// life. Retries (all attempts count as "idempotent" here; there's no HTTP
/// method to gate on) happen only if the backend never became readable.
async fn handle_tcp(
    mut inbound: TcpStream,
    shared: Arc<Shared>,
    strategy: ProxyStrategy,
    retry_count: u32,
    retry_all: bool,
    circuit_threshold: u32,
    hooks: &crate::hooks::ProxyHooks,
) {
    let attempts = if retry_all { retry_count + 1 } else { 1 }.max(1);
    for attempt in 0..attempts {
        let Some(idx) = shared.pick_tcp(strategy, hooks) else {
            return;
        };
        let addr = shared.backends[idx].addr();
        match TcpStream::connect(&addr).await {
            Ok(mut outbound) => {
                shared.record_success(idx);
                let _ = copy_bidirectional(&mut inbound, &mut outbound).await;
                return;
            }
            Err(err) => {
                shared.record_failure(idx, circuit_threshold);
                warn!(backend = %addr, error = %err, attempt, "proxy tcp backend connect failed");
            }
        }
    }
}

/// HTTP mode: validate the `/<proxy-name>[/...]` prefix, rewrite only the
/// request-line path (headers and body stay byte identical), and forward to
/// a selected backend. Each request on the client connection is handled
/// discretely so a backend connection left in a keep-alive state can be
/// returned to that backend's idle pool for the next request, rather than
/// pinned to this client connection for its whole lifetime.
async fn handle_http(
    inbound: &mut TcpStream,
    shared: &Arc<Shared>,
    strategy: ProxyStrategy,
    retry_count: u32,
    retry_all: bool,
    circuit_threshold: u32,
    proxy_name: &str,
    hooks: &crate::hooks::ProxyHooks,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    loop {
        let (req, consumed) = loop {
            match http::try_parse_request(&buf) {
                Ok(Some(parsed)) => break parsed,
                Ok(None) => {}
                Err(_) => {
                    write_status_only(inbound, 400, "Bad Request").await?;
                    return Ok(());
                }
            }
            let mut chunk = [0u8; 4096];
            let n = inbound.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > 1 << 20 {
                write_status_only(inbound, 431, "Request Header Fields Too Large").await?;
                return Ok(());
            }
        };

        let own_prefix = format!("/{proxy_name}");
        let rewritten_path = if req.path == own_prefix {
            "/".to_string()
        } else if let Some(stripped) = req.path.strip_prefix(&format!("{own_prefix}/")) {
            format!("/{stripped}")
        } else {
            write_status_only(inbound, 404, "Not Found").await?;
            return Ok(());
        };

        // Splice the rewritten request line back onto the byte-identical
        // headers/body span so nothing but the path token changes.
        let line_end = buf.iter().position(|&b| b == b'\n').map(|i| i + 1).unwrap_or(consumed);
        let mut forwarded = format!("{} {} {}\r\n", req.method, rewritten_path, req.version).into_bytes();
        forwarded.extend_from_slice(&buf[line_end..consumed]);
        let _ = buf.drain(..consumed);

        let client_keep_alive = req.keep_alive();
        let eligible = retry_all || is_idempotent(&req.method);
        let attempts = if eligible { retry_count + 1 } else { 1 }.max(1);

        let mut served = false;
        for attempt in 0..attempts {
            let Some(idx) = shared.pick_http(strategy, hooks, &req.method, &rewritten_path) else {
                write_status_only(inbound, 502, "Bad Gateway").await?;
                return Ok(());
            };
            let backend = &shared.backends[idx];
            let addr = backend.addr();
            let mut outbound = match backend.acquire_pooled() {
                Some(stream) => stream,
                None => match TcpStream::connect(&addr).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        shared.record_failure(idx, circuit_threshold);
                        warn!(backend = %addr, error = %err, attempt, "proxy http backend connect failed");
                        continue;
                    }
                },
            };

            if outbound.write_all(&forwarded).await.is_err() {
                shared.record_failure(idx, circuit_threshold);
                continue;
            }

            let mut resp_buf = Vec::new();
            let parsed = 'read_response: loop {
                match http::try_parse_response(&resp_buf) {
                    Ok(Some((resp, header_len, content_length))) => {
                        let total = header_len + content_length;
                        while resp_buf.len() < total {
                            let mut chunk = [0u8; 4096];
                            match outbound.read(&mut chunk).await {
                                Ok(0) | Err(_) => break 'read_response None,
                                Ok(n) => resp_buf.extend_from_slice(&chunk[..n]),
                            }
                        }
                        break 'read_response Some((resp, total));
                    }
                    Ok(None) => {
                        let mut chunk = [0u8; 4096];
                        match outbound.read(&mut chunk).await {
                            Ok(0) | Err(_) => break 'read_response None,
                            Ok(n) => resp_buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    Err(_) => break 'read_response None,
                }
            };

            let Some((resp, total)) = parsed else {
                shared.record_failure(idx, circuit_threshold);
                warn!(backend = %addr, attempt, "proxy backend closed before responding");
                continue;
            };

            if resp.status >= 500 && attempt + 1 < attempts {
                shared.record_failure(idx, circuit_threshold);
                continue;
            }

            shared.record_success(idx);
            inbound.write_all(&resp_buf[..total]).await?;
            if resp.keep_alive(&req.version) && resp_buf.len() == total {
                backend.release_pooled(outbound);
            }
            served = true;
            break;
        }

        if !served {
            write_status_only(inbound, 502, "Bad Gateway").await?;
            return Ok(());
        }

        if !client_keep_alive {
            return Ok(());
        }
    }
}

async fn write_status_only(stream: &mut TcpStream, status: u16, reason: &str) -> std::io::Result<()> {
    let response = Response::new(status, reason, Vec::new());
    stream.write_all(&response.encode(false)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::model::RuntimeKind;

    #[test]
    fn new_proxy_runtime_tracks_configured_backends() {
        let mut config = RuntimeConfig::new("p", RuntimeKind::Proxy);
        config.proxy.backends = vec!["127.0.0.1:9001".into(), "127.0.0.1:9002".into()];
        let runtime = ProxyRuntime::new(config);
        assert_eq!(runtime.healthy_backend_count(), 2);
    }

    #[test]
    fn round_robin_cycles_through_backends() {
        let mut config = RuntimeConfig::new("p", RuntimeKind::Proxy);
        config.proxy.backends = vec!["a".into(), "b".into()];
        let runtime = ProxyRuntime::new(config);
        let first = runtime.shared.pick(ProxyStrategy::RoundRobin).unwrap();
        let second = runtime.shared.pick(ProxyStrategy::RoundRobin).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn tripped_circuit_excludes_backend_from_selection() {
        let mut config = RuntimeConfig::new("p", RuntimeKind::Proxy);
        config.proxy.backends = vec!["a".into(), "b".into()];
        let runtime = ProxyRuntime::new(config);
        runtime.shared.record_failure(0, 1);
        assert_eq!(runtime.healthy_backend_count(), 1);
        assert_eq!(runtime.shared.pick(ProxyStrategy::RoundRobin), Some(1));
    }

    #[test]
    fn all_backends_unhealthy_still_attempts_one() {
        // Skip unhealthy backends unless all are unavailable, in which
        // case still attempt one rather than blackhole the request.
        let mut config = RuntimeConfig::new("p", RuntimeKind::Proxy);
        config.proxy.backends = vec!["a".into()];
        let runtime = ProxyRuntime::new(config);
        runtime.shared.record_failure(0, 1);
        assert_eq!(runtime.healthy_backend_count(), 0);
        assert_eq!(runtime.shared.pick(ProxyStrategy::RoundRobin), Some(0));
    }

    #[test]
    fn bare_name_backend_is_resolved_to_loopback_port() {
        let mut config = RuntimeConfig::new("p", RuntimeKind::Proxy);
        config.proxy.backends = vec!["upstream-server".into()];
        let runtime = ProxyRuntime::new(config);
        assert_eq!(runtime.shared.backends[0].addr(), "upstream-server");
    }

    #[test]
    fn native_strategy_uses_on_route_http_hook() {
        let mut config = RuntimeConfig::new("p", RuntimeKind::Proxy);
        config.proxy.backends = vec!["a".into(), "b".into()];
        let runtime = ProxyRuntime::new(config);
        let mut hooks = crate::hooks::ProxyHooks::default();
        hooks.on_route_http = Some(sl_core::hook::Hook::new(|(_, _)| Some(1)));
        assert_eq!(runtime.shared.pick_http(ProxyStrategy::Native, &hooks, "GET", "/"), Some(1));
    }

    #[test]
    fn native_strategy_falls_back_to_round_robin_on_invalid_index() {
        let mut config = RuntimeConfig::new("p", RuntimeKind::Proxy);
        config.proxy.backends = vec!["a".into(), "b".into()];
        let runtime = ProxyRuntime::new(config);
        let mut hooks = crate::hooks::ProxyHooks::default();
        hooks.on_route_http = Some(sl_core::hook::Hook::new(|(_, _)| Some(99)));
        assert!(runtime.shared.pick_http(ProxyStrategy::Native, &hooks, "GET", "/").is_some());
    }

    #[test]
    fn native_strategy_falls_back_to_round_robin_without_a_hook() {
        let mut config = RuntimeConfig::new("p", RuntimeKind::Proxy);
        config.proxy.backends = vec!["a".into(), "b".into()];
        let runtime = ProxyRuntime::new(config);
        let hooks = crate::hooks::ProxyHooks::default();
        assert!(runtime.shared.pick_tcp(ProxyStrategy::Native, &hooks).is_some());
    }

    #[tokio::test]
    async fn pooled_connection_is_reused_until_capacity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut config = RuntimeConfig::new("p", RuntimeKind::Proxy);
        config.proxy.backends = vec![addr];
        let runtime = ProxyRuntime::new(config);
        let backend = &runtime.shared.backends[0];

        assert!(backend.acquire_pooled().is_none());
        let (stream, _) = tokio::join!(TcpStream::connect(backend.addr()), listener.accept());
        backend.release_pooled(stream.unwrap());
        assert!(backend.acquire_pooled().is_some());
        assert!(backend.acquire_pooled().is_none(), "connection should only be handed out once");
    }

    #[test]
    fn idempotent_methods_are_retry_eligible() {
        assert!(is_idempotent("GET"));
        assert!(is_idempotent("head"));
        assert!(is_idempotent("DELETE"));
        assert!(!is_idempotent("POST"));
        assert!(!is_idempotent("PATCH"));
    }
}
