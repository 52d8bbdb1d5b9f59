// SPDX-License-Identifier: MIT

//! The cache runtime: a TCP-accessible key-value store
//! speaking either RESP2 or a plain line protocol depending on what the
//! first bytes on a freshly accepted connection look like
//! ([`crate::protocol::detect`]), with pub/sub and single-leader replication
//! layered on top of `sl_cache::Store`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sl_cache::{full_dump, Followers, Mode as CacheMode2, MutatingCommand, PubSub, Store};
use sl_core::clock::SystemClock;
use sl_core::model::{CacheEviction, CacheMode, ReplicationRole, RuntimeConfig};
use sl_wire::resp;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::context::RuntimeContext;
use crate::error::{EngineError, EngineResult};
use crate::outbound::{self, OutboundSender};
use crate::protocol::{self, Detected};
use crate::runtime::{Runtime, RuntimeBase};

type ConnId = u64;

fn map_mode(mode: CacheMode) -> CacheMode2 {
    match mode {
        CacheMode::Readonly => CacheMode2::Readonly,
        CacheMode::Readwrite => CacheMode2::Readwrite,
        CacheMode::Admin => CacheMode2::Admin,
    }
}

fn map_eviction(policy: CacheEviction) -> sl_cache::EvictionPolicy {
    match policy {
        CacheEviction::None => sl_cache::EvictionPolicy::None,
        CacheEviction::AllkeysLru => sl_cache::EvictionPolicy::AllkeysLru,
        CacheEviction::AllkeysRandom => sl_cache::EvictionPolicy::AllkeysRandom,
    }
}

struct Shared {
    store: Mutex<Store<SystemClock>>,
    pubsub: Mutex<PubSub>,
    followers: Mutex<Followers>,
    connections: Mutex<HashMap<ConnId, OutboundSender>>,
    next_conn: AtomicU64,
    mode: Mutex<CacheMode>,
    role: Mutex<ReplicationRole>,
}

pub struct CacheRuntime {
    base: RuntimeBase,
    shared: Arc<Shared>,
    shutdown: Arc<Notify>,
}

impl CacheRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let mut store = Store::with_clock(SystemClock);
        store.set_mode(map_mode(config.cache.mode));
        store.set_max_memory(config.cache.max_memory as usize);
        store.set_eviction(map_eviction(config.cache.eviction));
        let mode = config.cache.mode;
        let role = config.replication_role;
        Self {
            base: RuntimeBase::new(config),
            shared: Arc::new(Shared {
                store: Mutex::new(store),
                pubsub: Mutex::new(PubSub::new()),
                followers: Mutex::new(Followers::new()),
                connections: Mutex::new(HashMap::new()),
                next_conn: AtomicU64::new(1),
                mode: Mutex::new(mode),
                role: Mutex::new(role),
            }),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Execute one already-tokenized command line against this cache and
    /// return its plain-protocol encoding, used by a server runtime's
    /// `"cache "`-prefixed command forwarding. The
    /// connection id is synthetic since a forwarded command has no
    /// subscriber/follower identity of its own.
    pub async fn execute_line(&self, line: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(line);
        let args: Vec<Vec<u8>> = sl_wire::tokenize(&text).into_iter().map(String::into_bytes).collect();
        if args.is_empty() {
            return encode_plain(&Reply::Error("empty command".into()));
        }
        let conn_id = self.shared.next_conn.fetch_add(1, Ordering::Relaxed);
        let reply = handle_command(&self.shared, conn_id, &args).await;
        encode_plain(&reply)
    }
}

#[async_trait::async_trait]
impl Runtime for CacheRuntime {
    fn base(&self) -> &RuntimeBase {
        &self.base
    }

    async fn execute_cache_command(&self, line: &[u8]) -> Option<Vec<u8>> {
        Some(self.execute_line(line).await)
    }

    async fn setup(&self, ctx: RuntimeContext) -> EngineResult<()> {
        let config = self.base.config.read().clone();
        if let Some(path) = &config.cache.persistent_path {
            if path.exists() {
                let mut store = self.shared.store.lock();
                if let Err(err) = sl_cache::load_snapshot(&mut store, path) {
                    warn!(name = %config.name, error = %err, "failed to load cache snapshot");
                }
            }
        }

        let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse().map_err(|e| EngineError::Setup(format!("{e}")))?;
        let listener = TcpListener::bind(addr).await.map_err(|source| EngineError::Bind { port: config.port, source })?;
        info!(name = %config.name, port = config.port, "cache runtime listening");

        let shared = Arc::clone(&self.shared);
        let name = config.name.clone();
        let buffers = Arc::clone(&ctx.buffers);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(name = %name, error = %err, "cache accept failed");
                                continue;
                            }
                        };
                        let shared = Arc::clone(&shared);
                        let buffers = Arc::clone(&buffers);
                        let conn_id = shared.next_conn.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(handle_connection(stream, peer, conn_id, shared, buffers));
                    }
                }
            }
        });

        if config.replication_role == ReplicationRole::Follower {
            if let Some(leader_addr) = config.replicate_from.clone() {
                let shared = Arc::clone(&self.shared);
                let name = config.name.clone();
                tokio::spawn(dial_leader(leader_addr, name, shared));
            }
        }

        Ok(())
    }

    async fn teardown(&self, _ctx: RuntimeContext) {
        self.shutdown.notify_waiters();
        let config = self.base.config.read().clone();
        if let Some(path) = &config.cache.persistent_path {
            let store = self.shared.store.lock();
            if let Err(err) = sl_cache::save_snapshot(&store, path) {
                warn!(name = %config.name, error = %err, "failed to save cache snapshot on teardown");
            }
        }
        self.shared.connections.lock().clear();
    }

    fn import_config(&self, config: RuntimeConfig) -> EngineResult<()> {
        if *self.base.state.read() == sl_core::model::RuntimeState::Running {
            return Err(EngineError::ChangeWhileRunning { field: "port" });
        }
        let mut store = self.shared.store.lock();
        store.set_mode(map_mode(config.cache.mode));
        store.set_max_memory(config.cache.max_memory as usize);
        store.set_eviction(map_eviction(config.cache.eviction));
        *self.shared.mode.lock() = config.cache.mode;
        *self.base.config.write() = config;
        Ok(())
    }

    async fn inject_message(&self, message: String) {
        let tokens = sl_wire::tokenize(&message);
        let args: Vec<Vec<u8>> = tokens.into_iter().map(String::into_bytes).collect();
        if args.is_empty() {
            return;
        }
        let mode = *self.shared.mode.lock();
        let mut store = self.shared.store.lock();
        let _ = dispatch(&mut store, mode, &args);
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    _peer: SocketAddr,
    conn_id: ConnId,
    shared: Arc<Shared>,
    buffers: Arc<crate::reactor::BufferPool>,
) {
    let (tx, mut rx) = outbound::channel(outbound::OUTBOUND_QUEUE_CAP);
    shared.connections.lock().insert(conn_id, tx);

    let mut buf = buffers.acquire();
    let mut detected = Detected::Unknown;

    loop {
        tokio::select! {
            result = stream.read_buf(&mut buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                if detected == Detected::Unknown {
                    detected = match protocol::detect(&buf) {
                        Some(d) => d,
                        None => continue,
                    };
                }
                loop {
                    let consumed = match detected {
                        Detected::Resp2 => match resp::parse_views(&buf) {
                            Ok(resp::ParseOutcome::Complete { args, consumed }) => {
                                let owned: Vec<Vec<u8>> = args.iter().map(|a| a.to_vec()).collect();
                                let reply = handle_command(&shared, conn_id, &owned).await;
                                let _ = stream.write_all(&encode_resp(&reply)).await;
                                consumed
                            }
                            Ok(resp::ParseOutcome::Incomplete) => break,
                            Err(_) => {
                                let _ = stream.write_all(b"-ERR protocol error\r\n").await;
                                break;
                            }
                        },
                        _ => {
                            let Some(nl) = buf.iter().position(|&b| b == b'\n') else { break };
                            let line = String::from_utf8_lossy(&buf[..nl]).trim_end_matches('\r').to_string();
                            let args: Vec<Vec<u8>> = sl_wire::tokenize(&line).into_iter().map(String::into_bytes).collect();
                            if !args.is_empty() {
                                let reply = handle_command(&shared, conn_id, &args).await;
                                let _ = stream.write_all(&encode_plain(&reply)).await;
                            }
                            nl + 1
                        }
                    };
                    let _ = buf.split_to(consumed);
                    if buf.is_empty() {
                        break;
                    }
                }
            }
            Some(outgoing) = rx.recv() => {
                if stream.write_all(&outgoing).await.is_err() {
                    break;
                }
            }
        }
    }

    shared.connections.lock().remove(&conn_id);
    shared.pubsub.lock().unsubscribe_all(conn_id);
    shared.followers.lock().drop_follower(conn_id);
    buffers.release(buf);
}

async fn handle_command(shared: &Arc<Shared>, conn_id: ConnId, args: &[Vec<u8>]) -> Reply {
    if args.is_empty() {
        return Reply::Error("empty command".into());
    }
    let cmd = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    match cmd.as_str() {
        "SUBSCRIBE" => {
            for channel in &args[1..] {
                shared.pubsub.lock().subscribe(&String::from_utf8_lossy(channel), conn_id);
            }
            Reply::Simple("OK".into())
        }
        "UNSUBSCRIBE" => {
            for channel in &args[1..] {
                shared.pubsub.lock().unsubscribe(&String::from_utf8_lossy(channel), conn_id);
            }
            Reply::Simple("OK".into())
        }
        "PUBLISH" if args.len() >= 3 => {
            let channel = String::from_utf8_lossy(&args[1]).to_string();
            let message = args[2].clone();
            let subscribers = shared.pubsub.lock().subscribers(&channel);
            let connections = shared.connections.lock();
            let mut delivered = 0i64;
            let mut framed = Vec::new();
            resp::encode_array_header(&mut framed, 3);
            resp::encode_bulk(&mut framed, b"message");
            resp::encode_bulk(&mut framed, channel.as_bytes());
            resp::encode_bulk(&mut framed, &message);
            let framed: Arc<[u8]> = Arc::from(framed.into_boxed_slice());
            for sub in subscribers {
                if let Some(tx) = connections.get(&sub) {
                    if tx.push(Arc::clone(&framed)) {
                        delivered += 1;
                    }
                }
            }
            Reply::Int(delivered)
        }
        "REPLICATE" => {
            shared.followers.lock().add(conn_id);
            *shared.role.lock() = ReplicationRole::Leader;
            let dump = {
                let store = shared.store.lock();
                full_dump(&store)
            };
            let connections = shared.connections.lock();
            if let Some(tx) = connections.get(&conn_id) {
                for mutation in dump {
                    let mut line = mutation.encode();
                    line.push('\n');
                    tx.push_owned(line.into_bytes());
                }
            }
            Reply::Ok
        }
        other_cmd => {
            let mode = *shared.mode.lock();
            let reply = {
                let mut store = shared.store.lock();
                dispatch(&mut store, mode, args)
            };
            if matches!(reply, Reply::Ok | Reply::Int(_)) {
                if let Some(mutation) = as_mutating_command(other_cmd, args) {
                    propagate_to_followers(shared, &mutation);
                }
            }
            reply
        }
    }
}

/// Builds the replication-log form of a command that just mutated the
/// store, if it's one of the kinds `sl_cache::MutatingCommand` can encode.
fn as_mutating_command(cmd: &str, args: &[Vec<u8>]) -> Option<MutatingCommand> {
    let key = || args.get(1).cloned().unwrap_or_default();
    match cmd {
        "SET" => Some(MutatingCommand::Set { key: key(), val: args.get(2).cloned().unwrap_or_default() }),
        "DEL" => Some(MutatingCommand::Del { key: key() }),
        "LPUSH" => args.get(2).map(|val| MutatingCommand::LPush { key: key(), val: val.clone() }),
        "RPUSH" => args.get(2).map(|val| MutatingCommand::RPush { key: key(), val: val.clone() }),
        "SADD" => args.get(2).map(|member| MutatingCommand::SAdd { key: key(), member: member.clone() }),
        "HSET" => args.get(3).map(|val| MutatingCommand::HSet { key: key(), field: args[2].clone(), val: val.clone() }),
        _ => None,
    }
}

fn propagate_to_followers(shared: &Arc<Shared>, mutation: &MutatingCommand) {
    if *shared.role.lock() != ReplicationRole::Leader {
        return;
    }
    let follower_ids = shared.followers.lock().iter().collect::<Vec<_>>();
    if follower_ids.is_empty() {
        return;
    }
    let mut line = mutation.encode();
    line.push('\n');
    let payload = line.into_bytes();
    let connections = shared.connections.lock();
    let mut dead = Vec::new();
    for id in follower_ids {
        match connections.get(&id) {
            Some(tx) if tx.push_owned(payload.clone()) => {}
            _ => dead.push(id),
        }
    }
    drop(connections);
    if !dead.is_empty() {
        let mut followers = shared.followers.lock();
        for id in dead {
            followers.drop_follower(id);
        }
    }
}

/// Dials a leader's cache port as a follower: sends `replicate`, then
/// applies every `MutatingCommand` line the leader streams back.
async fn dial_leader(leader_addr: String, name: String, shared: Arc<Shared>) {
    let stream = match TcpStream::connect(&leader_addr).await {
        Ok(s) => s,
        Err(err) => {
            warn!(name = %name, leader = %leader_addr, error = %err, "follower could not dial leader");
            return;
        }
    };
    let (read_half, mut write_half) = stream.into_split();
    if write_half.write_all(b"replicate\n").await.is_err() {
        return;
    }
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(name = %name, error = %err, "follower lost connection to leader");
                break;
            }
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        match MutatingCommand::decode(trimmed) {
            Ok(mutation) => {
                let mut store = shared.store.lock();
                mutation.apply(&mut store);
            }
            Err(err) => warn!(name = %name, error = %err, "follower received malformed replication line"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Ok,
    Simple(String),
    Error(String),
    Denied(String),
    Int(i64),
    Bulk(Option<Vec<u8>>),
    Array(Vec<Vec<u8>>),
}

/// Maps a store error onto the wire vocabulary for data sockets:
/// readonly/admin gate failures are `denied: ...`, everything else
/// is `error: ...`.
fn to_reply(err: sl_cache::CacheError) -> Reply {
    match err {
        sl_cache::CacheError::ReadonlyMode => Reply::Denied("readonly mode".into()),
        sl_cache::CacheError::AdminRequired => Reply::Denied("command requires admin mode".into()),
        sl_cache::CacheError::TypeConflict { .. } => Reply::Error("type conflict".into()),
        sl_cache::CacheError::OutOfMemory => Reply::Error("over memory budget".into()),
    }
}

fn dispatch(store: &mut Store<SystemClock>, mode: CacheMode, args: &[Vec<u8>]) -> Reply {
    store.set_mode(map_mode(mode));
    let cmd = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    let arg = |i: usize| args.get(i).map(Vec::as_slice).unwrap_or(b"");
    let to_err = to_reply;

    match cmd.as_str() {
        "PING" => Reply::Simple("PONG".into()),
        "GET" => Reply::Bulk(store.get(arg(1))),
        "SET" => store.set(arg(1), arg(2)).map(|_| Reply::Ok).unwrap_or_else(to_err),
        "DEL" => store.del(arg(1)).map(|d| Reply::Int(d as i64)).unwrap_or_else(to_err),
        "EXISTS" => Reply::Int(store.exists(arg(1)) as i64),
        "EXPIRE" => store.expire(arg(1), String::from_utf8_lossy(arg(2)).parse().unwrap_or(0)).map(|b| Reply::Int(b as i64)).unwrap_or_else(to_err),
        "TTL" => Reply::Int(store.ttl(arg(1))),
        "PERSIST" => store.persist(arg(1)).map(|b| Reply::Int(b as i64)).unwrap_or_else(to_err),
        "FLUSH" | "FLUSHALL" => store.flush().map(|_| Reply::Ok).unwrap_or_else(to_err),
        "LPUSH" => store.lpush(arg(1), &args[2..].to_vec()).map(Reply::Int).unwrap_or_else(to_err),
        "RPUSH" => store.rpush(arg(1), &args[2..].to_vec()).map(Reply::Int).unwrap_or_else(to_err),
        "LPOP" => store.lpop(arg(1)).map(Reply::Bulk).unwrap_or_else(to_err),
        "RPOP" => store.rpop(arg(1)).map(Reply::Bulk).unwrap_or_else(to_err),
        "LLEN" => Reply::Int(store.llen(arg(1))),
        "LRANGE" => {
            let start = String::from_utf8_lossy(arg(2)).parse().unwrap_or(0);
            let end = String::from_utf8_lossy(arg(3)).parse().unwrap_or(-1);
            Reply::Array(store.lrange(arg(1), start, end))
        }
        "SADD" => store.sadd(arg(1), arg(2)).map(|b| Reply::Int(b as i64)).unwrap_or_else(to_err),
        "SREM" => store.srem(arg(1), arg(2)).map(|b| Reply::Int(b as i64)).unwrap_or_else(to_err),
        "SISMEMBER" => Reply::Int(store.sismember(arg(1), arg(2)) as i64),
        "SCARD" => Reply::Int(store.scard(arg(1))),
        "SMEMBERS" => Reply::Array(store.smembers(arg(1))),
        "HSET" => store.hset(arg(1), arg(2), arg(3)).map(|_| Reply::Ok).unwrap_or_else(to_err),
        "HGET" => Reply::Bulk(store.hget(arg(1), arg(2))),
        "HDEL" => store.hdel(arg(1), arg(2)).map(|b| Reply::Int(b as i64)).unwrap_or_else(to_err),
        "HLEN" => Reply::Int(store.hlen(arg(1))),
        "HGETALL" => Reply::Array(store.hgetall(arg(1)).into_iter().flat_map(|(k, v)| [k, v]).collect()),
        other => Reply::Error(format!("unknown command '{other}'")),
    }
}

fn encode_resp(reply: &Reply) -> Vec<u8> {
    let mut out = Vec::new();
    match reply {
        Reply::Ok => resp::encode_ok(&mut out),
        Reply::Simple(s) => resp::encode_simple(&mut out, s),
        Reply::Error(e) => resp::encode_error(&mut out, e),
        Reply::Denied(e) => resp::encode_error(&mut out, &format!("denied: {e}")),
        Reply::Int(n) => resp::encode_integer(&mut out, *n),
        Reply::Bulk(None) => resp::encode_null(&mut out),
        Reply::Bulk(Some(b)) => resp::encode_bulk(&mut out, b),
        Reply::Array(items) => {
            resp::encode_array_header(&mut out, items.len());
            for item in items {
                resp::encode_bulk(&mut out, item);
            }
        }
    }
    out
}

/// Newline-delimited plain-text wire format: `ok`, `nil`,
/// `<value>`, `<number>`, `error: <reason>`, `denied: <reason>`, and
/// multi-value replies terminated with a final `end` line.
fn encode_plain(reply: &Reply) -> Vec<u8> {
    match reply {
        Reply::Ok => b"ok\n".to_vec(),
        Reply::Simple(s) => format!("{s}\n").into_bytes(),
        Reply::Error(e) => format!("error: {e}\n").into_bytes(),
        Reply::Denied(e) => format!("denied: {e}\n").into_bytes(),
        Reply::Int(n) => format!("{n}\n").into_bytes(),
        Reply::Bulk(None) => b"nil\n".to_vec(),
        Reply::Bulk(Some(b)) => {
            let mut out = b.clone();
            out.push(b'\n');
            out
        }
        Reply::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                out.extend_from_slice(item);
                out.push(b'\n');
            }
            out.extend_from_slice(b"end\n");
            out
        }
    }
}

/// Replicate every mutating command run on `store` to followers (the
/// `full_dump` fast path used when a follower first attaches).
pub fn seed_follower(store: &Store<SystemClock>) -> Vec<MutatingCommand> {
    full_dump(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::model::RuntimeKind;

    #[test]
    fn dispatch_set_then_get_round_trips() {
        let mut store = Store::with_clock(SystemClock);
        assert_eq!(dispatch(&mut store, CacheMode::Readwrite, &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]), Reply::Ok);
        assert_eq!(dispatch(&mut store, CacheMode::Readwrite, &[b"GET".to_vec(), b"k".to_vec()]), Reply::Bulk(Some(b"v".to_vec())));
    }

    #[test]
    fn readonly_mode_rejects_set() {
        let mut store = Store::with_clock(SystemClock);
        let reply = dispatch(&mut store, CacheMode::Readonly, &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        assert_eq!(reply, Reply::Denied("readonly mode".into()));
    }

    #[test]
    fn unknown_command_is_an_error() {
        let mut store = Store::with_clock(SystemClock);
        let reply = dispatch(&mut store, CacheMode::Readwrite, &[b"NOPE".to_vec()]);
        assert!(matches!(reply, Reply::Error(_)));
    }

    #[test]
    fn type_conflict_matches_wire_vocabulary() {
        let mut store = Store::with_clock(SystemClock);
        dispatch(&mut store, CacheMode::Readwrite, &[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]);
        let reply = dispatch(&mut store, CacheMode::Readwrite, &[b"LPUSH".to_vec(), b"a".to_vec(), b"z".to_vec()]);
        assert_eq!(reply, Reply::Error("type conflict".into()));
    }

    #[test]
    fn plain_session_formats_a_full_command_sequence() {
        let mut store = Store::with_clock(SystemClock);
        let mut out = Vec::new();
        out.extend(encode_plain(&dispatch(&mut store, CacheMode::Readwrite, &[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()])));
        out.extend(encode_plain(&dispatch(&mut store, CacheMode::Readwrite, &[b"GET".to_vec(), b"a".to_vec()])));
        out.extend(encode_plain(&dispatch(&mut store, CacheMode::Readwrite, &[b"LPUSH".to_vec(), b"a".to_vec(), b"z".to_vec()])));
        assert_eq!(String::from_utf8(out).unwrap(), "ok\n1\nerror: type conflict\n");
    }

    #[test]
    fn as_mutating_command_covers_the_replicated_verbs() {
        assert_eq!(
            as_mutating_command("SET", &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]),
            Some(MutatingCommand::Set { key: b"k".to_vec(), val: b"v".to_vec() })
        );
        assert_eq!(
            as_mutating_command("DEL", &[b"DEL".to_vec(), b"k".to_vec()]),
            Some(MutatingCommand::Del { key: b"k".to_vec() })
        );
        assert_eq!(as_mutating_command("GET", &[b"GET".to_vec(), b"k".to_vec()]), None);
    }

    #[test]
    fn new_cache_runtime_starts_created() {
        let config = RuntimeConfig::new("c", RuntimeKind::Cache);
        let runtime = CacheRuntime::new(config);
        assert_eq!(runtime.state(), sl_core::model::RuntimeState::Created);
    }
}
