// SPDX-License-Identifier: MIT

//! The runtime data model: kind, lifecycle state, and persisted config
//! fields carried by every runtime, independent of its kind.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::id;

crate::simple_display! {
    RuntimeKind {
        Server => "server",
        Client => "client",
        Proxy => "proxy",
        Cache => "cache",
    }
}

/// What kind of runtime this is. Fixed at creation; never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Server,
    Client,
    Proxy,
    Cache,
}

crate::simple_display! {
    RuntimeState {
        Created => "created",
        Running => "running",
        Stopped => "stopped",
        Failed => "failed",
    }
}

/// Lifecycle state. Transitions: Created -> Running -> Stopped, with Running
/// or Stopped able to fall to Failed on an unrecoverable setup/teardown error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Created,
    Running,
    Stopped,
    Failed,
}

impl RuntimeState {
    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: RuntimeState) -> bool {
        use RuntimeState::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Created, Failed)
                | (Running, Stopped)
                | (Running, Failed)
                | (Stopped, Running)
                | (Stopped, Failed)
        )
    }
}

/// What happens to a child runtime when its owner stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChildPolicy {
    /// Stop the child but keep its persisted config (default).
    #[default]
    Stop,
    /// Stop the child and delete its persisted config too.
    Remove,
}

/// How an externally-launched process relates to the daemon that spawned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalKind {
    /// Launched and owned by this daemon (tracked pid, reaped on exit).
    Managed,
    /// Attached to a pid this daemon did not launch (stop sends SIGTERM only).
    Attached,
}

/// Role of a cache runtime in a leader/follower replication pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationRole {
    #[default]
    None,
    Leader,
    Follower,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
}

/// Server runtime dispatch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// `on_message` then broadcast to all clients except the sender.
    #[default]
    InOut,
    /// `on_message` only, no broadcast.
    In,
    /// Purely a push endpoint; no local dispatch.
    Out,
    /// Exactly one authenticated client may broadcast.
    Master,
}

/// Proxy backend selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStrategy {
    #[default]
    RoundRobin,
    Random,
    /// Delegate to the `on_route` hook; falls back to round-robin when no
    /// hook is registered or it returns an invalid index.
    Native,
}

/// L7 vs L4 proxying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Tcp,
}

/// Cache eviction policy. Mirrors `sl_cache::EvictionPolicy`
/// field-for-field; kept as a separate type here so `sl-core` does not need
/// to depend on `sl-cache` just to describe persisted config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheEviction {
    #[default]
    None,
    AllkeysLru,
    AllkeysRandom,
}

/// Cache mode gate. Mirrors `sl_cache::Mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    Readonly,
    #[default]
    Readwrite,
    Admin,
}

/// Proxy health-check style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckKind {
    #[default]
    Tcp,
    Http,
}

/// The subset of persisted fields specific to proxy runtimes, grouped so
/// `RuntimeConfig` doesn't carry two dozen flat `Option`s for a kind that
/// isn't this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProxyConfig {
    #[serde(default)]
    pub backends: Vec<String>,
    #[serde(default)]
    pub strategy: ProxyStrategy,
    #[serde(default)]
    pub protocol: ProxyProtocol,
    #[serde(default)]
    pub health_check: bool,
    #[serde(default)]
    pub health_kind: HealthCheckKind,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_health_threshold")]
    pub health_threshold: u32,
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,
    #[serde(default = "default_circuit_timeout")]
    pub circuit_timeout_secs: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_all: bool,
}

fn default_health_interval() -> u64 {
    10
}
fn default_health_path() -> String {
    "/".to_string()
}
fn default_health_threshold() -> u32 {
    3
}
fn default_circuit_threshold() -> u32 {
    5
}
fn default_circuit_timeout() -> u64 {
    30
}

impl ProxyConfig {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            strategy: ProxyStrategy::default(),
            protocol: ProxyProtocol::default(),
            health_check: false,
            health_kind: HealthCheckKind::default(),
            health_interval_secs: default_health_interval(),
            health_path: default_health_path(),
            health_threshold: default_health_threshold(),
            circuit_threshold: default_circuit_threshold(),
            circuit_timeout_secs: default_circuit_timeout(),
            retry_count: 0,
            retry_all: false,
        }
    }
}

/// The subset of persisted fields specific to cache runtimes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub persistent_path: Option<PathBuf>,
    #[serde(default)]
    pub mode: CacheMode,
    #[serde(default)]
    pub resp_forced: bool,
    #[serde(default)]
    pub max_memory: u64,
    #[serde(default)]
    pub eviction: CacheEviction,
}

/// Persisted, reloadable configuration for a single runtime.
///
/// This is the struct the Persistence Store reads and writes as one JSON
/// document per runtime. Fields not applicable to a given [`RuntimeKind`]
/// (e.g. `reconnect` on a server) are simply left at their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub id: String,
    pub name: String,
    pub kind: RuntimeKind,

    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub cache_name: Option<String>,

    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub write_file: Option<PathBuf>,
    #[serde(default)]
    pub test_mode: bool,

    #[serde(default)]
    pub bash_output: bool,
    #[serde(default)]
    pub bash_prefix: bool,
    #[serde(default)]
    pub bash_timestamp: bool,

    #[serde(default)]
    pub max_connections: u32,
    /// Messages per second per connection; 0 = unlimited.
    #[serde(default)]
    pub rate_limit: f64,
    /// Messages per second across the whole runtime; 0 = unlimited.
    #[serde(default)]
    pub global_rate_limit: f64,
    /// Seconds of inactivity before a connection's read side is shut down;
    /// 0 disables the idle sweep.
    #[serde(default)]
    pub idle_timeout: u64,
    #[serde(default)]
    pub drain: bool,

    /// -1 disabled, 0 infinite, >0 max attempts. Client runtimes only.
    #[serde(default = "default_reconnect")]
    pub reconnect: i32,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub child_policy: ChildPolicy,
    /// A label shared by multiple runtimes for group queries/broadcasts.
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub external: Option<ExternalKind>,
    #[serde(default)]
    pub exec_path: Option<PathBuf>,
    #[serde(default)]
    pub pid: Option<u32>,

    #[serde(default)]
    pub replication_role: ReplicationRole,
    #[serde(default)]
    pub replicate_from: Option<String>,

    /// Server runtime only: dispatch mode.
    #[serde(default)]
    pub mode: ServerMode,
    /// Server/client runtime only: bind/connect over UDP instead of TCP.
    #[serde(default)]
    pub udp: bool,
    /// Server runtime master mode: the shared password, if any.
    #[serde(default)]
    pub master_pw: Option<String>,
    /// Server runtime master mode: forward non-master lines to the master.
    #[serde(default)]
    pub master_forward: bool,
    /// Server runtime: static/dynamic HTTP file root.
    #[serde(default)]
    pub http_dir: Option<PathBuf>,
    /// Server runtime: pre-build and cache HTTP responses by path.
    #[serde(default)]
    pub http_cache: bool,
    /// Server runtime: fixed upstream `host:port` targets to fan out to.
    #[serde(default)]
    pub upstreams: Vec<String>,

    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub cache: CacheConfig,

    /// Whether this runtime was running the last time the daemon persisted
    /// its config; used to decide what to restart on daemon startup.
    #[serde(default)]
    pub was_running: bool,

    #[serde(skip)]
    pub created_time: Option<SystemTime>,
}

fn default_reconnect() -> i32 {
    -1
}

impl RuntimeConfig {
    /// A fresh config for a newly created runtime, with a freshly generated id.
    pub fn new(name: impl Into<String>, kind: RuntimeKind) -> Self {
        Self {
            id: id::short_hex(),
            name: name.into(),
            kind,
            port: 0,
            target: None,
            cache_name: None,
            log_file: None,
            write_file: None,
            test_mode: false,
            bash_output: false,
            bash_prefix: false,
            bash_timestamp: false,
            max_connections: 0,
            rate_limit: 0.0,
            global_rate_limit: 0.0,
            idle_timeout: 0,
            drain: false,
            reconnect: -1,
            tls: TlsConfig::default(),
            owner: None,
            child_policy: ChildPolicy::default(),
            group: None,
            external: None,
            exec_path: None,
            pid: None,
            replication_role: ReplicationRole::default(),
            replicate_from: None,
            mode: ServerMode::default(),
            udp: false,
            master_pw: None,
            master_forward: false,
            http_dir: None,
            http_cache: false,
            upstreams: Vec::new(),
            proxy: ProxyConfig::new(),
            cache: CacheConfig::default(),
            was_running: false,
            created_time: Some(SystemTime::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_follow_the_lifecycle_graph() {
        assert!(RuntimeState::Created.can_transition_to(RuntimeState::Running));
        assert!(RuntimeState::Running.can_transition_to(RuntimeState::Stopped));
        assert!(RuntimeState::Stopped.can_transition_to(RuntimeState::Running));
        assert!(!RuntimeState::Created.can_transition_to(RuntimeState::Stopped));
        assert!(!RuntimeState::Failed.can_transition_to(RuntimeState::Running));
    }

    #[test]
    fn new_config_gets_a_fresh_six_hex_char_id() {
        let cfg = RuntimeConfig::new("web", RuntimeKind::Server);
        assert_eq!(cfg.id.len(), 6);
        assert_eq!(cfg.name, "web");
        assert!(!cfg.was_running);
    }

    #[test]
    fn kind_and_state_serialize_as_snake_case() {
        let json = serde_json::to_string(&RuntimeKind::Server).unwrap();
        assert_eq!(json, "\"server\"");
        let json = serde_json::to_string(&RuntimeState::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
