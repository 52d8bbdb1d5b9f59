// SPDX-License-Identifier: MIT

//! Flag parsing for the control-plane `create`/`edit` verbs. Takes the tail
//! of a tokenized command line and folds it onto a
//! [`RuntimeConfig`], starting from `RuntimeConfig::new` for `create` or a
//! clone of the live config for `edit`.

use std::path::PathBuf;

use sl_core::model::{
    CacheEviction, CacheMode, HealthCheckKind, ProxyProtocol, ProxyStrategy, RuntimeConfig,
    ServerMode,
};

/// Parse `create <type> <name> [flags…]`'s flag tail onto `config`.
/// Returns the autostart flag (`-s`) separately since the caller decides
/// whether to start the runtime after registering it.
pub fn apply_flags(config: &mut RuntimeConfig, args: &[String]) -> Result<bool, String> {
    let mut autostart = false;
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut next = || {
            i += 1;
            args.get(i).cloned().ok_or_else(|| format!("{flag} requires a value"))
        };
        match flag {
            "-p" | "--port" => config.port = next()?.parse().map_err(|_| "invalid port".to_string())?,
            "-t" | "--target" => config.target = Some(next()?),
            "--cache" => config.cache_name = Some(next()?),
            "--log" => config.log_file = Some(PathBuf::from(next()?)),
            "-w" | "--write-file" => config.write_file = Some(PathBuf::from(next()?)),
            "--lua" => {
                let _ = next()?; // scripting is out of scope; accepted and ignored
            }
            "-b" | "--bash-output" => config.bash_output = true,
            "-bp" => {
                config.bash_output = true;
                config.bash_prefix = true;
            }
            "-bt" => {
                config.bash_output = true;
                config.bash_timestamp = true;
            }
            "-bpt" => {
                config.bash_output = true;
                config.bash_prefix = true;
                config.bash_timestamp = true;
            }
            "--max-connections" => {
                config.max_connections = next()?.parse().map_err(|_| "invalid max-connections".to_string())?
            }
            "--rate-limit" => config.rate_limit = next()?.parse().map_err(|_| "invalid rate-limit".to_string())?,
            "--global-rate-limit" => {
                config.global_rate_limit = next()?.parse().map_err(|_| "invalid global-rate-limit".to_string())?
            }
            "--idle-timeout" => {
                config.idle_timeout = next()?.parse().map_err(|_| "invalid idle-timeout".to_string())?
            }
            "--drain" => config.drain = true,
            "--reconnect" => {
                // `--reconnect` alone means unlimited (0); `--reconnect N` caps at N.
                config.reconnect = match args.get(i + 1).and_then(|v| v.parse::<i32>().ok()) {
                    Some(n) => {
                        i += 1;
                        n
                    }
                    None => 0,
                };
            }
            "--tls" => config.tls.enabled = true,
            "--cert" => config.tls.cert_path = Some(PathBuf::from(next()?)),
            "--key" => config.tls.key_path = Some(PathBuf::from(next()?)),
            "--ca" => config.tls.ca_path = Some(PathBuf::from(next()?)),
            "-g" | "--group" => config.group = Some(next()?),
            "-s" => autostart = true,
            "--test" => config.test_mode = true,
            "--mode" => {
                config.mode = match next()?.as_str() {
                    "in" => ServerMode::In,
                    "out" => ServerMode::Out,
                    "master" => ServerMode::Master,
                    "inout" => ServerMode::InOut,
                    other => return Err(format!("invalid mode: {other}")),
                }
            }
            "--udp" => config.udp = true,
            "--master-pw" => config.master_pw = Some(next()?),
            "--master-forward" => config.master_forward = true,
            "--http" => config.http_dir = Some(PathBuf::from(next()?)),
            "--http-cache" => config.http_cache = true,
            "-u" | "--upstream" => config.upstreams.push(next()?),
            "--backend" => config.proxy.backends.push(next()?),
            "--strategy" => {
                config.proxy.strategy = match next()?.as_str() {
                    "random" => ProxyStrategy::Random,
                    "native" => ProxyStrategy::Native,
                    "round_robin" | "round-robin" => ProxyStrategy::RoundRobin,
                    other => return Err(format!("invalid strategy: {other}")),
                }
            }
            "--protocol" => {
                config.proxy.protocol = match next()?.as_str() {
                    "tcp" => ProxyProtocol::Tcp,
                    "http" => ProxyProtocol::Http,
                    other => return Err(format!("invalid protocol: {other}")),
                }
            }
            "--health-check" => config.proxy.health_check = true,
            "--health-kind" => {
                config.proxy.health_kind = match next()?.as_str() {
                    "http" => HealthCheckKind::Http,
                    "tcp" => HealthCheckKind::Tcp,
                    other => return Err(format!("invalid health-check kind: {other}")),
                }
            }
            "--health-interval" => {
                config.proxy.health_interval_secs =
                    next()?.parse().map_err(|_| "invalid health-interval".to_string())?
            }
            "--health-path" => config.proxy.health_path = next()?,
            "--health-threshold" => {
                config.proxy.health_threshold =
                    next()?.parse().map_err(|_| "invalid health-threshold".to_string())?
            }
            "--circuit-threshold" => {
                config.proxy.circuit_threshold =
                    next()?.parse().map_err(|_| "invalid circuit-threshold".to_string())?
            }
            "--circuit-timeout" => {
                config.proxy.circuit_timeout_secs =
                    next()?.parse().map_err(|_| "invalid circuit-timeout".to_string())?
            }
            "--retry" => config.proxy.retry_count = next()?.parse().map_err(|_| "invalid retry".to_string())?,
            "--retry-all" => config.proxy.retry_all = true,
            "--client-ca" => config.tls.ca_path = Some(PathBuf::from(next()?)),
            "--client-cert" => config.tls.cert_path = Some(PathBuf::from(next()?)),
            "--client-key" => config.tls.key_path = Some(PathBuf::from(next()?)),
            "--sidecar" => {}
            "--persistent" => config.cache.persistent_path = Some(PathBuf::from(next()?)),
            "--cache-mode" => {
                config.cache.mode = match next()?.as_str() {
                    "readonly" => CacheMode::Readonly,
                    "admin" => CacheMode::Admin,
                    "readwrite" => CacheMode::Readwrite,
                    other => return Err(format!("invalid cache mode: {other}")),
                }
            }
            "--maxmemory" => config.cache.max_memory = parse_memory_size(&next()?)?,
            "--eviction" => {
                config.cache.eviction = match next()?.as_str() {
                    "allkeys-lru" | "allkeys_lru" => CacheEviction::AllkeysLru,
                    "allkeys-random" | "allkeys_random" => CacheEviction::AllkeysRandom,
                    "none" => CacheEviction::None,
                    other => return Err(format!("invalid eviction policy: {other}")),
                }
            }
            "--resp" => config.cache.resp_forced = true,
            "--replicate" => config.replicate_from = Some(next()?),
            other => return Err(format!("unknown flag: {other}")),
        }
        i += 1;
    }
    Ok(autostart)
}

/// Parse a memory size like `256M`, `2G`, or a bare byte count.
fn parse_memory_size(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let (digits, mult) = match raw.chars().last() {
        Some('K') | Some('k') => (&raw[..raw.len() - 1], 1024u64),
        Some('M') | Some('m') => (&raw[..raw.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        _ => (raw, 1),
    };
    digits.parse::<u64>().map(|n| n * mult).map_err(|_| format!("invalid memory size: {raw}"))
}

/// Fields that require a re-bind and so can't be changed on a running
/// runtime via `edit`.
pub fn changes_require_restart(before: &RuntimeConfig, after: &RuntimeConfig) -> bool {
    before.port != after.port
        || before.tls.enabled != after.tls.enabled
        || before.udp != after.udp
        || before.target != after.target
        || before.proxy.protocol != after.proxy.protocol
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::model::RuntimeKind;

    #[test]
    fn parses_common_flags() {
        let mut config = RuntimeConfig::new("web", RuntimeKind::Server);
        let autostart = apply_flags(&mut config, &[
            "-p".into(), "8080".into(),
            "--max-connections".into(), "100".into(),
            "-s".into(),
        ]).unwrap();
        assert!(autostart);
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 100);
    }

    #[test]
    fn parses_cache_maxmemory_with_suffix() {
        let mut config = RuntimeConfig::new("c", RuntimeKind::Cache);
        apply_flags(&mut config, &["--maxmemory".into(), "256M".into()]).unwrap();
        assert_eq!(config.cache.max_memory, 256 * 1024 * 1024);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let mut config = RuntimeConfig::new("web", RuntimeKind::Server);
        assert!(apply_flags(&mut config, &["--nope".into()]).is_err());
    }

    #[test]
    fn reconnect_without_a_number_means_unlimited() {
        let mut config = RuntimeConfig::new("c", RuntimeKind::Client);
        apply_flags(&mut config, &["--reconnect".into()]).unwrap();
        assert_eq!(config.reconnect, 0);
    }

    #[test]
    fn reconnect_with_a_number_caps_attempts() {
        let mut config = RuntimeConfig::new("c", RuntimeKind::Client);
        apply_flags(&mut config, &["--reconnect".into(), "3".into()]).unwrap();
        assert_eq!(config.reconnect, 3);
    }

    #[test]
    fn restart_required_flags_port_change() {
        let before = RuntimeConfig::new("web", RuntimeKind::Server);
        let mut after = before.clone();
        after.port = 9090;
        assert!(changes_require_restart(&before, &after));
    }
}
