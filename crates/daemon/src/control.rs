// SPDX-License-Identifier: MIT

//! The control-plane connection handler: accepts one
//! connection per client on the Unix control socket, reads newline
//! commands, and writes back `<status byte><body><NUL>` responses.

use std::sync::Arc;

use sl_core::glob;
use sl_core::model::{ChildPolicy, ExternalKind, RuntimeConfig, RuntimeKind, RuntimeState};
use sl_engine::{build_runtime, RuntimeManager};
use sl_storage::PersistenceStore;
use sl_wire::control::{tokenize, ControlResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{info, warn};

use crate::flags;

/// Serve control-plane commands on one accepted connection until it
/// closes. Commands pipeline: each newline-terminated line gets its own
/// response before the next is read — except `start -i`, which promotes
/// the rest of this connection's lifetime into an interactive session.
pub async fn handle_connection(stream: UnixStream, manager: Arc<RuntimeManager>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "control connection read failed");
                break;
            }
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        let tokens = tokenize(trimmed);
        if tokens.first().map(String::as_str) == Some("start") && tokens.iter().any(|t| t == "-i") {
            run_interactive_start(&manager, &tokens[1..], &mut reader, &mut write_half).await;
            continue;
        }
        let response = dispatch(&manager, &tokens).await;
        if write_half.write_all(&response.encode()).await.is_err() {
            break;
        }
    }
}

/// Handle `start <name|glob> -i`: start the single matching runtime (an
/// `-i` with more than one match is a caller error), then take over the
/// connection — every line read from the socket is injected into the
/// runtime, and every outbound message the runtime produces is echoed back
/// raw, until the runtime stops (a NUL byte ends the session) or the
/// connection closes.
async fn run_interactive_start(
    manager: &Arc<RuntimeManager>,
    rest: &[String],
    reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: &mut tokio::net::unix::OwnedWriteHalf,
) {
    let filtered: Vec<String> = rest.iter().filter(|t| t.as_str() != "-i").cloned().collect();
    let names = match resolve_many(manager, &filtered) {
        Ok(n) => n,
        Err(e) => {
            let _ = writer.write_all(&ControlResponse::bad_input(e).encode()).await;
            return;
        }
    };
    if names.len() != 1 {
        let _ = writer
            .write_all(&ControlResponse::bad_input("-i requires exactly one matching runtime").encode())
            .await;
        return;
    }
    let name = &names[0];
    let Some(runtime) = manager.get(name) else {
        let _ = writer.write_all(&ControlResponse::bad_input(format!("runtime not found: {name}")).encode()).await;
        return;
    };
    if let Err(e) = manager.start(name).await {
        let _ = writer.write_all(&ControlResponse::fatal(format!("{name}: {e}")).encode()).await;
        return;
    }
    let mut rx = runtime.base().attach_interactive();
    if writer.write_all(&ControlResponse::ok(format!("started: {name}")).encode()).await.is_err() {
        return;
    }

    let is_cache = runtime.kind() == RuntimeKind::Cache;
    let mut line = String::new();
    loop {
        line.clear();
        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
                let trimmed = line.trim_end_matches(['\n', '\r']).to_string();
                if trimmed.is_empty() {
                    continue;
                }
                if is_cache {
                    if let Some(reply) = runtime.execute_cache_command(trimmed.as_bytes()).await {
                        if writer.write_all(&reply).await.is_err() {
                            break;
                        }
                    }
                } else {
                    runtime.inject_message(trimmed).await;
                }
            }
            received = rx.recv() => {
                match received {
                    Some(bytes) => {
                        let is_eos = bytes.as_slice() == sl_engine::INTERACTIVE_EOS;
                        if writer.write_all(&bytes).await.is_err() || is_eos {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
        if runtime.state() != RuntimeState::Running {
            break;
        }
    }
}

/// Resolve a `<name|glob>` token against the registry. A non-matching
/// token is an error, and an empty result list never silently succeeds.
fn resolve_names(manager: &RuntimeManager, token: &str) -> Result<Vec<String>, String> {
    let names = manager.names();
    let matched = glob::resolve(token, &names);
    if matched.is_empty() {
        Err(format!("runtime not found: {token}"))
    } else {
        Ok(matched)
    }
}

fn resolve_many(manager: &RuntimeManager, tokens: &[String]) -> Result<Vec<String>, String> {
    if tokens.is_empty() {
        return Err("expected at least one name or glob".to_string());
    }
    let mut out = Vec::new();
    for token in tokens {
        out.extend(resolve_names(manager, token)?);
    }
    out.sort();
    out.dedup();
    Ok(out)
}

fn parse_kind(raw: &str) -> Result<RuntimeKind, String> {
    match raw {
        "server" => Ok(RuntimeKind::Server),
        "client" => Ok(RuntimeKind::Client),
        "proxy" => Ok(RuntimeKind::Proxy),
        "cache" => Ok(RuntimeKind::Cache),
        other => Err(format!("unknown runtime type: {other}")),
    }
}

async fn dispatch(manager: &Arc<RuntimeManager>, tokens: &[String]) -> ControlResponse {
    let Some((verb, rest)) = tokens.split_first() else {
        return ControlResponse::bad_input("empty command");
    };
    match verb.as_str() {
        "create" => cmd_create(manager, rest).await,
        "start" => cmd_start(manager, rest).await,
        "stop" => cmd_stop(manager, rest).await,
        "remove" => cmd_remove(manager, rest).await,
        "ls" => cmd_list(manager, rest, true),
        "ps" => cmd_list(manager, rest, false),
        "send" => cmd_send(manager, rest).await,
        "edit" => cmd_edit(manager, rest),
        "show" | "dump" => cmd_show(manager, rest),
        "import" => cmd_import(manager, rest),
        "action" => cmd_action(manager, rest).await,
        "stats" => cmd_stats(manager, rest),
        "reload" | "reload-lua" => cmd_reload(manager, rest).await,
        "owner" => cmd_owner(manager, rest),
        "attach" => cmd_attach(manager, rest),
        "cluster-dir" => ControlResponse::bad_input("cluster mode is off"),
        other => ControlResponse::bad_input(format!("unknown command: {other}")),
    }
}

async fn cmd_create(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let [kind_tok, name_tok, flag_tokens @ ..] = rest else {
        return ControlResponse::bad_input("usage: create <type> <name> [flags…]");
    };
    let kind = match parse_kind(kind_tok) {
        Ok(k) => k,
        Err(e) => return ControlResponse::bad_input(e),
    };
    if manager.exists(name_tok) {
        return ControlResponse::bad_input(format!("already exists: {name_tok}"));
    }
    let mut config = RuntimeConfig::new(name_tok.clone(), kind);
    let autostart = match flags::apply_flags(&mut config, flag_tokens) {
        Ok(a) => a,
        Err(e) => return ControlResponse::bad_input(e),
    };
    let runtime = build_runtime(config);
    if autostart {
        match manager.create_and_start(runtime, None, ChildPolicy::Stop).await {
            Ok(()) => ControlResponse::ok(format!("created and started: {name_tok}")),
            Err(e) => ControlResponse::fatal(format!("created but failed to start: {e}")),
        }
    } else {
        manager.create(runtime, None, ChildPolicy::Stop);
        ControlResponse::ok(format!("created: {name_tok}"))
    }
}

async fn cmd_start(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let tokens: Vec<String> = rest.iter().filter(|t| t.as_str() != "-i").cloned().collect();
    let names = match resolve_many(manager, &tokens) {
        Ok(n) => n,
        Err(e) => return ControlResponse::bad_input(e),
    };
    let mut started = Vec::new();
    let mut failed = Vec::new();
    for name in names {
        match manager.start(&name).await {
            Ok(()) => started.push(name),
            Err(e) => failed.push(format!("{name}: {e}")),
        }
    }
    if failed.is_empty() {
        ControlResponse::ok(format!("started: {}", started.join(", ")))
    } else {
        ControlResponse::fatal(failed.join("; "))
    }
}

async fn cmd_stop(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let names = match resolve_many(manager, rest) {
        Ok(n) => n,
        Err(e) => return ControlResponse::bad_input(e),
    };
    let mut stopped = Vec::new();
    let mut failed = Vec::new();
    for name in names {
        match manager.stop(&name).await {
            Ok(()) => stopped.push(name),
            Err(e) => failed.push(format!("{name}: {e}")),
        }
    }
    if failed.is_empty() {
        ControlResponse::ok(format!("stopped: {}", stopped.join(", ")))
    } else {
        ControlResponse::fatal(failed.join("; "))
    }
}

/// Deferred destruction: the runtime is pulled from the
/// registry and stopped, then a zero-delay task tears it down after
/// yielding once so any completion already scheduled against it has run.
async fn cmd_remove(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let names = match resolve_many(manager, rest) {
        Ok(n) => n,
        Err(e) => return ControlResponse::bad_input(e),
    };
    let mut removed = Vec::new();
    for name in names {
        tokio::task::yield_now().await;
        match manager.remove(&name).await {
            Ok(()) => removed.push(name),
            Err(e) => warn!(name, error = %e, "remove failed"),
        }
    }
    ControlResponse::ok(format!("removed: {}", removed.join(", ")))
}

async fn cmd_send(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let [name, message_parts @ ..] = rest else {
        return ControlResponse::bad_input("usage: send <name> <message>");
    };
    let Some(runtime) = manager.get(name) else {
        return ControlResponse::bad_input(format!("runtime not found: {name}"));
    };
    runtime.inject_message(message_parts.join(" ")).await;
    ControlResponse::ok(format!("sent to {name}"))
}

fn cmd_edit(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let [name, flag_tokens @ ..] = rest else {
        return ControlResponse::bad_input("usage: edit <name> [flags…]");
    };
    let Some(runtime) = manager.get(name) else {
        return ControlResponse::bad_input(format!("runtime not found: {name}"));
    };
    let before = runtime.config();
    let mut after = before.clone();
    if let Err(e) = flags::apply_flags(&mut after, flag_tokens) {
        return ControlResponse::bad_input(e);
    }
    if runtime.state() == sl_core::model::RuntimeState::Running && flags::changes_require_restart(&before, &after) {
        return ControlResponse::bad_input("can't change while running");
    }
    match manager.import_config(name, after) {
        Ok(()) => {
            let _ = manager.store().save(&runtime.config());
            ControlResponse::ok(format!("updated: {name}"))
        }
        Err(e) => ControlResponse::bad_input(e.to_string()),
    }
}

fn cmd_show(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let names = match resolve_many(manager, rest) {
        Ok(n) => n,
        Err(e) => return ControlResponse::bad_input(e),
    };
    let mut docs = Vec::new();
    for name in names {
        if let Some(runtime) = manager.get(&name) {
            match PersistenceStore::format_pretty(&runtime.config()) {
                Ok(json) => docs.push(json),
                Err(e) => return ControlResponse::fatal(e.to_string()),
            }
        }
    }
    ControlResponse::ok(docs.join("\n\n"))
}

fn cmd_import(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let [name, json_parts @ ..] = rest else {
        return ControlResponse::bad_input("usage: import <name> <json>");
    };
    let json = json_parts.join(" ");
    let config = match PersistenceStore::parse(&json) {
        Ok(c) => c,
        Err(e) => return ControlResponse::bad_input(format!("invalid json: {e}")),
    };
    if config.name != *name && manager.exists(&config.name) {
        return ControlResponse::bad_input(format!("already exists: {}", config.name));
    }
    let Some(runtime) = manager.get(name) else {
        return ControlResponse::bad_input(format!("runtime not found: {name}"));
    };
    if runtime.state() == sl_core::model::RuntimeState::Running {
        return ControlResponse::bad_input("can't change while running");
    }
    if config.name != *name {
        if let Err(e) = manager.rename(name, &config.name) {
            return ControlResponse::bad_input(e.to_string());
        }
    }
    match manager.import_config(&config.name, config.clone()) {
        Ok(()) => {
            let _ = manager.store().save(&config);
            ControlResponse::ok(format!("imported: {}", config.name))
        }
        Err(e) => ControlResponse::bad_input(e.to_string()),
    }
}

/// Runtime-type-specific verbs (the `action` command): forwarded as a
/// synthetic inbound message, the same path `send` uses, so e.g. cache
/// store ops (`action cache1 SET a 1`) run exactly as they would from a
/// data-plane connection.
async fn cmd_action(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let [name, verb_parts @ ..] = rest else {
        return ControlResponse::bad_input("usage: action <name> <verb> [args…]");
    };
    let Some(runtime) = manager.get(name) else {
        return ControlResponse::bad_input(format!("runtime not found: {name}"));
    };
    if verb_parts.is_empty() {
        return ControlResponse::bad_input("usage: action <name> <verb> [args…]");
    }
    runtime.inject_message(verb_parts.join(" ")).await;
    ControlResponse::ok(format!("action dispatched: {name}"))
}

fn cmd_stats(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let names = match resolve_many(manager, rest) {
        Ok(n) => n,
        Err(e) => return ControlResponse::bad_input(e),
    };
    let mut lines = Vec::new();
    for name in names {
        if let Some(runtime) = manager.get(&name) {
            let stats = runtime.stats();
            lines.push(format!(
                "{name}: connections={} messages={} bytes_in={} bytes_out={}",
                stats.total_connections(),
                stats.total_messages(),
                stats.bytes_in(),
                stats.bytes_out(),
            ));
        }
    }
    ControlResponse::ok(lines.join("\n"))
}

async fn cmd_reload(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let names = match resolve_many(manager, rest) {
        Ok(n) => n,
        Err(e) => return ControlResponse::bad_input(e),
    };
    let mut reloaded = Vec::new();
    for name in names {
        if manager.get(&name).map(|r| r.state()) == Some(sl_core::model::RuntimeState::Running) {
            let _ = manager.stop(&name).await;
        }
        match manager.start(&name).await {
            Ok(()) => reloaded.push(name),
            Err(e) => warn!(name, error = %e, "reload failed"),
        }
    }
    ControlResponse::ok(format!("reloaded: {}", reloaded.join(", ")))
}

fn cmd_owner(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let [name] = rest else {
        return ControlResponse::bad_input("usage: owner <name>");
    };
    let Some(runtime) = manager.get(name) else {
        return ControlResponse::bad_input(format!("runtime not found: {name}"));
    };
    let config = runtime.config();
    let children = manager.children_of(name);
    ControlResponse::ok(format!(
        "owner={} child_policy={:?} children={}",
        config.owner.as_deref().unwrap_or("-"),
        config.child_policy,
        children.join(",")
    ))
}

fn cmd_attach(manager: &Arc<RuntimeManager>, rest: &[String]) -> ControlResponse {
    let [kind_tok, name, port_tok, extra @ ..] = rest else {
        return ControlResponse::bad_input("usage: attach <type> <name> <port> [--owner <n>] [--pid <p>]");
    };
    let kind = match parse_kind(kind_tok) {
        Ok(k) => k,
        Err(e) => return ControlResponse::bad_input(e),
    };
    if manager.exists(name) {
        return ControlResponse::bad_input(format!("already exists: {name}"));
    }
    let port: u16 = match port_tok.parse() {
        Ok(p) => p,
        Err(_) => return ControlResponse::bad_input("invalid port"),
    };
    let mut config = RuntimeConfig::new(name.clone(), kind);
    config.port = port;
    config.external = Some(ExternalKind::Attached);
    let mut owner = None;
    let mut i = 0;
    while i < extra.len() {
        match extra[i].as_str() {
            "--owner" => {
                i += 1;
                owner = extra.get(i).cloned();
            }
            "--pid" => {
                i += 1;
                config.pid = extra.get(i).and_then(|p| p.parse().ok());
            }
            _ => {}
        }
        i += 1;
    }
    let runtime = build_runtime(config);
    manager.create(runtime, owner, ChildPolicy::Stop);
    ControlResponse::ok(format!("attached: {name}"))
}

fn cmd_list(manager: &Arc<RuntimeManager>, rest: &[String], all: bool) -> ControlResponse {
    let silent_header = rest.iter().any(|t| t == "-s");
    let mut names = manager.names();
    names.sort();
    let mut lines = Vec::new();
    if !silent_header {
        lines.push("NAME\tTYPE\tPORT\tSTATUS".to_string());
    }
    for name in names {
        let Some(runtime) = manager.get(&name) else { continue };
        let state = runtime.state();
        if !all && state != sl_core::model::RuntimeState::Running {
            continue;
        }
        let config = runtime.config();
        lines.push(format!("{}\t{:?}\t{}\t{:?}", config.name, config.kind, config.port, state));
    }
    ControlResponse::ok(lines.join("\n"))
}
