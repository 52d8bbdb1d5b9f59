// SPDX-License-Identifier: MIT

//! Leader→follower command replication: a leader pushes the raw, newline-terminated mutating command to
//! every follower connection as it happens; a follower parses and replays
//! those lines against its own store with the mode gate lifted.
//!
//! This module owns encoding, decoding, and follower bookkeeping. The actual
//! socket I/O (writing encoded lines out to follower connections, dialing a
//! leader) belongs to the engine crate that owns connection lifecycles.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::store::Store;
use sl_core::clock::Clock;

/// Opaque connection identifier for a follower socket.
pub type ConnId = u64;

/// A single mutation, replicated as one newline-terminated text line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutatingCommand {
    Set { key: Vec<u8>, val: Vec<u8> },
    Del { key: Vec<u8> },
    LPush { key: Vec<u8>, val: Vec<u8> },
    RPush { key: Vec<u8>, val: Vec<u8> },
    SAdd { key: Vec<u8>, member: Vec<u8> },
    HSet { key: Vec<u8>, field: Vec<u8>, val: Vec<u8> },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplicationDecodeError {
    #[error("unknown replication verb {0:?}")]
    UnknownVerb(String),
    #[error("malformed replication line")]
    Malformed,
    #[error("invalid base64 field")]
    BadBase64,
}

fn b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

fn unb64(field: &str) -> Result<Vec<u8>, ReplicationDecodeError> {
    BASE64.decode(field).map_err(|_| ReplicationDecodeError::BadBase64)
}

impl MutatingCommand {
    /// Encode as a single line, fields base64'd so arbitrary bytes never
    /// collide with the space/newline delimiters.
    pub fn encode(&self) -> String {
        match self {
            MutatingCommand::Set { key, val } => format!("set {} {}", b64(key), b64(val)),
            MutatingCommand::Del { key } => format!("del {}", b64(key)),
            MutatingCommand::LPush { key, val } => format!("lpush {} {}", b64(key), b64(val)),
            MutatingCommand::RPush { key, val } => format!("rpush {} {}", b64(key), b64(val)),
            MutatingCommand::SAdd { key, member } => format!("sadd {} {}", b64(key), b64(member)),
            MutatingCommand::HSet { key, field, val } => {
                format!("hset {} {} {}", b64(key), b64(field), b64(val))
            }
        }
    }

    pub fn decode(line: &str) -> Result<Self, ReplicationDecodeError> {
        let mut parts = line.trim().split(' ');
        let verb = parts.next().ok_or(ReplicationDecodeError::Malformed)?;
        let rest: Vec<&str> = parts.collect();
        match verb {
            "set" => {
                let [key, val] = take2(&rest)?;
                Ok(MutatingCommand::Set { key: unb64(key)?, val: unb64(val)? })
            }
            "del" => {
                let key = rest.first().ok_or(ReplicationDecodeError::Malformed)?;
                Ok(MutatingCommand::Del { key: unb64(key)? })
            }
            "lpush" => {
                let [key, val] = take2(&rest)?;
                Ok(MutatingCommand::LPush { key: unb64(key)?, val: unb64(val)? })
            }
            "rpush" => {
                let [key, val] = take2(&rest)?;
                Ok(MutatingCommand::RPush { key: unb64(key)?, val: unb64(val)? })
            }
            "sadd" => {
                let [key, member] = take2(&rest)?;
                Ok(MutatingCommand::SAdd { key: unb64(key)?, member: unb64(member)? })
            }
            "hset" => {
                if rest.len() != 3 {
                    return Err(ReplicationDecodeError::Malformed);
                }
                Ok(MutatingCommand::HSet {
                    key: unb64(rest[0])?,
                    field: unb64(rest[1])?,
                    val: unb64(rest[2])?,
                })
            }
            other => Err(ReplicationDecodeError::UnknownVerb(other.to_string())),
        }
    }

    /// Apply this command to `store`, bypassing the mode gate — used by a
    /// follower replaying commands received from its leader.
    pub fn apply<C: Clock>(&self, store: &mut Store<C>) {
        let was_mode = store.mode();
        store.set_mode(crate::mode::Mode::Readwrite);
        match self {
            MutatingCommand::Set { key, val } => {
                let _ = store.set(key, val);
            }
            MutatingCommand::Del { key } => {
                let _ = store.del(key);
            }
            MutatingCommand::LPush { key, val } => {
                let _ = store.lpush(key, std::slice::from_ref(val));
            }
            MutatingCommand::RPush { key, val } => {
                let _ = store.rpush(key, std::slice::from_ref(val));
            }
            MutatingCommand::SAdd { key, member } => {
                let _ = store.sadd(key, member);
            }
            MutatingCommand::HSet { key, field, val } => {
                let _ = store.hset(key, field, val);
            }
        }
        store.set_mode(was_mode);
    }
}

fn take2<'a>(rest: &[&'a str]) -> Result<[&'a str; 2], ReplicationDecodeError> {
    match rest {
        [a, b] => Ok([a, b]),
        _ => Err(ReplicationDecodeError::Malformed),
    }
}

/// Produce the full dump of `store` as a sequence of commands a fresh
/// follower can replay to reach the same state, in the shapes the wire
/// format supports (a hash or list with many elements becomes one command
/// per element).
pub fn full_dump<C: Clock>(store: &Store<C>) -> Vec<MutatingCommand> {
    let mut out = Vec::new();
    for (key, value) in store.iter() {
        match value {
            crate::value::Value::Str(v) => {
                out.push(MutatingCommand::Set { key: key.to_vec(), val: v.clone() });
            }
            crate::value::Value::List(list) => {
                for item in list {
                    out.push(MutatingCommand::RPush { key: key.to_vec(), val: item.clone() });
                }
            }
            crate::value::Value::Set(set) => {
                for member in set {
                    out.push(MutatingCommand::SAdd { key: key.to_vec(), member: member.clone() });
                }
            }
            crate::value::Value::Hash(hash) => {
                for (field, val) in hash {
                    out.push(MutatingCommand::HSet {
                        key: key.to_vec(),
                        field: field.clone(),
                        val: val.clone(),
                    });
                }
            }
        }
    }
    out
}

/// Leader-side follower set: tracks which connections should receive every
/// subsequent mutation.
#[derive(Debug, Default)]
pub struct Followers {
    conns: Vec<ConnId>,
}

impl Followers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, conn: ConnId) {
        if !self.conns.contains(&conn) {
            self.conns.push(conn);
        }
    }

    /// Drop a follower, e.g. after a failed write to its socket.
    pub fn drop_follower(&mut self, conn: ConnId) {
        self.conns.retain(|c| *c != conn);
    }

    pub fn iter(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.conns.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
