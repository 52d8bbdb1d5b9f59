// SPDX-License-Identifier: MIT

//! The four value shapes a key can hold: string, list, set, hash.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Set(IndexSet<Vec<u8>>),
    Hash(IndexMap<Vec<u8>, Vec<u8>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Str,
    List,
    Set,
    Hash,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Hash(_) => ValueKind::Hash,
        }
    }

    /// Approximate resident bytes, used for `memory_used` accounting.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(l) => l.iter().map(|v| v.len()).sum(),
            Value::Set(s) => s.iter().map(|v| v.len()).sum(),
            Value::Hash(h) => h.iter().map(|(k, v)| k.len() + v.len()).sum(),
        }
    }
}
