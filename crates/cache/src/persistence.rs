// SPDX-License-Identifier: MIT

//! Snapshot persistence: a length-prefixed `serde_json` line format, one
//! record per live key, compressed at rest with `zstd`.
//!
//! Write path is atomic: encode into a buffer, write to `<path>.tmp`,
//! `fsync`, then `rename` over the final path. Load clears the store and
//! rebuilds it entirely from the snapshot — there is no incremental replay.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sl_core::clock::Clock;

use crate::store::Store;
use crate::value::Value;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io error on {path}: {source}")]
    Io { path: String, #[source] source: io::Error },
    #[error("corrupt snapshot record: {0}")]
    Decode(String),
}

#[derive(Serialize, Deserialize)]
struct Record {
    key: Vec<u8>,
    value: Value,
}

/// Serialize every live key in `store` to a zstd-compressed, length-prefixed
/// record stream and atomically write it to `path`.
pub fn save<C: Clock>(store: &Store<C>, path: &Path) -> Result<(), SnapshotError> {
    let mut raw = Vec::new();
    for (key, value) in store.iter() {
        let record = Record { key: key.to_vec(), value: value.clone() };
        let encoded = serde_json::to_vec(&record)
            .map_err(|e| SnapshotError::Decode(e.to_string()))?;
        raw.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        raw.extend_from_slice(&encoded);
    }

    let compressed = zstd::encode_all(&raw[..], 0)
        .map_err(|e| io_err(path, e))?;

    let tmp_path = path.with_extension("tmp");
    let mut file = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
    file.write_all(&compressed).map_err(|e| io_err(&tmp_path, e))?;
    file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Clear `store` and repopulate it from the snapshot at `path`. A missing
/// file is treated as an empty snapshot, matching a fresh cache runtime with
/// nothing persisted yet.
pub fn load<C: Clock>(store: &mut Store<C>, path: &Path) -> Result<(), SnapshotError> {
    let compressed = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            store.clear();
            return Ok(());
        }
        Err(e) => return Err(io_err(path, e)),
    };

    let raw = zstd::decode_all(&compressed[..]).map_err(|e| io_err(path, e))?;

    store.clear();
    let mut cursor = &raw[..];
    while !cursor.is_empty() {
        if cursor.len() < 4 {
            return Err(SnapshotError::Decode("truncated length prefix".into()));
        }
        let (len_bytes, rest) = cursor.split_at(4);
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        cursor = rest;
        if cursor.len() < len {
            return Err(SnapshotError::Decode("truncated record body".into()));
        }
        let (body, rest) = cursor.split_at(len);
        let record: Record = serde_json::from_slice(body)
            .map_err(|e| SnapshotError::Decode(e.to_string()))?;
        store.restore(record.key, record.value);
        cursor = rest;
    }
    Ok(())
}

fn io_err(path: &Path, source: io::Error) -> SnapshotError {
    SnapshotError::Io { path: path.display().to_string(), source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::clock::FakeClock;

    #[test]
    fn save_then_load_round_trips_all_value_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");

        let mut store = Store::with_clock(FakeClock::new());
        store.set(b"str", b"value").unwrap();
        store.rpush(b"list", &[b"a".to_vec(), b"b".to_vec()]).unwrap();
        store.sadd(b"set", b"member").unwrap();
        store.hset(b"hash", b"field", b"val").unwrap();

        save(&store, &path).unwrap();

        let mut restored = Store::with_clock(FakeClock::new());
        load(&mut restored, &path).unwrap();

        assert_eq!(restored.get(b"str"), Some(b"value".to_vec()));
        assert_eq!(restored.lrange(b"list", 0, -1), vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(restored.sismember(b"set", b"member"));
        assert_eq!(restored.hget(b"hash", b"field"), Some(b"val".to_vec()));
    }

    #[test]
    fn load_missing_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        let mut store = Store::with_clock(FakeClock::new());
        store.set(b"leftover", b"v").unwrap();
        load(&mut store, &path).unwrap();

        assert!(store.is_empty());
    }

    #[test]
    fn save_is_atomic_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        let store = Store::with_clock(FakeClock::new());
        save(&store, &path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert!(path.exists());
    }
}
