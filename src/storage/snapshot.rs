use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::types::{Key, Value, normalize_key};

/// Committed key-value state of a dictionary instance.
pub type BaseMapping = BTreeMap<Key, Value>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot is not a JSON object of entries: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Reads the flat `{key: value}` snapshot file once.
///
/// Keys are lower-cased. Non-string values are kept as their JSON text. When two
/// keys collide after normalization the one appearing later in the file wins.
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<BaseMapping, SnapshotError> {
    let bytes = fs::read(path.as_ref())?;
    let entries: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes)?;

    Ok(entries
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            (normalize_key(&key), value)
        })
        .collect())
}

/// Like [`load_snapshot`], but any failure yields an empty mapping.
pub fn load_snapshot_or_empty(path: impl AsRef<Path>) -> BaseMapping {
    let path = path.as_ref();
    match load_snapshot(path) {
        Ok(base) => {
            info!(path = %path.display(), entries = base.len(), "loaded snapshot");
            base
        }
        Err(err) => {
            warn!(path = %path.display(), "starting with empty dictionary: {err}");
            BaseMapping::new()
        }
    }
}
