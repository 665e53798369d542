use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::atomic_io::write_text_atomic;

pub fn index_path(save_dir: &Path, world_id: &str) -> PathBuf {
    save_dir.join(format!("{world_id}-index"))
}

/// A world's `{id}-index` sidecar document. `time`, `deleted` and `latest`
/// are the keys the duplication transaction rewrites; everything else is
/// carried in `extra` untouched.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IndexDocument {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub latest: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IndexDocument {
    /// Lenient read used during scanning: a missing or malformed index
    /// is logged and yields `None`, and the world is simply not listed.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(path = %path.display(), %error, "index_read_failed_world_skipped");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(document) => Some(document),
            Err(error) => {
                warn!(path = %path.display(), %error, "index_parse_failed_world_skipped");
                None
            }
        }
    }

    /// Strict read used inside the duplication transaction, where a bad
    /// document must fail the transaction instead of degrading.
    pub(crate) fn read(path: &Path) -> io::Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(io::Error::from)
    }

    pub(crate) fn save(&self, path: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(io::Error::from)?;
        write_text_atomic(path, &text)
    }

    /// Extra keys that follow a world when its index is overlaid onto
    /// another document. `time` and `deleted` are typed fields and never
    /// reach `extra`; `id` is excluded here.
    pub(crate) fn carried_extra(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.extra.iter().filter(|(key, _)| key.as_str() != "id")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn load_returns_none_on_garbage() {
        let temp = TempDir::new().expect("tempdir");
        let path = index_path(temp.path(), "w1");
        fs::write(&path, "not json at all").expect("seed");

        assert!(IndexDocument::load(&path).is_none());
    }

    #[test]
    fn missing_keys_default() {
        let temp = TempDir::new().expect("tempdir");
        let path = index_path(temp.path(), "w1");
        fs::write(&path, "{}").expect("seed");

        let doc = IndexDocument::load(&path).expect("doc");
        assert_eq!(doc.time, 0);
        assert!(!doc.deleted);
        assert_eq!(doc.latest, 0);
        assert!(doc.extra.is_empty());
    }

    #[test]
    fn carried_extra_excludes_id() {
        let doc: IndexDocument = serde_json::from_str(
            r#"{"id": "w1", "time": 3, "deleted": false, "latest": 7, "seed": 42}"#,
        )
        .expect("parse");

        let keys: Vec<&str> = doc.carried_extra().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["seed"]);
        assert_eq!(doc.latest, 7);
    }

    #[test]
    fn save_round_trips_extras() {
        let temp = TempDir::new().expect("tempdir");
        let path = index_path(temp.path(), "w1");
        let doc: IndexDocument =
            serde_json::from_str(r#"{"time": 1, "deleted": true, "latest": 2, "seed": 42}"#)
                .expect("parse");

        doc.save(&path).expect("save");
        let reloaded = IndexDocument::load(&path).expect("reload");
        assert_eq!(reloaded.time, 1);
        assert!(reloaded.deleted);
        assert_eq!(reloaded.extra["seed"], 42);
    }
}
