use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::atomic_io::write_text_atomic;

pub const METADATA_FILE: &str = "enshrouded_user.json";

pub fn store_path(save_dir: &Path) -> PathBuf {
    save_dir.join(METADATA_FILE)
}

/// One element of the store's `worlds` array. Unknown keys land in `extra`
/// and are written back verbatim.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorldEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "createdAt")]
    pub created_at: i64,
    #[serde(default, rename = "lastPlayed")]
    pub last_played: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorldEntry {
    /// Applies one overlaid key to this entry. Keys colliding with the
    /// typed fields are routed into them (last write wins, as the JSON
    /// dict assignment this models would behave); putting them in
    /// `extra` would make `flatten` emit the key twice on save.
    /// Mistyped collisions are dropped.
    pub(crate) fn apply_overlay(&mut self, key: &str, value: &Value) {
        match key {
            "name" => {
                if let Some(name) = value.as_str() {
                    self.name = name.to_string();
                }
            }
            "createdAt" => {
                if let Some(at) = value.as_i64() {
                    self.created_at = at;
                }
            }
            "lastPlayed" => {
                if let Some(at) = value.as_i64() {
                    self.last_played = at;
                }
            }
            _ => {
                self.extra.insert(key.to_string(), value.clone());
            }
        }
    }
}

/// The save directory's single metadata document. `worlds` stays `None`
/// when the key was absent (or the file unreadable), which suppresses any
/// later rewrite of a document we never understood.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worlds: Option<Vec<WorldEntry>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoreDocument {
    /// Reads the store, degrading to an empty document on any read or
    /// parse failure so one corrupt file does not block scanning.
    pub fn load(save_dir: &Path) -> Self {
        let path = store_path(save_dir);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(path = %path.display(), %error, "store_read_failed_using_empty");
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(document) => document,
            Err(error) => {
                warn!(path = %path.display(), %error, "store_parse_failed_using_empty");
                Self::default()
            }
        }
    }

    pub(crate) fn save(&self, save_dir: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(io::Error::from)?;
        write_text_atomic(&store_path(save_dir), &text)
    }

    pub fn entry(&self, id: &str) -> Option<&WorldEntry> {
        self.worlds
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|entry| entry.id == id)
    }

    pub(crate) fn entry_mut(&mut self, id: &str) -> Option<&mut WorldEntry> {
        self.worlds
            .as_deref_mut()
            .unwrap_or_default()
            .iter_mut()
            .find(|entry| entry.id == id)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn load_degrades_to_empty_on_garbage() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(store_path(temp.path()), "{not json").expect("seed");

        let store = StoreDocument::load(temp.path());
        assert!(store.worlds.is_none());
        assert!(store.entry("anything").is_none());
    }

    #[test]
    fn load_degrades_to_empty_on_missing_file() {
        let temp = TempDir::new().expect("tempdir");
        let store = StoreDocument::load(temp.path());
        assert!(store.worlds.is_none());
    }

    #[test]
    fn round_trip_preserves_unknown_keys() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(
            store_path(temp.path()),
            r#"{
                "schemaVersion": 3,
                "worlds": [
                    {"id": "w1", "name": "One", "createdAt": 5, "lastPlayed": 9, "biome": "forest"}
                ]
            }"#,
        )
        .expect("seed");

        let store = StoreDocument::load(temp.path());
        store.save(temp.path()).expect("save");

        let reloaded: Value =
            serde_json::from_str(&fs::read_to_string(store_path(temp.path())).expect("read"))
                .expect("parse");
        assert_eq!(reloaded["schemaVersion"], 3);
        assert_eq!(reloaded["worlds"][0]["biome"], "forest");
        assert_eq!(reloaded["worlds"][0]["createdAt"], 5);
        assert_eq!(reloaded["worlds"][0]["lastPlayed"], 9);
    }

    #[test]
    fn overlay_routes_typed_keys_instead_of_duplicating() {
        let mut entry = WorldEntry {
            id: "w1".to_string(),
            name: "Old".to_string(),
            ..WorldEntry::default()
        };

        entry.apply_overlay("name", &Value::from("Renamed"));
        entry.apply_overlay("lastPlayed", &Value::from(777));
        entry.apply_overlay("seed", &Value::from(42));
        // A mistyped collision is dropped, not emitted twice.
        entry.apply_overlay("createdAt", &Value::from("not a number"));

        assert_eq!(entry.name, "Renamed");
        assert_eq!(entry.last_played, 777);
        assert_eq!(entry.created_at, 0);
        assert_eq!(entry.extra["seed"], 42);
        assert!(!entry.extra.contains_key("name"));
        assert!(!entry.extra.contains_key("lastPlayed"));
        assert!(!entry.extra.contains_key("createdAt"));
    }

    #[test]
    fn entry_lookup_finds_by_id() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(
            store_path(temp.path()),
            r#"{"worlds": [{"id": "w1", "name": "One"}, {"id": "w2", "name": "Two"}]}"#,
        )
        .expect("seed");

        let store = StoreDocument::load(temp.path());
        assert_eq!(store.entry("w2").expect("w2").name, "Two");
        assert!(store.entry("w3").is_none());
    }
}
