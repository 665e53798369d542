use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::{fs, io};

use chrono::{Local, TimeZone};
use thiserror::Error;
use tracing::info;

use crate::index::IndexDocument;
use crate::store::{store_path, StoreDocument};

/// The `characters-index` file belongs to the shared character roster,
/// not to a world.
const RESERVED_ID: &str = "characters";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid save directory (missing {missing}): {path}")]
    InvalidDirectory {
        path: PathBuf,
        missing: &'static str,
    },
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read directory entry in {path}: {source}")]
    ReadDirEntry {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Everything known about one discovered world. Rebuilt from scratch on
/// every scan; never persisted.
#[derive(Debug, Clone)]
pub struct WorldDescriptor {
    pub id: String,
    /// Raw `name` field from the metadata store, empty when absent.
    pub name: String,
    pub created_at: i64,
    pub last_played: i64,
    pub index: IndexDocument,
    /// Paths named `{id}-*` or `{id}_info-*`, sorted for deterministic
    /// processing.
    pub files: Vec<PathBuf>,
}

impl WorldDescriptor {
    pub fn is_deleted(&self) -> bool {
        self.index.deleted
    }

    pub fn is_valid(&self) -> bool {
        !self.index.deleted && !self.files.is_empty()
    }

    pub fn display_name(&self) -> String {
        if self.last_played != 0 {
            if let Some(at) = Local.timestamp_opt(self.last_played, 0).single() {
                return format!("{} (Last played: {})", self.name, at.format("%Y-%m-%d %H:%M"));
            }
        }
        if self.name.is_empty() {
            let short: String = self.id.chars().take(6).collect();
            format!("World {short}")
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldListing {
    pub display_name: String,
    pub id: String,
}

/// In-memory view of one save directory. The descriptor cache is
/// disposable; the files on disk are the source of truth.
#[derive(Debug)]
pub struct WorldCatalog {
    pub(crate) save_dir: PathBuf,
    pub(crate) store: StoreDocument,
    pub(crate) worlds: BTreeMap<String, WorldDescriptor>,
}

impl WorldCatalog {
    /// Validates `path`, loads the metadata store (degraded to empty on
    /// parse failure) and runs an initial scan.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let save_dir: PathBuf = path.into();
        if !save_dir.is_dir() {
            return Err(CatalogError::InvalidDirectory {
                path: save_dir,
                missing: "directory",
            });
        }
        if !store_path(&save_dir).is_file() {
            return Err(CatalogError::InvalidDirectory {
                path: save_dir,
                missing: crate::store::METADATA_FILE,
            });
        }

        let store = StoreDocument::load(&save_dir);
        let mut catalog = Self {
            save_dir,
            store,
            worlds: BTreeMap::new(),
        };
        catalog.scan_worlds()?;
        Ok(catalog)
    }

    /// Rebuilds the descriptor cache from disk and returns the valid
    /// worlds sorted case-insensitively by display name. Repeat calls
    /// fully replace the previous cache.
    pub fn scan_worlds(&mut self) -> Result<Vec<WorldListing>, CatalogError> {
        let file_names = list_file_names(&self.save_dir)?;
        self.worlds.clear();

        let mut seen = HashSet::<String>::new();
        let mut listings = Vec::new();
        for name in &file_names {
            let Some(prefix) = name.strip_suffix("-index") else {
                continue;
            };
            let id = prefix.split('-').next().unwrap_or(prefix);
            if id == RESERVED_ID || !seen.insert(id.to_string()) {
                continue;
            }

            let Some(index) = IndexDocument::load(&self.save_dir.join(name)) else {
                continue;
            };

            let (store_name, created_at, last_played) = match self.store.entry(id) {
                Some(entry) => (entry.name.clone(), entry.created_at, entry.last_played),
                None => (String::new(), 0, 0),
            };

            let descriptor = WorldDescriptor {
                id: id.to_string(),
                name: store_name,
                created_at,
                last_played,
                index,
                files: world_files(&self.save_dir, &file_names, id),
            };
            if descriptor.is_valid() {
                listings.push(WorldListing {
                    display_name: descriptor.display_name(),
                    id: descriptor.id.clone(),
                });
                self.worlds.insert(descriptor.id.clone(), descriptor);
            }
        }

        listings.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        });
        info!(
            save_dir = %self.save_dir.display(),
            world_count = listings.len(),
            "catalog_scan_complete"
        );
        Ok(listings)
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn world(&self, id: &str) -> Option<&WorldDescriptor> {
        self.worlds.get(id)
    }

    pub fn worlds(&self) -> impl Iterator<Item = &WorldDescriptor> {
        self.worlds.values()
    }
}

fn list_file_names(save_dir: &Path) -> Result<Vec<String>, CatalogError> {
    let entries = fs::read_dir(save_dir).map_err(|source| CatalogError::ReadDir {
        path: save_dir.to_path_buf(),
        source,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CatalogError::ReadDirEntry {
            path: save_dir.to_path_buf(),
            source,
        })?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn world_files(save_dir: &Path, file_names: &[String], id: &str) -> Vec<PathBuf> {
    let data_prefix = format!("{id}-");
    let info_prefix = format!("{id}_info-");
    file_names
        .iter()
        .filter(|name| name.starts_with(&data_prefix) || name.starts_with(&info_prefix))
        .map(|name| save_dir.join(name))
        .collect()
}
