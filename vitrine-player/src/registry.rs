//! Collection registry
//!
//! A collection is a directory directly under the media root. Its playlist is
//! the sorted list of playable files it contains. Every call reads the
//! filesystem again; nothing is cached.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the pseudo-collection used when the media root has no sub-directories
pub const DEFAULT_COLLECTION: &str = "default";

/// A selectable collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub path: PathBuf,
}

/// Enumerates collections and their playlists
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    root: PathBuf,
    extensions: Vec<String>,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

impl CollectionRegistry {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Pick the first candidate root that exists and has something to play
    ///
    /// Falls back to the first existing candidate, then to the first candidate
    /// at all, so the service still starts on an empty kiosk.
    pub fn discover(candidates: &[PathBuf], extensions: &[String]) -> Result<Self> {
        let first = candidates
            .first()
            .ok_or_else(|| Error::Config("no media roots configured".to_string()))?;

        let mut fallback: Option<&PathBuf> = None;
        for candidate in candidates {
            if !candidate.is_dir() {
                debug!("Media root candidate {} not present", candidate.display());
                continue;
            }
            let registry = Self::new(candidate.clone(), extensions);
            if !registry.list_collections().is_empty() {
                info!("Using media root {}", candidate.display());
                return Ok(registry);
            }
            fallback.get_or_insert(candidate);
        }

        let root = fallback.unwrap_or(first);
        warn!(
            "No collections found in any media root, using {}",
            root.display()
        );
        Ok(Self::new(root.clone(), extensions))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` has an allowed media extension
    pub fn is_playable(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }

    /// Collections under the root, sorted by name
    ///
    /// When the root has no sub-directories but holds playable files itself,
    /// it is offered as the single collection `default`.
    pub fn list_collections(&self) -> Vec<CollectionInfo> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read media root {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };

        let mut collections: Vec<CollectionInfo> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                (!is_hidden(&name)).then(|| CollectionInfo {
                    name,
                    path: entry.path(),
                })
            })
            .collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));

        if collections.is_empty() && !self.list_files(&self.root).is_empty() {
            collections.push(CollectionInfo {
                name: DEFAULT_COLLECTION.to_string(),
                path: self.root.clone(),
            });
        }
        collections
    }

    /// Playable regular files directly inside `collection`, sorted by path
    pub fn list_files(&self, collection: &Path) -> Vec<PathBuf> {
        let entries = match fs::read_dir(collection) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read collection {}: {}", collection.display(), e);
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|entry| !is_hidden(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .filter(|path| self.is_playable(path))
            .collect();
        files.sort();
        files
    }

    /// Validate a requested collection name
    pub fn resolve(&self, name: &str) -> Result<CollectionInfo> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config("No collection specified".to_string()));
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(Error::Config(format!("Invalid collection name: {}", name)));
        }

        self.list_collections()
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::Config(format!("Collection not found: {}", name)))
    }
}
