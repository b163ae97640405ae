#![forbid(unsafe_code)]

//! Storage collaborators.
//!
//! The bundler never touches physical storage directly; it goes through a
//! [`BundleStore`]. Two implementations ship with the crate: an in-memory
//! map for tests and embedding, and a directory of JSON documents.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tempfile::NamedTempFile;

use crate::error::{BundleError, Result};
use crate::raw::RawBundle;
use crate::types::BundleId;

const EXTENSION: &str = "json";

/// Loads and saves raw bundles by id.
///
/// Implementations must be safe to share between threads; the loader and
/// the audit tooling call them concurrently.
pub trait BundleStore: Send + Sync {
    /// Loads the raw, unmigrated bundle stored under `id`.
    fn load_raw_bundle(&self, id: &BundleId) -> Result<RawBundle>;

    /// Stores `raw` under `id`, replacing any previous content.
    fn save_raw_bundle(&self, id: &BundleId, raw: &RawBundle) -> Result<()>;

    /// Lists every stored bundle id, sorted.
    fn list(&self) -> Result<Vec<BundleId>>;
}

/// Bundle store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bundles: RwLock<BTreeMap<BundleId, RawBundle>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a bundle, returning it if it existed.
    pub fn remove(&self, id: &BundleId) -> Option<RawBundle> {
        self.bundles.write().remove(id)
    }
}

impl BundleStore for MemoryStore {
    fn load_raw_bundle(&self, id: &BundleId) -> Result<RawBundle> {
        self.bundles
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| BundleError::NotFound(format!("bundle {id}")))
    }

    fn save_raw_bundle(&self, id: &BundleId, raw: &RawBundle) -> Result<()> {
        self.bundles.write().insert(id.clone(), raw.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<BundleId>> {
        Ok(self.bundles.read().keys().cloned().collect())
    }
}

/// Bundle store keeping one `<id>.json` document per bundle in a directory.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so readers never observe a half-written bundle.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory holding the bundle documents.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document for `id`.
    pub fn path_for(&self, id: &BundleId) -> Result<PathBuf> {
        let name = id.as_str();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid {
            return Err(BundleError::InvalidArgument(format!(
                "bundle id {name:?} cannot be used as a file name"
            )));
        }
        Ok(self.root.join(format!("{name}.{EXTENSION}")))
    }
}

impl BundleStore for DirStore {
    fn load_raw_bundle(&self, id: &BundleId) -> Result<RawBundle> {
        let path = self.path_for(id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BundleError::NotFound(format!("bundle {id}")))
            }
            Err(err) => return Err(err.into()),
        };
        RawBundle::from_json_slice(&bytes)
    }

    fn save_raw_bundle(&self, id: &BundleId, raw: &RawBundle) -> Result<()> {
        let path = self.path_for(id)?;
        let json = raw.to_json_pretty()?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|err| BundleError::Io(err.error))?;
        tracing::debug!(bundle = %id, path = %path.display(), bytes = json.len(), "store.save");
        Ok(())
    }

    fn list(&self) -> Result<Vec<BundleId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(BundleId::new(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }
}
