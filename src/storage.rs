//! Change-detecting persistence.
//!
//! Every destination file remembers the digest of the payload last read from
//! or written to it. Writing an identical payload again is skipped, so
//! [`Store::save_catalog`] can be called after every operation.

use std::collections::{BTreeMap, HashMap};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::error::Result;
use crate::mapping::subitem_file_for;
use crate::types::{BundleEntry, Item, SubItem};

pub type Bundles = BTreeMap<String, Vec<BundleEntry>>;

/// Raw file access at the storage boundary.
pub trait Storage: Send + Sync {
    /// `Ok(None)` when the file does not exist.
    fn read(&self, path: &Path) -> std::io::Result<Option<String>>;
    /// Must replace `path` atomically: readers see the old or the new payload, never a mix.
    fn write(&self, path: &Path, contents: &str) -> std::io::Result<()>;
}

/// Local file system, writing through a temp file in the target directory and renaming it in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileStorage;

impl Storage for FileStorage {
    fn read(&self, path: &Path) -> std::io::Result<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

/// Paths of every destination the store manages.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub metadata: PathBuf,
    pub bundles: PathBuf,
    pub cookies: PathBuf,
    pub subitems: PathBuf,
}

impl From<&Settings> for StorePaths {
    fn from(s: &Settings) -> Self {
        Self { metadata: s.metadata_file(), bundles: s.bundle_file(), cookies: s.cookie_file(), subitems: s.subitems_dir() }
    }
}

pub struct Store {
    backend: Box<dyn Storage>,
    paths: StorePaths,
    hashes: HashMap<PathBuf, Vec<u8>>,
}

fn digest(payload: &str) -> Vec<u8> {
    Sha256::digest(payload.as_bytes()).to_vec()
}

fn canonical<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

impl Store {
    pub fn new(settings: &Settings) -> Self {
        Self::with_backend(StorePaths::from(settings), Box::new(FileStorage))
    }

    pub fn with_backend(paths: StorePaths, backend: Box<dyn Storage>) -> Self {
        Self { backend, paths, hashes: HashMap::new() }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Read raw text and remember its digest. Missing files yield `None`.
    pub fn read_text(&mut self, path: &Path) -> Result<Option<String>> {
        let text = self.backend.read(path)?;
        if let Some(t) = &text {
            debug!(path = %path.display(), "loaded file");
            self.hashes.insert(path.to_path_buf(), digest(t));
        }
        Ok(text)
    }

    /// Treat `text` as the current contents of `path` for change detection.
    /// Used when a file is loaded into a form whose canonical text differs from the raw file.
    pub fn remember(&mut self, path: &Path, text: &str) {
        self.hashes.insert(path.to_path_buf(), digest(text));
    }

    /// Write `text` unless it matches what was last read from or written to `path`.
    pub fn write_text(&mut self, path: &Path, text: &str) -> Result<WriteOutcome> {
        let h = digest(text);
        if self.hashes.get(path) == Some(&h) {
            debug!(path = %path.display(), "unchanged; skipping write");
            return Ok(WriteOutcome::Unchanged);
        }
        self.backend.write(path, text)?;
        info!(path = %path.display(), "persisted state");
        self.hashes.insert(path.to_path_buf(), h);
        Ok(WriteOutcome::Written)
    }

    /// Deserialize a JSON document; a missing file yields `T::default()`.
    ///
    /// The digest is taken over the canonical re-serialization so that a load
    /// followed by a save is a no-op regardless of the file's formatting.
    pub fn read_json<T: DeserializeOwned + Serialize + Default>(&mut self, path: &Path) -> Result<T> {
        let Some(text) = self.backend.read(path)? else { return Ok(T::default()) };
        debug!(path = %path.display(), "loaded file");
        let value: T = serde_json::from_str(&text)?;
        self.hashes.insert(path.to_path_buf(), digest(&canonical(&value)?));
        Ok(value)
    }

    pub fn write_json<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<WriteOutcome> {
        let text = canonical(value)?;
        self.write_text(path, &text)
    }

    pub fn load_catalog(&mut self) -> Result<Catalog> {
        let path = self.paths.metadata.clone();
        let mut catalog: Catalog = self.read_json(&path)?;
        catalog.rekey();
        Ok(catalog)
    }

    /// Fill an item's sub-items from its sidecar file unless already present.
    pub fn load_subitems(&mut self, item: &mut Item) -> Result<()> {
        if !item.subitems.is_empty() {
            return Ok(());
        }
        let path = subitem_file_for(&self.paths.subitems, item);
        item.subitems = self.read_json::<BTreeMap<String, SubItem>>(&path)?;
        Ok(())
    }

    /// Write the catalog index and every active item's sub-items. Returns the number of files written.
    pub fn save_catalog(&mut self, catalog: &Catalog) -> Result<usize> {
        let mut written = 0;
        let path = self.paths.metadata.clone();
        if self.write_json(&path, catalog)? == WriteOutcome::Written {
            written += 1;
        }
        for item in catalog.active().values() {
            let path = subitem_file_for(&self.paths.subitems, item);
            if self.write_json(&path, &item.subitems)? == WriteOutcome::Written {
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn load_bundles(&mut self) -> Result<Bundles> {
        let path = self.paths.bundles.clone();
        self.read_json(&path)
    }

    pub fn save_bundles(&mut self, bundles: &Bundles) -> Result<WriteOutcome> {
        let path = self.paths.bundles.clone();
        self.write_json(&path, bundles)
    }
}
