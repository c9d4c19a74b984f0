//! Scriptable collaborators for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use crate::config::Settings;
use crate::error::{CatalogError, Result};
use crate::plugins::{Provider, ProviderRegistry};
use crate::storage::Storage;
use crate::tracker::{Tracker, TrackerEntry, TrackerUpdate};
use crate::types::{Item, MediaKind, SubItem};
use crate::Shelf;

/// A provider whose listing and search results are set by the test.
pub struct MockProvider {
    id: String,
    kind: MediaKind,
    reports_deletions: bool,
    url_host: Option<String>,
    items: Vec<Item>,
    listing: Mutex<Vec<SubItem>>,
    failing: AtomicBool,
    fail_after: Mutex<Option<usize>>,
    corrupt: AtomicBool,
}

impl MockProvider {
    pub fn new(id: &str, kind: MediaKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            reports_deletions: true,
            url_host: None,
            items: Vec::new(),
            listing: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            fail_after: Mutex::new(None),
            corrupt: AtomicBool::new(false),
        }
    }

    pub fn with_listing(self, entries: &[(&str, f64)]) -> Self {
        self.set_listing(entries);
        self
    }

    pub fn with_items(mut self, items: Vec<Item>) -> Self {
        self.items = items;
        self
    }

    pub fn with_url_host(mut self, host: &str) -> Self {
        self.url_host = Some(host.to_string());
        self
    }

    pub fn without_deletions(mut self) -> Self {
        self.reports_deletions = false;
        self
    }

    pub fn set_listing(&self, entries: &[(&str, f64)]) {
        *self.listing.lock().unwrap() = entries.iter().map(|(id, n)| SubItem::new(*id, *n, format!("#{n}"))).collect();
    }

    pub fn set_premium(&self, id: &str, premium: bool) {
        for sub in self.listing.lock().unwrap().iter_mut().filter(|s| s.id == id) {
            sub.premium = premium;
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Write only the first `n` listing entries, then fail.
    pub fn set_fail_after(&self, n: Option<usize>) {
        *self.fail_after.lock().unwrap() = n;
    }

    /// Store one sub-item under a key that differs from its id.
    pub fn set_corrupt(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CatalogError::fetch(&self.id, "scripted failure"));
        }
        Ok(())
    }
}

impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn media_kind(&self) -> MediaKind {
        self.kind
    }

    fn reports_deletions(&self) -> bool {
        self.reports_deletions
    }

    fn list_items(&self, limit: Option<usize>) -> Result<Vec<Item>> {
        self.check()?;
        Ok(self.items.iter().take(limit.unwrap_or(usize::MAX)).cloned().collect())
    }

    fn search(&self, term: &str, limit: Option<usize>) -> Result<Vec<Item>> {
        self.check()?;
        let needle = term.to_lowercase();
        Ok(self
            .items
            .iter()
            .filter(|item| item.name.to_lowercase().contains(&needle))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn populate_subitems(&self, item: &mut Item) -> Result<()> {
        self.check()?;
        let listing = self.listing.lock().unwrap().clone();
        let fail_after = *self.fail_after.lock().unwrap();
        for (i, sub) in listing.into_iter().enumerate() {
            if fail_after == Some(i) {
                return Err(CatalogError::fetch(&self.id, "connection dropped"));
            }
            item.upsert_subitem(sub.id, sub.number, sub.title).premium = sub.premium;
        }
        if self.corrupt.load(Ordering::SeqCst) {
            item.subitems.insert("bogus-key".to_string(), SubItem::new("other-id", 99.0, ""));
        }
        Ok(())
    }

    fn can_handle_url(&self, url: &Url) -> bool {
        self.url_host.as_deref().is_some_and(|h| url.host_str() == Some(h))
    }

    fn item_from_url(&self, url: &Url) -> Result<Option<Item>> {
        let id = url.path_segments().and_then(|s| s.last()).unwrap_or_default();
        Ok(Some(Item::new(self.id.clone(), id, id, self.kind)))
    }
}

/// A tracker serving a fixed list and recording every push.
pub struct MockTracker {
    id: String,
    entries: Vec<TrackerEntry>,
    pushed: Mutex<Vec<Vec<TrackerUpdate>>>,
    failing: AtomicBool,
}

impl MockTracker {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), entries: Vec::new(), pushed: Mutex::new(Vec::new()), failing: AtomicBool::new(false) }
    }

    pub fn with_entries(mut self, entries: Vec<TrackerEntry>) -> Self {
        self.entries = entries;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn pushed(&self) -> Vec<Vec<TrackerUpdate>> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tracker for MockTracker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_list(&self, _user: Option<&str>) -> Result<Vec<TrackerEntry>> {
        Ok(self.entries.clone())
    }

    async fn push_updates(&self, updates: &[TrackerUpdate]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CatalogError::fetch(&self.id, "tracker unavailable"));
        }
        self.pushed.lock().unwrap().push(updates.to_vec());
        Ok(())
    }
}

/// In-memory storage backend that counts writes.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn writes(&self) -> Arc<AtomicUsize> {
        self.writes.clone()
    }

    pub fn seed(&self, path: &Path, contents: &str) {
        self.files.lock().unwrap().insert(path.to_path_buf(), contents.to_string());
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &Path) -> std::io::Result<Option<String>> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    fn write(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.files.lock().unwrap().insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }
}

/// A shelf over a fresh temp directory with `providers` registered.
pub fn shelf_with(providers: Vec<Arc<MockProvider>>) -> (tempfile::TempDir, Shelf) {
    let tmp = tempfile::tempdir().unwrap();
    let mut registry = ProviderRegistry::new();
    for p in providers {
        registry.register(p).unwrap();
    }
    let mut settings = Settings::with_data_dir(tmp.path());
    settings.threads = 4;
    let shelf = Shelf::open(settings, registry).unwrap();
    (tmp, shelf)
}
