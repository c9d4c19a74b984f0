pub mod config;
pub mod local;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;
use crate::error::{CatalogError, Result};
use crate::types::{Item, MediaKind, SubItem};

use self::local::LocalProvider;

/// A source of items and their sub-items.
///
/// Calls block on IO and are made from runner worker threads. Implementations
/// own their timeout and retry policy (see [`crate::session::Session`]).
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn media_kind(&self) -> MediaKind;

    /// When false, every update of this provider's items runs in replace mode.
    fn reports_deletions(&self) -> bool {
        true
    }

    fn is_paywalled(&self, sub: &SubItem) -> bool {
        sub.premium
    }

    fn list_items(&self, limit: Option<usize>) -> Result<Vec<Item>>;

    fn search(&self, term: &str, limit: Option<usize>) -> Result<Vec<Item>>;

    /// Write the provider's current listing into `item.subitems`, normally via
    /// [`Item::upsert_subitem`].
    fn populate_subitems(&self, item: &mut Item) -> Result<()>;

    fn can_handle_url(&self, _url: &Url) -> bool {
        false
    }

    fn item_from_url(&self, _url: &Url) -> Result<Option<Item>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderCapabilities {
    pub media_kind: MediaKind,
    pub reports_deletions: bool,
}

/// Providers available to this process, keyed by id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<()> {
        let id = provider.id().to_string();
        if self.providers.contains_key(&id) {
            return Err(CatalogError::Config(format!("duplicate provider id `{id}`")));
        }
        debug!(provider = %id, "registered provider");
        self.providers.insert(id, provider);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    /// Like [`get`](Self::get) but a missing provider is an error.
    pub fn require(&self, id: &str) -> Result<Arc<dyn Provider>> {
        self.get(id).ok_or_else(|| CatalogError::not_found(format!("provider {id}")))
    }

    pub fn ids(&self) -> BTreeSet<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn capabilities(&self) -> Vec<(String, ProviderCapabilities)> {
        self.providers
            .iter()
            .map(|(id, p)| (id.clone(), ProviderCapabilities { media_kind: p.media_kind(), reports_deletions: p.reports_deletions() }))
            .collect()
    }

    /// Providers serving `kind` (any kind when `None`) that are not in `exclude`.
    pub fn candidates(&self, kind: Option<MediaKind>, exclude: &[String]) -> Vec<Arc<dyn Provider>> {
        self.providers
            .values()
            .filter(|p| !exclude.iter().any(|e| e == p.id()))
            .filter(|p| kind.map_or(true, |k| p.media_kind() == k))
            .cloned()
            .collect()
    }

    pub fn for_url(&self, url: &Url) -> Option<Arc<dyn Provider>> {
        self.providers.values().find(|p| p.can_handle_url(url)).cloned()
    }
}

/// Search `providers` one after another on the calling thread.
///
/// A failing provider is logged and skipped; an error is returned only when
/// every provider failed.
pub fn search_all(providers: &[Arc<dyn Provider>], term: &str, limit: Option<usize>) -> Result<Vec<Item>> {
    let mut results = Vec::new();
    let mut failures = 0;
    let mut last_err = None;
    for provider in providers {
        match provider.search(term, limit) {
            Ok(found) => results.extend(found),
            Err(e) => {
                warn!(provider = %provider.id(), term, error = %e, "search failed");
                failures += 1;
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) if failures == providers.len() => Err(e),
        _ => Ok(results),
    }
}

/// Registry of the built-in providers that are enabled in `settings`.
pub fn build_registry(settings: &Settings) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for kind in [MediaKind::Anime, MediaKind::Manga, MediaKind::Novel] {
        let id = local::local_provider_id(kind);
        if !settings.provider(id).enabled {
            info!(provider = %id, "provider disabled by configuration");
            continue;
        }
        registry.register(Arc::new(LocalProvider::new(id, kind, settings.media_dir(id))))?;
    }
    Ok(registry)
}
