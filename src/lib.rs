pub mod catalog;
pub mod config;
pub mod error;
pub mod mapping;
pub mod migrate;
pub mod plugins;
pub mod reconcile;
pub mod runner;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// --- Library API for embedding ---

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::catalog::Catalog;
    pub use crate::config::Settings;
    pub use crate::error::{CatalogError, Result};
    pub use crate::migrate::{MigrateOptions, MigrationReport};
    pub use crate::plugins::{Provider, ProviderCapabilities, ProviderRegistry};
    pub use crate::reconcile::UpdateReport;
    pub use crate::tracker::{PullOptions, PullReport, PushOptions, Tracker, TrackerEntry, TrackerUpdate};
    pub use crate::types::{BundleEntry, Item, MediaKind, SubItem, TrackerLink};
    pub use crate::{ItemSummary, SearchOptions, Shelf};
}

use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::error::{CatalogError, Result};
use crate::plugins::ProviderRegistry;
use crate::runner::Runner;
use crate::session::Session;
use crate::storage::{Bundles, Store, WriteOutcome};
use crate::types::{BundleEntry, Item, MediaKind, SubItem};

/// Filters for searching providers.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Search only this provider.
    pub provider_id: Option<String>,
    pub media_kind: Option<MediaKind>,
    /// Keep only results whose name equals the term.
    pub exact: bool,
    pub exclude: Vec<String>,
    pub limit: Option<usize>,
    /// Keep only results with this provider item id.
    pub media_id: Option<String>,
    /// Order results by similarity to this item, most similar first.
    pub rank_like: Option<Item>,
    pub raise_on_error: bool,
}

impl SearchOptions {
    /// Apply the result filters and ranking to `results` of a search for `term`.
    pub fn refine(&self, term: &str, mut results: Vec<Item>) -> Vec<Item> {
        if self.exact {
            results.retain(|item| item.name == term);
        }
        if let Some(id) = &self.media_id {
            results.retain(|item| &item.id == id);
        }
        if let Some(reference) = &self.rank_like {
            results.sort_by_key(|item| std::cmp::Reverse(reference.similarity(item)));
        }
        results
    }
}

/// One line of the catalog listing.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub global_id: String,
    pub name: String,
    pub season_title: String,
    pub media_kind: MediaKind,
    pub last_read: f64,
    pub last_number: f64,
}

/// A user's catalog: items, persistence, providers, and the shared HTTP session.
///
/// All catalog mutation happens on the caller's task; provider calls fan out
/// through the [`Runner`] and their results are merged back here.
pub struct Shelf {
    settings: Settings,
    registry: ProviderRegistry,
    session: Session,
    store: Store,
    catalog: Catalog,
    bundles: Bundles,
    runner: Runner,
}

impl Shelf {
    /// Load state from the data directory described by `settings`.
    pub fn open(settings: Settings, registry: ProviderRegistry) -> Result<Self> {
        let store = Store::new(&settings);
        Self::open_with_store(settings, registry, store)
    }

    pub fn open_with_store(settings: Settings, registry: ProviderRegistry, mut store: Store) -> Result<Self> {
        let mut session = Session::new(&settings)?;
        if !settings.no_load_session {
            let path = store.paths().cookies.clone();
            if let Some(text) = store.read_text(&path)? {
                session.load_cookies(&text);
                store.remember(&path, &session.cookie_text());
            }
        }
        let bundles = store.load_bundles()?;
        let mut catalog = store.load_catalog()?;
        if catalog.active().is_empty() && catalog.disabled().is_empty() {
            catalog.stamp_version();
        }
        let activated = catalog.configure(&registry.ids());
        if !activated.is_empty() {
            info!(count = activated.len(), "re-enabled items whose provider is available again");
        }
        for item in catalog.active_mut().values_mut() {
            store.load_subitems(item)?;
        }
        let runner = Runner::new(settings.threads);
        debug!(active = catalog.active().len(), disabled = catalog.disabled().len(), "catalog loaded");
        Ok(Self { settings, registry, session, store, catalog, bundles, runner })
    }

    /// Persist everything that changed since the last load or save. Returns the number of files written.
    pub fn save(&mut self) -> Result<usize> {
        let mut written = 0;
        if !self.settings.no_save_session {
            let path = self.store.paths().cookies.clone();
            if self.store.write_text(&path, &self.session.cookie_text())? == WriteOutcome::Written {
                written += 1;
            }
        }
        if self.store.save_bundles(&self.bundles)? == WriteOutcome::Written {
            written += 1;
        }
        written += self.store.save_catalog(&self.catalog)?;
        Ok(written)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn bundles(&self) -> &Bundles {
        &self.bundles
    }

    pub fn runner(&self) -> Runner {
        self.runner
    }

    pub fn item(&self, global_id: &str) -> Option<&Item> {
        self.catalog.get(global_id)
    }

    pub fn item_mut(&mut self, global_id: &str) -> Option<&mut Item> {
        self.catalog.get_mut(global_id)
    }

    /// Global ids of active items whose provider id, name, or global id equals `name`.
    pub fn select(&self, name: Option<&str>, kind: Option<MediaKind>) -> Vec<String> {
        self.catalog.select(name, kind)
    }

    /// Global id of the first active item matching `name`.
    pub fn single(&self, name: &str, kind: Option<MediaKind>) -> Result<String> {
        self.catalog
            .select(Some(name), kind)
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::not_found(format!("media {name}")))
    }

    pub fn list(&self, kind: Option<MediaKind>) -> Vec<ItemSummary> {
        self.catalog
            .select(None, kind)
            .iter()
            .filter_map(|gid| self.catalog.get(gid))
            .map(|item| ItemSummary {
                global_id: item.global_id(),
                name: item.name.clone(),
                season_title: item.season_title.clone(),
                media_kind: item.media_kind,
                last_read: item.last_read_number(),
                last_number: item.last_subitem_number(),
            })
            .collect()
    }

    // --- adding and removing ---

    /// Track a new item and, unless `no_update`, fetch its sub-items.
    pub async fn add_item(&mut self, item: Item, no_update: bool) -> Result<Vec<SubItem>> {
        self.registry.require(&item.provider_id)?;
        let gid = item.global_id();
        self.catalog.insert(item)?;
        info!(global_id = %gid, "added media");
        if no_update {
            return Ok(Vec::new());
        }
        self.update_item(&gid, false).await
    }

    pub fn remove_item(&mut self, name: &str) -> Result<Item> {
        let gid = self.single(name, None)?;
        let item = self.catalog.remove(&gid).ok_or_else(|| CatalogError::not_found(gid.clone()))?;
        info!(global_id = %gid, "removed media");
        Ok(item)
    }

    /// Search providers for `term`, fanning out one task per provider.
    pub async fn search(&self, term: &str, opts: &SearchOptions) -> Result<Vec<Item>> {
        let providers = match &opts.provider_id {
            Some(id) => vec![self.registry.require(id)?],
            None => self.registry.candidates(opts.media_kind, &opts.exclude),
        };
        let limit = opts.limit.or(self.settings.search_limit);
        let tasks: Vec<_> = providers
            .into_iter()
            .map(|p| {
                let term = term.to_string();
                move || p.search(&term, limit)
            })
            .collect();
        let results: Vec<Item> = self.runner.run(tasks, opts.raise_on_error).await?.into_iter().flatten().collect();
        Ok(opts.refine(term, results))
    }

    /// Browse what providers currently offer, one task per provider. Failing providers are skipped.
    pub async fn list_from_providers(&self, kind: Option<MediaKind>, provider_id: Option<&str>, limit: Option<usize>) -> Result<Vec<Item>> {
        let providers = match provider_id {
            Some(id) => vec![self.registry.require(id)?],
            None => self.registry.candidates(kind, &[]),
        };
        let limit = limit.or(self.settings.search_limit);
        let tasks: Vec<_> = providers.into_iter().map(|p| move || p.list_items(limit)).collect();
        Ok(self.runner.run(tasks, false).await?.into_iter().flatten().collect())
    }

    /// Search and add the best result. Returns its global id, or `None` when nothing matched.
    pub async fn search_add(&mut self, term: &str, opts: &SearchOptions) -> Result<Option<String>> {
        let Some(item) = self.search(term, opts).await?.into_iter().next() else {
            debug!(term, "no search results");
            return Ok(None);
        };
        let gid = item.global_id();
        self.add_item(item, false).await?;
        Ok(Some(gid))
    }

    /// Add the item a provider resolves `url` to.
    pub async fn add_from_url(&mut self, url: &str) -> Result<String> {
        let url = Url::parse(url).map_err(|e| CatalogError::not_found(format!("invalid url {url}: {e}")))?;
        let provider = self
            .registry
            .for_url(&url)
            .ok_or_else(|| CatalogError::not_found(format!("provider for {url}")))?;
        let resolved = tokio::task::spawn_blocking(move || provider.item_from_url(&url))
            .await
            .map_err(|e| CatalogError::Worker(e.to_string()))??;
        let item = resolved.ok_or_else(|| CatalogError::not_found("media at url"))?;
        let gid = item.global_id();
        self.add_item(item, false).await?;
        Ok(gid)
    }

    // --- reading state ---

    /// Unread sub-items in number order per item. Only sub-items past the last
    /// read one count unless `any_unread`. Specials do not count toward `limit`.
    pub fn unreads(&self, kind: Option<MediaKind>, name: Option<&str>, limit: Option<usize>, any_unread: bool) -> Vec<(String, SubItem)> {
        let mut out = Vec::new();
        let mut count = 0;
        for gid in self.catalog.select(name, kind) {
            let Some(item) = self.catalog.get(&gid) else { continue };
            let last_read = item.last_read_number();
            for sub in item.sorted_subitems() {
                if !sub.read && (any_unread || sub.number > last_read) {
                    out.push((gid.clone(), sub.clone()));
                    if !sub.special {
                        count += 1;
                    }
                    if limit.is_some_and(|l| count == l) {
                        return out;
                    }
                }
            }
        }
        out
    }

    /// Mark sub-items read up to the last sub-item plus `n`, or up to `n` itself when `absolute`.
    /// Without `force`, read progress never moves backwards.
    pub fn mark_read(&mut self, name: Option<&str>, kind: Option<MediaKind>, n: f64, force: bool, absolute: bool) -> usize {
        let gids = self.catalog.select(name, kind);
        for gid in &gids {
            let Some(item) = self.catalog.get_mut(gid) else { continue };
            let mut target = if absolute { n } else { item.last_subitem_number() + n };
            if !force {
                target = target.max(item.last_read_number());
            }
            item.mark_read_until(target, force);
        }
        gids.len()
    }

    pub fn mark_until(&mut self, global_id: &str, n: f64, force: bool) -> Result<()> {
        let item = self.catalog.get_mut(global_id).ok_or_else(|| CatalogError::not_found(global_id))?;
        item.mark_read_until(n, force);
        Ok(())
    }

    /// Change the numbering offset, shifting existing sub-item numbers by the difference.
    pub fn set_offset(&mut self, name: &str, offset: f64) -> usize {
        let gids = self.catalog.select(Some(name), None);
        for gid in &gids {
            let Some(item) = self.catalog.get_mut(gid) else { continue };
            let diff = offset - item.offset;
            for sub in item.subitems.values_mut() {
                sub.number -= diff;
            }
            item.offset = offset;
        }
        gids.len()
    }

    // --- bundles ---

    pub fn record_bundle(&mut self, name: impl Into<String>, entries: Vec<BundleEntry>) {
        self.bundles.insert(name.into(), entries);
    }

    /// Mark every sub-item referenced by bundle `name` read. Returns how many were found.
    pub fn mark_bundle_read(&mut self, name: &str) -> Result<usize> {
        let entries = self.bundles.get(name).ok_or_else(|| CatalogError::not_found(format!("bundle {name}")))?;
        let mut marked = 0;
        for entry in entries {
            if let Some(sub) = self.catalog.get_mut(&entry.media_id).and_then(|i| i.subitems.get_mut(&entry.chapter_id)) {
                sub.read = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// The item of a bundle's first entry.
    pub fn bundle_lead_item(&self, name: &str) -> Option<&Item> {
        self.bundles.get(name)?.first().and_then(|e| self.catalog.get(&e.media_id))
    }
}
