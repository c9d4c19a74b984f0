use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{CatalogError, Result};
use crate::plugins::{search_all, Provider};
use crate::types::Item;
use crate::{SearchOptions, Shelf};

#[derive(Debug, Clone, Copy)]
pub struct MigrateOptions {
    /// Only accept replacements whose name equals the old name.
    pub exact: bool,
    /// Search other providers of the same media kind; otherwise search the item's own provider.
    pub move_to_new_provider: bool,
    /// Only accept replacements with the old provider item id.
    pub force_same_provider_id: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self { exact: false, move_to_new_provider: true, force_same_provider_id: false }
    }
}

impl MigrateOptions {
    /// Re-resolve every item against its own provider.
    pub fn self_migration() -> Self {
        Self { exact: false, move_to_new_provider: false, force_same_provider_id: true }
    }
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    /// `(old global id, new global id)` pairs.
    pub migrated: Vec<(String, String)>,
    /// Items removed without a replacement.
    pub removed: Vec<String>,
    /// New items whose first update failed; they stay in the catalog without sub-items.
    pub update_failed: Vec<String>,
}

/// Best replacement for `old` among `providers`.
fn find_replacement(old: &Item, providers: &[Arc<dyn Provider>], opts: MigrateOptions, limit: Option<usize>) -> Result<Option<Item>> {
    let ranked = opts.force_same_provider_id || !opts.move_to_new_provider;
    let filters = SearchOptions {
        exact: opts.exact,
        media_id: opts.force_same_provider_id.then(|| old.id.clone()),
        rank_like: ranked.then(|| old.clone()),
        ..Default::default()
    };
    let candidates = search_all(providers, &old.name, limit)?;
    Ok(filters.refine(&old.name, candidates).into_iter().next())
}

impl Shelf {
    /// Move the selected items to a replacement listing, keeping user fields and read position.
    ///
    /// Items are taken out of the catalog first. An item with no replacement is
    /// not put back: it is gone from the catalog once this returns.
    pub async fn migrate(&mut self, name: Option<&str>, opts: MigrateOptions) -> Result<MigrationReport> {
        let gids = self.catalog().select(name, None);
        if let (Some(name), true) = (name, gids.is_empty()) {
            return Err(CatalogError::not_found(format!("media {name}")));
        }
        let old_items: Vec<Item> = gids.iter().filter_map(|gid| self.catalog_mut().remove(gid)).collect();

        let limit = self.settings().search_limit;
        let tasks: Vec<_> = old_items
            .iter()
            .map(|old| {
                let providers = if opts.move_to_new_provider {
                    self.registry().candidates(Some(old.media_kind), std::slice::from_ref(&old.provider_id))
                } else {
                    self.registry().get(&old.provider_id).into_iter().collect()
                };
                let old = old.clone();
                move || find_replacement(&old, &providers, opts, limit)
            })
            .collect();
        let found = self.runner().run_all(tasks).await;

        let mut report = MigrationReport::default();
        let mut pending = Vec::new();
        for (old, res) in old_items.into_iter().zip(found) {
            let old_gid = old.global_id();
            let mut new = match res {
                Ok(Some(new)) => new,
                Ok(None) => {
                    warn!(global_id = %old_gid, name = %old.name, "no replacement found; removing");
                    report.removed.push(old_gid);
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(global_id = %old_gid, error = %e, "replacement search failed; removing");
                    report.removed.push(old_gid);
                    continue;
                }
            };
            old.copy_user_fields(&mut new)?;
            let new_gid = new.global_id();
            if let Err(e) = self.catalog_mut().insert(new) {
                warn!(global_id = %old_gid, error = %e, "replacement already tracked; removing");
                report.removed.push(old_gid);
                continue;
            }
            pending.push((old_gid, new_gid, old.last_read_number()));
        }

        let new_gids: Vec<String> = pending.iter().map(|(_, new, _)| new.clone()).collect();
        let updated = self.update_many(&new_gids, false, false).await?;
        report.update_failed = updated.failed.into_iter().map(|(gid, _)| gid).collect();

        for (old_gid, new_gid, last_read) in pending {
            if let Some(item) = self.item_mut(&new_gid) {
                item.mark_read_until(last_read, false);
            }
            info!(from = %old_gid, to = %new_gid, "migrated");
            report.migrated.push((old_gid, new_gid));
        }
        if !report.removed.is_empty() {
            warn!(removed = ?report.removed, "items removed during migration");
        }
        Ok(report)
    }

    /// Re-resolve every item under its current provider when the stored schema
    /// version is stale, or always with `force`. Returns `None` when nothing ran.
    pub async fn upgrade_state(&mut self, force: bool) -> Result<Option<MigrationReport>> {
        if !(force || self.catalog().is_out_of_date()) {
            return Ok(None);
        }
        info!(from = self.catalog().version(), "upgrading catalog state");
        let report = self.migrate(None, MigrateOptions::self_migration()).await?;
        self.catalog_mut().stamp_version();
        Ok(Some(report))
    }
}
