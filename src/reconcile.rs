//! Merging a provider's fresh listing into an item's sub-items.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::error::{CatalogError, Result};
use crate::plugins::Provider;
use crate::types::{Item, MediaKind, SubItem};
use crate::Shelf;

/// Refresh `item` from `provider` and return the sub-items that are new, in number order.
///
/// In replace mode the old sub-items are cleared first so ids the provider no
/// longer lists disappear; `read` flags of surviving ids are carried over. If
/// the provider fails, the item is left exactly as it was.
///
/// With `free_only`, paywalled sub-items are invisible to the diff, so one that
/// becomes free later is reported as new then.
pub fn reconcile(item: &mut Item, provider: &dyn Provider, replace: bool, free_only: bool) -> Result<Vec<SubItem>> {
    let visible = |item: &Item| -> BTreeSet<String> {
        item.subitems
            .iter()
            .filter(|(_, sub)| !free_only || !provider.is_paywalled(sub))
            .map(|(id, _)| id.clone())
            .collect()
    };

    let known = visible(&*item);
    let snapshot = replace.then(|| std::mem::take(&mut item.subitems));

    if let Err(e) = provider.populate_subitems(item) {
        if let Some(old) = snapshot {
            item.subitems = old;
        }
        return Err(e);
    }

    let new_ids: BTreeSet<String> = visible(&*item).difference(&known).cloned().collect();

    if let Some(old) = snapshot {
        for (id, prev) in old {
            if let Some(sub) = item.subitems.get_mut(&id) {
                sub.read = prev.read;
            }
        }
    }

    let mut fresh: Vec<SubItem> = new_ids
        .iter()
        .filter_map(|id| item.subitems.get(id))
        .filter(|sub| new_ids.contains(&sub.id))
        .cloned()
        .collect();
    if fresh.len() != new_ids.len() {
        return Err(CatalogError::inconsistent(
            provider.id(),
            format!("{} new ids but {} matching sub-items for {}", new_ids.len(), fresh.len(), item.global_id()),
        ));
    }
    fresh.sort_by(|a, b| a.number.total_cmp(&b.number));
    Ok(fresh)
}

/// Outcome of a batch update.
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Updated items with their new sub-items, in batch order.
    pub updated: Vec<(String, Vec<SubItem>)>,
    pub failed: Vec<(String, CatalogError)>,
}

impl UpdateReport {
    pub fn new_count(&self) -> usize {
        self.updated.iter().map(|(_, new)| new.len()).sum()
    }
}

impl Shelf {
    /// Update one item, failing loudly.
    pub async fn update_item(&mut self, global_id: &str, replace: bool) -> Result<Vec<SubItem>> {
        let mut report = self.update_many(&[global_id.to_string()], replace, true).await?;
        if report.updated.is_empty() {
            return Err(CatalogError::not_found(global_id));
        }
        Ok(report.updated.swap_remove(0).1)
    }

    /// Update every selected item concurrently.
    ///
    /// With `ignore_errors`, per-item failures are collected in the report;
    /// otherwise the first one is returned once the batch has drained. Data
    /// consistency and missing field errors always propagate.
    pub async fn update(&mut self, name: Option<&str>, kind: Option<MediaKind>, replace: bool, ignore_errors: bool) -> Result<UpdateReport> {
        let gids = self.catalog().select(name, kind);
        let report = self.update_many(&gids, replace, !ignore_errors).await?;
        info!(items = report.updated.len(), new = report.new_count(), failed = report.failed.len(), "update finished");
        Ok(report)
    }

    /// Reconcile clones of the items on the runner, then write the results back
    /// here. Failed items are not touched.
    pub(crate) async fn update_many(&mut self, gids: &[String], replace: bool, raise_on_error: bool) -> Result<UpdateReport> {
        let free_only = self.settings().free_only;
        let mut order = Vec::new();
        let mut tasks = Vec::new();
        for gid in gids {
            let Some(item) = self.item(gid) else { continue };
            let provider = self.registry().require(&item.provider_id)?;
            let replace = replace || !provider.reports_deletions();
            let mut item = item.clone();
            order.push(gid.clone());
            tasks.push(move || -> Result<(Item, Vec<SubItem>)> {
                let new = reconcile(&mut item, provider.as_ref(), replace, free_only)?;
                Ok((item, new))
            });
        }

        let results = self.runner().run_all(tasks).await;
        let mut report = UpdateReport::default();
        let mut first_err = None;
        for (gid, res) in order.into_iter().zip(results) {
            match res {
                Ok((item, new)) => {
                    if !new.is_empty() {
                        debug!(global_id = %gid, count = new.len(), "new sub-items");
                    }
                    self.catalog_mut().replace(item);
                    report.updated.push((gid, new));
                }
                Err(e) if (raise_on_error || e.is_fatal()) && first_err.is_none() => {
                    warn!(global_id = %gid, error = %e, "update failed");
                    first_err = Some(e);
                }
                Err(e) => {
                    warn!(global_id = %gid, error = %e, "update failed");
                    report.failed.push((gid, e));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{shelf_with, MockProvider};
    use std::sync::Arc;

    fn item_with(subs: &[(&str, f64, bool)]) -> Item {
        let mut item = Item::new("m", "x", "X", MediaKind::Manga);
        for (id, n, read) in subs {
            item.upsert_subitem(*id, *n, "").read = *read;
        }
        item
    }

    fn ids(subs: &[SubItem]) -> Vec<&str> {
        subs.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn merge_mode_reports_only_new_ids() {
        let p = MockProvider::new("m", MediaKind::Manga).with_listing(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let mut item = item_with(&[("a", 1.0, true), ("b", 2.0, false)]);
        let new = reconcile(&mut item, &p, false, false).unwrap();
        assert_eq!(ids(&new), vec!["c"]);
        assert!(item.subitems["a"].read);
        assert!(!item.subitems["c"].read);
    }

    #[test]
    fn merge_mode_keeps_entries_missing_from_listing() {
        let p = MockProvider::new("m", MediaKind::Manga).with_listing(&[("a", 1.0)]);
        let mut item = item_with(&[("a", 1.0, true), ("old", 0.5, true)]);
        assert!(reconcile(&mut item, &p, false, false).unwrap().is_empty());
        assert!(item.subitems.contains_key("old"));
    }

    #[test]
    fn replace_mode_drops_missing_and_keeps_read_flags() {
        let p = MockProvider::new("m", MediaKind::Manga).with_listing(&[("b", 2.0), ("c", 3.0)]);
        let mut item = item_with(&[("a", 1.0, true), ("b", 2.0, true)]);
        let new = reconcile(&mut item, &p, true, false).unwrap();
        assert_eq!(ids(&new), vec!["c"]);
        assert!(!item.subitems.contains_key("a"));
        assert!(item.subitems["b"].read);
    }

    #[test]
    fn failed_populate_leaves_item_untouched() {
        let p = MockProvider::new("m", MediaKind::Manga).with_listing(&[("b", 2.0), ("c", 3.0)]);
        p.set_fail_after(Some(1));
        let before = item_with(&[("a", 1.0, true), ("b", 2.0, false)]);

        let mut item = before.clone();
        assert!(matches!(reconcile(&mut item, &p, true, false), Err(CatalogError::Fetch { .. })));
        assert_eq!(item, before);
    }

    #[test]
    fn paywalled_subitems_are_new_once_free() {
        let p = MockProvider::new("m", MediaKind::Manga).with_listing(&[("a", 1.0), ("b", 2.0)]);
        p.set_premium("b", true);
        let mut item = item_with(&[]);
        assert_eq!(ids(&reconcile(&mut item, &p, false, true).unwrap()), vec!["a"]);

        p.set_premium("b", false);
        assert_eq!(ids(&reconcile(&mut item, &p, false, true).unwrap()), vec!["b"]);
    }

    #[test]
    fn results_are_sorted_and_offset_applied() {
        let p = MockProvider::new("m", MediaKind::Manga).with_listing(&[("z", 11.0), ("y", 12.0), ("x", 10.5)]);
        let mut item = item_with(&[]);
        item.offset = 10.0;
        let numbers: Vec<f64> = reconcile(&mut item, &p, false, false).unwrap().iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn mismatched_keys_are_a_consistency_error() {
        let p = MockProvider::new("m", MediaKind::Manga).with_listing(&[("a", 1.0)]);
        p.set_corrupt(true);
        let mut item = item_with(&[]);
        let err = reconcile(&mut item, &p, false, false).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn batch_update_isolates_failures() {
        let good = Arc::new(MockProvider::new("good", MediaKind::Manga).with_listing(&[("1", 1.0)]));
        let bad = Arc::new(MockProvider::new("bad", MediaKind::Manga).with_listing(&[("1", 1.0)]));
        let (_tmp, mut shelf) = shelf_with(vec![good.clone(), bad.clone()]);
        shelf.add_item(Item::new("good", "g", "G", MediaKind::Manga), true).await.unwrap();
        shelf.add_item(Item::new("bad", "b", "B", MediaKind::Manga), true).await.unwrap();
        bad.set_failing(true);

        let report = shelf.update(None, None, false, true).await.unwrap();
        assert_eq!(report.updated.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.new_count(), 1);
        assert!(shelf.item("bad:b").unwrap().subitems.is_empty());

        assert!(shelf.update(None, None, false, false).await.is_err());
        assert!(shelf.update_item("bad:b", false).await.is_err());
    }

    #[tokio::test]
    async fn update_preserves_user_fields() {
        let p = Arc::new(MockProvider::new("m", MediaKind::Manga).with_listing(&[("1", 1.0)]));
        let (_tmp, mut shelf) = shelf_with(vec![p.clone()]);
        shelf.add_item(Item::new("m", "x", "X", MediaKind::Manga), false).await.unwrap();
        shelf.track("m:x", "t", "42", None).unwrap();
        {
            let item = shelf.item_mut("m:x").unwrap();
            item.progress = 1.0;
            item.progress_volumes = Some(1.0);
        }
        let before = shelf.item("m:x").unwrap().clone();

        p.set_listing(&[("1", 1.0), ("2", 2.0)]);
        let new = shelf.update_item("m:x", false).await.unwrap();
        assert_eq!(ids(&new), vec!["2"]);
        let after = shelf.item("m:x").unwrap();
        assert_eq!(after.offset, before.offset);
        assert_eq!(after.progress, before.progress);
        assert_eq!(after.progress_volumes, before.progress_volumes);
        assert_eq!(after.trackers, before.trackers);
    }

    #[tokio::test]
    async fn providers_without_deletions_always_replace() {
        let p = Arc::new(MockProvider::new("m", MediaKind::Manga).with_listing(&[("1", 1.0), ("2", 2.0)]).without_deletions());
        let (_tmp, mut shelf) = shelf_with(vec![p.clone()]);
        shelf.add_item(Item::new("m", "x", "X", MediaKind::Manga), false).await.unwrap();
        p.set_listing(&[("2", 2.0)]);
        shelf.update(None, None, false, true).await.unwrap();
        assert_eq!(shelf.item("m:x").unwrap().subitems.len(), 1);
    }
}
