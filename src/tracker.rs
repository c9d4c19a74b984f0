use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CatalogError, Result};
use crate::types::{Item, MediaKind, TrackerLink};
use crate::{SearchOptions, Shelf};

/// An external progress-tracking service.
///
/// The tracker in use is always passed explicitly to the synchronizer
/// operations; there is no process-wide primary tracker.
#[async_trait]
pub trait Tracker: Send + Sync {
    fn id(&self) -> &str;

    /// The list of `user`, or of the authenticated user when `None`.
    async fn fetch_list(&self, user: Option<&str>) -> Result<Vec<TrackerEntry>>;

    async fn push_updates(&self, updates: &[TrackerUpdate]) -> Result<()>;
}

/// One title on a remote tracker list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub id: String,
    pub media_kind: MediaKind,
    pub name: String,
    pub progress: f64,
    #[serde(default)]
    pub progress_volumes: Option<f64>,
}

impl TrackerEntry {
    pub fn new(id: impl Into<String>, media_kind: MediaKind, name: impl Into<String>, progress: f64) -> Self {
        Self { id: id.into(), media_kind, name: name.into(), progress, progress_volumes: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerUpdate {
    pub tracking_id: String,
    pub progress: f64,
    pub progress_volumes: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    pub user: Option<String>,
    pub kind: Option<MediaKind>,
    /// Never fall back to a provider search for unlinked entries.
    pub local_only: bool,
    /// Only refresh items that are already linked.
    pub progress_only: bool,
    /// Also mark sub-items above the remote progress unread.
    pub force: bool,
}

#[derive(Debug, Default)]
pub struct PullReport {
    /// Entries applied to at least one local item.
    pub synced: usize,
    /// Global ids that got a new tracker link.
    pub linked: Vec<String>,
    /// Names of remote entries with no local counterpart.
    pub unmatched: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub force: bool,
    pub kind: Option<MediaKind>,
    pub dry_run: bool,
}

/// `name`, `name` without trailing punctuation, and `name` cut at its first
/// punctuation run, without duplicates.
pub fn alt_names(name: &str) -> Vec<String> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let trimmed = name.trim_end_matches(|c: char| !is_word(c));
    let cut = match name.find(|c: char| !(is_word(c) || c.is_whitespace())) {
        Some(i) => &name[..i],
        None => name,
    };
    let mut out: Vec<String> = Vec::new();
    for candidate in [name, trimmed, cut] {
        if !candidate.is_empty() && !out.iter().any(|c| c == candidate) {
            out.push(candidate.to_string());
        }
    }
    out
}

/// Fuzzy match of a remote title against an item's name or season title.
pub fn name_matches(name: &str, item: &Item) -> bool {
    let name = name.to_lowercase();
    [&item.name, &item.season_title]
        .into_iter()
        .filter(|local| !local.is_empty())
        .map(|local| local.to_lowercase())
        .any(|local| name.starts_with(&local) || name == local)
}

impl Shelf {
    /// Link an item to `tracking_id` on tracker `tracker_id`.
    pub fn track(&mut self, global_id: &str, tracker_id: &str, tracking_id: &str, title: Option<&str>) -> Result<()> {
        let item = self.item_mut(global_id).ok_or_else(|| CatalogError::not_found(global_id))?;
        item.trackers.insert(
            tracker_id.to_string(),
            TrackerLink { tracking_id: tracking_id.to_string(), title: title.map(str::to_string) },
        );
        debug!(global_id, tracker = tracker_id, tracking_id, "tracked");
        Ok(())
    }

    /// Drop the `tracker_id` link of every selected item. Returns how many had one.
    pub fn untrack(&mut self, name: Option<&str>, kind: Option<MediaKind>, tracker_id: &str) -> usize {
        let mut removed = 0;
        for gid in self.catalog().select(name, kind) {
            if self.item_mut(&gid).is_some_and(|item| item.trackers.remove(tracker_id).is_some()) {
                removed += 1;
            }
        }
        removed
    }

    pub fn copy_tracker(&mut self, src: &str, dst: &str, tracker_id: &str) -> Result<bool> {
        let src_gid = self.single(src, None)?;
        let dst_gid = self.single(dst, None)?;
        let Some(link) = self.item(&src_gid).and_then(|i| i.tracker_link(tracker_id)).cloned() else {
            return Ok(false);
        };
        self.track(&dst_gid, tracker_id, &link.tracking_id, link.title.as_deref())?;
        Ok(true)
    }

    /// Active items linked to `tracking_id` on `tracker_id`.
    pub fn tracked_items(&self, tracker_id: &str, tracking_id: &str) -> Vec<String> {
        self.catalog()
            .active()
            .iter()
            .filter(|(_, item)| item.tracker_link(tracker_id).is_some_and(|l| l.tracking_id == tracking_id))
            .map(|(gid, _)| gid.clone())
            .collect()
    }

    fn find_local_untracked(&self, names: &[String], kind: Option<MediaKind>, tracker_id: &str) -> Option<String> {
        names.iter().find_map(|name| {
            self.catalog()
                .active()
                .iter()
                .filter(|(_, item)| item.tracker_link(tracker_id).is_none())
                .filter(|(_, item)| kind.map_or(true, |k| item.media_kind == k))
                .find(|(_, item)| name_matches(name, item))
                .map(|(gid, _)| gid.clone())
        })
    }

    /// Find an item for a remote title: a local untracked match first, then,
    /// unless `local_only`, a provider search that adds the first result.
    pub async fn search_for_tracked(&mut self, name: &str, kind: Option<MediaKind>, tracker_id: &str, local_only: bool) -> Result<Option<String>> {
        let names = alt_names(name);
        if let Some(gid) = self.find_local_untracked(&names, kind, tracker_id) {
            return Ok(Some(gid));
        }
        if local_only {
            return Ok(None);
        }
        let opts = SearchOptions { media_kind: kind, ..Default::default() };
        for candidate in &names {
            if let Some(gid) = self.search_add(candidate, &opts).await? {
                return Ok(Some(gid));
            }
        }
        Ok(None)
    }

    /// Link other items that match the tracker title of already linked ones.
    pub fn share_tracker(&mut self, name: Option<&str>, kind: Option<MediaKind>, tracker_id: &str) -> Result<usize> {
        let mut shared = 0;
        for gid in self.catalog().select(name, kind) {
            let Some(link) = self.item(&gid).and_then(|i| i.tracker_link(tracker_id)).cloned() else { continue };
            let Some(title) = link.title.as_deref() else { continue };
            if let Some(other) = self.find_local_untracked(&alt_names(title), kind, tracker_id) {
                info!(from = %gid, to = %other, "sharing tracker link");
                self.track(&other, tracker_id, &link.tracking_id, Some(title))?;
                shared += 1;
            }
        }
        Ok(shared)
    }

    /// Set `progress` and the read flags of an item from a remote progress value.
    pub fn reconcile_read_state(&mut self, global_id: &str, progress: f64, force: bool) -> Result<()> {
        let item = self.item_mut(global_id).ok_or_else(|| CatalogError::not_found(global_id))?;
        item.mark_read_until(progress, force);
        item.progress = progress;
        Ok(())
    }

    /// Pull the remote list onto local items, linking unlinked entries where possible.
    pub async fn load_from_tracker(&mut self, tracker: &dyn Tracker, opts: &PullOptions) -> Result<PullReport> {
        let entries = tracker.fetch_list(opts.user.as_deref()).await?;
        let mut report = PullReport::default();
        for entry in entries {
            if opts.kind.is_some_and(|k| k != entry.media_kind) {
                continue;
            }
            let mut gids = self.tracked_items(tracker.id(), &entry.id);
            if gids.is_empty() {
                if opts.progress_only {
                    continue;
                }
                let found = match self.search_for_tracked(&entry.name, Some(entry.media_kind), tracker.id(), opts.local_only).await {
                    Ok(found) => found,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(name = %entry.name, error = %e, "search for tracked media failed");
                        None
                    }
                };
                let Some(gid) = found else {
                    report.unmatched.push(entry.name.clone());
                    continue;
                };
                self.track(&gid, tracker.id(), &entry.id, Some(entry.name.as_str()))?;
                report.linked.push(gid.clone());
                gids.push(gid);
            }
            for gid in &gids {
                let volumes = self.item(gid).is_some_and(|i| i.progress_volumes.is_some());
                let progress = match entry.progress_volumes {
                    Some(v) if volumes => v,
                    _ => entry.progress,
                };
                self.reconcile_read_state(gid, progress, opts.force)?;
                if let (true, Some(v)) = (volumes, entry.progress_volumes) {
                    if let Some(item) = self.item_mut(gid) {
                        item.progress_volumes = Some(v);
                    }
                }
            }
            report.synced += 1;
        }
        if !report.unmatched.is_empty() {
            info!(unmatched = ?report.unmatched, "could not find local media for some tracker entries");
        }
        Ok(report)
    }

    /// Push local progress of linked items that read past their stored progress.
    ///
    /// Local `progress` is advanced before the remote call and is left advanced
    /// if that call fails; the next push will not resend those items.
    pub async fn sync_progress(&mut self, tracker: &dyn Tracker, opts: &PushOptions) -> Result<bool> {
        let mut updates = Vec::new();
        for gid in self.catalog().select(None, opts.kind) {
            let Some(item) = self.item_mut(&gid) else { continue };
            let Some(link) = item.tracker_link(tracker.id()).cloned() else { continue };
            let last_read = item.last_read_number();
            if !(opts.force || item.progress < last_read.trunc()) {
                continue;
            }
            info!(name = %item.name, from = item.progress, to = last_read, "preparing progress update");
            updates.push(TrackerUpdate { tracking_id: link.tracking_id, progress: last_read, progress_volumes: item.progress_volumes });
            item.progress = last_read;
        }
        if updates.is_empty() {
            return Ok(false);
        }
        if !opts.dry_run {
            tracker.push_updates(&updates).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{shelf_with, MockProvider, MockTracker};
    use std::sync::Arc;

    #[test]
    fn alt_names_strip_punctuation() {
        assert_eq!(alt_names("Foo!"), vec!["Foo!", "Foo"]);
        assert_eq!(alt_names("Foo: The Bar"), vec!["Foo: The Bar", "Foo"]);
        assert_eq!(alt_names("Plain"), vec!["Plain"]);
    }

    #[test]
    fn name_matching_is_prefix_and_case_insensitive() {
        let item = Item::new("m", "1", "Foo", MediaKind::Manga).with_season("s2", "");
        assert!(name_matches("foo season 2", &item));
        assert!(name_matches("FOO", &item));
        assert!(!name_matches("Bar", &item));
    }

    async fn shelf_with_items() -> (tempfile::TempDir, Shelf) {
        let p = MockProvider::new("m", MediaKind::Manga)
            .with_listing(&[("1", 1.0), ("2", 2.0), ("3", 3.0), ("4", 4.0)])
            .with_items(vec![Item::new("m", "remote", "Remote Only", MediaKind::Manga)]);
        let (tmp, mut shelf) = shelf_with(vec![Arc::new(p)]);
        shelf.add_item(Item::new("m", "a", "Alpha", MediaKind::Manga), false).await.unwrap();
        shelf.add_item(Item::new("m", "b", "Beta", MediaKind::Manga), false).await.unwrap();
        (tmp, shelf)
    }

    #[tokio::test]
    async fn pull_links_local_matches_and_reports_unmatched() {
        let (_tmp, mut shelf) = shelf_with_items().await;
        let tracker = MockTracker::new("t").with_entries(vec![
            TrackerEntry::new("10", MediaKind::Manga, "Alpha!", 2.0),
            TrackerEntry::new("11", MediaKind::Manga, "Nowhere", 1.0),
            TrackerEntry::new("12", MediaKind::Anime, "Beta", 1.0),
        ]);
        let report = shelf.load_from_tracker(&tracker, &PullOptions { local_only: true, ..Default::default() }).await.unwrap();
        assert_eq!(report.linked, vec!["m:a"]);
        assert_eq!(report.unmatched, vec!["Nowhere", "Beta"]);
        let alpha = shelf.item("m:a").unwrap();
        assert_eq!(alpha.last_read_number(), 2.0);
        assert_eq!(alpha.progress, 2.0);
        assert_eq!(alpha.tracker_link("t").unwrap().tracking_id, "10");
    }

    #[tokio::test]
    async fn pull_falls_back_to_search_and_respects_progress_only() {
        let (_tmp, mut shelf) = shelf_with_items().await;
        let tracker = MockTracker::new("t").with_entries(vec![TrackerEntry::new("20", MediaKind::Manga, "Remote Only", 3.0)]);

        let report = shelf.load_from_tracker(&tracker, &PullOptions { progress_only: true, ..Default::default() }).await.unwrap();
        assert_eq!(report.synced, 0);
        assert!(shelf.item("m:remote").is_none());

        let report = shelf.load_from_tracker(&tracker, &PullOptions::default()).await.unwrap();
        assert_eq!(report.linked, vec!["m:remote"]);
        assert_eq!(shelf.item("m:remote").unwrap().last_read_number(), 3.0);
    }

    #[tokio::test]
    async fn forced_pull_unreads_and_volume_mode_uses_volumes() {
        let (_tmp, mut shelf) = shelf_with_items().await;
        shelf.mark_read(Some("Alpha"), None, 0.0, false, false);
        shelf.track("m:a", "t", "10", None).unwrap();
        shelf.item_mut("m:a").unwrap().progress_volumes = Some(0.0);
        let mut entry = TrackerEntry::new("10", MediaKind::Manga, "Alpha", 4.0);
        entry.progress_volumes = Some(1.0);
        let tracker = MockTracker::new("t").with_entries(vec![entry]);

        shelf.load_from_tracker(&tracker, &PullOptions { force: true, ..Default::default() }).await.unwrap();
        let alpha = shelf.item("m:a").unwrap();
        assert_eq!(alpha.last_read_number(), 1.0);
        assert_eq!(alpha.progress_volumes, Some(1.0));
    }

    #[tokio::test]
    async fn chapter_only_entry_leaves_volume_progress_alone() {
        let (_tmp, mut shelf) = shelf_with_items().await;
        shelf.track("m:a", "t", "10", None).unwrap();
        shelf.item_mut("m:a").unwrap().progress_volumes = Some(1.0);
        let tracker = MockTracker::new("t").with_entries(vec![TrackerEntry::new("10", MediaKind::Manga, "Alpha", 3.0)]);

        shelf.load_from_tracker(&tracker, &PullOptions::default()).await.unwrap();
        let alpha = shelf.item("m:a").unwrap();
        assert_eq!(alpha.progress, 3.0);
        assert_eq!(alpha.last_read_number(), 3.0);
        assert_eq!(alpha.progress_volumes, Some(1.0));
    }

    #[tokio::test]
    async fn push_sends_advanced_items_and_stays_advanced_on_failure() {
        let (_tmp, mut shelf) = shelf_with_items().await;
        shelf.track("m:a", "t", "10", None).unwrap();
        shelf.track("m:b", "t", "11", None).unwrap();
        shelf.mark_read(Some("Alpha"), None, 3.0, false, true);

        let tracker = MockTracker::new("t");
        assert!(shelf.sync_progress(&tracker, &PushOptions::default()).await.unwrap());
        let pushed = tracker.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0][0].tracking_id, "10");
        assert_eq!(pushed[0][0].progress, 3.0);
        assert!(!shelf.sync_progress(&tracker, &PushOptions::default()).await.unwrap());

        shelf.mark_read(Some("Beta"), None, 2.0, false, true);
        tracker.set_failing(true);
        assert!(shelf.sync_progress(&tracker, &PushOptions::default()).await.is_err());
        assert_eq!(shelf.item("m:b").unwrap().progress, 2.0);
    }

    #[tokio::test]
    async fn dry_run_and_force_push() {
        let (_tmp, mut shelf) = shelf_with_items().await;
        shelf.track("m:a", "t", "10", None).unwrap();
        let tracker = MockTracker::new("t");
        assert!(shelf.sync_progress(&tracker, &PushOptions { force: true, dry_run: true, ..Default::default() }).await.unwrap());
        assert!(tracker.pushed().is_empty());
    }

    #[tokio::test]
    async fn tracker_link_utilities() {
        let (_tmp, mut shelf) = shelf_with_items().await;
        shelf.track("m:a", "t", "10", Some("Beta")).unwrap();
        assert!(shelf.copy_tracker("Alpha", "Beta", "t").unwrap());
        assert_eq!(shelf.tracked_items("t", "10"), vec!["m:a", "m:b"]);
        assert_eq!(shelf.untrack(Some("Beta"), None, "t"), 1);
        assert_eq!(shelf.share_tracker(None, None, "t").unwrap(), 1);
        assert_eq!(shelf.item("m:b").unwrap().tracker_link("t").unwrap().tracking_id, "10");
        assert!(matches!(shelf.track("m:zzz", "t", "1", None), Err(CatalogError::NotFound(_))));
    }
}
