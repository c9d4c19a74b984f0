use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::mapping::global_id_from;

/// The closed set of media shapes a provider can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Serialized episodic video.
    Anime,
    /// Serialized paginated text with pages.
    Manga,
    /// Serialized paginated text without pages.
    Novel,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Anime => "anime",
            MediaKind::Manga => "manga",
            MediaKind::Novel => "novel",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anime" => Ok(Self::Anime),
            "manga" => Ok(Self::Manga),
            "novel" | "novels" => Ok(Self::Novel),
            other => Err(CatalogError::Config(format!("unknown media kind `{other}`"))),
        }
    }
}

/// Link from an item to an entry on an external progress tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerLink {
    pub tracking_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// One chapter or episode of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubItem {
    pub id: String,
    pub number: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub premium: bool,
    /// Specials do not count toward unread limits.
    #[serde(default)]
    pub special: bool,
    #[serde(default)]
    pub date: Option<String>,
}

impl SubItem {
    pub fn new(id: impl Into<String>, number: f64, title: impl Into<String>) -> Self {
        Self { id: id.into(), number, title: title.into(), read: false, premium: false, special: false, date: None }
    }
}

/// A tracked media title.
///
/// Sub-items are not part of the serialized form; they live in a sidecar file
/// per item so the catalog index stays small (see [`crate::storage`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub provider_id: String,
    pub id: String,
    #[serde(default)]
    pub season_id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    pub name: String,
    #[serde(default)]
    pub season_title: String,
    pub media_kind: MediaKind,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub progress: f64,
    /// `Some` when tracker progress for this item is counted in volumes.
    #[serde(default)]
    pub progress_volumes: Option<f64>,
    #[serde(default)]
    pub trackers: BTreeMap<String, TrackerLink>,
    /// Provider-specific fields (alt ids, locale, directory names, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    pub subitems: BTreeMap<String, SubItem>,
}

impl Item {
    pub fn new(provider_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>, media_kind: MediaKind) -> Self {
        let name = name.into();
        Self {
            provider_id: provider_id.into(),
            id: id.into(),
            season_id: None,
            lang: None,
            season_title: name.clone(),
            name,
            media_kind,
            offset: 0.0,
            progress: 0.0,
            progress_volumes: None,
            trackers: BTreeMap::new(),
            extra: BTreeMap::new(),
            subitems: BTreeMap::new(),
        }
    }

    pub fn with_season(mut self, season_id: impl Into<String>, season_title: impl Into<String>) -> Self {
        self.season_id = Some(season_id.into());
        self.season_title = season_title.into();
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn global_id(&self) -> String {
        global_id_from(&self.provider_id, &self.id, self.season_id.as_deref(), self.lang.as_deref())
    }

    /// Sub-items in ascending number order.
    pub fn sorted_subitems(&self) -> Vec<&SubItem> {
        let mut list: Vec<&SubItem> = self.subitems.values().collect();
        list.sort_by(|a, b| a.number.total_cmp(&b.number));
        list
    }

    pub fn last_subitem_number(&self) -> f64 {
        self.subitems.values().map(|s| s.number).max_by(f64::total_cmp).unwrap_or(0.0)
    }

    pub fn last_read_number(&self) -> f64 {
        self.subitems.values().filter(|s| s.read).map(|s| s.number).max_by(f64::total_cmp).unwrap_or(0.0)
    }

    /// Copy user-owned fields onto a freshly provider-constructed item.
    pub fn copy_user_fields(&self, dst: &mut Item) -> Result<()> {
        if dst.provider_id.is_empty() {
            return Err(CatalogError::MissingField { field: "provider_id", entity: dst.name.clone() });
        }
        if dst.id.is_empty() {
            return Err(CatalogError::MissingField { field: "id", entity: dst.name.clone() });
        }
        dst.offset = self.offset;
        dst.progress = self.progress;
        dst.progress_volumes = self.progress_volumes;
        dst.trackers = self.trackers.clone();
        Ok(())
    }

    /// Insert or refresh a sub-item as reported by a provider.
    ///
    /// The item's offset is subtracted from `number`. Known ids keep their `read` flag.
    pub fn upsert_subitem(&mut self, id: impl Into<String>, number: f64, title: impl Into<String>) -> &mut SubItem {
        let id = id.into();
        let number = number - self.offset;
        let entry = self.subitems.entry(id.clone()).or_insert_with(|| SubItem::new(id, number, ""));
        entry.number = number;
        entry.title = title.into();
        entry
    }

    /// Marks every sub-item numbered `<= n` read; with `force`, the rest become unread.
    pub fn mark_read_until(&mut self, n: f64, force: bool) {
        for sub in self.subitems.values_mut() {
            if sub.number <= n {
                sub.read = true;
            } else if force {
                sub.read = false;
            }
        }
    }

    pub fn tracker_link(&self, tracker_id: &str) -> Option<&TrackerLink> {
        self.trackers.get(tracker_id)
    }

    /// True when `name` names this item's provider, display name, or global id.
    pub fn matches_name(&self, name: &str) -> bool {
        name == self.provider_id || name == self.name || name == self.global_id()
    }

    /// Number of identity and descriptive fields equal between two items.
    pub fn similarity(&self, other: &Item) -> usize {
        let mut score = [
            self.provider_id == other.provider_id,
            self.id == other.id,
            self.season_id == other.season_id,
            self.lang == other.lang,
            self.name == other.name,
            self.season_title == other.season_title,
            self.media_kind == other.media_kind,
        ]
        .iter()
        .filter(|same| **same)
        .count();
        score += other.extra.iter().filter(|(k, v)| self.extra.get(*k) == Some(*v)).count();
        score
    }
}

/// One sub-item referenced by an export bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub media_id: String,
    pub chapter_id: String,
}
