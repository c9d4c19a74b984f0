use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::plugins::Provider;
use crate::types::{Item, MediaKind};

pub const LOCAL_ANIME: &str = "local_anime";
pub const LOCAL_MANGA: &str = "local_manga";
pub const LOCAL_NOVELS: &str = "local_novels";

pub fn local_provider_id(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Anime => LOCAL_ANIME,
        MediaKind::Manga => LOCAL_MANGA,
        MediaKind::Novel => LOCAL_NOVELS,
    }
}

/// Serves media already on disk: each directory under `root` is an item and
/// each numbered entry inside it is a sub-item.
pub struct LocalProvider {
    id: String,
    kind: MediaKind,
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(id: impl Into<String>, kind: MediaKind, root: impl Into<PathBuf>) -> Self {
        Self { id: id.into(), kind, root: root.into() }
    }

    fn sorted_entries(&self, dir: &Path) -> Result<Vec<(String, bool)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| CatalogError::fetch(&self.id, format!("{}: {e}", dir.display())))? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
            out.push((name, entry.file_type()?.is_dir()));
        }
        out.sort();
        Ok(out)
    }
}

impl Provider for LocalProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn media_kind(&self) -> MediaKind {
        self.kind
    }

    fn reports_deletions(&self) -> bool {
        false
    }

    fn list_items(&self, limit: Option<usize>) -> Result<Vec<Item>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let items = self
            .sorted_entries(&self.root)?
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .map(|(name, _)| Item::new(self.id.clone(), name.clone(), name, self.kind))
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(items)
    }

    fn search(&self, term: &str, limit: Option<usize>) -> Result<Vec<Item>> {
        let needle = term.to_lowercase();
        Ok(self
            .list_items(None)?
            .into_iter()
            .filter(|item| item.name.to_lowercase().contains(&needle))
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn populate_subitems(&self, item: &mut Item) -> Result<()> {
        let dir = self.root.join(&item.id);
        for (name, _) in self.sorted_entries(&dir)? {
            if let Some(number) = leading_number(&name) {
                item.upsert_subitem(name.clone(), number, name);
            }
        }
        debug!(provider = %self.id, item = %item.id, count = item.subitems.len(), "scanned local media");
        Ok(())
    }
}

/// First decimal number in `name` (`12`, `3.5`), if any.
pub(crate) fn leading_number(name: &str) -> Option<f64> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let rest = &name[start..];
    let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let mut end = int_len;
    if rest[int_len..].starts_with('.') {
        let frac = &rest[int_len + 1..];
        let frac_len = frac.find(|c: char| !c.is_ascii_digit()).unwrap_or(frac.len());
        end = int_len + 1 + frac_len;
    }
    rest[..end].trim_end_matches('.').parse().ok()
}
