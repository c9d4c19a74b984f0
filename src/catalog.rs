use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CatalogError, Result};
use crate::types::{Item, MediaKind};

/// Schema version of the catalog index. A mismatch on load triggers self-migration.
pub const CURRENT_VERSION: u32 = 1;

/// The catalog index: active items plus items whose provider is not loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    version: u32,
    #[serde(default, rename = "media")]
    active: BTreeMap<String, Item>,
    #[serde(default, rename = "disabled_media")]
    disabled: BTreeMap<String, Item>,
}

impl Catalog {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_out_of_date(&self) -> bool {
        self.version != CURRENT_VERSION
    }

    pub fn stamp_version(&mut self) {
        self.version = CURRENT_VERSION;
    }

    pub fn active(&self) -> &BTreeMap<String, Item> {
        &self.active
    }

    pub fn active_mut(&mut self) -> &mut BTreeMap<String, Item> {
        &mut self.active
    }

    pub fn disabled(&self) -> &BTreeMap<String, Item> {
        &self.disabled
    }

    pub fn get(&self, global_id: &str) -> Option<&Item> {
        self.active.get(global_id)
    }

    pub fn get_mut(&mut self, global_id: &str) -> Option<&mut Item> {
        self.active.get_mut(global_id)
    }

    pub fn contains(&self, global_id: &str) -> bool {
        self.active.contains_key(global_id)
    }

    pub fn insert(&mut self, item: Item) -> Result<()> {
        let gid = item.global_id();
        if self.active.contains_key(&gid) {
            return Err(CatalogError::AlreadyExists(format!("{} {}", gid, item.name)));
        }
        debug!(global_id = %gid, "adding item");
        self.active.insert(gid, item);
        Ok(())
    }

    /// Put back an item that was taken out for concurrent work.
    pub fn replace(&mut self, item: Item) {
        self.active.insert(item.global_id(), item);
    }

    pub fn remove(&mut self, global_id: &str) -> Option<Item> {
        self.active.remove(global_id)
    }

    /// Re-key entries whose stored key no longer matches their global id.
    pub(crate) fn rekey(&mut self) {
        for map in [&mut self.active, &mut self.disabled] {
            let stale: Vec<String> = map.iter().filter(|(k, v)| **k != v.global_id()).map(|(k, _)| k.clone()).collect();
            for key in stale {
                if let Some(item) = map.remove(&key) {
                    let gid = item.global_id();
                    warn!(old = %key, new = %gid, "re-keying catalog entry");
                    map.insert(gid, item);
                }
            }
        }
    }

    /// Move items between partitions so exactly the items of `available`
    /// providers are active. Returns the ids that became active.
    pub fn configure(&mut self, available: &BTreeSet<String>) -> Vec<String> {
        let to_disable: Vec<String> = self
            .active
            .iter()
            .filter(|(_, item)| !available.contains(&item.provider_id))
            .map(|(k, _)| k.clone())
            .collect();
        for key in to_disable {
            if let Some(item) = self.active.remove(&key) {
                self.disabled.insert(key, item);
            }
        }

        let to_enable: Vec<String> = self
            .disabled
            .iter()
            .filter(|(_, item)| available.contains(&item.provider_id))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &to_enable {
            if let Some(item) = self.disabled.remove(key) {
                self.active.insert(key.clone(), item);
            }
        }
        to_enable
    }

    /// Ids of active items whose provider id, name, or global id equals `name`
    /// (all items when `None`), restricted to `kind` when given.
    pub fn select(&self, name: Option<&str>, kind: Option<MediaKind>) -> Vec<String> {
        self.active
            .iter()
            .filter(|(_, item)| name.map_or(true, |n| item.matches_name(n)))
            .filter(|(_, item)| kind.map_or(true, |k| item.media_kind == k))
            .map(|(k, _)| k.clone())
            .collect()
    }
}
