use std::path::{Path, PathBuf};

use crate::types::Item;

/// Deterministic catalog key: provider, provider item id, season, and the
/// first three characters of the language tag.
pub fn global_id_from(provider_id: &str, item_id: &str, season_id: Option<&str>, lang: Option<&str>) -> String {
    let lang: String = lang.unwrap_or("").chars().take(3).collect();
    format!("{}:{}{}{}", provider_id, item_id, season_id.unwrap_or(""), lang)
}

/// File-system safe form of a name: anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Location of an item's sub-item sidecar file under `subitems_root`.
pub fn subitem_file_for(subitems_root: &Path, item: &Item) -> PathBuf {
    subitems_root
        .join(sanitize(&item.provider_id))
        .join(format!("{}.json", sanitize(&item.global_id())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaKind;

    #[test]
    fn global_id_format() {
        assert_eq!(global_id_from("p", "1", None, None), "p:1");
        assert_eq!(global_id_from("p", "1", Some("s"), Some("fr")), "p:1sfr");
        assert_eq!(global_id_from("p", "1", None, Some("enUS")), "p:1enU");
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize("local:12/3"), "local_12_3");
        assert_eq!(sanitize(".."), "_");
        assert_eq!(sanitize("ok-name_1.json"), "ok-name_1.json");
    }

    #[test]
    fn subitem_path_is_derived_from_identity() {
        let item = Item::new("local_manga", "Some Title", "Some Title", MediaKind::Manga);
        let path = subitem_file_for(Path::new("/data/subitems"), &item);
        assert_eq!(path, PathBuf::from("/data/subitems/local_manga/local_manga_Some_Title.json"));
    }
}
