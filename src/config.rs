use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::plugins::config::ProviderConfig;

const CONFIG_FILE: &str = "shelfkeeper.toml";

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    /// Width of the concurrency runner; 0 or 1 runs sequentially.
    pub threads: usize,
    /// Ignore paywalled sub-items when computing newly discovered ones.
    pub free_only: bool,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub no_load_session: bool,
    pub no_save_session: bool,
    pub search_limit: Option<usize>,
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            threads: 8,
            free_only: false,
            max_retries: 3,
            timeout_secs: 30,
            user_agent: format!("shelfkeeper/{}", env!("CARGO_PKG_VERSION")),
            no_load_session: false,
            no_save_session: false,
            search_limit: None,
            providers: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the default config location when it exists,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };
        let mut settings = match file {
            Some(p) => {
                debug!(path = %p.display(), "reading settings");
                let text = std::fs::read_to_string(&p)?;
                toml::from_str::<Settings>(&text)?
            }
            None => Settings::default(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    /// Settings rooted at `data_dir` with every other field defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), ..Self::default() }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("SHELFKEEPER_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Some(v) = env_parse("SHELFKEEPER_THREADS")? {
            self.threads = v;
        }
        if let Some(v) = env_parse("SHELFKEEPER_TIMEOUT_SECS")? {
            self.timeout_secs = v;
        }
        if let Some(v) = env_parse("SHELFKEEPER_MAX_RETRIES")? {
            self.max_retries = v;
        }
        Ok(())
    }

    pub fn provider(&self, id: &str) -> ProviderConfig {
        self.providers.get(id).cloned().unwrap_or_default()
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.data_dir.join("metadata.json")
    }

    pub fn bundle_file(&self) -> PathBuf {
        self.data_dir.join("bundles.json")
    }

    pub fn cookie_file(&self) -> PathBuf {
        self.data_dir.join("cookies.txt")
    }

    pub fn subitems_dir(&self) -> PathBuf {
        self.data_dir.join("subitems")
    }

    /// Root directory for a provider's local media.
    pub fn media_dir(&self, provider_id: &str) -> PathBuf {
        self.provider(provider_id)
            .dir
            .unwrap_or_else(|| self.data_dir.join("media").join(provider_id))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CatalogError::Config(format!("invalid value for {key}: {v}"))),
        Err(_) => Ok(None),
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "shelfkeeper", "shelfkeeper")
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".shelfkeeper"))
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|p| p.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml() {
        let text = r#"
            data_dir = "/tmp/shelf"
            threads = 2
            free_only = true

            [providers.local_manga]
            dir = "/srv/manga"

            [providers.local_anime]
            enabled = false
        "#;
        let s: Settings = toml::from_str(text).unwrap();
        assert_eq!(s.data_dir, PathBuf::from("/tmp/shelf"));
        assert_eq!(s.threads, 2);
        assert!(s.free_only);
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.media_dir("local_manga"), PathBuf::from("/srv/manga"));
        assert_eq!(s.media_dir("local_novels"), PathBuf::from("/tmp/shelf/media/local_novels"));
        assert!(!s.provider("local_anime").enabled);
        assert!(s.provider("unknown").enabled);
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let s = Settings::with_data_dir("/d");
        assert_eq!(s.metadata_file(), PathBuf::from("/d/metadata.json"));
        assert_eq!(s.bundle_file(), PathBuf::from("/d/bundles.json"));
        assert_eq!(s.cookie_file(), PathBuf::from("/d/cookies.txt"));
        assert_eq!(s.subitems_dir(), PathBuf::from("/d/subitems"));
    }

    #[test]
    fn load_reads_explicit_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, "threads = 4\nsearch_limit = 5\n").unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.search_limit, Some(5));
    }

    #[test]
    fn load_rejects_bad_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, "threads = \"many\"").unwrap();
        assert!(matches!(Settings::load(Some(&path)), Err(CatalogError::Config(_))));
    }
}
