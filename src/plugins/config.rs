use std::path::PathBuf;

use serde::Deserialize;

/// Per-provider table from the settings file (`[providers.<id>]`).
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Root directory override for providers backed by the local file system.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { enabled: true, dir: None }
    }
}

fn enabled_by_default() -> bool {
    true
}
