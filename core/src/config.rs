use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;
use crate::version::Version;

pub const CONFIG_TOML_FILE: &str = "config.toml";
pub const PREFERENCES_FILE: &str = "preferences.json";
const CACHE_DIR: &str = "cache";
const UPTICK_HOME_ENV: &str = "UPTICK_HOME";

pub const DEFAULT_CATALOG_URL: &str = "https://formulae.brew.sh/api/cask.json";
pub const DEFAULT_EXCLUSION_LIST_URL: &str =
    "https://raw.githubusercontent.com/uptick-app/uptick/main/core/resources/unsupported_apps.plist";
pub const DEFAULT_LOOKUP_URL: &str = "https://itunes.apple.com/lookup";

/// Returns the directory holding `config.toml`, preferences and the resource
/// cache: `$UPTICK_HOME` when set, otherwise `~/.uptick`. The directory is not
/// required to exist.
pub fn find_uptick_home() -> Result<PathBuf, ConfigError> {
    if let Some(home) = std::env::var_os(UPTICK_HOME_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".uptick"))
        .ok_or(ConfigError::NoHomeDirectory)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UptickConfig {
    /// Storefront region used for app-store lookups.
    pub region: String,
    pub max_concurrent_checks: usize,
    pub request_timeout_secs: u64,
    pub freshness_window_secs: u64,
    pub max_connections_per_host: usize,
    pub lookup_chunk_size: usize,
    pub coalescing_delay_ms: u64,
    pub notify_debounce_ms: u64,
    pub catalog_url: String,
    pub exclusion_list_url: String,
    pub lookup_url: String,
    pub application_dirs: Vec<PathBuf>,
    /// Overrides the detected OS version when evaluating minimum requirements.
    pub os_version: Option<String>,
    /// Preferred language for release notes, e.g. `de`.
    pub locale: Option<String>,

    #[serde(skip)]
    pub home: PathBuf,
}

impl Default for UptickConfig {
    fn default() -> Self {
        Self {
            region: "us".to_string(),
            max_concurrent_checks: 10,
            request_timeout_secs: 30,
            freshness_window_secs: 3600,
            max_connections_per_host: 6,
            lookup_chunk_size: 50,
            coalescing_delay_ms: 40,
            notify_debounce_ms: 600,
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            exclusion_list_url: DEFAULT_EXCLUSION_LIST_URL.to_string(),
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            application_dirs: vec![PathBuf::from("/Applications"), PathBuf::from("~/Applications")],
            os_version: None,
            locale: None,
            home: PathBuf::new(),
        }
    }
}

impl UptickConfig {
    /// Loads `config.toml` from `home`. A missing file yields the defaults.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_TOML_FILE);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str::<UptickConfig>(&contents)
                .map_err(|source| ConfigError::Parse { path, source })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => UptickConfig::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        config.home = home.to_path_buf();
        config.application_dirs = config
            .application_dirs
            .iter()
            .map(|dir| expand_tilde(dir))
            .collect();
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub fn coalescing_delay(&self) -> Duration {
        Duration::from_millis(self.coalescing_delay_ms)
    }

    pub fn notify_debounce(&self) -> Duration {
        Duration::from_millis(self.notify_debounce_ms)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join(CACHE_DIR)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.home.join(PREFERENCES_FILE)
    }

    pub fn os_version_override(&self) -> Option<Version> {
        self.os_version.clone().map(Version::from_version)
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
