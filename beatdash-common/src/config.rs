//! Bootstrap configuration and root folder resolution

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::history::{AdmissionPolicy, DEFAULT_REPLAY_GUARD_MS};
use crate::{Error, Result};

pub const ROOT_ENV_VAR: &str = "BEATDASH_ROOT";
pub const CONFIG_ENV_VAR: &str = "BEATDASH_CONFIG";

/// Server bootstrap configuration (TOML)
///
/// Every key is optional; absent keys take the compiled defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub root_folder: Option<PathBuf>,
    pub port: u16,
    pub bind_address: String,
    /// Deck metadata API base URL
    pub metadata_url: String,
    /// Built dashboard assets
    pub static_dir: PathBuf,
    /// Defaults to `<root>/beatdash.db`
    pub database_path: Option<PathBuf>,
    pub cors_origin: String,
    /// Authoritative beatdash server to mirror admitted events to
    pub upstream_history: Option<String>,
    pub history: HistoryConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            metadata_url: "http://localhost:17081".to_string(),
            static_dir: PathBuf::from("dist"),
            database_path: None,
            cors_origin: "http://localhost:5173".to_string(),
            upstream_history: None,
            history: HistoryConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// "replay-guard" or "session-unique"
    pub policy: String,
    pub replay_guard_ms: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            policy: "replay-guard".to_string(),
            replay_guard_ms: DEFAULT_REPLAY_GUARD_MS,
        }
    }
}

impl HistoryConfig {
    pub fn admission_policy(&self) -> Result<AdmissionPolicy> {
        match self.policy.as_str() {
            "replay-guard" => {
                if self.replay_guard_ms < 0 {
                    return Err(Error::Config("replay_guard_ms must not be negative".to_string()));
                }
                Ok(AdmissionPolicy::ReplayGuard {
                    window_ms: self.replay_guard_ms,
                })
            }
            "session-unique" => Ok(AdmissionPolicy::SessionUnique),
            other => Err(Error::Config(format!("unknown history policy '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { debounce_ms: 300 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BootstrapConfig {
    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from an explicit path, or the first platform config file found
    ///
    /// No file at all yields the defaults; an unreadable or invalid file is
    /// an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV_VAR)
                .map(PathBuf::from)
                .or_else(find_config_file),
        };

        match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
                Self::from_toml(&text)
            }
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Database file inside `root` unless configured explicitly
    pub fn database_path(&self, root: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root.join("beatdash.db"))
    }
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `root_folder` from the config file
/// 4. OS-dependent default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &BootstrapConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(ROOT_ENV_VAR) {
        return PathBuf::from(path);
    }
    if let Some(path) = &config.root_folder {
        return path.clone();
    }
    default_root_folder()
}

/// `~/.config/beatdash/config.toml`, then `/etc/beatdash/config.toml` on Linux
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("beatdash").join("config.toml"));
    if let Some(path) = user_config.filter(|p| p.exists()) {
        return Some(path);
    }
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/beatdash/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    None
}

fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("beatdash"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\beatdash"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("beatdash"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/beatdash"))
    } else {
        // ~/.local/share/beatdash
        dirs::data_local_dir()
            .map(|d| d.join("beatdash"))
            .unwrap_or_else(|| PathBuf::from("./beatdash_data"))
    }
}
