//! Server configuration management.
//!
//! Configuration is stored as TOML at `$STOWAGE_CONFIG`, or else:
//! - Linux: `~/.config/stowage/server.toml`
//! - Windows: `%APPDATA%/stowage/server.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_upload_server::SweeperConfig;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "STOWAGE_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket server port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root for chunk staging (`staging/`) and stored files (`blobs/`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fixed chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Unsealed sessions idle longer than this are expired.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Storage quota granted to owners with no explicit quota.
    #[serde(default = "default_quota")]
    pub default_quota_bytes: u64,
}

fn default_port() -> u16 {
    9443
}

fn default_data_dir() -> PathBuf {
    base_dir().join("stowage").join("data")
}

fn default_chunk_size() -> u64 {
    5 * 1024 * 1024
}

fn default_session_ttl() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    10 * 60
}

fn default_quota() -> u64 {
    10 * 1024 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
            chunk_size: default_chunk_size(),
            session_ttl_secs: default_session_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            default_quota_bytes: default_quota(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.sweep_interval_secs > 0,
            "sweep_interval_secs must be positive"
        );
        Ok(())
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => base_dir().join("stowage").join("server.toml"),
    }
}

/// Returns the platform-specific configuration base directory.
fn base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}
