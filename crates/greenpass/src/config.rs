use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RootError, RootResult};

/// Clock deviation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClockConfig {
    /// Local time may differ this much from server time before it counts as deviation.
    #[serde(default = "default_deviation_tolerance")]
    pub deviation_tolerance_seconds: u64,

    /// Evaluate validity windows at local time plus the known server offset.
    #[serde(default)]
    pub correct_deviation: bool,
}

fn default_deviation_tolerance() -> u64 {
    30
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            deviation_tolerance_seconds: default_deviation_tolerance(),
            correct_deviation: false,
        }
    }
}

/// Issuer-facing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuerSettings {
    /// Maximum age of the cached issuer config before it is stale.
    #[serde(default = "default_config_ttl")]
    pub config_ttl_seconds: u64,

    /// How long after its sample date a negative test still counts.
    #[serde(default = "default_test_validity_hours")]
    pub test_validity_hours: u64,
}

fn default_config_ttl() -> u64 {
    86_400
}

fn default_test_validity_hours() -> u64 {
    40
}

impl Default for IssuerSettings {
    fn default() -> Self {
        Self {
            config_ttl_seconds: default_config_ttl(),
            test_validity_hours: default_test_validity_hours(),
        }
    }
}

/// Top-level configuration for the greenpass holder.
///
/// Loaded from a TOML file (typically `~/.greenpass/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderConfig {
    /// Directory for the database, the secret key and the cached issuer config.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub clock: ClockConfig,

    #[serde(default)]
    pub issuer: IssuerSettings,
}

fn default_data_dir() -> PathBuf {
    dirs_or_default(".greenpass")
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl Default for HolderConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            clock: ClockConfig::default(),
            issuer: IssuerSettings::default(),
        }
    }
}

impl HolderConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> RootResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(RootError::Io)?;
        let config: HolderConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        std::fs::write(path, contents).map_err(RootError::Io)?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> RootResult<()> {
        if self.clock.deviation_tolerance_seconds == 0 {
            return Err(RootError::Config(
                "clock.deviation_tolerance_seconds must be > 0".into(),
            ));
        }
        if self.issuer.config_ttl_seconds == 0 {
            return Err(RootError::Config(
                "issuer.config_ttl_seconds must be > 0".into(),
            ));
        }
        if self.issuer.test_validity_hours == 0 {
            return Err(RootError::Config(
                "issuer.test_validity_hours must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("greenpass.db")
    }

    pub fn issuer_config_path(&self) -> PathBuf {
        self.data_dir.join("issuer_config.json")
    }

    /// Return the path to the default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".greenpass/config.toml")
    }
}
