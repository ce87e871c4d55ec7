//! Configuration management for the X-Ray creator.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application name used for config directory.
const APP_NAME: &str = "XRayCreator";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote host settings.
    pub remote: RemoteConfig,

    /// Pipeline behavior settings.
    pub pipeline: PipelineConfig,

    /// Attached device settings.
    pub device: DeviceConfig,

    /// Selectors used to read terms off the remote book page.
    pub xray: XRayConfig,
}

/// Remote lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Store host searched by title and author.
    pub store_base_url: String,

    /// Metadata host searched by ASIN.
    pub metadata_base_url: String,

    /// Pause before reconnecting after a transport failure, in milliseconds.
    pub retry_delay_ms: u64,

    /// Maximum redirects followed for a single fetch.
    pub max_redirects: u32,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            store_base_url: "https://www.amazon.com".to_string(),
            metadata_base_url: "https://www.shelfari.com".to_string(),
            retry_delay_ms: 1000,
            max_redirects: 10,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; WOW64; rv:46.0) Gecko/20100101 Firefox/46.0"
                .to_string(),
        }
    }
}

/// Pipeline behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Include spoiler terms when reading the remote book page.
    pub spoilers: bool,

    /// Copy finished X-Ray files to an attached device.
    pub send_to_device: bool,

    /// Build a missing local X-Ray file during a device send.
    pub create_missing_index: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            spoilers: false,
            send_to_device: true,
            create_missing_index: true,
        }
    }
}

/// Attached device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Directories whose children are mounted removable volumes.
    pub mount_roots: Vec<PathBuf>,

    /// Directory on the device that holds the account marker file.
    pub marker_dir: PathBuf,

    /// Substring of the marker file name.
    pub marker_token: String,

    /// Directory on the device that holds books.
    pub documents_dir: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mount_roots: default_mount_roots(),
            marker_dir: PathBuf::from("system").join(".mrch"),
            marker_token: "amzn1_account".to_string(),
            documents_dir: PathBuf::from("documents"),
        }
    }
}

#[cfg(windows)]
fn default_mount_roots() -> Vec<PathBuf> {
    // drive letters are volumes themselves, see device::MountRootVolumes
    Vec::new()
}

#[cfg(not(windows))]
fn default_mount_roots() -> Vec<PathBuf> {
    let user = std::env::var("USER").unwrap_or_default();
    let mut roots = vec![PathBuf::from("/Volumes")];
    if !user.is_empty() {
        roots.push(PathBuf::from("/media").join(&user));
        roots.push(PathBuf::from("/run/media").join(&user));
    }
    roots.push(PathBuf::from("/media"));
    roots
}

/// Term extraction configuration for the bundled X-Ray builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XRayConfig {
    /// Selector matching one character entry on the book page.
    pub character_selector: String,

    /// Selector matching one term entry on the book page.
    pub term_selector: String,

    /// Selector for the name inside an entry.
    pub name_selector: String,

    /// Selector for the description inside an entry.
    pub description_selector: String,

    /// Class marking an entry as a spoiler.
    pub spoiler_class: String,
}

impl Default for XRayConfig {
    fn default() -> Self {
        Self {
            character_selector: "#WikiModule_Characters li".to_string(),
            term_selector: "#WikiModule_Settings li, #WikiModule_Glossary li".to_string(),
            name_selector: ".ItemName, a".to_string(),
            description_selector: ".ItemDesc".to_string(),
            spoiler_class: "spoiler".to_string(),
        }
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("remote.store_base_url", &self.remote.store_base_url),
            ("remote.metadata_base_url", &self.remote.metadata_base_url),
        ] {
            let url = url::Url::parse(value).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
            if url.host_str().is_none() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must include a host".to_string(),
                });
            }
        }

        for (key, value) in [
            ("xray.character_selector", &self.xray.character_selector),
            ("xray.term_selector", &self.xray.term_selector),
            ("xray.name_selector", &self.xray.name_selector),
            ("xray.description_selector", &self.xray.description_selector),
        ] {
            if scraper::Selector::parse(value).is_err() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{}' is not a valid CSS selector", value),
                });
            }
        }

        if self.device.marker_token.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "device.marker_token".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}
