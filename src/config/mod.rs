use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::env;

const DEFAULT_API_BASE: &str = "https://example.com/version-control-api";
const DEFAULT_DOWNLOAD_BASE: &str = "https://example.com/download/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} must be an http(s) URL, got {value:?}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("unable to resolve install directory {}: {source}", .path.display())]
    InstallDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the version service and the archives live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base: String,
    pub download_base: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdaterConfig {
    pub api_base: String,
    pub download_base: String,
    pub state_file: PathBuf,
    pub install_dir: PathBuf,
    pub staging_dir: Option<PathBuf>,
    pub lookup_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub require_checksum: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            download_base: DEFAULT_DOWNLOAD_BASE.into(),
            state_file: env::default_state_file(),
            install_dir: env::default_install_dir(),
            staging_dir: None,
            lookup_timeout_secs: 30,
            download_timeout_secs: 30 * 60,
            require_checksum: false,
        }
    }
}

impl UpdaterConfig {
    /// Read a JSON config file; keys left out keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("config: loaded {}", path.display());
        Ok(config)
    }

    /// Check endpoint URLs and make the install directory absolute.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        check_url("api_base", &self.api_base)?;
        check_url("download_base", &self.download_base)?;
        if self.install_dir.is_relative() {
            self.install_dir =
                std::path::absolute(&self.install_dir).map_err(|source| ConfigError::InstallDir {
                    path: self.install_dir.clone(),
                    source,
                })?;
        }
        Ok(self)
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            api_base: self.api_base.clone(),
            download_base: self.download_base.clone(),
        }
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs.max(1))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs.max(1))
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let valid = reqwest::Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            field,
            value: value.to_owned(),
        })
    }
}
