use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

pub const CONFIG_PATH_VAR: &str = "PLN_CONFIG";

/// Runtime configuration for the staging node, read from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct PlnConfig {
    /// Root for harvest/processing/staged/restore directories. Relative paths
    /// resolve against `project_dir`.
    pub data_dir: PathBuf,
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,
    #[serde(default)]
    pub database_url: Option<String>,
    /// Hostname of this node. Journal URLs pointing back at it are rejected.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Maximum AU container size in kB.
    #[serde(default = "default_max_au_size")]
    pub max_au_size: i64,
    /// Deposits from journal versions newer than this are held.
    #[serde(default)]
    pub held_versions: Option<String>,
    /// Remove all on-disk artifacts once the archive confirms a deposit.
    #[serde(default)]
    pub remove_complete_deposits: bool,
    #[serde(default = "default_max_harvest_attempts")]
    pub max_harvest_attempts: i32,
    pub sword: SwordConfig,
    #[serde(default)]
    pub clamav: ClamavConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwordConfig {
    pub service_uri: String,
    /// UUID this node deposits on behalf of.
    pub staging_uuid: String,
    /// Base URL the archive uses to fetch staged packages.
    pub public_base_url: String,
    #[serde(default)]
    pub save_deposit_xml: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl SwordConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClamavConfig {
    #[serde(default = "default_clamd_socket")]
    pub socket_path: PathBuf,
    #[serde(default = "default_clamd_timeout")]
    pub timeout_secs: u64,
}

impl ClamavConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ClamavConfig {
    fn default() -> Self {
        Self {
            socket_path: default_clamd_socket(),
            timeout_secs: default_clamd_timeout(),
        }
    }
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_au_size() -> i64 {
    100_000_000
}

fn default_max_harvest_attempts() -> i32 {
    5
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    "PlnStagingBot 1.0".to_string()
}

fn default_clamd_socket() -> PathBuf {
    PathBuf::from("/var/run/clamav/clamd.ctl")
}

fn default_clamd_timeout() -> u64 {
    30
}

impl PlnConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| PipelineError::Config(err.to_string()))
    }

    /// Load configuration from `path`, or from the file named by `PLN_CONFIG`.
    /// `DATABASE_URL` (or `PLN_DATABASE_URL`) takes precedence over the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(std::env::var(CONFIG_PATH_VAR).map_err(|_| {
                PipelineError::Config(format!("{CONFIG_PATH_VAR} must be set or --config given"))
            })?),
        };
        let contents = std::fs::read_to_string(&path).map_err(|err| {
            PipelineError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&contents)?;

        if let Ok(url) =
            std::env::var("DATABASE_URL").or_else(|_| std::env::var("PLN_DATABASE_URL"))
        {
            config.database_url = Some(url);
        }

        Ok(config)
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            PipelineError::Config("DATABASE_URL (or PLN_DATABASE_URL) must be set".into())
        })
    }

    pub fn forbidden_hosts(&self) -> Vec<String> {
        self.hostname.iter().cloned().collect()
    }
}
