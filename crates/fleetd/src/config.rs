//! Daemon configuration, loaded from a TOML file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use fleet_controller::{ControllerConfig, StaticInstance};

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Data directory for persistent state.
    pub data_dir: PathBuf,
    /// Bind address for the heartbeat listener.
    #[serde(default = "default_heartbeat_bind")]
    pub heartbeat_bind: String,
    pub provisioner: ProvisionerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub static_instances: Vec<StaticInstance>,
}

#[derive(Debug, Deserialize)]
pub struct ProvisionerConfig {
    /// Base URL of the provisioning panel, e.g. `http://panel:8080`.
    pub base_url: String,
    /// Bearer token.
    pub token: String,
    #[serde(default = "default_provisioner_timeout")]
    pub timeout_secs: u64,
}

fn default_heartbeat_bind() -> String {
    "0.0.0.0:9050".to_string()
}

fn default_provisioner_timeout() -> u64 {
    10
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}
