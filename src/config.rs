//! Declarative fleet configuration, loaded from YAML

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::{Instance, InstanceKind};
use crate::{Error, Result};

/// Connection settings for the Proxmox control plane.
///
/// Exactly one of the API-token pair or the password must be supplied;
/// the token pair takes priority when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxSettings {
    pub host: String,
    #[serde(default = "default_proxmox_port")]
    pub port: u16,
    #[serde(default = "default_proxmox_user")]
    pub user: String,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub token_secret: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub verify_ssl: bool,
    /// Per-request timeout in seconds
    #[serde(default = "default_proxmox_timeout")]
    pub timeout_secs: u64,
}

fn default_proxmox_port() -> u16 {
    8006
}

fn default_proxmox_user() -> String {
    "root@pam".to_string()
}

fn default_proxmox_timeout() -> u64 {
    30
}

impl ProxmoxSettings {
    /// True when both halves of the API-token pair are present
    pub fn has_token(&self) -> bool {
        self.token_id.is_some() && self.token_secret.is_some()
    }
}

/// Settings for a Docker-socket backed deployment.
///
/// Carried through from the declaration for socket-kind instances; no
/// lifecycle operation actuates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

fn default_socket_path() -> String {
    "/var/run/docker.sock".to_string()
}

/// The registry: every declared instance plus optional backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxmox: Option<ProxmoxSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<SocketSettings>,
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (i, instance) in self.instances.iter().enumerate() {
            if self.instances[..i].iter().any(|other| other.name == instance.name) {
                return Err(Error::Config(format!(
                    "duplicate instance name '{}'",
                    instance.name
                )));
            }
            if instance.kind != InstanceKind::Proxmox && instance.vm_id.is_some() {
                return Err(Error::Config(format!(
                    "instance '{}' declares vm_id but is of type {}",
                    instance.name, instance.kind
                )));
            }
            if instance.kind == InstanceKind::Proxmox && instance.vm_id.is_none() {
                tracing::warn!(
                    instance = %instance.name,
                    "proxmox instance has no vm_id; control-plane operations will be skipped"
                );
            }
        }
        Ok(())
    }
}
