//! Instance model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an instance is managed, and therefore which backend actuates it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    /// Proxmox VM, driven through the control-plane REST API
    Proxmox,
    /// Docker host, driven through SSH + compose
    Docker,
    /// Local process on the remote host, driven through SSH
    Local,
    /// Declared against a Docker socket backend; not actuated
    Socket,
}

impl std::fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceKind::Proxmox => write!(f, "proxmox"),
            InstanceKind::Docker => write!(f, "docker"),
            InstanceKind::Local => write!(f, "local"),
            InstanceKind::Socket => write!(f, "socket"),
        }
    }
}

/// Last-observed runtime state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Unknown,
    Running,
    Stopped,
    Error,
    Starting,
    Stopping,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Unknown => write!(f, "unknown"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Stopped => write!(f, "stopped"),
            InstanceStatus::Error => write!(f, "error"),
            InstanceStatus::Starting => write!(f, "starting"),
            InstanceStatus::Stopping => write!(f, "stopping"),
        }
    }
}

impl InstanceStatus {
    /// Map a raw power-state string from the control plane.
    /// Anything other than exactly "running" or "stopped" is Unknown.
    pub fn from_power_state(state: &str) -> Self {
        match state {
            "running" => InstanceStatus::Running,
            "stopped" => InstanceStatus::Stopped,
            _ => InstanceStatus::Unknown,
        }
    }
}

/// One managed deployment.
///
/// Declared fields come from the configuration file; runtime fields are
/// observed per refresh and never serialized back into the declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Unique name within the registry
    pub name: String,
    /// Network host
    pub host: String,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// SSH user
    #[serde(default = "default_user")]
    pub user: String,
    /// Declared management kind
    #[serde(rename = "type", default = "default_kind")]
    pub kind: InstanceKind,
    /// Control-plane VM identifier; only meaningful for proxmox instances
    #[serde(default)]
    pub vm_id: Option<u32>,
    /// Port of the instance's HTTP health endpoint
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// Last-observed status
    #[serde(skip)]
    pub status: InstanceStatus,
    /// When the last health probe ran
    #[serde(skip)]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Whether the last health probe succeeded
    #[serde(skip)]
    pub health_check_passed: bool,
    /// Version reported by the last successful probe
    #[serde(skip)]
    pub version: Option<String>,
    /// Last error observed for this instance
    #[serde(skip)]
    pub error_message: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

fn default_kind() -> InstanceKind {
    InstanceKind::Proxmox
}

fn default_health_port() -> u16 {
    8080
}

impl Instance {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: default_ssh_port(),
            user: default_user(),
            kind: default_kind(),
            vm_id: None,
            health_port: default_health_port(),
            description: String::new(),
            status: InstanceStatus::Unknown,
            last_health_check: None,
            health_check_passed: false,
            version: None,
            error_message: None,
        }
    }

    pub fn with_kind(mut self, kind: InstanceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_vm_id(mut self, vm_id: u32) -> Self {
        self.vm_id = Some(vm_id);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_health_port(mut self, port: u16) -> Self {
        self.health_port = port;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
