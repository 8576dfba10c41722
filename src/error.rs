//! Error types for fleetctl

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("SSH transport error: {0}")]
    SshTransport(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    SshKey(#[from] russh_keys::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is an unknown-instance error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::InstanceNotFound(_))
    }
}
