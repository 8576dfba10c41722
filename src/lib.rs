//! Fleet Control
//!
//! A library and CLI for managing a fleet of app deployments spread
//! across Proxmox VMs, Docker hosts, and plain processes.
//!
//! # Key Features
//!
//! - **One registry** - Every deployment declared in a single YAML file
//! - **Mixed backends** - Proxmox REST for VM power state, SSH + compose
//!   for services, plain HTTP for health
//! - **Honest status** - Control-plane state and a live health probe,
//!   combined per refresh
//!
//! # Example
//!
//! ```no_run
//! use fleetctl::{Config, InstanceManager};
//!
//! # #[tokio::main]
//! # async fn main() -> fleetctl::Result<()> {
//! let config = Config::load("config.yaml")?;
//! let mut manager = InstanceManager::new(config)?;
//!
//! manager.refresh_all().await;
//! for instance in manager.instances() {
//!     println!("{}: {}", instance.name, instance.status);
//! }
//!
//! manager.restart_instance("app-prod").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod models;
pub mod proxmox;
pub mod ssh;

pub use config::{Config, ProxmoxSettings};
pub use error::{Error, Result};
pub use health::{HealthProber, HealthReport};
pub use manager::{Action, InstanceManager};
pub use models::{Instance, InstanceKind, InstanceStatus};
pub use proxmox::{ProxmoxClient, VmSummary};
