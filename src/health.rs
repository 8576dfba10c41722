//! HTTP health probing
//!
//! Each instance advertises `GET /health` on its own port, optionally
//! returning a JSON object with a `version` field.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;

use crate::models::{Instance, InstanceStatus};

/// Default probe timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a single health probe.
///
/// A failed probe is a normal classification result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub version: Option<String>,
}

impl HealthReport {
    fn unhealthy() -> Self {
        Self { healthy: false, version: None }
    }

    /// Stamp this report onto an instance.
    ///
    /// A successful probe forces status to Running and clears the error;
    /// a failed probe forces status to Error, whatever the control plane
    /// reported beforehand.
    pub fn apply_to(&self, instance: &mut Instance) {
        instance.health_check_passed = self.healthy;
        instance.version = self.version.clone();
        instance.last_health_check = Some(Utc::now());
        if self.healthy {
            instance.status = InstanceStatus::Running;
            instance.error_message = None;
        } else {
            instance.status = InstanceStatus::Error;
            instance.error_message = Some("Health check failed".to_string());
        }
    }
}

/// Seam for the manager: anything that can classify an instance's health
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HealthCheck {
    async fn probe(&self, instance: &Instance) -> HealthReport;
}

/// Probes instance health endpoints over plain HTTP
pub struct HealthProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthProber {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Probe every instance in declaration order, stamping results in place.
    /// One instance's failure never stops the rest.
    pub async fn probe_all(&self, instances: &mut [Instance]) {
        for instance in instances.iter_mut() {
            let report = self.probe(instance).await;
            report.apply_to(instance);
        }
    }
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthCheck for HealthProber {
    async fn probe(&self, instance: &Instance) -> HealthReport {
        let url = format!("http://{}:{}/health", instance.host, instance.health_port);

        let response = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(instance = %instance.name, "Health check timed out");
                return HealthReport::unhealthy();
            }
            Err(e) if e.is_connect() => {
                tracing::warn!(instance = %instance.name, "Health endpoint unreachable");
                return HealthReport::unhealthy();
            }
            Err(e) => {
                tracing::error!(instance = %instance.name, error = %e, "Health check error");
                return HealthReport::unhealthy();
            }
        };

        if response.status() != StatusCode::OK {
            tracing::warn!(
                instance = %instance.name,
                status = %response.status(),
                "Health check failed"
            );
            return HealthReport::unhealthy();
        }

        // A 200 means healthy even when the body is not valid JSON
        let version = match response.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("version")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            Err(_) => "unknown".to_string(),
        };

        HealthReport {
            healthy: true,
            version: Some(version),
        }
    }
}
