//! Proxmox control-plane client
//!
//! Wraps the `api2/json` REST API for a single connection profile. The
//! client authenticates lazily on first use and caches the auth state for
//! its lifetime; every operation runs against the first node the control
//! plane reports and is wrapped in a bounded exponential-backoff retry.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::config::ProxmoxSettings;
use crate::models::InstanceStatus;
use crate::{Error, Result};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
const RETRY_CAP_DELAY: Duration = Duration::from_secs(10);

/// Raw status of a single VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmStatus {
    #[serde(default)]
    pub vmid: u32,
    #[serde(default = "unknown_string")]
    pub status: String,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default, rename = "mem")]
    pub memory: u64,
}

/// One row of the control plane's VM inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSummary {
    pub vmid: u32,
    #[serde(default = "unknown_string")]
    pub name: String,
    #[serde(default = "unknown_string")]
    pub status: String,
    #[serde(default)]
    pub node: String,
}

fn unknown_string() -> String {
    "unknown".to_string()
}

/// Seam for the manager: anything that can drive VM power state
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane {
    async fn query_status(&self, vmid: u32) -> Result<VmStatus>;
    async fn start(&self, vmid: u32) -> Result<bool>;
    async fn stop(&self, vmid: u32) -> Result<bool>;
    async fn restart(&self, vmid: u32) -> Result<bool>;
    async fn list_all(&self) -> Result<Vec<VmSummary>>;

    /// Lenient status lookup: maps the raw power state onto the closed
    /// status enum and collapses any failure to `Error`, swallowing the
    /// underlying cause entirely.
    async fn query_status_enum(&self, vmid: u32) -> InstanceStatus {
        match self.query_status(vmid).await {
            Ok(status) => InstanceStatus::from_power_state(&status.status),
            Err(_) => InstanceStatus::Error,
        }
    }
}

/// Cached authentication state
#[derive(Debug)]
enum Auth {
    /// API token, sent as an Authorization header on every request
    Token(String),
    /// Ticket from `POST /access/ticket` plus its CSRF token
    Ticket { cookie: String, csrf: String },
}

/// Envelope every Proxmox API response uses
#[derive(Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct NodeEntry {
    node: String,
}

#[derive(Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Debug)]
pub struct ProxmoxClient {
    settings: ProxmoxSettings,
    http: reqwest::Client,
    base_url: String,
    auth: OnceCell<Auth>,
}

impl ProxmoxClient {
    /// Build a client for one connection profile.
    ///
    /// Missing credentials are a fatal configuration error, raised here
    /// rather than on first use; they are never retried.
    pub fn new(settings: ProxmoxSettings) -> Result<Self> {
        if !settings.has_token() && settings.password.is_none() {
            return Err(Error::Config(
                "either token_id/token_secret or password must be provided".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        let base_url = format!("https://{}:{}/api2/json", settings.host, settings.port);

        Ok(Self {
            settings,
            http,
            base_url,
            auth: OnceCell::new(),
        })
    }

    /// Drop the cached auth state; the next call re-authenticates
    pub fn disconnect(&mut self) {
        let _ = self.auth.take();
    }

    async fn connect(&self) -> Result<&Auth> {
        self.auth
            .get_or_try_init(|| async {
                if self.settings.has_token() {
                    let header = token_header(
                        &self.settings.user,
                        self.settings.token_id.as_deref().unwrap_or_default(),
                        self.settings.token_secret.as_deref().unwrap_or_default(),
                    );
                    tracing::info!(host = %self.settings.host, "Using control-plane API token");
                    return Ok(Auth::Token(header));
                }

                // Password auth requires a ticket round-trip
                let response = self
                    .http
                    .post(format!("{}/access/ticket", self.base_url))
                    .form(&[
                        ("username", self.settings.user.as_str()),
                        (
                            "password",
                            self.settings.password.as_deref().unwrap_or_default(),
                        ),
                    ])
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(Error::ControlPlane(format!(
                        "ticket request failed with HTTP {}",
                        response.status()
                    )));
                }

                let ticket: ApiResponse<TicketData> = response.json().await?;
                tracing::info!(host = %self.settings.host, "Authenticated to control plane");
                Ok(Auth::Ticket {
                    cookie: format!("PVEAuthCookie={}", ticket.data.ticket),
                    csrf: ticket.data.csrf_token,
                })
            })
            .await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let auth = self.connect().await?;
        let mut request = self.http.get(format!("{}{}", self.base_url, path));
        request = match auth {
            Auth::Token(header) => request.header(reqwest::header::AUTHORIZATION, header.as_str()),
            Auth::Ticket { cookie, .. } => request.header(reqwest::header::COOKIE, cookie.as_str()),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::ControlPlane(format!(
                "GET {} returned HTTP {}",
                path,
                response.status()
            )));
        }

        let body: ApiResponse<T> = response.json().await?;
        Ok(body.data)
    }

    async fn post(&self, path: &str) -> Result<()> {
        let auth = self.connect().await?;
        let mut request = self.http.post(format!("{}{}", self.base_url, path));
        request = match auth {
            Auth::Token(header) => request.header(reqwest::header::AUTHORIZATION, header.as_str()),
            Auth::Ticket { cookie, csrf } => request
                .header(reqwest::header::COOKIE, cookie.as_str())
                .header("CSRFPreventionToken", csrf.as_str()),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::ControlPlane(format!(
                "POST {} returned HTTP {}",
                path,
                response.status()
            )));
        }
        Ok(())
    }

    /// The client does not address nodes explicitly; every per-VM call
    /// goes to the first node the control plane reports.
    async fn first_node(&self) -> Result<String> {
        let nodes: Vec<NodeEntry> = self.get("/nodes").await?;
        nodes
            .into_iter()
            .next()
            .map(|entry| entry.node)
            .ok_or_else(|| Error::ControlPlane("control plane reported no nodes".to_string()))
    }

    async fn query_status_once(&self, vmid: u32) -> Result<VmStatus> {
        let node = self.first_node().await?;
        let mut status: VmStatus = self
            .get(&format!("/nodes/{}/qemu/{}/status/current", node, vmid))
            .await?;
        status.vmid = vmid;
        Ok(status)
    }

    async fn power_action_once(&self, vmid: u32, action: &str) -> Result<bool> {
        let node = self.first_node().await?;
        self.post(&format!("/nodes/{}/qemu/{}/status/{}", node, vmid, action))
            .await?;
        tracing::info!(vmid, action, "Control-plane power action issued");
        Ok(true)
    }

    async fn list_all_once(&self) -> Result<Vec<VmSummary>> {
        let nodes: Vec<NodeEntry> = self.get("/nodes").await?;
        let mut vms = Vec::new();
        for entry in nodes {
            let mut on_node: Vec<VmSummary> =
                self.get(&format!("/nodes/{}/qemu", entry.node)).await?;
            for vm in &mut on_node {
                vm.node = entry.node.clone();
            }
            vms.append(&mut on_node);
        }
        Ok(vms)
    }
}

#[async_trait]
impl ControlPlane for ProxmoxClient {
    async fn query_status(&self, vmid: u32) -> Result<VmStatus> {
        with_retry("query_status", || self.query_status_once(vmid)).await
    }

    async fn start(&self, vmid: u32) -> Result<bool> {
        with_retry("start", || self.power_action_once(vmid, "start")).await
    }

    async fn stop(&self, vmid: u32) -> Result<bool> {
        with_retry("stop", || self.power_action_once(vmid, "stop")).await
    }

    async fn restart(&self, vmid: u32) -> Result<bool> {
        with_retry("restart", || self.power_action_once(vmid, "restart")).await
    }

    async fn list_all(&self) -> Result<Vec<VmSummary>> {
        with_retry("list_all", || self.list_all_once()).await
    }
}

fn token_header(user: &str, token_id: &str, token_secret: &str) -> String {
    format!("PVEAPIToken={}!{}={}", user, token_id, token_secret)
}

/// Bounded retry, uniform across failure kinds: up to three attempts with
/// exponential backoff from two seconds, capped at ten. The last failure
/// propagates to the caller.
async fn with_retry<T, F, Fut>(op: &'static str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    let mut delay = RETRY_BASE_DELAY;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= RETRY_ATTEMPTS {
                    return Err(e);
                }
                tracing::warn!(op, attempt, error = %e, "Control-plane call failed; retrying");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, RETRY_CAP_DELAY);
                attempt += 1;
            }
        }
    }
}
