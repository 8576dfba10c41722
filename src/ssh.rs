//! SSH remote execution
//!
//! Each managed host follows the same deployment convention: the service
//! runs as a docker-compose project in `~/app`, with the container and
//! service both named `app`. Lifecycle commands and log retrieval are
//! canned command strings executed over a short-lived SSH session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};

use crate::models::Instance;
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote deployment convention
const COMPOSE_DIR: &str = "~/app";
const SERVICE: &str = "app";

/// Key files tried, in order, under `~/.ssh`
const DEFAULT_KEYS: &[&str] = &["id_ed25519", "id_rsa", "id_ecdsa"];

/// Captured result of one remote command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the channel closed without reporting a status
    pub exit_code: Option<u32>,
}

fn compose_command(verb: &str) -> String {
    format!("cd {} && docker-compose {}", COMPOSE_DIR, verb)
}

fn status_command() -> String {
    format!("docker ps --filter name={} --format '{{{{.Status}}}}'", SERVICE)
}

fn logs_command(lines: u32) -> String {
    format!("docker-compose logs --tail={} {}", lines, SERVICE)
}

fn version_command() -> String {
    format!("docker exec {} {} --version 2>/dev/null || echo 'unknown'", SERVICE, SERVICE)
}

/// `docker ps` prints a status starting with "Up" for running containers
fn looks_up(stdout: &str) -> bool {
    stdout.contains("Up")
}

fn version_from(output: &CommandOutput) -> Option<String> {
    if output.exit_code == Some(0) {
        Some(output.stdout.trim().to_string())
    } else {
        None
    }
}

// All remote hosts sit behind the operator's own network; unknown host
// keys are added automatically, the same policy as `accept-new`.
struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

fn load_default_key() -> Result<KeyPair> {
    let ssh_dir = ssh_dir()?;
    for name in DEFAULT_KEYS {
        let path = ssh_dir.join(name);
        if path.exists() {
            return Ok(russh_keys::load_secret_key(&path, None)?);
        }
    }
    Err(Error::Ssh(format!(
        "no usable private key in {}",
        ssh_dir.display()
    )))
}

fn ssh_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".ssh"))
        .ok_or_else(|| Error::Ssh("cannot determine home directory".to_string()))
}

/// One SSH session to one instance's host.
///
/// The connection is established lazily on the first command and cached
/// until `close`, which is idempotent and safe without a session.
pub struct SshSession {
    name: String,
    host: String,
    port: u16,
    user: String,
    handle: Option<client::Handle<ClientHandler>>,
}

impl SshSession {
    pub fn for_instance(instance: &Instance) -> Self {
        Self {
            name: instance.name.clone(),
            host: instance.host.clone(),
            port: instance.port,
            user: instance.user.clone(),
            handle: None,
        }
    }

    async fn connect(&mut self) -> Result<&mut client::Handle<ClientHandler>> {
        if self.handle.is_none() {
            let addr = format!("{}:{}", self.host, self.port);
            let config = Arc::new(client::Config::default());

            let mut handle = tokio::time::timeout(
                CONNECT_TIMEOUT,
                client::connect(config, addr.as_str(), ClientHandler),
            )
            .await
            .map_err(|_| Error::Ssh(format!("connection to {} timed out", addr)))?
            .map_err(|e| {
                tracing::error!(instance = %self.name, error = %e, "SSH connect failed");
                e
            })?;

            let key = load_default_key()?;
            let authed = handle
                .authenticate_publickey(self.user.clone(), Arc::new(key))
                .await?;
            if !authed {
                return Err(Error::Ssh(format!(
                    "public key rejected by {}@{}",
                    self.user, addr
                )));
            }

            tracing::info!(instance = %self.name, "Connected via SSH");
            self.handle = Some(handle);
        }

        self.handle
            .as_mut()
            .ok_or_else(|| Error::Ssh("session not established".to_string()))
    }

    /// Run one command, draining stdout/stderr and capturing the exit code
    pub async fn run(&mut self, command: &str) -> Result<CommandOutput> {
        let name = self.name.clone();
        let handle = self.connect().await?;

        let mut channel = handle.channel_open_session().await.map_err(|e| {
            tracing::error!(instance = %name, error = %e, "Failed to open SSH channel");
            Error::from(e)
        })?;
        channel.exec(true, command).await.map_err(|e| {
            tracing::error!(instance = %name, error = %e, "Failed to execute command");
            Error::from(e)
        })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    /// Close the session. Safe to call repeatedly or with no session open.
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
        }
    }

    /// True iff the service container reports an "Up" status.
    /// Execution failures are swallowed and reported as not running.
    pub async fn check_running(&mut self) -> bool {
        match self.run(&status_command()).await {
            Ok(output) => looks_up(&output.stdout),
            Err(e) => {
                tracing::error!(instance = %self.name, error = %e, "Failed to check service status");
                false
            }
        }
    }

    pub async fn start_service(&mut self) -> bool {
        self.lifecycle("up -d").await
    }

    pub async fn stop_service(&mut self) -> bool {
        self.lifecycle("stop").await
    }

    pub async fn restart_service(&mut self) -> bool {
        self.lifecycle("restart").await
    }

    // True on successful execution; the remote exit code is not checked.
    async fn lifecycle(&mut self, verb: &str) -> bool {
        match self.run(&compose_command(verb)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    instance = %self.name,
                    verb,
                    error = %e,
                    "Service lifecycle command failed"
                );
                false
            }
        }
    }

    /// Tail the service log. Returns a readable error string on failure
    /// rather than an error.
    pub async fn fetch_logs(&mut self, lines: u32) -> String {
        match self.run(&logs_command(lines)).await {
            Ok(output) => output.stdout,
            Err(e) => {
                tracing::error!(instance = %self.name, error = %e, "Failed to fetch logs");
                format!("Error: {}", e)
            }
        }
    }

    /// Probe the service version inside the container.
    /// Trimmed stdout iff the remote exit code was zero.
    pub async fn fetch_version(&mut self) -> Option<String> {
        match self.run(&version_command()).await {
            Ok(output) => version_from(&output),
            Err(_) => None,
        }
    }
}

/// Seam for the manager: lifecycle and log retrieval over a scoped session
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteBackend {
    async fn start(&self, instance: &Instance) -> bool;
    async fn stop(&self, instance: &Instance) -> bool;
    async fn restart(&self, instance: &Instance) -> bool;
    async fn fetch_logs(&self, instance: &Instance, lines: u32) -> String;
}

/// Production backend: one SSH session per operation, closed on every path
#[derive(Debug, Default)]
pub struct SshBackend;

impl SshBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteBackend for SshBackend {
    async fn start(&self, instance: &Instance) -> bool {
        let mut session = SshSession::for_instance(instance);
        let ok = session.start_service().await;
        session.close().await;
        ok
    }

    async fn stop(&self, instance: &Instance) -> bool {
        let mut session = SshSession::for_instance(instance);
        let ok = session.stop_service().await;
        session.close().await;
        ok
    }

    async fn restart(&self, instance: &Instance) -> bool {
        let mut session = SshSession::for_instance(instance);
        let ok = session.restart_service().await;
        session.close().await;
        ok
    }

    async fn fetch_logs(&self, instance: &Instance, lines: u32) -> String {
        let mut session = SshSession::for_instance(instance);
        let logs = session.fetch_logs(lines).await;
        session.close().await;
        logs
    }
}
