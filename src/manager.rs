//! Fleet orchestration
//!
//! `InstanceManager` owns the registry and routes every operation to the
//! right backend: the Proxmox control plane for VM power state, SSH for
//! compose-managed services, and the HTTP prober for health. Status
//! refresh runs the control-plane query first and the health probe
//! second; the probe's verdict always lands last.

use crate::config::Config;
use crate::health::{HealthCheck, HealthProber};
use crate::models::{Instance, InstanceKind, InstanceStatus};
use crate::proxmox::{ControlPlane, ProxmoxClient, VmSummary};
use crate::ssh::{RemoteBackend, SshBackend};
use crate::{Error, Result};

/// Lifecycle action dispatched against an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Start => write!(f, "start"),
            Action::Stop => write!(f, "stop"),
            Action::Restart => write!(f, "restart"),
        }
    }
}

pub struct InstanceManager<C = ProxmoxClient, H = HealthProber, R = SshBackend> {
    config: Config,
    control_plane: Option<C>,
    prober: H,
    remote: R,
}

impl InstanceManager {
    /// Build a manager with the production backends.
    ///
    /// The control-plane client exists only when the configuration
    /// carries a `proxmox` section; without one, VM operations degrade
    /// to no-ops rather than errors.
    pub fn new(config: Config) -> Result<Self> {
        let control_plane = match &config.proxmox {
            Some(settings) => Some(ProxmoxClient::new(settings.clone())?),
            None => None,
        };
        Ok(Self::with_backends(
            config,
            control_plane,
            HealthProber::new(),
            SshBackend::new(),
        ))
    }
}

impl<C, H, R> InstanceManager<C, H, R>
where
    C: ControlPlane + Sync,
    H: HealthCheck + Sync,
    R: RemoteBackend + Sync,
{
    pub fn with_backends(config: Config, control_plane: Option<C>, prober: H, remote: R) -> Self {
        Self {
            config,
            control_plane,
            prober,
            remote,
        }
    }

    pub fn instances(&self) -> &[Instance] {
        &self.config.instances
    }

    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.config.instances.iter().find(|i| i.name == name)
    }

    fn resolve(&self, name: &str) -> Result<&Instance> {
        self.get(name)
            .ok_or_else(|| Error::InstanceNotFound(name.to_string()))
    }

    /// Register an instance at runtime. Uniqueness is enforced at
    /// configuration load, not here.
    pub fn add_instance(&mut self, instance: Instance) {
        tracing::info!(instance = %instance.name, kind = %instance.kind, "Instance registered");
        self.config.instances.push(instance);
    }

    /// Remove an instance by name; false when no such instance exists
    pub fn remove_instance(&mut self, name: &str) -> bool {
        let before = self.config.instances.len();
        self.config.instances.retain(|i| i.name != name);
        let removed = self.config.instances.len() < before;
        if removed {
            tracing::info!(instance = %name, "Instance removed");
        }
        removed
    }

    /// Refresh one instance's observed state
    pub async fn refresh_status(&mut self, name: &str) -> Result<()> {
        let control_plane = self.control_plane.as_ref();
        let prober = &self.prober;
        let instance = self
            .config
            .instances
            .iter_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::InstanceNotFound(name.to_string()))?;
        Self::refresh_one(control_plane, prober, instance).await;
        Ok(())
    }

    /// Refresh every instance in declaration order
    pub async fn refresh_all(&mut self) {
        let control_plane = self.control_plane.as_ref();
        let prober = &self.prober;
        for instance in self.config.instances.iter_mut() {
            Self::refresh_one(control_plane, prober, instance).await;
        }
    }

    async fn refresh_one(control_plane: Option<&C>, prober: &H, instance: &mut Instance) {
        if instance.kind == InstanceKind::Proxmox {
            if let (Some(plane), Some(vmid)) = (control_plane, instance.vm_id) {
                match plane.query_status(vmid).await {
                    Ok(status) => {
                        instance.status = InstanceStatus::from_power_state(&status.status);
                        instance.error_message = None;
                    }
                    Err(e) => {
                        tracing::warn!(instance = %instance.name, error = %e, "Status query failed");
                        instance.status = InstanceStatus::Error;
                        instance.error_message = Some(e.to_string());
                    }
                }
            }
        }

        // The probe has the last word, even over a control-plane report
        // of a cleanly stopped VM.
        let report = prober.probe(instance).await;
        report.apply_to(instance);
    }

    pub async fn start_instance(&self, name: &str) -> Result<bool> {
        self.dispatch(name, Action::Start).await
    }

    pub async fn stop_instance(&self, name: &str) -> Result<bool> {
        self.dispatch(name, Action::Stop).await
    }

    pub async fn restart_instance(&self, name: &str) -> Result<bool> {
        self.dispatch(name, Action::Restart).await
    }

    /// Route a lifecycle action to the backend owning the instance.
    ///
    /// Backend failures are reported as `Ok(false)`; only an unknown
    /// instance name is an error.
    pub async fn dispatch(&self, name: &str, action: Action) -> Result<bool> {
        let instance = self.resolve(name)?;
        tracing::info!(instance = %name, action = %action, kind = %instance.kind, "Dispatching action");

        match instance.kind {
            InstanceKind::Proxmox => {
                let vmid = match instance.vm_id {
                    Some(vmid) => vmid,
                    None => {
                        tracing::warn!(instance = %name, "No vm_id declared; action skipped");
                        return Ok(false);
                    }
                };
                let plane = match self.control_plane.as_ref() {
                    Some(plane) => plane,
                    None => {
                        tracing::warn!(instance = %name, "No control plane configured; action skipped");
                        return Ok(false);
                    }
                };
                let result = match action {
                    Action::Start => plane.start(vmid).await,
                    Action::Stop => plane.stop(vmid).await,
                    Action::Restart => plane.restart(vmid).await,
                };
                match result {
                    Ok(ok) => Ok(ok),
                    Err(e) => {
                        tracing::error!(
                            instance = %name,
                            action = %action,
                            error = %e,
                            "Control-plane action failed"
                        );
                        Ok(false)
                    }
                }
            }
            InstanceKind::Docker | InstanceKind::Local => {
                let ok = match action {
                    Action::Start => self.remote.start(instance).await,
                    Action::Stop => self.remote.stop(instance).await,
                    Action::Restart => self.remote.restart(instance).await,
                };
                Ok(ok)
            }
            InstanceKind::Socket => {
                tracing::warn!(instance = %name, "Socket instances have no lifecycle actions");
                Ok(false)
            }
        }
    }

    /// Tail an instance's service log over SSH, regardless of kind
    pub async fn fetch_logs(&self, name: &str, lines: u32) -> Result<String> {
        let instance = self.resolve(name)?;
        Ok(self.remote.fetch_logs(instance, lines).await)
    }

    /// Full VM inventory from the control plane; empty without one
    pub async fn list_vms(&self) -> Result<Vec<VmSummary>> {
        match self.control_plane.as_ref() {
            Some(plane) => plane.list_all().await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthReport, MockHealthCheck};
    use crate::proxmox::{MockControlPlane, VmStatus};
    use crate::ssh::MockRemoteBackend;

    fn vm_status(state: &str) -> VmStatus {
        VmStatus {
            vmid: 100,
            status: state.to_string(),
            uptime: 0,
            cpu: 0.0,
            memory: 0,
        }
    }

    fn healthy(version: &str) -> HealthReport {
        HealthReport {
            healthy: true,
            version: Some(version.to_string()),
        }
    }

    fn unhealthy() -> HealthReport {
        HealthReport {
            healthy: false,
            version: None,
        }
    }

    fn proxmox_instance() -> Instance {
        Instance::new("vm-1", "192.168.1.50").with_vm_id(100)
    }

    fn docker_instance() -> Instance {
        Instance::new("box-1", "192.168.1.60").with_kind(InstanceKind::Docker)
    }

    fn manager_with(
        instances: Vec<Instance>,
        control_plane: Option<MockControlPlane>,
        prober: MockHealthCheck,
        remote: MockRemoteBackend,
    ) -> InstanceManager<MockControlPlane, MockHealthCheck, MockRemoteBackend> {
        let config = Config {
            instances,
            proxmox: None,
            socket: None,
        };
        InstanceManager::with_backends(config, control_plane, prober, remote)
    }

    #[tokio::test]
    async fn test_refresh_unknown_name_is_not_found() {
        let mut manager = manager_with(
            vec![],
            None,
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        let err = manager.refresh_status("ghost").await.unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound(_)));
    }

    #[tokio::test]
    async fn test_refresh_running_vm_with_healthy_probe() {
        let mut plane = MockControlPlane::new();
        plane
            .expect_query_status()
            .returning(|_| Ok(vm_status("running")));
        let mut prober = MockHealthCheck::new();
        prober.expect_probe().returning(|_| healthy("1.2.0"));

        let mut manager = manager_with(
            vec![proxmox_instance()],
            Some(plane),
            prober,
            MockRemoteBackend::new(),
        );
        manager.refresh_status("vm-1").await.unwrap();

        let instance = manager.get("vm-1").unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
        assert!(instance.health_check_passed);
        assert_eq!(instance.version.as_deref(), Some("1.2.0"));
        assert!(instance.error_message.is_none());
    }

    #[tokio::test]
    async fn test_health_failure_masks_control_plane_stopped_status() {
        // A stopped VM with an unreachable health endpoint surfaces as
        // Error, not Stopped; the probe verdict wins.
        let mut plane = MockControlPlane::new();
        plane
            .expect_query_status()
            .returning(|_| Ok(vm_status("stopped")));
        let mut prober = MockHealthCheck::new();
        prober.expect_probe().returning(|_| unhealthy());

        let mut manager = manager_with(
            vec![proxmox_instance()],
            Some(plane),
            prober,
            MockRemoteBackend::new(),
        );
        manager.refresh_status("vm-1").await.unwrap();

        let instance = manager.get("vm-1").unwrap();
        assert_eq!(instance.status, InstanceStatus::Error);
        assert_eq!(instance.error_message.as_deref(), Some("Health check failed"));
    }

    #[tokio::test]
    async fn test_healthy_probe_overrides_control_plane_failure() {
        let mut plane = MockControlPlane::new();
        plane
            .expect_query_status()
            .returning(|_| Err(Error::ControlPlane("unreachable".to_string())));
        let mut prober = MockHealthCheck::new();
        prober.expect_probe().returning(|_| healthy("2.0"));

        let mut manager = manager_with(
            vec![proxmox_instance()],
            Some(plane),
            prober,
            MockRemoteBackend::new(),
        );
        manager.refresh_status("vm-1").await.unwrap();

        let instance = manager.get("vm-1").unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
        assert!(instance.error_message.is_none());
    }

    #[tokio::test]
    async fn test_refresh_docker_skips_control_plane() {
        let mut plane = MockControlPlane::new();
        plane.expect_query_status().never();
        let mut prober = MockHealthCheck::new();
        prober.expect_probe().returning(|_| healthy("1.0"));

        let mut manager = manager_with(
            vec![docker_instance()],
            Some(plane),
            prober,
            MockRemoteBackend::new(),
        );
        manager.refresh_status("box-1").await.unwrap();
        assert_eq!(
            manager.get("box-1").unwrap().status,
            InstanceStatus::Running
        );
    }

    #[tokio::test]
    async fn test_refresh_all_covers_every_instance() {
        let mut plane = MockControlPlane::new();
        plane
            .expect_query_status()
            .times(1)
            .returning(|_| Ok(vm_status("running")));
        let mut prober = MockHealthCheck::new();
        prober.expect_probe().times(2).returning(|_| healthy("1.0"));

        let mut manager = manager_with(
            vec![proxmox_instance(), docker_instance()],
            Some(plane),
            prober,
            MockRemoteBackend::new(),
        );
        manager.refresh_all().await;

        assert!(manager
            .instances()
            .iter()
            .all(|i| i.status == InstanceStatus::Running));
    }

    #[tokio::test]
    async fn test_dispatch_start_routes_proxmox_to_control_plane() {
        let mut plane = MockControlPlane::new();
        plane
            .expect_start()
            .withf(|vmid| *vmid == 100)
            .times(1)
            .returning(|_| Ok(true));

        let manager = manager_with(
            vec![proxmox_instance()],
            Some(plane),
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        assert!(manager.start_instance("vm-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dispatch_routes_docker_to_remote() {
        let mut remote = MockRemoteBackend::new();
        remote.expect_restart().returning(|_| true);

        let manager = manager_with(
            vec![docker_instance()],
            None,
            MockHealthCheck::new(),
            remote,
        );
        assert!(manager.restart_instance("box-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dispatch_without_vm_id_is_a_noop() {
        let mut plane = MockControlPlane::new();
        plane.expect_start().never();

        let instance = Instance::new("vm-bare", "192.168.1.51");
        let manager = manager_with(
            vec![instance],
            Some(plane),
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        assert!(!manager.start_instance("vm-bare").await.unwrap());
    }

    #[tokio::test]
    async fn test_dispatch_without_control_plane_is_a_noop() {
        let manager = manager_with(
            vec![proxmox_instance()],
            None,
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        assert!(!manager.stop_instance("vm-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dispatch_swallows_control_plane_failure() {
        let mut plane = MockControlPlane::new();
        plane
            .expect_stop()
            .returning(|_| Err(Error::ControlPlane("boom".to_string())));

        let manager = manager_with(
            vec![proxmox_instance()],
            Some(plane),
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        assert!(!manager.stop_instance("vm-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dispatch_socket_is_a_noop() {
        let instance = Instance::new("sock", "127.0.0.1").with_kind(InstanceKind::Socket);
        let manager = manager_with(
            vec![instance],
            None,
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        assert!(!manager.start_instance("sock").await.unwrap());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_name_is_not_found() {
        let manager = manager_with(
            vec![],
            None,
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        let err = manager.dispatch("ghost", Action::Start).await.unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_logs_uses_remote_even_for_vms() {
        let mut remote = MockRemoteBackend::new();
        remote
            .expect_fetch_logs()
            .withf(|instance, lines| instance.name == "vm-1" && *lines == 50)
            .returning(|_, _| "log line\n".to_string());

        let manager = manager_with(
            vec![proxmox_instance()],
            None,
            MockHealthCheck::new(),
            remote,
        );
        assert_eq!(manager.fetch_logs("vm-1", 50).await.unwrap(), "log line\n");
    }

    #[tokio::test]
    async fn test_fetch_logs_unknown_name_is_not_found() {
        let manager = manager_with(
            vec![],
            None,
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        let err = manager.fetch_logs("ghost", 50).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_vms_without_control_plane_is_empty() {
        let manager = manager_with(
            vec![],
            None,
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        assert!(manager.list_vms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_and_remove_instance() {
        let mut manager = manager_with(
            vec![],
            None,
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        manager.add_instance(docker_instance());
        assert!(manager.get("box-1").is_some());

        assert!(manager.remove_instance("box-1"));
        assert!(manager.get("box-1").is_none());
        assert!(!manager.remove_instance("box-1"));
    }

    #[tokio::test]
    async fn test_add_instance_appends_preserving_order() {
        let mut manager = manager_with(
            vec![proxmox_instance(), docker_instance()],
            None,
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );
        manager.add_instance(
            Instance::new("box-2", "192.168.1.61").with_kind(InstanceKind::Docker),
        );

        let names: Vec<&str> = manager.instances().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["vm-1", "box-1", "box-2"]);
    }

    #[tokio::test]
    async fn test_remove_absent_name_leaves_registry_untouched() {
        let mut manager = manager_with(
            vec![proxmox_instance(), docker_instance()],
            None,
            MockHealthCheck::new(),
            MockRemoteBackend::new(),
        );

        assert!(!manager.remove_instance("ghost"));

        let names: Vec<&str> = manager.instances().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["vm-1", "box-1"]);
    }
}
