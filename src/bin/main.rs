//! fleetctl CLI - fleet status and lifecycle from one config file

use clap::{Parser, Subcommand};
use fleetctl::{Config, Instance, InstanceManager, VmSummary};
use std::path::PathBuf;
use tabled::{Table, Tabled};

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Manage app deployments across Proxmox VMs and Docker hosts")]
#[command(version)]
struct Cli {
    /// Path to the fleet configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show instance status (all instances, or one by name)
    Status {
        /// Instance name
        name: Option<String>,
    },
    /// Start an instance
    Start {
        /// Instance name
        name: String,
    },
    /// Stop an instance
    Stop {
        /// Instance name
        name: String,
    },
    /// Restart an instance
    Restart {
        /// Instance name
        name: String,
    },
    /// Tail an instance's service log
    Logs {
        /// Instance name
        name: String,
        /// Number of log lines
        #[arg(short, long, default_value = "50")]
        lines: u32,
    },
    /// List configured instances without probing them
    List,
    /// List all VMs known to the Proxmox control plane
    Proxmox,
}

// Table display structs
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Health")]
    health: String,
    #[tabled(rename = "Version")]
    version: String,
}

impl InstanceRow {
    fn from_instance(instance: &Instance) -> Self {
        Self {
            name: instance.name.clone(),
            host: instance.host.clone(),
            kind: instance.kind.to_string(),
            status: instance.status.to_string(),
            health: if instance.health_check_passed { "✓" } else { "✗" }.to_string(),
            version: instance.version.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Tabled)]
struct VmRow {
    #[tabled(rename = "VMID")]
    vmid: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Node")]
    node: String,
}

impl VmRow {
    fn from_summary(vm: &VmSummary) -> Self {
        Self {
            vmid: vm.vmid,
            name: vm.name.clone(),
            status: vm.status.clone(),
            node: vm.node.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetctl=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> fleetctl::Result<()> {
    let config = Config::load(&cli.config)?;
    let mut manager = InstanceManager::new(config)?;

    match cli.command {
        Commands::Status { name: Some(name) } => {
            manager.refresh_status(&name).await?;
            let instance = manager
                .get(&name)
                .ok_or_else(|| fleetctl::Error::InstanceNotFound(name.clone()))?;
            print_detail(instance);
        }
        Commands::Status { name: None } => {
            manager.refresh_all().await;
            print_fleet(manager.instances());
        }
        Commands::Start { name } => {
            println!("Starting {}...", name);
            report_action(manager.start_instance(&name).await?, &name);
        }
        Commands::Stop { name } => {
            println!("Stopping {}...", name);
            report_action(manager.stop_instance(&name).await?, &name);
        }
        Commands::Restart { name } => {
            println!("Restarting {}...", name);
            report_action(manager.restart_instance(&name).await?, &name);
        }
        Commands::Logs { name, lines } => {
            let logs = manager.fetch_logs(&name, lines).await?;
            print!("{}", logs);
        }
        Commands::List => {
            print_fleet(manager.instances());
        }
        Commands::Proxmox => {
            let vms = manager.list_vms().await?;
            if vms.is_empty() {
                println!("No VMs reported by the control plane.");
                return Ok(());
            }
            let rows: Vec<VmRow> = vms.iter().map(VmRow::from_summary).collect();
            println!("{}", Table::new(rows));
        }
    }

    Ok(())
}

fn print_fleet(instances: &[Instance]) {
    if instances.is_empty() {
        println!("No instances configured.");
        return;
    }
    let rows: Vec<InstanceRow> = instances.iter().map(InstanceRow::from_instance).collect();
    println!("{}", Table::new(rows));
}

fn print_detail(instance: &Instance) {
    println!("Instance: {}", instance.name);
    println!("  Host:     {}:{}", instance.host, instance.port);
    println!("  Type:     {}", instance.kind);
    if let Some(vmid) = instance.vm_id {
        println!("  VMID:     {}", vmid);
    }
    println!("  Status:   {}", instance.status);
    println!(
        "  Health:   {}",
        if instance.health_check_passed { "passing" } else { "failing" }
    );
    if let Some(version) = &instance.version {
        println!("  Version:  {}", version);
    }
    if let Some(checked) = instance.last_health_check {
        println!("  Checked:  {}", checked);
    }
    if !instance.description.is_empty() {
        println!("  Notes:    {}", instance.description);
    }
    if let Some(error) = &instance.error_message {
        println!("  Error:    {}", error);
    }
}

fn report_action(ok: bool, name: &str) {
    if ok {
        println!("Done.");
    } else {
        println!("Action did not complete for {}; see the log for details.", name);
    }
}
