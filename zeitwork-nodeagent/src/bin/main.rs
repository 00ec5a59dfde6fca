use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use uuid::Uuid;
use zeitwork_dal::Dal;
use zeitwork_nodeagent::driver::{self, Config};
use zeitwork_nodeagent::runtime::{DockerRuntime, ShellHypervisorRuntime, VmRuntime};

/// Node agent config (spec §4.4, §6: `NODE_ID`, `NODE_REGION_ID`,
/// `NODE_RUNTIME_MODE`, `RECONCILE_INTERVAL`).
#[derive(Parser, Debug)]
struct Args {
    #[clap(long, env = "DATABASE_URL")]
    database_url: String,
    /// Stable identity for this machine; generated once and persisted by
    /// the operator if not supplied (spec §4.1: "a server row keyed by a
    /// stable machine id").
    #[clap(long, env = "NODE_ID")]
    node_id: Uuid,
    #[clap(long, env = "NODE_REGION_ID")]
    region_id: String,
    #[clap(long, env = "NODE_INTERNAL_IP")]
    internal_ip: IpAddr,
    #[clap(long, env = "NODE_PUBLIC_IP")]
    public_ip: IpAddr,
    /// docker | firecracker | cloud-hypervisor (spec §9).
    #[clap(long, env = "NODE_RUNTIME_MODE", default_value = "docker")]
    runtime_mode: String,
    #[clap(long, env = "NODE_BRIDGE", default_value = "zeitwork0")]
    bridge: String,
    /// Path to the hypervisor binary, used when runtime_mode isn't docker.
    #[clap(long, env = "NODE_HYPERVISOR_BINARY", default_value = "firecracker")]
    hypervisor_binary: String,
    #[clap(long, env = "NODE_STATE_DIR", default_value = "/var/lib/zeitwork/vms")]
    state_dir: PathBuf,
    /// Heartbeat interval H (spec §4.1, recommend H=10s).
    #[clap(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "10")]
    heartbeat_interval_secs: u64,
    /// RECONCILE_INTERVAL in seconds (default 60s).
    #[clap(long, env = "RECONCILE_INTERVAL", default_value = "60")]
    reconcile_interval_secs: u64,
    #[clap(long, env = "REACHABILITY_TIMEOUT_SECS", default_value = "5")]
    reachability_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zeitwork_common::tracing_init::init("info");
    let args = Args::parse();

    let dal = Dal::connect(&args.database_url).await?;

    let server = zeitwork_registry::register_and_heartbeat(
        &dal,
        args.node_id,
        &args.region_id,
        args.internal_ip,
        args.public_ip,
        Duration::from_secs(args.heartbeat_interval_secs),
    )
    .await?;
    tracing::info!(server_id = %server.id, ip_range = %server.ip_range, "node agent registered");

    let runtime: Arc<dyn VmRuntime> = match args.runtime_mode.as_str() {
        "docker" => {
            let docker = bollard::Docker::connect_with_local_defaults()?;
            Arc::new(DockerRuntime::new(docker))
        }
        "firecracker" | "cloud-hypervisor" => Arc::new(ShellHypervisorRuntime::new(
            args.hypervisor_binary.clone(),
            args.state_dir.clone(),
        )),
        other => anyhow::bail!("unknown NODE_RUNTIME_MODE: {other}"),
    };

    let config = Config {
        server_id: server.id,
        reconcile_interval: Duration::from_secs(args.reconcile_interval_secs),
        bridge: args.bridge,
        reachability_timeout: Duration::from_secs(args.reachability_timeout_secs),
    };

    driver::run(dal, runtime, config).await;
    Ok(())
}
