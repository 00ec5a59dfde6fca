use std::time::Duration;

use clap::Parser;
use zeitwork_dal::Dal;

/// Standalone dead-server detection loop (spec §4.1, §6). Per-server
/// registration/heartbeating is done in-process by `zeitwork-nodeagent`;
/// this binary is the cluster-wide sweep that marks overdue servers `dead`.
#[derive(Parser, Debug)]
struct Args {
    #[clap(long, env = "DATABASE_URL")]
    database_url: String,
    /// HEARTBEAT_TIMEOUT in seconds (spec §6 default 60s).
    #[clap(long, env = "HEARTBEAT_TIMEOUT", default_value = "60")]
    heartbeat_timeout_secs: i64,
    /// DEAD_DETECTION_INTERVAL in seconds (spec §6 default 30s).
    #[clap(long, env = "DEAD_DETECTION_INTERVAL", default_value = "30")]
    dead_detection_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zeitwork_common::tracing_init::init("info");
    let args = Args::parse();

    let dal = Dal::connect(&args.database_url).await?;

    zeitwork_registry::run_dead_detection_loop(
        &dal,
        chrono::Duration::seconds(args.heartbeat_timeout_secs),
        Duration::from_secs(args.dead_detection_interval_secs),
    )
    .await;

    Ok(())
}
