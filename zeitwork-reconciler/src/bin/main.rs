use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use uuid::Uuid;
use zeitwork_bus::NatsBus;
use zeitwork_dal::Dal;
use zeitwork_reconciler::driver::{self, Config};

/// Reconciler config (spec §6: `RECONCILE_INTERVAL`, `HEARTBEAT_TIMEOUT`,
/// `DEAD_DETECTION_INTERVAL`). `HEARTBEAT_TIMEOUT`/`DEAD_DETECTION_INTERVAL`
/// govern `zeitwork-registry`'s sweep, not this binary, but are accepted
/// here too so both processes can share one environment file.
#[derive(Parser, Debug)]
struct Args {
    #[clap(long, env = "DATABASE_URL")]
    database_url: String,
    #[clap(long, env = "NATS_URLS")]
    nats_urls: String,
    #[clap(long, env = "NODE_REGION_ID")]
    region_id: String,
    /// RECONCILE_INTERVAL in seconds (default 60s).
    #[clap(long, env = "RECONCILE_INTERVAL", default_value = "60")]
    reconcile_interval_secs: u64,
    /// T_build in minutes, used to detect stuck builds (spec §6, default 10m).
    #[clap(long, env = "BUILD_TIMEOUT_MINUTES", default_value = "10")]
    build_timeout_minutes: i64,
    /// How long this replica holds a deployment lease before it expires.
    #[clap(long, env = "LEASE_DURATION_SECS", default_value = "30")]
    lease_duration_secs: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zeitwork_common::tracing_init::init("info");
    let args = Args::parse();

    let dal = Dal::connect(&args.database_url).await?;
    let bus = Arc::new(NatsBus::connect(&args.nats_urls).await?);

    let config = Config {
        region_id: args.region_id,
        replica_id: Uuid::now_v7(),
        lease_duration: chrono::Duration::seconds(args.lease_duration_secs),
        reconcile_interval: Duration::from_secs(args.reconcile_interval_secs),
        build_timeout: chrono::Duration::minutes(args.build_timeout_minutes),
    };

    tracing::info!(region_id = %config.region_id, replica_id = %config.replica_id, "reconciler starting");
    driver::run(dal, bus, config).await?;
    Ok(())
}
