use std::time::Duration;

use clap::Parser;
use uuid::Uuid;
use zeitwork_dal::Dal;
use zeitwork_routesync::{run, Config};

/// Route sync config (spec §4.6: "every R seconds").
#[derive(Parser, Debug)]
struct Args {
    #[clap(long, env = "DATABASE_URL")]
    database_url: String,
    /// Must match the NODE_ID this server registered under.
    #[clap(long, env = "NODE_ID")]
    node_id: Uuid,
    #[clap(long, env = "NODE_REGION_ID")]
    region_id: String,
    #[clap(long, env = "ROUTE_SYNC_INTERVAL", default_value = "30")]
    sync_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zeitwork_common::tracing_init::init("info");
    let args = Args::parse();

    let dal = Dal::connect(&args.database_url).await?;
    let config = Config {
        self_id: args.node_id,
        region_id: args.region_id,
        sync_interval: Duration::from_secs(args.sync_interval_secs),
    };

    tracing::info!(node_id = %config.self_id, "route sync starting");
    run(dal, config).await;
    Ok(())
}
