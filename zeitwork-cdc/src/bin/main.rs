use std::sync::Arc;

use clap::Parser;
use zeitwork_bus::{Bus, NatsBus};

/// CDC listener binary (spec §6: `DATABASE_URL`, `NATS_URLS`).
#[derive(Parser, Debug)]
struct Args {
    #[clap(long, env = "DATABASE_URL")]
    database_url: String,
    #[clap(long, env = "NATS_URLS")]
    nats_urls: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zeitwork_common::tracing_init::init("info");
    let args = Args::parse();

    let bus: Arc<dyn Bus> = Arc::new(NatsBus::connect(&args.nats_urls).await?);
    zeitwork_cdc::run(&args.database_url, bus).await?;
    Ok(())
}
