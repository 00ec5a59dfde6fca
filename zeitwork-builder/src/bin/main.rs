use std::path::PathBuf;
use std::time::Duration;

use bollard::Docker;
use clap::Parser;
use zeitwork_builder::github::GithubAppConfig;
use zeitwork_builder::worker::{self, Config, RegistryAuth};
use zeitwork_dal::Dal;

/// Builder config (spec §6: `BUILDER_ID`, `BUILDER_WORK_DIR`,
/// `BUILDER_REGISTRY_URL`/`_USER`/`_PASS`, `BUILDER_MAX_CONCURRENT`,
/// `BUILD_TIMEOUT`, `CLEANUP_INTERVAL`).
#[derive(Parser, Debug)]
struct Args {
    #[clap(long, env = "DATABASE_URL")]
    database_url: String,
    /// Stable identity for this worker, used only for log correlation.
    #[clap(long, env = "BUILDER_ID", default_value_t = uuid::Uuid::now_v7())]
    builder_id: uuid::Uuid,
    #[clap(long, env = "BUILDER_WORK_DIR", default_value = "/tmp/zeitwork-builds")]
    work_dir: PathBuf,
    #[clap(long, env = "BUILDER_REGISTRY_URL")]
    registry_url: Option<String>,
    #[clap(long, env = "BUILDER_REGISTRY_USER")]
    registry_user: Option<String>,
    #[clap(long, env = "BUILDER_REGISTRY_PASS")]
    registry_pass: Option<String>,
    #[clap(long, env = "BUILDER_PUSH_TO_REGISTRY", default_value = "false")]
    push_to_registry: bool,
    /// BUILDER_MAX_CONCURRENT (spec §6, default 2).
    #[clap(long, env = "BUILDER_MAX_CONCURRENT", default_value = "2")]
    max_concurrent_builds: usize,
    /// BUILD_TIMEOUT in minutes (spec §6, default 10m).
    #[clap(long, env = "BUILD_TIMEOUT", default_value = "10")]
    build_timeout_minutes: u64,
    /// CLEANUP_INTERVAL in minutes (spec §6, default 5m).
    #[clap(long, env = "CLEANUP_INTERVAL", default_value = "5")]
    cleanup_interval_minutes: u64,
    #[clap(long, env = "BUILD_POLL_INTERVAL_SECS", default_value = "2")]
    poll_interval_secs: u64,
    #[clap(long, env = "GITHUB_APP_ID")]
    github_app_id: Option<String>,
    #[clap(long, env = "GITHUB_APP_PRIVATE_KEY")]
    github_app_private_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zeitwork_common::tracing_init::init("info");
    let args = Args::parse();

    let dal = Dal::connect(&args.database_url).await?;
    let docker = Docker::connect_with_local_defaults()?;
    let http = reqwest::Client::new();

    let github = match (args.github_app_id, args.github_app_private_key) {
        (Some(app_id), Some(private_key_pem)) => Some(GithubAppConfig {
            app_id,
            private_key_pem,
        }),
        _ => {
            tracing::warn!("no GITHUB_APP_ID/GITHUB_APP_PRIVATE_KEY configured, cloning public repos only");
            None
        }
    };

    let registry_auth = match (args.registry_user, args.registry_pass) {
        (Some(username), Some(password)) => Some(RegistryAuth { username, password }),
        _ => None,
    };

    let config = Config {
        work_dir: args.work_dir,
        registry_url: args.registry_url,
        registry_auth,
        push_to_registry: args.push_to_registry,
        max_concurrent_builds: args.max_concurrent_builds,
        build_timeout: Duration::from_secs(args.build_timeout_minutes * 60),
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        cleanup_interval: Duration::from_secs(args.cleanup_interval_minutes * 60),
        github,
    };

    tokio::fs::create_dir_all(&config.work_dir).await?;

    tracing::info!(
        builder_id = %args.builder_id,
        max_concurrent_builds = config.max_concurrent_builds,
        "builder starting"
    );
    worker::run(dal, docker, http, config).await;
    Ok(())
}
