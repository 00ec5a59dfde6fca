//! Wires the individual operations into the reconciler's control loop
//! (spec §4.2: "each driven by either a CDC event (§4.5) or a periodic
//! sweep"). CDC events short-circuit the wait for the next tick; the
//! periodic sweep is what actually guarantees progress, since pub/sub
//! delivery is advisory only (spec §9).

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use zeitwork_bus::{Bus, QUEUE_GROUP_RECONCILER};
use zeitwork_common::model::ServerStatus;
use zeitwork_common::Result;
use zeitwork_dal::Dal;

use crate::{drain, failover, ops, schedule};

#[derive(Debug, Clone)]
pub struct Config {
    pub region_id: String,
    pub replica_id: Uuid,
    pub lease_duration: chrono::Duration,
    pub reconcile_interval: Duration,
    pub build_timeout: chrono::Duration,
}

/// Runs one full pass over every reconciler operation (spec §4.2 steps
/// 1-7). Each step is independently idempotent, so a pass that errors
/// partway through is safe to simply retry on the next tick.
pub async fn run_sweep(dal: &Dal, config: &Config) -> Result<()> {
    let assigned = ops::assign_pending_builds(dal, config.replica_id, config.lease_duration).await?;
    let advanced =
        ops::advance_completed_builds(dal, config.replica_id, config.lease_duration).await?;
    let placed = schedule::place_pending_deployments(
        dal,
        &config.region_id,
        config.replica_id,
        config.lease_duration,
    )
    .await?;
    let confirmed =
        ops::confirm_running_deployments(dal, config.replica_id, config.lease_duration).await?;

    let reset = ops::reset_stale_builds(dal, config.build_timeout).await?;

    let mut failed_over = 0;
    let mut drained = 0;
    for server in dal.list_dead_in_region(&config.region_id).await? {
        failed_over += failover::failover_dead_server(
            dal,
            &config.region_id,
            server.id,
            config.replica_id,
            config.lease_duration,
        )
        .await?;
    }
    for server in dal.list_routable_in_region(&config.region_id).await? {
        if server.status == ServerStatus::Draining {
            if let drain::DrainProgress::InProgress { migrated, .. } = drain::drive_drain(
                dal,
                &config.region_id,
                server.id,
                config.replica_id,
                config.lease_duration,
            )
            .await?
            {
                drained += migrated;
            }
        }
    }

    tracing::debug!(
        assigned,
        advanced,
        placed,
        confirmed,
        reset,
        failed_over,
        drained,
        "reconciler sweep complete"
    );
    Ok(())
}

/// The long-running driver: a periodic sweep, woken early by any CDC event
/// on the reconciler's queue group (spec §6 queue group `reconciler`).
pub async fn run(dal: Dal, bus: Arc<dyn Bus>, config: Config) -> Result<()> {
    let mut subscription = bus
        .subscribe("deployments.*", QUEUE_GROUP_RECONCILER)
        .await?;
    let mut ticker = tokio::time::interval(config.reconcile_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            event = subscription.recv() => {
                if event.is_none() {
                    tracing::warn!("reconciler bus subscription closed, falling back to polling only");
                    std::future::pending::<()>().await;
                }
            }
        }

        if let Err(err) = run_sweep(&dal, &config).await {
            tracing::warn!(%err, "reconciler sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_cheap_to_clone() {
        let config = Config {
            region_id: "us-east-1".to_string(),
            replica_id: Uuid::now_v7(),
            lease_duration: chrono::Duration::seconds(30),
            reconcile_interval: Duration::from_secs(60),
            build_timeout: chrono::Duration::minutes(10),
        };
        let cloned = config.clone();
        assert_eq!(config.region_id, cloned.region_id);
    }
}
