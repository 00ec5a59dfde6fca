//! Server self-registration, heartbeats, subnet allocation and dead-server
//! detection (spec §4.1).

use std::net::IpAddr;
use std::time::Duration;

use ipnetwork::IpNetwork;
use uuid::Uuid;
use zeitwork_common::model::{Server, ServerStatus};
use zeitwork_common::Result;
use zeitwork_dal::Dal;

/// Registers `machine_id` as a server if it has no row yet, allocating it a
/// fresh /20 from the region's pool, then heartbeats forever every
/// `heartbeat_interval` (spec §4.1: "heartbeats every H seconds, recommend
/// H=10"). Called once at process start by the node agent.
pub async fn register_and_heartbeat(
    dal: &Dal,
    machine_id: Uuid,
    region_id: &str,
    internal_ip: IpAddr,
    public_ip: IpAddr,
    heartbeat_interval: Duration,
) -> Result<Server> {
    let placeholder = IpNetwork::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 32).unwrap();

    let existing = dal.get_server(machine_id).await?;
    let server = if let Some(existing) = existing {
        dal.upsert_server(machine_id, region_id, existing.ip_range, internal_ip, public_ip)
            .await?
    } else {
        let server = dal
            .upsert_server(machine_id, region_id, placeholder, internal_ip, public_ip)
            .await?;
        let ip_range = dal.allocate_subnet(region_id, machine_id).await?;
        tracing::info!(%machine_id, %ip_range, "allocated /20 to new server");
        Server { ip_range, ..server }
    };

    spawn_heartbeat_loop(dal.clone(), machine_id, heartbeat_interval);

    Ok(server)
}

fn spawn_heartbeat_loop(dal: Dal, server_id: Uuid, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = dal.heartbeat(server_id).await {
                tracing::warn!(%err, %server_id, "failed to send heartbeat");
            }
        }
    });
}

/// The standalone dead-server detection sweep (spec §4.1: "a separate
/// detection loop (≤30s period) performs this write"). Runs forever; each
/// pass marks every server whose heartbeat is overdue as `dead`, which
/// triggers the reconciler's failover path (spec §4.2 step 5).
pub async fn run_dead_detection_loop(
    dal: &Dal,
    heartbeat_timeout: chrono::Duration,
    detection_interval: Duration,
) {
    let mut ticker = tokio::time::interval(detection_interval);
    loop {
        ticker.tick().await;
        if let Err(err) = sweep_dead_servers(dal, heartbeat_timeout).await {
            tracing::warn!(%err, "dead-server sweep failed");
        }
    }
}

async fn sweep_dead_servers(dal: &Dal, heartbeat_timeout: chrono::Duration) -> Result<()> {
    let cutoff = chrono::Utc::now() - heartbeat_timeout;
    let overdue = dal.list_servers_overdue(cutoff).await?;
    for server in overdue {
        tracing::warn!(server_id = %server.id, "marking server dead: heartbeat overdue");
        dal.set_server_status(server.id, ServerStatus::Dead).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_detection_bound_matches_spec() {
        // spec §8: now - last_heartbeat_at <= HEARTBEAT_TIMEOUT + DEAD_DETECTION_INTERVAL + eps
        let heartbeat_timeout = chrono::Duration::seconds(60);
        let detection_interval = Duration::from_secs(30);
        let worst_case = heartbeat_timeout + chrono::Duration::from_std(detection_interval).unwrap();
        assert!(worst_case <= chrono::Duration::seconds(90));
    }
}
