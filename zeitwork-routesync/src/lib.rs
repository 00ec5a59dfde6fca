//! Host route maintenance (spec §4.6): every server installs a direct
//! route to each other `active`/`draining` server's /20, so any VM can
//! reach any other VM over the internal VLAN without NAT.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use ipnetwork::IpNetwork;
use tokio::process::Command;
use uuid::Uuid;
use zeitwork_common::{Error, ErrorKind, Result};
use zeitwork_dal::Dal;

#[derive(Clone)]
pub struct Config {
    pub self_id: Uuid,
    pub region_id: String,
    pub sync_interval: Duration,
}

/// Runs forever: every `sync_interval` (spec's `R`), reconciles installed
/// routes against the current `active`/`draining` peer set.
pub async fn run(dal: Dal, config: Config) {
    let mut installed: HashMap<Uuid, IpNetwork> = HashMap::new();
    loop {
        match sync_once(&dal, &config, &installed).await {
            Ok(next) => installed = next,
            Err(err) => tracing::warn!(%err, "route sync pass failed"),
        }
        tokio::time::sleep(config.sync_interval).await;
    }
}

/// One reconcile pass. Returns the new installed-route map so the caller
/// can diff against it next time.
async fn sync_once(
    dal: &Dal,
    config: &Config,
    installed: &HashMap<Uuid, IpNetwork>,
) -> Result<HashMap<Uuid, IpNetwork>> {
    let peers = dal.list_routable_in_region(&config.region_id).await?;

    let mut desired = HashMap::new();
    for peer in &peers {
        if peer.id == config.self_id {
            continue;
        }
        desired.insert(peer.id, peer.ip_range);

        if installed.get(&peer.id) != Some(&peer.ip_range) {
            if let Err(err) = replace_route(peer.ip_range, peer.internal_ip).await {
                tracing::warn!(%err, peer_id = %peer.id, "failed to install route");
            }
        }
    }

    let desired_ids: HashSet<Uuid> = desired.keys().copied().collect();
    for (peer_id, ip_range) in installed {
        if !desired_ids.contains(peer_id) {
            if let Err(err) = delete_route(*ip_range).await {
                tracing::warn!(%err, peer_id = %peer_id, "failed to withdraw route");
            }
        }
    }

    Ok(desired)
}

async fn replace_route(ip_range: IpNetwork, via: std::net::IpAddr) -> Result<()> {
    run_ip(&["route", "replace", &ip_range.to_string(), "via", &via.to_string()]).await
}

async fn delete_route(ip_range: IpNetwork) -> Result<()> {
    run_ip(&["route", "del", &ip_range.to_string()]).await
}

async fn run_ip(args: &[&str]) -> Result<()> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::source(ErrorKind::External, e))?;
    if !output.status.success() {
        return Err(Error::custom(
            ErrorKind::External,
            format!(
                "ip {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::IpAddr;
    use zeitwork_common::model::{Server, ServerStatus};

    fn server(id: Uuid, ip_range: &str, internal_ip: &str) -> Server {
        Server {
            id,
            region_id: "iad".to_string(),
            status: ServerStatus::Active,
            ip_range: ip_range.parse().unwrap(),
            internal_ip: internal_ip.parse::<IpAddr>().unwrap(),
            public_ip: "203.0.113.1".parse().unwrap(),
            last_heartbeat_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn excludes_self_from_desired_peers() {
        let self_id = Uuid::now_v7();
        let peers = [server(self_id, "10.1.0.0/20", "10.0.0.1")];
        let desired: HashMap<Uuid, IpNetwork> = peers
            .iter()
            .filter(|p| p.id != self_id)
            .map(|p| (p.id, p.ip_range))
            .collect();
        assert!(desired.is_empty());
    }

    #[test]
    fn route_changes_when_peer_ip_range_changes() {
        let peer_id = Uuid::now_v7();
        let mut installed = HashMap::new();
        installed.insert(peer_id, "10.1.0.0/20".parse::<IpNetwork>().unwrap());

        let new_range: IpNetwork = "10.1.16.0/20".parse().unwrap();
        assert_ne!(installed.get(&peer_id), Some(&new_range));
    }
}
