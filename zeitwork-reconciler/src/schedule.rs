//! Step 3: placement. Turns the pure [`crate::placement::choose_least_loaded`]
//! decision into a concrete VM row, used directly by the `deploying`-without-
//! a-VM sweep and reused by failover/drain to find a replacement server.

use uuid::Uuid;
use zeitwork_common::{Error, ErrorKind, Result, DEFAULT_CONTAINER_PORT};
use zeitwork_dal::Dal;

use crate::lease::with_deployment_lease;
use crate::placement::{choose_least_loaded, ServerLoad};

/// Picks a target server for `region_id`, optionally excluding one (used by
/// failover/drain so the replacement VM never lands back on the server
/// being evacuated), and allocates a VM on it bound to `deployment_id`.
pub async fn place_on_least_loaded_server(
    dal: &Dal,
    region_id: &str,
    deployment_id: Uuid,
    exclude_server: Option<Uuid>,
) -> Result<Uuid> {
    let servers = dal.list_active_in_region(region_id).await?;
    let mut loads = Vec::with_capacity(servers.len());
    for server in &servers {
        if Some(server.id) == exclude_server {
            continue;
        }
        let live_vm_count = dal.count_live_vms_on_server(server.id).await?;
        loads.push(ServerLoad {
            server_id: server.id,
            live_vm_count,
        });
    }

    let target = choose_least_loaded(&loads).ok_or_else(|| {
        Error::custom(ErrorKind::Conflict, "no active server available for placement")
    })?;

    let vm = dal
        .allocate_vm(deployment_id, target, DEFAULT_CONTAINER_PORT)
        .await?;
    Ok(vm.id)
}

/// Step 3 proper: places every `deploying` deployment that has no VM yet.
pub async fn place_pending_deployments(
    dal: &Dal,
    region_id: &str,
    replica_id: Uuid,
    lease_duration: chrono::Duration,
) -> Result<u32> {
    let mut placed = 0;
    for deployment in dal.list_deploying_without_vm().await? {
        let won = with_deployment_lease(dal, deployment.id, replica_id, lease_duration, || async {
            let vm_id =
                place_on_least_loaded_server(dal, region_id, deployment.id, None).await?;
            dal.set_deployment_vm(deployment.id, vm_id).await
        })
        .await?;
        if won.is_some() {
            placed += 1;
        }
    }
    Ok(placed)
}
