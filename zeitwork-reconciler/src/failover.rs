//! Step 5: failover (spec §4.2 step 5). When a server goes `dead`, every
//! live deployment it was hosting gets a fresh VM on a different healthy
//! server; the old VM is soft-deleted once the replacement is confirmed
//! `running`.

use uuid::Uuid;
use zeitwork_common::model::DeploymentStatus;
use zeitwork_common::Result;
use zeitwork_dal::Dal;

use crate::lease::with_deployment_lease;
use crate::schedule::place_on_least_loaded_server;

/// Reschedules every live deployment on `dead_server_id` and returns how
/// many were moved. Idempotent: a deployment already repointed off the
/// dead server (because a racing replica already handled it) is a no-op.
pub async fn failover_dead_server(
    dal: &Dal,
    region_id: &str,
    dead_server_id: Uuid,
    replica_id: Uuid,
    lease_duration: chrono::Duration,
) -> Result<u32> {
    let mut moved = 0;
    for deployment in dal.list_live_deployments_on_server(dead_server_id).await? {
        let Some(old_vm_id) = deployment.vm_id else {
            continue;
        };
        let Some(old_vm) = dal.get_vm(old_vm_id).await? else {
            continue;
        };
        if old_vm.server_id != dead_server_id {
            // Another replica already moved this deployment off.
            continue;
        }

        let won = with_deployment_lease(dal, deployment.id, replica_id, lease_duration, || async {
            let new_vm_id = place_on_least_loaded_server(
                dal,
                region_id,
                deployment.id,
                Some(dead_server_id),
            )
            .await?;
            dal.repoint_deployment_vm(deployment.id, new_vm_id).await?;
            dal.set_deployment_status(deployment.id, DeploymentStatus::Deploying)
                .await?;
            dal.soft_delete_vm(old_vm_id).await
        })
        .await?;

        if won.is_some() {
            moved += 1;
        }
    }
    Ok(moved)
}
