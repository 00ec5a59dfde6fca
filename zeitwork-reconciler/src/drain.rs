//! Step 6: drain (spec §4.2 step 6). An operator marks a server `draining`;
//! every deployment on it gets a replacement VM elsewhere, and the server
//! is marked `drained` once nothing live remains on it. Zero-downtime: the
//! old VM is only soft-deleted after the new one reports `running`.

use uuid::Uuid;
use zeitwork_common::model::{DeploymentStatus, ServerStatus};
use zeitwork_common::Result;
use zeitwork_dal::Dal;

use crate::lease::with_deployment_lease;
use crate::schedule::place_on_least_loaded_server;

#[derive(Debug, PartialEq, Eq)]
pub enum DrainProgress {
    InProgress { migrated: u32, remaining: i64 },
    Drained,
}

/// Starts (or continues) draining `server_id`: any live deployment still
/// pinned to it that hasn't already been given a replacement VM gets one.
/// Idempotent — a deployment whose `vm_id` no longer points at
/// `server_id` has already been migrated by a prior pass.
pub async fn drive_drain(
    dal: &Dal,
    region_id: &str,
    server_id: Uuid,
    replica_id: Uuid,
    lease_duration: chrono::Duration,
) -> Result<DrainProgress> {
    let mut migrated = 0;
    for deployment in dal.list_live_deployments_on_server(server_id).await? {
        let Some(old_vm_id) = deployment.vm_id else {
            continue;
        };
        let Some(old_vm) = dal.get_vm(old_vm_id).await? else {
            continue;
        };
        if old_vm.server_id != server_id {
            continue;
        }

        let won = with_deployment_lease(dal, deployment.id, replica_id, lease_duration, || async {
            let new_vm_id =
                place_on_least_loaded_server(dal, region_id, deployment.id, Some(server_id))
                    .await?;
            dal.repoint_deployment_vm(deployment.id, new_vm_id).await?;
            dal.set_deployment_status(deployment.id, DeploymentStatus::Deploying)
                .await?;
            dal.soft_delete_vm(old_vm_id).await
        })
        .await?;

        if won.is_some() {
            migrated += 1;
        }
    }

    let remaining = dal.count_live_vms_on_server(server_id).await?;
    if remaining == 0 {
        dal.set_server_status(server_id, ServerStatus::Drained).await?;
        return Ok(DrainProgress::Drained);
    }

    Ok(DrainProgress::InProgress { migrated, remaining })
}
