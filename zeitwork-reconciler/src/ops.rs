//! The four single-pass idempotent reconciler operations (spec §4.2 steps
//! 1, 2, 4, 7). Steps 3, 5 and 6 live in [`crate::schedule`] and
//! [`crate::failover`]/[`crate::drain`] because they need more than one
//! transaction to complete safely.

use uuid::Uuid;
use zeitwork_common::model::{DeploymentStatus, VmStatus};
use zeitwork_common::Result;
use zeitwork_dal::Dal;

use crate::lease::with_deployment_lease;

/// Step 1: for every `pending` deployment with no build yet, create one
/// and bind it. Idempotent: `try_set_image_build_id` only wins the race
/// for one caller, so a racing reconciler replica simply no-ops.
pub async fn assign_pending_builds(
    dal: &Dal,
    replica_id: Uuid,
    lease_duration: chrono::Duration,
) -> Result<u32> {
    let mut assigned = 0;
    for deployment in dal.list_pending_without_build().await? {
        let won = with_deployment_lease(dal, deployment.id, replica_id, lease_duration, || async {
            if dal
                .get_image_build_for_deployment(deployment.id)
                .await?
                .is_some()
            {
                return Ok(false);
            }
            let build = dal
                .insert_image_build(deployment.id, deployment.organisation_id)
                .await?;
            dal.try_set_image_build_id(deployment.id, build.id).await
        })
        .await?;

        if won == Some(true) {
            assigned += 1;
        }
    }
    Ok(assigned)
}

/// Step 2: for every completed build whose deployment is still `building`,
/// copy the built image onto the deployment and advance it to `deploying`.
pub async fn advance_completed_builds(
    dal: &Dal,
    replica_id: Uuid,
    lease_duration: chrono::Duration,
) -> Result<u32> {
    let mut advanced = 0;
    for id in dal.list_live_deployment_ids().await? {
        let Some(deployment) = dal.get_deployment(id).await? else {
            continue;
        };
        if deployment.status != DeploymentStatus::Building {
            continue;
        }
        let Some(build_id) = deployment.image_build_id else {
            continue;
        };
        let Some(build) = dal.get_image_build(build_id).await? else {
            continue;
        };
        let Some(image_id) = build.image_id else {
            continue;
        };

        let won = with_deployment_lease(dal, deployment.id, replica_id, lease_duration, || async {
            dal.mark_deployment_deploying(deployment.id, image_id)
                .await
        })
        .await?;
        if won.is_some() {
            advanced += 1;
        }
    }
    Ok(advanced)
}

/// Step 4: when a VM the reconciler placed reports `running`, flip its
/// deployment to `running` too.
pub async fn confirm_running_deployments(
    dal: &Dal,
    replica_id: Uuid,
    lease_duration: chrono::Duration,
) -> Result<u32> {
    let mut confirmed = 0;
    for id in dal.list_live_deployment_ids().await? {
        let Some(deployment) = dal.get_deployment(id).await? else {
            continue;
        };
        if deployment.status != DeploymentStatus::Deploying {
            continue;
        }
        let Some(vm_id) = deployment.vm_id else {
            continue;
        };
        let Some(vm) = dal.get_vm(vm_id).await? else {
            continue;
        };
        if vm.status != VmStatus::Running {
            continue;
        }

        let won = with_deployment_lease(dal, deployment.id, replica_id, lease_duration, || async {
            dal.set_deployment_status(deployment.id, DeploymentStatus::Running)
                .await
        })
        .await?;
        if won.is_some() {
            confirmed += 1;
        }
    }
    Ok(confirmed)
}

/// Step 7: reset builds stuck in `building` past `T_build + 10m` back to
/// `pending` so another worker can claim them (spec §4.2 step 7, §6 default
/// `T_build = 10m`).
pub async fn reset_stale_builds(dal: &Dal, build_timeout: chrono::Duration) -> Result<u64> {
    let stuck_since = chrono::Utc::now() - build_timeout - chrono::Duration::minutes(10);
    dal.reset_stale_image_builds(stuck_since).await
}

#[cfg(test)]
mod tests {
    #[test]
    fn stale_build_cutoff_adds_ten_minute_grace() {
        let timeout = chrono::Duration::minutes(10);
        let now = chrono::Utc::now();
        let cutoff = now - timeout - chrono::Duration::minutes(10);
        assert!(now - cutoff >= chrono::Duration::minutes(20));
    }
}
