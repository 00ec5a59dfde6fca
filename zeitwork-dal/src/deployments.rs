use chrono::Utc;
use uuid::Uuid;
use zeitwork_common::model::{Deployment, DeploymentStatus};
use zeitwork_common::Result;

use crate::Dal;

impl Dal {
    pub async fn insert_deployment(
        &self,
        project_id: Uuid,
        environment_id: Uuid,
        organisation_id: Uuid,
        github_commit: &str,
    ) -> Result<Deployment> {
        let deployment = sqlx::query_as::<_, Deployment>(
            r#"
            INSERT INTO deployments (id, project_id, environment_id, organisation_id, github_commit, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(project_id)
        .bind(environment_id)
        .bind(organisation_id)
        .bind(github_commit)
        .fetch_one(self.pool())
        .await?;
        Ok(deployment)
    }

    pub async fn get_deployment(&self, id: Uuid) -> Result<Option<Deployment>> {
        let deployment =
            sqlx::query_as::<_, Deployment>("SELECT * FROM deployments WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(deployment)
    }

    /// Deployments with no `image_build_id` yet (spec §4.2 step 1).
    pub async fn list_pending_without_build(&self) -> Result<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(
            "SELECT * FROM deployments
              WHERE status = 'pending' AND image_build_id IS NULL AND deleted_at IS NULL
           ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(deployments)
    }

    /// Deployments in `deploying` with no VM placed yet (spec §4.2 step 3).
    pub async fn list_deploying_without_vm(&self) -> Result<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(
            "SELECT * FROM deployments
              WHERE status = 'deploying' AND vm_id IS NULL AND deleted_at IS NULL
           ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(deployments)
    }

    /// Live deployments currently bound to a VM on `server_id` — the set a
    /// failover or drain must reschedule (spec §4.2 steps 5/6).
    pub async fn list_live_deployments_on_server(&self, server_id: Uuid) -> Result<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(
            "SELECT d.* FROM deployments d
               JOIN vms v ON v.id = d.vm_id
              WHERE v.server_id = $1 AND v.deleted_at IS NULL AND d.deleted_at IS NULL
           ORDER BY d.id",
        )
        .bind(server_id)
        .fetch_all(self.pool())
        .await?;
        Ok(deployments)
    }

    /// Atomically sets `image_build_id` on a deployment that does not have
    /// one yet, returning `true` if this call won the race (spec §4.2 step
    /// 1: "if such a build already exists (another reconciler racing),
    /// reuse it").
    pub async fn try_set_image_build_id(
        &self,
        deployment_id: Uuid,
        image_build_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE deployments
                SET image_build_id = $1, status = 'building', updated_at = now()
              WHERE id = $2 AND image_build_id IS NULL",
        )
        .bind(image_build_id)
        .bind(deployment_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Copies a completed build's image onto the deployment and advances it
    /// to `deploying` (spec §4.2 step 2).
    pub async fn mark_deployment_deploying(
        &self,
        deployment_id: Uuid,
        image_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE deployments
                SET image_id = $1, status = 'deploying', updated_at = now()
              WHERE id = $2",
        )
        .bind(image_id)
        .bind(deployment_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_deployment_status(
        &self,
        deployment_id: Uuid,
        status: DeploymentStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE deployments SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status)
            .bind(deployment_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Atomically binds `vm_id` to a deployment and sets it `deploying`
    /// (spec §4.2 step 3).
    pub async fn set_deployment_vm(&self, deployment_id: Uuid, vm_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE deployments
                SET vm_id = $1, status = 'deploying', updated_at = now()
              WHERE id = $2",
        )
        .bind(vm_id)
        .bind(deployment_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Re-points `vm_id` to a replacement VM as part of drain/failover,
    /// without touching status — callers decide the resulting status
    /// (spec §4.2 steps 5/6: "repoint deployment.vm_id in one transaction").
    pub async fn repoint_deployment_vm(&self, deployment_id: Uuid, new_vm_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE deployments SET vm_id = $1, updated_at = now() WHERE id = $2")
            .bind(new_vm_id)
            .bind(deployment_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Claims an unheld or expired lease on a deployment for this
    /// reconciler replica (spec §4.2: "multiple reconciler replicas may run
    /// ... using row-level leases").
    pub async fn try_acquire_deployment_lease(
        &self,
        deployment_id: Uuid,
        holder: Uuid,
        lease_duration: chrono::Duration,
    ) -> Result<bool> {
        let expires_at = Utc::now() + lease_duration;
        let result = sqlx::query(
            "UPDATE deployments
                SET lease_holder = $1, lease_expires_at = $2, updated_at = now()
              WHERE id = $3 AND (lease_holder IS NULL OR lease_expires_at < now())",
        )
        .bind(holder)
        .bind(expires_at)
        .bind(deployment_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_deployment_lease(&self, deployment_id: Uuid, holder: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE deployments
                SET lease_holder = NULL, lease_expires_at = NULL, updated_at = now()
              WHERE id = $1 AND lease_holder = $2",
        )
        .bind(deployment_id)
        .bind(holder)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_live_deployment_ids(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM deployments WHERE deleted_at IS NULL ORDER BY id")
                .fetch_all(self.pool())
                .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
