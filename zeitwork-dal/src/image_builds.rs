use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeitwork_common::model::ImageBuild;
use zeitwork_common::Result;

use crate::{queue, Dal};

const TABLE: &str = "image_builds";

impl Dal {
    pub async fn insert_image_build(
        &self,
        deployment_id: Uuid,
        organisation_id: Uuid,
    ) -> Result<ImageBuild> {
        let build = sqlx::query_as::<_, ImageBuild>(
            r#"
            INSERT INTO image_builds (id, deployment_id, organisation_id, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(deployment_id)
        .bind(organisation_id)
        .fetch_one(self.pool())
        .await?;
        Ok(build)
    }

    pub async fn get_image_build(&self, id: Uuid) -> Result<Option<ImageBuild>> {
        let build = sqlx::query_as::<_, ImageBuild>("SELECT * FROM image_builds WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(build)
    }

    pub async fn get_image_build_for_deployment(
        &self,
        deployment_id: Uuid,
    ) -> Result<Option<ImageBuild>> {
        let build = sqlx::query_as::<_, ImageBuild>(
            "SELECT * FROM image_builds
              WHERE deployment_id = $1 AND deleted_at IS NULL
           ORDER BY created_at DESC
              LIMIT 1",
        )
        .bind(deployment_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(build)
    }

    /// Claims the oldest pending build with `FOR UPDATE SKIP LOCKED` (spec
    /// §4.3, §9: "the canonical row-lock dequeue ... the only correct queue
    /// primitive here").
    pub async fn dequeue_pending_image_build(&self) -> Result<Option<ImageBuild>> {
        let Some(id) = queue::dequeue_pending_id(
            self.pool(),
            TABLE,
            "building",
            Some("started_at"),
        )
        .await?
        else {
            return Ok(None);
        };

        self.get_image_build(id).await
    }

    pub async fn mark_image_build_completed(&self, id: Uuid, image_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE image_builds
                SET status = 'completed', completed_at = now(), image_id = $1, updated_at = now()
              WHERE id = $2",
        )
        .bind(image_id)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_image_build_failed(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE image_builds
                SET status = 'failed', failed_at = now(), updated_at = now()
              WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Resets builds stuck in `building` past `build_timeout + 10m` back to
    /// `pending` (spec §4.2 step 7).
    pub async fn reset_stale_image_builds(&self, stuck_since: DateTime<Utc>) -> Result<u64> {
        queue::reset_stale(self.pool(), TABLE, "building", "started_at", stuck_since).await
    }
}
