use uuid::Uuid;
use zeitwork_common::model::Project;
use zeitwork_common::Result;

use crate::Dal;

impl Dal {
    pub async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(project)
    }

    /// The GitHub App installation authorized for `organisation_id`, used
    /// by the builder to mint a clone token (spec §4.3 step 2).
    pub async fn get_installation_for_organisation(
        &self,
        organisation_id: Uuid,
    ) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT github_installation_id FROM github_installations
              WHERE organisation_id = $1 AND deleted_at IS NULL
           ORDER BY created_at DESC
              LIMIT 1",
        )
        .bind(organisation_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(id,)| id))
    }
}
