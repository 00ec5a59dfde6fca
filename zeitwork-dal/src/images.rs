use uuid::Uuid;
use zeitwork_common::model::Image;
use zeitwork_common::Result;

use crate::Dal;

impl Dal {
    /// Inserts an image row, or returns the existing row if one with the
    /// same content hash already exists (spec §3: "a successful build
    /// either inserts or deduplicates against an existing row").
    pub async fn insert_or_get_image(
        &self,
        name: &str,
        hash: &str,
        size: i64,
        object_key: Option<&str>,
    ) -> Result<Image> {
        let image = sqlx::query_as::<_, Image>(
            r#"
            INSERT INTO images (id, name, hash, size, object_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (hash) DO UPDATE SET updated_at = now()
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(hash)
        .bind(size)
        .bind(object_key)
        .fetch_one(self.pool())
        .await?;
        Ok(image)
    }

    pub async fn get_image(&self, id: Uuid) -> Result<Option<Image>> {
        let image = sqlx::query_as::<_, Image>("SELECT * FROM images WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(image)
    }
}
