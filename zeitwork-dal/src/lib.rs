//! Typed Postgres queries over the zeitwork schema (spec §4.7 / §6).
//!
//! Every row-mutating statement used by the control plane lives here; no
//! other crate in the workspace issues SQL directly, mirroring the
//! `deployer::persistence::Persistence` / `resource_recorder::dal::Dal`
//! pattern in the teacher repo.

pub mod deployments;
pub mod image_builds;
pub mod images;
pub mod projects;
pub mod queue;
pub mod servers;
pub mod subnets;
pub mod vms;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use zeitwork_common::Result;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../migrations");

/// Handle to the control-plane database. Cheap to clone (wraps a pool).
#[derive(Clone)]
pub struct Dal {
    pool: PgPool,
}

impl Dal {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        MIGRATOR.run(&pool).await.map_err(|e| {
            zeitwork_common::Error::source(zeitwork_common::ErrorKind::Database, e)
        })?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
