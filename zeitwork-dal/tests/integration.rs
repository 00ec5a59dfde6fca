//! Integration tests against a real Postgres, exercising the primitives
//! spec §4.7/§9 call out as load-bearing: row-locked dequeue, soft-delete
//! filtering, and deployment leases. Requires `DATABASE_URL`; ignored by
//! default, matching the teacher's e2e suite being a separate,
//! infra-requiring test tier (run with `cargo test -- --ignored`).

use test_context::{test_context, AsyncTestContext};
use uuid::Uuid;
use zeitwork_common::model::DeploymentStatus;
use zeitwork_dal::Dal;

struct PgContext {
    dal: Dal,
    organisation_id: Uuid,
    project_id: Uuid,
}

impl AsyncTestContext for PgContext {
    async fn setup() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored DAL tests");
        let dal = Dal::connect(&database_url).await.unwrap();

        let organisation_id = Uuid::now_v7();
        sqlx::query("INSERT INTO organisations (id, slug, name) VALUES ($1, $2, 'Test Org')")
            .bind(organisation_id)
            .bind(format!("test-org-{organisation_id}"))
            .execute(dal.pool())
            .await
            .unwrap();

        let project_id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO projects (id, organisation_id, slug, github_repository, default_branch)
             VALUES ($1, $2, $3, 'acme/app', 'main')",
        )
        .bind(project_id)
        .bind(organisation_id)
        .bind(format!("test-project-{project_id}"))
        .execute(dal.pool())
        .await
        .unwrap();

        Self {
            dal,
            organisation_id,
            project_id,
        }
    }

    async fn teardown(self) {
        // Cascades through deployments/image_builds/vms via the FKs created
        // by this test; organisations/projects have no ON DELETE CASCADE so
        // children are removed first.
        sqlx::query("DELETE FROM vms WHERE deployment_id IN (SELECT id FROM deployments WHERE organisation_id = $1)")
            .bind(self.organisation_id)
            .execute(self.dal.pool())
            .await
            .ok();
        sqlx::query("DELETE FROM image_builds WHERE organisation_id = $1")
            .bind(self.organisation_id)
            .execute(self.dal.pool())
            .await
            .ok();
        sqlx::query("DELETE FROM deployments WHERE organisation_id = $1")
            .bind(self.organisation_id)
            .execute(self.dal.pool())
            .await
            .ok();
        sqlx::query("DELETE FROM projects WHERE organisation_id = $1")
            .bind(self.organisation_id)
            .execute(self.dal.pool())
            .await
            .ok();
        sqlx::query("DELETE FROM organisations WHERE id = $1")
            .bind(self.organisation_id)
            .execute(self.dal.pool())
            .await
            .ok();
    }
}

#[test_context(PgContext)]
#[tokio::test]
#[ignore]
async fn dequeue_skips_rows_already_locked_by_another_worker(ctx: &mut PgContext) {
    let deployment = ctx
        .dal
        .insert_deployment(ctx.project_id, Uuid::now_v7(), ctx.organisation_id, "deadbeef")
        .await
        .unwrap();
    let build = ctx
        .dal
        .insert_image_build(deployment.id, ctx.organisation_id)
        .await
        .unwrap();

    let first = ctx.dal.dequeue_pending_image_build().await.unwrap();
    assert_eq!(first.map(|b| b.id), Some(build.id));

    // already claimed (status flipped to building) so a second dequeue
    // must not see it again.
    let second = ctx.dal.dequeue_pending_image_build().await.unwrap();
    assert_ne!(second.map(|b| b.id), Some(build.id));
}

#[test_context(PgContext)]
#[tokio::test]
#[ignore]
async fn only_one_replica_wins_a_deployment_lease(ctx: &mut PgContext) {
    let deployment = ctx
        .dal
        .insert_deployment(ctx.project_id, Uuid::now_v7(), ctx.organisation_id, "deadbeef")
        .await
        .unwrap();

    let replica_a = Uuid::now_v7();
    let replica_b = Uuid::now_v7();
    let lease_duration = chrono::Duration::seconds(30);

    let a_won = ctx
        .dal
        .try_acquire_deployment_lease(deployment.id, replica_a, lease_duration)
        .await
        .unwrap();
    let b_won = ctx
        .dal
        .try_acquire_deployment_lease(deployment.id, replica_b, lease_duration)
        .await
        .unwrap();

    assert!(a_won);
    assert!(!b_won);
}

#[test_context(PgContext)]
#[tokio::test]
#[ignore]
async fn soft_deleted_deployments_are_excluded_from_live_ids(ctx: &mut PgContext) {
    let deployment = ctx
        .dal
        .insert_deployment(ctx.project_id, Uuid::now_v7(), ctx.organisation_id, "deadbeef")
        .await
        .unwrap();
    ctx.dal
        .set_deployment_status(deployment.id, DeploymentStatus::Stopped)
        .await
        .unwrap();

    zeitwork_dal::queue::soft_delete(ctx.dal.pool(), "deployments", deployment.id)
        .await
        .unwrap();

    let live = ctx.dal.list_live_deployment_ids().await.unwrap();
    assert!(!live.contains(&deployment.id));
}
