//! Row-level lease helper for multi-replica coordination (spec §4.2:
//! "multiple reconciler replicas may run for availability using row-level
//! leases").

use std::future::Future;

use uuid::Uuid;
use zeitwork_common::Result;
use zeitwork_dal::Dal;

/// Runs `work` only if this replica acquires `deployment_id`'s lease,
/// releasing it afterwards regardless of outcome. Returns `Ok(None)` if the
/// lease is currently held by someone else (not an error: a racing replica
/// is expected, not exceptional).
pub async fn with_deployment_lease<T, F, Fut>(
    dal: &Dal,
    deployment_id: Uuid,
    replica_id: Uuid,
    lease_duration: chrono::Duration,
    work: F,
) -> Result<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if !dal
        .try_acquire_deployment_lease(deployment_id, replica_id, lease_duration)
        .await?
    {
        return Ok(None);
    }

    let result = work().await;
    dal.release_deployment_lease(deployment_id, replica_id)
        .await?;
    result.map(Some)
}
