use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use uuid::Uuid;
use zeitwork_common::model::{Server, ServerStatus};
use zeitwork_common::Result;

use crate::Dal;

impl Dal {
    /// Upserts a server row keyed by its stable machine id. Returns the
    /// server whether it was just created or already existed (spec §4.1:
    /// "on boot, upserts its row keyed by a stable machine identifier").
    pub async fn upsert_server(
        &self,
        machine_id: Uuid,
        region_id: &str,
        ip_range: IpNetwork,
        internal_ip: IpAddr,
        public_ip: IpAddr,
    ) -> Result<Server> {
        let server = sqlx::query_as::<_, Server>(
            r#"
            INSERT INTO servers (id, region_id, status, ip_range, internal_ip, public_ip, last_heartbeat_at)
            VALUES ($1, $2, 'active', $3, $4, $5, now())
            ON CONFLICT (id) DO UPDATE
               SET internal_ip = EXCLUDED.internal_ip,
                   public_ip = EXCLUDED.public_ip,
                   last_heartbeat_at = now(),
                   updated_at = now()
            RETURNING *
            "#,
        )
        .bind(machine_id)
        .bind(region_id)
        .bind(ip_range)
        .bind(internal_ip)
        .bind(public_ip)
        .fetch_one(self.pool())
        .await?;

        Ok(server)
    }

    pub async fn heartbeat(&self, server_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE servers SET last_heartbeat_at = now(), updated_at = now() WHERE id = $1",
        )
        .bind(server_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_server(&self, id: Uuid) -> Result<Option<Server>> {
        let server = sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(server)
    }

    /// Servers eligible to host new VMs: `active` in the given region,
    /// ordered by id for deterministic tie-breaking (spec §4.2 step 3).
    pub async fn list_active_in_region(&self, region_id: &str) -> Result<Vec<Server>> {
        let servers = sqlx::query_as::<_, Server>(
            "SELECT * FROM servers
              WHERE region_id = $1 AND status = 'active' AND deleted_at IS NULL
           ORDER BY id",
        )
        .bind(region_id)
        .fetch_all(self.pool())
        .await?;
        Ok(servers)
    }

    /// Servers the reconciler still needs to fail over: `dead` in the
    /// given region with at least the possibility of live VMs left on
    /// them (spec §4.2 step 5). Idempotent to re-run — once every live
    /// deployment has been moved off, the set naturally empties.
    pub async fn list_dead_in_region(&self, region_id: &str) -> Result<Vec<Server>> {
        let servers = sqlx::query_as::<_, Server>(
            "SELECT * FROM servers
              WHERE region_id = $1 AND status = 'dead' AND deleted_at IS NULL
           ORDER BY id",
        )
        .bind(region_id)
        .fetch_all(self.pool())
        .await?;
        Ok(servers)
    }

    /// `active` and `draining` servers, used by host-route sync (spec §4.6)
    /// which keeps routes up while a server is still evacuating.
    pub async fn list_routable_in_region(&self, region_id: &str) -> Result<Vec<Server>> {
        let servers = sqlx::query_as::<_, Server>(
            "SELECT * FROM servers
              WHERE region_id = $1 AND status IN ('active', 'draining') AND deleted_at IS NULL
           ORDER BY id",
        )
        .bind(region_id)
        .fetch_all(self.pool())
        .await?;
        Ok(servers)
    }

    /// Servers whose heartbeat is older than `older_than` and are not
    /// already `dead` (spec §4.1: the periodic detection loop).
    pub async fn list_servers_overdue(&self, older_than: DateTime<Utc>) -> Result<Vec<Server>> {
        let servers = sqlx::query_as::<_, Server>(
            "SELECT * FROM servers
              WHERE last_heartbeat_at < $1 AND status != 'dead' AND deleted_at IS NULL
           ORDER BY id",
        )
        .bind(older_than)
        .fetch_all(self.pool())
        .await?;
        Ok(servers)
    }

    pub async fn set_server_status(&self, server_id: Uuid, status: ServerStatus) -> Result<()> {
        sqlx::query("UPDATE servers SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status)
            .bind(server_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Number of non-deleted VMs on `server_id`, used for least-loaded
    /// placement (spec §4.2 step 3) and to decide when a draining server
    /// has reached `drained` (spec §4.2 step 6).
    pub async fn count_live_vms_on_server(&self, server_id: Uuid) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM vms WHERE server_id = $1 AND deleted_at IS NULL",
        )
        .bind(server_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }
}
