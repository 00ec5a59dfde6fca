use ipnetwork::IpNetwork;
use std::net::IpAddr;
use uuid::Uuid;
use zeitwork_common::model::{Vm, VmStatus};
use zeitwork_common::{Error, ErrorKind, Result};

use crate::Dal;

/// Bound on retries when a concurrent allocator races us for the same /31
/// (spec §4.2 step 3: "collisions retried up to a small bound").
const MAX_ALLOCATION_RETRIES: u32 = 8;

impl Dal {
    /// Allocates the next free /31 pair's low address within `server_id`'s
    /// /20 and inserts a `pending` VM row bound to `deployment_id` (spec
    /// §4.2 step 3, §4.4: "IP allocation is purely local to the server").
    pub async fn allocate_vm(
        &self,
        deployment_id: Uuid,
        server_id: Uuid,
        port: i32,
    ) -> Result<Vm> {
        let server = self
            .get_server(server_id)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;

        for _ in 0..MAX_ALLOCATION_RETRIES {
            let candidate = self.next_free_vm_ip(server.ip_range).await?;

            let inserted = sqlx::query_as::<_, Vm>(
                r#"
                INSERT INTO vms (id, deployment_id, server_id, ip_address, port, status)
                VALUES ($1, $2, $3, $4, $5, 'pending')
                RETURNING *
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(deployment_id)
            .bind(server_id)
            .bind(candidate)
            .bind(port)
            .fetch_one(self.pool())
            .await;

            match inserted {
                Ok(vm) => return Ok(vm),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::custom(
            ErrorKind::Conflict,
            "exhausted retries allocating a VM IP",
        ))
    }

    /// Finds the lowest-offset unused /31 low-address within `ip_range`.
    async fn next_free_vm_ip(&self, ip_range: IpNetwork) -> Result<IpAddr> {
        let used: Vec<(IpAddr,)> = sqlx::query_as(
            "SELECT ip_address FROM vms
              WHERE ip_address << $1 AND deleted_at IS NULL",
        )
        .bind(ip_range)
        .fetch_all(self.pool())
        .await?;
        let used: std::collections::HashSet<IpAddr> = used.into_iter().map(|(ip,)| ip).collect();

        let base = match ip_range.network() {
            IpAddr::V4(v4) => u32::from(v4),
            IpAddr::V6(_) => {
                return Err(Error::custom(
                    ErrorKind::Internal,
                    "IPv6 server subnets are not supported",
                ))
            }
        };
        let slots = 1u32 << (32 - ip_range.prefix() as u32); // addresses in this /20
        let pairs = slots / 2; // number of /31 pairs

        for offset in 0..pairs {
            let candidate = IpAddr::V4(std::net::Ipv4Addr::from(base + offset * 2));
            if !used.contains(&candidate) {
                return Ok(candidate);
            }
        }

        Err(Error::custom(
            ErrorKind::Conflict,
            "no free VM IP slots remain in this server's /20",
        ))
    }

    pub async fn get_vm(&self, id: Uuid) -> Result<Option<Vm>> {
        let vm = sqlx::query_as::<_, Vm>("SELECT * FROM vms WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(vm)
    }

    pub async fn list_vms_on_server(&self, server_id: Uuid) -> Result<Vec<Vm>> {
        let vms = sqlx::query_as::<_, Vm>(
            "SELECT * FROM vms WHERE server_id = $1 AND deleted_at IS NULL ORDER BY id",
        )
        .bind(server_id)
        .fetch_all(self.pool())
        .await?;
        Ok(vms)
    }

    /// Only the owning server's node agent may flip a VM's status (spec
    /// §4.4 step 5). Enforced here by requiring the caller to pass
    /// `server_id` and scoping the update to it.
    pub async fn set_vm_status(&self, vm_id: Uuid, server_id: Uuid, status: VmStatus) -> Result<()> {
        sqlx::query(
            "UPDATE vms SET status = $1, updated_at = now() WHERE id = $2 AND server_id = $3",
        )
        .bind(status)
        .bind(vm_id)
        .bind(server_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn soft_delete_vm(&self, vm_id: Uuid) -> Result<()> {
        crate::queue::soft_delete(self.pool(), "vms", vm_id).await
    }
}
