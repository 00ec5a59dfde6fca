use ipnetwork::IpNetwork;
use uuid::Uuid;
use zeitwork_common::{Error, ErrorKind, Result};

use crate::Dal;

/// The region address space every server's /20 is carved from (spec §6).
pub const REGION_BASE: &str = "10.1.0.0/12";

/// Turns a /20 offset within [`REGION_BASE`] into the concrete /20 network.
/// A /12 holds 256 contiguous /20s (2^(20-12) = 2^8).
pub fn subnet_for_offset(offset: i32) -> Result<IpNetwork> {
    let base: std::net::Ipv4Addr = "10.1.0.0".parse().unwrap();
    let base_u32 = u32::from(base);
    let step = 1u32 << (32 - 20); // size of a /20
    let addr = base_u32
        .checked_add(step.checked_mul(offset as u32).ok_or_else(|| {
            Error::custom(ErrorKind::Internal, "subnet offset overflow")
        })?)
        .ok_or_else(|| Error::custom(ErrorKind::Internal, "subnet offset overflow"))?;

    let network = IpNetwork::new(std::net::Ipv4Addr::from(addr).into(), 20)
        .map_err(|e| Error::source(ErrorKind::Internal, e))?;
    Ok(network)
}

impl Dal {
    /// Allocates the next unused /20 within the region's pool to
    /// `server_id`, choosing `MAX(offset)+1` under a `SERIALIZABLE`
    /// transaction (spec §4.1, §9(a): ambiguity on cross-region overlap is
    /// resolved here by scoping the MAX query to `region_id`, so two
    /// regions allocate independently from offset 0).
    pub async fn allocate_subnet(&self, region_id: &str, server_id: Uuid) -> Result<IpNetwork> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let next_offset: (Option<i32>,) = sqlx::query_as(
            "SELECT MAX(subnet_offset) FROM region_subnet_allocations WHERE region_id = $1",
        )
        .bind(region_id)
        .fetch_one(&mut *tx)
        .await?;

        let offset = next_offset.0.map(|o| o + 1).unwrap_or(0);

        sqlx::query(
            "INSERT INTO region_subnet_allocations (region_id, server_id, subnet_offset)
             VALUES ($1, $2, $3)",
        )
        .bind(region_id)
        .bind(server_id)
        .bind(offset)
        .execute(&mut *tx)
        .await?;

        let network = subnet_for_offset(offset)?;

        sqlx::query("UPDATE servers SET ip_range = $1, updated_at = now() WHERE id = $2")
            .bind(network)
            .bind(server_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_few_offsets_are_contiguous_distinct_slash_twenties() {
        let a = subnet_for_offset(0).unwrap();
        let b = subnet_for_offset(1).unwrap();
        assert_eq!(a.prefix(), 20);
        assert_ne!(a, b);
        assert_eq!(a.ip().to_string(), "10.1.0.0");
        assert_eq!(b.ip().to_string(), "10.1.16.0");
    }
}
