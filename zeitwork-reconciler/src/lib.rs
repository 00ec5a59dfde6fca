//! Drives deployments from `pending` to `running`, places VMs, and handles
//! drain and failover (spec §4.2, C2).

pub mod drain;
pub mod driver;
pub mod failover;
pub mod lease;
pub mod ops;
pub mod placement;
pub mod schedule;
