//! The runtime abstraction node agents drive (spec §9: "a runtime that can
//! start and stop a microVM given an image tag, CPU/mem, network config,
//! and port"). `NODE_RUNTIME_MODE` selects the implementation at startup.

use std::net::IpAddr;

use async_trait::async_trait;
use uuid::Uuid;
use zeitwork_common::Result;

/// What the node agent needs to know to start a VM (spec §4.4 step 4).
pub struct VmSpec {
    pub vm_id: Uuid,
    pub image_name: String,
    pub ip_address: IpAddr,
    pub port: i32,
    pub tap_device: String,
}

#[async_trait]
pub trait VmRuntime: Send + Sync {
    /// Every VM id the runtime currently considers running (spec §4.4
    /// step 3: "enumerate running microVMs from the local runtime").
    async fn list_running(&self) -> Result<Vec<Uuid>>;

    async fn start(&self, spec: &VmSpec) -> Result<()>;

    /// Graceful shutdown, falling back to force-kill on timeout (spec
    /// §4.4 step 4: "send graceful shutdown, then force-kill").
    async fn stop(&self, vm_id: Uuid) -> Result<()>;
}

pub mod docker;
pub mod shell;

pub use docker::DockerRuntime;
pub use shell::ShellHypervisorRuntime;
