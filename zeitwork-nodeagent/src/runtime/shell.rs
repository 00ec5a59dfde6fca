//! `NODE_RUNTIME_MODE ∈ {firecracker, cloud-hypervisor}`: shells out to the
//! hypervisor binary directly (spec §9: "shell-driven VM setup ... is
//! incidental; the core contract is a runtime that can start and stop a
//! microVM"). Tracks liveness via a pidfile per VM rather than a control
//! socket, since neither hypervisor's API client is in this workspace's
//! dependency stack.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;
use zeitwork_common::{Error, ErrorKind, Result};

use super::{VmRuntime, VmSpec};

pub struct ShellHypervisorRuntime {
    binary: String,
    state_dir: PathBuf,
}

impl ShellHypervisorRuntime {
    pub fn new(binary: impl Into<String>, state_dir: PathBuf) -> Self {
        Self {
            binary: binary.into(),
            state_dir,
        }
    }

    fn pidfile(&self, vm_id: Uuid) -> PathBuf {
        self.state_dir.join(format!("{vm_id}.pid"))
    }
}

#[async_trait]
impl VmRuntime for ShellHypervisorRuntime {
    async fn list_running(&self) -> Result<Vec<Uuid>> {
        let mut running = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.state_dir)
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?
        {
            let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str().map(String::from))
            else {
                continue;
            };
            let Ok(vm_id) = Uuid::parse_str(&stem) else {
                continue;
            };
            if process_is_alive(&entry.path()).await {
                running.push(vm_id);
            }
        }
        Ok(running)
    }

    async fn start(&self, spec: &VmSpec) -> Result<()> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;

        let child = Command::new(&self.binary)
            .arg("--api-sock")
            .arg(self.state_dir.join(format!("{}.sock", spec.vm_id)))
            .arg("--tap-device")
            .arg(&spec.tap_device)
            .arg("--image")
            .arg(&spec.image_name)
            .spawn()
            .map_err(|e| Error::source(ErrorKind::External, e))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::custom(ErrorKind::Internal, "spawned process has no pid"))?;
        tokio::fs::write(self.pidfile(spec.vm_id), pid.to_string())
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;

        Ok(())
    }

    async fn stop(&self, vm_id: Uuid) -> Result<()> {
        let pidfile = self.pidfile(vm_id);
        if let Ok(pid) = tokio::fs::read_to_string(&pidfile).await {
            if let Ok(pid) = pid.trim().parse::<i32>() {
                let _ = Command::new("kill").arg(pid.to_string()).output().await;
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                let _ = Command::new("kill")
                    .arg("-9")
                    .arg(pid.to_string())
                    .output()
                    .await;
            }
        }
        let _ = tokio::fs::remove_file(&pidfile).await;
        Ok(())
    }
}

async fn process_is_alive(pidfile: &std::path::Path) -> bool {
    let Ok(pid) = tokio::fs::read_to_string(pidfile).await else {
        return false;
    };
    let Ok(pid) = pid.trim().parse::<i32>() else {
        return false;
    };
    tokio::fs::metadata(format!("/proc/{pid}")).await.is_ok()
}
