//! `NODE_RUNTIME_MODE=docker`: containers standing in for microVMs,
//! managed through `bollard` (mirrors the teacher's `ServiceDockerContext`
//! in `project/docker.rs`). Useful for development and for runtimes where
//! the host doesn't expose KVM.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use uuid::Uuid;
use zeitwork_common::{Error, ErrorKind, Result};

use super::{VmRuntime, VmSpec};

const VM_LABEL: &str = "zeitwork.vm_id";

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_name(vm_id: Uuid) -> String {
        format!("zeitwork-vm-{vm_id}")
    }
}

#[async_trait]
impl VmRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<Uuid>> {
        let mut filters = std::collections::HashMap::new();
        filters.insert("label", vec![VM_LABEL]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;

        let mut ids = Vec::with_capacity(containers.len());
        for container in containers {
            if let Some(labels) = container.labels {
                if let Some(id) = labels.get(VM_LABEL).and_then(|s| Uuid::parse_str(s).ok()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    async fn start(&self, spec: &VmSpec) -> Result<()> {
        let name = Self::container_name(spec.vm_id);

        let mut labels = std::collections::HashMap::new();
        labels.insert(VM_LABEL.to_string(), spec.vm_id.to_string());

        let mut port_bindings = std::collections::HashMap::new();
        port_bindings.insert(
            format!("{}/tcp", spec.port),
            Some(vec![PortBinding {
                host_ip: Some(spec.ip_address.to_string()),
                host_port: Some(spec.port.to_string()),
            }]),
        );

        let config = Config {
            image: Some(spec.image_name.clone()),
            labels: Some(labels),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;

        self.docker
            .start_container::<String>(&name, None)
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;

        Ok(())
    }

    async fn stop(&self, vm_id: Uuid) -> Result<()> {
        let name = Self::container_name(vm_id);

        let _ = self
            .docker
            .stop_container(&name, Some(StopContainerOptions { t: 10 }))
            .await;

        self.docker
            .remove_container(
                &name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;

        Ok(())
    }
}
