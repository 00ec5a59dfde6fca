//! The per-server reconcile tick (spec §4.4).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;
use zeitwork_common::model::{Vm, VmStatus};
use zeitwork_common::Result;
use zeitwork_dal::Dal;

use crate::network;
use crate::runtime::{VmRuntime, VmSpec};

#[derive(Clone)]
pub struct Config {
    pub server_id: Uuid,
    /// Base reconcile interval R; actual sleep jitters by ±25% of this
    /// (spec §4.4: "periodic interval R, ≈60s ± 15s jitter").
    pub reconcile_interval: Duration,
    pub bridge: String,
    pub reachability_timeout: Duration,
}

/// Runs forever: diff desired vs actual VMs and converge (spec §4.4 steps
/// 3-5). Heartbeating (step 1-2) runs on its own loop, started by
/// `zeitwork_registry::register_and_heartbeat` before this is called.
pub async fn run(dal: Dal, runtime: Arc<dyn VmRuntime>, config: Config) {
    loop {
        if let Err(err) = tick(&dal, runtime.as_ref(), &config).await {
            tracing::warn!(%err, "node agent tick failed");
        }
        tokio::time::sleep(jittered_interval(config.reconcile_interval)).await;
    }
}

fn jittered_interval(base: Duration) -> Duration {
    let jitter_fraction = rand::thread_rng().gen_range(-0.25..=0.25);
    let secs = base.as_secs_f64() * (1.0 + jitter_fraction);
    Duration::from_secs_f64(secs.max(1.0))
}

async fn tick(dal: &Dal, runtime: &dyn VmRuntime, config: &Config) -> Result<()> {
    let desired = dal.list_vms_on_server(config.server_id).await?;
    let actual: HashSet<Uuid> = runtime.list_running().await?.into_iter().collect();
    let desired_ids: HashSet<Uuid> = desired.iter().map(|vm| vm.id).collect();

    let start_set: Vec<&Vm> = desired.iter().filter(|vm| !actual.contains(&vm.id)).collect();
    let stop_set: Vec<Uuid> = actual.difference(&desired_ids).copied().collect();

    for vm in start_set {
        if let Err(err) = start_vm(dal, runtime, config, vm).await {
            tracing::warn!(%err, vm_id = %vm.id, "failed to start vm");
            let _ = dal.set_vm_status(vm.id, config.server_id, VmStatus::Failed).await;
        }
    }

    for vm_id in stop_set {
        if let Err(err) = stop_vm(runtime, vm_id).await {
            tracing::warn!(%err, %vm_id, "failed to stop vm no longer desired");
        }
    }

    Ok(())
}

async fn start_vm(dal: &Dal, runtime: &dyn VmRuntime, config: &Config, vm: &Vm) -> Result<()> {
    dal.set_vm_status(vm.id, config.server_id, VmStatus::Starting)
        .await?;

    let tap_device = network::tap_device_name(vm.id);
    network::create_tap_device(&tap_device, &config.bridge).await?;
    network::add_port_forward(vm.ip_address, vm.port).await?;

    let image_name = image_name_for_vm(dal, vm.deployment_id).await?;
    let spec = VmSpec {
        vm_id: vm.id,
        image_name,
        ip_address: vm.ip_address,
        port: vm.port,
        tap_device,
    };
    runtime.start(&spec).await?;

    if network::is_reachable(vm.ip_address, vm.port, config.reachability_timeout).await {
        dal.set_vm_status(vm.id, config.server_id, VmStatus::Running)
            .await?;
    } else {
        dal.set_vm_status(vm.id, config.server_id, VmStatus::Failed)
            .await?;
    }
    Ok(())
}

async fn stop_vm(runtime: &dyn VmRuntime, vm_id: Uuid) -> Result<()> {
    runtime.stop(vm_id).await?;
    let tap_device = network::tap_device_name(vm_id);
    let _ = network::remove_tap_device(&tap_device).await;
    Ok(())
}

async fn image_name_for_vm(dal: &Dal, deployment_id: Uuid) -> Result<String> {
    let deployment = dal
        .get_deployment(deployment_id)
        .await?
        .ok_or_else(|| zeitwork_common::Error::from_kind(zeitwork_common::ErrorKind::NotFound))?;
    let image_id = deployment
        .image_id
        .ok_or_else(|| zeitwork_common::Error::from_kind(zeitwork_common::ErrorKind::NotFound))?;
    let image = dal
        .get_image(image_id)
        .await?
        .ok_or_else(|| zeitwork_common::Error::from_kind(zeitwork_common::ErrorKind::NotFound))?;
    Ok(image.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_twenty_five_percent() {
        let base = Duration::from_secs(60);
        for _ in 0..50 {
            let jittered = jittered_interval(base);
            assert!(jittered.as_secs_f64() >= 45.0);
            assert!(jittered.as_secs_f64() <= 75.0);
        }
    }
}
