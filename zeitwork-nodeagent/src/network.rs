//! TAP device and port-forwarding management (spec §4.4 step 4), plus the
//! reachability check gating `vm.status='running'`.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use uuid::Uuid;
use zeitwork_common::{Error, ErrorKind, Result};

/// `tap<last-8-of-vm-id>` (spec §4.4 step 4).
pub fn tap_device_name(vm_id: Uuid) -> String {
    let hex = vm_id.simple().to_string();
    format!("tap{}", &hex[hex.len() - 8..])
}

/// Creates the TAP device and attaches it to the server's bridge.
pub async fn create_tap_device(tap_device: &str, bridge: &str) -> Result<()> {
    run_ip(&["tuntap", "add", "dev", tap_device, "mode", "tap"]).await?;
    run_ip(&["link", "set", tap_device, "master", bridge]).await?;
    run_ip(&["link", "set", tap_device, "up"]).await?;
    Ok(())
}

pub async fn remove_tap_device(tap_device: &str) -> Result<()> {
    run_ip(&["link", "delete", tap_device]).await
}

async fn run_ip(args: &[&str]) -> Result<()> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::source(ErrorKind::External, e))?;
    if !output.status.success() {
        return Err(Error::custom(
            ErrorKind::External,
            format!(
                "ip {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }
    Ok(())
}

/// Programs a DNAT rule forwarding `vm_ip:port` traffic reaching the host
/// to itself (spec §4.4 step 4: "program port-forwarding rules for the
/// container's exposed ports").
pub async fn add_port_forward(vm_ip: IpAddr, port: i32) -> Result<()> {
    run_iptables(&[
        "-t", "nat", "-A", "PREROUTING",
        "-p", "tcp", "--dport", &port.to_string(),
        "-j", "DNAT", "--to-destination", &format!("{vm_ip}:{port}"),
    ])
    .await
}

pub async fn remove_port_forward(vm_ip: IpAddr, port: i32) -> Result<()> {
    run_iptables(&[
        "-t", "nat", "-D", "PREROUTING",
        "-p", "tcp", "--dport", &port.to_string(),
        "-j", "DNAT", "--to-destination", &format!("{vm_ip}:{port}"),
    ])
    .await
}

async fn run_iptables(args: &[&str]) -> Result<()> {
    let output = Command::new("iptables")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::source(ErrorKind::External, e))?;
    if !output.status.success() {
        return Err(Error::custom(
            ErrorKind::External,
            format!(
                "iptables {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }
    Ok(())
}

/// A single bounded TCP connect attempt (spec §4.4 step 4: "wait for it to
/// pass a reachability check").
pub async fn is_reachable(ip: IpAddr, port: i32, timeout: Duration) -> bool {
    let addr = SocketAddr::new(ip, port as u16);
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tap_name_uses_last_eight_hex_chars_of_vm_id() {
        let vm_id = Uuid::parse_str("00000000-0000-0000-0000-0000deadbeef").unwrap();
        assert_eq!(tap_device_name(vm_id), "tapdeadbeef");
    }

    #[tokio::test]
    async fn unreachable_port_times_out_quickly() {
        let reachable = is_reachable(
            "127.0.0.1".parse().unwrap(),
            1, // almost never listened on
            Duration::from_millis(200),
        )
        .await;
        assert!(!reachable);
    }
}
