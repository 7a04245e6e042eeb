//! Host network snapshot: interfaces with their addresses, and the IPv4
//! routing table.

use crate::error::{CoreError, CoreErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A host network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInterface {
    pub name: String,
    /// Addresses without prefix length (`10.8.0.1`, `fe80::1`).
    pub addresses: Vec<String>,
}

/// A routing-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRoute {
    pub destination: String,
    pub mask: String,
    pub gateway: String,
    pub dev: String,
    pub metric: u32,
}

/// Interfaces and routes captured together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub interfaces: Vec<HostInterface>,
    pub routes: Vec<HostRoute>,
}

impl HostSnapshot {
    /// The interface carrying `addr`, if any.
    pub fn interface_with_address(&self, addr: &str) -> Option<&HostInterface> {
        self.interfaces
            .iter()
            .find(|i| i.addresses.iter().any(|a| a == addr))
    }

    /// Routes whose output device is `dev`.
    pub fn routes_via(&self, dev: &str) -> Vec<HostRoute> {
        self.routes.iter().filter(|r| r.dev == dev).cloned().collect()
    }
}

/// Source of [`HostSnapshot`]s.
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn snapshot(&self) -> Result<HostSnapshot, CoreError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  `ip` command probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// [`HostProbe`] backed by iproute2.
#[derive(Debug, Clone)]
pub struct IpCommandProbe {
    binary: String,
}

impl Default for IpCommandProbe {
    fn default() -> Self {
        Self { binary: "ip".into() }
    }
}

impl IpCommandProbe {
    pub fn new() -> Self {
        Self::default()
    }

    async fn ip(&self, args: &[&str]) -> Result<String, CoreError> {
        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                CoreError::new(
                    CoreErrorKind::CommandFailed,
                    format!("Cannot run {} {}", self.binary, args.join(" ")),
                )
                .with_detail(e.to_string())
            })?;
        if !output.status.success() {
            return Err(CoreError::new(
                CoreErrorKind::CommandFailed,
                format!("{} {} exited with {}", self.binary, args.join(" "), output.status),
            )
            .with_detail(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl HostProbe for IpCommandProbe {
    async fn snapshot(&self) -> Result<HostSnapshot, CoreError> {
        if !cfg!(target_os = "linux") {
            return Err(CoreError::new(
                CoreErrorKind::Unsupported,
                "Interface snapshot requires iproute2",
            ));
        }
        let addrs = self.ip(&["-o", "addr", "show"]).await?;
        let routes = self.ip(&["-4", "route", "show"]).await?;
        Ok(HostSnapshot {
            interfaces: parse_ip_addr_output(&addrs),
            routes: parse_route_table(&routes),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Parsers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse `ip -o addr show` output into interfaces, preserving order.
///
/// Lines look like `3: tun0    inet 10.8.0.1 peer 10.8.0.2/32 scope global tun0`.
pub fn parse_ip_addr_output(output: &str) -> Vec<HostInterface> {
    let mut interfaces: Vec<HostInterface> = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || !parts[0].ends_with(':') {
            continue;
        }
        // `eth0@if12` for veth pairs
        let name = parts[1].split('@').next().unwrap_or(parts[1]).to_string();
        let family = parts[2];
        if family != "inet" && family != "inet6" {
            continue;
        }
        let addr = parts[3].split('/').next().unwrap_or(parts[3]).to_string();

        match interfaces.iter_mut().find(|i| i.name == name) {
            Some(iface) => {
                if !iface.addresses.contains(&addr) {
                    iface.addresses.push(addr);
                }
            }
            None => interfaces.push(HostInterface {
                name,
                addresses: vec![addr],
            }),
        }
    }

    interfaces
}

/// Parse `ip route show` output.
///
/// `default` maps to `0.0.0.0/0`; destinations without a prefix are host
/// routes.
pub fn parse_route_table(output: &str) -> Vec<HostRoute> {
    let mut entries = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }

        let (destination, mask) = if parts[0] == "default" {
            ("0.0.0.0".to_string(), prefix_to_mask(0))
        } else if let Some((net, prefix)) = parts[0].split_once('/') {
            match prefix.parse::<u8>() {
                Ok(p) => (net.to_string(), prefix_to_mask(p)),
                Err(_) => continue,
            }
        } else if parts[0].parse::<Ipv4Addr>().is_ok() {
            (parts[0].to_string(), prefix_to_mask(32))
        } else {
            continue;
        };

        let gateway = parts
            .iter()
            .position(|&p| p == "via")
            .and_then(|i| parts.get(i + 1))
            .unwrap_or(&"0.0.0.0")
            .to_string();
        let dev = parts
            .iter()
            .position(|&p| p == "dev")
            .and_then(|i| parts.get(i + 1))
            .unwrap_or(&"")
            .to_string();
        let metric = parts
            .iter()
            .position(|&p| p == "metric")
            .and_then(|i| parts.get(i + 1))
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);

        entries.push(HostRoute {
            destination,
            mask,
            gateway,
            dev,
            metric,
        });
    }

    entries
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  IPv4 helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert a CIDR prefix length to a subnet mask.
pub fn prefix_to_mask(prefix: u8) -> String {
    let bits: u32 = match prefix {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => !0u32 << (32 - p),
    };
    Ipv4Addr::from(bits).to_string()
}

/// First host address of `network`/`mask`: `(network & mask) + 1`.
pub fn first_host(network: &str, mask: &str) -> Option<Ipv4Addr> {
    let net = u32::from(network.parse::<Ipv4Addr>().ok()?);
    let m = u32::from(mask.parse::<Ipv4Addr>().ok()?);
    Some(Ipv4Addr::from((net & m).wrapping_add(1)))
}
