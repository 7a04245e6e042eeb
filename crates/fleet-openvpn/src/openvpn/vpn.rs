//! The VPN record.
//!
//! A [`Vpn`] is rebuilt from scratch on every discovery pass: config file
//! first, live command line on top, then the role-specific sources (status
//! and ip-pool files for servers, the management interface for clients),
//! and finally the host interface and routes that carry its traffic.

use crate::openvpn::certs::CertificateEntry;
use crate::openvpn::config::{cmdline_to_conf, parse_directives, Directives, InternalDirectives, PublicDirectives};
use crate::openvpn::ippool::{read_ip_pool, IpPool};
use crate::openvpn::management::{self, ClientAttributes};
use crate::openvpn::process::ProcessHandle;
use crate::openvpn::resolve::FileResolver;
use crate::openvpn::status::{
    portable_client_list, read_status, ClientRecord, StatusSnapshot, StatusSummary, StatusVersion,
};
use fleet_core::network::first_host;
use fleet_core::{Diagnostic, HostRoute, HostSnapshot};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// What kind of instance a VPN is, with the data only that kind has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum VpnRole {
    Server {
        clients: Vec<ClientRecord>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ip_pool: Option<IpPool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<StatusSummary>,
    },
    Client {
        client_info: ClientAttributes,
    },
    /// Neither `server` nor `client`: static-key / `ifconfig` tunnels.
    PointToPoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct Vpn {
    pub human_index: usize,
    pub portable_id: String,
    pub running: bool,
    pub pid: u32,
    pub conffile: String,
    #[serde(flatten)]
    pub public: PublicDirectives,
    #[serde(flatten)]
    pub role: VpnRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    pub routes: Vec<HostRoute>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,

    #[serde(skip)]
    pub process: ProcessHandle,
    #[serde(skip)]
    pub internal: InternalDirectives,
    #[serde(skip)]
    pub status: Option<StatusSnapshot>,
    /// Log files named in the configuration, for the log registry.
    #[serde(skip)]
    pub log_files: Vec<PathBuf>,
}

/// Shared inputs of one discovery pass.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub host: &'a HostSnapshot,
    pub management_timeout: Duration,
}

impl Vpn {
    /// Build a record for `process`, reading every source it references.
    pub async fn build(
        process: ProcessHandle,
        conffile: String,
        running: bool,
        ctx: BuildContext<'_>,
    ) -> Vpn {
        let resolver = FileResolver::new(process.pwd(), conffile.clone());
        let mut diagnostics = Vec::new();

        let mut directives = Directives::default();
        if !conffile.trim().is_empty() {
            match resolver.find_file(&conffile).filter(|p| p.is_file()) {
                Some(path) => match std::fs::read_to_string(&path) {
                    Ok(text) => directives = parse_directives(&text, &resolver),
                    Err(e) => diagnostics.push(Diagnostic::error(
                        "conffile",
                        format!("couldn't open config file '{}': {}", path.display(), e),
                    )),
                },
                None => diagnostics.push(Diagnostic::warn(
                    "conffile",
                    format!("couldn't open config file '{}'", conffile),
                )),
            }
        }
        directives.merge(parse_directives(&cmdline_to_conf(&process.cmdline), &resolver));
        directives.finalize();

        let Directives {
            public,
            internal,
            log_files,
        } = directives;

        for (field, entry) in [("ca", &public.ca), ("cert", &public.cert)] {
            if let Some(CertificateEntry::Error { err, .. }) = entry {
                diagnostics.push(Diagnostic::error(field, err.clone()));
            }
        }

        let mut status = None;
        let role = if public.server.is_some() {
            let mut clients = Vec::new();
            if let Some(status_name) = &internal.status {
                let version = internal.status_version.as_deref().unwrap_or("1");
                let path = resolver.find_file(status_name);
                match read_status(path.as_deref(), version) {
                    Ok(snap) => {
                        if let Some(err) = &snap.err {
                            diagnostics.push(Diagnostic::warn("status", err.clone()));
                        }
                        if let Ok(v) = StatusVersion::from_directive(version) {
                            clients = portable_client_list(&snap, v);
                        }
                        status = Some(snap);
                    }
                    Err(e) => diagnostics.push(Diagnostic::error("status", e.to_string())),
                }
            }
            let ip_pool = internal.ifconfig_pool_persist.as_ref().map(|name| {
                let pool = read_ip_pool(resolver.find_file(name).as_deref(), name);
                if let Some(err) = &pool.err {
                    diagnostics.push(Diagnostic::warn("ip_pool", err.clone()));
                }
                pool
            });
            VpnRole::Server {
                clients,
                ip_pool,
                status: status.as_ref().map(StatusSnapshot::summary),
            }
        } else if public.client {
            let client_info = match &internal.management {
                Some(m) => management::query(&m.address, &m.port, ctx.management_timeout).await,
                None => ClientAttributes::unavailable(),
            };
            if let Some(err) = &client_info.management_interface_err {
                diagnostics.push(Diagnostic::warn("management", err.clone()));
            }
            VpnRole::Client { client_info }
        } else {
            VpnRole::PointToPoint
        };

        let mut vpn = Vpn {
            human_index: 0,
            portable_id: process.portable_id.clone(),
            running,
            pid: process.pid,
            conffile,
            public,
            role,
            virtual_address: None,
            interface: None,
            routes: Vec::new(),
            diagnostics,
            process,
            internal,
            status,
            log_files,
        };
        vpn.virtual_address = vpn.find_virtual_address();
        vpn.interface = vpn
            .virtual_address
            .as_deref()
            .and_then(|a| ctx.host.interface_with_address(a))
            .map(|i| i.name.clone());
        vpn.routes = match vpn.interface.as_deref() {
            Some(dev) if !dev.trim().is_empty() => ctx.host.routes_via(dev),
            _ => Vec::new(),
        };
        vpn
    }

    fn find_virtual_address(&self) -> Option<String> {
        match &self.role {
            VpnRole::Client { client_info } => client_info.virtual_address.clone(),
            VpnRole::Server { .. } => self
                .public
                .server
                .as_ref()
                .and_then(|s| first_host(&s.network, &s.netmask))
                .map(|a| a.to_string()),
            VpnRole::PointToPoint => self.internal.ifconfig.as_ref().map(|i| i.address.clone()),
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self.role, VpnRole::Server { .. })
    }

    pub fn is_client(&self) -> bool {
        matches!(self.role, VpnRole::Client { .. })
    }

    pub fn set_not_running(&mut self) {
        self.running = false;
    }

    /// Same command line started from the same directory.
    pub fn same_invocation(&self, other: &Vpn) -> bool {
        self.process.same_invocation(&other.process)
    }

    pub fn resolver(&self) -> FileResolver {
        FileResolver::new(self.process.pwd(), self.conffile.clone())
    }

    /// The daemon's log file (`log`, else `log-append`), if it exists.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.internal
            .log_path()
            .and_then(|name| self.resolver().find_file(name))
    }
}
