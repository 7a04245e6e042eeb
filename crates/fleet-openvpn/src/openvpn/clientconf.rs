//! Client configuration for connecting to one of our servers.
//!
//! Picks the store certificates a server will accept (same issuer as the
//! server's CA) and renders a ready-to-use client `.ovpn` for them.

use crate::openvpn::certs::{CertificateEntry, CertificateStore, NamedCertificate};
use crate::openvpn::pool::VpnPool;
use crate::openvpn::types::*;
use crate::openvpn::vpn::Vpn;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Server instances, in pool order.
pub fn server_vpns(pool: &VpnPool) -> Vec<&Vpn> {
    pool.servers()
}

/// Store certificates signed by `vpn`'s CA, minus the server's own.
pub fn client_certificates(
    store: &CertificateStore,
    vpn: &Vpn,
) -> Result<Vec<NamedCertificate>, OpenVpnError> {
    let ca_subject = vpn
        .public
        .ca
        .as_ref()
        .and_then(CertificateEntry::summary)
        .map(|s| s.subject.clone())
        .ok_or_else(|| {
            OpenVpnError::new(
                OpenVpnErrorKind::InvalidRequest,
                format!("VPN {} has no readable CA certificate", vpn.portable_id),
            )
        })?;
    let server_subject = vpn
        .public
        .cert
        .as_ref()
        .and_then(CertificateEntry::summary)
        .map(|s| s.subject.clone());

    Ok(store
        .list_certificates()?
        .into_iter()
        .filter(|named| match named.cert.summary() {
            Some(s) => s.issuer == ca_subject && Some(&s.subject) != server_subject.as_ref(),
            None => false,
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfigRequest {
    /// Store certificate the client authenticates with.
    pub cert: String,
    /// Address clients dial; defaults to the server's `local` directive.
    pub remote_host: Option<String>,
    #[serde(default)]
    pub ns_cert_type_server: bool,
}

/// Render a client `.ovpn` for the server `vpn`.
pub fn render_client_config(
    vpn: &Vpn,
    req: &ClientConfigRequest,
    store: &CertificateStore,
) -> Result<String, OpenVpnError> {
    if !vpn.is_server() {
        return Err(OpenVpnError::new(
            OpenVpnErrorKind::InvalidRequest,
            format!("VPN {} is not a server", vpn.portable_id),
        ));
    }

    let address = req
        .remote_host
        .as_deref()
        .or(vpn.public.local.as_deref())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            OpenVpnError::new(
                OpenVpnErrorKind::InvalidRequest,
                "remote_host is required when the server has no local address",
            )
        })?;

    let cert = store.cert_path(&req.cert);
    if !cert.is_file() {
        return Err(OpenVpnError::new(
            OpenVpnErrorKind::FileNotFound,
            format!("No such certificate: {}", req.cert),
        )
        .with_detail(cert.display().to_string()));
    }
    let ca = vpn
        .internal
        .ca_file
        .clone()
        .unwrap_or_else(|| store.ca_cert.clone());

    let proto = match vpn.public.proto.as_deref().map(str::trim) {
        Some("tcp-server") | Some("tcp") => "tcp-client",
        Some(p) if !p.is_empty() => p,
        _ => "udp",
    };

    let mut out = String::new();
    // writing to a String cannot fail
    let _ = writeln!(out, "client");
    let _ = writeln!(out, "dev {}", vpn.public.dev.as_deref().unwrap_or("tun"));
    let _ = writeln!(out, "proto {}", proto);
    let _ = writeln!(
        out,
        "remote {} {}",
        address,
        vpn.public.port.as_deref().unwrap_or("1194")
    );
    let _ = writeln!(out, "nobind");
    let _ = writeln!(out, "ca {}", ca.display());
    let _ = writeln!(out, "cert {}", cert.display());
    let _ = writeln!(out, "key {}", store.key_path(&req.cert).display());
    if let Some(k) = vpn.internal.ping() {
        let _ = writeln!(out, "keepalive {} {}", k.interval, k.timeout);
    }
    if req.ns_cert_type_server {
        let _ = writeln!(out, "ns-cert-type server");
    }
    Ok(out)
}
