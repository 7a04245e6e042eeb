//! Shared constants and the crate-level error type.

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process name the discovery pass looks for.
pub const DAEMON_NAME: &str = "openvpn";

/// Log-registry category for daemon logs.
pub const LOG_CATEGORY: &str = "openvpn";
pub const LOG_CATEGORY_NAME: &str = "OpenVPN";

/// Warning attached to clients configured without `management`.
pub const MANAGEMENT_UNAVAILABLE: &str =
    "OpenVPN Management Interface unavailable for this client connection";

/// Returned by `start` on a VPN that is already running.
pub const ALREADY_STARTED: &str = "Already started.";

/// Informational message attached to accepted start requests.
pub const START_ACCEPTED: &str =
    "Request accepted. Poll the VPN list again to see the updated state, or check the logs.";

/// Keepalive used for servers started on request.
pub const DEFAULT_KEEPALIVE: (u32, u32) = (10, 120);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenVpnErrorKind {
    NotFound,
    FileNotFound,
    CertificateParseError,
    ManagementConnectFailed,
    ManagementProtocol,
    Timeout,
    UnknownStatusVersion,
    ProcessSpawnFailed,
    IoError,
    ParseError,
    InvalidRequest,
    Internal,
}

/// Crate-level error.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub struct OpenVpnError {
    pub kind: OpenVpnErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl fmt::Display for OpenVpnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(d) = &self.detail {
            write!(f, " ({})", d)?;
        }
        Ok(())
    }
}

impl OpenVpnError {
    pub fn new(kind: OpenVpnErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn io(msg: impl Into<String>, err: std::io::Error) -> Self {
        Self::new(OpenVpnErrorKind::IoError, msg).with_detail(err.to_string())
    }
}

impl From<OpenVpnError> for String {
    fn from(e: OpenVpnError) -> String {
        e.to_string()
    }
}

impl From<fleet_core::CoreError> for OpenVpnError {
    fn from(e: fleet_core::CoreError) -> Self {
        let kind = match e.kind {
            fleet_core::CoreErrorKind::IoError => OpenVpnErrorKind::IoError,
            fleet_core::CoreErrorKind::CommandFailed => OpenVpnErrorKind::ProcessSpawnFailed,
            fleet_core::CoreErrorKind::Unsupported => OpenVpnErrorKind::Internal,
        };
        Self {
            kind,
            message: e.message,
            detail: e.detail,
        }
    }
}
