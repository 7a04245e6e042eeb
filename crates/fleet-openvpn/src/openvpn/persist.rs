//! Pool persistence.
//!
//! Only what is needed to relaunch a daemon is stored: its captured
//! process, its config file and whether it was running when saved.

use crate::openvpn::pool::VpnPool;
use crate::openvpn::process::ProcessHandle;
use crate::openvpn::types::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedVpn {
    pub process: ProcessHandle,
    pub conffile: String,
    pub start_at_boot: bool,
}

pub fn snapshot(pool: &VpnPool) -> Vec<PersistedVpn> {
    pool.iter()
        .map(|vpn| PersistedVpn {
            process: vpn.process.clone(),
            conffile: vpn.conffile.clone(),
            start_at_boot: vpn.running,
        })
        .collect()
}

pub fn save_state(path: &Path, entries: &[PersistedVpn]) -> Result<(), OpenVpnError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| OpenVpnError::io(format!("Cannot create {}", dir.display()), e))?;
    }
    let json = serde_json::to_string_pretty(entries).map_err(|e| {
        OpenVpnError::new(OpenVpnErrorKind::Internal, "Cannot serialise VPN state")
            .with_detail(e.to_string())
    })?;
    std::fs::write(path, json)
        .map_err(|e| OpenVpnError::io(format!("Cannot write {}", path.display()), e))?;
    log::info!("saved {} VPN(s) to {}", entries.len(), path.display());
    Ok(())
}

/// `Ok(None)` when the file cannot be read; an error when it is not valid.
pub fn load_state(path: &Path) -> Result<Option<Vec<PersistedVpn>>, OpenVpnError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            log::debug!("no VPN state at {}: {}", path.display(), e);
            return Ok(None);
        }
    };
    serde_json::from_str(&text).map(Some).map_err(|e| {
        OpenVpnError::new(
            OpenVpnErrorKind::ParseError,
            format!("Invalid VPN state file {}", path.display()),
        )
        .with_detail(e.to_string())
    })
}
