//! Process snapshot reader.
//!
//! A [`ProcessHandle`] is an immutable capture of one daemon process: its
//! argument vector, environment and working directory, plus the
//! `portable_id` used to recognise the same invocation across polls.

use crate::openvpn::types::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Process handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    pub cmdline: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Working directory reported by the OS, used when `PWD` is unset.
    pub working_dir: Option<PathBuf>,
    pub portable_id: String,
}

impl ProcessHandle {
    /// Build a handle from raw parts.
    ///
    /// `openvpn <file>` is normalised to `openvpn --config <file>` so the
    /// config path is always found after a `--config` token.
    pub fn from_parts(
        pid: u32,
        mut cmdline: Vec<String>,
        env: BTreeMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Self {
        if cmdline.len() == 2 {
            cmdline.insert(1, "--config".to_string());
        }
        let mut handle = Self {
            pid,
            cmdline,
            env,
            working_dir,
            portable_id: String::new(),
        };
        handle.portable_id = portable_id(&handle.cmdline, handle.pwd().as_deref());
        handle
    }

    /// Directory the daemon was started from.
    pub fn pwd(&self) -> Option<String> {
        self.env.get("PWD").cloned().or_else(|| {
            self.working_dir
                .as_ref()
                .map(|d| d.to_string_lossy().into_owned())
        })
    }

    /// The argument following the first `--config` token, or `""`.
    pub fn conffile(&self) -> String {
        self.cmdline
            .iter()
            .skip(1)
            .zip(self.cmdline.iter())
            .find(|(_, prev)| prev.trim_start().starts_with("--config"))
            .map(|(arg, _)| arg.clone())
            .unwrap_or_default()
    }

    /// Same argument vector started from the same directory.
    pub fn same_invocation(&self, other: &ProcessHandle) -> bool {
        self.cmdline == other.cmdline && self.pwd() == other.pwd()
    }
}

/// First 16 hex digits of SHA-256 over the argument vector and working dir.
pub fn portable_id(cmdline: &[String], pwd: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    for arg in cmdline {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([0x1eu8]);
    if let Some(pwd) = pwd {
        hasher.update(pwd.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Process source
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// OS process introspection.
pub trait ProcessSource: Send + Sync {
    /// Pids of processes whose executable name is `name`.
    fn pids(&self, name: &str) -> Vec<u32>;

    /// Capture a process. Fails with `NotFound` if it exited meanwhile.
    fn capture(&self, pid: u32) -> Result<ProcessHandle, OpenVpnError>;
}

/// [`ProcessSource`] backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessSource;

impl SysinfoProcessSource {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSource for SysinfoProcessSource {
    fn pids(&self, name: &str) -> Vec<u32> {
        use sysinfo::{ProcessRefreshKind, RefreshKind, System};

        let system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
        );
        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, p)| p.thread_kind().is_none())
            .filter(|(_, p)| p.name().to_string_lossy() == name)
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        pids
    }

    fn capture(&self, pid: u32) -> Result<ProcessHandle, OpenVpnError> {
        use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

        let sysinfo_pid = sysinfo::Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sysinfo_pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        let process = system.process(sysinfo_pid).ok_or_else(|| {
            OpenVpnError::new(
                OpenVpnErrorKind::NotFound,
                format!("Process {} is no longer running", pid),
            )
        })?;

        let cmdline = process
            .cmd()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let env = process
            .environ()
            .iter()
            .filter_map(|kv| {
                let kv = kv.to_string_lossy();
                kv.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();
        let cwd = process.cwd().map(|p| p.to_path_buf());

        Ok(ProcessHandle::from_parts(pid, cmdline, env, cwd))
    }
}

/// Find a free TCP port for the management interface.
pub fn find_free_mgmt_port() -> Result<u16, OpenVpnError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| OpenVpnError::io("Cannot bind to ephemeral port", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| OpenVpnError::io("Cannot get local addr", e))?
        .port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn env_pwd(pwd: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PWD".to_string(), pwd.to_string());
        env
    }

    // ── argv normalisation ──

    #[test]
    fn two_arg_cmdline_gets_config_token() {
        let h = ProcessHandle::from_parts(1, args(&["openvpn", "server.conf"]), env_pwd("/etc/openvpn"), None);
        assert_eq!(h.cmdline, args(&["openvpn", "--config", "server.conf"]));
        assert_eq!(h.conffile(), "server.conf");
    }

    #[test]
    fn conffile_after_config_flag() {
        let h = ProcessHandle::from_parts(
            1,
            args(&["openvpn", "--daemon", "--config", "/etc/openvpn/a.conf", "--verb", "3"]),
            BTreeMap::new(),
            None,
        );
        assert_eq!(h.conffile(), "/etc/openvpn/a.conf");
    }

    #[test]
    fn conffile_missing() {
        let h = ProcessHandle::from_parts(1, args(&["openvpn", "--dev", "tun", "--client"]), BTreeMap::new(), None);
        assert_eq!(h.conffile(), "");
    }

    #[test]
    fn single_arg_cmdline_untouched() {
        let h = ProcessHandle::from_parts(1, args(&["openvpn"]), BTreeMap::new(), None);
        assert_eq!(h.cmdline, args(&["openvpn"]));
    }

    // ── identity ──

    #[test]
    fn pwd_prefers_environment() {
        let h = ProcessHandle::from_parts(1, args(&["openvpn"]), env_pwd("/home/a"), Some("/tmp".into()));
        assert_eq!(h.pwd().as_deref(), Some("/home/a"));
        let h = ProcessHandle::from_parts(1, args(&["openvpn"]), BTreeMap::new(), Some("/tmp".into()));
        assert_eq!(h.pwd().as_deref(), Some("/tmp"));
    }

    #[test]
    fn portable_id_is_stable_across_pids() {
        let a = ProcessHandle::from_parts(10, args(&["openvpn", "a.conf"]), env_pwd("/etc/openvpn"), None);
        let b = ProcessHandle::from_parts(20, args(&["openvpn", "a.conf"]), env_pwd("/etc/openvpn"), None);
        assert_eq!(a.portable_id, b.portable_id);
        assert_eq!(a.portable_id.len(), 16);
        assert!(a.same_invocation(&b));
    }

    #[test]
    fn portable_id_depends_on_pwd() {
        let a = ProcessHandle::from_parts(10, args(&["openvpn", "a.conf"]), env_pwd("/etc/openvpn"), None);
        let b = ProcessHandle::from_parts(10, args(&["openvpn", "a.conf"]), env_pwd("/root"), None);
        assert_ne!(a.portable_id, b.portable_id);
        assert!(!a.same_invocation(&b));
    }

    #[test]
    fn portable_id_separates_arguments() {
        let a = portable_id(&args(&["ab", "c"]), None);
        let b = portable_id(&args(&["a", "bc"]), None);
        assert_ne!(a, b);
    }

    // ── OS access ──

    #[test]
    fn capture_of_current_process() {
        let me = std::process::id();
        let h = SysinfoProcessSource::new().capture(me).unwrap();
        assert_eq!(h.pid, me);
        assert!(!h.cmdline.is_empty());
    }

    #[test]
    fn capture_of_missing_process_is_not_found() {
        let err = SysinfoProcessSource::new().capture(u32::MAX - 1).unwrap_err();
        assert_eq!(err.kind, OpenVpnErrorKind::NotFound);
    }

    #[test]
    fn find_free_mgmt_port_returns_nonzero() {
        assert!(find_free_mgmt_port().unwrap() > 0);
    }
}
