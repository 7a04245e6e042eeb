//! Reconciliation service.
//!
//! Runs discovery passes over the host's daemon processes and implements
//! the lifecycle operations (start, stop, save, restore) against a
//! caller-owned [`VpnPool`].  Callers serialise access: one pass or
//! operation at a time per pool.

use crate::openvpn::certs::CertificateStore;
use crate::openvpn::persist::{load_state, save_state, snapshot, PersistedVpn};
use crate::openvpn::pool::VpnPool;
use crate::openvpn::process::{find_free_mgmt_port, ProcessSource};
use crate::openvpn::types::*;
use crate::openvpn::vpn::{BuildContext, Vpn};
use fleet_core::network::prefix_to_mask;
use fleet_core::{shell_quote, CommandOutcome, CommandRunner, HostProbe, HostSnapshot, LogFile, LogRegistry};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// DH size used when the server certificate does not carry an RSA key.
pub const DEFAULT_DH_BITS: usize = 2048;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Settings and requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Binary to launch; its file name is what discovery looks for.
    pub daemon_binary: String,
    pub state_file: PathBuf,
    /// Pool as of the last command, so daemons that exit between runs are
    /// still known as stopped.
    pub pool_file: PathBuf,
    pub log_dir: PathBuf,
    /// Group given write access to logs of newly started daemons.
    pub log_group: String,
    /// `sudo` or equivalent; empty runs commands unprivileged.
    pub privilege_command: String,
    pub management_timeout: Duration,
    pub certificates: CertificateStore,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            daemon_binary: DAEMON_NAME.to_string(),
            state_file: PathBuf::from("/var/lib/ovpn-fleet/vpn.json"),
            pool_file: PathBuf::from("/var/lib/ovpn-fleet/pool.json"),
            log_dir: PathBuf::from("/var/log"),
            log_group: "onboard".to_string(),
            privilege_command: "sudo".to_string(),
            management_timeout: Duration::from_secs(3),
            certificates: CertificateStore::from_dir("/etc/ovpn-fleet/ssl"),
        }
    }
}

/// Parameters of a brand new daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVpnRequest {
    /// CA name in the store, or `__default__`.
    pub ca: String,
    pub cert: String,
    pub proto: String,
    /// Server mode: network in CIDR (`10.8.0.0/24`) or `net/mask` form.
    pub server_net: Option<String>,
    pub port: Option<u16>,
    /// Client mode.
    pub remote_host: Option<String>,
    pub remote_port: Option<String>,
    #[serde(default)]
    pub ns_cert_type_server: bool,
}

/// Start or stop an existing VPN, addressed by portable id or by
/// 1-based human index (the value of `start` / `stop`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub portable_id: Option<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
    #[serde(default)]
    pub rmlog: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Also delete the daemon's log file and forget it.
    pub rmlog: bool,
}

/// Result of a lifecycle operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl From<CommandOutcome> for LifecycleOutcome {
    fn from(o: CommandOutcome) -> Self {
        Self {
            ok: o.ok,
            err: o.err,
            stderr: o.stderr,
            ..Default::default()
        }
    }
}

impl LifecycleOutcome {
    pub fn failed(err: impl Into<String>) -> Self {
        Self {
            ok: false,
            err: Some(err.into()),
            ..Default::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenVpnService {
    settings: ServiceSettings,
    processes: Arc<dyn ProcessSource>,
    host: Arc<dyn HostProbe>,
    runner: Arc<dyn CommandRunner>,
    logs: Arc<LogRegistry>,
}

impl OpenVpnService {
    pub async fn new(
        settings: ServiceSettings,
        processes: Arc<dyn ProcessSource>,
        host: Arc<dyn HostProbe>,
        runner: Arc<dyn CommandRunner>,
        logs: Arc<LogRegistry>,
    ) -> Self {
        logs.register_category(LOG_CATEGORY, LOG_CATEGORY_NAME).await;
        Self {
            settings,
            processes,
            host,
            runner,
            logs,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn logs(&self) -> &Arc<LogRegistry> {
        &self.logs
    }

    fn daemon_name(&self) -> String {
        Path::new(&self.settings.daemon_binary)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DAEMON_NAME.to_string())
    }

    /// Prefix `cmd` with the privilege command, keeping the environment
    /// when `keep_env` is set.
    fn elevated(&self, cmd: &str, keep_env: bool) -> String {
        let sudo = self.settings.privilege_command.trim();
        match (sudo.is_empty(), keep_env) {
            (true, _) => cmd.to_string(),
            (false, true) => format!("{} -E {}", sudo, cmd),
            (false, false) => format!("{} {}", sudo, cmd),
        }
    }

    async fn host_snapshot(&self) -> HostSnapshot {
        match self.host.snapshot().await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("host network snapshot unavailable: {}", e);
                HostSnapshot::default()
            }
        }
    }

    async fn build(&self, vpn: Vpn) -> Vpn {
        for path in &vpn.log_files {
            self.logs
                .register(LogFile::new(path.clone(), LOG_CATEGORY).hidden(false))
                .await;
        }
        vpn
    }

    // ── discovery ───────────────────────────────────────────────────

    /// One discovery pass: every known VPN is marked stopped, then each
    /// live daemon process is rebuilt and put back in (or added to) the
    /// pool as running.
    pub async fn discover(&self, pool: &mut VpnPool) {
        let host = self.host_snapshot().await;
        let ctx = BuildContext {
            host: &host,
            management_timeout: self.settings.management_timeout,
        };

        pool.mark_all_not_running();

        let name = self.daemon_name();
        for pid in self.processes.pids(&name) {
            let process = match self.processes.capture(pid) {
                Ok(p) => p,
                Err(e) => {
                    log::debug!("skipping pid {}: {}", pid, e);
                    continue;
                }
            };
            let conffile = process.conffile();
            let vpn = Vpn::build(process, conffile, true, ctx).await;
            let vpn = self.build(vpn).await;
            pool.add_or_replace(vpn);
        }

        pool.renumber();
        log::debug!("discovery pass: {} VPN(s) known", pool.len());
    }

    // ── lifecycle ───────────────────────────────────────────────────

    /// Launch a new daemon from request parameters.
    pub async fn start_new(&self, req: &NewVpnRequest) -> Result<LifecycleOutcome, OpenVpnError> {
        if req.proto.trim().is_empty() {
            return Err(OpenVpnError::new(OpenVpnErrorKind::InvalidRequest, "proto is required"));
        }
        if req.server_net.is_none() && req.remote_host.is_none() {
            return Err(OpenVpnError::new(
                OpenVpnErrorKind::InvalidRequest,
                "either server_net or remote_host is required",
            ));
        }

        let store = &self.settings.certificates;
        let mgmt_port = find_free_mgmt_port()?;
        let logfile = self
            .settings
            .log_dir
            .join(format!("ovpn-{}.log", uuid::Uuid::new_v4()));

        let mut args: Vec<String> = vec![self.settings.daemon_binary.clone()];
        let mut push = |words: &[&str]| args.extend(words.iter().map(|w| w.to_string()));
        let path = |p: PathBuf| p.to_string_lossy().into_owned();

        push(&["--management", "127.0.0.1", mgmt_port.to_string().as_str()]);
        push(&["--daemon"]);
        push(&["--log-append", path(logfile.clone()).as_str()]);
        push(&["--ca", path(store.ca_path(&req.ca)).as_str()]);
        push(&["--cert", path(store.cert_path(&req.cert)).as_str()]);
        push(&["--key", path(store.key_path(&req.cert)).as_str()]);
        let crl = store.crl_path(&req.ca);
        if crl.exists() {
            push(&["--crl-verify", path(crl).as_str()]);
        }
        push(&["--dev", "tun"]);
        push(&["--proto", req.proto.trim()]);

        if let Some(net) = &req.server_net {
            let (network, netmask) = parse_server_net(net)?;
            let port = req.port.ok_or_else(|| {
                OpenVpnError::new(OpenVpnErrorKind::InvalidRequest, "port is required in server mode")
            })?;
            let bits = store.key_bits(&req.cert)?.unwrap_or_else(|| {
                log::warn!(
                    "certificate '{}' has no RSA key, using dh{}.pem",
                    req.cert,
                    DEFAULT_DH_BITS
                );
                DEFAULT_DH_BITS
            });
            let (interval, timeout) = DEFAULT_KEEPALIVE;
            push(&["--server", network.as_str(), netmask.as_str()]);
            push(&["--port", port.to_string().as_str()]);
            push(&["--keepalive", interval.to_string().as_str(), timeout.to_string().as_str()]);
            push(&["--dh", path(store.dh_path(bits)).as_str()]);
        } else if let Some(host) = &req.remote_host {
            let port = req.remote_port.as_deref().unwrap_or("1194");
            push(&["--client", "--nobind"]);
            push(&["--remote", host.as_str(), port]);
            if req.ns_cert_type_server {
                push(&["--ns-cert-type", "server"]);
            }
        }

        let log_arg = shell_quote(&logfile.to_string_lossy());
        let cmd: Vec<String> = args.iter().map(|a| shell_quote(a)).collect();
        let script = [
            self.elevated(&format!("touch {}", log_arg), false),
            self.elevated(&format!("chown :{} {}", self.settings.log_group, log_arg), false),
            self.elevated(&format!("chmod g+rw {}", log_arg), false),
            "cd /".to_string(),
            self.elevated(&cmd.join(" "), true),
        ]
        .join("\n");

        log::info!("starting new VPN, log at {}", logfile.display());
        let mut outcome: LifecycleOutcome = self.runner.run(&script).await.into();
        self.logs
            .register(LogFile::new(logfile.clone(), LOG_CATEGORY).hidden(true))
            .await;
        outcome.log = Some(logfile);
        Ok(outcome)
    }

    /// Relaunch a stopped VPN with its original command line, from its
    /// original working directory.
    pub async fn start(&self, vpn: &Vpn) -> LifecycleOutcome {
        if vpn.running {
            return LifecycleOutcome::failed(ALREADY_STARTED);
        }
        let pwd = vpn.process.pwd().unwrap_or_else(|| "/".to_string());
        let mut cmd: Vec<String> = vpn.process.cmdline.iter().map(|a| shell_quote(a)).collect();
        if !vpn.internal.daemon {
            cmd.push("--daemon".to_string());
        }
        let script = format!("cd {} && {}", shell_quote(&pwd), self.elevated(&cmd.join(" "), true));

        log::info!("starting VPN {} ({})", vpn.human_index, vpn.portable_id);
        let mut outcome: LifecycleOutcome = self.runner.bgexec(&script).await.into();
        if outcome.ok {
            outcome.info = Some(START_ACCEPTED.to_string());
        }
        outcome
    }

    /// Signal a running VPN and optionally remove its log.
    pub async fn stop(&self, vpn: &Vpn, opts: StopOptions) -> LifecycleOutcome {
        let mut outcome = if vpn.running {
            log::info!("stopping VPN {} (pid {})", vpn.human_index, vpn.pid);
            self.runner
                .run(&self.elevated(&format!("kill {}", vpn.pid), false))
                .await
                .into()
        } else {
            LifecycleOutcome {
                ok: true,
                info: Some("Not running.".to_string()),
                ..Default::default()
            }
        };

        if opts.rmlog {
            if let Some(logfile) = vpn.log_file() {
                let rm = self
                    .runner
                    .run(&self.elevated(&format!("rm {}", shell_quote(&logfile.to_string_lossy())), false))
                    .await;
                if !rm.ok {
                    outcome.ok = false;
                    outcome.err = rm.err;
                }
                self.logs.delete(&logfile).await;
                outcome.log = Some(logfile);
            }
        }
        outcome
    }

    /// Dispatch a start/stop request. The portable id is preferred since
    /// human indices shift when the pool changes.
    pub async fn modify_from_request(
        &self,
        pool: &VpnPool,
        req: &ModifyRequest,
    ) -> Result<LifecycleOutcome, OpenVpnError> {
        let opts = StopOptions { rmlog: req.rmlog };
        let by_id = req
            .portable_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .and_then(|id| pool.by_portable_id(id.trim()));

        if let Some(vpn) = by_id {
            if req.stop.is_some() {
                return Ok(self.stop(vpn, opts).await);
            }
            if req.start.is_some() {
                return Ok(self.start(vpn).await);
            }
            return Err(OpenVpnError::new(
                OpenVpnErrorKind::InvalidRequest,
                "neither start nor stop requested",
            ));
        }

        if let Some(index) = &req.stop {
            return Ok(self.stop(by_index(pool, index)?, opts).await);
        }
        if let Some(index) = &req.start {
            return Ok(self.start(by_index(pool, index)?).await);
        }
        Err(OpenVpnError::new(
            OpenVpnErrorKind::InvalidRequest,
            "neither start nor stop requested",
        ))
    }

    // ── persistence ─────────────────────────────────────────────────

    /// Seed `pool` with the VPNs recorded by [`store_pool`](Self::store_pool),
    /// as last seen. The next discovery pass settles which are running.
    pub async fn load_pool(&self, pool: &mut VpnPool) -> Result<usize, OpenVpnError> {
        let Some(entries) = load_state(&self.settings.pool_file)? else {
            return Ok(0);
        };
        let host = self.host_snapshot().await;
        let mut loaded = 0;
        for entry in entries {
            if pool.position_by_portable_id(&entry.process.portable_id).is_some() {
                continue;
            }
            let running = entry.start_at_boot;
            pool.push(self.build_recorded(entry, running, &host).await);
            loaded += 1;
        }
        log::debug!("{} known VPN(s) loaded from {}", loaded, self.settings.pool_file.display());
        Ok(loaded)
    }

    /// Record the pool for the next [`load_pool`](Self::load_pool).
    pub fn store_pool(&self, pool: &VpnPool) -> Result<(), OpenVpnError> {
        save_state(&self.settings.pool_file, &snapshot(pool))
    }

    async fn build_recorded(&self, entry: PersistedVpn, running: bool, host: &HostSnapshot) -> Vpn {
        let ctx = BuildContext {
            host,
            management_timeout: self.settings.management_timeout,
        };
        let vpn = Vpn::build(entry.process, entry.conffile, running, ctx).await;
        self.build(vpn).await
    }

    /// Write every known VPN to the state file; running ones are flagged
    /// to be started on restore.
    pub async fn save(&self, pool: &mut VpnPool) -> Result<(), OpenVpnError> {
        if pool.is_empty() {
            self.discover(pool).await;
        }
        save_state(&self.settings.state_file, &snapshot(pool))
    }

    /// Bring back daemons recorded by [`save`](Self::save). Returns
    /// `false` when there is no readable state file.
    pub async fn restore(&self, pool: &mut VpnPool) -> Result<bool, OpenVpnError> {
        let Some(entries) = load_state(&self.settings.state_file)? else {
            return Ok(false);
        };

        self.discover(pool).await;
        let host = self.host_snapshot().await;

        for entry in entries {
            if let Some(pos) = pool.position_by_portable_id(&entry.process.portable_id) {
                let Some(current) = pool.get(pos) else {
                    continue;
                };
                if current.running {
                    continue;
                }
                if entry.start_at_boot {
                    let outcome = self.start(current).await;
                    log_outcome(current, &outcome);
                }
            } else {
                let start_at_boot = entry.start_at_boot;
                let vpn = self.build_recorded(entry, false, &host).await;
                if start_at_boot {
                    let outcome = self.start(&vpn).await;
                    log_outcome(&vpn, &outcome);
                }
                pool.push(vpn);
            }
        }
        pool.renumber();
        Ok(true)
    }
}

fn log_outcome(vpn: &Vpn, outcome: &LifecycleOutcome) {
    match &outcome.err {
        Some(err) => log::warn!("restore of VPN {} failed: {}", vpn.portable_id, err),
        None => log::info!("restored VPN {}", vpn.portable_id),
    }
}

fn by_index<'a>(pool: &'a VpnPool, index: &str) -> Result<&'a Vpn, OpenVpnError> {
    index
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|i| pool.by_human_index(i))
        .ok_or_else(|| {
            OpenVpnError::new(
                OpenVpnErrorKind::NotFound,
                format!("No VPN with index '{}'", index),
            )
        })
}

/// `10.8.0.0/24`, `10.8.0.0/255.255.255.0` or a bare address to
/// `(network, netmask)`.
pub fn parse_server_net(net: &str) -> Result<(String, String), OpenVpnError> {
    let invalid = || {
        OpenVpnError::new(
            OpenVpnErrorKind::InvalidRequest,
            format!("Invalid server network '{}'", net),
        )
    };
    let (addr, mask) = match net.trim().split_once('/') {
        Some((a, m)) => {
            let mask = match m.parse::<u8>() {
                Ok(p) if p <= 32 => prefix_to_mask(p),
                Ok(_) => return Err(invalid()),
                Err(_) => m.parse::<Ipv4Addr>().map_err(|_| invalid())?.to_string(),
            };
            (a, mask)
        }
        None => (net.trim(), prefix_to_mask(32)),
    };
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let mask_bits = u32::from(mask.parse::<Ipv4Addr>().map_err(|_| invalid())?);
    let network = Ipv4Addr::from(u32::from(addr) & mask_bits);
    Ok((network.to_string(), mask))
}
