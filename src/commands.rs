//! Application state and the operations the front end dispatches to.
//!
//! Every operation takes the shared state, holds its lock for the whole
//! call and returns `Result<_, String>` ready for printing. The pool is
//! loaded from the pool file when the state is built and written back
//! after each refresh, so a daemon that exits between two runs is still
//! listed as stopped and can be started again.

use crate::config::FleetConfig;
use fleet_core::{CommandRunner, HostProbe, IpCommandProbe, LogFile, LogRegistry, ShellRunner};
use fleet_openvpn::openvpn::certs::NamedCertificate;
use fleet_openvpn::openvpn::clientconf::{
    client_certificates, render_client_config, server_vpns, ClientConfigRequest,
};
use fleet_openvpn::openvpn::{
    LifecycleOutcome, ModifyRequest, NewVpnRequest, OpenVpnService, ProcessSource,
    SysinfoProcessSource, Vpn, VpnPool,
};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct FleetApp {
    pub service: OpenVpnService,
    pub pool: VpnPool,
}

pub type FleetState = Arc<Mutex<FleetApp>>;

/// State wired to the real host: sysinfo processes, `ip` and `sh`.
pub async fn build_state(config: &FleetConfig) -> FleetState {
    build_state_with(
        config,
        Arc::new(SysinfoProcessSource::new()),
        Arc::new(IpCommandProbe::new()),
        Arc::new(ShellRunner::new()),
    )
    .await
}

pub async fn build_state_with(
    config: &FleetConfig,
    processes: Arc<dyn ProcessSource>,
    host: Arc<dyn HostProbe>,
    runner: Arc<dyn CommandRunner>,
) -> FleetState {
    let service = OpenVpnService::new(
        config.service_settings(),
        processes,
        host,
        runner,
        Arc::new(LogRegistry::new()),
    )
    .await;
    let mut pool = VpnPool::new();
    if let Err(e) = service.load_pool(&mut pool).await {
        log::warn!("ignoring known VPNs: {}", e);
    }
    Arc::new(Mutex::new(FleetApp { service, pool }))
}

impl FleetApp {
    /// Discovery pass, then record the pool for the next run.
    async fn refresh(&mut self) {
        self.service.discover(&mut self.pool).await;
        self.remember();
    }

    fn remember(&self) {
        if let Err(e) = self.service.store_pool(&self.pool) {
            log::warn!("cannot record known VPNs: {}", e);
        }
    }
}

/// Portable id first, then 1-based index.
fn find<'a>(pool: &'a VpnPool, target: &str) -> Result<&'a Vpn, String> {
    let target = target.trim();
    pool.by_portable_id(target)
        .or_else(|| target.parse().ok().and_then(|i| pool.by_human_index(i)))
        .ok_or_else(|| format!("No VPN matching '{}'", target))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Queries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The pool, refreshed first unless `cached` is set and something is known.
pub async fn list_vpns(state: &FleetState, cached: bool) -> Result<Vec<Vpn>, String> {
    let mut app = state.lock().await;
    if !cached || app.pool.is_empty() {
        app.refresh().await;
    }
    Ok(app.pool.all().to_vec())
}

pub async fn get_vpn(state: &FleetState, target: &str) -> Result<Vpn, String> {
    let mut app = state.lock().await;
    app.refresh().await;
    find(&app.pool, target).cloned()
}

pub async fn list_servers(state: &FleetState) -> Result<Vec<Vpn>, String> {
    let mut app = state.lock().await;
    app.refresh().await;
    Ok(server_vpns(&app.pool).into_iter().cloned().collect())
}

pub async fn list_certificates(state: &FleetState) -> Result<Vec<NamedCertificate>, String> {
    let app = state.lock().await;
    Ok(app.service.settings().certificates.list_certificates()?)
}

/// Visible log files of known daemons.
pub async fn list_logs(state: &FleetState) -> Result<Vec<LogFile>, String> {
    let app = state.lock().await;
    Ok(app.service.logs().visible().await)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn start_new_vpn(
    state: &FleetState,
    req: NewVpnRequest,
) -> Result<LifecycleOutcome, String> {
    let app = state.lock().await;
    Ok(app.service.start_new(&req).await?)
}

pub async fn modify_vpn(state: &FleetState, req: ModifyRequest) -> Result<LifecycleOutcome, String> {
    let mut app = state.lock().await;
    app.refresh().await;
    Ok(app.service.modify_from_request(&app.pool, &req).await?)
}

pub async fn save_vpns(state: &FleetState) -> Result<(), String> {
    let mut app = state.lock().await;
    let FleetApp { service, pool } = &mut *app;
    service.save(pool).await?;
    app.remember();
    Ok(())
}

pub async fn restore_vpns(state: &FleetState) -> Result<bool, String> {
    let mut app = state.lock().await;
    let FleetApp { service, pool } = &mut *app;
    let restored = service.restore(pool).await?;
    app.remember();
    Ok(restored)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Client configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn client_certificates_for(
    state: &FleetState,
    server: &str,
) -> Result<Vec<NamedCertificate>, String> {
    let mut app = state.lock().await;
    app.refresh().await;
    let vpn = find(&app.pool, server)?;
    Ok(client_certificates(&app.service.settings().certificates, vpn)?)
}

pub async fn client_config(
    state: &FleetState,
    server: &str,
    req: ClientConfigRequest,
) -> Result<String, String> {
    let mut app = state.lock().await;
    app.refresh().await;
    let vpn = find(&app.pool, server)?;
    Ok(render_client_config(vpn, &req, &app.service.settings().certificates)?)
}
