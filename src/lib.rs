pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;

use cli::{Args, Commands};
use commands::FleetState;
use serde::Serialize;

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Cannot encode output: {}", e))
}

/// Run one subcommand against `state`; the result is what gets printed.
pub async fn dispatch(state: &FleetState, command: Commands) -> Result<String, String> {
    match command {
        Commands::List { cached } => to_json(&commands::list_vpns(state, cached).await?),
        Commands::Show { target } => to_json(&commands::get_vpn(state, &target).await?),
        Commands::Servers => to_json(&commands::list_servers(state).await?),
        Commands::StartNew(args) => to_json(&commands::start_new_vpn(state, args.into()).await?),
        Commands::Start { target } => {
            let req = cli::modify_request(&target, true, false);
            to_json(&commands::modify_vpn(state, req).await?)
        }
        Commands::Stop { target, rmlog } => {
            let req = cli::modify_request(&target, false, rmlog);
            to_json(&commands::modify_vpn(state, req).await?)
        }
        Commands::Save => {
            commands::save_vpns(state).await?;
            to_json(&serde_json::json!({ "ok": true }))
        }
        Commands::Restore => {
            let restored = commands::restore_vpns(state).await?;
            to_json(&serde_json::json!({ "ok": true, "restored": restored }))
        }
        Commands::Certs => to_json(&commands::list_certificates(state).await?),
        Commands::ClientCerts { server } => {
            to_json(&commands::client_certificates_for(state, &server).await?)
        }
        Commands::ClientConfig(args) => {
            commands::client_config(state, &args.server, (&args).into()).await
        }
        Commands::Logs => to_json(&commands::list_logs(state).await?),
    }
}

/// Entry point of the binary.
pub async fn run(args: Args) -> Result<String, String> {
    logging::init_logging(args.log_level.as_deref(), args.log_json);
    let config = config::FleetConfig::load(args.config.as_deref())?;
    log::debug!(
        "using state file {} and pool file {}",
        config.state_file.display(),
        config.pool_file().display()
    );
    let state = commands::build_state(&config).await;
    dispatch(&state, args.command).await
}
