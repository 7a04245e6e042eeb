//! Command-line argument definitions.

use clap::{Args as ClapArgs, Parser, Subcommand};
use fleet_openvpn::openvpn::clientconf::ClientConfigRequest;
use fleet_openvpn::openvpn::{ModifyRequest, NewVpnRequest};
use std::path::PathBuf;

/// Discover and manage the OpenVPN daemons running on this host
#[derive(Parser, Debug)]
#[command(name = "ovpn-fleet")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "OVPN_FLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover running daemons and print every known VPN
    List {
        /// Print the pool recorded by the last run without a discovery pass
        #[arg(long)]
        cached: bool,
    },
    /// Print one VPN by portable id or index
    Show { target: String },
    /// Print server VPNs only
    Servers,
    /// Launch a new daemon
    StartNew(StartNewArgs),
    /// Start a stopped VPN by portable id or index
    Start { target: String },
    /// Stop a running VPN by portable id or index
    Stop {
        target: String,
        /// Also delete its log file
        #[arg(long)]
        rmlog: bool,
    },
    /// Save the pool to the state file
    Save,
    /// Restore daemons recorded in the state file
    Restore,
    /// List certificates in the store
    Certs,
    /// List client certificates accepted by a server VPN
    ClientCerts { server: String },
    /// Print a client configuration for a server VPN
    ClientConfig(ClientConfigArgs),
    /// List registered daemon log files
    Logs,
}

#[derive(ClapArgs, Debug)]
pub struct StartNewArgs {
    /// CA name in the store ("__default__" for the store CA)
    #[arg(long, default_value = "__default__")]
    pub ca: String,
    /// Certificate name in the store
    #[arg(long)]
    pub cert: String,
    #[arg(long, default_value = "udp")]
    pub proto: String,
    /// Server mode: network as CIDR, e.g. 10.8.0.0/24
    #[arg(long, conflicts_with = "remote_host")]
    pub server_net: Option<String>,
    /// Server mode: listening port
    #[arg(long)]
    pub port: Option<u16>,
    /// Client mode: server to connect to
    #[arg(long)]
    pub remote_host: Option<String>,
    #[arg(long)]
    pub remote_port: Option<String>,
    #[arg(long)]
    pub ns_cert_type_server: bool,
}

impl From<StartNewArgs> for NewVpnRequest {
    fn from(a: StartNewArgs) -> Self {
        NewVpnRequest {
            ca: a.ca,
            cert: a.cert,
            proto: a.proto,
            server_net: a.server_net,
            port: a.port,
            remote_host: a.remote_host,
            remote_port: a.remote_port,
            ns_cert_type_server: a.ns_cert_type_server,
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct ClientConfigArgs {
    /// Server VPN, by portable id or index
    pub server: String,
    /// Client certificate name in the store
    #[arg(long)]
    pub cert: String,
    /// Address clients dial, if the server does not set `local`
    #[arg(long)]
    pub remote_host: Option<String>,
    #[arg(long)]
    pub ns_cert_type_server: bool,
}

impl From<&ClientConfigArgs> for ClientConfigRequest {
    fn from(a: &ClientConfigArgs) -> Self {
        ClientConfigRequest {
            cert: a.cert.clone(),
            remote_host: a.remote_host.clone(),
            ns_cert_type_server: a.ns_cert_type_server,
        }
    }
}

/// The target is tried as a portable id first, then as an index.
pub fn modify_request(target: &str, start: bool, rmlog: bool) -> ModifyRequest {
    let slot = Some(target.trim().to_string());
    ModifyRequest {
        portable_id: slot.clone(),
        start: if start { slot.clone() } else { None },
        stop: if start { None } else { slot },
        rmlog,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_new_server() {
        let args = Args::try_parse_from([
            "ovpn-fleet", "start-new", "--cert", "server", "--server-net", "10.8.0.0/24",
            "--port", "1194",
        ])
        .unwrap();
        match args.command {
            Commands::StartNew(a) => {
                let req: NewVpnRequest = a.into();
                assert_eq!(req.ca, "__default__");
                assert_eq!(req.proto, "udp");
                assert_eq!(req.port, Some(1194));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn server_and_client_mode_conflict() {
        let res = Args::try_parse_from([
            "ovpn-fleet", "start-new", "--cert", "c", "--server-net", "10.8.0.0/24",
            "--remote-host", "vpn.example.com",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn list_cached_flag() {
        let args = Args::try_parse_from(["ovpn-fleet", "list"]).unwrap();
        assert!(matches!(args.command, Commands::List { cached: false }));
        let args = Args::try_parse_from(["ovpn-fleet", "list", "--cached"]).unwrap();
        assert!(matches!(args.command, Commands::List { cached: true }));
    }

    #[test]
    fn modify_request_by_index_or_id() {
        let r = modify_request(" 2 ", true, false);
        assert_eq!(r.portable_id.as_deref(), Some("2"));
        assert_eq!(r.start.as_deref(), Some("2"));
        assert_eq!(r.stop, None);

        let r = modify_request("0123456789abcdef", false, true);
        assert_eq!(r.portable_id.as_deref(), Some("0123456789abcdef"));
        assert_eq!(r.stop.as_deref(), Some("0123456789abcdef"));
        assert!(r.rmlog);
    }
}
