//! # fleet-openvpn
//!
//! Discovers the OpenVPN daemons running on this host and reconciles them
//! into one pool of VPN records.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **types** | Crate error and shared constants |
//! | **process** | Process snapshot (argv, environment, working dir), portable id |
//! | **resolve** | Referenced-file resolution relative to cwd and conffile |
//! | **config** | Directive parser for config files and synthesized command lines |
//! | **certs** | X.509 summaries and read access to the certificate store |
//! | **status** | Status file parser (versions 1 and 2), portable client list |
//! | **ippool** | `ifconfig-pool-persist` file parser |
//! | **management** | One-shot management-interface query |
//! | **vpn** | VPN record and its derived attributes |
//! | **pool** | Ordered pool of known VPNs |
//! | **service** | Discovery pass and lifecycle operations |
//! | **persist** | Save / restore of the pool across restarts |
//! | **clientconf** | Client-side `.ovpn` generation for server VPNs |

pub mod openvpn;
