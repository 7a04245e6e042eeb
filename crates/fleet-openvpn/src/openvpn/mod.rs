//! OpenVPN module root – re-exports public API surface.

pub mod certs;
pub mod clientconf;
pub mod config;
pub mod ippool;
pub mod management;
pub mod persist;
pub mod pool;
pub mod process;
pub mod resolve;
pub mod service;
pub mod status;
pub mod types;
pub mod vpn;

#[cfg(test)]
pub(crate) mod testutil;

pub use certs::{CertificateEntry, CertificateStore, CertificateSummary};
pub use config::{Directives, InternalDirectives, PublicDirectives};
pub use pool::VpnPool;
pub use process::{ProcessHandle, ProcessSource, SysinfoProcessSource};
pub use service::{
    LifecycleOutcome, ModifyRequest, NewVpnRequest, OpenVpnService, ServiceSettings, StopOptions,
};
pub use types::*;
pub use vpn::{Vpn, VpnRole};
