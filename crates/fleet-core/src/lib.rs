//! # fleet-core
//!
//! Host-side collaborators consumed by the daemon integrations.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **error** | Crate error type |
//! | **diagnostics** | Soft, per-record problems surfaced without aborting a pass |
//! | **logs** | Registry of daemon log files and their categories |
//! | **command** | Privileged shell command runner (`run` / `bgexec`) |
//! | **network** | Host interface and routing-table snapshot |

pub mod command;
pub mod diagnostics;
pub mod error;
pub mod logs;
pub mod network;

pub use command::{shell_quote, CommandOutcome, CommandRunner, ShellRunner};
pub use diagnostics::{Diagnostic, Severity};
pub use error::{CoreError, CoreErrorKind};
pub use logs::{LogFile, LogRegistry};
pub use network::{HostInterface, HostProbe, HostRoute, HostSnapshot, IpCommandProbe};
