//! Directive parser.
//!
//! Config files and live command lines are reduced to the same two maps:
//! [`PublicDirectives`] (what operators and clients may see) and
//! [`InternalDirectives`] (paths, management endpoint, timers).  A command
//! line is first rendered as a virtual config file by [`cmdline_to_conf`]
//! so both sources go through the identical line parser.

use crate::openvpn::certs::CertificateEntry;
use crate::openvpn::resolve::FileResolver;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Directive values
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `server <network> <netmask>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNetwork {
    pub network: String,
    pub netmask: String,
}

/// `remote <address> <port>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub address: String,
    pub port: String,
}

/// `keepalive <interval> <timeout>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keepalive {
    pub interval: String,
    pub timeout: String,
}

/// `management <address> <port>`, address already rewritten for connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementEndpoint {
    pub address: String,
    pub port: String,
}

/// `ifconfig <address> <peer-or-netmask>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfconfigPair {
    pub address: String,
    pub remote_peer_or_netmask: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PublicDirectives {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_clients: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerNetwork>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteEndpoint>,
    pub duplicate_cn: bool,
    pub client_to_client: bool,
    pub client: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<CertificateEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<CertificateEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalDirectives {
    pub key: Option<String>,
    pub dh: Option<String>,
    pub ifconfig_pool_persist: Option<String>,
    pub status: Option<String>,
    pub status_version: Option<String>,
    pub status_update_seconds: Option<String>,
    pub log: Option<String>,
    pub log_append: Option<String>,
    pub keepalive: Option<Keepalive>,
    pub management: Option<ManagementEndpoint>,
    pub ifconfig: Option<IfconfigPair>,
    pub daemon: bool,
    /// Resolved paths of the `ca` / `cert` files that parsed.
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
}

impl InternalDirectives {
    /// `ping` is an alias of `keepalive`.
    pub fn ping(&self) -> Option<&Keepalive> {
        self.keepalive.as_ref()
    }

    /// `log` takes precedence over `log-append`.
    pub fn log_path(&self) -> Option<&str> {
        self.log.as_deref().or(self.log_append.as_deref())
    }
}

/// Output of one parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub public: PublicDirectives,
    pub internal: InternalDirectives,
    /// Log files named by `log` / `log-append`, to be registered.
    pub log_files: Vec<PathBuf>,
}

macro_rules! overlay {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

impl Directives {
    /// Apply `other` on top of `self`: set values win, flags accumulate.
    pub fn merge(&mut self, other: Directives) {
        let (p, o) = (&mut self.public, other.public);
        overlay!(p, o, port, proto, dev, max_clients, local, server, remote);
        p.duplicate_cn |= o.duplicate_cn;
        p.client_to_client |= o.client_to_client;
        p.client |= o.client;

        // a certificate entry and its resolved file always come from the same source
        let i = &mut self.internal;
        if o.ca.is_some() {
            p.ca = o.ca;
            i.ca_file = other.internal.ca_file.clone();
        }
        if o.cert.is_some() {
            p.cert = o.cert;
            i.cert_file = other.internal.cert_file.clone();
        }

        let o = other.internal;
        overlay!(
            i,
            o,
            key,
            dh,
            ifconfig_pool_persist,
            status,
            status_version,
            status_update_seconds,
            log,
            log_append,
            keepalive,
            management,
            ifconfig,
        );
        i.daemon |= o.daemon;

        for f in other.log_files {
            if !self.log_files.contains(&f) {
                self.log_files.push(f);
            }
        }
    }

    /// Fill in defaults that depend on the complete directive set. Call
    /// once, after every source has been merged.
    pub fn finalize(&mut self) {
        if self.internal.status.is_some() && self.internal.status_version.is_none() {
            self.internal.status_version = Some("1".to_string());
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Rule table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectiveKind {
    /// `name` alone on the line.
    PublicFlag,
    /// `name <rest of line>`
    PublicValue,
    /// `name <a> <b> ...` (extra words ignored)
    PublicPair,
    InternalFlag,
    /// `name <one word>`
    InternalValue,
    /// `name <one word>` naming a PEM certificate.
    Certificate,
    /// `name <a> <b>` exactly.
    InternalPair,
}

use DirectiveKind::*;

/// Evaluated top to bottom on every line; several rules may fire for the
/// same line (`status x` and `status x 10` both set the path).
const RULE_TABLE: &[(&str, DirectiveKind)] = &[
    ("duplicate-cn", PublicFlag),
    ("client-to-client", PublicFlag),
    ("client", PublicFlag),
    ("port", PublicValue),
    ("proto", PublicValue),
    ("dev", PublicValue),
    ("max-clients", PublicValue),
    ("local", PublicValue),
    ("server", PublicPair),
    ("remote", PublicPair),
    ("daemon", InternalFlag),
    ("key", InternalValue),
    ("dh", InternalValue),
    ("ifconfig-pool-persist", InternalValue),
    ("status", InternalValue),
    ("status-version", InternalValue),
    ("log", InternalValue),
    ("log-append", InternalValue),
    ("ca", Certificate),
    ("cert", Certificate),
    ("status", InternalPair),
    ("keepalive", InternalPair),
    ("management", InternalPair),
    ("ifconfig", InternalPair),
];

struct DirectiveRule {
    name: &'static str,
    kind: DirectiveKind,
    pattern: Regex,
}

fn rule_pattern(name: &str, kind: DirectiveKind) -> String {
    let n = regex::escape(name);
    match kind {
        PublicFlag | InternalFlag => format!(r"^\s*{}\s*$", n),
        PublicValue => format!(r"^\s*{}\s+(.*?)\s*$", n),
        PublicPair => format!(r"^\s*{}\s+(\S+)\s+(\S+)", n),
        InternalValue | Certificate => format!(r"^\s*{}\s+(\S+)\s*$", n),
        InternalPair => format!(r"^\s*{}\s+(\S+)\s+(\S+)\s*$", n),
    }
}

lazy_static! {
    static ref RULES: Vec<DirectiveRule> = RULE_TABLE
        .iter()
        .map(|&(name, kind)| DirectiveRule {
            name,
            kind,
            pattern: Regex::new(&rule_pattern(name, kind)).unwrap(),
        })
        .collect();
    static ref COMMENT_LINE: Regex = Regex::new(r"^\s*[;#]").unwrap();
    static ref TRAILING_COMMENT: Regex = Regex::new(r"\s+[;#].*$").unwrap();
    static ref WILDCARD_ADDR: Regex = Regex::new(r"^(\*|0\.0\.0\.0|::)$").unwrap();
    static ref CMDLINE_FLAG: Regex = Regex::new(r"--(\S+)").unwrap();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse directive text. Never fails: unknown or malformed lines are
/// ignored and unreadable certificates become per-field errors. Defaults
/// are not applied; see [`Directives::finalize`].
pub fn parse_directives(text: &str, resolver: &FileResolver) -> Directives {
    let mut d = Directives::default();

    for raw in text.lines() {
        if COMMENT_LINE.is_match(raw) {
            continue;
        }
        let line = TRAILING_COMMENT.replace(raw, "");

        for rule in RULES.iter() {
            if let Some(caps) = rule.pattern.captures(&line) {
                let a = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
                let b = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                apply(&mut d, rule, a, b, resolver);
            }
        }
    }

    d
}

fn apply(d: &mut Directives, rule: &DirectiveRule, a: String, b: String, resolver: &FileResolver) {
    let (p, i) = (&mut d.public, &mut d.internal);
    match (rule.kind, rule.name) {
        (PublicFlag, "duplicate-cn") => p.duplicate_cn = true,
        (PublicFlag, "client-to-client") => p.client_to_client = true,
        (PublicFlag, "client") => p.client = true,

        (PublicValue, "port") => p.port = Some(a),
        (PublicValue, "proto") => p.proto = Some(a),
        (PublicValue, "dev") => p.dev = Some(a),
        (PublicValue, "max-clients") => p.max_clients = Some(a),
        (PublicValue, "local") => p.local = Some(a),

        (PublicPair, "server") => {
            p.server = Some(ServerNetwork {
                network: a,
                netmask: b,
            })
        }
        (PublicPair, "remote") => {
            p.remote = Some(RemoteEndpoint {
                address: a,
                port: b,
            })
        }

        (InternalFlag, "daemon") => i.daemon = true,

        (InternalValue, name) => {
            let is_log = name == "log" || name == "log-append";
            match name {
                "key" => i.key = Some(a.clone()),
                "dh" => i.dh = Some(a.clone()),
                "ifconfig-pool-persist" => i.ifconfig_pool_persist = Some(a.clone()),
                "status" => i.status = Some(a.clone()),
                "status-version" => i.status_version = Some(a.clone()),
                "log" => i.log = Some(a.clone()),
                "log-append" => i.log_append = Some(a.clone()),
                _ => {}
            }
            if is_log {
                let path = resolver.find_file(&a).unwrap_or_else(|| PathBuf::from(&a));
                if !d.log_files.contains(&path) {
                    d.log_files.push(path);
                }
            }
        }

        (Certificate, name) => {
            let resolved = resolver.find_file(&a);
            let entry = CertificateEntry::from_resolved(&a, resolved.as_deref());
            let file = match &entry {
                CertificateEntry::Summary(_) => resolved,
                CertificateEntry::Error { err, .. } => {
                    log::debug!("{} {}: {}", name, a, err);
                    None
                }
            };
            if name == "ca" {
                p.ca = Some(entry);
                i.ca_file = file;
            } else {
                p.cert = Some(entry);
                i.cert_file = file;
            }
        }

        (InternalPair, "status") => {
            i.status = Some(a);
            i.status_update_seconds = Some(b);
        }
        (InternalPair, "keepalive") => {
            i.keepalive = Some(Keepalive {
                interval: a,
                timeout: b,
            })
        }
        (InternalPair, "management") => {
            i.management = Some(ManagementEndpoint {
                address: connectable_address(&a),
                port: b,
            })
        }
        (InternalPair, "ifconfig") => {
            i.ifconfig = Some(IfconfigPair {
                address: a,
                remote_peer_or_netmask: b,
            })
        }

        _ => {}
    }
}

/// Wildcard bind addresses (`*`, `0.0.0.0`, `::`) are reached through
/// loopback. Concrete IPv6 literals such as `::1` are kept.
pub fn connectable_address(addr: &str) -> String {
    if WILDCARD_ADDR.is_match(addr.trim()) {
        "127.0.0.1".to_string()
    } else {
        addr.to_string()
    }
}

/// Render an argument vector as a virtual config file: each `--flag`
/// starts a new line and following non-flag words become its arguments.
pub fn cmdline_to_conf(cmdline: &[String]) -> String {
    let mut text = String::new();
    let mut line: Vec<&str> = Vec::new();

    for arg in cmdline {
        if let Some(caps) = CMDLINE_FLAG.captures(arg) {
            if !line.is_empty() {
                text.push_str(&line.join(" "));
                text.push('\n');
            }
            line = vec![caps.get(1).map_or("", |m| m.as_str())];
        } else if !line.is_empty() {
            line.push(arg);
        }
    }
    if !line.is_empty() {
        text.push_str(&line.join(" "));
        text.push('\n');
    }
    text
}

impl PublicDirectives {
    /// Command-line flags reproducing these directives. Certificates are
    /// not included: only their summaries are kept.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |flag: &str, values: &[&str]| {
            args.push(format!("--{}", flag));
            args.extend(values.iter().map(|v| v.to_string()));
        };

        if self.duplicate_cn {
            push("duplicate-cn", &[]);
        }
        if self.client_to_client {
            push("client-to-client", &[]);
        }
        if self.client {
            push("client", &[]);
        }
        for (flag, value) in [
            ("port", &self.port),
            ("proto", &self.proto),
            ("dev", &self.dev),
            ("max-clients", &self.max_clients),
            ("local", &self.local),
        ] {
            if let Some(v) = value {
                let words: Vec<&str> = v.split_whitespace().collect();
                push(flag, &words);
            }
        }
        if let Some(s) = &self.server {
            push("server", &[&s.network, &s.netmask]);
        }
        if let Some(r) = &self.remote {
            push("remote", &[&r.address, &r.port]);
        }
        args
    }
}
