//! Application configuration (JSON file).

use fleet_openvpn::openvpn::{CertificateStore, ServiceSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "OVPN_FLEET_CONFIG";

const APP_DIR: &str = "ovpn-fleet";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificatesConfig {
    pub ca_cert: PathBuf,
    pub cert_dir: PathBuf,
    pub key_dir: PathBuf,
    pub ssl_dir: PathBuf,
    pub default_crl: PathBuf,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        let store = CertificateStore::from_dir("/etc/ovpn-fleet/ssl");
        Self {
            ca_cert: store.ca_cert,
            cert_dir: store.cert_dir,
            key_dir: store.key_dir,
            ssl_dir: store.ssl_dir,
            default_crl: store.default_crl,
        }
    }
}

impl From<CertificatesConfig> for CertificateStore {
    fn from(c: CertificatesConfig) -> Self {
        CertificateStore {
            ca_cert: c.ca_cert,
            cert_dir: c.cert_dir,
            key_dir: c.key_dir,
            ssl_dir: c.ssl_dir,
            default_crl: c.default_crl,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub daemon_binary: String,
    pub state_file: PathBuf,
    /// Where the known pool is kept between runs; `pool.json` next to
    /// the state file when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_file: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub log_group: String,
    pub privilege_command: String,
    pub management_timeout_secs: u64,
    pub certificates: CertificatesConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            daemon_binary: "openvpn".to_string(),
            state_file: default_state_file(),
            pool_file: None,
            log_dir: PathBuf::from("/var/log"),
            log_group: "onboard".to_string(),
            privilege_command: "sudo".to_string(),
            management_timeout_secs: 3,
            certificates: CertificatesConfig::default(),
        }
    }
}

fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR).join("vpn.json"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/ovpn-fleet/vpn.json"))
}

/// `<config dir>/ovpn-fleet/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json"))
}

impl FleetConfig {
    /// Explicit path first, then [`CONFIG_ENV`], then the default path.
    pub fn load(explicit: Option<&Path>) -> Result<Self, String> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let path = explicit
            .map(Path::to_path_buf)
            .or(from_env)
            .or_else(default_config_path);
        match path {
            Some(p) => Self::load_from(&p),
            None => Ok(Self::default()),
        }
    }

    /// A missing file gives the defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(format!("Cannot read config {}: {}", path.display(), e)),
        };
        serde_json::from_str(&text)
            .map_err(|e| format!("Invalid config {}: {}", path.display(), e))
    }

    pub fn pool_file(&self) -> PathBuf {
        self.pool_file
            .clone()
            .unwrap_or_else(|| self.state_file.with_file_name("pool.json"))
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            daemon_binary: self.daemon_binary.clone(),
            state_file: self.state_file.clone(),
            pool_file: self.pool_file(),
            log_dir: self.log_dir.clone(),
            log_group: self.log_group.clone(),
            privilege_command: self.privilege_command.clone(),
            management_timeout: Duration::from_secs(self.management_timeout_secs),
            certificates: self.certificates.clone().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FleetConfig::load_from(&dir.path().join("none.json")).unwrap();
        assert_eq!(cfg, FleetConfig::default());
        assert_eq!(cfg.management_timeout_secs, 3);
        assert_eq!(cfg.log_group, "onboard");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(
            &path,
            r#"{"privilege_command": "", "certificates": {"ssl_dir": "/srv/ssl"}}"#,
        )
        .unwrap();
        let cfg = FleetConfig::load_from(&path).unwrap();
        assert_eq!(cfg.privilege_command, "");
        assert_eq!(cfg.daemon_binary, "openvpn");
        assert_eq!(cfg.certificates.ssl_dir, PathBuf::from("/srv/ssl"));
        assert_eq!(
            cfg.certificates.cert_dir,
            PathBuf::from("/etc/ovpn-fleet/ssl/certs")
        );
    }

    #[test]
    fn pool_file_follows_state_file() {
        let mut cfg = FleetConfig {
            state_file: PathBuf::from("/srv/fleet/vpn.json"),
            ..Default::default()
        };
        assert_eq!(cfg.pool_file(), PathBuf::from("/srv/fleet/pool.json"));
        cfg.pool_file = Some(PathBuf::from("/run/fleet-pool.json"));
        assert_eq!(cfg.service_settings().pool_file, PathBuf::from("/run/fleet-pool.json"));
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = FleetConfig::load_from(&path).unwrap_err();
        assert!(err.contains("Invalid config"));
    }

    #[test]
    fn settings_carry_timeout() {
        let cfg = FleetConfig {
            management_timeout_secs: 7,
            ..Default::default()
        };
        let s = cfg.service_settings();
        assert_eq!(s.management_timeout, Duration::from_secs(7));
        assert_eq!(s.pool_file, cfg.state_file.with_file_name("pool.json"));
        assert_eq!(s.certificates.dh_path(2048), PathBuf::from("/etc/ovpn-fleet/ssl/dh2048.pem"));
    }
}
