//! X.509 summaries for `ca` / `cert` directives and read-only access to
//! the host certificate store.

use crate::openvpn::types::*;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use x509_parser::objects::{oid2abbrev, oid_registry};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Logical CA name that maps to the store's own CA.
pub const DEFAULT_CA: &str = "__default__";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Summaries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSummary {
    /// Decimal serial number (may exceed 64 bits).
    pub serial: String,
    pub issuer: BTreeMap<String, String>,
    pub subject: BTreeMap<String, String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// RSA modulus size, when the key is RSA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_bits: Option<usize>,
}

/// A parsed certificate, or the reason it could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CertificateEntry {
    Summary(CertificateSummary),
    Error { err: String, kind: OpenVpnErrorKind },
}

impl CertificateEntry {
    pub fn summary(&self) -> Option<&CertificateSummary> {
        match self {
            CertificateEntry::Summary(s) => Some(s),
            CertificateEntry::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CertificateEntry::Summary(_) => None,
            CertificateEntry::Error { err, .. } => Some(err),
        }
    }

    /// Entry for a directive argument that resolved to `path` (or nothing).
    pub fn from_resolved(name: &str, path: Option<&Path>) -> Self {
        let result = match path {
            Some(p) => load_certificate(p),
            None => Err(OpenVpnError::new(
                OpenVpnErrorKind::FileNotFound,
                format!("File not found or not readable: {}", name),
            )),
        };
        result.into()
    }
}

impl From<Result<CertificateSummary, OpenVpnError>> for CertificateEntry {
    fn from(r: Result<CertificateSummary, OpenVpnError>) -> Self {
        match r {
            Ok(s) => CertificateEntry::Summary(s),
            Err(e) => CertificateEntry::Error {
                err: match e.detail {
                    Some(d) => format!("{}: {}", e.message, d),
                    None => e.message,
                },
                kind: e.kind,
            },
        }
    }
}

/// Read and summarise a PEM certificate file.
pub fn load_certificate(path: &Path) -> Result<CertificateSummary, OpenVpnError> {
    let data = std::fs::read(path).map_err(|e| {
        OpenVpnError::new(
            OpenVpnErrorKind::FileNotFound,
            format!("File not found or not readable: {}", path.display()),
        )
        .with_detail(e.to_string())
    })?;
    summarize_pem(&data)
}

/// Summarise the first certificate in a PEM buffer.
pub fn summarize_pem(data: &[u8]) -> Result<CertificateSummary, OpenVpnError> {
    let parse_err = |msg: String| OpenVpnError::new(OpenVpnErrorKind::CertificateParseError, msg);

    let (_, pem) = parse_x509_pem(data).map_err(|e| parse_err(format!("Invalid PEM: {}", e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| parse_err(format!("Invalid certificate: {}", e)))?;

    let validity = cert.validity();
    let not_before = timestamp(validity.not_before.timestamp())
        .ok_or_else(|| parse_err("notBefore out of range".into()))?;
    let not_after = timestamp(validity.not_after.timestamp())
        .ok_or_else(|| parse_err("notAfter out of range".into()))?;

    let key_bits = match cert.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => Some(rsa.key_size()),
        _ => None,
    };

    Ok(CertificateSummary {
        serial: cert.tbs_certificate.serial.to_string(),
        issuer: name_map(cert.issuer()),
        subject: name_map(cert.subject()),
        not_before,
        not_after,
        key_bits,
    })
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Distinguished name as `{ "CN": "...", "O": "..." }`. Repeated
/// attributes keep the last value.
fn name_map(name: &X509Name<'_>) -> BTreeMap<String, String> {
    let registry = oid_registry();
    name.iter_attributes()
        .map(|attr| {
            let key = oid2abbrev(attr.attr_type(), registry)
                .map(str::to_string)
                .unwrap_or_else(|_| attr.attr_type().to_id_string());
            let value = attr.as_str().map(str::to_string).unwrap_or_default();
            (key, value)
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Certificate store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A store certificate with its logical name (file stem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCertificate {
    pub name: String,
    pub cert: CertificateEntry,
}

/// Read access to the host certificate store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateStore {
    pub ca_cert: PathBuf,
    pub cert_dir: PathBuf,
    pub key_dir: PathBuf,
    pub ssl_dir: PathBuf,
    pub default_crl: PathBuf,
}

impl CertificateStore {
    /// Conventional layout under one directory.
    pub fn from_dir(ssl_dir: impl Into<PathBuf>) -> Self {
        let ssl_dir = ssl_dir.into();
        Self {
            ca_cert: ssl_dir.join("ca").join("ca.crt"),
            cert_dir: ssl_dir.join("certs"),
            key_dir: ssl_dir.join("private"),
            default_crl: ssl_dir.join("ca").join("crl.pem"),
            ssl_dir,
        }
    }

    pub fn ca_path(&self, name: &str) -> PathBuf {
        if name == DEFAULT_CA {
            self.ca_cert.clone()
        } else {
            self.cert_path(name)
        }
    }

    pub fn cert_path(&self, name: &str) -> PathBuf {
        self.cert_dir.join(format!("{}.crt", name))
    }

    pub fn key_path(&self, name: &str) -> PathBuf {
        self.key_dir.join(format!("{}.key", name))
    }

    pub fn crl_path(&self, ca_name: &str) -> PathBuf {
        if ca_name == DEFAULT_CA {
            self.default_crl.clone()
        } else {
            self.cert_dir.join(format!("{}.crl", ca_name))
        }
    }

    pub fn dh_path(&self, key_bits: usize) -> PathBuf {
        self.ssl_dir.join(format!("dh{}.pem", key_bits))
    }

    /// RSA key size of the named certificate; `None` for non-RSA keys.
    pub fn key_bits(&self, name: &str) -> Result<Option<usize>, OpenVpnError> {
        Ok(load_certificate(&self.cert_path(name))?.key_bits)
    }

    /// Every `*.crt` in the cert dir, sorted by name.
    pub fn list_certificates(&self) -> Result<Vec<NamedCertificate>, OpenVpnError> {
        let entries = std::fs::read_dir(&self.cert_dir).map_err(|e| {
            OpenVpnError::io(
                format!("Cannot list certificates in {}", self.cert_dir.display()),
                e,
            )
        })?;

        let mut certs: Vec<NamedCertificate> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |ext| ext == "crt"))
            .filter_map(|p| {
                let name = p.file_stem()?.to_string_lossy().into_owned();
                Some(NamedCertificate {
                    cert: load_certificate(&p).into(),
                    name,
                })
            })
            .collect();
        certs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(certs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openvpn::testutil::Pki;

    // ── summaries ──

    #[test]
    fn summarises_issued_certificate() {
        let pki = Pki::generate();
        let s = summarize_pem(pki.server_pem.as_bytes()).unwrap();
        assert_eq!(s.subject.get("CN").map(String::as_str), Some("server"));
        assert_eq!(s.issuer.get("CN").map(String::as_str), Some("Fleet Test CA"));
        assert_eq!(s.issuer.get("O").map(String::as_str), Some("Fleet"));
        assert!(!s.serial.is_empty());
        assert!(s.not_before < s.not_after);
    }

    #[test]
    fn ca_is_self_issued() {
        let pki = Pki::generate();
        let s = summarize_pem(pki.ca_pem.as_bytes()).unwrap();
        assert_eq!(s.issuer, s.subject);
    }

    #[test]
    fn garbage_is_parse_error() {
        let err = summarize_pem(b"not a certificate").unwrap_err();
        assert_eq!(err.kind, OpenVpnErrorKind::CertificateParseError);
    }

    #[test]
    fn corrupt_body_is_parse_error() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        let err = summarize_pem(pem.as_bytes()).unwrap_err();
        assert_eq!(err.kind, OpenVpnErrorKind::CertificateParseError);
    }

    #[test]
    fn unresolved_file_entry() {
        let entry = CertificateEntry::from_resolved("missing.crt", None);
        assert_eq!(
            entry,
            CertificateEntry::Error {
                err: "File not found or not readable: missing.crt".into(),
                kind: OpenVpnErrorKind::FileNotFound,
            }
        );
        assert!(entry.summary().is_none());
    }

    #[test]
    fn entry_serializes_flat() {
        let entry = CertificateEntry::from_resolved("missing.crt", None);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["err"], "File not found or not readable: missing.crt");
        assert_eq!(json["kind"], "FileNotFound");
    }

    // ── store ──

    #[test]
    fn store_paths() {
        let store = CertificateStore::from_dir("/etc/ssl/fleet");
        assert_eq!(store.ca_path(DEFAULT_CA), PathBuf::from("/etc/ssl/fleet/ca/ca.crt"));
        assert_eq!(store.ca_path("corp"), PathBuf::from("/etc/ssl/fleet/certs/corp.crt"));
        assert_eq!(store.key_path("srv"), PathBuf::from("/etc/ssl/fleet/private/srv.key"));
        assert_eq!(store.crl_path(DEFAULT_CA), PathBuf::from("/etc/ssl/fleet/ca/crl.pem"));
        assert_eq!(store.crl_path("corp"), PathBuf::from("/etc/ssl/fleet/certs/corp.crl"));
        assert_eq!(store.dh_path(2048), PathBuf::from("/etc/ssl/fleet/dh2048.pem"));
    }

    #[test]
    fn lists_store_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let pki = Pki::generate();
        let store = pki.install(dir.path());
        std::fs::write(store.cert_dir.join("broken.crt"), "junk").unwrap();
        std::fs::write(store.cert_dir.join("notes.txt"), "ignored").unwrap();

        let certs = store.list_certificates().unwrap();
        let names: Vec<&str> = certs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["broken", "client1", "server"]);
        assert!(certs[0].cert.error().is_some());
        assert!(certs[1].cert.summary().is_some());
    }

    #[test]
    fn ecdsa_key_has_no_rsa_bits() {
        let dir = tempfile::tempdir().unwrap();
        let store = Pki::generate().install(dir.path());
        assert_eq!(store.key_bits("server").unwrap(), None);
        let err = store.key_bits("nobody").unwrap_err();
        assert_eq!(err.kind, OpenVpnErrorKind::FileNotFound);
    }

    #[test]
    fn missing_cert_dir_is_io_error() {
        let store = CertificateStore::from_dir("/nonexistent/fleet-ssl");
        assert_eq!(store.list_certificates().unwrap_err().kind, OpenVpnErrorKind::IoError);
    }
}
