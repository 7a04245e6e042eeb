//! Fixtures shared by the unit tests.

use crate::openvpn::certs::CertificateStore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa,
};
use std::path::Path;

/// A throw-away CA with one server and one client certificate.
pub struct Pki {
    pub ca_pem: String,
    pub server_pem: String,
    pub server_key: String,
    pub client_pem: String,
    pub client_key: String,
}

fn params(cn: &str, is_ca: bool) -> CertificateParams {
    let mut p = CertificateParams::new(vec!["localhost".to_string()]);
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationName, "Fleet");
    p.distinguished_name = dn;
    if is_ca {
        p.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }
    p
}

impl Pki {
    pub fn generate() -> Self {
        Self::with_ca_name("Fleet Test CA")
    }

    pub fn with_ca_name(ca_cn: &str) -> Self {
        let ca = Certificate::from_params(params(ca_cn, true)).unwrap();
        let server = Certificate::from_params(params("server", false)).unwrap();
        let client = Certificate::from_params(params("client1", false)).unwrap();
        Self {
            ca_pem: ca.serialize_pem().unwrap(),
            server_pem: server.serialize_pem_with_signer(&ca).unwrap(),
            server_key: server.serialize_private_key_pem(),
            client_pem: client.serialize_pem_with_signer(&ca).unwrap(),
            client_key: client.serialize_private_key_pem(),
        }
    }

    /// Write the PKI into a store layout rooted at `dir`.
    pub fn install(&self, dir: &Path) -> CertificateStore {
        let store = CertificateStore::from_dir(dir);
        std::fs::create_dir_all(store.ca_cert.parent().unwrap()).unwrap();
        std::fs::create_dir_all(&store.cert_dir).unwrap();
        std::fs::create_dir_all(&store.key_dir).unwrap();
        std::fs::write(&store.ca_cert, &self.ca_pem).unwrap();
        std::fs::write(store.cert_path("server"), &self.server_pem).unwrap();
        std::fs::write(store.key_path("server"), &self.server_key).unwrap();
        std::fs::write(store.cert_path("client1"), &self.client_pem).unwrap();
        std::fs::write(store.key_path("client1"), &self.client_key).unwrap();
        store
    }
}
