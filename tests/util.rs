#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use cakit::cert::params::{CertificationRequestInfo, DistinguishedName, Validity};
use cakit::cert::{Certificate, CertificateWithPrivateKey};
use cakit::config::Config;
use cakit::config::ca::CaSettings;
use cakit::database::CaDatabase;
use cakit::key::{KeyPair, PublicKey};
use cakit::serial::Serial;
use tempfile::TempDir;

pub const FIXTURE: &str = include_str!("fixtures/rtcloud.cnf");

pub fn generate_ca_cert() -> CertificateWithPrivateKey {
    let ca_key = KeyPair::generate_ecdsa_p256();

    let subject_dn = DistinguishedName::builder()
        .country("US".to_string())
        .organization("Princeton University".to_string())
        .organization_unit("PNI".to_string())
        .common_name("rtcloud local CA".to_string())
        .build();

    let ca_cert_info = CertificationRequestInfo::builder()
        .subject(subject_dn)
        .subject_public_key(PublicKey::from_key_pair(&ca_key))
        .is_ca(true)
        .build();

    CertificateWithPrivateKey {
        cert: Certificate::new_self_signed(
            &ca_cert_info,
            &ca_key,
            Validity::for_days(3650).unwrap(),
        )
        .unwrap(),
        key: ca_key,
    }
}

/// A CA directory laid out like `openssl ca` expects: the fixture config with
/// `extra` appended, CA certificate and key, an empty index and serial `01`.
pub struct CaDir {
    pub dir: TempDir,
    pub config_path: PathBuf,
    pub ca: CertificateWithPrivateKey,
}

impl CaDir {
    pub fn new(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ca = generate_ca_cert();
        fs::write(dir.path().join("ca.pem"), ca.cert.to_pem().unwrap()).unwrap();
        fs::create_dir(dir.path().join("private")).unwrap();
        fs::write(
            dir.path().join("private/ca.key"),
            ca.key.to_pkcs8_pem().unwrap(),
        )
        .unwrap();

        let config_path = dir.path().join("openssl.cnf");
        fs::write(
            &config_path,
            format!(
                "{FIXTURE}\n[ CA_default ]\ncertificate = ca.pem\nprivate_key = private/ca.key\n{extra}\n"
            ),
        )
        .unwrap();

        let ca_dir = CaDir {
            dir,
            config_path,
            ca,
        };
        let settings = CaSettings::from_config(&ca_dir.config()).unwrap();
        CaDatabase::initialize(&settings.database, &settings.serial, Some(Serial::from(1u64)))
            .unwrap();
        ca_dir
    }

    pub fn config(&self) -> Config {
        Config::load(&self.config_path).unwrap()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn read(&self, name: &str) -> String {
        read(&self.path(name))
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}
