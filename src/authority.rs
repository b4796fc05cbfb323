//! The certificate authority: policy, registry and signing key together.

use std::fs;

use crate::cert::params::{
    CertificationRequestInfo, DistinguishedName, ExtensionParam, Validity, upsert_extension,
};
use crate::cert::{Certificate, CertificateWithPrivateKey};
use crate::config::Config;
use crate::config::ca::{CaSettings, CopyExtensions};
use crate::config::extensions::{ExtensionProfile, IssuerContext};
use crate::database::CaDatabase;
use crate::error::CaKitError;
use crate::issuer::Issuer;
use crate::key::{KeyPair, PublicKey};
use crate::request::{CertificateRequest, Csr};
use crate::serial::Serial;

pub type Result<T> = std::result::Result<T, CaKitError>;

/// An opened CA ready to issue.
///
/// Issuance takes `&mut self`, so one value never hands out a serial twice.
/// Other processes are kept out by the database lock file.
#[derive(Debug)]
pub struct CertificateAuthority {
    settings: CaSettings,
    ca: CertificateWithPrivateKey,
    database: CaDatabase,
    profile: Option<ExtensionProfile>,
}

impl CertificateAuthority {
    /// Opens the CA named by `[ ca ] default_ca`: its certificate, private
    /// key, serial file and index.
    pub fn open(config: &Config) -> Result<Self> {
        let settings = CaSettings::from_config(config)?;

        let cert_path = settings.certificate.as_ref().ok_or_else(|| {
            CaKitError::config(format!("'certificate' is not set in [{}]", settings.name))
        })?;
        let key_path = settings.private_key.as_ref().ok_or_else(|| {
            CaKitError::config(format!("'private_key' is not set in [{}]", settings.name))
        })?;

        let cert_pem = fs::read_to_string(cert_path).map_err(|e| CaKitError::io(cert_path, e))?;
        let key_pem = fs::read_to_string(key_path).map_err(|e| CaKitError::io(key_path, e))?;
        let cert = Certificate::from_pem(&cert_pem)?;
        let key = KeyPair::import_from_pkcs8_pem(&key_pem)?;

        let profile = settings
            .x509_extensions
            .as_deref()
            .map(|name| ExtensionProfile::from_section(config, name))
            .transpose()?;
        let database = CaDatabase::open(&settings.database, &settings.serial)?;

        Self::new(settings, CertificateWithPrivateKey { cert, key }, database, profile)
    }

    /// Assembles a CA from parts. The key must belong to the certificate.
    pub fn new(
        settings: CaSettings,
        ca: CertificateWithPrivateKey,
        database: CaDatabase,
        profile: Option<ExtensionProfile>,
    ) -> Result<Self> {
        let cert_key =
            PublicKey::from_x509spki(&ca.cert.inner.tbs_certificate.subject_public_key_info)?;
        if cert_key != PublicKey::from_key_pair(&ca.key) {
            return Err(CaKitError::CertificateError(
                "CA private key does not match the CA certificate".to_string(),
            ));
        }
        Ok(Self {
            settings,
            ca,
            database,
            profile,
        })
    }

    pub fn settings(&self) -> &CaSettings {
        &self.settings
    }

    pub fn certificate(&self) -> &Certificate {
        &self.ca.cert
    }

    pub fn database(&self) -> &CaDatabase {
        &self.database
    }

    /// Evaluates `request` and, when accepted, signs a certificate for
    /// `public_key` and records it.
    ///
    /// A rejected request leaves the serial and index files untouched.
    pub fn issue(
        &mut self,
        request: &CertificateRequest,
        public_key: PublicKey,
    ) -> Result<Certificate> {
        let ca_subject = self.ca.cert.subject()?;
        let subject = self
            .settings
            .policy
            .evaluate(&request.subject, &ca_subject)
            .inspect_err(|violation| {
                log::warn!("rejected request for {}: {violation}", request.subject);
            })?;

        if self.settings.unique_subject {
            if let Some(existing) = self.database.find_valid_by_subject(&subject) {
                log::warn!(
                    "rejected request for {subject}: serial {} is still valid",
                    existing.serial
                );
                return Err(CaKitError::DatabaseError(format!(
                    "a valid certificate for {subject} already exists (serial {})",
                    existing.serial
                )));
            }
        }

        let serial = self.database.next_serial().clone();
        let extensions = self.extensions_for(request, &public_key, &ca_subject)?;
        let info = CertificationRequestInfo::builder()
            .subject(subject)
            .subject_public_key(public_key)
            .extensions(extensions)
            .build();

        let cert = self.ca.issue(
            &info,
            &serial,
            Validity::for_days(self.settings.default_days)?,
        )?;
        self.database.record_issuance(&cert)?;

        log::info!(
            "issued serial {serial} to {} for {} days",
            info.subject,
            self.settings.default_days
        );
        Ok(cert)
    }

    /// Verifies `csr` and issues for the request and key it carries.
    pub fn issue_from_csr(&mut self, csr: &Csr) -> Result<Certificate> {
        csr.verify()?;
        let request = csr.to_request()?;
        self.issue(&request, csr.public_key()?)
    }

    pub fn revoke(&mut self, serial: &Serial, reason: Option<&str>) -> Result<()> {
        self.database.revoke(serial, reason)
    }

    fn extensions_for(
        &self,
        request: &CertificateRequest,
        public_key: &PublicKey,
        ca_subject: &DistinguishedName,
    ) -> Result<Vec<ExtensionParam>> {
        let mut extensions = match &self.profile {
            Some(profile) => {
                let ca_key = PublicKey::from_key_pair(&self.ca.key);
                let ca_serial = self.ca.cert.serial();
                let issuer = IssuerContext {
                    name: ca_subject,
                    key: &ca_key,
                    serial: &ca_serial,
                };
                profile.to_params(public_key, Some(&issuer))?
            }
            None => Vec::new(),
        };

        match self.settings.copy_extensions {
            CopyExtensions::None => {}
            CopyExtensions::Copy => {
                for ext in request.requested_extensions()? {
                    if !extensions.iter().any(|e| e.oid == ext.oid) {
                        extensions.push(ext);
                    }
                }
            }
            CopyExtensions::CopyAll => {
                for ext in request.requested_extensions()? {
                    upsert_extension(&mut extensions, ext);
                }
            }
        }
        Ok(extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::extensions::{AltName, BasicConstraints, SubjectAltName};
    use crate::cert::params::DnField;
    use crate::policy::{IssuancePolicy, Requirement, ViolationKind};

    struct Fixture {
        _dir: tempfile::TempDir,
        ca: CertificateAuthority,
    }

    fn fixture(copy_extensions: CopyExtensions, profile: Option<ExtensionProfile>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let key = KeyPair::generate_ecdsa_p256();
        let info = CertificationRequestInfo::builder()
            .subject(
                DistinguishedName::builder()
                    .country("US".to_string())
                    .common_name("Unit Test CA".to_string())
                    .build(),
            )
            .subject_public_key(PublicKey::from_key_pair(&key))
            .is_ca(true)
            .build();
        let validity = Validity::for_days(30).unwrap();
        let cert = Certificate::new_self_signed(&info, &key, validity).unwrap();

        let settings = CaSettings::builder()
            .name("CA_default")
            .database(dir.path().join("index.txt"))
            .serial(dir.path().join("serial"))
            .policy(IssuancePolicy::new(vec![
                (DnField::Country, Requirement::Match),
                (DnField::CommonName, Requirement::Supplied),
            ]))
            .copy_extensions(copy_extensions)
            .build();
        let database =
            CaDatabase::initialize(&settings.database, &settings.serial, Some(Serial::from(1u64)))
                .unwrap();
        let ca = CertificateAuthority::new(
            settings,
            CertificateWithPrivateKey { cert, key },
            database,
            profile,
        )
        .unwrap();
        Fixture { _dir: dir, ca }
    }

    fn request(cn: &str) -> CertificateRequest {
        CertificateRequest::builder()
            .subject(
                DistinguishedName::builder()
                    .country("US".to_string())
                    .organization("Dropped Org".to_string())
                    .common_name(cn.to_string())
                    .build(),
            )
            .alt_names(vec![AltName::dns(cn)])
            .build()
    }

    #[test]
    fn test_issue_applies_policy_and_records() {
        let mut f = fixture(CopyExtensions::Copy, None);
        let key = PublicKey::from_key_pair(&KeyPair::generate_ed25519());
        let cert = f.ca.issue(&request("a.example"), key).unwrap();

        assert_eq!(cert.serial(), Serial::from(1u64));
        assert_eq!(cert.subject().unwrap().to_oneline(), "/C=US/CN=a.example");
        assert_eq!(cert.subject_alt_names().unwrap(), vec![AltName::dns("a.example")]);
        cert.verify_signed_by(&PublicKey::from_key_pair(&f.ca.ca.key))
            .unwrap();
        assert_eq!(f.ca.database().next_serial(), &Serial::from(2u64));
        assert_eq!(f.ca.database().entries().len(), 1);
    }

    #[test]
    fn test_unrepresentable_validity_is_an_error() {
        let mut f = fixture(CopyExtensions::None, None);
        f.ca.settings.default_days = 5_000_000;
        let key = PublicKey::from_key_pair(&KeyPair::generate_ed25519());

        let err = f.ca.issue(&request("a.example"), key).unwrap_err();
        assert!(matches!(err, CaKitError::InvalidInput(_)), "{err:?}");
        assert_eq!(f.ca.database().next_serial(), &Serial::from(1u64));
        assert!(f.ca.database().entries().is_empty());
    }

    #[test]
    fn test_rejections_leave_registry_untouched() {
        let mut f = fixture(CopyExtensions::None, None);
        let mut wrong_country = request("a.example");
        wrong_country.subject.set(DnField::Country, Some("CA".to_string()));
        let key = PublicKey::from_key_pair(&KeyPair::generate_ed25519());

        let err = f.ca.issue(&wrong_country, key.clone()).unwrap_err();
        match err {
            CaKitError::PolicyViolation(v) => {
                assert_eq!(v.field, DnField::Country);
                assert!(matches!(v.kind, ViolationKind::Mismatch { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }

        f.ca.issue(&request("a.example"), key.clone()).unwrap();
        // unique_subject defaults to yes.
        assert!(f.ca.issue(&request("a.example"), key.clone()).is_err());
        assert_eq!(f.ca.database().next_serial(), &Serial::from(2u64));
        assert_eq!(f.ca.database().entries().len(), 1);

        f.ca.revoke(&Serial::from(1u64), None).unwrap();
        f.ca.issue(&request("a.example"), key).unwrap();
    }

    #[test]
    fn test_copy_extensions_modes() {
        let config = Config::parse(
            "[ usr_cert ]\nbasicConstraints = CA:FALSE\nsubjectAltName = DNS:profile.example\n",
        )
        .unwrap();
        let profile = ExtensionProfile::from_section(&config, "usr_cert").unwrap();
        let key = PublicKey::from_key_pair(&KeyPair::generate_ed25519());
        let mut req = request("a.example");
        req.extensions.push(
            ExtensionParam::from_extension(
                BasicConstraints {
                    is_ca: true,
                    max_path_length: None,
                },
                true,
            )
            .unwrap(),
        );

        let mut none = fixture(CopyExtensions::None, Some(profile.clone()));
        let cert = none.ca.issue(&req, key.clone()).unwrap();
        assert_eq!(cert.subject_alt_names().unwrap(), vec![AltName::dns("profile.example")]);

        let mut copy = fixture(CopyExtensions::Copy, Some(profile.clone()));
        let cert = copy.ca.issue(&req, key.clone()).unwrap();
        assert_eq!(cert.subject_alt_names().unwrap(), vec![AltName::dns("profile.example")]);
        assert!(!cert.extension::<BasicConstraints>().unwrap().unwrap().is_ca);

        let mut copy_all = fixture(CopyExtensions::CopyAll, Some(profile));
        let cert = copy_all.ca.issue(&req, key).unwrap();
        assert_eq!(
            cert.extension::<SubjectAltName>().unwrap().unwrap().names,
            vec![AltName::dns("a.example")]
        );
        assert!(cert.extension::<BasicConstraints>().unwrap().unwrap().is_ca);
    }

    #[test]
    fn test_issue_from_csr() {
        let mut f = fixture(CopyExtensions::Copy, None);
        let leaf = KeyPair::generate_ecdsa_p384();
        let csr = request("csr.example").sign(&leaf).unwrap();
        let cert = f.ca.issue_from_csr(&csr).unwrap();
        assert_eq!(
            cert.to_cert_info().unwrap().subject_public_key,
            PublicKey::from_key_pair(&leaf)
        );
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let f = fixture(CopyExtensions::None, None);
        let CertificateAuthority {
            settings,
            ca,
            database,
            ..
        } = f.ca;
        let other = CertificateWithPrivateKey {
            cert: ca.cert,
            key: KeyPair::generate_ecdsa_p256(),
        };
        assert!(CertificateAuthority::new(settings, other, database, None).is_err());
    }
}
