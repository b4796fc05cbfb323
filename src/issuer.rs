use der::Encode;
use x509_cert::certificate::CertificateInner;

use crate::cert::extensions::AuthorityKeyIdentifier;
use crate::cert::extensions::BasicConstraints;
use crate::cert::extensions::KeyUsage;
use crate::cert::extensions::KeyUsages;
use crate::cert::extensions::SubjectKeyIdentifier;
use crate::cert::extensions::ToAndFromX509Extension;
use crate::cert::params::Validity;
use crate::cert::params::{CertificationRequestInfo, DistinguishedName, ExtensionParam};
use crate::cert::{Certificate, Result};
use crate::key::{KeyPair, PublicKey};
use crate::serial::Serial;
use crate::tbs_certificate::TbsCertificate;

/// Represents an entity capable of issuing certificates.
///
/// This trait provides methods to retrieve issuer details and issue certificates.
pub trait Issuer {
    /// Returns the distinguished name of the issuer.
    fn issuer_name(&self) -> Result<DistinguishedName>;

    /// Returns the signing key of the issuer.
    fn signing_key(&self) -> &KeyPair;

    /// Issues a certificate based on the provided certification request information.
    ///
    /// Extensions carried in `cert_request.extensions` win over the defaults
    /// derived here from `is_ca`.
    ///
    /// # Arguments
    /// * `cert_request` - The certification request information containing details about the certificate to be issued.
    /// * `serial` - The serial number to stamp into the certificate.
    /// * `validity` - The validity period.
    fn issue(
        &self,
        cert_request: &CertificationRequestInfo,
        serial: &Serial,
        validity: Validity,
    ) -> Result<Certificate> {
        let signature_algo = self.signing_key().signature_algorithm();
        let issuer_dn = self.issuer_name()?;
        let issuer_key_id = PublicKey::from_key_pair(self.signing_key()).key_identifier()?;

        let mut extensions: Vec<ExtensionParam> = vec![
            ExtensionParam::from_extension(
                BasicConstraints {
                    is_ca: cert_request.is_ca,
                    max_path_length: None,
                },
                true,
            )?,
            ExtensionParam::from_extension(
                SubjectKeyIdentifier(cert_request.subject_public_key.key_identifier()?),
                false,
            )?,
            ExtensionParam::from_extension(
                AuthorityKeyIdentifier {
                    key_identifier: issuer_key_id,
                    ..Default::default()
                },
                false,
            )?,
        ];

        if cert_request.is_ca {
            let key_usage = KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign);
            extensions.push(ExtensionParam::from_extension(key_usage, true)?);
        }

        for ext in &cert_request.extensions {
            crate::cert::params::upsert_extension(&mut extensions, ext.clone());
        }

        let tbs_cert = TbsCertificate {
            serial_number: serial.to_be_bytes(),
            signature_algorithm: signature_algo,
            issuer: issuer_dn,
            not_before: validity.not_before,
            not_after: validity.not_after,
            subject: cert_request.subject.clone(),
            subject_public_key: cert_request.subject_public_key.clone(),
            extensions,
        };

        let tbs_cert_inner = tbs_cert.to_tbs_certificate_inner()?;

        let signature = self.signing_key().sign_data(&tbs_cert_inner.to_der()?)?;

        let cert_inner = CertificateInner {
            tbs_certificate: tbs_cert_inner,
            signature_algorithm: signature_algo.to_algorithm_identifier()?,
            signature: der::asn1::BitString::from_bytes(&signature)?,
        };

        log::debug!(
            "signed certificate serial {} for {}",
            serial,
            cert_request.subject
        );

        Ok(Certificate { inner: cert_inner })
    }
}

/// Returns true when `extensions` already carries an extension of type `E`.
pub fn has_extension<E: ToAndFromX509Extension>(extensions: &[ExtensionParam]) -> bool {
    extensions.iter().any(|e| e.oid == E::OID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::CertificateWithPrivateKey;
    use crate::cert::extensions::{AltName, SubjectAltName};

    fn ca() -> CertificateWithPrivateKey {
        let key = KeyPair::generate_ecdsa_p256();
        let info = CertificationRequestInfo::builder()
            .subject(
                DistinguishedName::builder()
                    .common_name("Issuer Test CA".to_string())
                    .build(),
            )
            .subject_public_key(PublicKey::from_key_pair(&key))
            .is_ca(true)
            .build();
        let validity = Validity::for_days(10).unwrap();
        let cert = Certificate::new_self_signed(&info, &key, validity).unwrap();
        CertificateWithPrivateKey { cert, key }
    }

    #[test]
    fn test_issue_uses_given_serial_and_issuer() {
        let ca = ca();
        let leaf_key = KeyPair::generate_ed25519();
        let info = CertificationRequestInfo::builder()
            .subject(
                DistinguishedName::builder()
                    .common_name("leaf.local".to_string())
                    .build(),
            )
            .subject_public_key(PublicKey::from_key_pair(&leaf_key))
            .build();

        let serial = Serial::from(0x1234u64);
        let leaf = ca.issue(&info, &serial, Validity::for_days(1).unwrap()).unwrap();

        assert_eq!(leaf.serial(), serial);
        assert_eq!(
            leaf.issuer().unwrap().common_name.as_deref(),
            Some("Issuer Test CA")
        );
        let bc = leaf.extension::<BasicConstraints>().unwrap().unwrap();
        assert!(!bc.is_ca);
        assert!(leaf.extension::<KeyUsage>().unwrap().is_none());
        leaf.verify_signed_by(&PublicKey::from_key_pair(&ca.key))
            .unwrap();
    }

    #[test]
    fn test_request_extensions_override_derived_ones() {
        let ca = ca();
        let info = CertificationRequestInfo::builder()
            .subject(DistinguishedName::builder().common_name("x".to_string()).build())
            .subject_public_key(PublicKey::from_key_pair(&ca.key))
            .extensions(vec![
                ExtensionParam::from_extension(
                    BasicConstraints {
                        is_ca: true,
                        max_path_length: Some(0),
                    },
                    true,
                )
                .unwrap(),
                ExtensionParam::from_extension(
                    SubjectAltName {
                        names: vec![AltName::dns("x")],
                    },
                    false,
                )
                .unwrap(),
            ])
            .build();
        let cert = ca
            .issue(&info, &Serial::from(2u64), Validity::for_days(1).unwrap())
            .unwrap();
        let exts = cert.extensions();
        assert_eq!(
            exts.iter()
                .filter(|e| e.oid == <BasicConstraints as ToAndFromX509Extension>::OID)
                .count(),
            1
        );
        assert!(has_extension::<SubjectAltName>(&exts));
        let bc = cert.extension::<BasicConstraints>().unwrap().unwrap();
        assert_eq!(bc.max_path_length, Some(0));
    }
}
