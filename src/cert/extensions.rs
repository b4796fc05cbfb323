use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use const_oid::AssociatedOid;
use der::{
    Decode, Encode,
    asn1::{Ia5String, OctetString},
    oid::ObjectIdentifier,
};
use x509_cert::ext::pkix::name::GeneralName;

use crate::error::CaKitError;

use super::params::DistinguishedName;

/// Trait for converting to and from X.509 extensions.
///
/// This trait provides methods to encode and decode X.509 extension values.
///
/// # Example
/// ```
/// use cakit::cert::extensions::{AltName, SubjectAltName, ToAndFromX509Extension};
/// let san = SubjectAltName { names: vec![AltName::dns("example.com")] };
/// let encoded = san.to_x509_extension_value().unwrap();
/// let decoded = SubjectAltName::from_x509_extension_value(&encoded).unwrap();
/// assert_eq!(san.names, decoded.names);
/// ```
pub trait ToAndFromX509Extension {
    /// The Object Identifier (OID) for the extension.
    const OID: ObjectIdentifier;

    /// Encodes the extension into a DER-encoded byte vector.
    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaKitError>;

    /// Decodes the extension from a DER-encoded byte slice.
    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaKitError>
    where
        Self: Sized;
}

/// The kind of a subject alternative name entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AltNameKind {
    Dns,
    Ip,
    Email,
    Uri,
}

impl AltNameKind {
    /// The OpenSSL config prefix, as in `DNS.1` or `IP:10.0.0.1`.
    pub fn prefix(self) -> &'static str {
        match self {
            AltNameKind::Dns => "DNS",
            AltNameKind::Ip => "IP",
            AltNameKind::Email => "email",
            AltNameKind::Uri => "URI",
        }
    }
}

impl FromStr for AltNameKind {
    type Err = CaKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DNS" => Ok(AltNameKind::Dns),
            "IP" => Ok(AltNameKind::Ip),
            "email" => Ok(AltNameKind::Email),
            "URI" => Ok(AltNameKind::Uri),
            other => Err(CaKitError::InvalidInput(format!(
                "unsupported subject alternative name type '{other}'"
            ))),
        }
    }
}

/// One subject alternative name.
///
/// The value is kept verbatim. IP values are only parsed into addresses when
/// the name is encoded, so configuration placeholders survive until then.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AltName {
    pub kind: AltNameKind,
    pub value: String,
}

impl AltName {
    pub fn new(kind: AltNameKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn dns(value: impl Into<String>) -> Self {
        Self::new(AltNameKind::Dns, value)
    }

    pub fn ip(value: impl Into<String>) -> Self {
        Self::new(AltNameKind::Ip, value)
    }

    pub fn to_general_name(&self) -> Result<GeneralName, CaKitError> {
        let ia5 = |v: &str| {
            Ia5String::new(v).map_err(|e| {
                CaKitError::InvalidInput(format!("{}:{v} is not IA5: {e}", self.kind.prefix()))
            })
        };
        Ok(match self.kind {
            AltNameKind::Dns => GeneralName::DnsName(ia5(&self.value)?),
            AltNameKind::Email => GeneralName::Rfc822Name(ia5(&self.value)?),
            AltNameKind::Uri => GeneralName::UniformResourceIdentifier(ia5(&self.value)?),
            AltNameKind::Ip => {
                let addr = IpAddr::from_str(&self.value).map_err(|_| {
                    CaKitError::InvalidInput(format!(
                        "IP:{} is not an IP address; replace the placeholder before encoding",
                        self.value
                    ))
                })?;
                let octets = match addr {
                    IpAddr::V4(v4) => v4.octets().to_vec(),
                    IpAddr::V6(v6) => v6.octets().to_vec(),
                };
                GeneralName::IpAddress(OctetString::new(octets)?)
            }
        })
    }

    pub fn from_general_name(name: &GeneralName) -> Result<Self, CaKitError> {
        match name {
            GeneralName::DnsName(dns) => Ok(AltName::dns(dns.to_string())),
            GeneralName::Rfc822Name(email) => Ok(AltName::new(AltNameKind::Email, email.to_string())),
            GeneralName::UniformResourceIdentifier(uri) => {
                Ok(AltName::new(AltNameKind::Uri, uri.to_string()))
            }
            GeneralName::IpAddress(octets) => {
                let addr = match octets.as_bytes() {
                    [a, b, c, d] => IpAddr::from([*a, *b, *c, *d]),
                    bytes if bytes.len() == 16 => {
                        let mut v6 = [0u8; 16];
                        v6.copy_from_slice(bytes);
                        IpAddr::from(v6)
                    }
                    _ => {
                        return Err(CaKitError::DecodingError(
                            "IP address SAN with invalid length".to_string(),
                        ));
                    }
                };
                Ok(AltName::ip(addr.to_string()))
            }
            _ => Err(CaKitError::InvalidInput(
                "Unsupported general name type".to_string(),
            )),
        }
    }
}

impl fmt::Display for AltName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.value)
    }
}

impl FromStr for AltName {
    type Err = CaKitError;

    /// Parses the inline form, `DNS:example.com`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s.trim().split_once(':').ok_or_else(|| {
            CaKitError::InvalidInput(format!("alternative name '{s}' has no type prefix"))
        })?;
        Ok(AltName::new(kind.trim().parse()?, value.trim()))
    }
}

/// Represents the Subject Alternative Name (SAN) extension.
///
/// This extension specifies additional identities for the subject of the certificate.
///
/// # Fields
/// * `names` - Ordered alternative names; duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAltName {
    pub names: Vec<AltName>,
}

impl ToAndFromX509Extension for SubjectAltName {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectAltName::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaKitError> {
        let san = x509_cert::ext::pkix::SubjectAltName(
            self.names
                .iter()
                .map(AltName::to_general_name)
                .collect::<Result<Vec<_>, _>>()?,
        );

        san.to_der()
            .map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaKitError> {
        let san = x509_cert::ext::pkix::SubjectAltName::from_der(extension)?;
        let names = san
            .0
            .iter()
            .map(AltName::from_general_name)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { names })
    }
}

/// Represents the Basic Constraints extension.
///
/// This extension indicates whether the certificate is a CA certificate and its path length.
///
/// # Fields
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `max_path_length` - The maximum number of intermediate CAs allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicConstraints {
    pub is_ca: bool,
    pub max_path_length: Option<u8>,
}

impl ToAndFromX509Extension for BasicConstraints {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::BasicConstraints::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaKitError> {
        let bc = x509_cert::ext::pkix::BasicConstraints {
            ca: self.is_ca,
            path_len_constraint: self.max_path_length,
        };

        Ok(bc.to_der()?)
    }

    fn from_x509_extension_value(der_bytes: &[u8]) -> Result<Self, CaKitError> {
        let bc = x509_cert::ext::pkix::BasicConstraints::from_der(der_bytes)?;
        Ok(Self {
            is_ca: bc.ca,
            max_path_length: bc.path_len_constraint,
        })
    }
}

pub use der::flagset::FlagSet;
use x509_cert::ext::pkix::KeyUsage as X509KeyUsage;
pub use x509_cert::ext::pkix::KeyUsages;

/// Represents the Key Usage extension.
///
/// This extension defines the purpose of the key contained in the certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage(pub FlagSet<KeyUsages>);

impl KeyUsage {
    /// Maps an OpenSSL `keyUsage` keyword to its flag.
    pub fn flag_from_name(name: &str) -> Option<KeyUsages> {
        Some(match name {
            "digitalSignature" => KeyUsages::DigitalSignature,
            "nonRepudiation" | "contentCommitment" => KeyUsages::NonRepudiation,
            "keyEncipherment" => KeyUsages::KeyEncipherment,
            "dataEncipherment" => KeyUsages::DataEncipherment,
            "keyAgreement" => KeyUsages::KeyAgreement,
            "keyCertSign" => KeyUsages::KeyCertSign,
            "cRLSign" => KeyUsages::CRLSign,
            "encipherOnly" => KeyUsages::EncipherOnly,
            "decipherOnly" => KeyUsages::DecipherOnly,
            _ => return None,
        })
    }
}

impl ToAndFromX509Extension for KeyUsage {
    const OID: ObjectIdentifier = <X509KeyUsage as AssociatedOid>::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaKitError> {
        let ku = X509KeyUsage::from(self.0);
        Ok(ku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaKitError> {
        let ku = X509KeyUsage::from_der(extension)?;
        Ok(Self(ku.0))
    }
}

/// Represents the Extended Key Usage extension.
///
/// This extension indicates purposes for which the public key may be used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedKeyUsage {
    pub usage: Vec<ExtendedKeyUsageOption>,
}

impl ToAndFromX509Extension for ExtendedKeyUsage {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::ExtendedKeyUsage::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaKitError> {
        let oids: Vec<ObjectIdentifier> = self.usage.iter().map(|v| (*v).into()).collect();
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage(oids);
        Ok(eku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaKitError> {
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage::from_der(extension)?;
        let usage = eku
            .0
            .iter()
            .map(|v| match *v {
                const_oid::db::rfc5912::ID_KP_OCSP_SIGNING => {
                    Ok(ExtendedKeyUsageOption::OcspSigning)
                }
                const_oid::db::rfc5912::ID_KP_SERVER_AUTH => Ok(ExtendedKeyUsageOption::ServerAuth),
                const_oid::db::rfc5912::ID_KP_CLIENT_AUTH => Ok(ExtendedKeyUsageOption::ClientAuth),
                const_oid::db::rfc5912::ID_KP_CODE_SIGNING => {
                    Ok(ExtendedKeyUsageOption::CodeSigning)
                }
                const_oid::db::rfc5912::ID_KP_EMAIL_PROTECTION => {
                    Ok(ExtendedKeyUsageOption::EmailProtection)
                }
                const_oid::db::rfc5912::ID_KP_TIME_STAMPING => {
                    Ok(ExtendedKeyUsageOption::TimeStamping)
                }
                _ => Err(CaKitError::InvalidInput(
                    "Unsupported extended key usage option".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { usage })
    }
}

/// Represents an option for the Extended Key Usage extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtendedKeyUsageOption {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    OcspSigning,
}

impl ExtendedKeyUsageOption {
    /// Maps an OpenSSL `extendedKeyUsage` short name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "serverAuth" => ExtendedKeyUsageOption::ServerAuth,
            "clientAuth" => ExtendedKeyUsageOption::ClientAuth,
            "codeSigning" => ExtendedKeyUsageOption::CodeSigning,
            "emailProtection" => ExtendedKeyUsageOption::EmailProtection,
            "timeStamping" => ExtendedKeyUsageOption::TimeStamping,
            "OCSPSigning" => ExtendedKeyUsageOption::OcspSigning,
            _ => return None,
        })
    }
}

impl From<ExtendedKeyUsageOption> for ObjectIdentifier {
    fn from(value: ExtendedKeyUsageOption) -> Self {
        match value {
            ExtendedKeyUsageOption::OcspSigning => const_oid::db::rfc5912::ID_KP_OCSP_SIGNING,
            ExtendedKeyUsageOption::ServerAuth => const_oid::db::rfc5912::ID_KP_SERVER_AUTH,
            ExtendedKeyUsageOption::ClientAuth => const_oid::db::rfc5912::ID_KP_CLIENT_AUTH,
            ExtendedKeyUsageOption::CodeSigning => const_oid::db::rfc5912::ID_KP_CODE_SIGNING,
            ExtendedKeyUsageOption::EmailProtection => {
                const_oid::db::rfc5912::ID_KP_EMAIL_PROTECTION
            }
            ExtendedKeyUsageOption::TimeStamping => const_oid::db::rfc5912::ID_KP_TIME_STAMPING,
        }
    }
}

/// Represents the Subject Key Identifier extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectKeyIdentifier(pub Vec<u8>);

impl ToAndFromX509Extension for SubjectKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaKitError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier(OctetString::new(self.0.as_slice())?);
        Ok(ski.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaKitError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(extension)?;
        Ok(Self(ski.0.as_bytes().to_vec()))
    }
}

/// Represents the Authority Key Identifier (AKI) extension.
///
/// This extension identifies the public key corresponding to the private key used to sign the certificate.
///
/// # Fields
/// * `key_identifier` - The key identifier.
/// * `authority_cert_issuer` - The issuer's distinguished name, when `issuer` was requested.
/// * `authority_cert_serial_number` - The issuer's certificate serial number, paired with the issuer.
#[derive(Debug, Clone, Default)]
pub struct AuthorityKeyIdentifier {
    pub key_identifier: Vec<u8>,
    pub authority_cert_issuer: Option<DistinguishedName>,
    pub authority_cert_serial_number: Option<Vec<u8>>,
}

impl ToAndFromX509Extension for AuthorityKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::AuthorityKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaKitError> {
        let authority_cert_issuer = self
            .authority_cert_issuer
            .as_ref()
            .map(|dn| dn.as_x509_name().map(|n| vec![GeneralName::DirectoryName(n)]))
            .transpose()?;
        let authority_cert_serial_number = self
            .authority_cert_serial_number
            .as_ref()
            .map(|sn| x509_cert::serial_number::SerialNumber::new(sn.as_slice()))
            .transpose()?;

        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier {
            key_identifier: (!self.key_identifier.is_empty())
                .then(|| OctetString::new(self.key_identifier.as_slice()))
                .transpose()?,
            authority_cert_issuer,
            authority_cert_serial_number,
        };

        Ok(aki.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaKitError> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier::from_der(extension)?;

        let authority_cert_issuer = aki
            .authority_cert_issuer
            .as_ref()
            .and_then(|names| {
                names.iter().find_map(|name| match name {
                    GeneralName::DirectoryName(dn) => Some(DistinguishedName::from_x509_name(dn)),
                    _ => None,
                })
            })
            .transpose()?;

        Ok(Self {
            key_identifier: aki
                .key_identifier
                .map(|id| id.as_bytes().to_vec())
                .unwrap_or_default(),
            authority_cert_issuer,
            authority_cert_serial_number: aki
                .authority_cert_serial_number
                .map(|sn| sn.as_bytes().to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_constraints_encoding_decoding() {
        let original = BasicConstraints {
            is_ca: true,
            max_path_length: Some(3),
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = BasicConstraints::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_authority_key_identifier_encoding_decoding() {
        let original = AuthorityKeyIdentifier {
            key_identifier: vec![1, 2, 3, 4, 5],
            authority_cert_issuer: Some(DistinguishedName {
                common_name: Some("Test CA".to_string()),
                country: Some("US".to_string()),
                state: Some("California".to_string()),
                locality: Some("San Francisco".to_string()),
                organization: Some("Test Org".to_string()),
                organization_unit: Some("Test Unit".to_string()),
                email_address: None,
            }),
            authority_cert_serial_number: Some(vec![6, 7, 8, 9, 10]),
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = AuthorityKeyIdentifier::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original.key_identifier, decoded.key_identifier);
        assert_eq!(original.authority_cert_issuer, decoded.authority_cert_issuer);
        assert_eq!(
            original.authority_cert_serial_number,
            decoded.authority_cert_serial_number
        );
    }

    #[test]
    fn test_key_usage_encoding_decoding() {
        let original = KeyUsage(KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment);
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = KeyUsage::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_subject_alt_name_keeps_order_and_duplicates() {
        let original = SubjectAltName {
            names: vec![
                AltName::dns("princeton.edu"),
                AltName::dns("localhost"),
                AltName::dns("localhost"),
                AltName::ip("127.0.0.1"),
                AltName::ip("::1"),
            ],
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = SubjectAltName::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_ip_placeholder_fails_to_encode() {
        let san = SubjectAltName {
            names: vec![AltName::ip("hostname")],
        };
        let err = san.to_x509_extension_value().unwrap_err();
        assert!(err.to_string().contains("hostname"));
    }

    #[test]
    fn test_inline_alt_name_parsing() {
        let name: AltName = "IP: 10.0.0.1".parse().unwrap();
        assert_eq!(name, AltName::ip("10.0.0.1"));
        assert_eq!(name.to_string(), "IP:10.0.0.1");
        assert!("otherName:foo".parse::<AltName>().is_err());
        assert!("localhost".parse::<AltName>().is_err());
    }
}
