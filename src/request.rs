//! Certificate requests: built non-interactively from a `[ req ]` profile,
//! signed into PKCS#10 CSRs, and decoded back.
//!
//! ```
//! use cakit::config::Config;
//! use cakit::request::CertificateRequest;
//!
//! let config = Config::parse(
//!     "[ req ]\n\
//!      distinguished_name = dn\n\
//!      prompt = no\n\
//!      [ dn ]\n\
//!      O = Example\n\
//!      CN = www.example.org\n",
//! ).unwrap();
//! let request = CertificateRequest::from_config(&config).unwrap();
//! assert_eq!(request.subject.to_oneline(), "/O=Example/CN=www.example.org");
//! ```

use bon::Builder;
use der::asn1::{Any, BitString, SetOfVec};
use der::{Decode, DecodePem, Encode, EncodePem};
use x509_cert::attr::Attribute;
use x509_cert::ext::Extension;
use x509_cert::request::{CertReq, CertReqInfo, ExtensionReq, Version};

use crate::cert::SignatureAlgorithm;
use crate::cert::extensions::{AltName, SubjectAltName, ToAndFromX509Extension};
use crate::cert::params::{DistinguishedName, DnField, ExtensionParam};
use crate::config::Config;
use crate::config::extensions::ExtensionProfile;
use crate::error::CaKitError;
use crate::key::{KeyPair, PublicKey};

pub type Result<T> = std::result::Result<T, CaKitError>;

const DEFAULT_BITS: usize = 2048;

/// Typed view of the `[ req ]` section.
#[derive(Clone, Debug, PartialEq, Eq, Builder)]
pub struct RequestSettings {
    /// Section holding the subject template.
    #[builder(into)]
    pub distinguished_name: String,
    /// Extension section requested in the CSR.
    #[builder(into)]
    pub req_extensions: Option<String>,
    /// `prompt = no` means the template holds values, not prompts.
    #[builder(default = true)]
    pub prompt: bool,
    /// RSA key size for freshly generated keys.
    #[builder(default = DEFAULT_BITS)]
    pub default_bits: usize,
}

impl RequestSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = RequestSettings {
            distinguished_name: config.require("req", "distinguished_name")?.to_string(),
            req_extensions: config.get("req", "req_extensions").map(str::to_string),
            prompt: config.get_bool("req", "prompt")?.unwrap_or(true),
            default_bits: config
                .get_number("req", "default_bits")?
                .unwrap_or(DEFAULT_BITS),
        };
        log::debug!(
            "request profile: subject from [{}], prompt={}, extensions {:?}",
            settings.distinguished_name,
            settings.prompt,
            settings.req_extensions
        );
        Ok(settings)
    }

    /// Generates an RSA key of `default_bits`.
    pub fn generate_key(&self) -> Result<KeyPair> {
        KeyPair::generate_rsa(self.default_bits)
    }

    /// Reads the subject template.
    ///
    /// With `prompt = no` each assignment is a value. Otherwise the section
    /// holds prompts, and batch mode takes `<field>_default` while honouring
    /// `<field>_min` / `<field>_max`. Empty values and `.` leave the field out.
    pub fn subject(&self, config: &Config) -> Result<DistinguishedName> {
        let section = config.require_section(&self.distinguished_name)?;
        let mut subject = DistinguishedName::default();

        for entry in &section.entries {
            let key = strip_multi_value_prefix(&entry.key);
            if !self.prompt {
                let field = field_named(key, entry.line)?;
                subject.set(field, non_blank(&entry.value));
                continue;
            }

            if key.ends_with("_default") || key.ends_with("_min") || key.ends_with("_max") {
                continue;
            }
            let field = field_named(key, entry.line)?;
            let Some(value) = section.get(&format!("{}_default", entry.key)).and_then(non_blank)
            else {
                subject.set(field, None);
                continue;
            };

            let len = value.chars().count();
            let bound = |suffix: &str| -> Result<Option<usize>> {
                config.get_number(&self.distinguished_name, &format!("{}_{suffix}", entry.key))
            };
            if let Some(min) = bound("min")?.filter(|min| len < *min) {
                return Err(CaKitError::config_at(
                    entry.line,
                    format!("{field} '{value}' is shorter than {min} characters"),
                ));
            }
            if let Some(max) = bound("max")?.filter(|max| len > *max) {
                return Err(CaKitError::config_at(
                    entry.line,
                    format!("{field} '{value}' is longer than {max} characters"),
                ));
            }
            subject.set(field, Some(value));
        }
        Ok(subject)
    }
}

// `0.organizationName`, `1.organizationName` name repeated attributes.
fn strip_multi_value_prefix(key: &str) -> &str {
    match key.split_once('.') {
        Some((n, rest)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => key,
    }
}

fn field_named(key: &str, line: usize) -> Result<DnField> {
    DnField::from_name(key).ok_or_else(|| {
        CaKitError::config_at(line, format!("unknown distinguished name field '{key}'"))
    })
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty() && value != ".").then(|| value.to_string())
}

/// A certificate request before signing.
#[derive(Clone, Debug, PartialEq, Builder)]
pub struct CertificateRequest {
    pub subject: DistinguishedName,
    /// Alternative names, in configuration order, duplicates included.
    #[builder(default)]
    pub alt_names: Vec<AltName>,
    /// Requested extensions other than subjectAltName.
    #[builder(default)]
    pub extensions: Vec<ExtensionParam>,
}

impl CertificateRequest {
    /// Builds the request described by `[ req ]` without asking anything.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = RequestSettings::from_config(config)?;
        Self::from_settings(config, &settings)
    }

    pub fn from_settings(config: &Config, settings: &RequestSettings) -> Result<Self> {
        let subject = settings.subject(config)?;

        let (alt_names, extensions) = match &settings.req_extensions {
            Some(name) => {
                let mut profile = ExtensionProfile::from_section(config, name)?;
                let alt_names = profile.alt_names().to_vec();
                profile.subject_alt_name = None;
                (alt_names, profile.static_params()?)
            }
            None => (Vec::new(), Vec::new()),
        };

        log::debug!(
            "built request for {subject} with {} alternative names",
            alt_names.len()
        );
        Ok(CertificateRequest {
            subject,
            alt_names,
            extensions,
        })
    }

    /// All requested extensions, subjectAltName first.
    pub fn requested_extensions(&self) -> Result<Vec<ExtensionParam>> {
        let mut params = Vec::with_capacity(self.extensions.len() + 1);
        if !self.alt_names.is_empty() {
            params.push(ExtensionParam::from_extension(
                SubjectAltName {
                    names: self.alt_names.clone(),
                },
                false,
            )?);
        }
        params.extend(self.extensions.iter().cloned());
        Ok(params)
    }

    /// Signs the request with `key` into a PKCS#10 CSR.
    pub fn sign(&self, key: &KeyPair) -> Result<Csr> {
        let extensions = self
            .requested_extensions()?
            .iter()
            .map(ExtensionParam::to_x509)
            .collect::<Result<Vec<_>>>()?;

        let mut attributes = SetOfVec::new();
        if !extensions.is_empty() {
            attributes.insert(Attribute {
                oid: <ExtensionReq as const_oid::AssociatedOid>::OID,
                values: SetOfVec::try_from(vec![Any::encode_from(&extensions)?])?,
            })?;
        }

        let info = CertReqInfo {
            version: Version::V1,
            subject: self.subject.as_x509_name()?,
            public_key: key.as_spki()?,
            attributes,
        };
        let signature = key.sign_data(&info.to_der()?)?;

        Ok(Csr {
            inner: CertReq {
                info,
                algorithm: key.signature_algorithm().to_algorithm_identifier()?,
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }
}

/// A signed PKCS#10 certificate signing request.
#[derive(Clone, Debug)]
pub struct Csr {
    pub inner: CertReq,
}

impl Csr {
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    /// PEM with the `CERTIFICATE REQUEST` label.
    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CertReq::from_der(der)?,
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self {
            inner: CertReq::from_pem(pem)?,
        })
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_x509spki(&self.inner.info.public_key)
    }

    /// Checks the self-signature with the enclosed public key.
    pub fn verify(&self) -> Result<()> {
        SignatureAlgorithm::from_algorithm_identifier(&self.inner.algorithm)?;
        let info = self.inner.info.to_der()?;
        self.public_key()?
            .verify(&info, self.inner.signature.raw_bytes())
            .map_err(|e| CaKitError::CertificateError(format!("CSR signature: {e}")))
    }

    /// Extensions from the `extensionRequest` attribute.
    pub fn extensions(&self) -> Result<Vec<Extension>> {
        let mut extensions = Vec::new();
        for attribute in self.inner.info.attributes.iter() {
            if attribute.oid != <ExtensionReq as const_oid::AssociatedOid>::OID {
                continue;
            }
            for value in attribute.values.iter() {
                extensions.extend(value.decode_as::<Vec<Extension>>()?);
            }
        }
        Ok(extensions)
    }

    /// Decodes the CSR into the request it was signed from.
    pub fn to_request(&self) -> Result<CertificateRequest> {
        let subject = DistinguishedName::from_x509_name(&self.inner.info.subject)?;
        let mut alt_names = Vec::new();
        let mut extensions = Vec::new();
        for ext in self.extensions()? {
            let param = ExtensionParam::from_x509(&ext);
            if param.oid == SubjectAltName::OID {
                alt_names.extend(param.to_extension::<SubjectAltName>()?.names);
            } else {
                extensions.push(param);
            }
        }
        Ok(CertificateRequest {
            subject,
            alt_names,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::extensions::{AltNameKind, BasicConstraints};

    const REQ: &str = "\
[ req ]
distinguished_name = req_distinguished_name
req_extensions = v3_req
prompt = no

[ v3_req ]
basicConstraints = CA:FALSE
subjectAltName = @alt_names

[ alt_names ]
DNS.1 = a.example
DNS.2 = localhost
#DNS.3 = disabled.example
IP.1 = 127.0.0.1

[ req_distinguished_name ]
C = US
O = Example
CN = a.example
";

    #[test]
    fn test_prompt_no_template() {
        let request = CertificateRequest::from_config(&Config::parse(REQ).unwrap()).unwrap();
        assert_eq!(request.subject.to_oneline(), "/C=US/O=Example/CN=a.example");
        let names: Vec<String> = request.alt_names.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["DNS:a.example", "DNS:localhost", "IP:127.0.0.1"]);
        assert_eq!(request.extensions.len(), 1);
        assert_eq!(request.extensions[0].oid, BasicConstraints::OID);
    }

    #[test]
    fn test_batch_mode_defaults_and_bounds() {
        let text = "\
[ req ]
distinguished_name = dn
[ dn ]
countryName = Country Name (2 letter code)
countryName_default = US
countryName_min = 2
countryName_max = 2
0.organizationName = Organization Name
0.organizationName_default = Example Inc
organizationalUnitName = Unit
organizationalUnitName_default =
commonName = Common Name
commonName_default = host.example
";
        let config = Config::parse(text).unwrap();
        let request = CertificateRequest::from_config(&config).unwrap();
        assert_eq!(
            request.subject,
            DistinguishedName::builder()
                .country("US".to_string())
                .organization("Example Inc".to_string())
                .common_name("host.example".to_string())
                .build()
        );
        assert!(request.alt_names.is_empty());

        let too_long = text.replace("countryName_default = US", "countryName_default = USA");
        let err = CertificateRequest::from_config(&Config::parse(&too_long).unwrap()).unwrap_err();
        assert!(matches!(err, CaKitError::ConfigError { line: Some(4), .. }));
    }

    #[test]
    fn test_unknown_subject_field() {
        let config =
            Config::parse("[ req ]\ndistinguished_name = dn\nprompt = no\n[ dn ]\nXX = 1\n").unwrap();
        assert!(CertificateRequest::from_config(&config).is_err());
    }

    #[test]
    fn test_csr_round_trip_keeps_subject_and_names() {
        let request = CertificateRequest::builder()
            .subject(
                DistinguishedName::builder()
                    .organization("Example".to_string())
                    .common_name("a.example".to_string())
                    .build(),
            )
            .alt_names(vec![
                AltName::dns("a.example"),
                AltName::dns("a.example"),
                AltName::ip("::1"),
            ])
            .build();
        let key = KeyPair::generate_ecdsa_p256();
        let csr = request.sign(&key).unwrap();
        csr.verify().unwrap();

        let pem = csr.to_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
        let decoded = Csr::from_pem(&pem).unwrap();
        assert_eq!(decoded.to_request().unwrap(), request);
        assert_eq!(decoded.public_key().unwrap(), PublicKey::from_key_pair(&key));
    }

    #[test]
    fn test_tampered_csr_fails_verification() {
        let request = CertificateRequest::builder()
            .subject(DistinguishedName::builder().common_name("x".to_string()).build())
            .build();
        let mut csr = request.sign(&KeyPair::generate_ed25519()).unwrap();
        csr.inner.info.subject = DistinguishedName::builder()
            .common_name("y".to_string())
            .build()
            .as_x509_name()
            .unwrap();
        assert!(csr.verify().is_err());
    }

    #[test]
    fn test_placeholder_ip_fails_only_when_signing() {
        let request = CertificateRequest::builder()
            .subject(DistinguishedName::builder().common_name("x".to_string()).build())
            .alt_names(vec![AltName::new(AltNameKind::Ip, "hostname")])
            .build();
        let err = request.sign(&KeyPair::generate_ed25519()).unwrap_err();
        assert!(err.to_string().contains("hostname"));
    }
}
