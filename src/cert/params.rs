use std::fmt;
use std::fmt::Write as _;

use bon::Builder;
use const_oid::ObjectIdentifier;
use der::Tag;
use der::asn1::{Any, SetOfVec};
use time::Duration;
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};

use super::extensions::ToAndFromX509Extension;
use crate::error::CaKitError;
use crate::key::PublicKey;

/// Parameters for building an X.509 certificate.
///
/// This struct contains the subject, public key, and optional extensions for the certificate.
///
/// # Fields
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `extensions` - Additional X.509 extensions.
#[derive(Clone, Debug, Builder)]
pub struct CertificationRequestInfo {
    pub subject: DistinguishedName,
    pub subject_public_key: PublicKey,
    #[builder(default)]
    pub is_ca: bool,
    #[builder(default)]
    pub extensions: Vec<ExtensionParam>,
}

/// One attribute of a distinguished name.
///
/// Knows both the long name used in policy sections (`countryName`) and the
/// short name used in `prompt = no` request sections and index files (`C`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DnField {
    Country,
    StateOrProvince,
    Locality,
    Organization,
    OrganizationalUnit,
    CommonName,
    EmailAddress,
}

impl DnField {
    /// All fields in the order they are written into a name.
    pub const ALL: [DnField; 7] = [
        DnField::Country,
        DnField::StateOrProvince,
        DnField::Locality,
        DnField::Organization,
        DnField::OrganizationalUnit,
        DnField::CommonName,
        DnField::EmailAddress,
    ];

    pub fn long_name(self) -> &'static str {
        match self {
            DnField::Country => "countryName",
            DnField::StateOrProvince => "stateOrProvinceName",
            DnField::Locality => "localityName",
            DnField::Organization => "organizationName",
            DnField::OrganizationalUnit => "organizationalUnitName",
            DnField::CommonName => "commonName",
            DnField::EmailAddress => "emailAddress",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            DnField::Country => "C",
            DnField::StateOrProvince => "ST",
            DnField::Locality => "L",
            DnField::Organization => "O",
            DnField::OrganizationalUnit => "OU",
            DnField::CommonName => "CN",
            DnField::EmailAddress => "emailAddress",
        }
    }

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            DnField::Country => ObjectIdentifier::new_unwrap("2.5.4.6"),
            DnField::StateOrProvince => ObjectIdentifier::new_unwrap("2.5.4.8"),
            DnField::Locality => ObjectIdentifier::new_unwrap("2.5.4.7"),
            DnField::Organization => ObjectIdentifier::new_unwrap("2.5.4.10"),
            DnField::OrganizationalUnit => ObjectIdentifier::new_unwrap("2.5.4.11"),
            DnField::CommonName => ObjectIdentifier::new_unwrap("2.5.4.3"),
            DnField::EmailAddress => ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1"),
        }
    }

    /// Looks a field up by its long or short name.
    pub fn from_name(name: &str) -> Option<Self> {
        DnField::ALL
            .into_iter()
            .find(|f| f.long_name() == name || f.short_name() == name)
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        DnField::ALL.into_iter().find(|f| f.oid() == *oid)
    }

    // countryName is PrintableString and emailAddress IA5String per RFC 5280,
    // everything else is written as UTF8String like OpenSSL's default string_mask.
    fn value_tag(self) -> Tag {
        match self {
            DnField::Country => Tag::PrintableString,
            DnField::EmailAddress => Tag::Ia5String,
            _ => Tag::Utf8String,
        }
    }
}

impl fmt::Display for DnField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.long_name())
    }
}

/// Distinguished name parameters for building an X.509 certificate.
///
/// This struct represents the subject or issuer name in a certificate.
///
/// # Fields
/// * `common_name` - The common name (CN).
/// * `country` - The country (C).
/// * `state` - The state or province (ST).
/// * `locality` - The locality or city (L).
/// * `organization` - The organization (O).
/// * `organization_unit` - The organizational unit (OU).
/// * `email_address` - The PKCS#9 email address.
#[derive(Clone, Debug, Builder, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    pub common_name: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub organization: Option<String>,
    pub organization_unit: Option<String>,
    pub email_address: Option<String>,
}

impl DistinguishedName {
    pub fn get(&self, field: DnField) -> Option<&str> {
        match field {
            DnField::Country => self.country.as_deref(),
            DnField::StateOrProvince => self.state.as_deref(),
            DnField::Locality => self.locality.as_deref(),
            DnField::Organization => self.organization.as_deref(),
            DnField::OrganizationalUnit => self.organization_unit.as_deref(),
            DnField::CommonName => self.common_name.as_deref(),
            DnField::EmailAddress => self.email_address.as_deref(),
        }
    }

    pub fn set(&mut self, field: DnField, value: Option<String>) {
        let slot = match field {
            DnField::Country => &mut self.country,
            DnField::StateOrProvince => &mut self.state,
            DnField::Locality => &mut self.locality,
            DnField::Organization => &mut self.organization,
            DnField::OrganizationalUnit => &mut self.organization_unit,
            DnField::CommonName => &mut self.common_name,
            DnField::EmailAddress => &mut self.email_address,
        };
        *slot = value;
    }

    /// Present fields with their values, in name order.
    pub fn entries(&self) -> impl Iterator<Item = (DnField, &str)> {
        DnField::ALL
            .into_iter()
            .filter_map(|f| self.get(f).map(|v| (f, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Converts the distinguished name to an X.509-compatible format.
    ///
    /// Absent fields are left out rather than written as empty strings.
    ///
    /// # Returns
    /// An `x509_cert::name::DistinguishedName` object.
    pub fn as_x509_name(&self) -> Result<x509_cert::name::DistinguishedName, CaKitError> {
        let rdns = self
            .entries()
            .map(|(field, value)| {
                let atv = AttributeTypeAndValue {
                    oid: field.oid(),
                    value: Any::new(field.value_tag(), value.as_bytes())?,
                };
                Ok(RelativeDistinguishedName(SetOfVec::try_from(vec![atv])?))
            })
            .collect::<Result<Vec<_>, CaKitError>>()?;
        Ok(RdnSequence(rdns))
    }

    /// Creates a `DistinguishedName` from an X.509-compatible format.
    ///
    /// Attributes other than the seven known fields are skipped.
    ///
    /// # Arguments
    /// * `x509dn` - An `x509_cert::name::DistinguishedName` object.
    pub fn from_x509_name(x509dn: &x509_cert::name::DistinguishedName) -> Result<Self, CaKitError> {
        let mut dn = DistinguishedName::default();
        for rdn in x509dn.0.iter() {
            for attr in rdn.0.iter() {
                let Some(field) = DnField::from_oid(&attr.oid) else {
                    continue;
                };
                let value = std::str::from_utf8(attr.value.value()).map_err(|e| {
                    CaKitError::DecodingError(format!("{field} is not a valid string: {e}"))
                })?;
                dn.set(field, Some(value.to_string()));
            }
        }
        Ok(dn)
    }

    /// Renders the name in OpenSSL's one-line form, `/C=US/ST=.../CN=...`.
    ///
    /// `/` and `\` in values are backslash-escaped and control characters
    /// become `\xHH`, so the result is a single tab-free line.
    pub fn to_oneline(&self) -> String {
        let mut line = String::new();
        for (field, value) in self.entries() {
            line.push('/');
            line.push_str(field.short_name());
            line.push('=');
            escape_oneline_value(value, &mut line);
        }
        line
    }

    /// Parses the one-line form written by [`DistinguishedName::to_oneline`].
    pub fn from_oneline(s: &str) -> Result<Self, CaKitError> {
        let mut dn = DistinguishedName::default();
        let Some(rest) = s.strip_prefix('/') else {
            return if s.is_empty() {
                Ok(dn)
            } else {
                Err(CaKitError::DecodingError(format!(
                    "distinguished name must start with '/': {s}"
                )))
            };
        };

        // Files written by other tools may carry a bare '/' inside a value.
        // A part that does not start with a known "KEY=" continues the value.
        let mut current: Option<(DnField, String)> = None;
        for part in split_unescaped_slashes(rest) {
            let known = part
                .split_once('=')
                .and_then(|(key, value)| DnField::from_name(key).map(|f| (f, value)));
            match known {
                Some((field, value)) => {
                    if let Some((prev, prev_value)) = current.take() {
                        dn.set(prev, Some(prev_value));
                    }
                    current = Some((field, unescape_oneline_value(value)?));
                }
                None => match current.as_mut() {
                    Some((_, value)) => {
                        value.push('/');
                        value.push_str(&unescape_oneline_value(part)?);
                    }
                    None => {
                        return Err(CaKitError::DecodingError(format!(
                            "unknown distinguished name component '{part}'"
                        )));
                    }
                },
            }
        }
        if let Some((field, value)) = current {
            dn.set(field, Some(value));
        }
        Ok(dn)
    }
}

fn escape_oneline_value(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' | '/' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii_control() => {
                let _ = write!(out, "\\x{:02X}", u32::from(c));
            }
            c => out.push(c),
        }
    }
}

fn split_unescaped_slashes(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '/' => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unescape_oneline_value(raw: &str) -> Result<String, CaKitError> {
    let bad = || CaKitError::DecodingError(format!("bad escape in distinguished name value '{raw}'"));
    let mut value = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next().ok_or_else(bad)? {
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() != 2 || !hex.chars().all(|h| h.is_ascii_hexdigit()) {
                    return Err(bad());
                }
                let byte = u8::from_str_radix(&hex, 16).map_err(|_| bad())?;
                value.push(char::from(byte));
            }
            other => value.push(other),
        }
    }
    Ok(value)
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_oneline())
    }
}

/// Certificate validity period.
///
/// This struct represents the `notBefore` and `notAfter` fields in a certificate.
///
/// # Fields
/// * `not_before` - The start of the validity period.
/// * `not_after` - The end of the validity period.
#[derive(Clone, Debug)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period starting now for the given number of days.
    ///
    /// # Arguments
    /// * `days` - The number of days for the validity period.
    ///
    /// # Returns
    /// A `Validity` object, or `InvalidInput` when the end falls past
    /// 9999-12-31.
    pub fn for_days(days: i64) -> Result<Self, CaKitError> {
        let now = OffsetDateTime::now_utc();
        let not_after = days
            .checked_mul(86_400)
            .map(Duration::seconds)
            .and_then(|d| now.checked_add(d))
            .ok_or_else(|| {
                CaKitError::InvalidInput(format!("validity of {days} days runs past 9999-12-31"))
            })?;
        Ok(Self {
            not_before: now,
            not_after,
        })
    }
}

/// Represents an X.509 extension.
///
/// This struct contains the OID, criticality, and value of an extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    ///
    /// # Arguments
    /// * `extension` - The extension to encode.
    /// * `critical` - Indicates if the extension is critical.
    pub fn from_extension<E: ToAndFromX509Extension>(
        extension: E,
        critical: bool,
    ) -> Result<Self, CaKitError> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    ///
    /// # Returns
    /// A decoded extension object.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E, CaKitError> {
        E::from_x509_extension_value(&self.value)
    }

    pub fn to_x509(&self) -> Result<x509_cert::ext::Extension, CaKitError> {
        Ok(x509_cert::ext::Extension {
            extn_id: self.oid,
            critical: self.critical,
            extn_value: der::asn1::OctetString::new(self.value.clone())?,
        })
    }

    pub fn from_x509(ext: &x509_cert::ext::Extension) -> Self {
        Self {
            oid: ext.extn_id,
            critical: ext.critical,
            value: ext.extn_value.as_bytes().to_vec(),
        }
    }
}

/// Replaces any extension with the same OID, otherwise appends.
pub fn upsert_extension(extensions: &mut Vec<ExtensionParam>, ext: ExtensionParam) {
    match extensions.iter_mut().find(|e| e.oid == ext.oid) {
        Some(existing) => *existing = ext,
        None => extensions.push(ext),
    }
}
