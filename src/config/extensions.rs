//! Extension sections such as `[ v3_req ]` or `[ usr_cert ]`.

use super::{Config, Result};
use crate::cert::extensions::{
    AltName, AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, ExtendedKeyUsageOption,
    FlagSet, KeyUsage, SubjectAltName, SubjectKeyIdentifier,
};
use crate::cert::params::{DistinguishedName, ExtensionParam};
use crate::error::CaKitError;
use crate::key::PublicKey;
use crate::serial::Serial;

/// What `authorityKeyIdentifier` asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuthorityKeyIdMode {
    pub key_id: bool,
    pub issuer: bool,
}

/// The extensions one config section describes.
///
/// Key identifiers depend on keys that are only known at signing time, so
/// they stay symbolic until [`ExtensionProfile::to_params`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionProfile {
    pub basic_constraints: Option<(BasicConstraints, bool)>,
    pub key_usage: Option<(KeyUsage, bool)>,
    pub extended_key_usage: Option<(ExtendedKeyUsage, bool)>,
    pub subject_alt_name: Option<(SubjectAltName, bool)>,
    pub subject_key_identifier: bool,
    pub authority_key_identifier: Option<AuthorityKeyIdMode>,
}

/// The issuing CA, for `authorityKeyIdentifier`.
pub struct IssuerContext<'a> {
    pub name: &'a DistinguishedName,
    pub key: &'a PublicKey,
    pub serial: &'a Serial,
}

impl ExtensionProfile {
    /// Parses the named extension section.
    pub fn from_section(config: &Config, name: &str) -> Result<Self> {
        let section = config.require_section(name)?;
        let mut profile = ExtensionProfile::default();

        for entry in &section.entries {
            let at = |e: CaKitError| CaKitError::config_at(entry.line, e.to_string());
            let (critical, value) = split_critical(&entry.value);
            match entry.key.as_str() {
                "basicConstraints" => {
                    profile.basic_constraints =
                        Some((parse_basic_constraints(value).map_err(at)?, critical));
                }
                "keyUsage" => {
                    profile.key_usage = Some((parse_key_usage(value).map_err(at)?, critical));
                }
                "extendedKeyUsage" => {
                    profile.extended_key_usage =
                        Some((parse_extended_key_usage(value).map_err(at)?, critical));
                }
                "subjectAltName" => {
                    let names = parse_alt_names(config, value).map_err(at)?;
                    profile.subject_alt_name = Some((SubjectAltName { names }, critical));
                }
                "subjectKeyIdentifier" => match value {
                    "hash" => profile.subject_key_identifier = true,
                    "none" => profile.subject_key_identifier = false,
                    other => {
                        return Err(CaKitError::config_at(
                            entry.line,
                            format!("subjectKeyIdentifier must be hash or none, found '{other}'"),
                        ));
                    }
                },
                "authorityKeyIdentifier" => {
                    profile.authority_key_identifier =
                        Some(parse_authority_key_id(value).map_err(at)?);
                }
                other => {
                    return Err(CaKitError::config_at(
                        entry.line,
                        format!("unsupported extension '{other}' in [{name}]"),
                    ));
                }
            }
        }
        Ok(profile)
    }

    /// Alternative names named by the section, in order.
    pub fn alt_names(&self) -> &[AltName] {
        self.subject_alt_name
            .as_ref()
            .map(|(san, _)| san.names.as_slice())
            .unwrap_or_default()
    }

    /// Encodes the extensions that do not depend on any key.
    pub fn static_params(&self) -> Result<Vec<ExtensionParam>> {
        let mut params = Vec::new();
        if let Some((bc, critical)) = &self.basic_constraints {
            params.push(ExtensionParam::from_extension(bc.clone(), *critical)?);
        }
        if let Some((ku, critical)) = &self.key_usage {
            params.push(ExtensionParam::from_extension(*ku, *critical)?);
        }
        if let Some((eku, critical)) = &self.extended_key_usage {
            params.push(ExtensionParam::from_extension(eku.clone(), *critical)?);
        }
        if let Some((san, critical)) = &self.subject_alt_name {
            params.push(ExtensionParam::from_extension(san.clone(), *critical)?);
        }
        Ok(params)
    }

    /// Encodes the profile for a certificate with `subject_key`, issued by `issuer`.
    ///
    /// Without an issuer (a request), `authorityKeyIdentifier` is skipped.
    pub fn to_params(
        &self,
        subject_key: &PublicKey,
        issuer: Option<&IssuerContext<'_>>,
    ) -> Result<Vec<ExtensionParam>> {
        let mut params = self.static_params()?;
        if self.subject_key_identifier {
            params.push(ExtensionParam::from_extension(
                SubjectKeyIdentifier(subject_key.key_identifier()?),
                false,
            )?);
        }
        if let (Some(mode), Some(issuer)) = (self.authority_key_identifier, issuer) {
            let aki = AuthorityKeyIdentifier {
                key_identifier: if mode.key_id {
                    issuer.key.key_identifier()?
                } else {
                    Vec::new()
                },
                authority_cert_issuer: mode.issuer.then(|| issuer.name.clone()),
                authority_cert_serial_number: mode.issuer.then(|| issuer.serial.to_be_bytes()),
            };
            params.push(ExtensionParam::from_extension(aki, false)?);
        }
        Ok(params)
    }
}

fn split_critical(value: &str) -> (bool, &str) {
    match value.strip_prefix("critical") {
        Some(rest) if rest.trim_start().starts_with(',') => {
            (true, rest.trim_start()[1..].trim_start())
        }
        _ => (false, value),
    }
}

fn list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_basic_constraints(value: &str) -> std::result::Result<BasicConstraints, CaKitError> {
    let mut bc = BasicConstraints::default();
    for item in list(value) {
        let (key, val) = item.split_once(':').ok_or_else(|| {
            CaKitError::InvalidInput(format!("basicConstraints item '{item}' needs a value"))
        })?;
        match (key.trim(), val.trim().to_ascii_uppercase().as_str()) {
            ("CA", "TRUE") => bc.is_ca = true,
            ("CA", "FALSE") => bc.is_ca = false,
            ("pathlen", n) => {
                bc.max_path_length = Some(n.parse().map_err(|_| {
                    CaKitError::InvalidInput(format!("pathlen '{n}' is not a number 0-255"))
                })?);
            }
            _ => {
                return Err(CaKitError::InvalidInput(format!(
                    "unsupported basicConstraints item '{item}'"
                )));
            }
        }
    }
    Ok(bc)
}

fn parse_key_usage(value: &str) -> std::result::Result<KeyUsage, CaKitError> {
    let mut flags = FlagSet::empty();
    for item in list(value) {
        flags |= KeyUsage::flag_from_name(item)
            .ok_or_else(|| CaKitError::InvalidInput(format!("unknown keyUsage '{item}'")))?;
    }
    Ok(KeyUsage(flags))
}

fn parse_extended_key_usage(value: &str) -> std::result::Result<ExtendedKeyUsage, CaKitError> {
    let usage = list(value)
        .map(|item| {
            ExtendedKeyUsageOption::from_name(item).ok_or_else(|| {
                CaKitError::InvalidInput(format!("unknown extendedKeyUsage '{item}'"))
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ExtendedKeyUsage { usage })
}

fn parse_authority_key_id(value: &str) -> std::result::Result<AuthorityKeyIdMode, CaKitError> {
    let mut mode = AuthorityKeyIdMode::default();
    for item in list(value) {
        match item.split(':').next().unwrap_or(item) {
            "keyid" => mode.key_id = true,
            "issuer" => mode.issuer = true,
            other => {
                return Err(CaKitError::InvalidInput(format!(
                    "unsupported authorityKeyIdentifier option '{other}'"
                )));
            }
        }
    }
    Ok(mode)
}

/// Parses a `subjectAltName` value: `@section` references and inline
/// `TYPE:value` items, in order.
pub fn parse_alt_names(config: &Config, value: &str) -> Result<Vec<AltName>> {
    let mut names = Vec::new();
    for item in list(value) {
        if let Some(section_name) = item.strip_prefix('@') {
            let section = config.require_section(section_name)?;
            for entry in &section.entries {
                // DNS.1, DNS.2, ... ; the suffix only keeps keys distinct.
                let kind = entry.key.split('.').next().unwrap_or(&entry.key);
                let kind = kind.parse().map_err(|e: CaKitError| {
                    CaKitError::config_at(entry.line, e.to_string())
                })?;
                names.push(AltName::new(kind, entry.value.trim()));
            }
        } else {
            names.push(item.parse()?);
        }
    }
    Ok(names)
}
