//! Typed view of the `[ ca ]` / `[ CA_default ]` sections.

use std::path::PathBuf;
use std::str::FromStr;

use bon::Builder;

use super::{Config, Result};
use crate::cert::params::Validity;
use crate::error::CaKitError;
use crate::policy::IssuancePolicy;

/// How request extensions reach the issued certificate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CopyExtensions {
    /// Ignore request extensions.
    #[default]
    None,
    /// Copy request extensions the CA profile does not set itself.
    Copy,
    /// Copy all request extensions, replacing the CA profile's.
    CopyAll,
}

impl FromStr for CopyExtensions {
    type Err = CaKitError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CopyExtensions::None),
            "copy" => Ok(CopyExtensions::Copy),
            "copyall" => Ok(CopyExtensions::CopyAll),
            other => Err(CaKitError::InvalidInput(format!(
                "copy_extensions must be none, copy or copyall, found '{other}'"
            ))),
        }
    }
}

/// Settings of one CA section.
#[derive(Clone, Debug, Builder)]
pub struct CaSettings {
    /// Name of the section the settings came from.
    #[builder(into)]
    pub name: String,
    /// Index file (`database`).
    #[builder(into)]
    pub database: PathBuf,
    /// Serial counter file (`serial`).
    #[builder(into)]
    pub serial: PathBuf,
    pub policy: IssuancePolicy,
    /// CA certificate PEM (`certificate`).
    #[builder(into)]
    pub certificate: Option<PathBuf>,
    /// CA private key PEM (`private_key`).
    #[builder(into)]
    pub private_key: Option<PathBuf>,
    #[builder(default = 365)]
    pub default_days: i64,
    #[builder(default = true)]
    pub unique_subject: bool,
    #[builder(default)]
    pub copy_extensions: CopyExtensions,
    /// Extension section applied to every issued certificate.
    #[builder(into)]
    pub x509_extensions: Option<String>,
}

impl CaSettings {
    /// Reads the CA named by `[ ca ] default_ca`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let name = config.require("ca", "default_ca")?;
        Self::from_section(config, name)
    }

    /// Reads the named CA section.
    pub fn from_section(config: &Config, name: &str) -> Result<Self> {
        config.require_section(name)?;

        let database = config.resolve_path(config.require(name, "database")?);
        let serial = config.resolve_path(config.require(name, "serial")?);

        let policy_name = config.require(name, "policy")?;
        let mut policy = IssuancePolicy::from_section(config, policy_name)?;
        policy.preserve = config.get_bool(name, "preserve")?.unwrap_or(false);

        let copy_extensions = config
            .get(name, "copy_extensions")
            .map(|v| {
                v.parse::<CopyExtensions>()
                    .map_err(|e| config.error_for(name, "copy_extensions", e.to_string()))
            })
            .transpose()?
            .unwrap_or_default();

        let default_days = config.get_number::<i64>(name, "default_days")?.unwrap_or(365);
        if default_days <= 0 {
            return Err(config.error_for(name, "default_days", "default_days must be positive"));
        }
        if let Err(e) = Validity::for_days(default_days) {
            return Err(config.error_for(name, "default_days", e.to_string()));
        }

        let x509_extensions = config.get(name, "x509_extensions").map(str::to_string);
        if let Some(section) = &x509_extensions {
            config.require_section(section)?;
        }

        let settings = CaSettings {
            name: name.to_string(),
            database,
            serial,
            policy,
            certificate: config.get(name, "certificate").map(|p| config.resolve_path(p)),
            private_key: config.get(name, "private_key").map(|p| config.resolve_path(p)),
            default_days,
            unique_subject: config.get_bool(name, "unique_subject")?.unwrap_or(true),
            copy_extensions,
            x509_extensions,
        };
        log::debug!(
            "loaded CA [{}]: database {}, serial {}",
            settings.name,
            settings.database.display(),
            settings.serial.display()
        );
        Ok(settings)
    }
}
