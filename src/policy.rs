//! Issuance policy: which subject fields a request must, may, or must
//! identically carry before the CA signs it.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::cert::params::{DistinguishedName, DnField};
use crate::config::Config;
use crate::error::CaKitError;

/// How a policy treats one subject field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// May be absent; kept when present.
    Optional,
    /// Must be present and non-empty.
    Supplied,
    /// Must be present and equal to the CA certificate's own value.
    Match,
}

impl FromStr for Requirement {
    type Err = CaKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "optional" => Ok(Requirement::Optional),
            "supplied" => Ok(Requirement::Supplied),
            "match" => Ok(Requirement::Match),
            other => Err(CaKitError::InvalidInput(format!(
                "policy requirement must be optional, supplied or match, found '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Requirement::Optional => "optional",
            Requirement::Supplied => "supplied",
            Requirement::Match => "match",
        })
    }
}

/// Why a field failed the policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// A `supplied` or `match` field is absent or empty.
    Missing,
    /// A `match` field differs from the CA's value.
    Mismatch { expected: String, found: String },
    /// A `match` field has no value in the CA certificate to compare to.
    MissingInCa,
}

/// A field-identified policy rejection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}", describe(.field, .kind))]
pub struct PolicyViolation {
    pub field: DnField,
    pub kind: ViolationKind,
}

fn describe(field: &DnField, kind: &ViolationKind) -> String {
    match kind {
        ViolationKind::Missing => format!("The {field} field needed to be supplied and was missing"),
        ViolationKind::Mismatch { expected, found } => format!(
            "The {field} field needed to be the same in the CA certificate ({expected}) and the request ({found})"
        ),
        ViolationKind::MissingInCa => {
            format!("The {field} field does not exist in the CA certificate but policy requires a match")
        }
    }
}

/// An ordered field-to-requirement mapping, as in a `[policy_match]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IssuancePolicy {
    rules: Vec<(DnField, Requirement)>,
    /// Keep the request subject as-is instead of reducing it to policy fields.
    pub preserve: bool,
}

impl IssuancePolicy {
    pub fn new(rules: Vec<(DnField, Requirement)>) -> Self {
        Self {
            rules,
            preserve: false,
        }
    }

    /// Reads the policy from the named section.
    pub fn from_section(config: &Config, name: &str) -> Result<Self, CaKitError> {
        let section = config.require_section(name)?;
        let mut rules: Vec<(DnField, Requirement)> = Vec::new();
        for entry in &section.entries {
            let field = DnField::from_name(&entry.key).ok_or_else(|| {
                CaKitError::config_at(
                    entry.line,
                    format!("unknown field '{}' in policy [{name}]", entry.key),
                )
            })?;
            let requirement = entry
                .value
                .parse()
                .map_err(|e: CaKitError| CaKitError::config_at(entry.line, e.to_string()))?;
            match rules.iter_mut().find(|(f, _)| *f == field) {
                Some(rule) => rule.1 = requirement,
                None => rules.push((field, requirement)),
            }
        }
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[(DnField, Requirement)] {
        &self.rules
    }

    pub fn requirement(&self, field: DnField) -> Option<Requirement> {
        self.rules
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, r)| *r)
    }

    /// Checks `request` against the policy, using `ca_subject` for `match` fields.
    ///
    /// On success returns the subject the certificate will carry: the policy
    /// fields present in the request, or the request unchanged when
    /// `preserve` is set. Fields keep the fixed name order
    /// (`C, ST, L, O, OU, CN, emailAddress`) whatever order the policy lists.
    /// The first failing field, in policy order, is reported.
    pub fn evaluate(
        &self,
        request: &DistinguishedName,
        ca_subject: &DistinguishedName,
    ) -> Result<DistinguishedName, PolicyViolation> {
        let mut accepted = DistinguishedName::default();

        for &(field, requirement) in &self.rules {
            let value = request.get(field).filter(|v| !v.trim().is_empty());
            match requirement {
                Requirement::Optional => {}
                Requirement::Supplied => {
                    if value.is_none() {
                        return Err(PolicyViolation {
                            field,
                            kind: ViolationKind::Missing,
                        });
                    }
                }
                Requirement::Match => {
                    let Some(found) = value else {
                        return Err(PolicyViolation {
                            field,
                            kind: ViolationKind::Missing,
                        });
                    };
                    let Some(expected) = ca_subject.get(field) else {
                        return Err(PolicyViolation {
                            field,
                            kind: ViolationKind::MissingInCa,
                        });
                    };
                    if expected != found {
                        return Err(PolicyViolation {
                            field,
                            kind: ViolationKind::Mismatch {
                                expected: expected.to_string(),
                                found: found.to_string(),
                            },
                        });
                    }
                }
            }
            accepted.set(field, value.map(str::to_string));
        }

        if self.preserve {
            return Ok(request.clone());
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_match() -> IssuancePolicy {
        let config = Config::parse(
            "[ policy_match ]\n\
             countryName = optional\n\
             stateOrProvinceName = optional\n\
             localityName = optional\n\
             organizationName = supplied\n\
             organizationalUnitName = supplied\n\
             commonName = supplied\n\
             emailAddress = optional\n",
        )
        .unwrap();
        IssuancePolicy::from_section(&config, "policy_match").unwrap()
    }

    fn full_request() -> DistinguishedName {
        DistinguishedName::builder()
            .country("US".to_string())
            .state("New Jersey".to_string())
            .locality("Princeton".to_string())
            .organization("Princeton University".to_string())
            .organization_unit("PNI".to_string())
            .common_name("rtcloud.princeton.edu".to_string())
            .build()
    }

    #[test]
    fn test_full_request_is_accepted() {
        let request = full_request();
        let accepted = policy_match()
            .evaluate(&request, &DistinguishedName::default())
            .unwrap();
        assert_eq!(accepted, request);
    }

    #[test]
    fn test_each_supplied_field_is_required() {
        let policy = policy_match();
        for field in [
            DnField::Organization,
            DnField::OrganizationalUnit,
            DnField::CommonName,
        ] {
            for empty in [None, Some(String::new()), Some("   ".to_string())] {
                let mut request = full_request();
                request.set(field, empty);
                let err = policy
                    .evaluate(&request, &DistinguishedName::default())
                    .unwrap_err();
                assert_eq!(err.field, field);
                assert_eq!(err.kind, ViolationKind::Missing);
            }
        }
    }

    #[test]
    fn test_optional_fields_never_reject() {
        let policy = policy_match();
        let optional = [
            DnField::Country,
            DnField::StateOrProvince,
            DnField::Locality,
            DnField::EmailAddress,
        ];
        // Every presence/absence combination of the optional fields.
        for mask in 0..(1u32 << optional.len()) {
            let mut request = full_request();
            for (bit, field) in optional.iter().enumerate() {
                let value = (mask & (1 << bit) != 0).then(|| "x@example.org".to_string());
                request.set(*field, value);
            }
            assert!(
                policy
                    .evaluate(&request, &DistinguishedName::default())
                    .is_ok(),
                "mask {mask:b} rejected"
            );
        }
    }

    #[test]
    fn test_match_fields() {
        let policy = IssuancePolicy::new(vec![
            (DnField::Country, Requirement::Match),
            (DnField::CommonName, Requirement::Supplied),
        ]);
        let ca = DistinguishedName::builder().country("US".to_string()).build();

        let ok = DistinguishedName::builder()
            .country("US".to_string())
            .common_name("a".to_string())
            .build();
        assert!(policy.evaluate(&ok, &ca).is_ok());

        let wrong = DistinguishedName::builder()
            .country("CA".to_string())
            .common_name("a".to_string())
            .build();
        let err = policy.evaluate(&wrong, &ca).unwrap_err();
        assert_eq!(
            err.kind,
            ViolationKind::Mismatch {
                expected: "US".to_string(),
                found: "CA".to_string()
            }
        );
        assert!(err.to_string().contains("countryName"));

        let err = policy
            .evaluate(&ok, &DistinguishedName::default())
            .unwrap_err();
        assert_eq!(err.kind, ViolationKind::MissingInCa);
    }

    #[test]
    fn test_unlisted_fields_are_dropped_unless_preserved() {
        let mut policy = IssuancePolicy::new(vec![(DnField::CommonName, Requirement::Supplied)]);
        let request = full_request();

        let accepted = policy
            .evaluate(&request, &DistinguishedName::default())
            .unwrap();
        assert_eq!(
            accepted,
            DistinguishedName::builder()
                .common_name("rtcloud.princeton.edu".to_string())
                .build()
        );

        policy.preserve = true;
        let accepted = policy
            .evaluate(&request, &DistinguishedName::default())
            .unwrap();
        assert_eq!(accepted, request);
    }

    #[test]
    fn test_accepted_subject_uses_name_order() {
        let policy = IssuancePolicy::new(vec![
            (DnField::CommonName, Requirement::Supplied),
            (DnField::OrganizationalUnit, Requirement::Optional),
            (DnField::Country, Requirement::Optional),
        ]);
        let accepted = policy
            .evaluate(&full_request(), &DistinguishedName::default())
            .unwrap();
        assert_eq!(accepted.to_oneline(), "/C=US/OU=PNI/CN=rtcloud.princeton.edu");

        let mut request = full_request();
        request.common_name = None;
        request.country = None;
        let strict = IssuancePolicy::new(vec![
            (DnField::CommonName, Requirement::Supplied),
            (DnField::Country, Requirement::Supplied),
        ]);
        let err = strict
            .evaluate(&request, &DistinguishedName::default())
            .unwrap_err();
        assert_eq!(err.field, DnField::CommonName);
    }

    #[test]
    fn test_bad_policy_sections() {
        let config = Config::parse("[p]\ncommonName = required\n").unwrap();
        let err = IssuancePolicy::from_section(&config, "p").unwrap_err();
        assert!(matches!(err, CaKitError::ConfigError { line: Some(2), .. }));

        let config = Config::parse("[p]\nfavouriteColour = optional\n").unwrap();
        assert!(IssuancePolicy::from_section(&config, "p").is_err());
        assert!(IssuancePolicy::from_section(&config, "missing").is_err());
    }
}
