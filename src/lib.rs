//! # cakit - OpenSSL-style Certificate Authorities in Pure Rust
//!
//! cakit runs a small certificate authority the way `openssl ca` and
//! `openssl req` do, from the same configuration file, without linking
//! OpenSSL. It is built on the rustcrypto libraries.
//!
//! ## What it covers
//!
//! - **Configuration**: parses OpenSSL `NCONF` files (sections, quoting,
//!   line continuations, `$var` expansion) into typed CA and request settings.
//! - **Requests**: builds a certificate request non-interactively from the
//!   `[ req ]` profile (`prompt = no` or batch defaults), signs it into a
//!   PKCS#10 CSR and decodes CSRs back.
//! - **Issuance policy**: `optional` / `supplied` / `match` rules from a
//!   `[ policy_* ]` section, with field-identified rejections.
//! - **Registry**: the `serial` counter and `index.txt` database, in the
//!   formats OpenSSL reads and writes.
//! - **Signing**: X.509 v3 certificates with RSA, ECDSA P-256/P-384 or
//!   Ed25519 keys, extensions taken from `x509_extensions` and, per
//!   `copy_extensions`, from the request.
//!
//! ## Quick Start
//!
//! ### Building a request from a configuration
//!
//! ```rust
//! use cakit::{config::Config, key::KeyPair, request::CertificateRequest};
//!
//! # fn main() -> Result<(), cakit::error::CaKitError> {
//! let config = Config::parse(
//!     "[ req ]
//!      distinguished_name = req_distinguished_name
//!      req_extensions = v3_req
//!      prompt = no
//!
//!      [ v3_req ]
//!      subjectAltName = @alt_names
//!
//!      [ alt_names ]
//!      DNS.1 = example.org
//!      DNS.2 = localhost
//!
//!      [ req_distinguished_name ]
//!      O = Example
//!      OU = Ops
//!      CN = example.org",
//! )?;
//!
//! let request = CertificateRequest::from_config(&config)?;
//! assert_eq!(request.alt_names.len(), 2);
//!
//! let csr = request.sign(&KeyPair::generate_ecdsa_p256())?;
//! println!("{}", csr.to_pem()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Issuing from a CA directory
//!
//! ```rust,no_run
//! use cakit::{authority::CertificateAuthority, config::Config, request::Csr};
//!
//! # fn main() -> Result<(), cakit::error::CaKitError> {
//! let config = Config::load("/etc/myca/openssl.cnf")?;
//! let mut ca = CertificateAuthority::open(&config)?;
//!
//! let csr = Csr::from_pem(&std::fs::read_to_string("server.csr").unwrap())?;
//! let cert = ca.issue_from_csr(&csr)?;
//! println!("issued serial {}", cert.serial());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible call returns [`error::CaKitError`]. Policy rejections carry
//! the offending field:
//!
//! ```rust
//! use cakit::cert::params::{DistinguishedName, DnField};
//! use cakit::policy::{IssuancePolicy, Requirement};
//!
//! let policy = IssuancePolicy::new(vec![(DnField::CommonName, Requirement::Supplied)]);
//! let err = policy
//!     .evaluate(&DistinguishedName::default(), &DistinguishedName::default())
//!     .unwrap_err();
//! assert_eq!(err.field, DnField::CommonName);
//! ```
//!
//! ## Module Organization
//!
//! - [`config`]: configuration parsing and the typed CA / extension views
//! - [`policy`]: issuance policy evaluation
//! - [`request`]: request settings, request building and CSRs
//! - [`database`]: serial and index files
//! - [`authority`]: the certificate authority tying it all together
//! - [`key`]: key generation, import/export and signatures
//! - [`cert`]: certificates, names and extensions
//! - [`issuer`]: the signing seam shared by self-signed and CA issuance
//! - [`serial`]: arbitrary-length serial numbers
//! - [`error`]: the crate error type
//! - [`tbs_certificate`]: low-level to-be-signed certificate structure
//!
//! The library logs through the `log` facade and installs no logger.

pub mod authority;
pub mod cert;
pub mod config;
pub mod database;
pub mod error;
pub mod issuer;
pub mod key;
pub mod policy;
pub mod request;
pub mod serial;
pub mod tbs_certificate;
