use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_256_R_1, SECP_384_R_1};
use const_oid::db::rfc8410::ID_ED_25519;
use der::{Decode, Encode};
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use p256::ecdsa::{SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use p384::ecdsa::{SigningKey as P384SigningKey, VerifyingKey as P384VerifyingKey};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::SignatureAlgorithm;
use crate::error::CaKitError;

pub type Result<T> = std::result::Result<T, CaKitError>;

/// Supported key types for certificate operations.
#[derive(Clone, Debug)]
pub enum KeyPair {
    Rsa {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
    EcdsaP256 {
        signing_key: P256SigningKey,
        verifying_key: P256VerifyingKey,
    },
    EcdsaP384 {
        signing_key: P384SigningKey,
        verifying_key: P384VerifyingKey,
    },
    Ed25519 {
        signing_key: Ed25519SigningKey,
    },
}

impl KeyPair {
    /// Generate an RSA key pair with the specified number of bits.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        let mut rng = rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CaKitError::KeyGenerationError(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Generate an ECDSA P-256 key pair.
    pub fn generate_ecdsa_p256() -> Self {
        let mut rng = rand_core::OsRng;
        let signing_key = P256SigningKey::random(&mut rng);
        let verifying_key = *signing_key.verifying_key();
        KeyPair::EcdsaP256 {
            signing_key,
            verifying_key,
        }
    }

    /// Generate an ECDSA P-384 key pair.
    pub fn generate_ecdsa_p384() -> Self {
        let mut rng = rand_core::OsRng;
        let signing_key = P384SigningKey::random(&mut rng);
        let verifying_key = *signing_key.verifying_key();
        KeyPair::EcdsaP384 {
            signing_key,
            verifying_key,
        }
    }

    /// Generate an Ed25519 key pair.
    pub fn generate_ed25519() -> Self {
        let mut rng = rand_core::OsRng;
        let signing_key = Ed25519SigningKey::generate(&mut rng);
        KeyPair::Ed25519 { signing_key }
    }

    /// The signature algorithm this key produces.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            KeyPair::Rsa { .. } => SignatureAlgorithm::Sha256WithRSA,
            KeyPair::EcdsaP256 { .. } => SignatureAlgorithm::Sha256WithECDSA,
            KeyPair::EcdsaP384 { .. } => SignatureAlgorithm::Sha384WithECDSA,
            KeyPair::Ed25519 { .. } => SignatureAlgorithm::Ed25519,
        }
    }

    /// Signs `data`, returning the signature in the encoding X.509 expects
    /// (PKCS#1 v1.5 for RSA, DER `ECDSA-Sig-Value` for ECDSA, raw for Ed25519).
    pub fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            KeyPair::Rsa { private, .. } => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new((**private).clone());
                let signature = signing_key
                    .try_sign(data)
                    .map_err(|e| CaKitError::CertificateError(e.to_string()))?;
                Ok(signature.to_vec())
            }
            KeyPair::EcdsaP256 { signing_key, .. } => {
                let signature: p256::ecdsa::Signature = signing_key.try_sign(data)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::EcdsaP384 { signing_key, .. } => {
                let signature: p384::ecdsa::Signature = signing_key.try_sign(data)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::Ed25519 { signing_key } => {
                let signature = signing_key.try_sign(data)?;
                Ok(signature.to_bytes().to_vec())
            }
        }
    }

    /// Returns the public half as a `SubjectPublicKeyInfo`.
    pub fn as_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        PublicKey::from_key_pair(self).to_spki()
    }

    /// Imports a PKCS#8 PEM private key of any supported type.
    pub fn import_from_pkcs8_pem(pem: &str) -> Result<Self> {
        let (label, doc) = pkcs8::SecretDocument::from_pem(pem)
            .map_err(|e| CaKitError::DecodingError(e.to_string()))?;
        if label != "PRIVATE KEY" {
            return Err(CaKitError::InvalidInput(format!(
                "expected a PRIVATE KEY PEM block, found {label}"
            )));
        }
        Self::import_from_pkcs8_der(doc.as_bytes())
    }

    /// Imports a PKCS#8 DER private key of any supported type.
    pub fn import_from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = pkcs8::PrivateKeyInfo::from_der(der)?;
        match info.algorithm.oid {
            RSA_ENCRYPTION => {
                let private = RsaPrivateKey::from_pkcs8_der(der)?;
                let public = RsaPublicKey::from(&private);
                Ok(KeyPair::Rsa {
                    private: Box::new(private),
                    public,
                })
            }
            ID_EC_PUBLIC_KEY => {
                let curve = info
                    .algorithm
                    .parameters_oid()
                    .map_err(|e| CaKitError::DecodingError(e.to_string()))?;
                match curve {
                    SECP_256_R_1 => {
                        let signing_key = P256SigningKey::from_pkcs8_der(der)?;
                        let verifying_key = *signing_key.verifying_key();
                        Ok(KeyPair::EcdsaP256 {
                            signing_key,
                            verifying_key,
                        })
                    }
                    SECP_384_R_1 => {
                        let signing_key = P384SigningKey::from_pkcs8_der(der)?;
                        let verifying_key = *signing_key.verifying_key();
                        Ok(KeyPair::EcdsaP384 {
                            signing_key,
                            verifying_key,
                        })
                    }
                    other => Err(CaKitError::InvalidInput(format!(
                        "unsupported elliptic curve {other}"
                    ))),
                }
            }
            ID_ED_25519 => Ok(KeyPair::Ed25519 {
                signing_key: Ed25519SigningKey::from_pkcs8_der(der)?,
            }),
            other => Err(CaKitError::InvalidInput(format!(
                "unsupported private key algorithm {other}"
            ))),
        }
    }

    /// Exports the private key as PKCS#8 PEM.
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = match self {
            KeyPair::Rsa { private, .. } => private.to_pkcs8_pem(LineEnding::LF)?,
            KeyPair::EcdsaP256 { signing_key, .. } => signing_key.to_pkcs8_pem(LineEnding::LF)?,
            KeyPair::EcdsaP384 { signing_key, .. } => signing_key.to_pkcs8_pem(LineEnding::LF)?,
            KeyPair::Ed25519 { signing_key } => signing_key.to_pkcs8_pem(LineEnding::LF)?,
        };
        Ok(pem.as_str().to_owned())
    }
}

fn curve_of(spki: &SubjectPublicKeyInfoOwned) -> Result<const_oid::ObjectIdentifier> {
    spki.algorithm
        .parameters
        .as_ref()
        .ok_or_else(|| CaKitError::DecodingError("EC key without curve parameters".to_string()))?
        .decode_as::<const_oid::ObjectIdentifier>()
        .map_err(CaKitError::from)
}

/// The public half of a [`KeyPair`], as carried in requests and certificates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(P256VerifyingKey),
    EcdsaP384(P384VerifyingKey),
    Ed25519(Ed25519VerifyingKey),
}

impl PublicKey {
    pub fn from_key_pair(key: &KeyPair) -> Self {
        match key {
            KeyPair::Rsa { public, .. } => PublicKey::Rsa(public.clone()),
            KeyPair::EcdsaP256 { verifying_key, .. } => PublicKey::EcdsaP256(*verifying_key),
            KeyPair::EcdsaP384 { verifying_key, .. } => PublicKey::EcdsaP384(*verifying_key),
            KeyPair::Ed25519 { signing_key } => PublicKey::Ed25519(signing_key.verifying_key()),
        }
    }

    /// Encodes the key as a DER `SubjectPublicKeyInfo`.
    pub fn to_public_key_der(&self) -> Result<Vec<u8>> {
        let doc = match self {
            PublicKey::Rsa(key) => key.to_public_key_der()?,
            PublicKey::EcdsaP256(key) => key.to_public_key_der()?,
            PublicKey::EcdsaP384(key) => key.to_public_key_der()?,
            PublicKey::Ed25519(key) => key.to_public_key_der()?,
        };
        Ok(doc.as_bytes().to_vec())
    }

    pub fn to_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let der = self.to_public_key_der()?;
        Ok(SubjectPublicKeyInfoOwned::from_der(&der)?)
    }

    /// Recovers a public key from a certificate or request SPKI.
    pub fn from_x509spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let der = spki.to_der()?;
        match spki.algorithm.oid {
            RSA_ENCRYPTION => Ok(PublicKey::Rsa(RsaPublicKey::from_public_key_der(&der)?)),
            ID_EC_PUBLIC_KEY => match curve_of(spki)? {
                SECP_256_R_1 => Ok(PublicKey::EcdsaP256(P256VerifyingKey::from_public_key_der(
                    &der,
                )?)),
                SECP_384_R_1 => Ok(PublicKey::EcdsaP384(P384VerifyingKey::from_public_key_der(
                    &der,
                )?)),
                other => Err(CaKitError::InvalidInput(format!(
                    "unsupported elliptic curve {other}"
                ))),
            },
            ID_ED_25519 => Ok(PublicKey::Ed25519(Ed25519VerifyingKey::from_public_key_der(
                &der,
            )?)),
            other => Err(CaKitError::InvalidInput(format!(
                "unsupported public key algorithm {other}"
            ))),
        }
    }

    /// SHA-1 over the subject public key bits, as used for key identifiers.
    pub fn key_identifier(&self) -> Result<Vec<u8>> {
        let spki = self.to_spki()?;
        let digest = <sha1::Sha1 as sha1::Digest>::digest(spki.subject_public_key.raw_bytes());
        Ok(digest.to_vec())
    }

    /// Verifies `signature` over `data` with this key.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        use rsa::signature::Verifier;

        match self {
            PublicKey::Rsa(key) => {
                let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone());
                let signature = rsa::pkcs1v15::Signature::try_from(signature)?;
                verifying_key.verify(data, &signature)?;
            }
            PublicKey::EcdsaP256(key) => {
                let signature = p256::ecdsa::Signature::from_der(signature)?;
                key.verify(data, &signature)?;
            }
            PublicKey::EcdsaP384(key) => {
                let signature = p384::ecdsa::Signature::from_der(signature)?;
                key.verify(data, &signature)?;
            }
            PublicKey::Ed25519(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)?;
                key.verify(data, &signature)?;
            }
        }
        Ok(())
    }
}
