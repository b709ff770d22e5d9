//! Key generation, parsing, and PEM encoding
//!
//! 🔑 `rcgen`'s `KeyPair::generate_for` covers ECDSA/Ed25519 natively, but
//! `ring` (the crypto backend behind it) has no RSA key generation, so RSA
//! algorithms are generated with the `rsa` crate and handed to `rcgen` as a
//! PKCS#8 PEM via `KeyPair::from_pem`, which parses any supported algorithm
//! generically. Every downstream consumer (CSR building, PEM persistence)
//! therefore only ever deals in `rcgen::KeyPair` plus PEM bytes.

use rand::rngs::OsRng;
use rcgen::KeyPair;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("unsupported key algorithm: {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("failed to generate key: {0}")]
    Generation(String),

    #[error("failed to parse key PEM: {0}")]
    Parse(String),
}

/// Algorithms `KeyService::generate` recognizes (spec §4.3). Empty string
/// selects `Rsa4096`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa2048,
    Rsa3072,
    Rsa4096,
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl KeyAlgorithm {
    pub fn parse(name: &str) -> Result<Self, KeyError> {
        match name {
            "" | "rsa4096" => Ok(Self::Rsa4096),
            "rsa2048" => Ok(Self::Rsa2048),
            "rsa3072" => Ok(Self::Rsa3072),
            "ecdsa256" => Ok(Self::EcdsaP256),
            "ecdsa384" => Ok(Self::EcdsaP384),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// A generated or parsed private key, carried as PKCS#8 PEM.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    pub pem: String,
}

impl PrivateKey {
    /// Builds the `rcgen::KeyPair` needed for CSR construction. Works
    /// uniformly for RSA-via-the-`rsa`-crate and rcgen-native keys, since
    /// both are handed over as PKCS#8 PEM.
    pub fn to_key_pair(&self) -> Result<KeyPair, KeyError> {
        KeyPair::from_pem(&self.pem).map_err(|e| KeyError::Parse(e.to_string()))
    }

    /// Public-key DER, used for round-trip/equality checks.
    pub fn public_key_der(&self) -> Result<Vec<u8>, KeyError> {
        Ok(self.to_key_pair()?.public_key_der())
    }
}

/// Generates, parses, and encodes asymmetric keys.
pub struct KeyService;

impl KeyService {
    /// `algorithm` is one of the `KeyAlgorithm` names in spec §4.3; empty
    /// string selects `rsa4096`.
    pub fn generate(algorithm: &str) -> Result<PrivateKey, KeyError> {
        let algorithm = KeyAlgorithm::parse(algorithm)?;
        let pem = match algorithm {
            KeyAlgorithm::Rsa2048 => Self::generate_rsa_pem(2048)?,
            KeyAlgorithm::Rsa3072 => Self::generate_rsa_pem(3072)?,
            KeyAlgorithm::Rsa4096 => Self::generate_rsa_pem(4096)?,
            KeyAlgorithm::EcdsaP256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
                .map_err(|e| KeyError::Generation(e.to_string()))?
                .serialize_pem(),
            KeyAlgorithm::EcdsaP384 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
                .map_err(|e| KeyError::Generation(e.to_string()))?
                .serialize_pem(),
            KeyAlgorithm::Ed25519 => KeyPair::generate_for(&rcgen::PKCS_ED25519)
                .map_err(|e| KeyError::Generation(e.to_string()))?
                .serialize_pem(),
        };
        Ok(PrivateKey { pem })
    }

    fn generate_rsa_pem(bits: usize) -> Result<String, KeyError> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        key.to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| KeyError::Generation(e.to_string()))
    }

    /// Fails on malformed PEM or an algorithm `rcgen` cannot parse.
    pub fn parse_pem(bytes: &[u8]) -> Result<PrivateKey, KeyError> {
        let pem = std::str::from_utf8(bytes).map_err(|e| KeyError::Parse(e.to_string()))?;
        // Validate it parses before accepting it.
        KeyPair::from_pem(pem).map_err(|e| KeyError::Parse(e.to_string()))?;
        Ok(PrivateKey { pem: pem.to_string() })
    }

    pub fn encode_pem(key: &PrivateKey) -> Vec<u8> {
        key.pem.clone().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_algorithm_is_rsa4096() {
        assert_eq!(KeyAlgorithm::parse("").unwrap(), KeyAlgorithm::Rsa4096);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(KeyAlgorithm::parse("whatever").is_err());
    }

    #[test]
    fn round_trip_ed25519() {
        let key = KeyService::generate("ed25519").unwrap();
        let pem = KeyService::encode_pem(&key);
        let parsed = KeyService::parse_pem(&pem).unwrap();
        assert_eq!(key.public_key_der().unwrap(), parsed.public_key_der().unwrap());
    }

    #[test]
    fn round_trip_ecdsa_p256() {
        let key = KeyService::generate("ecdsa256").unwrap();
        let pem = KeyService::encode_pem(&key);
        let parsed = KeyService::parse_pem(&pem).unwrap();
        assert_eq!(key.public_key_der().unwrap(), parsed.public_key_der().unwrap());
    }

    #[test]
    fn round_trip_rsa_2048() {
        let key = KeyService::generate("rsa2048").unwrap();
        let pem = KeyService::encode_pem(&key);
        let parsed = KeyService::parse_pem(&pem).unwrap();
        assert_eq!(key.public_key_der().unwrap(), parsed.public_key_der().unwrap());
    }

    #[test]
    fn parse_pem_rejects_garbage() {
        assert!(KeyService::parse_pem(b"not a key").is_err());
    }
}
