use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Result, TollError};

pub const SIGNATURE_LEN: usize = 64;
pub const SECRET_KEY_LEN: usize = 32;

/// Capability to request a signature from an identity.
///
/// The core never handles raw key material beyond this trait.
pub trait Signer {
    fn address(&self) -> Address;
    fn sign(&self, message: &[u8]) -> Signature;
}

/// Detached ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_hex")] [u8; SIGNATURE_LEN]);

impl Signature {
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

/// Local ed25519 identity.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: [u8; SECRET_KEY_LEN]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&bytes),
        }
    }

    /// Parse a 64 hex character secret.
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret.trim())
            .map_err(|e| TollError::Codec(format!("secret key hex: {e}")))?;
        let bytes: [u8; SECRET_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| TollError::Codec("secret key must be 32 bytes (64 hex chars)".into()))?;
        Ok(Self::from_secret_bytes(bytes))
    }

    pub fn secret_hex(&self) -> SecretHex {
        SecretHex(hex::encode(self.signing.to_bytes()))
    }
}

impl Signer for Keypair {
    fn address(&self) -> Address {
        Address::new(self.signing.verifying_key().to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Strict ed25519 verification against the signer's address.
pub fn verify(signer: &Address, message: &[u8], signature: &Signature) -> Result<()> {
    let invalid = || TollError::InvalidSignature { signer: *signer };
    let key = VerifyingKey::from_bytes(&signer.to_bytes()).map_err(|_| invalid())?;
    let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
    key.verify_strict(message, &signature).map_err(|_| invalid())
}

/// Hex secret that does not leak through `Debug`.
pub struct SecretHex(String);

impl SecretHex {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretHex(..)")
    }
}

pub(crate) mod serde_hex {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(value: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| D::Error::custom(format!("expected {N} bytes, got {}", b.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_verify_against_the_signer_address() {
        let keypair = Keypair::generate();
        let sig = keypair.sign(b"collect");
        verify(&keypair.address(), b"collect", &sig).unwrap();

        let err = verify(&keypair.address(), b"claim", &sig).unwrap_err();
        assert!(matches!(err, TollError::InvalidSignature { .. }));

        let other = Keypair::generate();
        assert!(verify(&other.address(), b"collect", &sig).is_err());
    }

    #[test]
    fn secret_hex_restores_the_same_identity() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_secret_hex(keypair.secret_hex().expose()).unwrap();
        assert_eq!(restored.address(), keypair.address());
        assert!(Keypair::from_secret_hex("abcd").is_err());
        assert_eq!(format!("{:?}", keypair.secret_hex()), "SecretHex(..)");
    }

    #[test]
    fn keypair_addresses_are_on_curve() {
        assert!(Keypair::generate().address().is_on_curve());
    }
}
