//! Ed25519 identities and signatures over content hashes.
//!
//! Keys and signatures serialize as hex strings for human-readable formats
//! (JSON, TOML) and as raw bytes otherwise.

use crate::hash::Hash;
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Length of a raw Ed25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Length of a raw Ed25519 signature.
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature length: {0}")]
    InvalidSignatureLength(usize),
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// An Ed25519 signature. The all-zero value stands for "not signed yet".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Exactly 64 bytes, or an error.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| CryptoError::InvalidSignatureLength(bytes.len()))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// True for the unsigned placeholder.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_SIZE])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_hex())
        } else {
            s.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes = if d.is_human_readable() {
            hex::decode(String::deserialize(d)?).map_err(de::Error::custom)?
        } else {
            Vec::<u8>::deserialize(d)?
        };
        Self::from_slice(&bytes).map_err(de::Error::custom)
    }
}

/// Identifies a transaction sender or recipient, or a block origin.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(pub VerifyingKey);

impl PublicKey {
    /// Parse the 32 raw bytes of a key. Not every byte string is a curve point.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = hex::decode(s)?
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Whether `signature` was made by this key over `hash`.
    pub fn verify_hash(&self, hash: &Hash, signature: &Signature) -> bool {
        let signature = DalekSignature::from_bytes(&signature.0);
        self.0.verify(hash.as_bytes(), &signature).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_hex())
        } else {
            self.as_bytes().serialize(s)
        }
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            Self::from_hex(&String::deserialize(d)?).map_err(de::Error::custom)
        } else {
            Self::from_bytes(&<[u8; PUBLIC_KEY_SIZE]>::deserialize(d)?).map_err(de::Error::custom)
        }
    }
}

/// A signing key together with its public half.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    pub public_key: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Rebuild a keypair from its 32-byte secret seed.
    pub fn from_secret_bytes(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = PublicKey(signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn sign_hash(&self, hash: &Hash) -> Signature {
        Signature(self.signing_key.sign(hash.as_bytes()).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the secret half.
        f.debug_tuple("Keypair").field(&self.public_key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash;

    #[test]
    fn test_signature_over_hash() {
        let kp = Keypair::generate();
        let digest = hash(b"payload");
        let sig = kp.sign_hash(&digest);

        assert!(kp.public_key.verify_hash(&digest, &sig));
        assert!(!kp.public_key.verify_hash(&hash(b"other"), &sig));
        assert!(!Keypair::generate().public_key.verify_hash(&digest, &sig));
        assert!(!kp.public_key.verify_hash(&digest, &Signature::default()));
    }

    #[test]
    fn test_secret_bytes_restore_identity() {
        let kp = Keypair::generate();
        let restored = Keypair::from_secret_bytes(&kp.secret_bytes());
        assert_eq!(restored.public_key, kp.public_key);

        let digest = hash(b"same");
        assert_eq!(restored.sign_hash(&digest), kp.sign_hash(&digest));
    }

    #[test]
    fn test_public_key_parsing() {
        let kp = Keypair::generate();
        assert_eq!(PublicKey::from_bytes(&kp.public_key.as_bytes()).unwrap(), kp.public_key);
        assert_eq!(PublicKey::from_hex(&kp.public_key.to_hex()).unwrap(), kp.public_key);
        assert!(PublicKey::from_hex("abcd").is_err());
        assert!(matches!(PublicKey::from_hex("zz"), Err(CryptoError::InvalidHex(_))));
    }

    #[test]
    fn test_signature_from_slice() {
        let sig = Keypair::generate().sign_hash(&hash(b"x"));
        assert_eq!(Signature::from_slice(sig.as_bytes()).unwrap(), sig);
        assert!(matches!(
            Signature::from_slice(&[1u8; 10]),
            Err(CryptoError::InvalidSignatureLength(10))
        ));
    }

    #[test]
    fn test_default_signature_is_empty() {
        assert!(Signature::default().is_empty());
        assert!(!Keypair::generate().sign_hash(&Hash::ZERO).is_empty());
    }

    #[test]
    fn test_json_uses_hex() {
        let kp = Keypair::generate();
        let sig = kp.sign_hash(&hash(b"json"));

        let json = serde_json::to_string(&(kp.public_key.clone(), sig)).unwrap();
        assert!(json.contains(&kp.public_key.to_hex()));
        assert!(json.contains(&sig.to_hex()));

        let (pk, parsed): (PublicKey, Signature) = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, kp.public_key);
        assert_eq!(parsed, sig);
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = Keypair::generate();
        let shown = format!("{kp:?}");
        assert!(!shown.contains(&hex::encode(kp.secret_bytes())));
    }
}
