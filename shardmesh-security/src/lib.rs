//! Cryptographic identity and signing context shared by the consensus engine
//! and the peer transport.
//!
//! Every node generates an Ed25519 keypair at startup. The consensus engine
//! signs `RequestVote`/`AppendEntries` proposals with it; the transport layer
//! uses the same key material to derive its wire identity. Keeping both
//! concerns behind one small crate avoids duplicating key-management code at
//! two different layers.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("malformed key material: {0}")]
    MalformedKey(String),
}

/// A node's signing identity. Not `Clone` on purpose: the secret key should
/// have exactly one owner (the node runtime), which hands out a
/// [`VerifyingContext`] to anything that only needs to verify.
pub struct SigningContext {
    signing_key: SigningKey,
}

impl SigningContext {
    /// Generates a fresh keypair. Called once per node at startup.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> SignedMessage {
        let signature = self.signing_key.sign(message);
        SignedMessage {
            signer: self.public_key(),
            signature: signature.to_bytes().to_vec(),
        }
    }

    pub fn verifying_context(&self) -> VerifyingContext {
        VerifyingContext
    }
}

/// Stateless verifier. Anything holding a signed message and the claimed
/// signer's public key can verify without needing its own key material.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyingContext;

impl VerifyingContext {
    pub fn verify(&self, message: &[u8], signed: &SignedMessage) -> Result<(), SecurityError> {
        let signature = Signature::from_slice(&signed.signature)
            .map_err(|e| SecurityError::MalformedKey(e.to_string()))?;
        signed
            .signer
            .0
            .verify(message, &signature)
            .map_err(|_| SecurityError::InvalidSignature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SecurityError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| SecurityError::MalformedKey(e.to_string()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        PublicKey::from_bytes(&arr).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", blake3::hash(&self.to_bytes()).to_hex())
    }
}

/// A payload bundled with the signature over it and the claimed signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMessage {
    pub signer: PublicKey,
    pub signature: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let ctx = SigningContext::generate();
        let signed = ctx.sign(b"append-entries-term-7");
        assert!(ctx
            .verifying_context()
            .verify(b"append-entries-term-7", &signed)
            .is_ok());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let ctx = SigningContext::generate();
        let signed = ctx.sign(b"vote-grant");
        assert!(ctx
            .verifying_context()
            .verify(b"vote-deny", &signed)
            .is_err());
    }

    #[test]
    fn public_key_roundtrips_through_bytes() {
        let ctx = SigningContext::generate();
        let pk = ctx.public_key();
        let restored = PublicKey::from_bytes(&pk.to_bytes()).unwrap();
        assert_eq!(pk, restored);
    }
}
