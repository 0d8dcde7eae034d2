/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate, computed over the
//!    [Borsh](borsh) serialization of the hashed value.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.

use borsh::BorshSerialize;
use rand_core::OsRng;
use thiserror::Error;

use super::{
    base64url,
    basic::{Address, CryptoHash, SignatureBytes},
};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as getters for the [`public`](Self::public) key and the [`address`](Self::address) derived from it.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Generate a fresh `Keypair` from the operating system's randomness source.
    pub fn generate() -> Keypair {
        Keypair(SigningKey::generate(&mut OsRng))
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    pub fn address(&self) -> Address {
        address_of(&self.public())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.0
    }
}

/// The [`Address`] that identifies the holder of `verifying_key`.
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    Address::new(base64url::encode(verifying_key.to_bytes()))
}

/// Reasons a signature fails to check out against an [`Address`].
#[derive(Debug, Error)]
pub enum SignatureCheckError {
    #[error("address {0} is not valid base64url")]
    MalformedAddress(Address),
    #[error("address {0} does not encode an ed25519 verifying key")]
    NotAVerifyingKey(Address),
    #[error("signature does not verify against {0}")]
    Mismatch(Address),
}

/// Recover the verifying key encoded in `address`.
pub fn verifying_key_of(address: &Address) -> Result<VerifyingKey, SignatureCheckError> {
    let bytes = base64url::decode(address.as_str())
        .map_err(|_| SignatureCheckError::MalformedAddress(address.clone()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SignatureCheckError::NotAVerifyingKey(address.clone()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| SignatureCheckError::NotAVerifyingKey(address.clone()))
}

/// Verify that `signature` was created by the holder of `address` over `message`.
pub fn verify_signature(
    message: &[u8],
    address: &Address,
    signature: &SignatureBytes,
) -> Result<(), SignatureCheckError> {
    let verifying_key = verifying_key_of(address)?;
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key
        .verify(message, &signature)
        .map_err(|_| SignatureCheckError::Mismatch(address.clone()))
}

/// SHA-256 over the Borsh serialization of `value`.
pub fn hash_of<T: BorshSerialize>(value: &T) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    // Safety: serializing into an in-memory buffer never returns an io error.
    hasher.update(&value.try_to_vec().unwrap());
    CryptoHash::new(hasher.finalize().into())
}
