/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signed messages.

use super::{
    basic::{Address, SignatureBytes},
    crypto_primitives::{verify_signature, SignatureCheckError},
};

/// Data types that contain: 1. A message, and 2. A digital signature over said message whose
/// correctness can be verified against the [`Address`] of its signer.
pub trait SignedMessage {
    /// Get the bytes that are passed as input into the signing function to form the signature
    /// of the `SignedMessage`.
    fn message_bytes(&self) -> Vec<u8>;

    /// Get the signature of the `SignedMessage`.
    fn signature_bytes(&self) -> SignatureBytes;

    /// Get the address that claims to have produced the signature.
    fn signer(&self) -> &Address;

    /// Verify that `signature_bytes` is a signature created by `signer` over `message_bytes`.
    fn verify(&self) -> Result<(), SignatureCheckError> {
        verify_signature(&self.message_bytes(), self.signer(), &self.signature_bytes())
    }

    fn is_correct(&self) -> bool {
        self.verify().is_ok()
    }
}
