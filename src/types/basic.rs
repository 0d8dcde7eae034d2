/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types that are sent around and inspected, but have no active behavior.
//!
//! Every type here follows the newtype pattern. Hashes serialize as lowercase hex strings and
//! signatures as unpadded Base64URL strings, so that documents read back from storage or from the
//! wire compare equal to the ones that were written.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, Sub},
};

use borsh::BorshSerialize;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::base64url;

/// Number of vote slots kept per transaction: round 0 (local execution) plus rounds 1 to 6.
pub const MAX_ROUND: u8 = 7;

/// A SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(string: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(string, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoHash({})", self.to_hex())
    }
}

impl Serialize for CryptoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CryptoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        CryptoHash::from_hex(&string).map_err(de::Error::custom)
    }
}

/// Height of a block in the blockchain. The genesis block has height 1; an empty chain has tip 0.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct BlockHeight(u64);

impl BlockHeight {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0.saturating_add(rhs))
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u64;
    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// Index of a voting round within one block height, in `0..MAX_ROUND`.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Round(u8);

impl Round {
    pub const fn new(int: u8) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u8 {
        self.0
    }

    /// The round after this one, saturating at `MAX_ROUND`.
    pub const fn next(&self) -> Round {
        if self.0 >= MAX_ROUND {
            Round(MAX_ROUND)
        } else {
            Round(self.0 + 1)
        }
    }

    /// The last round that broadcasts nothing after tallying.
    pub const fn is_last(&self) -> bool {
        self.0 + 1 >= MAX_ROUND
    }

    /// Whether a peer is allowed to publish a consensus message for this round.
    pub const fn is_votable(&self) -> bool {
        self.0 >= 1 && self.0 < MAX_ROUND
    }

    /// Slot of this round in a transaction's per-round vote counters.
    pub const fn slot(&self) -> usize {
        self.0 as usize
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// An Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({})", base64url::encode(self.0))
    }
}

impl Serialize for SignatureBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64url::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        let bytes = base64url::decode(&string).map_err(de::Error::custom)?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("signature must be 64 bytes long"))?;
        Ok(SignatureBytes(bytes))
    }
}

/// Identity of a validator: the unpadded Base64URL encoding of its Ed25519 verifying key.
#[derive(
    Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, BorshSerialize, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(string: impl Into<String>) -> Self {
        Self(string.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-level identity of a connected peer, as understood by the network provider.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(string: impl Into<String>) -> Self {
        Self(string.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
