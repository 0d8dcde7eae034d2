/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-round ballot broadcast by each validator.

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};

use super::{
    basic::{Address, BlockHeight, CryptoHash, Round, SignatureBytes},
    crypto_primitives::{hash_of, Keypair},
    signed_messages::SignedMessage,
};

/// A validator's endorsement, for round `round` at height `block_number`, of the executed hashes
/// listed in `messages`.
///
/// `hash` covers every other field except the signature, and `signature` is over `hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub sender_address: Address,
    pub block_number: BlockHeight,
    pub round: Round,
    pub messages: Vec<CryptoHash>,
    pub hash: CryptoHash,
    pub signature: SignatureBytes,
}

#[derive(BorshSerialize)]
struct ConsensusMessageContent {
    sender_address: String,
    block_number: u64,
    round: u8,
    messages: Vec<[u8; 32]>,
}

impl ConsensusMessage {
    pub fn new(
        keypair: &Keypair,
        block_number: BlockHeight,
        round: Round,
        messages: Vec<CryptoHash>,
    ) -> ConsensusMessage {
        let sender_address = keypair.address();
        let hash = ConsensusMessage::hash(&sender_address, block_number, round, &messages);
        let signature = keypair.sign(&hash.bytes());
        ConsensusMessage {
            sender_address,
            block_number,
            round,
            messages,
            hash,
            signature,
        }
    }

    pub fn hash(
        sender_address: &Address,
        block_number: BlockHeight,
        round: Round,
        messages: &[CryptoHash],
    ) -> CryptoHash {
        hash_of(&ConsensusMessageContent {
            sender_address: sender_address.to_string(),
            block_number: block_number.int(),
            round: round.int(),
            messages: messages.iter().map(CryptoHash::bytes).collect(),
        })
    }

    /// Whether `hash` is the hash of this message's content.
    pub fn is_hash_correct(&self) -> bool {
        self.hash
            == ConsensusMessage::hash(
                &self.sender_address,
                self.block_number,
                self.round,
                &self.messages,
            )
    }
}

impl SignedMessage for ConsensusMessage {
    fn message_bytes(&self) -> Vec<u8> {
        self.hash.bytes().to_vec()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn signer(&self) -> &Address {
        &self.sender_address
    }
}
