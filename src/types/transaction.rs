/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Client transactions, and the per-node bookkeeping record kept for each of them in the message pool.

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};

use super::{
    basic::{Address, BlockHeight, CryptoHash, Round, SignatureBytes, MAX_ROUND},
    crypto_primitives::{hash_of, Keypair},
    signed_messages::SignedMessage,
};

/// Number of per-round vote slots on a [`TransactionMessage`].
pub const VOTE_SLOTS: usize = MAX_ROUND as usize + 1;

/// A client-submitted transaction: an opaque payload signed by its sender.
///
/// `message_hash` commits to the sender and payload, and the signature is over `message_hash`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, Serialize, Deserialize)]
pub struct Tx {
    pub sender_address: Address,
    #[serde(with = "crate::types::base64url")]
    pub payload: Vec<u8>,
    pub sender_signature: SignatureBytes,
    pub message_hash: CryptoHash,
}

impl Tx {
    /// Create a transaction carrying `payload`, signed by `keypair`.
    pub fn new_signed(keypair: &Keypair, payload: Vec<u8>) -> Tx {
        let sender_address = keypair.address();
        let message_hash = Tx::hash(&sender_address, &payload);
        let sender_signature = keypair.sign(&message_hash.bytes());
        Tx {
            sender_address,
            payload,
            sender_signature,
            message_hash,
        }
    }

    pub fn hash(sender_address: &Address, payload: &[u8]) -> CryptoHash {
        hash_of(&(sender_address.clone(), payload.to_vec()))
    }
}

impl SignedMessage for Tx {
    fn message_bytes(&self) -> Vec<u8> {
        self.message_hash.bytes().to_vec()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.sender_signature
    }

    fn signer(&self) -> &Address {
        &self.sender_address
    }
}

/// The pool record for a [`Tx`]: its execution outcome, per-round vote counters and the block that
/// eventually includes it.
///
/// `voters[r]` lists the validators whose round-`r` consensus message has been counted in
/// `votes[r]`, which keeps replayed consensus messages from counting twice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMessage {
    pub message_hash: CryptoHash,
    pub tx: Tx,
    pub votes: [u32; VOTE_SLOTS],
    pub voters: [Vec<Address>; VOTE_SLOTS],
    pub executed: bool,
    pub result: bool,
    pub response: Option<String>,
    pub executed_hash: Option<CryptoHash>,
    pub block_hash: Option<CryptoHash>,
    pub block_number: Option<BlockHeight>,
}

impl TransactionMessage {
    /// A fresh, unexecuted and unvoted record for `tx`.
    pub fn new(tx: Tx) -> TransactionMessage {
        TransactionMessage {
            message_hash: tx.message_hash,
            tx,
            votes: [0; VOTE_SLOTS],
            voters: Default::default(),
            executed: false,
            result: false,
            response: None,
            executed_hash: None,
            block_hash: None,
            block_number: None,
        }
    }

    pub fn votes_in(&self, round: Round) -> u32 {
        self.votes.get(round.slot()).copied().unwrap_or(0)
    }

    /// Hash over the transaction together with its execution outcome. Two validators that executed
    /// the same transaction to the same outcome compute the same executed hash.
    pub fn compute_executed_hash(&self) -> CryptoHash {
        hash_of(&(
            self.message_hash,
            self.executed,
            self.result,
            self.response.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_tx_verifies_and_tampering_breaks_it() {
        let keypair = Keypair::generate();
        let mut tx = Tx::new_signed(&keypair, b"transfer 5".to_vec());
        assert!(tx.is_correct());
        assert_eq!(tx.message_hash, Tx::hash(&tx.sender_address, &tx.payload));

        tx.sender_signature = Keypair::generate().sign(&tx.message_hash.bytes());
        assert!(!tx.is_correct());
    }

    #[test]
    fn executed_hash_agrees_across_identical_outcomes() {
        let tx = Tx::new_signed(&Keypair::generate(), b"x".to_vec());
        let mut a = TransactionMessage::new(tx.clone());
        let mut b = TransactionMessage::new(tx);
        for record in [&mut a, &mut b] {
            record.executed = true;
            record.result = true;
            record.response = Some("ok".to_string());
        }
        b.votes[3] = 2;
        assert_eq!(a.compute_executed_hash(), b.compute_executed_hash());

        b.result = false;
        assert_ne!(a.compute_executed_hash(), b.compute_executed_hash());
    }
}
