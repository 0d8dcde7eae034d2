/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Block`] type and for the [`BlockConsensusMessage`] that carries a block
//! together with the votes collected for it.

use std::collections::BTreeMap;

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};

use super::{
    basic::{Address, BlockHeight, CryptoHash, SignatureBytes},
    crypto_primitives::{hash_of, verify_signature, Keypair, SignatureCheckError},
    signed_messages::SignedMessage,
    transaction::Tx,
};

/// A batch of transactions at a given height, linked to its predecessor by hash.
///
/// The block hash covers the height, the previous block hash and the included transactions, but not
/// the proposer. Validators that select the same transactions on top of the same predecessor
/// therefore propose the same block hash, and their votes accumulate on one candidate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: BlockHeight,
    pub previous_block_hash: Option<CryptoHash>,
    pub sender_address: Address,
    pub sender_signature: SignatureBytes,
    pub block_hash: CryptoHash,
    pub messages: BTreeMap<CryptoHash, Tx>,
}

impl Block {
    /// Create a block and sign its hash with `keypair`.
    pub fn new(
        keypair: &Keypair,
        number: BlockHeight,
        previous_block_hash: Option<CryptoHash>,
        messages: BTreeMap<CryptoHash, Tx>,
    ) -> Block {
        let block_hash = Block::hash(number, &previous_block_hash, &messages);
        Block {
            number,
            previous_block_hash,
            sender_address: keypair.address(),
            sender_signature: keypair.sign(&block_hash.bytes()),
            block_hash,
            messages,
        }
    }

    /// The genesis block: height 1, no predecessor, no transactions.
    pub fn genesis(keypair: &Keypair) -> Block {
        Block::new(keypair, BlockHeight::new(1), None, BTreeMap::new())
    }

    pub fn hash(
        number: BlockHeight,
        previous_block_hash: &Option<CryptoHash>,
        messages: &BTreeMap<CryptoHash, Tx>,
    ) -> CryptoHash {
        hash_of(&(number, *previous_block_hash, messages.clone()))
    }

    /// Whether `block_hash` is the hash of this block's content.
    pub fn is_hash_correct(&self) -> bool {
        self.block_hash == Block::hash(self.number, &self.previous_block_hash, &self.messages)
    }
}

impl SignedMessage for Block {
    fn message_bytes(&self) -> Vec<u8> {
        self.block_hash.bytes().to_vec()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.sender_signature
    }

    fn signer(&self) -> &Address {
        &self.sender_address
    }
}

/// One validator's signature over a block hash.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, Serialize, Deserialize)]
pub struct VoteSignature {
    pub signer: Address,
    pub signature: SignatureBytes,
}

impl VoteSignature {
    pub fn new(keypair: &Keypair, block_hash: &CryptoHash) -> VoteSignature {
        VoteSignature {
            signer: keypair.address(),
            signature: keypair.sign(&block_hash.bytes()),
        }
    }

    pub fn verify(&self, block_hash: &CryptoHash) -> Result<(), SignatureCheckError> {
        verify_signature(&block_hash.bytes(), &self.signer, &self.signature)
    }
}

/// A block together with the number of votes it has gathered and the signatures behind them.
///
/// The same shape is used for committed blocks, pending candidates, and on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConsensusMessage {
    pub block_hash: CryptoHash,
    pub votes: u64,
    pub block: Block,
    #[serde(rename = "voted_signatures")]
    pub signatures: Vec<VoteSignature>,
}

impl BlockConsensusMessage {
    /// Wrap a freshly proposed block, counting the proposer's own vote.
    pub fn new(block: Block) -> BlockConsensusMessage {
        let proposer_vote = VoteSignature {
            signer: block.sender_address.clone(),
            signature: block.sender_signature,
        };
        BlockConsensusMessage {
            block_hash: block.block_hash,
            votes: 1,
            block,
            signatures: vec![proposer_vote],
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.block.number
    }

    pub fn has_vote_from(&self, signer: &Address) -> bool {
        self.signatures.iter().any(|vote| &vote.signer == signer)
    }

    /// Count `vote` if its signer has not voted yet. Returns whether the vote was counted.
    pub fn add_vote(&mut self, vote: VoteSignature) -> bool {
        if self.has_vote_from(&vote.signer) {
            return false;
        }
        self.signatures.push(vote);
        self.votes += 1;
        true
    }

    /// Count every vote in `other` whose signer has not voted yet. Returns whether anything changed.
    pub fn merge_votes(&mut self, other: &BlockConsensusMessage) -> bool {
        other
            .signatures
            .iter()
            .fold(false, |changed, vote| self.add_vote(vote.clone()) || changed)
    }
}
