/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Admission checks for everything that arrives from peers or clients.
//!
//! Nothing is stored or acted on before it passes the matching check here. Checks are pure: they look
//! only at the message and the [`ValidatorSet`], never at storage.

use std::collections::HashSet;

use thiserror::Error;

use crate::types::{
    basic::{Address, CryptoHash},
    block::BlockConsensusMessage,
    consensus::ConsensusMessage,
    crypto_primitives::SignatureCheckError,
    signed_messages::SignedMessage,
    transaction::{TransactionMessage, Tx},
    validators::ValidatorSet,
};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{kind} is missing `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("{kind} hash mismatch: carried {carried}, computed {computed}")]
    HashMismatch {
        kind: &'static str,
        carried: CryptoHash,
        computed: CryptoHash,
    },
    #[error("{kind} round {round} is outside the votable rounds")]
    RoundOutOfRange { kind: &'static str, round: u8 },
    #[error("bad {kind} signature: {source}")]
    BadSignature {
        kind: &'static str,
        source: SignatureCheckError,
    },
    #[error("{0} is not a trusted validator")]
    UntrustedSender(Address),
    #[error("block claims {carried} votes but carries {distinct} distinct signers in {signatures} signatures")]
    VoteCountMismatch {
        carried: u64,
        distinct: usize,
        signatures: usize,
    },
}

const CONSENSUS: &str = "consensus message";
const TRANSACTION: &str = "transaction";
const BLOCK: &str = "block";
const BLOCK_VOTE: &str = "block vote";

/// Checks messages against the trusted validator set.
#[derive(Clone, Debug)]
pub struct MessageValidator {
    validator_set: ValidatorSet,
}

impl MessageValidator {
    pub fn new(validator_set: ValidatorSet) -> MessageValidator {
        MessageValidator { validator_set }
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    /// Completeness, hash and signature checks on a round ballot. Whether the sender is trusted is
    /// decided when the ballot is tallied.
    pub fn validate_consensus(&self, message: &ConsensusMessage) -> Result<(), ValidationError> {
        require(!message.sender_address.is_empty(), CONSENSUS, "sender_address")?;
        require(message.block_number.int() >= 1, CONSENSUS, "block_number")?;
        if !message.round.is_votable() {
            return Err(ValidationError::RoundOutOfRange {
                kind: CONSENSUS,
                round: message.round.int(),
            });
        }
        if !message.is_hash_correct() {
            return Err(ValidationError::HashMismatch {
                kind: CONSENSUS,
                carried: message.hash,
                computed: ConsensusMessage::hash(
                    &message.sender_address,
                    message.block_number,
                    message.round,
                    &message.messages,
                ),
            });
        }
        message
            .verify()
            .map_err(|source| ValidationError::BadSignature {
                kind: CONSENSUS,
                source,
            })
    }

    /// Hash and signature checks on a client transaction.
    pub fn validate_tx(&self, tx: &Tx) -> Result<(), ValidationError> {
        require(!tx.sender_address.is_empty(), TRANSACTION, "sender_address")?;
        let computed = Tx::hash(&tx.sender_address, &tx.payload);
        if computed != tx.message_hash {
            return Err(ValidationError::HashMismatch {
                kind: TRANSACTION,
                carried: tx.message_hash,
                computed,
            });
        }
        tx.verify().map_err(|source| ValidationError::BadSignature {
            kind: TRANSACTION,
            source,
        })
    }

    /// [`validate_tx`](Self::validate_tx), plus agreement between the record and its transaction.
    pub fn validate_transaction(&self, message: &TransactionMessage) -> Result<(), ValidationError> {
        if message.message_hash != message.tx.message_hash {
            return Err(ValidationError::HashMismatch {
                kind: TRANSACTION,
                carried: message.message_hash,
                computed: message.tx.message_hash,
            });
        }
        self.validate_tx(&message.tx)
    }

    /// Hash, proposer and vote checks on a block consensus message. Every carried vote must be a
    /// valid signature over the block hash by a distinct trusted validator, and the vote count must
    /// match them.
    pub fn validate_block_consensus(&self, message: &BlockConsensusMessage) -> Result<(), ValidationError> {
        let block = &message.block;
        require(block.number.int() >= 1, BLOCK, "number")?;
        require(!block.sender_address.is_empty(), BLOCK, "sender_address")?;
        if message.block_hash != block.block_hash {
            return Err(ValidationError::HashMismatch {
                kind: BLOCK,
                carried: message.block_hash,
                computed: block.block_hash,
            });
        }
        if !block.is_hash_correct() {
            return Err(ValidationError::HashMismatch {
                kind: BLOCK,
                carried: block.block_hash,
                computed: crate::types::block::Block::hash(
                    block.number,
                    &block.previous_block_hash,
                    &block.messages,
                ),
            });
        }
        block.verify().map_err(|source| ValidationError::BadSignature { kind: BLOCK, source })?;
        if !self.validator_set.is_trusted(&block.sender_address) {
            return Err(ValidationError::UntrustedSender(block.sender_address.clone()));
        }
        let distinct: HashSet<&Address> = message.signatures.iter().map(|vote| &vote.signer).collect();
        if distinct.len() != message.signatures.len() || distinct.len() as u64 != message.votes {
            return Err(ValidationError::VoteCountMismatch {
                carried: message.votes,
                distinct: distinct.len(),
                signatures: message.signatures.len(),
            });
        }
        for vote in &message.signatures {
            if !self.validator_set.is_trusted(&vote.signer) {
                return Err(ValidationError::UntrustedSender(vote.signer.clone()));
            }
            vote.verify(&message.block_hash)
                .map_err(|source| ValidationError::BadSignature {
                    kind: BLOCK_VOTE,
                    source,
                })?;
        }
        Ok(())
    }
}

fn require(present: bool, kind: &'static str, field: &'static str) -> Result<(), ValidationError> {
    if present {
        Ok(())
    } else {
        Err(ValidationError::MissingField { kind, field })
    }
}
