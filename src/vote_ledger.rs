/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-transaction, per-round vote bookkeeping over the message pool.
//!
//! A transaction is endorsed again in every round as consensus converges, so votes are counted per
//! round: `votes[r]` only ever holds round-`r` endorsements, and stale round-1 votes cannot inflate a
//! round-6 decision. Each increment is a single conditional update that also records the voter in
//! `voters[r]`, so a replayed consensus message never counts twice.

use serde_json::Value;
use thiserror::Error;

use crate::{
    storage::{ChainStore, DocumentStore, Filter, StorageError, Update},
    types::{
        basic::{Address, CryptoHash, Round},
        block::Block,
        transaction::{TransactionMessage, VOTE_SLOTS},
        validators::ValidatorSet,
    },
    validation::{MessageValidator, ValidationError},
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("transaction rejected: {0}")]
    Rejected(#[from] ValidationError),
}

pub struct VoteLedger<S: DocumentStore> {
    store: ChainStore<S>,
    validator: MessageValidator,
    me: Address,
}

impl<S: DocumentStore> VoteLedger<S> {
    pub fn new(store: ChainStore<S>, validator_set: ValidatorSet, me: Address) -> VoteLedger<S> {
        VoteLedger {
            store,
            validator: MessageValidator::new(validator_set),
            me,
        }
    }

    /// Pool records with no round-0 vote that are not yet part of any block.
    pub fn zero_vote_candidates(&self) -> Result<Vec<TransactionMessage>, LedgerError> {
        let filter = Filter::all().eq("votes.0", 0).missing("block_hash");
        Ok(self.store.transactions(&filter)?)
    }

    /// Re-check `message`, run it, and cast this node's round-0 vote for it.
    ///
    /// Execution is a deterministic stub: every well-formed transaction succeeds and its response
    /// names the transaction. The returned record carries the executed hash that identifies the
    /// transaction in later rounds.
    pub fn execute(&mut self, mut message: TransactionMessage) -> Result<TransactionMessage, LedgerError> {
        self.validator.validate_transaction(&message)?;

        message.executed = true;
        message.result = true;
        message.response = Some(format!("executed:{}", message.message_hash));
        let executed_hash = message.compute_executed_hash();
        message.executed_hash = Some(executed_hash);
        if !message.voters[0].contains(&self.me) {
            message.votes[0] += 1;
            message.voters[0].push(self.me.clone());
        }

        let filter = Filter::all()
            .eq("message_hash", message.message_hash.to_hex())
            .missing("block_hash");
        let update = Update::new()
            .set("executed", message.executed)
            .set("result", message.result)
            .set("response", message.response.clone())
            .set("executed_hash", executed_hash.to_hex())
            .set("votes.0", message.votes[0])
            .set("voters.0", address_list(&message.voters[0]));
        self.store.update_transactions(&filter, &update)?;
        Ok(message)
    }

    /// Count `voter`'s round-`round` endorsement of the transaction with `executed_hash`. Returns
    /// `false` when no unincluded transaction has that executed hash or `voter` was already counted.
    pub fn record_round_vote(
        &mut self,
        executed_hash: &CryptoHash,
        round: Round,
        voter: &Address,
    ) -> Result<bool, LedgerError> {
        if round.slot() >= VOTE_SLOTS {
            return Ok(false);
        }
        let filter = Filter::all()
            .eq("executed_hash", executed_hash.to_hex())
            .missing("block_hash")
            .not_contains(format!("voters.{}", round.slot()), voter.as_str());
        let update = Update::new()
            .inc(format!("votes.{}", round.slot()), 1)
            .push(format!("voters.{}", round.slot()), voter.as_str());
        Ok(self.store.update_transactions(&filter, &update)? > 0)
    }

    /// Unincluded transactions whose round-`round` votes reach the round threshold.
    pub fn select_above_threshold(&self, round: Round) -> Result<Vec<TransactionMessage>, LedgerError> {
        let threshold = self.validator.validator_set().round_threshold(round);
        let filter = Filter::all()
            .gte(format!("votes.{}", round.slot()), threshold)
            .missing("block_hash");
        Ok(self.store.transactions(&filter)?)
    }

    /// Point every transaction in `transactions` at `block`.
    pub fn include_in_block(
        &mut self,
        transactions: &[TransactionMessage],
        block: &Block,
    ) -> Result<(), LedgerError> {
        for transaction in transactions {
            let filter = Filter::all().eq("message_hash", transaction.message_hash.to_hex());
            let update = Update::new()
                .set("block_hash", block.block_hash.to_hex())
                .set("block_number", block.number.int());
            self.store.update_transactions(&filter, &update)?;
        }
        Ok(())
    }

    /// Zero the vote counters of every transaction still outside a block, so that it competes afresh
    /// at the next height. Returns how many records were reset.
    pub fn reset_unincluded_votes(&mut self) -> Result<usize, LedgerError> {
        let filter = Filter::all().missing("block_hash");
        let empty_voters: Vec<Value> = (0..VOTE_SLOTS).map(|_| Value::Array(Vec::new())).collect();
        let update = Update::new()
            .set("votes", vec![0u32; VOTE_SLOTS])
            .set("voters", empty_voters);
        Ok(self.store.update_transactions(&filter, &update)?)
    }
}

fn address_list(addresses: &[Address]) -> Value {
    Value::Array(
        addresses
            .iter()
            .map(|address| Value::String(address.to_string()))
            .collect(),
    )
}
