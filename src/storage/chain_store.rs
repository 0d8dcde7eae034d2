/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed accessors over a [`DocumentStore`].
//!
//! [`ChainStore`] is the only place that knows which collection holds which document type and which
//! field paths the queries use. Everything above it deals in [`BlockConsensusMessage`]s,
//! [`TransactionMessage`]s and [`ConsensusMessage`]s.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    basic::{Address, BlockHeight, CryptoHash, Round},
    block::BlockConsensusMessage,
    consensus::ConsensusMessage,
    transaction::{TransactionMessage, VOTE_SLOTS},
};

use super::pluggables::{
    Collection, DocumentStore, Filter, GetOptions, SortOrder, StorageError, Update,
};

/// The single document kept in [`Collection::Parameters`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeParameters {
    /// Validator roster, bootstrapped from configuration on first start.
    #[serde(default)]
    pub validators: Vec<Address>,
    /// Heights that a sync pass could not agree on, kept for a later retry.
    #[serde(default)]
    pub unresolved_heights: Vec<BlockHeight>,
}

#[derive(Clone)]
pub struct ChainStore<S: DocumentStore> {
    store: S,
}

impl<S: DocumentStore> ChainStore<S> {
    pub fn new(store: S) -> ChainStore<S> {
        ChainStore { store }
    }

    /* ↓↓↓ Committed chain ↓↓↓ */

    pub fn highest_block(&self) -> Result<Option<BlockConsensusMessage>, StorageError> {
        let options = GetOptions::default()
            .sort_by("block.number", SortOrder::Descending)
            .limit(1);
        self.first(Collection::Blockchain, &Filter::all(), &options)
    }

    /// Height of the highest committed block, or 0 if the chain is empty.
    pub fn chain_tip(&self) -> Result<BlockHeight, StorageError> {
        Ok(self
            .highest_block()?
            .map(|block| block.height())
            .unwrap_or_default())
    }

    pub fn block_at(&self, height: BlockHeight) -> Result<Option<BlockConsensusMessage>, StorageError> {
        let filter = Filter::all().eq("block.number", height.int());
        self.first(Collection::Blockchain, &filter, &GetOptions::default())
    }

    /// Committed blocks with heights in `from..=to`, in ascending height order.
    pub fn blocks_in_range(
        &self,
        from: BlockHeight,
        to: BlockHeight,
    ) -> Result<Vec<BlockConsensusMessage>, StorageError> {
        let filter = Filter::all()
            .gte("block.number", from.int())
            .lte("block.number", to.int());
        let options = GetOptions::default().sort_by("block.number", SortOrder::Ascending);
        self.all(Collection::Blockchain, &filter, &options)
    }

    pub fn put_blocks(&mut self, blocks: &[BlockConsensusMessage]) -> Result<(), StorageError> {
        if blocks.is_empty() {
            return Ok(());
        }
        let documents = blocks
            .iter()
            .map(|block| encode(Collection::Blockchain, block))
            .collect::<Result<Vec<Value>, StorageError>>()?;
        self.store.put(Collection::Blockchain, documents)
    }

    /// Write `block` as the committed block at its height, replacing whatever was there.
    pub fn replace_block(&mut self, block: &BlockConsensusMessage) -> Result<(), StorageError> {
        let filter = Filter::all().eq("block.number", block.height().int());
        let document = encode(Collection::Blockchain, block)?;
        self.store
            .upsert(Collection::Blockchain, &filter, &Update::set_all(&document))
    }

    /* ↓↓↓ Block candidates ↓↓↓ */

    pub fn candidate(&self, block_hash: &CryptoHash) -> Result<Option<BlockConsensusMessage>, StorageError> {
        let filter = Filter::all().eq("block_hash", block_hash.to_hex());
        self.first(Collection::BlockCandidates, &filter, &GetOptions::default())
    }

    /// Insert or overwrite the candidate with `candidate.block_hash`.
    pub fn put_candidate(&mut self, candidate: &BlockConsensusMessage) -> Result<(), StorageError> {
        let filter = Filter::all().eq("block_hash", candidate.block_hash.to_hex());
        let document = encode(Collection::BlockCandidates, candidate)?;
        self.store
            .upsert(Collection::BlockCandidates, &filter, &Update::set_all(&document))
    }

    pub fn remove_candidate(&mut self, block_hash: &CryptoHash) -> Result<usize, StorageError> {
        let filter = Filter::all().eq("block_hash", block_hash.to_hex());
        self.store.remove(Collection::BlockCandidates, &filter)
    }

    /* ↓↓↓ Message pool ↓↓↓ */

    pub fn transaction(&self, message_hash: &CryptoHash) -> Result<Option<TransactionMessage>, StorageError> {
        let filter = Filter::all().eq("message_hash", message_hash.to_hex());
        self.first(Collection::MessagesPool, &filter, &GetOptions::default())
    }

    pub fn transactions(&self, filter: &Filter) -> Result<Vec<TransactionMessage>, StorageError> {
        self.all(Collection::MessagesPool, filter, &GetOptions::default())
    }

    pub fn pool_size(&self) -> Result<usize, StorageError> {
        Ok(self
            .store
            .get(Collection::MessagesPool, &Filter::all(), &GetOptions::default())?
            .len())
    }

    pub fn put_transaction(&mut self, transaction: &TransactionMessage) -> Result<(), StorageError> {
        let document = encode(Collection::MessagesPool, transaction)?;
        self.store.put(Collection::MessagesPool, vec![document])
    }

    /// Return to the pool every transaction that points at a block other than `committed` at
    /// `height`, with its votes cleared so it is proposed again. Returns how many were released.
    pub fn release_transactions(&mut self, height: BlockHeight, committed: &CryptoHash) -> Result<usize, StorageError> {
        let filter = Filter::all()
            .eq("block_number", height.int())
            .ne("block_hash", committed.to_hex());
        let empty_voters: Vec<Value> = (0..VOTE_SLOTS).map(|_| Value::Array(Vec::new())).collect();
        let update = Update::new()
            .set("block_hash", Value::Null)
            .set("block_number", Value::Null)
            .set("votes", vec![0u32; VOTE_SLOTS])
            .set("voters", empty_voters);
        self.store.update(Collection::MessagesPool, &filter, &update)
    }

    pub fn update_transactions(&mut self, filter: &Filter, update: &Update) -> Result<usize, StorageError> {
        self.store.update(Collection::MessagesPool, filter, update)
    }

    /* ↓↓↓ Consensus pool ↓↓↓ */

    pub fn consensus_messages(
        &self,
        round: Round,
        block_number: BlockHeight,
    ) -> Result<Vec<ConsensusMessage>, StorageError> {
        let filter = Filter::all()
            .eq("round", round.int())
            .eq("block_number", block_number.int());
        self.all(Collection::ConsensusPool, &filter, &GetOptions::default())
    }

    /// Store `message` unless a message with the same hash is already pooled. Returns whether it
    /// was stored.
    pub fn put_consensus_message(&mut self, message: &ConsensusMessage) -> Result<bool, StorageError> {
        let filter = Filter::all().eq("hash", message.hash.to_hex());
        let existing = self
            .store
            .get(Collection::ConsensusPool, &filter, &GetOptions::default().limit(1))?;
        if !existing.is_empty() {
            return Ok(false);
        }
        let document = encode(Collection::ConsensusPool, message)?;
        self.store.put(Collection::ConsensusPool, vec![document])?;
        Ok(true)
    }

    /* ↓↓↓ Parameters ↓↓↓ */

    pub fn parameters(&self) -> Result<Option<NodeParameters>, StorageError> {
        self.first(Collection::Parameters, &Filter::all(), &GetOptions::default())
    }

    pub fn put_parameters(&mut self, parameters: &NodeParameters) -> Result<(), StorageError> {
        let document = encode(Collection::Parameters, parameters)?;
        self.store
            .upsert(Collection::Parameters, &Filter::all(), &Update::set_all(&document))
    }

    /// Add `heights` to the recorded unresolved heights, keeping the list sorted and free of duplicates.
    pub fn record_unresolved_heights(&mut self, heights: &[BlockHeight]) -> Result<(), StorageError> {
        if heights.is_empty() {
            return Ok(());
        }
        let mut parameters = self.parameters()?.unwrap_or_default();
        parameters.unresolved_heights.extend_from_slice(heights);
        parameters.unresolved_heights.sort();
        parameters.unresolved_heights.dedup();
        self.put_parameters(&parameters)
    }

    /// Forget unresolved heights that have since been filled.
    pub fn clear_unresolved_heights(&mut self, heights: &[BlockHeight]) -> Result<(), StorageError> {
        let Some(mut parameters) = self.parameters()? else {
            return Ok(());
        };
        let before = parameters.unresolved_heights.len();
        parameters
            .unresolved_heights
            .retain(|height| !heights.contains(height));
        if parameters.unresolved_heights.len() == before {
            return Ok(());
        }
        self.put_parameters(&parameters)
    }

    fn all<T: DeserializeOwned>(
        &self,
        collection: Collection,
        filter: &Filter,
        options: &GetOptions,
    ) -> Result<Vec<T>, StorageError> {
        self.store
            .get(collection, filter, options)?
            .into_iter()
            .map(|document| decode(collection, document))
            .collect()
    }

    fn first<T: DeserializeOwned>(
        &self,
        collection: Collection,
        filter: &Filter,
        options: &GetOptions,
    ) -> Result<Option<T>, StorageError> {
        Ok(self.all(collection, filter, options)?.into_iter().next())
    }
}

fn encode<T: Serialize>(collection: Collection, value: &T) -> Result<Value, StorageError> {
    serde_json::to_value(value).map_err(|source| StorageError::Encode { collection, source })
}

fn decode<T: DeserializeOwned>(collection: Collection, document: Value) -> Result<T, StorageError> {
    serde_json::from_value(document).map_err(|source| StorageError::Decode { collection, source })
}
