/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reconciles block consensus messages with the committed chain and the pending candidates.
//!
//! For an incoming block at height `h`:
//! 1. If `h` is beyond the height after the local tip, first sync the gap from peers.
//! 2. If a committed block with the same hash sits at `h`, count the message's votes on it.
//! 3. If a committed block at `h` has already reached the commit threshold, any other hash at `h` is
//!    stale.
//! 4. Otherwise count the votes on the pending candidate with that hash, creating it if needed. A
//!    candidate is promoted to the committed chain once it reaches the commit threshold and, when a
//!    non-final committed block occupies `h`, strictly outvotes it.
//!
//! Votes are counted once per signer, so replaying a message changes nothing. Promoting a block at a
//! height the round engine is still working on signals the engine to restart from the new head.

use std::{
    sync::mpsc::{Sender, SyncSender},
    time::SystemTime,
};

use thiserror::Error;

use crate::{
    block_sync::client::ChainSync,
    events::{CommitBlockEvent, Event, InsertCandidateEvent},
    networking::Network,
    storage::{ChainStore, DocumentStore, StorageError},
    types::{
        basic::{BlockHeight, CryptoHash},
        block::BlockConsensusMessage,
        validators::ValidatorSet,
    },
};

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What happened to a block consensus message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// New votes were counted on the committed block at this height.
    VoteAdded { height: BlockHeight, votes: u64 },
    /// Every vote in the message had already been counted.
    DuplicateVote,
    /// A new pending candidate was stored.
    CandidateInserted { block: CryptoHash, votes: u64 },
    /// New votes were counted on an existing pending candidate.
    CandidateVoteAdded { block: CryptoHash, votes: u64 },
    /// The candidate became the committed block at its height.
    Promoted { height: BlockHeight, block: CryptoHash },
    /// A final committed block already occupies the height.
    Stale { height: BlockHeight, block: CryptoHash },
}

pub struct BlockResolver<S: DocumentStore, N: Network> {
    store: ChainStore<S>,
    validator_set: ValidatorSet,
    chain_sync: ChainSync<S, N>,
    restart_signal: Option<SyncSender<()>>,
    event_publisher: Option<Sender<Event>>,
}

impl<S: DocumentStore, N: Network> BlockResolver<S, N> {
    pub fn new(
        store: ChainStore<S>,
        validator_set: ValidatorSet,
        chain_sync: ChainSync<S, N>,
        restart_signal: Option<SyncSender<()>>,
        event_publisher: Option<Sender<Event>>,
    ) -> BlockResolver<S, N> {
        BlockResolver {
            store,
            validator_set,
            chain_sync,
            restart_signal,
            event_publisher,
        }
    }

    /// Resolve a validated block consensus message received from a peer.
    pub fn on_block_consensus(&mut self, message: BlockConsensusMessage) -> Result<Resolution, ResolverError> {
        let tip = self.store.chain_tip()?;
        if message.height() > tip + 1 {
            self.catch_up(tip, message.height())?;
        }
        self.resolve(message)
    }

    /// Resolve the candidate this node just proposed.
    pub fn insert_own_candidate(&mut self, candidate: BlockConsensusMessage) -> Result<Resolution, ResolverError> {
        self.resolve(candidate)
    }

    fn resolve(&mut self, message: BlockConsensusMessage) -> Result<Resolution, ResolverError> {
        let height = message.height();
        let threshold = self.validator_set.commit_threshold();
        let tip = self.store.chain_tip()?;
        let local = self.store.block_at(height)?;

        if let Some(mut local) = local.clone() {
            if local.block_hash == message.block_hash {
                if !local.merge_votes(&message) {
                    return Ok(Resolution::DuplicateVote);
                }
                self.store.replace_block(&local)?;
                return Ok(Resolution::VoteAdded {
                    height,
                    votes: local.votes,
                });
            }
            if local.votes >= threshold {
                log::debug!(
                    "{} at height {} is stale, {} is final there",
                    message.block_hash,
                    height,
                    local.block_hash
                );
                return Ok(Resolution::Stale {
                    height,
                    block: message.block_hash,
                });
            }
        }

        let (candidate, inserted) = match self.store.candidate(&message.block_hash)? {
            None => {
                self.store.put_candidate(&message)?;
                Event::publish(
                    &self.event_publisher,
                    Event::InsertCandidate(InsertCandidateEvent {
                        timestamp: SystemTime::now(),
                        block: message.block_hash,
                        height,
                        votes: message.votes,
                    }),
                );
                (message, true)
            }
            Some(mut candidate) => {
                if !candidate.merge_votes(&message) {
                    return Ok(Resolution::DuplicateVote);
                }
                self.store.put_candidate(&candidate)?;
                (candidate, false)
            }
        };

        let outvotes_local = local.as_ref().map_or(true, |local| candidate.votes > local.votes);
        if candidate.votes >= threshold && outvotes_local {
            return self.promote(candidate, tip);
        }

        Ok(if inserted {
            Resolution::CandidateInserted {
                block: candidate.block_hash,
                votes: candidate.votes,
            }
        } else {
            Resolution::CandidateVoteAdded {
                block: candidate.block_hash,
                votes: candidate.votes,
            }
        })
    }

    fn promote(&mut self, candidate: BlockConsensusMessage, tip: BlockHeight) -> Result<Resolution, ResolverError> {
        let height = candidate.height();
        let block = candidate.block_hash;

        self.store.replace_block(&candidate)?;
        self.store.remove_candidate(&block)?;
        self.store.clear_unresolved_heights(&[height])?;
        let released = self.store.release_transactions(height, &block)?;
        if released > 0 {
            log::debug!("{} transactions of a losing block at height {} return to the pool", released, height);
        }
        log::info!("committed {} at height {} with {} votes", block, height, candidate.votes);
        Event::publish(
            &self.event_publisher,
            Event::CommitBlock(CommitBlockEvent {
                timestamp: SystemTime::now(),
                block,
                height,
                votes: candidate.votes,
            }),
        );

        if height > tip + 1 {
            self.catch_up(tip, height)?;
        }
        if height > tip {
            self.signal_restart();
        }
        Ok(Resolution::Promoted { height, block })
    }

    /// Sync the heights between `tip` and `target`. Heights no peer could be asked for are recorded as
    /// unresolved.
    fn catch_up(&mut self, tip: BlockHeight, target: BlockHeight) -> Result<(), StorageError> {
        match self.chain_sync.sync_range(tip, target) {
            Ok(outcome) => {
                if !outcome.resolved.is_empty() {
                    self.signal_restart();
                }
            }
            Err(err) => {
                log::warn!("sync up to height {} failed: {}", target, err);
                let missing: Vec<BlockHeight> = (tip.int() + 1..target.int()).map(BlockHeight::new).collect();
                self.store.record_unresolved_heights(&missing)?;
            }
        }
        Ok(())
    }

    fn signal_restart(&self) {
        if let Some(restart_signal) = &self.restart_signal {
            // A pending signal already covers this one.
            let _ = restart_signal.try_send(());
        }
    }
}
