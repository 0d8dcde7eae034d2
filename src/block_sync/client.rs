/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The client side of the block sync protocol, which fills gaps between the local chain tip and a
//! height that peers have evidently reached.
//!
//! ## Sync process
//!
//! 1. Compute the requested range: from the height after the local tip (or the target itself, if the
//!    tip already equals it) up to the target.
//! 2. Ask every connected, non-blacklisted peer for that range, one at a time, waiting at most the
//!    configured response timeout for each. A peer that does not answer in time, or answers with an
//!    error, is skipped.
//! 3. For every height in the range, pick the block that a strict plurality of responding peers agree
//!    on, keyed by block hash. A tie at the top leaves the height unresolved.
//! 4. Persist every resolved height in one batch, and record the unresolved ones in the node
//!    parameters for a later retry.
//!
//! A committed block that already gathered the commit threshold locally is never overwritten by a
//! sync; a non-final one is replaced by the peers' choice.

use std::{
    collections::{BTreeMap, HashMap},
    sync::mpsc::{Receiver, Sender},
    time::{Duration, Instant, SystemTime},
};

use thiserror::Error;

use crate::{
    events::{EndSyncEvent, Event, StartSyncEvent},
    networking::{
        receiving::{BlockSyncClientStub, BlockSyncResponseReceiveError},
        Network, NetworkError,
    },
    storage::{ChainStore, DocumentStore, StorageError},
    types::{
        basic::{Address, BlockHeight, CryptoHash, PeerAddress},
        block::BlockConsensusMessage,
        validators::ValidatorSet,
    },
    validation::MessageValidator,
};

use super::messages::{SyncPayload, SyncRequest, SyncResponse};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no connected nodes found")]
    NoConnectedPeers,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Clone, Debug)]
pub struct BlockSyncClientConfiguration {
    pub me: Address,
    pub response_timeout: Duration,
    pub peer_blacklist: Vec<PeerAddress>,
}

/// What one sync pass achieved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOutcome {
    pub from: BlockHeight,
    pub to: BlockHeight,
    /// Heights for which peers agreed on a block. Each was persisted unless a final local block
    /// already occupied it.
    pub resolved: Vec<BlockHeight>,
    /// Heights left without a strict plurality.
    pub unresolved: Vec<BlockHeight>,
}

pub struct ChainSync<S: DocumentStore, N: Network> {
    config: BlockSyncClientConfiguration,
    store: ChainStore<S>,
    network: N,
    responses: BlockSyncClientStub,
    validator: MessageValidator,
    event_publisher: Option<Sender<Event>>,
}

impl<S: DocumentStore, N: Network> ChainSync<S, N> {
    pub fn new(
        config: BlockSyncClientConfiguration,
        store: ChainStore<S>,
        network: N,
        responses: Receiver<(PeerAddress, SyncResponse)>,
        validator_set: ValidatorSet,
        event_publisher: Option<Sender<Event>>,
    ) -> ChainSync<S, N> {
        ChainSync {
            config,
            store,
            network,
            responses: BlockSyncClientStub::new(responses),
            validator: MessageValidator::new(validator_set),
            event_publisher,
        }
    }

    /// Bring the committed chain from `tip` up to `target` with the help of connected peers.
    pub fn sync_range(&mut self, tip: BlockHeight, target: BlockHeight) -> Result<SyncOutcome, SyncError> {
        let (from, to) = sync_request_range(tip, target);

        let peers = self.network.connected_peers(&self.config.peer_blacklist)?;
        if peers.is_empty() {
            return Err(SyncError::NoConnectedPeers);
        }

        Event::publish(
            &self.event_publisher,
            Event::StartSync(StartSyncEvent {
                timestamp: SystemTime::now(),
                from,
                to,
                peers: peers.len(),
            }),
        );
        log::debug!("syncing heights {}..={} from {} peers", from, to, peers.len());

        let request = SyncRequest {
            from,
            to,
            requester_address: self.config.me.clone(),
        };
        let responses: Vec<Vec<BlockConsensusMessage>> = peers
            .iter()
            .filter_map(|peer| self.ask_peer(peer, &request))
            .collect();

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        let mut chosen = Vec::new();
        for height in from.int()..=to.int() {
            let height = BlockHeight::new(height);
            match select_canonical(height, &responses) {
                Some(block) => {
                    resolved.push(height);
                    chosen.push(block);
                }
                None => unresolved.push(height),
            }
        }

        self.persist(chosen)?;
        self.store.clear_unresolved_heights(&resolved)?;
        self.store.record_unresolved_heights(&unresolved)?;

        Event::publish(
            &self.event_publisher,
            Event::EndSync(EndSyncEvent {
                timestamp: SystemTime::now(),
                resolved: resolved.clone(),
                unresolved: unresolved.clone(),
            }),
        );
        if !unresolved.is_empty() {
            log::warn!("sync left {} heights unresolved: {:?}", unresolved.len(), unresolved);
        }

        Ok(SyncOutcome {
            from,
            to,
            resolved,
            unresolved,
        })
    }

    /// Send `request` to `peer` and collect its valid blocks. `None` if the peer could not be
    /// reached, timed out or had nothing.
    fn ask_peer(&mut self, peer: &PeerAddress, request: &SyncRequest) -> Option<Vec<BlockConsensusMessage>> {
        if let Err(err) = self.network.send(peer, request.clone().into()) {
            log::warn!("sync request to {} failed: {}", peer, err);
            return None;
        }
        let deadline = Instant::now() + self.config.response_timeout;
        let response = match self.responses.recv_response(peer, request, deadline) {
            Ok(response) => response,
            Err(BlockSyncResponseReceiveError::Timeout) => {
                log::debug!("{} did not answer the sync request in time", peer);
                return None;
            }
            Err(BlockSyncResponseReceiveError::Disconnected) => return None,
        };

        let blocks = match response.payload {
            SyncPayload::Blocks(blocks) => blocks,
            SyncPayload::Link(link) => match self.network.fetch_blocks(&link) {
                Ok(blocks) => blocks,
                Err(err) => {
                    log::warn!("fetching blocks from {} for {} failed: {}", link, peer, err);
                    return None;
                }
            },
            SyncPayload::Error(err) => {
                log::debug!("{} answered the sync request with {:?}", peer, err);
                return None;
            }
        };

        Some(
            blocks
                .into_iter()
                .filter(|block| block.height() >= request.from && block.height() <= request.to)
                .filter(|block| match self.validator.validate_block_consensus(block) {
                    Ok(()) => true,
                    Err(err) => {
                        log::warn!("discarding synced block at {} from {}: {}", block.height(), peer, err);
                        false
                    }
                })
                .collect(),
        )
    }

    fn persist(&mut self, chosen: Vec<BlockConsensusMessage>) -> Result<(), StorageError> {
        let threshold = self.validator.validator_set().commit_threshold();
        let mut fresh = Vec::new();
        for block in chosen {
            match self.store.block_at(block.height())? {
                None => fresh.push(block),
                Some(local) if local.block_hash == block.block_hash => (),
                Some(local) if local.votes >= threshold => {
                    log::warn!(
                        "peers prefer {} at height {}, keeping final local block {}",
                        block.block_hash,
                        block.height(),
                        local.block_hash
                    );
                }
                Some(_) => {
                    self.store.replace_block(&block)?;
                    self.store.release_transactions(block.height(), &block.block_hash)?;
                }
            }
        }
        for block in &fresh {
            self.store.release_transactions(block.height(), &block.block_hash)?;
        }
        self.store.put_blocks(&fresh)
    }
}

/// The inclusive range a node at `tip` asks for to reach `target`.
pub fn sync_request_range(tip: BlockHeight, target: BlockHeight) -> (BlockHeight, BlockHeight) {
    if tip >= target {
        (target, target)
    } else {
        (tip + 1, target)
    }
}

/// The block at `height` that strictly more responses agree on than on any other hash. Each response
/// counts at most once per height.
pub fn select_canonical(
    height: BlockHeight,
    responses: &[Vec<BlockConsensusMessage>],
) -> Option<BlockConsensusMessage> {
    let mut tally: HashMap<CryptoHash, (usize, &BlockConsensusMessage)> = HashMap::new();
    for response in responses {
        if let Some(block) = response.iter().find(|block| block.height() == height) {
            tally.entry(block.block_hash).or_insert((0, block)).0 += 1;
        }
    }

    let mut counts: BTreeMap<usize, Vec<&BlockConsensusMessage>> = BTreeMap::new();
    for (count, block) in tally.into_values() {
        counts.entry(count).or_default().push(block);
    }
    match counts.into_iter().next_back() {
        Some((_, leaders)) if leaders.len() == 1 => leaders.into_iter().next().cloned(),
        _ => None,
    }
}
