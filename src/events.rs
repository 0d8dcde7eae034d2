/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of node events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::{
    basic::{BlockHeight, CryptoHash, PeerAddress, Round},
    block::BlockConsensusMessage,
    consensus::ConsensusMessage,
};

pub enum Event {
    // Events that change persistent state.
    AcceptTransaction(AcceptTransactionEvent),
    InsertCandidate(InsertCandidateEvent),
    CommitBlock(CommitBlockEvent),
    // Events that involve broadcasting a message.
    BroadcastConsensus(BroadcastConsensusEvent),
    ProposeBlock(ProposeBlockEvent),
    // Events that involve receiving a message.
    ReceiveConsensus(ReceiveConsensusEvent),
    DropMessage(DropMessageEvent),
    // Round engine events.
    StartHeight(StartHeightEvent),
    StartRound(StartRoundEvent),
    // Sync events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    SendSyncResponse(SendSyncResponseEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus may already have shut down.
            let _ = event_publisher.send(event);
        }
    }
}

/// A transaction passed validation and entered the message pool. `origin` is `None` for
/// transactions submitted through this node.
pub struct AcceptTransactionEvent {
    pub timestamp: SystemTime,
    pub origin: Option<PeerAddress>,
    pub tx: CryptoHash,
}

pub struct InsertCandidateEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
    pub votes: u64,
}

pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
    pub votes: u64,
}

pub struct BroadcastConsensusEvent {
    pub timestamp: SystemTime,
    pub message: ConsensusMessage,
}

pub struct ProposeBlockEvent {
    pub timestamp: SystemTime,
    pub block: BlockConsensusMessage,
}

pub struct ReceiveConsensusEvent {
    pub timestamp: SystemTime,
    pub origin: PeerAddress,
    pub message: ConsensusMessage,
}

/// A message failed validation and was discarded.
pub struct DropMessageEvent {
    pub timestamp: SystemTime,
    pub origin: Option<PeerAddress>,
    pub kind: &'static str,
    pub reason: String,
}

pub struct StartHeightEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub previous_block_hash: CryptoHash,
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub round: Round,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub from: BlockHeight,
    pub to: BlockHeight,
    pub peers: usize,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub resolved: Vec<BlockHeight>,
    pub unresolved: Vec<BlockHeight>,
}

pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: PeerAddress,
    pub from: BlockHeight,
    pub to: BlockHeight,
}

pub struct SendSyncResponseEvent {
    pub timestamp: SystemTime,
    pub peer: PeerAddress,
    pub blocks: usize,
}
