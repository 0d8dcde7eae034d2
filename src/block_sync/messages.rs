/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of the block sync
//! protocol.

use serde::{Deserialize, Serialize};

use crate::types::{
    basic::{Address, BlockHeight},
    block::BlockConsensusMessage,
};

/// Ask a peer for its committed blocks with heights in `from..=to`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from: BlockHeight,
    pub to: BlockHeight,
    pub requester_address: Address,
}

/// A peer's answer to a [`SyncRequest`]. `from` and `to` echo the request so that late answers to an
/// earlier request can be told apart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub from: BlockHeight,
    pub to: BlockHeight,
    pub payload: SyncPayload,
}

impl SyncResponse {
    pub fn answers(&self, request: &SyncRequest) -> bool {
        self.from == request.from && self.to == request.to
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPayload {
    /// The blocks themselves, inline.
    Blocks(Vec<BlockConsensusMessage>),
    /// A link from which the blocks can be fetched through the network provider.
    Link(String),
    Error(SyncResponseError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncResponseError {
    NoBlocksFound,
}
