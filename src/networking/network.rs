/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use thiserror::Error;

use crate::types::{basic::PeerAddress, block::BlockConsensusMessage};

use super::messages::Message;

/// A pluggable peer-to-peer transport.
///
/// Implementations must bound every outbound call by a fixed request timeout, so that one
/// unreachable peer never stalls the caller for long.
pub trait Network: Clone + Send {
    /// Send a message to all connected peers.
    fn broadcast(&mut self, message: Message) -> Result<(), NetworkError>;

    /// Send a message to the specified peer.
    fn send(&mut self, peer: &PeerAddress, message: Message) -> Result<(), NetworkError>;

    /// Peers currently connected, excluding those in `blacklist`.
    fn connected_peers(&mut self, blacklist: &[PeerAddress]) -> Result<Vec<PeerAddress>, NetworkError>;

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(PeerAddress, Message)>;

    /// Download the blocks behind a link handed out in a sync response.
    fn fetch_blocks(&mut self, link: &str) -> Result<Vec<BlockConsensusMessage>, NetworkError> {
        Err(NetworkError::UnsupportedLink(link.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer {0} is unreachable")]
    Unreachable(PeerAddress),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("cannot fetch blocks from link {0}")]
    UnsupportedLink(String),
    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(serde_json::Error),
}
