/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use crate::types::basic::PeerAddress;

use super::{
    messages::Message,
    network::{Network, NetworkError},
};

/// A wrapper around [`Network`] that exposes only the outbound half of it.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<S: Into<Message>>(
        &mut self,
        peer: &PeerAddress,
        msg: S,
    ) -> Result<(), NetworkError> {
        self.network.send(peer, msg.into())
    }

    pub(crate) fn broadcast<S: Into<Message>>(&mut self, msg: S) -> Result<(), NetworkError> {
        self.network.broadcast(msg.into())
    }
}
