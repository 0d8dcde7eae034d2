/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implements the [`BlockSyncServer`] for the block sync protocol, which helps lagging replicas catch
//! up with the head of the blockchain.
//!
//! The server answers every [`SyncRequest`] with the committed blocks it holds in the requested
//! range, or with [`SyncResponseError::NoBlocksFound`] if it holds none. The client side of this
//! protocol is explained [here](crate::block_sync::client).

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use crate::{
    events::{Event, ReceiveSyncRequestEvent, SendSyncResponseEvent},
    networking::{
        receiving::{BlockSyncRequestReceiveError, BlockSyncServerStub},
        sending::SenderHandle,
        Network,
    },
    storage::{ChainStore, DocumentStore},
    types::basic::PeerAddress,
};

use super::messages::{SyncPayload, SyncRequest, SyncResponse, SyncResponseError};

/// How long the server waits for a request before checking for shutdown again.
const REQUEST_WAIT: Duration = Duration::from_millis(10);

pub(crate) struct BlockSyncServer<N: Network + 'static, S: DocumentStore> {
    store: ChainStore<S>,
    receiver: BlockSyncServerStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, S: DocumentStore> BlockSyncServer<N, S> {
    pub(crate) fn new(
        store: ChainStore<S>,
        requests: Receiver<(PeerAddress, SyncRequest)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            store,
            receiver: BlockSyncServerStub::new(requests),
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match self.receiver.recv_request(REQUEST_WAIT) {
                Ok((origin, request)) => self.on_receive_request(origin, request),
                Err(BlockSyncRequestReceiveError::Timeout) => (),
                Err(BlockSyncRequestReceiveError::Disconnected) => return,
            }
        })
    }

    fn on_receive_request(&mut self, origin: PeerAddress, request: SyncRequest) {
        Event::publish(
            &self.event_publisher,
            Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
                timestamp: SystemTime::now(),
                peer: origin.clone(),
                from: request.from,
                to: request.to,
            }),
        );

        let blocks = match self.store.blocks_in_range(request.from, request.to) {
            Ok(blocks) => blocks,
            Err(err) => {
                log::error!("cannot serve sync request from {}: {}", origin, err);
                return;
            }
        };
        let served = blocks.len();
        let payload = if blocks.is_empty() {
            SyncPayload::Error(SyncResponseError::NoBlocksFound)
        } else {
            SyncPayload::Blocks(blocks)
        };
        let response = SyncResponse {
            from: request.from,
            to: request.to,
            payload,
        };

        if let Err(err) = self.sender.send(&origin, response) {
            log::warn!("sync response to {} failed: {}", origin, err);
            return;
        }
        Event::publish(
            &self.event_publisher,
            Event::SendSyncResponse(SendSyncResponseEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                blocks: served,
            }),
        );
    }
}
