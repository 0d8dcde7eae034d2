/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    block_sync::messages::{SyncRequest, SyncResponse},
    listener::ListenerInput,
    types::basic::PeerAddress,
};

use super::{messages::Message, network::Network};

/// How long the poller idles when the network has nothing for it.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them:
/// 1. Consensus, block consensus and transaction messages go to the
///    [listener](crate::listener) queue,
/// 2. Sync requests go to the [`BlockSyncServer`](crate::block_sync::server::BlockSyncServer), and
/// 3. Sync responses go to the [`ChainSync`](crate::block_sync::client::ChainSync) client.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    to_listener: Sender<ListenerInput>,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(PeerAddress, SyncRequest)>,
    Receiver<(PeerAddress, SyncResponse)>,
) {
    let (to_sync_request_receiver, sync_request_receiver) = mpsc::channel();
    let (to_sync_response_receiver, sync_response_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::SyncRequest(request) => {
                    let _ = to_sync_request_receiver.send((origin, request));
                }
                Message::SyncResponse(response) => {
                    let _ = to_sync_response_receiver.send((origin, response));
                }
                message => {
                    let _ = to_listener.send(ListenerInput::Peer { origin, message });
                }
            }
        } else {
            thread::sleep(POLL_INTERVAL)
        }
    });
    (poller_thread, sync_request_receiver, sync_response_receiver)
}

/// A receiving end for sync responses, owned by the sync client.
pub struct BlockSyncClientStub {
    responses: Receiver<(PeerAddress, SyncResponse)>,
}

impl BlockSyncClientStub {
    pub fn new(responses: Receiver<(PeerAddress, SyncResponse)>) -> BlockSyncClientStub {
        BlockSyncClientStub { responses }
    }

    /// Wait until `deadline` for `peer`'s answer to `request`. Responses from other peers, and late
    /// answers to earlier requests, are discarded.
    pub(crate) fn recv_response(
        &self,
        peer: &PeerAddress,
        request: &SyncRequest,
        deadline: Instant,
    ) -> Result<SyncResponse, BlockSyncResponseReceiveError> {
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.responses.recv_timeout(remaining) {
                Ok((origin, response)) => {
                    if &origin == peer && response.answers(request) {
                        return Ok(response);
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BlockSyncResponseReceiveError::Disconnected)
                }
            }
        }
        Err(BlockSyncResponseReceiveError::Timeout)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BlockSyncResponseReceiveError {
    Disconnected,
    Timeout,
}

/// A receiving end for sync requests, owned by the sync server.
pub(crate) struct BlockSyncServerStub {
    requests: Receiver<(PeerAddress, SyncRequest)>,
}

impl BlockSyncServerStub {
    pub(crate) fn new(requests: Receiver<(PeerAddress, SyncRequest)>) -> Self {
        Self { requests }
    }

    pub(crate) fn recv_request(
        &self,
        timeout: Duration,
    ) -> Result<(PeerAddress, SyncRequest), BlockSyncRequestReceiveError> {
        match self.requests.recv_timeout(timeout) {
            Ok(request) => Ok(request),
            Err(RecvTimeoutError::Timeout) => Err(BlockSyncRequestReceiveError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(BlockSyncRequestReceiveError::Disconnected),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BlockSyncRequestReceiveError {
    Disconnected,
    Timeout,
}
