/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The listener thread, the single consumer of everything that changes the message pools and the
//! block candidates.
//!
//! Its queue carries peer messages from the poller, transactions submitted through the
//! [`Replica`](crate::replica::Replica), and the blocks the round engine finalizes. Every peer message is
//! validated before it touches storage; an invalid one is dropped, logged and reported as a
//! [`DropMessageEvent`]. Because block resolution only ever happens on this thread, two block
//! consensus messages for the same height are never resolved concurrently.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use thiserror::Error;

use crate::{
    block_resolver::{BlockResolver, Resolution, ResolverError},
    events::{AcceptTransactionEvent, DropMessageEvent, Event, ReceiveConsensusEvent},
    networking::{messages::Message, Network, NetworkError},
    storage::{ChainStore, DocumentStore, StorageError},
    types::{
        basic::PeerAddress,
        block::BlockConsensusMessage,
        consensus::ConsensusMessage,
        transaction::{TransactionMessage, Tx},
    },
    validation::{MessageValidator, ValidationError},
};

const IDLE_WAIT: Duration = Duration::from_millis(10);

pub(crate) enum ListenerInput {
    Peer {
        origin: PeerAddress,
        message: Message,
    },
    SubmitTransaction {
        tx: Tx,
        ack: SyncSender<Result<(), SubmitError>>,
    },
    OwnCandidate {
        candidate: BlockConsensusMessage,
        ack: SyncSender<Result<Resolution, ResolverError>>,
    },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("transaction rejected: {0}")]
    Rejected(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("the listener has stopped")]
    ListenerStopped,
}

pub(crate) struct Listener<S: DocumentStore, N: Network> {
    store: ChainStore<S>,
    validator: MessageValidator,
    resolver: BlockResolver<S, N>,
    inputs: Receiver<ListenerInput>,
    initial_block_signal: Option<SyncSender<()>>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<S: DocumentStore, N: Network + 'static> Listener<S, N> {
    pub(crate) fn new(
        store: ChainStore<S>,
        validator: MessageValidator,
        resolver: BlockResolver<S, N>,
        inputs: Receiver<ListenerInput>,
        initial_block_signal: SyncSender<()>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            store,
            validator,
            resolver,
            inputs,
            initial_block_signal: Some(initial_block_signal),
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

            match self.inputs.recv_timeout(IDLE_WAIT) {
                Ok(input) => self.on_input(input),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
    }

    fn on_input(&mut self, input: ListenerInput) {
        match input {
            ListenerInput::Peer { origin, message } => self.on_peer_message(origin, message),
            ListenerInput::SubmitTransaction { tx, ack } => {
                let result = self.on_submit_transaction(tx);
                // The submitter may have given up waiting.
                let _ = ack.send(result);
            }
            ListenerInput::OwnCandidate { candidate, ack } => {
                let result = self.resolver.insert_own_candidate(candidate);
                let _ = ack.send(result);
            }
        }
    }

    fn on_peer_message(&mut self, origin: PeerAddress, message: Message) {
        let kind = message.kind();
        let result = match message {
            Message::Consensus(consensus) => self.on_receive_consensus(&origin, consensus),
            Message::Transaction(tx) => self.on_receive_tx(&origin, tx),
            Message::BlockConsensus(block) => self.on_receive_block_consensus(&origin, block),
            Message::SyncRequest(_) | Message::SyncResponse(_) => {
                log::debug!("{} from {} reached the listener, ignoring", kind, origin);
                Ok(())
            }
        };

        if let Err(err) = result {
            match err {
                HandlingError::Invalid(err) => self.drop_message(Some(origin), kind, err),
                HandlingError::Storage(err) => log::error!("{} from {} not handled: {}", kind, origin, err),
                HandlingError::Resolver(err) => log::error!("{} from {} not resolved: {}", kind, origin, err),
            }
        }
    }

    fn on_receive_consensus(&mut self, origin: &PeerAddress, message: ConsensusMessage) -> Result<(), HandlingError> {
        self.validator.validate_consensus(&message)?;
        if self.store.put_consensus_message(&message)? {
            Event::publish(
                &self.event_publisher,
                Event::ReceiveConsensus(ReceiveConsensusEvent {
                    timestamp: SystemTime::now(),
                    origin: origin.clone(),
                    message,
                }),
            );
        }
        Ok(())
    }

    fn on_receive_tx(&mut self, origin: &PeerAddress, tx: Tx) -> Result<(), HandlingError> {
        self.validator.validate_tx(&tx)?;
        self.accept_tx(Some(origin.clone()), tx)?;
        Ok(())
    }

    fn on_receive_block_consensus(
        &mut self,
        origin: &PeerAddress,
        block: BlockConsensusMessage,
    ) -> Result<(), HandlingError> {
        self.validator.validate_block_consensus(&block)?;
        if let Some(initial_block_signal) = self.initial_block_signal.take() {
            let _ = initial_block_signal.try_send(());
        }
        let resolution = self.resolver.on_block_consensus(block)?;
        log::debug!("block consensus from {}: {:?}", origin, resolution);
        Ok(())
    }

    fn on_submit_transaction(&mut self, tx: Tx) -> Result<(), SubmitError> {
        self.validator.validate_tx(&tx)?;
        self.accept_tx(None, tx)?;
        Ok(())
    }

    /// Put `tx` in the message pool unless it is already there. Returns whether it was added.
    fn accept_tx(&mut self, origin: Option<PeerAddress>, tx: Tx) -> Result<bool, StorageError> {
        if self.store.transaction(&tx.message_hash)?.is_some() {
            return Ok(false);
        }
        let message_hash = tx.message_hash;
        self.store.put_transaction(&TransactionMessage::new(tx))?;
        Event::publish(
            &self.event_publisher,
            Event::AcceptTransaction(AcceptTransactionEvent {
                timestamp: SystemTime::now(),
                origin,
                tx: message_hash,
            }),
        );
        Ok(true)
    }

    fn drop_message(&self, origin: Option<PeerAddress>, kind: &'static str, err: ValidationError) {
        log::warn!("dropping {} from {}: {}", kind, origin.as_ref().map_or("local", PeerAddress::as_str), err);
        Event::publish(
            &self.event_publisher,
            Event::DropMessage(DropMessageEvent {
                timestamp: SystemTime::now(),
                origin,
                kind,
                reason: err.to_string(),
            }),
        );
    }
}

#[derive(Debug, Error)]
enum HandlingError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
}
