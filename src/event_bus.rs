/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the other threads of the node
//! and invokes the registered handlers for them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

const IDLE_WAIT: Duration = Duration::from_millis(10);

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) accept_transaction_handlers: Vec<HandlerPtr<AcceptTransactionEvent>>,
    pub(crate) insert_candidate_handlers: Vec<HandlerPtr<InsertCandidateEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) broadcast_consensus_handlers: Vec<HandlerPtr<BroadcastConsensusEvent>>,
    pub(crate) propose_block_handlers: Vec<HandlerPtr<ProposeBlockEvent>>,
    pub(crate) receive_consensus_handlers: Vec<HandlerPtr<ReceiveConsensusEvent>>,
    pub(crate) drop_message_handlers: Vec<HandlerPtr<DropMessageEvent>>,
    pub(crate) start_height_handlers: Vec<HandlerPtr<StartHeightEvent>>,
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
    pub(crate) receive_sync_request_handlers: Vec<HandlerPtr<ReceiveSyncRequestEvent>>,
    pub(crate) send_sync_response_handlers: Vec<HandlerPtr<SendSyncResponseEvent>>,
}

impl EventHandlers {
    /// Register the default CSV logger for every event type.
    pub(crate) fn add_loggers(&mut self) {
        self.accept_transaction_handlers.push(AcceptTransactionEvent::get_logger());
        self.insert_candidate_handlers.push(InsertCandidateEvent::get_logger());
        self.commit_block_handlers.push(CommitBlockEvent::get_logger());
        self.broadcast_consensus_handlers.push(BroadcastConsensusEvent::get_logger());
        self.propose_block_handlers.push(ProposeBlockEvent::get_logger());
        self.receive_consensus_handlers.push(ReceiveConsensusEvent::get_logger());
        self.drop_message_handlers.push(DropMessageEvent::get_logger());
        self.start_height_handlers.push(StartHeightEvent::get_logger());
        self.start_round_handlers.push(StartRoundEvent::get_logger());
        self.start_sync_handlers.push(StartSyncEvent::get_logger());
        self.end_sync_handlers.push(EndSyncEvent::get_logger());
        self.receive_sync_request_handlers.push(ReceiveSyncRequestEvent::get_logger());
        self.send_sync_response_handlers.push(SendSyncResponseEvent::get_logger());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.accept_transaction_handlers.is_empty()
            && self.insert_candidate_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.broadcast_consensus_handlers.is_empty()
            && self.propose_block_handlers.is_empty()
            && self.receive_consensus_handlers.is_empty()
            && self.drop_message_handlers.is_empty()
            && self.start_height_handlers.is_empty()
            && self.start_round_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
            && self.send_sync_response_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::AcceptTransaction(accept_transaction_event) =>
                self.accept_transaction_handlers.iter().for_each(|handler| handler(&accept_transaction_event)),

            Event::InsertCandidate(insert_candidate_event) =>
                self.insert_candidate_handlers.iter().for_each(|handler| handler(&insert_candidate_event)),

            Event::CommitBlock(commit_block_event) =>
                self.commit_block_handlers.iter().for_each(|handler| handler(&commit_block_event)),

            Event::BroadcastConsensus(broadcast_consensus_event) =>
                self.broadcast_consensus_handlers.iter().for_each(|handler| handler(&broadcast_consensus_event)),

            Event::ProposeBlock(propose_block_event) =>
                self.propose_block_handlers.iter().for_each(|handler| handler(&propose_block_event)),

            Event::ReceiveConsensus(receive_consensus_event) =>
                self.receive_consensus_handlers.iter().for_each(|handler| handler(&receive_consensus_event)),

            Event::DropMessage(drop_message_event) =>
                self.drop_message_handlers.iter().for_each(|handler| handler(&drop_message_event)),

            Event::StartHeight(start_height_event) =>
                self.start_height_handlers.iter().for_each(|handler| handler(&start_height_event)),

            Event::StartRound(start_round_event) =>
                self.start_round_handlers.iter().for_each(|handler| handler(&start_round_event)),

            Event::StartSync(start_sync_event) =>
                self.start_sync_handlers.iter().for_each(|handler| handler(&start_sync_event)),

            Event::EndSync(end_sync_event) =>
                self.end_sync_handlers.iter().for_each(|handler| handler(&end_sync_event)),

            Event::ReceiveSyncRequest(receive_sync_request_event) =>
                self.receive_sync_request_handlers.iter().for_each(|handler| handler(&receive_sync_request_event)),

            Event::SendSyncResponse(send_sync_response_event) =>
                self.send_sync_response_handlers.iter().for_each(|handler| handler(&send_sync_response_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(IDLE_WAIT) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher has shut down; nothing more will arrive.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
