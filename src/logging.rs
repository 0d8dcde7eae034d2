/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::replica::Configuration).
//!
//! The node logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveConsensus](crate::events::ReceiveConsensusEvent) is printed:
//!
//! ```text
//! ReceiveConsensus, 1701329264, peer-2, Id5u7f6, 12, 3, 4
//! ```
//!
//! In the snippet:
//! - The third value is the peer the message came from.
//! - The fourth value is the first seven characters of the sender's address.
//! - The fifth and sixth values are the height and round the ballot is for.
//! - The seventh value is the number of executed hashes the ballot endorses.

use std::time::SystemTime;

use log;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const ACCEPT_TRANSACTION: &str = "AcceptTransaction";
pub const INSERT_CANDIDATE: &str = "InsertCandidate";
pub const COMMIT_BLOCK: &str = "CommitBlock";

pub const BROADCAST_CONSENSUS: &str = "BroadcastConsensus";
pub const PROPOSE_BLOCK: &str = "ProposeBlock";

pub const RECEIVE_CONSENSUS: &str = "ReceiveConsensus";
pub const DROP_MESSAGE: &str = "DropMessage";

pub const START_HEIGHT: &str = "StartHeight";
pub const START_ROUND: &str = "StartRound";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";
pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";
pub const SEND_SYNC_RESPONSE: &str = "SendSyncResponse";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for AcceptTransactionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |accept_transaction_event: &AcceptTransactionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ACCEPT_TRANSACTION,
                secs_since_unix_epoch(accept_transaction_event.timestamp),
                origin_or_local(&accept_transaction_event.origin),
                first_seven_chars(&accept_transaction_event.tx.to_hex())
            )
        };
        Box::new(logger)
    }
}

impl Logger for InsertCandidateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_candidate_event: &InsertCandidateEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                INSERT_CANDIDATE,
                secs_since_unix_epoch(insert_candidate_event.timestamp),
                first_seven_chars(&insert_candidate_event.block.to_hex()),
                insert_candidate_event.height,
                insert_candidate_event.votes
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                first_seven_chars(&commit_block_event.block.to_hex()),
                commit_block_event.height,
                commit_block_event.votes
            )
        };
        Box::new(logger)
    }
}

impl Logger for BroadcastConsensusEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |broadcast_consensus_event: &BroadcastConsensusEvent| {
            let message = &broadcast_consensus_event.message;
            log::info!(
                "{}, {}, {}, {}, {}",
                BROADCAST_CONSENSUS,
                secs_since_unix_epoch(broadcast_consensus_event.timestamp),
                message.block_number,
                message.round,
                message.messages.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_block_event: &ProposeBlockEvent| {
            let block = &propose_block_event.block;
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE_BLOCK,
                secs_since_unix_epoch(propose_block_event.timestamp),
                first_seven_chars(&block.block_hash.to_hex()),
                block.height(),
                block.block.messages.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveConsensusEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_consensus_event: &ReceiveConsensusEvent| {
            let message = &receive_consensus_event.message;
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_CONSENSUS,
                secs_since_unix_epoch(receive_consensus_event.timestamp),
                receive_consensus_event.origin,
                first_seven_chars(message.sender_address.as_str()),
                message.block_number,
                message.round,
                message.messages.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for DropMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |drop_message_event: &DropMessageEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}",
                DROP_MESSAGE,
                secs_since_unix_epoch(drop_message_event.timestamp),
                origin_or_local(&drop_message_event.origin),
                drop_message_event.kind,
                drop_message_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartHeightEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_height_event: &StartHeightEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_HEIGHT,
                secs_since_unix_epoch(start_height_event.timestamp),
                start_height_event.height,
                first_seven_chars(&start_height_event.previous_block_hash.to_hex())
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.height,
                start_round_event.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_sync_event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(start_sync_event.timestamp),
                start_sync_event.from,
                start_sync_event.to,
                start_sync_event.peers
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_sync_event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(end_sync_event.timestamp),
                end_sync_event.resolved.len(),
                end_sync_event.unresolved.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_sync_request_event: &ReceiveSyncRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_SYNC_REQUEST,
                secs_since_unix_epoch(receive_sync_request_event.timestamp),
                receive_sync_request_event.peer,
                receive_sync_request_event.from,
                receive_sync_request_event.to
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendSyncResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_sync_response_event: &SendSyncResponseEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SEND_SYNC_RESPONSE,
                secs_since_unix_epoch(send_sync_response_event.timestamp),
                send_sync_response_event.peer,
                send_sync_response_event.blocks
            )
        };
        Box::new(logger)
    }
}

fn first_seven_chars(string: &str) -> &str {
    string.get(0..7).unwrap_or(string)
}

fn origin_or_local(origin: &Option<crate::types::basic::PeerAddress>) -> String {
    origin
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| String::from("local"))
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
