/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A validator node for a small-quorum Byzantine fault tolerant blockchain.
//!
//! Validators pool signed transactions, endorse them over a fixed number of voting rounds, and commit
//! a block once enough trusted validators have signed the same one. A node that falls behind catches
//! up by asking its peers for the blocks it missed.
//!
//! The library user provides the peer-to-peer transport by implementing [`Network`](networking::Network)
//! and the persistence by implementing [`DocumentStore`](storage::DocumentStore) (or by using
//! [`MemStore`](storage::MemStore)), then starts a node with
//! [`ReplicaSpec`](replica::ReplicaSpec).

pub mod types;

pub mod storage;

pub mod networking;

pub mod validation;

pub mod vote_ledger;

pub mod block_resolver;

pub mod block_sync;

pub mod rounds;

pub(crate) mod listener;
pub use listener::SubmitError;

pub mod events;

pub(crate) mod event_bus;

pub(crate) mod logging;

pub mod replica;
