/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable persistence for chain state.
//!
//! Library users supply a [`DocumentStore`]; the node reads and writes it through the typed
//! [`ChainStore`]. [`MemStore`] is a ready-made in-memory implementation.

pub mod chain_store;

pub mod mem_store;

pub mod pluggables;

pub use chain_store::{ChainStore, NodeParameters};

pub use mem_store::MemStore;

pub use pluggables::{
    parse_storage_response, Collection, Condition, DocumentStore, Filter, GetOptions, SortOrder,
    StorageError, Update,
};
