/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.

pub mod network;

pub mod messages;

pub mod receiving;

pub(crate) mod sending;

pub use messages::Message;

pub use network::{Network, NetworkError};
