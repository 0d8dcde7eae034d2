/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block sync protocol: a [client](client::ChainSync) that fills gaps in the local chain from
//! connected peers, and a [server](server::BlockSyncServer) that answers peers' requests.

pub mod client;

pub mod messages;

pub(crate) mod server;
