/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types shared by every component of the node: identifiers, transactions, ballots, blocks and the
//! validator set.

pub mod base64url;

pub mod basic;

pub mod block;

pub mod consensus;

pub mod crypto_primitives;

pub mod signed_messages;

pub mod transaction;

pub mod validators;
