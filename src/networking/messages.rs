/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumeration of every message variant exchanged between nodes.
//!
//! On the wire every message is a JSON object whose `type` field names the variant:
//!
//! | `type`           | payload                     |
//! |------------------|-----------------------------|
//! | `consensus`      | [`ConsensusMessage`]        |
//! | `blockConsensus` | [`BlockConsensusMessage`]   |
//! | `message`        | [`Tx`]                      |
//! | `sync_request`   | [`SyncRequest`]             |
//! | `sync_response`  | [`SyncResponse`]            |

use serde::{Deserialize, Serialize};

use crate::{
    block_sync::messages::{SyncRequest, SyncResponse},
    types::{block::BlockConsensusMessage, consensus::ConsensusMessage, transaction::Tx},
};

use super::network::NetworkError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "consensus")]
    Consensus(ConsensusMessage),
    #[serde(rename = "blockConsensus")]
    BlockConsensus(BlockConsensusMessage),
    #[serde(rename = "message")]
    Transaction(Tx),
    #[serde(rename = "sync_request")]
    SyncRequest(SyncRequest),
    #[serde(rename = "sync_response")]
    SyncResponse(SyncResponse),
}

impl Message {
    /// The `type` tag of this variant on the wire.
    pub const fn kind(&self) -> &'static str {
        match self {
            Message::Consensus(_) => "consensus",
            Message::BlockConsensus(_) => "blockConsensus",
            Message::Transaction(_) => "message",
            Message::SyncRequest(_) => "sync_request",
            Message::SyncResponse(_) => "sync_response",
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, NetworkError> {
        serde_json::to_vec(self).map_err(NetworkError::Encode)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Message, NetworkError> {
        serde_json::from_slice(bytes).map_err(NetworkError::Decode)
    }
}

impl From<ConsensusMessage> for Message {
    fn from(value: ConsensusMessage) -> Self {
        Message::Consensus(value)
    }
}

impl From<BlockConsensusMessage> for Message {
    fn from(value: BlockConsensusMessage) -> Self {
        Message::BlockConsensus(value)
    }
}

impl From<Tx> for Message {
    fn from(value: Tx) -> Self {
        Message::Transaction(value)
    }
}

impl From<SyncRequest> for Message {
    fn from(value: SyncRequest) -> Self {
        Message::SyncRequest(value)
    }
}

impl From<SyncResponse> for Message {
    fn from(value: SyncResponse) -> Self {
        Message::SyncResponse(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{
        basic::{Address, BlockHeight},
        crypto_primitives::Keypair,
    };

    use super::*;

    #[test]
    fn wire_tag_names_the_variant() {
        let request = Message::from(SyncRequest {
            from: BlockHeight::new(5),
            to: BlockHeight::new(9),
            requester_address: Address::new("me"),
        });
        let json: serde_json::Value = serde_json::from_slice(&request.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "sync_request");
        assert_eq!(json["from"], 5);

        let tx = Message::from(Tx::new_signed(&Keypair::generate(), b"p".to_vec()));
        let decoded = Message::from_json(&tx.to_json().unwrap()).unwrap();
        assert_eq!(decoded.kind(), "message");
        assert_eq!(decoded, tx);
    }

    #[test]
    fn unknown_tag_fails_to_decode() {
        assert!(matches!(
            Message::from_json(br#"{"type":"gossip"}"#),
            Err(NetworkError::Decode(_))
        ));
    }
}
