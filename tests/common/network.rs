use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use roundbft::{
    block_sync::messages::{SyncPayload, SyncRequest, SyncResponse},
    networking::{messages::Message, Network, NetworkError},
    types::{
        basic::{Address, PeerAddress},
        block::BlockConsensusMessage,
    },
};

/// A mock network stub which passes messages from and to threads using channels. Messages travel
/// JSON-encoded, as they would on a real wire.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    me: PeerAddress,
    all_peers: HashMap<PeerAddress, Sender<(PeerAddress, Vec<u8>)>>,
    inbox: Arc<Mutex<Receiver<(PeerAddress, Vec<u8>)>>>,
}

impl NetworkStub {
    pub(crate) fn address(&self) -> PeerAddress {
        self.me.clone()
    }

    /// Discard everything delivered to this stub so far.
    pub(crate) fn drain(&self) {
        let inbox = self.inbox.lock().unwrap();
        while inbox.try_recv().is_ok() {}
    }
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: Message) -> Result<(), NetworkError> {
        let bytes = message.to_json()?;
        for (peer, sender) in &self.all_peers {
            if peer != &self.me {
                let _ = sender.send((self.me.clone(), bytes.clone()));
            }
        }
        Ok(())
    }

    fn send(&mut self, peer: &PeerAddress, message: Message) -> Result<(), NetworkError> {
        match self.all_peers.get(peer) {
            Some(sender) => {
                let _ = sender.send((self.me.clone(), message.to_json()?));
                Ok(())
            }
            None => Err(NetworkError::Unreachable(peer.clone())),
        }
    }

    fn connected_peers(&mut self, blacklist: &[PeerAddress]) -> Result<Vec<PeerAddress>, NetworkError> {
        Ok(self
            .all_peers
            .keys()
            .filter(|peer| *peer != &self.me && !blacklist.contains(peer))
            .cloned()
            .collect())
    }

    fn recv(&mut self) -> Option<(PeerAddress, Message)> {
        let inbox = self.inbox.lock().unwrap();
        loop {
            match inbox.try_recv() {
                Ok((origin, bytes)) => match Message::from_json(&bytes) {
                    Ok(message) => return Some((origin, message)),
                    Err(err) => log::warn!("undecodable message from {}: {}", origin, err),
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = Address>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(PeerAddress, Receiver<(PeerAddress, Vec<u8>)>)> = peers
        .map(|address| {
            let peer = PeerAddress::new(address.as_str());
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer.clone(), sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(me, inbox)| NetworkStub {
            me,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}

/// A network whose peers answer every sync request from a script, synchronously. Everything else it
/// is asked to send is recorded and goes nowhere.
#[derive(Clone)]
pub(crate) struct ScriptedNetwork {
    peers: Vec<PeerAddress>,
    answers: HashMap<PeerAddress, SyncPayload>,
    links: HashMap<String, Vec<BlockConsensusMessage>>,
    requests: Arc<Mutex<Vec<(PeerAddress, SyncRequest)>>>,
    broadcasts: Arc<Mutex<Vec<Message>>>,
    responses: Sender<(PeerAddress, SyncResponse)>,
}

impl ScriptedNetwork {
    /// A network with no peers. Sync responses go to `responses`.
    pub(crate) fn new(responses: Sender<(PeerAddress, SyncResponse)>) -> ScriptedNetwork {
        ScriptedNetwork {
            peers: Vec::new(),
            answers: HashMap::new(),
            links: HashMap::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
            broadcasts: Arc::new(Mutex::new(Vec::new())),
            responses,
        }
    }

    /// Add a connected peer that answers every sync request with `payload`.
    pub(crate) fn with_peer(mut self, peer: &str, payload: SyncPayload) -> ScriptedNetwork {
        let peer = PeerAddress::new(peer);
        self.peers.push(peer.clone());
        self.answers.insert(peer, payload);
        self
    }

    /// Add a connected peer that never answers.
    pub(crate) fn with_silent_peer(mut self, peer: &str) -> ScriptedNetwork {
        self.peers.push(PeerAddress::new(peer));
        self
    }

    pub(crate) fn with_link(mut self, link: &str, blocks: Vec<BlockConsensusMessage>) -> ScriptedNetwork {
        self.links.insert(link.to_string(), blocks);
        self
    }

    pub(crate) fn requests(&self) -> Vec<(PeerAddress, SyncRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn broadcasts(&self) -> Vec<Message> {
        self.broadcasts.lock().unwrap().clone()
    }
}

impl Network for ScriptedNetwork {
    fn broadcast(&mut self, message: Message) -> Result<(), NetworkError> {
        self.broadcasts.lock().unwrap().push(message);
        Ok(())
    }

    fn send(&mut self, peer: &PeerAddress, message: Message) -> Result<(), NetworkError> {
        if let Message::SyncRequest(request) = message {
            self.requests.lock().unwrap().push((peer.clone(), request.clone()));
            if let Some(payload) = self.answers.get(peer) {
                let response = SyncResponse {
                    from: request.from,
                    to: request.to,
                    payload: payload.clone(),
                };
                let _ = self.responses.send((peer.clone(), response));
            }
        }
        Ok(())
    }

    fn connected_peers(&mut self, blacklist: &[PeerAddress]) -> Result<Vec<PeerAddress>, NetworkError> {
        Ok(self
            .peers
            .iter()
            .filter(|peer| !blacklist.contains(peer))
            .cloned()
            .collect())
    }

    fn recv(&mut self) -> Option<(PeerAddress, Message)> {
        None
    }

    fn fetch_blocks(&mut self, link: &str) -> Result<Vec<BlockConsensusMessage>, NetworkError> {
        self.links
            .get(link)
            .cloned()
            .ok_or_else(|| NetworkError::UnsupportedLink(link.to_string()))
    }
}
