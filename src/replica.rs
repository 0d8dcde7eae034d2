/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a validator node.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica's threads alive.
//!
//! ## Threads
//!
//! A running replica owns five threads:
//! 1. The poller, which drains the [`Network`] and routes each message to the thread that handles it.
//! 2. The [listener](crate::listener), which validates peer messages, fills the message pools and
//!    resolves block consensus messages.
//! 3. The [round engine](crate::rounds::engine), which proposes, tallies and finalizes one height at a
//!    time.
//! 4. The [block sync server](crate::block_sync::server), which answers peers' sync requests.
//! 5. The [event bus](crate::event_bus), if any event handler is registered.
//!
//! The threads share no memory. They talk through channels and through the [`DocumentStore`].
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .store(store)
//!     .network(network)
//!     .configuration(configuration)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//! - `.store(...)`
//! - `.network(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! One per event type in [crate::events], e.g. `.on_commit_block(...)` or `.on_drop_message(...)`.
//!
//! The [configuration](Configuration) can be built with the builder pattern too, or read from the node's
//! JSON settings through [`NodeSettings`]:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .trusted_validators(trusted)
//!     .validators(roster)
//!     .round_delay(Duration::from_millis(500))
//!     .sync_response_timeout(Duration::from_secs(3))
//!     .initial_block_consensus_timeout(Duration::from_secs(10))
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    sync::mpsc::{self, Sender},
    thread::JoinHandle,
    time::Duration,
};

use ed25519_dalek::SigningKey;
use serde::Deserialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    block_resolver::BlockResolver,
    block_sync::{
        client::{BlockSyncClientConfiguration, ChainSync},
        server::BlockSyncServer,
    },
    event_bus::{start_event_bus, EventHandlers, HandlerPtr},
    events::*,
    listener::{Listener, ListenerInput, SubmitError},
    networking::{receiving::start_polling, sending::SenderHandle, Network},
    rounds::engine::{RoundEngine, RoundEngineConfiguration},
    storage::{ChainStore, DocumentStore, NodeParameters, StorageError},
    types::{
        basic::{Address, PeerAddress},
        crypto_primitives::Keypair,
        transaction::Tx,
        validators::ValidatorSet,
    },
    validation::MessageValidator,
};

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("malformed node settings: {0}")]
    MalformedSettings(#[from] serde_json::Error),
    #[error("no trusted validators are configured")]
    NoTrustedValidators,
    #[error("the delay between rounds must be positive")]
    ZeroRoundDelay,
    #[error("the validator roster is empty in both the configuration and the node parameters")]
    EmptyRoster,
    #[error("cannot bootstrap the validator roster: {0}")]
    Storage(#[from] StorageError),
}

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [keypair](ed25519_dalek::SigningKey).
/// 2. The trusted validators, whose blocks and round votes are accepted.
/// 3. The validator roster, whose size sets the vote thresholds. It may be left empty when the node
///    parameters in storage already hold one.
/// 4. The delay between two rounds, which gives peers time to exchange consensus messages.
/// 5. How long to wait for each peer's sync response.
/// 6. How long a freshly started replica waits for a peer's block consensus message before working on
///    its first height, unless initialization is skipped.
/// 7. Peers never asked for blocks when syncing.
/// 8. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// The crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.trusted_validators(...)`
    - `.round_delay(...)`
    - `.sync_response_timeout(...)`
    - `.initial_block_consensus_timeout(...)`
    - `.log_events(...)`

    Optional:
    - `.validators(...)`
    - `.skip_initialization(...)`
    - `.peer_blacklist(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign messages. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the validators whose blocks and votes are accepted. Required."))]
    pub trusted_validators: Vec<Address>,
    #[builder(default, setter(doc = "Set the validator roster. Optional if the node parameters already hold one."))]
    pub validators: Vec<Address>,
    #[builder(setter(doc = "Set the delay between two rounds. Required."))]
    pub round_delay: Duration,
    #[builder(setter(doc = "Set the timeout for receiving a sync response from a peer. Required."))]
    pub sync_response_timeout: Duration,
    #[builder(setter(doc = "Set how long to wait for a peer's block before working on the first height. Required."))]
    pub initial_block_consensus_timeout: Duration,
    #[builder(default, setter(doc = "Start working on the first height immediately. Optional."))]
    pub skip_initialization: bool,
    #[builder(default, setter(doc = "Set the peers never asked for blocks. Optional."))]
    pub peer_blacklist: Vec<PeerAddress>,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl Configuration {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.trusted_validators.is_empty() {
            return Err(ConfigurationError::NoTrustedValidators);
        }
        if self.round_delay.is_zero() {
            return Err(ConfigurationError::ZeroRoundDelay);
        }
        Ok(())
    }
}

const DEFAULT_SYNC_RESPONSE_TIMEOUT_MS: u64 = 3000;

fn default_sync_response_timeout_ms() -> u64 {
    DEFAULT_SYNC_RESPONSE_TIMEOUT_MS
}

/// The node's JSON settings file.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeSettings {
    pub trusted_validators: Vec<Address>,
    #[serde(default)]
    pub validators: Vec<Address>,
    /// Seconds between two rounds.
    pub sleep: u64,
    #[serde(default = "default_sync_response_timeout_ms")]
    pub sync_response_timeout_ms: u64,
    pub initial_block_consensus_timeout_sec: u64,
    #[serde(default)]
    pub skip_initialization: bool,
    #[serde(default)]
    pub peer_blacklist: Vec<PeerAddress>,
    #[serde(default)]
    pub log_events: bool,
}

impl NodeSettings {
    pub fn from_json_str(json: &str) -> Result<NodeSettings, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn into_configuration(self, me: SigningKey) -> Result<Configuration, ConfigurationError> {
        let configuration = Configuration::builder()
            .me(me)
            .trusted_validators(self.trusted_validators)
            .validators(self.validators)
            .round_delay(Duration::from_secs(self.sleep))
            .sync_response_timeout(Duration::from_millis(self.sync_response_timeout_ms))
            .initial_block_consensus_timeout(Duration::from_secs(self.initial_block_consensus_timeout_sec))
            .skip_initialization(self.skip_initialization)
            .peer_blacklist(self.peer_blacklist)
            .log_events(self.log_events)
            .build();
        configuration.validate()?;
        Ok(configuration)
    }
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.store(...)`
    - `.network(...)`
    - `.configuration(...)`

    Optional: one `.on_*(...)` handler setter per event type.
"))]
pub struct ReplicaSpec<S: DocumentStore, N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the document store holding the chain and the pools. The argument must implement the [DocumentStore] trait. Required."))]
    store: S,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network] trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&AcceptTransactionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AcceptTransactionEvent>),
    doc = "Register a handler closure to be invoked after a transaction enters the message pool. Optional."))]
    on_accept_transaction: Option<HandlerPtr<AcceptTransactionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InsertCandidateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertCandidateEvent>),
    doc = "Register a handler closure to be invoked after a new block candidate is stored. Optional."))]
    on_insert_candidate: Option<HandlerPtr<InsertCandidateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BroadcastConsensusEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BroadcastConsensusEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a consensus message. Optional."))]
    on_broadcast_consensus: Option<HandlerPtr<BroadcastConsensusEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeBlockEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts its block for a height. Optional."))]
    on_propose_block: Option<HandlerPtr<ProposeBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveConsensusEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveConsensusEvent>),
    doc = "Register a handler closure to be invoked after a peer's consensus message is pooled. Optional."))]
    on_receive_consensus: Option<HandlerPtr<ReceiveConsensusEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DropMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DropMessageEvent>),
    doc = "Register a handler closure to be invoked after an invalid message is dropped. Optional."))]
    on_drop_message: Option<HandlerPtr<DropMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartHeightEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartHeightEvent>),
    doc = "Register a handler closure to be invoked after the replica starts working on a height. Optional."))]
    on_start_height: Option<HandlerPtr<StartHeightEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a round. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica starts syncing. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica finishes syncing. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveSyncRequestEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a sync request from a peer. Optional."))]
    on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendSyncResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendSyncResponseEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a sync response to a peer. Optional."))]
    on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,
}

impl<S: DocumentStore, N: Network + 'static> ReplicaSpec<S, N> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct. Refuses to start with an incomplete configuration.
    pub fn start(self) -> Result<Replica<S, N>, ConfigurationError> {
        let configuration = self.configuration;
        configuration.validate()?;

        let keypair = Keypair::new(configuration.me.clone());
        let mut store = ChainStore::new(self.store);
        let roster = bootstrap_roster(&mut store, &configuration.validators)?;
        let validator_set = ValidatorSet::new(configuration.trusted_validators.clone(), roster);
        log::info!(
            "starting {} with {} validators, {} trusted",
            keypair.address(),
            validator_set.len(),
            validator_set.trusted().len()
        );

        let mut event_handlers = EventHandlers::default();
        if configuration.log_events {
            event_handlers.add_loggers();
        }
        event_handlers.accept_transaction_handlers.extend(self.on_accept_transaction);
        event_handlers.insert_candidate_handlers.extend(self.on_insert_candidate);
        event_handlers.commit_block_handlers.extend(self.on_commit_block);
        event_handlers.broadcast_consensus_handlers.extend(self.on_broadcast_consensus);
        event_handlers.propose_block_handlers.extend(self.on_propose_block);
        event_handlers.receive_consensus_handlers.extend(self.on_receive_consensus);
        event_handlers.drop_message_handlers.extend(self.on_drop_message);
        event_handlers.start_height_handlers.extend(self.on_start_height);
        event_handlers.start_round_handlers.extend(self.on_start_round);
        event_handlers.start_sync_handlers.extend(self.on_start_sync);
        event_handlers.end_sync_handlers.extend(self.on_end_sync);
        event_handlers.receive_sync_request_handlers.extend(self.on_receive_sync_request);
        event_handlers.send_sync_response_handlers.extend(self.on_send_sync_response);

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (listener_input, listener_inputs) = mpsc::channel();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, sync_requests, sync_responses) =
            start_polling(self.network.clone(), listener_input.clone(), poller_shutdown_receiver);

        let (block_sync_server_shutdown, block_sync_server_shutdown_receiver) = mpsc::channel();
        let block_sync_server = BlockSyncServer::new(
            store.clone(),
            sync_requests,
            self.network.clone(),
            block_sync_server_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        // Depth-1 signals: one pending restart or initial block covers any number of triggers.
        let (restart_sender, restart_receiver) = mpsc::sync_channel(1);
        let (initial_block_sender, initial_block_receiver) = mpsc::sync_channel(1);

        let chain_sync = ChainSync::new(
            BlockSyncClientConfiguration {
                me: keypair.address(),
                response_timeout: configuration.sync_response_timeout,
                peer_blacklist: configuration.peer_blacklist.clone(),
            },
            store.clone(),
            self.network.clone(),
            sync_responses,
            validator_set.clone(),
            event_publisher.clone(),
        );
        let resolver = BlockResolver::new(
            store.clone(),
            validator_set.clone(),
            chain_sync,
            Some(restart_sender),
            event_publisher.clone(),
        );

        let (listener_shutdown, listener_shutdown_receiver) = mpsc::channel();
        let listener = Listener::new(
            store.clone(),
            MessageValidator::new(validator_set.clone()),
            resolver,
            listener_inputs,
            initial_block_sender,
            listener_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (engine_shutdown, engine_shutdown_receiver) = mpsc::channel();
        let engine = RoundEngine::new(
            RoundEngineConfiguration {
                round_delay: configuration.round_delay,
                initial_block_consensus_timeout: configuration.initial_block_consensus_timeout,
                skip_initialization: configuration.skip_initialization,
            },
            keypair.clone(),
            validator_set,
            store.clone(),
            self.network.clone(),
            listener_input.clone(),
            restart_receiver,
            initial_block_receiver,
            engine_shutdown_receiver,
            event_publisher,
        )
        .start();

        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus_shutdown), Some(event_bus))
            }
            None => (None, None),
        };

        Ok(Replica {
            keypair,
            store,
            network: self.network,
            listener_input,
            poller: Some(poller),
            poller_shutdown,
            listener: Some(listener),
            listener_shutdown,
            engine: Some(engine),
            engine_shutdown,
            block_sync_server: Some(block_sync_server),
            block_sync_server_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// The roster persisted in the node parameters, seeded from `configured` when there is none yet.
fn bootstrap_roster<S: DocumentStore>(
    store: &mut ChainStore<S>,
    configured: &[Address],
) -> Result<Vec<Address>, ConfigurationError> {
    let roster = match store.parameters()? {
        None => {
            store.put_parameters(&NodeParameters {
                validators: configured.to_vec(),
                ..NodeParameters::default()
            })?;
            configured.to_vec()
        }
        Some(mut parameters) if parameters.validators.is_empty() => {
            parameters.validators = configured.to_vec();
            store.put_parameters(&parameters)?;
            configured.to_vec()
        }
        Some(parameters) => parameters.validators,
    };

    if roster.is_empty() {
        return Err(ConfigurationError::EmptyRoster);
    }
    Ok(roster)
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica<S: DocumentStore, N: Network + 'static> {
    keypair: Keypair,
    store: ChainStore<S>,
    network: N,
    listener_input: Sender<ListenerInput>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    listener: Option<JoinHandle<()>>,
    listener_shutdown: Sender<()>,
    engine: Option<JoinHandle<()>>,
    engine_shutdown: Sender<()>,
    block_sync_server: Option<JoinHandle<()>>,
    block_sync_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<S: DocumentStore, N: Network + 'static> Replica<S, N> {
    /// Sign `payload` as a transaction from this replica, queue it in the local message pool and
    /// broadcast it. Blocks until the pool holds it.
    pub fn submit_transaction(&self, payload: Vec<u8>) -> Result<Tx, SubmitError> {
        let tx = Tx::new_signed(&self.keypair, payload);
        self.submit(tx.clone())?;
        SenderHandle::new(self.network.clone()).broadcast(tx.clone())?;
        Ok(tx)
    }

    /// Queue a transaction signed elsewhere in the local message pool, without broadcasting it. Blocks
    /// until the pool holds it or it is rejected.
    pub fn submit(&self, tx: Tx) -> Result<(), SubmitError> {
        let (ack, acknowledgement) = mpsc::sync_channel(1);
        self.listener_input
            .send(ListenerInput::SubmitTransaction { tx, ack })
            .map_err(|_| SubmitError::ListenerStopped)?;
        acknowledgement.recv().map_err(|_| SubmitError::ListenerStopped)?
    }

    /// Read access to the committed chain, the candidates and the pools.
    pub fn chain_store(&self) -> &ChainStore<S> {
        &self.store
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }
}

impl<S: DocumentStore, N: Network + 'static> Drop for Replica<S, N> {
    fn drop(&mut self) {
        // The order matters: the engine waits on the listener, the listener and the sync server read
        // what the poller routes to them, and every thread publishes to the event bus.
        shut_down("round engine", &self.engine_shutdown, &mut self.engine);
        shut_down("listener", &self.listener_shutdown, &mut self.listener);
        shut_down("block sync server", &self.block_sync_server_shutdown, &mut self.block_sync_server);
        shut_down("poller", &self.poller_shutdown, &mut self.poller);
        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            shut_down("event bus", event_bus_shutdown, &mut self.event_bus);
        }
    }
}

fn shut_down(name: &str, shutdown: &Sender<()>, thread: &mut Option<JoinHandle<()>>) {
    // The thread may already have stopped on its own.
    let _ = shutdown.send(());
    if let Some(thread) = thread.take() {
        if thread.join().is_err() {
            log::error!("the {} thread panicked", name);
        }
    }
}
