/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The round engine thread, which drives a validator from its last committed block to the next one.
//!
//! The engine works on one height at a time and executes one [`RoundState`] per step:
//! 1. **LoadHead**: read the highest committed block. On an empty chain the target is the height of the
//!    genesis block with the genesis hash as its predecessor; otherwise the target is the height after
//!    the tip.
//! 2. **Round 0**: execute every pool transaction that has no round-0 vote yet and announce the executed
//!    hashes in a round-1 [`ConsensusMessage`].
//! 3. **Round r** (1 to 6): count the round-`r` endorsements in the consensus pool sent by trusted
//!    validators, select the transactions at or above the round threshold, and announce them for round
//!    `r + 1` unless `r` is the last round. An empty pool for the round finalizes early.
//! 4. **Finalize**: build a block from the last selection, hand it to the listener for resolution,
//!    point the included transactions at it, reset the votes of everything left out, and broadcast it.
//!
//! A node outside the trusted validator set still walks through the states, but never signs or
//! broadcasts anything: its chain grows only through the blocks its peers commit.
//!
//! The engine sleeps for the round delay after every round and after every failure, and checks the
//! restart signal before every step except LoadHead. A restart signalled during the sleep cuts it short. Any error abandons the height and starts over from
//! LoadHead, re-deriving everything from storage.

use std::{
    collections::BTreeMap,
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use thiserror::Error;

use crate::{
    block_resolver::{Resolution, ResolverError},
    events::{BroadcastConsensusEvent, Event, ProposeBlockEvent, StartHeightEvent, StartRoundEvent},
    listener::ListenerInput,
    networking::{sending::SenderHandle, Network, NetworkError},
    storage::{ChainStore, DocumentStore, StorageError},
    types::{
        basic::{Address, BlockHeight, CryptoHash, Round},
        block::{Block, BlockConsensusMessage},
        consensus::ConsensusMessage,
        crypto_primitives::Keypair,
        transaction::{TransactionMessage, Tx},
        validators::ValidatorSet,
    },
    vote_ledger::{LedgerError, VoteLedger},
};

use super::state::{transition, RoundState, StepOutcome};

/// Granularity of the engine's waits.
const WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum RoundError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error("the listener has stopped")]
    ListenerStopped,
    #[error("no head has been loaded for the current height")]
    HeadNotLoaded,
}

#[derive(Clone, Debug)]
pub(crate) struct RoundEngineConfiguration {
    pub(crate) round_delay: Duration,
    pub(crate) initial_block_consensus_timeout: Duration,
    pub(crate) skip_initialization: bool,
}

/// The height being worked on and the hash of the block it extends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadState {
    pub target: BlockHeight,
    pub previous_hash: CryptoHash,
}

pub(crate) struct RoundEngine<S: DocumentStore, N: Network + 'static> {
    config: RoundEngineConfiguration,
    keypair: Keypair,
    me: Address,
    validator_set: ValidatorSet,
    store: ChainStore<S>,
    ledger: VoteLedger<S>,
    sender: SenderHandle<N>,
    to_listener: Sender<ListenerInput>,
    restart_signal: Receiver<()>,
    initial_block_signal: Receiver<()>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    state: RoundState,
    head: Option<HeadState>,
    selected: Vec<TransactionMessage>,
    restart_pending: bool,
}

impl<S: DocumentStore, N: Network + 'static> RoundEngine<S, N> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: RoundEngineConfiguration,
        keypair: Keypair,
        validator_set: ValidatorSet,
        store: ChainStore<S>,
        network: N,
        to_listener: Sender<ListenerInput>,
        restart_signal: Receiver<()>,
        initial_block_signal: Receiver<()>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let ledger = VoteLedger::new(store.clone(), validator_set.clone(), keypair.address());
        Self {
            config,
            me: keypair.address(),
            keypair,
            validator_set,
            store,
            ledger,
            sender: SenderHandle::new(network),
            to_listener,
            restart_signal,
            initial_block_signal,
            shutdown_signal,
            event_publisher,
            state: RoundState::LoadHead,
            head: None,
            selected: Vec::new(),
            restart_pending: false,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            if !self.wait_for_initial_block() {
                return;
            }

            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => return,
                    Err(TryRecvError::Empty) => (),
                }

                if self.state != RoundState::LoadHead && self.restart_requested() {
                    log::debug!("restarting from {:?}, the committed chain moved", self.state);
                    self.state = transition(self.state, StepOutcome::Restart);
                    continue;
                }

                let outcome = match self.step() {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        log::error!("abandoning height at {:?}: {}", self.state, err);
                        StepOutcome::Failed
                    }
                };
                let was_round = matches!(self.state, RoundState::Round(_));
                self.state = transition(self.state, outcome);

                if was_round || outcome == StepOutcome::Failed {
                    match wait_between_rounds(self.config.round_delay, &self.shutdown_signal, &self.restart_signal) {
                        Wake::Elapsed => (),
                        Wake::Restart => self.restart_pending = true,
                        Wake::Shutdown => return,
                    }
                }
            }
        })
    }

    /// Wait until a peer's block consensus message is observed or the initial timeout passes. Returns
    /// `false` if shutdown was signalled meanwhile.
    fn wait_for_initial_block(&mut self) -> bool {
        if self.config.skip_initialization {
            return true;
        }
        let deadline = Instant::now() + self.config.initial_block_consensus_timeout;
        while Instant::now() < deadline {
            match self.initial_block_signal.try_recv() {
                Ok(()) => {
                    log::debug!("observed a block consensus message before the initial timeout");
                    return true;
                }
                Err(TryRecvError::Disconnected) => return true,
                Err(TryRecvError::Empty) => (),
            }
            if !self.pause(WAIT_SLICE) {
                return false;
            }
        }
        true
    }

    /// Sleep for `duration` unless shutdown is signalled first. Returns whether to keep running.
    fn pause(&self, duration: Duration) -> bool {
        match self.shutdown_signal.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => true,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn is_validator(&self) -> bool {
        self.validator_set.is_trusted(&self.me)
    }

    fn restart_requested(&mut self) -> bool {
        std::mem::take(&mut self.restart_pending) || self.restart_signal.try_recv().is_ok()
    }

    fn step(&mut self) -> Result<StepOutcome, RoundError> {
        match self.state {
            RoundState::LoadHead => self.load_head(),
            RoundState::Round(round) => {
                let head = self.head()?;
                Event::publish(
                    &self.event_publisher,
                    Event::StartRound(StartRoundEvent {
                        timestamp: SystemTime::now(),
                        height: head.target,
                        round,
                    }),
                );
                if round.int() == 0 {
                    self.propose(&head)
                } else {
                    self.tally(&head, round)
                }
            }
            RoundState::Finalize => {
                let head = self.head()?;
                self.finalize(&head)
            }
        }
    }

    fn head(&self) -> Result<HeadState, RoundError> {
        self.head.clone().ok_or(RoundError::HeadNotLoaded)
    }

    fn load_head(&mut self) -> Result<StepOutcome, RoundError> {
        // The head read below already reflects whatever a pending restart was about.
        while self.restart_requested() {}

        self.selected.clear();
        let head = match self.store.highest_block()? {
            None => {
                let genesis = Block::genesis(&self.keypair);
                HeadState {
                    target: genesis.number,
                    previous_hash: genesis.block_hash,
                }
            }
            Some(tip) => HeadState {
                target: tip.height() + 1,
                previous_hash: tip.block_hash,
            },
        };

        Event::publish(
            &self.event_publisher,
            Event::StartHeight(StartHeightEvent {
                timestamp: SystemTime::now(),
                height: head.target,
                previous_block_hash: head.previous_hash,
            }),
        );
        self.head = Some(head);
        Ok(StepOutcome::HeadLoaded)
    }

    fn propose(&mut self, head: &HeadState) -> Result<StepOutcome, RoundError> {
        if !self.is_validator() {
            return Ok(StepOutcome::RoundCompleted);
        }

        let mut executed = Vec::new();
        for transaction in self.ledger.zero_vote_candidates()? {
            let message_hash = transaction.message_hash;
            match self.ledger.execute(transaction) {
                Ok(transaction) => executed.extend(transaction.executed_hash),
                Err(err) => log::warn!("leaving {} out of this height: {}", message_hash, err),
            }
        }

        self.announce(head, Round::new(1), executed)?;
        Ok(StepOutcome::RoundCompleted)
    }

    fn tally(&mut self, head: &HeadState, round: Round) -> Result<StepOutcome, RoundError> {
        let messages = self.store.consensus_messages(round, head.target)?;
        if messages.is_empty() {
            return Ok(StepOutcome::NoConsensusMessages);
        }

        for message in messages {
            if !self.validator_set.is_trusted(&message.sender_address) {
                log::debug!("ignoring round {} votes of untrusted {}", round, message.sender_address);
                continue;
            }
            for executed_hash in &message.messages {
                self.ledger.record_round_vote(executed_hash, round, &message.sender_address)?;
            }
        }

        self.selected = self.ledger.select_above_threshold(round)?;
        if !round.is_last() {
            let endorsed = self
                .selected
                .iter()
                .filter_map(|transaction| transaction.executed_hash)
                .collect();
            self.announce(head, round.next(), endorsed)?;
        }
        Ok(StepOutcome::RoundCompleted)
    }

    /// Sign, store and broadcast a consensus message endorsing `executed_hashes` for `round`.
    fn announce(&mut self, head: &HeadState, round: Round, executed_hashes: Vec<CryptoHash>) -> Result<(), RoundError> {
        if !self.is_validator() {
            return Ok(());
        }
        let message = ConsensusMessage::new(&self.keypair, head.target, round, executed_hashes);
        self.store.put_consensus_message(&message)?;
        self.sender.broadcast(message.clone())?;
        Event::publish(
            &self.event_publisher,
            Event::BroadcastConsensus(BroadcastConsensusEvent {
                timestamp: SystemTime::now(),
                message,
            }),
        );
        Ok(())
    }

    fn finalize(&mut self, head: &HeadState) -> Result<StepOutcome, RoundError> {
        if !self.is_validator() {
            return Ok(StepOutcome::Finalized);
        }

        let messages: BTreeMap<CryptoHash, Tx> = self
            .selected
            .iter()
            .map(|transaction| (transaction.message_hash, transaction.tx.clone()))
            .collect();
        let block = Block::new(&self.keypair, head.target, Some(head.previous_hash), messages);
        let candidate = BlockConsensusMessage::new(block.clone());

        let (ack_sender, ack_receiver) = mpsc::sync_channel(1);
        self.to_listener
            .send(ListenerInput::OwnCandidate {
                candidate: candidate.clone(),
                ack: ack_sender,
            })
            .map_err(|_| RoundError::ListenerStopped)?;
        let resolution = ack_receiver.recv().map_err(|_| RoundError::ListenerStopped)??;

        if let Resolution::Stale { height, .. } = resolution {
            log::info!("height {} was decided without block {}", height, block.block_hash);
            return Ok(StepOutcome::Finalized);
        }

        self.ledger.include_in_block(&self.selected, &block)?;
        let reset = self.ledger.reset_unincluded_votes()?;
        log::debug!(
            "proposed {} at height {} with {} transactions, {} left for later",
            block.block_hash,
            head.target,
            block.messages.len(),
            reset
        );

        self.sender.broadcast(candidate.clone())?;
        Event::publish(
            &self.event_publisher,
            Event::ProposeBlock(ProposeBlockEvent {
                timestamp: SystemTime::now(),
                block: candidate,
            }),
        );
        Ok(StepOutcome::Finalized)
    }
}

/// What ended a wait between rounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Wake {
    Elapsed,
    Restart,
    Shutdown,
}

/// Sleep for `duration`, waking early when a restart or shutdown is signalled.
pub(crate) fn wait_between_rounds(duration: Duration, shutdown: &Receiver<()>, restart: &Receiver<()>) -> Wake {
    let deadline = Instant::now() + duration;
    loop {
        if restart.try_recv().is_ok() {
            return Wake::Restart;
        }
        let now = Instant::now();
        if now >= deadline {
            return Wake::Elapsed;
        }
        match shutdown.recv_timeout(WAIT_SLICE.min(deadline - now)) {
            Err(RecvTimeoutError::Timeout) => (),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Wake::Shutdown,
        }
    }
}
