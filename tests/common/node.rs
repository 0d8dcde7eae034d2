use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use ed25519_dalek::SigningKey;
use roundbft::{
    events::{CommitBlockEvent, DropMessageEvent, EndSyncEvent, InsertCandidateEvent, ProposeBlockEvent, StartHeightEvent},
    replica::{Configuration, Replica, ReplicaSpec},
    storage::MemStore,
    types::{
        basic::{Address, BlockHeight, Round},
        block::BlockConsensusMessage,
        crypto_primitives::address_of,
        transaction::Tx,
    },
    SubmitError,
};

use crate::common::network::NetworkStub;

use super::logging::{first_seven_chars, log_with_context};

pub(crate) const ROUND_DELAY: Duration = Duration::from_millis(100);

/// Things the Nodes will have in common:
/// - Trusted validators and roster.
/// - Round delay and sync timeout.
///
/// Things that they will differ in:
/// - Network instance.
/// - Document store.
/// - Keypair.
pub(crate) struct Node {
    address: Address,
    network: NetworkStub,
    commits: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
    syncs: Arc<AtomicUsize>,
    replica: Replica<MemStore, NetworkStub>,
}

impl Node {
    /// Start a node that begins working on its first height immediately.
    pub(crate) fn new(keypair: SigningKey, network: NetworkStub, validators: Vec<Address>) -> Node {
        Node::start(keypair, network, validators, true, Duration::from_secs(10))
    }

    /// Start a node that waits up to `initial_block_consensus_timeout` for a peer's block before
    /// working on its first height.
    pub(crate) fn waiting_for_peers(
        keypair: SigningKey,
        network: NetworkStub,
        validators: Vec<Address>,
        initial_block_consensus_timeout: Duration,
    ) -> Node {
        Node::start(keypair, network, validators, false, initial_block_consensus_timeout)
    }

    fn start(
        keypair: SigningKey,
        network: NetworkStub,
        validators: Vec<Address>,
        skip_initialization: bool,
        initial_block_consensus_timeout: Duration,
    ) -> Node {
        let address = address_of(&keypair.verifying_key());
        let commits = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let syncs = Arc::new(AtomicUsize::new(0));

        let configuration = Configuration::builder()
            .me(keypair)
            .trusted_validators(validators.clone())
            .validators(validators)
            .round_delay(ROUND_DELAY)
            .sync_response_timeout(Duration::from_millis(500))
            .initial_block_consensus_timeout(initial_block_consensus_timeout)
            .skip_initialization(skip_initialization)
            .log_events(false)
            .build();

        let replica = ReplicaSpec::builder()
            .store(MemStore::new())
            .network(network.clone())
            .configuration(configuration)
            .on_insert_candidate(insert_candidate_handler(address.clone()))
            .on_commit_block(commit_block_handler(address.clone(), commits.clone()))
            .on_propose_block(propose_block_handler(address.clone()))
            .on_drop_message(drop_message_handler(address.clone(), dropped.clone()))
            .on_start_height(start_height_handler(address.clone()))
            .on_end_sync(end_sync_handler(address.clone(), syncs.clone()))
            .build()
            .start()
            .unwrap();

        Node {
            address,
            network,
            commits,
            dropped,
            syncs,
            replica,
        }
    }

    pub(crate) fn submit_transaction(&self, payload: &[u8]) -> Tx {
        self.replica.submit_transaction(payload.to_vec()).unwrap()
    }

    pub(crate) fn submit(&self, tx: Tx) -> Result<(), SubmitError> {
        self.replica.submit(tx)
    }

    pub(crate) fn chain_tip(&self) -> BlockHeight {
        self.replica.chain_store().chain_tip().unwrap()
    }

    pub(crate) fn block_at(&self, height: u64) -> Option<BlockConsensusMessage> {
        self.replica.chain_store().block_at(BlockHeight::new(height)).unwrap()
    }

    pub(crate) fn pool_size(&self) -> usize {
        self.replica.chain_store().pool_size().unwrap()
    }

    /// How many consensus messages for `round` at `height` are pooled.
    pub(crate) fn consensus_messages(&self, round: u8, height: u64) -> usize {
        self.replica
            .chain_store()
            .consensus_messages(Round::new(round), BlockHeight::new(height))
            .unwrap()
            .len()
    }

    pub(crate) fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub(crate) fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    pub(crate) fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub(crate) fn address(&self) -> Address {
        self.address.clone()
    }

    pub(crate) fn network(&self) -> NetworkStub {
        self.network.clone()
    }
}

/// Poll `condition` until it holds or `timeout` passes. Returns whether it held.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    condition()
}

fn insert_candidate_handler(address: Address) -> impl Fn(&InsertCandidateEvent) + Send + 'static {
    move |insert_candidate_event| {
        log_with_context(
            Some(&address),
            &format!(
                "Inserted Candidate, block hash: {}, height: {}, votes: {}",
                first_seven_chars(&insert_candidate_event.block.to_hex()),
                insert_candidate_event.height,
                insert_candidate_event.votes
            ),
        );
    }
}

fn commit_block_handler(address: Address, commits: Arc<AtomicUsize>) -> impl Fn(&CommitBlockEvent) + Send + 'static {
    move |commit_block_event: &CommitBlockEvent| {
        commits.fetch_add(1, Ordering::SeqCst);
        log_with_context(
            Some(&address),
            &format!(
                "Committed Block, block hash: {}, height: {}, votes: {}",
                first_seven_chars(&commit_block_event.block.to_hex()),
                commit_block_event.height,
                commit_block_event.votes
            ),
        );
    }
}

fn propose_block_handler(address: Address) -> impl Fn(&ProposeBlockEvent) + Send + 'static {
    move |propose_block_event| {
        log_with_context(
            Some(&address),
            &format!(
                "Proposed Block, block hash: {}, height: {}, transactions: {}",
                first_seven_chars(&propose_block_event.block.block_hash.to_hex()),
                propose_block_event.block.height(),
                propose_block_event.block.block.messages.len()
            ),
        );
    }
}

fn drop_message_handler(address: Address, dropped: Arc<AtomicUsize>) -> impl Fn(&DropMessageEvent) + Send + 'static {
    move |drop_message_event| {
        dropped.fetch_add(1, Ordering::SeqCst);
        log_with_context(
            Some(&address),
            &format!("Dropped {}, reason: {}", drop_message_event.kind, drop_message_event.reason),
        );
    }
}

fn start_height_handler(address: Address) -> impl Fn(&StartHeightEvent) + Send + 'static {
    move |start_height_event| {
        log_with_context(
            Some(&address),
            &format!(
                "Started Height {}, previous block hash: {}",
                start_height_event.height,
                first_seven_chars(&start_height_event.previous_block_hash.to_hex())
            ),
        );
    }
}

fn end_sync_handler(address: Address, syncs: Arc<AtomicUsize>) -> impl Fn(&EndSyncEvent) + Send + 'static {
    move |end_sync_event| {
        syncs.fetch_add(1, Ordering::SeqCst);
        log_with_context(
            Some(&address),
            &format!(
                "Ended Sync, resolved: {:?}, unresolved: {:?}",
                end_sync_event.resolved, end_sync_event.unresolved
            ),
        );
    }
}
