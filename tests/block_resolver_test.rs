use std::{
    collections::BTreeMap,
    sync::mpsc::{self, Receiver},
    time::Duration,
};

use log::LevelFilter;
use roundbft::{
    block_resolver::{BlockResolver, Resolution},
    block_sync::{
        client::{BlockSyncClientConfiguration, ChainSync},
        messages::{SyncPayload, SyncResponseError},
    },
    storage::{ChainStore, MemStore},
    types::{
        basic::{Address, BlockHeight, CryptoHash},
        block::{Block, BlockConsensusMessage, VoteSignature},
        crypto_primitives::Keypair,
        transaction::{TransactionMessage, Tx},
        validators::ValidatorSet,
    },
    vote_ledger::VoteLedger,
};

mod common;

use crate::common::{logging::setup_logger, network::ScriptedNetwork};

struct Fixture {
    keypairs: Vec<Keypair>,
    store: ChainStore<MemStore>,
    network: ScriptedNetwork,
    resolver: BlockResolver<MemStore, ScriptedNetwork>,
    restarts: Receiver<()>,
}

impl Fixture {
    /// A resolver for 4 trusted validators whose peers are configured by `peers`.
    fn new(peers: impl FnOnce(ScriptedNetwork, &[Keypair]) -> ScriptedNetwork) -> Fixture {
        let keypairs: Vec<Keypair> = (0..4).map(|_| Keypair::generate()).collect();
        let addresses: Vec<Address> = keypairs.iter().map(Keypair::address).collect();
        let validator_set = ValidatorSet::new(addresses.clone(), addresses);
        let store = ChainStore::new(MemStore::new());

        let (responses_sender, responses) = mpsc::channel();
        let network = peers(ScriptedNetwork::new(responses_sender), &keypairs);
        let chain_sync = ChainSync::new(
            BlockSyncClientConfiguration {
                me: keypairs[0].address(),
                response_timeout: Duration::from_millis(100),
                peer_blacklist: Vec::new(),
            },
            store.clone(),
            network.clone(),
            responses,
            validator_set.clone(),
            None,
        );
        let (restart_signal, restarts) = mpsc::sync_channel(1);
        let resolver = BlockResolver::new(store.clone(), validator_set, chain_sync, Some(restart_signal), None);

        Fixture {
            keypairs,
            store,
            network,
            resolver,
            restarts,
        }
    }

    /// Validator `proposer`'s block at `height` on top of `previous`, carrying its own vote.
    fn proposal(&self, proposer: usize, height: u64, previous: CryptoHash) -> BlockConsensusMessage {
        BlockConsensusMessage::new(Block::new(
            &self.keypairs[proposer],
            BlockHeight::new(height),
            Some(previous),
            BTreeMap::new(),
        ))
    }

    fn with_votes(&self, mut message: BlockConsensusMessage, voters: &[usize]) -> BlockConsensusMessage {
        for voter in voters {
            message.add_vote(VoteSignature::new(&self.keypairs[*voter], &message.block_hash));
        }
        message
    }

    fn tip(&self) -> BlockHeight {
        self.store.chain_tip().unwrap()
    }

    /// The vote ledger validator 0 keeps over the same pool.
    fn ledger(&self) -> VoteLedger<MemStore> {
        let addresses: Vec<Address> = self.keypairs.iter().map(Keypair::address).collect();
        VoteLedger::new(
            self.store.clone(),
            ValidatorSet::new(addresses.clone(), addresses),
            self.keypairs[0].address(),
        )
    }
}

#[test]
fn a_candidate_with_three_of_four_votes_is_committed() {
    setup_logger(LevelFilter::Debug);
    let mut fixture = Fixture::new(|network, _| network);
    let previous = CryptoHash::new([1; 32]);
    let first = fixture.proposal(0, 1, previous);
    let block = first.block_hash;

    assert_eq!(
        fixture.resolver.on_block_consensus(first).unwrap(),
        Resolution::CandidateInserted { block, votes: 1 }
    );
    // Validators proposing the same batch on the same predecessor vote for the same hash.
    let second = fixture.proposal(1, 1, previous);
    assert_eq!(second.block_hash, block);
    assert_eq!(
        fixture.resolver.on_block_consensus(second.clone()).unwrap(),
        Resolution::CandidateVoteAdded { block, votes: 2 }
    );
    assert_eq!(fixture.resolver.on_block_consensus(second).unwrap(), Resolution::DuplicateVote);
    assert_eq!(fixture.tip(), BlockHeight::new(0));
    assert!(fixture.restarts.try_recv().is_err());

    let third = fixture.proposal(2, 1, previous);
    assert_eq!(
        fixture.resolver.on_block_consensus(third).unwrap(),
        Resolution::Promoted {
            height: BlockHeight::new(1),
            block
        }
    );
    assert_eq!(fixture.tip(), BlockHeight::new(1));
    let committed = fixture.store.block_at(BlockHeight::new(1)).unwrap().unwrap();
    assert_eq!(committed.block_hash, block);
    assert_eq!(committed.votes, 3);
    assert!(fixture.store.candidate(&block).unwrap().is_none());
    assert!(fixture.restarts.try_recv().is_ok());

    // Late votes still land on the committed block.
    let fourth = fixture.proposal(3, 1, previous);
    assert_eq!(
        fixture.resolver.on_block_consensus(fourth).unwrap(),
        Resolution::VoteAdded {
            height: BlockHeight::new(1),
            votes: 4
        }
    );
}

#[test]
fn a_competing_block_at_a_final_height_is_stale() {
    setup_logger(LevelFilter::Debug);
    let mut fixture = Fixture::new(|network, _| network);
    let decided = fixture.proposal(0, 1, CryptoHash::new([1; 32]));
    let decided = fixture.with_votes(decided, &[1, 2]);
    assert!(matches!(
        fixture.resolver.on_block_consensus(decided.clone()).unwrap(),
        Resolution::Promoted { .. }
    ));

    let competitor = fixture.proposal(3, 1, CryptoHash::new([2; 32]));
    let competitor = fixture.with_votes(competitor, &[0]);
    assert_eq!(competitor.votes, 2);
    assert_eq!(
        fixture.resolver.on_block_consensus(competitor.clone()).unwrap(),
        Resolution::Stale {
            height: BlockHeight::new(1),
            block: competitor.block_hash
        }
    );
    assert!(fixture.store.candidate(&competitor.block_hash).unwrap().is_none());
    assert_eq!(
        fixture.store.block_at(BlockHeight::new(1)).unwrap().unwrap().block_hash,
        decided.block_hash
    );
}

#[test]
fn a_non_final_committed_block_yields_to_a_better_voted_candidate() {
    setup_logger(LevelFilter::Debug);
    let mut fixture = Fixture::new(|network, _| network);
    let synced = fixture.proposal(0, 1, CryptoHash::new([1; 32]));
    fixture.store.put_blocks(&[synced.clone()]).unwrap();

    let better = fixture.proposal(1, 1, CryptoHash::new([2; 32]));
    let block = better.block_hash;
    assert_eq!(
        fixture.resolver.on_block_consensus(better).unwrap(),
        Resolution::CandidateInserted { block, votes: 1 }
    );
    let better = fixture.with_votes(fixture.proposal(2, 1, CryptoHash::new([2; 32])), &[3]);
    assert_eq!(
        fixture.resolver.on_block_consensus(better).unwrap(),
        Resolution::Promoted {
            height: BlockHeight::new(1),
            block
        }
    );

    let committed = fixture.store.block_at(BlockHeight::new(1)).unwrap().unwrap();
    assert_eq!(committed.block_hash, block);
    assert_eq!(committed.votes, 3);
    // Replacing the block at the tip does not move the tip.
    assert!(fixture.restarts.try_recv().is_err());
}

#[test]
fn own_candidates_are_resolved_like_peer_blocks() {
    setup_logger(LevelFilter::Debug);
    let mut fixture = Fixture::new(|network, _| network);
    let previous = CryptoHash::new([1; 32]);
    let peers = fixture.with_votes(fixture.proposal(1, 1, previous), &[2]);
    let block = peers.block_hash;
    fixture.resolver.on_block_consensus(peers).unwrap();

    let own = fixture.proposal(0, 1, previous);
    assert_eq!(
        fixture.resolver.insert_own_candidate(own).unwrap(),
        Resolution::Promoted {
            height: BlockHeight::new(1),
            block
        }
    );
    // The committed block already counts this node's vote.
    let replayed = fixture.proposal(0, 1, previous);
    assert_eq!(fixture.resolver.insert_own_candidate(replayed).unwrap(), Resolution::DuplicateVote);
}

#[test]
fn a_block_beyond_the_next_height_syncs_the_gap_first() {
    setup_logger(LevelFilter::Debug);
    let genesis = CryptoHash::new([1; 32]);
    let mut gap = Vec::new();
    let mut fixture = Fixture::new(|network, keypairs| {
        let first = BlockConsensusMessage::new(Block::new(&keypairs[1], BlockHeight::new(1), Some(genesis), BTreeMap::new()));
        let second = BlockConsensusMessage::new(Block::new(
            &keypairs[1],
            BlockHeight::new(2),
            Some(first.block_hash),
            BTreeMap::new(),
        ));
        gap = vec![first, second];
        network
            .with_peer("peer-1", SyncPayload::Blocks(gap.clone()))
            .with_peer("peer-2", SyncPayload::Error(SyncResponseError::NoBlocksFound))
    });

    let ahead = fixture.proposal(2, 3, gap[1].block_hash);
    let block = ahead.block_hash;
    assert_eq!(
        fixture.resolver.on_block_consensus(ahead).unwrap(),
        Resolution::CandidateInserted { block, votes: 1 }
    );

    let requests = fixture.network.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|(_, request)| request.from == BlockHeight::new(1) && request.to == BlockHeight::new(3)));
    assert_eq!(fixture.tip(), BlockHeight::new(2));
    assert_eq!(
        fixture.store.block_at(BlockHeight::new(2)).unwrap().unwrap().block_hash,
        gap[1].block_hash
    );
    assert_eq!(
        fixture.store.parameters().unwrap().unwrap().unresolved_heights,
        vec![BlockHeight::new(3)]
    );
    assert!(fixture.restarts.try_recv().is_ok());
}

#[test]
fn a_gap_nobody_can_fill_is_recorded_as_unresolved() {
    setup_logger(LevelFilter::Debug);
    let mut fixture = Fixture::new(|network, _| network);
    let ahead = fixture.with_votes(fixture.proposal(1, 4, CryptoHash::new([4; 32])), &[2, 3]);
    let block = ahead.block_hash;

    assert_eq!(
        fixture.resolver.on_block_consensus(ahead).unwrap(),
        Resolution::Promoted {
            height: BlockHeight::new(4),
            block
        }
    );
    assert!(fixture.network.requests().is_empty());
    for height in 1..=3 {
        assert!(fixture.store.block_at(BlockHeight::new(height)).unwrap().is_none());
    }
    assert_eq!(
        fixture.store.parameters().unwrap().unwrap().unresolved_heights,
        vec![BlockHeight::new(1), BlockHeight::new(2), BlockHeight::new(3)]
    );
}

#[test]
fn transactions_of_a_losing_candidate_return_to_the_pool() {
    setup_logger(LevelFilter::Debug);
    let mut fixture = Fixture::new(|network, _| network);
    let mut ledger = fixture.ledger();
    let previous = CryptoHash::new([1; 32]);

    let tx = Tx::new_signed(&Keypair::generate(), b"transfer 5".to_vec());
    fixture.store.put_transaction(&TransactionMessage::new(tx.clone())).unwrap();
    let executed = ledger.execute(TransactionMessage::new(tx.clone())).unwrap();

    let own = Block::new(
        &fixture.keypairs[0],
        BlockHeight::new(1),
        Some(previous),
        BTreeMap::from([(tx.message_hash, tx.clone())]),
    );
    assert!(matches!(
        fixture.resolver.insert_own_candidate(BlockConsensusMessage::new(own.clone())).unwrap(),
        Resolution::CandidateInserted { .. }
    ));
    ledger.include_in_block(&[executed], &own).unwrap();
    assert!(ledger.zero_vote_candidates().unwrap().is_empty());

    let competitor = fixture.with_votes(fixture.proposal(1, 1, previous), &[2, 3]);
    assert!(matches!(
        fixture.resolver.on_block_consensus(competitor).unwrap(),
        Resolution::Promoted { .. }
    ));

    let released = ledger.zero_vote_candidates().unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].message_hash, tx.message_hash);
    assert_eq!(released[0].block_hash, None);
    assert_eq!(released[0].block_number, None);
}

#[test]
fn transactions_of_the_committed_block_stay_included() {
    setup_logger(LevelFilter::Debug);
    let mut fixture = Fixture::new(|network, _| network);
    let mut ledger = fixture.ledger();
    let previous = CryptoHash::new([1; 32]);

    let tx = Tx::new_signed(&Keypair::generate(), b"transfer 7".to_vec());
    fixture.store.put_transaction(&TransactionMessage::new(tx.clone())).unwrap();
    let executed = ledger.execute(TransactionMessage::new(tx.clone())).unwrap();

    let block = Block::new(
        &fixture.keypairs[0],
        BlockHeight::new(1),
        Some(previous),
        BTreeMap::from([(tx.message_hash, tx.clone())]),
    );
    let candidate = fixture.with_votes(BlockConsensusMessage::new(block.clone()), &[1, 2]);
    ledger.include_in_block(&[executed], &block).unwrap();
    assert!(matches!(
        fixture.resolver.insert_own_candidate(candidate).unwrap(),
        Resolution::Promoted { .. }
    ));

    let stored = fixture.store.transaction(&tx.message_hash).unwrap().unwrap();
    assert_eq!(stored.block_hash, Some(block.block_hash));
    assert!(ledger.zero_vote_candidates().unwrap().is_empty());
}
