use std::collections::BTreeMap;

use log::LevelFilter;
use roundbft::{
    storage::{ChainStore, MemStore},
    types::{
        basic::{Address, BlockHeight, CryptoHash, Round},
        block::Block,
        crypto_primitives::Keypair,
        transaction::{TransactionMessage, Tx},
        validators::ValidatorSet,
    },
    vote_ledger::VoteLedger,
};

mod common;

use crate::common::logging::setup_logger;

struct Ledger {
    keypairs: Vec<Keypair>,
    store: ChainStore<MemStore>,
    ledger: VoteLedger<MemStore>,
}

impl Ledger {
    /// A ledger over an empty pool, kept by the first of 4 validators.
    fn with_four_validators() -> Ledger {
        let keypairs: Vec<Keypair> = (0..4).map(|_| Keypair::generate()).collect();
        let addresses: Vec<Address> = keypairs.iter().map(Keypair::address).collect();
        let store = ChainStore::new(MemStore::new());
        let ledger = VoteLedger::new(
            store.clone(),
            ValidatorSet::new(addresses.clone(), addresses),
            keypairs[0].address(),
        );
        Ledger {
            keypairs,
            store,
            ledger,
        }
    }

    fn pool(&mut self, payload: &[u8]) -> TransactionMessage {
        let tx = Tx::new_signed(&Keypair::generate(), payload.to_vec());
        let message = TransactionMessage::new(tx);
        self.store.put_transaction(&message).unwrap();
        message
    }

    /// Pool a transaction and run it, returning its executed hash.
    fn pool_and_execute(&mut self, payload: &[u8]) -> CryptoHash {
        let message = self.pool(payload);
        self.ledger.execute(message).unwrap().executed_hash.unwrap()
    }

    fn vote(&mut self, executed_hash: &CryptoHash, round: Round, voters: &[usize]) -> Vec<bool> {
        voters
            .iter()
            .map(|i| {
                let voter = self.keypairs[*i].address();
                self.ledger.record_round_vote(executed_hash, round, &voter).unwrap()
            })
            .collect()
    }

    fn stored(&self, message_hash: &CryptoHash) -> TransactionMessage {
        self.store.transaction(message_hash).unwrap().unwrap()
    }
}

#[test]
fn round_six_selects_transactions_with_three_of_four_votes() {
    setup_logger(LevelFilter::Debug);
    let mut ledger = Ledger::with_four_validators();
    let round = Round::new(6);

    let endorsed = ledger.pool_and_execute(b"endorsed");
    let contested = ledger.pool_and_execute(b"contested");
    assert_eq!(ledger.vote(&endorsed, round, &[0, 1, 2]), vec![true; 3]);
    assert_eq!(ledger.vote(&contested, round, &[0, 3]), vec![true; 2]);

    let selected: Vec<Option<CryptoHash>> = ledger
        .ledger
        .select_above_threshold(round)
        .unwrap()
        .into_iter()
        .map(|transaction| transaction.executed_hash)
        .collect();
    assert_eq!(selected, vec![Some(endorsed)]);
}

#[test]
fn a_voter_counts_once_per_round() {
    setup_logger(LevelFilter::Debug);
    let mut ledger = Ledger::with_four_validators();
    let message = ledger.pool(b"replayed");
    let message_hash = message.message_hash;
    let executed_hash = ledger.ledger.execute(message).unwrap().executed_hash.unwrap();

    assert_eq!(ledger.vote(&executed_hash, Round::new(2), &[1, 1, 2, 1]), vec![true, false, true, false]);
    // The same voter still counts in a different round.
    assert_eq!(ledger.vote(&executed_hash, Round::new(3), &[1]), vec![true]);

    let stored = ledger.stored(&message_hash);
    assert_eq!(stored.votes_in(Round::new(2)), 2);
    assert_eq!(stored.votes_in(Round::new(3)), 1);
    assert_eq!(stored.voters[2].len(), 2);

    // Two round-2 votes would meet the round-3 threshold, but only round-3 votes count there.
    assert!(ledger.ledger.select_above_threshold(Round::new(3)).unwrap().is_empty());
    assert_eq!(ledger.vote(&CryptoHash::new([9; 32]), Round::new(2), &[3]), vec![false]);
}

#[test]
fn execution_casts_the_round_zero_vote_once() {
    setup_logger(LevelFilter::Debug);
    let mut ledger = Ledger::with_four_validators();
    let message = ledger.pool(b"fresh");
    let message_hash = message.message_hash;

    assert_eq!(ledger.ledger.zero_vote_candidates().unwrap().len(), 1);
    let executed = ledger.ledger.execute(message).unwrap();
    assert!(executed.executed && executed.result);
    assert_eq!(executed.response, Some(format!("executed:{}", message_hash)));
    assert!(ledger.ledger.zero_vote_candidates().unwrap().is_empty());

    let stored = ledger.stored(&message_hash);
    assert_eq!(stored.votes_in(Round::new(0)), 1);
    assert_eq!(stored.executed_hash, executed.executed_hash);

    // Executing again does not vote twice.
    ledger.ledger.execute(stored).unwrap();
    assert_eq!(ledger.stored(&message_hash).votes_in(Round::new(0)), 1);
}

#[test]
fn a_forged_pool_record_is_not_executed() {
    setup_logger(LevelFilter::Debug);
    let mut ledger = Ledger::with_four_validators();
    let mut message = ledger.pool(b"genuine");
    message.tx.payload = b"forged".to_vec();

    assert!(ledger.ledger.execute(message).is_err());
}

#[test]
fn inclusion_takes_transactions_out_of_contention_and_resets_the_rest() {
    setup_logger(LevelFilter::Debug);
    let mut ledger = Ledger::with_four_validators();
    let included = ledger.pool_and_execute(b"included");
    let left_out = ledger.pool_and_execute(b"left out");
    ledger.vote(&included, Round::new(6), &[0, 1, 2]);
    ledger.vote(&left_out, Round::new(6), &[0]);

    let selected = ledger.ledger.select_above_threshold(Round::new(6)).unwrap();
    let messages: BTreeMap<CryptoHash, Tx> = selected
        .iter()
        .map(|transaction| (transaction.message_hash, transaction.tx.clone()))
        .collect();
    let block = Block::new(&ledger.keypairs[0], BlockHeight::new(1), Some(CryptoHash::new([0; 32])), messages);
    ledger.ledger.include_in_block(&selected, &block).unwrap();
    assert_eq!(ledger.ledger.reset_unincluded_votes().unwrap(), 1);

    let included = ledger.stored(&selected[0].message_hash);
    assert_eq!(included.block_hash, Some(block.block_hash));
    assert_eq!(included.block_number, Some(BlockHeight::new(1)));
    assert!(ledger.ledger.select_above_threshold(Round::new(6)).unwrap().is_empty());

    // The transaction left out competes afresh from round 0 at the next height.
    let candidates = ledger.ledger.zero_vote_candidates().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].executed_hash, Some(left_out));
    assert!(candidates[0].voters.iter().all(Vec::is_empty));
}
