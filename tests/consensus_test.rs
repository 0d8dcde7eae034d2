use std::time::Duration;

use ed25519_dalek::SigningKey;
use log::LevelFilter;
use rand_core::OsRng;
use roundbft::types::{
    basic::{Address, BlockHeight},
    block::Block,
    crypto_primitives::{address_of, Keypair},
};

mod common;

use crate::common::{
    logging::setup_logger,
    network::mock_network,
    node::{wait_until, Node},
};

const WAIT: Duration = Duration::from_secs(60);

#[test]
fn a_single_validator_commits_submitted_transactions() {
    setup_logger(LevelFilter::Info);

    let keypair = SigningKey::generate(&mut OsRng);
    let address = address_of(&keypair.verifying_key());
    let network = mock_network([address.clone()].into_iter()).remove(0);
    let node = Node::new(keypair, network, vec![address]);

    log::debug!("Submitting a transaction to the only validator.");
    let tx = node.submit_transaction(b"increment");

    log::debug!("Polling the chain until a block includes the transaction.");
    let included_at = || {
        (1..=node.chain_tip().int()).find(|height| {
            node.block_at(*height)
                .is_some_and(|block| block.block.messages.contains_key(&tx.message_hash))
        })
    };
    assert!(wait_until(WAIT, || included_at().is_some()));

    let height = included_at().unwrap();
    let block = node.block_at(height).unwrap();
    assert_eq!(block.votes, 1);
    assert!(block.block.is_hash_correct());
    assert_eq!(block.block.messages[&tx.message_hash], tx);
    assert!(node.commits() >= height as usize);
}

#[test]
fn four_validators_commit_the_same_chain() {
    setup_logger(LevelFilter::Info);

    // 1. Create signing keys for 4 replicas and a mock network connecting them.
    let keypairs: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut OsRng)).collect();
    let addresses: Vec<Address> = keypairs.iter().map(|key| address_of(&key.verifying_key())).collect();
    let network_stubs = mock_network(addresses.clone().into_iter());

    // 2. Simultaneously start all replicas, all of them validators.
    let nodes: Vec<Node> = keypairs
        .into_iter()
        .zip(network_stubs)
        .map(|(keypair, network)| Node::new(keypair, network, addresses.clone()))
        .collect();

    // 3. Poll every replica until each has committed 3 blocks.
    log::debug!("Polling every replica until each has committed 3 blocks.");
    assert!(wait_until(WAIT, || nodes
        .iter()
        .all(|node| node.chain_tip() >= BlockHeight::new(3))));

    // 4. Every replica holds the same chain, linked from the genesis block.
    let genesis = Block::genesis(&Keypair::generate());
    let mut previous = genesis.block_hash;
    for height in 1..=3 {
        let block = nodes[0].block_at(height).unwrap();
        assert!(block.block.is_hash_correct());
        assert!(block.votes >= 3);
        assert_eq!(block.block.previous_block_hash, Some(previous));
        for node in &nodes[1..] {
            assert_eq!(node.block_at(height).unwrap().block_hash, block.block_hash);
        }
        previous = block.block_hash;
    }
}
