/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The validator roster and the vote thresholds derived from its size.

use super::basic::{Address, Round};

/// The set of addresses whose messages are accepted, and the roster whose size drives every
/// threshold.
///
/// Membership checks are linear scans; validator sets are small.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorSet {
    trusted: Vec<Address>,
    roster: Vec<Address>,
}

impl ValidatorSet {
    pub fn new(trusted: Vec<Address>, roster: Vec<Address>) -> ValidatorSet {
        ValidatorSet { trusted, roster }
    }

    pub fn is_trusted(&self, address: &Address) -> bool {
        self.trusted.iter().any(|trusted| trusted == address)
    }

    pub fn trusted(&self) -> &[Address] {
        &self.trusted
    }

    pub fn roster(&self) -> &[Address] {
        &self.roster
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    pub fn commit_threshold(&self) -> u64 {
        commit_threshold(self.len())
    }

    pub fn round_threshold(&self, round: Round) -> u64 {
        round_threshold(self.len(), round)
    }
}

/// Votes a block candidate needs to be committed: `ceil(validators * 0.7)`.
pub fn commit_threshold(validators: usize) -> u64 {
    (validators as u64 * 7 + 9) / 10
}

/// Votes a transaction needs in `round` to stay selected: `ceil(validators * round * 10 / 100)`.
pub fn round_threshold(validators: usize, round: Round) -> u64 {
    (validators as u64 * round.int() as u64 * 10 + 99) / 100
}
