/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The states of the per-height round loop and the pure function that moves between them.

use crate::types::basic::Round;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RoundState {
    /// Read the committed chain and pick the height to work on.
    #[default]
    LoadHead,
    /// Round 0 proposes executed transactions; rounds 1 and up tally votes.
    Round(Round),
    /// Build, hand off and broadcast this node's block for the height.
    Finalize,
}

/// How executing one state ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    HeadLoaded,
    RoundCompleted,
    /// The consensus pool held no message for the round being tallied.
    NoConsensusMessages,
    Finalized,
    /// Any error that abandons the height.
    Failed,
    /// The committed chain moved past the height being worked on.
    Restart,
}

/// The state that follows `state` when it ends with `outcome`.
///
/// Failures and restarts abandon the height and start over from [`RoundState::LoadHead`], as does an
/// outcome that `state` cannot produce.
pub fn transition(state: RoundState, outcome: StepOutcome) -> RoundState {
    match (state, outcome) {
        (_, StepOutcome::Failed) | (_, StepOutcome::Restart) => RoundState::LoadHead,
        (RoundState::LoadHead, StepOutcome::HeadLoaded) => RoundState::Round(Round::new(0)),
        (RoundState::Round(round), StepOutcome::RoundCompleted) if round.is_last() => RoundState::Finalize,
        (RoundState::Round(round), StepOutcome::RoundCompleted) => RoundState::Round(round.next()),
        (RoundState::Round(round), StepOutcome::NoConsensusMessages) if round.int() > 0 => RoundState::Finalize,
        (RoundState::Finalize, StepOutcome::Finalized) => RoundState::LoadHead,
        _ => RoundState::LoadHead,
    }
}
