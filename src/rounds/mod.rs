/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-height round loop: a pure [state machine](state) and the [thread](engine) that drives it.

pub mod engine;

pub mod state;
