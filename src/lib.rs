// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Scheduling and deduplication core for syncing a tipset-based blockchain.
//!
//! Peers continuously report which tipset they believe is the chain head.
//! [`chain_sync::SyncManager`] turns that stream into a bounded set of sync
//! jobs: reports that extend in-flight work are queued behind it, duplicates
//! and dominated forks are dropped, and chains heavy enough to chase get a
//! worker running the injected [`chain_sync::TipsetSyncer`] pipeline.

pub mod blocks;
pub mod chain_sync;
#[cfg(test)]
mod test_utils;
mod utils;
