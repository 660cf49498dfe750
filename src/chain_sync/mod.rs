// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod bucket;
mod errors;
mod sync_manager;
mod sync_state;

pub use self::bucket::{SyncBucket, SyncBucketSet};
pub use self::errors::SyncError;
pub use self::sync_manager::{SyncManager, SyncStateHandle, TipsetSyncer};
pub use self::sync_state::{SyncStage, SyncState};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::utils::misc::is_env_truthy;

/// Environment variable that opts in to treating sibling tipsets (tipsets
/// sharing a parent set) as part of the same chain when grouping sync
/// targets. Read once at process start.
pub const COALESCE_FORK_PARENTS_ENV: &str = "TIPSET_SYNC_COALESCE_FORK_PARENTS";

const DEFAULT_BOOTSTRAP_PEER_THRESHOLD: usize = 2;

lazy_static! {
    static ref COALESCE_FORK_PARENTS: bool = is_env_truthy(COALESCE_FORK_PARENTS_ENV);
}

pub(crate) fn coalesce_fork_parents() -> bool {
    *COALESCE_FORK_PARENTS
}

/// Structure that defines syncing configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of distinct peer heads required before an initial sync target
    /// is selected.
    pub bootstrap_peer_threshold: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bootstrap_peer_threshold: DEFAULT_BOOTSTRAP_PEER_THRESHOLD,
        }
    }
}
