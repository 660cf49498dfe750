// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Error raised by a sync job. Sync failures are reported to the scheduler
/// and logged; they never abort the manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Error originating from constructing blockchain structures.
    #[error("{0}")]
    Blockchain(#[from] crate::blocks::Error),
    /// Error in validating arbitrary data.
    #[error("Validation error: {0}")]
    Validation(String),
    /// Any other error that does not need to be specifically handled.
    #[error("{0}")]
    Other(String),
}

impl From<&str> for SyncError {
    fn from(e: &str) -> SyncError {
        SyncError::Other(e.to_string())
    }
}
