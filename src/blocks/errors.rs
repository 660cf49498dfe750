// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Tipset contains no blocks.
    #[error("No blocks for tipset")]
    NoBlocks,
    /// The collection of headers does not form a valid tipset.
    #[error("Invalid tipset: {0}")]
    InvalidTipset(String),
}
