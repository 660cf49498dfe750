// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;
mod header;
mod tipset;

pub use errors::Error;
pub use header::{CachingBlockHeader, RawBlockHeader};
pub use tipset::{Tipset, TipsetKey};

/// A chain epoch, or height. Blocks created in the same round share an epoch.
pub type ChainEpoch = i64;
