// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::ops::Deref;
use std::sync::OnceLock;

use cid::Cid;
use num_bigint::BigInt;
use serde::Serialize;

use super::{ChainEpoch, TipsetKey};
use crate::utils::cid::CidCborExt;

/// A block header reduced to the fields chain selection consumes: parent
/// linkage, epoch and accumulated chain weight. Consensus payload (tickets,
/// proofs, signatures, messages) lives behind the sync pipeline and is not
/// represented here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct RawBlockHeader {
    /// The set of parents this block was based on.
    pub parents: TipsetKey,
    /// The aggregate chain weight of the parent set.
    pub weight: BigInt,
    /// The period in which the block was generated.
    pub epoch: ChainEpoch,
    /// Block creation time, in seconds since the Unix epoch.
    pub timestamp: u64,
}

impl RawBlockHeader {
    /// The content identifier of the header: `dag-cbor` encoding hashed with
    /// 256 bit BLAKE2b.
    pub fn cid(&self) -> Cid {
        Cid::from_cbor_blake2b256(self).expect("CBOR serialization of a block header may not fail")
    }
}

/// A [`RawBlockHeader`] which caches calls to [`RawBlockHeader::cid`].
#[derive(Clone, Debug, Serialize)]
#[serde(transparent)]
pub struct CachingBlockHeader {
    uncached: RawBlockHeader,
    #[serde(skip)]
    cid: OnceLock<Cid>,
}

impl CachingBlockHeader {
    pub fn new(uncached: RawBlockHeader) -> Self {
        Self {
            uncached,
            cid: OnceLock::new(),
        }
    }

    pub fn cid(&self) -> &Cid {
        self.cid.get_or_init(|| self.uncached.cid())
    }
}

impl From<RawBlockHeader> for CachingBlockHeader {
    fn from(uncached: RawBlockHeader) -> Self {
        Self::new(uncached)
    }
}

impl Deref for CachingBlockHeader {
    type Target = RawBlockHeader;
    fn deref(&self) -> &Self::Target {
        &self.uncached
    }
}

impl PartialEq for CachingBlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.uncached == other.uncached
    }
}

impl Eq for CachingBlockHeader {}
