// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;
use std::sync::OnceLock;

use cid::Cid;
use num_bigint::BigInt;
use serde::Serialize;

use super::{CachingBlockHeader, ChainEpoch, Error};

/// A set of CIDs forming a unique key for a tipset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TipsetKey {
    cids: Vec<Cid>,
}

impl TipsetKey {
    pub fn new(cids: Vec<Cid>) -> Self {
        Self { cids }
    }

    /// Returns the block CIDs forming the key.
    pub fn cids(&self) -> &[Cid] {
        &self.cids
    }
}

impl FromIterator<Cid> for TipsetKey {
    fn from_iter<I: IntoIterator<Item = Cid>>(iter: I) -> Self {
        Self {
            cids: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for TipsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, cid) in self.cids.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{cid}")?;
        }
        write!(f, "}}")
    }
}

/// An immutable set of blocks at the same epoch with the same parent set.
///
/// A valid tipset contains a non-empty collection of headers that all specify
/// identical parents, weight and epoch. Headers are kept in a canonical order
/// so equal tipsets compare equal regardless of the order they were built in.
#[derive(Clone, Debug, Serialize)]
pub struct Tipset {
    headers: Vec<CachingBlockHeader>,
    #[serde(skip)]
    key: OnceLock<TipsetKey>,
}

impl Tipset {
    /// Builds a new tipset from a collection of block headers, validating
    /// that they belong to the same round of the same chain.
    pub fn new(mut headers: Vec<CachingBlockHeader>) -> Result<Self, Error> {
        let Some(first) = headers.first() else {
            return Err(Error::NoBlocks);
        };

        for header in &headers[1..] {
            if header.parents != first.parents {
                return Err(Error::InvalidTipset("parent cids are not equal".into()));
            }
            if header.weight != first.weight {
                return Err(Error::InvalidTipset("weights are not equal".into()));
            }
            if header.epoch != first.epoch {
                return Err(Error::InvalidTipset("epochs are not equal".into()));
            }
        }

        headers.sort_by_key(|header| header.cid().to_bytes());
        headers.dedup();

        Ok(Self {
            headers,
            key: OnceLock::new(),
        })
    }

    /// Returns the headers forming the tipset.
    pub fn block_headers(&self) -> &[CachingBlockHeader] {
        &self.headers
    }

    /// Returns the epoch (height) of the tipset.
    pub fn epoch(&self) -> ChainEpoch {
        self.headers[0].epoch
    }

    /// Returns the accumulated chain weight of the parent set.
    pub fn weight(&self) -> &BigInt {
        &self.headers[0].weight
    }

    /// Returns the key identifying the parent tipset.
    pub fn parents(&self) -> &TipsetKey {
        &self.headers[0].parents
    }

    /// Returns the key identifying this tipset.
    pub fn key(&self) -> &TipsetKey {
        self.key
            .get_or_init(|| self.headers.iter().map(|header| *header.cid()).collect())
    }
}

impl PartialEq for Tipset {
    fn eq(&self, other: &Self) -> bool {
        self.headers == other.headers
    }
}

impl Eq for Tipset {}

impl fmt::Display for Tipset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key(), self.epoch())
    }
}
