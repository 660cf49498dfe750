// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;
use std::sync::Arc;

use crate::blocks::Tipset;

use super::coalesce_fork_parents;

/// Returns true if two tipsets are on the same chain: equal, linked by a
/// direct parent/child edge, or (when sibling coalescing is enabled) sharing
/// a parent set. The relation is symmetric and reflexive but not transitive.
fn chain_related(a: &Tipset, b: &Tipset, coalesce_siblings: bool) -> bool {
    a == b
        || a.key() == b.parents()
        || a.parents() == b.key()
        || (coalesce_siblings && a.parents() == b.parents())
}

/// A bucket of [`Tipset`]s to sync. All tipsets in a bucket are related to at
/// least one other member of the same bucket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncBucket {
    tips: Vec<Arc<Tipset>>,
}

impl SyncBucket {
    fn new(tips: Vec<Arc<Tipset>>) -> SyncBucket {
        Self { tips }
    }

    /// Returns the heaviest tipset in the bucket. Ties are broken in favor of
    /// the tipset that entered the bucket first.
    pub fn heaviest_tipset(&self) -> Option<Arc<Tipset>> {
        let mut best: Option<&Arc<Tipset>> = None;
        for ts in &self.tips {
            if best.map_or(true, |b| ts.weight() > b.weight()) {
                best = Some(ts);
            }
        }
        best.cloned()
    }

    /// Returns true if the tipset is from the same chain as some member of
    /// the bucket.
    pub fn is_same_chain_as(&self, ts: &Tipset) -> bool {
        let coalesce = coalesce_fork_parents();
        self.tips.iter().any(|t| chain_related(ts, t, coalesce))
    }

    /// Adds a tipset to the bucket. Duplicates are ignored.
    pub fn add(&mut self, ts: Arc<Tipset>) {
        if !self.tips.iter().any(|t| *t == ts) {
            self.tips.push(ts);
        }
    }
}

impl fmt::Display for SyncBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, ts) in self.tips.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{ts}")?;
        }
        write!(f, "]")
    }
}

/// Set of tipset buckets. Keeps all individual groupings of [`Tipset`]s that
/// are queued for sync work.
#[derive(Clone, Debug, Default)]
pub struct SyncBucketSet {
    buckets: Vec<SyncBucket>,
}

impl SyncBucketSet {
    /// Inserts a tipset into the first bucket it is related to, or into a new
    /// bucket if it is related to none.
    pub fn insert(&mut self, tipset: Arc<Tipset>) {
        if let Some(b) = self
            .buckets
            .iter_mut()
            .find(|b| b.is_same_chain_as(&tipset))
        {
            b.add(tipset);
        } else {
            self.buckets.push(SyncBucket::new(vec![tipset]));
        }
    }

    /// Returns true if the tipset is related to any bucket in the set.
    pub fn related_to_any(&self, ts: &Tipset) -> bool {
        self.buckets.iter().any(|b| b.is_same_chain_as(ts))
    }

    /// Removes and returns the bucket holding the heaviest tipset.
    pub fn pop(&mut self) -> Option<SyncBucket> {
        let mut best: Option<(usize, Arc<Tipset>)> = None;
        for (i, b) in self.buckets.iter().enumerate() {
            if let Some(ts) = b.heaviest_tipset() {
                if best
                    .as_ref()
                    .map_or(true, |(_, best_ts)| ts.weight() > best_ts.weight())
                {
                    best = Some((i, ts));
                }
            }
        }
        let (i, _) = best?;
        Some(self.buckets.remove(i))
    }

    /// Removes every bucket related to the given tipset and returns their
    /// members merged into a single bucket. The relation is not transitive,
    /// so more than one bucket can match.
    pub fn pop_related(&mut self, ts: &Tipset) -> Option<SyncBucket> {
        let mut out: Option<SyncBucket> = None;
        let mut remaining = Vec::with_capacity(self.buckets.len());
        for b in self.buckets.drain(..) {
            if b.is_same_chain_as(ts) {
                out.get_or_insert_with(SyncBucket::default)
                    .tips
                    .extend(b.tips);
            } else {
                remaining.push(b);
            }
        }
        self.buckets = remaining;
        out
    }

    /// Heaviest tipset among all buckets. Ties are broken in favor of the
    /// earlier bucket.
    pub fn heaviest(&self) -> Option<Arc<Tipset>> {
        let mut best: Option<Arc<Tipset>> = None;
        for b in &self.buckets {
            if let Some(ts) = b.heaviest_tipset() {
                if best.as_ref().map_or(true, |best_ts| ts.weight() > best_ts.weight()) {
                    best = Some(ts);
                }
            }
        }
        best
    }

    pub(crate) fn buckets(&self) -> &[SyncBucket] {
        &self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl fmt::Display for SyncBucketSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, b) in self.buckets.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{b}")?;
        }
        write!(f, "}}")
    }
}
