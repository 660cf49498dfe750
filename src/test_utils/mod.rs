// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use cid::Cid;
use num_bigint::BigInt;

use crate::blocks::{ChainEpoch, RawBlockHeader, Tipset, TipsetKey};
use crate::utils::cid::CidCborExt;

/// Derives a tipset key from arbitrary bytes, for seeding unrelated chains.
pub fn template_key(data: &[u8]) -> TipsetKey {
    TipsetKey::new(vec![Cid::from_cbor_blake2b256(&data).unwrap()])
}

/// Builds a single-block tipset with the given parents, epoch and weight.
pub fn construct_tipset(parents: TipsetKey, epoch: ChainEpoch, weight: u64) -> Arc<Tipset> {
    construct_tipset_at(parents, epoch, weight, 0)
}

/// Same as [`construct_tipset`], with an explicit timestamp so tipsets that
/// agree on every chain-selection field still get distinct identities.
pub fn construct_tipset_at(
    parents: TipsetKey,
    epoch: ChainEpoch,
    weight: u64,
    timestamp: u64,
) -> Arc<Tipset> {
    let header = RawBlockHeader {
        parents,
        weight: BigInt::from(weight),
        epoch,
        timestamp,
    };
    Arc::new(Tipset::new(vec![header.into()]).unwrap())
}

/// Builds a direct child of the given tipset.
pub fn child_tipset(parent: &Tipset, weight: u64) -> Arc<Tipset> {
    construct_tipset(parent.key().clone(), parent.epoch() + 1, weight)
}
