// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};

/// Multicodec code for `dag-cbor`.
pub const DAG_CBOR: u64 = 0x71;

/// Extension methods for constructing `dag-cbor` [`Cid`]s.
pub trait CidCborExt {
    /// Default CID builder for chain objects.
    ///
    /// - The default codec is `dag-cbor`
    /// - The default hash function is 256 bit BLAKE2b
    fn from_cbor_blake2b256<S: serde::ser::Serialize>(obj: &S) -> anyhow::Result<Cid> {
        let bytes = serde_ipld_dagcbor::to_vec(obj)?;
        Ok(Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(&bytes)))
    }
}

impl CidCborExt for Cid {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_content_yields_distinct_cids() {
        let cid1 = Cid::from_cbor_blake2b256(&"some content").unwrap();
        let cid2 = Cid::from_cbor_blake2b256(&"other content").unwrap();
        assert_ne!(cid1, cid2);
        assert_eq!(cid1, Cid::from_cbor_blake2b256(&"some content").unwrap());
    }
}
