use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::OpKind;

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

/// Integer feature vector; element 0 is always the operator kind tag.
pub type KeyVector = SmallVec<[i64; 16]>;

pub(crate) fn key_with_kind(kind: OpKind) -> KeyVector {
    let mut key = KeyVector::new();
    key.push(kind.tag());
    key
}

pub(crate) fn push_dims(key: &mut KeyVector, dims: &[usize]) {
    key.extend(dims.iter().map(|&d| d as i64));
}

pub fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

/// FNV-1a over the little-endian encoding of each element.
pub fn hash_key(key: &[i64]) -> u64 {
    key.iter()
        .fold(FNV1A_OFFSET, |hash, value| fnv1a_bytes(hash, &value.to_le_bytes()))
}

/// Attribute key paired with a fingerprint of the full workload, used for
/// measurement caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerfKey {
    pub hash: u64,
    pub attrs: KeyVector,
}

impl PerfKey {
    pub fn new(workload: &[i64], attrs: KeyVector) -> Self {
        let hash = attrs.iter().fold(hash_key(workload), |hash, value| {
            fnv1a_bytes(hash, &value.to_le_bytes())
        });
        PerfKey { hash, attrs }
    }

    pub fn kind(&self) -> Option<OpKind> {
        self.attrs.first().copied().and_then(OpKind::from_tag)
    }
}

impl fmt::Display for PerfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.hash)
    }
}
