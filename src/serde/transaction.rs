//! Hex-encode a [`bitcoin::Transaction`] for `serde`, the same pattern the
//! host uses for its own `PartiallySignedTransaction` hex round-trip.

use crate::transaction::{canonical_deserialize, canonical_serialize};
use bitcoin::Transaction;
use serde::{de::Error, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &Transaction, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&hex::encode(canonical_serialize(value)))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Transaction, D::Error>
where
    D: Deserializer<'de>,
{
    let str = String::deserialize(deserializer)?;
    let bytes = hex::decode(str).map_err(D::Error::custom)?;
    canonical_deserialize(&bytes).map_err(D::Error::custom)
}

pub mod vec {
    use super::*;

    pub fn serialize<S>(value: &[Transaction], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for transaction in value {
            seq.serialize_element(&hex::encode(canonical_serialize(transaction)))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Transaction>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|str| {
                let bytes = hex::decode(str).map_err(D::Error::custom)?;
                canonical_deserialize(&bytes).map_err(D::Error::custom)
            })
            .collect()
    }
}
