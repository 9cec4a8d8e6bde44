// Discord snowflake ids on the wire.
//
// Snowflakes exceed 2^53, so the dashboard sends and expects them as strings.
// Numbers are still accepted for ids written by older builds.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Num(u64),
    Str(String),
}

impl IdRepr {
    fn parse<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            IdRepr::Num(id) => Ok(id),
            IdRepr::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid id '{}'", s))),
        }
    }
}

pub fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    IdRepr::deserialize(d)?.parse()
}

pub fn de_ids<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u64>, D::Error> {
    Vec::<IdRepr>::deserialize(d)?
        .into_iter()
        .map(IdRepr::parse)
        .collect()
}

/// `#[serde(with = "snowflake::option")]` for `Option<u64>`.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(id: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        id.map(|id| id.to_string()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Option::<IdRepr>::deserialize(d)?
            .map(IdRepr::parse)
            .transpose()
    }
}

/// `#[serde(with = "snowflake::set")]` for `BTreeSet<u64>`.
pub mod set {
    use super::*;

    pub fn serialize<S: Serializer>(ids: &BTreeSet<u64>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(ids.iter().map(u64::to_string))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<u64>, D::Error> {
        Vec::<IdRepr>::deserialize(d)?
            .into_iter()
            .map(IdRepr::parse)
            .collect()
    }
}
