// Copyright (C) 2024 The dtnd Authors
//
// This file is part of dtnd.
//
// dtnd is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// dtnd is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::collections::BTreeMap;
use std::convert::TryFrom;

use serde::{
    Deserialize, Serialize,
    de::{Error, Visitor},
    ser::SerializeSeq,
};
use serde_cbor::Serializer;

use crate::{Validate, endpoint::Endpoint, time::DtnTime};

/// Routing state carried between nodes in metadata bundles.
///
/// For PRoPHET the map holds the owner's delivery predictabilities; the
/// values are opaque to the codec and only interpreted by the routing
/// algorithm that produced them.
#[derive(Debug, PartialEq, Clone)]
pub struct RoutingMetadataBlock {
    pub owner: Endpoint,
    pub timestamp: DtnTime,
    pub entries: BTreeMap<Endpoint, f64>,
}

impl Serialize for RoutingMetadataBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut vec = Vec::new();
        let inner_ser = &mut Serializer::new(&mut vec);
        let mut seq = serde::Serializer::serialize_seq(inner_ser, Some(3))
            .map_err(serde::ser::Error::custom)?;
        seq.serialize_element(&self.owner)
            .map_err(serde::ser::Error::custom)?;
        seq.serialize_element(&self.timestamp)
            .map_err(serde::ser::Error::custom)?;
        seq.serialize_element(&self.entries)
            .map_err(serde::ser::Error::custom)?;
        seq.end().map_err(serde::ser::Error::custom)?;

        serializer.serialize_bytes(&vec)
    }
}

impl<'de> Deserialize<'de> for RoutingMetadataBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct RoutingMetadataBlockVisitor;
        impl<'de> Visitor<'de> for RoutingMetadataBlockVisitor {
            type Value = RoutingMetadataBlock;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("Routing Metadata Block")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let owner = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'owner'"))?;
                let timestamp = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'timestamp'"))?;
                let entries = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'entries'"))?;
                Ok(RoutingMetadataBlock {
                    owner,
                    timestamp,
                    entries,
                })
            }
        }
        deserializer.deserialize_seq(RoutingMetadataBlockVisitor)
    }
}

impl Validate for RoutingMetadataBlock {
    fn validate(&self) -> bool {
        !self.owner.is_null_endpoint()
    }
}

impl TryFrom<Vec<u8>> for RoutingMetadataBlock {
    type Error = serde_cbor::Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        serde_cbor::from_slice(&value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::RoutingMetadataBlock;
    use crate::{endpoint::Endpoint, time::DtnTime};

    #[test]
    fn roundtrip() -> Result<(), serde_cbor::Error> {
        let mut entries = BTreeMap::new();
        entries.insert(Endpoint::new("dtn://node2").unwrap(), 0.75);
        entries.insert(Endpoint::new("dtn://node3").unwrap(), 0.140625);
        let block = RoutingMetadataBlock {
            owner: Endpoint::new("dtn://node1").unwrap(),
            timestamp: DtnTime { timestamp: 1000 },
            entries,
        };
        let bytes = serde_cbor::to_vec(&block)?;
        let inner: Vec<u8> = serde_cbor::from_slice::<serde_bytes::ByteBuf>(&bytes)?.into_vec();
        let back = RoutingMetadataBlock::try_from(inner)?;
        assert_eq!(block, back);
        Ok(())
    }
}
