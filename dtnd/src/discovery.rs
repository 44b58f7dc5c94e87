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

//! Codec for neighborhood announcements. The transport spraying these
//! over the local network lives outside the core; only the wire form of
//! one announcement batch is defined here.

use bp7::endpoint::Endpoint;
use serde::{
    Deserialize, Serialize,
    de::{Error, Visitor},
    ser::SerializeSeq,
};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Numeric tags for the convergence-layer types a node can announce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr,
)]
#[repr(u64)]
pub enum ClaType {
    Mtcp = 1,
    Tcpcl = 2,
}

/// One reachable convergence listener of the announcing node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMessage {
    pub cla_type: ClaType,
    pub endpoint: Endpoint,
    pub port: u16,
}

impl Serialize for DiscoveryMessage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.cla_type)?;
        seq.serialize_element(&self.endpoint)?;
        seq.serialize_element(&self.port)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for DiscoveryMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DiscoveryMessageVisitor;
        impl<'de> Visitor<'de> for DiscoveryMessageVisitor {
            type Value = DiscoveryMessage;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("discovery message")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let cla_type = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'cla_type'"))?;
                let endpoint = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'endpoint'"))?;
                let port = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'port'"))?;
                Ok(DiscoveryMessage {
                    cla_type,
                    endpoint,
                    port,
                })
            }
        }
        deserializer.deserialize_seq(DiscoveryMessageVisitor)
    }
}

/// Encodes one announcement batch as a CBOR array of messages.
pub fn encode_announcement(
    messages: &[DiscoveryMessage],
) -> Result<Vec<u8>, serde_cbor::Error> {
    serde_cbor::to_vec(&messages)
}

pub fn decode_announcement(data: &[u8]) -> Result<Vec<DiscoveryMessage>, serde_cbor::Error> {
    serde_cbor::from_slice(data)
}

#[cfg(test)]
mod tests {
    use bp7::endpoint::Endpoint;

    use super::{ClaType, DiscoveryMessage, decode_announcement, encode_announcement};

    #[test]
    fn announcement_roundtrip_preserves_order() {
        let messages = vec![
            DiscoveryMessage {
                cla_type: ClaType::Mtcp,
                endpoint: Endpoint::new("dtn://node1").unwrap(),
                port: 16162,
            },
            DiscoveryMessage {
                cla_type: ClaType::Tcpcl,
                endpoint: Endpoint::new("dtn://node1").unwrap(),
                port: 4556,
            },
        ];
        let encoded = encode_announcement(&messages).unwrap();
        let decoded = decode_announcement(&encoded).unwrap();
        assert_eq!(decoded, messages);
    }

    #[test]
    fn cla_type_codes_are_stable() {
        // 1 = MTCP, 2 = TCPCL
        assert_eq!(serde_cbor::to_vec(&ClaType::Mtcp).unwrap(), [0x01]);
        assert_eq!(serde_cbor::to_vec(&ClaType::Tcpcl).unwrap(), [0x02]);
    }

    #[test]
    fn unknown_cla_type_is_rejected() {
        // [[3, endpoint, 80]]
        let msg = DiscoveryMessage {
            cla_type: ClaType::Mtcp,
            endpoint: Endpoint::new("dtn://node1").unwrap(),
            port: 80,
        };
        let mut encoded = encode_announcement(&[msg]).unwrap();
        // patch the type tag to an unassigned value
        let pos = encoded
            .iter()
            .position(|b| *b == 0x01)
            .expect("tag must be present");
        encoded[pos] = 0x03;
        assert!(decode_announcement(&encoded).is_err());
    }
}
