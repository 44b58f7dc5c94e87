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

use std::fmt::Display;

use serde::{
    Deserialize, Serialize,
    de::{Error, Unexpected, Visitor},
    ser::SerializeSeq,
};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::Validate;

#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq)]
#[repr(u64)]
enum EndpointScheme {
    Dtn = 1,
    Ipn = 2,
}

/// An endpoint identifier as used in primary blocks and routing state.
///
/// `dtn:none` is folded into the DTN variant (the URI "none") so the wire
/// codec stays a plain two-element array of scheme code and SSP.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub enum Endpoint {
    DTN(DtnEndpoint),
    IPN(IpnEndpoint),
}

impl Serialize for Endpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(2))?;
        match self {
            Endpoint::DTN(e) => {
                seq.serialize_element(&EndpointScheme::Dtn)?;
                seq.serialize_element(e)?;
            }
            Endpoint::IPN(e) => {
                seq.serialize_element(&EndpointScheme::Ipn)?;
                seq.serialize_element(e)?;
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EndpointVisitor;
        impl<'de> Visitor<'de> for EndpointVisitor {
            type Value = Endpoint;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("endpoint")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let scheme: EndpointScheme = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'scheme'"))?;
                match scheme {
                    EndpointScheme::Dtn => {
                        let endpoint: DtnEndpoint = seq
                            .next_element()?
                            .ok_or(Error::custom("Error for field 'dtn_endpoint'"))?;
                        Ok(Endpoint::DTN(endpoint))
                    }
                    EndpointScheme::Ipn => {
                        let endpoint: IpnEndpoint = seq
                            .next_element()?
                            .ok_or(Error::custom("Error for field 'ipn_endpoint'"))?;
                        Ok(Endpoint::IPN(endpoint))
                    }
                }
            }
        }
        deserializer.deserialize_seq(EndpointVisitor)
    }
}

impl Validate for Endpoint {
    fn validate(&self) -> bool {
        match self {
            Endpoint::DTN(e) => e.validate(),
            Endpoint::IPN(e) => e.validate(),
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::DTN(e) => e.fmt(f),
            Endpoint::IPN(e) => e.fmt(f),
        }
    }
}

impl Endpoint {
    pub fn new(uri: &str) -> Option<Self> {
        let (scheme, ssp) = uri.split_once(':')?;
        match scheme {
            "dtn" => Some(Endpoint::DTN(DtnEndpoint::from_ssp(ssp)?)),
            "ipn" => Some(Endpoint::IPN(IpnEndpoint::from_ssp(ssp)?)),
            _ => None,
        }
    }

    /// The null endpoint `dtn:none`.
    pub fn none() -> Self {
        Endpoint::DTN(DtnEndpoint {
            uri: String::from("none"),
        })
    }

    pub fn is_null_endpoint(&self) -> bool {
        match self {
            Endpoint::DTN(e) => e.is_null_endpoint(),
            Endpoint::IPN(_) => false,
        }
    }

    /// Whether this EID names exactly one registration. `dtn:none` is a
    /// singleton, as is any dtn EID with a non-empty demux part and every
    /// ipn EID.
    pub fn is_singleton(&self) -> bool {
        match self {
            Endpoint::DTN(e) => e.is_null_endpoint() || !e.demux().is_empty(),
            Endpoint::IPN(_) => true,
        }
    }

    /// True if both endpoints belong to the same node authority.
    pub fn matches_node(&self, other: &Endpoint) -> bool {
        match self {
            Endpoint::DTN(s) => matches!(other, Endpoint::DTN(o) if s.matches_node(o)),
            Endpoint::IPN(s) => matches!(other, Endpoint::IPN(o) if s.matches_node(o)),
        }
    }

    pub fn node_endpoint(&self) -> Endpoint {
        match self {
            Endpoint::DTN(s) => Endpoint::DTN(s.node_endpoint()),
            Endpoint::IPN(s) => Endpoint::IPN(s.node_endpoint()),
        }
    }
}

/// `dtn://authority/demux` or the null endpoint (`uri == "none"`).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct DtnEndpoint {
    pub uri: String,
}

impl DtnEndpoint {
    fn from_ssp(ssp: &str) -> Option<Self> {
        if ssp == "none" {
            return Some(DtnEndpoint {
                uri: String::from("none"),
            });
        }
        let rest = ssp.strip_prefix("//")?;
        if rest.is_empty() || rest.starts_with('/') {
            return None;
        }
        Some(DtnEndpoint {
            uri: String::from(ssp),
        })
    }

    fn is_null_endpoint(&self) -> bool {
        self.uri == "none"
    }

    /// The authority (node name) part of the URI.
    pub fn authority(&self) -> &str {
        self.uri[2..]
            .split('/')
            .next()
            .expect("There is always a first element")
    }

    /// The demultiplexer path behind the authority, without a leading slash.
    pub fn demux(&self) -> &str {
        match self.uri[2..].split_once('/') {
            Some((_, demux)) => demux,
            None => "",
        }
    }

    pub fn matches_node(&self, other: &DtnEndpoint) -> bool {
        if self.is_null_endpoint() || other.is_null_endpoint() {
            return self.uri == other.uri;
        }
        self.authority() == other.authority()
    }

    pub fn node_endpoint(&self) -> DtnEndpoint {
        if self.is_null_endpoint() {
            return self.clone();
        }
        DtnEndpoint {
            uri: format!("//{}", self.authority()),
        }
    }
}

impl Serialize for DtnEndpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.is_null_endpoint() {
            serializer.serialize_u64(0)
        } else {
            serializer.serialize_str(&self.uri)
        }
    }
}

impl<'de> Deserialize<'de> for DtnEndpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DtnEndpointVisitor;
        impl Visitor<'_> for DtnEndpointVisitor {
            type Value = DtnEndpoint;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("DTN endpoint")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if v == 0 {
                    return Ok(DtnEndpoint {
                        uri: String::from("none"),
                    });
                }
                Err(Error::invalid_value(
                    Unexpected::Unsigned(v),
                    &"the only numeric dtn SSP is 0",
                ))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                DtnEndpoint::from_ssp(v)
                    .ok_or_else(|| Error::invalid_value(Unexpected::Str(v), &"dtn://authority/demux"))
            }
        }
        deserializer.deserialize_any(DtnEndpointVisitor)
    }
}

impl Validate for DtnEndpoint {
    fn validate(&self) -> bool {
        self.uri == "none" || self.uri.starts_with("//")
    }
}

impl Display for DtnEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("dtn:{}", self.uri))
    }
}

/// `ipn:node.service`, both parts 64-bit unsigned.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Clone, Copy, Hash)]
pub struct IpnEndpoint {
    pub node: u64,
    pub service: u64,
}

impl Validate for IpnEndpoint {
    fn validate(&self) -> bool {
        self.node >= 1
    }
}

impl IpnEndpoint {
    fn from_ssp(ssp: &str) -> Option<Self> {
        let (node, service) = ssp.split_once('.')?;
        let node: u64 = node.parse().ok()?;
        let service: u64 = service.parse().ok()?;
        if node == 0 {
            // ipn:0.x is reserved and never a valid node
            return None;
        }
        Some(IpnEndpoint { node, service })
    }

    pub fn matches_node(&self, other: &IpnEndpoint) -> bool {
        self.node == other.node
    }

    pub fn node_endpoint(&self) -> IpnEndpoint {
        IpnEndpoint {
            node: self.node,
            service: 0,
        }
    }
}

impl Display for IpnEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("ipn:{}.{}", self.node, self.service))
    }
}

#[cfg(test)]
mod tests {
    use super::Endpoint;

    #[test]
    fn parse_dtn_endpoint() {
        let e = Endpoint::new("dtn://node1/incoming").unwrap();
        match &e {
            Endpoint::DTN(d) => {
                assert_eq!(d.authority(), "node1");
                assert_eq!(d.demux(), "incoming");
            }
            Endpoint::IPN(_) => panic!("wrong scheme"),
        }
        assert_eq!(e.to_string(), "dtn://node1/incoming");
        assert!(e.is_singleton());
    }

    #[test]
    fn parse_null_endpoint() {
        let e = Endpoint::new("dtn:none").unwrap();
        assert!(e.is_null_endpoint());
        assert_eq!(e, Endpoint::none());
        assert_eq!(e.to_string(), "dtn:none");
    }

    #[test]
    fn parse_ipn_endpoint() {
        let e = Endpoint::new("ipn:23.42").unwrap();
        assert_eq!(e.to_string(), "ipn:23.42");
        assert!(e.matches_node(&Endpoint::new("ipn:23.7").unwrap()));
        assert!(!e.matches_node(&Endpoint::new("ipn:24.42").unwrap()));
    }

    #[test]
    fn reject_invalid() {
        assert!(Endpoint::new("ipn:0.0").is_none());
        assert!(Endpoint::new("dtn:node1").is_none());
        assert!(Endpoint::new("dtn:///demux").is_none());
        assert!(Endpoint::new("mailto:a@b").is_none());
        assert!(Endpoint::new("dtn//missing-colon").is_none());
    }

    #[test]
    fn node_matching() {
        let a = Endpoint::new("dtn://node1/a").unwrap();
        let b = Endpoint::new("dtn://node1/b").unwrap();
        let c = Endpoint::new("dtn://node2/a").unwrap();
        assert!(a.matches_node(&b));
        assert!(!a.matches_node(&c));
        assert_eq!(a.node_endpoint(), Endpoint::new("dtn://node1").unwrap());
        assert!(!a.matches_node(&Endpoint::none()));
    }

    #[test]
    fn serialization_roundtrip() -> Result<(), serde_cbor::Error> {
        for uri in ["dtn:none", "dtn://node1/incoming", "ipn:1.7"] {
            let e = Endpoint::new(uri).unwrap();
            let bytes = serde_cbor::to_vec(&e)?;
            let back: Endpoint = serde_cbor::from_slice(&bytes)?;
            assert_eq!(e, back);
        }
        Ok(())
    }

    #[test]
    fn null_endpoint_encodes_as_zero() -> Result<(), serde_cbor::Error> {
        // [1, 0]
        assert_eq!(serde_cbor::to_vec(&Endpoint::none())?, [0x82, 0x01, 0x00]);
        Ok(())
    }
}
