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

use serde::{Deserialize, Serialize, de::Error, de::Visitor, ser::SerializeSeq};
use serde_bytes::Bytes;

use crate::{
    SerializationError, Validate, bundleflags::BundleFlags, crc::CRCType, endpoint::Endpoint,
    time::CreationTimestamp,
};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PrimaryBlock {
    pub version: u64,
    pub bundle_processing_flags: BundleFlags,
    pub crc: CRCType,
    pub destination_endpoint: Endpoint,
    pub source_node: Endpoint,
    pub report_to: Endpoint,
    pub creation_timestamp: CreationTimestamp,
    /// Microseconds after the creation timestamp at which the bundle expires.
    pub lifetime: u64,
    pub fragment_offset: Option<u64>,
    pub total_data_length: Option<u64>,
}

impl Serialize for PrimaryBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut len = 8;
        if self.fragment_offset.is_some() {
            len += 2;
        }
        if self.crc.has_crc() {
            len += 1;
        }
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.version)?;
        seq.serialize_element(&self.bundle_processing_flags)?;
        seq.serialize_element(&self.crc)?;
        seq.serialize_element(&self.destination_endpoint)?;
        seq.serialize_element(&self.source_node)?;
        seq.serialize_element(&self.report_to)?;
        seq.serialize_element(&self.creation_timestamp)?;
        seq.serialize_element(&self.lifetime)?;
        if self.fragment_offset.is_some() {
            seq.serialize_element(&self.fragment_offset.unwrap())?;
            seq.serialize_element(&self.total_data_length.unwrap())?;
        }
        match self.crc {
            CRCType::NoCRC => {}
            CRCType::CRC16(x) => seq.serialize_element(Bytes::new(&x))?,
            CRCType::CRC32(x) => seq.serialize_element(Bytes::new(&x))?,
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for PrimaryBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrimaryBlockVisitor;
        impl<'de> Visitor<'de> for PrimaryBlockVisitor {
            type Value = PrimaryBlock;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("primary block")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let size = seq
                    .size_hint()
                    .ok_or_else(|| Error::custom("Primary block must be a definite-length array"))?;
                if !(8..=11).contains(&size) {
                    return Err(Error::invalid_length(
                        size,
                        &"Primary block has 8 to 11 elements",
                    ));
                }
                let version = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'version'"))?;
                let bundle_processing_flags = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'bundle_processing_flags'"))?;
                let mut crc: CRCType = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'crc_type'"))?;
                let destination_endpoint = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'destination_endpoint'"))?;
                let source_node = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'source_node'"))?;
                let report_to = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'report_to'"))?;
                let creation_timestamp = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'creation_timestamp'"))?;
                let lifetime = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'lifetime'"))?;

                let (fragment_offset, total_data_length) = if size == 10 || size == 11 {
                    (
                        Some(
                            seq.next_element()?
                                .ok_or(Error::custom("Error for field 'fragment_offset'"))?,
                        ),
                        Some(
                            seq.next_element()?
                                .ok_or(Error::custom("Error for field 'total_data_length'"))?,
                        ),
                    )
                } else {
                    (None, None)
                };

                if size == 9 || size == 11 {
                    if !crc.has_crc() {
                        return Err(Error::custom("Block arity announces a CRC but type is 0"));
                    }
                    crc = crc.deserialize_value(&mut seq)?;
                } else if crc.has_crc() {
                    return Err(Error::custom("CRC type set but no checksum present"));
                }

                Ok(PrimaryBlock {
                    version,
                    bundle_processing_flags,
                    crc,
                    destination_endpoint,
                    source_node,
                    report_to,
                    creation_timestamp,
                    lifetime,
                    fragment_offset,
                    total_data_length,
                })
            }
        }
        deserializer.deserialize_seq(PrimaryBlockVisitor)
    }
}

impl Validate for PrimaryBlock {
    fn validate(&self) -> bool {
        if self.version != 7 {
            return false;
        }
        if self.lifetime == 0 {
            return false;
        }
        if !self.bundle_processing_flags.validate() {
            return false;
        }
        if self.fragment_offset.is_some() != self.total_data_length.is_some() {
            return false;
        }
        if self
            .bundle_processing_flags
            .contains(BundleFlags::FRAGMENT)
            != self.fragment_offset.is_some()
        {
            return false;
        }
        if !self.source_node.validate()
            || !self.destination_endpoint.validate()
            || !self.report_to.validate()
        {
            return false;
        }
        // An anonymous source can neither be fragmented nor report back.
        if self.source_node.is_null_endpoint()
            && (!self
                .bundle_processing_flags
                .contains(BundleFlags::MUST_NOT_FRAGMENT)
                || self
                    .bundle_processing_flags
                    .intersects(BundleFlags::status_requests()))
        {
            return false;
        }
        true
    }
}

impl PrimaryBlock {
    /// Computes and stores the checksum for the configured CRC type.
    pub fn sign(&mut self) -> Result<(), SerializationError> {
        if !self.crc.has_crc() {
            return Ok(());
        }
        let zeroed = PrimaryBlock {
            crc: self.crc.zeroed(),
            ..self.clone()
        };
        let data = serde_cbor::to_vec(&zeroed)?;
        self.crc = self.crc.compute(&data);
        Ok(())
    }

    /// Recomputes the checksum and compares it against the stored one.
    pub fn verify_crc(&self) -> Result<bool, SerializationError> {
        if !self.crc.has_crc() {
            return Ok(true);
        }
        let zeroed = PrimaryBlock {
            crc: self.crc.zeroed(),
            ..self.clone()
        };
        let data = serde_cbor::to_vec(&zeroed)?;
        Ok(self.crc.compute(&data) == self.crc)
    }

    pub fn equals_ignoring_fragment_offset(&self, other: &PrimaryBlock) -> bool {
        let self_cleaned = PrimaryBlock {
            fragment_offset: None,
            ..self.clone()
        };
        let other_cleaned = PrimaryBlock {
            fragment_offset: None,
            ..other.clone()
        };
        self_cleaned == other_cleaned
    }

    pub fn equals_ignoring_fragment_info(&self, other: &PrimaryBlock) -> bool {
        let self_cleaned = PrimaryBlock {
            fragment_offset: None,
            total_data_length: None,
            ..self.clone()
        };
        let other_cleaned = PrimaryBlock {
            fragment_offset: None,
            total_data_length: None,
            ..other.clone()
        };
        self_cleaned == other_cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::PrimaryBlock;
    use crate::{
        Validate,
        bundleflags::BundleFlags,
        crc::CRCType,
        endpoint::Endpoint,
        time::{CreationTimestamp, DtnTime},
    };

    fn block() -> PrimaryBlock {
        PrimaryBlock {
            version: 7,
            bundle_processing_flags: BundleFlags::MUST_NOT_FRAGMENT,
            crc: CRCType::NoCRC,
            destination_endpoint: Endpoint::new("dtn://node2/sink").unwrap(),
            source_node: Endpoint::new("dtn://node1/app").unwrap(),
            report_to: Endpoint::new("dtn://node1/app").unwrap(),
            creation_timestamp: CreationTimestamp {
                creation_time: DtnTime { timestamp: 700000000 },
                sequence_number: 0,
            },
            lifetime: 3_600_000_000,
            fragment_offset: None,
            total_data_length: None,
        }
    }

    #[test]
    fn roundtrip_without_crc() -> Result<(), serde_cbor::Error> {
        let b = block();
        let bytes = serde_cbor::to_vec(&b)?;
        let back: PrimaryBlock = serde_cbor::from_slice(&bytes)?;
        assert_eq!(b, back);
        Ok(())
    }

    #[test]
    fn sign_and_verify_crc16() {
        let mut b = block();
        b.crc = CRCType::CRC16([0; 2]);
        b.sign().unwrap();
        assert!(b.verify_crc().unwrap());
        assert_ne!(b.crc, CRCType::CRC16([0; 2]));

        let bytes = serde_cbor::to_vec(&b).unwrap();
        let back: PrimaryBlock = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(back.crc, b.crc);
        assert!(back.verify_crc().unwrap());
    }

    #[test]
    fn sign_and_verify_crc32() {
        let mut b = block();
        b.crc = CRCType::CRC32([0; 4]);
        b.sign().unwrap();
        assert!(b.verify_crc().unwrap());

        // a mutated block must fail verification
        b.lifetime += 1;
        assert!(!b.verify_crc().unwrap());
    }

    #[test]
    fn validation_rules() {
        let mut b = block();
        assert!(b.validate());

        b.lifetime = 0;
        assert!(!b.validate());

        let mut b = block();
        b.version = 6;
        assert!(!b.validate());

        // fragment flag must match fragment fields
        let mut b = block();
        b.bundle_processing_flags = BundleFlags::FRAGMENT;
        assert!(!b.validate());
        b.fragment_offset = Some(0);
        b.total_data_length = Some(1024);
        assert!(b.validate());

        // null source may not request reports
        let mut b = block();
        b.source_node = Endpoint::none();
        b.bundle_processing_flags =
            BundleFlags::MUST_NOT_FRAGMENT | BundleFlags::BUNDLE_DELIVERY_STATUS_REQUESTED;
        assert!(!b.validate());
        b.bundle_processing_flags = BundleFlags::MUST_NOT_FRAGMENT;
        assert!(b.validate());
    }
}
