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

use std::convert::TryFrom;

use serde::{Deserialize, Serialize, de::Error, de::Visitor, ser::SerializeSeq};
use serde_bytes::{ByteBuf, Bytes};

use crate::{SerializationError, Validate, blockflags::BlockFlags, crc::CRCType};

use self::bundle_age_block::BundleAgeBlock;
use self::hop_count_block::HopCountBlock;
use self::payload_block::PayloadBlock;
use self::previous_node_block::PreviousNodeBlock;
use self::routing_metadata_block::RoutingMetadataBlock;
use self::unknown_block::UnknownBlock;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

pub mod bundle_age_block;
pub mod hop_count_block;
pub mod payload_block;
pub mod previous_node_block;
pub mod routing_metadata_block;
pub mod unknown_block;

/// Registered block type codes. Everything else decodes as
/// [`Block::Unknown`] and is handled according to its block flags.
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum BlockType {
    Payload = 1,
    PreviousNode = 6,
    BundleAge = 7,
    HopCount = 10,
    RoutingMetadata = 193,
}

/// Block-type-specific value of a canonical block.
#[derive(Debug, PartialEq, Clone)]
pub enum Block {
    Payload(PayloadBlock),
    PreviousNode(PreviousNodeBlock),
    BundleAge(BundleAgeBlock),
    HopCount(HopCountBlock),
    RoutingMetadata(RoutingMetadataBlock),
    Unknown(UnknownBlock),
}

impl Block {
    pub fn block_type_code(&self) -> u64 {
        match self {
            Block::Payload(_) => BlockType::Payload.into(),
            Block::PreviousNode(_) => BlockType::PreviousNode.into(),
            Block::BundleAge(_) => BlockType::BundleAge.into(),
            Block::HopCount(_) => BlockType::HopCount.into(),
            Block::RoutingMetadata(_) => BlockType::RoutingMetadata.into(),
            Block::Unknown(b) => b.block_type,
        }
    }
}

impl Validate for Block {
    fn validate(&self) -> bool {
        match self {
            Block::Payload(b) => b.validate(),
            Block::PreviousNode(b) => b.validate(),
            Block::BundleAge(b) => b.validate(),
            Block::HopCount(b) => b.validate(),
            Block::RoutingMetadata(b) => b.validate(),
            Block::Unknown(b) => b.validate(),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct CanonicalBlock {
    pub block: Block,
    pub block_number: u64,
    pub block_flags: BlockFlags,
    pub crc: CRCType,
}

impl Serialize for CanonicalBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let len = if self.crc.has_crc() { 6 } else { 5 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.block.block_type_code())?;
        seq.serialize_element(&self.block_number)?;
        seq.serialize_element(&self.block_flags)?;
        seq.serialize_element(&self.crc)?;
        match &self.block {
            Block::Payload(b) => seq.serialize_element(&b)?,
            Block::PreviousNode(b) => seq.serialize_element(&b)?,
            Block::BundleAge(b) => seq.serialize_element(&b)?,
            Block::HopCount(b) => seq.serialize_element(&b)?,
            Block::RoutingMetadata(b) => seq.serialize_element(&b)?,
            Block::Unknown(b) => seq.serialize_element(&b)?,
        }
        match self.crc {
            CRCType::NoCRC => {}
            CRCType::CRC16(x) => seq.serialize_element(Bytes::new(&x))?,
            CRCType::CRC32(x) => seq.serialize_element(Bytes::new(&x))?,
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for CanonicalBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BlockVisitor;
        impl<'de> Visitor<'de> for BlockVisitor {
            type Value = CanonicalBlock;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("block")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let size = seq.size_hint().ok_or_else(|| {
                    Error::custom("Canonical Block must know the length of its contents")
                })?;
                if !(5..=6).contains(&size) {
                    return Err(Error::invalid_length(size, &"Block has 5 to 6 elements"));
                }

                let block_type_num: u64 = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'block_type'"))?;
                let block_number = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'block_number'"))?;
                let block_flags = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'block_flags'"))?;
                let mut crc: CRCType = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'crc_type'"))?;

                let data: Vec<u8> = seq
                    .next_element::<ByteBuf>()?
                    .ok_or(Error::custom("Error for field 'data'"))?
                    .into_vec();
                let block = match BlockType::try_from(block_type_num) {
                    Ok(BlockType::Payload) => Block::Payload(PayloadBlock::from(data)),
                    Ok(BlockType::PreviousNode) => Block::PreviousNode(
                        PreviousNodeBlock::try_from(data).map_err(Error::custom)?,
                    ),
                    Ok(BlockType::BundleAge) => {
                        Block::BundleAge(BundleAgeBlock::try_from(data).map_err(Error::custom)?)
                    }
                    Ok(BlockType::HopCount) => {
                        Block::HopCount(HopCountBlock::try_from(data).map_err(Error::custom)?)
                    }
                    Ok(BlockType::RoutingMetadata) => Block::RoutingMetadata(
                        RoutingMetadataBlock::try_from(data).map_err(Error::custom)?,
                    ),
                    Err(_) => Block::Unknown(UnknownBlock {
                        block_type: block_type_num,
                        data,
                    }),
                };

                if size == 6 {
                    if !crc.has_crc() {
                        return Err(Error::custom("Block arity announces a CRC but type is 0"));
                    }
                    crc = crc.deserialize_value(&mut seq)?;
                } else if crc.has_crc() {
                    return Err(Error::custom("CRC type set but no checksum present"));
                }

                Ok(CanonicalBlock {
                    block,
                    block_number,
                    block_flags,
                    crc,
                })
            }
        }
        deserializer.deserialize_seq(BlockVisitor)
    }
}

impl Validate for CanonicalBlock {
    fn validate(&self) -> bool {
        if !self.block_flags.validate() {
            return false;
        }
        if matches!(self.block, Block::Payload(_)) && self.block_number != 1 {
            return false;
        }
        self.block.validate()
    }
}

impl CanonicalBlock {
    /// Computes and stores the checksum for the configured CRC type.
    pub fn sign(&mut self) -> Result<(), SerializationError> {
        if !self.crc.has_crc() {
            return Ok(());
        }
        let zeroed = CanonicalBlock {
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
        let zeroed = CanonicalBlock {
            crc: self.crc.zeroed(),
            ..self.clone()
        };
        let data = serde_cbor::to_vec(&zeroed)?;
        Ok(self.crc.compute(&data) == self.crc)
    }
}

#[cfg(test)]
mod tests {
    use super::{Block, CanonicalBlock};
    use crate::{
        blockflags::BlockFlags,
        block::{hop_count_block::HopCountBlock, payload_block::PayloadBlock},
        crc::CRCType,
    };

    #[test]
    fn roundtrip_payload_block() -> Result<(), serde_cbor::Error> {
        let cb = CanonicalBlock {
            block: Block::Payload(PayloadBlock {
                data: vec![0x41, 0x42, 0x43],
            }),
            block_number: 1,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        };
        let bytes = serde_cbor::to_vec(&cb)?;
        let back: CanonicalBlock = serde_cbor::from_slice(&bytes)?;
        assert_eq!(cb, back);
        Ok(())
    }

    #[test]
    fn roundtrip_hop_count_block() -> Result<(), serde_cbor::Error> {
        let cb = CanonicalBlock {
            block: Block::HopCount(HopCountBlock {
                limit: 32,
                count: 3,
            }),
            block_number: 2,
            block_flags: BlockFlags::DELETE_BLOCK_WHEN_NOT_PROCESSABLE,
            crc: CRCType::NoCRC,
        };
        let bytes = serde_cbor::to_vec(&cb)?;
        let back: CanonicalBlock = serde_cbor::from_slice(&bytes)?;
        assert_eq!(cb, back);
        Ok(())
    }

    #[test]
    fn crc_survives_roundtrip_byte_exact() {
        let mut cb = CanonicalBlock {
            block: Block::Payload(PayloadBlock {
                data: b"hello".to_vec(),
            }),
            block_number: 1,
            block_flags: BlockFlags::empty(),
            crc: CRCType::CRC32([0; 4]),
        };
        cb.sign().unwrap();
        assert!(cb.verify_crc().unwrap());

        let bytes = serde_cbor::to_vec(&cb).unwrap();
        let back: CanonicalBlock = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(back.crc, cb.crc);
        assert_eq!(serde_cbor::to_vec(&back).unwrap(), bytes);
        assert!(back.verify_crc().unwrap());
    }
}
