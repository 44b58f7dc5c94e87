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

use std::{
    cmp::min,
    collections::HashSet,
    convert::{TryFrom, TryInto},
    fmt::{Display, Write},
};

use binascii::hex2bin;
use serde::{Deserialize, Serialize, de::Error, de::Visitor, ser::SerializeSeq};

use crate::{
    CrcError, FragmentationError, SerializationError, Validate,
    block::{Block, CanonicalBlock, payload_block::PayloadBlock,
        previous_node_block::PreviousNodeBlock},
    blockflags::BlockFlags,
    bundleflags::BundleFlags,
    endpoint::Endpoint,
    primaryblock::PrimaryBlock,
    time::CreationTimestamp,
};

/// The logical identity of a bundle: source, creation timestamp and, for
/// fragments, the position inside the original payload.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize, Deserialize)]
pub struct BundleId {
    pub source: Endpoint,
    pub timestamp: CreationTimestamp,
    pub fragment_offset: Option<u64>,
    pub total_data_length: Option<u64>,
}

impl BundleId {
    /// The identity with fragment information elided. All fragments of one
    /// bundle share their scrubbed id, which is what keys the store.
    pub fn scrubbed(&self) -> BundleId {
        BundleId {
            fragment_offset: None,
            total_data_length: None,
            ..self.clone()
        }
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment_offset.is_some()
    }
}

impl Display for BundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.source, self.timestamp.creation_time.timestamp, self.timestamp.sequence_number
        )?;
        if let (Some(offset), Some(length)) = (self.fragment_offset, self.total_data_length) {
            write!(f, "-{offset}-{length}")?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Bundle {
    pub primary_block: PrimaryBlock,
    pub blocks: Vec<CanonicalBlock>,
}

impl Serialize for Bundle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // None makes this an indefinite-length array, opened with 0x9F and
        // closed with the 0xFF stream break as the wire format requires.
        let mut seq = serializer.serialize_seq(None)?;
        seq.serialize_element(&self.primary_block)?;
        for block in &self.blocks {
            seq.serialize_element(&block)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Bundle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BundleVisitor;
        impl<'de> Visitor<'de> for BundleVisitor {
            type Value = Bundle;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("bundle")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let primary_block = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'primary_block'"))?;
                let mut blocks = Vec::new();
                while let Some(block) = seq.next_element()? {
                    blocks.push(block);
                }

                if blocks.is_empty() {
                    return Err(Error::invalid_length(0, &"must have at least one block"));
                }

                Ok(Bundle {
                    primary_block,
                    blocks,
                })
            }
        }
        deserializer.deserialize_seq(BundleVisitor)
    }
}

impl Validate for Bundle {
    fn validate(&self) -> bool {
        if !self.primary_block.validate() {
            return false;
        }
        let mut block_numbers = HashSet::new();
        let mut payload_count = 0;
        let mut previous_node_count = 0;
        let mut bundle_age_count = 0;
        let mut hop_count_count = 0;
        for block in &self.blocks {
            if !block.validate() {
                return false;
            }
            if !block_numbers.insert(block.block_number) {
                return false;
            }
            match &block.block {
                Block::Payload(_) => payload_count += 1,
                Block::PreviousNode(_) => previous_node_count += 1,
                Block::BundleAge(_) => bundle_age_count += 1,
                Block::HopCount(_) => hop_count_count += 1,
                Block::RoutingMetadata(_) | Block::Unknown(_) => {}
            }
        }
        if payload_count != 1 || previous_node_count > 1 || bundle_age_count > 1 || hop_count_count > 1 {
            return false;
        }
        // the payload is always the last block of a bundle
        if !matches!(
            self.blocks.last().map(|b| &b.block),
            Some(Block::Payload(_))
        ) {
            return false;
        }
        // without a clock the creating node must have attached a bundle age
        if self.primary_block.creation_timestamp.creation_time.timestamp == 0
            && bundle_age_count == 0
        {
            return false;
        }
        true
    }
}

impl TryFrom<&[u8]> for Bundle {
    type Error = SerializationError;

    /// Decodes a bundle and verifies every CRC it carries. A partially
    /// decodable or checksum-broken bundle is never returned.
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bundle: Bundle = serde_cbor::from_slice(value)?;
        if !bundle.primary_block.verify_crc()? {
            return Err(CrcError { block_number: None }.into());
        }
        for block in &bundle.blocks {
            if !block.verify_crc()? {
                return Err(CrcError {
                    block_number: Some(block.block_number),
                }
                .into());
            }
        }
        Ok(bundle)
    }
}

impl TryFrom<Vec<u8>> for Bundle {
    type Error = SerializationError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        value.as_slice().try_into()
    }
}

impl TryFrom<Bundle> for Vec<u8> {
    type Error = SerializationError;

    fn try_from(value: Bundle) -> Result<Self, Self::Error> {
        (&value).try_into()
    }
}

impl TryFrom<&Bundle> for Vec<u8> {
    type Error = SerializationError;

    fn try_from(value: &Bundle) -> Result<Self, Self::Error> {
        serde_cbor::to_vec(value).map_err(SerializationError::SerializationError)
    }
}

impl Bundle {
    pub fn id(&self) -> BundleId {
        BundleId {
            source: self.primary_block.source_node.clone(),
            timestamp: self.primary_block.creation_timestamp.clone(),
            fragment_offset: self.primary_block.fragment_offset,
            total_data_length: self.primary_block.total_data_length,
        }
    }

    pub fn as_hex(&self) -> Result<String, SerializationError> {
        let vec: Vec<u8> = self.try_into()?;
        let mut s = String::with_capacity(2 * vec.len());
        for b in vec {
            write!(&mut s, "{:02X?}", &b).map_err(|_| SerializationError::ConversionError)?;
        }
        Ok(s)
    }

    pub fn from_hex(hex: &str) -> Result<Bundle, SerializationError> {
        let mut val = vec![0; hex.len() / 2];
        hex2bin(hex.as_bytes(), &mut val).map_err(|_| SerializationError::ConversionError)?;
        val.try_into()
    }

    pub fn is_administrative_record(&self) -> bool {
        self.primary_block
            .bundle_processing_flags
            .contains(BundleFlags::ADMINISTRATIVE_RECORD)
    }

    fn payload_canonical_block(&self) -> &CanonicalBlock {
        self.blocks
            .iter()
            .find(|b| matches!(b.block, Block::Payload(_)))
            .expect("All Bundles MUST contain a payload block")
    }

    pub fn payload_block(&self) -> &PayloadBlock {
        match &self.payload_canonical_block().block {
            Block::Payload(p) => p,
            _ => unreachable!("The payload block is always the payload block"),
        }
    }

    fn next_free_block_number(&self) -> u64 {
        self.blocks
            .iter()
            .map(|b| b.block_number)
            .max()
            .unwrap_or(1)
            + 1
    }

    pub fn previous_node(&self) -> Option<&Endpoint> {
        self.blocks.iter().find_map(|b| match &b.block {
            Block::PreviousNode(pn) => Some(&pn.previous_node),
            _ => None,
        })
    }

    /// Records `endpoint` as the node this bundle leaves from, replacing an
    /// existing previous-node block or prepending a fresh one.
    pub fn set_previous_node(&mut self, endpoint: &Endpoint) {
        for block in &mut self.blocks {
            if let Block::PreviousNode(pn) = &mut block.block {
                pn.previous_node = endpoint.clone();
                return;
            }
        }
        let block_number = self.next_free_block_number();
        self.blocks.insert(
            0,
            CanonicalBlock {
                block: Block::PreviousNode(PreviousNodeBlock {
                    previous_node: endpoint.clone(),
                }),
                block_number,
                block_flags: BlockFlags::empty(),
                crc: crate::crc::CRCType::NoCRC,
            },
        );
    }

    /// Increments the hop count if the bundle carries one and reports
    /// whether the limit is now exceeded.
    pub fn increment_hop_count(&mut self) -> bool {
        for block in &mut self.blocks {
            if let Block::HopCount(hc) = &mut block.block {
                hc.increment();
                return hc.is_exceeded();
            }
        }
        false
    }

    pub fn bundle_age(&self) -> Option<u64> {
        self.blocks.iter().find_map(|b| match &b.block {
            Block::BundleAge(ab) => Some(ab.age),
            _ => None,
        })
    }

    /// Adds `elapsed_us` to the bundle age block, returning the new age if
    /// the bundle carries one.
    pub fn update_bundle_age(&mut self, elapsed_us: u64) -> Option<u64> {
        for block in &mut self.blocks {
            if let Block::BundleAge(ab) = &mut block.block {
                ab.age += elapsed_us;
                return Some(ab.age);
            }
        }
        None
    }

    /// True once wall-clock time passed creation time plus lifetime. Always
    /// false for bundles without a clock (creation time 0); their age block
    /// is authoritative instead.
    pub fn is_lifetime_exceeded(&self) -> bool {
        let creation = self.primary_block.creation_timestamp.creation_time;
        if creation.timestamp == 0 {
            return false;
        }
        let now = crate::time::DtnTime::now();
        now.seconds_since(creation) * 1_000_000 > self.primary_block.lifetime
    }

    /// Splits this bundle into fragments no larger than `max_size` bytes on
    /// the wire. Extension blocks go into the first fragment, those flagged
    /// MUST_REPLICATE_TO_ALL_FRAGMENTS into every fragment.
    pub fn fragment(self, max_size: u64) -> Result<Vec<Bundle>, FragmentationError> {
        if self
            .primary_block
            .bundle_processing_flags
            .contains(BundleFlags::MUST_NOT_FRAGMENT)
        {
            return Err(FragmentationError::MustNotFragment);
        }
        if self
            .primary_block
            .bundle_processing_flags
            .contains(BundleFlags::FRAGMENT)
            && (self.primary_block.fragment_offset.is_none()
                || self.primary_block.total_data_length.is_none())
        {
            return Err(FragmentationError::BundleInvalid);
        }

        let payload = self.payload_block().data.clone();
        let payload_length = payload.len() as u64;
        let global_payload_offset = self.primary_block.fragment_offset.unwrap_or(0);
        let total_data_length = self
            .primary_block
            .total_data_length
            .unwrap_or(payload_length);

        let new_primary_block = PrimaryBlock {
            bundle_processing_flags: self.primary_block.bundle_processing_flags
                | BundleFlags::FRAGMENT,
            fragment_offset: Some(0),
            total_data_length: Some(total_data_length),
            ..self.primary_block.clone()
        };

        let first_fragment_blocks: Vec<CanonicalBlock> = self
            .blocks
            .iter()
            .filter(|b| !matches!(b.block, Block::Payload(_)))
            .cloned()
            .collect();
        let fragment_blocks: Vec<CanonicalBlock> = first_fragment_blocks
            .iter()
            .filter(|b| {
                b.block_flags
                    .contains(BlockFlags::MUST_REPLICATE_TO_ALL_FRAGMENTS)
            })
            .cloned()
            .collect();

        let payload_canonical_block = self.payload_canonical_block();
        let payload_template = CanonicalBlock {
            block: Block::Payload(PayloadBlock { data: Vec::new() }),
            block_flags: payload_canonical_block.block_flags,
            block_number: payload_canonical_block.block_number,
            crc: payload_canonical_block.crc,
        };

        // Overhead of a fragment with an empty payload; what is left of
        // max_size after it is payload budget.
        let empty_overhead = |blocks: &[CanonicalBlock]| -> Result<u64, FragmentationError> {
            let mut probe = Bundle {
                primary_block: new_primary_block.clone(),
                blocks: blocks.to_vec(),
            };
            probe.blocks.push(payload_template.clone());
            Ok(Vec::<u8>::try_from(&probe)?.len() as u64 + 9) // u64 length header upper bound
        };
        let first_overhead = empty_overhead(&first_fragment_blocks)?;
        let rest_overhead = empty_overhead(&fragment_blocks)?;
        if first_overhead >= max_size || rest_overhead >= max_size {
            return Err(FragmentationError::CanNotFragmentThatSmall(
                first_overhead.max(rest_overhead),
            ));
        }

        let mut fragments = Vec::new();
        let mut current_payload_offset: u64 = 0;
        while current_payload_offset < payload_length {
            let first = current_payload_offset == 0;
            let overhead = if first { first_overhead } else { rest_overhead };
            let payload_budget = min(payload_length - current_payload_offset, max_size - overhead);

            let mut fragment = Bundle {
                primary_block: PrimaryBlock {
                    fragment_offset: Some(global_payload_offset + current_payload_offset),
                    ..new_primary_block.clone()
                },
                blocks: if first {
                    first_fragment_blocks.clone()
                } else {
                    fragment_blocks.clone()
                },
            };
            fragment.blocks.push(CanonicalBlock {
                block: Block::Payload(PayloadBlock {
                    data: payload[current_payload_offset as usize
                        ..(current_payload_offset + payload_budget) as usize]
                        .to_vec(),
                }),
                ..payload_template.clone()
            });
            fragments.push(fragment);
            current_payload_offset += payload_budget;
        }

        Ok(fragments)
    }

    /// Whether `fragments` (sorted in place by offset) cover the whole
    /// original payload without gaps.
    pub fn can_reassemble(fragments: &mut Vec<Bundle>) -> bool {
        if fragments.is_empty() {
            return false;
        }
        let first = &fragments[0];
        if !first
            .primary_block
            .bundle_processing_flags
            .contains(BundleFlags::FRAGMENT)
        {
            return false;
        }
        if !fragments.iter().all(|item| {
            first
                .primary_block
                .equals_ignoring_fragment_offset(&item.primary_block)
        }) {
            return false;
        }

        let total_data_length = match fragments[0].primary_block.total_data_length {
            Some(len) => len,
            None => return false,
        };

        fragments.sort_by_key(|b| b.primary_block.fragment_offset);
        if fragments[0].primary_block.fragment_offset != Some(0) {
            return false;
        }
        let mut covered: u64 = 0;
        for fragment in fragments.iter() {
            let offset = fragment.primary_block.fragment_offset.unwrap();
            if offset > covered {
                return false;
            }
            covered = covered.max(offset + fragment.payload_block().data.len() as u64);
        }
        covered == total_data_length
    }

    /// Reassembles the original bundle, or gives the fragments back when
    /// pieces are still missing.
    pub fn reassemble(mut fragments: Vec<Bundle>) -> Result<Bundle, Vec<Bundle>> {
        if !Bundle::can_reassemble(&mut fragments) {
            return Err(fragments);
        }

        let total_data_length = fragments[0].primary_block.total_data_length.unwrap();
        let mut data: Vec<u8> = Vec::with_capacity(total_data_length as usize);
        for fragment in &fragments {
            let offset = fragment.primary_block.fragment_offset.unwrap() as usize;
            let payload = &fragment.payload_block().data;
            if offset + payload.len() <= data.len() {
                continue;
            }
            let start = data.len() - offset;
            data.extend_from_slice(&payload[start..]);
        }

        let mut bundle = fragments.swap_remove(0);
        bundle
            .primary_block
            .bundle_processing_flags
            .remove(BundleFlags::FRAGMENT);
        bundle.primary_block.fragment_offset = None;
        bundle.primary_block.total_data_length = None;
        for block in &mut bundle.blocks {
            if let Block::Payload(p) = &mut block.block {
                p.data = data;
                break;
            }
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Validate,
        block::{
            Block, CanonicalBlock, hop_count_block::HopCountBlock, payload_block::PayloadBlock,
        },
        blockflags::BlockFlags,
        bundleflags::BundleFlags,
        crc::CRCType,
        endpoint::Endpoint,
        primaryblock::PrimaryBlock,
        time::{CreationTimestamp, DtnTime},
    };

    use super::Bundle;

    fn get_bundle_data() -> Vec<u8> {
        (0..1024).map(|i| i as u8).collect()
    }

    fn get_test_bundle(data: Vec<u8>) -> Bundle {
        Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::BUNDLE_DELIVERY_STATUS_REQUESTED,
                crc: CRCType::NoCRC,
                destination_endpoint: Endpoint::new("dtn://node31/mavlink").unwrap(),
                source_node: Endpoint::new("dtn://node2/incoming").unwrap(),
                report_to: Endpoint::new("dtn://node2/incoming").unwrap(),
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime {
                        timestamp: 681253789,
                    },
                    sequence_number: 0,
                },
                lifetime: 3_600_000_000,
                fragment_offset: None,
                total_data_length: None,
            },
            blocks: vec![
                CanonicalBlock {
                    block: Block::HopCount(HopCountBlock {
                        limit: 32,
                        count: 0,
                    }),
                    block_number: 2,
                    block_flags: BlockFlags::empty(),
                    crc: CRCType::NoCRC,
                },
                CanonicalBlock {
                    block: Block::Payload(PayloadBlock { data }),
                    block_number: 1,
                    block_flags: BlockFlags::empty(),
                    crc: CRCType::NoCRC,
                },
            ],
        }
    }

    #[test]
    fn roundtrip() {
        let bundle = get_test_bundle(get_bundle_data());
        let bytes: Vec<u8> = (&bundle).try_into().unwrap();
        assert_eq!(bytes[0], 0x9F);
        assert_eq!(*bytes.last().unwrap(), 0xFF);
        let back: Bundle = bytes.as_slice().try_into().unwrap();
        assert_eq!(bundle, back);
    }

    #[test]
    fn validation() {
        let bundle = get_test_bundle(get_bundle_data());
        assert!(bundle.validate());

        // payload must be the last block
        let mut reordered = bundle.clone();
        reordered.blocks.swap(0, 1);
        assert!(!reordered.validate());

        // block numbers must be unique
        let mut duplicated = bundle.clone();
        duplicated.blocks[0].block_number = 1;
        assert!(!duplicated.validate());

        // creation time 0 requires a bundle age block
        let mut no_clock = bundle.clone();
        no_clock.primary_block.creation_timestamp.creation_time = DtnTime { timestamp: 0 };
        assert!(!no_clock.validate());
    }

    #[test]
    fn bundle_id() {
        let bundle = get_test_bundle(get_bundle_data());
        let id = bundle.id();
        assert_eq!(id.to_string(), "dtn://node2/incoming-681253789-0");
        assert_eq!(id, id.scrubbed());

        let mut fragmented = bundle;
        fragmented.primary_block.fragment_offset = Some(512);
        fragmented.primary_block.total_data_length = Some(1024);
        let fid = fragmented.id();
        assert!(fid.is_fragment());
        assert_eq!(fid.to_string(), "dtn://node2/incoming-681253789-0-512-1024");
        assert_eq!(fid.scrubbed().to_string(), "dtn://node2/incoming-681253789-0");
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let mut bundle = get_test_bundle(b"abc".to_vec());
        bundle.blocks[1].crc = CRCType::CRC16([0; 2]);
        bundle.blocks[1].sign().unwrap();
        let mut bytes: Vec<u8> = (&bundle).try_into().unwrap();
        // corrupt one byte of the signed block
        let len = bytes.len();
        bytes[len - 3] ^= 0x01;
        assert!(Bundle::try_from(bytes.as_slice()).is_err());
    }

    #[test]
    fn previous_node_handling() {
        let mut bundle = get_test_bundle(get_bundle_data());
        assert!(bundle.previous_node().is_none());
        let node = Endpoint::new("dtn://hop1").unwrap();
        bundle.set_previous_node(&node);
        assert_eq!(bundle.previous_node(), Some(&node));
        assert!(bundle.validate());

        // replacing keeps a single previous node block
        let node2 = Endpoint::new("dtn://hop2").unwrap();
        bundle.set_previous_node(&node2);
        assert_eq!(bundle.previous_node(), Some(&node2));
        assert_eq!(bundle.blocks.len(), 3);
    }

    #[test]
    fn fragment_bundle() {
        let bundle = get_test_bundle(get_bundle_data());
        let fragments = bundle.fragment(256).unwrap();
        let mut current_offset = 0;
        for fragment in &fragments {
            assert!(
                fragment
                    .primary_block
                    .bundle_processing_flags
                    .contains(BundleFlags::FRAGMENT)
            );
            assert_eq!(fragment.primary_block.total_data_length.unwrap(), 1024);
            let fragment_length = Vec::<u8>::try_from(fragment).unwrap().len() as u64;
            assert!(fragment_length <= 256);
            let offset = fragment.primary_block.fragment_offset.unwrap();
            assert_eq!(offset, current_offset);
            current_offset += fragment.payload_block().data.len() as u64;
        }
        assert_eq!(current_offset, 1024);
    }

    #[test]
    fn must_not_fragment_is_honored() {
        let mut bundle = get_test_bundle(get_bundle_data());
        bundle.primary_block.bundle_processing_flags |= BundleFlags::MUST_NOT_FRAGMENT;
        assert!(matches!(
            bundle.fragment(256),
            Err(crate::FragmentationError::MustNotFragment)
        ));
    }

    #[test]
    fn reassemble_out_of_order() {
        let bundle = get_test_bundle(get_bundle_data());
        let mut fragments = bundle.clone().fragment(400).unwrap();
        assert!(fragments.len() > 2);
        fragments.reverse();

        let reassembled = Bundle::reassemble(fragments).unwrap();
        assert!(reassembled.primary_block.fragment_offset.is_none());
        assert!(reassembled.primary_block.total_data_length.is_none());
        assert_eq!(reassembled.payload_block().data, get_bundle_data());
    }

    #[test]
    fn reassemble_incomplete_returns_fragments() {
        let bundle = get_test_bundle(get_bundle_data());
        let mut fragments = bundle.fragment(400).unwrap();
        fragments.pop();
        let count = fragments.len();
        match Bundle::reassemble(fragments) {
            Ok(_) => panic!("reassembled an incomplete payload"),
            Err(returned) => assert_eq!(returned.len(), count),
        }
    }

    #[test]
    fn hex_roundtrip() {
        let bundle = get_test_bundle(b"abc".to_vec());
        let hex = bundle.as_hex().unwrap();
        let back = Bundle::from_hex(&hex).unwrap();
        assert_eq!(bundle, back);
    }
}
