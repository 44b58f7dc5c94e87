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

use bp7::{
    SerializationError, Validate,
    administrative_record::{
        AdministrativeRecord,
        bundle_status_report::{BundleStatusReason, BundleStatusReport, StatusInformation},
    },
    block::{Block, CanonicalBlock, payload_block::PayloadBlock},
    blockflags::BlockFlags,
    bundle::Bundle,
    bundleflags::BundleFlags,
    crc::CRCType,
    endpoint::Endpoint,
    primaryblock::PrimaryBlock,
    time::{CreationTimestamp, DtnTime},
};

// Hand-encoded reference bundle:
//   indefinite array of
//     [7, MUST_NOT_FRAGMENT, no crc, dtn://node2/sink, dtn://node1/app,
//      dtn://node1/app, [700000000, 0], 3600000000]
//     [1, 1, 0, 0, 'hello']
const BUNDLE_SRC: &str = "9F8807040082016C2F2F6E6F6465322F73696E6B82016B2F2F6E6F6465312F61707082016B2F2F6E6F6465312F617070821A29B92700001AD693A40085010100004568656C6C6FFF";

fn reference_bundle() -> Bundle {
    Bundle {
        primary_block: PrimaryBlock {
            version: 7,
            bundle_processing_flags: BundleFlags::MUST_NOT_FRAGMENT,
            crc: CRCType::NoCRC,
            destination_endpoint: Endpoint::new("dtn://node2/sink").unwrap(),
            source_node: Endpoint::new("dtn://node1/app").unwrap(),
            report_to: Endpoint::new("dtn://node1/app").unwrap(),
            creation_timestamp: CreationTimestamp {
                creation_time: DtnTime {
                    timestamp: 700_000_000,
                },
                sequence_number: 0,
            },
            lifetime: 3_600_000_000,
            fragment_offset: None,
            total_data_length: None,
        },
        blocks: vec![CanonicalBlock {
            block: Block::Payload(PayloadBlock {
                data: b"hello".to_vec(),
            }),
            block_number: 1,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        }],
    }
}

#[test]
fn decode_reference_bundle() -> Result<(), SerializationError> {
    let recovered = Bundle::from_hex(BUNDLE_SRC)?;
    assert_eq!(recovered, reference_bundle());
    assert!(recovered.validate());
    Ok(())
}

#[test]
fn encode_reference_bundle() -> Result<(), SerializationError> {
    assert_eq!(reference_bundle().as_hex()?, BUNDLE_SRC);
    Ok(())
}

#[test]
fn structural_roundtrip_with_crc() -> Result<(), SerializationError> {
    let mut bundle = reference_bundle();
    bundle.primary_block.crc = CRCType::CRC16([0; 2]);
    bundle.primary_block.sign()?;
    bundle.blocks[0].crc = CRCType::CRC32([0; 4]);
    bundle.blocks[0].sign()?;

    let bytes: Vec<u8> = (&bundle).try_into()?;
    let recovered: Bundle = bytes.as_slice().try_into()?;
    assert_eq!(recovered, bundle);

    // re-encoding reproduces the exact crc bytes
    let reencoded: Vec<u8> = (&recovered).try_into()?;
    assert_eq!(reencoded, bytes);
    Ok(())
}

#[test]
fn truncated_input_is_rejected() {
    let mut bytes = vec![0; BUNDLE_SRC.len() / 2];
    binascii::hex2bin(BUNDLE_SRC.as_bytes(), &mut bytes).unwrap();
    for cut in [1, 10, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            Bundle::try_from(&bytes[..cut]).is_err(),
            "accepted a bundle truncated to {cut} bytes"
        );
    }
}

#[test]
fn status_report_embeds_into_payload() -> Result<(), SerializationError> {
    let original = reference_bundle();
    let report = BundleStatusReport::new(
        StatusInformation::ReceivedBundle,
        BundleStatusReason::NoAdditionalInformation,
        original.primary_block.source_node.clone(),
        original.primary_block.creation_timestamp.clone(),
        None,
        None,
        Some(DtnTime::now()),
    );
    let record = AdministrativeRecord::BundleStatusReport(report);
    let payload: Vec<u8> = (&record).try_into()?;

    let parsed = AdministrativeRecord::try_from(payload.as_slice())?;
    assert_eq!(parsed, record);
    let AdministrativeRecord::BundleStatusReport(parsed_report) = parsed;
    assert!(parsed_report.status_information.received_bundle.is_asserted);
    assert!(
        parsed_report
            .status_information
            .received_bundle
            .timestamp
            .is_some()
    );
    assert_eq!(parsed_report.referenced_bundle(), original.id());
    Ok(())
}
