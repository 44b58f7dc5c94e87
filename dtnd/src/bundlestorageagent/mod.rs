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

use std::collections::{HashMap, HashSet};

use bp7::{
    bundle::{Bundle, BundleId},
    endpoint::Endpoint,
    time::DtnTime,
};
use serde::{Deserialize, Serialize};

pub mod agent;
pub mod messages;

/// A reason to keep a bundle in the store. A bundle without any retention
/// constraint is done from this node's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constraint {
    DispatchPending,
    ForwardPending,
    ReassemblyPending,
    Contraindicated,
    LocalEndpoint,
}

/// The runtime envelope around a bundle while the pipeline works on it.
///
/// The store owns the persistent copy; every mutation of the pack or its
/// bundle is followed by a sync back to the storage agent.
#[derive(Debug, Clone, PartialEq)]
pub struct BundlePack {
    pub bundle: Bundle,
    /// EID of the convergence receiver this bundle came in on, `dtn:none`
    /// for locally originated bundles.
    pub receiver: Endpoint,
    /// Wall clock of reception or creation.
    pub timestamp: DtnTime,
    pub constraints: HashSet<Constraint>,
    /// Small per-bundle records, e.g. `routing/epidemic/sent`.
    pub properties: HashMap<String, Vec<String>>,
}

impl BundlePack {
    pub fn new(bundle: Bundle, receiver: Endpoint) -> Self {
        BundlePack {
            bundle,
            receiver,
            timestamp: DtnTime::now(),
            constraints: HashSet::new(),
            properties: HashMap::new(),
        }
    }

    pub fn id(&self) -> BundleId {
        self.bundle.id()
    }

    pub fn has_constraint(&self, constraint: Constraint) -> bool {
        self.constraints.contains(&constraint)
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.insert(constraint);
    }

    pub fn remove_constraint(&mut self, constraint: Constraint) {
        self.constraints.remove(&constraint);
    }

    /// Clears all retention constraints except LocalEndpoint, which only a
    /// completed local delivery may remove.
    pub fn purge_constraints(&mut self) {
        self.constraints
            .retain(|c| *c == Constraint::LocalEndpoint);
    }

    pub fn has_constraints(&self) -> bool {
        !self.constraints.is_empty()
    }

    /// A pack is pending when it still needs a forwarding opportunity and
    /// is not waiting for missing fragments.
    pub fn is_pending(&self) -> bool {
        !self.has_constraint(Constraint::ReassemblyPending)
            && (self.has_constraint(Constraint::ForwardPending)
                || self.has_constraint(Constraint::Contraindicated))
    }

    /// When this bundle leaves the store no matter what. Based on the
    /// creation timestamp, or on reception time corrected by the bundle
    /// age for sources without a clock.
    pub fn expires_at(&self) -> DtnTime {
        let lifetime_secs = self.bundle.primary_block.lifetime.div_ceil(1_000_000);
        let creation = self.bundle.primary_block.creation_timestamp.creation_time;
        if creation.timestamp != 0 {
            DtnTime {
                timestamp: creation.timestamp.saturating_add(lifetime_secs),
            }
        } else {
            let age_secs = self.bundle.bundle_age().unwrap_or(0) / 1_000_000;
            DtnTime {
                timestamp: self
                    .timestamp
                    .timestamp
                    .saturating_sub(age_secs)
                    .saturating_add(lifetime_secs),
            }
        }
    }
}

/// The persisted metadata record of one store entry. Bundle bytes live in
/// a separate tree, addressed by the ids in `parts` (exactly one entry
/// unless a reassembly is in progress).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleItem {
    pub id: BundleId,
    pub pending: bool,
    pub expires_at: DtnTime,
    pub receiver: Endpoint,
    pub timestamp: DtnTime,
    pub constraints: HashSet<Constraint>,
    pub properties: HashMap<String, Vec<String>>,
    pub parts: Vec<BundleId>,
}

#[cfg(test)]
mod tests {
    use bp7::{
        block::{Block, CanonicalBlock, bundle_age_block::BundleAgeBlock, payload_block::PayloadBlock},
        blockflags::BlockFlags,
        bundle::Bundle,
        bundleflags::BundleFlags,
        crc::CRCType,
        endpoint::Endpoint,
        primaryblock::PrimaryBlock,
        time::{CreationTimestamp, DtnTime},
    };

    use super::{BundlePack, Constraint};

    fn bundle(creation_secs: u64, age_us: Option<u64>) -> Bundle {
        let mut blocks = Vec::new();
        if let Some(age) = age_us {
            blocks.push(CanonicalBlock {
                block: Block::BundleAge(BundleAgeBlock { age }),
                block_number: 2,
                block_flags: BlockFlags::empty(),
                crc: CRCType::NoCRC,
            });
        }
        blocks.push(CanonicalBlock {
            block: Block::Payload(PayloadBlock {
                data: b"x".to_vec(),
            }),
            block_number: 1,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        });
        Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::MUST_NOT_FRAGMENT,
                crc: CRCType::NoCRC,
                destination_endpoint: Endpoint::new("dtn://node2/in").unwrap(),
                source_node: Endpoint::new("dtn://node1/out").unwrap(),
                report_to: Endpoint::none(),
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime {
                        timestamp: creation_secs,
                    },
                    sequence_number: 0,
                },
                lifetime: 3_600_000_000,
                fragment_offset: None,
                total_data_length: None,
            },
            blocks,
        }
    }

    #[test]
    fn pending_follows_the_constraint_invariant() {
        let mut pack = BundlePack::new(bundle(1000, None), Endpoint::none());
        assert!(!pack.is_pending());

        pack.add_constraint(Constraint::ForwardPending);
        assert!(pack.is_pending());

        pack.add_constraint(Constraint::ReassemblyPending);
        assert!(!pack.is_pending());

        pack.remove_constraint(Constraint::ReassemblyPending);
        pack.remove_constraint(Constraint::ForwardPending);
        pack.add_constraint(Constraint::Contraindicated);
        assert!(pack.is_pending());
    }

    #[test]
    fn purge_keeps_local_endpoint() {
        let mut pack = BundlePack::new(bundle(1000, None), Endpoint::none());
        pack.add_constraint(Constraint::DispatchPending);
        pack.add_constraint(Constraint::LocalEndpoint);
        pack.purge_constraints();
        assert!(pack.has_constraint(Constraint::LocalEndpoint));
        assert!(!pack.has_constraint(Constraint::DispatchPending));
    }

    #[test]
    fn expiry_from_creation_timestamp() {
        let pack = BundlePack::new(bundle(1000, None), Endpoint::none());
        // lifetime of one hour in microseconds
        assert_eq!(pack.expires_at(), DtnTime { timestamp: 4600 });
    }

    #[test]
    fn expiry_without_clock_uses_bundle_age() {
        // ten minutes of age already accumulated
        let pack = BundlePack::new(bundle(0, Some(600_000_000)), Endpoint::none());
        let expected = pack.timestamp.timestamp - 600 + 3600;
        assert_eq!(pack.expires_at().timestamp, expected);
    }
}
