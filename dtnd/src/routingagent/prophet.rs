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

use std::collections::{BTreeMap, HashMap, HashSet};

use bp7::{
    block::{Block, CanonicalBlock, payload_block::PayloadBlock,
        routing_metadata_block::RoutingMetadataBlock},
    blockflags::BlockFlags,
    bundle::{Bundle, BundleId},
    bundleflags::BundleFlags,
    crc::CRCType,
    endpoint::Endpoint,
    primaryblock::PrimaryBlock,
    time::{CreationTimestamp, DtnTime},
};
use log::debug;

use crate::{bundlestorageagent::BundlePack, convergenceagent::messages::ClaPeer};

use super::{RoutingAlgorithm, SendBundleFn, sent_set_from_properties};

/// Lifetime of a predictability announcement. These are only useful for
/// the moment of an encounter, so they leave the network quickly.
const METADATA_LIFETIME: u64 = 60_000_000;

#[derive(Debug, Clone, Copy)]
pub struct ProphetConfig {
    /// Encounter gain, P_init of the paper.
    pub p_init: f64,
    /// Transitivity damping.
    pub beta: f64,
    /// Decay factor per aging interval.
    pub gamma: f64,
}

impl Default for ProphetConfig {
    fn default() -> Self {
        ProphetConfig {
            p_init: 0.75,
            beta: 0.25,
            gamma: 0.98,
        }
    }
}

/// PRoPHET: probabilistic routing based on encounter history.
///
/// `predictabilities` is P(self, d); `peer_predictabilities` caches the
/// last summary vector each peer sent us. Bundles flow towards peers whose
/// delivery predictability beats our own.
pub struct Prophet {
    config: ProphetConfig,
    node_endpoint: Endpoint,
    predictabilities: HashMap<Endpoint, f64>,
    peer_predictabilities: HashMap<Endpoint, HashMap<Endpoint, f64>>,
    sent: HashMap<BundleId, HashSet<Endpoint>>,
    send_bundle: SendBundleFn,
}

impl Prophet {
    pub fn new(config: ProphetConfig, node_endpoint: Endpoint, send_bundle: SendBundleFn) -> Self {
        Prophet {
            config,
            node_endpoint,
            predictabilities: HashMap::new(),
            peer_predictabilities: HashMap::new(),
            sent: HashMap::new(),
            send_bundle,
        }
    }

    fn p_self(&self, destination: &Endpoint) -> f64 {
        *self.predictabilities.get(destination).unwrap_or(&0.0)
    }

    /// P(self, b) grows on every direct encounter with b.
    fn encounter(&mut self, peer: &Endpoint) {
        let old = self.p_self(peer);
        let new = old + (1.0 - old) * self.config.p_init;
        self.predictabilities.insert(peer.clone(), new);
        debug!("Encounter with {peer}: predictability {old} -> {new}");
    }

    /// Transitivity: b is a good path to everyone b itself can deliver to.
    fn apply_summary_vector(&mut self, peer: &Endpoint, entries: &HashMap<Endpoint, f64>) {
        let p_self_peer = self.p_self(peer);
        for (destination, p_peer_dest) in entries {
            if destination == &self.node_endpoint || destination == peer {
                continue;
            }
            let old = self.p_self(destination);
            let new = old + (1.0 - old) * p_self_peer * p_peer_dest * self.config.beta;
            self.predictabilities.insert(destination.clone(), new);
        }
        self.peer_predictabilities
            .insert(peer.clone(), entries.clone());
    }

    fn seed(&mut self, pack: &BundlePack) -> &mut HashSet<Endpoint> {
        let id = pack.id();
        if !self.sent.contains_key(&id) {
            let mut initial = sent_set_from_properties(pack, "prophet");
            if let Some(previous) = pack.bundle.previous_node() {
                initial.insert(previous.node_endpoint());
            }
            initial.insert(pack.bundle.primary_block.source_node.node_endpoint());
            self.sent.insert(id.clone(), initial);
        }
        self.sent.get_mut(&id).unwrap()
    }

    fn metadata_bundle(&self, to: &Endpoint) -> Bundle {
        let entries: BTreeMap<Endpoint, f64> = self
            .predictabilities
            .iter()
            .map(|(e, p)| (e.clone(), *p))
            .collect();
        Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::MUST_NOT_FRAGMENT,
                crc: CRCType::NoCRC,
                destination_endpoint: to.node_endpoint(),
                source_node: self.node_endpoint.clone(),
                report_to: Endpoint::none(),
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime::now(),
                    sequence_number: 0,
                },
                lifetime: METADATA_LIFETIME,
                fragment_offset: None,
                total_data_length: None,
            },
            blocks: vec![
                CanonicalBlock {
                    block: Block::RoutingMetadata(RoutingMetadataBlock {
                        owner: self.node_endpoint.clone(),
                        timestamp: DtnTime::now(),
                        entries,
                    }),
                    block_number: 2,
                    block_flags: BlockFlags::empty(),
                    crc: CRCType::NoCRC,
                },
                CanonicalBlock {
                    block: Block::Payload(PayloadBlock { data: Vec::new() }),
                    block_number: 1,
                    block_flags: BlockFlags::empty(),
                    crc: CRCType::NoCRC,
                },
            ],
        }
    }

    fn metadata_block(pack: &BundlePack) -> Option<&RoutingMetadataBlock> {
        pack.bundle.blocks.iter().find_map(|b| match &b.block {
            Block::RoutingMetadata(md) => Some(md),
            _ => None,
        })
    }
}

impl RoutingAlgorithm for Prophet {
    fn name(&self) -> &'static str {
        "prophet"
    }

    fn notify_incoming(&mut self, pack: &BundlePack) {
        if let Some(metadata) = Self::metadata_block(pack) {
            // summary vectors are unicast; ignore what was not meant for us
            if pack
                .bundle
                .primary_block
                .destination_endpoint
                .matches_node(&self.node_endpoint)
            {
                let owner = metadata.owner.node_endpoint();
                let entries: HashMap<Endpoint, f64> = metadata
                    .entries
                    .iter()
                    .map(|(e, p)| (e.node_endpoint(), *p))
                    .collect();
                debug!(
                    "Applying summary vector of {owner} with {} entries",
                    entries.len()
                );
                self.apply_summary_vector(&owner, &entries);
            }
            return;
        }
        self.seed(pack);
    }

    fn dispatching_allowed(&self, pack: &BundlePack) -> bool {
        // metadata bundles are consumed by notify_incoming and expire on
        // their own, they never travel further
        Self::metadata_block(pack).is_none()
    }

    fn senders_for_bundle(
        &mut self,
        pack: &BundlePack,
        peers: &HashMap<Endpoint, ClaPeer>,
    ) -> (Vec<ClaPeer>, bool) {
        let destination = pack
            .bundle
            .primary_block
            .destination_endpoint
            .node_endpoint();
        let own = self.p_self(&destination);

        let mut chosen = Vec::new();
        for peer in peers.values() {
            let peer_knows = self
                .peer_predictabilities
                .get(&peer.endpoint)
                .and_then(|m| m.get(&destination))
                .copied()
                .unwrap_or(0.0);
            let sent = self.seed(pack);
            if peer_knows > own && !sent.contains(&peer.endpoint) {
                sent.insert(peer.endpoint.clone());
                chosen.push(peer.clone());
            }
        }
        debug!(
            "Prophet offers bundle {} for {destination} (own predictability {own}) to {} peers",
            pack.id(),
            chosen.len()
        );
        (chosen, false)
    }

    fn report_failure(&mut self, id: &BundleId, peer: &Endpoint) {
        if let Some(sent) = self.sent.get_mut(id) {
            sent.remove(peer);
        }
    }

    fn report_peer_appeared(&mut self, peer: &ClaPeer) {
        self.encounter(&peer.endpoint);
        (self.send_bundle)(self.metadata_bundle(&peer.endpoint));
    }

    fn report_peer_disappeared(&mut self, _endpoint: &Endpoint) {}

    fn age(&mut self) {
        for value in self.predictabilities.values_mut() {
            *value *= self.config.gamma;
        }
    }

    fn forget(&mut self, removed: &[BundleId]) {
        for id in removed {
            self.sent.remove(id);
        }
    }

    fn retain_known(&mut self, known: &HashSet<BundleId>) {
        self.sent.retain(|id, _| known.contains(id));
    }

    fn sent_eids(&self, id: &BundleId) -> Vec<String> {
        self.sent
            .get(id)
            .map(|set| set.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use actix::prelude::*;
    use bp7::{
        block::{Block, CanonicalBlock, payload_block::PayloadBlock},
        blockflags::BlockFlags,
        bundle::Bundle,
        bundleflags::BundleFlags,
        crc::CRCType,
        endpoint::Endpoint,
        primaryblock::PrimaryBlock,
        time::{CreationTimestamp, DtnTime},
    };

    use crate::{
        bundlestorageagent::BundlePack,
        convergenceagent::messages::{AgentForwardBundle, ClaPeer},
        routingagent::RoutingAlgorithm,
    };

    use super::{Prophet, ProphetConfig};

    struct Sink;
    impl Actor for Sink {
        type Context = Context<Self>;
    }
    impl Handler<AgentForwardBundle> for Sink {
        type Result = ();
        fn handle(&mut self, msg: AgentForwardBundle, _ctx: &mut Context<Self>) {
            let _ = msg.responder.send(true);
        }
    }

    fn endpoint(uri: &str) -> Endpoint {
        Endpoint::new(uri).unwrap()
    }

    fn prophet() -> (Prophet, Arc<Mutex<Vec<Bundle>>>) {
        let outbox = Arc::new(Mutex::new(Vec::new()));
        let sink = outbox.clone();
        let prophet = Prophet::new(
            ProphetConfig::default(),
            endpoint("dtn://a"),
            Box::new(move |bundle| sink.lock().unwrap().push(bundle)),
        );
        (prophet, outbox)
    }

    fn pack_to(destination: &str) -> BundlePack {
        let bundle = Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::MUST_NOT_FRAGMENT,
                crc: CRCType::NoCRC,
                destination_endpoint: endpoint(destination),
                source_node: endpoint("dtn://a/app"),
                report_to: Endpoint::none(),
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime { timestamp: 1000 },
                    sequence_number: 0,
                },
                lifetime: 3_600_000_000,
                fragment_offset: None,
                total_data_length: None,
            },
            blocks: vec![CanonicalBlock {
                block: Block::Payload(PayloadBlock {
                    data: b"x".to_vec(),
                }),
                block_number: 1,
                block_flags: BlockFlags::empty(),
                crc: CRCType::NoCRC,
            }],
        };
        BundlePack::new(bundle, Endpoint::none())
    }

    #[test]
    fn encounter_update_matches_the_paper() {
        let (mut prophet, _outbox) = prophet();
        prophet.encounter(&endpoint("dtn://b"));
        assert!((prophet.p_self(&endpoint("dtn://b")) - 0.75).abs() < 1e-9);
        prophet.encounter(&endpoint("dtn://b"));
        assert!((prophet.p_self(&endpoint("dtn://b")) - 0.9375).abs() < 1e-9);
    }

    #[test]
    fn transitivity_update_matches_the_paper() {
        let (mut prophet, _outbox) = prophet();
        prophet.encounter(&endpoint("dtn://b"));

        let mut entries = HashMap::new();
        entries.insert(endpoint("dtn://c"), 0.8);
        prophet.apply_summary_vector(&endpoint("dtn://b"), &entries);

        // P(a,c) = 0 + (1 - 0) * 0.75 * 0.8 * 0.25
        assert!((prophet.p_self(&endpoint("dtn://c")) - 0.15).abs() < 1e-9);
    }

    #[test]
    fn aging_decays_predictabilities() {
        let (mut prophet, _outbox) = prophet();
        prophet.encounter(&endpoint("dtn://b"));
        prophet.age();
        assert!((prophet.p_self(&endpoint("dtn://b")) - 0.75 * 0.98).abs() < 1e-9);
    }

    #[actix_rt::test]
    async fn forwards_only_via_better_peers() {
        let (mut prophet, _outbox) = prophet();
        let sink = Sink.start();

        // P(a, c) = 0.2; b announces 0.9, d announces 0.1
        prophet
            .predictabilities
            .insert(endpoint("dtn://c"), 0.2);
        let mut b_vector = HashMap::new();
        b_vector.insert(endpoint("dtn://c"), 0.9);
        prophet
            .peer_predictabilities
            .insert(endpoint("dtn://b"), b_vector);
        let mut d_vector = HashMap::new();
        d_vector.insert(endpoint("dtn://c"), 0.1);
        prophet
            .peer_predictabilities
            .insert(endpoint("dtn://d"), d_vector);

        let mut peers = HashMap::new();
        for uri in ["dtn://b", "dtn://d"] {
            peers.insert(
                endpoint(uri),
                ClaPeer {
                    endpoint: endpoint(uri),
                    address: format!("test:{uri}"),
                    sender: sink.clone().recipient(),
                },
            );
        }

        let pack = pack_to("dtn://c/app");
        let (chosen, delete) = prophet.senders_for_bundle(&pack, &peers);
        assert!(!delete);
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].endpoint, endpoint("dtn://b"));
    }

    #[actix_rt::test]
    async fn metadata_bundle_goes_out_on_encounter() {
        let (mut prophet, outbox) = prophet();
        let sink = Sink.start();
        let peer = ClaPeer {
            endpoint: endpoint("dtn://b"),
            address: String::from("test:b"),
            sender: sink.recipient(),
        };
        prophet.report_peer_appeared(&peer);

        let sent = outbox.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let metadata = &sent[0];
        assert_eq!(
            metadata.primary_block.destination_endpoint,
            endpoint("dtn://b")
        );
        assert_eq!(metadata.primary_block.lifetime, 60_000_000);
        assert!(
            metadata
                .primary_block
                .bundle_processing_flags
                .contains(BundleFlags::MUST_NOT_FRAGMENT)
        );
        assert!(metadata.blocks.iter().any(|b| matches!(
            b.block,
            Block::RoutingMetadata(_)
        )));
    }
}
