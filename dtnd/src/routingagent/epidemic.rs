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

use bp7::{bundle::BundleId, endpoint::Endpoint};
use log::debug;

use crate::{bundlestorageagent::BundlePack, convergenceagent::messages::ClaPeer};

use super::{RoutingAlgorithm, sent_set_from_properties};

/// Flooding: every bundle is offered to every connected peer exactly once.
///
/// The per-bundle sent-set keeps a copy from bouncing between two nodes
/// forever and survives restarts through the store properties.
#[derive(Default)]
pub struct Epidemic {
    sent: HashMap<BundleId, HashSet<Endpoint>>,
}

impl Epidemic {
    pub fn new() -> Self {
        Epidemic::default()
    }

    fn seed(&mut self, pack: &BundlePack) -> &mut HashSet<Endpoint> {
        let id = pack.id();
        if !self.sent.contains_key(&id) {
            let mut initial = sent_set_from_properties(pack, "epidemic");
            // whoever handed us the bundle has it already
            if let Some(previous) = pack.bundle.previous_node() {
                initial.insert(previous.node_endpoint());
            }
            if !pack.receiver.is_null_endpoint() {
                initial.insert(pack.receiver.node_endpoint());
            }
            initial.insert(pack.bundle.primary_block.source_node.node_endpoint());
            self.sent.insert(id.clone(), initial);
        }
        self.sent.get_mut(&id).unwrap()
    }
}

impl RoutingAlgorithm for Epidemic {
    fn name(&self) -> &'static str {
        "epidemic"
    }

    fn notify_incoming(&mut self, pack: &BundlePack) {
        self.seed(pack);
    }

    fn dispatching_allowed(&self, _pack: &BundlePack) -> bool {
        true
    }

    fn senders_for_bundle(
        &mut self,
        pack: &BundlePack,
        peers: &HashMap<Endpoint, ClaPeer>,
    ) -> (Vec<ClaPeer>, bool) {
        let sent = self.seed(pack);
        let chosen: Vec<ClaPeer> = peers
            .values()
            .filter(|peer| !sent.contains(&peer.endpoint))
            .cloned()
            .collect();
        for peer in &chosen {
            sent.insert(peer.endpoint.clone());
        }
        debug!(
            "Epidemic offers bundle {} to {} peers",
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

    fn report_peer_appeared(&mut self, _peer: &ClaPeer) {}

    fn report_peer_disappeared(&mut self, _endpoint: &Endpoint) {}

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
    use std::collections::{HashMap, HashSet};

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

    use super::Epidemic;

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

    fn pack() -> BundlePack {
        let bundle = Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::MUST_NOT_FRAGMENT,
                crc: CRCType::NoCRC,
                destination_endpoint: Endpoint::new("dtn://far/app").unwrap(),
                source_node: Endpoint::new("dtn://source/app").unwrap(),
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
        BundlePack::new(bundle, Endpoint::new("dtn://peer1").unwrap())
    }

    fn peer(sink: &Addr<Sink>, uri: &str) -> ClaPeer {
        ClaPeer {
            endpoint: Endpoint::new(uri).unwrap(),
            address: format!("test:{uri}"),
            sender: sink.clone().recipient(),
        }
    }

    #[actix_rt::test]
    async fn chosen_senders_never_repeat() {
        let sink = Sink.start();
        let mut epidemic = Epidemic::new();
        let pack = pack();
        epidemic.notify_incoming(&pack);

        let mut peers = HashMap::new();
        for uri in ["dtn://peer1", "dtn://peer2", "dtn://peer3"] {
            let p = peer(&sink, uri);
            peers.insert(p.endpoint.clone(), p);
        }

        let (first, delete) = epidemic.senders_for_bundle(&pack, &peers);
        assert!(!delete);
        // peer1 handed us the bundle and must not get it back
        let first_eids: HashSet<_> = first.iter().map(|p| p.endpoint.clone()).collect();
        assert!(!first_eids.contains(&Endpoint::new("dtn://peer1").unwrap()));
        assert_eq!(first.len(), 2);

        // a second query has nobody new to offer
        let (second, _) = epidemic.senders_for_bundle(&pack, &peers);
        assert!(second.is_empty());
    }

    #[actix_rt::test]
    async fn failed_sends_are_retried() {
        let sink = Sink.start();
        let mut epidemic = Epidemic::new();
        let pack = pack();
        epidemic.notify_incoming(&pack);

        let mut peers = HashMap::new();
        let p = peer(&sink, "dtn://peer2");
        peers.insert(p.endpoint.clone(), p);

        let (first, _) = epidemic.senders_for_bundle(&pack, &peers);
        assert_eq!(first.len(), 1);

        epidemic.report_failure(&pack.id(), &Endpoint::new("dtn://peer2").unwrap());
        let (second, _) = epidemic.senders_for_bundle(&pack, &peers);
        assert_eq!(second.len(), 1);
    }

    #[actix_rt::test]
    async fn sent_set_restored_from_properties() {
        let sink = Sink.start();
        let mut epidemic = Epidemic::new();
        let mut pack = pack();
        pack.properties.insert(
            String::from("routing/epidemic/sent"),
            vec![String::from("dtn://peer2")],
        );

        let mut peers = HashMap::new();
        let p = peer(&sink, "dtn://peer2");
        peers.insert(p.endpoint.clone(), p);

        let (chosen, _) = epidemic.senders_for_bundle(&pack, &peers);
        assert!(chosen.is_empty());
    }
}
