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
use log::{info, warn};

use crate::{
    bundleprotocolagent::messages::TransmitBundle,
    bundlestorageagent::messages::{QueryAllIds, UpdateBundleProperties},
    common::settings::{RoutingKind, Settings},
    convergenceagent::messages::ClaPeer,
};

use super::{
    RoutingAlgorithm, epidemic::Epidemic, messages::*, prophet::{Prophet, ProphetConfig},
    sent_property_key,
};
use actix::prelude::*;

/// Owns the routing strategy chosen at startup and the view of currently
/// connected peers. Everything bundle-related is delegated to the
/// algorithm; this agent persists the per-bundle sent-sets afterwards.
#[derive(Default)]
pub struct Daemon {
    algorithm: Option<Box<dyn RoutingAlgorithm>>,
    peers: HashMap<Endpoint, ClaPeer>,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        let settings = Settings::from_env();
        let endpoint = Endpoint::new(&settings.my_node_id).unwrap();
        let algorithm: Box<dyn RoutingAlgorithm> = match settings.routing {
            RoutingKind::Epidemic => Box::new(Epidemic::new()),
            RoutingKind::Prophet => Box::new(Prophet::new(
                ProphetConfig::default(),
                endpoint.node_endpoint(),
                Box::new(|bundle| {
                    crate::bundleprotocolagent::agent::Daemon::from_registry()
                        .do_send(TransmitBundle { bundle });
                }),
            )),
        };
        info!("Routing with the {} algorithm", algorithm.name());
        self.algorithm = Some(algorithm);
    }
}

impl actix::Supervised for Daemon {}

impl SystemService for Daemon {}

impl Handler<NotifyIncoming> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: NotifyIncoming, _ctx: &mut Context<Self>) -> Self::Result {
        let id = msg.pack.id();
        self.algorithm_mut().notify_incoming(&msg.pack);
        self.persist_sent(&id);
    }
}

impl Handler<DispatchingAllowed> for Daemon {
    type Result = Result<bool, ()>;

    fn handle(&mut self, msg: DispatchingAllowed, _ctx: &mut Context<Self>) -> Self::Result {
        Ok(self.algorithm_ref().dispatching_allowed(&msg.pack))
    }
}

impl Handler<SenderForBundle> for Daemon {
    type Result = Result<SenderForBundleResponse, ()>;

    fn handle(&mut self, msg: SenderForBundle, _ctx: &mut Context<Self>) -> Self::Result {
        let id = msg.pack.id();
        let peers = self.peers.clone();
        let (senders, delete_afterwards) =
            self.algorithm_mut().senders_for_bundle(&msg.pack, &peers);
        self.persist_sent(&id);
        Ok(SenderForBundleResponse {
            senders,
            delete_afterwards,
        })
    }
}

impl Handler<ReportFailure> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ReportFailure, _ctx: &mut Context<Self>) -> Self::Result {
        warn!(
            "Sending bundle {} to {} failed, it may be offered again",
            msg.id, msg.endpoint
        );
        self.algorithm_mut().report_failure(&msg.id, &msg.endpoint);
        self.persist_sent(&msg.id);
    }
}

impl Handler<ReportPeerAppeared> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ReportPeerAppeared, _ctx: &mut Context<Self>) -> Self::Result {
        self.peers
            .insert(msg.peer.endpoint.clone(), msg.peer.clone());
        self.algorithm_mut().report_peer_appeared(&msg.peer);
    }
}

impl Handler<ReportPeerDisappeared> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ReportPeerDisappeared, _ctx: &mut Context<Self>) -> Self::Result {
        self.peers.remove(&msg.endpoint);
        self.algorithm_mut().report_peer_disappeared(&msg.endpoint);
    }
}

impl Handler<NotifyCleanup> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: NotifyCleanup, _ctx: &mut Context<Self>) -> Self::Result {
        self.algorithm_mut().forget(&msg.ids);
    }
}

impl Handler<AgeTick> for Daemon {
    type Result = ();

    fn handle(&mut self, _msg: AgeTick, _ctx: &mut Context<Self>) -> Self::Result {
        self.algorithm_mut().age();
    }
}

impl Handler<GcTick> for Daemon {
    type Result = ();

    fn handle(&mut self, _msg: GcTick, ctx: &mut Context<Self>) -> Self::Result {
        crate::bundlestorageagent::agent::Daemon::from_registry()
            .send(QueryAllIds {})
            .into_actor(self)
            .map(|res, act, _ctx| match res {
                Ok(ids) => {
                    let known: HashSet<BundleId> = ids.into_iter().collect();
                    act.algorithm_mut().retain_known(&known);
                }
                Err(e) => warn!("Could not list stored bundles for routing gc: {e}"),
            })
            .spawn(ctx);
    }
}

impl Daemon {
    fn algorithm_mut(&mut self) -> &mut Box<dyn RoutingAlgorithm> {
        self.algorithm
            .as_mut()
            .expect("the routing algorithm is set on startup")
    }

    fn algorithm_ref(&self) -> &dyn RoutingAlgorithm {
        self.algorithm
            .as_deref()
            .expect("the routing algorithm is set on startup")
    }

    fn persist_sent(&mut self, id: &BundleId) {
        let algorithm = self.algorithm_ref();
        let key = sent_property_key(algorithm.name());
        let values = algorithm.sent_eids(id);
        if values.is_empty() {
            return;
        }
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(
            UpdateBundleProperties {
                id: id.clone(),
                key,
                values,
            },
        );
    }
}
