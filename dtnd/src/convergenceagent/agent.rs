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
use std::time::Duration;

use bp7::endpoint::Endpoint;
use log::{debug, info, warn};

use crate::{
    bundleprotocolagent::messages::{ReceiveBundle, RetryPending},
    common::settings::Settings,
    discovery::ClaType,
    mtcpconvergenceagent,
    routingagent::messages::{ReportPeerAppeared, ReportPeerDisappeared},
    tcpclconvergenceagent,
};

use super::messages::{
    CLRegisterNode, CLUnregisterNode, ClaPeer, EventBundleReceived, ListClaReceivers,
    RegisterCla, RegisterClaReceiver,
};
use actix::prelude::*;

const DEFAULT_RETRIES: u32 = 10;
const MAX_BACKOFF_SECS: u64 = 300;

struct RegisteredCla {
    cla_type: ClaType,
    address: String,
    node: Option<Endpoint>,
    permanent: bool,
    retries_left: u32,
    attempt: u32,
}

/// Multiplexes all convergence adapters behind one registry.
///
/// Sessions report in with [`CLRegisterNode`] once they know their peer and
/// out with [`CLUnregisterNode`] when they end; registered but currently
/// dead adapters get re-dialed with backoff until their retry budget runs
/// out (permanent ones forever).
#[derive(Default)]
pub struct Daemon {
    endpoint: Option<Endpoint>,
    registered: HashMap<String, RegisteredCla>,
    connected_peers: HashMap<Endpoint, ClaPeer>,
    receiver_endpoints: HashMap<ClaType, HashSet<Endpoint>>,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        let settings = Settings::from_env();
        self.endpoint = Some(Endpoint::new(&settings.my_node_id).unwrap());
    }

    fn stopped(&mut self, _ctx: &mut Context<Self>) {
        info!("Closing all convergence peer channels");
        for (node_endpoint, _) in self.connected_peers.drain() {
            info!("Closed peer channel for {node_endpoint}");
        }
    }
}

impl actix::Supervised for Daemon {}

impl SystemService for Daemon {}

impl Handler<RegisterCla> for Daemon {
    type Result = Result<(), String>;

    fn handle(&mut self, msg: RegisterCla, _ctx: &mut Context<Self>) -> Self::Result {
        let RegisterCla {
            cla_type,
            address,
            node,
            permanent,
        } = msg;

        if self.registered.contains_key(&address) {
            return Err(format!("address {address} is already registered"));
        }
        if cla_type == ClaType::Mtcp && node.is_none() {
            return Err(String::from("an mtcp peer needs a configured node id"));
        }
        if let Some(node) = &node {
            if node.matches_node(self.endpoint.as_ref().unwrap()) {
                return Err(format!("peer {node} is hosted on this node"));
            }
        }

        info!("Registering {cla_type:?} convergence peer at {address}");
        let cla = RegisteredCla {
            cla_type,
            address: address.clone(),
            node,
            permanent,
            retries_left: DEFAULT_RETRIES,
            attempt: 0,
        };
        Self::dial(&cla);
        self.registered.insert(address, cla);
        Ok(())
    }
}

impl Handler<RegisterClaReceiver> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: RegisterClaReceiver, _ctx: &mut Context<Self>) -> Self::Result {
        debug!(
            "Convergence receiver of type {:?} listens on {}",
            msg.cla_type, msg.endpoint
        );
        self.receiver_endpoints
            .entry(msg.cla_type)
            .or_default()
            .insert(msg.endpoint);
    }
}

impl Handler<ListClaReceivers> for Daemon {
    type Result = Vec<Endpoint>;

    fn handle(&mut self, _msg: ListClaReceivers, _ctx: &mut Context<Self>) -> Self::Result {
        self.receiver_endpoints
            .values()
            .flatten()
            .cloned()
            .collect()
    }
}

impl Handler<CLRegisterNode> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: CLRegisterNode, _ctx: &mut Context<Self>) -> Self::Result {
        let CLRegisterNode {
            address,
            node,
            sender,
        } = msg;
        let node = node.node_endpoint();
        info!("Peer {node} appeared at {address}");

        if let Some(registration) = self.registered.get_mut(&address) {
            registration.retries_left = DEFAULT_RETRIES;
            registration.attempt = 0;
        }

        let peer = ClaPeer {
            endpoint: node.clone(),
            address,
            sender,
        };
        self.connected_peers.insert(node, peer.clone());

        crate::routingagent::agent::Daemon::from_registry()
            .do_send(ReportPeerAppeared { peer });
        // a fresh peer is a fresh forwarding opportunity
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(RetryPending {});
    }
}

impl Handler<CLUnregisterNode> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: CLUnregisterNode, ctx: &mut Context<Self>) -> Self::Result {
        let CLUnregisterNode { address, node } = msg;
        info!(
            "Convergence session at {address} ended (peer {})",
            node.as_ref().map_or_else(|| String::from("unknown"), ToString::to_string)
        );

        if let Some(node) = node {
            let node = node.node_endpoint();
            if self.connected_peers.remove(&node).is_some() {
                crate::routingagent::agent::Daemon::from_registry()
                    .do_send(ReportPeerDisappeared { endpoint: node });
            }
        }

        let Some(registration) = self.registered.get_mut(&address) else {
            return;
        };
        if !registration.permanent {
            if registration.retries_left == 0 {
                warn!("Giving up on convergence peer at {address}");
                self.registered.remove(&address);
                return;
            }
            registration.retries_left -= 1;
        }
        registration.attempt += 1;
        let delay = Duration::from_secs(
            (1u64 << registration.attempt.min(16)).min(MAX_BACKOFF_SECS),
        );
        debug!("Re-dialing {address} in {delay:?}");
        let redial_address = address.clone();
        ctx.run_later(delay, move |act, _ctx| act.redial(&redial_address));
    }
}

impl Handler<EventBundleReceived> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: EventBundleReceived, _ctx: &mut Context<Self>) -> Self::Result {
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(ReceiveBundle {
            bundle: msg.bundle,
            receiver: msg.endpoint,
        });
    }
}

impl Daemon {
    fn dial(cla: &RegisteredCla) {
        match cla.cla_type {
            ClaType::Tcpcl => {
                crate::tcpclconvergenceagent::agent::TCPCLServer::from_registry().do_send(
                    tcpclconvergenceagent::messages::ConnectRemote {
                        address: cla.address.clone(),
                    },
                );
            }
            ClaType::Mtcp => {
                crate::mtcpconvergenceagent::agent::MTCPAgent::from_registry().do_send(
                    mtcpconvergenceagent::messages::ConnectRemote {
                        address: cla.address.clone(),
                        node: cla
                            .node
                            .clone()
                            .expect("mtcp registrations always carry a node id"),
                    },
                );
            }
        }
    }

    fn redial(&mut self, address: &str) {
        let Some(registration) = self.registered.get(address) else {
            return;
        };
        // the session may have come back on its own in the meantime
        if self
            .connected_peers
            .values()
            .any(|p| p.address == address)
        {
            return;
        }
        if let Some(node) = &registration.node {
            if node.matches_node(self.endpoint.as_ref().unwrap()) {
                warn!("Dropping registration for {address}, it points at this node");
                self.registered.remove(address);
                return;
            }
        }
        Self::dial(registration);
    }
}
