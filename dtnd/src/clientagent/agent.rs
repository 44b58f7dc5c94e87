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

use std::collections::HashMap;

use bp7::endpoint::Endpoint;
use log::{debug, info, warn};

use crate::{
    bundleprotocolagent::messages::{RetryPending, TransmitPayload},
    common::{messages::Shutdown, settings::Settings},
};

use super::messages::{
    AgentDeliverBundle, ClientDeliverBundle, ClientSendBundle, EventClientConnected,
    EventClientDisconnected, ListRegisteredEndpoints,
};
use actix::prelude::*;

/// The bus between the core and application agents.
///
/// Agents declare the endpoints they listen on; bundles addressed to such
/// an endpoint are handed to every matching agent. Outbound data from
/// agents is turned into bundle transmissions.
#[derive(Default)]
pub struct Daemon {
    endpoint: Option<Endpoint>,
    agents: HashMap<Endpoint, Vec<Recipient<ClientDeliverBundle>>>,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        let settings = Settings::from_env();
        self.endpoint = Some(Endpoint::new(&settings.my_node_id).unwrap());
    }

    fn stopped(&mut self, _ctx: &mut Context<Self>) {
        info!("Closing all application agent channels");
        self.agents.clear();
    }
}

impl actix::Supervised for Daemon {}

impl SystemService for Daemon {}

impl Handler<EventClientConnected> for Daemon {
    type Result = Result<(), String>;

    fn handle(&mut self, msg: EventClientConnected, _ctx: &mut Context<Self>) -> Self::Result {
        let EventClientConnected { endpoint, sender } = msg;
        if !endpoint.matches_node(self.endpoint.as_ref().unwrap()) {
            return Err(format!(
                "endpoint {endpoint} does not belong to this node"
            ));
        }
        info!("Application agent registered for {endpoint}");
        self.agents.entry(endpoint).or_default().push(sender);

        // a waiting bundle may now have its receiver
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(RetryPending {});
        Ok(())
    }
}

impl Handler<EventClientDisconnected> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: EventClientDisconnected, _ctx: &mut Context<Self>) -> Self::Result {
        info!("Application agents for {} disconnected", msg.endpoint);
        self.agents.remove(&msg.endpoint);
    }
}

impl Handler<AgentDeliverBundle> for Daemon {
    type Result = Result<(), ()>;

    fn handle(&mut self, msg: AgentDeliverBundle, _ctx: &mut Context<Self>) -> Self::Result {
        let destination = &msg.pack.bundle.primary_block.destination_endpoint;
        let Some(receivers) = self.agents.get(destination) else {
            debug!("No agent listens on {destination}");
            return Err(());
        };
        if receivers.is_empty() {
            return Err(());
        }
        for receiver in receivers {
            if let Err(e) = receiver.try_send(ClientDeliverBundle {
                bundle: msg.pack.bundle.clone(),
            }) {
                warn!("Could not hand bundle to an agent for {destination}: {e}");
            }
        }
        Ok(())
    }
}

impl Handler<ClientSendBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ClientSendBundle, _ctx: &mut Context<Self>) -> Self::Result {
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(TransmitPayload {
            destination: msg.destination,
            payload: msg.payload,
            lifetime: msg.lifetime,
        });
    }
}

impl Handler<ListRegisteredEndpoints> for Daemon {
    type Result = Vec<Endpoint>;

    fn handle(&mut self, _msg: ListRegisteredEndpoints, _ctx: &mut Context<Self>) -> Self::Result {
        self.agents.keys().cloned().collect()
    }
}

impl Handler<Shutdown> for Daemon {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, _ctx: &mut Context<Self>) -> Self::Result {
        self.agents.clear();
    }
}
