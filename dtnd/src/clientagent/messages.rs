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

use actix::prelude::*;
use bp7::{bundle::Bundle, endpoint::Endpoint};

use crate::bundlestorageagent::BundlePack;

/// A bundle delivered to an application agent.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct ClientDeliverBundle {
    pub bundle: Bundle,
}

/// An application agent starts listening on an endpoint.
#[derive(Message)]
#[rtype(result = "Result<(), String>")]
pub struct EventClientConnected {
    pub endpoint: Endpoint,
    pub sender: Recipient<ClientDeliverBundle>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct EventClientDisconnected {
    pub endpoint: Endpoint,
}

/// The pipeline asks the bus to deliver a bundle locally. Fails when no
/// agent listens on the destination.
#[derive(Message)]
#[rtype(result = "Result<(), ()>")]
pub struct AgentDeliverBundle {
    pub pack: BundlePack,
}

/// An application agent submits data for transmission.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ClientSendBundle {
    pub destination: Endpoint,
    pub payload: Vec<u8>,
    /// Microseconds this bundle stays meaningful.
    pub lifetime: u64,
}

#[derive(Message)]
#[rtype(result = "Vec<Endpoint>")]
pub struct ListRegisteredEndpoints {}
