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

use std::fmt::Debug;

use actix::prelude::*;
use bp7::{bundle::Bundle, endpoint::Endpoint};
use tokio::sync::oneshot;

use crate::{bundlestorageagent::BundlePack, discovery::ClaType};

/// Hand a bundle to a convergence sender. The responder reports whether
/// the peer acknowledged the transfer.
#[derive(Message)]
#[rtype(result = "()")]
pub struct AgentForwardBundle {
    pub pack: BundlePack,
    pub responder: oneshot::Sender<bool>,
}

/// A connected peer as seen by routing and the pipeline: its node EID and
/// the mailbox of the session serializing sends to it.
#[derive(Clone)]
pub struct ClaPeer {
    /// Node endpoint of the peer.
    pub endpoint: Endpoint,
    /// Stable convergence address, used to dedupe registrations.
    pub address: String,
    pub sender: Recipient<AgentForwardBundle>,
}

impl Debug for ClaPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaPeer")
            .field("endpoint", &self.endpoint)
            .field("address", &self.address)
            .finish()
    }
}

impl PartialEq for ClaPeer {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint && self.address == other.address
    }
}

/// Register a convergence adapter for a remote address, dialing it and
/// keeping it alive according to its permanence.
#[derive(Message)]
#[rtype(result = "Result<(), String>")]
pub struct RegisterCla {
    pub cla_type: ClaType,
    pub address: String,
    /// Peer node EID; required for MTCP, which has no handshake telling
    /// us who answers.
    pub node: Option<Endpoint>,
    pub permanent: bool,
}

/// Announce a local convergence receiver and the EID it listens on.
#[derive(Message)]
#[rtype(result = "()")]
pub struct RegisterClaReceiver {
    pub cla_type: ClaType,
    pub endpoint: Endpoint,
}

#[derive(Message)]
#[rtype(result = "Vec<Endpoint>")]
pub struct ListClaReceivers {}

/// A convergence session learned who its peer is and can send bundles.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CLRegisterNode {
    pub address: String,
    pub node: Endpoint,
    pub sender: Recipient<AgentForwardBundle>,
}

/// A convergence session ended.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CLUnregisterNode {
    pub address: String,
    pub node: Option<Endpoint>,
}

/// A bundle arrived on a convergence receiver.
#[derive(Message)]
#[rtype(result = "()")]
pub struct EventBundleReceived {
    pub bundle: Bundle,
    /// EID of the receiver the bundle came in on.
    pub endpoint: Endpoint,
}
