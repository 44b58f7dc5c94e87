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

/// A bundle arrived over a convergence receiver.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ReceiveBundle {
    pub bundle: Bundle,
    /// EID of the receiver the bundle came in on.
    pub receiver: Endpoint,
}

/// Inject a fully built, locally originated bundle (status reports,
/// routing metadata). The sequence number is assigned by the store.
#[derive(Message)]
#[rtype(result = "()")]
pub struct TransmitBundle {
    pub bundle: Bundle,
}

/// Build and transmit a bundle around an application payload.
#[derive(Message)]
#[rtype(result = "()")]
pub struct TransmitPayload {
    pub destination: Endpoint,
    pub payload: Vec<u8>,
    /// Microseconds this bundle stays meaningful.
    pub lifetime: u64,
}

/// Pull everything pending out of the store and run it through dispatch
/// again. Triggered periodically and whenever a peer or agent appears.
#[derive(Message)]
#[rtype(result = "()")]
pub struct RetryPending {}
